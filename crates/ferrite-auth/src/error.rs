//! Access control error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("authentication required")]
    Unauthorized {
        /// WWW-Authenticate challenge for the client.
        challenge: String,
    },

    #[error("access denied")]
    Denied,

    #[error("unknown auth scheme: {0}")]
    UnknownScheme(String),

    #[error("invalid auth configuration: {0}")]
    Configuration(String),
}
