//! API error types and OCI error bodies

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ferrite_core::DistributionError;
use ferrite_reference::ReferenceError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error(transparent)]
    Distribution(#[from] DistributionError),

    #[error(transparent)]
    Auth(#[from] ferrite_auth::AuthError),
}

impl ApiError {
    /// Map to HTTP status plus the protocol error code.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NAME_UNKNOWN"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BLOB_UPLOAD_INVALID"),
            ApiError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, "UNSUPPORTED"),
            ApiError::Auth(err) => match err {
                ferrite_auth::AuthError::Unauthorized { .. } => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED")
                }
                ferrite_auth::AuthError::Denied => (StatusCode::FORBIDDEN, "DENIED"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "UNKNOWN"),
            },
            ApiError::Distribution(err) => match err {
                DistributionError::UnknownBlob { .. } => (StatusCode::NOT_FOUND, "BLOB_UNKNOWN"),
                DistributionError::UnknownRepository { .. } => {
                    (StatusCode::NOT_FOUND, "NAME_UNKNOWN")
                }
                DistributionError::UnknownManifest { .. }
                | DistributionError::UnknownTag { .. } => {
                    (StatusCode::NOT_FOUND, "MANIFEST_UNKNOWN")
                }
                DistributionError::UnknownUpload { .. } => {
                    (StatusCode::NOT_FOUND, "BLOB_UPLOAD_UNKNOWN")
                }
                DistributionError::Reference(ReferenceError::InvalidTag) => {
                    (StatusCode::BAD_REQUEST, "TAG_INVALID")
                }
                DistributionError::Reference(ReferenceError::InvalidDigest(_)) => {
                    (StatusCode::BAD_REQUEST, "DIGEST_INVALID")
                }
                DistributionError::Reference(_) => (StatusCode::BAD_REQUEST, "NAME_INVALID"),
                DistributionError::Digest(_) | DistributionError::DigestMismatch { .. } => {
                    (StatusCode::BAD_REQUEST, "DIGEST_INVALID")
                }
                DistributionError::SizeMismatch { .. } => {
                    (StatusCode::BAD_REQUEST, "SIZE_INVALID")
                }
                DistributionError::InvalidRange | DistributionError::UploadClosed => (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    "BLOB_UPLOAD_INVALID",
                ),
                DistributionError::ManifestUnverified => {
                    (StatusCode::BAD_REQUEST, "MANIFEST_UNVERIFIED")
                }
                DistributionError::ManifestBlobUnknown { .. } => {
                    (StatusCode::BAD_REQUEST, "MANIFEST_BLOB_UNKNOWN")
                }
                DistributionError::ManifestInvalid(_)
                | DistributionError::InvalidMediaType(_) => {
                    (StatusCode::BAD_REQUEST, "MANIFEST_INVALID")
                }
                DistributionError::ManifestUnsupported(_) => {
                    (StatusCode::BAD_REQUEST, "UNSUPPORTED")
                }
                DistributionError::Unsupported(_) => {
                    (StatusCode::METHOD_NOT_ALLOWED, "UNSUPPORTED")
                }
                DistributionError::Driver(_)
                | DistributionError::Cache(_)
                | DistributionError::Internal(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "UNKNOWN")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!("request failed: {message}");
        }

        let body = axum::Json(json!({
            "errors": [{
                "code": code,
                "message": message,
                "detail": null
            }]
        }));

        let mut response = (status, body).into_response();
        if let ApiError::Auth(ferrite_auth::AuthError::Unauthorized { challenge }) = &self {
            if let Ok(value) = axum::http::HeaderValue::from_str(challenge) {
                response
                    .headers_mut()
                    .insert(axum::http::header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_reference::{Algorithm, Digest};

    #[test]
    fn test_not_found_family_codes() {
        let digest = Digest::from_bytes(Algorithm::Sha256, b"x");
        let err = ApiError::from(DistributionError::UnknownBlob { digest });
        assert_eq!(
            err.status_and_code(),
            (StatusCode::NOT_FOUND, "BLOB_UNKNOWN")
        );

        let err = ApiError::from(DistributionError::UnknownUpload {
            id: "u".to_string(),
        });
        assert_eq!(
            err.status_and_code(),
            (StatusCode::NOT_FOUND, "BLOB_UPLOAD_UNKNOWN")
        );
    }

    #[test]
    fn test_validation_family_codes() {
        let expected = Digest::from_bytes(Algorithm::Sha256, b"a");
        let actual = Digest::from_bytes(Algorithm::Sha256, b"b");
        let err = ApiError::from(DistributionError::DigestMismatch { expected, actual });
        assert_eq!(
            err.status_and_code(),
            (StatusCode::BAD_REQUEST, "DIGEST_INVALID")
        );

        let err = ApiError::from(DistributionError::SizeMismatch {
            declared: 2,
            received: 1,
        });
        assert_eq!(
            err.status_and_code(),
            (StatusCode::BAD_REQUEST, "SIZE_INVALID")
        );
    }
}
