//! Ferrite Reference Grammar
//!
//! This crate provides the identity types every registry operation is keyed
//! by: content digests, repository names, tags, and the combined reference
//! forms (`name`, `name:tag`, `name@digest`, `name:tag@digest`).

pub mod digest;
pub mod error;
pub mod normalize;
pub mod reference;

pub use digest::{Algorithm, Digest, Digester, resolve_short};
pub use error::{DigestError, ReferenceError};
pub use normalize::{familiar_name, parse_normalized_named};
pub use reference::{AnyReference, Name, Reference, Tag, parse_any, split_domain};
