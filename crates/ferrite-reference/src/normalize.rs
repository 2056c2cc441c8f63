//! Familiar-name canonicalization.
//!
//! Docker-style "familiar" names omit the default domain and the `library/`
//! prefix of official images: `ubuntu` is `docker.io/library/ubuntu`.

use crate::digest::Digest;
use crate::error::ReferenceError;
use crate::reference::{Name, Reference, looks_like_domain, split_reference};

pub const DEFAULT_DOMAIN: &str = "docker.io";
pub const DEFAULT_REPO_PREFIX: &str = "library";

/// Parse a familiar reference into its fully qualified form.
///
/// An empty domain becomes `docker.io`, and a single-component path under the
/// default domain gains the `library/` prefix.
pub fn parse_normalized_named(s: &str) -> Result<Reference, ReferenceError> {
    // A bare digest is an identifier, not a name.
    if Digest::parse(s).is_ok() {
        return Err(ReferenceError::InvalidFormat);
    }

    let (name_part, tag, digest) = split_reference(s);
    if name_part.is_empty() {
        return Err(ReferenceError::EmptyName);
    }

    let (domain, remainder) = match name_part.split_once('/') {
        Some((first, rest)) if looks_like_domain(first) => (first, rest.to_string()),
        _ => (DEFAULT_DOMAIN, name_part.to_string()),
    };
    let remainder = if domain == DEFAULT_DOMAIN && !remainder.contains('/') {
        format!("{DEFAULT_REPO_PREFIX}/{remainder}")
    } else {
        remainder
    };

    let mut canonical = format!("{domain}/{remainder}");
    if let Some(tag) = tag {
        canonical.push(':');
        canonical.push_str(tag);
    }
    if let Some(digest) = digest {
        canonical.push('@');
        canonical.push_str(digest);
    }
    Reference::parse(&canonical)
}

/// The shortest familiar form of a fully qualified name.
pub fn familiar_name(name: &Name) -> String {
    if name.domain() == DEFAULT_DOMAIN {
        let path = name.path();
        match path.strip_prefix(&format!("{DEFAULT_REPO_PREFIX}/")) {
            Some(stripped) if !stripped.contains('/') => stripped.to_string(),
            _ => path.to_string(),
        }
    } else if name.domain().is_empty() {
        name.path().to_string()
    } else {
        format!("{}/{}", name.domain(), name.path())
    }
}
