//! Repository names, tags, and the combined reference forms.
//!
//! The grammar is anchored and linear:
//!
//! ```text
//! reference := name [":" tag] ["@" digest]
//! name      := [domain "/"] component ("/" component)*
//! domain    := hostlabel ("." hostlabel)* [":" port] | "[" ipv6 "]" [":" port]
//! component := [a-z0-9]+ (("." | "_" | "__" | "-"+) [a-z0-9]+)*
//! tag       := [A-Za-z0-9_][A-Za-z0-9_.-]{0,127}
//! ```

use std::fmt;
use std::str::FromStr;

use crate::digest::Digest;
use crate::error::ReferenceError;
use crate::normalize::parse_normalized_named;

/// Maximum total length of a repository name.
pub const NAME_TOTAL_LENGTH_MAX: usize = 255;

/// Maximum length of a tag, including the leading character.
const TAG_LENGTH_MAX: usize = 128;

/// A validated repository name, split into an optional registry domain and
/// a slash-separated path of lowercase components.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    domain: String,
    path: String,
}

impl Name {
    /// Parse a repository name with no tag or digest attached.
    pub fn parse(s: &str) -> Result<Self, ReferenceError> {
        if s.is_empty() {
            return Err(ReferenceError::EmptyName);
        }
        if s.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(ReferenceError::NameTooLong {
                len: s.len(),
                max: NAME_TOTAL_LENGTH_MAX,
            });
        }

        let (domain, path) = match s.split_once('/') {
            Some((first, rest)) if looks_like_domain(first) => {
                (first.to_string(), rest.to_string())
            }
            _ => (String::new(), s.to_string()),
        };

        if !domain.is_empty() && !is_valid_domain(&domain) {
            return Err(ReferenceError::InvalidFormat);
        }
        if path.is_empty() {
            return Err(ReferenceError::EmptyName);
        }
        if !path.split('/').all(is_valid_component) {
            // Uppercase anywhere in the path gets its own error so clients
            // learn the name is case-folded rather than malformed.
            let lowered = path.to_ascii_lowercase();
            if lowered != path && lowered.split('/').all(is_valid_component) {
                return Err(ReferenceError::ContainsUppercase);
            }
            return Err(ReferenceError::InvalidFormat);
        }

        Ok(Name { domain, path })
    }

    /// Registry domain, empty when the name carries none.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Path portion of the name (`library/ubuntu` in `docker.io/library/ubuntu`).
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl FromStr for Name {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Name::parse(s)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.domain.is_empty() {
            f.write_str(&self.path)
        } else {
            write!(f, "{}/{}", self.domain, self.path)
        }
    }
}

/// Split a name into its `(domain, path)` parts.
pub fn split_domain(name: &Name) -> (String, String) {
    (name.domain.clone(), name.path.clone())
}

/// A validated tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(String);

impl Tag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Tag {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let valid_first = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
        if !valid_first || !valid_rest || s.len() > TAG_LENGTH_MAX {
            return Err(ReferenceError::InvalidTag);
        }
        Ok(Tag(s.to_string()))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed reference, one of the four shapes the grammar allows.
///
/// References are immutable values; `with_tag` and `with_digest` build new
/// references of the appropriate shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// Name only.
    Repository(Name),
    /// `name:tag`
    Tagged { name: Name, tag: Tag },
    /// `name@digest`, also called canonical.
    Digested { name: Name, digest: Digest },
    /// `name:tag@digest`
    Dual {
        name: Name,
        tag: Tag,
        digest: Digest,
    },
}

impl Reference {
    /// Parse a reference string against the anchored grammar.
    pub fn parse(s: &str) -> Result<Self, ReferenceError> {
        let (name_part, tag_part, digest_part) = split_reference(s);
        let name = Name::parse(name_part)?;
        let tag = tag_part.map(Tag::from_str).transpose()?;
        let digest = digest_part
            .map(Digest::parse)
            .transpose()
            .map_err(ReferenceError::InvalidDigest)?;

        Ok(match (tag, digest) {
            (None, None) => Reference::Repository(name),
            (Some(tag), None) => Reference::Tagged { name, tag },
            (None, Some(digest)) => Reference::Digested { name, digest },
            (Some(tag), Some(digest)) => Reference::Dual { name, tag, digest },
        })
    }

    pub fn name(&self) -> &Name {
        match self {
            Reference::Repository(name) => name,
            Reference::Tagged { name, .. } => name,
            Reference::Digested { name, .. } => name,
            Reference::Dual { name, .. } => name,
        }
    }

    pub fn tag(&self) -> Option<&Tag> {
        match self {
            Reference::Tagged { tag, .. } | Reference::Dual { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn digest(&self) -> Option<&Digest> {
        match self {
            Reference::Digested { digest, .. } | Reference::Dual { digest, .. } => Some(digest),
            _ => None,
        }
    }

    /// True for the `name@digest` shape.
    pub fn is_canonical(&self) -> bool {
        matches!(self, Reference::Digested { .. })
    }

    /// Attach a tag, preserving any digest.
    pub fn with_tag(&self, tag: Tag) -> Reference {
        match self {
            Reference::Repository(name) | Reference::Tagged { name, .. } => Reference::Tagged {
                name: name.clone(),
                tag,
            },
            Reference::Digested { name, digest } | Reference::Dual { name, digest, .. } => {
                Reference::Dual {
                    name: name.clone(),
                    tag,
                    digest: digest.clone(),
                }
            }
        }
    }

    /// Attach a digest, preserving any tag.
    pub fn with_digest(&self, digest: Digest) -> Reference {
        match self {
            Reference::Repository(name) | Reference::Digested { name, .. } => {
                Reference::Digested {
                    name: name.clone(),
                    digest,
                }
            }
            Reference::Tagged { name, tag } | Reference::Dual { name, tag, .. } => {
                Reference::Dual {
                    name: name.clone(),
                    tag: tag.clone(),
                    digest,
                }
            }
        }
    }

    /// Add the `latest` tag to a bare repository reference. Tagged or
    /// digested references pass through unchanged.
    pub fn tag_name_only(self) -> Reference {
        match self {
            Reference::Repository(name) => Reference::Tagged {
                name,
                tag: Tag("latest".to_string()),
            },
            other => other,
        }
    }
}

impl FromStr for Reference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reference::parse(s)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Repository(name) => write!(f, "{name}"),
            Reference::Tagged { name, tag } => write!(f, "{name}:{tag}"),
            Reference::Digested { name, digest } => write!(f, "{name}@{digest}"),
            Reference::Dual { name, tag, digest } => write!(f, "{name}:{tag}@{digest}"),
        }
    }
}

/// A reference that may also be a bare digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyReference {
    Digest(Digest),
    Reference(Reference),
}

/// Parse any accepted identifier: a bare 64-char hex string (implicit
/// `sha256:`), a full digest, or a familiar reference.
pub fn parse_any(s: &str) -> Result<AnyReference, ReferenceError> {
    if s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        let digest =
            Digest::parse(&format!("sha256:{s}")).map_err(ReferenceError::InvalidDigest)?;
        return Ok(AnyReference::Digest(digest));
    }
    if let Ok(digest) = Digest::parse(s) {
        return Ok(AnyReference::Digest(digest));
    }
    Ok(AnyReference::Reference(parse_normalized_named(s)?))
}

/// Split `name[:tag][@digest]` into its raw parts without validating any of
/// them. The tag separator is the last colon after the last slash, so a
/// `host:port` domain is never mistaken for a tag.
pub(crate) fn split_reference(s: &str) -> (&str, Option<&str>, Option<&str>) {
    let (rest, digest) = match s.split_once('@') {
        Some((rest, digest)) => (rest, Some(digest)),
        None => (s, None),
    };
    let slash = rest.rfind('/').map_or(0, |i| i + 1);
    match rest[slash..].rfind(':') {
        Some(i) => {
            let colon = slash + i;
            (&rest[..colon], Some(&rest[colon + 1..]), digest)
        }
        None => (rest, None, digest),
    }
}

/// A leading segment is a domain only if it is unambiguously host-like.
pub(crate) fn looks_like_domain(segment: &str) -> bool {
    segment == "localhost"
        || segment.contains('.')
        || segment.contains(':')
        || segment.starts_with('[')
}

fn is_valid_domain(s: &str) -> bool {
    // Bracketed IPv6 literal, optionally with a port.
    if let Some(rest) = s.strip_prefix('[') {
        let Some((addr, tail)) = rest.split_once(']') else {
            return false;
        };
        if addr.is_empty() || !addr.chars().all(|c| c.is_ascii_hexdigit() || c == ':') {
            return false;
        }
        return match tail.strip_prefix(':') {
            Some(port) => is_valid_port(port),
            None => tail.is_empty(),
        };
    }

    let (host, port) = match s.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (s, None),
    };
    if let Some(port) = port {
        if !is_valid_port(port) {
            return false;
        }
    }
    !host.is_empty() && host.split('.').all(is_valid_host_label)
}

fn is_valid_port(port: &str) -> bool {
    !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
}

fn is_valid_host_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
        }
        _ => false,
    }
}

/// Scanner for `component := [a-z0-9]+ (sep [a-z0-9]+)*` where a separator
/// is `.`, `_`, `__`, or a run of `-`.
fn is_valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let n = bytes.len();
    let alnum = |b: u8| b.is_ascii_digit() || b.is_ascii_lowercase();
    let mut i = 0;
    loop {
        let run = i;
        while i < n && alnum(bytes[i]) {
            i += 1;
        }
        if i == run {
            return false;
        }
        if i == n {
            return true;
        }
        match bytes[i] {
            b'.' => i += 1,
            b'_' => {
                i += 1;
                if i < n && bytes[i] == b'_' {
                    i += 1;
                }
            }
            b'-' => {
                while i < n && bytes[i] == b'-' {
                    i += 1;
                }
            }
            _ => return false,
        }
        if i == n {
            // Trailing separator.
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Algorithm;

    fn sample_digest() -> Digest {
        Digest::from_bytes(Algorithm::Sha256, b"sample")
    }

    #[test]
    fn test_parse_roundtrip() {
        let digest = sample_digest();
        let inputs = vec![
            "ubuntu".to_string(),
            "library/ubuntu".to_string(),
            "docker.io/library/ubuntu".to_string(),
            "localhost/app".to_string(),
            "localhost:5000/app".to_string(),
            "example.com:443/team/app".to_string(),
            "example.com/team/app:v1.2".to_string(),
            format!("example.com/app@{digest}"),
            format!("example.com/app:stable@{digest}"),
            "[2001:db8::1]:5000/app".to_string(),
            "a/b.c/d__e/f-g".to_string(),
        ];
        for input in inputs {
            let parsed = Reference::parse(&input).unwrap();
            assert_eq!(parsed.to_string(), input, "roundtrip of {input}");
        }
    }

    #[test]
    fn test_shapes() {
        let digest = sample_digest();

        let r = Reference::parse("foo/bar").unwrap();
        assert!(matches!(r, Reference::Repository(_)));
        assert!(r.tag().is_none() && r.digest().is_none());

        let r = Reference::parse("foo/bar:latest").unwrap();
        assert_eq!(r.tag().unwrap().as_str(), "latest");

        let r = Reference::parse(&format!("foo/bar@{digest}")).unwrap();
        assert!(r.is_canonical());
        assert_eq!(r.digest(), Some(&digest));

        let r = Reference::parse(&format!("foo/bar:v1@{digest}")).unwrap();
        assert_eq!(r.tag().unwrap().as_str(), "v1");
        assert_eq!(r.digest(), Some(&digest));
    }

    #[test]
    fn test_domain_detection() {
        // A segment without dot, colon, or `localhost` is a path component.
        let r = Reference::parse("library/ubuntu").unwrap();
        assert_eq!(r.name().domain(), "");
        assert_eq!(r.name().path(), "library/ubuntu");

        let r = Reference::parse("localhost/ubuntu").unwrap();
        assert_eq!(r.name().domain(), "localhost");

        let r = Reference::parse("registry.example.com/ubuntu").unwrap();
        assert_eq!(r.name().domain(), "registry.example.com");

        let r = Reference::parse("registry:5000/ubuntu").unwrap();
        assert_eq!(r.name().domain(), "registry:5000");
    }

    #[test]
    fn test_port_must_be_numeric() {
        assert_eq!(
            Reference::parse("registry:port/app").unwrap_err(),
            ReferenceError::InvalidFormat
        );
    }

    #[test]
    fn test_tag_not_confused_with_port() {
        let r = Reference::parse("localhost:5000/app:v2").unwrap();
        assert_eq!(r.name().to_string(), "localhost:5000/app");
        assert_eq!(r.tag().unwrap().as_str(), "v2");
    }

    #[test]
    fn test_uppercase_rejected_distinctly() {
        assert_eq!(
            Reference::parse("foo/Bar").unwrap_err(),
            ReferenceError::ContainsUppercase
        );
        // Uppercase in the domain is fine.
        assert!(Reference::parse("Example.Com/bar").is_ok());
    }

    #[test]
    fn test_too_long() {
        let long = format!("a/{}", "b".repeat(NAME_TOTAL_LENGTH_MAX));
        assert!(matches!(
            Reference::parse(&long).unwrap_err(),
            ReferenceError::NameTooLong { .. }
        ));
    }

    #[test]
    fn test_empty_and_malformed() {
        assert_eq!(Reference::parse("").unwrap_err(), ReferenceError::EmptyName);
        assert_eq!(
            Reference::parse("foo//bar").unwrap_err(),
            ReferenceError::InvalidFormat
        );
        assert_eq!(
            Reference::parse("-foo/bar").unwrap_err(),
            ReferenceError::InvalidFormat
        );
        assert_eq!(
            Reference::parse("foo/bar-").unwrap_err(),
            ReferenceError::InvalidFormat
        );
        assert_eq!(
            Reference::parse("foo/b___ar").unwrap_err(),
            ReferenceError::InvalidFormat
        );
    }

    #[test]
    fn test_invalid_digest_in_reference() {
        assert!(matches!(
            Reference::parse("foo/bar@sha256:short").unwrap_err(),
            ReferenceError::InvalidDigest(_)
        ));
        assert!(matches!(
            Reference::parse("foo/bar@md5:00000000000000000000000000000000").unwrap_err(),
            ReferenceError::InvalidDigest(_)
        ));
    }

    #[test]
    fn test_with_tag_and_digest() {
        let digest = sample_digest();
        let base = Reference::parse("foo/bar").unwrap();

        let tagged = base.with_tag("v1".parse().unwrap());
        assert_eq!(tagged.to_string(), "foo/bar:v1");

        let dual = tagged.with_digest(digest.clone());
        assert_eq!(dual.to_string(), format!("foo/bar:v1@{digest}"));

        // Originals are untouched values.
        assert_eq!(base.to_string(), "foo/bar");
    }

    #[test]
    fn test_tag_name_only() {
        let r = Reference::parse("foo/bar").unwrap().tag_name_only();
        assert_eq!(r.to_string(), "foo/bar:latest");

        let r = Reference::parse("foo/bar:v2").unwrap().tag_name_only();
        assert_eq!(r.to_string(), "foo/bar:v2");

        let digest = sample_digest();
        let r = Reference::parse(&format!("foo/bar@{digest}"))
            .unwrap()
            .tag_name_only();
        assert_eq!(r.to_string(), format!("foo/bar@{digest}"));
    }

    #[test]
    fn test_tag_grammar() {
        assert!("latest".parse::<Tag>().is_ok());
        assert!("_hidden".parse::<Tag>().is_ok());
        assert!("V1.2-rc.1".parse::<Tag>().is_ok());
        assert!(".dot".parse::<Tag>().is_err());
        assert!("-dash".parse::<Tag>().is_err());
        assert!("a".repeat(129).parse::<Tag>().is_err());
        assert!("has space".parse::<Tag>().is_err());
    }

    #[test]
    fn test_parse_any() {
        let digest = sample_digest();

        match parse_any(digest.hex()).unwrap() {
            AnyReference::Digest(d) => assert_eq!(d, digest),
            other => panic!("expected digest, got {other:?}"),
        }

        match parse_any(&digest.to_string()).unwrap() {
            AnyReference::Digest(d) => assert_eq!(d, digest),
            other => panic!("expected digest, got {other:?}"),
        }

        match parse_any("ubuntu").unwrap() {
            AnyReference::Reference(r) => {
                assert_eq!(r.name().to_string(), "docker.io/library/ubuntu");
            }
            other => panic!("expected reference, got {other:?}"),
        }
    }
}
