//! Content digests in `<algorithm>:<hex>` form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256, Sha512};

use crate::error::DigestError;

/// Minimum hex length accepted by the grammar for any algorithm.
const MIN_HEX_LEN: usize = 32;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// Length of the hex encoding this algorithm produces.
    pub fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha512 => 128,
        }
    }

    /// Digest a complete byte slice.
    pub fn digest(&self, data: &[u8]) -> Digest {
        let mut digester = self.digester();
        digester.update(data);
        digester.finalize()
    }

    /// Create a streaming digester for this algorithm.
    pub fn digester(&self) -> Digester {
        let state = match self {
            Algorithm::Sha256 => DigesterState::Sha256(Sha256::new()),
            Algorithm::Sha512 => DigesterState::Sha512(Sha512::new()),
        };
        Digester {
            algorithm: *self,
            state,
        }
    }
}

impl FromStr for Algorithm {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            "sha512" => Ok(Algorithm::Sha512),
            _ => Err(DigestError::Unsupported(s.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated content identifier, e.g. `sha256:6c3c62...`.
///
/// Digests are immutable and compare by byte equality of their string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Parse and validate a digest string.
    pub fn parse(s: &str) -> Result<Self, DigestError> {
        let (algorithm, hex) = s.split_once(':').ok_or(DigestError::Invalid)?;
        if algorithm.is_empty() || hex.is_empty() {
            return Err(DigestError::Invalid);
        }
        // The grammar requires an identifier and at least 32 hex chars before
        // the algorithm is even looked up.
        if !algorithm
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(DigestError::Invalid);
        }
        if !hex.chars().all(is_lower_hex) {
            return Err(DigestError::Invalid);
        }
        if hex.len() < MIN_HEX_LEN {
            return Err(DigestError::InvalidLength);
        }
        let algorithm = Algorithm::from_str(algorithm)?;
        if hex.len() != algorithm.hex_len() {
            return Err(DigestError::InvalidLength);
        }
        Ok(Digest {
            algorithm,
            hex: hex.to_string(),
        })
    }

    /// Compute the digest of `data` under `algorithm`.
    pub fn from_bytes(algorithm: Algorithm, data: &[u8]) -> Self {
        algorithm.digest(data)
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Re-run the structural checks. A digest built by `parse` or
    /// `from_bytes` always validates.
    pub fn validate(&self) -> Result<(), DigestError> {
        if self.hex.len() != self.algorithm.hex_len() {
            return Err(DigestError::InvalidLength);
        }
        if !self.hex.chars().all(is_lower_hex) {
            return Err(DigestError::Invalid);
        }
        Ok(())
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::parse(s)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::parse(&s).map_err(serde::de::Error::custom)
    }
}

fn is_lower_hex(c: char) -> bool {
    c.is_ascii_digit() || ('a'..='f').contains(&c)
}

#[derive(Clone)]
enum DigesterState {
    Sha256(Sha256),
    Sha512(Sha512),
}

/// Streaming digest computation.
#[derive(Clone)]
pub struct Digester {
    algorithm: Algorithm,
    state: DigesterState,
}

impl Digester {
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            DigesterState::Sha256(h) => h.update(data),
            DigesterState::Sha512(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Digest {
        let hex = match self.state {
            DigesterState::Sha256(h) => hex::encode(h.finalize()),
            DigesterState::Sha512(h) => hex::encode(h.finalize()),
        };
        Digest {
            algorithm: self.algorithm,
            hex,
        }
    }
}

/// Resolve a short hex prefix against a set of candidate digests.
///
/// Matching is by hex prefix within a single algorithm namespace. A prefix
/// matched by more than one candidate is an error rather than a guess.
pub fn resolve_short<'a, I>(candidates: I, prefix: &str) -> Result<Digest, DigestError>
where
    I: IntoIterator<Item = &'a Digest>,
{
    if prefix.is_empty() || !prefix.chars().all(is_lower_hex) {
        return Err(DigestError::Invalid);
    }

    let mut found: Option<&Digest> = None;
    for candidate in candidates {
        if candidate.hex.starts_with(prefix) {
            match found {
                Some(prev) if prev != candidate => {
                    return Err(DigestError::AmbiguousPrefix(prefix.to_string()));
                }
                _ => found = Some(candidate),
            }
        }
    }

    found
        .cloned()
        .ok_or_else(|| DigestError::UnknownPrefix(prefix.to_string()))
}
