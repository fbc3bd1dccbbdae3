//! Content-derived version stamps

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

const DIGEST_LEN: usize = 12;

/// Version token of a configuration tree: `v<revision>-<digest>`
///
/// The revision increases with every change the manager applies; the digest
/// is derived from the tree content so two trees with the same revision but
/// different content never share a token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionStamp {
    revision: u64,
    digest: String,
}

impl VersionStamp {
    /// Stamp for `revision` over the given canonical content
    pub fn new(revision: u64, content: &[u8]) -> Self {
        let full = sha256_hex(content);
        Self {
            revision,
            digest: full[..DIGEST_LEN].to_string(),
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Stamp following this one for new content
    pub fn next(&self, content: &[u8]) -> Self {
        Self::new(self.revision.saturating_add(1), content)
    }
}

impl fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}-{}", self.revision, self.digest)
    }
}

impl FromStr for VersionStamp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('v')
            .ok_or_else(|| format!("Version '{}' must start with 'v'", s))?;
        let (revision, digest) = rest
            .split_once('-')
            .ok_or_else(|| format!("Version '{}' must look like v<revision>-<digest>", s))?;
        let revision = revision
            .parse::<u64>()
            .map_err(|e| format!("Invalid revision in version '{}': {}", s, e))?;
        if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("Invalid digest in version '{}'", s));
        }
        Ok(Self {
            revision,
            digest: digest.to_ascii_lowercase(),
        })
    }
}

impl TryFrom<String> for VersionStamp {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionStamp> for String {
    fn from(stamp: VersionStamp) -> Self {
        stamp.to_string()
    }
}

/// Lowercase hex SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let stamp = VersionStamp::new(3, b"{\"a\":1}");
        let text = stamp.to_string();
        assert!(text.starts_with("v3-"));
        assert_eq!(text.len(), "v3-".len() + DIGEST_LEN);
        assert_eq!(text.parse::<VersionStamp>().unwrap(), stamp);
    }

    #[test]
    fn test_next_bumps_revision_and_digest() {
        let first = VersionStamp::new(1, b"one");
        let second = first.next(b"two");
        assert_eq!(second.revision(), 2);
        assert_ne!(first.digest(), second.digest());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!("3-abc".parse::<VersionStamp>().is_err());
        assert!("vx-abc".parse::<VersionStamp>().is_err());
        assert!("v3-".parse::<VersionStamp>().is_err());
        assert!("v3-xyz".parse::<VersionStamp>().is_err());
    }
}
