//! Content fingerprints for duplicate challenge detection
//!
//! A fingerprint is the SHA-256 of a challenge's normalized title,
//! description and correct answer, hex encoded and truncated to
//! [`FINGERPRINT_LEN`] characters.
//!
//! Normalization per field: Unicode NFKC, lowercase, whitespace runs
//! collapsed to a single space, trimmed. Fields are joined with
//! [`FIELD_SEPARATOR`] (ASCII unit separator) so that text moving across a
//! field boundary does not collide, e.g. `("ab", "c")` vs `("a", "bc")`.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

pub const FINGERPRINT_LEN: usize = 32;
pub const FIELD_SEPARATOR: char = '\u{1f}';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Short prefix for log lines
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        self.0.get(..end).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored hashes are taken as-is; legacy rows may use a different scheme
impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Fingerprint(value.trim().to_string())
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Fingerprint(value.trim().to_string())
    }
}

pub fn normalize(field: &str) -> String {
    field
        .nfkc()
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn fingerprint(title: &str, description: &str, correct_answer: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(normalize(title).as_bytes());
    hasher.update(FIELD_SEPARATOR.to_string().as_bytes());
    hasher.update(normalize(description).as_bytes());
    hasher.update(FIELD_SEPARATOR.to_string().as_bytes());
    hasher.update(normalize(correct_answer).as_bytes());
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(FINGERPRINT_LEN);
    Fingerprint(hex)
}
