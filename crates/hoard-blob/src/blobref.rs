//! Content-addressed blob references.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Digest names accepted in a blob reference, with their hex digest lengths.
const DIGESTS: &[(&str, usize)] = &[("sha224", 56), ("sha256", 64), ("sha1", 40)];

/// Error returned when a string is not a well-formed blob reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid blob ref {0:?}")]
pub struct ParseRefError(pub String);

/// A reference to an immutable blob: `<digestname>-<hex>`, e.g.
/// `sha224-d1a1...`.
///
/// The string form is canonical; ordering and equality are defined on it.
/// Construction goes through [`FromStr`]/[`TryFrom<String>`], which verify
/// the digest name and that the hex portion has exactly the digest's length.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobRef(Box<str>);

impl BlobRef {
    /// Returns the canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reports whether this ref's string form starts with `prefix`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// Reports whether `s` could be the leading portion of some valid blob
    /// ref: a prefix of a digest name, or a digest name, a dash, and hex
    /// characters not exceeding the digest length.
    pub fn is_ref_prefix(s: &str) -> bool {
        if s.is_empty() {
            return false;
        }
        match s.split_once('-') {
            None => DIGESTS.iter().any(|(name, _)| name.starts_with(s)),
            Some((name, hex)) => DIGESTS.iter().any(|(digest, len)| {
                *digest == name
                    && hex.len() <= *len
                    && hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
            }),
        }
    }
}

impl FromStr for BlobRef {
    type Err = ParseRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((name, hex)) = s.split_once('-') else {
            return Err(ParseRefError(s.to_string()));
        };
        let known = DIGESTS
            .iter()
            .any(|(digest, len)| *digest == name && hex.len() == *len);
        if !known
            || !hex
                .bytes()
                .all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return Err(ParseRefError(s.to_string()));
        }
        Ok(Self(s.into()))
    }
}

impl TryFrom<String> for BlobRef {
    type Error = ParseRefError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BlobRef> for String {
    fn from(r: BlobRef) -> Self {
        r.0.into()
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobRef({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A valid sha224 ref for tests.
    fn sample() -> String {
        format!("sha224-{}", "ab".repeat(28))
    }

    #[test]
    fn parses_valid_ref() {
        let r: BlobRef = sample().parse().unwrap();
        assert_eq!(r.as_str(), sample());
    }

    #[test]
    fn rejects_unknown_digest() {
        assert!("md5-d41d8cd98f00b204e9800998ecf8427e".parse::<BlobRef>().is_err());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(format!("sha224-{}", "ab".repeat(27)).parse::<BlobRef>().is_err());
    }

    #[test]
    fn rejects_uppercase_hex() {
        assert!(format!("sha224-{}", "AB".repeat(28)).parse::<BlobRef>().is_err());
    }

    #[test]
    fn rejects_missing_dash() {
        assert!("sha224".parse::<BlobRef>().is_err());
        assert!("".parse::<BlobRef>().is_err());
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a: BlobRef = format!("sha224-{}", "aa".repeat(28)).parse().unwrap();
        let b: BlobRef = format!("sha224-{}", "bb".repeat(28)).parse().unwrap();
        assert!(a < b);
    }

    #[test]
    fn prefix_test() {
        let r: BlobRef = sample().parse().unwrap();
        assert!(r.has_prefix("sha224-ab"));
        assert!(!r.has_prefix("sha224-cd"));
    }

    #[test]
    fn ref_prefix_validity() {
        assert!(BlobRef::is_ref_prefix("sha"));
        assert!(BlobRef::is_ref_prefix("sha224-"));
        assert!(BlobRef::is_ref_prefix("sha224-abcd"));
        assert!(BlobRef::is_ref_prefix(&sample()));
        assert!(!BlobRef::is_ref_prefix(""));
        assert!(!BlobRef::is_ref_prefix("md5-abcd"));
        assert!(!BlobRef::is_ref_prefix("sha224-xyz"));
        assert!(!BlobRef::is_ref_prefix(&format!("sha224-{}", "ab".repeat(29))));
    }

    #[test]
    fn serde_uses_string_form() {
        let r: BlobRef = sample().parse().unwrap();
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, format!("\"{}\"", sample()));
        let back: BlobRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
        assert!(serde_json::from_str::<BlobRef>("\"not-a-ref\"").is_err());
    }
}
