//! SHA-256 digest type used for content hashes and anchor hashes

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// A SHA-256 hash (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Create a hash from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash arbitrary data
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Parse a 64-character lowercase hex string, with or without a `0x` prefix.
    ///
    /// Uppercase digits, surrounding whitespace and any other length are rejected.
    pub fn from_hex(input: &str) -> Result<Self, ValidationError> {
        Self::parse_field("hash", input)
    }

    /// Same as [`Hash::from_hex`] but reports errors against `field`.
    pub fn parse_field(field: &'static str, input: &str) -> Result<Self, ValidationError> {
        let hex_str = input.strip_prefix("0x").unwrap_or(input);
        if hex_str.len() != 64 {
            return Err(ValidationError::new(
                field,
                format!("expected 64 hex characters, got {}", hex_str.len()),
            ));
        }
        if !hex_str
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(ValidationError::new(
                field,
                "must contain only lowercase hex characters",
            ));
        }

        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_str, &mut bytes)
            .map_err(|e| ValidationError::new(field, e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Lowercase hex without prefix
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Borrow the raw digest
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Normalize a caller-supplied lookup key: trims, lowercases and strips `0x`.
///
/// Lookups are lenient where construction is strict; a key that still isn't
/// a digest simply won't match anything.
pub fn normalize_hash_key(input: &str) -> String {
    let trimmed = input.trim().to_ascii_lowercase();
    match trimmed.strip_prefix("0x") {
        Some(rest) => rest.to_string(),
        None => trimmed,
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_matches_known_vector() {
        // sha256("x")
        assert_eq!(
            Hash::digest(b"x").to_hex(),
            "2d711642b726b04401627ca9fbac32f5c8530fb1903cc4db02258717921a4881"
        );
    }

    #[test]
    fn test_prefix_is_stripped() {
        let plain = Hash::digest(b"payload").to_hex();
        let prefixed = format!("0x{}", plain);
        assert_eq!(
            Hash::from_hex(&plain).unwrap(),
            Hash::from_hex(&prefixed).unwrap()
        );
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let good = Hash::digest(b"payload").to_hex();
        assert!(Hash::from_hex(&good[..63]).is_err());
        assert!(Hash::from_hex(&format!("{}0", good)).is_err());
        assert!(Hash::from_hex(&good.to_uppercase()).is_err());
        assert!(Hash::from_hex(&format!(" {}", good)).is_err());
        assert!(Hash::from_hex(&"g".repeat(64)).is_err());
        assert!(Hash::from_hex("").is_err());
    }

    #[test]
    fn test_parse_field_names_field() {
        let err = Hash::parse_field("data_hash", "abc").unwrap_err();
        assert_eq!(err.field, "data_hash");
    }

    #[test]
    fn test_normalize_hash_key() {
        assert_eq!(normalize_hash_key("  0xABcd "), "abcd");
        assert_eq!(normalize_hash_key("abcd"), "abcd");
    }

    #[test]
    fn test_serde_as_hex_string() {
        let h = Hash::digest(b"serde");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h.to_hex()));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
