//! Series key naming
//!
//! A series named `APPL:SECOND` owns up to three store keys:
//!
//! | Key                | Kind       | Used by            |
//! |--------------------|------------|--------------------|
//! | `APPL:SECOND`      | sorted set | every variant      |
//! | `APPL:SECOND:HASH` | hash       | indirected variant |
//! | `APPL:SECOND:ID`   | counter    | indirected variant |
//!
//! Series names containing either companion marker are rejected so a caller's
//! series can never alias another series' bookkeeping keys.

use crate::error::{Error, Result};

/// Marker of the indirected variant's payload hash
pub const HASH_SUFFIX: &str = ":HASH";

/// Marker of the indirected variant's ID counter
pub const ID_SUFFIX: &str = ":ID";

const RESERVED: [&str; 2] = [HASH_SUFFIX, ID_SUFFIX];

/// Hash key holding `id -> payload` for a series
pub fn hash_key(name: &str) -> String {
    format!("{}{}", name, HASH_SUFFIX)
}

/// Counter key holding the last allocated ID for a series
pub fn id_key(name: &str) -> String {
    format!("{}{}", name, ID_SUFFIX)
}

/// Reject series names that contain a reserved companion marker
pub fn validate_key(name: &str) -> Result<()> {
    match RESERVED.iter().find(|marker| name.contains(**marker)) {
        Some(marker) => Err(Error::InvalidKey {
            key: name.to_string(),
            reserved: *marker,
        }),
        None => Ok(()),
    }
}

/// Series name for a companion counter key, if `key` is one
pub fn series_from_id_key(key: &str) -> Option<&str> {
    key.strip_suffix(ID_SUFFIX)
}

/// True if `key` is a companion key of some series
pub fn is_companion_key(key: &str) -> bool {
    key.ends_with(HASH_SUFFIX) || key.ends_with(ID_SUFFIX)
}

/// Encode an indirection ID as a sorted-set member / hash field
pub fn encode_id(id: i64) -> Vec<u8> {
    id.to_string().into_bytes()
}

/// Decode an indirection ID written by [`encode_id`]
pub fn decode_id(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_companion_keys() {
        assert_eq!(hash_key("APPL:SECOND"), "APPL:SECOND:HASH");
        assert_eq!(id_key("APPL:SECOND"), "APPL:SECOND:ID");
        assert_eq!(series_from_id_key("APPL:SECOND:ID"), Some("APPL:SECOND"));
        assert!(is_companion_key("APPL:SECOND:HASH"));
        assert!(!is_companion_key("APPL:SECOND"));
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("APPL:SECOND").is_ok());
        assert!(matches!(
            validate_key("APPL:HASH:1"),
            Err(Error::InvalidKey { reserved: ":HASH", .. })
        ));
        assert!(matches!(
            validate_key("APPL:SECOND:ID"),
            Err(Error::InvalidKey { reserved: ":ID", .. })
        ));
    }

    #[test]
    fn test_id_encoding() {
        assert_eq!(decode_id(&encode_id(42)), Some(42));
        assert_eq!(decode_id(b"x"), None);
    }
}
