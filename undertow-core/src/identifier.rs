//! Content identifiers derived from magnet links or raw info hashes.
//!
//! Every session is keyed by a lowercase hex content hash. Magnet links are
//! reduced to their `btih:` parameter; raw hashes are validated and used
//! as-is. Malformed input never produces an identifier.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Minimum number of hex characters in a content hash.
pub const MIN_HASH_LEN: usize = 40;

static BTIH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)btih:([a-f0-9]{40,})").expect("static btih pattern is valid")
});

/// Errors produced while normalizing client input into an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("Identifier is empty")]
    Empty,

    #[error("Magnet link has no btih parameter: {input}")]
    MissingInfoHash { input: String },

    #[error("Not a valid content hash: {input}")]
    MalformedHash { input: String },
}

/// Normalized, lowercase content hash under which a session is registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Parses a raw hex content hash.
    ///
    /// Accepts any casing; the stored form is always lowercase.
    ///
    /// # Errors
    /// - `IdentifierError::Empty` - Input is blank
    /// - `IdentifierError::MalformedHash` - Too short or not hexadecimal
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if trimmed.len() < MIN_HASH_LEN || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IdentifierError::MalformedHash {
                input: trimmed.to_string(),
            });
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Builds an identifier from a 20-byte digest.
    pub fn from_digest(digest: &[u8; 20]) -> Self {
        Self(hex::encode(digest))
    }

    /// Returns the identifier as a lowercase hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Client-supplied content reference: the normalized identifier plus the
/// original URI, which the engine needs for tracker hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSource {
    identifier: ContentId,
    uri: String,
}

impl ContentSource {
    /// Normalizes a magnet link or raw content hash.
    ///
    /// # Errors
    /// - `IdentifierError::Empty` - Input is blank
    /// - `IdentifierError::MissingInfoHash` - Magnet link without a usable `btih:` hash
    /// - `IdentifierError::MalformedHash` - Raw input is not a content hash
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty);
        }

        let identifier = if is_magnet(trimmed) {
            let captures =
                BTIH_PATTERN
                    .captures(trimmed)
                    .ok_or_else(|| IdentifierError::MissingInfoHash {
                        input: trimmed.to_string(),
                    })?;
            ContentId(captures[1].to_ascii_lowercase())
        } else {
            ContentId::parse(trimmed)?
        };

        Ok(Self {
            identifier,
            uri: trimmed.to_string(),
        })
    }

    /// Wraps an already-normalized identifier with no extra URI context.
    pub fn from_identifier(identifier: ContentId) -> Self {
        let uri = identifier.to_string();
        Self { identifier, uri }
    }

    /// Normalized identifier for registry lookups.
    pub fn identifier(&self) -> &ContentId {
        &self.identifier
    }

    /// The URI as supplied by the client.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// True when the client supplied a magnet link.
    pub fn is_magnet(&self) -> bool {
        is_magnet(&self.uri)
    }
}

fn is_magnet(input: &str) -> bool {
    input
        .get(..7)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("magnet:"))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_magnet_extracts_lowercase_hash() {
        let magnet = "magnet:?xt=urn:btih:0123456789ABCDEF0123456789ABCDEF01234567&dn=Movie";
        let source = ContentSource::parse(magnet).unwrap();

        assert_eq!(source.identifier().as_str(), HASH);
        assert_eq!(source.uri(), magnet);
        assert!(source.is_magnet());
    }

    #[test]
    fn test_raw_hash_is_used_verbatim() {
        let source = ContentSource::parse(HASH).unwrap();
        assert_eq!(source.identifier().as_str(), HASH);
        assert!(!source.is_magnet());
    }

    #[test]
    fn test_longer_hashes_are_accepted() {
        let long = format!("{HASH}89abcdef89abcdef89abcdef");
        let magnet = format!("magnet:?xt=urn:btih:{long}");
        let source = ContentSource::parse(&magnet).unwrap();
        assert_eq!(source.identifier().as_str(), long);
    }

    #[test]
    fn test_magnet_without_btih_is_rejected() {
        let result = ContentSource::parse("magnet:?dn=no-hash-here");
        assert!(matches!(
            result,
            Err(IdentifierError::MissingInfoHash { .. })
        ));
    }

    #[test]
    fn test_magnet_with_short_hash_is_rejected() {
        let result = ContentSource::parse("magnet:?xt=urn:btih:abcdef");
        assert!(matches!(
            result,
            Err(IdentifierError::MissingInfoHash { .. })
        ));
    }

    #[test]
    fn test_blank_input_is_rejected() {
        assert_eq!(ContentSource::parse("   "), Err(IdentifierError::Empty));
        assert_eq!(ContentId::parse(""), Err(IdentifierError::Empty));
    }

    #[test]
    fn test_non_hex_raw_input_is_rejected() {
        let result = ContentId::parse("zz23456789abcdef0123456789abcdef01234567");
        assert!(matches!(result, Err(IdentifierError::MalformedHash { .. })));
    }

    #[test]
    fn test_content_id_display_and_short() {
        let id: ContentId = HASH.parse().unwrap();
        assert_eq!(id.to_string(), HASH);
        assert_eq!(id.short(), "01234567");
    }

    proptest! {
        #[test]
        fn prop_extraction_is_case_insensitive_and_idempotent(
            hash in "[0-9a-fA-F]{40,64}",
            name in "[a-zA-Z0-9.]{0,20}",
        ) {
            let magnet = format!("magnet:?xt=urn:btih:{hash}&dn={name}");
            let first = ContentSource::parse(&magnet).unwrap();
            let lowered = ContentSource::parse(&magnet.to_lowercase()).unwrap();
            let again = ContentSource::parse(first.identifier().as_str()).unwrap();

            prop_assert_eq!(first.identifier(), lowered.identifier());
            prop_assert_eq!(first.identifier(), again.identifier());
            prop_assert_eq!(first.identifier().as_str(), hash.to_lowercase());
        }
    }
}
