//! Opaque URL-safe link tokens.
//!
//! Resume and magic links carry a random token. Tokens are bearer secrets,
//! so `Debug` never prints them.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Number of random bytes behind each token (256 bits).
const TOKEN_BYTES: usize = 32;

/// Encoded length of a token: `ceil(32 * 4 / 3)` without padding.
const TOKEN_LEN: usize = 43;

/// A random link token (resume or magic link).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkToken(String);

impl LinkToken {
    /// Generate a fresh token from the thread-local CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Accept a token taken from a URL.
    ///
    /// Returns `None` when the input cannot be a token this module produced,
    /// which lets callers reject garbage before touching the store.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let well_formed = s.len() == TOKEN_LEN
            && s
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        well_formed.then(|| Self(s.to_owned()))
    }

    /// The encoded token, for building links and store lookups.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for LinkToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LinkToken([REDACTED])")
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for LinkToken {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for LinkToken {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self(s))
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for LinkToken {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_generated_tokens_are_url_safe() {
        let token = LinkToken::generate();
        assert_eq!(token.as_str().len(), TOKEN_LEN);
        assert!(LinkToken::parse(token.as_str()).is_some());
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        let tokens: HashSet<_> = (0..1000).map(|_| LinkToken::generate()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(LinkToken::parse("").is_none());
        assert!(LinkToken::parse("short").is_none());
        assert!(LinkToken::parse(&format!("{}/", "a".repeat(42))).is_none());
    }

    #[test]
    fn test_debug_is_redacted() {
        let token = LinkToken::generate();
        let debug = format!("{token:?}");
        assert!(!debug.contains(token.as_str()));
        assert!(debug.contains("REDACTED"));
    }
}
