//! Validated cache key newtype.

use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum key length in bytes
pub const MAX_KEY_LEN: usize = 250;

/// Characters that are never allowed in a key
const FORBIDDEN: [char; 8] = ['{', '}', '(', ')', '/', '@', ':', '"'];

/// A validated cache key.
///
/// Construction goes through [`CacheKey::new`], so holding a `CacheKey`
/// implies the key is 1..=250 bytes and free of the forbidden characters.
/// Keys compare bytewise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Validate and wrap a key.
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidKey`] for the empty string, keys longer
    /// than 250 bytes, or keys containing `{`, `}`, `(`, `)`, `/`, `@`, `:`
    /// or `"`.
    pub fn new(key: impl Into<String>) -> CacheResult<Self> {
        let key = key.into();

        if key.is_empty() {
            return Err(CacheError::invalid_key("key must not be empty"));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(CacheError::invalid_key(format!(
                "key is {} bytes, maximum is {MAX_KEY_LEN}",
                key.len()
            )));
        }
        if let Some(ch) = key.chars().find(|c| FORBIDDEN.contains(c)) {
            return Err(CacheError::invalid_key(format!(
                "key contains forbidden character '{ch}'"
            )));
        }

        Ok(Self(key))
    }

    /// The key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length of the key in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key is empty (never true for a constructed key)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the key, returning the inner string
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for CacheKey {
    type Error = CacheError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for CacheKey {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
