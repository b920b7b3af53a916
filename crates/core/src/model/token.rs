use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Number of characters in an access token key.
pub const TOKEN_KEY_LEN: usize = 8;

/// Characters a token key may contain.
pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TokenError {
    #[error("token key must be 8 characters from A-Z and 0-9")]
    MalformedKey,
}

/// Short shared-secret key, e.g. `K7Q2M9XA`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenKey(String);

impl TokenKey {
    /// Validate a key as typed by a client.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::MalformedKey` if the length or alphabet is wrong.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, TokenError> {
        let raw = raw.as_ref().trim();
        if raw.len() != TOKEN_KEY_LEN || !raw.bytes().all(|b| TOKEN_ALPHABET.contains(&b)) {
            return Err(TokenError::MalformedKey);
        }
        Ok(Self(raw.to_string()))
    }

    /// Build a key from alphabet positions (each taken modulo the alphabet size).
    #[must_use]
    pub fn from_alphabet_indices(indices: [usize; TOKEN_KEY_LEN]) -> Self {
        let key = indices
            .iter()
            .map(|i| char::from(TOKEN_ALPHABET[i % TOKEN_ALPHABET.len()]))
            .collect();
        Self(key)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keys are credentials; keep them out of debug logs.
impl fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenKey({}…)", &self.0[..2])
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Credential for non-staff clients. Valid while active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    key: TokenKey,
    description: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl AccessToken {
    #[must_use]
    pub fn new(key: TokenKey, description: Option<String>, created_at: DateTime<Utc>) -> Self {
        Self::from_persisted(key, description, true, created_at)
    }

    #[must_use]
    pub fn from_persisted(
        key: TokenKey,
        description: Option<String>,
        is_active: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            description,
            is_active,
            created_at,
        }
    }

    #[must_use]
    pub fn key(&self) -> &TokenKey {
        &self.key
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn set_active(&mut self, active: bool) {
        self.is_active = active;
    }
}
