use rand::Rng;
use rand::rng;
use std::sync::Arc;
use tracing::{debug, info};

use qbank_core::model::{AccessToken, TOKEN_ALPHABET, TOKEN_KEY_LEN, TokenKey};
use storage::repository::{AccessTokenRepository, Page, PageRequest, StorageError};

use crate::Clock;
use crate::error::TokenServiceError;

/// Fresh keys tried before issuance gives up.
pub const KEY_ATTEMPTS: usize = 16;

/// Draw a random key from the token alphabet.
pub fn random_key<R: Rng + ?Sized>(rng: &mut R) -> TokenKey {
    let mut indices = [0_usize; TOKEN_KEY_LEN];
    for slot in &mut indices {
        *slot = rng.random_range(0..TOKEN_ALPHABET.len());
    }
    TokenKey::from_alphabet_indices(indices)
}

/// Issues, lists, toggles and validates access tokens.
#[derive(Clone)]
pub struct TokenService {
    clock: Clock,
    tokens: Arc<dyn AccessTokenRepository>,
}

impl TokenService {
    #[must_use]
    pub fn new(clock: Clock, tokens: Arc<dyn AccessTokenRepository>) -> Self {
        Self { clock, tokens }
    }

    /// Create an active token with a fresh unique key.
    ///
    /// # Errors
    ///
    /// Returns `TokenServiceError::KeySpaceExhausted` if every attempt collided,
    /// or `TokenServiceError::Storage` if persistence fails.
    pub async fn issue(&self, description: Option<String>) -> Result<AccessToken, TokenServiceError> {
        let description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        for attempt in 1..=KEY_ATTEMPTS {
            let key = random_key(&mut rng());
            let token = AccessToken::new(key, description.clone(), self.clock.now());
            match self.tokens.insert_token(&token).await {
                Ok(()) => {
                    info!(key = ?token.key(), "access token issued");
                    return Ok(token);
                }
                Err(StorageError::Conflict) => {
                    debug!(attempt, "token key collision; drawing another");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(TokenServiceError::KeySpaceExhausted(KEY_ATTEMPTS))
    }

    /// Resolve a client-supplied key to an active token.
    ///
    /// # Errors
    ///
    /// Returns `TokenServiceError::Invalid` if the key is malformed, unknown or
    /// inactive.
    pub async fn validate(&self, raw: &str) -> Result<AccessToken, TokenServiceError> {
        let key = TokenKey::new(raw).map_err(|_| TokenServiceError::Invalid)?;
        match self.tokens.get_token(&key).await? {
            Some(token) if token.is_active() => Ok(token),
            _ => Err(TokenServiceError::Invalid),
        }
    }

    /// # Errors
    ///
    /// Returns `TokenServiceError::Storage` if repository access fails.
    pub async fn list(&self, page: PageRequest) -> Result<Page<AccessToken>, TokenServiceError> {
        Ok(self.tokens.list_tokens(page).await?)
    }

    /// Activate or deactivate a token, returning its new state.
    ///
    /// # Errors
    ///
    /// Returns `TokenServiceError::Token` for a malformed key or
    /// `TokenServiceError::NotFound` for an unknown one.
    pub async fn set_active(
        &self,
        raw: &str,
        active: bool,
    ) -> Result<AccessToken, TokenServiceError> {
        let key = TokenKey::new(raw)?;
        match self.tokens.set_token_active(&key, active).await {
            Ok(()) => {}
            Err(StorageError::NotFound) => return Err(TokenServiceError::NotFound),
            Err(e) => return Err(e.into()),
        }
        info!(key = ?key, active, "access token updated");
        self.tokens
            .get_token(&key)
            .await?
            .ok_or(TokenServiceError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qbank_core::time::fixed_clock;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use storage::repository::Storage;

    struct AlwaysTaken;

    #[async_trait]
    impl AccessTokenRepository for AlwaysTaken {
        async fn insert_token(&self, _token: &AccessToken) -> Result<(), StorageError> {
            Err(StorageError::Conflict)
        }

        async fn get_token(&self, _key: &TokenKey) -> Result<Option<AccessToken>, StorageError> {
            Ok(None)
        }

        async fn list_tokens(&self, page: PageRequest) -> Result<Page<AccessToken>, StorageError> {
            Ok(Page {
                items: Vec::new(),
                total: 0,
                request: page,
            })
        }

        async fn set_token_active(&self, _key: &TokenKey, _active: bool) -> Result<(), StorageError> {
            Err(StorageError::NotFound)
        }

        async fn count_tokens(&self) -> Result<u64, StorageError> {
            Ok(0)
        }
    }

    fn service() -> TokenService {
        TokenService::new(fixed_clock(), Storage::in_memory().tokens)
    }

    #[test]
    fn random_keys_use_the_alphabet() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..32 {
            let key = random_key(&mut rng);
            assert!(TokenKey::new(key.as_str()).is_ok());
        }
    }

    #[tokio::test]
    async fn issued_tokens_validate_until_deactivated() {
        let svc = service();
        let token = svc.issue(Some("  lab  ".into())).await.unwrap();
        assert_eq!(token.description(), Some("lab"));

        let key = token.key().as_str().to_string();
        assert!(svc.validate(&key).await.is_ok());

        let updated = svc.set_active(&key, false).await.unwrap();
        assert!(!updated.is_active());
        assert!(matches!(
            svc.validate(&key).await,
            Err(TokenServiceError::Invalid)
        ));
    }

    #[tokio::test]
    async fn malformed_or_unknown_keys_are_invalid() {
        let svc = service();
        assert!(matches!(svc.validate("nope").await, Err(TokenServiceError::Invalid)));
        assert!(matches!(
            svc.validate("ABCD1234").await,
            Err(TokenServiceError::Invalid)
        ));
        assert!(matches!(
            svc.set_active("ABCD1234", true).await,
            Err(TokenServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn persistent_collisions_give_up() {
        let svc = TokenService::new(fixed_clock(), Arc::new(AlwaysTaken));
        assert!(matches!(
            svc.issue(None).await,
            Err(TokenServiceError::KeySpaceExhausted(KEY_ATTEMPTS))
        ));
    }
}
