//! API key handling for the hosted generative services.
//!
//! [`CredentialStore`] holds the key shared by every [`GeminiClient`]
//! clone and implements [`Authorizer`]: a store without a key can ask the
//! user for one on the terminal when it was created as interactive.
//!
//! [`GeminiClient`]: crate::GeminiClient

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::{error::FramecastError, services::Authorizer};

/// Environment variables consulted by [`CredentialStore::from_env`], in
/// order.
pub const API_KEY_VARIABLES: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// Shared, mutable API key.
#[derive(Clone, Default)]
pub struct CredentialStore {
    key: Arc<RwLock<Option<String>>>,
    interactive: bool,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("has_key", &self.api_key().is_some())
            .field("interactive", &self.interactive)
            .finish()
    }
}

impl CredentialStore {
    /// An empty, non-interactive store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding `key`.
    pub fn with_key(key: impl Into<String>) -> Self {
        let store = Self::new();
        store.set_api_key(key);
        store
    }

    /// A store initialized from `GEMINI_API_KEY`, falling back to `API_KEY`.
    pub fn from_env() -> Self {
        let store = Self::new();
        if let Some(key) = API_KEY_VARIABLES
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|value| !value.trim().is_empty())
        {
            store.set_api_key(key);
        }
        store
    }

    /// Allow [`select_credential`](Authorizer::select_credential) to prompt
    /// on stderr and read a key from stdin.
    #[must_use]
    pub fn interactive(mut self, enabled: bool) -> Self {
        self.interactive = enabled;
        self
    }

    /// The current key, if any.
    pub fn api_key(&self) -> Option<String> {
        self.key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the current key. Blank keys clear the store.
    pub fn set_api_key(&self, key: impl Into<String>) {
        let key = key.into();
        let key = key.trim();
        *self.key.write().unwrap_or_else(PoisonError::into_inner) =
            (!key.is_empty()).then(|| key.to_string());
    }
}

#[async_trait]
impl Authorizer for CredentialStore {
    async fn has_credential(&self) -> Result<bool, FramecastError> {
        Ok(self.api_key().is_some())
    }

    async fn select_credential(&self) -> Result<(), FramecastError> {
        if !self.interactive {
            return Err(FramecastError::Authorization(format!(
                "no API key configured; set {} or pass one explicitly",
                API_KEY_VARIABLES[0]
            )));
        }

        let mut stderr = tokio::io::stderr();
        stderr.write_all(b"Enter a Gemini API key: ").await?;
        stderr.flush().await?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await?;
        self.set_api_key(line);

        if self.api_key().is_none() {
            log::warn!("No API key entered");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_keys_clear_the_store() {
        let store = CredentialStore::with_key("  secret \n");
        assert_eq!(store.api_key().as_deref(), Some("secret"));

        let clone = store.clone();
        clone.set_api_key("   ");
        assert_eq!(store.api_key(), None);
    }

    #[tokio::test]
    async fn non_interactive_selection_fails() {
        let store = CredentialStore::new();
        assert!(!store.has_credential().await.unwrap());
        let error = store.select_credential().await.unwrap_err();
        assert!(matches!(error, FramecastError::Authorization(_)));
    }
}
