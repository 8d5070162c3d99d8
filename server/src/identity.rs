//! Identity verification collaborator.
//!
//! The coordinator never authenticates anyone itself. A calling layer turns
//! an opaque token into an [`Identity`] through an [`IdentityProvider`] and
//! passes the result in. [`crate::supabase::SupabaseClient`] is the
//! production provider; [`StaticIdentities`] serves tests and local setups.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::types::Identity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The token is missing, malformed, expired or unknown.
    #[error("unauthenticated: invalid or expired token")]
    Unauthenticated,

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid identity response: {0}")]
    InvalidResponse(String),
}

/// Verifies caller tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolves `token` to the identity it was issued for.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Unauthenticated`] for tokens the provider
    /// rejects, and the other variants when the provider itself fails.
    async fn verify_identity(&self, token: &str) -> Result<Identity, IdentityError>;
}

/// Fixed token table.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentities {
    tokens: HashMap<String, Identity>,
}

impl StaticIdentities {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentities {
    async fn verify_identity(&self, token: &str) -> Result<Identity, IdentityError> {
        match self.tokens.get(token) {
            Some(identity) => Ok(identity.clone()),
            None => {
                debug!("Rejected unknown token");
                Err(IdentityError::Unauthenticated)
            }
        }
    }
}
