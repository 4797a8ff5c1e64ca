//! Identity resolution between the internal and public user keys.
//!
//! Every component resolves the caller-supplied key exactly once at its
//! boundary and carries the resulting [`UserIdentity`] from there on.

use chrono::{DateTime, Utc};

use civic_ledger_core::{LedgerError, PublicUserId, Result, UserIdentity, UserKey};
use civic_ledger_store::Store;

/// Maps either user key to the full key pair.
#[derive(Clone, Copy)]
pub struct IdentityResolver<'a> {
    store: &'a dyn Store,
}

impl<'a> IdentityResolver<'a> {
    /// Create a resolver over `store`.
    #[must_use]
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Resolve a key to both keys of its user.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownUser` if no user holds the key.
    pub async fn resolve(&self, key: UserKey) -> Result<UserIdentity> {
        self.store
            .resolve_user(key)
            .await?
            .ok_or_else(|| LedgerError::UnknownUser {
                key: key.to_string(),
            })
    }

    /// Resolve a key, returning `None` for an unknown user.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub async fn try_resolve(&self, key: UserKey) -> Result<Option<UserIdentity>> {
        Ok(self.store.resolve_user(key).await?)
    }

    /// Register a user by public key. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn register(&self, public: PublicUserId, now: DateTime<Utc>) -> Result<UserIdentity> {
        let identity = self.store.register_user(public, now).await?;
        tracing::debug!(
            user_id = %identity.internal,
            public_user_id = %identity.public,
            "User registered"
        );
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use civic_ledger_core::InternalUserId;
    use civic_ledger_store::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn resolves_both_key_forms() {
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&store);
        let identity = resolver
            .register(PublicUserId::generate(), Utc::now())
            .await
            .unwrap();

        let by_internal = resolver.resolve(identity.internal.into()).await.unwrap();
        let by_public = resolver.resolve(identity.public.into()).await.unwrap();
        assert_eq!(by_internal, identity);
        assert_eq!(by_public, identity);
    }

    #[tokio::test]
    async fn unknown_keys_are_errors() {
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&store);

        let err = resolver
            .resolve(UserKey::Internal(InternalUserId::new(404)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownUser { key } if key == "404"));

        let missing = resolver
            .try_resolve(UserKey::Public(PublicUserId::generate()))
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
