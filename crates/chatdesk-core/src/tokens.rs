//! Credential pair and its in-process cache

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StorageError;
use crate::storage::{KeyValueStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

/// Number of characters shown when a token is logged
pub const TOKEN_PREVIEW_LEN: usize = 20;

/// Shortened form of a token that is safe to log
pub fn preview_token(token: &str) -> String {
    match token.char_indices().nth(TOKEN_PREVIEW_LEN) {
        Some((idx, _)) => format!("{}...", &token[..idx]),
        None => token.to_string(),
    }
}

// ----------------------------------------------------------------------------
// Credential Pair
// ----------------------------------------------------------------------------

/// Access and refresh token issued together by the auth service
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &preview_token(&self.access_token))
            .field("refresh_token", &preview_token(&self.refresh_token))
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Token Cache
// ----------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
struct CachedTokens {
    access: Option<String>,
    refresh: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Access,
    Refresh,
}

impl Slot {
    fn key(self) -> &'static str {
        match self {
            Slot::Access => ACCESS_TOKEN_KEY,
            Slot::Refresh => REFRESH_TOKEN_KEY,
        }
    }
}

impl CachedTokens {
    fn slot(&self, slot: Slot) -> Option<&String> {
        match slot {
            Slot::Access => self.access.as_ref(),
            Slot::Refresh => self.refresh.as_ref(),
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut Option<String> {
        match slot {
            Slot::Access => &mut self.access,
            Slot::Refresh => &mut self.refresh,
        }
    }
}

/// Write-through cache in front of the persistent store
///
/// Both tokens live behind one lock, so readers never see half of a
/// replaced pair.
pub struct TokenCache {
    store: Arc<dyn KeyValueStore>,
    cached: RwLock<CachedTokens>,
}

impl TokenCache {
    /// Create a cache and warm it from whatever the store already holds
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let cached = CachedTokens {
            access: store.get(ACCESS_TOKEN_KEY),
            refresh: store.get(REFRESH_TOKEN_KEY),
        };
        Self {
            store,
            cached: RwLock::new(cached),
        }
    }

    /// Access token from the cache, backfilled from storage on a miss
    pub fn access_token(&self) -> Option<String> {
        self.cached_or_stored(Slot::Access)
    }

    /// Refresh token from the cache, backfilled from storage on a miss
    pub fn refresh_token(&self) -> Option<String> {
        self.cached_or_stored(Slot::Refresh)
    }

    fn cached_or_stored(&self, slot: Slot) -> Option<String> {
        if let Some(token) = self.cached.read().slot(slot) {
            return Some(token.clone());
        }
        // Storage is read under the write lock so a concurrent clear cannot
        // be undone by a stale backfill.
        let mut cached = self.cached.write();
        let entry = cached.slot_mut(slot);
        if entry.is_none() {
            *entry = self.store.get(slot.key());
        }
        entry.clone()
    }

    /// Whether both tokens are resolvable
    pub fn has_pair(&self) -> bool {
        self.access_token().is_some() && self.refresh_token().is_some()
    }

    /// Whether each token is held in the cache (without consulting storage)
    pub fn cached_presence(&self) -> (bool, bool) {
        let cached = self.cached.read();
        (cached.access.is_some(), cached.refresh.is_some())
    }

    /// Whether each token is held in storage
    pub fn stored_presence(&self) -> (bool, bool) {
        (
            self.store.get(ACCESS_TOKEN_KEY).is_some(),
            self.store.get(REFRESH_TOKEN_KEY).is_some(),
        )
    }

    /// Replace both tokens wholesale
    ///
    /// On a storage failure neither the store nor the cache changes.
    pub fn replace(&self, pair: &CredentialPair) -> Result<(), StorageError> {
        let mut cached = self.cached.write();
        self.store.set_all(&[
            (ACCESS_TOKEN_KEY, &pair.access_token),
            (REFRESH_TOKEN_KEY, &pair.refresh_token),
        ])?;
        cached.access = Some(pair.access_token.clone());
        cached.refresh = Some(pair.refresh_token.clone());
        Ok(())
    }

    /// Drop both tokens from cache and storage
    ///
    /// The cache is always cleared; a storage failure is logged and the
    /// first error returned.
    pub fn clear(&self) -> Result<(), StorageError> {
        let mut cached = self.cached.write();
        *cached = CachedTokens::default();

        let access = self.store.remove(ACCESS_TOKEN_KEY);
        let refresh = self.store.remove(REFRESH_TOKEN_KEY);
        if let Err(e) = &access {
            warn!("Failed to remove stored access token: {}", e);
        }
        if let Err(e) = &refresh {
            warn!("Failed to remove stored refresh token: {}", e);
        }
        access.and(refresh)
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (access, refresh) = self.cached_presence();
        f.debug_struct("TokenCache")
            .field("access_cached", &access)
            .field("refresh_cached", &refresh)
            .finish()
    }
}
