//! Application wiring for the Chatdesk CLI

use std::sync::Arc;

use tracing::debug;

use chatdesk_core::{FileStore, KeyValueStore, RealtimeClient, TokenManager, TokenSource};

use crate::config::AppConfig;
use crate::error::Result;
use crate::prefs::Preferences;

/// Long-lived handles shared by every command
pub struct ChatdeskApp {
    pub config: AppConfig,
    pub tokens: Arc<TokenManager>,
    pub prefs: Preferences,
    store: Arc<dyn KeyValueStore>,
}

impl ChatdeskApp {
    /// Open the session store and build the token manager
    pub fn new(config: AppConfig) -> Result<Self> {
        let data_dir = config.data_dir();
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::in_dir(&data_dir)?);
        debug!("Session store in {}", data_dir.display());
        Self::with_store(config, store)
    }

    /// Build the application over an existing store
    pub fn with_store(config: AppConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let tokens = Arc::new(TokenManager::new(&config.client, Arc::clone(&store))?);
        let prefs = Preferences::new(Arc::clone(&store));
        Ok(Self {
            config,
            tokens,
            prefs,
            store,
        })
    }

    /// Realtime client bound to this application's token manager
    pub fn realtime_client(&self) -> Result<RealtimeClient> {
        let tokens: Arc<dyn TokenSource> = self.tokens.clone();
        Ok(RealtimeClient::with_socketio(self.config.client.clone(), tokens)?)
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }
}

impl std::fmt::Debug for ChatdeskApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatdeskApp")
            .field("config", &self.config)
            .field("tokens", &self.tokens)
            .finish()
    }
}
