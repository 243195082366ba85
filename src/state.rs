use crate::config::ServerConfig;
use crate::llm::ChatModel;
use crate::session::SessionStore;
use std::sync::Arc;

/// Shared state handed to every handler.
pub struct AppState {
    config: Arc<ServerConfig>,
    store: Arc<SessionStore>,
    model: Arc<dyn ChatModel>,
}

impl AppState {
    pub fn new(
        config: Arc<ServerConfig>,
        store: Arc<SessionStore>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            config,
            store,
            model,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn store_arc(&self) -> Arc<SessionStore> {
        self.store.clone()
    }

    pub fn model(&self) -> &dyn ChatModel {
        self.model.as_ref()
    }
}
