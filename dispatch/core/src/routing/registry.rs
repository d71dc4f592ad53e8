//! Backend Registry
//!
//! Backend id → model client. Populated before serving; the router owns it by
//! value and only mutates it through `&mut self`, so concurrent requests read
//! it without synchronization.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::backend::ModelClient;

/// Registered model clients keyed by backend id
#[derive(Clone, Default)]
pub struct BackendRegistry {
    clients: HashMap<String, Arc<dyn ModelClient>>,
}

impl BackendRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under its own backend id, returning any client it replaced
    pub fn register(&mut self, client: Arc<dyn ModelClient>) -> Option<Arc<dyn ModelClient>> {
        let id = client.backend_id().to_string();
        info!(backend = %id, model = client.model_name(), "Registered model client");

        let previous = self.clients.insert(id.clone(), client);
        if previous.is_some() {
            warn!(backend = %id, "Replaced previously registered client");
        }
        previous
    }

    /// Look up a client
    #[must_use]
    pub fn get(&self, backend_id: &str) -> Option<&Arc<dyn ModelClient>> {
        self.clients.get(backend_id)
    }

    /// Whether a backend id is registered
    #[must_use]
    pub fn contains(&self, backend_id: &str) -> bool {
        self.clients.contains_key(backend_id)
    }

    /// Registered ids, sorted
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.clients.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered clients
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.ids())
            .finish()
    }
}
