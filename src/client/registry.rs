use std::sync::Arc;

use dashmap::DashMap;

use super::{ClientError, ClientSettings, CrmClient};

pub type ErrorCallback = Arc<dyn Fn(&ClientSettings, &ClientError) + Send + Sync>;

/// Process-wide cache of validated clients, keyed on the exact settings tuple.
///
/// Built once at startup and shared by reference; [`ClientRegistry::clear`]
/// drops every cached client on teardown.
pub struct ClientRegistry {
    clients: DashMap<ClientSettings, Arc<CrmClient>>,
    on_error: ErrorCallback,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::with_error_callback(Arc::new(|settings, err| {
            tracing::warn!(
                api_url = %settings.api_url,
                endpoint_id = %settings.endpoint_id,
                "CRM client initialization failed: {err}"
            );
        }))
    }

    pub fn with_error_callback(on_error: ErrorCallback) -> Self {
        Self {
            clients: DashMap::new(),
            on_error,
        }
    }

    /// Return the cached client for `settings`, building it on first use.
    /// A construction failure is reported to the error callback and yields `None`.
    pub fn get(&self, settings: &ClientSettings) -> Option<Arc<CrmClient>> {
        if let Some(client) = self.clients.get(settings) {
            return Some(Arc::clone(client.value()));
        }

        match CrmClient::new(settings) {
            Ok(client) => {
                let entry = self
                    .clients
                    .entry(settings.clone())
                    .or_insert_with(|| Arc::new(client));
                Some(Arc::clone(entry.value()))
            }
            Err(err) => {
                (self.on_error)(settings, &err);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn clear(&self) {
        self.clients.clear();
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
