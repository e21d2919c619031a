use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::memory::InMemoryConnector;
use super::Connector;

/// Maps connection ids stored on projects to live connector instances.
/// Connections registered once are shared by every run that names them.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: RwLock<HashMap<String, Arc<dyn Connector>>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection_id: impl Into<String>, connector: Arc<dyn Connector>) {
        self.connectors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(connection_id.into(), connector);
    }

    /// Registers and returns a fresh in-memory connector under the given id.
    pub fn register_memory(&self, connection_id: impl Into<String>) -> Arc<InMemoryConnector> {
        let connector = Arc::new(InMemoryConnector::new());
        self.register(connection_id, connector.clone());
        connector
    }

    pub fn resolve(&self, connection_id: &str) -> Option<Arc<dyn Connector>> {
        self.connectors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(connection_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_connections() {
        let registry = ConnectorRegistry::new();
        registry.register_memory("memory:crm-a");

        assert!(registry.resolve("memory:crm-a").is_some());
        assert!(registry.resolve("memory:missing").is_none());
    }

    #[test]
    fn registrations_are_shared() {
        let registry = ConnectorRegistry::new();
        let connector = registry.register_memory("memory:crm-b");
        connector.set_schema("contact", vec!["email".to_string()]);

        let resolved = registry.resolve("memory:crm-b").unwrap();
        assert!(Arc::ptr_eq(
            &(connector as Arc<dyn Connector>),
            &resolved
        ));
    }
}
