use crate::meta::registry::Registry;
use crate::obs::Metrics;
use crate::storage::object_store::ObjectStore;
use crate::util::config::Config;
use std::sync::Arc;

pub mod ota;
pub mod server;

/// Shared per-process handles: configuration, the two external-service
/// clients, and the metrics registry. Built once at startup and cloned into
/// every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Registry,
    pub store: ObjectStore,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Config,
        registry: Registry,
        store: ObjectStore,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            metrics,
        }
    }

    pub fn from_config(config: Config, metrics: Arc<Metrics>) -> Self {
        let registry = Registry::from_config(&config);
        let store = ObjectStore::from_config(&config);
        Self::new(config, registry, store, metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::AppState;
    use crate::obs::Metrics;
    use crate::test_support;

    #[tokio::test]
    async fn from_config_builds_clients_from_endpoints() {
        let (state, _backends) = test_support::build_state().await;
        let rebuilt = AppState::from_config(state.config.clone(), Metrics::new());
        let releases = rebuilt.registry.list().await.expect("list");
        assert!(releases.is_empty());
    }
}
