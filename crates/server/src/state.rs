use std::sync::Arc;
use torrelay_core::{Config, FulfillmentScheduler, RequestStore, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    store: Arc<dyn RequestStore>,
    scheduler: Option<Arc<FulfillmentScheduler>>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn RequestStore>,
        scheduler: Option<Arc<FulfillmentScheduler>>,
    ) -> Self {
        Self {
            config,
            store,
            scheduler,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn store(&self) -> &dyn RequestStore {
        self.store.as_ref()
    }

    /// The fulfillment scheduler, if fulfillment is enabled.
    pub fn scheduler(&self) -> Option<&Arc<FulfillmentScheduler>> {
        self.scheduler.as_ref()
    }
}
