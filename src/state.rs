use std::sync::Arc;

use crate::collaborators::OrderCatalog;
use crate::config::{Config, MatchingPolicy};
use crate::gateway::EventGateway;
use crate::observability::metrics::Metrics;
use crate::registry::CourierRegistry;
use crate::store::DeliveryStore;

pub struct AppState {
    pub registry: CourierRegistry,
    pub deliveries: DeliveryStore,
    pub gateway: Arc<EventGateway>,
    pub catalog: Arc<dyn OrderCatalog>,
    pub metrics: Metrics,
    pub matching: MatchingPolicy,
}

impl AppState {
    pub fn new(config: &Config, catalog: Arc<dyn OrderCatalog>) -> Self {
        let metrics = Metrics::new();
        let gateway = Arc::new(EventGateway::new(
            config.event_queue_size,
            config.event_feed_buffer,
            config.max_event_attempts,
            config.redelivery_backoff_ms,
            metrics.clone(),
        ));

        Self {
            registry: CourierRegistry::new(),
            deliveries: DeliveryStore::new(),
            gateway,
            catalog,
            metrics,
            matching: config.matching.clone(),
        }
    }
}
