use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub deliveries_created_total: IntCounter,
    pub assignments_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
    pub active_deliveries: IntGauge,
    pub events_published_total: IntCounterVec,
    pub event_redeliveries_total: IntCounter,
    pub event_dead_letters_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let deliveries_created_total = IntCounter::new(
            "deliveries_created_total",
            "Total delivery records created",
        )
        .expect("valid deliveries_created_total metric");

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Assignment attempts by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of assignment attempts in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let active_deliveries = IntGauge::new(
            "active_deliveries",
            "Deliveries currently in a non-terminal state",
        )
        .expect("valid active_deliveries metric");

        let events_published_total = IntCounterVec::new(
            Opts::new("events_published_total", "Events published by routing key"),
            &["routing_key"],
        )
        .expect("valid events_published_total metric");

        let event_redeliveries_total = IntCounter::new(
            "event_redeliveries_total",
            "Messages requeued after a handler failure",
        )
        .expect("valid event_redeliveries_total metric");

        let event_dead_letters_total = IntCounter::new(
            "event_dead_letters_total",
            "Messages moved to the dead-letter store",
        )
        .expect("valid event_dead_letters_total metric");

        registry
            .register(Box::new(deliveries_created_total.clone()))
            .expect("register deliveries_created_total");
        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(active_deliveries.clone()))
            .expect("register active_deliveries");
        registry
            .register(Box::new(events_published_total.clone()))
            .expect("register events_published_total");
        registry
            .register(Box::new(event_redeliveries_total.clone()))
            .expect("register event_redeliveries_total");
        registry
            .register(Box::new(event_dead_letters_total.clone()))
            .expect("register event_dead_letters_total");

        Self {
            registry,
            deliveries_created_total,
            assignments_total,
            assignment_latency_seconds,
            active_deliveries,
            events_published_total,
            event_redeliveries_total,
            event_dead_letters_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
