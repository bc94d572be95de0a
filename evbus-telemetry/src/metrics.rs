//! ## evbus-telemetry::metrics
//! **Prometheus counters and histograms for bus traffic**

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};

#[derive(Debug, Clone)]
pub struct BusMetrics {
    pub registry: Registry,
    pub published_events: IntCounter,
    pub delivered_invocations: IntCounter,
    pub handler_failures: IntCounter,
    pub forwarded_events: IntCounter,
    pub rpc_latency: Histogram,
}

impl BusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let published_events =
            IntCounter::new("evbus_published_events_total", "Publish calls received")?;
        let delivered_invocations = IntCounter::new(
            "evbus_delivered_invocations_total",
            "Handler invocations that completed",
        )?;
        let handler_failures = IntCounter::new(
            "evbus_handler_failures_total",
            "Handler invocations that failed or were skipped",
        )?;
        let forwarded_events = IntCounter::new(
            "evbus_forwarded_events_total",
            "Events pushed to remote subscribers",
        )?;
        let rpc_latency = Histogram::with_opts(
            HistogramOpts::new("evbus_rpc_latency_seconds", "Outbound RPC round-trip time")
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;

        registry.register(Box::new(published_events.clone()))?;
        registry.register(Box::new(delivered_invocations.clone()))?;
        registry.register(Box::new(handler_failures.clone()))?;
        registry.register(Box::new(forwarded_events.clone()))?;
        registry.register(Box::new(rpc_latency.clone()))?;

        Ok(Self {
            registry,
            published_events,
            delivered_invocations,
            handler_failures,
            forwarded_events,
            rpc_latency,
        })
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
