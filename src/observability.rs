//! Prometheus metrics for watchers, change streams, probes and failovers.

use crate::watch::StrategyKind;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    active_watchers: IntGauge,
    stream_connections: IntGauge,
    change_events: IntCounterVec,
    probes: IntCounterVec,
    failovers: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let active_watchers = IntGauge::new(
            "liveness_active_watchers",
            "Projects with a running file watcher",
        )
        .expect("valid metric definition");
        let stream_connections = IntGauge::new(
            "liveness_stream_connections",
            "Open change-event stream connections",
        )
        .expect("valid metric definition");
        let change_events = IntCounterVec::new(
            Opts::new("liveness_change_events_total", "Change events relayed to subscribers"),
            &["strategy"],
        )
        .expect("valid metric definition");
        let probes = IntCounterVec::new(
            Opts::new("liveness_probes_total", "Tunnel probes by resulting tunnel status"),
            &["status"],
        )
        .expect("valid metric definition");
        let failovers = IntCounterVec::new(
            Opts::new("liveness_failovers_total", "Backup dev-server launches by outcome"),
            &["outcome"],
        )
        .expect("valid metric definition");

        for collector in [
            Box::new(active_watchers.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(stream_connections.clone()),
            Box::new(change_events.clone()),
            Box::new(probes.clone()),
            Box::new(failovers.clone()),
        ] {
            if let Err(e) = registry.register(collector) {
                tracing::warn!("Failed to register metric: {e}");
            }
        }

        Self {
            registry,
            active_watchers,
            stream_connections,
            change_events,
            probes,
            failovers,
        }
    }

    pub fn set_active_watchers(&self, count: usize) {
        self.active_watchers
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn stream_opened(&self) {
        self.stream_connections.inc();
    }

    pub fn stream_closed(&self) {
        self.stream_connections.dec();
    }

    pub fn record_change_event(&self, strategy: StrategyKind) {
        self.change_events
            .with_label_values(&[strategy.as_str()])
            .inc();
    }

    pub fn record_probe(&self, status: &str) {
        self.probes.with_label_values(&[status]).inc();
    }

    pub fn record_failover(&self, outcome: &str) {
        self.failovers.with_label_values(&[outcome]).inc();
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_recorded_values() {
        let metrics = Metrics::new();
        metrics.set_active_watchers(2);
        metrics.record_change_event(StrategyKind::Polling);
        metrics.record_probe("disconnected");
        metrics.record_failover("success");

        let text = metrics.render().unwrap();
        assert!(text.contains("liveness_active_watchers 2"));
        assert!(text.contains("liveness_change_events_total{strategy=\"polling\"} 1"));
        assert!(text.contains("liveness_probes_total{status=\"disconnected\"} 1"));
        assert!(text.contains("liveness_failovers_total{outcome=\"success\"} 1"));
    }

    #[test]
    fn stream_gauge_tracks_open_connections() {
        let metrics = Metrics::new();
        metrics.stream_opened();
        metrics.stream_opened();
        metrics.stream_closed();
        assert!(metrics.render().unwrap().contains("liveness_stream_connections 1"));
    }
}
