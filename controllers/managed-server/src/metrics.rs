//! Prometheus metrics for the ManagedServer controller.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `managedserver_total` | Gauge | `namespace` |
//! | `managedserver_phase` | Gauge | `namespace`, `phase` |
//! | `managedserver_child_creation_errors_total` | Counter | `namespace`, `name`, `kind` |
//! | `managedserver_reconcile_duration_seconds` | Histogram | `namespace` |
//!
//! Metrics are registered on a caller-supplied [`Registry`] so tests can use an
//! isolated one.

use crate::error::ChildKind;
use crds::{ManagedServer, ServerPhase};
use prometheus::{
    Encoder, HistogramOpts, HistogramTimer, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Controller metrics handle. Cheap to clone; all clones share the same series.
#[derive(Clone)]
pub struct Metrics {
    servers_total: IntGaugeVec,
    servers_by_phase: IntGaugeVec,
    child_errors_total: IntCounterVec,
    reconcile_duration: HistogramVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Creates the metrics and registers them with `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric is already registered under the same name.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let servers_total = IntGaugeVec::new(
            Opts::new("managedserver_total", "Total number of ManagedServer resources"),
            &["namespace"],
        )?;
        registry.register(Box::new(servers_total.clone()))?;

        let servers_by_phase = IntGaugeVec::new(
            Opts::new("managedserver_phase", "Number of ManagedServer resources by phase"),
            &["namespace", "phase"],
        )?;
        registry.register(Box::new(servers_by_phase.clone()))?;

        let child_errors_total = IntCounterVec::new(
            Opts::new(
                "managedserver_child_creation_errors_total",
                "Failed child convergence attempts",
            ),
            &["namespace", "name", "kind"],
        )?;
        registry.register(Box::new(child_errors_total.clone()))?;

        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new(
                "managedserver_reconcile_duration_seconds",
                "Time taken to reconcile a ManagedServer",
            ),
            &["namespace"],
        )?;
        registry.register(Box::new(reconcile_duration.clone()))?;

        Ok(Self {
            servers_total,
            servers_by_phase,
            child_errors_total,
            reconcile_duration,
        })
    }

    /// Starts timing a reconcile attempt; the duration is observed when the timer drops.
    #[must_use]
    pub fn start_reconcile_timer(&self, namespace: &str) -> HistogramTimer {
        self.reconcile_duration.with_label_values(&[namespace]).start_timer()
    }

    /// Counts a failed convergence of one child.
    pub fn record_child_error(&self, namespace: &str, name: &str, kind: ChildKind) {
        self.child_errors_total
            .with_label_values(&[namespace, name, kind.metric_label()])
            .inc();
    }

    /// Recomputes the inventory gauges of `namespace` from a full listing.
    ///
    /// Parents without a projected phase count as Pending.
    pub fn set_inventory(&self, namespace: &str, servers: &[ManagedServer]) {
        self.servers_total
            .with_label_values(&[namespace])
            .set(i64::try_from(servers.len()).unwrap_or(i64::MAX));

        for phase in ServerPhase::ALL {
            let count = servers
                .iter()
                .filter(|server| {
                    server
                        .status
                        .as_ref()
                        .and_then(|status| status.phase)
                        .unwrap_or(ServerPhase::Pending)
                        == phase
                })
                .count();
            self.servers_by_phase
                .with_label_values(&[namespace, phase.as_str()])
                .set(i64::try_from(count).unwrap_or(i64::MAX));
        }
    }
}

#[cfg(test)]
impl Metrics {
    pub fn child_errors(&self, namespace: &str, name: &str, kind: ChildKind) -> u64 {
        self.child_errors_total
            .with_label_values(&[namespace, name, kind.metric_label()])
            .get()
    }

    pub fn servers_total(&self, namespace: &str) -> i64 {
        self.servers_total.with_label_values(&[namespace]).get()
    }

    pub fn servers_in_phase(&self, namespace: &str, phase: ServerPhase) -> i64 {
        self.servers_by_phase
            .with_label_values(&[namespace, phase.as_str()])
            .get()
    }

    pub fn reconcile_count(&self, namespace: &str) -> u64 {
        self.reconcile_duration
            .with_label_values(&[namespace])
            .get_sample_count()
    }
}

/// Encodes every metric family in `registry` in the Prometheus text format.
pub fn encode_text(registry: &Registry) -> Result<String, prometheus::Error> {
    let mut buf = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buf)?;
    String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{ManagedServerSpec, ManagedServerStatus};

    fn server(name: &str, phase: Option<ServerPhase>) -> ManagedServer {
        let mut server = ManagedServer::new(name, ManagedServerSpec::new("a:v1"));
        server.status = phase.map(|phase| ManagedServerStatus {
            phase: Some(phase),
            ..Default::default()
        });
        server
    }

    #[test]
    fn test_registration_is_per_registry() {
        let registry = Registry::new();
        Metrics::register(&registry).unwrap();
        assert!(Metrics::register(&registry).is_err());
        assert!(Metrics::register(&Registry::new()).is_ok());
    }

    #[test]
    fn test_inventory_sets_every_phase() {
        let metrics = Metrics::register(&Registry::new()).unwrap();
        metrics.set_inventory(
            "default",
            &[
                server("a", Some(ServerPhase::Running)),
                server("b", Some(ServerPhase::Running)),
                server("c", None),
            ],
        );
        assert_eq!(metrics.servers_total("default"), 3);
        assert_eq!(metrics.servers_in_phase("default", ServerPhase::Running), 2);
        assert_eq!(metrics.servers_in_phase("default", ServerPhase::Pending), 1);
        assert_eq!(metrics.servers_in_phase("default", ServerPhase::Degraded), 0);

        // Shrinking inventory resets stale phase counts
        metrics.set_inventory("default", &[]);
        assert_eq!(metrics.servers_total("default"), 0);
        assert_eq!(metrics.servers_in_phase("default", ServerPhase::Running), 0);
    }

    #[test]
    fn test_child_errors_and_timer() {
        let registry = Registry::new();
        let metrics = Metrics::register(&registry).unwrap();

        metrics.record_child_error("default", "web", ChildKind::Endpoint);
        metrics.record_child_error("default", "web", ChildKind::Endpoint);
        assert_eq!(metrics.child_errors("default", "web", ChildKind::Endpoint), 2);
        assert_eq!(metrics.child_errors("default", "web", ChildKind::Workload), 0);

        drop(metrics.start_reconcile_timer("default"));
        assert_eq!(metrics.reconcile_count("default"), 1);

        let output = encode_text(&registry).unwrap();
        assert!(output.contains("managedserver_child_creation_errors_total"));
        assert!(output.contains("kind=\"service\""));
        assert!(output.contains("managedserver_reconcile_duration_seconds"));
    }
}
