//! Registry Metrics
//!
//! Prometheus counters and gauges for entries, operations and open watches.
//! Each registry owns its own `prometheus::Registry` so several instances can
//! live in one process.

use crate::domain::EntryKind;
use crate::error::Result;
use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

/// Store operations counted per entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// First registration of a name
    Register,
    /// Registration of an existing name (refresh or replace)
    Update,
    /// Explicit unregistration
    Unregister,
    /// Eviction by the expiration sweeper
    Expire,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Register => "register",
            Operation::Update => "update",
            Operation::Unregister => "unregister",
            Operation::Expire => "expire",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metrics for one registry instance
pub struct RegistryMetrics {
    registry: Registry,
    entries: IntGaugeVec,
    operations: IntCounterVec,
    watchers: IntGaugeVec,
}

impl std::fmt::Debug for RegistryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryMetrics").finish_non_exhaustive()
    }
}

impl RegistryMetrics {
    /// Create and register all collectors
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let entries = IntGaugeVec::new(
            Opts::new("registry_entries", "Number of live registry entries"),
            &["kind"],
        )?;
        let operations = IntCounterVec::new(
            Opts::new("registry_operations_total", "Store operations applied"),
            &["kind", "op"],
        )?;
        let watchers = IntGaugeVec::new(
            Opts::new("registry_watchers", "Number of open watch streams"),
            &["kind"],
        )?;

        registry.register(Box::new(entries.clone()))?;
        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(watchers.clone()))?;

        Ok(Self {
            registry,
            entries,
            operations,
            watchers,
        })
    }

    /// Count an applied operation
    pub fn record(&self, kind: EntryKind, op: Operation) {
        self.operations
            .with_label_values(&[kind.as_str(), op.as_str()])
            .inc();
    }

    /// Number of times `op` was applied to entries of `kind`
    pub fn operations(&self, kind: EntryKind, op: Operation) -> u64 {
        self.operations
            .with_label_values(&[kind.as_str(), op.as_str()])
            .get()
    }

    /// Publish the current entry count
    pub fn set_entries(&self, kind: EntryKind, count: usize) {
        self.entries
            .with_label_values(&[kind.as_str()])
            .set(count as i64);
    }

    /// Gauge tracking open watches of `kind`
    pub fn watchers(&self, kind: EntryKind) -> IntGauge {
        self.watchers.with_label_values(&[kind.as_str()])
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Decrements a watcher gauge when the watch it belongs to is dropped
#[derive(Debug)]
pub struct WatchGuard {
    gauge: IntGauge,
}

impl WatchGuard {
    pub fn new(gauge: IntGauge) -> Self {
        gauge.inc();
        Self { gauge }
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_operations() {
        let metrics = RegistryMetrics::new().unwrap();
        metrics.record(EntryKind::Nse, Operation::Register);
        metrics.record(EntryKind::Nse, Operation::Register);
        metrics.record(EntryKind::Ns, Operation::Unregister);

        assert_eq!(metrics.operations(EntryKind::Nse, Operation::Register), 2);
        assert_eq!(metrics.operations(EntryKind::Ns, Operation::Unregister), 1);
        assert_eq!(metrics.operations(EntryKind::Nse, Operation::Expire), 0);
    }

    #[test]
    fn test_watch_guard() {
        let metrics = RegistryMetrics::new().unwrap();
        let guard = WatchGuard::new(metrics.watchers(EntryKind::Nse));
        assert_eq!(metrics.watchers(EntryKind::Nse).get(), 1);
        drop(guard);
        assert_eq!(metrics.watchers(EntryKind::Nse).get(), 0);
    }

    #[test]
    fn test_encode() {
        let metrics = RegistryMetrics::new().unwrap();
        metrics.set_entries(EntryKind::Nse, 3);
        let text = metrics.encode().unwrap();
        assert!(text.contains("registry_entries{kind=\"nse\"} 3"));
    }
}
