//! Metrics collection and export

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Supply counters
    pub accounts_created: IntCounter,
    pub accounts_popped: IntCounter,
    pub accounts_expired: IntCounter,
    pub replenish_failures: IntCounter,
    pub reservations_rejected: IntCounter,

    // Relay counters
    pub relay_sends: IntCounter,
    pub relay_send_errors: IntCounter,
    pub relay_fallback_sends: IntCounter,
    pub relay_dropped_sends: IntCounter,

    // Lifecycle counters
    pub tx_created: IntCounter,
    pub tx_confirmed: IntCounter,
    pub tx_timed_out: IntCounter,
    pub tx_reverted: IntCounter,

    // Gauges
    pub fee_accounts_funded: IntGauge,
    pub program_accounts_funded: IntGauge,
    pub relay_live_endpoints: IntGauge,
    pub active_users: IntGauge,

    // Histograms
    pub confirmation_time: Histogram,
    pub replenish_batch_latency: Histogram,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let accounts_created = IntCounter::with_opts(Opts::new(
            "accounts_created_total",
            "Supply accounts successfully created and funded",
        ))?;
        let accounts_popped = IntCounter::with_opts(Opts::new(
            "accounts_popped_total",
            "Supply accounts handed out to clients",
        ))?;
        let accounts_expired = IntCounter::with_opts(Opts::new(
            "accounts_expired_total",
            "Supply accounts discarded past their expiry",
        ))?;
        let replenish_failures = IntCounter::with_opts(Opts::new(
            "replenish_failures_total",
            "Account creation failures during replenishment",
        ))?;
        let reservations_rejected = IntCounter::with_opts(Opts::new(
            "reservations_rejected_total",
            "Reservation requests rejected for insufficient supply",
        ))?;

        let relay_sends = IntCounter::with_opts(Opts::new(
            "relay_sends_total",
            "Transactions fanned out to leader endpoints",
        ))?;
        let relay_send_errors = IntCounter::with_opts(Opts::new(
            "relay_send_errors_total",
            "Per-endpoint socket errors during fan-out",
        ))?;
        let relay_fallback_sends = IntCounter::with_opts(Opts::new(
            "relay_fallback_sends_total",
            "Transactions submitted over the RPC fallback path",
        ))?;
        let relay_dropped_sends = IntCounter::with_opts(Opts::new(
            "relay_dropped_sends_total",
            "Sends dropped because no leader endpoint was live",
        ))?;

        let tx_created = IntCounter::with_opts(Opts::new(
            "tx_created_total",
            "Transactions created and dispatched",
        ))?;
        let tx_confirmed = IntCounter::with_opts(Opts::new(
            "tx_confirmed_total",
            "Transactions that reached strong commitment",
        ))?;
        let tx_timed_out = IntCounter::with_opts(Opts::new(
            "tx_timed_out_total",
            "Transactions dropped after their deadline",
        ))?;
        let tx_reverted = IntCounter::with_opts(Opts::new(
            "tx_reverted_total",
            "Weak-commitment sightings retracted by a fork",
        ))?;

        let fee_accounts_funded = IntGauge::with_opts(Opts::new(
            "fee_accounts_funded",
            "Fee payer accounts ready for handout",
        ))?;
        let program_accounts_funded = IntGauge::with_opts(Opts::new(
            "program_accounts_funded",
            "Program data accounts ready for handout",
        ))?;
        let relay_live_endpoints = IntGauge::with_opts(Opts::new(
            "relay_live_endpoints",
            "Leader endpoints with a live socket",
        ))?;
        let active_users = IntGauge::with_opts(Opts::new(
            "active_users",
            "Clients currently holding popped accounts",
        ))?;

        let confirmation_time = Histogram::with_opts(
            HistogramOpts::new(
                "confirmation_time_seconds",
                "Time from send to strong commitment",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 15.0, 45.0]),
        )?;
        let replenish_batch_latency = Histogram::with_opts(
            HistogramOpts::new(
                "replenish_batch_latency_seconds",
                "Time to create one replenishment batch",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        )?;

        registry.register(Box::new(accounts_created.clone()))?;
        registry.register(Box::new(accounts_popped.clone()))?;
        registry.register(Box::new(accounts_expired.clone()))?;
        registry.register(Box::new(replenish_failures.clone()))?;
        registry.register(Box::new(reservations_rejected.clone()))?;
        registry.register(Box::new(relay_sends.clone()))?;
        registry.register(Box::new(relay_send_errors.clone()))?;
        registry.register(Box::new(relay_fallback_sends.clone()))?;
        registry.register(Box::new(relay_dropped_sends.clone()))?;
        registry.register(Box::new(tx_created.clone()))?;
        registry.register(Box::new(tx_confirmed.clone()))?;
        registry.register(Box::new(tx_timed_out.clone()))?;
        registry.register(Box::new(tx_reverted.clone()))?;
        registry.register(Box::new(fee_accounts_funded.clone()))?;
        registry.register(Box::new(program_accounts_funded.clone()))?;
        registry.register(Box::new(relay_live_endpoints.clone()))?;
        registry.register(Box::new(active_users.clone()))?;
        registry.register(Box::new(confirmation_time.clone()))?;
        registry.register(Box::new(replenish_batch_latency.clone()))?;

        Ok(Self {
            registry,
            accounts_created,
            accounts_popped,
            accounts_expired,
            replenish_failures,
            reservations_rejected,
            relay_sends,
            relay_send_errors,
            relay_fallback_sends,
            relay_dropped_sends,
            tx_created,
            tx_confirmed,
            tx_timed_out,
            tx_reverted,
            fee_accounts_funded,
            program_accounts_funded,
            relay_live_endpoints,
            active_users,
            confirmation_time,
            replenish_batch_latency,
        })
    }

    /// Registry for the /metrics exporter
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_and_registers() {
        let m = Metrics::new().unwrap();
        m.tx_created.inc();
        assert_eq!(m.tx_created.get(), 1);
        assert!(!m.registry().gather().is_empty());
    }

    #[test]
    fn global_instance_is_shared() {
        let before = metrics().relay_sends.get();
        metrics().relay_sends.inc();
        assert_eq!(metrics().relay_sends.get(), before + 1);
    }
}
