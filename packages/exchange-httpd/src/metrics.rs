//! Prometheus metrics exposed at `/metrics`.

use prometheus::{IntCounterVec, Opts, Registry};

pub struct Metrics {
    /// Withdraw requests served, partitioned by outcome status code.
    pub withdrawals_total: IntCounterVec,
    /// Reserve lookups served, partitioned by outcome status code.
    pub reserve_lookups_total: IntCounterVec,
    pub registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let withdrawals_total = IntCounterVec::new(
            Opts::new(
                "exchange_withdrawals_total",
                "Total withdraw requests served, by outcome status code",
            ),
            &["status"],
        )
        .expect("constant metric name is valid");

        let reserve_lookups_total = IntCounterVec::new(
            Opts::new(
                "exchange_reserve_lookups_total",
                "Total reserve status lookups served, by outcome status code",
            ),
            &["status"],
        )
        .expect("constant metric name is valid");

        registry
            .register(Box::new(withdrawals_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(reserve_lookups_total.clone()))
            .expect("metric registration must not be called twice");

        Self {
            withdrawals_total,
            reserve_lookups_total,
            registry,
        }
    }

    pub fn record_withdraw(&self, status: u16) {
        self.withdrawals_total
            .with_label_values(&[&status.to_string()])
            .inc();
    }

    pub fn record_reserve_lookup(&self, status: u16) {
        self.reserve_lookups_total
            .with_label_values(&[&status.to_string()])
            .inc();
    }
}
