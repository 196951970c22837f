// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - METRICS MODULE
//
// Prometheus-compatible metrics for the staking ledger and block assembly.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use skc_ledger::LedgerState;

use crate::mempool::MempoolStats;

pub struct StakingMetrics {
    registry: Registry,

    // Chain metrics
    pub tip_height: IntGauge,
    pub blocks_connected_total: IntCounter,
    pub blocks_disconnected_total: IntCounter,
    pub reorgs_total: IntCounter,
    pub block_connect_duration_seconds: Histogram,

    // Ledger metrics
    pub staking_pool_balance: IntGauge,
    pub active_stakes: IntGauge,
    pub total_staked: IntGauge,
    pub consistency_faults_total: IntCounter,

    // Mempool metrics
    pub mempool_size: IntGauge,
    pub free_tx_mempool_bytes: IntGauge,
    pub tx_rejections_total: IntCounter,
    pub free_tx_rejections_total: IntCounter,
}

fn int_gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let gauge = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn int_counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl StakingMetrics {
    pub fn new() -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let registry = Registry::new();

        let tip_height = int_gauge(&registry, "skc_tip_height", "Height of the connected tip")?;
        let blocks_connected_total = int_counter(
            &registry,
            "skc_blocks_connected_total",
            "Blocks connected to the ledger",
        )?;
        let blocks_disconnected_total = int_counter(
            &registry,
            "skc_blocks_disconnected_total",
            "Blocks disconnected from the ledger",
        )?;
        let reorgs_total = int_counter(&registry, "skc_reorgs_total", "Best-chain switches")?;

        let block_connect_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "skc_block_connect_duration_seconds",
                "Ledger block connect latency",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        )?;
        registry.register(Box::new(block_connect_duration_seconds.clone()))?;

        let staking_pool_balance = int_gauge(
            &registry,
            "skc_staking_pool_balance",
            "Staking pool balance in minor units",
        )?;
        let active_stakes = int_gauge(&registry, "skc_active_stakes", "Stakes currently active")?;
        let total_staked = int_gauge(
            &registry,
            "skc_total_staked",
            "Amount locked in active stakes, minor units",
        )?;
        let consistency_faults_total = int_counter(
            &registry,
            "skc_consistency_faults_total",
            "Ledger consistency faults (coordinator halted)",
        )?;

        let mempool_size = int_gauge(&registry, "skc_mempool_size", "Transactions in the mempool")?;
        let free_tx_mempool_bytes = int_gauge(
            &registry,
            "skc_free_tx_mempool_bytes",
            "Bytes of free transactions waiting in the mempool",
        )?;
        let tx_rejections_total = int_counter(
            &registry,
            "skc_tx_rejections_total",
            "Transactions rejected at admission",
        )?;
        let free_tx_rejections_total = int_counter(
            &registry,
            "skc_free_tx_rejections_total",
            "Zero-fee transactions rejected by the quota check",
        )?;

        Ok(Arc::new(Self {
            registry,
            tip_height,
            blocks_connected_total,
            blocks_disconnected_total,
            reorgs_total,
            block_connect_duration_seconds,
            staking_pool_balance,
            active_stakes,
            total_staked,
            consistency_faults_total,
            mempool_size,
            free_tx_mempool_bytes,
            tx_rejections_total,
            free_tx_rejections_total,
        }))
    }

    /// Export all metrics in Prometheus text format
    pub fn export(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn update_ledger_metrics(&self, state: &LedgerState) {
        let summary = state.staking_summary();
        self.tip_height
            .set(state.tip_height.map_or(-1, |h| h.min(i64::MAX as u64) as i64));
        self.staking_pool_balance
            .set(summary.staking_pool.min(i64::MAX as u64) as i64);
        self.active_stakes
            .set(state.stakes.count_by_state(skc_ledger::StakeState::Active) as i64);
        self.total_staked
            .set(summary.total_staked.min(i64::MAX as u64) as i64);
    }

    pub fn update_mempool_metrics(&self, stats: &MempoolStats) {
        self.mempool_size.set(stats.size as i64);
        self.free_tx_mempool_bytes
            .set(stats.free_bytes.min(i64::MAX as u64) as i64);
    }
}
