use serde::{Deserialize, Serialize};

/// Running min/max/avg for a latency series
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min_ms: f64,
    pub max_ms: f64,
    sum_ms: f64,
    count: u64,
}

impl LatencyStats {
    pub fn record(&mut self, ms: f64) {
        if self.count == 0 || ms < self.min_ms {
            self.min_ms = ms;
        }
        if ms > self.max_ms {
            self.max_ms = ms;
        }
        self.sum_ms += ms;
        self.count += 1;
    }

    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ms / self.count as f64
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Node-level metrics surfaced to the application and the metrics sink
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerMetrics {
    pub total_memory_usage: u64,
    pub replicated_memory_usage: u64,
    /// Saved fraction reported by the compressor
    pub compression_savings: f64,
    pub sync_latency: LatencyStats,
    /// existing connections / possible connections
    pub topology_efficiency: f64,
    /// 1 − stdev/mean of per-shard load
    pub partition_balance: f64,
    pub conflict_rate: f64,
    pub reads: u64,
    pub writes: u64,
    pub syncs: u64,
    pub failed_syncs: u64,
}

impl ManagerMetrics {
    /// Drop everything that is not a durable gauge
    ///
    /// Memory usage survives (it reflects live state); counters, rates, and
    /// latency series restart.
    pub fn reset_non_persistent(&mut self) {
        self.sync_latency = LatencyStats::default();
        self.conflict_rate = 0.0;
        self.compression_savings = 0.0;
        self.reads = 0;
        self.writes = 0;
        self.syncs = 0;
        self.failed_syncs = 0;
    }
}

/// 1 − stdev/mean over shard loads; 1.0 means perfectly balanced
pub fn partition_balance(loads: &[u64]) -> f64 {
    if loads.is_empty() {
        return 1.0;
    }
    let mean = loads.iter().sum::<u64>() as f64 / loads.len() as f64;
    if mean == 0.0 {
        return 1.0;
    }
    let variance = loads
        .iter()
        .map(|&l| {
            let d = l as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / loads.len() as f64;
    (1.0 - variance.sqrt() / mean).max(0.0)
}
