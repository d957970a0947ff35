use crate::error::{AxonError, AxonResult};
use crate::AgentId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Network topology shapes supported by the memory manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyType {
    Mesh,
    Hierarchical,
    Ring,
    Star,
    Hybrid,
}

impl std::fmt::Display for TopologyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyType::Mesh => write!(f, "mesh"),
            TopologyType::Hierarchical => write!(f, "hierarchical"),
            TopologyType::Ring => write!(f, "ring"),
            TopologyType::Star => write!(f, "star"),
            TopologyType::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Consistency level offered to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    Eventual,
    Strong,
    BoundedStaleness,
}

/// Key partitioning strategies for the shard layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardingStrategy {
    ConsistentHash,
    Range,
    Hash,
    /// Consistent hashing at the node level, range ordering within a node
    Hybrid,
}

/// Conflict resolution strategies selectable as the configured default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategyKind {
    Lww,
    Mvr,
    Semantic,
    Priority,
    Operational,
    Union,
    Intersection,
    Custom,
    Manual,
}

impl std::fmt::Display for ConflictStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConflictStrategyKind::Lww => "lww",
            ConflictStrategyKind::Mvr => "mvr",
            ConflictStrategyKind::Semantic => "semantic",
            ConflictStrategyKind::Priority => "priority",
            ConflictStrategyKind::Operational => "operational",
            ConflictStrategyKind::Union => "union",
            ConflictStrategyKind::Intersection => "intersection",
            ConflictStrategyKind::Custom => "custom",
            ConflictStrategyKind::Manual => "manual",
        };
        write!(f, "{}", name)
    }
}

/// Topology section of the node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub topology_type: TopologyType,
    /// Replicas per key, primary included (>= 1)
    pub replication_factor: usize,
    pub consistency_level: ConsistencyLevel,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            topology_type: TopologyType::Star,
            replication_factor: 3,
            consistency_level: ConsistencyLevel::Eventual,
        }
    }
}

/// Gossip section of the node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Default number of peers per propagation round
    pub fanout: usize,
    /// Period between gossip rounds
    pub gossip_interval: Duration,
    /// Period between anti-entropy sweeps
    pub sync_interval: Duration,
    /// Hop limit for propagated messages
    pub max_ttl: u32,
    /// Serialized payloads above this size are compressed before send
    pub compression_threshold: usize,
    /// Scale fanout by message priority
    pub adaptive_gossip: bool,
    /// Fraction of live nodes required for quorum, in (0, 1]
    pub min_quorum_threshold: f64,
    /// Missed-heartbeat count before a node is marked inactive
    pub failure_threshold: u32,
    /// Messages drained per worker pass
    pub batch_size: usize,
    /// Pending queue capacity = batch_size * queue_depth_factor
    pub queue_depth_factor: usize,
    /// Transport retry budget before reliability decay
    pub max_retries: u32,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            fanout: 3, // conservative fanout to avoid flooding small swarms
            gossip_interval: Duration::from_millis(100),
            sync_interval: Duration::from_secs(30),
            max_ttl: 8,
            compression_threshold: 1024,
            adaptive_gossip: true,
            min_quorum_threshold: 0.5,
            failure_threshold: 3,
            batch_size: 64,
            queue_depth_factor: 16,
            max_retries: 3,
        }
    }
}

/// Compression section of the node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Disables the compressor entirely when false
    pub enabled: bool,
    /// Dedup cache entries older than this are swept
    pub cache_max_age: Duration,
    /// Period of the background cache sweep
    pub gc_interval: Duration,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_max_age: Duration::from_secs(600),
            gc_interval: Duration::from_secs(60),
        }
    }
}

/// Sharding section of the node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    pub strategy: ShardingStrategy,
    /// Virtual nodes per physical node on the hash ring
    pub virtual_nodes: usize,
    /// Imbalance ratio (max-min)/mean that triggers rebalancing
    pub rebalance_threshold: f64,
    /// Keys moved per migration chunk
    pub migration_batch_size: usize,
    pub max_concurrent_migrations: usize,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            strategy: ShardingStrategy::ConsistentHash,
            virtual_nodes: 150, // standard ring density for even key spread
            rebalance_threshold: 0.25,
            migration_batch_size: 256,
            max_concurrent_migrations: 4,
        }
    }
}

/// Conflict-resolution section of the node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictConfig {
    pub default_strategy: ConflictStrategyKind,
    /// Denominator factor for the conflict rate
    /// (resolved / (total_syncs * ops_per_sync)); the upstream constant of
    /// 10 has no derivation, so it stays configurable.
    pub ops_per_sync: u32,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            default_strategy: ConflictStrategyKind::Lww,
            ops_per_sync: 10,
        }
    }
}

/// Vector-clock pruning policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockPruningConfig {
    /// Entries not observed within this window are eviction candidates
    pub max_age: Duration,
    /// Target entry count after a pruning pass
    pub max_size: usize,
    /// Period of the pruning task
    pub prune_interval: Duration,
    /// The N most recently seen agents are always retained
    pub keep_recent_agents: usize,
}

impl Default for ClockPruningConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(3600),
            max_size: 128,
            prune_interval: Duration::from_secs(300),
            keep_recent_agents: 16,
        }
    }
}

/// Request deadlines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Deadline for a single transport send
    pub send_timeout: Duration,
    /// Deadline for applying a received delta package
    pub delta_apply_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            delta_apply_timeout: Duration::from_secs(30),
        }
    }
}

/// Top-level node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxonConfig {
    /// Local agent identity (required)
    pub agent_id: AgentId,
    pub topology: TopologyConfig,
    pub gossip: GossipConfig,
    pub compression: CompressionConfig,
    pub sharding: ShardConfig,
    pub conflict: ConflictConfig,
    pub vector_clock: ClockPruningConfig,
    pub timeouts: TimeoutConfig,
}

impl AxonConfig {
    /// Create a configuration with defaults for the given agent
    pub fn new(agent_id: impl Into<AgentId>) -> Self {
        Self {
            agent_id: agent_id.into(),
            topology: TopologyConfig::default(),
            gossip: GossipConfig::default(),
            compression: CompressionConfig::default(),
            sharding: ShardConfig::default(),
            conflict: ConflictConfig::default(),
            vector_clock: ClockPruningConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }

    /// Validate every section, returning the first violation
    pub fn validate(&self) -> AxonResult<()> {
        if self.agent_id.is_empty() {
            return Err(AxonError::invalid_config("agent_id must not be empty"));
        }
        if self.topology.replication_factor == 0 {
            return Err(AxonError::invalid_config(
                "topology.replication_factor must be >= 1",
            ));
        }
        if self.gossip.fanout == 0 {
            return Err(AxonError::invalid_config("gossip.fanout must be >= 1"));
        }
        if self.gossip.max_ttl == 0 {
            return Err(AxonError::invalid_config("gossip.max_ttl must be >= 1"));
        }
        let q = self.gossip.min_quorum_threshold;
        if !(q > 0.0 && q <= 1.0) {
            return Err(AxonError::invalid_config(format!(
                "gossip.min_quorum_threshold must be in (0, 1], got {}",
                q
            )));
        }
        if self.gossip.batch_size == 0 || self.gossip.queue_depth_factor == 0 {
            return Err(AxonError::invalid_config(
                "gossip.batch_size and gossip.queue_depth_factor must be >= 1",
            ));
        }
        if self.sharding.virtual_nodes == 0 {
            return Err(AxonError::invalid_config(
                "sharding.virtual_nodes must be >= 1",
            ));
        }
        if self.sharding.rebalance_threshold <= 0.0 {
            return Err(AxonError::invalid_config(
                "sharding.rebalance_threshold must be > 0",
            ));
        }
        if self.sharding.migration_batch_size == 0 {
            return Err(AxonError::invalid_config(
                "sharding.migration_batch_size must be >= 1",
            ));
        }
        if self.conflict.ops_per_sync == 0 {
            return Err(AxonError::invalid_config(
                "conflict.ops_per_sync must be >= 1",
            ));
        }
        if self.vector_clock.max_size == 0 {
            return Err(AxonError::invalid_config(
                "vector_clock.max_size must be >= 1",
            ));
        }
        Ok(())
    }

    /// Pending gossip queue capacity derived from the gossip section
    pub fn gossip_queue_capacity(&self) -> usize {
        self.gossip.batch_size * self.gossip.queue_depth_factor
    }
}
