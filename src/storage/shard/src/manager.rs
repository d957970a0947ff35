use crate::{HashRing, MigrationReason, MigrationTask, Shard, ShardId, ShardStatus};
use axon_core::{AgentId, AxonError, AxonResult, ShardConfig, ShardingStrategy};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Immutable shard-map snapshot
///
/// Readers hold an `Arc` to a published version; every mutation builds the
/// next version and swaps it in, so lookups never block behind writers.
#[derive(Debug, Clone)]
pub struct ShardMap {
    pub version: u64,
    pub shards: BTreeMap<ShardId, Shard>,
}

impl ShardMap {
    fn empty() -> Self {
        Self {
            version: 0,
            shards: BTreeMap::new(),
        }
    }

    /// Serving shard for a hash position (active, or mid-split parent)
    pub fn locate(&self, position: u64) -> Option<&Shard> {
        self.shards.values().find(|shard| {
            shard.contains(position)
                && matches!(
                    shard.status,
                    ShardStatus::Active | ShardStatus::Splitting | ShardStatus::Merging
                )
        })
    }

    pub fn active(&self) -> impl Iterator<Item = &Shard> {
        self.shards.values().filter(|s| s.is_active())
    }

    /// Active intervals partition the hash space: full cover, no overlap
    pub fn partition_holds(&self) -> bool {
        let mut intervals: Vec<(u64, u64)> =
            self.active().map(|s| (s.start, s.end)).collect();
        if intervals.is_empty() {
            return false;
        }
        intervals.sort();
        if intervals[0].0 != 0 {
            return false;
        }
        for window in intervals.windows(2) {
            let (_, prev_end) = window[0];
            let (next_start, _) = window[1];
            if prev_end == u64::MAX || prev_end + 1 != next_start {
                return false;
            }
        }
        intervals.last().map(|(_, end)| *end) == Some(u64::MAX)
    }
}

/// Bookkeeping for an in-flight split
#[derive(Debug, Clone)]
struct SplitPlan {
    parent: ShardId,
    left: ShardId,
    right: ShardId,
}

/// Outcome of `split_shard`
#[derive(Debug, Clone)]
pub struct SplitOutcome {
    pub left: ShardId,
    pub right: ShardId,
    pub migration_id: Uuid,
}

/// Shard placement, splitting, merging, and rebalancing
pub struct ShardManager {
    config: ShardConfig,
    replication_factor: usize,
    ring: HashRing,
    map: Arc<ShardMap>,
    migrations: HashMap<Uuid, MigrationTask>,
    splits: HashMap<Uuid, SplitPlan>,
}

impl ShardManager {
    pub fn new(config: ShardConfig, replication_factor: usize) -> Self {
        let ring = HashRing::new(config.virtual_nodes);
        Self {
            config,
            replication_factor: replication_factor.max(1),
            ring,
            map: Arc::new(ShardMap::empty()),
            migrations: HashMap::new(),
            splits: HashMap::new(),
        }
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    pub fn snapshot(&self) -> Arc<ShardMap> {
        Arc::clone(&self.map)
    }

    pub fn migration(&self, id: Uuid) -> Option<&MigrationTask> {
        self.migrations.get(&id)
    }

    pub fn migrations(&self) -> impl Iterator<Item = &MigrationTask> {
        self.migrations.values()
    }

    fn running_migrations(&self) -> usize {
        self.migrations
            .values()
            .filter(|m| !m.is_terminal())
            .count()
    }

    fn publish<F>(&mut self, mutate: F)
    where
        F: FnOnce(&mut BTreeMap<ShardId, Shard>),
    {
        let mut shards = self.map.shards.clone();
        mutate(&mut shards);
        self.map = Arc::new(ShardMap {
            version: self.map.version + 1,
            shards,
        });
    }

    fn replicas_excluding_primary(&self, start: u64, primary: &AgentId) -> Vec<AgentId> {
        self.ring
            .replicas_at(start, self.replication_factor)
            .into_iter()
            .filter(|node| node != primary)
            .collect()
    }

    /// Owner of a hash position under the configured placement strategy
    ///
    /// Consistent-hash and hybrid walk the virtual-node ring (hybrid keeps
    /// range ordering within a node through the shard intervals themselves);
    /// `range` carves the hash space into equal per-node bands; `hash`
    /// picks by modulo over the sorted membership.
    pub fn owner_of(&self, position: u64) -> Option<AgentId> {
        let nodes: Vec<&AgentId> = self.ring.nodes().collect();
        if nodes.is_empty() {
            return None;
        }
        match self.config.strategy {
            ShardingStrategy::ConsistentHash | ShardingStrategy::Hybrid => {
                self.ring.owner_of(position).cloned()
            }
            ShardingStrategy::Range => {
                let band = u64::MAX / nodes.len() as u64;
                let idx = ((position / band.max(1)) as usize).min(nodes.len() - 1);
                Some(nodes[idx].clone())
            }
            ShardingStrategy::Hash => {
                let idx = (position % nodes.len() as u64) as usize;
                Some(nodes[idx].clone())
            }
        }
    }

    /// Create the initial shard covering the entire hash space
    pub fn init_full_range(&mut self) -> AxonResult<ShardId> {
        if self.ring.is_empty() {
            return Err(AxonError::internal("cannot create shard on an empty ring"));
        }
        let primary = self
            .owner_of(0)
            .ok_or_else(|| AxonError::internal("ring has no positions"))?;
        let replicas = self.replicas_excluding_primary(0, &primary);
        let shard = Shard::new(0, u64::MAX, primary, replicas);
        let id = shard.id;
        self.publish(|shards| {
            shards.insert(id, shard);
        });
        info!(shard = %id, "created full-range shard");
        Ok(id)
    }

    /// Create a shard for an explicit interval
    pub fn create_shard(&mut self, start: u64, end: u64) -> AxonResult<ShardId> {
        if start > end {
            return Err(AxonError::internal("shard interval start > end"));
        }
        let primary = self
            .owner_of(start)
            .ok_or_else(|| AxonError::internal("ring has no positions"))?;
        let replicas = self.replicas_excluding_primary(start, &primary);
        let shard = Shard::new(start, end, primary, replicas);
        let id = shard.id;
        self.publish(|shards| {
            shards.insert(id, shard);
        });
        Ok(id)
    }

    /// Serving shard for a key
    pub fn locate(&self, position: u64) -> AxonResult<Shard> {
        self.map
            .locate(position)
            .cloned()
            .ok_or_else(|| AxonError::ShardMissing {
                shard_id: format!("position {:#018x}", position),
            })
    }

    /// Account one written key against its shard
    pub fn record_write(&mut self, position: u64, bytes: u64) -> AxonResult<()> {
        let id = self
            .map
            .locate(position)
            .map(|s| s.id)
            .ok_or_else(|| AxonError::ShardMissing {
                shard_id: format!("position {:#018x}", position),
            })?;
        self.publish(|shards| {
            if let Some(shard) = shards.get_mut(&id) {
                shard.key_count += 1;
                shard.size_bytes += bytes;
                shard.touch();
            }
        });
        Ok(())
    }

    pub fn record_delete(&mut self, position: u64, bytes: u64) -> AxonResult<()> {
        let id = self
            .map
            .locate(position)
            .map(|s| s.id)
            .ok_or_else(|| AxonError::ShardMissing {
                shard_id: format!("position {:#018x}", position),
            })?;
        self.publish(|shards| {
            if let Some(shard) = shards.get_mut(&id) {
                shard.key_count = shard.key_count.saturating_sub(1);
                shard.size_bytes = shard.size_bytes.saturating_sub(bytes);
                shard.touch();
            }
        });
        Ok(())
    }

    /// Add a node to the ring, migrating shards whose ownership moves
    pub fn add_node(&mut self, node: AgentId) -> Vec<Uuid> {
        self.ring.add_node(node.clone());
        debug!(%node, nodes = self.ring.node_count(), "node joined ring");
        self.reassign_ownership(MigrationReason::NodeJoin)
    }

    /// Remove a node; its key ranges pass to the next clockwise owners
    pub fn remove_node(&mut self, node: &AgentId) -> Vec<Uuid> {
        self.ring.remove_node(node);
        debug!(%node, nodes = self.ring.node_count(), "node left ring");
        self.reassign_ownership(MigrationReason::NodeRemoval)
    }

    fn reassign_ownership(&mut self, reason: MigrationReason) -> Vec<Uuid> {
        if self.ring.is_empty() {
            return Vec::new();
        }
        let snapshot = self.snapshot();
        let mut created = Vec::new();
        let mut updates: Vec<(ShardId, AgentId, Vec<AgentId>, bool)> = Vec::new();

        for shard in snapshot.shards.values() {
            if !shard.is_active() {
                continue;
            }
            let Some(desired_primary) = self.owner_of(shard.start) else {
                continue;
            };
            let replicas = self.replicas_excluding_primary(shard.start, &desired_primary);
            let moved = desired_primary != shard.primary;
            if moved && self.ring.contains(&shard.primary) {
                // Data still lives on the old primary; enqueue a transfer
                let task = MigrationTask::new(
                    shard.id,
                    shard.primary.clone(),
                    desired_primary.clone(),
                    reason,
                    shard.size_bytes,
                    shard.key_count,
                );
                created.push(task.id);
                self.migrations.insert(task.id, task);
                updates.push((shard.id, shard.primary.clone(), replicas, true));
            } else {
                // Old primary gone (or unchanged): adopt the ring's answer
                updates.push((shard.id, desired_primary, replicas, false));
            }
        }

        self.publish(|shards| {
            for (id, primary, replicas, migrating) in updates {
                if let Some(shard) = shards.get_mut(&id) {
                    shard.primary = primary;
                    shard.replicas = replicas;
                    if migrating {
                        shard.status = ShardStatus::Migrating;
                    }
                    shard.touch();
                }
            }
        });
        created
    }

    /// Split a shard at `split_point`: `[start, split)` and `[split, end]`
    pub fn split_shard(&mut self, id: ShardId, split_point: u64) -> AxonResult<SplitOutcome> {
        let shard = self
            .map
            .shards
            .get(&id)
            .cloned()
            .ok_or_else(|| AxonError::ShardMissing {
                shard_id: id.to_string(),
            })?;
        if shard.status != ShardStatus::Active {
            return Err(AxonError::internal(format!(
                "shard {} is {:?}, not splittable",
                id, shard.status
            )));
        }
        if split_point <= shard.start || split_point > shard.end {
            return Err(AxonError::internal(format!(
                "split point {:#x} outside ({:#x}, {:#x}]",
                split_point, shard.start, shard.end
            )));
        }

        let right_primary = self
            .owner_of(split_point)
            .unwrap_or_else(|| shard.primary.clone());

        let mut left = Shard::new(
            shard.start,
            split_point - 1,
            shard.primary.clone(),
            self.replicas_excluding_primary(shard.start, &shard.primary),
        );
        let mut right = Shard::new(
            split_point,
            shard.end,
            right_primary.clone(),
            self.replicas_excluding_primary(split_point, &right_primary),
        );
        // Children serve no traffic until the split completes
        left.status = ShardStatus::Migrating;
        right.status = ShardStatus::Migrating;
        // Until per-key accounting catches up, assume an even split
        left.key_count = shard.key_count / 2;
        left.size_bytes = shard.size_bytes / 2;
        right.key_count = shard.key_count - left.key_count;
        right.size_bytes = shard.size_bytes - left.size_bytes;

        let task = MigrationTask::new(
            shard.id,
            shard.primary.clone(),
            right_primary,
            MigrationReason::Split,
            right.size_bytes,
            right.key_count,
        );
        let outcome = SplitOutcome {
            left: left.id,
            right: right.id,
            migration_id: task.id,
        };
        self.splits.insert(
            task.id,
            SplitPlan {
                parent: id,
                left: left.id,
                right: right.id,
            },
        );
        self.migrations.insert(task.id, task);

        self.publish(|shards| {
            if let Some(parent) = shards.get_mut(&id) {
                parent.status = ShardStatus::Splitting;
                parent.touch();
            }
            shards.insert(left.id, left);
            shards.insert(right.id, right);
        });
        info!(parent = %id, split = format_args!("{:#x}", split_point), "shard split started");
        Ok(outcome)
    }

    /// Merge two adjacent shards on the same primary; the left absorbs
    pub fn merge_shards(&mut self, left_id: ShardId, right_id: ShardId) -> AxonResult<ShardId> {
        let left = self
            .map
            .shards
            .get(&left_id)
            .cloned()
            .ok_or_else(|| AxonError::ShardMissing {
                shard_id: left_id.to_string(),
            })?;
        let right = self
            .map
            .shards
            .get(&right_id)
            .cloned()
            .ok_or_else(|| AxonError::ShardMissing {
                shard_id: right_id.to_string(),
            })?;

        if !left.is_active() || !right.is_active() {
            return Err(AxonError::internal("only active shards can merge"));
        }
        if !left.is_left_neighbor_of(&right) {
            return Err(AxonError::internal(format!(
                "shards {} and {} are not adjacent",
                left_id, right_id
            )));
        }
        if left.primary != right.primary {
            return Err(AxonError::internal(
                "merge requires both shards on the same primary",
            ));
        }

        // Same primary holds both ranges, so absorption is metadata-only
        self.publish(|shards| {
            if let Some(absorber) = shards.get_mut(&left_id) {
                absorber.end = right.end;
                absorber.key_count += right.key_count;
                absorber.size_bytes += right.size_bytes;
                absorber.touch();
            }
            shards.remove(&right_id);
        });
        info!(absorber = %left_id, absorbed = %right_id, "shards merged");
        Ok(left_id)
    }

    /// Imbalance across nodes: (max − min) / mean of per-node load
    pub fn imbalance_ratio(&self) -> f64 {
        let mut load: HashMap<&AgentId, u64> = HashMap::new();
        for node in self.ring.nodes() {
            load.insert(node, 0);
        }
        let mut use_keys = true;
        for shard in self.map.active() {
            if shard.size_bytes > 0 {
                use_keys = false;
            }
        }
        for shard in self.map.active() {
            let weight = if use_keys {
                shard.key_count
            } else {
                shard.size_bytes
            };
            *load.entry(&shard.primary).or_insert(0) += weight;
        }
        if load.len() < 2 {
            return 0.0;
        }
        let max = *load.values().max().unwrap_or(&0) as f64;
        let min = *load.values().min().unwrap_or(&0) as f64;
        let mean = load.values().sum::<u64>() as f64 / load.len() as f64;
        if mean == 0.0 {
            0.0
        } else {
            (max - min) / mean
        }
    }

    /// Plan shard moves when imbalance exceeds the configured threshold
    pub fn rebalance(&mut self) -> Vec<Uuid> {
        let ratio = self.imbalance_ratio();
        if ratio <= self.config.rebalance_threshold {
            return Vec::new();
        }
        let budget = self
            .config
            .max_concurrent_migrations
            .saturating_sub(self.running_migrations());
        if budget == 0 {
            warn!("rebalance deferred: migration budget exhausted");
            return Vec::new();
        }

        let mut load: HashMap<AgentId, u64> = HashMap::new();
        for node in self.ring.nodes() {
            load.insert(node.clone(), 0);
        }
        for shard in self.map.active() {
            *load.entry(shard.primary.clone()).or_insert(0) += shard.size_bytes.max(shard.key_count);
        }
        let Some(most_loaded) = load.iter().max_by_key(|(_, v)| **v).map(|(k, _)| k.clone())
        else {
            return Vec::new();
        };
        let Some(least_loaded) = load.iter().min_by_key(|(_, v)| **v).map(|(k, _)| k.clone())
        else {
            return Vec::new();
        };
        if most_loaded == least_loaded {
            return Vec::new();
        }

        // Move smallest shards first: cheap transfers, fine-grained control
        let mut candidates: Vec<Shard> = self
            .map
            .active()
            .filter(|s| s.primary == most_loaded)
            .cloned()
            .collect();
        candidates.sort_by_key(|s| s.size_bytes.max(s.key_count));

        let mean = load.values().sum::<u64>() as f64 / load.len() as f64;
        let mut source_load = load[&most_loaded] as f64;

        let mut created = Vec::new();
        let mut marked = Vec::new();
        for shard in candidates.into_iter().take(budget) {
            // Stop once the overloaded node is back at the mean
            if source_load <= mean {
                break;
            }
            source_load -= shard.size_bytes.max(shard.key_count) as f64;
            let task = MigrationTask::new(
                shard.id,
                most_loaded.clone(),
                least_loaded.clone(),
                MigrationReason::Rebalance,
                shard.size_bytes,
                shard.key_count,
            );
            debug!(
                shard = %shard.id,
                from = %most_loaded,
                to = %least_loaded,
                batch = self.config.migration_batch_size,
                "rebalance migration planned"
            );
            created.push(task.id);
            marked.push(shard.id);
            self.migrations.insert(task.id, task);
        }
        self.publish(|shards| {
            for id in marked {
                if let Some(shard) = shards.get_mut(&id) {
                    shard.status = ShardStatus::Migrating;
                    shard.touch();
                }
            }
        });
        created
    }

    pub fn start_migration(&mut self, id: Uuid) -> AxonResult<()> {
        self.with_migration(id, |m| m.start())
    }

    pub fn tick_migration(&mut self, id: Uuid, bytes: u64, keys: u64) -> AxonResult<()> {
        self.with_migration(id, |m| m.tick(bytes, keys))
    }

    /// Finish a migration and publish the resulting ownership change
    pub fn complete_migration(&mut self, id: Uuid) -> AxonResult<()> {
        self.with_migration(id, |m| m.complete())?;
        let task = self.migrations[&id].clone();

        if let Some(plan) = self.splits.remove(&id) {
            // Split completion: parent retires, children go live
            self.publish(|shards| {
                shards.remove(&plan.parent);
                for child in [plan.left, plan.right] {
                    if let Some(shard) = shards.get_mut(&child) {
                        shard.status = ShardStatus::Active;
                        shard.touch();
                    }
                }
            });
            info!(parent = %plan.parent, "shard split completed");
            return Ok(());
        }

        let target = task.target.clone();
        let replication_factor = self.replication_factor;
        let ring = self.ring.clone();
        self.publish(|shards| {
            if let Some(shard) = shards.get_mut(&task.shard_id) {
                shard.primary = target.clone();
                shard.replicas = ring
                    .replicas_at(shard.start, replication_factor)
                    .into_iter()
                    .filter(|node| node != &target)
                    .collect();
                shard.status = ShardStatus::Active;
                shard.touch();
            }
        });
        Ok(())
    }

    /// Fail a migration: source shard stays authoritative, partial target
    /// state is discarded
    pub fn fail_migration(&mut self, id: Uuid, reason: impl Into<String>) -> AxonResult<()> {
        let reason = reason.into();
        self.with_migration(id, |m| m.fail(reason.clone()))?;

        if let Some(plan) = self.splits.remove(&id) {
            self.publish(|shards| {
                shards.remove(&plan.left);
                shards.remove(&plan.right);
                if let Some(parent) = shards.get_mut(&plan.parent) {
                    parent.status = ShardStatus::Active;
                    parent.touch();
                }
            });
            return Ok(());
        }

        let shard_id = self.migrations[&id].shard_id;
        self.publish(|shards| {
            if let Some(shard) = shards.get_mut(&shard_id) {
                shard.status = ShardStatus::Active;
                shard.touch();
            }
        });
        Ok(())
    }

    /// Cancel a migration; equivalent to failure for shard state
    pub fn cancel_migration(&mut self, id: Uuid) -> AxonResult<()> {
        self.with_migration(id, |m| m.cancel())?;
        if let Some(plan) = self.splits.remove(&id) {
            self.publish(|shards| {
                shards.remove(&plan.left);
                shards.remove(&plan.right);
                if let Some(parent) = shards.get_mut(&plan.parent) {
                    parent.status = ShardStatus::Active;
                    parent.touch();
                }
            });
            return Ok(());
        }
        let shard_id = self.migrations[&id].shard_id;
        self.publish(|shards| {
            if let Some(shard) = shards.get_mut(&shard_id) {
                if shard.status == ShardStatus::Migrating {
                    shard.status = ShardStatus::Active;
                    shard.touch();
                }
            }
        });
        Ok(())
    }

    fn with_migration<F>(&mut self, id: Uuid, f: F) -> AxonResult<()>
    where
        F: FnOnce(&mut MigrationTask) -> AxonResult<()>,
    {
        let task = self
            .migrations
            .get_mut(&id)
            .ok_or_else(|| AxonError::MigrationFailed {
                migration_id: id.to_string(),
                reason: "unknown migration".to_string(),
            })?;
        f(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_key;

    fn agent(s: &str) -> AgentId {
        AgentId::new(s)
    }

    fn manager_with(nodes: &[&str]) -> ShardManager {
        let mut manager = ShardManager::new(ShardConfig::default(), 2);
        for node in nodes {
            manager.add_node(agent(node));
        }
        manager
    }

    #[test]
    fn test_full_range_shard_partitions_space() {
        let mut manager = manager_with(&["a1"]);
        manager.init_full_range().unwrap();
        assert!(manager.snapshot().partition_holds());
        assert!(manager.locate(hash_key("any:key")).is_ok());
    }

    #[test]
    fn test_locate_on_empty_map_is_shard_missing() {
        let manager = manager_with(&["a1"]);
        assert!(matches!(
            manager.locate(42),
            Err(AxonError::ShardMissing { .. })
        ));
    }

    #[test]
    fn test_split_preserves_partition() {
        let mut manager = manager_with(&["a1"]);
        let parent = manager.init_full_range().unwrap();

        let outcome = manager.split_shard(parent, 1 << 63).unwrap();
        // Mid-split, the parent still serves
        assert!(manager.locate(0).is_ok());
        assert!(manager.locate(u64::MAX).is_ok());

        manager.start_migration(outcome.migration_id).unwrap();
        manager.tick_migration(outcome.migration_id, 0, 0).unwrap();
        manager.complete_migration(outcome.migration_id).unwrap();

        let snapshot = manager.snapshot();
        assert!(snapshot.partition_holds());
        assert_eq!(snapshot.active().count(), 2);
        assert!(snapshot.shards.get(&parent).is_none());

        let left = snapshot.shards.get(&outcome.left).unwrap();
        let right = snapshot.shards.get(&outcome.right).unwrap();
        assert_eq!(left.start, 0);
        assert_eq!(left.end, (1 << 63) - 1);
        assert_eq!(right.start, 1 << 63);
        assert_eq!(right.end, u64::MAX);
    }

    #[test]
    fn test_split_failure_restores_parent() {
        let mut manager = manager_with(&["a1"]);
        let parent = manager.init_full_range().unwrap();
        let outcome = manager.split_shard(parent, 1 << 62).unwrap();

        manager.start_migration(outcome.migration_id).unwrap();
        manager
            .fail_migration(outcome.migration_id, "simulated transfer failure")
            .unwrap();

        let snapshot = manager.snapshot();
        let parent_shard = snapshot.shards.get(&parent).unwrap();
        assert_eq!(parent_shard.status, ShardStatus::Active);
        assert!(snapshot.shards.get(&outcome.left).is_none());
        assert!(snapshot.shards.get(&outcome.right).is_none());
        assert!(snapshot.partition_holds());
    }

    #[test]
    fn test_merge_adjacent_same_primary() {
        let mut manager = manager_with(&["a1"]);
        let parent = manager.init_full_range().unwrap();
        let outcome = manager.split_shard(parent, 1 << 63).unwrap();
        manager.start_migration(outcome.migration_id).unwrap();
        manager.complete_migration(outcome.migration_id).unwrap();

        // Force both children onto one primary for the merge precondition
        let (left_id, right_id) = (outcome.left, outcome.right);
        let primary = manager.snapshot().shards[&left_id].primary.clone();
        manager.publish(|shards| {
            if let Some(right) = shards.get_mut(&right_id) {
                right.primary = primary.clone();
            }
        });

        let merged = manager.merge_shards(left_id, right_id).unwrap();
        let snapshot = manager.snapshot();
        assert_eq!(merged, left_id);
        assert!(snapshot.shards.get(&right_id).is_none());
        assert!(snapshot.partition_holds());
        assert_eq!(snapshot.active().count(), 1);
    }

    #[test]
    fn test_merge_rejects_non_adjacent() {
        let mut manager = manager_with(&["a1"]);
        let parent = manager.init_full_range().unwrap();
        let first = manager.split_shard(parent, 1 << 62).unwrap();
        manager.start_migration(first.migration_id).unwrap();
        manager.complete_migration(first.migration_id).unwrap();
        let second = manager.split_shard(first.right, 1 << 63).unwrap();
        manager.start_migration(second.migration_id).unwrap();
        manager.complete_migration(second.migration_id).unwrap();

        // left of first and right of second are separated by second.left
        assert!(manager.merge_shards(first.left, second.right).is_err());
    }

    #[test]
    fn test_rebalance_emits_bounded_plan() {
        let mut manager = manager_with(&["a1", "a2"]);
        // Hand-build an imbalanced map: all load on one node
        let heavy = agent("a1");
        manager.publish(|shards| {
            for i in 0..4u64 {
                let start = i << 62;
                let end = if i == 3 { u64::MAX } else { ((i + 1) << 62) - 1 };
                let mut shard = Shard::new(start, end, heavy.clone(), vec![]);
                shard.size_bytes = 1000;
                shard.key_count = 100;
                shards.insert(shard.id, shard);
            }
        });

        assert!(manager.imbalance_ratio() > manager.config.rebalance_threshold);
        let plan = manager.rebalance();
        assert!(!plan.is_empty());
        assert!(plan.len() <= manager.config.max_concurrent_migrations);

        for id in &plan {
            manager.start_migration(*id).unwrap();
            manager.complete_migration(*id).unwrap();
        }
        // With four equal shards, moving half equalizes the loads
        assert!(manager.imbalance_ratio() <= manager.config.rebalance_threshold);
    }

    #[test]
    fn test_node_removal_reassigns_clockwise() {
        let mut manager = manager_with(&["a1", "a2", "a3"]);
        manager.init_full_range().unwrap();

        manager.remove_node(&agent("a2"));
        let snapshot = manager.snapshot();
        for shard in snapshot.shards.values() {
            assert_ne!(shard.primary, agent("a2"));
            assert!(!shard.replicas.contains(&agent("a2")));
        }
    }
}
