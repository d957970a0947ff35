use crate::Crdt;
use axon_core::{AgentId, AxonError, AxonResult, ClockPruningConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Vector clock for tracking causality across the swarm
///
/// Each agent keeps a counter per known agent; the owner's counter advances
/// strictly monotonically on every local event. Comparing two clocks yields
/// a partial order: one happened before the other, they are equal, or the
/// underlying events were concurrent.
///
/// Beyond the counters, each clock carries its owner, a monotonic version
/// (bumped on every mutation), the wall time of the last mutation, and a
/// per-entry last-observed wall time driving the pruning policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorClock {
    owner: AgentId,
    entries: BTreeMap<AgentId, u64>,
    /// Wall time each entry was last observed locally; pruning input only,
    /// deliberately excluded from equality-sensitive comparisons
    seen_at: BTreeMap<AgentId, DateTime<Utc>>,
    version: u64,
    updated_at: DateTime<Utc>,
}

/// Outcome of comparing two vector clocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockOrdering {
    /// Self causally precedes other
    Before,
    /// Self causally follows other
    After,
    /// Identical counters
    Equal,
    /// Neither precedes the other
    Concurrent,
}

/// Single-entry difference used for compact synchronization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockDelta {
    pub agent: AgentId,
    pub counter: u64,
}

impl VectorClock {
    /// Create a clock owned by the given agent
    pub fn new(owner: AgentId) -> Self {
        let now = Utc::now();
        let mut entries = BTreeMap::new();
        entries.insert(owner.clone(), 0);
        let mut seen_at = BTreeMap::new();
        seen_at.insert(owner.clone(), now);
        Self {
            owner,
            entries,
            seen_at,
            version: 0,
            updated_at: now,
        }
    }

    pub fn owner(&self) -> &AgentId {
        &self.owner
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Counter for an agent; absent (or pruned) entries read as zero
    pub fn get(&self, agent: &AgentId) -> u64 {
        self.entries.get(agent).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentId> {
        self.entries.keys()
    }

    pub fn entries(&self) -> &BTreeMap<AgentId, u64> {
        &self.entries
    }

    fn touch(&mut self, agent: &AgentId, now: DateTime<Utc>) {
        self.seen_at.insert(agent.clone(), now);
        self.version += 1;
        self.updated_at = now;
    }

    /// Record a local event: bump the owner counter
    pub fn increment(&mut self) -> u64 {
        let now = Utc::now();
        let counter = self.entries.entry(self.owner.clone()).or_insert(0);
        *counter += 1;
        let value = *counter;
        let owner = self.owner.clone();
        self.touch(&owner, now);
        value
    }

    /// Observe a counter for an agent, keeping the pointwise maximum
    pub fn update(&mut self, agent: &AgentId, counter: u64) {
        let now = Utc::now();
        let current = self.entries.entry(agent.clone()).or_insert(0);
        *current = (*current).max(counter);
        self.touch(agent, now);
    }

    /// Merge another clock: pointwise maximum over the union of agents
    pub fn merge(&mut self, other: &VectorClock) {
        let now = Utc::now();
        for (agent, &counter) in &other.entries {
            let current = self.entries.entry(agent.clone()).or_insert(0);
            *current = (*current).max(counter);
            self.seen_at.insert(agent.clone(), now);
        }
        self.version += 1;
        self.updated_at = now;
    }

    /// Compare with another clock over the union of known agents
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut self_lt = false;
        let mut self_gt = false;

        for agent in self.entries.keys().chain(other.entries.keys()) {
            let a = self.get(agent);
            let b = other.get(agent);
            if a < b {
                self_lt = true;
            } else if a > b {
                self_gt = true;
            }
            if self_lt && self_gt {
                return ClockOrdering::Concurrent;
            }
        }

        match (self_lt, self_gt) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// Whether this clock is >= the other (After or Equal)
    pub fn dominates(&self, other: &VectorClock) -> bool {
        matches!(
            self.compare(other),
            ClockOrdering::After | ClockOrdering::Equal
        )
    }

    /// Whether neither clock dominates the other
    pub fn concurrent_with(&self, other: &VectorClock) -> bool {
        self.compare(other) == ClockOrdering::Concurrent
    }

    /// Entries where self is ahead of the other clock
    pub fn delta(&self, other: &VectorClock) -> Vec<ClockDelta> {
        self.entries
            .iter()
            .filter(|(agent, &counter)| counter > other.get(agent))
            .map(|(agent, &counter)| ClockDelta {
                agent: agent.clone(),
                counter,
            })
            .collect()
    }

    /// Apply deltas produced by `delta`, keeping pointwise maxima
    pub fn apply_deltas(&mut self, deltas: &[ClockDelta]) {
        for delta in deltas {
            self.update(&delta.agent, delta.counter);
        }
    }

    /// Compact text form: `"id1:c1;id2:c2"`, entries in agent-id order
    pub fn to_text(&self) -> String {
        self.entries
            .iter()
            .map(|(agent, counter)| format!("{}:{}", agent, counter))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Parse the compact text form; the owner is supplied by the caller
    /// since the text form carries counters only
    pub fn from_text(owner: AgentId, text: &str) -> AxonResult<Self> {
        let mut clock = VectorClock::new(owner);
        if text.is_empty() {
            return Ok(clock);
        }
        for part in text.split(';') {
            let (agent, counter) = part.rsplit_once(':').ok_or_else(|| {
                AxonError::MalformedClock {
                    reason: format!("entry '{}' missing ':' separator", part),
                }
            })?;
            if agent.is_empty() {
                return Err(AxonError::MalformedClock {
                    reason: "empty agent id".to_string(),
                });
            }
            let counter: u64 = counter.parse().map_err(|_| AxonError::MalformedClock {
                reason: format!("counter '{}' is not an integer", counter),
            })?;
            clock.update(&AgentId::new(agent), counter);
        }
        Ok(clock)
    }

    /// Self-describing binary form
    ///
    /// Layout: `u16 owner_len | owner | u64 version | u32 entry_count |
    /// (u16 agent_len | agent | u64 counter)*`, all integers big-endian.
    /// Round-trips preserve owner, every entry, and the version.
    pub fn to_binary(&self) -> Vec<u8> {
        let owner = self.owner.as_str().as_bytes();
        let mut out = Vec::with_capacity(2 + owner.len() + 8 + 4 + self.entries.len() * 16);
        out.extend_from_slice(&(owner.len() as u16).to_be_bytes());
        out.extend_from_slice(owner);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for (agent, counter) in &self.entries {
            let id = agent.as_str().as_bytes();
            out.extend_from_slice(&(id.len() as u16).to_be_bytes());
            out.extend_from_slice(id);
            out.extend_from_slice(&counter.to_be_bytes());
        }
        out
    }

    /// Decode the binary form; partial or trailing bytes reject atomically
    pub fn from_binary(bytes: &[u8]) -> AxonResult<Self> {
        let mut cursor = Cursor::new(bytes);
        let owner = cursor.read_string()?;
        let version = cursor.read_u64()?;
        let entry_count = cursor.read_u32()? as usize;

        let now = Utc::now();
        let mut entries = BTreeMap::new();
        let mut seen_at = BTreeMap::new();
        for _ in 0..entry_count {
            let agent = AgentId::new(cursor.read_string()?);
            let counter = cursor.read_u64()?;
            entries.insert(agent.clone(), counter);
            seen_at.insert(agent, now);
        }
        if !cursor.is_exhausted() {
            return Err(AxonError::MalformedClock {
                reason: "trailing bytes after final entry".to_string(),
            });
        }

        let owner = AgentId::new(owner);
        entries.entry(owner.clone()).or_insert(0);
        seen_at.entry(owner.clone()).or_insert(now);
        Ok(Self {
            owner,
            entries,
            seen_at,
            version,
            updated_at: now,
        })
    }

    /// Evict stale entries per the pruning policy
    ///
    /// Entries older than `max_age` are evicted, oldest first, until the
    /// clock holds at most `max_size` entries. The `keep_recent_agents`
    /// most recently seen entries and the owner entry are never evicted.
    /// Pruned entries read as zero afterwards. Returns the eviction count.
    pub fn prune(&mut self, config: &ClockPruningConfig, now: DateTime<Utc>) -> usize {
        if self.entries.len() <= config.max_size {
            return 0;
        }

        // Non-owner entries, most recently seen first
        let mut by_recency: Vec<(AgentId, DateTime<Utc>)> = self
            .entries
            .keys()
            .filter(|agent| **agent != self.owner)
            .map(|agent| {
                let seen = self
                    .seen_at
                    .get(agent)
                    .copied()
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                (agent.clone(), seen)
            })
            .collect();
        by_recency.sort_by(|a, b| b.1.cmp(&a.1));

        let protected = config.keep_recent_agents.min(by_recency.len());
        let max_age = chrono::Duration::from_std(config.max_age)
            .unwrap_or_else(|_| chrono::Duration::max_value());

        let mut evicted = 0;
        // Walk eviction candidates oldest-first
        for (agent, seen) in by_recency[protected..].iter().rev() {
            if self.entries.len() <= config.max_size {
                break;
            }
            if now.signed_duration_since(*seen) > max_age {
                self.entries.remove(agent);
                self.seen_at.remove(agent);
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.version += 1;
            self.updated_at = now;
        }
        evicted
    }

    /// Overwrite an entry's observation time; test and replay support
    pub fn set_seen_at(&mut self, agent: &AgentId, seen: DateTime<Utc>) {
        if self.entries.contains_key(agent) {
            self.seen_at.insert(agent.clone(), seen);
        }
    }
}

/// Equality is causal identity: owner and counters. Observation times and
/// the mutation version are bookkeeping and excluded.
impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.entries == other.entries
    }
}

impl Eq for VectorClock {}

impl std::fmt::Display for VectorClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VC{{{}}}", self.to_text())
    }
}

impl Crdt for VectorClock {
    fn merge(&mut self, other: &Self) {
        VectorClock::merge(self, other);
    }
}

/// Bounds-checked reader for the binary clock form
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> AxonResult<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(AxonError::MalformedClock {
                reason: format!(
                    "truncated at byte {}: need {} more",
                    self.pos,
                    self.pos + n - self.bytes.len()
                ),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u16(&mut self) -> AxonResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> AxonResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> AxonResult<u64> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }

    fn read_string(&mut self) -> AxonResult<String> {
        let len = self.read_u16()? as usize;
        let b = self.take(len)?;
        String::from_utf8(b.to_vec()).map_err(|_| AxonError::MalformedClock {
            reason: "agent id is not valid UTF-8".to_string(),
        })
    }

    fn is_exhausted(&self) -> bool {
        self.pos == self.bytes.len()
    }
}
