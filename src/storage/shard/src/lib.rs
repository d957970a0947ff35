pub mod manager;
pub mod migration;
pub mod ring;
pub mod shard;

pub use manager::*;
pub use migration::*;
pub use ring::*;
pub use shard::*;

/// Consistent-hash sharding for AXON
///
/// Keys hash onto a 64-bit ring carrying `virtual_nodes` positions per
/// physical node; a key's primary is the node at the first ring position
/// clockwise of its hash, replicas are the next distinct nodes. Shards are
/// contiguous hash intervals that split, merge, and migrate as load and
/// membership change. The shard map is read-mostly: every mutation
/// publishes a fresh snapshot under a bumped version.
pub const RING_BITS: u32 = 64;
