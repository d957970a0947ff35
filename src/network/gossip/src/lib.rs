pub mod message;
pub mod node;
pub mod protocol;
pub mod queue;

pub use message::*;
pub use node::*;
pub use protocol::*;
pub use queue::*;

/// Epidemic dissemination for AXON
///
/// Updates fan out to the best-scoring peers each round, carrying a TTL and
/// the path already walked so nothing echoes back. Periodic anti-entropy
/// repairs whatever rumor spreading missed, heartbeats feed the failure
/// detector, and a bounded pending queue applies backpressure to the
/// application while letting urgent traffic preempt idle chatter.
///
/// The protocol never calls back into its owner: everything it learns is
/// published on an event channel handed over at construction.
pub const PROTOCOL_VERSION: u8 = 1;
