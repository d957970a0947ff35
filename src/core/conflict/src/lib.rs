pub mod context;
pub mod ot;
pub mod resolution;
pub mod resolver;
pub mod semantic;

pub use context::*;
pub use ot::*;
pub use resolution::*;
pub use resolver::*;
pub use semantic::*;

/// Conflict resolution for concurrent writes
///
/// When vector clocks report two writes as concurrent, the resolver picks
/// the winning value deterministically so every replica converges on the
/// same answer. Strategies are plain functions behind a registry keyed by
/// `ConflictStrategyKind`; custom strategies implement `ConflictStrategy`
/// and register by name, no subclassing involved.
pub const RESOLVER_VERSION: u8 = 1;
