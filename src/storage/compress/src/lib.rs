pub mod codecs;
pub mod engine;
pub mod fingerprint;

pub use codecs::*;
pub use engine::*;
pub use fingerprint::*;

/// Adaptive compression for AXON
///
/// Blobs are fingerprinted before compression (hash, entropy, repetition,
/// text/binary ratios) and the fingerprint drives algorithm selection:
/// - Text-dominant content: Brotli (best ratio on text)
/// - Highly redundant content: LZ4 (speed wins, ratio is cheap anyway)
/// - Mixed, moderately repetitive content: learned-dictionary coding
/// - A previously-seen reference blob: delta encoding against it
/// - Everything else: Gzip
///
/// A content-addressed cache deduplicates identical blobs and supplies the
/// references for delta and dictionary coding; a periodic sweep ages
/// entries out.
pub const COMPRESS_VERSION: u8 = 1;
