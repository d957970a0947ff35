use crate::{
    codecs, Algorithm, ContentClass, Fingerprint,
};
use axon_core::{AxonError, AxonResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, trace};

/// Self-describing compressed envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedBlob {
    pub algorithm: Algorithm,
    /// blake3 (hex) of the original content; verified on decompression
    pub checksum: String,
    pub original_len: usize,
    pub payload: Vec<u8>,
    /// Fingerprint hash of the delta base, for `Algorithm::Delta`
    pub reference: Option<String>,
    /// Trained dictionary id, for `Algorithm::Dictionary`
    pub dictionary_id: Option<u64>,
}

impl CompressedBlob {
    pub fn compressed_len(&self) -> usize {
        self.payload.len()
    }
}

/// Result of a compression pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Compressed {
    Blob(CompressedBlob),
    /// The exact content is already cached under this fingerprint hash
    DedupReference { hash: String, original_len: usize },
}

impl Compressed {
    pub fn original_len(&self) -> usize {
        match self {
            Compressed::Blob(blob) => blob.original_len,
            Compressed::DedupReference { original_len, .. } => *original_len,
        }
    }

    pub fn stored_len(&self) -> usize {
        match self {
            Compressed::Blob(blob) => blob.compressed_len(),
            // A reference is a hash plus a length
            Compressed::DedupReference { hash, .. } => hash.len() + 8,
        }
    }
}

/// Compression statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressionStats {
    pub blobs_compressed: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub dedup_hits: u64,
    pub dedup_saved_bytes: u64,
    pub per_algorithm: BTreeMap<String, u64>,
    pub checksum_failures: u64,
}

impl CompressionStats {
    /// Overall saved fraction across all compressed blobs
    pub fn savings(&self) -> f64 {
        codecs::compression_ratio(self.bytes_in as usize, self.bytes_out as usize)
    }

    fn record(&mut self, algorithm: Algorithm, original: usize, compressed: usize) {
        self.blobs_compressed += 1;
        self.bytes_in += original as u64;
        self.bytes_out += compressed as u64;
        *self.per_algorithm.entry(algorithm.to_string()).or_insert(0) += 1;
    }
}

struct CacheEntry {
    original: Vec<u8>,
    fingerprint: Fingerprint,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
    hits: u64,
}

/// Adaptive compressor with content-addressed dedup and delta references
///
/// Stateful by design: the cache supplies dedup markers and delta bases,
/// and the dictionary store backs trained-dictionary coding. Payloads that
/// must decompress on a *different* node go through the detached API,
/// which restricts selection to self-contained algorithms.
pub struct Compressor {
    cache: HashMap<String, CacheEntry>,
    dictionaries: HashMap<u64, Vec<u8>>,
    active_dictionary: Option<u64>,
    next_dictionary_id: u64,
    samples: VecDeque<Vec<u8>>,
    stats: CompressionStats,
}

/// Cap on retained training samples and their individual size
const MAX_SAMPLES: usize = 64;
const SAMPLE_CAP: usize = 4096;
/// Train once this many samples have accumulated
const TRAIN_AT: usize = 16;
const MAX_DICT_SIZE: usize = 16 * 1024;
/// Size tolerance when picking a delta base with a matching fingerprint
const DELTA_SIZE_TOLERANCE: f64 = 0.25;

impl Compressor {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
            dictionaries: HashMap::new(),
            active_dictionary: None,
            next_dictionary_id: 1,
            samples: VecDeque::new(),
            stats: CompressionStats::default(),
        }
    }

    pub fn stats(&self) -> &CompressionStats {
        &self.stats
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Compress a blob, consulting the dedup cache and delta references
    pub fn compress(&mut self, data: &[u8]) -> AxonResult<Compressed> {
        let fingerprint = Fingerprint::compute(data);

        // Content-addressed dedup: identical bytes are never stored twice
        if let Some(entry) = self.cache.get_mut(&fingerprint.hash) {
            entry.last_used = Utc::now();
            entry.hits += 1;
            self.stats.dedup_hits += 1;
            self.stats.dedup_saved_bytes += data.len() as u64;
            trace!(hash = %fingerprint.hash, "dedup hit");
            return Ok(Compressed::DedupReference {
                hash: fingerprint.hash,
                original_len: data.len(),
            });
        }

        let algorithm = self.select_algorithm(&fingerprint);
        let blob = self.encode(data, &fingerprint, algorithm)?;
        self.stats
            .record(blob.algorithm, data.len(), blob.payload.len());

        self.remember(data, fingerprint);
        Ok(Compressed::Blob(blob))
    }

    /// Decompress and verify; rejects any payload whose restored content
    /// fails the checksum
    pub fn decompress(&mut self, compressed: &Compressed) -> AxonResult<Vec<u8>> {
        match compressed {
            Compressed::DedupReference { hash, .. } => {
                let entry = self.cache.get_mut(hash).ok_or_else(|| {
                    AxonError::internal(format!("dedup reference missing from cache: {}", hash))
                })?;
                entry.last_used = Utc::now();
                Ok(entry.original.clone())
            }
            Compressed::Blob(blob) => {
                let restored = self.decode(blob)?;
                verify_checksum(&blob.checksum, &restored).map_err(|e| {
                    self.stats.checksum_failures += 1;
                    e
                })?;
                Ok(restored)
            }
        }
    }

    /// Compress for a foreign decompressor: self-contained algorithms only,
    /// no dedup markers, no cache mutation
    pub fn compress_detached(data: &[u8]) -> AxonResult<CompressedBlob> {
        let fingerprint = Fingerprint::compute(data);
        let algorithm = match () {
            _ if fingerprint.class == ContentClass::Text => Algorithm::Brotli,
            _ if fingerprint.repetition_rate > 0.9 => Algorithm::Lz4,
            _ if fingerprint.class == ContentClass::Mixed
                && fingerprint.repetition_rate > 0.3 =>
            {
                Algorithm::Predictive
            }
            _ => Algorithm::Gzip,
        };

        let payload = match algorithm {
            Algorithm::Brotli => codecs::compress_brotli(data)?,
            Algorithm::Lz4 => codecs::compress_lz4(data),
            Algorithm::Predictive => codecs::compress_predictive(data)?,
            _ => codecs::compress_gzip(data)?,
        };
        Ok(CompressedBlob {
            algorithm,
            checksum: fingerprint.hash,
            original_len: data.len(),
            payload,
            reference: None,
            dictionary_id: None,
        })
    }

    /// Decompress a detached blob without compressor state
    pub fn decompress_detached(blob: &CompressedBlob) -> AxonResult<Vec<u8>> {
        if !blob.algorithm.is_self_contained() {
            return Err(AxonError::internal(format!(
                "algorithm {} requires compressor state",
                blob.algorithm
            )));
        }
        let restored = match blob.algorithm {
            Algorithm::Lz4 => codecs::decompress_lz4(&blob.payload),
            Algorithm::Brotli => codecs::decompress_brotli(&blob.payload),
            Algorithm::Gzip => codecs::decompress_gzip(&blob.payload),
            Algorithm::Predictive => {
                codecs::decompress_predictive(&blob.payload, blob.original_len)
            }
            _ => unreachable!("checked above"),
        }
        .map_err(|_| AxonError::CorruptBlob {
            expected: blob.checksum.clone(),
            actual: "<undecodable payload>".to_string(),
        })?;
        verify_checksum(&blob.checksum, &restored)?;
        Ok(restored)
    }

    /// Drop cache entries idle past `max_age`; returns the eviction count
    pub fn sweep(&mut self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let max_age =
            chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::max_value());
        let before = self.cache.len();
        self.cache
            .retain(|_, entry| now.signed_duration_since(entry.last_used) <= max_age);
        let evicted = before - self.cache.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.cache.len(), "compression cache swept");
        }
        evicted
    }

    /// Selection rules in priority order; first match wins
    fn select_algorithm(&self, fingerprint: &Fingerprint) -> Algorithm {
        if fingerprint.class == ContentClass::Text {
            return Algorithm::Brotli;
        }
        if fingerprint.repetition_rate > 0.9 {
            return Algorithm::Lz4;
        }
        if fingerprint.class == ContentClass::Mixed
            && fingerprint.repetition_rate > 0.3
            && fingerprint.repetition_rate <= 0.9
        {
            return if self.active_dictionary.is_some() {
                Algorithm::Dictionary
            } else {
                Algorithm::Predictive
            };
        }
        if self.find_delta_base(fingerprint).is_some() {
            return Algorithm::Delta;
        }
        Algorithm::Gzip
    }

    /// A cached blob with a matching fingerprint shape usable as delta base
    fn find_delta_base(&self, fingerprint: &Fingerprint) -> Option<&String> {
        self.cache
            .iter()
            .filter(|(hash, entry)| {
                *hash != &fingerprint.hash
                    && entry.fingerprint.class == fingerprint.class
                    && size_within_tolerance(entry.fingerprint.size, fingerprint.size)
            })
            .max_by_key(|(_, entry)| entry.last_used)
            .map(|(hash, _)| hash)
    }

    fn encode(
        &mut self,
        data: &[u8],
        fingerprint: &Fingerprint,
        algorithm: Algorithm,
    ) -> AxonResult<CompressedBlob> {
        let mut reference = None;
        let mut dictionary_id = None;

        let payload = match algorithm {
            Algorithm::Brotli => codecs::compress_brotli(data)?,
            Algorithm::Lz4 => codecs::compress_lz4(data),
            Algorithm::Gzip => codecs::compress_gzip(data)?,
            Algorithm::Predictive => codecs::compress_predictive(data)?,
            Algorithm::Dictionary => {
                let id = self
                    .active_dictionary
                    .ok_or_else(|| AxonError::internal("no trained dictionary available"))?;
                let dict = &self.dictionaries[&id];
                dictionary_id = Some(id);
                codecs::compress_with_dictionary(data, dict)?
            }
            Algorithm::Delta => {
                let base_hash = self
                    .find_delta_base(fingerprint)
                    .cloned()
                    .ok_or_else(|| AxonError::internal("delta base vanished"))?;
                let base = &self.cache[&base_hash].original;
                let encoded = codecs::encode_delta(data, base);
                reference = Some(base_hash);
                encoded
            }
        };

        Ok(CompressedBlob {
            algorithm,
            checksum: fingerprint.hash.clone(),
            original_len: data.len(),
            payload,
            reference,
            dictionary_id,
        })
    }

    fn decode(&mut self, blob: &CompressedBlob) -> AxonResult<Vec<u8>> {
        let result = match blob.algorithm {
            Algorithm::Lz4 => codecs::decompress_lz4(&blob.payload),
            Algorithm::Brotli => codecs::decompress_brotli(&blob.payload),
            Algorithm::Gzip => codecs::decompress_gzip(&blob.payload),
            Algorithm::Predictive => {
                codecs::decompress_predictive(&blob.payload, blob.original_len)
            }
            Algorithm::Dictionary => {
                let id = blob
                    .dictionary_id
                    .ok_or_else(|| AxonError::internal("dictionary blob missing id"))?;
                let dict = self
                    .dictionaries
                    .get(&id)
                    .ok_or_else(|| AxonError::internal(format!("dictionary {} not found", id)))?;
                codecs::decompress_with_dictionary(&blob.payload, dict, blob.original_len)
            }
            Algorithm::Delta => {
                let base_hash = blob
                    .reference
                    .as_ref()
                    .ok_or_else(|| AxonError::internal("delta blob missing reference"))?;
                let base = self
                    .cache
                    .get(base_hash)
                    .map(|entry| entry.original.clone())
                    .ok_or_else(|| {
                        AxonError::internal(format!("delta base {} not cached", base_hash))
                    })?;
                codecs::decode_delta(&blob.payload, &base)
            }
        };
        result.map_err(|_| AxonError::CorruptBlob {
            expected: blob.checksum.clone(),
            actual: "<undecodable payload>".to_string(),
        })
    }

    fn remember(&mut self, data: &[u8], fingerprint: Fingerprint) {
        let now = Utc::now();
        self.cache.insert(
            fingerprint.hash.clone(),
            CacheEntry {
                original: data.to_vec(),
                fingerprint,
                created_at: now,
                last_used: now,
                hits: 0,
            },
        );

        self.samples
            .push_back(data[..data.len().min(SAMPLE_CAP)].to_vec());
        if self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
        if self.active_dictionary.is_none() && self.samples.len() >= TRAIN_AT {
            self.train_dictionary();
        }
    }

    fn train_dictionary(&mut self) {
        let samples: Vec<&[u8]> = self.samples.iter().map(|s| s.as_slice()).collect();
        match zstd::dict::from_samples(&samples, MAX_DICT_SIZE) {
            Ok(dictionary) => {
                let id = self.next_dictionary_id;
                self.next_dictionary_id += 1;
                self.dictionaries.insert(id, dictionary);
                self.active_dictionary = Some(id);
                debug!(dictionary_id = id, "trained compression dictionary");
            }
            // Not enough sample diversity yet; try again as samples accrue
            Err(e) => trace!("dictionary training skipped: {}", e),
        }
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new()
    }
}

fn size_within_tolerance(a: usize, b: usize) -> bool {
    let (small, large) = if a < b { (a, b) } else { (b, a) };
    if large == 0 {
        return true;
    }
    (large - small) as f64 / large as f64 <= DELTA_SIZE_TOLERANCE
}

fn verify_checksum(expected: &str, restored: &[u8]) -> AxonResult<()> {
    let actual = blake3::hash(restored).to_hex().to_string();
    if actual != expected {
        return Err(AxonError::CorruptBlob {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
