use axon_core::{AxonError, AxonResult};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Compression algorithms available to the selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Lz4,
    Brotli,
    Gzip,
    /// High-effort predictive coding; chosen for mixed content when no
    /// trained dictionary is available yet
    Predictive,
    /// Byte-wise delta against a cached reference blob, then LZ4
    Delta,
    /// zstd with a dictionary trained on recently-seen blobs
    Dictionary,
}

impl Algorithm {
    /// Stable wire tag for the envelope
    pub fn tag(&self) -> u8 {
        match self {
            Algorithm::Lz4 => 1,
            Algorithm::Brotli => 2,
            Algorithm::Gzip => 3,
            Algorithm::Predictive => 4,
            Algorithm::Delta => 5,
            Algorithm::Dictionary => 6,
        }
    }

    pub fn from_tag(tag: u8) -> AxonResult<Self> {
        match tag {
            1 => Ok(Algorithm::Lz4),
            2 => Ok(Algorithm::Brotli),
            3 => Ok(Algorithm::Gzip),
            4 => Ok(Algorithm::Predictive),
            5 => Ok(Algorithm::Delta),
            6 => Ok(Algorithm::Dictionary),
            other => Err(AxonError::UnknownAlgorithm { tag: other }),
        }
    }

    /// Whether decompression needs only the envelope (no compressor state)
    pub fn is_self_contained(&self) -> bool {
        matches!(self, Algorithm::Lz4 | Algorithm::Brotli | Algorithm::Gzip | Algorithm::Predictive)
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Algorithm::Lz4 => "lz4",
            Algorithm::Brotli => "brotli",
            Algorithm::Gzip => "gzip",
            Algorithm::Predictive => "predictive",
            Algorithm::Delta => "delta",
            Algorithm::Dictionary => "dictionary",
        };
        write!(f, "{}", name)
    }
}

/// Compress with LZ4 (size-prepended framing)
pub fn compress_lz4(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

pub fn decompress_lz4(data: &[u8]) -> AxonResult<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| AxonError::internal(format!("lz4 decompression failed: {}", e)))
}

/// Compress with Brotli at default quality
pub fn compress_brotli(data: &[u8]) -> AxonResult<Vec<u8>> {
    let mut out = Vec::new();
    let params = brotli::enc::BrotliEncoderParams::default();
    brotli::BrotliCompress(&mut std::io::Cursor::new(data), &mut out, &params)
        .map_err(|e| AxonError::internal(format!("brotli compression failed: {}", e)))?;
    Ok(out)
}

pub fn decompress_brotli(data: &[u8]) -> AxonResult<Vec<u8>> {
    let mut out = Vec::new();
    brotli::BrotliDecompress(&mut std::io::Cursor::new(data), &mut out)
        .map_err(|e| AxonError::internal(format!("brotli decompression failed: {}", e)))?;
    Ok(out)
}

/// Compress with Gzip at the default level
pub fn compress_gzip(data: &[u8]) -> AxonResult<Vec<u8>> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| AxonError::internal(format!("gzip compression failed: {}", e)))
}

pub fn decompress_gzip(data: &[u8]) -> AxonResult<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| AxonError::internal(format!("gzip decompression failed: {}", e)))?;
    Ok(out)
}

/// High-effort zstd pass standing in for the predictive coder
pub fn compress_predictive(data: &[u8]) -> AxonResult<Vec<u8>> {
    zstd::bulk::compress(data, 19)
        .map_err(|e| AxonError::internal(format!("predictive compression failed: {}", e)))
}

pub fn decompress_predictive(data: &[u8], original_len: usize) -> AxonResult<Vec<u8>> {
    zstd::bulk::decompress(data, original_len)
        .map_err(|e| AxonError::internal(format!("predictive decompression failed: {}", e)))
}

/// zstd with an explicit trained dictionary
pub fn compress_with_dictionary(data: &[u8], dictionary: &[u8]) -> AxonResult<Vec<u8>> {
    let mut compressor = zstd::bulk::Compressor::with_dictionary(3, dictionary)
        .map_err(|e| AxonError::internal(format!("dictionary load failed: {}", e)))?;
    compressor
        .compress(data)
        .map_err(|e| AxonError::internal(format!("dictionary compression failed: {}", e)))
}

pub fn decompress_with_dictionary(
    data: &[u8],
    dictionary: &[u8],
    original_len: usize,
) -> AxonResult<Vec<u8>> {
    let mut decompressor = zstd::bulk::Decompressor::with_dictionary(dictionary)
        .map_err(|e| AxonError::internal(format!("dictionary load failed: {}", e)))?;
    decompressor
        .decompress(data, original_len)
        .map_err(|e| AxonError::internal(format!("dictionary decompression failed: {}", e)))
}

/// Byte-wise XOR delta against a reference, LZ4-packed
///
/// The diff runs the full length of `data`; positions past the reference
/// end XOR against zero. Similar inputs produce a zero-dominated diff that
/// LZ4 collapses.
pub fn encode_delta(data: &[u8], reference: &[u8]) -> Vec<u8> {
    let diff: Vec<u8> = data
        .iter()
        .enumerate()
        .map(|(i, &byte)| byte ^ reference.get(i).copied().unwrap_or(0))
        .collect();
    compress_lz4(&diff)
}

pub fn decode_delta(encoded: &[u8], reference: &[u8]) -> AxonResult<Vec<u8>> {
    let diff = decompress_lz4(encoded)?;
    Ok(diff
        .iter()
        .enumerate()
        .map(|(i, &byte)| byte ^ reference.get(i).copied().unwrap_or(0))
        .collect())
}

/// Compression ratio as saved fraction of the original size
pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if original == 0 {
        return 0.0;
    }
    1.0 - compressed as f64 / original as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"AXON delta sync payload: operations, clocks, metadata. ";

    #[test]
    fn test_lz4_roundtrip() {
        let data = SAMPLE.repeat(50);
        let compressed = compress_lz4(&data);
        assert!(compressed.len() < data.len());
        assert_eq!(decompress_lz4(&compressed).unwrap(), data);
    }

    #[test]
    fn test_brotli_roundtrip() {
        let data = SAMPLE.repeat(50);
        let compressed = compress_brotli(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(decompress_brotli(&compressed).unwrap(), data);
    }

    #[test]
    fn test_gzip_roundtrip() {
        let data = SAMPLE.repeat(50);
        let compressed = compress_gzip(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(decompress_gzip(&compressed).unwrap(), data);
    }

    #[test]
    fn test_predictive_roundtrip() {
        let data = SAMPLE.repeat(50);
        let compressed = compress_predictive(&data).unwrap();
        assert_eq!(decompress_predictive(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn test_dictionary_roundtrip() {
        let samples: Vec<Vec<u8>> = (0..64).map(|i| format!("{} {}", String::from_utf8_lossy(SAMPLE), i).into_bytes()).collect();
        let dictionary = zstd::dict::from_samples(&samples, 4096).unwrap();

        let data = SAMPLE.repeat(10);
        let compressed = compress_with_dictionary(&data, &dictionary).unwrap();
        let restored = decompress_with_dictionary(&compressed, &dictionary, data.len()).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_delta_roundtrip() {
        let reference = SAMPLE.repeat(40);
        let mut data = reference.clone();
        data[100] = b'!';
        data.extend_from_slice(b"tail beyond the reference");

        let encoded = encode_delta(&data, &reference);
        assert!(encoded.len() < data.len());
        assert_eq!(decode_delta(&encoded, &reference).unwrap(), data);
    }

    #[test]
    fn test_algorithm_tags_roundtrip() {
        for algo in [
            Algorithm::Lz4,
            Algorithm::Brotli,
            Algorithm::Gzip,
            Algorithm::Predictive,
            Algorithm::Delta,
            Algorithm::Dictionary,
        ] {
            assert_eq!(Algorithm::from_tag(algo.tag()).unwrap(), algo);
        }
        assert!(matches!(
            Algorithm::from_tag(99),
            Err(AxonError::UnknownAlgorithm { tag: 99 })
        ));
    }

    #[test]
    fn test_compression_ratio() {
        assert!((compression_ratio(1000, 400) - 0.6).abs() < f64::EPSILON);
        assert_eq!(compression_ratio(0, 10), 0.0);
    }
}
