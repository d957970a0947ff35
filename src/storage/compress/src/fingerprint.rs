use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Content classification driving algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    Text,
    Binary,
    Mixed,
    Numeric,
}

/// Pre-compression content fingerprint
///
/// Sampling is capped at the first 4 KiB; the statistics only steer
/// algorithm choice, so a prefix sample is accurate enough and keeps
/// fingerprinting off the hot path's flame graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// blake3 of the full content, hex encoded
    pub hash: String,
    pub size: usize,
    pub class: ContentClass,
    /// Shannon entropy of the byte distribution, 0..=8 bits
    pub entropy: f64,
    /// Fraction of repeated 8-byte chunks, 0..=1
    pub repetition_rate: f64,
    /// Fraction of printable-ASCII-or-whitespace bytes, 0..=1
    pub text_ratio: f64,
    pub binary_ratio: f64,
}

const SAMPLE_LIMIT: usize = 4096;
const CHUNK: usize = 8;

impl Fingerprint {
    pub fn compute(data: &[u8]) -> Self {
        let hash = blake3::hash(data).to_hex().to_string();
        let sample = &data[..data.len().min(SAMPLE_LIMIT)];

        let entropy = shannon_entropy(sample);
        let repetition_rate = repetition_rate(sample);
        let (text_ratio, numeric_ratio) = text_and_numeric_ratio(sample);
        let binary_ratio = 1.0 - text_ratio;

        let class = if sample.is_empty() {
            ContentClass::Binary
        } else if numeric_ratio > 0.9 {
            ContentClass::Numeric
        } else if text_ratio > 0.9 {
            ContentClass::Text
        } else if text_ratio < 0.3 {
            ContentClass::Binary
        } else {
            ContentClass::Mixed
        };

        Self {
            hash,
            size: data.len(),
            class,
            entropy,
            repetition_rate,
            text_ratio,
            binary_ratio,
        }
    }
}

fn shannon_entropy(sample: &[u8]) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }
    let mut counts = [0u32; 256];
    for &byte in sample {
        counts[byte as usize] += 1;
    }
    let total = sample.len() as f64;
    let mut entropy = 0.0;
    for &count in &counts {
        if count > 0 {
            let p = count as f64 / total;
            entropy -= p * p.log2();
        }
    }
    entropy
}

fn repetition_rate(sample: &[u8]) -> f64 {
    if sample.len() < CHUNK * 2 {
        return 0.0;
    }
    let chunks: Vec<&[u8]> = sample.chunks_exact(CHUNK).collect();
    let unique: HashSet<&[u8]> = chunks.iter().copied().collect();
    1.0 - unique.len() as f64 / chunks.len() as f64
}

fn text_and_numeric_ratio(sample: &[u8]) -> (f64, f64) {
    if sample.is_empty() {
        return (0.0, 0.0);
    }
    let mut text = 0usize;
    let mut numeric = 0usize;
    for &byte in sample {
        let printable = (0x20..0x7F).contains(&byte) || byte == b'\n' || byte == b'\r' || byte == b'\t';
        if printable {
            text += 1;
        }
        if byte.is_ascii_digit()
            || byte == b'.'
            || byte == b'-'
            || byte == b'+'
            || byte == b','
            || byte.is_ascii_whitespace()
        {
            numeric += 1;
        }
    }
    let total = sample.len() as f64;
    (text as f64 / total, numeric as f64 / total)
}
