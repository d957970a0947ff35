use crate::error::{AxonError, AxonResult};

/// Self-describing wire frame for transport payloads
///
/// Layout: `magic(4B) | version(1B) | flags(1B) | len(4B, big-endian) |
/// payload(len)`. The payload is the canonical MessagePack serialization of
/// a gossip message; flag bit 0 marks a compressed payload, bit 1 is
/// reserved for encryption and never set by the core.
pub const FRAME_MAGIC: [u8; 4] = *b"AXON";
pub const FRAME_VERSION: u8 = 1;
pub const FRAME_HEADER_LEN: usize = 10;

pub const FLAG_COMPRESSED: u8 = 0b0000_0001;
pub const FLAG_ENCRYPTED: u8 = 0b0000_0010;

/// Decoded frame header plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }
}

/// Encode a payload into the wire frame
pub fn encode_frame(flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.push(FRAME_VERSION);
    frame.push(flags);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Decode a wire frame, validating magic, version, and length
pub fn decode_frame(bytes: &[u8]) -> AxonResult<Frame> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(AxonError::internal(format!(
            "frame truncated: {} bytes, header needs {}",
            bytes.len(),
            FRAME_HEADER_LEN
        )));
    }
    if bytes[0..4] != FRAME_MAGIC {
        return Err(AxonError::internal("frame: bad magic"));
    }
    let version = bytes[4];
    if version != FRAME_VERSION {
        return Err(AxonError::internal(format!(
            "frame: unsupported version {}",
            version
        )));
    }
    let flags = bytes[5];
    let len = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
    let body = &bytes[FRAME_HEADER_LEN..];
    if body.len() != len {
        return Err(AxonError::internal(format!(
            "frame: declared {} payload bytes, found {}",
            len,
            body.len()
        )));
    }
    Ok(Frame {
        flags,
        payload: body.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let payload = b"hello swarm".to_vec();
        let encoded = encode_frame(FLAG_COMPRESSED, &payload);
        let frame = decode_frame(&encoded).unwrap();

        assert!(frame.is_compressed());
        assert!(!frame.is_encrypted());
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn test_frame_empty_payload() {
        let encoded = encode_frame(0, &[]);
        assert_eq!(encoded.len(), FRAME_HEADER_LEN);
        let frame = decode_frame(&encoded).unwrap();
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_frame_rejects_bad_magic() {
        let mut encoded = encode_frame(0, b"x");
        encoded[0] = b'Z';
        assert!(decode_frame(&encoded).is_err());
    }

    #[test]
    fn test_frame_rejects_bad_version() {
        let mut encoded = encode_frame(0, b"x");
        encoded[4] = 99;
        assert!(decode_frame(&encoded).is_err());
    }

    #[test]
    fn test_frame_rejects_length_mismatch() {
        let mut encoded = encode_frame(0, b"abcdef");
        encoded.truncate(encoded.len() - 2);
        assert!(decode_frame(&encoded).is_err());
    }

    #[test]
    fn test_frame_rejects_truncated_header() {
        assert!(decode_frame(b"AX").is_err());
    }
}
