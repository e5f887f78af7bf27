//! `IdArray`: the OpenHome Playlist's wire representation of "what's in the
//! queue" — the concatenation of big-endian 32-bit player ids, base64-encoded.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdArrayError {
    #[error("id array base64 is malformed: {0}")]
    Base64(String),
    #[error("id array length {0} is not a multiple of 4")]
    NotAligned(usize),
}

/// Encodes a list of player ids as base64(be32 ids concatenated).
pub fn encode(ids: &[i32]) -> String {
    let mut bytes = Vec::with_capacity(ids.len() * 4);
    for id in ids {
        bytes.extend_from_slice(&id.to_be_bytes());
    }
    STANDARD.encode(bytes)
}

/// Inverse of [`encode`].
pub fn decode(text: &str) -> Result<Vec<i32>, IdArrayError> {
    let bytes = STANDARD
        .decode(text)
        .map_err(|e| IdArrayError::Base64(e.to_string()))?;
    if bytes.len() % 4 != 0 {
        return Err(IdArrayError::NotAligned(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s2_encode_matches_spec_example() {
        // 1, 256, 0x01020304 -> 00000001 00000100 01020304? no: 256 = 0x00000100
        let encoded = encode(&[1, 256, 0x0102_0304]);
        assert_eq!(encoded, "AAAAAQAAAQABAgME");
    }

    #[test]
    fn round_trip_is_identity_for_any_list() {
        for sample in [
            vec![],
            vec![0],
            vec![-1, 1, i32::MAX, i32::MIN],
            (0..50).collect::<Vec<_>>(),
        ] {
            let encoded = encode(&sample);
            assert_eq!(decode(&encoded).unwrap(), sample);
        }
    }

    #[test]
    fn misaligned_length_is_rejected() {
        // "AAA=" decodes to 2 bytes, not a multiple of 4.
        let err = decode("AAA=").unwrap_err();
        assert_eq!(err, IdArrayError::NotAligned(2));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        assert!(decode("not valid base64!!").is_err());
    }

    #[test]
    fn empty_array_encodes_to_empty_string() {
        assert_eq!(encode(&[]), "");
        assert_eq!(decode("").unwrap(), Vec::<i32>::new());
    }
}
