//! Stored reference format: a raw little-endian `f32` array of fixed length.

use crate::types::Embedding;
use thiserror::Error;

const F32_BYTES: usize = std::mem::size_of::<f32>();

#[derive(Error, Debug, PartialEq)]
pub enum CodecError {
    #[error("corrupt reference: {len} bytes is not a whole number of f32 values")]
    Misaligned { len: usize },
    #[error("corrupt reference: expected {expected} values, found {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("corrupt reference: non-finite value at index {index}")]
    NonFinite { index: usize },
}

/// Serialize an embedding as little-endian `f32` bytes.
pub fn encode(embedding: &Embedding) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.values.len() * F32_BYTES);
    for &value in &embedding.values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Deserialize a stored reference, refusing anything that is not exactly
/// `expected_dim` finite values.
pub fn decode(bytes: &[u8], expected_dim: usize) -> Result<Embedding, CodecError> {
    if bytes.len() % F32_BYTES != 0 {
        return Err(CodecError::Misaligned { len: bytes.len() });
    }
    let actual = bytes.len() / F32_BYTES;
    if actual != expected_dim {
        return Err(CodecError::WrongLength { expected: expected_dim, actual });
    }

    let mut values = Vec::with_capacity(actual);
    for (index, chunk) in bytes.chunks_exact(F32_BYTES).enumerate() {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if !value.is_finite() {
            return Err(CodecError::NonFinite { index });
        }
        values.push(value);
    }
    Ok(Embedding::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EMBEDDING_DIM;

    #[test]
    fn test_roundtrip_full_dimension() {
        let values: Vec<f32> = (0..EMBEDDING_DIM).map(|i| ((i as f32) * 0.37).sin() / 96.0).collect();
        let embedding = Embedding::new(values);
        let bytes = encode(&embedding);
        assert_eq!(bytes.len(), EMBEDDING_DIM * 4);
        assert_eq!(decode(&bytes, EMBEDDING_DIM).unwrap(), embedding);
    }

    #[test]
    fn test_roundtrip_preserves_bits() {
        let embedding = Embedding::new(vec![-0.0, f32::MIN_POSITIVE, 1.0e-30, -3.5]);
        let decoded = decode(&encode(&embedding), 4).unwrap();
        for (a, b) in embedding.values.iter().zip(decoded.values.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_little_endian_layout() {
        let bytes = encode(&Embedding::new(vec![1.0]));
        assert_eq!(bytes, vec![0x00, 0x00, 0x80, 0x3f]);
    }

    #[test]
    fn test_misaligned_length() {
        assert_eq!(decode(&[0u8; 10], 2), Err(CodecError::Misaligned { len: 10 }));
    }

    #[test]
    fn test_wrong_element_count() {
        assert_eq!(
            decode(&[0u8; 12], EMBEDDING_DIM),
            Err(CodecError::WrongLength { expected: EMBEDDING_DIM, actual: 3 })
        );
    }

    #[test]
    fn test_empty_is_wrong_length() {
        assert!(matches!(decode(&[], EMBEDDING_DIM), Err(CodecError::WrongLength { actual: 0, .. })));
    }

    #[test]
    fn test_non_finite_rejected() {
        let bytes = encode(&Embedding::new(vec![0.5, f32::NAN]));
        assert_eq!(decode(&bytes, 2), Err(CodecError::NonFinite { index: 1 }));
    }
}
