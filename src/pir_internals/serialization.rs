//! Query/reply envelopes and their wire codec.
//!
//! A serialized envelope is a little-endian `u32` ciphertext count followed by one
//! length-prefixed scheme-native ciphertext serialization per entry. Both sides are
//! assumed pre-configured with identical parameters; nothing else travels on the wire.

use crate::pir_internals::{branch_opt_util, error::PirError};
use fhe::bfv::{BfvParameters, Ciphertext};
use fhe_traits::{DeserializeParametrized, Serialize};
use std::sync::Arc;

/// An encrypted selection, one ciphertext per PIR dimension. Produced fresh per request
/// and consumed exactly once by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PirQuery {
    pub(crate) ciphertexts: Vec<Ciphertext>,
}

impl PirQuery {
    #[inline(always)]
    pub fn ciphertext_count(&self) -> usize {
        self.ciphertexts.len()
    }
}

/// The encrypted selected record, ordered; consumed exactly once by the client's decode
/// step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PirReply {
    pub(crate) ciphertexts: Vec<Ciphertext>,
}

impl PirReply {
    #[inline(always)]
    pub fn ciphertext_count(&self) -> usize {
        self.ciphertexts.len()
    }
}

pub fn serialize_query(query: &PirQuery) -> Vec<u8> {
    write_ciphertexts(&query.ciphertexts)
}

pub fn deserialize_query(bytes: &[u8], params: &Arc<BfvParameters>, expected_dimensions: usize) -> Result<PirQuery, PirError> {
    let ciphertexts = read_ciphertexts(bytes, params, expected_dimensions, |expected, actual| {
        PirError::QueryCiphertextCountMismatch { expected, actual }
    })?;
    Ok(PirQuery { ciphertexts })
}

pub fn serialize_reply(reply: &PirReply) -> Vec<u8> {
    write_ciphertexts(&reply.ciphertexts)
}

pub fn deserialize_reply(bytes: &[u8], params: &Arc<BfvParameters>, expected_count: usize) -> Result<PirReply, PirError> {
    let ciphertexts = read_ciphertexts(bytes, params, expected_count, |expected, actual| {
        PirError::ReplyCiphertextCountMismatch { expected, actual }
    })?;
    Ok(PirReply { ciphertexts })
}

fn write_ciphertexts(ciphertexts: &[Ciphertext]) -> Vec<u8> {
    let serialized: Vec<Vec<u8>> = ciphertexts.iter().map(|ct| ct.to_bytes()).collect();
    let total: usize = 4 + serialized.iter().map(|b| 4 + b.len()).sum::<usize>();

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(ciphertexts.len() as u32).to_le_bytes());
    for bytes in serialized {
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&bytes);
    }
    out
}

fn read_ciphertexts(
    bytes: &[u8],
    params: &Arc<BfvParameters>,
    expected_count: usize,
    count_mismatch: fn(usize, usize) -> PirError,
) -> Result<Vec<Ciphertext>, PirError> {
    let count = read_u32(bytes, 0)? as usize;
    if branch_opt_util::unlikely(count != expected_count) {
        return Err(count_mismatch(expected_count, count));
    }

    let mut ciphertexts = Vec::with_capacity(count);
    let mut cursor = 4usize;

    for _ in 0..count {
        let byte_len = read_u32(bytes, cursor)? as usize;
        cursor += 4;

        let end = cursor.checked_add(byte_len).ok_or(PirError::TruncatedStream)?;
        if end > bytes.len() {
            return Err(PirError::TruncatedStream);
        }

        let ct = Ciphertext::from_bytes(&bytes[cursor..end], params).map_err(|e| PirError::MalformedCiphertext(e.to_string()))?;
        ciphertexts.push(ct);
        cursor = end;
    }

    if branch_opt_util::unlikely(cursor != bytes.len()) {
        return Err(PirError::UnexpectedTrailingBytes(bytes.len() - cursor));
    }

    Ok(ciphertexts)
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, PirError> {
    let end = offset.checked_add(4).ok_or(PirError::TruncatedStream)?;
    if end > bytes.len() {
        return Err(PirError::TruncatedStream);
    }
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..end]);
    Ok(u32::from_le_bytes(word))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pir_internals::params::{PirParams, generate_encryption_params};
    use crate::{ErrorKind, client::Client};

    fn query_bytes(dimensions: usize) -> (Vec<u8>, Arc<BfvParameters>) {
        let params = generate_encryption_params(4096, 20).unwrap();
        let pir_params = PirParams::new(2000, 64, dimensions, &params, true, true, true).unwrap();
        let client = Client::new(&params, &pir_params);
        let bytes = client.generate_serialized_query(client.get_fv_index(42)).unwrap();
        (bytes, params)
    }

    #[test]
    fn query_round_trips_through_wire_format() {
        let (bytes, params) = query_bytes(2);
        let query = deserialize_query(&bytes, &params, 2).unwrap();

        assert_eq!(query.ciphertext_count(), 2);
        assert_eq!(serialize_query(&query), bytes);
    }

    #[test]
    fn rejects_wrong_ciphertext_count() {
        let (bytes, params) = query_bytes(1);
        let err = deserialize_query(&bytes, &params, 2).unwrap_err();

        assert_eq!(err, PirError::QueryCiphertextCountMismatch { expected: 2, actual: 1 });
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn rejects_truncated_stream() {
        let (bytes, params) = query_bytes(2);
        let err = deserialize_query(&bytes[..bytes.len() - 9], &params, 2).unwrap_err();
        assert!(matches!(err, PirError::TruncatedStream | PirError::MalformedCiphertext(_)));
    }

    #[test]
    fn rejects_trailing_garbage() {
        let (mut bytes, params) = query_bytes(2);
        bytes.extend_from_slice(&[0xde, 0xad]);

        let err = deserialize_query(&bytes, &params, 2).unwrap_err();
        assert_eq!(err, PirError::UnexpectedTrailingBytes(2));
    }
}
