//! Encoding of the raw byte database into the multi-dimensional plaintext array the
//! server evaluates queries against.

use crate::pir_internals::{branch_opt_util, error::PirError, params, params::PirParams};
use fhe::bfv::{BfvParameters, Encoding, Plaintext};
use fhe_traits::FheEncoder;
use fhe_util::transcode_from_bytes;
use rayon::prelude::*;
use std::sync::Arc;

/// Encodes a flat byte database into plaintext polynomials, one chunk of
/// `elements_per_plaintext` items per polynomial, padded with zero plaintexts up to the
/// product of the dimension extents so the array fills the whole index space.
///
/// The transform is pure and deterministic: identical inputs yield an identical encoded
/// database. Encoding each chunk also leaves the plaintext in the transformed domain the
/// scheme multiplies in, which is what makes reply generation cheap; this is the whole
/// of the preprocessing step.
///
/// # Arguments
///
/// * `raw` - `item_count * item_byte_len` bytes, record `i` at `i * item_byte_len`.
/// * `params` - The encryption parameters.
/// * `pir_params` - The PIR parameters describing the database shape.
///
/// # Returns
///
/// The plaintext array, dimension-0-major, of length `dimensions.iter().product()`.
pub fn encode_database(raw: &[u8], params: &Arc<BfvParameters>, pir_params: &PirParams) -> Result<Vec<Plaintext>, PirError> {
    let expected_byte_len = pir_params.item_count() * pir_params.item_byte_len();
    if branch_opt_util::unlikely(raw.len() != expected_byte_len) {
        return Err(PirError::DatabaseShapeMismatch {
            expected_byte_len,
            actual_byte_len: raw.len(),
        });
    }

    let t_bits = params::plaintext_bit_len(params);
    let chunk_byte_len = pir_params.elements_per_plaintext() * pir_params.item_byte_len();
    let total_plaintexts: usize = pir_params.dimensions().iter().product();

    (0..total_plaintexts)
        .into_par_iter()
        .map(|i| {
            let start = i * chunk_byte_len;
            if !branch_opt_util::likely(start < raw.len()) {
                // Padding slot past the last occupied chunk.
                return Ok(Plaintext::try_encode(&[0u64][..], Encoding::poly_at_level(1), params)?);
            }

            let end = (start + chunk_byte_len).min(raw.len());
            let coefficients = transcode_from_bytes(&raw[start..end], t_bits);
            Ok(Plaintext::try_encode(&coefficients, Encoding::poly_at_level(1), params)?)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pir_internals::params::generate_encryption_params;
    use rand::{RngCore, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn encoding_is_deterministic() {
        let params = generate_encryption_params(4096, 20).unwrap();
        let pir_params = PirParams::new(500, 64, 2, &params, true, true, true).unwrap();

        let mut raw = vec![0u8; 500 * 64];
        ChaCha8Rng::seed_from_u64(7).fill_bytes(&mut raw);

        let first = encode_database(&raw, &params, &pir_params).unwrap();
        let second = encode_database(&raw, &params, &pir_params).unwrap();

        assert_eq!(first.len(), pir_params.dimensions().iter().product::<usize>());
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_mismatched_raw_length() {
        let params = generate_encryption_params(4096, 20).unwrap();
        let pir_params = PirParams::new(500, 64, 2, &params, true, true, true).unwrap();

        let raw = vec![0u8; 499 * 64];
        let err = encode_database(&raw, &params, &pir_params).unwrap_err();
        assert!(matches!(err, PirError::DatabaseShapeMismatch { .. }));
    }
}
