//! Lossless conversion of ciphertexts into plaintext bundles and back.
//!
//! For every dimension past the first, the server must feed the previous pass's
//! ciphertexts back into the multiply-accumulate as if they were database plaintexts.
//! A ciphertext at the last modulus level is two polynomials of `log2(q0)`-bit
//! coefficients; transcoding those into `log2(t)`-bit plaintext coefficients spreads one
//! ciphertext over `expansion_ratio` plaintexts. The client inverts the transform after
//! decrypting the reply.

use crate::pir_internals::error::PirError;
use fhe::bfv::{BfvParameters, Ciphertext, Encoding, Plaintext};
use fhe_math::rq::{Context, Poly, Representation, traits::TryConvertFrom};
use fhe_traits::FheEncoder;
use fhe_util::transcode_bidirectional;
use std::sync::Arc;

/// Bit-width of the single coefficient modulus left at the last level.
#[inline(always)]
pub fn last_level_modulus_bit_len(params: &Arc<BfvParameters>) -> usize {
    64 - params.moduli()[0].leading_zeros() as usize
}

/// Plaintext coefficients needed to carry one last-level polynomial.
#[inline(always)]
pub fn coefficients_per_poly(params: &Arc<BfvParameters>) -> usize {
    let t_bits = params.plaintext().ilog2() as usize;
    (params.degree() * last_level_modulus_bit_len(params)).div_ceil(t_bits)
}

/// Plaintexts needed to carry one two-polynomial last-level ciphertext.
#[inline(always)]
pub fn expansion_ratio(params: &Arc<BfvParameters>) -> usize {
    (2 * coefficients_per_poly(params)).div_ceil(params.degree())
}

/// Spreads a last-level ciphertext over `expansion_ratio(params)` level-1 plaintexts.
///
/// The polynomials stay in the representation the scheme keeps them in; the transform
/// only reinterprets their coefficient words, so [`recompose_ciphertext`] reproduces the
/// exact ciphertext.
pub fn decompose_to_plaintexts(ct: &Ciphertext, params: &Arc<BfvParameters>) -> Result<Vec<Plaintext>, PirError> {
    let degree = params.degree();
    let q_bits = last_level_modulus_bit_len(params);
    let t_bits = params.plaintext().ilog2() as usize;

    let mut values = Vec::with_capacity(2 * coefficients_per_poly(params));
    for poly in (0..).map_while(|i| ct.get(i)) {
        let coefficients: Vec<u64> = poly.coefficients().iter().copied().collect();
        values.append(&mut transcode_bidirectional(&coefficients, q_bits, t_bits));
    }
    values.resize(expansion_ratio(params) * degree, 0);

    values
        .chunks(degree)
        .map(|chunk| Ok(Plaintext::try_encode(chunk, Encoding::poly_at_level(1), params)?))
        .collect()
}

/// Rebuilds a last-level ciphertext from the decrypted coefficient vectors of its
/// `expansion_ratio(params)` carrier plaintexts, in decomposition order.
pub fn recompose_ciphertext(coefficient_chunks: &[Vec<u64>], params: &Arc<BfvParameters>) -> Result<Ciphertext, PirError> {
    let degree = params.degree();
    let q_bits = last_level_modulus_bit_len(params);
    let t_bits = params.plaintext().ilog2() as usize;
    let per_poly = coefficients_per_poly(params);

    let mut values = Vec::with_capacity(coefficient_chunks.len() * degree);
    for chunk in coefficient_chunks {
        values.extend_from_slice(chunk);
    }
    if values.len() < 2 * per_poly {
        return Err(PirError::InvalidReplyShape {
            expected: 2 * per_poly,
            actual: values.len(),
        });
    }

    let ctx = Arc::new(Context::new(&params.moduli()[..1], degree).map_err(|e| PirError::Scheme(e.to_string()))?);

    let polys = [&values[..per_poly], &values[per_poly..2 * per_poly]]
        .into_iter()
        .map(|half| {
            let mut coefficients = transcode_bidirectional(half, t_bits, q_bits);
            coefficients.truncate(degree);
            Poly::try_convert_from(coefficients, &ctx, true, Representation::Ntt).map_err(|e| PirError::Scheme(e.to_string()))
        })
        .collect::<Result<Vec<Poly>, PirError>>()?;

    Ok(Ciphertext::new(polys, params)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pir_internals::params::generate_encryption_params;
    use fhe::bfv::SecretKey;
    use fhe_traits::{FheDecoder, FheDecrypter, FheEncrypter};
    use rand::{rngs::OsRng, thread_rng};

    #[test]
    fn expansion_ratio_at_the_default_parameterization() {
        // N = 4096, 36-bit last-level modulus, 20-bit plaintext modulus.
        let params = generate_encryption_params(4096, 20).unwrap();
        assert_eq!(expansion_ratio(&params), 4);
    }

    #[test]
    fn decompose_then_recompose_is_identity() {
        let params = generate_encryption_params(4096, 20).unwrap();
        let sk = SecretKey::random(&params, &mut OsRng);

        let message = (0..params.degree() as u64).map(|v| v % params.plaintext()).collect::<Vec<u64>>();
        let pt = Plaintext::try_encode(&message, Encoding::poly_at_level(1), &params).unwrap();
        let ct: Ciphertext = sk.try_encrypt(&pt, &mut thread_rng()).unwrap();

        let mut switched = ct.clone();
        switched.mod_switch_to_last_level().unwrap();

        let carriers = decompose_to_plaintexts(&switched, &params).unwrap();
        assert_eq!(carriers.len(), expansion_ratio(&params));

        let max_level = params.moduli().len() - 1;
        let chunks = carriers
            .iter()
            .map(|carrier| Vec::<u64>::try_decode(carrier, Encoding::poly_at_level(1)).unwrap())
            .collect::<Vec<Vec<u64>>>();
        let rebuilt = recompose_ciphertext(&chunks, &params).unwrap();

        let decrypted = sk.try_decrypt(&rebuilt).unwrap();
        let decoded = Vec::<u64>::try_decode(&decrypted, Encoding::poly_at_level(max_level)).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn recompose_rejects_short_input() {
        let params = generate_encryption_params(4096, 20).unwrap();
        let err = recompose_ciphertext(&[vec![0u64; 16]], &params).unwrap_err();
        assert!(matches!(err, PirError::InvalidReplyShape { .. }));
    }
}
