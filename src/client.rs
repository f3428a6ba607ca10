use crate::pir_internals::{
    branch_opt_util, decomposition,
    error::PirError,
    params,
    params::PirParams,
    serialization::{self, PirQuery, PirReply},
};
use fhe::bfv::{BfvParameters, Ciphertext, Encoding, EvaluationKey, EvaluationKeyBuilder, Plaintext, PublicKey, SecretKey};
use fhe_traits::{FheDecoder, FheDecrypter, FheEncoder, FheEncrypter};
use fhe_util::{inverse, transcode_to_bytes};
use rand::{rngs::OsRng, thread_rng};
use std::sync::Arc;

/// Keys enabling the server to obliviously expand a query ciphertext into a vector of
/// encrypted selection bits, one per index along a dimension.
pub type GaloisKeys = EvaluationKey;

/// PIR client: holds the only secret key in the protocol, turns record indices into
/// encrypted queries and decrypts replies back into record bytes.
pub struct Client {
    params: Arc<BfvParameters>,
    pir_params: PirParams,
    sk: SecretKey,
    pk: Option<PublicKey>,
}

impl Client {
    /// Creates a client with a freshly sampled secret key. A public key is derived only
    /// when the parameters ask for public-key query encryption.
    pub fn new(params: &Arc<BfvParameters>, pir_params: &PirParams) -> Client {
        let sk = SecretKey::random(params, &mut OsRng);
        let pk = if pir_params.symmetric() { None } else { Some(PublicKey::new(&sk, &mut thread_rng())) };

        Client {
            params: params.clone(),
            pir_params: pir_params.clone(),
            sk,
            pk,
        }
    }

    /// Plaintext coordinate holding record `index`.
    #[inline(always)]
    pub fn get_fv_index(&self, index: usize) -> usize {
        index / self.pir_params.elements_per_plaintext()
    }

    /// Position of record `index` inside its plaintext.
    #[inline(always)]
    pub fn get_fv_offset(&self, index: usize) -> usize {
        index % self.pir_params.elements_per_plaintext()
    }

    /// Generates the Galois keys the server needs to expand this client's queries. Must
    /// be registered with the server, under this client's id, before the first query.
    pub fn generate_galois_keys(&self) -> Result<GaloisKeys, PirError> {
        let keys = EvaluationKeyBuilder::new_leveled(&self.sk, 1, 0)?
            .enable_expansion(self.pir_params.expansion_level())?
            .build(&mut thread_rng())?;
        Ok(keys)
    }

    /// Generates an encrypted query for the plaintext at coordinate `fv_index`.
    ///
    /// The coordinate is split into one digit per dimension; each digit becomes a
    /// ciphertext encrypting a monomial whose exponent selects that digit. The monomial
    /// coefficient is pre-divided by the scaling that oblivious expansion introduces, so
    /// the expanded selection vector comes out holding exact ones.
    ///
    /// # Arguments
    ///
    /// * `fv_index` - The plaintext coordinate, i.e. [`Self::get_fv_index`] of the
    ///   desired record index.
    ///
    /// # Returns
    ///
    /// A query of one ciphertext per dimension, or a parameter error when the coordinate
    /// lies outside the database.
    pub fn generate_query(&self, fv_index: usize) -> Result<PirQuery, PirError> {
        let num_plaintexts = self.pir_params.num_plaintexts();
        if branch_opt_util::unlikely(fv_index >= num_plaintexts) {
            return Err(PirError::CoordinateOutOfRange {
                coordinate: fv_index,
                num_plaintexts,
            });
        }

        let dimensions = self.pir_params.dimensions();
        let t = self.params.plaintext();
        let degree = self.params.degree();

        let mut ciphertexts = Vec::with_capacity(dimensions.len());
        let mut stride: usize = dimensions.iter().product();

        for &extent in dimensions {
            stride /= extent;
            let digit = (fv_index / stride) % extent;

            let expansion_scale = 1u64 << extent.next_power_of_two().ilog2();
            let coefficient = inverse(expansion_scale, t)
                .ok_or_else(|| PirError::Scheme("expansion scaling is not invertible modulo the plaintext modulus".to_string()))?;

            let mut coefficients = vec![0u64; degree];
            coefficients[digit] = coefficient;
            let pt = Plaintext::try_encode(&coefficients, Encoding::poly_at_level(1), &self.params)?;

            let ct: Ciphertext = match &self.pk {
                Some(pk) => pk.try_encrypt(&pt, &mut thread_rng())?,
                None => self.sk.try_encrypt(&pt, &mut thread_rng())?,
            };
            ciphertexts.push(ct);
        }

        Ok(PirQuery { ciphertexts })
    }

    /// [`Self::generate_query`] followed by wire serialization.
    pub fn generate_serialized_query(&self, fv_index: usize) -> Result<Vec<u8>, PirError> {
        Ok(serialization::serialize_query(&self.generate_query(fv_index)?))
    }

    /// Parses a serialized reply, validating its ciphertext count against the
    /// parameters.
    pub fn deserialize_reply(&self, bytes: &[u8]) -> Result<PirReply, PirError> {
        serialization::deserialize_reply(bytes, &self.params, self.pir_params.reply_ciphertext_count())
    }

    /// Decodes a reply into the bytes of the requested record.
    ///
    /// A reply for a `d`-dimensional database is `expansion_ratio^(d - 1)` ciphertexts.
    /// Each decoding round decrypts the current bundle and recomposes groups of
    /// `expansion_ratio` coefficient vectors into the ciphertexts of the previous
    /// dimension, until a single ciphertext encrypting the selected plaintext remains.
    /// Its coefficients transcode back to bytes, from which the record at `fv_offset` is
    /// cut.
    ///
    /// # Arguments
    ///
    /// * `reply` - The reply to decode.
    /// * `fv_offset` - The record's position inside its plaintext, i.e.
    ///   [`Self::get_fv_offset`] of the record index.
    ///
    /// # Returns
    ///
    /// The `item_byte_len` bytes of the record, or a decode error.
    pub fn decode_reply(&self, reply: &PirReply, fv_offset: usize) -> Result<Vec<u8>, PirError> {
        let capacity = self.pir_params.elements_per_plaintext();
        if branch_opt_util::unlikely(fv_offset >= capacity) {
            return Err(PirError::OffsetOutOfRange { offset: fv_offset, capacity });
        }

        let expected = self.pir_params.reply_ciphertext_count();
        if branch_opt_util::unlikely(reply.ciphertexts.len() != expected) {
            return Err(PirError::ReplyCiphertextCountMismatch {
                expected,
                actual: reply.ciphertexts.len(),
            });
        }

        let d = self.pir_params.dimensions().len();
        let ratio = self.pir_params.expansion_ratio();
        let max_level = self.params.moduli().len() - 1;
        // Without the final modulus switch the reply stays at the encryption level.
        let reply_level = if self.pir_params.mod_switching() { max_level } else { 1 };

        let mut current = reply.ciphertexts.clone();
        for layer in (1..d).rev() {
            // Recomposed ciphertexts live at the last modulus level; only the outermost
            // bundle, the one that travelled, is at the reply level.
            let decode_level = if layer == d - 1 { reply_level } else { max_level };

            let coefficient_chunks = current
                .iter()
                .map(|ct| {
                    let pt = self.sk.try_decrypt(ct)?;
                    Ok(Vec::<u64>::try_decode(&pt, Encoding::poly_at_level(decode_level))?)
                })
                .collect::<Result<Vec<Vec<u64>>, PirError>>()?;

            current = coefficient_chunks
                .chunks(ratio)
                .map(|group| decomposition::recompose_ciphertext(group, &self.params))
                .collect::<Result<Vec<Ciphertext>, PirError>>()?;
        }

        let final_level = if d > 1 { max_level } else { reply_level };
        let ct = current.first().ok_or(PirError::InvalidReplyShape { expected: 1, actual: 0 })?;
        let pt = self.sk.try_decrypt(ct)?;
        let coefficients = Vec::<u64>::try_decode(&pt, Encoding::poly_at_level(final_level))?;
        let bytes = transcode_to_bytes(&coefficients, params::plaintext_bit_len(&self.params));

        let item_byte_len = self.pir_params.item_byte_len();
        let start = fv_offset * item_byte_len;
        let end = start + item_byte_len;
        if branch_opt_util::unlikely(end > bytes.len()) {
            return Err(PirError::InvalidReplyShape {
                expected: end,
                actual: bytes.len(),
            });
        }

        Ok(bytes[start..end].to_vec())
    }
}
