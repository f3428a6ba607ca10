use crate::client::GaloisKeys;
use crate::pir_internals::{
    branch_opt_util, database, decomposition,
    error::PirError,
    params::PirParams,
    serialization::{self, PirQuery, PirReply},
};
use fhe::bfv::{BfvParameters, Ciphertext, Plaintext, dot_product_scalar};
use rayon::prelude::*;
use std::{collections::HashMap, sync::Arc};

/// PIR server: stores the database, the Galois keys of registered clients, and answers
/// encrypted queries without learning which record they select.
///
/// Setup mutates the server and takes `&mut self`; reply generation only reads and takes
/// `&self`, so one preprocessed server can answer many clients concurrently.
pub struct Server {
    params: Arc<BfvParameters>,
    pir_params: PirParams,
    galois_keys: HashMap<u32, GaloisKeys>,
    raw_database: Option<Vec<u8>>,
    encoded_database: Option<Vec<Plaintext>>,
}

impl Server {
    pub fn new(params: &Arc<BfvParameters>, pir_params: &PirParams) -> Server {
        Server {
            params: params.clone(),
            pir_params: pir_params.clone(),
            galois_keys: HashMap::new(),
            raw_database: None,
            encoded_database: None,
        }
    }

    /// Registers (or replaces) the Galois keys of the client identified by `client_id`.
    pub fn set_galois_key(&mut self, client_id: u32, key: GaloisKeys) {
        self.galois_keys.insert(client_id, key);
    }

    /// Installs the raw database, replacing any previous one and invalidating the
    /// preprocessed form.
    ///
    /// # Arguments
    ///
    /// * `raw` - `item_count * item_byte_len` bytes, record `i` at `i * item_byte_len`.
    pub fn set_database(&mut self, raw: &[u8]) -> Result<(), PirError> {
        let expected_byte_len = self.pir_params.item_count() * self.pir_params.item_byte_len();
        if branch_opt_util::unlikely(raw.len() != expected_byte_len) {
            return Err(PirError::DatabaseShapeMismatch {
                expected_byte_len,
                actual_byte_len: raw.len(),
            });
        }

        self.raw_database = Some(raw.to_vec());
        self.encoded_database = None;
        Ok(())
    }

    /// Encodes the installed database into its multi-dimensional plaintext form. Must
    /// run once after every [`Self::set_database`], before any reply can be generated.
    pub fn preprocess_database(&mut self) -> Result<(), PirError> {
        let raw = self.raw_database.as_ref().ok_or(PirError::DatabaseNotSet)?;
        let encoded = database::encode_database(raw, &self.params, &self.pir_params)?;

        log::debug!("preprocessed database into {} plaintexts arranged {:?}", encoded.len(), self.pir_params.dimensions());
        self.encoded_database = Some(encoded);
        Ok(())
    }

    /// Parses a serialized query, validating its ciphertext count against the
    /// parameters.
    pub fn deserialize_query(&self, bytes: &[u8]) -> Result<PirQuery, PirError> {
        serialization::deserialize_query(bytes, &self.params, self.pir_params.query_ciphertext_count())
    }

    /// Evaluates a query against the preprocessed database.
    ///
    /// One pass per dimension: the dimension's query ciphertext is obliviously expanded
    /// into an encrypted one-hot selection vector of the dimension's extent, and every
    /// column of the current array is contracted against it. Between passes each
    /// resulting ciphertext is switched to the last modulus level and spread over
    /// `expansion_ratio` carrier plaintexts, which form the array of the next pass. The
    /// final pass yields the reply bundle, modulus-switched once more when the
    /// parameters ask for it.
    ///
    /// # Arguments
    ///
    /// * `query` - The query, one ciphertext per dimension.
    /// * `client_id` - Id under which the querying client registered its Galois keys.
    ///
    /// # Returns
    ///
    /// A reply of `expansion_ratio^(d - 1)` ciphertexts, or a state error when the
    /// database is not preprocessed or the client id is unknown.
    pub fn generate_reply(&self, query: &PirQuery, client_id: u32) -> Result<PirReply, PirError> {
        let encoded = self.encoded_database.as_ref().ok_or(PirError::DatabaseNotPreprocessed)?;
        let keys = self.galois_keys.get(&client_id).ok_or(PirError::UnknownClientId(client_id))?;

        let dimensions = self.pir_params.dimensions();
        if branch_opt_util::unlikely(query.ciphertexts.len() != dimensions.len()) {
            return Err(PirError::QueryCiphertextCountMismatch {
                expected: dimensions.len(),
                actual: query.ciphertexts.len(),
            });
        }

        let mut working: Vec<Plaintext> = Vec::new();

        for (k, (&extent, query_ct)) in dimensions.iter().zip(query.ciphertexts.iter()).enumerate() {
            let source: &[Plaintext] = if k == 0 { encoded } else { &working };
            let rest = source.len() / extent;

            // An extent of one needs no expansion; the query ciphertext already encrypts
            // the whole selection vector.
            let expanded = if extent == 1 { vec![query_ct.clone()] } else { keys.expands(query_ct, extent)? };
            log::debug!("dimension {}: expanded into {} selectors, contracting {} columns", k, extent, rest);

            // Column j of the dimension-major array is source[i * rest + j], i over the
            // extent.
            let mut products = (0..rest)
                .into_par_iter()
                .map(|j| Ok(dot_product_scalar(expanded.iter(), source.iter().skip(j).step_by(rest))?))
                .collect::<Result<Vec<Ciphertext>, PirError>>()?;

            if k == dimensions.len() - 1 {
                if self.pir_params.mod_switching() {
                    for ct in products.iter_mut() {
                        ct.mod_switch_to_last_level()?;
                    }
                }
                return Ok(PirReply { ciphertexts: products });
            }

            // The carrier digit lands least significant, keeping the next dimension as
            // the major axis.
            working = products
                .into_par_iter()
                .map(|mut ct| {
                    ct.mod_switch_to_last_level()?;
                    decomposition::decompose_to_plaintexts(&ct, &self.params)
                })
                .collect::<Result<Vec<Vec<Plaintext>>, PirError>>()?
                .into_iter()
                .flatten()
                .collect();
        }

        // Unreachable: the last dimension's pass always returns.
        Err(PirError::InvalidDimensionCount(0))
    }

    /// Serializes a reply for the wire.
    pub fn serialize_reply(&self, reply: &PirReply) -> Vec<u8> {
        serialization::serialize_reply(reply)
    }
}
