//! Single-server private information retrieval over the BFV homomorphic encryption
//! scheme.
//!
//! A database of fixed-size records is packed into plaintext polynomials and arranged
//! along `d` dimensions. The client sends one small ciphertext per dimension; the server
//! obliviously expands each into an encrypted one-hot selection vector and contracts the
//! database against them, dimension by dimension, without ever learning the selected
//! index. The client decrypts the reply bundle back into the record bytes.
//!
//! Both sides must agree, out of band, on the encryption parameters, the PIR parameters
//! and the database shape. The server additionally needs each client's Galois keys,
//! registered once under a client id, to perform the oblivious expansion.
//!
//! ```
//! use rand::{Rng, thread_rng};
//! use sealpir::{PirParams, client::Client, generate_encryption_params, server::Server};
//!
//! const ITEM_COUNT: usize = 1000;
//! const ITEM_BYTE_LEN: usize = 32;
//!
//! fn main() -> Result<(), sealpir::PirError> {
//!     let params = generate_encryption_params(4096, 20)?;
//!     let pir_params = PirParams::new(ITEM_COUNT, ITEM_BYTE_LEN, 2, &params, true, true, true)?;
//!
//!     let mut raw = vec![0u8; ITEM_COUNT * ITEM_BYTE_LEN];
//!     thread_rng().fill(&mut raw[..]);
//!
//!     let mut server = Server::new(&params, &pir_params);
//!     server.set_database(&raw)?;
//!     server.preprocess_database()?;
//!
//!     let client = Client::new(&params, &pir_params);
//!     server.set_galois_key(0, client.generate_galois_keys()?);
//!
//!     let index = 713;
//!     let query_bytes = client.generate_serialized_query(client.get_fv_index(index))?;
//!
//!     let query = server.deserialize_query(&query_bytes)?;
//!     let reply_bytes = server.serialize_reply(&server.generate_reply(&query, 0)?);
//!
//!     let reply = client.deserialize_reply(&reply_bytes)?;
//!     let record = client.decode_reply(&reply, client.get_fv_offset(index))?;
//!     assert_eq!(record, &raw[index * ITEM_BYTE_LEN..(index + 1) * ITEM_BYTE_LEN]);
//!
//!     Ok(())
//! }
//! ```

pub mod client;
mod pir_internals;
pub mod server;
mod test_pir;

pub use pir_internals::error::{ErrorKind, PirError};
pub use pir_internals::params::{PirParams, generate_encryption_params, plaintext_byte_capacity, verify_encryption_params};
pub use pir_internals::serialization::{PirQuery, PirReply};
