#![cfg(test)]

use crate::{ErrorKind, PirError, PirParams, client::Client, generate_encryption_params, plaintext_byte_capacity, server::Server};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use test_case::test_case;

const DEGREE: usize = 4096;
const PLAINTEXT_BIT_LEN: usize = 20;

fn sample_database(item_count: usize, item_byte_len: usize, seed: u64) -> Vec<u8> {
    let mut raw = vec![0u8; item_count * item_byte_len];
    ChaCha8Rng::seed_from_u64(seed).fill_bytes(&mut raw);
    raw
}

fn assert_retrieves(item_count: usize, item_byte_len: usize, dimension_count: usize, symmetric: bool, batching: bool, mod_switching: bool, index: usize) {
    let params = generate_encryption_params(DEGREE, PLAINTEXT_BIT_LEN).unwrap();
    let pir_params = PirParams::new(item_count, item_byte_len, dimension_count, &params, symmetric, batching, mod_switching).unwrap();
    let raw = sample_database(item_count, item_byte_len, 0xba5e + index as u64);

    let mut server = Server::new(&params, &pir_params);
    server.set_database(&raw).unwrap();
    server.preprocess_database().unwrap();

    let client = Client::new(&params, &pir_params);
    server.set_galois_key(0, client.generate_galois_keys().unwrap());

    let query_bytes = client.generate_serialized_query(client.get_fv_index(index)).unwrap();
    let query = server.deserialize_query(&query_bytes).unwrap();
    let reply_bytes = server.serialize_reply(&server.generate_reply(&query, 0).unwrap());

    let reply = client.deserialize_reply(&reply_bytes).unwrap();
    let record = client.decode_reply(&reply, client.get_fv_offset(index)).unwrap();

    assert_eq!(record, &raw[index * item_byte_len..(index + 1) * item_byte_len]);
}

#[test_case(1, false, false)]
#[test_case(1, false, true)]
#[test_case(1, true, false)]
#[test_case(1, true, true)]
#[test_case(2, false, false)]
#[test_case(2, false, true)]
#[test_case(2, true, false)]
#[test_case(2, true, true)]
#[test_case(3, false, false)]
#[test_case(3, false, true)]
#[test_case(3, true, false)]
#[test_case(3, true, true)]
fn retrieves_record_across_dimensions_and_flags(dimension_count: usize, symmetric: bool, mod_switching: bool) {
    assert_retrieves(2000, 64, dimension_count, symmetric, true, mod_switching, 1234);
}

#[test]
fn retrieves_record_without_batching() {
    assert_retrieves(40, 64, 2, true, false, true, 39);
}

#[test]
fn retrieves_the_only_record_of_a_single_item_database() {
    assert_retrieves(1, 64, 1, true, true, true, 0);
    assert_retrieves(1, 64, 2, true, true, true, 0);
}

#[test]
fn retrieves_records_around_a_plaintext_boundary() {
    // 160 items of 64 bytes fill one plaintext exactly at this parameterization.
    assert_retrieves(160, 64, 2, true, true, true, 159);
    assert_retrieves(161, 64, 2, true, true, true, 160);
}

#[test]
fn retrieves_a_record_filling_a_whole_plaintext() {
    let params = generate_encryption_params(DEGREE, PLAINTEXT_BIT_LEN).unwrap();
    let item_byte_len = plaintext_byte_capacity(&params);

    assert_retrieves(4, item_byte_len, 2, true, true, true, 3);
}

#[test]
fn reply_generation_is_deterministic_for_a_fixed_query() {
    let params = generate_encryption_params(DEGREE, PLAINTEXT_BIT_LEN).unwrap();
    let pir_params = PirParams::new(500, 64, 2, &params, true, true, true).unwrap();
    let raw = sample_database(500, 64, 11);

    let mut server = Server::new(&params, &pir_params);
    server.set_database(&raw).unwrap();
    server.preprocess_database().unwrap();

    let client = Client::new(&params, &pir_params);
    server.set_galois_key(0, client.generate_galois_keys().unwrap());

    let query = client.generate_query(client.get_fv_index(321)).unwrap();
    let first = server.serialize_reply(&server.generate_reply(&query, 0).unwrap());
    let second = server.serialize_reply(&server.generate_reply(&query, 0).unwrap());

    assert_eq!(first, second);
}

#[test]
fn answers_concurrent_queries_from_a_shared_server() {
    let params = generate_encryption_params(DEGREE, PLAINTEXT_BIT_LEN).unwrap();
    let pir_params = PirParams::new(2000, 64, 2, &params, true, true, true).unwrap();
    let raw = sample_database(2000, 64, 23);

    let mut server = Server::new(&params, &pir_params);
    server.set_database(&raw).unwrap();
    server.preprocess_database().unwrap();

    let client = Client::new(&params, &pir_params);
    server.set_galois_key(0, client.generate_galois_keys().unwrap());

    std::thread::scope(|scope| {
        for index in [3usize, 777, 1999] {
            let (server, client, raw) = (&server, &client, &raw);
            scope.spawn(move || {
                let query = client.generate_query(client.get_fv_index(index)).unwrap();
                let reply = server.generate_reply(&query, 0).unwrap();
                let record = client.decode_reply(&reply, client.get_fv_offset(index)).unwrap();

                assert_eq!(record, &raw[index * 64..(index + 1) * 64]);
            });
        }
    });
}

#[test]
fn preprocessing_requires_an_installed_database() {
    let params = generate_encryption_params(DEGREE, PLAINTEXT_BIT_LEN).unwrap();
    let pir_params = PirParams::new(100, 64, 2, &params, true, true, true).unwrap();

    let mut server = Server::new(&params, &pir_params);
    let err = server.preprocess_database().unwrap_err();

    assert_eq!(err, PirError::DatabaseNotSet);
    assert_eq!(err.kind(), ErrorKind::State);
}

#[test]
fn reply_generation_requires_preprocessing_and_known_client() {
    let params = generate_encryption_params(DEGREE, PLAINTEXT_BIT_LEN).unwrap();
    let pir_params = PirParams::new(100, 64, 2, &params, true, true, true).unwrap();
    let raw = sample_database(100, 64, 5);

    let client = Client::new(&params, &pir_params);
    let query = client.generate_query(0).unwrap();

    let mut server = Server::new(&params, &pir_params);
    server.set_database(&raw).unwrap();
    assert_eq!(server.generate_reply(&query, 0), Err(PirError::DatabaseNotPreprocessed));

    server.preprocess_database().unwrap();
    let err = server.generate_reply(&query, 7).unwrap_err();
    assert_eq!(err, PirError::UnknownClientId(7));
    assert_eq!(err.kind(), ErrorKind::State);
}

#[test]
fn installing_a_database_invalidates_the_preprocessed_form() {
    let params = generate_encryption_params(DEGREE, PLAINTEXT_BIT_LEN).unwrap();
    let pir_params = PirParams::new(100, 64, 2, &params, true, true, true).unwrap();
    let raw = sample_database(100, 64, 5);

    let client = Client::new(&params, &pir_params);
    let query = client.generate_query(0).unwrap();

    let mut server = Server::new(&params, &pir_params);
    server.set_database(&raw).unwrap();
    server.preprocess_database().unwrap();
    server.set_database(&raw).unwrap();

    assert_eq!(server.generate_reply(&query, 0), Err(PirError::DatabaseNotPreprocessed));
}

#[test]
fn rejects_a_reply_stream_with_the_wrong_ciphertext_count() {
    let params = generate_encryption_params(DEGREE, PLAINTEXT_BIT_LEN).unwrap();
    let pir_params = PirParams::new(100, 64, 2, &params, true, true, true).unwrap();

    let client = Client::new(&params, &pir_params);
    let query_bytes = client.generate_serialized_query(0).unwrap();

    // A query stream carries one ciphertext per dimension, never a reply's worth.
    let err = client.deserialize_reply(&query_bytes).unwrap_err();
    assert!(matches!(err, PirError::ReplyCiphertextCountMismatch { .. }));
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[test]
fn rejects_queries_for_out_of_range_coordinates_and_offsets() {
    let params = generate_encryption_params(DEGREE, PLAINTEXT_BIT_LEN).unwrap();
    let pir_params = PirParams::new(2000, 64, 2, &params, true, true, true).unwrap();
    let raw = sample_database(2000, 64, 31);

    let mut server = Server::new(&params, &pir_params);
    server.set_database(&raw).unwrap();
    server.preprocess_database().unwrap();

    let client = Client::new(&params, &pir_params);
    server.set_galois_key(0, client.generate_galois_keys().unwrap());

    let err = client.generate_query(pir_params.num_plaintexts()).unwrap_err();
    assert!(matches!(err, PirError::CoordinateOutOfRange { .. }));

    let query = client.generate_query(0).unwrap();
    let reply = server.generate_reply(&query, 0).unwrap();
    let err = client.decode_reply(&reply, pir_params.elements_per_plaintext()).unwrap_err();

    assert!(matches!(err, PirError::OffsetOutOfRange { .. }));
    assert_eq!(err.kind(), ErrorKind::Decode);
}
