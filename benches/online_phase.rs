use divan::Bencher;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sealpir::{PirParams, client::Client, server::Server, generate_encryption_params};
use std::fmt::Display;

fn main() {
    divan::main();
}

const DEGREE: usize = 4096;
const PLAINTEXT_BIT_LEN: usize = 20;

struct DbConfig {
    item_count: usize,
    item_byte_len: usize,
    dimension_count: usize,
}

impl Display for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} x {}B / d={}", self.item_count, self.item_byte_len, self.dimension_count)
    }
}

const DB_CONFIGS: [DbConfig; 3] = [
    DbConfig {
        item_count: 1 << 14,
        item_byte_len: 288,
        dimension_count: 2,
    },
    DbConfig {
        item_count: 1 << 16,
        item_byte_len: 64,
        dimension_count: 2,
    },
    DbConfig {
        item_count: 1 << 16,
        item_byte_len: 288,
        dimension_count: 3,
    },
];

struct Session {
    server: Server,
    client: Client,
    index: usize,
}

fn setup(cfg: &DbConfig) -> Session {
    let params = generate_encryption_params(DEGREE, PLAINTEXT_BIT_LEN).unwrap();
    let pir_params = PirParams::new(cfg.item_count, cfg.item_byte_len, cfg.dimension_count, &params, true, true, true).unwrap();

    let mut raw = vec![0u8; cfg.item_count * cfg.item_byte_len];
    ChaCha8Rng::seed_from_u64(0xdb).fill_bytes(&mut raw);

    let mut server = Server::new(&params, &pir_params);
    server.set_database(&raw).unwrap();
    server.preprocess_database().unwrap();

    let client = Client::new(&params, &pir_params);
    server.set_galois_key(0, client.generate_galois_keys().unwrap());

    Session {
        server,
        client,
        index: cfg.item_count / 2,
    }
}

#[divan::bench(args = &DB_CONFIGS)]
fn query_generation(bencher: Bencher, cfg: &DbConfig) {
    let session = setup(cfg);
    let fv_index = session.client.get_fv_index(session.index);

    bencher.bench_local(|| session.client.generate_serialized_query(fv_index).unwrap());
}

#[divan::bench(args = &DB_CONFIGS)]
fn reply_generation(bencher: Bencher, cfg: &DbConfig) {
    let session = setup(cfg);
    let query = session.client.generate_query(session.client.get_fv_index(session.index)).unwrap();

    bencher.bench_local(|| session.server.generate_reply(&query, 0).unwrap());
}

#[divan::bench(args = &DB_CONFIGS)]
fn reply_decoding(bencher: Bencher, cfg: &DbConfig) {
    let session = setup(cfg);
    let query = session.client.generate_query(session.client.get_fv_index(session.index)).unwrap();
    let reply = session.server.generate_reply(&query, 0).unwrap();
    let fv_offset = session.client.get_fv_offset(session.index);

    bencher.bench_local(|| session.client.decode_reply(&reply, fv_offset).unwrap());
}
