use divan::Bencher;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sealpir::{PirParams, client::Client, generate_encryption_params, server::Server};
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

fn sample_database(item_count: usize, item_byte_len: usize) -> Vec<u8> {
    let mut raw = vec![0u8; item_count * item_byte_len];
    ChaCha8Rng::seed_from_u64(0xdb).fill_bytes(&mut raw);
    raw
}

#[divan::bench]
fn encryption_parameter_derivation(bencher: Bencher) {
    bencher.bench_local(|| generate_encryption_params(DEGREE, PLAINTEXT_BIT_LEN).unwrap());
}

#[divan::bench(args = &DB_CONFIGS)]
fn database_preprocessing(bencher: Bencher, cfg: &DbConfig) {
    let params = generate_encryption_params(DEGREE, PLAINTEXT_BIT_LEN).unwrap();
    let pir_params = PirParams::new(cfg.item_count, cfg.item_byte_len, cfg.dimension_count, &params, true, true, true).unwrap();
    let raw = sample_database(cfg.item_count, cfg.item_byte_len);

    bencher
        .with_inputs(|| {
            let mut server = Server::new(&params, &pir_params);
            server.set_database(&raw).unwrap();
            server
        })
        .bench_local_values(|mut server| {
            server.preprocess_database().unwrap();
            server
        });
}

#[divan::bench(args = &DB_CONFIGS)]
fn galois_key_generation(bencher: Bencher, cfg: &DbConfig) {
    let params = generate_encryption_params(DEGREE, PLAINTEXT_BIT_LEN).unwrap();
    let pir_params = PirParams::new(cfg.item_count, cfg.item_byte_len, cfg.dimension_count, &params, true, true, true).unwrap();
    let client = Client::new(&params, &pir_params);

    bencher.bench_local(|| client.generate_galois_keys().unwrap());
}
