use mph_toolkit::{Algo, BuildConfig, Builder, HashKind, HashState, KeyHasher, MphError, PackedMphf};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::HashSet;
use std::env;
use std::time::Instant;

const N_KEYS: usize = 1_000_000;
const GEN_SEED: u64 = 42;

fn main() -> Result<(), MphError> {
    let algo = match env::args().nth(1) {
        Some(name) => name.parse()?,
        None => Algo::Bdz,
    };
    println!("--- mph_toolkit: {algo} ---");
    println!("n = {N_KEYS}");

    // 1) Generate unique keys
    let t0 = Instant::now();
    let keys = gen_unique_keys(N_KEYS, GEN_SEED);
    let gen_s = t0.elapsed().as_secs_f64();
    println!(
        "gen:    {:>8.3} s   ({:.1} M keys/s)",
        gen_s,
        N_KEYS as f64 / gen_s / 1e6
    );

    // 2) Raw hashing cost, for scale: one hash vector per key
    let t1 = Instant::now();
    let h = HashState::with_seed(HashKind::Jenkins, 0x5eed);
    let mut acc = 0u32;
    for k in &keys {
        acc ^= h.hash_vector(k)[2];
    }
    let hash_s = t1.elapsed().as_secs_f64();
    println!(
        "hash:   {:>8.3} s   ({:.1} M keys/s)   (acc={acc})",
        hash_s,
        N_KEYS as f64 / hash_s / 1e6
    );

    // 3) Build
    let cfg = BuildConfig {
        // uniqueness is guaranteed by construction
        reject_duplicates: false,
        ..BuildConfig::new(algo)
    };
    let t2 = Instant::now();
    let mph = Builder::new().with_config(cfg).build(&keys)?;
    let build_s = t2.elapsed().as_secs_f64();
    println!(
        "build:  {:>8.3} s   ({:.1} M keys/s)",
        build_s,
        N_KEYS as f64 / build_s / 1e6
    );

    // 4) Lookup all keys, native then packed
    let t3 = Instant::now();
    let mut acc: u64 = 0;
    for chunk in keys.chunks(32_768) {
        for k in chunk {
            acc ^= mph.search(k) as u64;
        }
    }
    let lookup_s = t3.elapsed().as_secs_f64();
    println!(
        "lookup: {:>8.3} s   ({:.1} M lookups/s)   (acc={acc})",
        lookup_s,
        N_KEYS as f64 / lookup_s / 1e6
    );

    let packed = mph.to_packed();
    let view = PackedMphf::new(&packed)?;
    let t4 = Instant::now();
    let mut acc: u64 = 0;
    for k in &keys {
        acc ^= view.search(k) as u64;
    }
    let packed_s = t4.elapsed().as_secs_f64();
    println!(
        "packed: {:>8.3} s   ({:.1} M lookups/s)   ({} bytes, {:.2} bits/key, acc={acc})",
        packed_s,
        N_KEYS as f64 / packed_s / 1e6,
        packed.len(),
        packed.len() as f64 * 8.0 / N_KEYS as f64
    );

    let t5 = Instant::now();
    let batch = mph.search_batch(&keys);
    let batch_s = t5.elapsed().as_secs_f64();
    println!(
        "batch:  {:>8.3} s   ({:.1} M lookups/s)   ({} results)",
        batch_s,
        N_KEYS as f64 / batch_s / 1e6,
        batch.len()
    );

    println!("----------------------------------------------");
    println!(
        "Total (gen + hash + build + lookup): {:.3} s",
        gen_s + hash_s + build_s + lookup_s
    );

    Ok(())
}

/// Generate N unique 16-byte keys (raw bytes), deterministically.
fn gen_unique_keys(n: usize, seed: u64) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut set = HashSet::with_capacity(n * 2);
    let mut keys = Vec::with_capacity(n);
    while keys.len() < n {
        let mut buf = [0u8; 16];
        rng.fill_bytes(&mut buf);
        if set.insert(buf) {
            keys.push(buf.to_vec());
        }
    }
    keys
}
