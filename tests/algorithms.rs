use mph_toolkit::{
    Algo, BuildConfig, Builder, HashKind, MphError, Mphf, NlFileKeys, PackedMphf, StructVecKeys,
    search_packed,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::io::Cursor;

/// `n` distinct keys of 4 to 20 random bytes.
fn random_keys(n: usize, seed: u64) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut seen = HashSet::with_capacity(n);
    let mut keys = Vec::with_capacity(n);
    while keys.len() < n {
        let len = rng.gen_range(4..=20);
        let key: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
        if seen.insert(key.clone()) {
            keys.push(key);
        }
    }
    keys
}

/// BMZ8 caps the graph at 255 vertices.
fn key_count(algo: Algo) -> usize {
    match algo {
        Algo::Bmz8 => 200,
        _ => 3000,
    }
}

fn build(algo: Algo, keys: &[Vec<u8>]) -> Mphf {
    Builder::new()
        .with_algo(algo)
        .build(keys)
        .unwrap_or_else(|e| panic!("{algo}: {e}"))
}

fn assert_injective(mph: &Mphf, keys: &[Vec<u8>]) {
    let size = mph.size() as usize;
    if mph.algo().is_minimal() {
        assert_eq!(size, keys.len(), "{}", mph.algo());
    } else {
        assert!(size >= keys.len(), "{}", mph.algo());
    }
    let mut seen = vec![false; size];
    for k in keys {
        let i = mph.search(k) as usize;
        assert!(i < size, "{}: {i} out of range {size}", mph.algo());
        assert!(!seen[i], "{}: index {i} hit twice", mph.algo());
        seen[i] = true;
    }
}

#[test]
fn every_algorithm_is_a_bijection() {
    for algo in Algo::ALL {
        let keys = random_keys(key_count(algo), 0xB1 + algo.tag() as u64);
        let mph = build(algo, &keys);
        assert_eq!(mph.algo(), algo);
        assert_injective(&mph, &keys);
    }
}

#[test]
fn dump_and_load_round_trip() {
    for algo in Algo::ALL {
        let keys = random_keys(key_count(algo), 7);
        let mph = build(algo, &keys);
        let mut buf = Vec::new();
        mph.dump(&mut buf).unwrap();
        assert!(buf.starts_with(algo.name().as_bytes()), "{algo}");

        let loaded = Mphf::load(&mut buf.as_slice()).unwrap();
        assert_eq!(loaded.size(), mph.size());
        for k in &keys {
            assert_eq!(loaded.search(k), mph.search(k), "{algo}");
        }
    }
}

#[test]
fn packed_search_matches_search() {
    for algo in Algo::ALL {
        let keys = random_keys(key_count(algo), 11);
        let mph = build(algo, &keys);
        let packed = mph.to_packed();
        assert_eq!(packed.len(), mph.packed_size(), "{algo}");

        // Relocate the buffer to show it carries no absolute addresses.
        let moved = packed.clone();
        drop(packed);
        let view = PackedMphf::new(&moved).unwrap();
        assert_eq!(view.algo(), algo);
        for k in &keys {
            let expected = mph.search(k);
            assert_eq!(search_packed(&moved, k), expected, "{algo}");
            assert_eq!(view.search(k), expected, "{algo}");
        }
    }
}

#[test]
fn same_config_gives_identical_dumps() {
    for algo in Algo::ALL {
        let keys = random_keys(key_count(algo), 23);
        let dump = |mph: &Mphf| {
            let mut buf = Vec::new();
            mph.dump(&mut buf).unwrap();
            buf
        };
        let a = dump(&build(algo, &keys));
        let b = dump(&build(algo, &keys));
        assert_eq!(a, b, "{algo}");
    }
}

#[test]
fn foo_bar_baz() {
    let keys = ["foo", "bar", "baz"];
    for algo in Algo::ALL {
        let mph = Builder::new().with_algo(algo).build(&keys).unwrap();
        let ids: HashSet<u32> = keys.iter().map(|k| mph.search_str(k)).collect();
        assert_eq!(ids.len(), 3, "{algo}");
        assert!(ids.iter().all(|&i| i < mph.size()), "{algo}");
        if algo.is_minimal() {
            assert_eq!(mph.size(), 3, "{algo}");
        }
    }
}

#[test]
fn single_key() {
    for algo in Algo::ALL {
        let mph = Builder::new().with_algo(algo).build(&["lonely"]).unwrap();
        assert!(mph.search_str("lonely") < mph.size(), "{algo}");
        if algo.is_minimal() {
            assert_eq!(mph.search_str("lonely"), 0, "{algo}");
        }
    }
}

#[test]
fn hypergraph_methods_build_every_small_size() {
    for n in 3..=300 {
        let keys = random_keys(n, 0x5EED_0000 + n as u64);
        for algo in [Algo::Bdz, Algo::BdzPh] {
            assert_injective(&build(algo, &keys), &keys);
        }
    }
}

#[test]
fn hypergraph_methods_build_with_tight_retry_limits() {
    // seeds span the whole u32 range, so 30 attempts are plenty
    for (n, seed) in [(80, 1), (90, 2), (230, 3), (1200, 4)] {
        let keys = random_keys(n, seed);
        for algo in [Algo::Bdz, Algo::BdzPh] {
            let mut cfg = BuildConfig::new(algo);
            cfg.limits.bdz = 30;
            cfg.limits.bdz_ph = 30;
            let mph = Builder::new().with_config(cfg).build(&keys).unwrap();
            assert_injective(&mph, &keys);
        }
    }
}

#[test]
fn every_hash_kind_builds() {
    let keys = random_keys(1000, 31);
    for kind in HashKind::ALL {
        for algo in [Algo::Chm, Algo::Bdz, Algo::Chd, Algo::Fch] {
            let cfg = BuildConfig {
                hashes: vec![kind; 3],
                ..BuildConfig::new(algo)
            };
            let mph = Builder::new().with_config(cfg).build(&keys).unwrap();
            assert_injective(&mph, &keys);
        }
    }
}

#[test]
fn chd_ph_holds_several_keys_per_bin() {
    let keys = random_keys(2000, 41);
    let cfg = BuildConfig {
        keys_per_bin: 4,
        ..BuildConfig::new(Algo::ChdPh)
    };
    let mph = Builder::new().with_config(cfg).build(&keys).unwrap();
    let mut load = vec![0u32; mph.size() as usize];
    for k in &keys {
        load[mph.search(k) as usize] += 1;
    }
    assert!(load.iter().all(|&l| l <= 4));
    assert!(mph.size() < keys.len() as u32);
}

#[test]
fn bmz8_rejects_large_sets() {
    let keys = random_keys(300, 3);
    assert!(matches!(
        Builder::new().with_algo(Algo::Bmz8).build(&keys),
        Err(MphError::TooManyKeys { algo: Algo::Bmz8, .. })
    ));
}

#[test]
fn builds_from_newline_file() {
    let text = "alpha\nbeta\ngamma\ndelta\nepsilon\n";
    let mut src = NlFileKeys::new(Cursor::new(text.as_bytes())).unwrap();
    let mph = Builder::new()
        .with_algo(Algo::Bmz)
        .build_from(&mut src)
        .unwrap();
    assert_eq!(mph.size(), 5);
    let ids: HashSet<u32> = text.lines().map(|k| mph.search_str(k)).collect();
    assert_eq!(ids.len(), 5);
}

#[test]
fn builds_from_fixed_records() {
    // 12-byte records: u32 payload, then an 8-byte key.
    let mut records = Vec::new();
    for i in 0u64..500 {
        records.extend_from_slice(&(i as u32).to_le_bytes());
        records.extend_from_slice(&(i * 7919).to_le_bytes());
    }
    let mut src = StructVecKeys::new(&records, 12, 4, 8);
    let mph = Builder::new()
        .with_algo(Algo::Bdz)
        .build_from(&mut src)
        .unwrap();
    let keys: Vec<Vec<u8>> = records.chunks(12).map(|r| r[4..].to_vec()).collect();
    assert_injective(&mph, &keys);
}

#[test]
fn truncated_dump_is_an_io_error() {
    let keys = random_keys(500, 5);
    for algo in [Algo::Chm, Algo::Bdz, Algo::ChdPh, Algo::Fch] {
        let mut buf = Vec::new();
        build(algo, &keys).dump(&mut buf).unwrap();
        buf.truncate(buf.len() / 2);
        assert!(
            matches!(Mphf::load(&mut buf.as_slice()), Err(MphError::Io(_))),
            "{algo}"
        );
    }
}
