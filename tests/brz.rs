use mph_toolkit::{Algo, BuildConfig, Builder, MphError, Mphf, RetryLimits, search_packed};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

const N_KEYS: usize = 10_000;

fn random_keys(n: usize, seed: u64) -> Vec<[u8; 8]> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut seen = HashSet::with_capacity(n);
    let mut keys = Vec::with_capacity(n);
    while keys.len() < n {
        let mut buf = [0u8; 8];
        rng.fill_bytes(&mut buf);
        if seen.insert(buf) {
            keys.push(buf);
        }
    }
    keys
}

/// 4 KiB buffers hold about 340 records of `[u32 len][8-byte key]`, so
/// 10k keys take around 30 runs.
fn small_budget(c: f64, tmp: &Path) -> BuildConfig {
    BuildConfig {
        c,
        memory_budget: 4096,
        tmp_dir: Some(tmp.to_path_buf()),
        ..BuildConfig::new(Algo::Brz)
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).unwrap().next().is_none()
}

fn unwrap_brz(mph: &Mphf) -> &mph_toolkit::Brz {
    match mph {
        Mphf::Brz(brz) => brz,
        other => panic!("expected brz, got {}", other.algo()),
    }
}

#[test]
fn spilled_build_is_minimal_and_cleans_up() {
    let tmp = tempfile::tempdir().unwrap();
    let keys = random_keys(N_KEYS, 1);
    assert!(N_KEYS * 12 > 2 * 4096);

    for (c, solver) in [(0.0, Algo::Bmz8), (2.6, Algo::Fch)] {
        let mph = Builder::new()
            .with_config(small_budget(c, tmp.path()))
            .build(&keys)
            .unwrap();
        assert!(is_empty_dir(tmp.path()), "spill files left behind");

        let brz = unwrap_brz(&mph);
        assert_eq!(brz.bucket_algo(), solver);
        assert_eq!(brz.nbuckets(), N_KEYS.div_ceil(128) as u32);
        assert_eq!(mph.size(), N_KEYS as u32);

        let mut seen = vec![false; N_KEYS];
        for k in &keys {
            let i = mph.search(k) as usize;
            assert!(i < N_KEYS && !seen[i], "c={c} i={i}");
            seen[i] = true;
        }
    }
}

#[test]
fn spilled_build_round_trips() {
    let tmp = tempfile::tempdir().unwrap();
    let keys = random_keys(N_KEYS, 2);
    let mph = Builder::new()
        .with_config(small_budget(0.0, tmp.path()))
        .build(&keys)
        .unwrap();

    let mut dump = Vec::new();
    mph.dump(&mut dump).unwrap();
    assert!(dump.starts_with(b"brz\0"));
    let loaded = Mphf::load(&mut dump.as_slice()).unwrap();
    assert_eq!(loaded, mph);

    let packed = mph.to_packed();
    assert_eq!(packed.len(), mph.packed_size());
    for k in &keys {
        assert_eq!(search_packed(&packed, k), mph.search(k));
    }
}

#[test]
fn budget_does_not_change_the_function() {
    let tmp = tempfile::tempdir().unwrap();
    let keys = random_keys(3000, 3);
    let spilled = Builder::new()
        .with_config(small_budget(0.0, tmp.path()))
        .build(&keys)
        .unwrap();
    let in_memory = Builder::new()
        .with_config(BuildConfig {
            tmp_dir: Some(tmp.path().to_path_buf()),
            ..BuildConfig::new(Algo::Brz)
        })
        .build(&keys)
        .unwrap();
    assert_eq!(spilled, in_memory);
}

#[test]
fn too_many_flushes() {
    let tmp = tempfile::tempdir().unwrap();
    let keys = random_keys(2000, 4);
    let cfg = BuildConfig {
        limits: RetryLimits {
            brz_max_flushes: 3,
            ..RetryLimits::default()
        },
        ..small_budget(0.0, tmp.path())
    };
    match Builder::new().with_config(cfg).build(&keys) {
        Err(MphError::TooManyFlushes { limit, flushes }) => {
            assert_eq!(limit, 3);
            assert!(flushes > limit);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(is_empty_dir(tmp.path()));
}

#[test]
fn tiny_sets_build_with_either_solver() {
    let tmp = tempfile::tempdir().unwrap();
    for n in 1..=6 {
        let keys = random_keys(n, 100 + n as u64);
        for c in [0.0, 2.6] {
            let cfg = BuildConfig {
                c,
                tmp_dir: Some(tmp.path().to_path_buf()),
                ..BuildConfig::new(Algo::Brz)
            };
            let mph = Builder::new()
                .with_config(cfg)
                .build(&keys)
                .unwrap_or_else(|e| panic!("n={n} c={c}: {e}"));
            assert_eq!(mph.size(), n as u32);
            let ids: HashSet<u32> = keys.iter().map(|k| mph.search(k)).collect();
            assert_eq!(ids.len(), n, "n={n} c={c}");
        }
    }
}

#[test]
fn bucket_size_is_clamped() {
    let tmp = tempfile::tempdir().unwrap();
    let keys = random_keys(1000, 5);
    for (b, nbuckets) in [(0, 8), (64, 8), (100, 10), (200, 8)] {
        let cfg = BuildConfig {
            b,
            tmp_dir: Some(tmp.path().to_path_buf()),
            ..BuildConfig::new(Algo::Brz)
        };
        let mph = Builder::new().with_config(cfg).build(&keys).unwrap();
        assert_eq!(unwrap_brz(&mph).nbuckets(), nbuckets, "b={b}");
    }
}
