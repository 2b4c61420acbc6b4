use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use mph_toolkit::{Algo, Builder, PackedMphf};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

const N_KEYS: usize = 100_000;

fn make_keys(n: usize, seed: u64) -> Vec<[u8; 16]> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let mut k = [0u8; 16];
            rng.fill_bytes(&mut k);
            k
        })
        .collect()
}

/// BMZ8 is capped at 255 vertices and BRZ spills to disk, so both only
/// appear in the build benchmark.
const SEARCH_ALGOS: [Algo; 6] = [Algo::Chm, Algo::Bmz, Algo::Bdz, Algo::Chd, Algo::ChdPh, Algo::Fch];

fn bench_search(c: &mut Criterion) {
    let keys = make_keys(N_KEYS, 0xdead_beef);
    let mut group = c.benchmark_group("search");
    group.throughput(Throughput::Elements(N_KEYS as u64));

    for algo in SEARCH_ALGOS {
        let mph = Builder::new().with_algo(algo).build(&keys).unwrap();
        group.bench_with_input(BenchmarkId::new("native", algo), &mph, |b, mph| {
            b.iter(|| {
                let mut acc = 0u32;
                for k in &keys {
                    acc ^= mph.search(black_box(k));
                }
                acc
            })
        });

        let packed = mph.to_packed();
        let view = PackedMphf::new(&packed).unwrap();
        group.bench_with_input(BenchmarkId::new("packed", algo), &view, |b, view| {
            b.iter(|| {
                let mut acc = 0u32;
                for k in &keys {
                    acc ^= view.search(black_box(k));
                }
                acc
            })
        });
    }
    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let keys = make_keys(10_000, 7);
    let mut group = c.benchmark_group("build");
    group.sample_size(10);
    group.throughput(Throughput::Elements(keys.len() as u64));

    for algo in SEARCH_ALGOS.into_iter().chain([Algo::Brz]) {
        group.bench_function(BenchmarkId::from_parameter(algo), |b| {
            b.iter(|| Builder::new().with_algo(algo).build(black_box(&keys)).unwrap())
        });
    }
    let small = &keys[..200];
    group.bench_function(BenchmarkId::from_parameter(Algo::Bmz8), |b| {
        b.iter(|| Builder::new().with_algo(Algo::Bmz8).build(black_box(small)).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_search, bench_build);
criterion_main!(benches);
