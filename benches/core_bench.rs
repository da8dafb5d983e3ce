use criterion::{black_box, criterion_group, criterion_main, Criterion};
use keyid_forge::residue::{inverse_mod_2_32, multiple_range, ResidueSolver};
use keyid_forge::sampling::{self, OffsetShuffle};
use keyid_forge::{KeySpec, SearchConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rug::Integer;

fn bench_inverse_mod_2_32(c: &mut Criterion) {
    c.bench_function("inverse_mod_2_32", |b| {
        b.iter(|| inverse_mod_2_32(black_box(0xaa66_150f)));
    });
}

fn bench_partner_residue(c: &mut Criterion) {
    let solver = ResidueSolver::new(0x3716_ee6b).unwrap();
    c.bench_function("partner_residue", |b| {
        b.iter(|| solver.partner_residue(black_box(0x8765_4321)));
    });
}

fn bench_multiple_range(c: &mut Criterion) {
    c.bench_function("multiple_range(1536)", |b| {
        b.iter(|| multiple_range(black_box(1536), black_box(0x1234_5679)));
    });
}

fn bench_has_small_factor(c: &mut Criterion) {
    // 2^127 - 1 (Mersenne prime, no small factors)
    let prime = (Integer::from(1u32) << 127u32) - 1u32;
    c.bench_function("has_small_factor(M127)", |b| {
        b.iter(|| sampling::has_small_factor(black_box(&prime)));
    });
}

fn bench_screened_miller_rabin(c: &mut Criterion) {
    let prime = (Integer::from(1u32) << 127u32) - 1u32;
    c.bench_function("screened_miller_rabin(M127, 25)", |b| {
        b.iter(|| sampling::screened_miller_rabin(black_box(&prime), black_box(25)));
    });
}

fn bench_offset_shuffle(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(2);
    c.bench_function("offset_shuffle(4096)", |b| {
        b.iter(|| {
            let mut shuffle = OffsetShuffle::new(black_box(4096));
            while shuffle.draw(&mut rng).is_some() {}
        });
    });
}

fn bench_generate_512(c: &mut Criterion) {
    let spec = KeySpec::new("bench", 0xaa66_150f, 512, 3);
    let config = SearchConfig::default();
    let mut rng = StdRng::seed_from_u64(1);
    let mut group = c.benchmark_group("generate");
    group.sample_size(10);
    group.bench_function("512-bit", |b| {
        b.iter(|| keyid_forge::generate(black_box(&spec), &config, &mut rng).unwrap());
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_inverse_mod_2_32,
    bench_partner_residue,
    bench_multiple_range,
    bench_has_small_factor,
    bench_screened_miller_rabin,
    bench_offset_shuffle,
    bench_generate_512,
);
criterion_main!(benches);
