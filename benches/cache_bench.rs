use criterion::{black_box, criterion_group, criterion_main, Criterion};
use indexd::address::script_for_address;
use indexd::types::OutPointData;
use indexd::OutpointsRepository;

fn outpoint_data(n: u64) -> OutPointData {
    OutPointData {
        outpoint: format!("{:064x}:0", n),
        script_pubkey: script_for_address("IDX1benchaddr0"),
        money: n,
    }
}

fn bench_add_within_capacity(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().unwrap();
    let db = sled::open(dir.path().join("db")).unwrap();
    let repo = OutpointsRepository::new(&db, 100_000).unwrap();

    let mut n = 0u64;
    c.bench_function("add_within_capacity", |b| {
        b.iter(|| {
            repo.add_out_point_data(black_box(outpoint_data(n))).unwrap();
            n = (n + 1) % 50_000;
        })
    });
}

fn bench_add_with_eviction(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().unwrap();
    let db = sled::open(dir.path().join("db")).unwrap();
    let repo = OutpointsRepository::new(&db, 1_000).unwrap();

    let mut n = 0u64;
    c.bench_function("add_with_eviction", |b| {
        b.iter(|| {
            repo.add_out_point_data(black_box(outpoint_data(n))).unwrap();
            n += 1;
        })
    });
}

fn bench_cached_lookup(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().unwrap();
    let db = sled::open(dir.path().join("db")).unwrap();
    let repo = OutpointsRepository::new(&db, 10_000).unwrap();

    for n in 0..1_000u64 {
        repo.add_out_point_data(outpoint_data(n)).unwrap();
    }

    let mut n = 0u64;
    c.bench_function("cached_lookup", |b| {
        b.iter(|| {
            let key = format!("{:064x}:0", n % 1_000);
            black_box(repo.try_get_out_point_data(&key).unwrap());
            n += 1;
        })
    });
}

criterion_group!(
    benches,
    bench_add_within_capacity,
    bench_add_with_eviction,
    bench_cached_lookup
);
criterion_main!(benches);
