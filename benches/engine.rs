use criterion::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tempfile::TempDir;
use vecd::VectorStore;

static WRITE_SEED: u64 = 12345;
static READ_SEED: u64 = 67890;

const VECTOR_SIZE: i32 = 100;

fn gen_accesses(seed: u64) -> Vec<(i32, i32)> {
    let mut rng: StdRng = SeedableRng::seed_from_u64(seed);

    (0..100)
        .map(|_| (rng.gen_range(0, VECTOR_SIZE), rng.gen_range(-1000, 1000)))
        .collect()
}

fn new_store(path: &std::path::Path) -> VectorStore {
    let store = VectorStore::open(path).expect("can't open store");
    store.create("bench", VECTOR_SIZE).expect("create failed");
    store
}

fn write_bench(c: &mut Criterion) {
    let data = gen_accesses(WRITE_SEED);
    let temp = TempDir::new().expect("can't open tempdir");

    c.bench_function("write vector elements", move |b| {
        let store = new_store(temp.path());
        b.iter_batched(
            || data.clone(),
            |data| {
                for (pos, value) in data {
                    store.set("bench", pos, value).expect("write failed");
                }
            },
            BatchSize::SmallInput,
        )
    });
}

fn read_bench(c: &mut Criterion) {
    let data = gen_accesses(READ_SEED);
    let temp = TempDir::new().expect("can't open tempdir");

    c.bench_function("read vector elements", move |b| {
        let store = new_store(temp.path());
        // Write in the values before reading them
        for &(pos, value) in &data {
            store.set("bench", pos, value).expect("write failed");
        }
        b.iter_batched(
            || data.clone(),
            |data| {
                for (pos, _) in data {
                    store.get("bench", pos).expect("read failed");
                }
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, write_bench, read_bench);
criterion_main!(benches);
