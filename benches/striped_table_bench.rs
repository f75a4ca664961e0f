use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::thread;
use std::time::Duration;
use striped_hashtable::{Handle, StripedHashTable};

// Enough buckets to keep chains short at these entry counts.
const BUCKETS: usize = 1024;

fn lcg(mut s: u64) -> impl Iterator<Item = u64> {
    std::iter::from_fn(move || {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        Some(s)
    })
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

fn table() -> StripedHashTable<String, u64> {
    StripedHashTable::with_buckets(BUCKETS).unwrap()
}

fn filled(seed: u64, n: usize) -> (StripedHashTable<String, u64>, Vec<String>) {
    let t = table();
    let keys: Vec<_> = lcg(seed).take(n).map(key).collect();
    for (i, k) in keys.iter().enumerate() {
        t.insert(k.clone(), i as u64);
    }
    (t, keys)
}

fn bench_insert_fresh_10k(c: &mut Criterion) {
    c.bench_function("striped::insert_fresh_10k", |b| {
        b.iter_batched(
            table,
            |t| {
                for (i, x) in lcg(1).take(10_000).enumerate() {
                    t.insert(key(x), i as u64);
                }
                black_box(t)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_get_hit_10k(c: &mut Criterion) {
    c.bench_function("striped::get_hit_10k_on_10k", |b| {
        let (t, keys) = filled(7, 10_000);
        let n = keys.len();
        let mut s = 0x9e3779b97f4a7c15u64;
        let queries: Vec<String> = (0..10_000)
            .map(|_| {
                s = s.wrapping_mul(2862933555777941757).wrapping_add(3037000493);
                keys[(s as usize) % n].clone()
            })
            .collect();
        b.iter(|| {
            for k in &queries {
                black_box(t.get(k.as_str()));
            }
        })
    });
}

fn bench_get_miss_10k(c: &mut Criterion) {
    c.bench_function("striped::get_miss_10k_on_10k", |b| {
        let (t, _) = filled(11, 10_000);
        let mut miss = lcg(0xdead_beef);
        b.iter(|| {
            for _ in 0..10_000 {
                let k = key(miss.next().unwrap());
                black_box(t.with(&k, |v| *v));
            }
        })
    });
}

fn bench_update_or_default(c: &mut Criterion) {
    c.bench_function("striped::update_or_default_10k_over_1k_keys", |b| {
        let keys: Vec<_> = lcg(13).take(1_000).map(key).collect();
        b.iter_batched(
            table,
            |t| {
                for k in keys.iter().cycle().take(10_000) {
                    t.update_or_default(k.clone(), |v| *v += 1);
                }
                black_box(t)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_handle_access_increment(c: &mut Criterion) {
    c.bench_function("striped::handle_access_increment_10k", |b| {
        let t = table();
        let handles: Vec<Handle> = lcg(123)
            .take(10_000)
            .enumerate()
            .map(|(i, x)| t.insert(key(x), i as u64))
            .collect();
        b.iter(|| {
            for h in &handles {
                h.with_mut(&t, |v| *v = v.wrapping_add(1));
            }
        })
    });
}

fn bench_parallel_insert(c: &mut Criterion) {
    for threads in [1usize, 4, 8] {
        let name = format!("striped::parallel_insert_40k_{}_threads", threads);
        c.bench_function(&name, |b| {
            b.iter_batched(
                table,
                |t| {
                    let per = 40_000 / threads;
                    thread::scope(|s| {
                        for w in 0..threads {
                            let t = &t;
                            s.spawn(move || {
                                for (i, x) in lcg(w as u64 + 1).take(per).enumerate() {
                                    t.insert(key(x), i as u64);
                                }
                            });
                        }
                    });
                    black_box(t)
                },
                BatchSize::SmallInput,
            )
        });
    }
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(12)
        .measurement_time(Duration::from_secs(5))
        .warm_up_time(Duration::from_secs(1))
}

criterion_group! {
    name = benches_insert;
    config = bench_config();
    targets = bench_insert_fresh_10k, bench_parallel_insert
}
criterion_group! {
    name = benches_ops;
    config = bench_config();
    targets = bench_get_hit_10k,
              bench_get_miss_10k,
              bench_update_or_default,
              bench_handle_access_increment
}
criterion_main!(benches_insert, benches_ops);
