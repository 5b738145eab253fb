use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};

use datastore::bulk::{chunk_commands, encode_rows, ColumnMapping, DEFAULT_CHUNK_SIZE};
use datastore::partition::fingerprint;
use datastore::{ColumnDef, KeyValues, LogicalTable, Record, Value};

fn gen_records(n: usize, seed: u64) -> Vec<Record> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let mut r = Record::new();
            r.insert("ID", i as i64);
            r.insert("REGION", ["eu", "us", "apac"][rng.gen_range(0..3)]);
            r.insert("AMOUNT", rng.gen::<f64>() * 1000.0);
            if rng.gen_bool(0.1) {
                r.insert("NOTE", Value::Null);
            } else {
                r.insert("NOTE", format!("n{}", rng.gen::<u32>()));
            }
            r
        })
        .collect()
}

fn bench_bulk(c: &mut Criterion) {
    let ns = [10_000usize, 100_000usize];
    let columns: Vec<String> = ["ID", "REGION", "AMOUNT", "NOTE"].iter().map(|s| s.to_string()).collect();
    let mut group = c.benchmark_group("bulk_copy");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(20);

    for &n in &ns {
        let records = gen_records(n, 0xBEEF_CAFE);
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("encode_rows", n.to_string()), &n, |b, _| {
            b.iter(|| {
                let lines = encode_rows(&records, &columns, &ColumnMapping::new()).unwrap();
                criterion::black_box(lines);
            });
        });

        // Mapped source keys go through a case-insensitive lookup per field
        let mut mapping = ColumnMapping::new();
        mapping.insert("NOTE".into(), "note".into());
        group.bench_with_input(BenchmarkId::new("encode_rows_mapped", n.to_string()), &n, |b, _| {
            b.iter(|| {
                let lines = encode_rows(&records, &columns, &mapping).unwrap();
                criterion::black_box(lines);
            });
        });

        let lines = encode_rows(&records, &columns, &ColumnMapping::new()).unwrap();
        for chunk in [500usize, DEFAULT_CHUNK_SIZE] {
            group.bench_with_input(BenchmarkId::new(format!("chunk_{}", chunk), n.to_string()), &n, |b, _| {
                b.iter(|| {
                    let cmds = chunk_commands("SALES", &columns, &lines, chunk);
                    criterion::black_box(cmds);
                });
            });
        }

        group.bench_with_input(BenchmarkId::new("fingerprint", n.to_string()), &n, |b, _| {
            let kvs: Vec<KeyValues> = records
                .iter()
                .map(|r| {
                    let mut kv = KeyValues::new();
                    kv.insert("REGION".into(), r.get("REGION").cloned().unwrap_or(Value::Null));
                    kv
                })
                .collect();
            let table = LogicalTable::new("SALES", vec![ColumnDef::new("REGION", "VARCHAR(8)")], vec!["REGION".into()]);
            b.iter(|| {
                let mut total = 0usize;
                for kv in &kvs { total += fingerprint(&table, kv).len(); }
                criterion::black_box(total);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_bulk);
criterion_main!(benches);
