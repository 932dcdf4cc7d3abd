use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use docragdb::{DocStore, DocumentRecord, WriteBatch};
use tempfile::TempDir;

fn record(i: usize) -> DocumentRecord {
    let now = Utc::now();
    DocumentRecord {
        id: format!("doc-{}", i),
        work_id: format!("work-{}", i % 10),
        content: "x".repeat(1024),
        saved_at: now,
        last_accessed: now,
        size_bytes: 1026,
    }
}

fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_1kb", |b| {
        let dir = TempDir::new().unwrap();
        let db = DocStore::open(dir.path()).unwrap();

        let mut counter = 0;
        b.iter(|| {
            let mut batch = WriteBatch::new();
            batch.put_document(record(counter % 100));
            black_box(db.commit(batch).unwrap());
            counter += 1;
        });
    });
    group.finish();
}

fn bench_oldest_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");
    group.sample_size(50);

    group.bench_function("oldest_half_of_1000", |b| {
        let dir = TempDir::new().unwrap();
        let db = DocStore::open(dir.path()).unwrap();

        let mut batch = WriteBatch::new();
        for i in 0..1000 {
            batch.put_document(record(i));
        }
        db.commit(batch).unwrap();

        b.iter(|| {
            let ids = db
                .read(|t| {
                    t.oldest_documents()
                        .take(500)
                        .map(|r| r.id.clone())
                        .collect::<Vec<_>>()
                })
                .unwrap();
            black_box(ids);
        });
    });
    group.finish();
}

criterion_group!(benches, bench_commit, bench_oldest_scan);
criterion_main!(benches);
