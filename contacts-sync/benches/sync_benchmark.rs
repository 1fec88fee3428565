use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;

use contacts_core::{ContactDraft, ContactId, ContactRecord};
use contacts_sync::broadcast::SnapshotBroadcast;
use contacts_sync::memory::MemoryCollection;
use contacts_sync::protocol::CollectionMessage;
use contacts_sync::remote::{Notification, RemoteCollection};

fn records(n: usize) -> Vec<ContactRecord> {
    (0..n)
        .map(|i| {
            ContactRecord::new(
                ContactId::new(),
                format!("Contact {i}"),
                format!("Company {}", i % 13),
                "Eng",
            )
        })
        .collect()
}

fn bench_snapshot_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("Snapshot Codec");
    for size in [10usize, 100, 1_000] {
        let msg = CollectionMessage::Snapshot {
            subscription_id: 1,
            sequence: 42,
            records: records(size),
        };
        let encoded = msg.encode().unwrap();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("encode_{size}"), |b| {
            b.iter(|| black_box(black_box(&msg).encode().unwrap()))
        });
        group.bench_function(format!("decode_{size}"), |b| {
            b.iter(|| black_box(CollectionMessage::decode(black_box(&encoded)).unwrap()))
        });
    }
    group.finish();
}

fn bench_broadcast_fanout(c: &mut Criterion) {
    let broadcast = SnapshotBroadcast::new(1024);
    let mut receivers: Vec<_> = (0..100).map(|_| broadcast.subscribe()).collect();
    let notification = Notification::new(1, records(100));

    c.bench_function("broadcast_100_subscribers", |b| {
        b.iter(|| {
            black_box(broadcast.publish(notification.clone()));
            for rx in receivers.iter_mut() {
                black_box(rx.try_recv().unwrap());
            }
        })
    });
}

fn bench_memory_write(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = Arc::new(MemoryCollection::default());
    let _subscriptions: Vec<_> = rt.block_on(async {
        let mut subs = Vec::new();
        for _ in 0..10 {
            subs.push(store.subscribe("contacts").await.unwrap());
        }
        subs
    });

    // Create then delete so the collection size stays constant
    c.bench_function("memory_write_10_subscribers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let id = store
                    .create("contacts", ContactDraft::new("Ann", "Acme", "PM"))
                    .await
                    .unwrap();
                store.delete("contacts", black_box(id)).await.unwrap();
            })
        })
    });
}

criterion_group!(
    benches,
    bench_snapshot_encode,
    bench_broadcast_fanout,
    bench_memory_write,
);
criterion_main!(benches);
