use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{Duration, TimeZone, Utc};
use custody_core::UserId;
use custody_events::{EventEnvelope, Hub, HubConfig, LiveDelivery, TransferData};
use custody_infra::audit::{
    Actor, AuditAction, AuditLedger, Changes, InMemoryLedgerBackend, NewAuditEvent,
};
use std::sync::Arc;

fn transfer_envelope(from: i64, to: i64) -> EventEnvelope {
    EventEnvelope::transfer_update(TransferData {
        transfer_id: 1,
        from_user_id: UserId::new(from),
        to_user_id: UserId::new(to),
        status: "approved".to_string(),
        serial_number: "W123".to_string(),
        item_name: "M4 Carbine".to_string(),
    })
}

fn bench_hub_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("hub_fan_out");

    for users in [1usize, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*users as u64));
        group.bench_with_input(BenchmarkId::new("send_to_each", users), users, |b, &count| {
            let hub = Hub::start(HubConfig::default()).unwrap();
            let receivers: Vec<_> = (0..count as i64)
                .map(|n| hub.connect(UserId::new(n)).unwrap())
                .collect();
            let envelope = transfer_envelope(0, 1);

            b.iter(|| {
                for n in 0..count as i64 {
                    black_box(hub.send_to_user(UserId::new(n), &envelope));
                }
                // Keep queues from filling up and evicting.
                for rx in &receivers {
                    rx.drain();
                }
            });
        });
    }

    group.bench_function("broadcast_routed_pair", |b| {
        let hub = Hub::start(HubConfig::default()).unwrap();
        let from = hub.connect(UserId::new(1)).unwrap();
        let to = hub.connect(UserId::new(2)).unwrap();
        let envelope = transfer_envelope(1, 2);

        b.iter(|| {
            black_box(hub.broadcast(&envelope));
            from.drain();
            to.drain();
        });
    });

    group.finish();
}

fn bench_ledger_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_append");

    for batch_size in [1, 10, 100].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("log_event", batch_size),
            batch_size,
            |b, &size| {
                let ledger = AuditLedger::new(Arc::new(InMemoryLedgerBackend::new()));
                let actor = Actor::new(UserId::new(7), "SSG Cole");

                b.iter(|| {
                    for i in 0..size {
                        let event = NewAuditEvent::new(
                            "property",
                            (i % 16).to_string(),
                            AuditAction::Update,
                            actor.clone(),
                        )
                        .with_changes(Changes::new().metadata("seq", i));
                        black_box(ledger.log_event(event).unwrap());
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_trail_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("trail_read");

    for record_count in [10, 100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::new("get_trail", record_count),
            record_count,
            |b, &count| {
                let ledger = AuditLedger::new(Arc::new(InMemoryLedgerBackend::new()));
                let actor = Actor::new(UserId::new(7), "SSG Cole");
                let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

                for i in 0..count {
                    ledger
                        .log_event(
                            NewAuditEvent::new("equipment", "N-1", AuditAction::View, actor.clone())
                                .at(base + Duration::seconds(i as i64)),
                        )
                        .unwrap();
                    // Unrelated noise the prefix scan must skip.
                    ledger
                        .log_event(
                            NewAuditEvent::new("equipment", "N-2", AuditAction::View, actor.clone())
                                .at(base + Duration::seconds(i as i64)),
                        )
                        .unwrap();
                }

                b.iter(|| black_box(ledger.get_trail("equipment", "N-1").unwrap()));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_hub_fan_out,
    bench_ledger_append,
    bench_trail_read
);
criterion_main!(benches);
