//! # Fan-out Integration Tests
//!
//! Concurrency properties of the mutation pipeline and subscriber registry.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use lib_common::core::{DispatchError, DispatcherLimits};
use lib_common::records::{
    ChangeKind, ChangePayload, ListParams, MemoryRecordStore, RecordError, RecordService,
    ServiceSettings,
};
use project_tests::{SlowStore, draft};

fn limits(max_clients: usize, queue_capacity: usize) -> ServiceSettings {
    ServiceSettings {
        subscriber_limits: DispatcherLimits {
            max_clients,
            queue_capacity,
        },
        ..ServiceSettings::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_creates_yield_one_row() {
    let service = Arc::new(RecordService::new(
        SlowStore::new(Duration::from_millis(5)),
        ServiceSettings::default(),
    ));
    let mut feed = service.notifier().subscribe("test").unwrap();

    let attempts = (0..16).map(|i| {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service
                .mutations()
                .create(draft("A1", &format!("Leo {}", i), "Lion", i, "Healthy"))
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for result in &results {
        if let Err(e) = result {
            assert_eq!(e, &RecordError::Conflict("A1".into()));
        }
    }
    assert_eq!(service.store().len(), 1);

    let event = feed.recv().await.unwrap();
    assert_eq!(event.event, ChangeKind::Created);
    assert_eq!(event.data, ChangePayload::Record(winners[0].clone()));
    assert!(feed.try_recv().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_id_updates_notify_in_commit_order() {
    let service = Arc::new(RecordService::new(
        SlowStore::new(Duration::from_millis(2)),
        ServiceSettings::default(),
    ));
    service.mutations().create(draft("A1", "Leo", "Lion", 0, "Healthy")).await.unwrap();
    let mut feed = service.notifier().subscribe("test").unwrap();

    let updates = (1..=20).map(|age| {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service
                .mutations()
                .update("A1", draft("A1", "Leo", "Lion", age, "Healthy"))
                .await
        })
    });
    for joined in join_all(updates).await {
        joined.unwrap().unwrap();
    }

    let mut last_age = None;
    for _ in 0..20 {
        let event = feed.recv().await.unwrap();
        assert_eq!(event.event, ChangeKind::Updated);
        if let ChangePayload::Record(record) = &event.data {
            last_age = Some(record.age);
        }
    }
    assert!(feed.try_recv().is_none());

    let stored = service.query().get("A1").await.unwrap();
    assert_eq!(last_age, Some(stored.age));
}

#[tokio::test]
async fn departed_subscriber_does_not_block_the_others() {
    let service = RecordService::new(MemoryRecordStore::new(), ServiceSettings::default());
    let mut first = service.notifier().subscribe("first").unwrap();
    let leaver = service.notifier().subscribe("leaver").unwrap();
    let mut third = service.notifier().subscribe("third").unwrap();
    assert_eq!(service.notifier().subscriber_count(), 3);

    // Disconnect while a broadcast is in flight on another task.
    let notifier = service.notifier().clone();
    let dropper = tokio::spawn(async move {
        drop(leaver);
        notifier.subscriber_count()
    });
    service.mutations().create(draft("A1", "Leo", "Lion", 4, "Healthy")).await.unwrap();
    dropper.await.unwrap();

    assert_eq!(first.recv().await.unwrap().data.id(), "A1");
    assert_eq!(third.recv().await.unwrap().data.id(), "A1");

    service.mutations().create(draft("B2", "Bo", "Bear", 7, "Healthy")).await.unwrap();
    assert_eq!(service.notifier().subscriber_count(), 2);
    assert_eq!(first.recv().await.unwrap().data.id(), "B2");
    assert_eq!(third.recv().await.unwrap().data.id(), "B2");
}

#[tokio::test]
async fn slow_subscriber_is_disconnected() {
    let service = RecordService::new(MemoryRecordStore::new(), limits(8, 2));
    let mut fast = service.notifier().subscribe("fast").unwrap();
    let mut slow = service.notifier().subscribe("slow").unwrap();

    for i in 0..5 {
        let id = format!("R{}", i);
        service.mutations().create(draft(&id, "Rex", "Dog", i, "Healthy")).await.unwrap();
        assert_eq!(fast.recv().await.unwrap().data.id(), id);
    }

    // The backlog that fit is still delivered, then the stream ends.
    assert_eq!(slow.recv().await.unwrap().data.id(), "R0");
    assert_eq!(slow.recv().await.unwrap().data.id(), "R1");
    assert!(slow.recv().await.is_none());
    assert_eq!(service.notifier().subscriber_count(), 1);

    // The writes themselves were unaffected.
    let page = service.query().list_params(&ListParams::default()).await.unwrap();
    assert_eq!(page.total_count, 5);
}

#[tokio::test]
async fn registry_capacity_and_shutdown() {
    let service = RecordService::new(MemoryRecordStore::new(), limits(2, 4));
    let mut a = service.notifier().subscribe("a").unwrap();
    let _b = service.notifier().subscribe("b").unwrap();
    assert_eq!(
        service.notifier().subscribe("c").unwrap_err(),
        DispatchError::CapacityReached(2)
    );

    service.notifier().close();
    assert!(a.recv().await.is_none());
    assert_eq!(service.notifier().subscribe("late").unwrap_err(), DispatchError::Closed);

    // Mutations keep working with nobody listening.
    service.mutations().create(draft("A1", "Leo", "Lion", 4, "Healthy")).await.unwrap();
}
