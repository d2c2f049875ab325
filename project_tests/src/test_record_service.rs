//! # Record Service Integration Tests
//!
//! Drives `RecordService` end to end against the memory store: listing,
//! mutation outcomes and the events they produce.

use std::collections::HashSet;
use std::time::Duration;

use lib_common::records::{
    ChangeKind, ChangePayload, ListParams, MemoryRecordStore, RecordError, RecordService,
    ServiceSettings, StoreError,
};
use project_tests::{CountingStore, SlowStore, animal, draft};
use serde_json::json;

fn service() -> RecordService<MemoryRecordStore> {
    RecordService::new(MemoryRecordStore::new(), ServiceSettings::default())
}

fn params(search: &str, sort_by: &str, order: &str, page: &str, limit: &str) -> ListParams {
    let opt = |s: &str| (!s.is_empty()).then(|| s.to_string());
    ListParams {
        search: opt(search),
        sort_by: opt(sort_by),
        order: opt(order),
        page: opt(page),
        limit: opt(limit),
    }
}

#[tokio::test]
async fn create_update_list_delete_scenario() {
    let service = service();
    let mutations = service.mutations();
    let query = service.query();

    let created = mutations.create(draft("A1", "Leo", "Lion", 4, "Healthy")).await.unwrap();
    assert_eq!(created, animal("A1", "Leo", "Lion", 4, "Healthy"));
    mutations.create(draft("B7", "Dumbo", "Elephant", 10, "Good")).await.unwrap();
    mutations.create(draft("C3", "Kiki", "Parrot", 2, "Good")).await.unwrap();

    let updated = mutations.update("A1", draft("A1", "Leo", "Lion", 5, "Healthy")).await.unwrap();
    assert_eq!(updated.age, 5);

    // Numeric, not lexicographic: 10 sorts above 5.
    let page = query.list_params(&params("", "age", "DESC", "", "")).await.unwrap();
    let ages: Vec<i32> = page.items.iter().map(|r| r.age).collect();
    assert_eq!(ages, vec![10, 5, 2]);

    let removed = mutations.delete("A1").await.unwrap();
    assert_eq!(removed.id, "A1");

    let page = query.list_params(&ListParams::default()).await.unwrap();
    assert_eq!(page.total_count, 2);
    assert!(page.items.iter().all(|r| r.id != "A1"));

    let err = mutations.update("A1", draft("A1", "Leo", "Lion", 6, "Healthy")).await.unwrap_err();
    assert_eq!(err, RecordError::NotFound("A1".into()));
    let err = mutations.delete("A1").await.unwrap_err();
    assert_eq!(err, RecordError::NotFound("A1".into()));
}

#[tokio::test]
async fn created_record_is_found_by_name_on_page_one() {
    let service = service();
    for i in 0..25 {
        let id = format!("T{:02}", i);
        service
            .mutations()
            .create(draft(&id, &format!("Animal {}", i), "Goat", i, "Healthy"))
            .await
            .unwrap();
    }
    service
        .mutations()
        .create(draft("ZZ", "Marzipan", "Okapi", 3, "Recovering"))
        .await
        .unwrap();

    let page = service
        .query()
        .list_params(&params("marzipan", "", "", "", ""))
        .await
        .unwrap();
    assert_eq!(page.page_number, 1);
    assert_eq!(page.total_count, 1);
    assert_eq!(page.items[0].id, "ZZ");

    // Species matches too, case-insensitively.
    let page = service.query().list_params(&params("OKA", "", "", "", "")).await.unwrap();
    assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn pages_partition_the_result_set() {
    let service = service();
    for i in 0..23 {
        // Few distinct ages, so ties are broken by id.
        service
            .mutations()
            .create(draft(&format!("P{:02}", i), "Pip", "Penguin", i % 4, "Healthy"))
            .await
            .unwrap();
    }

    for size in 1..=7u32 {
        let first = service
            .query()
            .list_params(&params("", "age", "asc", "1", &size.to_string()))
            .await
            .unwrap();
        assert_eq!(first.total_count, 23);
        assert_eq!(first.page_count, 23u64.div_ceil(u64::from(size)));

        let mut seen = Vec::new();
        for page_number in 1..=first.page_count + 1 {
            let page = service
                .query()
                .list_params(&params("", "age", "asc", &page_number.to_string(), &size.to_string()))
                .await
                .unwrap();
            let offset = (page_number - 1) * u64::from(size);
            assert!(page.items.is_empty() || offset + page.items.len() as u64 <= page.total_count);
            assert!(page.items.len() <= size as usize);
            seen.extend(page.items.into_iter().map(|r| (r.age, r.id)));
        }

        assert_eq!(seen.len(), 23, "page size {}", size);
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(seen, sorted, "pages are not in a stable order for size {}", size);
        let unique: HashSet<_> = seen.iter().map(|(_, id)| id.clone()).collect();
        assert_eq!(unique.len(), 23);
    }
}

#[tokio::test]
async fn paging_defaults_and_limits() {
    let service = service();
    service.mutations().create(draft("A1", "Leo", "Lion", 4, "Healthy")).await.unwrap();

    let page = service.query().list_params(&ListParams::default()).await.unwrap();
    assert_eq!((page.page_number, page.page_size), (1, 10));

    let page = service.query().list_params(&params("", "", "", "", "1000")).await.unwrap();
    assert_eq!(page.page_size, 100);

    let page = service.query().list_params(&params("", "", "", "9", "")).await.unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.total_count, 1);

    for (page, limit) in [("0", ""), ("-1", ""), ("x", ""), ("", "0"), ("", "ten")] {
        let err = service
            .query()
            .list_params(&params("", "", "", page, limit))
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::Validation(_)), "{:?}", err);
    }
}

#[tokio::test]
async fn invalid_sort_column_never_reaches_storage() {
    let service = RecordService::new(CountingStore::new(), ServiceSettings::default());

    for column in ["color", "ID", "age; DROP TABLE animals", "health_status", "1"] {
        let err = service
            .query()
            .list_params(&params("", column, "asc", "", ""))
            .await
            .unwrap_err();
        assert_eq!(err, RecordError::InvalidSortColumn(column.to_string()));
    }
    assert_eq!(service.store().calls(), 0);

    // An unknown direction is coerced, not rejected.
    service
        .query()
        .list_params(&params("", "healthStatus", "sideways", "", ""))
        .await
        .unwrap();
    assert_eq!(service.store().calls(), 1);
}

#[tokio::test]
async fn every_success_emits_one_event_with_the_returned_value() {
    let service = service();
    let mut feed = service.notifier().subscribe("test").unwrap();

    let created = service
        .mutations()
        .create(draft("  A1 ", " Leo ", "Lion", 4, "Healthy"))
        .await
        .unwrap();
    assert_eq!(created.id, "A1");
    assert_eq!(created.name, "Leo");
    let event = feed.recv().await.unwrap();
    assert_eq!(event.event, ChangeKind::Created);
    assert_eq!(event.data, ChangePayload::Record(created));

    let updated = service
        .mutations()
        .update("A1", draft("A1", "Leo", "Lion", 5, "Sick"))
        .await
        .unwrap();
    let event = feed.recv().await.unwrap();
    assert_eq!(event.event, ChangeKind::Updated);
    assert_eq!(event.data, ChangePayload::Record(updated));

    service.mutations().delete("A1").await.unwrap();
    let event = feed.recv().await.unwrap();
    assert_eq!(event.event, ChangeKind::Deleted);
    assert_eq!(event.data, ChangePayload::Tombstone { id: "A1".into() });

    // Failures are never notified.
    assert!(service.mutations().create(draft("B1", "", "Lion", 1, "Healthy")).await.is_err());
    assert!(service.mutations().delete("A1").await.is_err());
    assert!(service.mutations().update("A1", draft("A1", "Leo", "Lion", 5, "Sick")).await.is_err());
    service.mutations().create(draft("B1", "Bo", "Bear", 1, "Healthy")).await.unwrap();
    assert!(service.mutations().create(draft("B1", "Bo", "Bear", 1, "Healthy")).await.is_err());

    let next = feed.recv().await.unwrap();
    assert_eq!(next.event, ChangeKind::Created);
    assert_eq!(next.data.id(), "B1");
    assert!(feed.try_recv().is_none());
}

#[tokio::test]
async fn store_timeout_is_a_storage_error_without_event() {
    let settings = ServiceSettings {
        store_timeout: Duration::from_millis(50),
        ..ServiceSettings::default()
    };
    let service = RecordService::new(SlowStore::new(Duration::from_millis(500)), settings);
    let mut feed = service.notifier().subscribe("test").unwrap();

    let err = service
        .mutations()
        .create(draft("A1", "Leo", "Lion", 4, "Healthy"))
        .await
        .unwrap_err();
    assert_eq!(err, RecordError::Storage(StoreError::Timeout(Duration::from_millis(50))));
    assert_eq!(err.kind(), "StorageUnavailable");
    assert!(service.store().is_empty());
    assert!(feed.try_recv().is_none());
}

#[tokio::test]
async fn scan_announces_hits_only() {
    let service = service();
    let created = service.mutations().create(draft("04A1B2", "Leo", "Lion", 4, "Healthy")).await.unwrap();
    let mut feed = service.notifier().subscribe("dashboard").unwrap();

    let found = service.scanner().scan("04A1B2").await.unwrap();
    assert_eq!(found, created);
    let event = feed.recv().await.unwrap();
    assert_eq!(event.event, ChangeKind::Scanned);
    assert_eq!(event.data, ChangePayload::Record(created));

    let err = service.scanner().scan("FFFFFF").await.unwrap_err();
    assert_eq!(err, RecordError::NotFound("FFFFFF".into()));
    assert!(feed.try_recv().is_none());
}

#[tokio::test]
async fn pages_and_events_keep_their_wire_shape() {
    let service = service();
    let mut feed = service.notifier().subscribe("test").unwrap();
    service.mutations().create(draft("A1", "Leo", "Lion", 4, "Healthy")).await.unwrap();
    service.mutations().delete("A1").await.unwrap();
    service.mutations().create(draft("B2", "Kiki", "Parrot", 12, "Good")).await.unwrap();

    let page = service.query().list_params(&params("", "", "", "1", "5")).await.unwrap();
    assert_eq!(
        serde_json::to_value(&page).unwrap(),
        json!({
            "total": 1,
            "page": 1,
            "limit": 5,
            "totalPages": 1,
            "data": [{"id": "B2", "name": "Kiki", "species": "Parrot", "age": 12, "healthStatus": "Good"}],
        })
    );

    let created = serde_json::to_value(&*feed.recv().await.unwrap()).unwrap();
    assert_eq!(created["event"], "created");
    assert_eq!(created["data"]["healthStatus"], "Healthy");
    assert!(created["timestamp"].as_str().is_some_and(|ts| ts.ends_with('Z')));

    let deleted = serde_json::to_value(&*feed.recv().await.unwrap()).unwrap();
    assert_eq!(deleted["event"], "deleted");
    assert_eq!(deleted["data"], json!({"id": "A1"}));
}
