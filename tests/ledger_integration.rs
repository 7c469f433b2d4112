//! Integration tests for the offset ledger pipeline
//!
//! Key integration points tested:
//! - Channel → ingestion → aggregator → flush → SQLite
//! - Pending alias rows promoted by reconciliation
//! - Read API over an on-disk store, including store failures

#[cfg(test)]
mod ledger_integration_tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{DateTime, Utc};
    use http_body_util::BodyExt;
    use offset_ledger::api::{create_router, AppState};
    use offset_ledger::ledger::{
        flush_once, load_recent, reconcile_pending, start_ingestion, FsmCreation, OffsetEvent,
        OffsetStore, RangeAggregator, RecentLimit, SqliteOffsetStore, StoreAliasResolver,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tower::ServiceExt; // for `oneshot`

    fn offset(fsm_id: &str, alias: &str, topic: &str, partition: i32, offset: i64) -> OffsetEvent {
        OffsetEvent::Offset {
            fsm_id: fsm_id.to_string(),
            fsm_alias: alias.to_string(),
            topic: topic.to_string(),
            partition,
            offset,
        }
    }

    #[tokio::test]
    async fn test_end_to_end_ingest_flush_reconcile_view() {
        let temp_dir = tempfile::tempdir().unwrap();
        let sqlite = Arc::new(SqliteOffsetStore::open(temp_dir.path().join("ledger.db")).unwrap());
        let store: Arc<dyn OffsetStore> = sqlite.clone();
        let aggregator = Arc::new(RangeAggregator::new());

        // 1. Mock consumer: alias-only events, then the FSM appears under its id
        let (tx, rx) = mpsc::channel(100);
        let ingestion = tokio::spawn(start_ingestion(rx, aggregator.clone(), store.clone()));

        tx.send(offset("", "alias1", "t1", 0, 100)).await.unwrap();
        tx.send(offset("", "alias1", "t1", 0, 105)).await.unwrap();
        tx.send(OffsetEvent::FsmCreated(FsmCreation {
            fsm_id: "fsm-1".to_string(),
            created: DateTime::<Utc>::from_timestamp_millis(5_000).unwrap(),
            topic: "t2".to_string(),
            partition: 1,
            offset: 40,
        }))
        .await
        .unwrap();
        tx.send(offset("fsm-1", "alias1", "t2", 1, 41)).await.unwrap();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), ingestion)
            .await
            .unwrap()
            .unwrap();

        // 2. One flush: alias rows go to pending, id rows merge onto the creation row
        let report = flush_once(&aggregator, store.as_ref(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(report.pending_rows, 1);
        assert_eq!(report.resolved_rows, 1);
        assert_eq!(report.events, 3);
        assert_eq!(store.pending_aliases().await.unwrap(), vec!["alias1".to_string()]);

        // 3. The alias binding recorded at flush resolves the pending rows
        let resolver = StoreAliasResolver::new(store.clone());
        let reconciled = reconcile_pending(store.as_ref(), &resolver).await.unwrap();
        assert_eq!(reconciled.rows_moved, 1);
        assert!(store.pending_aliases().await.unwrap().is_empty());

        // 4. Read side
        let views = load_recent(store.as_ref(), RecentLimit::default()).await.unwrap();
        assert_eq!(views.len(), 1);
        let view = &views[0];
        assert_eq!(view.id, "fsm-1");

        let t1 = view.partition("t1", 0).unwrap();
        assert_eq!((t1.start, t1.end, t1.count), (100, 105, 2));
        let t2 = view.partition("t2", 1).unwrap();
        assert_eq!((t2.start, t2.end, t2.count), (40, 41, 2));
    }

    #[tokio::test]
    async fn test_store_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("ledger.db");

        {
            let store = SqliteOffsetStore::open(&db_path).unwrap();
            let aggregator = RangeAggregator::new();
            aggregator.add("fsm-1", "", "t", 0, 7).unwrap();
            flush_once(&aggregator, &store, Duration::from_secs(5)).await.unwrap();
            store.record_scrape("t", 0, 99).await.unwrap();
        }

        let store = SqliteOffsetStore::open(&db_path).unwrap();
        let rows = store.query_by_identity("fsm-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].last_offset, 7);
        assert_eq!(store.load_scrapes().await.unwrap()["t"].partitions[&0], 99);
    }

    #[tokio::test]
    async fn test_api_reports_store_failure_as_500() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("ledger.db");
        let store = Arc::new(SqliteOffsetStore::open(&db_path).unwrap());

        // Break the store underneath the service
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute_batch("DROP TABLE offsets;").unwrap();
        drop(conn);

        let app = create_router(AppState { store });
        let response = app
            .oneshot(Request::builder().uri("/fsm?id=x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].as_str().unwrap().starts_with("Database error"));
    }
}
