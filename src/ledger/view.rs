//! Nested FSM → topic → partition views rebuilt from flat store rows

use super::db::OffsetStore;
use super::types::{PartitionRow, RecentLimit, RecentRow};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionView {
    pub start: i64,
    pub end: i64,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopicView {
    pub partitions: HashMap<i32, PartitionView>,
}

/// One FSM with its offsets grouped by topic and partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FsmView {
    pub id: String,
    pub created: DateTime<Utc>,
    pub topics: HashMap<String, TopicView>,
}

impl FsmView {
    pub fn new(id: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created,
            topics: HashMap::new(),
        }
    }

    pub fn partition(&self, topic: &str, partition: i32) -> Option<&PartitionView> {
        self.topics.get(topic)?.partitions.get(&partition)
    }

    /// Write one row into the view. A repeated (topic, partition) overwrites.
    fn apply(&mut self, row: PartitionRow) {
        self.topics.entry(row.topic).or_default().partitions.insert(
            row.partition,
            PartitionView {
                start: row.start_offset,
                end: row.last_offset,
                count: row.count,
            },
        );
    }
}

/// Build the view for one identity in a single pass over its rows.
pub fn reconstruct(
    id: impl Into<String>,
    created: DateTime<Utc>,
    rows: impl IntoIterator<Item = PartitionRow>,
) -> FsmView {
    let mut view = FsmView::new(id, created);
    for row in rows {
        view.apply(row);
    }
    view
}

/// Group recent-query rows by identity, keeping the store's ordering.
pub fn reconstruct_recent(rows: Vec<RecentRow>) -> Vec<FsmView> {
    let mut groups: Vec<(String, DateTime<Utc>, Vec<PartitionRow>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let slot = match index.get(&row.fsm_id) {
            Some(&slot) => slot,
            None => {
                index.insert(row.fsm_id.clone(), groups.len());
                groups.push((row.fsm_id, row.created, Vec::new()));
                groups.len() - 1
            }
        };
        if let Some(offsets) = row.offsets {
            groups[slot].2.push(offsets);
        }
    }

    groups
        .into_iter()
        .map(|(id, created, rows)| reconstruct(id, created, rows))
        .collect()
}

/// Query the `limit` most recent FSMs and rebuild their views
pub async fn load_recent(store: &dyn OffsetStore, limit: RecentLimit) -> Result<Vec<FsmView>> {
    let rows = store.query_recent(limit).await?;
    Ok(reconstruct_recent(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::db::SqliteOffsetStore;
    use crate::ledger::types::FsmCreation;

    fn ts(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap()
    }

    fn prow(topic: &str, partition: i32, start: i64, last: i64, count: i64) -> PartitionRow {
        PartitionRow {
            topic: topic.to_string(),
            partition,
            start_offset: start,
            last_offset: last,
            count,
        }
    }

    fn recent(id: &str, created_ms: i64, offsets: Option<PartitionRow>) -> RecentRow {
        RecentRow {
            fsm_id: id.to_string(),
            created: ts(created_ms),
            offsets,
        }
    }

    #[test]
    fn test_reconstruct_groups_by_topic_and_partition() {
        let view = reconstruct(
            "fsm-1",
            ts(1_000),
            vec![
                prow("orders", 0, 1, 5, 5),
                prow("orders", 1, 10, 12, 3),
                prow("payments", 0, 7, 7, 1),
            ],
        );

        assert_eq!(view.id, "fsm-1");
        assert_eq!(view.created, ts(1_000));
        assert_eq!(view.topics.len(), 2);
        assert_eq!(view.topics["orders"].partitions.len(), 2);
        assert_eq!(
            view.partition("orders", 1),
            Some(&PartitionView { start: 10, end: 12, count: 3 })
        );
        assert_eq!(view.partition("payments", 0).unwrap().count, 1);
    }

    #[test]
    fn test_duplicate_row_overwrites() {
        let view = reconstruct(
            "fsm-1",
            ts(0),
            vec![prow("t", 0, 1, 5, 5), prow("t", 0, 20, 30, 2)],
        );
        assert_eq!(
            view.partition("t", 0),
            Some(&PartitionView { start: 20, end: 30, count: 2 })
        );
    }

    #[test]
    fn test_reconstruct_recent_preserves_store_order() {
        let rows = vec![
            recent("new", 3_000, Some(prow("t", 0, 1, 2, 2))),
            recent("new", 3_000, Some(prow("t", 1, 5, 5, 1))),
            recent("mid", 2_000, None),
            recent("old", 1_000, Some(prow("u", 0, 9, 9, 1))),
        ];

        let views = reconstruct_recent(rows);
        let ids: Vec<_> = views.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
        assert_eq!(views[0].topics["t"].partitions.len(), 2);
        assert!(views[1].topics.is_empty());
        assert_eq!(views[2].created, ts(1_000));
    }

    #[test]
    fn test_reconstruct_recent_matches_per_identity_reconstruct() {
        let rows = vec![
            recent("fsm-1", 1_000, Some(prow("t", 0, 1, 5, 5))),
            recent("fsm-1", 1_000, Some(prow("t", 0, 20, 30, 2))),
            recent("fsm-1", 1_000, Some(prow("u", 2, 3, 3, 1))),
        ];

        let views = reconstruct_recent(rows);
        let expected = reconstruct(
            "fsm-1",
            ts(1_000),
            vec![prow("t", 0, 1, 5, 5), prow("t", 0, 20, 30, 2), prow("u", 2, 3, 3, 1)],
        );
        assert_eq!(views, vec![expected]);
    }

    #[test]
    fn test_view_json_shape() {
        let view = reconstruct("fsm-1", ts(0), vec![prow("t", 3, 1, 4, 2)]);
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["id"], "fsm-1");
        assert_eq!(json["topics"]["t"]["partitions"]["3"]["start"], 1);
        assert_eq!(json["topics"]["t"]["partitions"]["3"]["end"], 4);
        assert_eq!(json["topics"]["t"]["partitions"]["3"]["count"], 2);
    }

    #[tokio::test]
    async fn test_load_recent_returns_two_newest() {
        let store = SqliteOffsetStore::open_in_memory().unwrap();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            store
                .upsert_fsm(&FsmCreation {
                    fsm_id: id.to_string(),
                    created: ts(1_000 * (i as i64 + 1)),
                    topic: "t".to_string(),
                    partition: i as i32,
                    offset: 10 + i as i64,
                })
                .await
                .unwrap();
        }

        let views = load_recent(&store, RecentLimit::new(2).unwrap()).await.unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].id, "c");
        assert_eq!(views[1].id, "b");
        assert_eq!(
            views[0].partition("t", 2),
            Some(&PartitionView { start: 12, end: 12, count: 1 })
        );
    }
}
