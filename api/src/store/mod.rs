mod sqlite;

pub use sqlite::SqliteTelemetryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dbpulse_shared::{
    Connection, ConnectionStatus, IndexUsage, QueryStat, Suggestion, SuggestionDraft,
    TableAccessPattern, TelemetryBatch,
};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("telemetry store error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),

    #[error("connection {0} not found")]
    ConnectionNotFound(String),
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ReconcileSummary {
    pub queries: usize,
    pub tables: usize,
    pub indexes: usize,
    pub snapshot_id: String,
}

/// Persistence collaborator for the pipelines. Reconciliation must be
/// all-or-nothing: a failure partway through leaves every table at its prior
/// state. Upserts key on natural keys scoped to the connection, which is what
/// makes re-delivered orchestrator steps safe.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn create_connection(&self, connection: &Connection) -> Result<(), StoreError>;

    async fn get_connection(&self, id: &str) -> Result<Option<Connection>, StoreError>;

    async fn list_connections(&self) -> Result<Vec<Connection>, StoreError>;

    /// Applies a tenant edit. Status and sync bookkeeping are owned by the
    /// sync/test pipelines and stay untouched here.
    async fn update_connection(&self, connection: &Connection) -> Result<(), StoreError>;

    async fn update_status(&self, id: &str, status: ConnectionStatus) -> Result<(), StoreError>;

    /// Completes a sync: status becomes ACTIVE and lastSyncedAt advances.
    async fn mark_synced(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Removes the connection and cascades all of its telemetry.
    async fn delete_connection(&self, id: &str) -> Result<(), StoreError>;

    async fn reconcile(
        &self,
        connection_id: &str,
        batch: &TelemetryBatch,
    ) -> Result<ReconcileSummary, StoreError>;

    async fn slow_queries(
        &self,
        connection_id: &str,
        threshold_ms: f64,
        limit: usize,
    ) -> Result<Vec<QueryStat>, StoreError>;

    async fn top_index_usage(
        &self,
        connection_id: &str,
        limit: usize,
    ) -> Result<Vec<IndexUsage>, StoreError>;

    async fn top_table_patterns(
        &self,
        connection_id: &str,
        limit: usize,
    ) -> Result<Vec<TableAccessPattern>, StoreError>;

    async fn insert_suggestions(
        &self,
        connection_id: &str,
        drafts: &[SuggestionDraft],
    ) -> Result<usize, StoreError>;

    async fn list_suggestions(&self, connection_id: &str) -> Result<Vec<Suggestion>, StoreError>;

    /// ACTIVE connections whose last sync is older than their polling
    /// interval (or that never synced).
    async fn due_connections(&self, now: DateTime<Utc>) -> Result<Vec<Connection>, StoreError>;
}

/// Last occurrence in input order wins when one collection pass reports the
/// same natural key twice.
pub fn dedupe_query_stats(stats: &[QueryStat]) -> Vec<QueryStat> {
    dedupe_by_key(stats, |stat| stat.query_hash.clone())
}

pub fn dedupe_table_patterns(patterns: &[TableAccessPattern]) -> Vec<TableAccessPattern> {
    dedupe_by_key(patterns, |pattern| pattern.table_name.clone())
}

pub fn dedupe_index_usage(usage: &[IndexUsage]) -> Vec<IndexUsage> {
    dedupe_by_key(usage, |index| {
        format!("{}\u{1f}{}", index.table_name, index.index_name)
    })
}

fn dedupe_by_key<T: Clone, K: std::hash::Hash + Eq>(
    items: &[T],
    key: impl Fn(&T) -> K,
) -> Vec<T> {
    let mut slots: HashMap<K, usize> = HashMap::new();
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        match slots.entry(key(item)) {
            std::collections::hash_map::Entry::Occupied(slot) => {
                out[*slot.get()] = item.clone();
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(out.len());
                out.push(item.clone());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stat(hash: &str, count: i64) -> QueryStat {
        let at = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        QueryStat {
            query_text: format!("SELECT {hash}"),
            query_hash: hash.to_string(),
            execution_count: count,
            avg_execution_time_ms: count as f64,
            total_execution_time_ms: count as f64,
            first_seen_at: at,
            last_seen_at: at,
        }
    }

    #[test]
    fn later_duplicate_wins() {
        let deduped = dedupe_query_stats(&[stat("a", 1), stat("b", 2), stat("a", 9)]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].query_hash, "a");
        assert_eq!(deduped[0].execution_count, 9);
        assert_eq!(deduped[1].query_hash, "b");
    }

    #[test]
    fn index_dedup_keys_on_table_and_index() {
        let usage = vec![
            IndexUsage {
                table_name: "orders".into(),
                index_name: "idx_a".into(),
                scans: 1,
                tuples_read: 0,
                tuples_fetched: 0,
            },
            IndexUsage {
                table_name: "orders".into(),
                index_name: "idx_b".into(),
                scans: 2,
                tuples_read: 0,
                tuples_fetched: 0,
            },
            IndexUsage {
                table_name: "orders".into(),
                index_name: "idx_a".into(),
                scans: 7,
                tuples_read: 3,
                tuples_fetched: 1,
            },
        ];
        let deduped = dedupe_index_usage(&usage);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].scans, 7);
        assert_eq!(deduped[0].tuples_read, 3);
    }

    #[test]
    fn dedupe_preserves_first_seen_position() {
        let patterns = vec![
            TableAccessPattern {
                table_name: "a".into(),
                access_count: 1,
                last_accessed_at: None,
            },
            TableAccessPattern {
                table_name: "b".into(),
                access_count: 2,
                last_accessed_at: None,
            },
            TableAccessPattern {
                table_name: "a".into(),
                access_count: 5,
                last_accessed_at: None,
            },
        ];
        let deduped = dedupe_table_patterns(&patterns);
        assert_eq!(
            deduped.iter().map(|p| p.table_name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(deduped[0].access_count, 5);
    }
}
