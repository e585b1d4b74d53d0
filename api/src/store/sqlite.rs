use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dbpulse_shared::{
    Connection, ConnectionStatus, DbEngine, EnumParseError, IndexUsage, QueryStat, Suggestion,
    SuggestionDraft, SuggestionPriority, SuggestionStatus, SuggestionType, TableAccessPattern,
    TelemetryBatch, TELEMETRY_SCHEMA,
};
use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection as AsyncConnection;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    dedupe_index_usage, dedupe_query_stats, dedupe_table_patterns, ReconcileSummary, StoreError,
    TelemetryStore,
};

const UPSERT_QUERY_SQL: &str = r#"
    INSERT INTO queries (
        id, connection_id, query_hash, query_text,
        execution_count, avg_execution_time_ms, total_execution_time_ms,
        first_seen_at, last_seen_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    ON CONFLICT (connection_id, query_hash) DO UPDATE SET
        query_text = excluded.query_text,
        execution_count = excluded.execution_count,
        avg_execution_time_ms = excluded.avg_execution_time_ms,
        total_execution_time_ms = excluded.total_execution_time_ms,
        last_seen_at = excluded.last_seen_at
"#;

const INSERT_SAMPLE_SQL: &str = r#"
    INSERT INTO query_stat_samples (id, query_id, execution_count, total_execution_time_ms, recorded_at)
    SELECT ?1, id, ?2, ?3, ?4 FROM queries WHERE connection_id = ?5 AND query_hash = ?6
"#;

const UPSERT_PATTERN_SQL: &str = r#"
    INSERT INTO table_access_patterns (id, connection_id, table_name, access_count, last_accessed_at)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT (connection_id, table_name) DO UPDATE SET
        access_count = excluded.access_count,
        last_accessed_at = excluded.last_accessed_at
"#;

const UPSERT_INDEX_SQL: &str = r#"
    INSERT INTO index_usage (
        id, connection_id, table_name, index_name, scans, tuples_read, tuples_fetched
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT (connection_id, table_name, index_name) DO UPDATE SET
        scans = excluded.scans,
        tuples_read = excluded.tuples_read,
        tuples_fetched = excluded.tuples_fetched
"#;

const CONNECTION_COLUMNS: &str = "id, name, engine, host, port, database_name, username, \
     encrypted_password, encryption_key_id, polling_interval_secs, status, last_synced_at";

/// SQLite-backed telemetry store. One writer connection, WAL journal,
/// prepared statements throughout; reconciliation is a single transaction.
pub struct SqliteTelemetryStore {
    db: AsyncConnection,
}

impl SqliteTelemetryStore {
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let db = AsyncConnection::open(path).await?;
        init_schema(&db).await?;
        info!(db_path = %path, "Telemetry store opened");
        Ok(Self { db })
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let db = AsyncConnection::open_in_memory().await?;
        init_schema(&db).await?;
        Ok(Self { db })
    }
}

async fn init_schema(db: &AsyncConnection) -> Result<(), StoreError> {
    db.call(|conn| {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
        "#,
        )?;
        conn.execute_batch(TELEMETRY_SCHEMA)?;
        Ok(())
    })
    .await?;
    Ok(())
}

#[async_trait]
impl TelemetryStore for SqliteTelemetryStore {
    async fn create_connection(&self, connection: &Connection) -> Result<(), StoreError> {
        let c = connection.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO connections (
                        id, name, engine, host, port, database_name, username,
                        encrypted_password, encryption_key_id,
                        polling_interval_secs, status, last_synced_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                    params![
                        c.id,
                        c.name,
                        c.engine.as_str(),
                        c.host,
                        c.port,
                        c.database_name,
                        c.username,
                        c.encrypted_password,
                        c.encryption_key_id,
                        c.polling_interval_secs,
                        c.status.as_str(),
                        c.last_synced_at.map(|at| at.timestamp_micros()),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get_connection(&self, id: &str) -> Result<Option<Connection>, StoreError> {
        let id = id.to_string();
        let connection = self
            .db
            .call(move |conn| {
                conn.query_row(
                    &format!("SELECT {CONNECTION_COLUMNS} FROM connections WHERE id = ?1"),
                    params![id],
                    connection_from_row,
                )
                .optional()
            })
            .await?;
        Ok(connection)
    }

    async fn list_connections(&self) -> Result<Vec<Connection>, StoreError> {
        let connections = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {CONNECTION_COLUMNS} FROM connections ORDER BY created_at DESC"
                ))?;
                let rows = stmt.query_map([], connection_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(connections)
    }

    async fn update_connection(&self, connection: &Connection) -> Result<(), StoreError> {
        let c = connection.clone();
        let changed = self
            .db
            .call(move |conn| {
                conn.execute(
                    r#"
                    UPDATE connections SET
                        name = ?1, host = ?2, port = ?3, database_name = ?4, username = ?5,
                        encrypted_password = ?6, encryption_key_id = ?7,
                        polling_interval_secs = ?8
                    WHERE id = ?9
                "#,
                    params![
                        c.name,
                        c.host,
                        c.port,
                        c.database_name,
                        c.username,
                        c.encrypted_password,
                        c.encryption_key_id,
                        c.polling_interval_secs,
                        c.id,
                    ],
                )
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::ConnectionNotFound(connection.id.clone()));
        }
        Ok(())
    }

    async fn update_status(&self, id: &str, status: ConnectionStatus) -> Result<(), StoreError> {
        let owned_id = id.to_string();
        let changed = self
            .db
            .call(move |conn| {
                conn.execute(
                    "UPDATE connections SET status = ?1 WHERE id = ?2",
                    params![status.as_str(), owned_id],
                )
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::ConnectionNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn mark_synced(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let owned_id = id.to_string();
        let changed = self
            .db
            .call(move |conn| {
                conn.execute(
                    "UPDATE connections SET status = 'ACTIVE', last_synced_at = ?1 WHERE id = ?2",
                    params![at.timestamp_micros(), owned_id],
                )
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::ConnectionNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete_connection(&self, id: &str) -> Result<(), StoreError> {
        let owned_id = id.to_string();
        let changed = self
            .db
            .call(move |conn| {
                conn.execute("DELETE FROM connections WHERE id = ?1", params![owned_id])
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::ConnectionNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn reconcile(
        &self,
        connection_id: &str,
        batch: &TelemetryBatch,
    ) -> Result<ReconcileSummary, StoreError> {
        let connection_id = connection_id.to_string();
        let queries = dedupe_query_stats(&batch.query_stats);
        let patterns = dedupe_table_patterns(&batch.table_patterns);
        let indexes = dedupe_index_usage(&batch.index_usage);
        let schema = batch.schema.clone();
        let now_us = Utc::now().timestamp_micros();

        let summary = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;

                {
                    let mut upsert = tx.prepare_cached(UPSERT_QUERY_SQL)?;
                    let mut sample = tx.prepare_cached(INSERT_SAMPLE_SQL)?;
                    for stat in &queries {
                        upsert.execute(params![
                            Uuid::now_v7().to_string(),
                            connection_id,
                            stat.query_hash,
                            stat.query_text,
                            stat.execution_count,
                            stat.avg_execution_time_ms,
                            stat.total_execution_time_ms,
                            stat.first_seen_at.timestamp_micros(),
                            stat.last_seen_at.timestamp_micros(),
                        ])?;
                        sample.execute(params![
                            Uuid::now_v7().to_string(),
                            stat.execution_count,
                            stat.total_execution_time_ms,
                            now_us,
                            connection_id,
                            stat.query_hash,
                        ])?;
                    }
                }

                let snapshot_id = Uuid::now_v7().to_string();
                tx.execute(
                    "INSERT INTO schema_snapshots (id, connection_id, created_at) VALUES (?1, ?2, ?3)",
                    params![snapshot_id, connection_id, now_us],
                )?;
                {
                    let mut insert_table = tx.prepare_cached(
                        "INSERT INTO schema_tables (id, snapshot_id, table_name) VALUES (?1, ?2, ?3)",
                    )?;
                    let mut insert_column = tx.prepare_cached(
                        "INSERT INTO schema_columns (id, table_id, column_name, data_type, is_nullable) \
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )?;
                    for table in &schema.tables {
                        let table_id = Uuid::now_v7().to_string();
                        insert_table.execute(params![table_id, snapshot_id, table.name])?;
                        for column in &table.columns {
                            insert_column.execute(params![
                                Uuid::now_v7().to_string(),
                                table_id,
                                column.name,
                                column.data_type,
                                column.nullable,
                            ])?;
                        }
                    }
                }

                {
                    let mut upsert = tx.prepare_cached(UPSERT_PATTERN_SQL)?;
                    for pattern in &patterns {
                        upsert.execute(params![
                            Uuid::now_v7().to_string(),
                            connection_id,
                            pattern.table_name,
                            pattern.access_count,
                            pattern.last_accessed_at.map(|at| at.timestamp_micros()),
                        ])?;
                    }
                }

                {
                    let mut upsert = tx.prepare_cached(UPSERT_INDEX_SQL)?;
                    for index in &indexes {
                        upsert.execute(params![
                            Uuid::now_v7().to_string(),
                            connection_id,
                            index.table_name,
                            index.index_name,
                            index.scans,
                            index.tuples_read,
                            index.tuples_fetched,
                        ])?;
                    }
                }

                tx.commit()?;

                Ok(ReconcileSummary {
                    queries: queries.len(),
                    tables: patterns.len(),
                    indexes: indexes.len(),
                    snapshot_id,
                })
            })
            .await?;

        debug!(
            queries = summary.queries,
            tables = summary.tables,
            indexes = summary.indexes,
            snapshot_id = %summary.snapshot_id,
            "Reconciled telemetry batch"
        );

        Ok(summary)
    }

    async fn slow_queries(
        &self,
        connection_id: &str,
        threshold_ms: f64,
        limit: usize,
    ) -> Result<Vec<QueryStat>, StoreError> {
        let connection_id = connection_id.to_string();
        let stats = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    r#"
                    SELECT query_text, query_hash, execution_count,
                           avg_execution_time_ms, total_execution_time_ms,
                           first_seen_at, last_seen_at
                    FROM queries
                    WHERE connection_id = ?1 AND avg_execution_time_ms > ?2
                    ORDER BY avg_execution_time_ms DESC
                    LIMIT ?3
                "#,
                )?;
                let rows = stmt.query_map(
                    params![connection_id, threshold_ms, limit as i64],
                    query_stat_from_row,
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(stats)
    }

    async fn top_index_usage(
        &self,
        connection_id: &str,
        limit: usize,
    ) -> Result<Vec<IndexUsage>, StoreError> {
        let connection_id = connection_id.to_string();
        let usage = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    r#"
                    SELECT table_name, index_name, scans, tuples_read, tuples_fetched
                    FROM index_usage
                    WHERE connection_id = ?1
                    ORDER BY scans DESC
                    LIMIT ?2
                "#,
                )?;
                let rows = stmt.query_map(params![connection_id, limit as i64], |row| {
                    Ok(IndexUsage {
                        table_name: row.get("table_name")?,
                        index_name: row.get("index_name")?,
                        scans: row.get("scans")?,
                        tuples_read: row.get("tuples_read")?,
                        tuples_fetched: row.get("tuples_fetched")?,
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(usage)
    }

    async fn top_table_patterns(
        &self,
        connection_id: &str,
        limit: usize,
    ) -> Result<Vec<TableAccessPattern>, StoreError> {
        let connection_id = connection_id.to_string();
        let patterns = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    r#"
                    SELECT table_name, access_count, last_accessed_at
                    FROM table_access_patterns
                    WHERE connection_id = ?1
                    ORDER BY access_count DESC
                    LIMIT ?2
                "#,
                )?;
                let rows = stmt.query_map(params![connection_id, limit as i64], |row| {
                    Ok(TableAccessPattern {
                        table_name: row.get("table_name")?,
                        access_count: row.get("access_count")?,
                        last_accessed_at: row
                            .get::<_, Option<i64>>("last_accessed_at")?
                            .and_then(DateTime::from_timestamp_micros),
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(patterns)
    }

    async fn insert_suggestions(
        &self,
        connection_id: &str,
        drafts: &[SuggestionDraft],
    ) -> Result<usize, StoreError> {
        let connection_id = connection_id.to_string();
        let drafts = drafts.to_vec();
        let now_us = Utc::now().timestamp_micros();
        let inserted = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut insert = tx.prepare_cached(
                        r#"
                        INSERT INTO suggestions (
                            id, connection_id, query_hash,
                            suggestion_type, priority, suggestion_text, status, created_at
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    )?;
                    for draft in &drafts {
                        insert.execute(params![
                            Uuid::now_v7().to_string(),
                            connection_id,
                            draft.query_id,
                            draft.suggestion_type.as_str(),
                            draft.priority.as_str(),
                            draft.suggestion_text,
                            SuggestionStatus::New.as_str(),
                            now_us,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(drafts.len())
            })
            .await?;
        Ok(inserted)
    }

    async fn list_suggestions(&self, connection_id: &str) -> Result<Vec<Suggestion>, StoreError> {
        let connection_id = connection_id.to_string();
        let suggestions = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    r#"
                    SELECT id, connection_id, query_hash,
                           suggestion_type, priority, suggestion_text, status, created_at
                    FROM suggestions
                    WHERE connection_id = ?1
                    ORDER BY created_at
                "#,
                )?;
                let rows = stmt.query_map(params![connection_id], |row| {
                    let type_raw: String = row.get("suggestion_type")?;
                    let priority_raw: String = row.get("priority")?;
                    let status_raw: String = row.get("status")?;
                    Ok(Suggestion {
                        id: row.get("id")?,
                        connection_id: row.get("connection_id")?,
                        query_hash: row.get("query_hash")?,
                        suggestion_type: SuggestionType::parse(&type_raw).map_err(parse_err)?,
                        priority: SuggestionPriority::parse(&priority_raw).map_err(parse_err)?,
                        suggestion_text: row.get("suggestion_text")?,
                        status: SuggestionStatus::parse(&status_raw).map_err(parse_err)?,
                        created_at: DateTime::from_timestamp_micros(row.get("created_at")?)
                            .unwrap_or_default(),
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(suggestions)
    }

    async fn due_connections(&self, now: DateTime<Utc>) -> Result<Vec<Connection>, StoreError> {
        let now_us = now.timestamp_micros();
        let due = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    r#"
                    SELECT {CONNECTION_COLUMNS}
                    FROM connections
                    WHERE status = 'ACTIVE'
                      AND (last_synced_at IS NULL
                           OR last_synced_at <= ?1 - polling_interval_secs * 1000000)
                "#
                ))?;
                let rows = stmt.query_map(params![now_us], connection_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(due)
    }
}

fn connection_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Connection> {
    let engine_raw: String = row.get("engine")?;
    let status_raw: String = row.get("status")?;
    Ok(Connection {
        id: row.get("id")?,
        name: row.get("name")?,
        engine: DbEngine::parse(&engine_raw).map_err(parse_err)?,
        host: row.get("host")?,
        port: row.get("port")?,
        database_name: row.get("database_name")?,
        username: row.get("username")?,
        encrypted_password: row.get("encrypted_password")?,
        encryption_key_id: row.get("encryption_key_id")?,
        polling_interval_secs: row.get("polling_interval_secs")?,
        status: ConnectionStatus::parse(&status_raw).map_err(parse_err)?,
        last_synced_at: row
            .get::<_, Option<i64>>("last_synced_at")?
            .and_then(DateTime::from_timestamp_micros),
    })
}

fn query_stat_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueryStat> {
    Ok(QueryStat {
        query_text: row.get("query_text")?,
        query_hash: row.get("query_hash")?,
        execution_count: row.get("execution_count")?,
        avg_execution_time_ms: row.get("avg_execution_time_ms")?,
        total_execution_time_ms: row.get("total_execution_time_ms")?,
        first_seen_at: DateTime::from_timestamp_micros(row.get("first_seen_at")?)
            .unwrap_or_default(),
        last_seen_at: DateTime::from_timestamp_micros(row.get("last_seen_at")?)
            .unwrap_or_default(),
    })
}

fn parse_err(e: EnumParseError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dbpulse_shared::{ColumnInfo, SchemaInfo, TableInfo};

    fn test_connection(id: &str) -> Connection {
        Connection {
            id: id.to_string(),
            name: "orders db".to_string(),
            engine: DbEngine::Postgres,
            host: "db.internal".to_string(),
            port: 5432,
            database_name: "orders".to_string(),
            username: "monitor".to_string(),
            encrypted_password: r#"{"nonce":"00","tag":"00","data":"00"}"#.to_string(),
            encryption_key_id: "default".to_string(),
            polling_interval_secs: 3600,
            status: ConnectionStatus::Active,
            last_synced_at: None,
        }
    }

    fn stat(hash: &str, count: i64, avg_ms: f64) -> QueryStat {
        let at = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        QueryStat {
            query_text: format!("SELECT * FROM t WHERE h = '{hash}'"),
            query_hash: hash.to_string(),
            execution_count: count,
            avg_execution_time_ms: avg_ms,
            total_execution_time_ms: avg_ms * count as f64,
            first_seen_at: at,
            last_seen_at: at,
        }
    }

    fn batch() -> TelemetryBatch {
        TelemetryBatch {
            query_stats: vec![stat("q1", 10, 1500.0), stat("q2", 3, 12.0)],
            schema: SchemaInfo {
                tables: vec![TableInfo {
                    name: "orders".to_string(),
                    columns: vec![ColumnInfo {
                        name: "id".to_string(),
                        data_type: "bigint".to_string(),
                        nullable: false,
                    }],
                }],
            },
            index_usage: vec![IndexUsage {
                table_name: "orders".to_string(),
                index_name: "orders_pkey".to_string(),
                scans: 40,
                tuples_read: 80,
                tuples_fetched: 60,
            }],
            table_patterns: vec![TableAccessPattern {
                table_name: "orders".to_string(),
                access_count: 100,
                last_accessed_at: None,
            }],
        }
    }

    async fn store_with_connection(id: &str) -> SqliteTelemetryStore {
        let store = SqliteTelemetryStore::open_in_memory().await.unwrap();
        store.create_connection(&test_connection(id)).await.unwrap();
        store
    }

    async fn count(store: &SqliteTelemetryStore, table: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        store
            .db
            .call(move |conn| conn.query_row(&sql, [], |row| row.get(0)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn connection_round_trips() {
        let store = store_with_connection("c1").await;
        let loaded = store.get_connection("c1").await.unwrap().unwrap();
        assert_eq!(loaded.engine, DbEngine::Postgres);
        assert_eq!(loaded.status, ConnectionStatus::Active);
        assert!(store.get_connection("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn edits_update_credentials_but_not_sync_state() {
        let store = store_with_connection("c1").await;

        let mut edited = store.get_connection("c1").await.unwrap().unwrap();
        edited.name = "orders replica".to_string();
        edited.encrypted_password = r#"{"nonce":"11","tag":"11","data":"11"}"#.to_string();
        edited.encryption_key_id = "rotated".to_string();
        edited.polling_interval_secs = 600;
        edited.status = ConnectionStatus::Error;
        store.update_connection(&edited).await.unwrap();

        let loaded = store.get_connection("c1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "orders replica");
        assert_eq!(loaded.encryption_key_id, "rotated");
        assert_eq!(loaded.polling_interval_secs, 600);
        // Status belongs to the sync/test pipelines, not the edit path.
        assert_eq!(loaded.status, ConnectionStatus::Active);

        assert!(matches!(
            store.update_connection(&test_connection("ghost")).await,
            Err(StoreError::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn listing_returns_every_connection() {
        let store = store_with_connection("c1").await;
        store.create_connection(&test_connection("c2")).await.unwrap();

        let listed = store.list_connections().await.unwrap();
        let mut ids: Vec<_> = listed.iter().map(|c| c.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn reconcile_is_idempotent_for_upserted_rows() {
        let store = store_with_connection("c1").await;
        store.reconcile("c1", &batch()).await.unwrap();
        let first = store.slow_queries("c1", 0.0, 100).await.unwrap();

        store.reconcile("c1", &batch()).await.unwrap();
        let second = store.slow_queries("c1", 0.0, 100).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(count(&store, "queries").await, 2);
        assert_eq!(count(&store, "table_access_patterns").await, 1);
        assert_eq!(count(&store, "index_usage").await, 1);

        // Snapshots and stat samples are append-only history.
        assert_eq!(count(&store, "schema_snapshots").await, 2);
        assert_eq!(count(&store, "query_stat_samples").await, 4);
    }

    #[tokio::test]
    async fn duplicate_natural_keys_keep_the_later_entry() {
        let store = store_with_connection("c1").await;
        let mut b = batch();
        b.query_stats = vec![stat("dup", 1, 10.0), stat("dup", 99, 2000.0)];
        store.reconcile("c1", &b).await.unwrap();

        let rows = store.slow_queries("c1", 0.0, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].execution_count, 99);
        assert_eq!(rows[0].avg_execution_time_ms, 2000.0);
    }

    #[tokio::test]
    async fn failed_reconcile_leaves_prior_state_intact() {
        let store = store_with_connection("c1").await;
        store.reconcile("c1", &batch()).await.unwrap();
        let before = store.slow_queries("c1", 0.0, 100).await.unwrap();

        let mut poisoned = batch();
        poisoned.query_stats = vec![stat("q1", 777, 5.0), stat("bad", -1, 5.0)];
        assert!(store.reconcile("c1", &poisoned).await.is_err());

        // The q1 update in the same batch must have rolled back too.
        let after = store.slow_queries("c1", 0.0, 100).await.unwrap();
        assert_eq!(before, after);
        assert_eq!(count(&store, "schema_snapshots").await, 1);
    }

    #[tokio::test]
    async fn slow_query_read_filters_on_mean_time() {
        let store = store_with_connection("c1").await;
        store.reconcile("c1", &batch()).await.unwrap();

        let slow = store.slow_queries("c1", 1000.0, 10).await.unwrap();
        assert_eq!(slow.len(), 1);
        assert_eq!(slow[0].query_hash, "q1");
    }

    #[tokio::test]
    async fn suggestions_append_with_status_new() {
        let store = store_with_connection("c1").await;
        let drafts = vec![SuggestionDraft {
            suggestion_type: SuggestionType::IndexOptimization,
            priority: SuggestionPriority::High,
            suggestion_text: "Add an index on orders(customer_id)".to_string(),
            query_id: Some("q1".to_string()),
        }];
        assert_eq!(store.insert_suggestions("c1", &drafts).await.unwrap(), 1);
        assert_eq!(store.insert_suggestions("c1", &drafts).await.unwrap(), 1);

        // Never deduplicated across runs.
        let listed = store.list_suggestions("c1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|s| s.status == SuggestionStatus::New));
        assert_eq!(listed[0].query_hash.as_deref(), Some("q1"));
    }

    #[tokio::test]
    async fn delete_cascades_telemetry() {
        let store = store_with_connection("c1").await;
        store.reconcile("c1", &batch()).await.unwrap();
        store
            .insert_suggestions(
                "c1",
                &[SuggestionDraft {
                    suggestion_type: SuggestionType::QueryOptimization,
                    priority: SuggestionPriority::Low,
                    suggestion_text: "Rewrite".to_string(),
                    query_id: None,
                }],
            )
            .await
            .unwrap();

        store.delete_connection("c1").await.unwrap();

        for table in [
            "queries",
            "query_stat_samples",
            "schema_snapshots",
            "schema_tables",
            "schema_columns",
            "table_access_patterns",
            "index_usage",
            "suggestions",
        ] {
            assert_eq!(count(&store, table).await, 0, "{table} not cascaded");
        }
    }

    #[tokio::test]
    async fn due_connections_respect_polling_interval() {
        let store = SqliteTelemetryStore::open_in_memory().await.unwrap();
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();

        let mut never_synced = test_connection("never");
        never_synced.last_synced_at = None;
        store.create_connection(&never_synced).await.unwrap();

        let mut fresh = test_connection("fresh");
        fresh.last_synced_at = Some(now - chrono::Duration::seconds(10));
        store.create_connection(&fresh).await.unwrap();

        let mut stale = test_connection("stale");
        stale.last_synced_at = Some(now - chrono::Duration::seconds(7200));
        store.create_connection(&stale).await.unwrap();

        let mut inactive = test_connection("inactive");
        inactive.status = ConnectionStatus::Inactive;
        inactive.last_synced_at = None;
        store.create_connection(&inactive).await.unwrap();

        let due = store.due_connections(now).await.unwrap();
        let mut ids: Vec<_> = due.iter().map(|c| c.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["never", "stale"]);
    }

    #[tokio::test]
    async fn file_backed_store_persists_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("telemetry.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteTelemetryStore::open(path).await.unwrap();
            store.create_connection(&test_connection("c1")).await.unwrap();
            store.reconcile("c1", &batch()).await.unwrap();
        }

        let reopened = SqliteTelemetryStore::open(path).await.unwrap();
        assert!(reopened.get_connection("c1").await.unwrap().is_some());
        assert_eq!(count(&reopened, "queries").await, 2);
    }

    #[tokio::test]
    async fn status_updates_require_an_existing_row() {
        let store = SqliteTelemetryStore::open_in_memory().await.unwrap();
        assert!(matches!(
            store.update_status("ghost", ConnectionStatus::Error).await,
            Err(StoreError::ConnectionNotFound(_))
        ));
    }
}
