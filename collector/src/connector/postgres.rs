use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, Pool};
use dbpulse_shared::{
    ColumnInfo, IndexUsage, QueryPlan, QueryStat, SchemaInfo, TableAccessPattern, TableInfo,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::NoTls;
use tracing::{debug, warn};

use super::{ConnectorConfig, ConnectorError, DbConnector};
use crate::normalize;
use crate::tunnel::TunnelForwarder;

const POOL_SIZE: usize = 5;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PLAN_BATCH_LIMIT: i64 = 50;

const QUERY_STATS_SQL: &str = r#"
    SELECT
        query,
        md5(query) AS query_hash,
        calls AS execution_count,
        mean_exec_time AS avg_execution_time_ms,
        total_exec_time AS total_execution_time_ms
    FROM pg_stat_statements
    WHERE query NOT LIKE '%pg_stat_statements%'
    ORDER BY total_exec_time DESC
    LIMIT 1000
"#;

const TABLES_SQL: &str = r#"
    SELECT table_name
    FROM information_schema.tables
    WHERE table_schema = 'public'
      AND table_type = 'BASE TABLE'
    ORDER BY table_name
"#;

const COLUMNS_SQL: &str = r#"
    SELECT column_name, data_type, is_nullable
    FROM information_schema.columns
    WHERE table_schema = 'public'
      AND table_name = $1
    ORDER BY ordinal_position
"#;

const INDEX_USAGE_SQL: &str = r#"
    SELECT
        relname AS table_name,
        indexrelname AS index_name,
        COALESCE(idx_scan, 0)::bigint AS scans,
        COALESCE(idx_tup_read, 0)::bigint AS tuples_read,
        COALESCE(idx_tup_fetch, 0)::bigint AS tuples_fetched
    FROM pg_stat_user_indexes
    WHERE schemaname = 'public'
    ORDER BY idx_scan DESC
"#;

const TABLE_PATTERNS_SQL: &str = r#"
    SELECT
        relname AS table_name,
        (COALESCE(seq_scan, 0) + COALESCE(idx_scan, 0))::bigint AS access_count,
        last_analyze,
        last_autoanalyze
    FROM pg_stat_user_tables
    WHERE schemaname = 'public'
    ORDER BY COALESCE(seq_scan, 0) + COALESCE(idx_scan, 0) DESC
"#;

const PLAN_LOOKUP_SQL: &str = r#"
    SELECT query, md5(query) AS query_hash
    FROM pg_stat_statements
    WHERE md5(query) = ANY($1)
    LIMIT $2
"#;

/// Collects telemetry from pg_stat_statements and the statistics collector
/// views over a small bounded pool.
pub struct PostgresConnector {
    pool: Pool,
    forwarder: Option<TunnelForwarder>,
}

impl PostgresConnector {
    pub async fn connect(config: &ConnectorConfig) -> Result<Self, ConnectorError> {
        let (host, port, forwarder) = match &config.tunnel {
            Some(tunnel) => {
                let forwarder =
                    TunnelForwarder::start(tunnel, &config.host, config.port).await?;
                let addr = forwarder.local_addr();
                (addr.ip().to_string(), addr.port(), Some(forwarder))
            }
            None => (config.host.clone(), config.port, None),
        };

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&host)
            .port(port)
            .dbname(&config.database)
            .user(&config.username)
            .password(&config.password)
            .connect_timeout(CONNECT_TIMEOUT);

        let manager = Manager::new(pg_config, NoTls);
        let pool = Pool::builder(manager)
            .max_size(POOL_SIZE)
            .build()
            .map_err(|e| ConnectorError::PoolSetup(e.to_string()))?;

        Ok(Self { pool, forwarder })
    }
}

#[async_trait]
impl DbConnector for PostgresConnector {
    async fn test_connection(&self) -> bool {
        match self.pool.get().await {
            Ok(client) => client.simple_query("SELECT 1").await.is_ok(),
            Err(e) => {
                debug!(error = %e, "Postgres connection test failed");
                false
            }
        }
    }

    async fn fetch_query_stats(&self) -> Result<Vec<QueryStat>, ConnectorError> {
        let client = self.pool.get().await?;

        // Needs superuser on most installations; a refusal just means the
        // extension is managed elsewhere.
        if let Err(e) = client
            .batch_execute("CREATE EXTENSION IF NOT EXISTS pg_stat_statements")
            .await
        {
            debug!(error = %e, "Could not ensure pg_stat_statements extension");
        }

        let rows = match client.query(QUERY_STATS_SQL, &[]).await {
            Ok(rows) => rows,
            Err(e) if stats_source_missing(&e) => {
                warn!(error = %e, "pg_stat_statements unavailable, returning no query stats");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let raw = rows
            .iter()
            .map(|row| normalize::PgStatRow {
                query: row.get("query"),
                query_hash: row.get("query_hash"),
                calls: row.get("execution_count"),
                mean_exec_time_ms: row.get("avg_execution_time_ms"),
                total_exec_time_ms: row.get("total_execution_time_ms"),
            })
            .collect();

        Ok(normalize::query_stats_from_pg(raw, Utc::now()))
    }

    async fn fetch_schema(&self) -> Result<SchemaInfo, ConnectorError> {
        let client = self.pool.get().await?;

        let table_rows = client.query(TABLES_SQL, &[]).await?;
        let mut tables = Vec::with_capacity(table_rows.len());

        for table_row in table_rows {
            let name: String = table_row.get("table_name");
            let column_rows = client.query(COLUMNS_SQL, &[&name]).await?;
            let columns = column_rows
                .iter()
                .map(|row| ColumnInfo {
                    name: row.get("column_name"),
                    data_type: row.get("data_type"),
                    nullable: normalize::nullable_from_catalog(row.get("is_nullable")),
                })
                .collect();
            tables.push(TableInfo { name, columns });
        }

        Ok(SchemaInfo { tables })
    }

    async fn fetch_query_plans(
        &self,
        query_hashes: Option<&[String]>,
    ) -> Result<HashMap<String, Vec<QueryPlan>>, ConnectorError> {
        let mut plans = HashMap::new();
        let hashes = match query_hashes {
            Some(hashes) if !hashes.is_empty() => hashes.to_vec(),
            _ => return Ok(plans),
        };

        let client = self.pool.get().await?;
        let rows = match client
            .query(PLAN_LOOKUP_SQL, &[&hashes, &PLAN_BATCH_LIMIT])
            .await
        {
            Ok(rows) => rows,
            Err(e) if stats_source_missing(&e) => return Ok(plans),
            Err(e) => return Err(e.into()),
        };

        for row in rows {
            let query: String = row.get("query");
            let hash: String = row.get("query_hash");

            // EXPLAIN of a captured statement can fail for many reasons
            // (dropped relations, parameters, permissions); one bad statement
            // never fails the batch.
            let explain = format!("EXPLAIN (FORMAT JSON) {query}");
            match client.query(&explain, &[]).await {
                Ok(plan_rows) => {
                    let parsed: Vec<QueryPlan> = plan_rows
                        .iter()
                        .map(|plan_row| {
                            let plan_json: serde_json::Value = plan_row.get(0);
                            let cost_estimate = extract_cost(&plan_json);
                            QueryPlan {
                                plan_json,
                                cost_estimate,
                            }
                        })
                        .collect();
                    plans.insert(hash, parsed);
                }
                Err(e) => {
                    debug!(query_hash = %hash, error = %e, "EXPLAIN failed, skipping hash");
                }
            }
        }

        Ok(plans)
    }

    async fn fetch_index_usage(&self) -> Result<Vec<IndexUsage>, ConnectorError> {
        let client = self.pool.get().await?;
        let rows = match client.query(INDEX_USAGE_SQL, &[]).await {
            Ok(rows) => rows,
            Err(e) if stats_source_missing(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let raw = rows
            .iter()
            .map(|row| normalize::PgIndexRow {
                table_name: row.get("table_name"),
                index_name: row.get("index_name"),
                idx_scan: row.get("scans"),
                idx_tup_read: row.get("tuples_read"),
                idx_tup_fetch: row.get("tuples_fetched"),
            })
            .collect();

        Ok(normalize::index_usage_from_pg(raw))
    }

    async fn fetch_table_access_patterns(
        &self,
    ) -> Result<Vec<TableAccessPattern>, ConnectorError> {
        let client = self.pool.get().await?;
        let rows = match client.query(TABLE_PATTERNS_SQL, &[]).await {
            Ok(rows) => rows,
            Err(e) if stats_source_missing(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let raw = rows
            .iter()
            .map(|row| normalize::PgTableRow {
                table_name: row.get("table_name"),
                access_count: row.get("access_count"),
                last_analyze: row.get::<_, Option<DateTime<Utc>>>("last_analyze"),
                last_autoanalyze: row.get::<_, Option<DateTime<Utc>>>("last_autoanalyze"),
            })
            .collect();

        Ok(normalize::table_patterns_from_pg(raw))
    }

    async fn close(&self) {
        self.pool.close();
        if let Some(forwarder) = &self.forwarder {
            forwarder.shutdown();
        }
    }
}

fn stats_source_missing(e: &tokio_postgres::Error) -> bool {
    matches!(
        e.code(),
        Some(&SqlState::UNDEFINED_TABLE)
            | Some(&SqlState::UNDEFINED_OBJECT)
            | Some(&SqlState::INSUFFICIENT_PRIVILEGE)
    )
}

fn extract_cost(plan: &serde_json::Value) -> Option<f64> {
    plan.get(0)?.get("Plan")?.get("Total Cost")?.as_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> ConnectorConfig {
        ConnectorConfig {
            host: "127.0.0.1".to_string(),
            // Reserved port nothing listens on.
            port: 1,
            database: "postgres".to_string(),
            username: "monitor".to_string(),
            password: "monitor".to_string(),
            tunnel: None,
        }
    }

    #[tokio::test]
    async fn test_connection_reduces_failure_to_false() {
        let connector = PostgresConnector::connect(&unreachable_config()).await.unwrap();
        assert!(!connector.test_connection().await);
        connector.close().await;
    }

    #[tokio::test]
    async fn fetch_against_unreachable_target_is_an_error() {
        let connector = PostgresConnector::connect(&unreachable_config()).await.unwrap();
        assert!(connector.fetch_query_stats().await.is_err());
        connector.close().await;
    }

    #[tokio::test]
    async fn plans_without_hashes_short_circuit() {
        let connector = PostgresConnector::connect(&unreachable_config()).await.unwrap();
        // No hashes means no pool checkout at all, so this succeeds even
        // though the target is unreachable.
        let plans = connector.fetch_query_plans(None).await.unwrap();
        assert!(plans.is_empty());
        let plans = connector.fetch_query_plans(Some(&[])).await.unwrap();
        assert!(plans.is_empty());
        connector.close().await;
    }

    #[test]
    fn cost_extraction_reads_total_cost() {
        let plan: serde_json::Value = serde_json::json!([
            { "Plan": { "Node Type": "Seq Scan", "Total Cost": 1234.5 } }
        ]);
        assert_eq!(extract_cost(&plan), Some(1234.5));
        assert_eq!(extract_cost(&serde_json::json!({})), None);
    }
}
