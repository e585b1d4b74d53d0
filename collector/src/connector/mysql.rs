use async_trait::async_trait;
use chrono::Utc;
use dbpulse_shared::{
    ColumnInfo, IndexUsage, QueryPlan, QueryStat, SchemaInfo, TableAccessPattern, TableInfo,
};
use mysql_async::prelude::Queryable;
use mysql_async::{Opts, OptsBuilder, Params, Pool, PoolConstraints, PoolOpts, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::{ConnectorConfig, ConnectorError, DbConnector};
use crate::normalize;
use crate::tunnel::TunnelForwarder;

const POOL_MIN: usize = 1;
const POOL_MAX: usize = 10;
const PLAN_BATCH_LIMIT: usize = 50;

const QUERY_STATS_SQL: &str = r#"
    SELECT
        DIGEST_TEXT,
        DIGEST,
        COUNT_STAR,
        AVG_TIMER_WAIT,
        SUM_TIMER_WAIT
    FROM performance_schema.events_statements_summary_by_digest
    WHERE SCHEMA_NAME = ?
      AND DIGEST_TEXT IS NOT NULL
      AND DIGEST_TEXT NOT LIKE '%performance_schema%'
    ORDER BY SUM_TIMER_WAIT DESC
    LIMIT 1000
"#;

const TABLES_SQL: &str = r#"
    SELECT TABLE_NAME
    FROM information_schema.TABLES
    WHERE TABLE_SCHEMA = ?
      AND TABLE_TYPE = 'BASE TABLE'
    ORDER BY TABLE_NAME
"#;

const COLUMNS_SQL: &str = r#"
    SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE
    FROM information_schema.COLUMNS
    WHERE TABLE_SCHEMA = ?
      AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION
"#;

const INDEX_USAGE_SQL: &str = r#"
    SELECT TABLE_NAME, INDEX_NAME, CARDINALITY
    FROM information_schema.STATISTICS
    WHERE TABLE_SCHEMA = ?
    ORDER BY INDEX_NAME
"#;

const TABLE_PATTERNS_SQL: &str = r#"
    SELECT
        TABLE_NAME,
        TABLE_ROWS,
        CAST(UNIX_TIMESTAMP(UPDATE_TIME) AS SIGNED)
    FROM information_schema.TABLES
    WHERE TABLE_SCHEMA = ?
      AND TABLE_TYPE = 'BASE TABLE'
    ORDER BY TABLE_ROWS DESC
"#;

/// Collects telemetry from the performance_schema statement digests and the
/// information_schema catalog over a bounded pool.
pub struct MySqlConnector {
    pool: Pool,
    database: String,
    forwarder: Option<TunnelForwarder>,
}

impl MySqlConnector {
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

        let constraints = PoolConstraints::new(POOL_MIN, POOL_MAX).unwrap_or_default();
        let opts: Opts = OptsBuilder::default()
            .ip_or_hostname(host)
            .tcp_port(port)
            .db_name(Some(config.database.clone()))
            .user(Some(config.username.clone()))
            .pass(Some(config.password.clone()))
            .pool_opts(PoolOpts::default().with_constraints(constraints))
            .into();

        Ok(Self {
            pool: Pool::new(opts),
            database: config.database.clone(),
            forwarder,
        })
    }
}

#[async_trait]
impl DbConnector for MySqlConnector {
    async fn test_connection(&self) -> bool {
        match self.pool.get_conn().await {
            Ok(mut conn) => conn.query_drop("SELECT 1").await.is_ok(),
            Err(e) => {
                debug!(error = %e, "MySQL connection test failed");
                false
            }
        }
    }

    async fn fetch_query_stats(&self) -> Result<Vec<QueryStat>, ConnectorError> {
        let mut conn = self.pool.get_conn().await?;

        // Almost always denied at runtime; instrumentation is expected to be
        // enabled in the server configuration instead.
        if let Err(e) = conn.query_drop("SET GLOBAL performance_schema = ON").await {
            debug!(error = %e, "Could not enable performance_schema");
        }

        let rows: Vec<(Option<String>, Option<String>, u64, u64, u64)> = match conn
            .exec(QUERY_STATS_SQL, (self.database.as_str(),))
            .await
        {
            Ok(rows) => rows,
            Err(mysql_async::Error::Server(e)) => {
                warn!(error = %e, "performance_schema unavailable, returning no query stats");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let raw = rows
            .into_iter()
            .map(
                |(digest_text, digest, count_star, avg_ps, sum_ps)| normalize::MySqlDigestRow {
                    digest_text,
                    digest,
                    count_star,
                    avg_timer_wait_ps: avg_ps,
                    sum_timer_wait_ps: sum_ps,
                },
            )
            .collect();

        Ok(normalize::query_stats_from_mysql(raw, Utc::now()))
    }

    async fn fetch_schema(&self) -> Result<SchemaInfo, ConnectorError> {
        let mut conn = self.pool.get_conn().await?;

        let table_names: Vec<String> = conn
            .exec(TABLES_SQL, (self.database.as_str(),))
            .await?;

        let mut tables = Vec::with_capacity(table_names.len());
        for name in table_names {
            let columns: Vec<(String, String, String)> = conn
                .exec(COLUMNS_SQL, (self.database.as_str(), name.as_str()))
                .await?;
            let columns = columns
                .into_iter()
                .map(|(column_name, data_type, is_nullable)| ColumnInfo {
                    name: column_name,
                    data_type,
                    nullable: normalize::nullable_from_catalog(&is_nullable),
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
            Some(hashes) if !hashes.is_empty() => hashes,
            _ => return Ok(plans),
        };

        let mut conn = self.pool.get_conn().await?;

        let placeholders = vec!["?"; hashes.len()].join(",");
        let lookup_sql = format!(
            "SELECT DIGEST_TEXT, DIGEST \
             FROM performance_schema.events_statements_summary_by_digest \
             WHERE SCHEMA_NAME = ? AND DIGEST IN ({placeholders}) \
             LIMIT {PLAN_BATCH_LIMIT}"
        );
        let params: Vec<Value> = std::iter::once(Value::from(self.database.as_str()))
            .chain(hashes.iter().map(|hash| Value::from(hash.as_str())))
            .collect();

        let rows: Vec<(Option<String>, Option<String>)> = match conn
            .exec(lookup_sql, Params::Positional(params))
            .await
        {
            Ok(rows) => rows,
            Err(mysql_async::Error::Server(_)) => return Ok(plans),
            Err(e) => return Err(e.into()),
        };

        for (digest_text, digest) in rows {
            let (Some(text), Some(hash)) = (digest_text, digest) else {
                continue;
            };

            // Digest texts carry placeholders and may no longer be
            // explainable; one failed statement never fails the batch.
            match conn
                .query_first::<String, _>(format!("EXPLAIN FORMAT=JSON {text}"))
                .await
            {
                Ok(Some(raw_plan)) => match serde_json::from_str::<serde_json::Value>(&raw_plan) {
                    Ok(plan_json) => {
                        let cost_estimate = extract_cost(&plan_json);
                        plans.insert(
                            hash,
                            vec![QueryPlan {
                                plan_json,
                                cost_estimate,
                            }],
                        );
                    }
                    Err(e) => {
                        debug!(query_hash = %hash, error = %e, "Unparsable plan JSON, skipping hash");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    debug!(query_hash = %hash, error = %e, "EXPLAIN failed, skipping hash");
                }
            }
        }

        Ok(plans)
    }

    async fn fetch_index_usage(&self) -> Result<Vec<IndexUsage>, ConnectorError> {
        let mut conn = self.pool.get_conn().await?;

        let rows: Vec<(String, Option<String>, Option<i64>)> = match conn
            .exec(INDEX_USAGE_SQL, (self.database.as_str(),))
            .await
        {
            Ok(rows) => rows,
            Err(mysql_async::Error::Server(e)) => {
                warn!(error = %e, "information_schema.STATISTICS unavailable");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let raw = rows
            .into_iter()
            .map(|(table_name, index_name, cardinality)| normalize::MySqlIndexRow {
                table_name,
                index_name,
                cardinality,
            })
            .collect();

        Ok(normalize::index_usage_from_mysql(raw))
    }

    async fn fetch_table_access_patterns(
        &self,
    ) -> Result<Vec<TableAccessPattern>, ConnectorError> {
        let mut conn = self.pool.get_conn().await?;

        let rows: Vec<(String, Option<u64>, Option<i64>)> = match conn
            .exec(TABLE_PATTERNS_SQL, (self.database.as_str(),))
            .await
        {
            Ok(rows) => rows,
            Err(mysql_async::Error::Server(e)) => {
                warn!(error = %e, "information_schema.TABLES unavailable");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let raw = rows
            .into_iter()
            .map(|(table_name, table_rows, update_epoch)| normalize::MySqlTableRow {
                table_name,
                table_rows,
                update_time_epoch_secs: update_epoch,
            })
            .collect();

        Ok(normalize::table_patterns_from_mysql(raw))
    }

    async fn close(&self) {
        if let Err(e) = self.pool.clone().disconnect().await {
            debug!(error = %e, "MySQL pool disconnect failed");
        }
        if let Some(forwarder) = &self.forwarder {
            forwarder.shutdown();
        }
    }
}

fn extract_cost(plan: &serde_json::Value) -> Option<f64> {
    plan.get("query_block")?
        .get("cost_info")?
        .get("query_cost")?
        .as_str()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> ConnectorConfig {
        ConnectorConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            database: "appdb".to_string(),
            username: "monitor".to_string(),
            password: "monitor".to_string(),
            tunnel: None,
        }
    }

    #[tokio::test]
    async fn test_connection_reduces_failure_to_false() {
        let connector = MySqlConnector::connect(&unreachable_config()).await.unwrap();
        assert!(!connector.test_connection().await);
        connector.close().await;
    }

    #[test]
    fn cost_extraction_parses_the_query_cost_string() {
        let plan = serde_json::json!({
            "query_block": { "cost_info": { "query_cost": "104.75" } }
        });
        assert_eq!(extract_cost(&plan), Some(104.75));
        assert_eq!(extract_cost(&serde_json::json!({})), None);
    }
}
