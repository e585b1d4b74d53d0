mod mysql;
mod postgres;

pub use mysql::MySqlConnector;
pub use postgres::PostgresConnector;

use async_trait::async_trait;
use dbpulse_shared::{DbEngine, IndexUsage, QueryPlan, QueryStat, SchemaInfo, TableAccessPattern};
use std::collections::HashMap;
use thiserror::Error;

use crate::tunnel::TunnelConfig;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("postgres pool error: {0}")]
    PostgresPool(#[from] deadpool_postgres::PoolError),

    #[error("mysql error: {0}")]
    Mysql(#[from] mysql_async::Error),

    #[error("tunnel error: {0}")]
    Tunnel(#[from] std::io::Error),

    #[error("pool setup failed: {0}")]
    PoolSetup(String),
}

/// One target database plus the credentials for this attempt. The tunnel is
/// chosen per attempt, not per connector lifetime, so a caller can retry a
/// failed direct attempt through the proxy.
#[derive(Clone, Debug)]
pub struct ConnectorConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub tunnel: Option<TunnelConfig>,
}

/// Capability set every engine variant implements. All stat fetches degrade
/// to an empty collection when the monitoring source is unavailable; only
/// transport-level failures surface as errors.
#[async_trait]
pub trait DbConnector: Send + Sync {
    /// Never fails: any problem reduces to `false`.
    async fn test_connection(&self) -> bool;

    async fn fetch_query_stats(&self) -> Result<Vec<QueryStat>, ConnectorError>;

    async fn fetch_schema(&self) -> Result<SchemaInfo, ConnectorError>;

    /// Plans for the given statement hashes. A hash that fails to EXPLAIN is
    /// silently excluded; the batch itself never fails over one statement.
    async fn fetch_query_plans(
        &self,
        query_hashes: Option<&[String]>,
    ) -> Result<HashMap<String, Vec<QueryPlan>>, ConnectorError>;

    async fn fetch_index_usage(&self) -> Result<Vec<IndexUsage>, ConnectorError>;

    async fn fetch_table_access_patterns(&self) -> Result<Vec<TableAccessPattern>, ConnectorError>;

    /// Tears down the pool and, when tunneled, the local forwarder.
    async fn close(&self);
}

/// Builds the variant matching the stored engine discriminator.
pub async fn build_connector(
    engine: DbEngine,
    config: &ConnectorConfig,
) -> Result<Box<dyn DbConnector>, ConnectorError> {
    match engine {
        DbEngine::Postgres => Ok(Box::new(PostgresConnector::connect(config).await?)),
        DbEngine::Mysql => Ok(Box::new(MySqlConnector::connect(config).await?)),
    }
}

/// Seam for the orchestrators: production wires [`NativeConnectorFactory`],
/// tests substitute canned connectors.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn build(
        &self,
        engine: DbEngine,
        config: &ConnectorConfig,
    ) -> Result<Box<dyn DbConnector>, ConnectorError>;
}

pub struct NativeConnectorFactory;

#[async_trait]
impl ConnectorFactory for NativeConnectorFactory {
    async fn build(
        &self,
        engine: DbEngine,
        config: &ConnectorConfig,
    ) -> Result<Box<dyn DbConnector>, ConnectorError> {
        build_connector(engine, config).await
    }
}
