use chrono::Utc;
use dbpulse_collector::connector::{ConnectorConfig, ConnectorError, ConnectorFactory, DbConnector};
use dbpulse_collector::tunnel::TunnelConfig;
use dbpulse_collector::vault::{CredentialVault, VaultError};
use dbpulse_shared::{Connection, ConnectionStatus, TelemetryBatch};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::SyncOutcome;
use crate::store::{StoreError, TelemetryStore};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connection {0} not found")]
    NotFound(String),

    #[error("connection {0} is not active")]
    NotActive(String),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Failing before the connection was even eligible must not overwrite its
    /// status; everything after that marks it ERROR.
    fn marks_connection_error(&self) -> bool {
        !matches!(self, SyncError::NotFound(_) | SyncError::NotActive(_))
    }
}

/// Pending → Collecting → Reconciling → Completed, with Failed reachable from
/// every non-terminal state. Each step is a function of its inputs plus store
/// state, so a step redelivered by the workflow host replays safely;
/// reconciliation is upsert-based for exactly that reason.
enum SyncState {
    Pending,
    Collecting(Connection),
    Reconciling(Connection, TelemetryBatch),
    Completed,
    Failed(SyncError),
}

pub struct SyncOrchestrator {
    store: Arc<dyn TelemetryStore>,
    vault: Arc<CredentialVault>,
    connectors: Arc<dyn ConnectorFactory>,
    tunnel: Option<TunnelConfig>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        vault: Arc<CredentialVault>,
        connectors: Arc<dyn ConnectorFactory>,
        tunnel: Option<TunnelConfig>,
    ) -> Self {
        Self {
            store,
            vault,
            connectors,
            tunnel,
        }
    }

    pub async fn run(&self, connection_id: &str) -> SyncOutcome {
        info!(connection_id = %connection_id, "Starting database sync");

        let mut state = SyncState::Pending;
        loop {
            state = match state {
                SyncState::Pending => match self.load_active_connection(connection_id).await {
                    Ok(connection) => SyncState::Collecting(connection),
                    Err(e) => SyncState::Failed(e),
                },

                SyncState::Collecting(connection) => {
                    debug!(connection_id = %connection_id, engine = %connection.engine, "Collecting telemetry");
                    match self.collect(&connection).await {
                        Ok(batch) => SyncState::Reconciling(connection, batch),
                        Err(e) => SyncState::Failed(e),
                    }
                }

                SyncState::Reconciling(connection, batch) => {
                    debug!(
                        connection_id = %connection_id,
                        queries = batch.query_stats.len(),
                        tables = batch.table_patterns.len(),
                        indexes = batch.index_usage.len(),
                        "Reconciling telemetry"
                    );
                    match self.reconcile(&connection, &batch).await {
                        Ok(()) => SyncState::Completed,
                        Err(e) => SyncState::Failed(e),
                    }
                }

                SyncState::Completed => {
                    info!(connection_id = %connection_id, "Sync completed");
                    return SyncOutcome::ok();
                }

                SyncState::Failed(cause) => {
                    warn!(connection_id = %connection_id, error = %cause, "Sync failed");
                    if cause.marks_connection_error() {
                        if let Err(e) = self
                            .store
                            .update_status(connection_id, ConnectionStatus::Error)
                            .await
                        {
                            error!(
                                connection_id = %connection_id,
                                error = %e,
                                "Failed to mark connection ERROR"
                            );
                        }
                    }
                    return SyncOutcome::failed(cause);
                }
            };
        }
    }

    async fn load_active_connection(&self, connection_id: &str) -> Result<Connection, SyncError> {
        let connection = self
            .store
            .get_connection(connection_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(connection_id.to_string()))?;

        // Prevents concurrent re-sync of a connection mid-test or already
        // erroring.
        if connection.status != ConnectionStatus::Active {
            return Err(SyncError::NotActive(connection_id.to_string()));
        }

        Ok(connection)
    }

    async fn collect(&self, connection: &Connection) -> Result<TelemetryBatch, SyncError> {
        let password = self
            .vault
            .decrypt(&connection.encrypted_password, &connection.encryption_key_id)?;

        let config = ConnectorConfig {
            host: connection.host.clone(),
            port: connection.port,
            database: connection.database_name.clone(),
            username: connection.username.clone(),
            password,
            tunnel: self.tunnel.clone(),
        };

        let connector = self.connectors.build(connection.engine, &config).await?;
        let gathered = gather(connector.as_ref()).await;
        connector.close().await;
        Ok(gathered?)
    }

    async fn reconcile(
        &self,
        connection: &Connection,
        batch: &TelemetryBatch,
    ) -> Result<(), SyncError> {
        self.store.reconcile(&connection.id, batch).await?;
        self.store.mark_synced(&connection.id, Utc::now()).await?;
        Ok(())
    }
}

async fn gather(connector: &dyn DbConnector) -> Result<TelemetryBatch, ConnectorError> {
    let query_stats = connector.fetch_query_stats().await?;
    let schema = connector.fetch_schema().await?;
    let index_usage = connector.fetch_index_usage().await?;
    let table_patterns = connector.fetch_table_access_patterns().await?;

    Ok(TelemetryBatch {
        query_stats,
        schema,
        index_usage,
        table_patterns,
    })
}
