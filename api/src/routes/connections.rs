use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use dbpulse_collector::connector::ConnectorConfig;
use dbpulse_shared::{Connection, ConnectionStatus, DbEngine};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::store::StoreError;
use crate::state::AppState;

const DEFAULT_POLLING_INTERVAL_SECS: i64 = 3600;

#[derive(Deserialize)]
pub struct CreateConnectionRequest {
    pub name: String,
    pub engine: DbEngine,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: i64,
}

fn default_polling_interval() -> i64 {
    DEFAULT_POLLING_INTERVAL_SECS
}

/// Public view of a connection; the credential envelope never leaves the
/// store.
#[derive(Serialize)]
pub struct ConnectionResponse {
    pub id: String,
    pub name: String,
    pub engine: DbEngine,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub status: ConnectionStatus,
    pub polling_interval_secs: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl From<Connection> for ConnectionResponse {
    fn from(connection: Connection) -> Self {
        Self {
            id: connection.id,
            name: connection.name,
            engine: connection.engine,
            host: connection.host,
            port: connection.port,
            database: connection.database_name,
            username: connection.username,
            status: connection.status,
            polling_interval_secs: connection.polling_interval_secs,
            last_synced_at: connection.last_synced_at,
        }
    }
}

pub async fn create_connection(
    State(state): State<AppState>,
    Json(request): Json<CreateConnectionRequest>,
) -> Result<(StatusCode, Json<ConnectionResponse>), StatusCode> {
    // The target must answer with the supplied credentials before anything is
    // stored; a connection that cannot be reached is rejected outright.
    let config = ConnectorConfig {
        host: request.host.clone(),
        port: request.port,
        database: request.database.clone(),
        username: request.username.clone(),
        password: request.password.clone(),
        tunnel: state.tunnel.clone(),
    };
    if !probe_config(&state, request.engine, config).await {
        info!(host = %request.host, "Rejected connection whose target failed the probe");
        return Err(StatusCode::BAD_REQUEST);
    }

    let encrypted = state.vault.encrypt(&request.password).map_err(|e| {
        error!(error = %e, "Failed to encrypt connection credentials");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let connection = Connection {
        id: Uuid::now_v7().to_string(),
        name: request.name,
        engine: request.engine,
        host: request.host,
        port: request.port,
        database_name: request.database,
        username: request.username,
        encrypted_password: encrypted.ciphertext,
        encryption_key_id: encrypted.key_id,
        polling_interval_secs: request.polling_interval_secs,
        status: ConnectionStatus::Active,
        last_synced_at: None,
    };

    state.store.create_connection(&connection).await.map_err(|e| {
        error!(error = %e, "Failed to create connection");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    info!(
        connection_id = %connection.id,
        engine = %connection.engine,
        host = %connection.host,
        "Connection registered"
    );

    Ok((StatusCode::CREATED, Json(ConnectionResponse::from(connection))))
}

pub async fn list_connections(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConnectionResponse>>, StatusCode> {
    let connections = state.store.list_connections().await.map_err(|e| {
        error!(error = %e, "Failed to list connections");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(
        connections.into_iter().map(ConnectionResponse::from).collect(),
    ))
}

pub async fn get_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConnectionResponse>, StatusCode> {
    let connection = state
        .store
        .get_connection(&id)
        .await
        .map_err(|e| {
            error!(connection_id = %id, error = %e, "Failed to load connection");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(ConnectionResponse::from(connection)))
}

/// Partial edit; every field is optional. A supplied password is re-encrypted
/// under the vault's active key.
#[derive(Deserialize)]
pub struct UpdateConnectionRequest {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub polling_interval_secs: Option<i64>,
}

pub async fn update_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateConnectionRequest>,
) -> Result<Json<ConnectionResponse>, StatusCode> {
    let mut connection = state
        .store
        .get_connection(&id)
        .await
        .map_err(|e| {
            error!(connection_id = %id, error = %e, "Failed to load connection");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    if let Some(name) = request.name {
        connection.name = name;
    }
    if let Some(host) = request.host {
        connection.host = host;
    }
    if let Some(port) = request.port {
        connection.port = port;
    }
    if let Some(database) = request.database {
        connection.database_name = database;
    }
    if let Some(username) = request.username {
        connection.username = username;
    }
    if let Some(interval) = request.polling_interval_secs {
        connection.polling_interval_secs = interval;
    }
    if let Some(password) = request.password {
        let encrypted = state.vault.encrypt(&password).map_err(|e| {
            error!(connection_id = %id, error = %e, "Failed to re-encrypt credentials");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        connection.encrypted_password = encrypted.ciphertext;
        connection.encryption_key_id = encrypted.key_id;
    }

    state.store.update_connection(&connection).await.map_err(|e| {
        error!(connection_id = %id, error = %e, "Failed to update connection");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    info!(connection_id = %id, "Connection updated");
    Ok(Json(ConnectionResponse::from(connection)))
}

#[derive(Serialize)]
pub struct TestConnectionResponse {
    pub ok: bool,
}

/// Probes an unsaved configuration, for the register-connection flow; nothing
/// is persisted either way.
#[derive(Deserialize)]
pub struct TestConfigRequest {
    pub engine: DbEngine,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

pub async fn test_config(
    State(state): State<AppState>,
    Json(request): Json<TestConfigRequest>,
) -> Json<TestConnectionResponse> {
    let config = ConnectorConfig {
        host: request.host,
        port: request.port,
        database: request.database,
        username: request.username,
        password: request.password,
        tunnel: state.tunnel.clone(),
    };
    let ok = probe_config(&state, request.engine, config).await;
    Json(TestConnectionResponse { ok })
}

/// TESTING → ACTIVE|ERROR. Any failure along the way reduces to `ok: false`,
/// matching the connector's own test semantics.
pub async fn test_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TestConnectionResponse>, StatusCode> {
    let connection = state
        .store
        .get_connection(&id)
        .await
        .map_err(|e| {
            error!(connection_id = %id, error = %e, "Failed to load connection");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    set_status(&state, &id, ConnectionStatus::Testing).await?;

    let ok = probe(&state, &connection).await;

    let final_status = if ok {
        ConnectionStatus::Active
    } else {
        ConnectionStatus::Error
    };
    set_status(&state, &id, final_status).await?;

    info!(connection_id = %id, ok = ok, "Connection test finished");
    Ok(Json(TestConnectionResponse { ok }))
}

async fn probe(state: &AppState, connection: &Connection) -> bool {
    let password = match state
        .vault
        .decrypt(&connection.encrypted_password, &connection.encryption_key_id)
    {
        Ok(password) => password,
        Err(e) => {
            error!(connection_id = %connection.id, error = %e, "Credential decryption failed");
            return false;
        }
    };

    let config = ConnectorConfig {
        host: connection.host.clone(),
        port: connection.port,
        database: connection.database_name.clone(),
        username: connection.username.clone(),
        password,
        tunnel: state.tunnel.clone(),
    };

    probe_config(state, connection.engine, config).await
}

async fn probe_config(state: &AppState, engine: DbEngine, config: ConnectorConfig) -> bool {
    match state.connectors.build(engine, &config).await {
        Ok(connector) => {
            let ok = connector.test_connection().await;
            connector.close().await;
            ok
        }
        Err(e) => {
            error!(host = %config.host, error = %e, "Connector build failed");
            false
        }
    }
}

async fn set_status(
    state: &AppState,
    id: &str,
    status: ConnectionStatus,
) -> Result<(), StatusCode> {
    state.store.update_status(id, status).await.map_err(|e| {
        error!(connection_id = %id, error = %e, "Failed to update connection status");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub async fn delete_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    match state.store.delete_connection(&id).await {
        Ok(()) => {
            info!(connection_id = %id, "Connection deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(StoreError::ConnectionNotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!(connection_id = %id, error = %e, "Failed to delete connection");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
