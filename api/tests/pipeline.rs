use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dbpulse_api::generator::{GenerationError, SuggestionContext, SuggestionGenerator};
use dbpulse_api::store::{SqliteTelemetryStore, TelemetryStore};
use dbpulse_api::workflows::{SuggestionOrchestrator, SyncOrchestrator};
use dbpulse_collector::connector::{
    ConnectorConfig, ConnectorError, ConnectorFactory, DbConnector,
};
use dbpulse_collector::vault::CredentialVault;
use dbpulse_shared::{
    ColumnInfo, Connection, ConnectionStatus, DbEngine, IndexUsage, QueryPlan, QueryStat,
    SchemaInfo, SuggestionDraft, SuggestionPriority, SuggestionStatus, SuggestionType,
    TableAccessPattern, TableInfo, TelemetryBatch,
};

const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
const PASSWORD: &str = "s3cret-db-pass";

struct FakeConnector {
    batch: TelemetryBatch,
    fail: bool,
}

#[async_trait]
impl DbConnector for FakeConnector {
    async fn test_connection(&self) -> bool {
        !self.fail
    }

    async fn fetch_query_stats(&self) -> Result<Vec<QueryStat>, ConnectorError> {
        if self.fail {
            return Err(unreachable_target());
        }
        Ok(self.batch.query_stats.clone())
    }

    async fn fetch_schema(&self) -> Result<SchemaInfo, ConnectorError> {
        if self.fail {
            return Err(unreachable_target());
        }
        Ok(self.batch.schema.clone())
    }

    async fn fetch_query_plans(
        &self,
        _query_hashes: Option<&[String]>,
    ) -> Result<HashMap<String, Vec<QueryPlan>>, ConnectorError> {
        Ok(HashMap::new())
    }

    async fn fetch_index_usage(&self) -> Result<Vec<IndexUsage>, ConnectorError> {
        if self.fail {
            return Err(unreachable_target());
        }
        Ok(self.batch.index_usage.clone())
    }

    async fn fetch_table_access_patterns(&self) -> Result<Vec<TableAccessPattern>, ConnectorError> {
        if self.fail {
            return Err(unreachable_target());
        }
        Ok(self.batch.table_patterns.clone())
    }

    async fn close(&self) {}
}

fn unreachable_target() -> ConnectorError {
    ConnectorError::Tunnel(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "target unreachable",
    ))
}

struct FakeFactory {
    batch: TelemetryBatch,
    fail: bool,
    builds: AtomicUsize,
    seen_passwords: Mutex<Vec<String>>,
}

impl FakeFactory {
    fn new(batch: TelemetryBatch) -> Self {
        Self {
            batch,
            fail: false,
            builds: AtomicUsize::new(0),
            seen_passwords: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            batch: TelemetryBatch::default(),
            fail: true,
            builds: AtomicUsize::new(0),
            seen_passwords: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ConnectorFactory for FakeFactory {
    async fn build(
        &self,
        _engine: DbEngine,
        config: &ConnectorConfig,
    ) -> Result<Box<dyn DbConnector>, ConnectorError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.seen_passwords
            .lock()
            .unwrap()
            .push(config.password.clone());
        Ok(Box::new(FakeConnector {
            batch: self.batch.clone(),
            fail: self.fail,
        }))
    }
}

struct FakeGenerator {
    drafts: Vec<SuggestionDraft>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeGenerator {
    fn returning(drafts: Vec<SuggestionDraft>) -> Self {
        Self {
            drafts,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            drafts: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SuggestionGenerator for FakeGenerator {
    async fn generate(
        &self,
        _context: &SuggestionContext,
    ) -> Result<Vec<SuggestionDraft>, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(GenerationError::InvalidContent(
                "not a JSON array".to_string(),
            ));
        }
        Ok(self.drafts.clone())
    }
}

fn vault() -> Arc<CredentialVault> {
    Arc::new(CredentialVault::new("default", KEY_HEX, &[]).unwrap())
}

fn connection(vault: &CredentialVault, id: &str, status: ConnectionStatus) -> Connection {
    let encrypted = vault.encrypt(PASSWORD).unwrap();
    Connection {
        id: id.to_string(),
        name: "orders production".to_string(),
        engine: DbEngine::Postgres,
        host: "db.customer.example".to_string(),
        port: 5432,
        database_name: "orders".to_string(),
        username: "monitor".to_string(),
        encrypted_password: encrypted.ciphertext,
        encryption_key_id: encrypted.key_id,
        polling_interval_secs: 3600,
        status,
        last_synced_at: None,
    }
}

fn slow_query_batch() -> TelemetryBatch {
    let at = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
    TelemetryBatch {
        query_stats: vec![QueryStat {
            query_text: "SELECT * FROM orders WHERE customer_id = $1".to_string(),
            query_hash: "slow-q".to_string(),
            execution_count: 20,
            avg_execution_time_ms: 1500.0,
            total_execution_time_ms: 30000.0,
            first_seen_at: at,
            last_seen_at: at,
        }],
        schema: SchemaInfo {
            tables: vec![TableInfo {
                name: "orders".to_string(),
                columns: vec![ColumnInfo {
                    name: "customer_id".to_string(),
                    data_type: "bigint".to_string(),
                    nullable: false,
                }],
            }],
        },
        index_usage: vec![IndexUsage {
            table_name: "orders".to_string(),
            index_name: "orders_pkey".to_string(),
            scans: 11,
            tuples_read: 40,
            tuples_fetched: 35,
        }],
        table_patterns: vec![TableAccessPattern {
            table_name: "orders".to_string(),
            access_count: 512,
            last_accessed_at: None,
        }],
    }
}

#[tokio::test]
async fn successful_sync_leaves_connection_active_and_synced() {
    let vault = vault();
    let store: Arc<dyn TelemetryStore> =
        Arc::new(SqliteTelemetryStore::open_in_memory().await.unwrap());
    store
        .create_connection(&connection(&vault, "c1", ConnectionStatus::Active))
        .await
        .unwrap();

    let factory = Arc::new(FakeFactory::new(slow_query_batch()));
    let orchestrator =
        SyncOrchestrator::new(store.clone(), vault.clone(), factory.clone(), None);

    let outcome = orchestrator.run("c1").await;
    assert!(outcome.success, "sync failed: {:?}", outcome.error);

    let synced = store.get_connection("c1").await.unwrap().unwrap();
    assert_eq!(synced.status, ConnectionStatus::Active);
    assert!(synced.last_synced_at.is_some());

    // The connector received the decrypted credentials, not the envelope.
    assert_eq!(
        factory.seen_passwords.lock().unwrap().as_slice(),
        &[PASSWORD.to_string()]
    );

    // Replaying the same step set is safe.
    let replay = orchestrator.run("c1").await;
    assert!(replay.success);
    let slow = store.slow_queries("c1", 1000.0, 10).await.unwrap();
    assert_eq!(slow.len(), 1);
    assert_eq!(slow[0].query_hash, "slow-q");
}

#[tokio::test]
async fn failed_collection_marks_connection_error() {
    let vault = vault();
    let store: Arc<dyn TelemetryStore> =
        Arc::new(SqliteTelemetryStore::open_in_memory().await.unwrap());
    store
        .create_connection(&connection(&vault, "c1", ConnectionStatus::Active))
        .await
        .unwrap();

    let orchestrator = SyncOrchestrator::new(
        store.clone(),
        vault.clone(),
        Arc::new(FakeFactory::failing()),
        None,
    );

    let outcome = orchestrator.run("c1").await;
    assert!(!outcome.success);
    assert!(outcome.error.is_some());

    let failed = store.get_connection("c1").await.unwrap().unwrap();
    assert_eq!(failed.status, ConnectionStatus::Error);
    assert!(failed.last_synced_at.is_none());

    // Nothing was partially committed.
    assert!(store.slow_queries("c1", 0.0, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn sync_fails_fast_when_connection_is_not_active() {
    let vault = vault();
    let store: Arc<dyn TelemetryStore> =
        Arc::new(SqliteTelemetryStore::open_in_memory().await.unwrap());
    store
        .create_connection(&connection(&vault, "c1", ConnectionStatus::Inactive))
        .await
        .unwrap();

    let factory = Arc::new(FakeFactory::new(slow_query_batch()));
    let orchestrator =
        SyncOrchestrator::new(store.clone(), vault.clone(), factory.clone(), None);

    let outcome = orchestrator.run("c1").await;
    assert!(!outcome.success);

    // The target database is never contacted and the status is untouched.
    assert_eq!(factory.builds.load(Ordering::SeqCst), 0);
    let untouched = store.get_connection("c1").await.unwrap().unwrap();
    assert_eq!(untouched.status, ConnectionStatus::Inactive);
}

#[tokio::test]
async fn suggestion_run_short_circuits_without_slow_queries() {
    let vault = vault();
    let store: Arc<dyn TelemetryStore> =
        Arc::new(SqliteTelemetryStore::open_in_memory().await.unwrap());
    store
        .create_connection(&connection(&vault, "c1", ConnectionStatus::Active))
        .await
        .unwrap();

    // Reconcile telemetry whose one query is comfortably fast.
    let mut batch = slow_query_batch();
    batch.query_stats[0].avg_execution_time_ms = 40.0;
    store.reconcile("c1", &batch).await.unwrap();

    let generator = Arc::new(FakeGenerator::returning(vec![]));
    let orchestrator = SuggestionOrchestrator::new(store.clone(), generator.clone(), 1000.0);

    let outcome = orchestrator.run("c1").await;
    assert!(outcome.success);
    assert_eq!(outcome.suggestions, 0);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    assert!(store.list_suggestions("c1").await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_generation_fails_the_run_without_touching_sync_health() {
    let vault = vault();
    let store: Arc<dyn TelemetryStore> =
        Arc::new(SqliteTelemetryStore::open_in_memory().await.unwrap());
    store
        .create_connection(&connection(&vault, "c1", ConnectionStatus::Active))
        .await
        .unwrap();
    store.reconcile("c1", &slow_query_batch()).await.unwrap();

    let generator = Arc::new(FakeGenerator::failing());
    let orchestrator = SuggestionOrchestrator::new(store.clone(), generator.clone(), 1000.0);

    let outcome = orchestrator.run("c1").await;
    assert!(!outcome.success);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert!(store.list_suggestions("c1").await.unwrap().is_empty());

    // Connection health is a sync concern only.
    let connection = store.get_connection("c1").await.unwrap().unwrap();
    assert_eq!(connection.status, ConnectionStatus::Active);
}

#[tokio::test]
async fn sync_then_generation_persists_one_new_suggestion() {
    let vault = vault();
    let store: Arc<dyn TelemetryStore> =
        Arc::new(SqliteTelemetryStore::open_in_memory().await.unwrap());
    store
        .create_connection(&connection(&vault, "c1", ConnectionStatus::Active))
        .await
        .unwrap();

    let sync = SyncOrchestrator::new(
        store.clone(),
        vault.clone(),
        Arc::new(FakeFactory::new(slow_query_batch())),
        None,
    );
    assert!(sync.run("c1").await.success);

    let generator = Arc::new(FakeGenerator::returning(vec![SuggestionDraft {
        suggestion_type: SuggestionType::IndexOptimization,
        priority: SuggestionPriority::High,
        suggestion_text: "Add an index on orders(customer_id)".to_string(),
        query_id: Some("slow-q".to_string()),
    }]));
    let suggestions = SuggestionOrchestrator::new(store.clone(), generator.clone(), 1000.0);

    let outcome = suggestions.run("c1").await;
    assert!(outcome.success);
    assert_eq!(outcome.suggestions, 1);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

    let persisted = store.list_suggestions("c1").await.unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].suggestion_type, SuggestionType::IndexOptimization);
    assert_eq!(persisted[0].status, SuggestionStatus::New);
    assert_eq!(persisted[0].query_hash.as_deref(), Some("slow-q"));
}
