use dbpulse_shared::{Connection, SuggestionDraft};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::SuggestionOutcome;
use crate::generator::{GenerationError, SuggestionContext, SuggestionGenerator};
use crate::store::{StoreError, TelemetryStore};

pub const DEFAULT_SLOW_QUERY_THRESHOLD_MS: f64 = 1000.0;
const GATHER_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum SuggestionError {
    #[error("connection {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Pending → Gathering → Generating → Persisting → Completed|Failed. Reads
/// only the already-reconciled store, never the source database. A failed
/// generation fails this run alone; sync health is untouched.
enum SuggestionState {
    Pending,
    Gathering(Connection),
    Generating(SuggestionContext),
    Persisting(Vec<SuggestionDraft>),
    Completed(usize),
    Failed(SuggestionError),
}

pub struct SuggestionOrchestrator {
    store: Arc<dyn TelemetryStore>,
    generator: Arc<dyn SuggestionGenerator>,
    slow_query_threshold_ms: f64,
}

impl SuggestionOrchestrator {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        generator: Arc<dyn SuggestionGenerator>,
        slow_query_threshold_ms: f64,
    ) -> Self {
        Self {
            store,
            generator,
            slow_query_threshold_ms,
        }
    }

    pub async fn run(&self, connection_id: &str) -> SuggestionOutcome {
        info!(connection_id = %connection_id, "Starting suggestion generation");

        let mut state = SuggestionState::Pending;
        loop {
            state = match state {
                SuggestionState::Pending => match self.load_connection(connection_id).await {
                    Ok(connection) => SuggestionState::Gathering(connection),
                    Err(e) => SuggestionState::Failed(e),
                },

                SuggestionState::Gathering(connection) => match self.gather(&connection).await {
                    // No slow queries means nothing worth prompting about.
                    Ok(None) => SuggestionState::Completed(0),
                    Ok(Some(context)) => SuggestionState::Generating(context),
                    Err(e) => SuggestionState::Failed(e),
                },

                SuggestionState::Generating(context) => {
                    debug!(
                        connection_id = %connection_id,
                        slow_queries = context.slow_queries.len(),
                        "Calling suggestion generator"
                    );
                    match self.generator.generate(&context).await {
                        Ok(drafts) => SuggestionState::Persisting(drafts),
                        Err(e) => SuggestionState::Failed(e.into()),
                    }
                }

                SuggestionState::Persisting(drafts) => {
                    match self.store.insert_suggestions(connection_id, &drafts).await {
                        Ok(count) => SuggestionState::Completed(count),
                        Err(e) => SuggestionState::Failed(e.into()),
                    }
                }

                SuggestionState::Completed(count) => {
                    info!(connection_id = %connection_id, suggestions = count, "Suggestion run completed");
                    return SuggestionOutcome::ok(count);
                }

                SuggestionState::Failed(cause) => {
                    warn!(connection_id = %connection_id, error = %cause, "Suggestion run failed");
                    return SuggestionOutcome::failed(cause);
                }
            };
        }
    }

    async fn load_connection(&self, connection_id: &str) -> Result<Connection, SuggestionError> {
        self.store
            .get_connection(connection_id)
            .await?
            .ok_or_else(|| SuggestionError::NotFound(connection_id.to_string()))
    }

    async fn gather(
        &self,
        connection: &Connection,
    ) -> Result<Option<SuggestionContext>, SuggestionError> {
        let slow_queries = self
            .store
            .slow_queries(&connection.id, self.slow_query_threshold_ms, GATHER_LIMIT)
            .await?;

        if slow_queries.is_empty() {
            info!(connection_id = %connection.id, "No slow queries found, skipping generation");
            return Ok(None);
        }

        let index_usage = self
            .store
            .top_index_usage(&connection.id, GATHER_LIMIT)
            .await?;
        let table_patterns = self
            .store
            .top_table_patterns(&connection.id, GATHER_LIMIT)
            .await?;

        Ok(Some(SuggestionContext::from_telemetry(
            &slow_queries,
            &index_usage,
            &table_patterns,
        )))
    }
}
