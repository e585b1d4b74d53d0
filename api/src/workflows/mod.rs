pub mod suggestions;
pub mod sync;

pub use suggestions::SuggestionOrchestrator;
pub use sync::SyncOrchestrator;

use serde::Serialize;

use crate::runs::RunKind;
use crate::state::AppState;

/// Reported as a value, never raised: the trigger that started a run is long
/// gone by the time it finishes.
#[derive(Clone, Debug, Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl SyncOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SuggestionOutcome {
    pub success: bool,
    pub suggestions: usize,
    pub error: Option<String>,
}

impl SuggestionOutcome {
    pub fn ok(suggestions: usize) -> Self {
        Self {
            success: true,
            suggestions,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            suggestions: 0,
            error: Some(error.to_string()),
        }
    }
}

/// Fire-and-forget entry point for the trigger surface and the scheduler.
pub fn spawn_sync(state: &AppState, connection_id: String) -> String {
    let run_id = state.runs.begin(RunKind::Sync, &connection_id);
    let orchestrator = state.sync.clone();
    let runs = state.runs.clone();
    let task_run_id = run_id.clone();
    tokio::spawn(async move {
        let outcome = orchestrator.run(&connection_id).await;
        runs.complete(&task_run_id, outcome.success, outcome.error);
    });
    run_id
}

pub fn spawn_suggestions(state: &AppState, connection_id: String) -> String {
    let run_id = state.runs.begin(RunKind::Suggestions, &connection_id);
    let orchestrator = state.suggestions.clone();
    let runs = state.runs.clone();
    let task_run_id = run_id.clone();
    tokio::spawn(async move {
        let outcome = orchestrator.run(&connection_id).await;
        let detail = outcome
            .error
            .or_else(|| Some(format!("suggestions: {}", outcome.suggestions)));
        runs.complete(&task_run_id, outcome.success, detail);
    });
    run_id
}
