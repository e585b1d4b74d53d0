use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunKind {
    Sync,
    Suggestions,
}

/// Observational record of one orchestrator run. The authoritative outcome
/// lives in the store (connection status, suggestion rows); this just lets a
/// caller peek at an accepted run id.
#[derive(Clone, Debug, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub kind: RunKind,
    pub connection_id: String,
    pub finished: bool,
    pub success: Option<bool>,
    pub detail: Option<String>,
}

#[derive(Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<String, RunRecord>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, kind: RunKind, connection_id: &str) -> String {
        let run_id = Uuid::now_v7().to_string();
        self.runs.write().insert(
            run_id.clone(),
            RunRecord {
                run_id: run_id.clone(),
                kind,
                connection_id: connection_id.to_string(),
                finished: false,
                success: None,
                detail: None,
            },
        );
        run_id
    }

    pub fn complete(&self, run_id: &str, success: bool, detail: Option<String>) {
        if let Some(record) = self.runs.write().get_mut(run_id) {
            record.finished = true;
            record.success = Some(success);
            record.detail = detail;
        }
    }

    pub fn get(&self, run_id: &str) -> Option<RunRecord> {
        self.runs.read().get(run_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_progress_through_a_run() {
        let registry = RunRegistry::new();
        let run_id = registry.begin(RunKind::Sync, "c1");

        let pending = registry.get(&run_id).unwrap();
        assert!(!pending.finished);
        assert_eq!(pending.kind, RunKind::Sync);

        registry.complete(&run_id, true, None);
        let done = registry.get(&run_id).unwrap();
        assert!(done.finished);
        assert_eq!(done.success, Some(true));

        assert!(registry.get("unknown").is_none());
    }
}
