mod openai;

pub use openai::OpenAiGenerator;

use async_trait::async_trait;
use dbpulse_shared::{IndexUsage, QueryStat, SuggestionDraft, TableAccessPattern};
use serde::Serialize;
use std::fmt::Write as _;
use thiserror::Error;

const QUERY_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("suggestion generator is not configured")]
    NotConfigured,

    #[error("generator request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generator returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("generator returned malformed content: {0}")]
    InvalidContent(String),
}

/// External collaborator producing optimization suggestions from a prompt
/// context. Treated as slow, unreliable and occasionally non-conforming;
/// whatever comes back is validated before anything is persisted.
#[async_trait]
pub trait SuggestionGenerator: Send + Sync {
    async fn generate(
        &self,
        context: &SuggestionContext,
    ) -> Result<Vec<SuggestionDraft>, GenerationError>;
}

#[derive(Clone, Debug, Serialize)]
pub struct SlowQueryInfo {
    pub query: String,
    pub query_hash: String,
    pub avg_time_ms: f64,
    pub execution_count: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct IndexUsageInfo {
    pub table: String,
    pub index: String,
    pub scans: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct TableAccessInfo {
    pub table: String,
    pub access_count: i64,
}

/// Structured context the generator prompt is rendered from.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SuggestionContext {
    pub slow_queries: Vec<SlowQueryInfo>,
    pub index_usage: Vec<IndexUsageInfo>,
    pub table_patterns: Vec<TableAccessInfo>,
}

impl SuggestionContext {
    pub fn from_telemetry(
        slow_queries: &[QueryStat],
        index_usage: &[IndexUsage],
        table_patterns: &[TableAccessPattern],
    ) -> Self {
        Self {
            slow_queries: slow_queries
                .iter()
                .map(|stat| SlowQueryInfo {
                    query: stat.query_text.clone(),
                    query_hash: stat.query_hash.clone(),
                    avg_time_ms: stat.avg_execution_time_ms,
                    execution_count: stat.execution_count,
                })
                .collect(),
            index_usage: index_usage
                .iter()
                .map(|index| IndexUsageInfo {
                    table: index.table_name.clone(),
                    index: index.index_name.clone(),
                    scans: index.scans,
                })
                .collect(),
            table_patterns: table_patterns
                .iter()
                .map(|pattern| TableAccessInfo {
                    table: pattern.table_name.clone(),
                    access_count: pattern.access_count,
                })
                .collect(),
        }
    }

    pub fn to_prompt(&self) -> String {
        let mut prompt = String::from(
            "Analyze the following database performance metrics and provide optimization suggestions:\n\nSlow Queries:\n",
        );
        for q in &self.slow_queries {
            let preview: String = q.query.chars().take(QUERY_PREVIEW_CHARS).collect();
            let _ = writeln!(
                prompt,
                "- Query (id: {}): {preview}... Avg Time: {}ms, Executions: {}",
                q.query_hash, q.avg_time_ms, q.execution_count
            );
        }

        prompt.push_str("\nIndex Usage:\n");
        for idx in &self.index_usage {
            let _ = writeln!(
                prompt,
                "- Table: {}, Index: {}, Scans: {}",
                idx.table, idx.index, idx.scans
            );
        }

        prompt.push_str("\nTable Access Patterns:\n");
        for t in &self.table_patterns {
            let _ = writeln!(prompt, "- Table: {}, Accesses: {}", t.table, t.access_count);
        }

        prompt.push_str(
            r#"
Provide specific, actionable optimization suggestions in JSON format:
[
  {
    "suggestionType": "INDEX_OPTIMIZATION" | "QUERY_OPTIMIZATION" | "SCHEMA_OPTIMIZATION" | "CONNECTION_OPTIMIZATION",
    "priority": "HIGH" | "MEDIUM" | "LOW",
    "suggestionText": "Detailed suggestion text here",
    "queryId": "optional query ID if related to specific query"
  }
]"#,
        );

        prompt
    }
}

/// Validates generator output. The model is asked for a bare JSON array but
/// frequently wraps it in a markdown fence; anything beyond that is rejected.
pub fn parse_suggestions(content: &str) -> Result<Vec<SuggestionDraft>, GenerationError> {
    let stripped = strip_code_fence(content.trim());
    serde_json::from_str(stripped).map_err(|e| GenerationError::InvalidContent(e.to_string()))
}

fn strip_code_fence(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("```") else {
        return content;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    match rest.strip_suffix("```") {
        Some(inner) => inner.trim_end(),
        None => rest,
    }
}
