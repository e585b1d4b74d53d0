use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raised when a stored discriminator string no longer matches any known
/// enum variant (corrupt or hand-edited store rows).
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DbEngine {
    Postgres,
    Mysql,
}

impl DbEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbEngine::Postgres => "POSTGRES",
            DbEngine::Mysql => "MYSQL",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EnumParseError> {
        match value {
            "POSTGRES" => Ok(DbEngine::Postgres),
            "MYSQL" => Ok(DbEngine::Mysql),
            other => Err(EnumParseError {
                kind: "engine",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for DbEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Active,
    Error,
    Inactive,
    Testing,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Active => "ACTIVE",
            ConnectionStatus::Error => "ERROR",
            ConnectionStatus::Inactive => "INACTIVE",
            ConnectionStatus::Testing => "TESTING",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EnumParseError> {
        match value {
            "ACTIVE" => Ok(ConnectionStatus::Active),
            "ERROR" => Ok(ConnectionStatus::Error),
            "INACTIVE" => Ok(ConnectionStatus::Inactive),
            "TESTING" => Ok(ConnectionStatus::Testing),
            other => Err(EnumParseError {
                kind: "connection status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitored target database. The password field always holds the vault
/// envelope, never plaintext.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub name: String,
    pub engine: DbEngine,
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub username: String,
    pub encrypted_password: String,
    pub encryption_key_id: String,
    pub polling_interval_secs: i64,
    pub status: ConnectionStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QueryStat {
    pub query_text: String,
    pub query_hash: String,
    pub execution_count: i64,
    pub avg_execution_time_ms: f64,
    pub total_execution_time_ms: f64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TableAccessPattern {
    pub table_name: String,
    pub access_count: i64,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IndexUsage {
    pub table_name: String,
    pub index_name: String,
    pub scans: i64,
    pub tuples_read: i64,
    pub tuples_fetched: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

/// Point-in-time structural snapshot of the target database.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SchemaInfo {
    pub tables: Vec<TableInfo>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryPlan {
    pub plan_json: serde_json::Value,
    pub cost_estimate: Option<f64>,
}

/// Everything one collection pass produces, already normalized.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TelemetryBatch {
    pub query_stats: Vec<QueryStat>,
    pub schema: SchemaInfo,
    pub index_usage: Vec<IndexUsage>,
    pub table_patterns: Vec<TableAccessPattern>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestionType {
    IndexOptimization,
    QueryOptimization,
    SchemaOptimization,
    ConnectionOptimization,
}

impl SuggestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionType::IndexOptimization => "INDEX_OPTIMIZATION",
            SuggestionType::QueryOptimization => "QUERY_OPTIMIZATION",
            SuggestionType::SchemaOptimization => "SCHEMA_OPTIMIZATION",
            SuggestionType::ConnectionOptimization => "CONNECTION_OPTIMIZATION",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EnumParseError> {
        match value {
            "INDEX_OPTIMIZATION" => Ok(SuggestionType::IndexOptimization),
            "QUERY_OPTIMIZATION" => Ok(SuggestionType::QueryOptimization),
            "SCHEMA_OPTIMIZATION" => Ok(SuggestionType::SchemaOptimization),
            "CONNECTION_OPTIMIZATION" => Ok(SuggestionType::ConnectionOptimization),
            other => Err(EnumParseError {
                kind: "suggestion type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestionPriority {
    High,
    Medium,
    Low,
}

impl SuggestionPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionPriority::High => "HIGH",
            SuggestionPriority::Medium => "MEDIUM",
            SuggestionPriority::Low => "LOW",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EnumParseError> {
        match value {
            "HIGH" => Ok(SuggestionPriority::High),
            "MEDIUM" => Ok(SuggestionPriority::Medium),
            "LOW" => Ok(SuggestionPriority::Low),
            other => Err(EnumParseError {
                kind: "suggestion priority",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestionStatus {
    New,
    Applied,
    Dismissed,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionStatus::New => "NEW",
            SuggestionStatus::Applied => "APPLIED",
            SuggestionStatus::Dismissed => "DISMISSED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EnumParseError> {
        match value {
            "NEW" => Ok(SuggestionStatus::New),
            "APPLIED" => Ok(SuggestionStatus::Applied),
            "DISMISSED" => Ok(SuggestionStatus::Dismissed),
            other => Err(EnumParseError {
                kind: "suggestion status",
                value: other.to_string(),
            }),
        }
    }
}

/// What the generator returns for one suggestion, before persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionDraft {
    pub suggestion_type: SuggestionType,
    pub priority: SuggestionPriority,
    pub suggestion_text: String,
    #[serde(default)]
    pub query_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub connection_id: String,
    pub suggestion_type: SuggestionType,
    pub priority: SuggestionPriority,
    pub suggestion_text: String,
    pub status: SuggestionStatus,
    pub query_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_strings_round_trip() {
        for engine in [DbEngine::Postgres, DbEngine::Mysql] {
            assert_eq!(DbEngine::parse(engine.as_str()).unwrap(), engine);
        }
        for status in [
            ConnectionStatus::Active,
            ConnectionStatus::Error,
            ConnectionStatus::Inactive,
            ConnectionStatus::Testing,
        ] {
            assert_eq!(ConnectionStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(DbEngine::parse("ORACLE").is_err());
    }

    #[test]
    fn suggestion_draft_accepts_generator_shape() {
        let json = r#"{
            "suggestionType": "INDEX_OPTIMIZATION",
            "priority": "HIGH",
            "suggestionText": "Add an index on orders(customer_id)",
            "queryId": "abc123"
        }"#;
        let draft: SuggestionDraft = serde_json::from_str(json).unwrap();
        assert_eq!(draft.suggestion_type, SuggestionType::IndexOptimization);
        assert_eq!(draft.priority, SuggestionPriority::High);
        assert_eq!(draft.query_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn suggestion_draft_rejects_unknown_type() {
        let json = r#"{
            "suggestionType": "MAGIC_OPTIMIZATION",
            "priority": "HIGH",
            "suggestionText": "?"
        }"#;
        assert!(serde_json::from_str::<SuggestionDraft>(json).is_err());
    }
}
