pub const TELEMETRY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS connections (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    engine TEXT NOT NULL,                -- 'POSTGRES' | 'MYSQL'
    host TEXT NOT NULL,
    port INTEGER NOT NULL,
    database_name TEXT NOT NULL,
    username TEXT NOT NULL,

    -- Vault envelope (nonce/tag/data), never plaintext
    encrypted_password TEXT NOT NULL,
    encryption_key_id TEXT NOT NULL,

    polling_interval_secs INTEGER NOT NULL DEFAULT 3600,
    status TEXT NOT NULL DEFAULT 'INACTIVE',  -- ACTIVE | ERROR | INACTIVE | TESTING
    last_synced_at INTEGER,              -- Unix timestamp in microseconds
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000000)
);

-- One row per observed statement, upserted by natural key
CREATE TABLE IF NOT EXISTS queries (
    id TEXT PRIMARY KEY,
    connection_id TEXT NOT NULL REFERENCES connections(id) ON DELETE CASCADE,
    query_hash TEXT NOT NULL,
    query_text TEXT NOT NULL,
    execution_count INTEGER NOT NULL DEFAULT 0 CHECK (execution_count >= 0),
    avg_execution_time_ms REAL NOT NULL DEFAULT 0,
    total_execution_time_ms REAL NOT NULL DEFAULT 0,
    first_seen_at INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL,
    UNIQUE (connection_id, query_hash)
);

CREATE INDEX IF NOT EXISTS idx_queries_connection ON queries(connection_id);
CREATE INDEX IF NOT EXISTS idx_queries_avg_time ON queries(connection_id, avg_execution_time_ms);

-- Append-only time series, one sample per query per sync
CREATE TABLE IF NOT EXISTS query_stat_samples (
    id TEXT PRIMARY KEY,
    query_id TEXT NOT NULL REFERENCES queries(id) ON DELETE CASCADE,
    execution_count INTEGER NOT NULL CHECK (execution_count >= 0),
    total_execution_time_ms REAL NOT NULL,
    recorded_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stat_samples_query ON query_stat_samples(query_id, recorded_at);

-- Snapshots are append-only; every sync creates a fresh one
CREATE TABLE IF NOT EXISTS schema_snapshots (
    id TEXT PRIMARY KEY,
    connection_id TEXT NOT NULL REFERENCES connections(id) ON DELETE CASCADE,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshots_connection ON schema_snapshots(connection_id, created_at);

CREATE TABLE IF NOT EXISTS schema_tables (
    id TEXT PRIMARY KEY,
    snapshot_id TEXT NOT NULL REFERENCES schema_snapshots(id) ON DELETE CASCADE,
    table_name TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_schema_tables_snapshot ON schema_tables(snapshot_id);

CREATE TABLE IF NOT EXISTS schema_columns (
    id TEXT PRIMARY KEY,
    table_id TEXT NOT NULL REFERENCES schema_tables(id) ON DELETE CASCADE,
    column_name TEXT NOT NULL,
    data_type TEXT NOT NULL,
    is_nullable INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_schema_columns_table ON schema_columns(table_id);

CREATE TABLE IF NOT EXISTS table_access_patterns (
    id TEXT PRIMARY KEY,
    connection_id TEXT NOT NULL REFERENCES connections(id) ON DELETE CASCADE,
    table_name TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0 CHECK (access_count >= 0),
    last_accessed_at INTEGER,
    UNIQUE (connection_id, table_name)
);

CREATE TABLE IF NOT EXISTS index_usage (
    id TEXT PRIMARY KEY,
    connection_id TEXT NOT NULL REFERENCES connections(id) ON DELETE CASCADE,
    table_name TEXT NOT NULL,
    index_name TEXT NOT NULL,
    scans INTEGER NOT NULL DEFAULT 0 CHECK (scans >= 0),
    tuples_read INTEGER NOT NULL DEFAULT 0 CHECK (tuples_read >= 0),
    tuples_fetched INTEGER NOT NULL DEFAULT 0 CHECK (tuples_fetched >= 0),
    UNIQUE (connection_id, table_name, index_name)
);

CREATE TABLE IF NOT EXISTS suggestions (
    id TEXT PRIMARY KEY,
    connection_id TEXT NOT NULL REFERENCES connections(id) ON DELETE CASCADE,
    query_hash TEXT,
    suggestion_type TEXT NOT NULL,       -- INDEX_ | QUERY_ | SCHEMA_ | CONNECTION_OPTIMIZATION
    priority TEXT NOT NULL,              -- HIGH | MEDIUM | LOW
    suggestion_text TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'NEW',
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_suggestions_connection ON suggestions(connection_id, created_at);
"#;
