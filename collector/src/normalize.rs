//! Pure mapping from engine-native statistics rows into the canonical
//! telemetry model. No I/O happens here; connectors feed raw rows in and the
//! orchestrator stores whatever comes out. Identical input always yields
//! identical output.

use chrono::{DateTime, TimeZone, Utc};
use dbpulse_shared::{IndexUsage, QueryStat, TableAccessPattern};

/// performance_schema timers count picoseconds.
const PS_PER_MS: f64 = 1_000_000_000.0;

#[derive(Clone, Debug)]
pub struct PgStatRow {
    pub query: String,
    pub query_hash: String,
    pub calls: i64,
    pub mean_exec_time_ms: f64,
    pub total_exec_time_ms: f64,
}

#[derive(Clone, Debug)]
pub struct PgIndexRow {
    pub table_name: String,
    pub index_name: String,
    pub idx_scan: i64,
    pub idx_tup_read: i64,
    pub idx_tup_fetch: i64,
}

#[derive(Clone, Debug)]
pub struct PgTableRow {
    pub table_name: String,
    pub access_count: i64,
    pub last_analyze: Option<DateTime<Utc>>,
    pub last_autoanalyze: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub struct MySqlDigestRow {
    pub digest_text: Option<String>,
    pub digest: Option<String>,
    pub count_star: u64,
    pub avg_timer_wait_ps: u64,
    pub sum_timer_wait_ps: u64,
}

#[derive(Clone, Debug)]
pub struct MySqlIndexRow {
    pub table_name: String,
    pub index_name: Option<String>,
    pub cardinality: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct MySqlTableRow {
    pub table_name: String,
    pub table_rows: Option<u64>,
    pub update_time_epoch_secs: Option<i64>,
}

pub fn query_stats_from_pg(rows: Vec<PgStatRow>, observed_at: DateTime<Utc>) -> Vec<QueryStat> {
    rows.into_iter()
        .filter(|row| !row.query_hash.is_empty())
        .map(|row| QueryStat {
            query_text: row.query,
            query_hash: row.query_hash,
            execution_count: clamp_count(row.calls),
            avg_execution_time_ms: clamp_ms(row.mean_exec_time_ms),
            total_execution_time_ms: clamp_ms(row.total_exec_time_ms),
            first_seen_at: observed_at,
            last_seen_at: observed_at,
        })
        .collect()
}

pub fn query_stats_from_mysql(
    rows: Vec<MySqlDigestRow>,
    observed_at: DateTime<Utc>,
) -> Vec<QueryStat> {
    rows.into_iter()
        .filter_map(|row| {
            // Rows without a digest cannot be keyed and are dropped.
            let hash = row.digest.filter(|d| !d.is_empty())?;
            Some(QueryStat {
                query_text: row.digest_text.unwrap_or_default(),
                query_hash: hash,
                execution_count: count_from_u64(row.count_star),
                avg_execution_time_ms: ps_to_ms(row.avg_timer_wait_ps),
                total_execution_time_ms: ps_to_ms(row.sum_timer_wait_ps),
                first_seen_at: observed_at,
                last_seen_at: observed_at,
            })
        })
        .collect()
}

pub fn index_usage_from_pg(rows: Vec<PgIndexRow>) -> Vec<IndexUsage> {
    rows.into_iter()
        .map(|row| IndexUsage {
            table_name: row.table_name,
            index_name: row.index_name,
            scans: clamp_count(row.idx_scan),
            tuples_read: clamp_count(row.idx_tup_read),
            tuples_fetched: clamp_count(row.idx_tup_fetch),
        })
        .collect()
}

/// information_schema.STATISTICS has no scan counters, so cardinality is the
/// closest available usage signal; tuple counts stay zero.
pub fn index_usage_from_mysql(rows: Vec<MySqlIndexRow>) -> Vec<IndexUsage> {
    rows.into_iter()
        .filter_map(|row| {
            let index_name = row.index_name.filter(|n| !n.is_empty())?;
            Some(IndexUsage {
                table_name: row.table_name,
                index_name,
                scans: clamp_count(row.cardinality.unwrap_or(0)),
                tuples_read: 0,
                tuples_fetched: 0,
            })
        })
        .collect()
}

pub fn table_patterns_from_pg(rows: Vec<PgTableRow>) -> Vec<TableAccessPattern> {
    rows.into_iter()
        .map(|row| TableAccessPattern {
            table_name: row.table_name,
            access_count: clamp_count(row.access_count),
            last_accessed_at: row.last_analyze.or(row.last_autoanalyze),
        })
        .collect()
}

pub fn table_patterns_from_mysql(rows: Vec<MySqlTableRow>) -> Vec<TableAccessPattern> {
    rows.into_iter()
        .map(|row| TableAccessPattern {
            table_name: row.table_name,
            access_count: count_from_u64(row.table_rows.unwrap_or(0)),
            last_accessed_at: row
                .update_time_epoch_secs
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        })
        .collect()
}

/// Catalog views report nullability as 'YES'/'NO' on both engines.
pub fn nullable_from_catalog(value: &str) -> bool {
    value.eq_ignore_ascii_case("YES")
}

fn ps_to_ms(ps: u64) -> f64 {
    ps as f64 / PS_PER_MS
}

fn clamp_count(value: i64) -> i64 {
    value.max(0)
}

fn clamp_ms(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn count_from_u64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
