// ==============================================================================
// storage/sqlite.rs - SQLite Variants Backend
// ==============================================================================
// Description: SQL backend over summary_alleles / family_alleles tables with
//              a bounded connection pool and optional legacy bit tests
// Author: Matt Barham
// Created: 2025-11-25
// Modified: 2025-11-30
// Version: 1.0.0
// ==============================================================================
// Queries come from the query builder, one per region bucket. Gene and
// effect-type filters are never in the SQL; decoded rows are re-filtered.
// ==============================================================================

use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use std::collections::HashSet;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{
    dataset_rows, decode_family, decode_summary, group_sites, DatasetMeta, FamilyHit, GenomicContext, SeenIds,
    StorageError, StorageFactory, SummaryCache, SummaryHit, VariantsBackend,
};
use crate::attributes::SqlDialect;
use crate::config::StorageConfig;
use crate::filters::CompiledFilters;
use crate::partition::{PartitionDescriptor, PartitionLayout};
use crate::pedigree::FamiliesData;
use crate::query_builder::{QueryHeuristics, SqlQueryBuilder, FAMILY_TABLE, SUMMARY_TABLE};
use crate::query_runner::{QueryRunner, RunnerSink};
use crate::variants::{FamilyVariant, SummaryVariant};

const PARTITION_DESCRIPTION_KEY: &str = "partition_description";
const META_KEY: &str = "meta";

const SUMMARY_COLUMNS: &[&str] = &[
    "bucket_index",
    "summary_index",
    "allele_index",
    "chromosome",
    "position",
    "end_position",
    "variant_type",
    "af_allele_freq",
    "af_allele_count",
    "summary_variant_data",
    "region_bin",
    "frequency_bin",
    "coding_bin",
];

const FAMILY_COLUMNS: &[&str] = &[
    "bucket_index",
    "summary_index",
    "allele_index",
    "family_id",
    "allele_in_roles",
    "allele_in_sexes",
    "allele_in_statuses",
    "inheritance_in_members",
    "zygosity_in_roles",
    "family_variant_data",
    "region_bin",
    "frequency_bin",
    "coding_bin",
    "family_bin",
];

fn check_identifier(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidData(format!("'{}' is not a valid column name", name)))
    }
}

/// Register `BITAND(a, b)` for the legacy dialect
fn register_bitand(conn: &Connection) -> Result<(), StorageError> {
    conn.create_scalar_function(
        "BITAND",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let left: i64 = ctx.get(0)?;
            let right: i64 = ctx.get(1)?;
            Ok(left & right)
        },
    )?;
    Ok(())
}

/// Bounded pool of read-only connections
pub struct ConnectionPool {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
    available: Condvar,
    timeout: Duration,
}

impl ConnectionPool {
    pub fn open(path: impl AsRef<Path>, size: usize, timeout: Duration, legacy: bool) -> Result<Arc<Self>, StorageError> {
        let path = path.as_ref();
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size.max(1) {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            if legacy {
                register_bitand(&conn)?;
            }
            connections.push(conn);
        }
        debug!("Opened {} connections to {:?}", connections.len(), path);
        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            idle: Mutex::new(connections),
            available: Condvar::new(),
            timeout,
        }))
    }

    /// Take a connection, waiting up to the configured timeout
    pub fn acquire(self: &Arc<Self>) -> Result<PooledConnection, StorageError> {
        let deadline = Instant::now() + self.timeout;
        let mut idle = self
            .idle
            .lock()
            .map_err(|_| StorageError::NoConnectionAvailable("connection pool poisoned".to_string()))?;
        loop {
            if let Some(conn) = idle.pop() {
                return Ok(PooledConnection { conn: Some(conn), pool: self.clone() });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(StorageError::NoConnectionAvailable(format!(
                    "{:?}: no connection within {:?}",
                    self.path, self.timeout
                )));
            }
            idle = self
                .available
                .wait_timeout(idle, deadline - now)
                .map_err(|_| StorageError::NoConnectionAvailable("connection pool poisoned".to_string()))?
                .0;
        }
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(conn);
            self.available.notify_one();
        }
    }
}

/// A pooled connection, returned to the pool on drop
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<ConnectionPool>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // only taken in drop
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// Writes a variants database
pub struct SqliteDatasetWriter {
    path: PathBuf,
    descriptor: PartitionDescriptor,
    layout: PartitionLayout,
    score_columns: Vec<String>,
}

impl SqliteDatasetWriter {
    pub fn new(
        path: impl Into<PathBuf>,
        descriptor: PartitionDescriptor,
        context: &GenomicContext,
    ) -> Result<Self, StorageError> {
        let layout = PartitionLayout::new(descriptor.clone(), &context.contigs, &context.prefix)?;
        Ok(Self { path: path.into(), descriptor, layout, score_columns: Vec::new() })
    }

    pub fn with_score_columns(mut self, columns: &[&str]) -> Self {
        self.score_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    fn create_schema(&self, conn: &Connection) -> Result<(), StorageError> {
        let scores: String = self.score_columns.iter().map(|column| format!("{} REAL,\n", column)).collect();
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE {summary} (
                bucket_index INTEGER NOT NULL,
                summary_index INTEGER NOT NULL,
                allele_index INTEGER NOT NULL,
                chromosome TEXT NOT NULL,
                position INTEGER NOT NULL,
                end_position INTEGER,
                variant_type INTEGER NOT NULL,
                af_allele_freq REAL,
                af_allele_count REAL,
                {scores}summary_variant_data TEXT NOT NULL,
                region_bin TEXT,
                frequency_bin INTEGER,
                coding_bin INTEGER
            );
            CREATE TABLE {family} (
                bucket_index INTEGER NOT NULL,
                summary_index INTEGER NOT NULL,
                allele_index INTEGER NOT NULL,
                family_id TEXT NOT NULL,
                allele_in_roles INTEGER NOT NULL,
                allele_in_sexes INTEGER NOT NULL,
                allele_in_statuses INTEGER NOT NULL,
                inheritance_in_members INTEGER NOT NULL,
                zygosity_in_roles INTEGER NOT NULL,
                family_variant_data TEXT NOT NULL,
                region_bin TEXT,
                frequency_bin INTEGER,
                coding_bin INTEGER,
                family_bin INTEGER
            );
            CREATE INDEX idx_summary_site ON {summary}(bucket_index, summary_index, allele_index);
            CREATE INDEX idx_summary_position ON {summary}(chromosome, position);
            CREATE INDEX idx_family_site ON {family}(bucket_index, summary_index, allele_index);",
            summary = SUMMARY_TABLE,
            family = FAMILY_TABLE,
            scores = scores,
        ))?;
        Ok(())
    }

    pub fn write(
        &self,
        summary_variants: Vec<SummaryVariant>,
        family_variants: Vec<FamilyVariant>,
    ) -> Result<DatasetMeta, StorageError> {
        for column in &self.score_columns {
            check_identifier(column)?;
        }
        let sites = group_sites(summary_variants, family_variants);
        let (summary_rows, family_rows) = dataset_rows(&self.layout, &sites, &self.score_columns)?;

        let mut conn = Connection::open(&self.path)?;
        self.create_schema(&conn)?;

        let mut meta = DatasetMeta::new(&self.layout, &self.score_columns);
        meta.summary_rows = summary_rows.len();
        meta.family_rows = family_rows.len();

        let tx = conn.transaction()?;
        {
            let mut columns: Vec<&str> = SUMMARY_COLUMNS[..9].to_vec();
            columns.extend(self.score_columns.iter().map(String::as_str));
            columns.extend(&SUMMARY_COLUMNS[9..]);
            let placeholders = vec!["?"; columns.len()].join(", ");
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}) VALUES ({})",
                SUMMARY_TABLE,
                columns.join(", "),
                placeholders
            ))?;
            for row in &summary_rows {
                let mut values = vec![
                    SqlValue::Integer(row.bucket_index as i64),
                    SqlValue::Integer(row.summary_index),
                    SqlValue::Integer(row.allele_index as i64),
                    SqlValue::Text(row.chromosome.clone()),
                    SqlValue::Integer(row.position as i64),
                    optional_integer(row.end_position),
                    SqlValue::Integer(row.variant_type as i64),
                    optional_real(row.af_allele_freq),
                    optional_real(row.af_allele_count),
                ];
                values.extend(row.scores.iter().map(|score| optional_real(*score)));
                values.push(SqlValue::Text(row.summary_variant_data.to_string()));
                values.push(optional_text(row.partition_value("region_bin")));
                values.push(optional_text(row.partition_value("frequency_bin")));
                values.push(optional_text(row.partition_value("coding_bin")));
                stmt.execute(params_from_iter(values))?;
            }
        }
        {
            let placeholders = vec!["?"; FAMILY_COLUMNS.len()].join(", ");
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}) VALUES ({})",
                FAMILY_TABLE,
                FAMILY_COLUMNS.join(", "),
                placeholders
            ))?;
            for row in &family_rows {
                stmt.execute(params_from_iter([
                    SqlValue::Integer(row.bucket_index as i64),
                    SqlValue::Integer(row.summary_index),
                    SqlValue::Integer(row.allele_index as i64),
                    SqlValue::Text(row.family_id.clone()),
                    SqlValue::Integer(row.allele_in_roles as i64),
                    SqlValue::Integer(row.allele_in_sexes as i64),
                    SqlValue::Integer(row.allele_in_statuses as i64),
                    SqlValue::Integer(row.inheritance_in_members as i64),
                    SqlValue::Integer(row.zygosity_in_roles as i64),
                    SqlValue::Text(row.family_variant_data.to_string()),
                    optional_text(row.partition_value("region_bin")),
                    optional_text(row.partition_value("frequency_bin")),
                    optional_text(row.partition_value("coding_bin")),
                    optional_text(row.partition_value("family_bin")),
                ]))?;
            }
        }
        {
            let mut stmt = tx.prepare("INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)")?;
            stmt.execute(params![PARTITION_DESCRIPTION_KEY, self.descriptor.to_toml()?])?;
            stmt.execute(params![META_KEY, serde_json::to_string(&meta)?])?;
        }
        tx.commit()?;

        info!(
            "Wrote SQLite dataset {:?}: {} sites, {} summary rows, {} family rows",
            self.path,
            sites.len(),
            meta.summary_rows,
            meta.family_rows
        );
        Ok(meta)
    }
}

fn optional_integer(value: Option<u64>) -> SqlValue {
    value.map_or(SqlValue::Null, |v| SqlValue::Integer(v as i64))
}

fn optional_real(value: Option<f64>) -> SqlValue {
    value.map_or(SqlValue::Null, SqlValue::Real)
}

/// Partition values are stored with column affinity; numeric bins become integers
fn optional_text(value: Option<&str>) -> SqlValue {
    match value {
        None => SqlValue::Null,
        Some(value) => match value.parse::<i64>() {
            Ok(number) => SqlValue::Integer(number),
            Err(_) => SqlValue::Text(value.to_string()),
        },
    }
}

fn metadata_value(conn: &Connection, key: &str) -> Result<Option<String>, StorageError> {
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = ?1")?;
    Ok(stmt.query_row(params![key], |row| row.get(0)).optional()?)
}

fn table_columns(conn: &Connection, table: &str) -> Result<HashSet<String>, StorageError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(columns)
}

fn check_table(conn: &Connection, table: &str, required: &[&str], extra: &[String]) -> Result<(), StorageError> {
    let columns = table_columns(conn, table)?;
    if columns.is_empty() {
        return Err(StorageError::SchemaMismatch(format!("table '{}' is missing", table)));
    }
    let missing = required
        .iter()
        .copied()
        .chain(extra.iter().map(String::as_str))
        .find(|column| !columns.contains(*column));
    match missing {
        Some(column) => Err(StorageError::SchemaMismatch(format!("table '{}' lacks column '{}'", table, column))),
        None => Ok(()),
    }
}

/// Variants database opened for queries
pub struct SqliteVariants {
    id: String,
    pool: Arc<ConnectionPool>,
    layout: PartitionLayout,
    families: Arc<FamiliesData>,
    dialect: SqlDialect,
    score_columns: Vec<String>,
}

impl SqliteVariants {
    pub fn open(config: &StorageConfig, context: &GenomicContext) -> Result<Self, StorageError> {
        for column in &config.score_columns {
            check_identifier(column)?;
        }
        let pool = ConnectionPool::open(&config.path, config.pool_size, config.acquire_timeout(), config.legacy_sql)?;
        let layout = {
            let conn = pool.acquire()?;
            check_table(&conn, SUMMARY_TABLE, SUMMARY_COLUMNS, &config.score_columns)?;
            check_table(&conn, FAMILY_TABLE, FAMILY_COLUMNS, &[])?;

            let descriptor = match metadata_value(&conn, PARTITION_DESCRIPTION_KEY)? {
                Some(content) => PartitionDescriptor::from_toml(&content)?,
                None => PartitionDescriptor::default(),
            };
            let layout = PartitionLayout::new(descriptor, &context.contigs, &context.prefix)?;
            if let Some(content) = metadata_value(&conn, META_KEY)? {
                let meta: DatasetMeta = serde_json::from_str(&content)?;
                meta.check_layout(&layout)?;
                meta.check_score_columns(&config.score_columns)?;
            }
            layout
        };

        Ok(Self {
            id: config.id.clone(),
            pool,
            layout,
            families: context.families.clone(),
            dialect: if config.legacy_sql { SqlDialect::Legacy } else { SqlDialect::Standard },
            score_columns: config.score_columns.clone(),
        })
    }

    /// Buckets to query; `None` scans the whole table
    fn buckets(&self, heuristics: &QueryHeuristics) -> Vec<Option<usize>> {
        if !self.layout.descriptor().has_region_bins() {
            return vec![None];
        }
        match &heuristics.region_bins {
            Some(bins) => bins.iter().filter_map(|bin| self.layout.bucket_index(bin)).map(Some).collect(),
            None => (0..self.layout.region_bins().len()).map(Some).collect(),
        }
    }

    fn plans(&self, filters: &CompiledFilters, family: bool) -> Vec<(Option<usize>, String)> {
        let heuristics = QueryHeuristics::calc(&self.layout, filters, &self.families);
        let builder = SqlQueryBuilder::new(filters, &self.families, &heuristics)
            .with_dialect(self.dialect)
            .with_score_columns(&self.score_columns);
        self.buckets(&heuristics)
            .into_iter()
            .map(|bucket| {
                let sql = if family {
                    builder.build_family_query(bucket)
                } else {
                    builder.build_summary_query(bucket)
                };
                (bucket, sql)
            })
            .collect()
    }
}

impl VariantsBackend for SqliteVariants {
    fn id(&self) -> &str {
        &self.id
    }

    fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    fn family_runners(
        &self,
        filters: &Arc<CompiledFilters>,
    ) -> Result<Vec<Box<dyn QueryRunner<FamilyHit>>>, StorageError> {
        let source: Arc<str> = Arc::from(self.id.as_str());
        Ok(self
            .plans(filters, true)
            .into_iter()
            .map(|(bucket, sql)| {
                Box::new(SqliteFamilyRunner {
                    name: format!("{}:family:{}", self.id, bucket.map_or("all".to_string(), |b| b.to_string())),
                    source: source.clone(),
                    sql,
                    pool: self.pool.clone(),
                    filters: filters.clone(),
                    families: self.families.clone(),
                }) as Box<dyn QueryRunner<FamilyHit>>
            })
            .collect())
    }

    fn summary_runners(
        &self,
        filters: &Arc<CompiledFilters>,
    ) -> Result<Vec<Box<dyn QueryRunner<SummaryHit>>>, StorageError> {
        let source: Arc<str> = Arc::from(self.id.as_str());
        Ok(self
            .plans(filters, false)
            .into_iter()
            .map(|(bucket, sql)| {
                Box::new(SqliteSummaryRunner {
                    name: format!("{}:summary:{}", self.id, bucket.map_or("all".to_string(), |b| b.to_string())),
                    source: source.clone(),
                    sql,
                    pool: self.pool.clone(),
                    filters: filters.clone(),
                }) as Box<dyn QueryRunner<SummaryHit>>
            })
            .collect())
    }
}

/// Acquire a connection, retrying until one frees up or the query closes
fn acquire_until_closed<T>(
    name: &str,
    pool: &Arc<ConnectionPool>,
    sink: &RunnerSink<T>,
) -> Result<Option<PooledConnection>, StorageError> {
    loop {
        match pool.acquire() {
            Ok(conn) => return Ok(Some(conn)),
            Err(StorageError::NoConnectionAvailable(message)) => {
                if sink.is_closed() {
                    return Ok(None);
                }
                debug!("Runner {} waiting for a connection: {}", name, message);
            }
            Err(e) => return Err(e),
        }
    }
}

struct SqliteFamilyRunner {
    name: String,
    source: Arc<str>,
    sql: String,
    pool: Arc<ConnectionPool>,
    filters: Arc<CompiledFilters>,
    families: Arc<FamiliesData>,
}

impl QueryRunner<FamilyHit> for SqliteFamilyRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, sink: &RunnerSink<FamilyHit>) -> Result<(), StorageError> {
        let Some(conn) = acquire_until_closed(&self.name, &self.pool, sink)? else {
            return Ok(());
        };
        debug!("{}: {}", self.name, self.sql);
        let mut stmt = conn.prepare(&self.sql)?;
        let mut rows = stmt.query([])?;
        let mut seen = SeenIds::default();
        let mut cache = SummaryCache::default();

        while let Some(row) = rows.next()? {
            if sink.is_closed() {
                break;
            }
            let bucket_index: i64 = row.get(0)?;
            let summary_index: i64 = row.get(1)?;
            let summary_data: String = row.get(3)?;
            let family_data: String = row.get(4)?;

            let decoded = cache
                .get_or_decode(bucket_index as usize, summary_index, &summary_data)
                .and_then(|sv| decode_family(sv, &self.families, &family_data));
            let fv = match decoded {
                Ok(fv) => fv,
                Err(e) => {
                    warn!("{}: skipping undecodable row: {}", self.name, e);
                    continue;
                }
            };
            if !seen.first_time(fv.fvuid()) {
                continue;
            }
            if let Some(variant) = self.filters.filter_family_variant(fv) {
                if !sink.send(FamilyHit { source: self.source.clone(), variant }) {
                    break;
                }
            }
        }
        Ok(())
    }
}

struct SqliteSummaryRunner {
    name: String,
    source: Arc<str>,
    sql: String,
    pool: Arc<ConnectionPool>,
    filters: Arc<CompiledFilters>,
}

impl QueryRunner<SummaryHit> for SqliteSummaryRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, sink: &RunnerSink<SummaryHit>) -> Result<(), StorageError> {
        let Some(conn) = acquire_until_closed(&self.name, &self.pool, sink)? else {
            return Ok(());
        };
        debug!("{}: {}", self.name, self.sql);
        let mut stmt = conn.prepare(&self.sql)?;
        let mut rows = stmt.query([])?;
        let mut seen = SeenIds::default();

        while let Some(row) = rows.next()? {
            if sink.is_closed() {
                break;
            }
            let summary_data: String = row.get(3)?;
            let sv = match decode_summary(&summary_data) {
                Ok(sv) => sv,
                Err(e) => {
                    warn!("{}: skipping undecodable row: {}", self.name, e);
                    continue;
                }
            };
            if !seen.first_time(sv.svuid()) {
                continue;
            }
            if let Some(variant) = self.filters.filter_summary_variant(sv) {
                if !sink.send(SummaryHit { source: self.source.clone(), variant }) {
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Factory for `sqlite` storages
pub struct SqliteFactory;

impl StorageFactory for SqliteFactory {
    fn storage_type(&self) -> &'static str {
        "sqlite"
    }

    fn open(
        &self,
        config: &StorageConfig,
        context: &GenomicContext,
    ) -> Result<Arc<dyn VariantsBackend>, StorageError> {
        Ok(Arc::new(SqliteVariants::open(config, context)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Region, VariantQuery};
    use crate::query_runner::QueryExecutor;
    use crate::storage::tests::{context, descriptor, sample_dataset};

    fn write_sample(path: &Path) -> DatasetMeta {
        let (summary, families) = sample_dataset();
        SqliteDatasetWriter::new(path, descriptor(), &context())
            .unwrap()
            .with_score_columns(&["cadd_raw"])
            .write(summary, families)
            .unwrap()
    }

    fn compile(query: VariantQuery) -> Arc<CompiledFilters> {
        Arc::new(CompiledFilters::compile(&query).unwrap())
    }

    #[test]
    fn test_write_tables_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variants.db");
        let meta = write_sample(&path);
        assert_eq!(meta.summary_rows, 8);

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", FAMILY_TABLE), [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 5);
        assert!(metadata_value(&conn, PARTITION_DESCRIPTION_KEY).unwrap().is_some());
        assert!(table_columns(&conn, SUMMARY_TABLE).unwrap().contains("cadd_raw"));
    }

    #[test]
    fn test_invalid_score_column_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SqliteDatasetWriter::new(dir.path().join("x.db"), descriptor(), &context())
            .unwrap()
            .with_score_columns(&["cadd; DROP TABLE metadata"]);
        assert!(matches!(writer.write(Vec::new(), Vec::new()), Err(StorageError::InvalidData(_))));
    }

    #[test]
    fn test_pool_exhaustion_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variants.db");
        write_sample(&path);

        let pool = ConnectionPool::open(&path, 1, Duration::from_millis(20), false).unwrap();
        let held = pool.acquire().unwrap();
        assert!(matches!(pool.acquire(), Err(StorageError::NoConnectionAvailable(_))));
        drop(held);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn test_schema_mismatch_on_missing_score_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variants.db");
        write_sample(&path);
        let config = StorageConfig::new("sql", "sqlite", &path).with_score_columns(&["phylop"]);
        assert!(matches!(SqliteVariants::open(&config, &context()), Err(StorageError::SchemaMismatch(_))));
    }

    #[test]
    fn test_bucket_plans_follow_region_bins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variants.db");
        write_sample(&path);
        let backend = SqliteVariants::open(&StorageConfig::new("sql", "sqlite", &path), &context()).unwrap();

        let filters = compile(VariantQuery::new().with_regions(vec![Region::new("chr1", 10, 30)]));
        assert_eq!(backend.family_runners(&filters).unwrap().len(), 1);
        let all = compile(VariantQuery::new());
        assert_eq!(backend.summary_runners(&all).unwrap().len(), backend.layout().region_bins().len());
    }

    #[test]
    fn test_legacy_dialect_queries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variants.db");
        write_sample(&path);
        let config = StorageConfig::new("sql", "sqlite", &path).with_legacy_sql(true);
        let backend = SqliteVariants::open(&config, &context()).unwrap();
        let executor = QueryExecutor::new(2).unwrap();

        let filters = compile(VariantQuery::new().with_inheritance("denovo").with_roles("prb"));
        let found: Vec<FamilyHit> = executor.execute(backend.family_runners(&filters).unwrap()).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].variant.position(), 11);
        assert_eq!(&*found[0].source, "sql");
    }

    #[test]
    fn test_runner_waits_for_busy_pool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variants.db");
        write_sample(&path);
        let config = StorageConfig::new("sql", "sqlite", &path).with_pool(1, 10);
        let backend = SqliteVariants::open(&config, &context()).unwrap();
        let executor = QueryExecutor::new(4).unwrap();

        // many buckets share one connection; every runner still completes
        let filters = compile(VariantQuery::new());
        let found = executor.execute(backend.family_runners(&filters).unwrap()).count();
        assert_eq!(found, 5);
    }
}
