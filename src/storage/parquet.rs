// ==============================================================================
// storage/parquet.rs - Partitioned Parquet Dataset
// ==============================================================================
// Description: Writes and scans hive-partitioned Parquet variant datasets
// Author: Matt Barham
// Created: 2025-11-24
// Modified: 2025-11-30
// Version: 1.0.0
// ==============================================================================
// Dataset layout:
//   <root>/partition_description.toml
//   <root>/meta.json
//   <root>/summary/region_bin=chr1_0/frequency_bin=1/coding_bin=0/
//       summary_region_bin_chr1_0_frequency_bin_1_coding_bin_0_bucket_index_000000.parquet
//   <root>/family/.../family_bin=3/family_..._bucket_index_000000.parquet
//
// Partition values live in directory names only. Family rows carry the site
// blob as well, so a family scan never touches the summary table.
// ==============================================================================

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{
    dataset_rows, decode_family, group_sites, DatasetMeta, FamilyHit, FamilyRow, GenomicContext, SeenIds,
    StorageError, StorageFactory, SummaryCache, SummaryHit, SummaryRow, VariantsBackend,
};
use crate::config::StorageConfig;
use crate::filters::CompiledFilters;
use crate::partition::{
    partition_directory, partition_filename, path_to_partitions, PartitionDescriptor, PartitionLayout,
};
use crate::pedigree::FamiliesData;
use crate::query_builder::{FamilyRowView, QueryHeuristics, RowPredicate, RowView};
use crate::query_runner::{QueryRunner, RunnerSink};
use crate::variants::{FamilyVariant, SummaryVariant};

pub const DESCRIPTION_FILE: &str = "partition_description.toml";
pub const META_FILE: &str = "meta.json";
pub const SUMMARY_DIR: &str = "summary";
pub const FAMILY_DIR: &str = "family";

const SUMMARY_REQUIRED: &[&str] = &[
    "bucket_index",
    "summary_index",
    "allele_index",
    "chromosome",
    "position",
    "end_position",
    "summary_variant_data",
];

const FAMILY_REQUIRED: &[&str] = &[
    "bucket_index",
    "summary_index",
    "allele_index",
    "family_id",
    "chromosome",
    "position",
    "end_position",
    "allele_in_roles",
    "allele_in_sexes",
    "allele_in_statuses",
    "inheritance_in_members",
    "zygosity_in_roles",
    "summary_variant_data",
    "family_variant_data",
];

fn summary_schema(score_columns: &[String]) -> SchemaRef {
    let mut fields = vec![
        Field::new("bucket_index", DataType::Int64, false),
        Field::new("summary_index", DataType::Int64, false),
        Field::new("allele_index", DataType::Int64, false),
        Field::new("chromosome", DataType::Utf8, false),
        Field::new("position", DataType::Int64, false),
        Field::new("end_position", DataType::Int64, true),
        Field::new("variant_type", DataType::Int64, false),
        Field::new("af_allele_freq", DataType::Float64, true),
        Field::new("af_allele_count", DataType::Float64, true),
    ];
    fields.extend(score_columns.iter().map(|column| Field::new(column, DataType::Float64, true)));
    fields.push(Field::new("summary_variant_data", DataType::Utf8, false));
    Arc::new(Schema::new(fields))
}

fn family_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("bucket_index", DataType::Int64, false),
        Field::new("summary_index", DataType::Int64, false),
        Field::new("allele_index", DataType::Int64, false),
        Field::new("family_id", DataType::Utf8, false),
        Field::new("chromosome", DataType::Utf8, false),
        Field::new("position", DataType::Int64, false),
        Field::new("end_position", DataType::Int64, true),
        Field::new("allele_in_roles", DataType::Int64, false),
        Field::new("allele_in_sexes", DataType::Int64, false),
        Field::new("allele_in_statuses", DataType::Int64, false),
        Field::new("inheritance_in_members", DataType::Int64, false),
        Field::new("zygosity_in_roles", DataType::Int64, false),
        Field::new("summary_variant_data", DataType::Utf8, false),
        Field::new("family_variant_data", DataType::Utf8, false),
    ]))
}

fn summary_batch(schema: &SchemaRef, rows: &[&SummaryRow], score_columns: &[String]) -> Result<RecordBatch, StorageError> {
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(rows.iter().map(|r| r.bucket_index as i64).collect::<Vec<_>>())),
        Arc::new(Int64Array::from(rows.iter().map(|r| r.summary_index).collect::<Vec<_>>())),
        Arc::new(Int64Array::from(rows.iter().map(|r| r.allele_index as i64).collect::<Vec<_>>())),
        Arc::new(StringArray::from(rows.iter().map(|r| r.chromosome.as_str()).collect::<Vec<_>>())),
        Arc::new(Int64Array::from(rows.iter().map(|r| r.position as i64).collect::<Vec<_>>())),
        Arc::new(Int64Array::from(rows.iter().map(|r| r.end_position.map(|e| e as i64)).collect::<Vec<_>>())),
        Arc::new(Int64Array::from(rows.iter().map(|r| r.variant_type as i64).collect::<Vec<_>>())),
        Arc::new(Float64Array::from(rows.iter().map(|r| r.af_allele_freq).collect::<Vec<_>>())),
        Arc::new(Float64Array::from(rows.iter().map(|r| r.af_allele_count).collect::<Vec<_>>())),
    ];
    for index in 0..score_columns.len() {
        columns.push(Arc::new(Float64Array::from(
            rows.iter().map(|r| r.scores.get(index).copied().flatten()).collect::<Vec<_>>(),
        )));
    }
    columns.push(Arc::new(StringArray::from(
        rows.iter().map(|r| &*r.summary_variant_data).collect::<Vec<_>>(),
    )));
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

fn family_batch(schema: &SchemaRef, rows: &[&FamilyRow]) -> Result<RecordBatch, StorageError> {
    let int = |f: fn(&FamilyRow) -> u64| -> ArrayRef {
        Arc::new(Int64Array::from(rows.iter().map(|&r| f(r) as i64).collect::<Vec<_>>()))
    };
    let columns: Vec<ArrayRef> = vec![
        int(|r| r.bucket_index as u64),
        Arc::new(Int64Array::from(rows.iter().map(|r| r.summary_index).collect::<Vec<_>>())),
        int(|r| r.allele_index as u64),
        Arc::new(StringArray::from(rows.iter().map(|r| r.family_id.as_str()).collect::<Vec<_>>())),
        Arc::new(StringArray::from(rows.iter().map(|r| r.chromosome.as_str()).collect::<Vec<_>>())),
        int(|r| r.position),
        Arc::new(Int64Array::from(rows.iter().map(|r| r.end_position.map(|e| e as i64)).collect::<Vec<_>>())),
        int(|r| r.allele_in_roles),
        int(|r| r.allele_in_sexes),
        int(|r| r.allele_in_statuses),
        int(|r| r.inheritance_in_members),
        int(|r| r.zygosity_in_roles),
        Arc::new(StringArray::from(rows.iter().map(|r| &*r.summary_variant_data).collect::<Vec<_>>())),
        Arc::new(StringArray::from(rows.iter().map(|r| &*r.family_variant_data).collect::<Vec<_>>())),
    ];
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

fn write_batch(path: &Path, schema: SchemaRef, batch: &RecordBatch) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let props = WriterProperties::builder()
        .set_compression(parquet::basic::Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

/// Writes a partitioned dataset
pub struct ParquetDatasetWriter {
    root: PathBuf,
    descriptor: PartitionDescriptor,
    layout: PartitionLayout,
    score_columns: Vec<String>,
}

impl ParquetDatasetWriter {
    pub fn new(
        root: impl Into<PathBuf>,
        descriptor: PartitionDescriptor,
        context: &GenomicContext,
    ) -> Result<Self, StorageError> {
        let layout = PartitionLayout::new(descriptor.clone(), &context.contigs, &context.prefix)?;
        Ok(Self { root: root.into(), descriptor, layout, score_columns: Vec::new() })
    }

    pub fn with_score_columns(mut self, columns: &[&str]) -> Self {
        self.score_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn write(
        &self,
        summary_variants: Vec<SummaryVariant>,
        family_variants: Vec<FamilyVariant>,
    ) -> Result<DatasetMeta, StorageError> {
        fs::create_dir_all(&self.root)?;
        let sites = group_sites(summary_variants, family_variants);
        let (summary_rows, family_rows) = dataset_rows(&self.layout, &sites, &self.score_columns)?;

        let summary_schema = summary_schema(&self.score_columns);
        let mut groups: BTreeMap<(usize, &[(String, String)]), Vec<&SummaryRow>> = BTreeMap::new();
        for row in &summary_rows {
            groups.entry((row.bucket_index, row.partition.as_slice())).or_default().push(row);
        }
        for ((bucket_index, partition), rows) in &groups {
            let path = self
                .root
                .join(SUMMARY_DIR)
                .join(partition_directory(partition))
                .join(partition_filename(SUMMARY_DIR, partition, *bucket_index));
            write_batch(&path, summary_schema.clone(), &summary_batch(&summary_schema, rows, &self.score_columns)?)?;
        }

        let family_schema = family_schema();
        let mut groups: BTreeMap<(usize, &[(String, String)]), Vec<&FamilyRow>> = BTreeMap::new();
        for row in &family_rows {
            groups.entry((row.bucket_index, row.partition.as_slice())).or_default().push(row);
        }
        for ((bucket_index, partition), rows) in &groups {
            let path = self
                .root
                .join(FAMILY_DIR)
                .join(partition_directory(partition))
                .join(partition_filename(FAMILY_DIR, partition, *bucket_index));
            write_batch(&path, family_schema.clone(), &family_batch(&family_schema, rows)?)?;
        }

        fs::write(self.root.join(DESCRIPTION_FILE), self.descriptor.to_toml()?)?;
        let mut meta = DatasetMeta::new(&self.layout, &self.score_columns);
        meta.summary_rows = summary_rows.len();
        meta.family_rows = family_rows.len();
        fs::write(self.root.join(META_FILE), serde_json::to_string_pretty(&meta)?)?;

        info!(
            "Wrote Parquet dataset {:?}: {} sites, {} summary rows, {} family rows",
            self.root,
            sites.len(),
            meta.summary_rows,
            meta.family_rows
        );
        Ok(meta)
    }
}

#[derive(Debug, Clone)]
struct DatasetFile {
    path: PathBuf,
    partition: Vec<(String, String)>,
    bucket_index: usize,
}

/// Parquet files under `dir` with their partition values, in bucket order
fn list_files(dir: &Path, layout: &PartitionLayout) -> Result<Vec<DatasetFile>, StorageError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| StorageError::IoError(e.into()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("parquet") {
            continue;
        }
        let relative = path.strip_prefix(dir).unwrap_or(path);
        let partition = path_to_partitions(relative);
        let region_bin = partition
            .iter()
            .find(|(name, _)| name == "region_bin")
            .map(|(_, value)| value.as_str());
        if let Some(bin) = region_bin {
            if layout.bucket_index(bin).is_none() {
                return Err(StorageError::SchemaMismatch(format!("{:?} is in unknown region bin '{}'", path, bin)));
            }
        }
        files.push(DatasetFile {
            path: path.to_path_buf(),
            bucket_index: layout.bucket_of(region_bin),
            partition,
        });
    }
    files.sort_by(|a, b| (a.bucket_index, &a.path).cmp(&(b.bucket_index, &b.path)));
    Ok(files)
}

fn check_columns(path: &Path, required: &[&str]) -> Result<(), StorageError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let schema = builder.schema();
    match required.iter().find(|column| schema.index_of(column).is_err()) {
        Some(column) => Err(StorageError::SchemaMismatch(format!("{:?} lacks column '{}'", path, column))),
        None => Ok(()),
    }
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array, StorageError> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| StorageError::SchemaMismatch(format!("expected Int64 column '{}'", name)))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, StorageError> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| StorageError::SchemaMismatch(format!("expected Utf8 column '{}'", name)))
}

fn optional_u64(array: &Int64Array, row: usize) -> Option<u64> {
    (!array.is_null(row)).then(|| array.value(row) as u64)
}

/// Batches of one file
fn read_batches(path: &Path) -> Result<impl Iterator<Item = Result<RecordBatch, arrow::error::ArrowError>>, StorageError> {
    Ok(ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?)
}

/// Partitioned Parquet dataset opened for queries
pub struct ParquetVariants {
    id: String,
    root: PathBuf,
    descriptor: PartitionDescriptor,
    layout: PartitionLayout,
    families: Arc<FamiliesData>,
    summary_files: Vec<DatasetFile>,
    family_files: Vec<DatasetFile>,
}

impl ParquetVariants {
    pub fn open(id: &str, root: impl Into<PathBuf>, context: &GenomicContext) -> Result<Self, StorageError> {
        let root = root.into();
        let descriptor_path = root.join(DESCRIPTION_FILE);
        let descriptor = if descriptor_path.exists() {
            PartitionDescriptor::parse(&descriptor_path)?
        } else {
            PartitionDescriptor::default()
        };
        let layout = PartitionLayout::new(descriptor.clone(), &context.contigs, &context.prefix)?;

        let meta_path = root.join(META_FILE);
        if meta_path.exists() {
            let meta: DatasetMeta = serde_json::from_str(&fs::read_to_string(&meta_path)?)?;
            meta.check_layout(&layout)?;
        }

        let summary_files = list_files(&root.join(SUMMARY_DIR), &layout)?;
        let family_files = list_files(&root.join(FAMILY_DIR), &layout)?;
        if let Some(file) = summary_files.first() {
            check_columns(&file.path, SUMMARY_REQUIRED)?;
        }
        if let Some(file) = family_files.first() {
            check_columns(&file.path, FAMILY_REQUIRED)?;
        }
        debug!(
            "Opened Parquet dataset '{}' with {} summary and {} family files",
            id,
            summary_files.len(),
            family_files.len()
        );
        Ok(Self {
            id: id.to_string(),
            root,
            descriptor,
            layout,
            families: context.families.clone(),
            summary_files,
            family_files,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Descriptor as stored, before any chromosome prefix adjustment
    pub fn descriptor(&self) -> &PartitionDescriptor {
        &self.descriptor
    }

    /// Files grouped by bucket after partition pruning
    fn buckets(&self, files: &[DatasetFile], heuristics: &QueryHeuristics) -> BTreeMap<usize, Vec<PathBuf>> {
        let mut buckets: BTreeMap<usize, Vec<PathBuf>> = BTreeMap::new();
        let mut pruned = 0;
        for file in files {
            if heuristics.accepts(&file.partition) {
                buckets.entry(file.bucket_index).or_default().push(file.path.clone());
            } else {
                pruned += 1;
            }
        }
        debug!("'{}': {} files pruned, {} buckets to scan", self.id, pruned, buckets.len());
        buckets
    }

    /// Every site of the dataset, decoded without filtering
    pub fn load_all(&self) -> Result<(Vec<SummaryVariant>, Vec<FamilyVariant>), StorageError> {
        let mut seen = HashSet::new();
        let mut summary_variants = Vec::new();
        for file in &self.summary_files {
            for batch in read_batches(&file.path)? {
                let batch = batch?;
                let blobs = string_column(&batch, "summary_variant_data")?;
                for row in 0..batch.num_rows() {
                    let sv = super::decode_summary(blobs.value(row))?;
                    if seen.insert(sv.svuid()) {
                        summary_variants.push(sv);
                    }
                }
            }
        }

        let mut seen = HashSet::new();
        let mut family_variants = Vec::new();
        for file in &self.family_files {
            for batch in read_batches(&file.path)? {
                let batch = batch?;
                let summaries = string_column(&batch, "summary_variant_data")?;
                let blobs = string_column(&batch, "family_variant_data")?;
                for row in 0..batch.num_rows() {
                    let sv = super::decode_summary(summaries.value(row))?;
                    let fv = decode_family(sv, &self.families, blobs.value(row))?;
                    if seen.insert(fv.fvuid()) {
                        family_variants.push(fv);
                    }
                }
            }
        }
        Ok((summary_variants, family_variants))
    }
}

impl VariantsBackend for ParquetVariants {
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
        let heuristics = QueryHeuristics::calc(&self.layout, filters, &self.families);
        let predicate = Arc::new(RowPredicate::new(filters, &self.families));
        let source: Arc<str> = Arc::from(self.id.as_str());
        Ok(self
            .buckets(&self.family_files, &heuristics)
            .into_iter()
            .map(|(bucket_index, files)| {
                Box::new(ParquetFamilyRunner {
                    name: format!("{}:family:{}", self.id, bucket_index),
                    source: source.clone(),
                    files,
                    predicate: predicate.clone(),
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
        let heuristics = QueryHeuristics::calc(&self.layout, filters, &self.families);
        let predicate = Arc::new(RowPredicate::new(filters, &self.families));
        let source: Arc<str> = Arc::from(self.id.as_str());
        Ok(self
            .buckets(&self.summary_files, &heuristics)
            .into_iter()
            .map(|(bucket_index, files)| {
                Box::new(ParquetSummaryRunner {
                    name: format!("{}:summary:{}", self.id, bucket_index),
                    source: source.clone(),
                    files,
                    predicate: predicate.clone(),
                    filters: filters.clone(),
                }) as Box<dyn QueryRunner<SummaryHit>>
            })
            .collect())
    }
}

struct ParquetFamilyRunner {
    name: String,
    source: Arc<str>,
    files: Vec<PathBuf>,
    predicate: Arc<RowPredicate>,
    filters: Arc<CompiledFilters>,
    families: Arc<FamiliesData>,
}

impl QueryRunner<FamilyHit> for ParquetFamilyRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, sink: &RunnerSink<FamilyHit>) -> Result<(), StorageError> {
        let mut seen = SeenIds::default();
        let mut cache = SummaryCache::default();
        for path in &self.files {
            for batch in read_batches(path)? {
                let batch = batch?;
                let bucket_index = int_column(&batch, "bucket_index")?;
                let summary_index = int_column(&batch, "summary_index")?;
                let allele_index = int_column(&batch, "allele_index")?;
                let family_id = string_column(&batch, "family_id")?;
                let chromosome = string_column(&batch, "chromosome")?;
                let position = int_column(&batch, "position")?;
                let end_position = int_column(&batch, "end_position")?;
                let roles = int_column(&batch, "allele_in_roles")?;
                let sexes = int_column(&batch, "allele_in_sexes")?;
                let statuses = int_column(&batch, "allele_in_statuses")?;
                let inheritance = int_column(&batch, "inheritance_in_members")?;
                let zygosity = int_column(&batch, "zygosity_in_roles")?;
                let summary_data = string_column(&batch, "summary_variant_data")?;
                let family_data = string_column(&batch, "family_variant_data")?;

                for row in 0..batch.num_rows() {
                    if sink.is_closed() {
                        return Ok(());
                    }
                    let view = RowView {
                        chromosome: chromosome.value(row),
                        position: position.value(row) as u64,
                        end_position: optional_u64(end_position, row),
                        allele_index: allele_index.value(row) as usize,
                        family: Some(FamilyRowView {
                            family_id: family_id.value(row),
                            allele_in_roles: roles.value(row) as u64,
                            allele_in_sexes: sexes.value(row) as u64,
                            allele_in_statuses: statuses.value(row) as u64,
                            inheritance_in_members: inheritance.value(row) as u64,
                            zygosity_in_roles: zygosity.value(row) as u64,
                        }),
                    };
                    if !self.predicate.accepts(&view) {
                        continue;
                    }

                    let decoded = cache
                        .get_or_decode(bucket_index.value(row) as usize, summary_index.value(row), summary_data.value(row))
                        .and_then(|sv| decode_family(sv, &self.families, family_data.value(row)));
                    let fv = match decoded {
                        Ok(fv) => fv,
                        Err(e) => {
                            warn!("{}: skipping undecodable row in {:?}: {}", self.name, path, e);
                            continue;
                        }
                    };
                    if !seen.first_time(fv.fvuid()) {
                        continue;
                    }
                    if let Some(variant) = self.filters.filter_family_variant(fv) {
                        if !sink.send(FamilyHit { source: self.source.clone(), variant }) {
                            return Ok(());
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

struct ParquetSummaryRunner {
    name: String,
    source: Arc<str>,
    files: Vec<PathBuf>,
    predicate: Arc<RowPredicate>,
    filters: Arc<CompiledFilters>,
}

impl QueryRunner<SummaryHit> for ParquetSummaryRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, sink: &RunnerSink<SummaryHit>) -> Result<(), StorageError> {
        let mut seen = SeenIds::default();
        for path in &self.files {
            for batch in read_batches(path)? {
                let batch = batch?;
                let allele_index = int_column(&batch, "allele_index")?;
                let chromosome = string_column(&batch, "chromosome")?;
                let position = int_column(&batch, "position")?;
                let end_position = int_column(&batch, "end_position")?;
                let summary_data = string_column(&batch, "summary_variant_data")?;

                for row in 0..batch.num_rows() {
                    if sink.is_closed() {
                        return Ok(());
                    }
                    let view = RowView {
                        chromosome: chromosome.value(row),
                        position: position.value(row) as u64,
                        end_position: optional_u64(end_position, row),
                        allele_index: allele_index.value(row) as usize,
                        family: None,
                    };
                    if !self.predicate.accepts(&view) {
                        continue;
                    }
                    let sv = match super::decode_summary(summary_data.value(row)) {
                        Ok(sv) => sv,
                        Err(e) => {
                            warn!("{}: skipping undecodable row in {:?}: {}", self.name, path, e);
                            continue;
                        }
                    };
                    if !seen.first_time(sv.svuid()) {
                        continue;
                    }
                    if let Some(variant) = self.filters.filter_summary_variant(sv) {
                        if !sink.send(SummaryHit { source: self.source.clone(), variant }) {
                            return Ok(());
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Factory for `parquet` storages
pub struct ParquetFactory;

impl StorageFactory for ParquetFactory {
    fn storage_type(&self) -> &'static str {
        "parquet"
    }

    fn open(
        &self,
        config: &StorageConfig,
        context: &GenomicContext,
    ) -> Result<Arc<dyn VariantsBackend>, StorageError> {
        let variants = ParquetVariants::open(&config.id, &config.path, context)?;
        if !config.score_columns.is_empty() {
            let meta: DatasetMeta = serde_json::from_str(&fs::read_to_string(config.path.join(META_FILE))?)?;
            meta.check_score_columns(&config.score_columns)?;
        }
        Ok(Arc::new(variants))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Region, VariantQuery};
    use crate::query_runner::QueryExecutor;
    use crate::storage::tests::{context, descriptor, sample_dataset};

    fn write_sample(root: &Path) -> DatasetMeta {
        let (summary, families) = sample_dataset();
        ParquetDatasetWriter::new(root, descriptor(), &context())
            .unwrap()
            .with_score_columns(&["cadd_raw"])
            .write(summary, families)
            .unwrap()
    }

    #[test]
    fn test_writer_layout() {
        let dir = tempfile::tempdir().unwrap();
        let meta = write_sample(dir.path());
        assert!(dir.path().join(DESCRIPTION_FILE).exists());
        assert!(dir.path().join(META_FILE).exists());
        // four sites, reference and alternative each
        assert_eq!(meta.summary_rows, 8);
        assert_eq!(meta.family_rows, 5);

        let expected = dir
            .path()
            .join("summary/region_bin=chr1_0/frequency_bin=1/coding_bin=1")
            .join("summary_region_bin_chr1_0_frequency_bin_1_coding_bin_1_bucket_index_000000.parquet");
        assert!(expected.exists());
    }

    #[test]
    fn test_open_and_load_all() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path());
        let variants = ParquetVariants::open("pq", dir.path(), &context()).unwrap();
        assert_eq!(variants.descriptor(), &descriptor());

        let (summary, families) = variants.load_all().unwrap();
        assert_eq!(summary.len(), 4);
        assert_eq!(families.len(), 5);
        // statistics were stored with the site
        let site = summary.iter().find(|sv| sv.position() == 30).unwrap();
        assert_eq!(site.alleles()[1].get_attribute("family_variants_count"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn test_region_pruning_limits_runners() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path());
        let variants = ParquetVariants::open("pq", dir.path(), &context()).unwrap();
        let filters = Arc::new(
            CompiledFilters::compile(&VariantQuery::new().with_regions(vec![Region::new("chr1", 49, 51)])).unwrap(),
        );
        let runners = variants.summary_runners(&filters).unwrap();
        assert_eq!(runners.len(), 1);

        let executor = QueryExecutor::new(2).unwrap();
        let hits: Vec<SummaryHit> = executor.execute(runners).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].variant.position(), 50);
    }

    #[test]
    fn test_layout_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path());
        fs::write(
            dir.path().join(DESCRIPTION_FILE),
            "[region_bin]\nchromosomes = [\"chr1\"]\nregion_length = 500\n",
        )
        .unwrap();
        assert!(matches!(
            ParquetVariants::open("pq", dir.path(), &context()),
            Err(StorageError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_missing_score_column_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path());
        let config = StorageConfig::new("pq", "parquet", dir.path()).with_score_columns(&["phylop"]);
        assert!(matches!(ParquetFactory.open(&config, &context()), Err(StorageError::SchemaMismatch(_))));
    }
}
