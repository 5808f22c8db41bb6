// ==============================================================================
// storage/mod.rs - Storage Backends
// ==============================================================================
// Description: Backend capability trait, storage factory registry, genomic
//              context and the stored row layout shared by the writers
// Author: Matt Barham
// Created: 2025-11-22
// Modified: 2025-11-30
// Version: 1.0.0
// ==============================================================================
// Persisted layout (both columnar and SQL backends):
//   summary_alleles: bucket_index, summary_index, allele_index, chromosome,
//                    position, end_position, variant_type, af_allele_freq,
//                    af_allele_count, <score columns>, summary_variant_data,
//                    region_bin, frequency_bin, coding_bin
//   family_alleles:  bucket_index, summary_index, allele_index, family_id,
//                    allele_in_roles, allele_in_sexes, allele_in_statuses,
//                    inheritance_in_members, zygosity_in_roles,
//                    family_variant_data, region_bin, frequency_bin,
//                    coding_bin, family_bin
// Blobs are JSON: a list of allele records for the site, and the family
// genotype. Every allele row of a site carries the whole site blob.
// ==============================================================================

pub mod inmemory;
pub mod parquet;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::attributes::{AttributeQueryError, BitmaskEnum};
use crate::config::StorageConfig;
use crate::filters::CompiledFilters;
use crate::parsers::contigs::ContigLengths;
use crate::partition::{ChromosomePrefix, PartitionError, PartitionLayout};
use crate::pedigree::FamiliesData;
use crate::query_runner::QueryRunner;
use crate::variants::summary::ALLELE_COUNT_ATTRIBUTE;
use crate::variants::{
    annotate_family_statistics, AlleleRecord, FamilyVariant, FamilyVariantData, SummaryVariant,
    SummaryVariantFactory, VariantError,
};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    ParquetError(#[from] ::parquet::errors::ParquetError),

    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Partition error: {0}")]
    PartitionError(#[from] PartitionError),

    #[error("Variant error: {0}")]
    VariantError(#[from] VariantError),

    #[error("Query error: {0}")]
    QueryError(#[from] AttributeQueryError),

    #[error("No connection available: {0}")]
    NoConnectionAvailable(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Unknown storage type: {0}")]
    UnknownStorageType(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Reference data every backend of a dataset is opened with
#[derive(Debug, Clone)]
pub struct GenomicContext {
    pub contigs: ContigLengths,
    pub families: Arc<FamiliesData>,
    pub prefix: ChromosomePrefix,
}

impl GenomicContext {
    pub fn new(contigs: ContigLengths, families: Arc<FamiliesData>) -> Self {
        Self { contigs, families, prefix: ChromosomePrefix::None }
    }

    pub fn with_prefix(mut self, prefix: ChromosomePrefix) -> Self {
        self.prefix = prefix;
        self
    }
}

/// A summary variant tagged with the backend it came from
#[derive(Debug, Clone)]
pub struct SummaryHit {
    pub source: Arc<str>,
    pub variant: SummaryVariant,
}

/// A family variant tagged with the backend it came from
#[derive(Debug, Clone)]
pub struct FamilyHit {
    pub source: Arc<str>,
    pub variant: FamilyVariant,
}

/// A queryable store of variants
pub trait VariantsBackend: Send + Sync {
    fn id(&self) -> &str;

    /// Physical partition layout used for bin pruning
    fn layout(&self) -> &PartitionLayout;

    /// Runners yielding filtered family variants
    ///
    /// A site stored in several region bins may be yielded once per bin.
    fn family_runners(
        &self,
        filters: &Arc<CompiledFilters>,
    ) -> Result<Vec<Box<dyn QueryRunner<FamilyHit>>>, StorageError>;

    /// Runners yielding filtered summary variants
    fn summary_runners(
        &self,
        filters: &Arc<CompiledFilters>,
    ) -> Result<Vec<Box<dyn QueryRunner<SummaryHit>>>, StorageError>;
}

/// Opens backends of one storage type
pub trait StorageFactory: Send + Sync {
    fn storage_type(&self) -> &'static str;

    fn open(
        &self,
        config: &StorageConfig,
        context: &GenomicContext,
    ) -> Result<Arc<dyn VariantsBackend>, StorageError>;
}

/// Storage factories by type, constructed once and passed by reference
#[derive(Default)]
pub struct StorageRegistry {
    factories: HashMap<String, Box<dyn StorageFactory>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `inmemory`, `parquet` and `sqlite` factories
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(inmemory::InMemoryFactory));
        registry.register(Box::new(parquet::ParquetFactory));
        registry.register(Box::new(sqlite::SqliteFactory));
        registry
    }

    /// Register a factory; an existing one of the same type is replaced
    pub fn register(&mut self, factory: Box<dyn StorageFactory>) {
        let storage_type = factory.storage_type().to_string();
        if self.factories.insert(storage_type.clone(), factory).is_some() {
            warn!("Storage factory '{}' re-registered, replacing the previous one", storage_type);
        }
    }

    pub fn storage_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn open(
        &self,
        config: &StorageConfig,
        context: &GenomicContext,
    ) -> Result<Arc<dyn VariantsBackend>, StorageError> {
        let factory = self
            .factories
            .get(&config.storage_type)
            .ok_or_else(|| StorageError::UnknownStorageType(config.storage_type.clone()))?;
        info!("Opening {} storage '{}' at {:?}", config.storage_type, config.id, config.path);
        factory.open(config, context)
    }
}

/// One site with its family variants and computed family statistics
#[derive(Debug, Clone)]
pub struct StoredSite {
    pub summary: SummaryVariant,
    pub families: Vec<FamilyVariant>,
}

/// Group family variants under their sites and annotate site statistics
///
/// Sites only known through family variants are added.
pub fn group_sites(summary_variants: Vec<SummaryVariant>, family_variants: Vec<FamilyVariant>) -> Vec<StoredSite> {
    let mut sites: Vec<StoredSite> = Vec::with_capacity(summary_variants.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for summary in summary_variants {
        let svuid = summary.svuid();
        if index.contains_key(&svuid) {
            warn!("Duplicate summary variant {} ignored", svuid);
            continue;
        }
        index.insert(svuid, sites.len());
        sites.push(StoredSite { summary, families: Vec::new() });
    }
    for fv in family_variants {
        let svuid = fv.svuid();
        let position = match index.get(&svuid) {
            Some(&position) => position,
            None => {
                index.insert(svuid, sites.len());
                sites.push(StoredSite { summary: fv.summary().clone(), families: Vec::new() });
                sites.len() - 1
            }
        };
        sites[position].families.push(fv);
    }
    for site in &mut sites {
        annotate_family_statistics(&mut site.summary, &site.families);
    }
    sites
}

/// Columns of one stored summary allele row
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub bucket_index: usize,
    pub summary_index: i64,
    pub allele_index: usize,
    pub chromosome: String,
    pub position: u64,
    pub end_position: Option<u64>,
    pub variant_type: u64,
    pub af_allele_freq: Option<f64>,
    pub af_allele_count: Option<f64>,
    pub scores: Vec<Option<f64>>,
    pub summary_variant_data: Arc<str>,
    pub partition: Vec<(String, String)>,
}

/// Columns of one stored family allele row
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyRow {
    pub bucket_index: usize,
    pub summary_index: i64,
    pub allele_index: usize,
    pub family_id: String,
    pub chromosome: String,
    pub position: u64,
    pub end_position: Option<u64>,
    pub allele_in_roles: u64,
    pub allele_in_sexes: u64,
    pub allele_in_statuses: u64,
    pub inheritance_in_members: u64,
    pub zygosity_in_roles: u64,
    pub summary_variant_data: Arc<str>,
    pub family_variant_data: Arc<str>,
    pub partition: Vec<(String, String)>,
}

impl FamilyRow {
    pub fn partition_value(&self, name: &str) -> Option<&str> {
        partition_value(&self.partition, name)
    }
}

impl SummaryRow {
    pub fn partition_value(&self, name: &str) -> Option<&str> {
        partition_value(&self.partition, name)
    }
}

fn partition_value<'a>(partition: &'a [(String, String)], name: &str) -> Option<&'a str> {
    partition.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
}

/// Region bins of a site, `[None]` for datasets without region bins
fn site_bins(layout: &PartitionLayout, summary: &SummaryVariant) -> Vec<Option<String>> {
    if !layout.descriptor().has_region_bins() {
        return vec![None];
    }
    layout
        .region_bins_of_span(summary.chromosome(), summary.position(), summary.end())
        .into_iter()
        .map(Some)
        .collect()
}

/// Stored rows of a site in every region bin its span overlaps
pub fn site_rows(
    layout: &PartitionLayout,
    site: &StoredSite,
    score_columns: &[String],
) -> Result<(Vec<SummaryRow>, Vec<FamilyRow>), StorageError> {
    let summary = &site.summary;
    let summary_blob: Arc<str> = serde_json::to_string(&summary.to_records())?.into();
    let family_blobs: Vec<Arc<str>> = site
        .families
        .iter()
        .map(|fv| serde_json::to_string(&fv.to_data()).map(Arc::from))
        .collect::<Result<_, _>>()?;

    let mut summary_rows = Vec::new();
    let mut family_rows = Vec::new();
    for bin in site_bins(layout, summary) {
        let bucket_index = layout.bucket_of(bin.as_deref());
        for allele in summary.alleles() {
            summary_rows.push(SummaryRow {
                bucket_index,
                summary_index: allele.summary_index,
                allele_index: allele.allele_index,
                chromosome: allele.chromosome.clone(),
                position: allele.position,
                end_position: allele.end_position,
                variant_type: allele.variant_type().map(|t| t.as_bitmask()).unwrap_or(0),
                af_allele_freq: allele.frequency(),
                af_allele_count: allele.get_attribute(ALLELE_COUNT_ATTRIBUTE).and_then(Value::as_f64),
                scores: score_columns
                    .iter()
                    .map(|column| allele.get_attribute(column).and_then(Value::as_f64))
                    .collect(),
                summary_variant_data: summary_blob.clone(),
                partition: layout.summary_partition(allele, bin.as_deref()),
            });
        }

        for (fv, family_blob) in site.families.iter().zip(&family_blobs) {
            let stored: Vec<usize> = match fv.allele_indices() {
                [_reference] => vec![0],
                indices => indices.iter().copied().filter(|&index| index > 0).collect(),
            };
            for allele_index in stored {
                let (Some(fa), Some(allele)) = (fv.family_allele(allele_index), summary.allele(allele_index)) else {
                    continue;
                };
                family_rows.push(FamilyRow {
                    bucket_index,
                    summary_index: allele.summary_index,
                    allele_index,
                    family_id: fv.family_id().to_string(),
                    chromosome: allele.chromosome.clone(),
                    position: allele.position,
                    end_position: allele.end_position,
                    allele_in_roles: fa.allele_in_roles(),
                    allele_in_sexes: fa.allele_in_sexes(),
                    allele_in_statuses: fa.allele_in_statuses(),
                    inheritance_in_members: fa.inheritance_bitmask(),
                    zygosity_in_roles: fa.zygosity_in_roles(),
                    summary_variant_data: summary_blob.clone(),
                    family_variant_data: family_blob.clone(),
                    partition: layout.family_partition(allele, bin.as_deref(), fv.family_id()),
                });
            }
        }
    }
    Ok((summary_rows, family_rows))
}

/// Rows of all sites, each table ordered by bucket and position
pub fn dataset_rows(
    layout: &PartitionLayout,
    sites: &[StoredSite],
    score_columns: &[String],
) -> Result<(Vec<SummaryRow>, Vec<FamilyRow>), StorageError> {
    let mut summary_rows = Vec::new();
    let mut family_rows = Vec::new();
    for site in sites {
        let (summary, family) = site_rows(layout, site, score_columns)?;
        summary_rows.extend(summary);
        family_rows.extend(family);
    }
    summary_rows.sort_by_key(|row| (row.bucket_index, row.position, row.summary_index, row.allele_index));
    family_rows.sort_by(|a, b| {
        (a.bucket_index, a.position, a.summary_index, &a.family_id, a.allele_index)
            .cmp(&(b.bucket_index, b.position, b.summary_index, &b.family_id, b.allele_index))
    });
    Ok((summary_rows, family_rows))
}

pub fn decode_summary(blob: &str) -> Result<SummaryVariant, StorageError> {
    let records: Vec<AlleleRecord> = serde_json::from_str(blob)?;
    Ok(SummaryVariantFactory::from_records(&records)?)
}

pub fn decode_family(
    summary: SummaryVariant,
    families: &Arc<FamiliesData>,
    blob: &str,
) -> Result<FamilyVariant, StorageError> {
    let data: FamilyVariantData = serde_json::from_str(blob)?;
    Ok(FamilyVariant::from_data(summary, families.clone(), data)?)
}

/// Dataset description stored next to the data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub dataset_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub region_bins: Vec<String>,
    pub score_columns: Vec<String>,
    pub summary_rows: usize,
    pub family_rows: usize,
}

impl DatasetMeta {
    pub fn new(layout: &PartitionLayout, score_columns: &[String]) -> Self {
        Self {
            dataset_id: Uuid::new_v4(),
            created_at: Utc::now(),
            region_bins: layout.region_bins().to_vec(),
            score_columns: score_columns.to_vec(),
            summary_rows: 0,
            family_rows: 0,
        }
    }

    /// Bucket numbering of the reader must equal the writer's
    pub fn check_layout(&self, layout: &PartitionLayout) -> Result<(), StorageError> {
        if self.region_bins.as_slice() != layout.region_bins() {
            return Err(StorageError::SchemaMismatch(format!(
                "dataset {} was written with {} region bins, layout has {}",
                self.dataset_id,
                self.region_bins.len(),
                layout.region_bins().len()
            )));
        }
        Ok(())
    }

    /// Requested score columns must have been materialised
    pub fn check_score_columns(&self, requested: &[String]) -> Result<(), StorageError> {
        match requested.iter().find(|column| !self.score_columns.contains(column)) {
            Some(column) => Err(StorageError::SchemaMismatch(format!("missing score column '{}'", column))),
            None => Ok(()),
        }
    }
}

/// Per-runner dedup of decoded variants by id
#[derive(Debug, Default)]
pub(crate) struct SeenIds(std::collections::HashSet<String>);

impl SeenIds {
    pub(crate) fn first_time(&mut self, id: String) -> bool {
        self.0.insert(id)
    }
}

/// Decoded summary variants of one runner, cached by summary index
#[derive(Debug, Default)]
pub(crate) struct SummaryCache(BTreeMap<(usize, i64), SummaryVariant>);

impl SummaryCache {
    pub(crate) fn get_or_decode(
        &mut self,
        bucket_index: usize,
        summary_index: i64,
        blob: &str,
    ) -> Result<SummaryVariant, StorageError> {
        if let Some(summary) = self.0.get(&(bucket_index, summary_index)) {
            return Ok(summary.clone());
        }
        let summary = decode_summary(blob)?;
        // rows arrive in position order; older sites are not revisited
        if self.0.len() > 64 {
            self.0.clear();
        }
        self.0.insert((bucket_index, summary_index), summary.clone());
        Ok(summary)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::attributes::{Inheritance, Role};
    use crate::genotype::Genotype;
    use crate::partition::PartitionDescriptor;
    use crate::pedigree::tests::quad;
    use crate::variants::SummaryAllele;

    pub(crate) fn quad_families() -> Arc<FamiliesData> {
        let mut persons = quad("f1");
        persons.extend(quad("f2"));
        Arc::new(FamiliesData::from_persons(persons).unwrap())
    }

    pub(crate) fn contigs() -> ContigLengths {
        vec![("chr1".to_string(), 1000), ("chr2".to_string(), 500), ("chrX".to_string(), 300)]
    }

    pub(crate) fn context() -> GenomicContext {
        GenomicContext::new(contigs(), quad_families())
    }

    pub(crate) fn descriptor() -> PartitionDescriptor {
        PartitionDescriptor::from_toml(
            "[region_bin]\nchromosomes = [\"chr1\"]\nregion_length = 100\n\
             [frequency_bin]\nrare_boundary = 5.0\n\
             [coding_bin]\ncoding_effect_types = \"LGDs, missense\"\n\
             [family_bin]\nfamily_bin_size = 4\n",
        )
        .unwrap()
    }

    pub(crate) fn layout() -> PartitionLayout {
        PartitionLayout::new(descriptor(), &contigs(), &ChromosomePrefix::None).unwrap()
    }

    fn site(chrom: &str, position: u64, end: Option<u64>, summary_index: i64) -> SummaryVariant {
        let mut alt = SummaryAllele::new(chrom, position, "A", Some("G"))
            .with_indices(summary_index, 1)
            .with_attribute("af_allele_freq", 1.5)
            .with_attribute("effects", "missense!SAMD11:missense!NM_1:SAMD11:missense:")
            .with_attribute("cadd_raw", 2.5);
        if let Some(end) = end {
            alt = alt.with_end_position(end);
        }
        SummaryVariant::new(vec![alt]).unwrap()
    }

    fn family(summary: &SummaryVariant, family_id: &str, calls: &[&str]) -> FamilyVariant {
        let genotype = Genotype::from_calls(calls).unwrap();
        FamilyVariant::new(summary.clone(), quad_families(), family_id, genotype).unwrap()
    }

    /// Three sites on chr1 (11-13, 30-33, 50), one on chr2; one de novo in f1
    pub(crate) fn sample_dataset() -> (Vec<SummaryVariant>, Vec<FamilyVariant>) {
        let sites = vec![
            site("chr1", 11, Some(13), 1),
            site("chr1", 30, Some(33), 2),
            site("chr1", 50, None, 3),
            site("chr2", 120, None, 4),
        ];
        let families = vec![
            family(&sites[0], "f1", &["0/0", "0/0", "0/1", "0/0"]),
            family(&sites[1], "f1", &["0/1", "0/0", "0/1", "0/1"]),
            family(&sites[1], "f2", &["0/0", "0/1", "0/0", "0/1"]),
            family(&sites[2], "f2", &["0/1", "0/0", "1/1", "0/0"]),
            family(&sites[3], "f1", &["0/0", "0/1", "0/1", "0/0"]),
        ];
        (sites, families)
    }

    /// The sample dataset plus a site spanning chr1_0/chr1_1 (95-105) seen in
    /// both families and a site past the end of chr1 (1050)
    pub(crate) fn boundary_dataset() -> (Vec<SummaryVariant>, Vec<FamilyVariant>) {
        let (mut sites, mut families) = sample_dataset();
        sites.push(site("chr1", 95, Some(105), 5));
        sites.push(site("chr1", 1050, None, 6));
        families.push(family(&sites[4], "f1", &["0/1", "0/0", "0/1", "0/0"]));
        families.push(family(&sites[4], "f2", &["0/0", "0/1", "0/0", "0/1"]));
        families.push(family(&sites[5], "f2", &["0/1", "0/0", "0/1", "0/1"]));
        (sites, families)
    }

    #[test]
    fn test_group_sites_annotates_statistics() {
        let (summary, families) = sample_dataset();
        let sites = group_sites(summary, families);
        assert_eq!(sites.len(), 4);
        let allele = &sites[1].summary.alleles()[1];
        assert_eq!(allele.get_attribute("family_variants_count"), Some(&Value::from(2u64)));
        assert_eq!(sites[0].summary.alleles()[1].get_attribute("seen_as_denovo"), Some(&Value::from(true)));
    }

    #[test]
    fn test_group_sites_adds_family_only_sites() {
        let (summary, families) = sample_dataset();
        let sites = group_sites(summary[..1].to_vec(), families);
        assert_eq!(sites.len(), 4);
    }

    #[test]
    fn test_site_rows_columns() {
        let layout = layout();
        let (summary, families) = sample_dataset();
        let sites = group_sites(summary, families);
        let (summary_rows, family_rows) = site_rows(&layout, &sites[0], &["cadd_raw".to_string()]).unwrap();

        // reference and alternative allele
        assert_eq!(summary_rows.len(), 2);
        let alt = &summary_rows[1];
        assert_eq!(alt.partition_value("region_bin"), Some("chr1_0"));
        assert_eq!(alt.partition_value("frequency_bin"), Some("1"));
        assert_eq!(alt.partition_value("coding_bin"), Some("1"));
        assert_eq!(alt.scores, vec![Some(2.5)]);
        assert_eq!(alt.end_position, Some(13));

        assert_eq!(family_rows.len(), 1);
        let row = &family_rows[0];
        assert_eq!(row.allele_in_roles, Role::Prb.as_bitmask());
        assert_eq!(row.inheritance_in_members & Inheritance::Denovo.as_bitmask(), Inheritance::Denovo.as_bitmask());
        assert!(row.partition_value("family_bin").is_some());

        let decoded = decode_summary(&row.summary_variant_data).unwrap();
        let fv = decode_family(decoded, &quad_families(), &row.family_variant_data).unwrap();
        assert_eq!(fv.fvuid(), sites[0].families[0].fvuid());
    }

    #[test]
    fn test_spanning_site_written_to_each_bin() {
        let layout = layout();
        let spanning = site("chr1", 95, Some(105), 9);
        let sites = group_sites(vec![spanning], Vec::new());
        let (summary_rows, _) = site_rows(&layout, &sites[0], &[]).unwrap();
        let buckets: Vec<usize> = summary_rows.iter().map(|row| row.bucket_index).collect();
        assert_eq!(buckets, vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_dataset_meta_checks() {
        let layout = layout();
        let meta = DatasetMeta::new(&layout, &["cadd_raw".to_string()]);
        assert!(meta.check_layout(&layout).is_ok());
        assert!(meta.check_score_columns(&["cadd_raw".to_string()]).is_ok());
        assert!(matches!(
            meta.check_score_columns(&["phylop".to_string()]),
            Err(StorageError::SchemaMismatch(_))
        ));

        let other = PartitionLayout::new(
            PartitionDescriptor::from_toml("[region_bin]\nchromosomes = [\"chr1\"]\nregion_length = 50\n").unwrap(),
            &contigs(),
            &ChromosomePrefix::None,
        )
        .unwrap();
        assert!(matches!(meta.check_layout(&other), Err(StorageError::SchemaMismatch(_))));
    }

    #[test]
    fn test_registry() {
        let mut registry = StorageRegistry::with_defaults();
        assert_eq!(registry.storage_types(), vec!["inmemory", "parquet", "sqlite"]);
        // re-registering replaces
        registry.register(Box::new(inmemory::InMemoryFactory));
        assert_eq!(registry.storage_types().len(), 3);

        let config = StorageConfig::new("x", "duckdb", "/tmp/none");
        assert!(matches!(registry.open(&config, &context()), Err(StorageError::UnknownStorageType(_))));
    }
}
