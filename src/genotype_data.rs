// ==============================================================================
// genotype_data.rs - Genotype Data Queries
// ==============================================================================
// Description: Queries family and summary variants across every backend of
//              a dataset and merges their results
// Author: Matt Barham
// Created: 2025-11-27
// Modified: 2025-11-30
// Version: 1.0.0
// ==============================================================================
// Family variants stream: svuid allow-list, per-backend fvuid dedup (a span
// written to two region bins is yielded once), cross-backend fvuid dedup when
// unique_family_variants is set, limit, early close.
// Summary variants are merged by svuid; the same site seen twice from one
// backend (a span written to two region bins) counts once, statistics from
// different backends are summed.
// ==============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use crate::attributes::AttributeQueryError;
use crate::config::{ConfigError, EngineConfig, DEFAULT_MAX_VARIANTS_COUNT};
use crate::filters::CompiledFilters;
use crate::models::VariantQuery;
use crate::parsers::contigs::{ContigLengthsParser, ContigParseError};
use crate::parsers::pedigree::{PedigreeParseError, PedigreeParser};
use crate::pedigree::FamiliesData;
use crate::query_runner::{QueryExecutor, QueryResult, QueryRunner};
use crate::storage::{FamilyHit, GenomicContext, StorageError, StorageRegistry, SummaryHit, VariantsBackend};
use crate::variants::{FamilyVariant, SummaryVariant};

#[derive(Error, Debug)]
pub enum GenotypeDataError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Contig lengths error: {0}")]
    ContigError(#[from] ContigParseError),

    #[error("Pedigree error: {0}")]
    PedigreeError(#[from] PedigreeParseError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Query error: {0}")]
    QueryError(#[from] AttributeQueryError),

    #[error("Executor error: {0}")]
    ExecutorError(#[from] std::io::Error),
}

/// The backends of one dataset and the pool their runners share
pub struct GenotypeData {
    context: GenomicContext,
    backends: Vec<Arc<dyn VariantsBackend>>,
    executor: QueryExecutor,
    max_variants_count: usize,
}

impl GenotypeData {
    pub fn new(
        context: GenomicContext,
        backends: Vec<Arc<dyn VariantsBackend>>,
        workers: usize,
    ) -> Result<Self, GenotypeDataError> {
        Ok(Self {
            context,
            backends,
            executor: QueryExecutor::new(workers)?,
            max_variants_count: DEFAULT_MAX_VARIANTS_COUNT,
        })
    }

    pub fn with_max_variants_count(mut self, max_variants_count: usize) -> Self {
        self.max_variants_count = max_variants_count.max(1);
        self
    }

    /// Load reference inputs and open every configured storage
    pub fn open(config: &EngineConfig, registry: &StorageRegistry) -> Result<Self, GenotypeDataError> {
        let contigs = ContigLengthsParser::parse(&config.contigs)?;
        let families = PedigreeParser::parse(&config.pedigree)?;
        info!("Loaded {} contigs and {} families", contigs.len(), families.len());

        let context = GenomicContext::new(contigs, Arc::new(families)).with_prefix(config.chromosome_prefix.clone());
        let backends = config
            .storages
            .iter()
            .map(|storage| registry.open(storage, &context))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(context, backends, config.workers)?.with_max_variants_count(config.max_variants_count))
    }

    pub fn context(&self) -> &GenomicContext {
        &self.context
    }

    pub fn families(&self) -> &Arc<FamiliesData> {
        &self.context.families
    }

    pub fn backends(&self) -> &[Arc<dyn VariantsBackend>] {
        &self.backends
    }

    fn limit(&self, query: &VariantQuery) -> usize {
        query.limit.unwrap_or(self.max_variants_count).min(self.max_variants_count)
    }

    /// Stream family variants matching `query` from every backend
    pub fn query_variants(&self, query: &VariantQuery) -> Result<FamilyVariants, GenotypeDataError> {
        let filters = Arc::new(CompiledFilters::compile(query)?);
        let mut runners: Vec<Box<dyn QueryRunner<FamilyHit>>> = Vec::new();
        for backend in &self.backends {
            runners.extend(backend.family_runners(&filters)?);
        }
        debug!("query_variants over {} backends with {} runners", self.backends.len(), runners.len());

        Ok(FamilyVariants {
            result: self.executor.execute(runners),
            filters,
            seen_in_backend: HashSet::new(),
            seen: HashSet::new(),
            limit: self.limit(query),
            yielded: 0,
            started: Instant::now(),
            closed: false,
        })
    }

    /// Summary variants matching `query`, merged across backends
    pub fn query_summary_variants(&self, query: &VariantQuery) -> Result<Vec<SummaryVariant>, GenotypeDataError> {
        let filters = Arc::new(CompiledFilters::compile(query)?);
        let mut runners: Vec<Box<dyn QueryRunner<SummaryHit>>> = Vec::new();
        for backend in &self.backends {
            runners.extend(backend.summary_runners(&filters)?);
        }
        let started = Instant::now();
        let mut result = self.executor.execute(runners);
        let id = result.id();
        let limit = self.limit(query);

        let mut merger = SummaryMerger::default();
        for hit in result.by_ref() {
            if !filters.allows_svuid(&hit.variant.svuid()) {
                continue;
            }
            merger.add(hit);
            if merger.len() >= limit {
                break;
            }
        }
        result.close();

        let variants = merger.into_variants();
        info!(
            "Query {} returned {} summary variants in {:.3}s",
            id,
            variants.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(variants)
    }
}

/// Merges summary hits by svuid, in first-seen order
#[derive(Default)]
struct SummaryMerger {
    seen: HashSet<(Arc<str>, String)>,
    index: HashMap<String, usize>,
    variants: Vec<SummaryVariant>,
}

impl SummaryMerger {
    fn add(&mut self, hit: SummaryHit) {
        let svuid = hit.variant.svuid();
        if !self.seen.insert((hit.source, svuid.clone())) {
            return;
        }
        match self.index.get(&svuid) {
            Some(&position) => self.variants[position].merge_statistics(&hit.variant),
            None => {
                self.index.insert(svuid, self.variants.len());
                self.variants.push(hit.variant);
            }
        }
    }

    fn len(&self) -> usize {
        self.variants.len()
    }

    fn into_variants(self) -> Vec<SummaryVariant> {
        self.variants
    }
}

/// Streaming family variants of one query
///
/// Not restartable; dropping it closes every runner.
pub struct FamilyVariants {
    result: QueryResult<FamilyHit>,
    filters: Arc<CompiledFilters>,
    seen_in_backend: HashSet<(Arc<str>, String)>,
    seen: HashSet<String>,
    limit: usize,
    yielded: usize,
    started: Instant,
    closed: bool,
}

impl FamilyVariants {
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.result.close();
        info!(
            "Query {} yielded {} family variants in {:.3}s",
            self.result.id(),
            self.yielded,
            self.started.elapsed().as_secs_f64()
        );
    }
}

impl Iterator for FamilyVariants {
    type Item = FamilyVariant;

    fn next(&mut self) -> Option<FamilyVariant> {
        if self.yielded >= self.limit {
            self.close();
            return None;
        }
        loop {
            let Some(FamilyHit { source, variant }) = self.result.next() else {
                self.close();
                return None;
            };
            if !self.filters.allows_svuid(&variant.svuid()) {
                continue;
            }
            let fvuid = variant.fvuid();
            if !self.seen_in_backend.insert((source, fvuid.clone())) {
                continue;
            }
            if self.filters.query().unique_family_variants && !self.seen.insert(fvuid) {
                continue;
            }
            self.yielded += 1;
            return Some(variant);
        }
    }
}

impl Drop for FamilyVariants {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::models::Region;
    use crate::storage::inmemory::{save_variants, InMemoryVariants};
    use crate::storage::parquet::{ParquetDatasetWriter, ParquetVariants};
    use crate::storage::sqlite::{SqliteDatasetWriter, SqliteVariants};
    use crate::storage::tests::{boundary_dataset, context, descriptor, sample_dataset};
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::Path;

    /// One dataset per backend kind, each with the same sample variants
    fn backends(dir: &Path) -> Vec<(&'static str, Arc<dyn VariantsBackend>)> {
        backends_with(dir, sample_dataset())
    }

    fn backends_with(
        dir: &Path,
        (summary, families): (Vec<SummaryVariant>, Vec<FamilyVariant>),
    ) -> Vec<(&'static str, Arc<dyn VariantsBackend>)> {
        let memory = InMemoryVariants::new("memory", &context(), summary.clone(), families.clone()).unwrap();

        let parquet_root = dir.join("parquet");
        ParquetDatasetWriter::new(&parquet_root, descriptor(), &context())
            .unwrap()
            .write(summary.clone(), families.clone())
            .unwrap();
        let parquet = ParquetVariants::open("parquet", &parquet_root, &context()).unwrap();

        let sqlite_path = dir.join("variants.db");
        SqliteDatasetWriter::new(&sqlite_path, descriptor(), &context())
            .unwrap()
            .write(summary, families)
            .unwrap();
        let sqlite = SqliteVariants::open(&StorageConfig::new("sqlite", "sqlite", &sqlite_path), &context()).unwrap();

        let memory: Arc<dyn VariantsBackend> = Arc::new(memory);
        let parquet: Arc<dyn VariantsBackend> = Arc::new(parquet);
        let sqlite: Arc<dyn VariantsBackend> = Arc::new(sqlite);
        vec![("memory", memory), ("parquet", parquet), ("sqlite", sqlite)]
    }

    fn single(backend: Arc<dyn VariantsBackend>) -> GenotypeData {
        GenotypeData::new(context(), vec![backend], 2).unwrap()
    }

    fn positions(variants: impl IntoIterator<Item = FamilyVariant>) -> BTreeSet<u64> {
        variants.into_iter().map(|fv| fv.position()).collect()
    }

    fn sorted_fvuids(data: &GenotypeData, query: &VariantQuery) -> Vec<String> {
        let mut ids: Vec<String> = data.query_variants(query).unwrap().map(|fv| fv.fvuid()).collect();
        ids.sort();
        ids
    }

    fn sorted_svuids(data: &GenotypeData, query: &VariantQuery) -> Vec<String> {
        let mut ids: Vec<String> = data.query_summary_variants(query).unwrap().iter().map(|sv| sv.svuid()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_boundary_sites_agree_on_every_backend() {
        let dir = tempfile::tempdir().unwrap();
        let (summary, families) = boundary_dataset();
        let mut all_fvuids: Vec<String> = families.iter().map(|fv| fv.fvuid()).collect();
        all_fvuids.sort();
        let mut all_svuids: Vec<String> = summary.iter().map(|sv| sv.svuid()).collect();
        all_svuids.sort();
        let mut spanning: Vec<String> =
            families.iter().filter(|fv| fv.position() == 95).map(|fv| fv.fvuid()).collect();
        spanning.sort();
        let past_end: Vec<String> = families.iter().filter(|fv| fv.position() == 1050).map(|fv| fv.fvuid()).collect();

        for (name, backend) in backends_with(dir.path(), boundary_dataset()) {
            let data = single(backend);
            for unique in [true, false] {
                let query = VariantQuery::new().with_unique_family_variants(unique);
                assert_eq!(sorted_fvuids(&data, &query), all_fvuids, "{} unique={}", name, unique);
                assert_eq!(sorted_svuids(&data, &query), all_svuids, "{} unique={}", name, unique);

                // both region bins of the span are scanned, one copy survives
                let query = query.with_regions(vec![Region::new("chr1", 95, 105)]);
                assert_eq!(sorted_fvuids(&data, &query), spanning, "{} unique={}", name, unique);
                assert_eq!(sorted_svuids(&data, &query).len(), 1, "{} unique={}", name, unique);

                // stored in the last bin of chr1
                let query = VariantQuery::new()
                    .with_unique_family_variants(unique)
                    .with_regions(vec![Region::new("chr1", 1040, 1060)]);
                assert_eq!(sorted_fvuids(&data, &query), past_end, "{} unique={}", name, unique);
                let found = data.query_summary_variants(&query).unwrap();
                assert_eq!(found.len(), 1, "{} unique={}", name, unique);
                assert_eq!(found[0].position(), 1050, "{} unique={}", name, unique);
            }
        }
    }

    #[test]
    fn test_unique_family_variants_across_backends() {
        let dir = tempfile::tempdir().unwrap();
        let all: Vec<Arc<dyn VariantsBackend>> =
            backends_with(dir.path(), boundary_dataset()).into_iter().map(|(_, b)| b).collect();
        let data = GenotypeData::new(context(), all, 4).unwrap();
        let (_, families) = boundary_dataset();

        let unique = sorted_fvuids(&data, &VariantQuery::new());
        assert_eq!(unique.len(), families.len());

        // one copy per backend, never one per region bin
        let repeated = sorted_fvuids(&data, &VariantQuery::new().with_unique_family_variants(false));
        assert_eq!(repeated.len(), 3 * families.len());
        for fvuid in &unique {
            assert_eq!(repeated.iter().filter(|id| *id == fvuid).count(), 3, "{}", fvuid);
        }
    }

    #[test]
    fn test_region_queries_on_every_backend() {
        let dir = tempfile::tempdir().unwrap();
        for (name, backend) in backends(dir.path()) {
            let data = single(backend);

            let query = VariantQuery::new().with_regions(vec![Region::new("chr1", 10, 30)]);
            let summary: BTreeSet<u64> =
                data.query_summary_variants(&query).unwrap().iter().map(|sv| sv.position()).collect();
            assert_eq!(summary, BTreeSet::from([11, 30]), "{}", name);
            assert_eq!(positions(data.query_variants(&query).unwrap()), BTreeSet::from([11, 30]), "{}", name);

            let query = VariantQuery::new().with_regions(vec![Region::new("chr1", 49, 51)]);
            let summary = data.query_summary_variants(&query).unwrap();
            assert_eq!(summary.len(), 1, "{}", name);
            assert_eq!(summary[0].position(), 50, "{}", name);
        }
    }

    #[test]
    fn test_denovo_in_proband_on_every_backend() {
        let dir = tempfile::tempdir().unwrap();
        for (name, backend) in backends(dir.path()) {
            let data = single(backend);

            let query = VariantQuery::new().with_inheritance("denovo").with_roles("prb");
            let found: Vec<FamilyVariant> = data.query_variants(&query).unwrap().collect();
            assert_eq!(found.len(), 1, "{}", name);
            assert_eq!(found[0].family_id(), "f1");
            assert_eq!(found[0].position(), 11);

            let query = VariantQuery::new().with_inheritance("denovo").with_roles("sib");
            assert_eq!(data.query_variants(&query).unwrap().count(), 0, "{}", name);
        }
    }

    #[test]
    fn test_repeated_queries_return_same_identities() {
        let dir = tempfile::tempdir().unwrap();
        let all: Vec<Arc<dyn VariantsBackend>> = backends(dir.path()).into_iter().map(|(_, b)| b).collect();
        let data = GenotypeData::new(context(), all, 4).unwrap();

        let query = VariantQuery::new();
        let fvuids = || {
            let mut ids: Vec<String> = data.query_variants(&query).unwrap().map(|fv| fv.fvuid()).collect();
            ids.sort();
            ids
        };
        let first = fvuids();
        // fvuid dedup across three copies of the same data
        assert_eq!(first.len(), 5);
        assert_eq!(first, fvuids());

        let svuids = || {
            let mut ids: Vec<String> =
                data.query_summary_variants(&query).unwrap().iter().map(|sv| sv.svuid()).collect();
            ids.sort();
            ids
        };
        assert_eq!(svuids().len(), 4);
        assert_eq!(svuids(), svuids());
    }

    #[test]
    fn test_summary_statistics_summed_across_backends() {
        let dir = tempfile::tempdir().unwrap();
        let all: Vec<Arc<dyn VariantsBackend>> =
            backends(dir.path()).into_iter().skip(1).map(|(_, b)| b).collect();
        let data = GenotypeData::new(context(), all, 2).unwrap();

        let query = VariantQuery::new().with_regions(vec![Region::new("chr1", 30, 30)]);
        let variants = data.query_summary_variants(&query).unwrap();
        assert_eq!(variants.len(), 1);
        // two families per backend, two backends
        let count = variants[0].alleles()[1].get_attribute("family_variants_count").and_then(|v| v.as_u64());
        assert_eq!(count, Some(4));
    }

    #[test]
    fn test_limit_and_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        let (_, backend) = backends(dir.path()).remove(1);
        let data = single(backend).with_max_variants_count(2);

        assert_eq!(data.query_variants(&VariantQuery::new()).unwrap().count(), 2);
        assert_eq!(data.query_variants(&VariantQuery::new().with_limit(1)).unwrap().count(), 1);
        assert_eq!(data.query_summary_variants(&VariantQuery::new()).unwrap().len(), 2);

        let (summary, _) = sample_dataset();
        let query = VariantQuery::new().with_summary_variant_ids([summary[1].svuid()]);
        let found: Vec<FamilyVariant> = data.query_variants(&query).unwrap().collect();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|fv| fv.svuid() == summary[1].svuid()));
    }

    #[test]
    fn test_bad_query_fails_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let (_, backend) = backends(dir.path()).remove(0);
        let data = single(backend);
        let query = VariantQuery::new().with_roles("prb and wizard");
        assert!(matches!(data.query_variants(&query), Err(GenotypeDataError::QueryError(_))));
    }

    #[test]
    fn test_open_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let (summary, families) = sample_dataset();
        save_variants(dir.path().join("variants.jsonl"), &summary, &families).unwrap();
        fs::write(dir.path().join("contigs.tsv"), "chr1\t1000\nchr2\t500\nchrX\t300\n").unwrap();
        let mut ped = String::from("familyId\tpersonId\tdadId\tmomId\tsex\tstatus\trole\n");
        for family in ["f1", "f2"] {
            ped.push_str(&format!("{}\tmom1\t0\t0\tF\t1\tmom\n", family));
            ped.push_str(&format!("{}\tdad1\t0\t0\tM\t1\tdad\n", family));
            ped.push_str(&format!("{}\tch1\tdad1\tmom1\tM\t2\tprb\n", family));
            ped.push_str(&format!("{}\tch2\tdad1\tmom1\tF\t1\tsib\n", family));
        }
        fs::write(dir.path().join("families.ped"), ped).unwrap();
        let config_path = dir.path().join("engine.toml");
        fs::write(
            &config_path,
            "contigs = \"contigs.tsv\"\npedigree = \"families.ped\"\nmax_variants_count = 3\n\n\
             [[storages]]\nid = \"memory\"\nstorage_type = \"inmemory\"\npath = \"variants.jsonl\"\n",
        )
        .unwrap();

        let config = EngineConfig::parse(&config_path).unwrap();
        let data = GenotypeData::open(&config, &StorageRegistry::with_defaults()).unwrap();
        assert_eq!(data.families().len(), 2);
        assert_eq!(data.backends().len(), 1);
        // bounded by max_variants_count
        assert_eq!(data.query_variants(&VariantQuery::new()).unwrap().count(), 3);
    }
}
