// ==============================================================================
// storage/inmemory.rs - In-Memory Variants Backend
// ==============================================================================
// Description: Holds decoded variants in memory and filters them in process;
//              site statistics are computed at query time
// Author: Matt Barham
// Created: 2025-11-23
// Modified: 2025-11-29
// Version: 1.0.0
// ==============================================================================
// File format: JSON lines, one site per line
//   {"summary": [<allele records>], "families": [{"family_id": .., "genotype": ..}]}
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::{group_sites, FamilyHit, GenomicContext, StorageError, StorageFactory, SummaryHit, VariantsBackend};
use crate::config::StorageConfig;
use crate::filters::CompiledFilters;
use crate::partition::{PartitionDescriptor, PartitionLayout};
use crate::pedigree::FamiliesData;
use crate::query_runner::{QueryRunner, RunnerSink};
use crate::variants::{AlleleRecord, FamilyVariant, FamilyVariantData, SummaryVariant, SummaryVariantFactory};

#[derive(Debug, Serialize, Deserialize)]
struct SiteLine {
    summary: Vec<AlleleRecord>,
    #[serde(default)]
    families: Vec<FamilyVariantData>,
}

/// Write sites as JSON lines
pub fn save_variants(
    path: impl AsRef<Path>,
    summary_variants: &[SummaryVariant],
    family_variants: &[FamilyVariant],
) -> Result<(), StorageError> {
    let mut by_site: BTreeMap<String, Vec<FamilyVariantData>> = BTreeMap::new();
    for fv in family_variants {
        by_site.entry(fv.svuid()).or_default().push(fv.to_data());
    }
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    for sv in summary_variants {
        let line = SiteLine {
            summary: sv.to_records(),
            families: by_site.remove(&sv.svuid()).unwrap_or_default(),
        };
        serde_json::to_writer(&mut writer, &line)?;
        writer.write_all(b"\n")?;
    }
    if !by_site.is_empty() {
        warn!("{} sites with family variants but no summary variant were not saved", by_site.len());
    }
    writer.flush()?;
    Ok(())
}

/// Variants held in memory
pub struct InMemoryVariants {
    id: String,
    layout: PartitionLayout,
    summary_variants: Arc<Vec<SummaryVariant>>,
    family_variants: Arc<Vec<FamilyVariant>>,
}

impl InMemoryVariants {
    pub fn new(
        id: &str,
        context: &GenomicContext,
        summary_variants: Vec<SummaryVariant>,
        family_variants: Vec<FamilyVariant>,
    ) -> Result<Self, StorageError> {
        let layout = PartitionLayout::new(PartitionDescriptor::default(), &context.contigs, &context.prefix)?;
        Ok(Self {
            id: id.to_string(),
            layout,
            summary_variants: Arc::new(summary_variants),
            family_variants: Arc::new(family_variants),
        })
    }

    /// Load a JSON-lines file; lines that fail to decode are skipped
    pub fn load(id: &str, path: impl AsRef<Path>, context: &GenomicContext) -> Result<Self, StorageError> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let mut summary_variants = Vec::new();
        let mut family_variants = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match decode_line(&line, &context.families) {
                Ok((summary, families)) => {
                    summary_variants.push(summary);
                    family_variants.extend(families);
                }
                Err(e) => warn!("Skipping line {} of {:?}: {}", idx + 1, path.as_ref(), e),
            }
        }
        info!(
            "Loaded {} summary and {} family variants into '{}'",
            summary_variants.len(),
            family_variants.len(),
            id
        );
        Self::new(id, context, summary_variants, family_variants)
    }

    fn chromosomes(&self, filters: &CompiledFilters) -> Vec<String> {
        let mut chromosomes: Vec<String> = Vec::new();
        for sv in self.summary_variants.iter() {
            if !chromosomes.iter().any(|chrom| chrom == sv.chromosome()) {
                chromosomes.push(sv.chromosome().to_string());
            }
        }
        for fv in self.family_variants.iter() {
            if !chromosomes.iter().any(|chrom| chrom == fv.chromosome()) {
                chromosomes.push(fv.chromosome().to_string());
            }
        }
        if let Some(regions) = &filters.query().regions {
            chromosomes.retain(|chrom| regions.iter().any(|region| &region.chrom == chrom));
        }
        chromosomes
    }
}

fn decode_line(line: &str, families: &Arc<FamiliesData>) -> Result<(SummaryVariant, Vec<FamilyVariant>), StorageError> {
    let site: SiteLine = serde_json::from_str(line)?;
    let summary = SummaryVariantFactory::from_records(&site.summary)?;
    let mut family_variants = Vec::with_capacity(site.families.len());
    for data in site.families {
        match FamilyVariant::from_data(summary.clone(), families.clone(), data) {
            Ok(fv) => family_variants.push(fv),
            Err(e) => warn!("Skipping family variant of {}: {}", summary.svuid(), e),
        }
    }
    Ok((summary, family_variants))
}

impl VariantsBackend for InMemoryVariants {
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
            .chromosomes(filters)
            .into_iter()
            .map(|chromosome| {
                Box::new(InMemoryFamilyRunner {
                    name: format!("{}:{}", self.id, chromosome),
                    source: source.clone(),
                    chromosome,
                    variants: self.family_variants.clone(),
                    filters: filters.clone(),
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
            .chromosomes(filters)
            .into_iter()
            .map(|chromosome| {
                Box::new(InMemorySummaryRunner {
                    name: format!("{}:{}", self.id, chromosome),
                    source: source.clone(),
                    chromosome,
                    summary_variants: self.summary_variants.clone(),
                    family_variants: self.family_variants.clone(),
                    filters: filters.clone(),
                }) as Box<dyn QueryRunner<SummaryHit>>
            })
            .collect())
    }
}

struct InMemoryFamilyRunner {
    name: String,
    source: Arc<str>,
    chromosome: String,
    variants: Arc<Vec<FamilyVariant>>,
    filters: Arc<CompiledFilters>,
}

impl QueryRunner<FamilyHit> for InMemoryFamilyRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, sink: &RunnerSink<FamilyHit>) -> Result<(), StorageError> {
        for fv in self.variants.iter().filter(|fv| fv.chromosome() == self.chromosome) {
            if let Some(variant) = self.filters.filter_family_variant(fv.clone()) {
                if !sink.send(FamilyHit { source: self.source.clone(), variant }) {
                    break;
                }
            }
        }
        Ok(())
    }
}

struct InMemorySummaryRunner {
    name: String,
    source: Arc<str>,
    chromosome: String,
    summary_variants: Arc<Vec<SummaryVariant>>,
    family_variants: Arc<Vec<FamilyVariant>>,
    filters: Arc<CompiledFilters>,
}

impl QueryRunner<SummaryHit> for InMemorySummaryRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, sink: &RunnerSink<SummaryHit>) -> Result<(), StorageError> {
        let on_chromosome = |chrom: &str| chrom == self.chromosome;
        let summary: Vec<SummaryVariant> = self
            .summary_variants
            .iter()
            .filter(|sv| on_chromosome(sv.chromosome()))
            .cloned()
            .collect();
        let families: Vec<FamilyVariant> = self
            .family_variants
            .iter()
            .filter(|fv| on_chromosome(fv.chromosome()))
            .cloned()
            .collect();

        for site in group_sites(summary, families) {
            if let Some(variant) = self.filters.filter_summary_variant(site.summary) {
                if !sink.send(SummaryHit { source: self.source.clone(), variant }) {
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Factory for `inmemory` storages
pub struct InMemoryFactory;

impl StorageFactory for InMemoryFactory {
    fn storage_type(&self) -> &'static str {
        "inmemory"
    }

    fn open(
        &self,
        config: &StorageConfig,
        context: &GenomicContext,
    ) -> Result<Arc<dyn VariantsBackend>, StorageError> {
        Ok(Arc::new(InMemoryVariants::load(&config.id, &config.path, context)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Region, VariantQuery};
    use crate::query_runner::QueryExecutor;
    use crate::storage::tests::{context, sample_dataset};

    fn compile(query: VariantQuery) -> Arc<CompiledFilters> {
        Arc::new(CompiledFilters::compile(&query).unwrap())
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variants.jsonl");
        let (summary, families) = sample_dataset();
        save_variants(&path, &summary, &families).unwrap();

        let backend = InMemoryVariants::load("mem", &path, &context()).unwrap();
        assert_eq!(backend.summary_variants.len(), 4);
        assert_eq!(backend.family_variants.len(), 5);
        assert_eq!(backend.family_variants[0].fvuid(), families[0].fvuid());
    }

    #[test]
    fn test_bad_lines_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variants.jsonl");
        let (summary, families) = sample_dataset();
        save_variants(&path, &summary, &families).unwrap();
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{not json}\n");
        std::fs::write(&path, content).unwrap();

        let backend = InMemoryVariants::load("mem", &path, &context()).unwrap();
        assert_eq!(backend.summary_variants.len(), 4);
    }

    #[test]
    fn test_runners_per_chromosome() {
        let (summary, families) = sample_dataset();
        let backend = InMemoryVariants::new("mem", &context(), summary, families).unwrap();
        let executor = QueryExecutor::new(2).unwrap();

        let filters = compile(VariantQuery::new());
        let runners = backend.family_runners(&filters).unwrap();
        assert_eq!(runners.len(), 2);
        assert_eq!(executor.execute(runners).count(), 5);

        let filters = compile(VariantQuery::new().with_regions(vec![Region::new("chr1", 10, 30)]));
        let runners = backend.summary_runners(&filters).unwrap();
        assert_eq!(runners.len(), 1);
        let hits: Vec<SummaryHit> = executor.execute(runners).collect();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|hit| &*hit.source == "mem"));
    }
}
