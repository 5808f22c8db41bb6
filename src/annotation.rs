// ==============================================================================
// annotation.rs - Allele Reannotation
// ==============================================================================
// Description: Annotator capability traits, a position-score annotator and
//              rewriting of a Parquet dataset with new allele attributes
// Author: Matt Barham
// Created: 2025-11-26
// Modified: 2025-11-30
// Version: 1.0.0
// ==============================================================================
// Position score TSV (with header):
//   chrom	pos_begin	pos_end	<score>...
//   chr1	1	35	0.5
// ==============================================================================

use csv::ReaderBuilder;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::storage::parquet::{ParquetDatasetWriter, ParquetVariants, META_FILE};
use crate::storage::{DatasetMeta, GenomicContext, StorageError};
use crate::variants::{SummaryAllele, SummaryVariant};

#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid score line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },

    #[error("Unknown score '{0}'")]
    UnknownScore(String),

    #[error("Resource '{0}' used before precompute")]
    NotPrecomputed(String),
}

/// A resource that must be prepared once before use
pub trait Precomputable {
    fn precompute(&mut self) -> Result<(), AnnotationError>;

    fn is_precomputed(&self) -> bool;
}

/// A resource answering queries over a genomic interval
pub trait PositionQueryable {
    /// Lines overlapping `[begin, end]`, in position order
    fn fetch_lines(&self, chrom: &str, begin: u64, end: u64) -> Result<Vec<&ScoreLine>, AnnotationError>;
}

/// A resource whose answers are kept for repeated spans
pub trait Cacheable {
    /// Compute and keep the answer for `[begin, end]` of `chrom`
    fn populate_cache(&self, chrom: &str, begin: u64, end: u64) -> Result<(), AnnotationError>;

    fn is_cached(&self, chrom: &str, begin: u64, end: u64) -> bool;

    /// Drop every kept answer
    fn clear_cache(&self);
}

/// Computes attributes of one alternative allele
pub trait AlleleAnnotator: Send + Sync {
    /// Attribute names this annotator produces
    fn attributes(&self) -> Vec<String>;

    fn annotate(&self, allele: &SummaryAllele) -> Result<BTreeMap<String, Value>, AnnotationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreLine {
    pub pos_begin: u64,
    pub pos_end: u64,
    pub values: Vec<Option<f64>>,
}

/// Per-position scores read from a TSV, indexed by chromosome
#[derive(Debug, Clone)]
pub struct PositionScoreResource {
    name: String,
    score_names: Vec<String>,
    lines: HashMap<String, Vec<ScoreLine>>,
    precomputed: bool,
}

impl PositionScoreResource {
    pub fn parse(path: impl AsRef<Path>) -> Result<Self, AnnotationError> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "position_score".to_string());
        Self::parse_reader(&name, fs::File::open(path)?)
    }

    pub fn parse_reader<R: Read>(name: &str, reader: R) -> Result<Self, AnnotationError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .comment(Some(b'#'))
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        if headers.len() < 4 {
            return Err(AnnotationError::InvalidLine { line: 1, reason: "expected chrom, pos_begin, pos_end and scores".to_string() });
        }
        let score_names: Vec<String> = headers.iter().skip(3).map(str::to_string).collect();

        let mut lines: HashMap<String, Vec<ScoreLine>> = HashMap::new();
        for (idx, result) in reader.records().enumerate() {
            let record = result?;
            let line = idx + 2;
            let position = |column: usize| {
                record
                    .get(column)
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .ok_or_else(|| AnnotationError::InvalidLine { line, reason: format!("bad position in column {}", column + 1) })
            };
            let pos_begin = position(1)?;
            let pos_end = position(2)?;
            if pos_end < pos_begin {
                return Err(AnnotationError::InvalidLine { line, reason: "pos_end before pos_begin".to_string() });
            }
            let values = (0..score_names.len())
                .map(|i| record.get(i + 3).and_then(|value| value.trim().parse::<f64>().ok()))
                .collect();
            let chrom = record.get(0).unwrap_or_default().to_string();
            lines.entry(chrom).or_default().push(ScoreLine { pos_begin, pos_end, values });
        }

        Ok(Self { name: name.to_string(), score_names, lines, precomputed: false })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn score_names(&self) -> &[String] {
        &self.score_names
    }

    pub fn score_index(&self, score: &str) -> Option<usize> {
        self.score_names.iter().position(|name| name == score)
    }
}

impl Precomputable for PositionScoreResource {
    fn precompute(&mut self) -> Result<(), AnnotationError> {
        for lines in self.lines.values_mut() {
            lines.sort_by_key(|line| (line.pos_begin, line.pos_end));
        }
        self.precomputed = true;
        debug!("Precomputed position score '{}' over {} chromosomes", self.name, self.lines.len());
        Ok(())
    }

    fn is_precomputed(&self) -> bool {
        self.precomputed
    }
}

impl PositionQueryable for PositionScoreResource {
    fn fetch_lines(&self, chrom: &str, begin: u64, end: u64) -> Result<Vec<&ScoreLine>, AnnotationError> {
        if !self.precomputed {
            return Err(AnnotationError::NotPrecomputed(self.name.clone()));
        }
        let Some(lines) = self.lines.get(chrom) else {
            return Ok(Vec::new());
        };
        Ok(lines
            .iter()
            .take_while(|line| line.pos_begin <= end)
            .filter(|line| line.pos_end >= begin)
            .collect())
    }
}

/// How scores of the positions an allele covers are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionAggregator {
    Mean,
    Max,
}

pub const DEFAULT_ANNOTATION_CACHE_SIZE: usize = 4096;

type Span = (String, u64, u64);

/// Annotates alleles with position scores over their span
pub struct PositionScoreAnnotator {
    resource: PositionScoreResource,
    scores: Vec<(usize, String)>,
    aggregator: PositionAggregator,
    cache: Mutex<HashMap<Span, BTreeMap<String, Value>>>,
    cache_size: usize,
}

impl PositionScoreAnnotator {
    /// `scores` maps resource score names to output attribute names
    pub fn new(mut resource: PositionScoreResource, scores: &[(&str, &str)]) -> Result<Self, AnnotationError> {
        if !resource.is_precomputed() {
            resource.precompute()?;
        }
        let scores = scores
            .iter()
            .map(|(score, attribute)| {
                resource
                    .score_index(score)
                    .map(|index| (index, attribute.to_string()))
                    .ok_or_else(|| AnnotationError::UnknownScore(score.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            resource,
            scores,
            aggregator: PositionAggregator::Mean,
            cache: Mutex::new(HashMap::new()),
            cache_size: DEFAULT_ANNOTATION_CACHE_SIZE,
        })
    }

    pub fn with_aggregator(mut self, aggregator: PositionAggregator) -> Self {
        self.aggregator = aggregator;
        self.clear_cache();
        self
    }

    /// Spans kept at most; 0 disables caching
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self.clear_cache();
        self
    }

    pub fn cached_spans(&self) -> usize {
        self.cache.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    fn compute(&self, chrom: &str, begin: u64, end: u64) -> Result<BTreeMap<String, Value>, AnnotationError> {
        let lines = self.resource.fetch_lines(chrom, begin, end)?;
        Ok(self
            .scores
            .iter()
            .map(|(index, attribute)| {
                let value = self.aggregate(&lines, *index, begin, end).map_or(Value::Null, Value::from);
                (attribute.clone(), value)
            })
            .collect())
    }

    fn cached(&self, span: &Span) -> Option<BTreeMap<String, Value>> {
        self.cache.lock().ok().and_then(|cache| cache.get(span).cloned())
    }

    fn store(&self, span: Span, attributes: BTreeMap<String, Value>) {
        if self.cache_size == 0 {
            return;
        }
        if let Ok(mut cache) = self.cache.lock() {
            if cache.len() >= self.cache_size {
                cache.clear();
            }
            cache.insert(span, attributes);
        }
    }

    fn aggregate(&self, lines: &[&ScoreLine], index: usize, begin: u64, end: u64) -> Option<f64> {
        let mut total = 0.0;
        let mut covered = 0u64;
        let mut max: Option<f64> = None;
        for line in lines {
            let Some(value) = line.values.get(index).copied().flatten() else {
                continue;
            };
            let (low, high) = (line.pos_begin.max(begin), line.pos_end.min(end));
            if high < low {
                continue;
            }
            let overlap = high - low + 1;
            total += value * overlap as f64;
            covered += overlap;
            max = Some(max.map_or(value, |m: f64| m.max(value)));
        }
        if covered == 0 {
            return None;
        }
        match self.aggregator {
            PositionAggregator::Mean => Some(total / covered as f64),
            PositionAggregator::Max => max,
        }
    }
}

impl AlleleAnnotator for PositionScoreAnnotator {
    fn attributes(&self) -> Vec<String> {
        self.scores.iter().map(|(_, attribute)| attribute.clone()).collect()
    }

    fn annotate(&self, allele: &SummaryAllele) -> Result<BTreeMap<String, Value>, AnnotationError> {
        // an end before the start is read as a single position
        let span: Span = (allele.chromosome.clone(), allele.position, allele.end().max(allele.position));
        if let Some(attributes) = self.cached(&span) {
            return Ok(attributes);
        }
        let attributes = self.compute(&span.0, span.1, span.2)?;
        self.store(span, attributes.clone());
        Ok(attributes)
    }
}

impl Cacheable for PositionScoreAnnotator {
    fn populate_cache(&self, chrom: &str, begin: u64, end: u64) -> Result<(), AnnotationError> {
        let end = end.max(begin);
        let attributes = self.compute(chrom, begin, end)?;
        self.store((chrom.to_string(), begin, end), attributes);
        Ok(())
    }

    fn is_cached(&self, chrom: &str, begin: u64, end: u64) -> bool {
        let span = (chrom.to_string(), begin, end.max(begin));
        self.cache.lock().map(|cache| cache.contains_key(&span)).unwrap_or(false)
    }

    fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}

/// Annotators applied in order, plus attributes to drop
#[derive(Default)]
pub struct AnnotationPipeline {
    annotators: Vec<Box<dyn AlleleAnnotator>>,
    removed: Vec<String>,
}

impl AnnotationPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_annotator(mut self, annotator: Box<dyn AlleleAnnotator>) -> Self {
        self.annotators.push(annotator);
        self
    }

    pub fn with_removed_attributes(mut self, attributes: &[&str]) -> Self {
        self.removed.extend(attributes.iter().map(|a| a.to_string()));
        self
    }

    pub fn attributes(&self) -> Vec<String> {
        self.annotators.iter().flat_map(|annotator| annotator.attributes()).collect()
    }

    /// Annotate alternative alleles; a failing annotator leaves its attributes unset
    pub fn annotate(&self, variant: &mut SummaryVariant) {
        for allele in variant.alleles_mut().iter_mut() {
            for attribute in &self.removed {
                allele.remove_attribute(attribute);
            }
            if allele.is_reference_allele() {
                continue;
            }
            for annotator in &self.annotators {
                match annotator.annotate(allele) {
                    Ok(attributes) => allele.update_attributes(attributes),
                    Err(e) => warn!("Annotation of {} failed: {}", allele.location(), e),
                }
            }
        }
    }
}

/// Rewrite a Parquet dataset through an annotation pipeline
///
/// Every site and family variant is kept. Stored score columns lose the
/// removed attributes and gain the pipeline's new ones.
pub fn transform_dataset(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    pipeline: &AnnotationPipeline,
    context: &GenomicContext,
) -> Result<DatasetMeta, AnnotationError> {
    let input = input.as_ref();
    let source = ParquetVariants::open("transform_input", input, context)?;
    let (mut summary_variants, mut family_variants) = source.load_all()?;
    info!(
        "Reannotating {} summary and {} family variants from {:?}",
        summary_variants.len(),
        family_variants.len(),
        input
    );

    let mut annotated: HashMap<String, SummaryVariant> = HashMap::new();
    for sv in &mut summary_variants {
        pipeline.annotate(sv);
        annotated.insert(sv.svuid(), sv.clone());
    }
    for fv in &mut family_variants {
        match annotated.get(&fv.svuid()) {
            Some(sv) => *fv.summary_mut() = sv.clone(),
            None => pipeline.annotate(fv.summary_mut()),
        }
    }

    let meta_path = input.join(META_FILE);
    let mut score_columns: Vec<String> = if meta_path.exists() {
        let meta: DatasetMeta = serde_json::from_str(&fs::read_to_string(&meta_path)?)?;
        meta.score_columns
    } else {
        Vec::new()
    };
    score_columns.retain(|column| !pipeline.removed.contains(column));
    for attribute in pipeline.attributes() {
        if !score_columns.contains(&attribute) {
            score_columns.push(attribute);
        }
    }
    let columns: Vec<&str> = score_columns.iter().map(String::as_str).collect();

    let writer = ParquetDatasetWriter::new(output.as_ref(), source.descriptor().clone(), context)?
        .with_score_columns(&columns);
    Ok(writer.write(summary_variants, family_variants)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::CompiledFilters;
    use crate::models::VariantQuery;
    use crate::query_runner::QueryExecutor;
    use crate::storage::tests::{context, descriptor};
    use crate::storage::{SummaryHit, VariantsBackend};
    use std::sync::Arc;

    const SCORES: &str = "chrom\tpos_begin\tpos_end\tphylop\tgerp\n\
                          chr1\t41\t100\t1.5\t\n\
                          chr1\t1\t35\t0.5\t2.0\n\
                          chr1\t36\t40\t1.0\t3.0\n";

    fn resource() -> PositionScoreResource {
        PositionScoreResource::parse_reader("scores", SCORES.as_bytes()).unwrap()
    }

    fn allele(position: u64, end: Option<u64>) -> SummaryAllele {
        let allele = SummaryAllele::new("chr1", position, "A", Some("G")).with_indices(1, 1);
        match end {
            Some(end) => allele.with_end_position(end),
            None => allele,
        }
    }

    #[test]
    fn test_fetch_requires_precompute() {
        let resource = resource();
        assert!(matches!(resource.fetch_lines("chr1", 1, 1), Err(AnnotationError::NotPrecomputed(_))));
    }

    #[test]
    fn test_fetch_overlapping_lines() {
        let mut resource = resource();
        resource.precompute().unwrap();
        let lines = resource.fetch_lines("chr1", 34, 42).unwrap();
        let begins: Vec<u64> = lines.iter().map(|line| line.pos_begin).collect();
        assert_eq!(begins, vec![1, 36, 41]);
        assert!(resource.fetch_lines("chr2", 1, 100).unwrap().is_empty());
    }

    #[test]
    fn test_position_score_mean_and_max() {
        let annotator = PositionScoreAnnotator::new(resource(), &[("phylop", "phylop"), ("gerp", "gerp_rs")]).unwrap();
        assert_eq!(annotator.attributes(), vec!["phylop", "gerp_rs"]);

        let scores = annotator.annotate(&allele(10, None)).unwrap();
        assert_eq!(scores["phylop"], Value::from(0.5));
        assert_eq!(scores["gerp_rs"], Value::from(2.0));

        // 34-35 at 0.5, 36-37 at 1.0
        let scores = annotator.annotate(&allele(34, Some(37))).unwrap();
        assert_eq!(scores["phylop"], Value::from(0.75));

        // missing gerp on the last line
        let scores = annotator.annotate(&allele(50, None)).unwrap();
        assert_eq!(scores["gerp_rs"], Value::Null);

        let annotator = PositionScoreAnnotator::new(resource(), &[("phylop", "phylop")])
            .unwrap()
            .with_aggregator(PositionAggregator::Max);
        let scores = annotator.annotate(&allele(34, Some(45))).unwrap();
        assert_eq!(scores["phylop"], Value::from(1.5));
    }

    #[test]
    fn test_annotation_cache() {
        let annotator = PositionScoreAnnotator::new(resource(), &[("phylop", "phylop")]).unwrap();
        assert!(!annotator.is_cached("chr1", 34, 37));
        let first = annotator.annotate(&allele(34, Some(37))).unwrap();
        assert!(annotator.is_cached("chr1", 34, 37));
        assert_eq!(annotator.annotate(&allele(34, Some(37))).unwrap(), first);
        assert_eq!(annotator.cached_spans(), 1);

        annotator.populate_cache("chr1", 50, 60).unwrap();
        assert!(annotator.is_cached("chr1", 50, 60));
        assert_eq!(annotator.cached_spans(), 2);
        annotator.clear_cache();
        assert_eq!(annotator.cached_spans(), 0);

        let bounded = PositionScoreAnnotator::new(resource(), &[("phylop", "phylop")]).unwrap().with_cache_size(2);
        for position in [10, 20, 30] {
            bounded.annotate(&allele(position, None)).unwrap();
        }
        assert!(bounded.cached_spans() <= 2);

        let uncached = PositionScoreAnnotator::new(resource(), &[("phylop", "phylop")]).unwrap().with_cache_size(0);
        assert_eq!(uncached.annotate(&allele(10, None)).unwrap()["phylop"], Value::from(0.5));
        assert_eq!(uncached.cached_spans(), 0);
    }

    #[test]
    fn test_end_before_start_reads_start_position() {
        let annotator = PositionScoreAnnotator::new(resource(), &[("phylop", "phylop")]).unwrap();
        let scores = annotator.annotate(&allele(40, Some(34))).unwrap();
        assert_eq!(scores["phylop"], Value::from(1.0));
        assert!(annotator.is_cached("chr1", 40, 40));
    }

    #[test]
    fn test_unknown_score_rejected() {
        assert!(matches!(
            PositionScoreAnnotator::new(resource(), &[("cadd", "cadd")]),
            Err(AnnotationError::UnknownScore(_))
        ));
    }

    fn six_sites() -> Vec<SummaryVariant> {
        (1..=6)
            .map(|i| {
                let alt = SummaryAllele::new("chr1", i * 10, "C", Some("T"))
                    .with_indices(i as i64, 1)
                    .with_attribute("af_allele_freq", 0.5)
                    .with_attribute("old_score", 7.0);
                SummaryVariant::new(vec![alt]).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_transform_dataset_reannotates_every_variant() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        let output = dir.path().join("output");
        ParquetDatasetWriter::new(&input, descriptor(), &context())
            .unwrap()
            .with_score_columns(&["old_score"])
            .write(six_sites(), Vec::new())
            .unwrap();

        let pipeline = AnnotationPipeline::new()
            .with_annotator(Box::new(PositionScoreAnnotator::new(resource(), &[("phylop", "phylop")]).unwrap()))
            .with_removed_attributes(&["old_score"]);
        let meta = transform_dataset(&input, &output, &pipeline, &context()).unwrap();
        assert_eq!(meta.score_columns, vec!["phylop"]);

        let backend = ParquetVariants::open("out", &output, &context()).unwrap();
        let filters = Arc::new(CompiledFilters::compile(&VariantQuery::new()).unwrap());
        let executor = QueryExecutor::new(2).unwrap();
        let hits: Vec<SummaryHit> = executor.execute(backend.summary_runners(&filters).unwrap()).collect();

        // 6 variants in, 6 variants out
        assert_eq!(hits.len(), 6);
        for hit in &hits {
            let alt = &hit.variant.alt_alleles()[0];
            assert!(alt.get_attribute("phylop").is_some());
            assert!(!alt.has_attribute("old_score"));
        }
    }
}
