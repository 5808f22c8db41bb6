// ==============================================================================
// main.rs - Variant Store Entry Point
// ==============================================================================
// Description: Command line interface: partition bins, family and summary
//              variant queries, dataset reannotation
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2025-11-30
// Version: 2.0.0
// ==============================================================================

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use variant_store::annotation::{transform_dataset, AnnotationPipeline, PositionScoreAnnotator, PositionScoreResource};
use variant_store::config::EngineConfig;
use variant_store::genotype_data::GenotypeData;
use variant_store::models::{Region, VariantQuery};
use variant_store::parsers::{ContigLengthsParser, PedigreeParser};
use variant_store::partition::{ChromosomePrefix, PartitionDescriptor, PartitionLayout};
use variant_store::storage::{GenomicContext, StorageRegistry};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List region bins of a partition description
    Bins {
        /// Partition description TOML
        #[arg(short, long)]
        descriptor: PathBuf,

        /// Contig lengths TSV
        #[arg(short, long, env = "VARIANT_STORE_CONTIGS")]
        contigs: PathBuf,

        /// Only the bins overlapping this region
        #[arg(short, long)]
        region: Option<Region>,
    },

    /// Query family variants
    Query(QueryArgs),

    /// Query summary variants
    Summary(QueryArgs),

    /// Rewrite a Parquet dataset with position scores
    Transform {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Position score TSV
        #[arg(short, long)]
        scores: PathBuf,

        /// Score to add, as `score` or `score:attribute`
        #[arg(long = "score", required = true)]
        score_names: Vec<String>,

        /// Attribute to remove
        #[arg(long = "remove")]
        removed: Vec<String>,

        #[arg(long, env = "VARIANT_STORE_CONTIGS")]
        contigs: PathBuf,

        #[arg(long, env = "VARIANT_STORE_PEDIGREE")]
        pedigree: PathBuf,
    },
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Engine configuration TOML
    #[arg(short, long, env = "VARIANT_STORE_CONFIG")]
    config: PathBuf,

    /// Full filter set as JSON; flags below are applied on top
    #[arg(long)]
    query_json: Option<PathBuf>,

    #[arg(long = "region")]
    regions: Vec<Region>,

    #[arg(long = "gene")]
    genes: Vec<String>,

    #[arg(long = "effect-type")]
    effect_types: Vec<String>,

    #[arg(long = "family-id")]
    family_ids: Vec<String>,

    #[arg(long = "person-id")]
    person_ids: Vec<String>,

    /// Inheritance query, e.g. "denovo or mendelian"
    #[arg(long)]
    inheritance: Option<String>,

    /// Role query, e.g. "prb and not sib"
    #[arg(long)]
    roles: Option<String>,

    #[arg(long)]
    sexes: Option<String>,

    #[arg(long)]
    affected_statuses: Option<String>,

    #[arg(long)]
    variant_type: Option<String>,

    #[arg(long)]
    ultra_rare: bool,

    #[arg(long)]
    return_reference: bool,

    #[arg(long)]
    limit: Option<usize>,
}

impl QueryArgs {
    fn to_query(&self) -> Result<VariantQuery> {
        let mut query = match &self.query_json {
            Some(path) => {
                let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
                serde_json::from_str(&content).with_context(|| format!("Invalid query JSON in {:?}", path))?
            }
            None => VariantQuery::new(),
        };
        if !self.regions.is_empty() {
            query = query.with_regions(self.regions.clone());
        }
        if !self.genes.is_empty() {
            query = query.with_genes(self.genes.clone());
        }
        if !self.effect_types.is_empty() {
            query = query.with_effect_types(self.effect_types.clone());
        }
        if !self.family_ids.is_empty() {
            query = query.with_family_ids(self.family_ids.clone());
        }
        if !self.person_ids.is_empty() {
            query = query.with_person_ids(self.person_ids.clone());
        }
        if let Some(inheritance) = &self.inheritance {
            query = query.with_inheritance(inheritance);
        }
        if let Some(roles) = &self.roles {
            query = query.with_roles(roles);
        }
        if let Some(sexes) = &self.sexes {
            query = query.with_sexes(sexes);
        }
        if let Some(statuses) = &self.affected_statuses {
            query = query.with_affected_statuses(statuses);
        }
        if let Some(variant_type) = &self.variant_type {
            query = query.with_variant_type(variant_type);
        }
        if self.ultra_rare {
            query = query.with_ultra_rare(true);
        }
        if self.return_reference {
            query = query.with_return_reference(true);
        }
        if let Some(limit) = self.limit {
            query = query.with_limit(limit);
        }
        Ok(query)
    }

    fn open(&self) -> Result<GenotypeData> {
        let config = EngineConfig::parse(&self.config)
            .with_context(|| format!("Failed to load engine config {:?}", self.config))?;
        Ok(GenotypeData::open(&config, &StorageRegistry::with_defaults())?)
    }
}

fn run_bins(descriptor: PathBuf, contigs: PathBuf, region: Option<Region>) -> Result<()> {
    let descriptor = PartitionDescriptor::parse(&descriptor)?;
    let contigs = ContigLengthsParser::parse(&contigs)?;
    let layout = PartitionLayout::new(descriptor, &contigs, &ChromosomePrefix::None)?;
    if !layout.descriptor().has_region_bins() {
        bail!("Partition description has no [region_bin] section");
    }

    match region {
        Some(region) => {
            for (bin, sub_region) in layout.region_to_region_bins(&region) {
                let bucket = layout.bucket_index(&bin).map_or("-".to_string(), |b| b.to_string());
                println!("{}\t{}\t{}", bucket, bin, sub_region);
            }
        }
        None => {
            for (bucket, (bin, regions)) in layout.make_all_region_bins().into_iter().enumerate() {
                println!("{}\t{}\t{}", bucket, bin, regions.join(","));
            }
        }
    }
    Ok(())
}

fn run_query(args: &QueryArgs) -> Result<()> {
    let query = args.to_query()?;
    let data = args.open()?;
    let mut count = 0;
    for fv in data.query_variants(&query)? {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            fv.family_id(),
            fv.location(),
            fv.summary().reference(),
            fv.summary().alternative(),
            fv.variant_in_members().join(",")
        );
        count += 1;
    }
    info!("{} family variants", count);
    Ok(())
}

fn run_summary(args: &QueryArgs) -> Result<()> {
    let query = args.to_query()?;
    let data = args.open()?;
    let variants = data.query_summary_variants(&query)?;
    for sv in &variants {
        let frequencies: Vec<String> = sv
            .frequencies()
            .iter()
            .map(|f| f.map_or(".".to_string(), |f| f.to_string()))
            .collect();
        println!("{}\t{}\t{}\t{}", sv.location(), sv.reference(), sv.alternative(), frequencies.join(","));
    }
    info!("{} summary variants", variants.len());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_transform(
    input: PathBuf,
    output: PathBuf,
    scores: PathBuf,
    score_names: Vec<String>,
    removed: Vec<String>,
    contigs: PathBuf,
    pedigree: PathBuf,
) -> Result<()> {
    let contigs = ContigLengthsParser::parse(&contigs)?;
    let families = PedigreeParser::parse(&pedigree)?;
    let context = GenomicContext::new(contigs, Arc::new(families));

    let mapping: Vec<(&str, &str)> = score_names
        .iter()
        .map(|name| name.split_once(':').unwrap_or((name.as_str(), name.as_str())))
        .collect();
    let resource = PositionScoreResource::parse(&scores)?;
    let removed: Vec<&str> = removed.iter().map(String::as_str).collect();
    let pipeline = AnnotationPipeline::new()
        .with_annotator(Box::new(PositionScoreAnnotator::new(resource, &mapping)?))
        .with_removed_attributes(&removed);

    let meta = transform_dataset(&input, &output, &pipeline, &context)
        .with_context(|| format!("Failed to transform {:?}", input))?;
    info!("Wrote {:?} ({} summary rows, {} family rows)", output, meta.summary_rows, meta.family_rows);
    Ok(())
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries results
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "variant_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Bins { descriptor, contigs, region } => run_bins(descriptor, contigs, region),
        Command::Query(args) => run_query(&args),
        Command::Summary(args) => run_summary(&args),
        Command::Transform { input, output, scores, score_names, removed, contigs, pedigree } => {
            run_transform(input, output, scores, score_names, removed, contigs, pedigree)
        }
    }
}
