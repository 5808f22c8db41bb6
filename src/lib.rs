// ==============================================================================
// lib.rs - Variant Store Library
// ==============================================================================
// Description: Library interface for the genomic variant storage and query
//              engine
// Author: Matt Barham
// Created: 2025-11-03
// Modified: 2025-11-30
// Version: 2.0.0
// ==============================================================================
//! Stores summary and family variants in partitioned backends and answers
//! attribute queries over them.
//!
//! ```no_run
//! use variant_store::config::EngineConfig;
//! use variant_store::genotype_data::GenotypeData;
//! use variant_store::models::VariantQuery;
//! use variant_store::storage::StorageRegistry;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = EngineConfig::parse("engine.toml")?;
//! let data = GenotypeData::open(&config, &StorageRegistry::with_defaults())?;
//! let query = VariantQuery::new().with_inheritance("denovo").with_roles("prb");
//! for fv in data.query_variants(&query)? {
//!     println!("{} {}", fv.family_id(), fv.location());
//! }
//! # Ok(())
//! # }
//! ```

pub mod annotation;
pub mod attributes;
pub mod config;
pub mod filters;
pub mod genotype;
pub mod genotype_data;
pub mod models;
pub mod parsers;
pub mod partition;
pub mod pedigree;
pub mod query_builder;
pub mod query_runner;
pub mod sql;
pub mod storage;
pub mod variants;
