// ==============================================================================
// variants/mod.rs - Variant Model
// ==============================================================================
// Description: Summary (site-level) and family (genotype-level) variants
// Author: Matt Barham
// Created: 2025-11-16
// Modified: 2025-11-26
// Version: 1.0.0
// ==============================================================================

pub mod family;
pub mod summary;

pub use family::{annotate_family_statistics, FamilyAllele, FamilyVariant, FamilyVariantData};
pub use summary::{
    AlleleRecord, AltAlleleItems, SummaryAllele, SummaryVariant, SummaryVariantFactory, VariantDetail,
    VariantError,
};
