// ==============================================================================
// variants/family.rs - Family Variants and Alleles
// ==============================================================================
// Description: Summary variant combined with one family's genotype, with
//              per-member carrier, role, sex, status and inheritance views
// Author: Matt Barham
// Created: 2025-11-17
// Modified: 2025-11-26
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::summary::{
    SummaryAllele, SummaryVariant, VariantError, FAMILY_ALLELES_COUNT, FAMILY_VARIANTS_COUNT,
    SEEN_AS_DENOVO, SEEN_IN_STATUS,
};
use crate::attributes::{BitmaskEnum, BitmaskEnumTranslator, Inheritance, Role, Sex, Status, Zygosity};
use crate::genotype::Genotype;
use crate::pedigree::{FamiliesData, FamilyView, Person};

/// Serialized per-family part of a family variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyVariantData {
    pub family_id: String,
    pub genotype: Genotype,
}

/// A summary variant as observed in one family
#[derive(Debug, Clone)]
pub struct FamilyVariant {
    summary: SummaryVariant,
    families: Arc<FamiliesData>,
    family_position: usize,
    genotype: Genotype,
    allele_indices: Vec<usize>,
    inheritance: BTreeMap<usize, Vec<Inheritance>>,
    matched_alleles: Vec<usize>,
}

impl FamilyVariant {
    pub fn new(
        summary: SummaryVariant,
        families: Arc<FamiliesData>,
        family_id: &str,
        genotype: Genotype,
    ) -> Result<Self, VariantError> {
        let family_position = families
            .family_position(family_id)
            .ok_or_else(|| VariantError::FamilyNotFound(family_id.to_string()))?;
        let expected = families.family_at(family_position).len();
        if genotype.members_count() != expected {
            return Err(VariantError::GenotypeShape {
                family_id: family_id.to_string(),
                expected,
                found: genotype.members_count(),
            });
        }

        let mut allele_indices = vec![0];
        for allele in genotype.alt_alleles() {
            if summary.allele(allele).is_some() {
                allele_indices.push(allele);
            } else {
                debug!("Family {} calls allele {} absent from {}", family_id, allele, summary.svuid());
            }
        }

        let mut variant = Self {
            summary,
            families,
            family_position,
            genotype,
            allele_indices,
            inheritance: BTreeMap::new(),
            matched_alleles: Vec::new(),
        };
        variant.rederive_inheritance();
        Ok(variant)
    }

    pub fn from_data(
        summary: SummaryVariant,
        families: Arc<FamiliesData>,
        data: FamilyVariantData,
    ) -> Result<Self, VariantError> {
        Self::new(summary, families, &data.family_id, data.genotype)
    }

    pub fn to_data(&self) -> FamilyVariantData {
        FamilyVariantData {
            family_id: self.family_id().to_string(),
            genotype: self.genotype.clone(),
        }
    }

    /// Recompute inheritance of every allele from the genotype
    pub fn rederive_inheritance(&mut self) {
        let trios = self.family().trios();
        self.inheritance = self
            .allele_indices
            .iter()
            .map(|&allele| (allele, self.genotype.inheritance_in_members(&trios, allele)))
            .collect();
    }

    pub fn family(&self) -> FamilyView<'_> {
        self.families.family_at(self.family_position)
    }

    pub fn family_id(&self) -> &str {
        self.family().family_id()
    }

    pub fn families(&self) -> &Arc<FamiliesData> {
        &self.families
    }

    pub fn summary(&self) -> &SummaryVariant {
        &self.summary
    }

    pub fn summary_mut(&mut self) -> &mut SummaryVariant {
        &mut self.summary
    }

    pub fn genotype(&self) -> &Genotype {
        &self.genotype
    }

    pub fn best_state(&self) -> Vec<Vec<i8>> {
        self.genotype.best_state(self.summary.allele_count())
    }

    pub fn chromosome(&self) -> &str {
        self.summary.chromosome()
    }

    pub fn position(&self) -> u64 {
        self.summary.position()
    }

    pub fn end(&self) -> u64 {
        self.summary.end()
    }

    pub fn location(&self) -> String {
        self.summary.location()
    }

    pub fn svuid(&self) -> String {
        self.summary.svuid()
    }

    /// Family variant unique id
    pub fn fvuid(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.family_id(),
            self.summary.location(),
            self.summary.reference(),
            self.summary.alternative()
        )
    }

    pub fn is_reference(&self) -> bool {
        self.genotype.is_reference()
    }

    pub fn is_unknown(&self) -> bool {
        self.genotype.is_unknown()
    }

    /// Reference plus alternatives called in this family
    pub fn allele_indices(&self) -> &[usize] {
        &self.allele_indices
    }

    pub fn family_alleles(&self) -> Vec<FamilyAllele<'_>> {
        self.allele_indices
            .iter()
            .filter_map(|&index| self.family_allele(index))
            .collect()
    }

    pub fn family_allele(&self, allele_index: usize) -> Option<FamilyAllele<'_>> {
        if !self.allele_indices.contains(&allele_index) {
            return None;
        }
        let allele = self.summary.allele(allele_index)?;
        Some(FamilyAllele { variant: self, allele })
    }

    pub fn matched_alleles(&self) -> &[usize] {
        &self.matched_alleles
    }

    pub fn set_matched_alleles(&mut self, matched: Vec<usize>) {
        self.matched_alleles = matched;
    }

    /// Members carrying any alternative allele
    pub fn variant_in_members(&self) -> Vec<&str> {
        self.family()
            .members_in_order()
            .enumerate()
            .filter(|(member, _)| self.allele_indices[1..].iter().any(|&a| self.genotype.allele_count(*member, a) > 0))
            .map(|(_, person)| person.person_id.as_str())
            .collect()
    }
}

fn role_zygosity_translator() -> Option<BitmaskEnumTranslator> {
    BitmaskEnumTranslator::new::<Role, Zygosity>().ok()
}

/// One allele of a family variant
#[derive(Debug, Clone, Copy)]
pub struct FamilyAllele<'a> {
    variant: &'a FamilyVariant,
    allele: &'a SummaryAllele,
}

impl<'a> FamilyAllele<'a> {
    pub fn allele(&self) -> &'a SummaryAllele {
        self.allele
    }

    pub fn allele_index(&self) -> usize {
        self.allele.allele_index
    }

    pub fn variant(&self) -> &'a FamilyVariant {
        self.variant
    }

    fn carriers(&self) -> impl Iterator<Item = (usize, &'a Person)> + 'a {
        let variant = self.variant;
        let allele = self.allele.allele_index;
        variant
            .family()
            .members_in_order()
            .enumerate()
            .filter(move |(member, _)| variant.genotype.allele_count(*member, allele) > 0)
    }

    /// Person ids carrying this allele
    pub fn variant_in_members(&self) -> Vec<&'a str> {
        self.carriers().map(|(_, person)| person.person_id.as_str()).collect()
    }

    pub fn variant_in_roles(&self) -> Vec<Role> {
        self.carriers().map(|(_, person)| person.role).collect()
    }

    pub fn allele_in_roles(&self) -> u64 {
        Role::to_bitmask(self.carriers().map(|(_, person)| person.role))
    }

    pub fn allele_in_sexes(&self) -> u64 {
        Sex::to_bitmask(self.carriers().map(|(_, person)| person.sex))
    }

    pub fn allele_in_statuses(&self) -> u64 {
        Status::to_bitmask(self.carriers().map(|(_, person)| person.status))
    }

    pub fn inheritance_in_members(&self) -> &'a [Inheritance] {
        self.variant
            .inheritance
            .get(&self.allele.allele_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn inheritance_bitmask(&self) -> u64 {
        Inheritance::to_bitmask(self.inheritance_in_members().iter().copied())
    }

    pub fn zygosity_in_members(&self) -> Vec<Option<Zygosity>> {
        let genotype = &self.variant.genotype;
        (0..genotype.members_count())
            .map(|member| genotype.zygosity(member, self.allele.allele_index))
            .collect()
    }

    /// Zygosity of carriers packed per role slot
    pub fn zygosity_in_roles(&self) -> u64 {
        let Some(translator) = role_zygosity_translator() else {
            return 0;
        };
        let genotype = &self.variant.genotype;
        self.carriers().fold(0, |mask, (member, person)| {
            match genotype.zygosity(member, self.allele.allele_index) {
                Some(zygosity) => translator.apply(mask, person.role, zygosity),
                None => mask,
            }
        })
    }

    /// Allele copies across the family
    pub fn copies(&self) -> usize {
        let genotype = &self.variant.genotype;
        (0..genotype.members_count())
            .map(|member| genotype.allele_count(member, self.allele.allele_index))
            .sum()
    }
}

/// Store seen-in-status, seen-as-denovo and family counts on each alternative allele
pub fn annotate_family_statistics(summary: &mut SummaryVariant, family_variants: &[FamilyVariant]) {
    for allele in summary.alleles_mut().iter_mut().skip(1) {
        let mut seen_in_status = 0u64;
        let mut seen_as_denovo = false;
        let mut family_variants_count = 0u64;
        let mut family_alleles_count = 0u64;

        for fv in family_variants {
            let Some(fa) = fv.family_allele(allele.allele_index) else {
                continue;
            };
            family_variants_count += 1;
            family_alleles_count += fa.copies() as u64;
            seen_in_status |= fa.allele_in_statuses();
            seen_as_denovo |= fa.inheritance_in_members().contains(&Inheritance::Denovo);
        }

        allele.update_attributes([
            (SEEN_IN_STATUS.to_string(), Value::from(seen_in_status)),
            (SEEN_AS_DENOVO.to_string(), Value::from(seen_as_denovo)),
            (FAMILY_VARIANTS_COUNT.to_string(), Value::from(family_variants_count)),
            (FAMILY_ALLELES_COUNT.to_string(), Value::from(family_alleles_count)),
        ]);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pedigree::tests::quad;

    pub(crate) fn quad_families() -> Arc<FamiliesData> {
        let mut persons = quad("f1");
        persons.extend(quad("f2"));
        Arc::new(FamiliesData::from_persons(persons).unwrap())
    }

    pub(crate) fn snv(chrom: &str, position: u64) -> SummaryVariant {
        let alt = SummaryAllele::new(chrom, position, "A", Some("G")).with_indices(position as i64, 1);
        SummaryVariant::new(vec![alt]).unwrap()
    }

    fn denovo_variant() -> FamilyVariant {
        let genotype = Genotype::from_calls(&["0/0", "0/0", "0/1", "0/0"]).unwrap();
        FamilyVariant::new(snv("chr1", 100), quad_families(), "f1", genotype).unwrap()
    }

    #[test]
    fn test_fvuid_and_alleles() {
        let fv = denovo_variant();
        assert_eq!(fv.fvuid(), "f1.chr1:100.A.G");
        assert_eq!(fv.allele_indices(), &[0, 1]);
        assert!(!fv.is_reference());
        assert_eq!(fv.variant_in_members(), vec!["ch1"]);
    }

    #[test]
    fn test_family_allele_attributes() {
        let fv = denovo_variant();
        let fa = fv.family_allele(1).unwrap();

        assert_eq!(fa.variant_in_members(), vec!["ch1"]);
        assert_eq!(fa.allele_in_roles(), Role::Prb.as_bitmask());
        assert_eq!(fa.allele_in_sexes(), Sex::Male.as_bitmask());
        assert_eq!(fa.allele_in_statuses(), Status::Affected.as_bitmask());
        assert_eq!(fa.inheritance_in_members()[2], Inheritance::Denovo);
        assert_ne!(fa.inheritance_bitmask() & Inheritance::Denovo.as_bitmask(), 0);
        assert_eq!(fa.zygosity_in_members()[2], Some(Zygosity::Heterozygous));

        let translator = BitmaskEnumTranslator::new::<Role, Zygosity>().unwrap();
        assert_eq!(fa.zygosity_in_roles(), translator.apply(0, Role::Prb, Zygosity::Heterozygous));
    }

    #[test]
    fn test_missing_family_and_bad_shape() {
        let genotype = Genotype::from_calls(&["0/0", "0/1"]).unwrap();
        assert!(matches!(
            FamilyVariant::new(snv("chr1", 1), quad_families(), "f9", genotype.clone()),
            Err(VariantError::FamilyNotFound(_))
        ));
        assert!(matches!(
            FamilyVariant::new(snv("chr1", 1), quad_families(), "f1", genotype),
            Err(VariantError::GenotypeShape { expected: 4, found: 2, .. })
        ));
    }

    #[test]
    fn test_best_state_shape() {
        let fv = denovo_variant();
        let state = fv.best_state();
        assert_eq!(state.len(), 2);
        assert_eq!(state[1], vec![0, 0, 1, 0]);
    }

    #[test]
    fn test_data_round_trip() {
        let fv = denovo_variant();
        let data = fv.to_data();
        let json = serde_json::to_string(&data).unwrap();
        let back: FamilyVariantData = serde_json::from_str(&json).unwrap();
        let rebuilt = FamilyVariant::from_data(fv.summary().clone(), fv.families().clone(), back).unwrap();
        assert_eq!(rebuilt.fvuid(), fv.fvuid());
    }

    #[test]
    fn test_family_statistics() {
        let families = quad_families();
        let mut summary = snv("chr1", 100);
        let denovo = denovo_variant();
        let inherited = FamilyVariant::new(
            summary.clone(),
            families,
            "f2",
            Genotype::from_calls(&["0/1", "0/0", "0/0", "1/1"]).unwrap(),
        )
        .unwrap();

        annotate_family_statistics(&mut summary, &[denovo, inherited]);
        let allele = &summary.alleles()[1];
        assert_eq!(allele.get_attribute(FAMILY_VARIANTS_COUNT), Some(&Value::from(2u64)));
        assert_eq!(allele.get_attribute(FAMILY_ALLELES_COUNT), Some(&Value::from(4u64)));
        assert_eq!(allele.get_attribute(SEEN_AS_DENOVO), Some(&Value::from(true)));
        assert_eq!(
            allele.get_attribute(SEEN_IN_STATUS),
            Some(&Value::from(Status::to_bitmask([Status::Affected, Status::Unaffected])))
        );
    }
}
