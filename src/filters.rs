// ==============================================================================
// filters.rs - In-Process Variant Filters
// ==============================================================================
// Description: Reference filtering of summary and family variants against a
//              compiled filter set; every backend re-checks decoded rows here
// Author: Matt Barham
// Created: 2025-11-18
// Modified: 2025-11-28
// Version: 1.0.0
// ==============================================================================
// Allele filter order (family alleles):
//   inheritance → real attributes → frequency → ultra-rare → genes/effects →
//   variant type → reference exclusion → person ids → roles → sexes → statuses
//
// Real-attribute ranges:
//   ranges of one attribute are OR-ed, attributes are AND-ed
//   a missing attribute key never matches
//   frequency-classed ranges keep null values for (None, None) and (None, max)
// ==============================================================================

use std::collections::{BTreeSet, HashSet};

use crate::attributes::{
    AttributeQueryCompiler, AttributeQueryError, BitmaskEnum, Inheritance, Matcher, Role, Sex, Status,
    VariantType, Zygosity,
};
use crate::models::{group_ranges, RealAttrFilter, Region, VariantQuery};
use crate::parsers::effects::{expand_effect_types, EffectGene};
use crate::variants::{FamilyAllele, FamilyVariant, SummaryAllele, SummaryVariant};
use crate::variants::summary::ALLELE_COUNT_ATTRIBUTE;

/// Role compiler; compounds bind a role with the carrier's zygosity
pub fn role_compiler() -> Result<AttributeQueryCompiler<Role>, AttributeQueryError> {
    AttributeQueryCompiler::<Role>::new()
        .with_alias("proband", Role::Prb)
        .with_alias("sibling", Role::Sib)
        .with_complementary::<Zygosity>()
}

/// Range used for `ultra_rare`
pub fn ultra_rare_filter() -> RealAttrFilter {
    RealAttrFilter::new(ALLELE_COUNT_ATTRIBUTE, None, Some(1.0))
}

/// Filter set compiled once per query and shared by all runners
#[derive(Debug, Clone)]
pub struct CompiledFilters {
    query: VariantQuery,
    effect_types: Option<BTreeSet<String>>,
    genes: Option<HashSet<String>>,
    family_ids: Option<HashSet<String>>,
    person_ids: Option<HashSet<String>>,
    summary_variant_ids: Option<HashSet<String>>,
    inheritance: Vec<Matcher>,
    roles: Option<Matcher>,
    sexes: Option<Matcher>,
    affected_statuses: Option<Matcher>,
    variant_type: Option<Matcher>,
}

impl CompiledFilters {
    /// Compile every attribute query; fails before any I/O on a bad query
    pub fn compile(query: &VariantQuery) -> Result<Self, AttributeQueryError> {
        let bounds = query.real_attr_filter.iter().chain(&query.frequency_filter);
        for range in bounds {
            if range.min.into_iter().chain(range.max).any(|bound| !bound.is_finite()) {
                return Err(AttributeQueryError::NonFiniteBound(range.attribute.clone()));
            }
        }

        let inheritance_compiler = AttributeQueryCompiler::<Inheritance>::new();
        let inheritance = query
            .inheritance
            .iter()
            .flatten()
            .map(|q| inheritance_compiler.matcher(q))
            .collect::<Result<Vec<_>, _>>()?;

        let roles = match &query.roles {
            Some(q) => Some(role_compiler()?.matcher(q)?),
            None => None,
        };
        let sexes = compile_optional::<Sex>(&query.sexes)?;
        let affected_statuses = compile_optional::<Status>(&query.affected_statuses)?;
        let variant_type = compile_optional::<VariantType>(&query.variant_type)?;

        Ok(Self {
            effect_types: query.effect_types.as_ref().map(|types| expand_effect_types(types.as_slice())),
            genes: query.genes.as_ref().map(|genes| genes.iter().cloned().collect()),
            family_ids: query.family_ids.as_ref().map(|ids| ids.iter().cloned().collect()),
            person_ids: query.person_ids.as_ref().map(|ids| ids.iter().cloned().collect()),
            summary_variant_ids: query.summary_variant_ids.as_ref().map(|ids| ids.iter().cloned().collect()),
            inheritance,
            roles,
            sexes,
            affected_statuses,
            variant_type,
            query: query.clone(),
        })
    }

    pub fn query(&self) -> &VariantQuery {
        &self.query
    }

    /// Effect types after group expansion
    pub fn effect_types(&self) -> Option<&BTreeSet<String>> {
        self.effect_types.as_ref()
    }

    pub fn has_gene_effect_filter(&self) -> bool {
        self.effect_types.is_some() || self.genes.is_some()
    }

    pub(crate) fn inheritance_matchers(&self) -> &[Matcher] {
        &self.inheritance
    }

    pub(crate) fn roles_matcher(&self) -> Option<&Matcher> {
        self.roles.as_ref()
    }

    pub(crate) fn sexes_matcher(&self) -> Option<&Matcher> {
        self.sexes.as_ref()
    }

    pub(crate) fn statuses_matcher(&self) -> Option<&Matcher> {
        self.affected_statuses.as_ref()
    }

    pub(crate) fn family_ids(&self) -> Option<&HashSet<String>> {
        self.family_ids.as_ref()
    }

    pub(crate) fn person_ids(&self) -> Option<&HashSet<String>> {
        self.person_ids.as_ref()
    }

    /// Summary-variant id allow-list
    pub fn allows_svuid(&self, svuid: &str) -> bool {
        self.summary_variant_ids.as_ref().map_or(true, |ids| ids.contains(svuid))
    }

    /// Frequency-classed ranges, including the ultra-rare range
    pub fn frequency_filters(&self) -> Vec<RealAttrFilter> {
        let mut filters = self.query.frequency_filter.clone();
        if self.query.ultra_rare {
            filters.push(ultra_rare_filter());
        }
        filters
    }

    /// Filter a family variant, recording matched alleles and gene effects
    pub fn filter_family_variant(&self, mut fv: FamilyVariant) -> Option<FamilyVariant> {
        if let Some(regions) = &self.query.regions {
            if !filter_regions(fv.summary(), regions) {
                return None;
            }
        }
        if let Some(family_ids) = &self.family_ids {
            if !family_ids.contains(fv.family_id()) {
                return None;
            }
        }
        if fv.is_unknown() && !self.query.return_unknown {
            return None;
        }
        if fv.is_reference() && !self.query.return_reference {
            return None;
        }

        let frequency = self.frequency_filters();
        let mut matched = Vec::new();
        for fa in fv.family_alleles() {
            if let Some(effects) = self.filter_family_allele(&fa, &frequency) {
                matched.push((fa.allele_index(), effects));
            }
        }
        if matched.is_empty() {
            return None;
        }

        let indices: Vec<usize> = matched.iter().map(|(index, _)| *index).collect();
        for allele in fv.summary_mut().alleles_mut() {
            allele.matched_gene_effects = matched
                .iter()
                .find(|(index, _)| *index == allele.allele_index)
                .map(|(_, effects)| effects.clone())
                .unwrap_or_default();
        }
        fv.set_matched_alleles(indices);
        Some(fv)
    }

    /// Matched gene effects when the allele passes, `None` otherwise
    fn filter_family_allele(&self, fa: &FamilyAllele<'_>, frequency: &[RealAttrFilter]) -> Option<Vec<EffectGene>> {
        let allele = fa.allele();

        if !self.inheritance.is_empty() {
            let inheritance = fa.inheritance_bitmask();
            for matcher in &self.inheritance {
                if !matches_or_exclude(matcher, inheritance, None) {
                    return None;
                }
            }
        }

        let effects = self.filter_allele_attributes(allele, frequency)?;

        if allele.is_reference_allele() && !self.query.return_reference && !self.query.return_unknown {
            return None;
        }
        if let Some(person_ids) = &self.person_ids {
            if !fa.variant_in_members().iter().any(|id| person_ids.contains(*id)) {
                return None;
            }
        }
        if let Some(roles) = &self.roles {
            if !matches_or_exclude(roles, fa.allele_in_roles(), Some(fa.zygosity_in_roles())) {
                return None;
            }
        }
        if let Some(sexes) = &self.sexes {
            if !matches_or_exclude(sexes, fa.allele_in_sexes(), None) {
                return None;
            }
        }
        if let Some(statuses) = &self.affected_statuses {
            if !matches_or_exclude(statuses, fa.allele_in_statuses(), None) {
                return None;
            }
        }
        Some(effects)
    }

    /// Checks shared by summary and family alleles
    fn filter_allele_attributes(&self, allele: &SummaryAllele, frequency: &[RealAttrFilter]) -> Option<Vec<EffectGene>> {
        if !self.query.real_attr_filter.is_empty() && !filter_real_attr(allele, &self.query.real_attr_filter, false) {
            return None;
        }
        if !frequency.is_empty() && !filter_real_attr(allele, frequency, true) {
            return None;
        }

        let effects = if self.has_gene_effect_filter() {
            match_gene_effects(allele, self.effect_types.as_ref(), self.genes.as_ref())?
        } else {
            Vec::new()
        };

        if let Some(variant_type) = &self.variant_type {
            let bits = allele.variant_type().map(VariantType::as_bitmask).unwrap_or(0);
            if !matches_or_exclude(variant_type, bits, None) {
                return None;
            }
        }
        Some(effects)
    }

    /// Filter a summary variant, recording matched alleles and gene effects
    pub fn filter_summary_variant(&self, mut sv: SummaryVariant) -> Option<SummaryVariant> {
        if let Some(regions) = &self.query.regions {
            if !filter_regions(&sv, regions) {
                return None;
            }
        }

        let frequency = self.frequency_filters();
        let mut matched = Vec::new();
        for allele in sv.alleles_mut() {
            if allele.is_reference_allele() && !self.query.return_reference {
                continue;
            }
            match self.filter_allele_attributes(allele, &frequency) {
                Some(effects) => {
                    allele.matched_gene_effects = effects;
                    matched.push(allele.allele_index);
                }
                None => allele.matched_gene_effects.clear(),
            }
        }
        if matched.is_empty() {
            return None;
        }
        sv.set_matched_alleles(matched);
        Some(sv)
    }
}

fn compile_optional<E: BitmaskEnum>(query: &Option<String>) -> Result<Option<Matcher>, AttributeQueryError> {
    query
        .as_deref()
        .map(|q| AttributeQueryCompiler::<E>::new().matcher(q))
        .transpose()
}

/// Evaluation errors exclude the allele
fn matches_or_exclude(matcher: &Matcher, x: u64, y: Option<u64>) -> bool {
    matcher.matches(x, y).unwrap_or(false)
}

/// Whether the variant span overlaps any region
pub fn filter_regions(sv: &SummaryVariant, regions: &[Region]) -> bool {
    regions
        .iter()
        .any(|region| region.intersects(sv.chromosome(), sv.position(), sv.end()))
}

fn range_accepts(range: &RealAttrFilter, value: Option<f64>, is_frequency: bool) -> bool {
    match (range.min, range.max, value) {
        (None, None, value) => is_frequency || value.is_some(),
        (None, Some(_), None) => is_frequency,
        (_, _, None) => false,
        (_, _, Some(value)) => range.contains(value),
    }
}

/// Whether the allele satisfies every attribute's range set
///
/// # Examples
/// ```
/// use variant_store::filters::filter_real_attr;
/// use variant_store::models::RealAttrFilter;
/// use variant_store::variants::SummaryAllele;
///
/// let allele = SummaryAllele::new("1", 10, "A", Some("G")).with_attribute("af", serde_json::Value::Null);
/// let range = [RealAttrFilter::new("af", None, Some(1.0))];
/// assert!(filter_real_attr(&allele, &range, true));
/// assert!(!filter_real_attr(&allele, &range, false));
/// ```
pub fn filter_real_attr(allele: &SummaryAllele, filters: &[RealAttrFilter], is_frequency: bool) -> bool {
    group_ranges(filters).into_iter().all(|(attribute, ranges)| {
        if !allele.has_attribute(attribute) {
            return false;
        }
        let value = allele.get_attribute(attribute).and_then(|value| value.as_f64());
        ranges.iter().any(|range| range_accepts(range, value, is_frequency))
    })
}

/// Gene effects matching both constraints; `None` when nothing matches
pub fn match_gene_effects(
    allele: &SummaryAllele,
    effect_types: Option<&BTreeSet<String>>,
    genes: Option<&HashSet<String>>,
) -> Option<Vec<EffectGene>> {
    let effects = allele.effects.as_ref()?;
    let matched: Vec<EffectGene> = effects
        .genes
        .iter()
        .filter(|gene_effect| effect_types.map_or(true, |types| types.contains(&gene_effect.effect)))
        .filter(|gene_effect| {
            genes.map_or(true, |genes| {
                gene_effect.symbol.as_ref().is_some_and(|symbol| genes.contains(symbol))
            })
        })
        .cloned()
        .collect();
    if matched.is_empty() {
        None
    } else {
        Some(matched)
    }
}

/// Gene/effect filter that records the matched gene effects on the allele
pub fn filter_gene_effects(
    allele: &mut SummaryAllele,
    effect_types: Option<&BTreeSet<String>>,
    genes: Option<&HashSet<String>>,
) -> bool {
    match match_gene_effects(allele, effect_types, genes) {
        Some(matched) => {
            allele.matched_gene_effects = matched;
            true
        }
        None => false,
    }
}
