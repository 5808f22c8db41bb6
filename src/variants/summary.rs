// ==============================================================================
// variants/summary.rs - Summary Alleles and Variants
// ==============================================================================
// Description: Site-level variant model: alleles, reference synthesis,
//              1-based alternative accessors and record (de)serialization
// Author: Matt Barham
// Created: 2025-11-16
// Modified: 2025-11-26
// Version: 1.0.0
// ==============================================================================

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;
use tracing::warn;

use crate::attributes::{BitmaskEnum, VariantType};
use crate::parsers::effects::{AlleleEffects, EffectGene};

/// Flat per-allele record as stored in attribute blobs
pub type AlleleRecord = Map<String, Value>;

pub const FREQUENCY_ATTRIBUTE: &str = "af_allele_freq";
pub const ALLELE_COUNT_ATTRIBUTE: &str = "af_allele_count";
pub const EFFECTS_ATTRIBUTE: &str = "effects";
pub const SEEN_IN_STATUS: &str = "seen_in_status";
pub const SEEN_AS_DENOVO: &str = "seen_as_denovo";
pub const FAMILY_VARIANTS_COUNT: &str = "family_variants_count";
pub const FAMILY_ALLELES_COUNT: &str = "family_alleles_count";

/// Record keys that are model fields, not attributes
const RESERVED_KEYS: &[&str] = &[
    "chrom",
    "chromosome",
    "position",
    "end_position",
    "reference",
    "alternative",
    "allele_index",
    "summary_index",
    "summary_variant_index",
    "variant_type",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VariantError {
    #[error("No allele records given")]
    NoRecords,

    #[error("Allele record is missing field '{0}'")]
    MissingField(&'static str),

    #[error("Field '{field}' has an invalid value: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Allele records disagree on position: {expected} vs {found}")]
    InconsistentPositions { expected: String, found: String },

    #[error("Alternative allele index {index} out of range 1..={size}")]
    InvalidAlleleIndex { index: isize, size: usize },

    #[error("Family '{0}' is not in the families provider")]
    FamilyNotFound(String),

    #[error("Genotype has {found} columns but family '{family_id}' has {expected} members")]
    GenotypeShape {
        family_id: String,
        expected: usize,
        found: usize,
    },
}

/// Items of alternative alleles addressed with VCF-style 1-based indices
///
/// # Examples
/// ```
/// use variant_store::variants::AltAlleleItems;
///
/// let items = AltAlleleItems::new(vec!["A", "C", "G"]);
/// assert_eq!(items.get(1).unwrap(), &"A");
/// assert_eq!(items.get(-1).unwrap(), &"G");
/// assert!(items.get(0).is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AltAlleleItems<T> {
    items: Vec<T>,
}

impl<T> AltAlleleItems<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn into_inner(self) -> Vec<T> {
        self.items
    }

    fn to_zero_based(&self, index: isize) -> Result<isize, VariantError> {
        let size = self.items.len();
        if index >= 0 && !(1 <= index && index as usize <= size) {
            return Err(VariantError::InvalidAlleleIndex { index, size });
        }
        Ok(if index < 0 { index } else { index - 1 })
    }

    /// Item of alternative allele `index` (1-based, negative from the end)
    pub fn get(&self, index: isize) -> Result<&T, VariantError> {
        let size = self.items.len();
        let position = self.to_zero_based(index)?;
        let position = if position < 0 { size as isize + position } else { position };
        if position < 0 {
            return Err(VariantError::InvalidAlleleIndex { index, size });
        }
        self.items
            .get(position as usize)
            .ok_or(VariantError::InvalidAlleleIndex { index, size })
    }

    /// Slice `[start:stop]` with both bounds translated to 0-based
    pub fn slice(&self, start: Option<isize>, stop: Option<isize>) -> Result<Vec<&T>, VariantError> {
        let size = self.items.len() as isize;
        let start = start.map(|index| self.to_zero_based(index)).transpose()?;
        let stop = stop.map(|index| self.to_zero_based(index)).transpose()?;
        let clamp = |bound: isize| {
            if bound < 0 {
                (bound + size).max(0)
            } else {
                bound.min(size)
            }
        };
        let start = start.map(clamp).unwrap_or(0);
        let stop = stop.map(clamp).unwrap_or(size);
        Ok((start..stop.max(start))
            .map(|position| &self.items[position as usize])
            .collect())
    }
}

impl<T> IntoIterator for AltAlleleItems<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// CSHL-style description of an allele
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantDetail {
    pub chromosome: String,
    pub cshl_position: u64,
    pub cshl_variant: String,
    pub variant_type: VariantType,
    pub length: u64,
}

impl VariantDetail {
    /// Trim shared prefix then suffix and describe what is left
    ///
    /// Non-ASCII alleles are not trimmed and describe as `comp`.
    pub fn from_vcf(chromosome: &str, position: u64, reference: &str, alternative: &str) -> Self {
        if !reference.is_ascii() || !alternative.is_ascii() {
            return Self {
                chromosome: chromosome.to_string(),
                cshl_position: position,
                cshl_variant: format!("comp({}->{})", reference, alternative),
                variant_type: VariantType::Comp,
                length: reference.chars().count().max(alternative.chars().count()) as u64,
            };
        }
        let prefix = reference
            .bytes()
            .zip(alternative.bytes())
            .take_while(|(r, a)| r == a)
            .count();
        let (reference, alternative) = (&reference[prefix..], &alternative[prefix..]);
        let suffix = reference
            .bytes()
            .rev()
            .zip(alternative.bytes().rev())
            .take_while(|(r, a)| r == a)
            .count();
        let reference = &reference[..reference.len() - suffix];
        let alternative = &alternative[..alternative.len() - suffix];
        let cshl_position = position + prefix as u64;

        let (variant_type, cshl_variant, length) = match (reference.len(), alternative.len()) {
            (1, 1) => (
                VariantType::Substitution,
                format!("sub({}->{})", reference, alternative),
                1,
            ),
            (0, n) if n > 0 => (VariantType::Insertion, format!("ins({})", alternative), n),
            (n, 0) if n > 0 => (VariantType::Deletion, format!("del({})", n), n),
            (r, a) => (
                VariantType::Comp,
                format!("comp({}->{})", reference, alternative),
                r.max(a),
            ),
        };

        Self {
            chromosome: chromosome.to_string(),
            cshl_position,
            cshl_variant,
            variant_type,
            length: length as u64,
        }
    }

    /// Detail for copy-number alleles spanning `position..=end_position`
    pub fn cnv(chromosome: &str, position: u64, end_position: u64, variant_type: VariantType) -> Self {
        Self {
            chromosome: chromosome.to_string(),
            cshl_position: position,
            cshl_variant: variant_type.short_name().to_string(),
            variant_type,
            length: end_position.saturating_sub(position) + 1,
        }
    }

    pub fn cshl_location(&self) -> String {
        format!("{}:{}", self.chromosome, self.cshl_position)
    }
}

/// One allele of one site
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryAllele {
    pub chromosome: String,
    pub position: u64,
    pub end_position: Option<u64>,
    pub reference: String,
    pub alternative: Option<String>,
    pub summary_index: i64,
    pub allele_index: usize,
    pub details: Option<VariantDetail>,
    pub effects: Option<AlleleEffects>,
    pub attributes: BTreeMap<String, Value>,
    pub matched_gene_effects: Vec<EffectGene>,
}

impl SummaryAllele {
    pub fn new(chromosome: &str, position: u64, reference: &str, alternative: Option<&str>) -> Self {
        let mut allele = Self {
            chromosome: chromosome.to_string(),
            position,
            end_position: None,
            reference: reference.to_string(),
            alternative: alternative.map(str::to_string),
            summary_index: 0,
            allele_index: if alternative.is_some() { 1 } else { 0 },
            details: None,
            effects: None,
            attributes: BTreeMap::new(),
            matched_gene_effects: Vec::new(),
        };
        allele.details = allele.derive_details(None);
        allele
    }

    pub fn with_indices(mut self, summary_index: i64, allele_index: usize) -> Self {
        self.summary_index = summary_index;
        self.allele_index = allele_index;
        self
    }

    pub fn with_end_position(mut self, end_position: u64) -> Self {
        self.end_position = Some(end_position);
        let variant_type = self.details.as_ref().map(|d| d.variant_type).filter(VariantType::is_cnv);
        self.details = self.derive_details(variant_type);
        self
    }

    pub fn with_variant_type(mut self, variant_type: VariantType) -> Self {
        self.details = self.derive_details(Some(variant_type));
        self
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.update_attributes([(key.to_string(), value.into())]);
        self
    }

    fn derive_details(&self, variant_type: Option<VariantType>) -> Option<VariantDetail> {
        let alternative = self.alternative.as_deref()?;
        match variant_type {
            Some(variant_type) if variant_type.is_cnv() => Some(VariantDetail::cnv(
                &self.chromosome,
                self.position,
                self.end_position.unwrap_or(self.position),
                variant_type,
            )),
            _ => Some(VariantDetail::from_vcf(&self.chromosome, self.position, &self.reference, alternative)),
        }
    }

    pub fn is_reference_allele(&self) -> bool {
        self.allele_index == 0
    }

    pub fn variant_type(&self) -> Option<VariantType> {
        self.details.as_ref().map(|details| details.variant_type)
    }

    /// End of the allele span, falling back to its position
    pub fn end(&self) -> u64 {
        self.end_position.unwrap_or(self.position)
    }

    pub fn frequency(&self) -> Option<f64> {
        self.get_attribute(FREQUENCY_ATTRIBUTE).and_then(Value::as_f64)
    }

    pub fn get_attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key).filter(|value| !value.is_null())
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Merge attributes; an `effects` string is reparsed
    pub fn update_attributes<I: IntoIterator<Item = (String, Value)>>(&mut self, attributes: I) {
        for (key, value) in attributes {
            if key == EFFECTS_ATTRIBUTE {
                self.effects = parse_effects(&value, &self.chromosome, self.position);
            }
            self.attributes.insert(key, value);
        }
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<Value> {
        if key == EFFECTS_ATTRIBUTE {
            self.effects = None;
        }
        self.attributes.remove(key)
    }

    pub fn effect_types(&self) -> BTreeSet<&str> {
        self.effects.as_ref().map(AlleleEffects::types).unwrap_or_default()
    }

    pub fn location(&self) -> String {
        match self.end_position {
            Some(end) if end != self.position => format!("{}:{}-{}", self.chromosome, self.position, end),
            _ => format!("{}:{}", self.chromosome, self.position),
        }
    }

    /// Flat record with model fields and attributes
    pub fn to_record(&self) -> AlleleRecord {
        let mut record = AlleleRecord::new();
        record.insert("chrom".to_string(), Value::from(self.chromosome.clone()));
        record.insert("position".to_string(), Value::from(self.position));
        record.insert(
            "end_position".to_string(),
            self.end_position.map(Value::from).unwrap_or(Value::Null),
        );
        record.insert("reference".to_string(), Value::from(self.reference.clone()));
        record.insert(
            "alternative".to_string(),
            self.alternative.clone().map(Value::from).unwrap_or(Value::Null),
        );
        record.insert("summary_index".to_string(), Value::from(self.summary_index));
        record.insert("allele_index".to_string(), Value::from(self.allele_index));
        if let Some(variant_type) = self.variant_type() {
            record.insert("variant_type".to_string(), Value::from(variant_type.as_str()));
        }
        for (key, value) in &self.attributes {
            record.insert(key.clone(), value.clone());
        }
        record
    }

    /// Build an allele from a flat record
    pub fn from_record(record: &AlleleRecord) -> Result<Self, VariantError> {
        let chromosome = record
            .get("chrom")
            .or_else(|| record.get("chromosome"))
            .and_then(Value::as_str)
            .ok_or(VariantError::MissingField("chrom"))?;
        let position = required_u64(record, "position")?;
        let reference = record
            .get("reference")
            .and_then(Value::as_str)
            .ok_or(VariantError::MissingField("reference"))?;
        let alternative = record.get("alternative").and_then(Value::as_str);
        let allele_index = match record.get("allele_index") {
            Some(value) => value.as_u64().ok_or_else(|| invalid("allele_index", value))? as usize,
            None if alternative.is_none() => 0,
            None => return Err(VariantError::MissingField("allele_index")),
        };
        let summary_index = match record.get("summary_index").or_else(|| record.get("summary_variant_index")) {
            Some(value) => value.as_i64().ok_or_else(|| invalid("summary_index", value))?,
            None => 0,
        };
        let end_position = match record.get("end_position") {
            Some(Value::Null) | None => None,
            Some(value) => Some(value.as_u64().ok_or_else(|| invalid("end_position", value))?),
        };
        let variant_type = match record.get("variant_type").and_then(Value::as_str) {
            Some(name) => Some(VariantType::from_name(name).ok_or_else(|| VariantError::InvalidField {
                field: "variant_type",
                value: name.to_string(),
            })?),
            None => None,
        };

        let mut allele = SummaryAllele::new(chromosome, position, reference, alternative)
            .with_indices(summary_index, allele_index);
        allele.end_position = end_position;
        allele.details = allele.derive_details(variant_type);
        allele.update_attributes(
            record
                .iter()
                .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        Ok(allele)
    }
}

fn required_u64(record: &AlleleRecord, field: &'static str) -> Result<u64, VariantError> {
    let value = record.get(field).ok_or(VariantError::MissingField(field))?;
    value.as_u64().ok_or_else(|| invalid(field, value))
}

fn invalid(field: &'static str, value: &Value) -> VariantError {
    VariantError::InvalidField { field, value: value.to_string() }
}

fn parse_effects(value: &Value, chromosome: &str, position: u64) -> Option<AlleleEffects> {
    let text = value.as_str()?;
    match text.parse() {
        Ok(effects) => Some(effects),
        Err(e) => {
            warn!("Ignoring effects of {}:{}: {}", chromosome, position, e);
            None
        }
    }
}

/// Alleles of one site; `alleles[0]` is always the reference
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryVariant {
    alleles: Vec<SummaryAllele>,
    allele_count: usize,
    matched_alleles: Vec<usize>,
}

impl SummaryVariant {
    /// Build from alleles of one site, synthesizing the reference if absent
    pub fn new(mut alleles: Vec<SummaryAllele>) -> Result<Self, VariantError> {
        let first = alleles.first().ok_or(VariantError::NoRecords)?;
        let expected = format!("{}:{}", first.chromosome, first.position);
        for allele in &alleles {
            let found = format!("{}:{}", allele.chromosome, allele.position);
            if found != expected {
                return Err(VariantError::InconsistentPositions { expected, found });
            }
        }

        if !first.is_reference_allele() {
            let mut reference = SummaryAllele::new(&first.chromosome, first.position, &first.reference, None)
                .with_indices(first.summary_index, 0);
            if let Some(count) = first.attributes.get("allele_count") {
                reference.attributes.insert("allele_count".to_string(), count.clone());
            }
            alleles.insert(0, reference);
        }

        let allele_count = alleles[0]
            .get_attribute("allele_count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .unwrap_or(alleles.len());

        Ok(Self { alleles, allele_count, matched_alleles: Vec::new() })
    }

    pub fn alleles(&self) -> &[SummaryAllele] {
        &self.alleles
    }

    pub fn alleles_mut(&mut self) -> &mut [SummaryAllele] {
        &mut self.alleles
    }

    pub fn alt_alleles(&self) -> &[SummaryAllele] {
        &self.alleles[1..]
    }

    pub fn allele(&self, allele_index: usize) -> Option<&SummaryAllele> {
        self.alleles.iter().find(|allele| allele.allele_index == allele_index)
    }

    pub fn allele_count(&self) -> usize {
        self.allele_count
    }

    pub fn reference_allele(&self) -> &SummaryAllele {
        &self.alleles[0]
    }

    pub fn chromosome(&self) -> &str {
        &self.alleles[0].chromosome
    }

    pub fn position(&self) -> u64 {
        self.alleles[0].position
    }

    /// End position of the first alternative allele
    pub fn end_position(&self) -> Option<u64> {
        self.alleles.get(1).unwrap_or(&self.alleles[0]).end_position
    }

    pub fn end(&self) -> u64 {
        self.end_position().unwrap_or_else(|| self.position())
    }

    pub fn reference(&self) -> &str {
        &self.alleles[0].reference
    }

    pub fn summary_index(&self) -> i64 {
        self.alleles[0].summary_index
    }

    /// Comma-joined alternatives
    pub fn alternative(&self) -> String {
        self.alt_alleles()
            .iter()
            .filter_map(|allele| allele.alternative.as_deref())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn location(&self) -> String {
        match self.end_position() {
            Some(end) if end != self.position() => format!("{}:{}-{}", self.chromosome(), self.position(), end),
            _ => format!("{}:{}", self.chromosome(), self.position()),
        }
    }

    /// Summary variant unique id
    pub fn svuid(&self) -> String {
        format!("{}.{}.{}", self.location(), self.reference(), self.alternative())
    }

    pub fn effects(&self) -> AltAlleleItems<Option<&AlleleEffects>> {
        AltAlleleItems::new(self.alt_alleles().iter().map(|a| a.effects.as_ref()).collect())
    }

    pub fn details(&self) -> AltAlleleItems<Option<&VariantDetail>> {
        AltAlleleItems::new(self.alt_alleles().iter().map(|a| a.details.as_ref()).collect())
    }

    pub fn frequencies(&self) -> AltAlleleItems<Option<f64>> {
        AltAlleleItems::new(self.alt_alleles().iter().map(SummaryAllele::frequency).collect())
    }

    pub fn variant_types(&self) -> BTreeSet<VariantType> {
        self.alt_alleles().iter().filter_map(SummaryAllele::variant_type).collect()
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.alt_alleles().iter().any(|allele| allele.has_attribute(key))
    }

    pub fn get_attribute(&self, key: &str) -> AltAlleleItems<Option<&Value>> {
        AltAlleleItems::new(self.alt_alleles().iter().map(|a| a.get_attribute(key)).collect())
    }

    /// Assign attribute values to alternative alleles, cycling each list
    pub fn update_attributes(&mut self, attributes: &BTreeMap<String, Vec<Value>>) {
        for (position, allele) in self.alleles.iter_mut().skip(1).enumerate() {
            let values = attributes
                .iter()
                .filter(|(_, values)| !values.is_empty())
                .map(|(key, values)| (key.clone(), values[position % values.len()].clone()));
            allele.update_attributes(values);
        }
    }

    pub fn matched_alleles(&self) -> &[usize] {
        &self.matched_alleles
    }

    pub fn set_matched_alleles(&mut self, matched: Vec<usize>) {
        self.matched_alleles = matched;
    }

    pub fn matched_gene_effects(&self) -> Vec<&EffectGene> {
        self.alleles.iter().flat_map(|allele| allele.matched_gene_effects.iter()).collect()
    }

    pub fn to_records(&self) -> Vec<AlleleRecord> {
        self.alleles.iter().map(SummaryAllele::to_record).collect()
    }

    /// Fold family statistics of the same site seen elsewhere into this one
    pub fn merge_statistics(&mut self, other: &SummaryVariant) {
        for allele in self.alleles.iter_mut().skip(1) {
            let Some(other) = other.allele(allele.allele_index) else {
                continue;
            };
            let status = attribute_u64(allele, SEEN_IN_STATUS) | attribute_u64(other, SEEN_IN_STATUS);
            let denovo = attribute_bool(allele, SEEN_AS_DENOVO) || attribute_bool(other, SEEN_AS_DENOVO);
            let variants = attribute_u64(allele, FAMILY_VARIANTS_COUNT) + attribute_u64(other, FAMILY_VARIANTS_COUNT);
            let alleles = attribute_u64(allele, FAMILY_ALLELES_COUNT) + attribute_u64(other, FAMILY_ALLELES_COUNT);
            allele.update_attributes([
                (SEEN_IN_STATUS.to_string(), Value::from(status)),
                (SEEN_AS_DENOVO.to_string(), Value::from(denovo)),
                (FAMILY_VARIANTS_COUNT.to_string(), Value::from(variants)),
                (FAMILY_ALLELES_COUNT.to_string(), Value::from(alleles)),
            ]);
        }
    }
}

pub(crate) fn attribute_u64(allele: &SummaryAllele, key: &str) -> u64 {
    allele.get_attribute(key).and_then(Value::as_u64).unwrap_or(0)
}

pub(crate) fn attribute_bool(allele: &SummaryAllele, key: &str) -> bool {
    allele.get_attribute(key).and_then(Value::as_bool).unwrap_or(false)
}

impl fmt::Display for SummaryVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}->{}", self.location(), self.reference(), self.alternative())
    }
}

/// Builds summary variants from flat allele records
pub struct SummaryVariantFactory;

impl SummaryVariantFactory {
    /// Records must already be grouped by site
    pub fn from_records(records: &[AlleleRecord]) -> Result<SummaryVariant, VariantError> {
        let alleles = records
            .iter()
            .map(SummaryAllele::from_record)
            .collect::<Result<Vec<_>, _>>()?;
        SummaryVariant::new(alleles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> AlleleRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("record must be an object"),
        }
    }

    fn two_alt_records() -> Vec<AlleleRecord> {
        vec![
            record(json!({
                "chrom": "chr1", "position": 100, "reference": "A", "alternative": "G",
                "allele_index": 1, "summary_index": 7, "af_allele_freq": 0.5,
                "effects": "missense!SAMD11:missense!NM_1:SAMD11:missense:"
            })),
            record(json!({
                "chrom": "chr1", "position": 100, "reference": "A", "alternative": "AT",
                "allele_index": 2, "summary_index": 7
            })),
        ]
    }

    #[test]
    fn test_factory_synthesizes_reference() {
        let sv = SummaryVariantFactory::from_records(&two_alt_records()).unwrap();
        assert_eq!(sv.alleles().len(), 3);
        assert!(sv.reference_allele().is_reference_allele());
        assert_eq!(sv.reference_allele().alternative, None);
        assert_eq!(sv.summary_index(), 7);
        assert_eq!(sv.allele_count(), 3);
        assert_eq!(sv.alternative(), "G,AT");
        assert_eq!(sv.svuid(), "chr1:100.A.G,AT");
    }

    #[test]
    fn test_factory_rejects_inconsistent_positions() {
        let mut records = two_alt_records();
        records[1].insert("position".to_string(), json!(101));
        assert!(matches!(
            SummaryVariantFactory::from_records(&records),
            Err(VariantError::InconsistentPositions { .. })
        ));
        assert!(matches!(SummaryVariantFactory::from_records(&[]), Err(VariantError::NoRecords)));
    }

    #[test]
    fn test_allele_count_override() {
        let reference = SummaryAllele::new("chr1", 5, "C", None).with_attribute("allele_count", 4);
        let alt = SummaryAllele::new("chr1", 5, "C", Some("T"));
        let sv = SummaryVariant::new(vec![reference, alt]).unwrap();
        assert_eq!(sv.allele_count(), 4);
    }

    #[test]
    fn test_effects_and_details() {
        let sv = SummaryVariantFactory::from_records(&two_alt_records()).unwrap();
        let effects = sv.effects();
        assert_eq!(effects.get(1).unwrap().map(|e| e.worst.as_str()), Some("missense"));
        assert!(effects.get(2).unwrap().is_none());

        let details = sv.details();
        assert_eq!(details.get(1).unwrap().unwrap().cshl_variant, "sub(A->G)");
        assert_eq!(details.get(2).unwrap().unwrap().cshl_variant, "ins(T)");
        assert_eq!(details.get(2).unwrap().unwrap().cshl_position, 101);
        assert_eq!(
            sv.variant_types(),
            [VariantType::Substitution, VariantType::Insertion].into_iter().collect()
        );
        assert_eq!(sv.frequencies().into_inner(), vec![Some(0.5), None]);
    }

    #[test]
    fn test_bad_effect_string_is_skipped() {
        let mut records = two_alt_records();
        records[0].insert("effects".to_string(), json!("garbage"));
        let sv = SummaryVariantFactory::from_records(&records).unwrap();
        assert!(sv.alleles()[1].effects.is_none());
    }

    #[test]
    fn test_vcf_details() {
        assert_eq!(VariantDetail::from_vcf("1", 10, "ATG", "A").cshl_variant, "del(2)");
        assert_eq!(VariantDetail::from_vcf("1", 10, "ATG", "A").cshl_position, 11);
        assert_eq!(VariantDetail::from_vcf("1", 10, "AT", "GC").variant_type, VariantType::Comp);

        let odd = VariantDetail::from_vcf("1", 10, "Aé", "A");
        assert_eq!(odd.variant_type, VariantType::Comp);
        assert_eq!(odd.cshl_position, 10);
        assert_eq!(odd.length, 2);

        let cnv = VariantDetail::cnv("1", 100, 199, VariantType::CnvPlus);
        assert_eq!((cnv.cshl_variant.as_str(), cnv.length), ("CNV+", 100));
    }

    #[test]
    fn test_alt_allele_items_indexing() {
        let items = AltAlleleItems::new(vec!['a', 'b', 'c']);
        assert_eq!(*items.get(3).unwrap(), 'c');
        assert_eq!(*items.get(-3).unwrap(), 'a');
        assert!(matches!(items.get(0), Err(VariantError::InvalidAlleleIndex { index: 0, size: 3 })));
        assert!(items.get(4).is_err());
        assert!(items.get(-4).is_err());
    }

    #[test]
    fn test_alt_allele_items_slicing() {
        let items = AltAlleleItems::new(vec!['a', 'b', 'c']);
        assert_eq!(items.slice(Some(1), Some(3)).unwrap(), vec![&'a', &'b']);
        assert_eq!(items.slice(Some(2), None).unwrap(), vec![&'b', &'c']);
        assert_eq!(items.slice(None, Some(-1)).unwrap(), vec![&'a', &'b']);
        assert!(items.slice(Some(0), None).is_err());
    }

    #[test]
    fn test_update_attributes_cycles_values() {
        let mut sv = SummaryVariantFactory::from_records(&two_alt_records()).unwrap();
        let mut update = BTreeMap::new();
        update.insert("score".to_string(), vec![json!(1.5)]);
        update.insert("label".to_string(), vec![json!("x"), json!("y")]);
        sv.update_attributes(&update);

        assert_eq!(sv.get_attribute("score").into_inner(), vec![Some(&json!(1.5)), Some(&json!(1.5))]);
        assert_eq!(sv.get_attribute("label").into_inner(), vec![Some(&json!("x")), Some(&json!("y"))]);
        // Reference allele untouched
        assert!(!sv.reference_allele().has_attribute("score"));
    }

    #[test]
    fn test_record_round_trip_keeps_attributes() {
        let sv = SummaryVariantFactory::from_records(&two_alt_records()).unwrap();
        let back = SummaryVariantFactory::from_records(&sv.to_records()).unwrap();
        assert_eq!(back, sv);
    }

    #[test]
    fn test_merge_statistics() {
        let base = SummaryVariantFactory::from_records(&two_alt_records()).unwrap();
        let mut left = base.clone();
        left.alleles_mut()[1].update_attributes([
            (SEEN_IN_STATUS.to_string(), json!(1)),
            (FAMILY_VARIANTS_COUNT.to_string(), json!(2)),
        ]);
        let mut right = base;
        right.alleles_mut()[1].update_attributes([
            (SEEN_IN_STATUS.to_string(), json!(2)),
            (SEEN_AS_DENOVO.to_string(), json!(true)),
            (FAMILY_VARIANTS_COUNT.to_string(), json!(3)),
        ]);

        left.merge_statistics(&right);
        let allele = &left.alleles()[1];
        assert_eq!(allele.get_attribute(SEEN_IN_STATUS), Some(&json!(3)));
        assert_eq!(allele.get_attribute(SEEN_AS_DENOVO), Some(&json!(true)));
        assert_eq!(allele.get_attribute(FAMILY_VARIANTS_COUNT), Some(&json!(5)));
    }
}
