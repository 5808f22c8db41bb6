// ==============================================================================
// models.rs - Query Data Models
// ==============================================================================
// Description: Genomic regions, real-valued attribute ranges and the canonical
//              filter set shared by every storage backend
// Author: Matt Barham
// Created: 2025-11-12
// Modified: 2025-11-27
// Version: 3.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegionParseError {
    #[error("Empty region")]
    Empty,

    #[error("Invalid region '{0}' (expected chrom, chrom:pos or chrom:start-stop)")]
    Invalid(String),

    #[error("Region '{0}' has start after stop")]
    Reversed(String),
}

/// Chromosome interval, 1-based and closed; open ends are allowed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Region {
    pub chrom: String,
    pub start: Option<u64>,
    pub stop: Option<u64>,
}

impl Region {
    pub fn new(chrom: &str, start: u64, stop: u64) -> Self {
        Self {
            chrom: chrom.to_string(),
            start: Some(start),
            stop: Some(stop),
        }
    }

    /// Whole chromosome
    pub fn chromosome(chrom: &str) -> Self {
        Self { chrom: chrom.to_string(), start: None, stop: None }
    }

    pub fn with_chrom(&self, chrom: &str) -> Self {
        Self { chrom: chrom.to_string(), ..self.clone() }
    }

    /// Whether a span `[position, end]` on `chrom` overlaps the region
    pub fn intersects(&self, chrom: &str, position: u64, end: u64) -> bool {
        if self.chrom != chrom {
            return false;
        }
        match (self.start, self.stop) {
            (None, None) => true,
            (None, Some(stop)) => position <= stop,
            (Some(start), None) => end >= start,
            (Some(start), Some(stop)) => !(end < start || position > stop),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.start, self.stop) {
            (None, None) => write!(f, "{}", self.chrom),
            (Some(start), Some(stop)) if start == stop => write!(f, "{}:{}", self.chrom, start),
            (start, stop) => write!(
                f,
                "{}:{}-{}",
                self.chrom,
                start.map(|s| s.to_string()).unwrap_or_default(),
                stop.map(|s| s.to_string()).unwrap_or_default()
            ),
        }
    }
}

impl FromStr for Region {
    type Err = RegionParseError;

    /// # Examples
    /// ```
    /// use variant_store::models::Region;
    ///
    /// let region: Region = "chr1:10-30".parse().unwrap();
    /// assert_eq!((region.start, region.stop), (Some(10), Some(30)));
    /// let open: Region = "chr1:10-".parse().unwrap();
    /// assert_eq!(open.stop, None);
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RegionParseError::Empty);
        }
        let Some((chrom, range)) = s.split_once(':') else {
            return Ok(Region::chromosome(s));
        };
        if chrom.is_empty() {
            return Err(RegionParseError::Invalid(s.to_string()));
        }

        let parse = |value: &str| -> Result<Option<u64>, RegionParseError> {
            let value = value.trim().replace(',', "");
            if value.is_empty() {
                return Ok(None);
            }
            value
                .parse::<u64>()
                .map(Some)
                .map_err(|_| RegionParseError::Invalid(s.to_string()))
        };

        let (start, stop) = match range.split_once('-') {
            Some((start, stop)) => (parse(start)?, parse(stop)?),
            None => {
                let position = parse(range)?;
                (position, position)
            }
        };
        if let (Some(start), Some(stop)) = (start, stop) {
            if start > stop {
                return Err(RegionParseError::Reversed(s.to_string()));
            }
        }
        Ok(Region { chrom: chrom.to_string(), start, stop })
    }
}

impl TryFrom<String> for Region {
    type Error = RegionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Region> for String {
    fn from(region: Region) -> Self {
        region.to_string()
    }
}

/// Closed range over one numeric attribute; `None` bounds are open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealAttrFilter {
    pub attribute: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl RealAttrFilter {
    pub fn new(attribute: &str, min: Option<f64>, max: Option<f64>) -> Self {
        Self { attribute: attribute.to_string(), min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// Ranges grouped by attribute in first-seen order
pub fn group_ranges(filters: &[RealAttrFilter]) -> Vec<(&str, Vec<&RealAttrFilter>)> {
    let mut groups: Vec<(&str, Vec<&RealAttrFilter>)> = Vec::new();
    for filter in filters {
        match groups.iter_mut().find(|(attribute, _)| *attribute == filter.attribute) {
            Some((_, ranges)) => ranges.push(filter),
            None => groups.push((filter.attribute.as_str(), vec![filter])),
        }
    }
    groups
}

/// Canonical filter set accepted by `query_variants` and `query_summary_variants`
///
/// String-valued enum filters (`roles`, `sexes`, ...) are attribute queries such
/// as `"prb and not sib"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariantQuery {
    pub regions: Option<Vec<Region>>,
    pub genes: Option<Vec<String>>,
    pub effect_types: Option<Vec<String>>,
    pub family_ids: Option<Vec<String>>,
    pub person_ids: Option<Vec<String>>,
    pub inheritance: Option<Vec<String>>,
    pub roles: Option<String>,
    pub sexes: Option<String>,
    pub affected_statuses: Option<String>,
    pub variant_type: Option<String>,
    pub real_attr_filter: Vec<RealAttrFilter>,
    pub frequency_filter: Vec<RealAttrFilter>,
    pub ultra_rare: bool,
    pub return_reference: bool,
    pub return_unknown: bool,
    pub limit: Option<usize>,
    pub unique_family_variants: bool,
    pub summary_variant_ids: Option<Vec<String>>,
}

impl Default for VariantQuery {
    fn default() -> Self {
        Self {
            regions: None,
            genes: None,
            effect_types: None,
            family_ids: None,
            person_ids: None,
            inheritance: None,
            roles: None,
            sexes: None,
            affected_statuses: None,
            variant_type: None,
            real_attr_filter: Vec::new(),
            frequency_filter: Vec::new(),
            ultra_rare: false,
            return_reference: false,
            return_unknown: false,
            limit: None,
            unique_family_variants: true,
            summary_variant_ids: None,
        }
    }
}

impl VariantQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_regions(mut self, regions: Vec<Region>) -> Self {
        self.regions = Some(regions);
        self
    }

    pub fn with_genes<S: Into<String>>(mut self, genes: impl IntoIterator<Item = S>) -> Self {
        self.genes = Some(genes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_effect_types<S: Into<String>>(mut self, effect_types: impl IntoIterator<Item = S>) -> Self {
        self.effect_types = Some(effect_types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_family_ids<S: Into<String>>(mut self, family_ids: impl IntoIterator<Item = S>) -> Self {
        self.family_ids = Some(family_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_person_ids<S: Into<String>>(mut self, person_ids: impl IntoIterator<Item = S>) -> Self {
        self.person_ids = Some(person_ids.into_iter().map(Into::into).collect());
        self
    }

    /// Add an inheritance query; all inheritance queries must match
    pub fn with_inheritance(mut self, query: &str) -> Self {
        self.inheritance.get_or_insert_with(Vec::new).push(query.to_string());
        self
    }

    pub fn with_roles(mut self, query: &str) -> Self {
        self.roles = Some(query.to_string());
        self
    }

    pub fn with_sexes(mut self, query: &str) -> Self {
        self.sexes = Some(query.to_string());
        self
    }

    pub fn with_affected_statuses(mut self, query: &str) -> Self {
        self.affected_statuses = Some(query.to_string());
        self
    }

    pub fn with_variant_type(mut self, query: &str) -> Self {
        self.variant_type = Some(query.to_string());
        self
    }

    pub fn with_real_attr(mut self, attribute: &str, min: Option<f64>, max: Option<f64>) -> Self {
        self.real_attr_filter.push(RealAttrFilter::new(attribute, min, max));
        self
    }

    pub fn with_frequency(mut self, attribute: &str, min: Option<f64>, max: Option<f64>) -> Self {
        self.frequency_filter.push(RealAttrFilter::new(attribute, min, max));
        self
    }

    pub fn with_ultra_rare(mut self, ultra_rare: bool) -> Self {
        self.ultra_rare = ultra_rare;
        self
    }

    pub fn with_return_reference(mut self, value: bool) -> Self {
        self.return_reference = value;
        self
    }

    pub fn with_return_unknown(mut self, value: bool) -> Self {
        self.return_unknown = value;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_unique_family_variants(mut self, unique: bool) -> Self {
        self.unique_family_variants = unique;
        self
    }

    pub fn with_summary_variant_ids<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.summary_variant_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn has_gene_effect_filter(&self) -> bool {
        self.genes.is_some() || self.effect_types.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_region_forms() {
        assert_eq!("chr1".parse::<Region>().unwrap(), Region::chromosome("chr1"));
        assert_eq!("chr1:50".parse::<Region>().unwrap(), Region::new("chr1", 50, 50));
        assert_eq!("chr1:1,000-2,000".parse::<Region>().unwrap(), Region::new("chr1", 1000, 2000));

        let open = "X:-100".parse::<Region>().unwrap();
        assert_eq!((open.start, open.stop), (None, Some(100)));

        assert!(matches!("chr1:30-10".parse::<Region>(), Err(RegionParseError::Reversed(_))));
        assert!(matches!("chr1:a-b".parse::<Region>(), Err(RegionParseError::Invalid(_))));
    }

    #[test]
    fn test_display_round_trip() {
        for text in ["chr1", "chr1:50", "chr1:10-30", "chr1:10-", "chr1:-30"] {
            assert_eq!(text.parse::<Region>().unwrap().to_string(), text);
        }
    }

    #[test]
    fn test_point_variant_containment() {
        // position 50, no end position
        assert!(Region::new("1", 40, 60).intersects("1", 50, 50));
        assert!(Region::new("1", 50, 50).intersects("1", 50, 50));
        assert!(!Region::new("1", 51, 60).intersects("1", 50, 50));
        assert!(!Region::new("2", 40, 60).intersects("1", 50, 50));
    }

    #[test]
    fn test_span_variant_overlap() {
        // spans [10, 20]
        assert!(Region::new("1", 1, 10).intersects("1", 10, 20));
        assert!(Region::new("1", 15, 16).intersects("1", 10, 20));
        assert!(Region::new("1", 20, 30).intersects("1", 10, 20));
        assert!(!Region::new("1", 21, 30).intersects("1", 10, 20));
    }

    #[test]
    fn test_open_ended_regions() {
        let stop_only = Region { chrom: "1".into(), start: None, stop: Some(10) };
        assert!(stop_only.intersects("1", 10, 12));
        assert!(!stop_only.intersects("1", 11, 12));

        let start_only = Region { chrom: "1".into(), start: Some(10), stop: None };
        assert!(start_only.intersects("1", 5, 10));
        assert!(!start_only.intersects("1", 5, 9));
    }

    #[test]
    fn test_query_serde_defaults() {
        let query: VariantQuery = serde_json::from_str(r#"{"regions": ["chr1:10-30"], "roles": "prb"}"#).unwrap();
        assert_eq!(query.regions, Some(vec![Region::new("chr1", 10, 30)]));
        assert!(query.unique_family_variants);
        assert!(!query.return_reference);
    }

    #[test]
    fn test_group_ranges_by_attribute() {
        let filters = vec![
            RealAttrFilter::new("score", Some(0.0), Some(1.0)),
            RealAttrFilter::new("af", None, Some(0.01)),
            RealAttrFilter::new("score", Some(5.0), None),
        ];
        let groups = group_ranges(&filters);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "score");
        assert_eq!(groups[0].1.len(), 2);
    }
}
