// ==============================================================================
// partition.rs - Partition Descriptor and Layout
// ==============================================================================
// Description: Deterministic mapping of alleles to region, frequency, coding
//              and family bins, bucket numbering and partition paths
// Author: Matt Barham
// Created: 2025-11-19
// Modified: 2025-11-28
// Version: 1.0.0
// ==============================================================================
// Region bins (region_length = L):
//   configured chromosome c of length n → c_0 .. c_{ceil(n/L)-1}
//   bin of position p                   → c_{(p-1)/L}
//   unconfigured contigs are laid end to end in contig order and share
//   other_0 .. other_{ceil(sum/L)-1}; unknown contigs fall into other_0
//
// Bucket index: configured bins (config order, then ordinal), then other_*
// ==============================================================================

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::models::Region;
use crate::parsers::effects::expand_effect_types;
use crate::variants::SummaryAllele;

pub use crate::variants::summary::FREQUENCY_ATTRIBUTE;

#[derive(Error, Debug)]
pub enum PartitionError {
    #[error("Failed to read partition description: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid partition description: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Failed to serialize partition description: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error("Invalid partition configuration: {0}")]
    InvalidConfig(String),

    #[error("Chromosome '{chrom}' already has prefix '{prefix}'")]
    PrefixPresent { chrom: String, prefix: String },

    #[error("Chromosome '{chrom}' does not have prefix '{prefix}'")]
    PrefixAbsent { chrom: String, prefix: String },

    #[error("Partitioned chromosome '{0}' is not a known contig")]
    UnknownChromosome(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    Single(String),
    List(Vec<String>),
}

impl StringOrList {
    fn into_vec(self) -> Vec<String> {
        let parts = match self {
            StringOrList::Single(value) => value.split(',').map(str::to_string).collect(),
            StringOrList::List(values) => values,
        };
        parts
            .into_iter()
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawDescription {
    #[serde(skip_serializing_if = "Option::is_none")]
    region_bin: Option<RawRegionBin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_bin: Option<RawFrequencyBin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    coding_bin: Option<RawCodingBin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    family_bin: Option<RawFamilyBin>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawRegionBin {
    chromosomes: StringOrList,
    region_length: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawFrequencyBin {
    rare_boundary: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawCodingBin {
    coding_effect_types: StringOrList,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawFamilyBin {
    family_bin_size: u64,
}

/// Partitioning configuration of a dataset
///
/// `rare_boundary` is in the unit of the `af_allele_freq` attribute.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PartitionDescriptor {
    pub chromosomes: Vec<String>,
    pub region_length: u64,
    pub rare_boundary: Option<f64>,
    pub coding_effect_types: BTreeSet<String>,
    pub family_bin_size: u64,
}

impl PartitionDescriptor {
    pub fn parse(path: impl AsRef<Path>) -> Result<Self, PartitionError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Parse a TOML description; effect-type groups are expanded
    ///
    /// # Examples
    /// ```
    /// use variant_store::partition::PartitionDescriptor;
    ///
    /// let descriptor = PartitionDescriptor::from_toml(
    ///     "[region_bin]\nchromosomes = \"1, 2\"\nregion_length = 1000\n",
    /// ).unwrap();
    /// assert_eq!(descriptor.chromosomes, vec!["1", "2"]);
    /// assert!(descriptor.has_region_bins());
    /// assert!(!descriptor.has_family_bins());
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, PartitionError> {
        let raw: RawDescription = toml::from_str(content)?;
        let mut descriptor = PartitionDescriptor::default();

        if let Some(region) = raw.region_bin {
            if region.region_length == 0 {
                return Err(PartitionError::InvalidConfig("region_length must be positive".into()));
            }
            descriptor.chromosomes = region.chromosomes.into_vec();
            descriptor.region_length = region.region_length;
        }
        if let Some(frequency) = raw.frequency_bin {
            if frequency.rare_boundary.is_nan() || frequency.rare_boundary <= 0.0 {
                return Err(PartitionError::InvalidConfig("rare_boundary must be positive".into()));
            }
            descriptor.rare_boundary = Some(frequency.rare_boundary);
        }
        if let Some(coding) = raw.coding_bin {
            descriptor.coding_effect_types = expand_effect_types(coding.coding_effect_types.into_vec().as_slice());
        }
        if let Some(family) = raw.family_bin {
            if family.family_bin_size == 0 {
                return Err(PartitionError::InvalidConfig("family_bin_size must be positive".into()));
            }
            descriptor.family_bin_size = family.family_bin_size;
        }
        Ok(descriptor)
    }

    pub fn to_toml(&self) -> Result<String, PartitionError> {
        let raw = RawDescription {
            region_bin: self.has_region_bins().then(|| RawRegionBin {
                chromosomes: StringOrList::List(self.chromosomes.clone()),
                region_length: self.region_length,
            }),
            frequency_bin: self.rare_boundary.map(|rare_boundary| RawFrequencyBin { rare_boundary }),
            coding_bin: self.has_coding_bins().then(|| RawCodingBin {
                coding_effect_types: StringOrList::List(self.coding_effect_types.iter().cloned().collect()),
            }),
            family_bin: self.has_family_bins().then_some(RawFamilyBin {
                family_bin_size: self.family_bin_size,
            }),
        };
        Ok(toml::to_string(&raw)?)
    }

    pub fn has_region_bins(&self) -> bool {
        self.region_length > 0
    }

    pub fn has_frequency_bins(&self) -> bool {
        self.rare_boundary.is_some()
    }

    pub fn has_coding_bins(&self) -> bool {
        !self.coding_effect_types.is_empty()
    }

    pub fn has_family_bins(&self) -> bool {
        self.family_bin_size > 0
    }

    /// 0 missing, 1 below the rare boundary, 2 at or above it
    pub fn frequency_bin(&self, frequency: Option<f64>) -> u8 {
        match (frequency, self.rare_boundary) {
            (None, _) => 0,
            (Some(frequency), Some(boundary)) if frequency < boundary => 1,
            (Some(_), _) => 2,
        }
    }

    /// 1 if any effect type is a configured coding effect
    pub fn coding_bin<I, S>(&self, effect_types: I) -> u8
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let coding = effect_types
            .into_iter()
            .any(|effect_type| self.coding_effect_types.contains(effect_type.as_ref()));
        u8::from(coding)
    }

    /// SHA-256 of the family id read as a big-endian integer, modulo the bin size
    pub fn family_bin(&self, family_id: &str) -> u64 {
        if self.family_bin_size == 0 {
            return 0;
        }
        let size = u128::from(self.family_bin_size);
        Sha256::digest(family_id.as_bytes())
            .iter()
            .fold(0u128, |acc, byte| (acc * 256 + u128::from(*byte)) % size) as u64
    }
}

/// Chromosome naming adjustment applied to layout chromosomes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChromosomePrefix {
    #[default]
    None,
    Add(String),
    Delete(String),
}

impl ChromosomePrefix {
    pub fn apply(&self, chrom: &str) -> Result<String, PartitionError> {
        match self {
            ChromosomePrefix::None => Ok(chrom.to_string()),
            ChromosomePrefix::Add(prefix) => {
                if chrom.starts_with(prefix.as_str()) {
                    return Err(PartitionError::PrefixPresent {
                        chrom: chrom.to_string(),
                        prefix: prefix.clone(),
                    });
                }
                Ok(format!("{}{}", prefix, chrom))
            }
            ChromosomePrefix::Delete(prefix) => chrom
                .strip_prefix(prefix.as_str())
                .map(str::to_string)
                .ok_or_else(|| PartitionError::PrefixAbsent {
                    chrom: chrom.to_string(),
                    prefix: prefix.clone(),
                }),
        }
    }
}

#[derive(Debug, Clone)]
struct ConfiguredChromosome {
    name: String,
    length: u64,
    bins: u64,
}

/// Partition descriptor bound to contig lengths; read-only once built
#[derive(Debug, Clone)]
pub struct PartitionLayout {
    descriptor: PartitionDescriptor,
    configured: Vec<ConfiguredChromosome>,
    configured_index: HashMap<String, usize>,
    other_contigs: Vec<(String, u64)>,
    other_offsets: HashMap<String, u64>,
    other_bins: u64,
    bins: Vec<String>,
    bucket_indices: HashMap<String, usize>,
}

impl PartitionLayout {
    /// Build the layout; `prefix` is applied to configured chromosomes and contigs alike
    pub fn new(
        mut descriptor: PartitionDescriptor,
        contigs: &[(String, u64)],
        prefix: &ChromosomePrefix,
    ) -> Result<Self, PartitionError> {
        descriptor.chromosomes = descriptor
            .chromosomes
            .iter()
            .map(|chrom| prefix.apply(chrom))
            .collect::<Result<_, _>>()?;
        let contigs: Vec<(String, u64)> = contigs
            .iter()
            .map(|(chrom, length)| Ok((prefix.apply(chrom)?, *length)))
            .collect::<Result<_, PartitionError>>()?;

        let lengths: HashMap<&str, u64> = contigs.iter().map(|(chrom, length)| (chrom.as_str(), *length)).collect();
        let region_length = descriptor.region_length.max(1);

        let mut configured = Vec::new();
        for chrom in &descriptor.chromosomes {
            let length = *lengths
                .get(chrom.as_str())
                .ok_or_else(|| PartitionError::UnknownChromosome(chrom.clone()))?;
            configured.push(ConfiguredChromosome {
                name: chrom.clone(),
                length,
                bins: length.div_ceil(region_length).max(1),
            });
        }
        let configured_names: HashSet<&str> = descriptor.chromosomes.iter().map(String::as_str).collect();

        let mut other_contigs = Vec::new();
        let mut other_offsets = HashMap::new();
        let mut offset = 0u64;
        for (chrom, length) in &contigs {
            if configured_names.contains(chrom.as_str()) {
                continue;
            }
            other_offsets.insert(chrom.clone(), offset);
            other_contigs.push((chrom.clone(), *length));
            offset += length;
        }
        let other_bins = offset.div_ceil(region_length);

        let mut bins = Vec::new();
        if descriptor.has_region_bins() {
            for chrom in &configured {
                bins.extend((0..chrom.bins).map(|ordinal| format!("{}_{}", chrom.name, ordinal)));
            }
            bins.extend((0..other_bins.max(1)).map(|ordinal| format!("other_{}", ordinal)));
        }
        let bucket_indices = bins.iter().enumerate().map(|(index, bin)| (bin.clone(), index)).collect();
        let configured_index = configured
            .iter()
            .enumerate()
            .map(|(index, chrom)| (chrom.name.clone(), index))
            .collect();

        debug!("Partition layout with {} region bins", bins.len());
        Ok(Self {
            descriptor,
            configured,
            configured_index,
            other_contigs,
            other_offsets,
            other_bins,
            bins,
            bucket_indices,
        })
    }

    pub fn descriptor(&self) -> &PartitionDescriptor {
        &self.descriptor
    }

    pub fn region_length(&self) -> u64 {
        self.descriptor.region_length.max(1)
    }

    /// Number of `other_*` bins implied by the unconfigured contigs
    pub fn other_bins_count(&self) -> u64 {
        self.other_bins
    }

    /// All region bin names in bucket order
    pub fn region_bins(&self) -> &[String] {
        &self.bins
    }

    pub fn bucket_index(&self, region_bin: &str) -> Option<usize> {
        self.bucket_indices.get(region_bin).copied()
    }

    /// Bucket of a row, 0 when the dataset is not region partitioned
    pub fn bucket_of(&self, region_bin: Option<&str>) -> usize {
        region_bin.and_then(|bin| self.bucket_index(bin)).unwrap_or(0)
    }

    /// Region bin holding position `position` of `chrom`
    pub fn region_bin(&self, chrom: &str, position: u64) -> Option<String> {
        if !self.descriptor.has_region_bins() {
            return None;
        }
        let region_length = self.region_length();
        let ordinal = position.saturating_sub(1) / region_length;
        if let Some(&index) = self.configured_index.get(chrom) {
            let configured = &self.configured[index];
            return Some(format!("{}_{}", configured.name, ordinal.min(configured.bins - 1)));
        }
        match self.other_offsets.get(chrom) {
            Some(offset) => {
                let global = (offset + position.saturating_sub(1)) / region_length;
                Some(format!("other_{}", global.min(self.other_bins.saturating_sub(1))))
            }
            None => Some("other_0".to_string()),
        }
    }

    /// Every region bin overlapped by the span `[position, end]`
    pub fn region_bins_of_span(&self, chrom: &str, position: u64, end: u64) -> Vec<String> {
        let mut bins: Vec<String> = self
            .region_to_region_bins(&Region::new(chrom, position, end.max(position)))
            .into_iter()
            .map(|(bin, _)| bin)
            .collect();
        if bins.is_empty() {
            bins.extend(self.region_bin(chrom, position));
        }
        bins
    }

    /// Bins overlapped by `region`, each with the overlapping sub-region
    ///
    /// Positions past the contig end fall into the last bin, where
    /// `region_bin` stores them.
    pub fn region_to_region_bins(&self, region: &Region) -> Vec<(String, String)> {
        if !self.descriptor.has_region_bins() {
            return Vec::new();
        }
        let region_length = self.region_length();

        if let Some(&index) = self.configured_index.get(region.chrom.as_str()) {
            let chrom = &self.configured[index];
            let start = region.start.unwrap_or(1).max(1);
            let stop = region.stop.unwrap_or(chrom.length);
            if start > stop {
                return Vec::new();
            }
            let last_bin = chrom.bins.saturating_sub(1);
            let first = ((start - 1) / region_length).min(last_bin);
            let last = ((stop - 1) / region_length).min(last_bin);
            return (first..=last)
                .map(|ordinal| {
                    let bin_start = ordinal * region_length + 1;
                    let bin_stop = if ordinal == last_bin { u64::MAX } else { (ordinal + 1) * region_length };
                    let sub_region = if chrom.bins == 1 && start <= 1 && stop >= chrom.length {
                        chrom.name.clone()
                    } else {
                        format!("{}:{}-{}", chrom.name, start.max(bin_start), stop.min(bin_stop))
                    };
                    (format!("{}_{}", chrom.name, ordinal), sub_region)
                })
                .collect();
        }

        let Some(&offset) = self.other_offsets.get(region.chrom.as_str()) else {
            return vec![("other_0".to_string(), region.to_string())];
        };
        let length = self
            .other_contigs
            .iter()
            .find(|(chrom, _)| *chrom == region.chrom)
            .map(|(_, length)| *length)
            .unwrap_or(0);
        let start = region.start.unwrap_or(1).max(1);
        let stop = region.stop.unwrap_or(length);
        if start > stop {
            return Vec::new();
        }
        let last_bin = self.other_bins.saturating_sub(1);
        let first = ((offset + start - 1) / region_length).min(last_bin);
        let last = ((offset + stop - 1) / region_length).min(last_bin);
        (first..=last)
            .map(|ordinal| {
                let bin_start = (ordinal * region_length + 1).saturating_sub(offset).max(1);
                let bin_stop = if ordinal == last_bin {
                    u64::MAX
                } else {
                    ((ordinal + 1) * region_length).saturating_sub(offset)
                };
                let sub_region = format!("{}:{}-{}", region.chrom, start.max(bin_start), stop.min(bin_stop));
                (format!("other_{}", ordinal), sub_region)
            })
            .collect()
    }

    /// Regions covered by one region bin
    pub fn make_region_bin(&self, region_bin: &str) -> Vec<Region> {
        let region_length = self.region_length();
        if let Some(ordinal) = region_bin.strip_prefix("other_").and_then(|o| o.parse::<u64>().ok()) {
            let bin_start = ordinal * region_length;
            let bin_stop = bin_start + region_length;
            let mut regions = Vec::new();
            for (chrom, length) in &self.other_contigs {
                let offset = self.other_offsets.get(chrom).copied().unwrap_or(0);
                if offset + length <= bin_start || offset >= bin_stop {
                    continue;
                }
                let start = bin_start.saturating_sub(offset) + 1;
                let stop = (bin_stop - offset).min(*length);
                regions.push(Region::new(chrom, start, stop));
            }
            return regions;
        }

        let Some((chrom, ordinal)) = region_bin.rsplit_once('_') else {
            return Vec::new();
        };
        let (Some(&index), Ok(ordinal)) = (self.configured_index.get(chrom), ordinal.parse::<u64>()) else {
            return Vec::new();
        };
        let configured = &self.configured[index];
        if configured.bins == 1 {
            return vec![Region::chromosome(&configured.name)];
        }
        let start = ordinal * region_length + 1;
        let stop = ((ordinal + 1) * region_length).min(configured.length);
        vec![Region::new(&configured.name, start, stop)]
    }

    /// Every region bin with its region strings, in bucket order
    pub fn make_all_region_bins(&self) -> Vec<(String, Vec<String>)> {
        self.bins
            .iter()
            .map(|bin| {
                let regions = self.make_region_bin(bin).iter().map(Region::to_string).collect();
                (bin.clone(), regions)
            })
            .collect()
    }

    /// Partition values of a summary allele row
    pub fn summary_partition(&self, allele: &SummaryAllele, region_bin: Option<&str>) -> Vec<(String, String)> {
        let mut partition = Vec::new();
        if let Some(region_bin) = region_bin {
            partition.push(("region_bin".to_string(), region_bin.to_string()));
        }
        if self.descriptor.has_frequency_bins() {
            let bin = self.descriptor.frequency_bin(allele.frequency());
            partition.push(("frequency_bin".to_string(), bin.to_string()));
        }
        if self.descriptor.has_coding_bins() {
            let bin = self.descriptor.coding_bin(allele.effect_types());
            partition.push(("coding_bin".to_string(), bin.to_string()));
        }
        partition
    }

    /// Partition values of a family allele row
    pub fn family_partition(
        &self,
        allele: &SummaryAllele,
        region_bin: Option<&str>,
        family_id: &str,
    ) -> Vec<(String, String)> {
        let mut partition = self.summary_partition(allele, region_bin);
        if self.descriptor.has_family_bins() {
            partition.push(("family_bin".to_string(), self.descriptor.family_bin(family_id).to_string()));
        }
        partition
    }
}

/// Hive-style directory `name=value/...`
pub fn partition_directory(partition: &[(String, String)]) -> PathBuf {
    partition
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect()
}

/// `prefix_name_value_..._bucket_index_NNNNNN.parquet`
pub fn partition_filename(prefix: &str, partition: &[(String, String)], bucket_index: usize) -> String {
    let mut parts = vec![prefix.to_string()];
    for (name, value) in partition {
        parts.push(format!("{}_{}", name, value));
    }
    parts.push(format!("bucket_index_{:06}", bucket_index));
    format!("{}.parquet", parts.join("_"))
}

/// Partition values encoded in the directories of `path`
pub fn path_to_partitions(path: &Path) -> Vec<(String, String)> {
    path.components()
        .filter_map(|component| component.as_os_str().to_str())
        .filter_map(|component| component.split_once('='))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"
[region_bin]
chromosomes = ["1", "2"]
region_length = 100

[frequency_bin]
rare_boundary = 5.0

[coding_bin]
coding_effect_types = "LGDs, missense"

[family_bin]
family_bin_size = 10
"#;

    fn contigs() -> Vec<(String, u64)> {
        vec![
            ("1".to_string(), 250),
            ("2".to_string(), 100),
            ("3".to_string(), 150),
            ("4".to_string(), 120),
        ]
    }

    fn layout() -> PartitionLayout {
        let descriptor = PartitionDescriptor::from_toml(DESCRIPTION).unwrap();
        PartitionLayout::new(descriptor, &contigs(), &ChromosomePrefix::None).unwrap()
    }

    #[test]
    fn test_parse_and_serialize() {
        let descriptor = PartitionDescriptor::from_toml(DESCRIPTION).unwrap();
        assert_eq!(descriptor.chromosomes, vec!["1", "2"]);
        assert_eq!(descriptor.region_length, 100);
        // groups are expanded
        assert!(descriptor.coding_effect_types.contains("nonsense"));
        assert!(descriptor.coding_effect_types.contains("missense"));

        let reparsed = PartitionDescriptor::from_toml(&descriptor.to_toml().unwrap()).unwrap();
        assert_eq!(descriptor, reparsed);
    }

    #[test]
    fn test_invalid_description() {
        let zero = "[region_bin]\nchromosomes = \"1\"\nregion_length = 0\n";
        assert!(matches!(PartitionDescriptor::from_toml(zero), Err(PartitionError::InvalidConfig(_))));
    }

    #[test]
    fn test_configured_chromosome_bins_cover_length() {
        let layout = layout();
        let bins = layout.region_to_region_bins(&Region::chromosome("1"));
        // ceil(250 / 100) contiguous bins
        assert_eq!(
            bins,
            vec![
                ("1_0".to_string(), "1:1-100".to_string()),
                ("1_1".to_string(), "1:101-200".to_string()),
                ("1_2".to_string(), "1:201-250".to_string()),
            ]
        );
        // whole chromosome in one bin
        assert_eq!(
            layout.region_to_region_bins(&Region::chromosome("2")),
            vec![("2_0".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn test_other_bins_share_offset_space() {
        let layout = layout();
        // ceil((150 + 120) / 100)
        assert_eq!(layout.other_bins_count(), 3);
        assert_eq!(layout.region_bin("3", 1).as_deref(), Some("other_0"));
        assert_eq!(layout.region_bin("3", 150).as_deref(), Some("other_1"));
        // contig 4 starts at offset 150
        assert_eq!(layout.region_bin("4", 60).as_deref(), Some("other_2"));
        assert_eq!(layout.region_bin("unplaced", 5).as_deref(), Some("other_0"));

        let bins = layout.region_to_region_bins(&Region::new("4", 40, 60));
        assert_eq!(
            bins,
            vec![
                ("other_1".to_string(), "4:40-50".to_string()),
                ("other_2".to_string(), "4:51-60".to_string()),
            ]
        );
    }

    #[test]
    fn test_region_crossing_bin_boundary() {
        let layout = layout();
        let bins = layout.region_to_region_bins(&Region::new("1", 90, 110));
        assert_eq!(
            bins,
            vec![("1_0".to_string(), "1:90-100".to_string()), ("1_1".to_string(), "1:101-110".to_string())]
        );
        assert_eq!(layout.region_bins_of_span("1", 95, 105), vec!["1_0", "1_1"]);
    }

    #[test]
    fn test_positions_past_contig_end_use_last_bin() {
        let layout = layout();
        assert_eq!(layout.region_bin("1", 300).as_deref(), Some("1_2"));
        assert_eq!(
            layout.region_to_region_bins(&Region::new("1", 290, 310)),
            vec![("1_2".to_string(), "1:290-310".to_string())]
        );
        assert_eq!(
            layout.region_to_region_bins(&Region::new("1", 240, 260)),
            vec![("1_2".to_string(), "1:240-260".to_string())]
        );
        assert_eq!(layout.region_bins_of_span("1", 290, 310), vec!["1_2"]);

        // contig 4 ends inside other_2
        assert_eq!(layout.region_bin("4", 200).as_deref(), Some("other_2"));
        let bins: Vec<String> =
            layout.region_to_region_bins(&Region::new("4", 190, 210)).into_iter().map(|(bin, _)| bin).collect();
        assert_eq!(bins, vec!["other_2"]);

        assert!(layout.region_to_region_bins(&Region::new("1", 20, 10)).is_empty());
    }

    #[test]
    fn test_bucket_index_injective_and_reproducible() {
        let first = layout();
        let second = layout();
        let indices: HashSet<usize> = first.region_bins().iter().filter_map(|b| first.bucket_index(b)).collect();
        assert_eq!(indices.len(), first.region_bins().len());
        for bin in first.region_bins() {
            assert_eq!(first.bucket_index(bin), second.bucket_index(bin));
        }
        assert_eq!(first.bucket_index("1_0"), Some(0));
        assert_eq!(first.bucket_index("2_0"), Some(3));
        assert_eq!(first.bucket_index("other_0"), Some(4));
    }

    #[test]
    fn test_make_region_bins() {
        let layout = layout();
        let all = layout.make_all_region_bins();
        assert_eq!(all[0], ("1_0".to_string(), vec!["1:1-100".to_string()]));
        assert_eq!(all[3], ("2_0".to_string(), vec!["2".to_string()]));
        // other_1 covers the end of contig 3 and the start of contig 4
        assert_eq!(all[5].1, vec!["3:101-150".to_string(), "4:1-50".to_string()]);
    }

    #[test]
    fn test_prefix_adjustment() {
        let descriptor = PartitionDescriptor::from_toml(DESCRIPTION).unwrap();
        let layout =
            PartitionLayout::new(descriptor.clone(), &contigs(), &ChromosomePrefix::Add("chr".into())).unwrap();
        assert_eq!(layout.region_bin("chr1", 150).as_deref(), Some("chr1_1"));
        assert_eq!(layout.bucket_index("chr2_0"), Some(3));

        assert!(matches!(
            ChromosomePrefix::Add("chr".into()).apply("chr1"),
            Err(PartitionError::PrefixPresent { .. })
        ));
        assert!(matches!(
            ChromosomePrefix::Delete("chr".into()).apply("1"),
            Err(PartitionError::PrefixAbsent { .. })
        ));
        assert_eq!(ChromosomePrefix::Delete("chr".into()).apply("chrX").unwrap(), "X");
    }

    #[test]
    fn test_unknown_configured_chromosome() {
        let descriptor = PartitionDescriptor::from_toml(DESCRIPTION).unwrap();
        let contigs = vec![("1".to_string(), 100)];
        assert!(matches!(
            PartitionLayout::new(descriptor, &contigs, &ChromosomePrefix::None),
            Err(PartitionError::UnknownChromosome(_))
        ));
    }

    #[test]
    fn test_value_bins() {
        let descriptor = PartitionDescriptor::from_toml(DESCRIPTION).unwrap();
        assert_eq!(descriptor.frequency_bin(None), 0);
        assert_eq!(descriptor.frequency_bin(Some(1.0)), 1);
        assert_eq!(descriptor.frequency_bin(Some(5.0)), 2);
        assert_eq!(descriptor.coding_bin(["intron", "missense"]), 1);
        assert_eq!(descriptor.coding_bin(["intron"]), 0);

        let bin = descriptor.family_bin("f1");
        assert!(bin < 10);
        assert_eq!(bin, descriptor.family_bin("f1"));
    }

    #[test]
    fn test_partition_paths() {
        let partition = vec![
            ("region_bin".to_string(), "1_0".to_string()),
            ("frequency_bin".to_string(), "1".to_string()),
        ];
        let directory = partition_directory(&partition);
        assert_eq!(directory, PathBuf::from("region_bin=1_0/frequency_bin=1"));
        assert_eq!(
            partition_filename("summary", &partition, 3),
            "summary_region_bin_1_0_frequency_bin_1_bucket_index_000003.parquet"
        );
        let path = Path::new("/data/summary").join(&directory).join("x.parquet");
        assert_eq!(path_to_partitions(&path), partition);
    }

    #[test]
    fn test_summary_and_family_partition() {
        let layout = layout();
        let allele = SummaryAllele::new("1", 150, "A", Some("G"))
            .with_attribute(FREQUENCY_ATTRIBUTE, 0.1)
            .with_attribute("effects", "missense!G1:missense!");
        let partition = layout.family_partition(&allele, Some("1_1"), "f1");
        let names: Vec<&str> = partition.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["region_bin", "frequency_bin", "coding_bin", "family_bin"]);
        assert_eq!(partition[1].1, "1");
        assert_eq!(partition[2].1, "1");
    }
}
