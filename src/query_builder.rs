// ==============================================================================
// query_builder.rs - Query Translator
// ==============================================================================
// Description: Translates a compiled filter set into partition pruning
//              heuristics, SQL plans and row predicates for columnar scans
// Author: Matt Barham
// Created: 2025-11-20
// Modified: 2025-11-29
// Version: 1.0.0
// ==============================================================================
// Contract: every plan selects a superset of what the in-process filters keep.
// Decoded rows are always re-filtered, so pushdown may be partial.
//
// Not pushed down (evaluated in process only):
//   - gene symbol and effect-type filters (nested per-allele gene effects)
//   - real-valued attributes without a materialised column
//   - compound role terms in the legacy dialect
// ==============================================================================

use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use crate::attributes::{
    AttributeQueryCompiler, AttributeQueryError, BitmaskColumns, Inheritance, Matcher, Sex, SqlDialect, Status,
    VariantType,
};
use crate::filters::{role_compiler, CompiledFilters};
use crate::models::{group_ranges, RealAttrFilter, Region};
use crate::partition::{PartitionLayout, FREQUENCY_ATTRIBUTE};
use crate::pedigree::FamiliesData;
use crate::sql::{in_numbers, in_strings, quote, Condition};
use crate::variants::summary::ALLELE_COUNT_ATTRIBUTE;

/// Region pruning is skipped beyond this many bins
pub const REGION_BINS_HEURISTIC_CUTOFF: usize = 20;

/// Backends fetch this many rows per requested result
pub const OVER_FETCH_FACTOR: usize = 10;

pub const SUMMARY_TABLE: &str = "summary_alleles";
pub const FAMILY_TABLE: &str = "family_alleles";

/// Families a query is restricted to, from family ids and person ids
pub fn family_constraint(filters: &CompiledFilters, families: &FamiliesData) -> Option<BTreeSet<String>> {
    let by_person: Option<BTreeSet<String>> = filters.person_ids().map(|persons| {
        persons
            .iter()
            .flat_map(|person| families.families_of_person(person))
            .map(str::to_string)
            .collect()
    });
    match (filters.family_ids(), by_person) {
        (Some(ids), Some(by_person)) => Some(by_person.into_iter().filter(|id| ids.contains(id)).collect()),
        (Some(ids), None) => Some(ids.iter().cloned().collect()),
        (None, by_person) => by_person,
    }
}

/// Partition values a query can possibly match; `None` means no pruning
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryHeuristics {
    pub region_bins: Option<Vec<String>>,
    pub frequency_bins: Option<BTreeSet<u8>>,
    pub coding_bins: Option<BTreeSet<u8>>,
    pub family_bins: Option<BTreeSet<u64>>,
}

impl QueryHeuristics {
    pub fn calc(layout: &PartitionLayout, filters: &CompiledFilters, families: &FamiliesData) -> Self {
        let descriptor = layout.descriptor();
        let query = filters.query();
        let mut heuristics = QueryHeuristics::default();

        if descriptor.has_region_bins() {
            if let Some(regions) = &query.regions {
                let mut bins: Vec<String> = Vec::new();
                for region in regions {
                    for (bin, _) in layout.region_to_region_bins(region) {
                        if !bins.contains(&bin) {
                            bins.push(bin);
                        }
                    }
                }
                bins.sort_by_key(|bin| layout.bucket_index(bin));
                if bins.len() <= REGION_BINS_HEURISTIC_CUTOFF {
                    heuristics.region_bins = Some(bins);
                }
            }
        }

        if let Some(boundary) = descriptor.rare_boundary {
            let ranges: Vec<&RealAttrFilter> = query
                .frequency_filter
                .iter()
                .filter(|range| range.attribute == FREQUENCY_ATTRIBUTE)
                .collect();
            if !ranges.is_empty() {
                let mut bins = BTreeSet::new();
                for range in ranges {
                    bins.extend(frequency_bins_of_range(range, boundary));
                }
                if bins.len() < 3 {
                    heuristics.frequency_bins = Some(bins);
                }
            }
        }

        if descriptor.has_coding_bins() {
            if let Some(effect_types) = filters.effect_types() {
                if !effect_types.is_empty()
                    && effect_types.iter().all(|effect| descriptor.coding_effect_types.contains(effect))
                {
                    heuristics.coding_bins = Some(BTreeSet::from([1]));
                }
            }
        }

        if descriptor.has_family_bins() {
            if let Some(family_ids) = family_constraint(filters, families) {
                let bins: BTreeSet<u64> = family_ids.iter().map(|id| descriptor.family_bin(id)).collect();
                if (bins.len() as u64) * 2 < descriptor.family_bin_size {
                    heuristics.family_bins = Some(bins);
                }
            }
        }

        debug!("Query heuristics: {:?}", heuristics);
        heuristics
    }

    pub fn accepts_region_bin(&self, region_bin: &str) -> bool {
        self.region_bins
            .as_ref()
            .map_or(true, |bins| bins.iter().any(|bin| bin == region_bin))
    }

    /// Whether a partition (name/value list) may hold matching rows
    pub fn accepts(&self, partition: &[(String, String)]) -> bool {
        partition.iter().all(|(name, value)| match name.as_str() {
            "region_bin" => self.accepts_region_bin(value),
            "frequency_bin" => accepts_value(&self.frequency_bins, value),
            "coding_bin" => accepts_value(&self.coding_bins, value),
            "family_bin" => accepts_value(&self.family_bins, value),
            _ => true,
        })
    }
}

fn accepts_value<T: Ord + std::str::FromStr>(bins: &Option<BTreeSet<T>>, value: &str) -> bool {
    match (bins, value.parse::<T>()) {
        (Some(bins), Ok(value)) => bins.contains(&value),
        _ => true,
    }
}

fn frequency_bins_of_range(range: &RealAttrFilter, boundary: f64) -> BTreeSet<u8> {
    let mut bins = BTreeSet::from([0, 1, 2]);
    if range.min.is_some() {
        bins.remove(&0);
    }
    if range.max.is_some_and(|max| max < boundary) {
        bins.remove(&2);
    }
    if range.min.is_some_and(|min| min >= boundary) {
        bins.remove(&1);
    }
    bins
}

/// Overlap of `region` with a row span stored in the given columns
pub fn region_condition(region: &Region, chrom: &str, position: &str, end_position: &str) -> Condition {
    let on_chrom = Condition::raw(format!("{} = {}", chrom, quote(&region.chrom)));
    let end = format!("COALESCE({}, {})", end_position, position);
    let overlap = match (region.start, region.stop) {
        (None, None) => Condition::True,
        (Some(start), None) => Condition::raw(format!("{} >= {}", end, start)),
        (None, Some(stop)) => Condition::negate(Condition::raw(format!("{} > {}", position, stop))),
        (Some(start), Some(stop)) => Condition::negate(Condition::or([
            Condition::raw(format!("{} < {}", end, start)),
            Condition::raw(format!("{} > {}", position, stop)),
        ])),
    };
    Condition::and([on_chrom, overlap])
}

/// One range over a materialised real-valued column
pub fn real_attr_condition(column: &str, range: &RealAttrFilter, is_frequency: bool) -> Condition {
    match (range.min, range.max) {
        (None, None) if is_frequency => Condition::True,
        (None, None) => Condition::raw(format!("{} IS NOT NULL", column)),
        (None, Some(max)) if is_frequency => Condition::or([
            Condition::raw(format!("{} <= {}", column, max)),
            Condition::raw(format!("{} IS NULL", column)),
        ]),
        (None, Some(max)) => Condition::raw(format!("{} <= {}", column, max)),
        (Some(min), None) => Condition::raw(format!("{} >= {}", column, min)),
        (Some(min), Some(max)) => Condition::and([
            Condition::raw(format!("{} >= {}", column, min)),
            Condition::raw(format!("{} <= {}", column, max)),
        ]),
    }
}

/// SQL plans over the `summary_alleles` / `family_alleles` tables
pub struct SqlQueryBuilder<'a> {
    filters: &'a CompiledFilters,
    families: &'a FamiliesData,
    heuristics: &'a QueryHeuristics,
    dialect: SqlDialect,
    columns: HashSet<String>,
}

impl<'a> SqlQueryBuilder<'a> {
    pub fn new(filters: &'a CompiledFilters, families: &'a FamiliesData, heuristics: &'a QueryHeuristics) -> Self {
        let columns = [FREQUENCY_ATTRIBUTE, ALLELE_COUNT_ATTRIBUTE].iter().map(|c| c.to_string()).collect();
        Self {
            filters,
            families,
            heuristics,
            dialect: SqlDialect::Standard,
            columns,
        }
    }

    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Real-valued attributes stored as `summary_alleles` columns
    pub fn with_score_columns(mut self, columns: &[String]) -> Self {
        self.columns.extend(columns.iter().cloned());
        self
    }

    /// Row fetch limit, over-fetching for in-process re-filtering
    pub fn fetch_limit(&self) -> Option<usize> {
        self.filters.query().limit.map(|limit| limit.saturating_mul(OVER_FETCH_FACTOR))
    }

    fn real_attr_conditions(&self, filters: &[RealAttrFilter], is_frequency: bool) -> Vec<Condition> {
        group_ranges(filters)
            .into_iter()
            .filter(|(attribute, _)| self.columns.contains(*attribute))
            .map(|(attribute, ranges)| {
                let column = format!("sa.{}", attribute);
                Condition::or(ranges.iter().map(|range| real_attr_condition(&column, range, is_frequency)))
            })
            .collect()
    }

    fn bitmask_condition<F>(&self, query: &str, columns: BitmaskColumns, compile: F) -> Condition
    where
        F: FnOnce(&str, &BitmaskColumns, SqlDialect) -> Result<Condition, AttributeQueryError>,
    {
        match compile(query, &columns, self.dialect) {
            Ok(condition) => condition,
            Err(e) => {
                debug!("Evaluating '{}' in process only: {}", query, e);
                Condition::True
            }
        }
    }

    fn bins_condition(&self, column: &str, bins: &Option<BTreeSet<impl std::fmt::Display + Copy>>) -> Condition {
        match bins {
            Some(bins) => in_numbers(column, bins.iter().copied()),
            None => Condition::True,
        }
    }

    /// Conditions on `summary_alleles` (alias `sa`)
    pub fn summary_where(&self, bucket_index: Option<usize>) -> Condition {
        let query = self.filters.query();
        let mut conditions = Vec::new();

        if let Some(bucket_index) = bucket_index {
            conditions.push(Condition::raw(format!("sa.bucket_index = {}", bucket_index)));
        }
        if let Some(bins) = &self.heuristics.region_bins {
            conditions.push(in_strings("sa.region_bin", bins.iter().map(String::as_str)));
        }
        conditions.push(self.bins_condition("sa.frequency_bin", &self.heuristics.frequency_bins));
        conditions.push(self.bins_condition("sa.coding_bin", &self.heuristics.coding_bins));

        if let Some(regions) = &query.regions {
            conditions.push(Condition::or(
                regions
                    .iter()
                    .map(|region| region_condition(region, "sa.chromosome", "sa.position", "sa.end_position")),
            ));
        }
        conditions.extend(self.real_attr_conditions(&query.real_attr_filter, false));
        conditions.extend(self.real_attr_conditions(&self.filters.frequency_filters(), true));

        if let Some(variant_type) = &query.variant_type {
            let compiler = AttributeQueryCompiler::<VariantType>::new();
            conditions.push(self.bitmask_condition(variant_type, BitmaskColumns::new("sa.variant_type"), |q, c, d| {
                compiler.sql(q, c, d)
            }));
        }
        if !query.return_reference && !query.return_unknown {
            conditions.push(Condition::raw("sa.allele_index > 0"));
        }
        Condition::and(conditions)
    }

    /// Conditions on `family_alleles` (alias `fa`) joined with `summary_alleles`
    pub fn family_where(&self, bucket_index: Option<usize>) -> Condition {
        let query = self.filters.query();
        let mut conditions = vec![self.summary_where(bucket_index)];
        conditions.push(self.bins_condition("fa.family_bin", &self.heuristics.family_bins));

        if let Some(family_ids) = family_constraint(self.filters, self.families) {
            conditions.push(in_strings("fa.family_id", family_ids.iter().map(String::as_str)));
        }

        let inheritance = AttributeQueryCompiler::<Inheritance>::new();
        for matcher in self.filters.inheritance_matchers() {
            conditions.push(self.bitmask_condition(
                matcher.query(),
                BitmaskColumns::new("fa.inheritance_in_members"),
                |q, c, d| inheritance.sql(q, c, d),
            ));
        }
        if let Some(roles) = &query.roles {
            match role_compiler() {
                Ok(compiler) => conditions.push(self.bitmask_condition(
                    roles,
                    BitmaskColumns::new("fa.allele_in_roles").with_complementary("fa.zygosity_in_roles"),
                    |q, c, d| compiler.sql(q, c, d),
                )),
                Err(e) => debug!("Roles evaluated in process only: {}", e),
            }
        }
        if let Some(sexes) = &query.sexes {
            let compiler = AttributeQueryCompiler::<Sex>::new();
            conditions.push(self.bitmask_condition(sexes, BitmaskColumns::new("fa.allele_in_sexes"), |q, c, d| {
                compiler.sql(q, c, d)
            }));
        }
        if let Some(statuses) = &query.affected_statuses {
            let compiler = AttributeQueryCompiler::<Status>::new();
            conditions.push(self.bitmask_condition(
                statuses,
                BitmaskColumns::new("fa.allele_in_statuses"),
                |q, c, d| compiler.sql(q, c, d),
            ));
        }
        Condition::and(conditions)
    }

    pub fn build_summary_query(&self, bucket_index: Option<usize>) -> String {
        let mut sql = format!(
            "SELECT sa.bucket_index, sa.summary_index, sa.allele_index, sa.summary_variant_data \
             FROM {} AS sa WHERE {} ORDER BY sa.bucket_index, sa.position, sa.summary_index, sa.allele_index",
            SUMMARY_TABLE,
            self.summary_where(bucket_index)
        );
        if let Some(limit) = self.fetch_limit() {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }

    pub fn build_family_query(&self, bucket_index: Option<usize>) -> String {
        let mut sql = format!(
            "SELECT fa.bucket_index, fa.summary_index, fa.family_id, sa.summary_variant_data, fa.family_variant_data \
             FROM {} AS fa JOIN {} AS sa \
             ON fa.bucket_index = sa.bucket_index AND fa.summary_index = sa.summary_index \
             AND fa.allele_index = sa.allele_index \
             WHERE {} ORDER BY fa.bucket_index, sa.position, fa.summary_index, fa.family_id",
            FAMILY_TABLE,
            SUMMARY_TABLE,
            self.family_where(bucket_index)
        );
        if let Some(limit) = self.fetch_limit() {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }
}

/// Family columns of one stored family allele row
#[derive(Debug, Clone, Copy)]
pub struct FamilyRowView<'a> {
    pub family_id: &'a str,
    pub allele_in_roles: u64,
    pub allele_in_sexes: u64,
    pub allele_in_statuses: u64,
    pub inheritance_in_members: u64,
    pub zygosity_in_roles: u64,
}

/// Plain columns of one stored allele row
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    pub chromosome: &'a str,
    pub position: u64,
    pub end_position: Option<u64>,
    pub allele_index: usize,
    pub family: Option<FamilyRowView<'a>>,
}

/// Column-level predicate for scans that cannot run SQL
#[derive(Debug, Clone)]
pub struct RowPredicate {
    regions: Option<Vec<Region>>,
    include_reference: bool,
    family_ids: Option<BTreeSet<String>>,
    inheritance: Vec<Matcher>,
    roles: Option<Matcher>,
    sexes: Option<Matcher>,
    statuses: Option<Matcher>,
}

impl RowPredicate {
    pub fn new(filters: &CompiledFilters, families: &FamiliesData) -> Self {
        let query = filters.query();
        Self {
            regions: query.regions.clone(),
            include_reference: query.return_reference || query.return_unknown,
            family_ids: family_constraint(filters, families),
            inheritance: filters.inheritance_matchers().to_vec(),
            roles: filters.roles_matcher().cloned(),
            sexes: filters.sexes_matcher().cloned(),
            statuses: filters.statuses_matcher().cloned(),
        }
    }

    pub fn accepts(&self, row: &RowView<'_>) -> bool {
        if row.allele_index == 0 && !self.include_reference {
            return false;
        }
        if let Some(regions) = &self.regions {
            let end = row.end_position.unwrap_or(row.position);
            if !regions.iter().any(|region| region.intersects(row.chromosome, row.position, end)) {
                return false;
            }
        }
        let Some(family) = &row.family else {
            return true;
        };
        if let Some(family_ids) = &self.family_ids {
            if !family_ids.contains(family.family_id) {
                return false;
            }
        }
        // Matcher errors keep the row
        let keeps = |matcher: &Matcher, x: u64, y: Option<u64>| matcher.matches(x, y).unwrap_or(true);
        self.inheritance
            .iter()
            .all(|matcher| keeps(matcher, family.inheritance_in_members, None))
            && self
                .roles
                .as_ref()
                .map_or(true, |m| keeps(m, family.allele_in_roles, Some(family.zygosity_in_roles)))
            && self.sexes.as_ref().map_or(true, |m| keeps(m, family.allele_in_sexes, None))
            && self.statuses.as_ref().map_or(true, |m| keeps(m, family.allele_in_statuses, None))
    }
}
