// ==============================================================================
// attributes/mod.rs - Bitmask Attribute Enumerations
// ==============================================================================
// Description: Role, sex, status, inheritance, variant type and zygosity enums
//              where every value owns one distinct power-of-two bit
// Author: Matt Barham
// Created: 2025-11-14
// Modified: 2025-11-21
// Version: 1.0.0
// ==============================================================================
// Encoding:
//   - Each value maps to exactly one bit (1 << n)
//   - Several simultaneous values are stored as the OR of their bits
//   - 0 is the "none / unspecified" mask
// ==============================================================================

pub mod query;
pub mod translator;

use std::fmt::Debug;
use std::hash::Hash;
use thiserror::Error;

pub use query::{AttributeQueryCompiler, AttributeQueryError, BitmaskColumns, Matcher, SqlDialect};
pub use translator::BitmaskEnumTranslator;

/// Errors raised when a name does not resolve to an enum value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttributeError {
    #[error("Unknown {type_name} value: '{value}'")]
    UnknownValue { type_name: &'static str, value: String },
}

/// Capability shared by every bitmask attribute enum
///
/// Implementors are generated with `bitmask_enum!`, which guarantees one
/// distinct bit per value, assigned in declaration order.
pub trait BitmaskEnum: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Name used in error messages and query diagnostics
    const TYPE_NAME: &'static str;

    /// All values in declaration (bit) order
    fn values() -> &'static [Self];

    /// Canonical lowercase name
    fn name(self) -> &'static str;

    /// Alternative spellings accepted by `from_name`
    fn aliases(self) -> &'static [&'static str];

    /// Single-bit value
    fn as_bitmask(self) -> u64;

    /// Position of the value in declaration order
    fn ordinal(self) -> usize {
        Self::values()
            .iter()
            .position(|value| *value == self)
            .unwrap_or_default()
    }

    /// Case-insensitive lookup by name or alias
    fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::values().iter().copied().find(|value| {
            value.name().eq_ignore_ascii_case(name)
                || value.aliases().iter().any(|alias| alias.eq_ignore_ascii_case(name))
        })
    }

    /// Lookup by single-bit value
    fn from_value(bit: u64) -> Option<Self> {
        Self::values().iter().copied().find(|value| value.as_bitmask() == bit)
    }

    /// Decode every value whose bit is set in `mask`
    fn from_bitmask(mask: u64) -> Vec<Self> {
        Self::values()
            .iter()
            .copied()
            .filter(|value| mask & value.as_bitmask() != 0)
            .collect()
    }

    /// OR together the bits of `values`
    fn to_bitmask<I: IntoIterator<Item = Self>>(values: I) -> u64 {
        values.into_iter().fold(0, |mask, value| mask | value.as_bitmask())
    }

    /// Number of bits the enum occupies
    fn bit_width() -> usize {
        Self::values().len()
    }

    /// Like `from_name` but with a descriptive error
    fn parse_name(name: &str) -> Result<Self, AttributeError> {
        Self::from_name(name).ok_or_else(|| AttributeError::UnknownValue {
            type_name: Self::TYPE_NAME,
            value: name.to_string(),
        })
    }
}

/// Declares a bitmask enum with names, aliases and serde support.
macro_rules! bitmask_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident: $type_name:literal {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $bit:literal => $label:literal $(| $alias:literal)*
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl $crate::attributes::BitmaskEnum for $name {
            const TYPE_NAME: &'static str = $type_name;

            fn values() -> &'static [Self] {
                Self::ALL
            }

            fn name(self) -> &'static str {
                self.as_str()
            }

            fn aliases(self) -> &'static [&'static str] {
                match self {
                    $($name::$variant => &[$($alias),*]),+
                }
            }

            fn as_bitmask(self) -> u64 {
                match self {
                    $($name::$variant => 1u64 << $bit),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::attributes::AttributeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <Self as $crate::attributes::BitmaskEnum>::parse_name(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let name = String::deserialize(deserializer)?;
                name.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

bitmask_enum! {
    /// Family member role relative to the proband
    pub enum Role: "role" {
        MaternalGrandmother = 0 => "maternal_grandmother",
        MaternalGrandfather = 1 => "maternal_grandfather",
        PaternalGrandmother = 2 => "paternal_grandmother",
        PaternalGrandfather = 3 => "paternal_grandfather",
        Mom = 4 => "mom" | "mother",
        Dad = 5 => "dad" | "father",
        Parent = 6 => "parent",
        Prb = 7 => "prb" | "proband",
        Sib = 8 => "sib" | "sibling",
        Child = 9 => "child",
        MaternalHalfSibling = 10 => "maternal_half_sibling",
        PaternalHalfSibling = 11 => "paternal_half_sibling",
        HalfSibling = 12 => "half_sibling",
        MaternalAunt = 13 => "maternal_aunt",
        MaternalUncle = 14 => "maternal_uncle",
        PaternalAunt = 15 => "paternal_aunt",
        PaternalUncle = 16 => "paternal_uncle",
        MaternalCousin = 17 => "maternal_cousin",
        PaternalCousin = 18 => "paternal_cousin",
        StepMom = 19 => "step_mom",
        StepDad = 20 => "step_dad",
        Spouse = 21 => "spouse",
        Unknown = 22 => "unknown",
    }
}

bitmask_enum! {
    /// Member sex; pedigree files use 1/2/0 or M/F/U
    pub enum Sex: "sex" {
        Male = 0 => "male" | "M" | "1",
        Female = 1 => "female" | "F" | "2",
        Unspecified = 2 => "unspecified" | "U" | "0",
    }
}

bitmask_enum! {
    /// Affected status; pedigree files use 1/2/0
    pub enum Status: "status" {
        Unaffected = 0 => "unaffected" | "1",
        Affected = 1 => "affected" | "2",
        Unspecified = 2 => "unspecified" | "0" | "-",
    }
}

bitmask_enum! {
    /// Inheritance classification of an allele in one family member
    pub enum Inheritance: "inheritance" {
        Reference = 0 => "reference",
        Mendelian = 1 => "mendelian",
        Denovo = 2 => "denovo",
        PossibleDenovo = 3 => "possible_denovo",
        Omission = 4 => "omission",
        PossibleOmission = 5 => "possible_omission",
        Other = 6 => "other",
        Missing = 7 => "missing",
        Unknown = 8 => "unknown",
    }
}

bitmask_enum! {
    /// Allele variant type
    pub enum VariantType: "variant_type" {
        Substitution = 0 => "substitution" | "sub",
        Insertion = 1 => "insertion" | "ins",
        Deletion = 2 => "deletion" | "del",
        Comp = 3 => "comp" | "complex",
        CnvPlus = 4 => "cnv_plus" | "CNV+",
        CnvMinus = 5 => "cnv_minus" | "CNV-",
    }
}

bitmask_enum! {
    /// Copies of an allele carried by a member
    pub enum Zygosity: "zygosity" {
        Homozygous = 0 => "homozygous" | "hom",
        Heterozygous = 1 => "heterozygous" | "het",
    }
}

impl VariantType {
    /// CSHL short form used in variant details (sub, ins, del, comp, CNV+, CNV-)
    pub fn short_name(&self) -> &'static str {
        match self {
            VariantType::Substitution => "sub",
            VariantType::Insertion => "ins",
            VariantType::Deletion => "del",
            VariantType::Comp => "comp",
            VariantType::CnvPlus => "CNV+",
            VariantType::CnvMinus => "CNV-",
        }
    }

    pub fn is_cnv(&self) -> bool {
        matches!(self, VariantType::CnvPlus | VariantType::CnvMinus)
    }
}
