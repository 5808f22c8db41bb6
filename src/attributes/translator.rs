// ==============================================================================
// attributes/translator.rs - Complementary Bitmask Packing
// ==============================================================================
// Description: Packs one complementary enum value per main-enum position into a
//              single 64-bit mask (e.g. zygosity per role)
// Author: Matt Barham
// Created: 2025-11-14
// Modified: 2025-11-14
// Version: 1.0.0
// ==============================================================================
// Layout:
//   mask |= complementary_bit << (W * ordinal(main_value))
//   W = bit width of the complementary enum
// ==============================================================================

use thiserror::Error;

use super::BitmaskEnum;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslatorError {
    #[error("Packing {complementary} per {main} needs {bits} bits, more than 64")]
    MaskOverflow {
        main: &'static str,
        complementary: &'static str,
        bits: usize,
    },
}

/// Translates (main value, complementary value) pairs to packed mask bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmaskEnumTranslator {
    main_type: &'static str,
    complementary_type: &'static str,
    width: usize,
    positions: usize,
}

impl BitmaskEnumTranslator {
    /// Translator partitioning `C` values by `M` positions
    pub fn new<M: BitmaskEnum, C: BitmaskEnum>() -> Result<Self, TranslatorError> {
        let width = C::bit_width();
        let positions = M::bit_width();
        let bits = width * positions;
        if bits > 64 {
            return Err(TranslatorError::MaskOverflow {
                main: M::TYPE_NAME,
                complementary: C::TYPE_NAME,
                bits,
            });
        }
        Ok(Self {
            main_type: M::TYPE_NAME,
            complementary_type: C::TYPE_NAME,
            width,
            positions,
        })
    }

    pub fn main_type(&self) -> &'static str {
        self.main_type
    }

    pub fn complementary_type(&self) -> &'static str {
        self.complementary_type
    }

    /// Set `complementary_bits` in the slot of main position `ordinal`
    pub fn apply_mask(&self, mask: u64, complementary_bits: u64, ordinal: usize) -> u64 {
        if ordinal >= self.positions {
            return mask;
        }
        mask | (complementary_bits << (self.width * ordinal))
    }

    /// Typed variant of `apply_mask`
    pub fn apply<M: BitmaskEnum, C: BitmaskEnum>(&self, mask: u64, main: M, complementary: C) -> u64 {
        self.apply_mask(mask, complementary.as_bitmask(), main.ordinal())
    }

    /// Complementary bits stored in the slot of main position `ordinal`
    pub fn unpack(&self, mask: u64, ordinal: usize) -> u64 {
        if ordinal >= self.positions {
            return 0;
        }
        let slot = if self.width >= 64 { u64::MAX } else { (1u64 << self.width) - 1 };
        (mask >> (self.width * ordinal)) & slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{Inheritance, Role, Status, Zygosity};

    #[test]
    fn test_role_zygosity_fits() {
        let translator = BitmaskEnumTranslator::new::<Role, Zygosity>().unwrap();
        let mask = translator.apply(0, Role::Prb, Zygosity::Heterozygous);
        let mask = translator.apply(mask, Role::Mom, Zygosity::Homozygous);

        assert_eq!(translator.unpack(mask, Role::Prb.ordinal()), Zygosity::Heterozygous.as_bitmask());
        assert_eq!(translator.unpack(mask, Role::Mom.ordinal()), Zygosity::Homozygous.as_bitmask());
        // Untouched slot stays empty
        assert_eq!(translator.unpack(mask, Role::Dad.ordinal()), 0);
    }

    #[test]
    fn test_role_inheritance_overflows() {
        // 23 roles x 9 inheritance bits
        let err = BitmaskEnumTranslator::new::<Role, Inheritance>().unwrap_err();
        assert_eq!(
            err,
            TranslatorError::MaskOverflow { main: "role", complementary: "inheritance", bits: 207 }
        );
    }

    #[test]
    fn test_status_inheritance_packing() {
        let translator = BitmaskEnumTranslator::new::<Status, Inheritance>().unwrap();
        let mask = translator.apply(0, Status::Affected, Inheritance::Denovo);
        assert_eq!(mask, Inheritance::Denovo.as_bitmask() << 9);
    }
}
