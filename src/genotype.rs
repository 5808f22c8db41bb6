// ==============================================================================
// genotype.rs - Family Genotype Matrix
// ==============================================================================
// Description: 2xN genotype matrix of one family, best-state derivation and
//              trio inheritance classification
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2025-11-24
// Version: 2.0.0
// ==============================================================================
// Algorithm:
//   best_state[a][m]  = copies of allele a carried by member m (a >= 1)
//   best_state[0][m]  = 2 - sum of alt copies
//   member with any unknown (-1) call → whole column is -1
//
//   Inheritance of allele A in a child with parents (p1, p2):
//   - any -1 in the trio           → unknown
//   - A absent from the trio       → missing
//   - mendelian / denovo / omission / other, checked in that order
//   - child lacks A (not omission) → missing
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::attributes::{Inheritance, Zygosity};
use crate::pedigree::Trio;

/// Errors that can occur while building a genotype matrix
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenotypeError {
    #[error("Genotype rows differ in length: {0} vs {1}")]
    RowLengthMismatch(usize, usize),

    #[error("Invalid genotype call: '{0}' (expected e.g. '0/1' or './.')")]
    InvalidCall(String),
}

/// Genotype of one family: two chromosome copies x members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genotype {
    rows: [Vec<i8>; 2],
}

impl Genotype {
    pub fn new(first: Vec<i8>, second: Vec<i8>) -> Result<Self, GenotypeError> {
        if first.len() != second.len() {
            return Err(GenotypeError::RowLengthMismatch(first.len(), second.len()));
        }
        Ok(Self { rows: [first, second] })
    }

    /// Build from per-member calls such as `["0/0", "0/1", "./."]`
    ///
    /// # Examples
    /// ```
    /// use variant_store::genotype::Genotype;
    ///
    /// let gt = Genotype::from_calls(&["0/0", "0/1", "./."]).unwrap();
    /// assert_eq!(gt.member(1), [0, 1]);
    /// assert_eq!(gt.member(2), [-1, -1]);
    /// ```
    pub fn from_calls<S: AsRef<str>>(calls: &[S]) -> Result<Self, GenotypeError> {
        let mut first = Vec::with_capacity(calls.len());
        let mut second = Vec::with_capacity(calls.len());
        for call in calls {
            let call = call.as_ref();
            let (a, b) = call
                .split_once(['/', '|'])
                .ok_or_else(|| GenotypeError::InvalidCall(call.to_string()))?;
            first.push(parse_allele(a, call)?);
            second.push(parse_allele(b, call)?);
        }
        Self::new(first, second)
    }

    pub fn members_count(&self) -> usize {
        self.rows[0].len()
    }

    /// Both copies of member `index`
    pub fn member(&self, index: usize) -> [i8; 2] {
        [self.rows[0][index], self.rows[1][index]]
    }

    pub fn rows(&self) -> &[Vec<i8>; 2] {
        &self.rows
    }

    fn calls(&self) -> impl Iterator<Item = i8> + '_ {
        self.rows[0].iter().chain(self.rows[1].iter()).copied()
    }

    /// Every call is unknown
    pub fn is_unknown(&self) -> bool {
        self.calls().all(|call| call == -1)
    }

    /// Only reference and unknown calls, at least one reference
    pub fn is_reference(&self) -> bool {
        self.calls().any(|call| call == 0) && self.calls().all(|call| call == 0 || call == -1)
    }

    /// Sorted distinct alternative allele indices present
    pub fn alt_alleles(&self) -> Vec<usize> {
        self.calls()
            .filter(|call| *call > 0)
            .map(|call| call as usize)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Copies of `allele` carried by member `index`
    pub fn allele_count(&self, index: usize, allele: usize) -> usize {
        self.member(index)
            .iter()
            .filter(|call| **call >= 0 && **call as usize == allele)
            .count()
    }

    pub fn has_unknown(&self, index: usize) -> bool {
        self.member(index).contains(&-1)
    }

    pub fn zygosity(&self, index: usize, allele: usize) -> Option<Zygosity> {
        match self.allele_count(index, allele) {
            2 => Some(Zygosity::Homozygous),
            1 => Some(Zygosity::Heterozygous),
            _ => None,
        }
    }

    /// Copy number per allele (rows) and member (columns)
    pub fn best_state(&self, allele_count: usize) -> Vec<Vec<i8>> {
        let members = self.members_count();
        let rows = allele_count.max(1);
        let mut state = vec![vec![0i8; members]; rows];

        for member in 0..members {
            if self.has_unknown(member) {
                for row in state.iter_mut() {
                    row[member] = -1;
                }
                continue;
            }
            let mut alt_copies = 0i8;
            for (allele, row) in state.iter_mut().enumerate().skip(1) {
                let copies = self.allele_count(member, allele) as i8;
                row[member] = copies;
                alt_copies += copies;
            }
            state[0][member] = 2 - alt_copies;
        }
        state
    }

    /// Inheritance of `allele` in every member; non-children are unknown
    pub fn inheritance_in_members(&self, trios: &[Trio], allele: usize) -> Vec<Inheritance> {
        let mut result = vec![Inheritance::Unknown; self.members_count()];
        for trio in trios {
            if trio.child >= result.len() || trio.mom >= result.len() || trio.dad >= result.len() {
                continue;
            }
            result[trio.child] = calc_inheritance_type(
                self.member(trio.mom),
                self.member(trio.dad),
                self.member(trio.child),
                allele,
            );
        }
        result
    }
}

fn parse_allele(value: &str, call: &str) -> Result<i8, GenotypeError> {
    match value.trim() {
        "." => Ok(-1),
        digits => digits
            .parse::<i8>()
            .ok()
            .filter(|allele| *allele >= -1)
            .ok_or_else(|| GenotypeError::InvalidCall(call.to_string())),
    }
}

/// Child copies each come from a different parent
pub fn check_mendelian_trio(p1: [i8; 2], p2: [i8; 2], child: [i8; 2]) -> bool {
    let m1 = p1.contains(&child[0]) && p2.contains(&child[1]);
    let m2 = p2.contains(&child[0]) && p1.contains(&child[1]);
    m1 || m2
}

/// Child carries an allele absent from both parents
pub fn check_denovo_trio(p1: [i8; 2], p2: [i8; 2], child: [i8; 2]) -> bool {
    child.iter().any(|call| !p1.contains(call) && !p2.contains(call))
}

/// A homozygous parent's allele was not passed to the child
pub fn check_omission_trio(p1: [i8; 2], p2: [i8; 2], child: [i8; 2]) -> bool {
    let p1_omitted = p1[0] == p1[1] && !child.contains(&p1[0]);
    let p2_omitted = p2[0] == p2[1] && !child.contains(&p2[0]);
    p1_omitted || p2_omitted
}

/// Classify `allele` in one trio
pub fn calc_inheritance_type(mom: [i8; 2], dad: [i8; 2], child: [i8; 2], allele: usize) -> Inheritance {
    let trio = [mom, dad, child];
    if trio.iter().flatten().any(|call| *call == -1) {
        return Inheritance::Unknown;
    }
    let allele = allele as i8;
    if !trio.iter().flatten().any(|call| *call == allele) {
        return Inheritance::Missing;
    }

    let inheritance = if check_mendelian_trio(mom, dad, child) {
        Inheritance::Mendelian
    } else if check_denovo_trio(mom, dad, child) {
        Inheritance::Denovo
    } else if check_omission_trio(mom, dad, child) {
        Inheritance::Omission
    } else {
        Inheritance::Other
    };

    if inheritance != Inheritance::Omission && !child.contains(&allele) {
        return Inheritance::Missing;
    }
    inheritance
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_trios() -> Vec<Trio> {
        vec![Trio { child: 2, mom: 0, dad: 1 }, Trio { child: 3, mom: 0, dad: 1 }]
    }

    #[test]
    fn test_from_calls() {
        let gt = Genotype::from_calls(&["0/0", "0|1", "./.", "1/2"]).unwrap();
        assert_eq!(gt.members_count(), 4);
        assert_eq!(gt.rows()[0], vec![0, 0, -1, 1]);
        assert_eq!(gt.rows()[1], vec![0, 1, -1, 2]);
        assert!(matches!(Genotype::from_calls(&["01"]), Err(GenotypeError::InvalidCall(_))));
        assert!(matches!(Genotype::new(vec![0], vec![0, 0]), Err(GenotypeError::RowLengthMismatch(1, 2))));
    }

    #[test]
    fn test_reference_and_unknown() {
        assert!(Genotype::from_calls(&["0/0", "./."]).unwrap().is_reference());
        assert!(!Genotype::from_calls(&["0/1", "0/0"]).unwrap().is_reference());
        assert!(Genotype::from_calls(&["./.", "./."]).unwrap().is_unknown());
        // All unknown is not reference
        assert!(!Genotype::from_calls(&["./.", "./."]).unwrap().is_reference());
    }

    #[test]
    fn test_alt_alleles_sorted_distinct() {
        let gt = Genotype::from_calls(&["2/0", "1/2", "./."]).unwrap();
        assert_eq!(gt.alt_alleles(), vec![1, 2]);
    }

    #[test]
    fn test_best_state() {
        let gt = Genotype::from_calls(&["0/0", "0/1", "1/1", "./1"]).unwrap();
        let state = gt.best_state(2);
        assert_eq!(state[0], vec![2, 1, 0, -1]);
        assert_eq!(state[1], vec![0, 1, 2, -1]);
    }

    #[test]
    fn test_zygosity() {
        let gt = Genotype::from_calls(&["1/1", "0/1", "0/0"]).unwrap();
        assert_eq!(gt.zygosity(0, 1), Some(Zygosity::Homozygous));
        assert_eq!(gt.zygosity(1, 1), Some(Zygosity::Heterozygous));
        assert_eq!(gt.zygosity(2, 1), None);
    }

    #[test]
    fn test_denovo_in_first_child() {
        let gt = Genotype::from_calls(&["0/0", "0/0", "0/1", "0/0"]).unwrap();
        let inheritance = gt.inheritance_in_members(&quad_trios(), 1);
        assert_eq!(
            inheritance,
            vec![Inheritance::Unknown, Inheritance::Unknown, Inheritance::Denovo, Inheritance::Missing]
        );
    }

    #[test]
    fn test_mendelian_transmission() {
        let gt = Genotype::from_calls(&["0/1", "0/0", "0/1", "0/0"]).unwrap();
        let inheritance = gt.inheritance_in_members(&quad_trios(), 1);
        assert_eq!(inheritance[2], Inheritance::Mendelian);
        // Sibling did not receive the allele
        assert_eq!(inheritance[3], Inheritance::Missing);
    }

    #[test]
    fn test_omission_and_unknown() {
        // Homozygous mom passes nothing of allele 1
        assert_eq!(calc_inheritance_type([1, 1], [0, 0], [0, 0], 1), Inheritance::Omission);
        assert_eq!(calc_inheritance_type([0, -1], [0, 0], [0, 1], 1), Inheritance::Unknown);
        assert_eq!(calc_inheritance_type([0, 0], [0, 0], [0, 0], 1), Inheritance::Missing);
    }
}
