// ==============================================================================
// parsers/pedigree.rs - Pedigree File Parser
// ==============================================================================
// Description: Loads tab-separated pedigree files into the families arena
// Author: Matt Barham
// Created: 2025-11-16
// Modified: 2025-11-16
// Version: 1.0.0
// ==============================================================================
// Format: TSV with header
// Example:
//   familyId  personId  dadId  momId  sex  status  role
//   f1        mom1      0      0      2    1       mom
//   f1        ch1       dad1   mom1   1    2       prb
// ==============================================================================

use csv::ReaderBuilder;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

use crate::attributes::{AttributeError, Role, Sex, Status};
use crate::pedigree::{FamiliesData, PedigreeError, Person};

#[derive(Error, Debug)]
pub enum PedigreeParseError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Pedigree row {row}: {source}")]
    InvalidValue { row: usize, source: AttributeError },

    #[error(transparent)]
    Pedigree(#[from] PedigreeError),
}

#[derive(Debug, Deserialize)]
struct PedigreeRow {
    #[serde(rename = "familyId")]
    family_id: String,
    #[serde(rename = "personId")]
    person_id: String,
    #[serde(rename = "dadId")]
    dad_id: String,
    #[serde(rename = "momId")]
    mom_id: String,
    sex: String,
    status: String,
    role: String,
}

fn parent_id(value: String) -> Option<String> {
    match value.trim() {
        "" | "0" | "-" => None,
        _ => Some(value),
    }
}

/// Pedigree TSV parser
pub struct PedigreeParser;

impl PedigreeParser {
    /// Parse a pedigree file from disk
    pub fn parse(path: impl AsRef<Path>) -> Result<FamiliesData, PedigreeParseError> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::parse_reader(file)
    }

    /// Parse pedigree rows from any reader
    pub fn parse_reader<R: Read>(reader: R) -> Result<FamiliesData, PedigreeParseError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut persons = Vec::new();
        for (idx, result) in reader.deserialize().enumerate() {
            let row: PedigreeRow = result?;
            let invalid = |source| PedigreeParseError::InvalidValue { row: idx + 1, source };

            persons.push(Person {
                sex: row.sex.parse::<Sex>().map_err(invalid)?,
                status: row.status.parse::<Status>().map_err(invalid)?,
                role: row.role.parse::<Role>().map_err(invalid)?,
                mom_id: parent_id(row.mom_id),
                dad_id: parent_id(row.dad_id),
                family_id: row.family_id,
                person_id: row.person_id,
            });
        }

        Ok(FamiliesData::from_persons(persons)?)
    }
}
