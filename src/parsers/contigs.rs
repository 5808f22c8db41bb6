// ==============================================================================
// parsers/contigs.rs - Contig Lengths Parser
// ==============================================================================
// Description: Reads reference genome chromosome lengths for partition bin math
// Author: Matt Barham
// Created: 2025-11-16
// Modified: 2025-11-16
// Version: 1.0.0
// ==============================================================================
// Format: TSV without header, one contig per line in genome order
// Example:
//   chr1	248956422
//   chr2	242193529
// ==============================================================================

use csv::ReaderBuilder;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContigParseError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Invalid contig line {line}: '{content}'")]
    InvalidLine { line: usize, content: String },

    #[error("No contigs found")]
    EmptyFile,
}

/// Contig lengths in genome order
pub type ContigLengths = Vec<(String, u64)>;

/// Contig lengths TSV parser
pub struct ContigLengthsParser;

impl ContigLengthsParser {
    pub fn parse(path: impl AsRef<Path>) -> Result<ContigLengths, ContigParseError> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::parse_reader(file)
    }

    pub fn parse_reader<R: Read>(reader: R) -> Result<ContigLengths, ContigParseError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(reader);

        let mut contigs = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let record = result?;
            let invalid = || ContigParseError::InvalidLine {
                line: idx + 1,
                content: record.iter().collect::<Vec<_>>().join("\t"),
            };
            let name = record.get(0).map(str::trim).filter(|n| !n.is_empty()).ok_or_else(invalid)?;
            let length = record
                .get(1)
                .and_then(|value| value.trim().parse::<u64>().ok())
                .filter(|length| *length > 0)
                .ok_or_else(invalid)?;
            contigs.push((name.to_string(), length));
        }

        if contigs.is_empty() {
            return Err(ContigParseError::EmptyFile);
        }
        Ok(contigs)
    }
}
