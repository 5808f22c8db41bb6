// ==============================================================================
// parsers/mod.rs - Input parsers
// ==============================================================================
// Description: Parsers for attribute queries, gene effects, pedigrees and
//              contig lengths
// Author: Matt Barham
// Created: 2025-11-03
// Modified: 2025-11-16
// Version: 2.0.0
// ==============================================================================

pub mod attribute_query;
pub mod contigs;
pub mod effects;
pub mod pedigree;

pub use contigs::{ContigLengths, ContigLengthsParser, ContigParseError};
pub use pedigree::{PedigreeParseError, PedigreeParser};
