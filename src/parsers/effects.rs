// ==============================================================================
// parsers/effects.rs - Gene Effect Annotation Parser
// ==============================================================================
// Description: Parses per-allele gene effect strings into structured gene and
//              transcript effects, and expands effect-type groups
// Author: Matt Barham
// Created: 2025-11-15
// Modified: 2025-11-15
// Version: 1.0.0
// ==============================================================================
// Format:
//   <worst>!<gene>:<effect>|<gene>:<effect>!<tid>:<gene>:<effect>:<details>|...
//   e.g. missense!SAMD11:missense!NM_152486_1:SAMD11:missense:27/68(Ala->Val)
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EffectParseError {
    #[error("Effect string '{0}' must have three '!'-separated sections")]
    Sections(String),

    #[error("Malformed transcript effect '{0}'")]
    Transcript(String),
}

/// Effect of an allele on one gene
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EffectGene {
    pub symbol: Option<String>,
    pub effect: String,
}

impl fmt::Display for EffectGene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.symbol {
            Some(symbol) => write!(f, "{}:{}", symbol, self.effect),
            None => f.write_str(&self.effect),
        }
    }
}

/// Effect of an allele on one transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectTranscript {
    pub transcript_id: String,
    pub gene: Option<String>,
    pub effect: String,
    pub details: Option<String>,
}

/// Parsed gene effects of one allele
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlleleEffects {
    pub worst: String,
    pub genes: Vec<EffectGene>,
    pub transcripts: BTreeMap<String, EffectTranscript>,
}

impl AlleleEffects {
    /// Effect types over all genes
    pub fn types(&self) -> BTreeSet<&str> {
        self.genes.iter().map(|gene| gene.effect.as_str()).collect()
    }

    /// Gene symbols with at least one effect
    pub fn symbols(&self) -> BTreeSet<&str> {
        self.genes.iter().filter_map(|gene| gene.symbol.as_deref()).collect()
    }
}

impl FromStr for AlleleEffects {
    type Err = EffectParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sections: Vec<&str> = s.trim().split('!').collect();
        if sections.len() != 3 || sections[0].is_empty() {
            return Err(EffectParseError::Sections(s.to_string()));
        }

        let genes = sections[1]
            .split('|')
            .filter(|part| !part.is_empty())
            .map(|part| match part.split_once(':') {
                Some((symbol, effect)) => EffectGene {
                    symbol: non_empty(symbol),
                    effect: effect.to_string(),
                },
                None => EffectGene { symbol: None, effect: part.to_string() },
            })
            .collect();

        let mut transcripts = BTreeMap::new();
        for part in sections[2].split('|').filter(|part| !part.is_empty()) {
            let fields: Vec<&str> = part.splitn(4, ':').collect();
            if fields.len() < 3 || fields[0].is_empty() {
                return Err(EffectParseError::Transcript(part.to_string()));
            }
            let transcript = EffectTranscript {
                transcript_id: fields[0].to_string(),
                gene: non_empty(fields[1]),
                effect: fields[2].to_string(),
                details: fields.get(3).and_then(|details| non_empty(details)),
            };
            transcripts.insert(transcript.transcript_id.clone(), transcript);
        }

        Ok(Self { worst: sections[0].to_string(), genes, transcripts })
    }
}

impl fmt::Display for AlleleEffects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let genes: Vec<String> = self.genes.iter().map(EffectGene::to_string).collect();
        let transcripts: Vec<String> = self
            .transcripts
            .values()
            .map(|t| {
                format!(
                    "{}:{}:{}:{}",
                    t.transcript_id,
                    t.gene.as_deref().unwrap_or(""),
                    t.effect,
                    t.details.as_deref().unwrap_or("")
                )
            })
            .collect();
        write!(f, "{}!{}!{}", self.worst, genes.join("|"), transcripts.join("|"))
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

const LGDS: &[&str] = &["frame-shift", "nonsense", "splice-site", "no-frame-shift-newStop"];

const NONSYNONYMOUS: &[&str] = &[
    "nonsense",
    "frame-shift",
    "splice-site",
    "no-frame-shift-newStop",
    "missense",
    "noStart",
    "noEnd",
    "no-frame-shift",
];

const CODING: &[&str] = &[
    "nonsense",
    "frame-shift",
    "splice-site",
    "no-frame-shift-newStop",
    "missense",
    "no-frame-shift",
    "noStart",
    "noEnd",
    "synonymous",
    "coding_unknown",
];

const NONCODING: &[&str] = &[
    "non-coding",
    "intron",
    "intergenic",
    "3'UTR",
    "3'UTR-intron",
    "5'UTR",
    "5'UTR-intron",
    "non-coding-intron",
];

const CNV: &[&str] = &["CNV+", "CNV-"];

/// Members of a named effect group, if `name` is one
pub fn effect_group(name: &str) -> Option<&'static [&'static str]> {
    match name.to_ascii_lowercase().as_str() {
        "lgds" => Some(LGDS),
        "nonsynonymous" => Some(NONSYNONYMOUS),
        "coding" => Some(CODING),
        "noncoding" => Some(NONCODING),
        "cnv" => Some(CNV),
        _ => None,
    }
}

/// Expand group names (LGDs, coding, ...) into concrete effect types
pub fn expand_effect_types<S: AsRef<str>>(effect_types: &[S]) -> BTreeSet<String> {
    let mut expanded = BTreeSet::new();
    for effect_type in effect_types {
        let effect_type = effect_type.as_ref().trim();
        if effect_type.is_empty() {
            continue;
        }
        match effect_group(effect_type) {
            Some(members) => expanded.extend(members.iter().map(|m| m.to_string())),
            None => {
                expanded.insert(effect_type.to_string());
            }
        }
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    const MISSENSE: &str = "missense!SAMD11:missense|NOC2L:intron!NM_152486_1:SAMD11:missense:27/68(Ala->Val)|NM_015658_1:NOC2L:intron:";

    #[test]
    fn test_parse_gene_and_transcript_effects() {
        let effects: AlleleEffects = MISSENSE.parse().unwrap();
        assert_eq!(effects.worst, "missense");
        assert_eq!(effects.genes.len(), 2);
        assert_eq!(effects.genes[0].symbol.as_deref(), Some("SAMD11"));
        assert_eq!(effects.types(), ["intron", "missense"].into_iter().collect());
        assert_eq!(effects.symbols(), ["NOC2L", "SAMD11"].into_iter().collect());

        let transcript = &effects.transcripts["NM_152486_1"];
        assert_eq!(transcript.details.as_deref(), Some("27/68(Ala->Val)"));
        // Empty details become None
        assert_eq!(effects.transcripts["NM_015658_1"].details, None);
    }

    #[test]
    fn test_intergenic_without_symbol() {
        let effects: AlleleEffects = "intergenic!intergenic!".parse().unwrap();
        assert_eq!(effects.genes, vec![EffectGene { symbol: None, effect: "intergenic".to_string() }]);
        assert!(effects.transcripts.is_empty());
    }

    #[test]
    fn test_display_round_trip() {
        let effects: AlleleEffects = MISSENSE.parse().unwrap();
        let reparsed: AlleleEffects = effects.to_string().parse().unwrap();
        assert_eq!(effects, reparsed);
    }

    #[test]
    fn test_malformed_strings() {
        assert!(matches!("missense".parse::<AlleleEffects>(), Err(EffectParseError::Sections(_))));
        assert!(matches!("a!b:c!broken".parse::<AlleleEffects>(), Err(EffectParseError::Transcript(_))));
    }

    #[test]
    fn test_expand_groups() {
        let expanded = expand_effect_types(&["LGDs", "synonymous"]);
        assert!(expanded.contains("nonsense"));
        assert!(expanded.contains("frame-shift"));
        assert!(expanded.contains("synonymous"));
        assert!(!expanded.contains("missense"));
        assert_eq!(expand_effect_types(&["cnv"]).len(), 2);
    }
}
