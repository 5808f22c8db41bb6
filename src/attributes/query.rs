// ==============================================================================
// attributes/query.rs - Attribute Query Compiler
// ==============================================================================
// Description: Compiles textual attribute queries into bitmask matchers or SQL
//              bit-test expressions for a given enum type
// Author: Matt Barham
// Created: 2025-11-14
// Modified: 2025-11-22
// Version: 1.0.0
// ==============================================================================

use std::collections::HashMap;
use std::marker::PhantomData;
use thiserror::Error;

use super::translator::{BitmaskEnumTranslator, TranslatorError};
use super::BitmaskEnum;
use crate::parsers::attribute_query::{parse_query, QueryNode, QueryParseError};
use crate::sql::Condition;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttributeQueryError {
    #[error("Invalid attribute query: {0}")]
    Syntax(#[from] QueryParseError),

    #[error("Unknown {type_name} value '{token}' in query '{query}'")]
    UnknownValue {
        type_name: &'static str,
        token: String,
        query: String,
    },

    #[error("Compound term '{0}' used without a complementary type")]
    CompoundWithoutComplement(String),

    #[error("Compound term '{0}' is not supported by the legacy SQL dialect")]
    CompoundNotSupported(String),

    #[error("Compound query '{0}' evaluated without a complementary mask")]
    MissingComplementaryMask(String),

    #[error("Range over '{0}' has a non-finite bound")]
    NonFiniteBound(String),

    #[error(transparent)]
    Translator(#[from] TranslatorError),
}

/// SQL flavour of bit tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDialect {
    /// `(column & mask) != 0`
    #[default]
    Standard,
    /// `BITAND(column, mask) != 0`, compounds unsupported
    Legacy,
}

/// Bitmask columns a query is bound to
#[derive(Debug, Clone, PartialEq)]
pub struct BitmaskColumns {
    pub main: String,
    pub complementary: Option<String>,
}

impl BitmaskColumns {
    pub fn new(main: impl Into<String>) -> Self {
        Self { main: main.into(), complementary: None }
    }

    pub fn with_complementary(mut self, column: impl Into<String>) -> Self {
        self.complementary = Some(column.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Resolved {
    Bits(u64),
    Compound { main: u64, packed: u64, text: String },
    Not(Box<Resolved>),
    And(Vec<Resolved>),
    Or(Vec<Resolved>),
}

impl Resolved {
    fn evaluate(&self, x: u64, y: Option<u64>, query: &str) -> Result<bool, AttributeQueryError> {
        Ok(match self {
            Resolved::Bits(bits) => x & bits != 0,
            Resolved::Compound { main, packed, .. } => {
                let y = y.ok_or_else(|| AttributeQueryError::MissingComplementaryMask(query.to_string()))?;
                x & main != 0 && y & packed != 0
            }
            Resolved::Not(inner) => !inner.evaluate(x, y, query)?,
            Resolved::And(nodes) => {
                for node in nodes {
                    if !node.evaluate(x, y, query)? {
                        return Ok(false);
                    }
                }
                true
            }
            Resolved::Or(nodes) => {
                for node in nodes {
                    if node.evaluate(x, y, query)? {
                        return Ok(true);
                    }
                }
                false
            }
        })
    }

    fn has_compounds(&self) -> bool {
        match self {
            Resolved::Bits(_) => false,
            Resolved::Compound { .. } => true,
            Resolved::Not(inner) => inner.has_compounds(),
            Resolved::And(nodes) | Resolved::Or(nodes) => nodes.iter().any(Resolved::has_compounds),
        }
    }

    fn to_condition(&self, columns: &BitmaskColumns, dialect: SqlDialect) -> Result<Condition, AttributeQueryError> {
        Ok(match self {
            Resolved::Bits(bits) => bit_test(&columns.main, *bits, dialect),
            Resolved::Compound { main, packed, text } => {
                if dialect == SqlDialect::Legacy {
                    return Err(AttributeQueryError::CompoundNotSupported(text.clone()));
                }
                let complementary = columns
                    .complementary
                    .as_deref()
                    .ok_or_else(|| AttributeQueryError::CompoundWithoutComplement(text.clone()))?;
                Condition::and([
                    bit_test(&columns.main, *main, dialect),
                    bit_test(complementary, *packed, dialect),
                ])
            }
            Resolved::Not(inner) => Condition::negate(inner.to_condition(columns, dialect)?),
            Resolved::And(nodes) => Condition::and(
                nodes
                    .iter()
                    .map(|node| node.to_condition(columns, dialect))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Resolved::Or(nodes) => Condition::or(
                nodes
                    .iter()
                    .map(|node| node.to_condition(columns, dialect))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        })
    }
}

fn bit_test(column: &str, mask: u64, dialect: SqlDialect) -> Condition {
    match dialect {
        SqlDialect::Standard => Condition::raw(format!("({} & {}) != 0", column, mask)),
        SqlDialect::Legacy => Condition::raw(format!("BITAND({}, {}) != 0", column, mask)),
    }
}

/// Compiled predicate over a primary mask `x` and optional complementary mask `y`
#[derive(Debug, Clone, PartialEq)]
pub struct Matcher {
    query: String,
    root: Resolved,
}

impl Matcher {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn has_compounds(&self) -> bool {
        self.root.has_compounds()
    }

    /// Evaluate against `x`; compound terms require `y`
    pub fn matches(&self, x: u64, y: Option<u64>) -> Result<bool, AttributeQueryError> {
        self.root.evaluate(x, y, &self.query)
    }
}

#[derive(Debug, Clone)]
struct Complement {
    type_name: &'static str,
    lookup: HashMap<String, u64>,
    translator: BitmaskEnumTranslator,
}

/// Compiler bound to one enum type, its aliases and an optional complementary type
///
/// # Examples
/// ```
/// use variant_store::attributes::{AttributeQueryCompiler, BitmaskEnum, Role};
///
/// let compiler = AttributeQueryCompiler::<Role>::new();
/// let matcher = compiler.matcher("prb and not sib").unwrap();
/// assert!(matcher.matches(Role::Prb.as_bitmask(), None).unwrap());
/// assert!(!matcher.matches(Role::to_bitmask([Role::Prb, Role::Sib]), None).unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct AttributeQueryCompiler<E: BitmaskEnum> {
    lookup: HashMap<String, (u64, usize)>,
    complement: Option<Complement>,
    _enum: PhantomData<E>,
}

impl<E: BitmaskEnum> Default for AttributeQueryCompiler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BitmaskEnum> AttributeQueryCompiler<E> {
    pub fn new() -> Self {
        let mut lookup = HashMap::new();
        for value in E::values() {
            let entry = (value.as_bitmask(), value.ordinal());
            lookup.insert(value.name().to_lowercase(), entry);
            for alias in value.aliases() {
                lookup.insert(alias.to_lowercase(), entry);
            }
        }
        Self { lookup, complement: None, _enum: PhantomData }
    }

    /// Accept `alias` as a synonym for `value`
    pub fn with_alias(mut self, alias: &str, value: E) -> Self {
        self.lookup
            .insert(alias.trim().to_lowercase(), (value.as_bitmask(), value.ordinal()));
        self
    }

    /// Enable `main~complementary` compound terms over enum `C`
    pub fn with_complementary<C: BitmaskEnum>(mut self) -> Result<Self, AttributeQueryError> {
        let translator = BitmaskEnumTranslator::new::<E, C>()?;
        let mut lookup = HashMap::new();
        for value in C::values() {
            lookup.insert(value.name().to_lowercase(), value.as_bitmask());
            for alias in value.aliases() {
                lookup.insert(alias.to_lowercase(), value.as_bitmask());
            }
        }
        self.complement = Some(Complement { type_name: C::TYPE_NAME, lookup, translator });
        Ok(self)
    }

    pub fn translator(&self) -> Option<&BitmaskEnumTranslator> {
        self.complement.as_ref().map(|complement| &complement.translator)
    }

    /// Compile `query` into a matcher
    pub fn matcher(&self, query: &str) -> Result<Matcher, AttributeQueryError> {
        Ok(Matcher { query: query.to_string(), root: self.resolve_query(query)? })
    }

    /// Compile `query` into a SQL condition over `columns`
    pub fn sql(
        &self,
        query: &str,
        columns: &BitmaskColumns,
        dialect: SqlDialect,
    ) -> Result<Condition, AttributeQueryError> {
        self.resolve_query(query)?.to_condition(columns, dialect)
    }

    fn resolve_query(&self, query: &str) -> Result<Resolved, AttributeQueryError> {
        // Single known literal skips the grammar entirely
        if let Some((bits, _)) = self.lookup.get(&query.trim().to_lowercase()) {
            return Ok(Resolved::Bits(*bits));
        }
        let node = parse_query(query)?;
        self.resolve(&node, query)
    }

    fn resolve(&self, node: &QueryNode, query: &str) -> Result<Resolved, AttributeQueryError> {
        Ok(match node {
            QueryNode::Literal(name) => Resolved::Bits(self.main_value(name, query)?.0),
            QueryNode::Compound(main, complementary) => {
                let text = format!("{}~{}", main, complementary);
                let complement = self
                    .complement
                    .as_ref()
                    .ok_or_else(|| AttributeQueryError::CompoundWithoutComplement(text.clone()))?;
                let (main_bits, ordinal) = self.main_value(main, query)?;
                let complementary_bits = complement
                    .lookup
                    .get(&complementary.to_lowercase())
                    .copied()
                    .ok_or_else(|| AttributeQueryError::UnknownValue {
                        type_name: complement.type_name,
                        token: complementary.clone(),
                        query: query.to_string(),
                    })?;
                Resolved::Compound {
                    main: main_bits,
                    packed: complement.translator.apply_mask(0, complementary_bits, ordinal),
                    text,
                }
            }
            QueryNode::Not(inner) => Resolved::Not(Box::new(self.resolve(inner, query)?)),
            QueryNode::And(nodes) => Resolved::And(
                nodes.iter().map(|n| self.resolve(n, query)).collect::<Result<_, _>>()?,
            ),
            QueryNode::Or(nodes) => Resolved::Or(
                nodes.iter().map(|n| self.resolve(n, query)).collect::<Result<_, _>>()?,
            ),
        })
    }

    fn main_value(&self, name: &str, query: &str) -> Result<(u64, usize), AttributeQueryError> {
        self.lookup
            .get(&name.to_lowercase())
            .copied()
            .ok_or_else(|| AttributeQueryError::UnknownValue {
                type_name: E::TYPE_NAME,
                token: name.to_string(),
                query: query.to_string(),
            })
    }
}
