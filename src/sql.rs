// ==============================================================================
// sql.rs - SQL Condition Tree
// ==============================================================================
// Description: Small expression tree for WHERE clauses shared by the attribute
//              query compiler and the query builder
// Author: Matt Barham
// Created: 2025-11-15
// Modified: 2025-11-19
// Version: 1.0.0
// ==============================================================================

use std::fmt;

/// Boolean SQL condition
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    True,
    False,
    Raw(String),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn raw(sql: impl Into<String>) -> Self {
        Condition::Raw(sql.into())
    }

    /// Conjunction; `True` operands are dropped, any `False` wins
    pub fn and(conditions: impl IntoIterator<Item = Condition>) -> Self {
        let mut parts = Vec::new();
        for condition in conditions {
            match condition {
                Condition::True => {}
                Condition::False => return Condition::False,
                Condition::And(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Condition::True,
            1 => parts.remove(0),
            _ => Condition::And(parts),
        }
    }

    /// Disjunction; `False` operands are dropped, any `True` wins
    pub fn or(conditions: impl IntoIterator<Item = Condition>) -> Self {
        let mut parts = Vec::new();
        for condition in conditions {
            match condition {
                Condition::False => {}
                Condition::True => return Condition::True,
                Condition::Or(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Condition::False,
            1 => parts.remove(0),
            _ => Condition::Or(parts),
        }
    }

    pub fn negate(condition: Condition) -> Self {
        match condition {
            Condition::True => Condition::False,
            Condition::False => Condition::True,
            Condition::Not(inner) => *inner,
            other => Condition::Not(Box::new(other)),
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Condition::True)
    }

    pub fn to_sql(&self) -> String {
        match self {
            Condition::True => "1 = 1".to_string(),
            Condition::False => "1 = 0".to_string(),
            Condition::Raw(sql) => sql.clone(),
            Condition::And(parts) => join(parts, " AND "),
            Condition::Or(parts) => join(parts, " OR "),
            Condition::Not(inner) => format!("NOT ({})", inner.to_sql()),
        }
    }
}

fn join(parts: &[Condition], separator: &str) -> String {
    parts
        .iter()
        .map(|part| format!("({})", part.to_sql()))
        .collect::<Vec<_>>()
        .join(separator)
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

/// Quote a string literal, doubling embedded single quotes
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `column IN (...)` over quoted strings; empty input never matches
pub fn in_strings<'a>(column: &str, values: impl IntoIterator<Item = &'a str>) -> Condition {
    let values: Vec<String> = values.into_iter().map(quote).collect();
    in_list(column, values)
}

/// `column IN (...)` over integers; empty input never matches
pub fn in_numbers<T: fmt::Display>(column: &str, values: impl IntoIterator<Item = T>) -> Condition {
    let values: Vec<String> = values.into_iter().map(|value| value.to_string()).collect();
    in_list(column, values)
}

fn in_list(column: &str, values: Vec<String>) -> Condition {
    match values.len() {
        0 => Condition::False,
        1 => Condition::raw(format!("{} = {}", column, values[0])),
        _ => Condition::raw(format!("{} IN ({})", column, values.join(", "))),
    }
}
