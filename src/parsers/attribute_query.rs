// ==============================================================================
// parsers/attribute_query.rs - Attribute Query Grammar
// ==============================================================================
// Description: Tokenizer and recursive-descent parser for boolean attribute
//              queries such as "prb and not sib" or "any(mom, dad)"
// Author: Matt Barham
// Created: 2025-11-14
// Modified: 2025-11-20
// Version: 1.0.0
// ==============================================================================
// Grammar (keywords case-insensitive):
//   query    := or_expr
//   or_expr  := and_expr ("or" and_expr)*
//   and_expr := not_expr ("and" not_expr)*
//   not_expr := "not" not_expr | primary
//   primary  := "(" query ")" | ("all" | "any") "(" list ")" | atom
//   list     := "[" atoms "]" | atoms
//   atom     := NAME ("~" NAME)?
// ==============================================================================

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryParseError {
    #[error("Empty attribute query")]
    Empty,

    #[error("Unexpected character '{character}' at offset {offset} in '{query}'")]
    UnexpectedCharacter {
        query: String,
        character: char,
        offset: usize,
    },

    #[error("Unexpected {found} in '{query}', expected {expected}")]
    UnexpectedToken {
        query: String,
        found: String,
        expected: &'static str,
    },

    #[error("Query '{0}' already contains compound terms")]
    AlreadyCompound(String),
}

/// Parsed query before enum resolution
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    Literal(String),
    Compound(String, String),
    Not(Box<QueryNode>),
    And(Vec<QueryNode>),
    Or(Vec<QueryNode>),
}

impl QueryNode {
    pub fn has_compounds(&self) -> bool {
        match self {
            QueryNode::Literal(_) => false,
            QueryNode::Compound(_, _) => true,
            QueryNode::Not(inner) => inner.has_compounds(),
            QueryNode::And(nodes) | QueryNode::Or(nodes) => nodes.iter().any(|n| n.has_compounds()),
        }
    }

    /// Replace every `a~b` with `a`
    pub fn strip_compounds(self) -> QueryNode {
        self.map_atoms(&|node| match node {
            QueryNode::Compound(main, _) => QueryNode::Literal(main),
            other => other,
        })
    }

    /// Replace every literal `a` with `a~value`
    pub fn with_compound(self, value: &str) -> QueryNode {
        self.map_atoms(&|node| match node {
            QueryNode::Literal(main) => QueryNode::Compound(main, value.to_string()),
            other => other,
        })
    }

    fn map_atoms(self, f: &dyn Fn(QueryNode) -> QueryNode) -> QueryNode {
        match self {
            QueryNode::Not(inner) => QueryNode::Not(Box::new(inner.map_atoms(f))),
            QueryNode::And(nodes) => QueryNode::And(nodes.into_iter().map(|n| n.map_atoms(f)).collect()),
            QueryNode::Or(nodes) => QueryNode::Or(nodes.into_iter().map(|n| n.map_atoms(f)).collect()),
            atom => f(atom),
        }
    }

    fn is_atom(&self) -> bool {
        matches!(self, QueryNode::Literal(_) | QueryNode::Compound(_, _))
    }
}

impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryNode::Literal(name) => f.write_str(name),
            QueryNode::Compound(main, complementary) => write!(f, "{}~{}", main, complementary),
            QueryNode::Not(inner) => {
                if inner.is_atom() || matches!(**inner, QueryNode::Not(_)) {
                    write!(f, "not {}", inner)
                } else {
                    write!(f, "not ({})", inner)
                }
            }
            QueryNode::And(nodes) => write_joined(f, nodes, " and ", |n| matches!(n, QueryNode::Or(_))),
            QueryNode::Or(nodes) => write_joined(f, nodes, " or ", |_| false),
        }
    }
}

fn write_joined(
    f: &mut fmt::Formatter<'_>,
    nodes: &[QueryNode],
    separator: &str,
    needs_parens: impl Fn(&QueryNode) -> bool,
) -> fmt::Result {
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        if needs_parens(node) {
            write!(f, "({})", node)?;
        } else {
            write!(f, "{}", node)?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    And,
    Or,
    Not,
    All,
    Any,
    Tilde,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Name(name) => format!("name '{}'", name),
            Token::And => "'and'".to_string(),
            Token::Or => "'or'".to_string(),
            Token::Not => "'not'".to_string(),
            Token::All => "'all'".to_string(),
            Token::Any => "'any'".to_string(),
            Token::Tilde => "'~'".to_string(),
            Token::Comma => "','".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::LBracket => "'['".to_string(),
            Token::RBracket => "']'".to_string(),
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '+' | '.')
}

fn tokenize(query: &str) -> Result<Vec<Token>, QueryParseError> {
    let mut tokens = Vec::new();
    let mut chars = query.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '~' | ',' | '(' | ')' | '[' | ']' => {
                chars.next();
                tokens.push(match c {
                    '~' => Token::Tilde,
                    ',' => Token::Comma,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    _ => Token::RBracket,
                });
            }
            c if is_name_char(c) => {
                let mut name = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if !is_name_char(c) {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                tokens.push(match name.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "all" => Token::All,
                    "any" => Token::Any,
                    _ => Token::Name(name),
                });
            }
            other => {
                return Err(QueryParseError::UnexpectedCharacter {
                    query: query.to_string(),
                    character: other,
                    offset,
                })
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    query: &'a str,
    tokens: Vec<Token>,
    position: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn error(&self, expected: &'static str) -> QueryParseError {
        QueryParseError::UnexpectedToken {
            query: self.query.to_string(),
            found: self
                .peek()
                .map(Token::describe)
                .unwrap_or_else(|| "end of query".to_string()),
            expected,
        }
    }

    fn expect(&mut self, token: Token, expected: &'static str) -> Result<(), QueryParseError> {
        if self.peek() == Some(&token) {
            self.position += 1;
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    fn parse_or(&mut self) -> Result<QueryNode, QueryParseError> {
        let mut nodes = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.advance();
            nodes.push(self.parse_and()?);
        }
        Ok(if nodes.len() == 1 { nodes.remove(0) } else { QueryNode::Or(nodes) })
    }

    fn parse_and(&mut self) -> Result<QueryNode, QueryParseError> {
        let mut nodes = vec![self.parse_not()?];
        while self.peek() == Some(&Token::And) {
            self.advance();
            nodes.push(self.parse_not()?);
        }
        Ok(if nodes.len() == 1 { nodes.remove(0) } else { QueryNode::And(nodes) })
    }

    fn parse_not(&mut self) -> Result<QueryNode, QueryParseError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            return Ok(QueryNode::Not(Box::new(self.parse_not()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<QueryNode, QueryParseError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.advance();
                let node = self.parse_or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(node)
            }
            Some(Token::All) | Some(Token::Any) => {
                let conjunction = self.advance() == Some(Token::All);
                self.expect(Token::LParen, "'(' after all/any")?;
                let bracketed = self.peek() == Some(&Token::LBracket);
                if bracketed {
                    self.advance();
                }
                let mut atoms = vec![self.parse_atom()?];
                while self.peek() == Some(&Token::Comma) {
                    self.advance();
                    atoms.push(self.parse_atom()?);
                }
                if bracketed {
                    self.expect(Token::RBracket, "']'")?;
                }
                self.expect(Token::RParen, "')'")?;
                Ok(match (atoms.len(), conjunction) {
                    (1, _) => atoms.remove(0),
                    (_, true) => QueryNode::And(atoms),
                    (_, false) => QueryNode::Or(atoms),
                })
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> Result<QueryNode, QueryParseError> {
        let main = match self.peek() {
            Some(Token::Name(name)) => name.clone(),
            _ => return Err(self.error("a value name")),
        };
        self.advance();
        if self.peek() != Some(&Token::Tilde) {
            return Ok(QueryNode::Literal(main));
        }
        self.advance();
        match self.peek() {
            Some(Token::Name(complementary)) => {
                let complementary = complementary.clone();
                self.advance();
                Ok(QueryNode::Compound(main, complementary))
            }
            _ => Err(self.error("a value name after '~'")),
        }
    }
}

/// Parse an attribute query into its syntax tree
pub fn parse_query(query: &str) -> Result<QueryNode, QueryParseError> {
    let tokens = tokenize(query)?;
    if tokens.is_empty() {
        return Err(QueryParseError::Empty);
    }
    let mut parser = Parser { query, tokens, position: 0 };
    let node = parser.parse_or()?;
    if parser.position != parser.tokens.len() {
        return Err(parser.error("end of query"));
    }
    Ok(node)
}

/// Rewrite `query` with every compound term reduced to its main value
pub fn strip_compounds(query: &str) -> Result<String, QueryParseError> {
    Ok(parse_query(query)?.strip_compounds().to_string())
}

/// Rewrite `query` binding every literal to the complementary `value`
pub fn add_compound(query: &str, value: &str) -> Result<String, QueryParseError> {
    let node = parse_query(query)?;
    if node.has_compounds() {
        return Err(QueryParseError::AlreadyCompound(query.to_string()));
    }
    Ok(node.with_compound(value).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(name: &str) -> QueryNode {
        QueryNode::Literal(name.to_string())
    }

    #[test]
    fn test_precedence_not_and_or() {
        let node = parse_query("prb or mom and not sib").unwrap();
        assert_eq!(
            node,
            QueryNode::Or(vec![
                lit("prb"),
                QueryNode::And(vec![lit("mom"), QueryNode::Not(Box::new(lit("sib")))]),
            ])
        );
    }

    #[test]
    fn test_keywords_case_insensitive() {
        let node = parse_query("prb AND NOT sib").unwrap();
        assert_eq!(node, QueryNode::And(vec![lit("prb"), QueryNode::Not(Box::new(lit("sib")))]));
    }

    #[test]
    fn test_all_any_both_forms() {
        assert_eq!(parse_query("all(mom, dad)").unwrap(), QueryNode::And(vec![lit("mom"), lit("dad")]));
        assert_eq!(parse_query("any([mom, dad])").unwrap(), QueryNode::Or(vec![lit("mom"), lit("dad")]));
        assert_eq!(parse_query("all(mom)").unwrap(), lit("mom"));
    }

    #[test]
    fn test_compound_and_symbols_in_names() {
        assert_eq!(
            parse_query("prb~denovo").unwrap(),
            QueryNode::Compound("prb".to_string(), "denovo".to_string())
        );
        assert_eq!(parse_query("CNV+ or CNV-").unwrap(), QueryNode::Or(vec![lit("CNV+"), lit("CNV-")]));
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(parse_query("   "), Err(QueryParseError::Empty));
        assert!(matches!(parse_query("prb and"), Err(QueryParseError::UnexpectedToken { .. })));
        assert!(matches!(parse_query("(prb"), Err(QueryParseError::UnexpectedToken { .. })));
        assert!(matches!(parse_query("prb sib"), Err(QueryParseError::UnexpectedToken { .. })));
        assert!(matches!(parse_query("prb~"), Err(QueryParseError::UnexpectedToken { .. })));
        assert!(matches!(parse_query("prb & sib"), Err(QueryParseError::UnexpectedCharacter { .. })));
    }

    #[test]
    fn test_display_round_trips_structure() {
        let text = "not (prb or sib) and mom";
        let node = parse_query(text).unwrap();
        assert_eq!(node.to_string(), text);
        assert_eq!(parse_query(&node.to_string()).unwrap(), node);
    }

    #[test]
    fn test_strip_and_add_compounds() {
        assert_eq!(strip_compounds("prb~heterozygous or sib").unwrap(), "prb or sib");
        assert_eq!(add_compound("prb or not sib", "homozygous").unwrap(), "prb~homozygous or not sib~homozygous");
        assert!(matches!(add_compound("prb~het", "hom"), Err(QueryParseError::AlreadyCompound(_))));
    }
}
