//! Free-text query language compiled to FTS5 match expressions.
//!
//! ```text
//! or_expr  = and_expr ("OR" and_expr)*
//! and_expr = not_expr (("AND")? not_expr)*
//! not_expr = "NOT" not_expr | primary
//! primary  = "(" or_expr ")" | [field ":"] (word["*"] | "\"" phrase "\"")
//! ```
//!
//! Operators are upper case; lower case `and`/`or`/`not` are plain words.
//! `NOT` only narrows a conjunction, so it needs at least one positive term
//! next to it.

use crate::error::{Result, TagmarkError};
use std::fmt;

/// Indexed text columns of a document
pub const SEARCHABLE_FIELDS: &[&str] = &["title", "notes", "tags"];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Field(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "'{w}'"),
            Token::Quoted(s) => write!(f, "\"{s}\""),
            Token::Field(name) => write!(f, "'{name}:'"),
            Token::And => write!(f, "AND"),
            Token::Or => write!(f, "OR"),
            Token::Not => write!(f, "NOT"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
        }
    }
}

fn invalid(message: impl Into<String>) -> TagmarkError {
    TagmarkError::InvalidQuery(message.into())
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' => tokens.push(Token::Quoted(read_quoted(&chars, &mut i)?)),
            _ => {
                let word = read_word(&chars, &mut i);
                match word.as_str() {
                    "AND" => tokens.push(Token::And),
                    "OR" => tokens.push(Token::Or),
                    "NOT" => tokens.push(Token::Not),
                    _ => match searchable_prefix(&word) {
                        Some((field, rest)) => {
                            tokens.push(Token::Field(field));
                            if !rest.is_empty() {
                                tokens.push(Token::Word(rest.to_string()));
                            }
                        }
                        None => tokens.push(Token::Word(word)),
                    },
                }
            }
        }
    }
    Ok(tokens)
}

/// Split `title:rust` into a field filter; colons in anything else (URLs,
/// `note:`) are plain text
fn searchable_prefix(word: &str) -> Option<(String, &str)> {
    let (field, rest) = word.split_once(':')?;
    let field = field.to_lowercase();
    SEARCHABLE_FIELDS
        .contains(&field.as_str())
        .then_some((field, rest))
}

fn read_quoted(chars: &[char], i: &mut usize) -> Result<String> {
    let start = *i;
    *i += 1;
    let mut s = String::new();
    while *i < chars.len() {
        if chars[*i] == '"' {
            *i += 1;
            return Ok(s);
        }
        s.push(chars[*i]);
        *i += 1;
    }
    Err(invalid(format!(
        "unterminated quoted string starting at position {start}"
    )))
}

fn read_word(chars: &[char], i: &mut usize) -> String {
    let mut word = String::new();
    while *i < chars.len() {
        match chars[*i] {
            c if c.is_whitespace() => break,
            '(' | ')' | '"' => break,
            c => {
                word.push(c);
                *i += 1;
            }
        }
    }
    word
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpr {
    Term {
        field: Option<String>,
        text: String,
        prefix: bool,
    },
    Phrase {
        field: Option<String>,
        text: String,
    },
    And(Box<QueryExpr>, Box<QueryExpr>),
    Or(Box<QueryExpr>, Box<QueryExpr>),
    Not(Box<QueryExpr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn parse_or(&mut self) -> Result<QueryExpr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let right = self.parse_and()?;
            left = QueryExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<QueryExpr> {
        let mut left = self.parse_not()?;
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.advance();
                }
                Some(Token::Or) | Some(Token::RParen) | None => break,
                Some(_) => {}
            }
            let right = self.parse_not()?;
            left = QueryExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<QueryExpr> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(QueryExpr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<QueryExpr> {
        match self.advance() {
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(expr),
                    Some(tok) => Err(invalid(format!("expected ')', got {tok}"))),
                    None => Err(invalid("missing closing parenthesis")),
                }
            }
            Some(Token::Field(field)) => match self.advance() {
                Some(Token::Word(word)) => term(Some(field), word),
                Some(Token::Quoted(text)) => phrase(Some(field), text),
                Some(tok) => Err(invalid(format!("expected a term after '{field}:', got {tok}"))),
                None => Err(invalid(format!("expected a term after '{field}:'"))),
            },
            Some(Token::Word(word)) => term(None, word),
            Some(Token::Quoted(text)) => phrase(None, text),
            Some(tok) => Err(invalid(format!("unexpected {tok}"))),
            None => Err(invalid("unexpected end of query")),
        }
    }
}

fn term(field: Option<String>, word: String) -> Result<QueryExpr> {
    let prefix = word.ends_with('*');
    let text = if prefix {
        word.trim_end_matches('*').to_string()
    } else {
        word
    };
    if text.is_empty() {
        return Err(invalid("a wildcard needs a preceding term"));
    }
    Ok(QueryExpr::Term {
        field,
        text,
        prefix,
    })
}

fn phrase(field: Option<String>, text: String) -> Result<QueryExpr> {
    if text.trim().is_empty() {
        return Err(invalid("empty phrase"));
    }
    Ok(QueryExpr::Phrase { field, text })
}

/// Parse a user query into an expression tree
pub fn parse_query(input: &str) -> Result<QueryExpr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(invalid("empty query"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if let Some(tok) = parser.peek() {
        return Err(invalid(format!("unexpected {tok}")));
    }
    Ok(expr)
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

fn column_filter(field: &Option<String>, default_fields: &[String]) -> Result<String> {
    match field {
        Some(name) => Ok(name.clone()),
        None if default_fields.len() == 1 => Ok(default_fields[0].clone()),
        None => Ok(format!("{{{}}}", default_fields.join(" "))),
    }
}

fn collect_and<'e>(expr: &'e QueryExpr, out: &mut Vec<&'e QueryExpr>) {
    match expr {
        QueryExpr::And(left, right) => {
            collect_and(left, out);
            collect_and(right, out);
        }
        other => out.push(other),
    }
}

fn compile(expr: &QueryExpr, default_fields: &[String]) -> Result<String> {
    match expr {
        QueryExpr::Term {
            field,
            text,
            prefix,
        } => {
            let column = column_filter(field, default_fields)?;
            let star = if *prefix { " *" } else { "" };
            Ok(format!("{column} : {}{star}", quote(text)))
        }
        QueryExpr::Phrase { field, text } => {
            Ok(format!("{} : {}", column_filter(field, default_fields)?, quote(text)))
        }
        QueryExpr::Or(left, right) => Ok(format!(
            "({} OR {})",
            compile(left, default_fields)?,
            compile(right, default_fields)?
        )),
        QueryExpr::And(..) => {
            let mut parts = Vec::new();
            collect_and(expr, &mut parts);
            let mut positive = Vec::new();
            let mut negative = Vec::new();
            for part in parts {
                match part {
                    QueryExpr::Not(inner) => negative.push(compile(inner, default_fields)?),
                    other => positive.push(compile(other, default_fields)?),
                }
            }
            if positive.is_empty() {
                return Err(invalid("NOT needs at least one positive term"));
            }
            let mut out = format!("({})", positive.join(" AND "));
            for excluded in negative {
                out = format!("({out} NOT {excluded})");
            }
            Ok(out)
        }
        QueryExpr::Not(_) => Err(invalid("NOT needs at least one positive term")),
    }
}

/// Compile `input` into an FTS5 MATCH expression over `default_fields`
pub fn to_match_expression(input: &str, default_fields: &[String]) -> Result<String> {
    if default_fields.is_empty() {
        return Err(invalid("no fields to search"));
    }
    if let Some(unknown) = default_fields
        .iter()
        .find(|f| !SEARCHABLE_FIELDS.contains(&f.as_str()))
    {
        return Err(invalid(format!("unknown field '{unknown}'")));
    }
    compile(&parse_query(input)?, default_fields)
}
