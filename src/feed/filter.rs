//! Keyword filter expressions attached to feeds.
//!
//! Grammar (operators are case-insensitive, keywords match as
//! case-insensitive substrings of the article title and description):
//!
//! ```text
//! expr   = term { ("OR" | ",") term }
//! term   = factor { "AND" factor }
//! factor = KEYWORD | "\"" phrase "\"" | "(" expr ")"
//! ```
//!
//! An expression that fails to parse falls back to a plain comma separated
//! keyword list.

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpr {
    Keyword(String),
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
}

/// Outcome of classifying one article against a feed filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Keep the article, tagged with the keywords that matched.
    Accept(Vec<String>),
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    And,
    Or,
    Open,
    Close,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Or);
            }
            '"' => {
                chars.next();
                let mut phrase = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => phrase.push(c),
                        None => return Err(AppError::Filter("unterminated quote".to_string())),
                    }
                }
                let phrase = phrase.trim().to_string();
                if phrase.is_empty() {
                    return Err(AppError::Filter("empty phrase".to_string()));
                }
                tokens.push(Token::Word(phrase));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | ',' | '"') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                let token = match word.to_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    _ => Token::Word(word),
                };
                tokens.push(token);
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expression(&mut self) -> Result<FilterExpr> {
        let mut left = self.term()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.term()?;
            left = FilterExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<FilterExpr> {
        let mut left = self.factor()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.factor()?;
            left = FilterExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<FilterExpr> {
        match self.next() {
            Some(Token::Word(word)) => Ok(FilterExpr::Keyword(word)),
            Some(Token::Open) => {
                let expr = self.expression()?;
                match self.next() {
                    Some(Token::Close) => Ok(expr),
                    _ => Err(AppError::Filter("missing closing parenthesis".to_string())),
                }
            }
            Some(token) => Err(AppError::Filter(format!("unexpected token {:?}", token))),
            None => Err(AppError::Filter("unexpected end of expression".to_string())),
        }
    }
}

impl FilterExpr {
    /// Parses an expression. Blank input yields `Ok(None)`.
    pub fn parse(input: &str) -> Result<Option<FilterExpr>> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Ok(None);
        }

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expression()?;
        if let Some(token) = parser.peek() {
            return Err(AppError::Filter(format!("unexpected token {:?}", token)));
        }
        Ok(Some(expr))
    }

    pub fn matches(&self, text: &str) -> bool {
        self.eval(&text.to_lowercase())
    }

    fn eval(&self, lowered: &str) -> bool {
        match self {
            FilterExpr::Keyword(k) => lowered.contains(&k.to_lowercase()),
            FilterExpr::And(l, r) => l.eval(lowered) && r.eval(lowered),
            FilterExpr::Or(l, r) => l.eval(lowered) || r.eval(lowered),
        }
    }

    /// Keywords that contributed to a match. The keywords of an `AND` count
    /// only when both sides match.
    pub fn matching_keywords(&self, text: &str) -> Vec<String> {
        let mut found = Vec::new();
        self.collect(&text.to_lowercase(), &mut found);
        let mut unique = Vec::with_capacity(found.len());
        for keyword in found {
            if !unique.contains(&keyword) {
                unique.push(keyword);
            }
        }
        unique
    }

    fn collect(&self, lowered: &str, out: &mut Vec<String>) {
        match self {
            FilterExpr::Keyword(k) => {
                if lowered.contains(&k.to_lowercase()) {
                    out.push(k.clone());
                }
            }
            FilterExpr::And(l, r) => {
                if l.eval(lowered) && r.eval(lowered) {
                    l.collect(lowered, out);
                    r.collect(lowered, out);
                }
            }
            FilterExpr::Or(l, r) => {
                l.collect(lowered, out);
                r.collect(lowered, out);
            }
        }
    }
}

/// Classifies `text` against an optional feed filter. Feeds without a filter
/// accept everything untagged.
pub fn classify(filter: Option<&str>, text: &str) -> Classification {
    let Some(filter) = filter.map(str::trim).filter(|f| !f.is_empty()) else {
        return Classification::Accept(Vec::new());
    };

    match FilterExpr::parse(filter) {
        Ok(Some(expr)) => {
            if expr.matches(text) {
                Classification::Accept(expr.matching_keywords(text))
            } else {
                Classification::Reject
            }
        }
        Ok(None) => Classification::Accept(Vec::new()),
        Err(e) => {
            tracing::warn!("Invalid filter {:?} ({}), using keyword list", filter, e);
            let lowered = text.to_lowercase();
            let matched: Vec<String> = filter
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty() && lowered.contains(&k.to_lowercase()))
                .map(str::to_string)
                .collect();
            if matched.is_empty() {
                Classification::Reject
            } else {
                Classification::Accept(matched)
            }
        }
    }
}
