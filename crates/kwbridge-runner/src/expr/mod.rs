//! Selection expressions for `-k` and `-m`.
//!
//! Expressions combine identifiers with `not`, `and`, `or` and parentheses.
//! `not` binds tighter than `and`, which binds tighter than `or`; operators
//! associate to the left. What an identifier means is up to the caller: `-k`
//! matches it as a case-insensitive substring of an item's keywords, `-m`
//! matches marker names exactly.

mod lexer;
mod parser;

use thiserror::Error;

use self::parser::Parser;

/// Parsed selection expression.
#[derive(Clone, Debug)]
pub struct Expression {
    root: Expr,
}

#[derive(Clone, Debug)]
pub(crate) enum Expr {
    Ident(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// A selection expression that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid selection expression at byte {offset}: {reason}")]
pub struct ExprError {
    offset: usize,
    reason: String,
}

impl ExprError {
    pub(crate) fn new(offset: usize, reason: impl Into<String>) -> Self {
        Self {
            offset,
            reason: reason.into(),
        }
    }
}

impl Expression {
    /// Parse `input`.
    ///
    /// # Errors
    /// Returns [`ExprError`] with the byte offset of the offending token.
    pub fn parse(input: &str) -> Result<Self, ExprError> {
        let mut parser = Parser::new(input)?;
        let root = parser.parse_expression()?;
        parser.expect_end()?;
        Ok(Self { root })
    }

    /// Evaluate with `matches` deciding each identifier.
    pub fn evaluate(&self, matches: &dyn Fn(&str) -> bool) -> bool {
        self.root.eval(matches)
    }

    /// `-k` semantics: an identifier matches when it is a case-insensitive
    /// substring of any of `keywords`.
    #[must_use]
    pub fn matches_keywords(&self, keywords: &[String]) -> bool {
        let lowered: Vec<String> = keywords.iter().map(|word| word.to_lowercase()).collect();
        self.evaluate(&|ident| {
            let ident = ident.to_lowercase();
            lowered.iter().any(|word| word.contains(&ident))
        })
    }

    /// `-m` semantics: an identifier matches a marker of the same name.
    #[must_use]
    pub fn matches_marks(&self, names: &[String]) -> bool {
        self.evaluate(&|ident| names.iter().any(|name| name == ident))
    }
}

impl Expr {
    fn eval(&self, matches: &dyn Fn(&str) -> bool) -> bool {
        match self {
            Self::Ident(ident) => matches(ident),
            Self::Not(inner) => !inner.eval(matches),
            Self::And(lhs, rhs) => lhs.eval(matches) && rhs.eval(matches),
            Self::Or(lhs, rhs) => lhs.eval(matches) || rhs.eval(matches),
        }
    }
}
