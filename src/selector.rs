//! Chapter selection expressions.
//!
//! An expression is a comma-separated list of selectors over the 0-based
//! positions of a chapter listing:
//!
//! - `7` selects a single chapter, `-1` the last one.
//! - `a:b` selects the half-open range `[a, b)`, like a slice. Either bound may
//!   be omitted (`:5`, `10:`) and either may be negative (`-3:`).
//! - `!` in front of any selector removes those chapters instead, wherever it
//!   appears in the expression.
//!
//! Without any positive selector the whole listing is the starting set. The
//! result is always ascending and free of duplicates.

use crate::error::SelectionError;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// One bound or single position, possibly counted from the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    FromStart(usize),
    FromEnd(usize),
}

impl Position {
    /// Resolves to an absolute index, `None` when it falls before the start.
    fn resolve(self, total: usize) -> Option<usize> {
        match self {
            Position::FromStart(n) => Some(n),
            Position::FromEnd(n) => total.checked_sub(n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Single(Position),
    Range {
        start: Option<Position>,
        end: Option<Position>,
    },
}

impl Target {
    /// Indices of `[0, total)` covered by this target.
    fn indices(self, total: usize) -> std::ops::Range<usize> {
        match self {
            Target::Single(pos) => match pos.resolve(total) {
                Some(i) if i < total => i..i + 1,
                _ => 0..0,
            },
            Target::Range { start, end } => {
                let start = start.map_or(0, |p| p.resolve(total).unwrap_or(0)).min(total);
                let end = end.map_or(total, |p| p.resolve(total).unwrap_or(0)).min(total);
                start..end.max(start)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    exclude: bool,
    target: Target,
}

/// A parsed, syntactically valid chapter selection.
///
/// Parsing and evaluation are separate so a malformed expression is rejected
/// before anything is selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterSelection {
    expression: String,
    tokens: Vec<Token>,
}

impl ChapterSelection {
    /// Parses an expression. A blank expression selects everything.
    pub fn parse(expression: &str) -> Result<Self, SelectionError> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Ok(Self::all());
        }

        let tokens = expression
            .split(',')
            .map(parse_token)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            expression: expression.to_string(),
            tokens,
        })
    }

    /// A selection of every chapter.
    pub fn all() -> Self {
        Self {
            expression: String::new(),
            tokens: Vec::new(),
        }
    }

    /// Returns true if this selection has no tokens at all.
    pub fn is_all(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Evaluates the selection against a listing of `total` chapters.
    pub fn resolve(&self, total: usize) -> Result<Vec<usize>, SelectionError> {
        let mut included = BTreeSet::new();
        let mut excluded = BTreeSet::new();
        let mut any_positive = false;

        for token in &self.tokens {
            let range = token.target.indices(total);
            if token.exclude {
                excluded.extend(range);
            } else {
                any_positive = true;
                included.extend(range);
            }
        }

        if !any_positive {
            included.extend(0..total);
        }

        let selected: Vec<usize> = included.difference(&excluded).copied().collect();
        if selected.is_empty() {
            return Err(SelectionError::Empty {
                expression: self.expression.clone(),
            });
        }
        Ok(selected)
    }
}

impl FromStr for ChapterSelection {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ChapterSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            f.write_str(":")
        } else {
            f.write_str(&self.expression)
        }
    }
}

/// Parses and evaluates `expression` against `total` chapters in one step.
pub fn select(expression: &str, total: usize) -> Result<Vec<usize>, SelectionError> {
    ChapterSelection::parse(expression)?.resolve(total)
}

fn parse_token(raw: &str) -> Result<Token, SelectionError> {
    let syntax = || SelectionError::Syntax {
        token: raw.trim().to_string(),
    };

    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let (exclude, body) = match compact.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, compact.as_str()),
    };
    if body.is_empty() {
        return Err(syntax());
    }

    let target = match body.split_once(':') {
        None => Target::Single(parse_position(body).ok_or_else(syntax)?),
        Some((start, end)) => {
            let bound = |s: &str| {
                if s.is_empty() {
                    Ok(None)
                } else {
                    parse_position(s).map(Some).ok_or_else(syntax)
                }
            };
            Target::Range {
                start: bound(start)?,
                end: bound(end)?,
            }
        }
    };

    Ok(Token { exclude, target })
}

fn parse_position(s: &str) -> Option<Position> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Only overflow can fail here; such a position is simply out of range.
    let n: usize = digits.parse().unwrap_or(usize::MAX);
    if negative {
        // "-0" has no meaning as a position from the end.
        (n > 0).then_some(Position::FromEnd(n))
    } else {
        Some(Position::FromStart(n))
    }
}
