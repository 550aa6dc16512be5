//! Position-addressed formula editing.
//!
//! The visual editor shows a formula as a token list. Edits address tokens by
//! index and produce new formula text whose re-tokenization is exactly the
//! edited token list:
//!
//! ```text
//! delete(i)    tokens[..i] ++ tokens[i+1..]
//! move(f, t)   tokens with tokens[f] removed and re-inserted at t
//! insert(i, x) tokens[..i] ++ [x] ++ tokens[i..]
//! ```
//!
//! Deletion cuts the token's exact source span out of the text (never a
//! search/replace, so an identical token elsewhere is untouched).

use std::fmt;

use crate::kpi::KpiSet;

use super::tokenizer::{kinds, needs_separator, serialize, tokenize, Token, TokenKind};

#[derive(Debug, Clone, PartialEq)]
pub enum EditError {
    IndexOutOfRange { index: usize, len: usize },
    /// Token text does not tokenize back to exactly that one token.
    InvalidToken(String),
}

impl fmt::Display for EditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IndexOutOfRange { index, len } => {
                write!(f, "token index {index} out of range (formula has {len} tokens)")
            }
            Self::InvalidToken(text) => write!(f, "'{text}' is not a single formula token"),
        }
    }
}

impl std::error::Error for EditError {}

/// Remove the token at `index` from `formula`.
///
/// The removed range runs from the end of the previous token to the start of
/// the next one, so the neighbours end up adjacent. A single space is kept
/// between them only if they would otherwise merge.
pub fn delete_token(formula: &str, index: usize) -> Result<String, EditError> {
    let tokens = tokenize(formula);
    check_index(index, tokens.len())?;

    let mut expected = kinds(&tokens);
    expected.remove(index);

    let prev = index.checked_sub(1).map(|i| &tokens[i]);
    let next = tokens.get(index + 1);
    let start = prev.map_or(tokens[index].span.start, |t| t.span.end);
    let end = next.map_or(tokens[index].span.end, |t| t.span.start);

    let mut out = String::with_capacity(formula.len());
    out.push_str(&formula[..start]);
    if let (Some(prev), Some(next)) = (prev, next) {
        if needs_separator(&prev.kind, &next.kind) {
            out.push(' ');
        }
    }
    out.push_str(&formula[end..]);

    Ok(settle(out, &expected))
}

/// Drag the token at `from` so that it ends up at index `to`.
pub fn move_token(formula: &str, from: usize, to: usize) -> Result<String, EditError> {
    let mut tokens = kinds(&tokenize(formula));
    check_index(from, tokens.len())?;
    check_index(to, tokens.len())?;

    let moved = tokens.remove(from);
    tokens.insert(to, moved);
    Ok(serialize(&tokens))
}

/// Insert `token` before the token at `index` (`index == len` appends).
pub fn insert_token(formula: &str, index: usize, token: &TokenKind) -> Result<String, EditError> {
    let text = token.text();
    if kinds(&tokenize(&text)) != [token.clone()] {
        return Err(EditError::InvalidToken(text.into_owned()));
    }

    let tokens = tokenize(formula);
    if index > tokens.len() {
        return Err(EditError::IndexOutOfRange { index, len: tokens.len() });
    }

    let mut expected = kinds(&tokens);
    expected.insert(index, token.clone());

    let at = tokens.get(index).map_or(formula.len(), |t| t.span.start);
    let prev = index.checked_sub(1).map(|i| &tokens[i]);
    let next = tokens.get(index);

    let mut out = String::with_capacity(formula.len() + text.len() + 2);
    out.push_str(&formula[..at]);
    if prev.is_some_and(|p| p.span.end == at && needs_separator(&p.kind, token)) {
        out.push(' ');
    }
    out.push_str(&text);
    if next.is_some_and(|n| needs_separator(token, &n.kind)) {
        out.push(' ');
    }
    out.push_str(&formula[at..]);

    Ok(settle(out, &expected))
}

/// Render a formula for reading, with references shown by KPI name.
///
/// Unknown ids keep their `kpi:<id>` form.
pub fn display_formula(formula: &str, kpis: &KpiSet) -> String {
    let tokens = tokenize(formula);
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 && spaced(&tokens[i - 1], token) {
            out.push(' ');
        }
        match &token.kind {
            TokenKind::Reference { kpi_id } => match kpis.get(kpi_id) {
                Some(kpi) => out.push_str(&kpi.name),
                None => out.push_str(&token.kind.text()),
            },
            kind => out.push_str(&kind.text()),
        }
    }
    out
}

fn spaced(prev: &Token, next: &Token) -> bool {
    use super::tokenizer::Operator;
    !matches!(prev.kind, TokenKind::Operator(Operator::LParen))
        && !matches!(next.kind, TokenKind::Operator(Operator::RParen))
}

fn check_index(index: usize, len: usize) -> Result<(), EditError> {
    if index < len {
        Ok(())
    } else {
        Err(EditError::IndexOutOfRange { index, len })
    }
}

/// Keep the spliced text when it re-tokenizes as intended; otherwise fall
/// back to canonical serialization of the intended tokens.
fn settle(spliced: String, expected: &[TokenKind]) -> String {
    if kinds(&tokenize(&spliced)) == expected {
        spliced
    } else {
        serialize(expected)
    }
}
