// Formula tokenizer - splits formula text into typed tokens with exact source spans
// References: kpi:<36-char dashed hex id>
// Operators: ( ) * / + - > < >= <= = != && || ? :
// Everything else: whitespace-separated literal runs

use std::borrow::Cow;
use std::ops::Range;

use crate::kpi::KpiId;

/// Literal prefix introducing a KPI reference.
pub const REFERENCE_PREFIX: &str = "kpi:";

/// Length of a dashed hexadecimal KPI id (8-4-4-4-12).
pub const KPI_ID_LEN: usize = 36;

const DASH_POSITIONS: [usize; 4] = [8, 13, 18, 23];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    LParen,   // (
    RParen,   // )
    Star,     // *
    Slash,    // /
    Plus,     // +
    Minus,    // -
    Gt,       // >
    Lt,       // <
    GtEq,     // >=
    LtEq,     // <=
    Eq,       // =
    NotEq,    // !=
    And,      // &&
    Or,       // ||
    Question, // ?
    Colon,    // :
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::LParen => "(",
            Operator::RParen => ")",
            Operator::Star => "*",
            Operator::Slash => "/",
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::GtEq => ">=",
            Operator::LtEq => "<=",
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Question => "?",
            Operator::Colon => ":",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// `kpi:<id>` reference to another KPI
    Reference { kpi_id: KpiId },
    Operator(Operator),
    /// Numeric constant or unrecognized text (whitespace-free)
    Literal(String),
}

impl TokenKind {
    /// Canonical source text for this token.
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            TokenKind::Reference { kpi_id } => Cow::Owned(format!("{}{}", REFERENCE_PREFIX, kpi_id)),
            TokenKind::Operator(op) => Cow::Borrowed(op.symbol()),
            TokenKind::Literal(text) => Cow::Borrowed(text),
        }
    }

    pub fn reference(id: impl Into<KpiId>) -> Self {
        TokenKind::Reference { kpi_id: id.into() }
    }

    pub fn literal(text: impl Into<String>) -> Self {
        TokenKind::Literal(text.into())
    }
}

/// A token plus the byte range it occupies in the source formula.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Range<usize>,
}

impl Token {
    /// Exact length of the matched source text.
    pub fn source_len(&self) -> usize {
        self.span.len()
    }
}

/// Tokenize formula text, scanning left to right.
///
/// Never fails: text that is neither a reference nor an operator becomes a
/// `Literal`, and the parser decides whether it is a usable number.
pub fn tokenize(formula: &str) -> Vec<Token> {
    let bytes = formula.as_bytes();
    let mut tokens = Vec::new();
    let mut run_start: Option<usize> = None;
    let mut pos = 0;

    while pos < bytes.len() {
        if let Some(kpi_id) = match_reference(&bytes[pos..]) {
            if let Some(start) = run_start.take() {
                push_literals(formula, start..pos, &mut tokens);
            }
            let end = pos + REFERENCE_PREFIX.len() + KPI_ID_LEN;
            tokens.push(Token {
                kind: TokenKind::Reference { kpi_id: KpiId::new(kpi_id) },
                span: pos..end,
            });
            pos = end;
            continue;
        }

        if let Some((op, len)) = match_operator(&bytes[pos..]) {
            if let Some(start) = run_start.take() {
                push_literals(formula, start..pos, &mut tokens);
            }
            tokens.push(Token {
                kind: TokenKind::Operator(op),
                span: pos..pos + len,
            });
            pos += len;
            continue;
        }

        if run_start.is_none() {
            run_start = Some(pos);
        }
        pos += formula[pos..].chars().next().map_or(1, char::len_utf8);
    }

    if let Some(start) = run_start {
        push_literals(formula, start..bytes.len(), &mut tokens);
    }

    tokens
}

/// Token kinds without spans.
pub fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
    tokens.iter().map(|t| t.kind.clone()).collect()
}

/// Serialize tokens back into formula text.
///
/// Tokens are concatenated using their canonical text, with a single space
/// only where direct concatenation would merge two neighbours. If the compact
/// form still re-tokenizes differently (a reference assembled across several
/// tokens), every token is space-separated instead.
pub fn serialize(tokens: &[TokenKind]) -> String {
    let compact = join(tokens, needs_separator);
    if kinds(&tokenize(&compact)) == tokens {
        compact
    } else {
        join(tokens, |_, _| true)
    }
}

/// Whether `prev` immediately followed by `next` would re-tokenize as
/// something other than exactly those two tokens.
pub fn needs_separator(prev: &TokenKind, next: &TokenKind) -> bool {
    let joined = format!("{}{}", prev.text(), next.text());
    let retokenized = tokenize(&joined);
    !(retokenized.len() == 2 && retokenized[0].kind == *prev && retokenized[1].kind == *next)
}

/// True if `id` has the dashed hexadecimal layout `8-4-4-4-12`.
pub fn is_kpi_id(id: &str) -> bool {
    is_kpi_id_bytes(id.as_bytes())
}

fn join(tokens: &[TokenKind], separate: impl Fn(&TokenKind, &TokenKind) -> bool) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 && separate(&tokens[i - 1], token) {
            out.push(' ');
        }
        out.push_str(&token.text());
    }
    out
}

fn is_kpi_id_bytes(id: &[u8]) -> bool {
    id.len() == KPI_ID_LEN
        && id.iter().enumerate().all(|(i, &b)| {
            if DASH_POSITIONS.contains(&i) {
                b == b'-'
            } else {
                b.is_ascii_hexdigit()
            }
        })
}

fn match_reference(rest: &[u8]) -> Option<&str> {
    let prefix = REFERENCE_PREFIX.as_bytes();
    if !rest.starts_with(prefix) {
        return None;
    }
    let id = rest.get(prefix.len()..prefix.len() + KPI_ID_LEN)?;
    if is_kpi_id_bytes(id) {
        // ASCII-only by construction
        std::str::from_utf8(id).ok()
    } else {
        None
    }
}

fn match_operator(rest: &[u8]) -> Option<(Operator, usize)> {
    let matched = match rest {
        [b'>', b'=', ..] => (Operator::GtEq, 2),
        [b'<', b'=', ..] => (Operator::LtEq, 2),
        [b'!', b'=', ..] => (Operator::NotEq, 2),
        [b'&', b'&', ..] => (Operator::And, 2),
        [b'|', b'|', ..] => (Operator::Or, 2),
        [b'(', ..] => (Operator::LParen, 1),
        [b')', ..] => (Operator::RParen, 1),
        [b'*', ..] => (Operator::Star, 1),
        [b'/', ..] => (Operator::Slash, 1),
        [b'+', ..] => (Operator::Plus, 1),
        [b'-', ..] => (Operator::Minus, 1),
        [b'>', ..] => (Operator::Gt, 1),
        [b'<', ..] => (Operator::Lt, 1),
        [b'=', ..] => (Operator::Eq, 1),
        [b'?', ..] => (Operator::Question, 1),
        [b':', ..] => (Operator::Colon, 1),
        _ => return None,
    };
    Some(matched)
}

/// Split a non-operator text run on whitespace; empty pieces are dropped.
fn push_literals(formula: &str, run: Range<usize>, tokens: &mut Vec<Token>) {
    let mut start: Option<usize> = None;
    for (i, ch) in formula[run.clone()].char_indices() {
        let at = run.start + i;
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                tokens.push(literal_token(formula, s..at));
            }
        } else if start.is_none() {
            start = Some(at);
        }
    }
    if let Some(s) = start {
        tokens.push(literal_token(formula, s..run.end));
    }
}

fn literal_token(formula: &str, span: Range<usize>) -> Token {
    Token {
        kind: TokenKind::Literal(formula[span.clone()].to_string()),
        span,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "0f8b2c1e-5d4a-4b3c-9e2f-1a2b3c4d5e6f";
    const B: &str = "7c9e6679-7425-40de-944b-e07fc1f90ae7";

    fn op(o: Operator) -> TokenKind {
        TokenKind::Operator(o)
    }

    #[test]
    fn test_tokenize_reference_arithmetic() {
        let formula = format!("kpi:{A} + kpi:{B}");
        let tokens = tokenize(&formula);
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::reference(A), op(Operator::Plus), TokenKind::reference(B)]
        );
        assert_eq!(tokens[0].span, 0..40);
        assert_eq!(tokens[0].source_len(), 40);
        assert_eq!(tokens[1].span, 41..42);
        assert_eq!(tokens[2].span, 43..83);
    }

    #[test]
    fn test_tokenize_two_char_operators() {
        let tokens = kinds(&tokenize("1>=2<=3!=4&&5||6"));
        assert_eq!(
            tokens,
            vec![
                TokenKind::literal("1"),
                op(Operator::GtEq),
                TokenKind::literal("2"),
                op(Operator::LtEq),
                TokenKind::literal("3"),
                op(Operator::NotEq),
                TokenKind::literal("4"),
                op(Operator::And),
                TokenKind::literal("5"),
                op(Operator::Or),
                TokenKind::literal("6"),
            ]
        );
    }

    #[test]
    fn test_tokenize_single_char_operators() {
        let tokens = kinds(&tokenize("(1)*2/3-4>5<6=7?8:9"));
        let ops: Vec<_> = tokens
            .iter()
            .filter_map(|t| match t {
                TokenKind::Operator(o) => Some(*o),
                _ => None,
            })
            .collect();
        assert_eq!(
            ops,
            vec![
                Operator::LParen,
                Operator::RParen,
                Operator::Star,
                Operator::Slash,
                Operator::Minus,
                Operator::Gt,
                Operator::Lt,
                Operator::Eq,
                Operator::Question,
                Operator::Colon,
            ]
        );
    }

    #[test]
    fn test_whitespace_only_dropped() {
        assert!(tokenize("   \t  ").is_empty());
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn test_literal_runs_split_on_whitespace() {
        let tokens = tokenize("  12  abc ");
        assert_eq!(kinds(&tokens), vec![TokenKind::literal("12"), TokenKind::literal("abc")]);
        assert_eq!(tokens[0].span, 2..4);
        assert_eq!(tokens[1].span, 6..9);
    }

    #[test]
    fn test_lone_bang_and_ampersand_are_literal_text() {
        assert_eq!(kinds(&tokenize("a&b")), vec![TokenKind::literal("a&b")]);
        assert_eq!(kinds(&tokenize("!")), vec![TokenKind::literal("!")]);
    }

    #[test]
    fn test_malformed_reference_is_literal() {
        // id too short
        let tokens = kinds(&tokenize("kpi:1234"));
        assert_eq!(tokens, vec![TokenKind::literal("kpi"), op(Operator::Colon), TokenKind::literal("1234")]);
    }

    #[test]
    fn test_reference_adjacent_to_text() {
        let formula = format!("x2kpi:{A}7");
        let tokens = tokenize(&formula);
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::literal("x2"), TokenKind::reference(A), TokenKind::literal("7")]
        );
    }

    #[test]
    fn test_reference_dash_not_operator() {
        let tokens = tokenize(&format!("kpi:{A}-1"));
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::reference(A), op(Operator::Minus), TokenKind::literal("1")]
        );
    }

    #[test]
    fn test_uppercase_hex_id_accepted() {
        let upper = A.to_uppercase();
        let tokens = tokenize(&format!("kpi:{upper}"));
        assert_eq!(kinds(&tokens), vec![TokenKind::reference(upper.as_str())]);
    }

    #[test]
    fn test_non_ascii_literal() {
        let tokens = tokenize("€5 + 1");
        assert_eq!(tokens[0].kind, TokenKind::literal("€5"));
        assert_eq!(tokens[0].span, 0..4);
    }

    #[test]
    fn test_is_kpi_id() {
        assert!(is_kpi_id(A));
        assert!(!is_kpi_id("0f8b2c1e05d4a-4b3c-9e2f-1a2b3c4d5e6f"));
        assert!(!is_kpi_id("zf8b2c1e-5d4a-4b3c-9e2f-1a2b3c4d5e6f"));
        assert!(!is_kpi_id("short"));
    }

    #[test]
    fn test_serialize_compact() {
        let tokens = vec![TokenKind::reference(A), op(Operator::Plus), TokenKind::reference(B)];
        assert_eq!(serialize(&tokens), format!("kpi:{A}+kpi:{B}"));
    }

    #[test]
    fn test_serialize_separates_literals() {
        let tokens = vec![TokenKind::literal("2"), TokenKind::literal("3"), op(Operator::Plus)];
        let text = serialize(&tokens);
        assert_eq!(text, "2 3+");
        assert_eq!(kinds(&tokenize(&text)), tokens);
    }

    #[test]
    fn test_serialize_separates_merging_operators() {
        let tokens = vec![op(Operator::Lt), op(Operator::Eq)];
        assert_eq!(serialize(&tokens), "< =");
        let tokens = vec![TokenKind::literal("a!"), op(Operator::Eq)];
        assert_eq!(serialize(&tokens), "a! =");
    }

    #[test]
    fn test_serialize_falls_back_when_reference_would_assemble() {
        // "kpi:0f8b2c1e - 5d4a - ..." re-joined compactly would form a reference
        let source = "kpi:0f8b2c1e - 5d4a - 4b3c - 9e2f - 1a2b3c4d5e6f";
        let tokens = kinds(&tokenize(source));
        assert!(tokens.iter().all(|t| !matches!(t, TokenKind::Reference { .. })));
        let text = serialize(&tokens);
        assert_eq!(kinds(&tokenize(&text)), tokens);
    }

    #[test]
    fn test_needs_separator() {
        assert!(!needs_separator(&TokenKind::reference(A), &TokenKind::reference(B)));
        assert!(!needs_separator(&TokenKind::literal("1"), &op(Operator::Plus)));
        assert!(needs_separator(&op(Operator::Gt), &op(Operator::Eq)));
        assert!(needs_separator(&TokenKind::literal("1"), &TokenKind::literal("2")));
    }
}
