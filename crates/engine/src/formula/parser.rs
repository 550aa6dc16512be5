// Formula parser - recursive descent over tokenizer output
// Precedence, lowest to highest:
//   ?:  ||  &&  = !=  > < >= <=  + -  * /  unary -/+  ( )

use crate::kpi::KpiId;

use super::error::FormulaError;
use super::tokenizer::{Operator, Token, TokenKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Reference(KpiId),
    Negate(Box<Expr>),
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `cond ? then : otherwise`
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    // Arithmetic
    Mul,
    Div,
    Add,
    Sub,
    // Relational
    Gt,
    Lt,
    GtEq,
    LtEq,
    // Equality
    Eq,
    NotEq,
    // Logical
    And,
    Or,
}

/// Deepest run of parentheses, unary operators and ternary branches a
/// formula may nest.
pub const MAX_NESTING: usize = 64;

/// Tallest expression tree a formula may produce. Long operator chains grow
/// the tree without nesting.
pub const MAX_HEIGHT: usize = 1024;

/// A parsed subtree and its height.
struct Parsed {
    expr: Expr,
    height: usize,
}

type ParseResult = Result<(Parsed, usize), FormulaError>;

type Level<'t> = fn(&mut Parser<'t>, usize) -> ParseResult;

/// Parse a token sequence into an expression tree.
///
/// Formulas deeper than [`MAX_NESTING`] / [`MAX_HEIGHT`] fail with
/// `FormulaError::TooDeep` before the tree outgrows the limit.
pub fn parse(tokens: &[Token]) -> Result<Expr, FormulaError> {
    if tokens.is_empty() {
        return Err(FormulaError::Empty);
    }
    let mut parser = Parser { tokens, nesting: 0 };
    let (parsed, pos) = parser.conditional(0)?;
    if pos < tokens.len() {
        return Err(match &tokens[pos].kind {
            TokenKind::Operator(Operator::RParen) => FormulaError::UnbalancedParen { position: pos },
            kind => FormulaError::UnexpectedToken {
                position: pos,
                text: kind.text().into_owned(),
            },
        });
    }
    Ok(parsed.expr)
}

fn leaf(expr: Expr) -> Parsed {
    Parsed { expr, height: 1 }
}

/// Wrap children into a new node, refusing trees taller than `MAX_HEIGHT`.
fn node(expr: Expr, child_height: usize) -> Result<Parsed, FormulaError> {
    let height = child_height + 1;
    if height > MAX_HEIGHT {
        return Err(FormulaError::TooDeep);
    }
    Ok(Parsed { expr, height })
}

struct Parser<'t> {
    tokens: &'t [Token],
    nesting: usize,
}

impl<'t> Parser<'t> {
    fn operator_at(&self, pos: usize) -> Option<Operator> {
        match self.tokens.get(pos).map(|t| &t.kind) {
            Some(TokenKind::Operator(op)) => Some(*op),
            _ => None,
        }
    }

    /// Run `level` one nesting step deeper.
    fn nested(&mut self, pos: usize, level: Level<'t>) -> ParseResult {
        if self.nesting >= MAX_NESTING {
            return Err(FormulaError::TooDeep);
        }
        self.nesting += 1;
        let result = level(self, pos);
        self.nesting -= 1;
        result
    }

    // Lowest precedence: right-associative ternary
    fn conditional(&mut self, pos: usize) -> ParseResult {
        let (cond, pos) = self.or(pos)?;

        if self.operator_at(pos) != Some(Operator::Question) {
            return Ok((cond, pos));
        }

        let question = pos;
        let (then, pos) = self.nested(pos + 1, Parser::conditional)?;
        match self.tokens.get(pos).map(|t| &t.kind) {
            Some(TokenKind::Operator(Operator::Colon)) => {}
            Some(kind) => {
                return Err(FormulaError::UnexpectedToken {
                    position: pos,
                    text: kind.text().into_owned(),
                })
            }
            None => return Err(FormulaError::DanglingOperator { position: question }),
        }
        let (otherwise, pos) = self.nested(pos + 1, Parser::conditional)?;

        let height = cond.height.max(then.height).max(otherwise.height);
        let expr = Expr::Conditional {
            cond: Box::new(cond.expr),
            then: Box::new(then.expr),
            otherwise: Box::new(otherwise.expr),
        };
        Ok((node(expr, height)?, pos))
    }

    /// Left-associative binary level: `next (op next)*` for the operators in `ops`.
    fn binary_level(&mut self, pos: usize, ops: &[(Operator, BinaryOp)], next: Level<'t>) -> ParseResult {
        let (mut left, mut pos) = next(self, pos)?;

        while let Some(found) = self.operator_at(pos) {
            let Some(&(_, op)) = ops.iter().find(|(candidate, _)| *candidate == found) else {
                break;
            };
            let (right, new_pos) = next(self, pos + 1)?;
            let height = left.height.max(right.height);
            let expr = Expr::BinaryOp {
                op,
                left: Box::new(left.expr),
                right: Box::new(right.expr),
            };
            left = node(expr, height)?;
            pos = new_pos;
        }

        Ok((left, pos))
    }

    fn or(&mut self, pos: usize) -> ParseResult {
        self.binary_level(pos, &[(Operator::Or, BinaryOp::Or)], Parser::and)
    }

    fn and(&mut self, pos: usize) -> ParseResult {
        self.binary_level(pos, &[(Operator::And, BinaryOp::And)], Parser::equality)
    }

    fn equality(&mut self, pos: usize) -> ParseResult {
        self.binary_level(
            pos,
            &[(Operator::Eq, BinaryOp::Eq), (Operator::NotEq, BinaryOp::NotEq)],
            Parser::relational,
        )
    }

    fn relational(&mut self, pos: usize) -> ParseResult {
        self.binary_level(
            pos,
            &[
                (Operator::Gt, BinaryOp::Gt),
                (Operator::Lt, BinaryOp::Lt),
                (Operator::GtEq, BinaryOp::GtEq),
                (Operator::LtEq, BinaryOp::LtEq),
            ],
            Parser::additive,
        )
    }

    fn additive(&mut self, pos: usize) -> ParseResult {
        self.binary_level(
            pos,
            &[(Operator::Plus, BinaryOp::Add), (Operator::Minus, BinaryOp::Sub)],
            Parser::multiplicative,
        )
    }

    fn multiplicative(&mut self, pos: usize) -> ParseResult {
        self.binary_level(
            pos,
            &[(Operator::Star, BinaryOp::Mul), (Operator::Slash, BinaryOp::Div)],
            Parser::unary,
        )
    }

    fn unary(&mut self, pos: usize) -> ParseResult {
        match self.operator_at(pos) {
            Some(Operator::Minus) => {
                let (inner, pos) = self.nested(pos + 1, Parser::unary)?;
                let height = inner.height;
                Ok((node(Expr::Negate(Box::new(inner.expr)), height)?, pos))
            }
            // Unary plus is a no-op
            Some(Operator::Plus) => self.nested(pos + 1, Parser::unary),
            _ => self.primary(pos),
        }
    }

    fn primary(&mut self, pos: usize) -> ParseResult {
        let Some(token) = self.tokens.get(pos) else {
            // Ran out while an operator still wanted an operand
            return Err(FormulaError::DanglingOperator {
                position: pos.saturating_sub(1),
            });
        };

        match &token.kind {
            TokenKind::Literal(text) => {
                let value = parse_number(text).ok_or_else(|| FormulaError::UnrecognizedLiteral(text.clone()))?;
                Ok((leaf(Expr::Number(value)), pos + 1))
            }
            TokenKind::Reference { kpi_id } => Ok((leaf(Expr::Reference(kpi_id.clone())), pos + 1)),
            TokenKind::Operator(Operator::LParen) => {
                let (inner, close) = self.nested(pos + 1, Parser::conditional)?;
                match self.operator_at(close) {
                    Some(Operator::RParen) => Ok((inner, close + 1)),
                    _ => Err(FormulaError::UnbalancedParen { position: pos }),
                }
            }
            TokenKind::Operator(Operator::RParen) if pos == 0 => {
                Err(FormulaError::UnbalancedParen { position: pos })
            }
            TokenKind::Operator(op) => Err(FormulaError::UnexpectedToken {
                position: pos,
                text: op.symbol().to_string(),
            }),
        }
    }
}

/// Plain decimal: digits with at most one '.', at least one digit.
fn parse_number(text: &str) -> Option<f64> {
    let digits = text.bytes().filter(u8::is_ascii_digit).count();
    let dots = text.bytes().filter(|&b| b == b'.').count();
    if digits == 0 || dots > 1 || digits + dots != text.len() {
        return None;
    }
    text.parse().ok()
}
