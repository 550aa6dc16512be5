// Formula evaluator - evaluates parsed expressions over f64
// Relational, equality and logical operators yield 1.0 (true) / 0.0 (false)

use crate::kpi::KpiId;

use super::error::FormulaError;
use super::parser::{parse, BinaryOp, Expr};
use super::tokenizer::tokenize;

/// Supplies numeric values for KPI references during evaluation.
///
/// Takes `&mut self` so implementors can compute and memoize referenced
/// values on demand.
pub trait ValueLookup {
    fn value_of(&mut self, id: &KpiId) -> f64;
}

impl<F> ValueLookup for F
where
    F: FnMut(&KpiId) -> f64,
{
    fn value_of(&mut self, id: &KpiId) -> f64 {
        self(id)
    }
}

/// Tokenize, parse and evaluate formula text.
pub fn evaluate_formula<L: ValueLookup + ?Sized>(formula: &str, lookup: &mut L) -> Result<f64, FormulaError> {
    let tokens = tokenize(formula);
    let expr = parse(&tokens)?;
    evaluate(&expr, lookup)
}

/// Evaluate a parsed expression.
///
/// An infinite or NaN result is `FormulaError::NonFinite`, never a value.
pub fn evaluate<L: ValueLookup + ?Sized>(expr: &Expr, lookup: &mut L) -> Result<f64, FormulaError> {
    let value = eval_expr(expr, lookup)?;
    if !value.is_finite() {
        return Err(FormulaError::NonFinite);
    }
    Ok(value)
}

fn eval_expr<L: ValueLookup + ?Sized>(expr: &Expr, lookup: &mut L) -> Result<f64, FormulaError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Reference(id) => Ok(lookup.value_of(id)),
        Expr::Negate(inner) => Ok(-eval_expr(inner, lookup)?),
        Expr::Conditional { cond, then, otherwise } => {
            // Only the selected branch is evaluated
            if truthy(eval_expr(cond, lookup)?) {
                eval_expr(then, lookup)
            } else {
                eval_expr(otherwise, lookup)
            }
        }
        Expr::BinaryOp { op: BinaryOp::And, left, right } => {
            if !truthy(eval_expr(left, lookup)?) {
                return Ok(0.0);
            }
            Ok(flag(truthy(eval_expr(right, lookup)?)))
        }
        Expr::BinaryOp { op: BinaryOp::Or, left, right } => {
            if truthy(eval_expr(left, lookup)?) {
                return Ok(1.0);
            }
            Ok(flag(truthy(eval_expr(right, lookup)?)))
        }
        Expr::BinaryOp { op, left, right } => {
            let l = eval_expr(left, lookup)?;
            let r = eval_expr(right, lookup)?;
            apply_binary(*op, l, r)
        }
    }
}

fn apply_binary(op: BinaryOp, l: f64, r: f64) -> Result<f64, FormulaError> {
    let result = match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div => {
            if r == 0.0 {
                return Err(FormulaError::DivisionByZero);
            }
            l / r
        }
        BinaryOp::Gt => flag(l > r),
        BinaryOp::Lt => flag(l < r),
        BinaryOp::GtEq => flag(l >= r),
        BinaryOp::LtEq => flag(l <= r),
        BinaryOp::Eq => flag(l == r),
        BinaryOp::NotEq => flag(l != r),
        BinaryOp::And => flag(truthy(l) && truthy(r)),
        BinaryOp::Or => flag(truthy(l) || truthy(r)),
    };
    Ok(result)
}

fn truthy(value: f64) -> bool {
    value != 0.0
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "0f8b2c1e-5d4a-4b3c-9e2f-1a2b3c4d5e6f";
    const B: &str = "7c9e6679-7425-40de-944b-e07fc1f90ae7";

    fn eval(formula: &str) -> Result<f64, FormulaError> {
        evaluate_formula(formula, &mut |_: &KpiId| 0.0)
    }

    fn eval_with(formula: &str, a: f64, b: f64) -> Result<f64, FormulaError> {
        let mut lookup = |id: &KpiId| match id.as_str() {
            A => a,
            B => b,
            _ => 0.0,
        };
        evaluate_formula(formula, &mut lookup)
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3"), Ok(7.0));
        assert_eq!(eval("(1 + 2) * 3"), Ok(9.0));
        assert_eq!(eval("10 / 4"), Ok(2.5));
        assert_eq!(eval("8 - 3 - 2"), Ok(3.0));
        assert_eq!(eval("-2 * 3"), Ok(-6.0));
    }

    #[test]
    fn test_references() {
        assert_eq!(eval_with(&format!("kpi:{A} * 2"), 10.0, 0.0), Ok(20.0));
        assert_eq!(eval_with(&format!("kpi:{A} + kpi:{B}"), 10.0, 20.0), Ok(30.0));
        assert_eq!(eval_with(&format!("kpi:{A}"), 7.5, 0.0), Ok(7.5));
    }

    #[test]
    fn test_relational_and_equality_yield_flags() {
        assert_eq!(eval("3 > 2"), Ok(1.0));
        assert_eq!(eval("3 < 2"), Ok(0.0));
        assert_eq!(eval("2 >= 2"), Ok(1.0));
        assert_eq!(eval("2 <= 1"), Ok(0.0));
        assert_eq!(eval("2 = 2"), Ok(1.0));
        assert_eq!(eval("2 != 2"), Ok(0.0));
        // flags feed arithmetic
        assert_eq!(eval("(3 > 2) * 10 + (1 = 2)"), Ok(10.0));
    }

    #[test]
    fn test_logical_operators() {
        assert_eq!(eval("1 && 5"), Ok(1.0));
        assert_eq!(eval("1 && 0"), Ok(0.0));
        assert_eq!(eval("0 || 0"), Ok(0.0));
        assert_eq!(eval("0 || 7"), Ok(1.0));
    }

    #[test]
    fn test_logical_short_circuit() {
        assert_eq!(eval("0 && 1 / 0"), Ok(0.0));
        assert_eq!(eval("1 || 1 / 0"), Ok(1.0));
    }

    #[test]
    fn test_ternary() {
        assert_eq!(eval("1 ? 10 : 20"), Ok(10.0));
        assert_eq!(eval("0 ? 10 : 20"), Ok(20.0));
        assert_eq!(eval_with(&format!("kpi:{A} > 5 ? kpi:{A} : 5"), 9.0, 0.0), Ok(9.0));
        // unselected branch is not evaluated
        assert_eq!(eval("1 ? 2 : 1 / 0"), Ok(2.0));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(eval_with(&format!("kpi:{A} / 0"), 10.0, 0.0), Err(FormulaError::DivisionByZero));
        assert_eq!(eval("1 / (2 - 2)"), Err(FormulaError::DivisionByZero));
    }

    #[test]
    fn test_overflow_is_non_finite() {
        let huge = format!("1{}", "0".repeat(400));
        assert_eq!(eval(&huge), Err(FormulaError::NonFinite));
        assert_eq!(eval(&format!("{huge} - {huge}")), Err(FormulaError::NonFinite));
        let big = format!("1{}", "0".repeat(300));
        assert_eq!(eval(&format!("{big} * {big}")), Err(FormulaError::NonFinite));
        // an infinite intermediate that ends finite is fine
        assert_eq!(eval(&format!("({huge} > 1) * 3")), Ok(3.0));
    }

    #[test]
    fn test_deeply_nested_formula_is_error_not_crash() {
        let deep = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert_eq!(eval(&deep), Err(FormulaError::TooDeep));
        assert_eq!(eval(&format!("{}1", "-".repeat(10_000))), Err(FormulaError::TooDeep));
    }

    #[test]
    fn test_malformed_is_error_not_panic() {
        assert!(eval("(1 + 2").is_err());
        assert!(eval("1 +").is_err());
        assert!(eval("revenue * 2").is_err());
        assert!(eval("").is_err());
    }
}
