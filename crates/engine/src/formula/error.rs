use std::fmt;

/// Why a formula failed to produce a value.
///
/// Always contained to the KPI that owns the formula: the pass records it and
/// uses 0 as that KPI's value.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaError {
    /// No tokens at all.
    Empty,
    /// Parenthesis at this token index has no partner.
    UnbalancedParen { position: usize },
    /// Operator at this token index is missing its right-hand operand.
    DanglingOperator { position: usize },
    /// Token at this index cannot appear here.
    UnexpectedToken { position: usize, text: String },
    /// Literal that is not a plain decimal number.
    UnrecognizedLiteral(String),
    /// Nesting or operator chain past the parser's depth limits.
    TooDeep,
    DivisionByZero,
    /// Result overflowed to infinity or is not a number.
    NonFinite,
}

impl fmt::Display for FormulaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty formula"),
            Self::UnbalancedParen { position } => {
                write!(f, "unbalanced parenthesis at token {position}")
            }
            Self::DanglingOperator { position } => {
                write!(f, "operator at token {position} is missing an operand")
            }
            Self::UnexpectedToken { position, text } => {
                write!(f, "unexpected '{text}' at token {position}")
            }
            Self::UnrecognizedLiteral(text) => write!(f, "unrecognized literal '{text}'"),
            Self::TooDeep => write!(f, "formula is nested too deeply"),
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::NonFinite => write!(f, "result is not a finite number"),
        }
    }
}

impl std::error::Error for FormulaError {}
