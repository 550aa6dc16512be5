// Formula tokenizing, parsing, evaluation and position-addressed editing

pub mod editor;
pub mod error;
pub mod eval;
pub mod parser;
pub mod refs;
pub mod tokenizer;

pub use error::FormulaError;
pub use eval::{evaluate, evaluate_formula, ValueLookup};
pub use parser::{parse, BinaryOp, Expr};
pub use tokenizer::{serialize, tokenize, Operator, Token, TokenKind};
