//! Expression evaluation for numeric feature parameters.
//!
//! The replay engine only depends on the [`Evaluate`] trait. The
//! [`ArithmeticEvaluator`] is the default implementation: a small
//! recursive-descent evaluator over the document's variable buffer.

pub mod parser;

use std::collections::BTreeMap;

use tracing::debug;

pub use parser::{parse, Expr};

/// Errors from parsing or evaluating a single expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("unexpected character '{found}' at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected token '{token}'")]
    UnexpectedToken { token: String },

    #[error("unknown variable '{name}'")]
    UnknownVariable { name: String },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("function '{name}' expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("result is not finite")]
    NotFinite,

    #[error("expression nests deeper than {limit} levels")]
    TooDeep { limit: usize },

    #[error("expression has {found} tokens, limit is {limit}")]
    TooLong { found: usize, limit: usize },
}

/// Evaluates an equation against a buffer of user-defined assignments.
///
/// Failure is `None`; callers degrade the field rather than abort.
pub trait Evaluate {
    fn evaluate(&self, buffer: &str, equation: &str) -> Option<f64>;
}

/// The per-document expression buffer (`width = 20; height = width / 2`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpressionContext {
    buffer: String,
}

impl ExpressionContext {
    pub fn new(buffer: impl Into<String>) -> Self {
        Self {
            buffer: buffer.into(),
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn set_buffer(&mut self, buffer: impl Into<String>) {
        self.buffer = buffer.into();
    }

    /// Evaluate `equation` against this buffer with the given evaluator.
    pub fn evaluate(&self, evaluator: &dyn Evaluate, equation: &str) -> Option<f64> {
        evaluator.evaluate(&self.buffer, equation)
    }
}

/// Arithmetic evaluator: numbers, variables, `+ - * / % ^`, parentheses and
/// a fixed set of math functions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArithmeticEvaluator;

impl ArithmeticEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Bind every `name = expr` statement of the buffer, in order.
    ///
    /// Statements are separated by newlines or `;`. A statement that fails to
    /// parse or evaluate is skipped and leaves its name unbound.
    pub fn bindings(&self, buffer: &str) -> BTreeMap<String, f64> {
        let mut vars = BTreeMap::new();
        for statement in buffer.split(['\n', ';']) {
            let statement = statement.trim();
            if statement.is_empty() || statement.starts_with("//") || statement.starts_with('#') {
                continue;
            }
            let Some((name, rhs)) = statement.split_once('=') else {
                continue;
            };
            let name = name.trim().trim_start_matches("const ").trim_start_matches("let ").trim();
            if !is_identifier(name) {
                continue;
            }
            match parse(rhs).and_then(|expr| expr.eval(&vars)) {
                Ok(value) => {
                    vars.insert(name.to_string(), value);
                }
                Err(e) => debug!(name, error = %e, "skipping expression binding"),
            }
        }
        vars
    }

    /// Evaluate with full error detail.
    pub fn try_evaluate(&self, buffer: &str, equation: &str) -> Result<f64, ExpressionError> {
        let vars = self.bindings(buffer);
        let value = parse(equation)?.eval(&vars)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ExpressionError::NotFinite)
        }
    }
}

impl Evaluate for ArithmeticEvaluator {
    fn evaluate(&self, buffer: &str, equation: &str) -> Option<f64> {
        match self.try_evaluate(buffer, equation) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(equation, error = %e, "expression evaluation failed");
                None
            }
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
