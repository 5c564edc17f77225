//! Top-level driver: reads datums from a source and evaluates each one
//! against a single global environment that persists across calls.

use crate::environment::Environment;
use crate::evaluator::{EvalError, evaluate};
use crate::lexer::Scanner;
use crate::parser::{DEFAULT_MAX_DEPTH, ParseError, Parser};
use crate::types::Node;
use crate::Span;
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    #[error(transparent)]
    Parse(#[from] ParseError), // Stops the rest of the source
    #[error(transparent)]
    Eval(#[from] EvalError), // Only from eval_str, which stops at the first failure
    #[error("Internal Error: {0}")]
    Internal(String),
}

pub struct Interpreter {
    global: Rc<RefCell<Environment>>,
    max_depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Interpreter {
            global: Environment::new_global(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Bounds how deeply lists and quotes may nest in parsed source.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn global_env(&self) -> Rc<RefCell<Environment>> {
        self.global.clone()
    }

    /// Evaluates every datum in `source` in order, handing each outcome to
    /// `on_result`.
    ///
    /// An evaluation error only abandons the form that raised it. A parse
    /// error abandons the rest of `source` and is returned; datums read
    /// before it have already been evaluated.
    pub fn run<F>(&self, source: &str, mut on_result: F) -> Result<(), RunError>
    where
        F: FnMut(Result<Node, EvalError>),
    {
        let mut parser = Parser::with_max_depth(Scanner::new(source), self.max_depth);
        while let Some(datum) = parser.next_datum()? {
            trace!(span = %datum.span, "top-level form");
            match evaluate(datum, self.global.clone()) {
                Err(EvalError::Internal(message, span)) => {
                    debug!(%span, "internal error, stopping");
                    return Err(RunError::Internal(message));
                }
                result => on_result(result),
            }
        }
        Ok(())
    }

    /// Evaluates all of `source` and returns the value of the last datum,
    /// stopping at the first error of any kind. Datums after the failing
    /// one are neither parsed nor evaluated.
    pub fn eval_str(&self, source: &str) -> Result<Node, RunError> {
        let mut parser = Parser::with_max_depth(Scanner::new(source), self.max_depth);
        let mut last = Node::new_unspecified(Span::default());
        while let Some(datum) = parser.next_datum()? {
            last = match evaluate(datum, self.global.clone()) {
                Err(EvalError::Internal(message, _)) => return Err(RunError::Internal(message)),
                result => result?,
            };
        }
        Ok(last)
    }
}
