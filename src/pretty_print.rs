use crate::environment::EnvError;
use crate::interpreter::RunError;
use crate::{EvalError, LexerError, ParseError};
use ariadne::{Label, Report, ReportKind, Source};
use std::io;
use std::ops::Range;

// Writes a single-label error report for `input` to stderr.
fn report(
    source_name: &str,
    input: &str,
    range: Range<usize>,
    message: String,
    label: String,
) -> io::Result<()> {
    // Clamp so a stale span can never index past the text being shown
    let end = range.end.min(input.len());
    let range = range.start.min(end)..end;
    Report::build(ReportKind::Error, (source_name, range.clone()))
        .with_message(message)
        .with_label(Label::new((source_name, range)).with_message(label))
        .finish()
        .eprint((source_name, Source::from(input)))
}

fn end_of_input(input: &str) -> Range<usize> {
    input.len().saturating_sub(1)..input.len()
}

impl LexerError {
    pub fn pretty_print(&self, source_name: &str, input: &str) -> io::Result<()> {
        report(
            source_name,
            input,
            self.span.to_range(),
            "Lexer Error".to_string(),
            self.error.to_string(),
        )
    }
}

impl ParseError {
    pub fn pretty_print(&self, source_name: &str, input: &str) -> io::Result<()> {
        let (range, message, label) = match self {
            ParseError::UnexpectedToken { found, expected } => (
                found.span.to_range(),
                format!("Unexpected token: {}", found.kind),
                format!("Expected {expected}"),
            ),
            ParseError::UnclosedList { opener, closer } => (
                opener.span.to_range(),
                "Unclosed list".to_string(),
                format!("This {} is never closed with {}", opener.kind, closer),
            ),
            ParseError::MissingDatumBeforeDot { dot } => (
                dot.span.to_range(),
                "Invalid dot syntax".to_string(),
                "An expression is expected before the dot".to_string(),
            ),
            ParseError::UnexpectedEof { after, expected } => (
                after.span.to_range(),
                "Unexpected end of input".to_string(),
                format!("Expected {expected} after this"),
            ),
            ParseError::EmptyInput => (
                end_of_input(input),
                "Unexpected end of input".to_string(),
                "Expected a datum".to_string(),
            ),
            ParseError::NestingTooDeep { token, limit } => (
                token.span.to_range(),
                "Nesting too deep".to_string(),
                format!("This exceeds the limit of {limit} nested levels"),
            ),
            ParseError::LexerError(lex_err) => return lex_err.pretty_print(source_name, input),
        };
        report(source_name, input, range, message, label)
    }
}

impl EvalError {
    pub fn pretty_print(&self, source_name: &str, input: &str) -> io::Result<()> {
        let (message, label) = match self {
            EvalError::EnvError(EnvError::UnboundVariable(symbol, _)) => (
                format!("Unbound symbol `{}`", symbol),
                "This symbol is not defined in the current scope".to_string(),
            ),
            EvalError::EnvError(err @ EnvError::ArityMismatch { .. }) => (
                "Wrong number of arguments".to_string(),
                err.to_string(),
            ),
            EvalError::NotAProcedure(sexpr, _) => (
                format!("Not a procedure: {}", sexpr),
                "This expression cannot be called as a procedure".to_string(),
            ),
            EvalError::InvalidArguments(message, _) => {
                ("Invalid arguments".to_string(), message.clone())
            }
            EvalError::NotASymbol(sexpr, _) => (
                format!("Not a symbol: {}", sexpr),
                format!("Expected a symbol but found a {}", sexpr.type_name()),
            ),
            EvalError::InvalidSpecialForm { message, .. } => (
                format!("Invalid special form: {}", message),
                "This special form is malformed or incomplete".to_string(),
            ),
            EvalError::EmptyApplication(_) => (
                "Application operator must have a procedure".to_string(),
                "The empty list cannot be called".to_string(),
            ),
            EvalError::Internal(message, _) => {
                ("Internal error".to_string(), message.clone())
            }
        };
        report(source_name, input, self.span().to_range(), message, label)
    }
}

impl RunError {
    pub fn pretty_print(&self, source_name: &str, input: &str) -> io::Result<()> {
        match self {
            RunError::Parse(err) => err.pretty_print(source_name, input),
            RunError::Eval(err) => err.pretty_print(source_name, input),
            RunError::Internal(message) => {
                eprintln!("{}: internal error: {}", source_name, message);
                Ok(())
            }
        }
    }
}
