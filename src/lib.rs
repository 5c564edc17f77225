// Declare modules publicly so they are part of the library interface
pub mod environment;
pub mod evaluator;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod pretty_print;
pub mod primitives;
pub mod source;
pub mod special_forms;
pub mod types;

pub use environment::{EnvError, Environment};
pub use evaluator::{EvalError, EvalResult, evaluate};
pub use interpreter::{Interpreter, RunError};
pub use lexer::{LexerError, Scanner, Token, TokenKind, tokenize};
pub use parser::{ParseError, Parser, parse_all, parse_str};
pub use source::Span;
pub use types::{Node, Sexpr};
