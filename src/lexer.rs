use logos::{Lexer, Logos};
use std::fmt;
use thiserror::Error;

use crate::Span;
use crate::types::CHARACTER_NAMES;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r\f]+")] // Skip whitespace
#[logos(skip r";[^\n]*")] // Skip comments
#[logos(error = LexerErrorKind)]
pub enum TokenKind {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(".")]
    Dot,
    #[token("'")]
    Quote,
    #[token("#t", |_| true)]
    #[token("#T", |_| true)]
    #[token("#f", |_| false)]
    #[token("#F", |_| false)]
    Boolean(bool),
    #[regex(r"[-+]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:[eE][-+]?[0-9]+)?", number)]
    Number(f64),
    #[regex(r#"#\\.[^\s()\[\]";']*"#, character)]
    Character(char),
    #[regex(r#""([^"\\]|\\.)*"?"#, string)]
    String(String),
    // Initial Subsequent* | + | - | ... | ->Subsequent*
    #[regex(
        r"[\p{L}!$%&*/:<=>?^_~][\p{L}0-9!$%&*/:<=>?^_~+\-.@]*|\+|-|\.\.\.|->[\p{L}0-9!$%&*/:<=>?^_~+\-.@]*",
        |lex| lex.slice().to_string()
    )]
    Symbol(String),
}

impl TokenKind {
    pub fn is_closer(&self) -> bool {
        matches!(self, TokenKind::RParen | TokenKind::RBracket)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub line: usize, // 1-based
}

fn number(lex: &mut Lexer<TokenKind>) -> LexerResult<f64> {
    let slice = lex.slice();
    slice
        .parse::<f64>()
        .map_err(|_| LexerErrorKind::InvalidNumberFormat(slice.to_string()))
}

fn character(lex: &mut Lexer<TokenKind>) -> LexerResult<char> {
    let slice = lex.slice();
    let body = &slice[2..]; // after #\
    if let Some((_, c)) = CHARACTER_NAMES.iter().find(|(name, _)| *name == body) {
        return Ok(*c);
    }
    let mut chars = body.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(LexerErrorKind::InvalidCharacterLiteral(slice.to_string())),
    }
}

fn string(lex: &mut Lexer<TokenKind>) -> LexerResult<String> {
    unescape(&lex.slice()[1..])
}

fn escaped(c: char) -> Option<char> {
    match c {
        'n' => Some('\n'),
        'r' => Some('\r'),
        't' => Some('\t'),
        '\\' | '"' => Some(c),
        _ => None,
    }
}

/// Decodes a string body up to its closing quote. The regex also matches
/// a string missing that quote so the error can be reported here.
fn unescape(body: &str) -> LexerResult<String> {
    let mut decoded = String::with_capacity(body.len());
    let mut chars = body.chars();
    loop {
        match chars.next() {
            Some('"') => return Ok(decoded),
            Some('\\') => {
                let c = chars.next().ok_or(LexerErrorKind::UnterminatedString)?;
                decoded.push(escaped(c).ok_or(LexerErrorKind::UnknownEscapeSequence(c))?);
            }
            Some(c) => decoded.push(c),
            None => return Err(LexerErrorKind::UnterminatedString),
        }
    }
}

// Renders the token back as source text
impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::LBracket => write!(f, "["),
            TokenKind::RBracket => write!(f, "]"),
            TokenKind::Dot => write!(f, "."),
            TokenKind::Quote => write!(f, "'"),
            TokenKind::Boolean(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            TokenKind::Number(n) => write!(f, "{}", n),
            TokenKind::Character(c) => match CHARACTER_NAMES.iter().find(|(_, named)| named == c) {
                Some((name, _)) => write!(f, "#\\{}", name),
                None => write!(f, "#\\{}", c),
            },
            TokenKind::String(s) => write!(f, "{:?}", s),
            TokenKind::Symbol(s) => write!(f, "{}", s),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

#[derive(Default, Debug, Clone, PartialEq, Error)]
pub enum LexerErrorKind {
    #[error("Unterminated string literal")]
    UnterminatedString,
    #[error("Invalid number format: '{0}'")]
    InvalidNumberFormat(String),
    #[error("Invalid character literal: '{0}'")]
    InvalidCharacterLiteral(String),
    #[error("Unknown escape sequence: '\\{0}'")]
    UnknownEscapeSequence(char),
    #[default]
    #[error("Invalid token")]
    InvalidToken,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: {error} in \"{text}\"")]
pub struct LexerError {
    pub error: LexerErrorKind,
    pub span: Span,
    pub line: usize,
    pub text: String, // The offending source text
}

// Result type alias for convenience
type LexerResult<T> = Result<T, LexerErrorKind>;

// Result type alias for convenience
pub type LexerRangedResult<T> = Result<T, LexerError>;

/// Pull-based token stream over a source string.
///
/// Yields `Ok(token)` for each token, `Err(error)` for text that cannot be
/// classified, and `None` once the input is exhausted.
pub struct Scanner<'src> {
    lexer: Lexer<'src, TokenKind>,
    line: usize,
    counted_to: usize, // Byte offset up to which newlines are counted
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Scanner {
            lexer: TokenKind::lexer(source),
            line: 1,
            counted_to: 0,
        }
    }

    fn line_at(&mut self, offset: usize) -> usize {
        let source = self.lexer.source();
        self.line += source.as_bytes()[self.counted_to..offset]
            .iter()
            .filter(|b| **b == b'\n')
            .count();
        self.counted_to = offset;
        self.line
    }
}

impl Iterator for Scanner<'_> {
    type Item = LexerRangedResult<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.lexer.next()?;
        let range = self.lexer.span();
        let span = Span::new(range.start, range.end);
        let line = self.line_at(range.start);
        Some(match result {
            Ok(kind) => Ok(Token { kind, span, line }),
            Err(error) => Err(LexerError {
                error,
                span,
                line,
                text: self.lexer.slice().to_string(),
            }),
        })
    }
}

// Helper function to tokenize a string directly (useful for tests and the REPL)
pub fn tokenize(input: &str) -> LexerRangedResult<Vec<Token>> {
    Scanner::new(input).collect()
}
