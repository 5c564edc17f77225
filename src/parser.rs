use crate::Span;
use crate::lexer::{LexerError, LexerRangedResult, Scanner, Token, TokenKind};
use crate::types::Node;
use thiserror::Error;

/// Lists and quote abbreviations nested deeper than this are rejected
/// instead of recursing further.
pub const DEFAULT_MAX_DEPTH: usize = 512;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("line {}: expected {expected} but found \"{found}\"", .found.line)]
    UnexpectedToken { found: Token, expected: String },
    #[error("line {}: {} must be closed with {closer}", .opener.line, .opener.kind)]
    UnclosedList { opener: Token, closer: TokenKind },
    #[error("line {}: expression expected before {dot}", .dot.line)]
    MissingDatumBeforeDot { dot: Token },
    #[error("line {}: expected {expected} after \"{after}\" but found end of input", .after.line)]
    UnexpectedEof { after: Token, expected: String },
    #[error("expected a datum but found end of input")]
    EmptyInput,
    #[error("line {}: nesting deeper than {limit} levels at \"{token}\"", .token.line)]
    NestingTooDeep { token: Token, limit: usize },
    #[error("{0}")]
    LexerError(#[from] LexerError), // Scanner errors surface immediately
}

// Result type alias for convenience
pub type ParseResult<T> = Result<T, ParseError>;

/// Recursive-descent datum parser pulling tokens from any token stream.
pub struct Parser<I> {
    tokens: I,
    depth: usize,
    max_depth: usize,
    failed: bool, // Set once an error has been yielded by the iterator
}

impl<'src> Parser<Scanner<'src>> {
    pub fn from_source(source: &'src str) -> Self {
        Parser::new(Scanner::new(source))
    }
}

impl<I> Parser<I>
where
    I: Iterator<Item = LexerRangedResult<Token>>,
{
    pub fn new(tokens: I) -> Self {
        Parser::with_max_depth(tokens, DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(tokens: I, max_depth: usize) -> Self {
        Parser {
            tokens,
            depth: 0,
            max_depth,
            failed: false,
        }
    }

    // Consumes the next token; lexer errors become parse errors here.
    fn next_token(&mut self) -> ParseResult<Option<Token>> {
        Ok(self.tokens.next().transpose()?)
    }

    /// Returns the next datum, or `None` once the token stream is exhausted.
    pub fn next_datum(&mut self) -> ParseResult<Option<Node>> {
        self.depth = 0;
        match self.next_token()? {
            Some(token) => self.parse_datum(token).map(Some),
            None => Ok(None),
        }
    }

    /// Parses the datum starting with `token`.
    fn parse_datum(&mut self, token: Token) -> ParseResult<Node> {
        match &token.kind {
            TokenKind::LParen => self.parse_list(token, TokenKind::RParen),
            TokenKind::LBracket => self.parse_list(token, TokenKind::RBracket),
            TokenKind::Quote => self.parse_quote(token),
            TokenKind::RParen | TokenKind::RBracket | TokenKind::Dot => {
                Err(ParseError::UnexpectedToken {
                    found: token,
                    expected: "a datum".to_string(),
                })
            }
            TokenKind::Boolean(b) => Ok(Node::new_bool(*b, token.span)),
            TokenKind::Number(n) => Ok(Node::new_number(*n, token.span)),
            TokenKind::Character(c) => Ok(Node::new_char(*c, token.span)),
            TokenKind::String(s) => Ok(Node::new_string(s, token.span)),
            TokenKind::Symbol(s) => Ok(Node::new_symbol(s.clone(), token.span)),
        }
    }

    fn enter(&mut self, token: &Token) -> ParseResult<()> {
        if self.depth >= self.max_depth {
            return Err(ParseError::NestingTooDeep {
                token: token.clone(),
                limit: self.max_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    /// Parses the rest of a list whose opening delimiter was `opener`.
    fn parse_list(&mut self, opener: Token, closer: TokenKind) -> ParseResult<Node> {
        self.enter(&opener)?;
        let mut elements = Vec::new();
        let mut tail = None;
        let end = loop {
            let token = match self.next_token()? {
                Some(token) => token,
                None => return Err(ParseError::UnclosedList { opener, closer }),
            };
            if token.kind == closer {
                break token.span.end;
            }
            match &token.kind {
                TokenKind::Dot => {
                    if elements.is_empty() {
                        return Err(ParseError::MissingDatumBeforeDot { dot: token });
                    }
                    let last = match self.next_token()? {
                        Some(next) => self.parse_datum(next)?,
                        None => return Err(ParseError::UnclosedList { opener, closer }),
                    };
                    tail = Some(last);
                    match self.next_token()? {
                        Some(next) if next.kind == closer => break next.span.end,
                        Some(next) => {
                            return Err(ParseError::UnexpectedToken {
                                found: next,
                                expected: format!("{} after the datum following .", closer),
                            });
                        }
                        None => return Err(ParseError::UnclosedList { opener, closer }),
                    }
                }
                kind if kind.is_closer() => {
                    return Err(ParseError::UnexpectedToken {
                        found: token,
                        expected: format!(
                            "{} to close {} from line {}",
                            closer, opener.kind, opener.line
                        ),
                    });
                }
                _ => elements.push(self.parse_datum(token)?),
            }
        };
        self.depth -= 1;

        let tail = tail.unwrap_or_else(|| Node::new_nil(Span::new(end - 1, end)));
        let mut list = Node::new_list(elements, tail);
        list.span = Span::new(opener.span.start, end);
        Ok(list)
    }

    /// Parses `'datum` into `(quote datum)`.
    fn parse_quote(&mut self, quote: Token) -> ParseResult<Node> {
        self.enter(&quote)?;
        let quoted = match self.next_token()? {
            Some(token) => self.parse_datum(token)?,
            None => {
                return Err(ParseError::UnexpectedEof {
                    after: quote,
                    expected: "a datum".to_string(),
                });
            }
        };
        self.depth -= 1;
        Ok(Node::new_quote(quoted, quote.span))
    }
}

impl<I> Iterator for Parser<I>
where
    I: Iterator<Item = LexerRangedResult<Token>>,
{
    type Item = ParseResult<Node>;

    // Stops for good after the first error.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = self.next_datum().transpose();
        if matches!(result, Some(Err(_))) {
            self.failed = true;
        }
        result
    }
}

/// Parses exactly one datum; trailing input is an error.
pub fn parse_str(input: &str) -> ParseResult<Node> {
    let mut parser = Parser::from_source(input);
    let node = parser.next_datum()?.ok_or(ParseError::EmptyInput)?;
    match parser.next_token()? {
        Some(found) => Err(ParseError::UnexpectedToken {
            found,
            expected: "end of input".to_string(),
        }),
        None => Ok(node),
    }
}

/// Parses every datum in `input`.
pub fn parse_all(input: &str) -> ParseResult<Vec<Node>> {
    Parser::from_source(input).collect()
}
