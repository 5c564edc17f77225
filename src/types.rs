use crate::environment::Environment;
use crate::evaluator::EvalResult;
use crate::source::Span;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt; // For custom display formatting
use std::mem;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: Sexpr, // The actual S-expression data
    pub span: Span,  // The source span it covers
}

// Spans are source metadata; two nodes holding the same datum are equal
// wherever they were read from.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Node {
    pub fn new(kind: Sexpr, span: Span) -> Self {
        Node { kind, span }
    }

    pub fn new_number(n: f64, span: Span) -> Self {
        Node::new(Sexpr::Number(n), span)
    }

    pub fn new_bool(b: bool, span: Span) -> Self {
        Node::new(Sexpr::Boolean(b), span)
    }

    pub fn new_char(c: char, span: Span) -> Self {
        Node::new(Sexpr::Character(c), span)
    }

    pub fn new_string(s: &str, span: Span) -> Self {
        Node::new(Sexpr::String(s.to_string()), span)
    }

    pub fn new_symbol(name: String, span: Span) -> Self {
        Node::new(Sexpr::Symbol(Symbol::new(&name)), span)
    }

    pub fn new_nil(span: Span) -> Self {
        Node::new(Sexpr::Nil, span)
    }

    pub fn new_unspecified(span: Span) -> Self {
        Node::new(Sexpr::Unspecified, span)
    }

    pub fn new_pair(car: Node, cdr: Node, span: Span) -> Self {
        Node::new(Sexpr::Pair(Rc::new(Pair { car, cdr })), span)
    }

    /// Builds `(quote quoted)`. `quote_span` is the span of the `'` token.
    pub fn new_quote(quoted: Node, quote_span: Span) -> Self {
        let span = quote_span.merge(quoted.span);
        let tail = Node::new_pair(quoted, Node::new_nil(span), span);
        Node::new_pair(Node::new_symbol("quote".to_string(), quote_span), tail, span)
    }

    pub fn new_primitive(name: &'static str, arity: Arity, func: PrimitiveFunc) -> Self {
        Node::new(
            Sexpr::Procedure(Procedure::Primitive(Primitive { name, arity, func })),
            Span::default(),
        )
    }

    pub fn new_lambda(lambda: Lambda, span: Span) -> Self {
        Node::new(Sexpr::Procedure(Procedure::Lambda(Rc::new(lambda))), span)
    }

    /// Folds `items` right-to-left into pairs ending in `tail`.
    pub fn new_list(items: Vec<Node>, tail: Node) -> Self {
        items.into_iter().rev().fold(tail, |cdr, car| {
            let span = car.span.merge(cdr.span);
            Node::new_pair(car, cdr, span)
        })
    }

    /// Returns the elements of a proper list, or `None` for anything else.
    pub fn to_vec(&self) -> Option<Vec<Node>> {
        let mut items = Vec::new();
        let mut cursor = self;
        loop {
            match &cursor.kind {
                Sexpr::Nil => return Some(items),
                Sexpr::Pair(pair) => {
                    items.push(pair.car.clone());
                    cursor = &pair.cdr;
                }
                _ => return None,
            }
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match &self.kind {
            Sexpr::Symbol(symbol) => Some(symbol),
            _ => None,
        }
    }

    /// Everything except `#f` counts as true.
    pub fn is_true(&self) -> bool {
        !matches!(self.kind, Sexpr::Boolean(false))
    }

    pub fn is_unspecified(&self) -> bool {
        matches!(self.kind, Sexpr::Unspecified)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Delegate to Sexpr's Display implementation
        write!(f, "{}", self.kind)
    }
}

/// Represents a Scheme S-expression (Symbolic Expression).
/// The same enum carries parsed syntax, list data and runtime values.
#[derive(Debug, Clone, PartialEq)]
pub enum Sexpr {
    Boolean(bool),    // #t or #f
    Number(f64),      // Using f64 for all numeric literals
    Character(char),  // #\a, #\space
    String(String),   // For string literals "hello\n"
    Symbol(Symbol),   // e.g., +, variable-name, quote
    Nil,              // Represents the empty list '()
    Pair(Rc<Pair>),   // (car . cdr); proper lists end in Nil
    Unspecified,      // Result of forms evaluated for effect
    Procedure(Procedure),
}

#[derive(Debug, Clone)]
pub struct Pair {
    pub car: Node,
    pub cdr: Node,
}

// Equality and drop both walk the cdr spine in a loop, so a long flat list
// costs no stack. Only nesting through the car recurses.
impl PartialEq for Pair {
    fn eq(&self, other: &Self) -> bool {
        let (mut left, mut right) = (self, other);
        loop {
            if std::ptr::eq(left, right) {
                return true;
            }
            if left.car != right.car {
                return false;
            }
            match (&left.cdr.kind, &right.cdr.kind) {
                (Sexpr::Pair(next_left), Sexpr::Pair(next_right)) => {
                    left = &**next_left;
                    right = &**next_right;
                }
                (tail_left, tail_right) => return tail_left == tail_right,
            }
        }
    }
}

impl Drop for Pair {
    fn drop(&mut self) {
        let mut rest = mem::replace(&mut self.cdr.kind, Sexpr::Nil);
        while let Sexpr::Pair(next) = rest {
            match Rc::try_unwrap(next) {
                Ok(mut pair) => rest = mem::replace(&mut pair.cdr.kind, Sexpr::Nil),
                // Still shared, so dropping our handle frees nothing further
                Err(_) => break,
            }
        }
    }
}

impl Sexpr {
    pub fn type_name(&self) -> &'static str {
        match self {
            Sexpr::Boolean(_) => "boolean",
            Sexpr::Number(_) => "number",
            Sexpr::Character(_) => "character",
            Sexpr::String(_) => "string",
            Sexpr::Symbol(_) => "symbol",
            Sexpr::Nil => "empty list",
            Sexpr::Pair(_) => "pair",
            Sexpr::Unspecified => "unspecified",
            Sexpr::Procedure(_) => "procedure",
        }
    }
}

// Implement Display trait for printing values in external syntax
impl fmt::Display for Sexpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sexpr::Boolean(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Sexpr::Number(n) => write!(f, "{}", n),
            Sexpr::Character(c) => match character_name(*c) {
                Some(name) => write!(f, "#\\{}", name),
                None => write!(f, "#\\{}", c),
            },
            Sexpr::String(str) => {
                write!(
                    f,
                    "\"{}\"",
                    str.chars().fold(String::new(), |mut acc, char| {
                        match char {
                            '"' => acc.push_str("\\\""),
                            '\\' => acc.push_str("\\\\"),
                            '\n' => acc.push_str("\\n"),
                            '\r' => acc.push_str("\\r"),
                            '\t' => acc.push_str("\\t"),
                            c => acc.push(c),
                        }
                        acc
                    })
                )
            }
            Sexpr::Symbol(symbol) => write!(f, "{}", symbol.name()),
            Sexpr::Nil => write!(f, "()"),
            Sexpr::Pair(pair) => {
                write!(f, "({}", pair.car)?;
                // Walk the spine iteratively so long lists don't recurse
                let mut rest = &pair.cdr;
                loop {
                    match &rest.kind {
                        Sexpr::Nil => break,
                        Sexpr::Pair(next) => {
                            write!(f, " {}", next.car)?;
                            rest = &next.cdr;
                        }
                        other => {
                            write!(f, " . {}", other)?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
            Sexpr::Unspecified => write!(f, "#<unspecified>"),
            Sexpr::Procedure(procedure) => match procedure {
                Procedure::Primitive(primitive) => write!(f, "#<primitive:{}>", primitive.name),
                Procedure::Lambda(lambda) => match &lambda.name {
                    Some(name) => write!(f, "#<procedure {}>", name),
                    None => write!(f, "#<procedure>"),
                },
            },
        }
    }
}

/// Named character literals, shared with the lexer.
pub const CHARACTER_NAMES: [(&str, char); 5] = [
    ("nul", '\0'),
    ("tab", '\t'),
    ("newline", '\n'),
    ("return", '\r'),
    ("space", ' '),
];

fn character_name(c: char) -> Option<&'static str> {
    CHARACTER_NAMES
        .iter()
        .find(|(_, named)| *named == c)
        .map(|(name, _)| *name)
}

// --- Symbols ---

// Interned names are never released. A long REPL session keeps every
// symbol it has read, which is accepted.
thread_local! {
    static SYMBOL_TABLE: RefCell<HashSet<Rc<str>>> = RefCell::new(HashSet::new());
}

/// An interned symbol name. Symbols with equal names share one allocation,
/// so equality is an identity check.
#[derive(Clone)]
pub struct Symbol(Rc<str>);

impl Symbol {
    pub fn new(name: &str) -> Self {
        SYMBOL_TABLE.with(|table| {
            let mut table = table.borrow_mut();
            if let Some(existing) = table.get(name) {
                return Symbol(existing.clone());
            }
            let interned: Rc<str> = Rc::from(name);
            table.insert(interned.clone());
            Symbol(interned)
        })
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Symbol {}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", &*self.0)
    }
}

// --- Procedures ---

/// How many arguments a procedure accepts: exactly `required`, or at least
/// `required` when `variadic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub required: usize,
    pub variadic: bool,
}

impl Arity {
    pub const fn exactly(required: usize) -> Self {
        Arity {
            required,
            variadic: false,
        }
    }

    pub const fn at_least(required: usize) -> Self {
        Arity {
            required,
            variadic: true,
        }
    }

    pub fn accepts(&self, count: usize) -> bool {
        if self.variadic {
            count >= self.required
        } else {
            count == self.required
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plural = if self.required == 1 { "" } else { "s" };
        if self.variadic {
            write!(f, "at least {} argument{}", self.required, plural)
        } else {
            write!(f, "exactly {} argument{}", self.required, plural)
        }
    }
}

pub type PrimitiveFunc = fn(Vec<Node>, Span) -> EvalResult;

#[derive(Clone)]
pub struct Primitive {
    pub name: &'static str,
    pub arity: Arity,
    pub func: PrimitiveFunc,
}

/// A user-defined procedure closed over the environment it was created in.
pub struct Lambda {
    pub name: Option<String>,
    pub formals: Vec<String>,
    pub variadic: bool, // The last formal collects the remaining arguments
    pub body: Vec<Node>,
    pub env: Rc<RefCell<Environment>>,
}

impl Lambda {
    pub fn arity(&self) -> Arity {
        if self.variadic {
            Arity::at_least(self.formals.len() - 1)
        } else {
            Arity::exactly(self.formals.len())
        }
    }
}

#[derive(Clone)] // Need Clone for Sexpr::Procedure
pub enum Procedure {
    Primitive(Primitive),
    Lambda(Rc<Lambda>),
}

impl Procedure {
    pub fn arity(&self) -> Arity {
        match self {
            Procedure::Primitive(primitive) => primitive.arity,
            Procedure::Lambda(lambda) => lambda.arity(),
        }
    }
}

// The captured environment is left out: it usually contains the procedure itself.
impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Procedure::Primitive(primitive) => write!(f, "Primitive({})", primitive.name),
            Procedure::Lambda(lambda) => write!(
                f,
                "Lambda({:?}, {:?}, variadic: {})",
                lambda.name, lambda.formals, lambda.variadic
            ),
        }
    }
}

// Primitives compare by name, closures by identity.
impl PartialEq for Procedure {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Procedure::Primitive(p1), Procedure::Primitive(p2)) => p1.name == p2.name,
            (Procedure::Lambda(l1), Procedure::Lambda(l2)) => Rc::ptr_eq(l1, l2),
            _ => false,
        }
    }
}
