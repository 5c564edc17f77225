use std::rc::Rc;

use crate::environment::{EnvError, Environment};
use crate::types::{Arity, Pair, PrimitiveFunc};
use crate::{EvalError, EvalResult, Node, Sexpr, Span};

const PRIMITIVES: &[(&str, Arity, PrimitiveFunc)] = &[
    // Arithmetic
    ("+", Arity::at_least(0), prim_add),
    ("-", Arity::at_least(1), prim_sub),
    ("*", Arity::at_least(0), prim_mul),
    ("/", Arity::at_least(1), prim_div),
    // Numeric comparison, chained across all arguments
    ("=", Arity::at_least(2), prim_equals),
    ("<", Arity::at_least(2), prim_less_than),
    ("<=", Arity::at_least(2), prim_less_than_or_equals),
    (">", Arity::at_least(2), prim_greater_than),
    (">=", Arity::at_least(2), prim_greater_than_or_equals),
    // Pairs and lists
    ("cons", Arity::exactly(2), prim_cons),
    ("car", Arity::exactly(1), prim_car),
    ("cdr", Arity::exactly(1), prim_cdr),
    ("list", Arity::at_least(0), prim_list),
    // Type predicates
    ("null?", Arity::exactly(1), prim_is_null),
    ("pair?", Arity::exactly(1), prim_is_pair),
    ("number?", Arity::exactly(1), prim_is_number),
    ("boolean?", Arity::exactly(1), prim_is_boolean),
    ("symbol?", Arity::exactly(1), prim_is_symbol),
    ("string?", Arity::exactly(1), prim_is_string),
    ("char?", Arity::exactly(1), prim_is_char),
    ("procedure?", Arity::exactly(1), prim_is_procedure),
    // Logic and identity
    ("not", Arity::exactly(1), prim_not),
    ("eq?", Arity::exactly(2), prim_is_eq),
    ("equal?", Arity::exactly(2), prim_is_equal),
];

/// Binds every primitive procedure in `env`.
pub fn install(env: &mut Environment) {
    for &(name, arity, func) in PRIMITIVES {
        env.define(name.to_string(), Node::new_primitive(name, arity, func));
    }
}

// Arity is checked by the evaluator before a primitive runs; these only
// guard against a table entry that disagrees with its function.
fn one_arg(args: Vec<Node>, span: Span) -> EvalResult<Node> {
    let got = args.len();
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(arg), None) => Ok(arg),
        _ => Err(arity_error(Arity::exactly(1), got, span)),
    }
}

fn two_args(args: Vec<Node>, span: Span) -> EvalResult<(Node, Node)> {
    let got = args.len();
    let mut args = args.into_iter();
    match (args.next(), args.next(), args.next()) {
        (Some(first), Some(second), None) => Ok((first, second)),
        _ => Err(arity_error(Arity::exactly(2), got, span)),
    }
}

fn arity_error(expected: Arity, got: usize, span: Span) -> EvalError {
    EvalError::EnvError(EnvError::ArityMismatch {
        expected,
        got,
        span,
    })
}

// Extracts a number from a Node or reports which argument was wrong
fn expect_number(node: &Node, name: &str, arg_pos: usize, span: Span) -> EvalResult<f64> {
    match node.kind {
        Sexpr::Number(n) => Ok(n),
        _ => Err(EvalError::InvalidArguments(
            format!(
                "Primitive '{}' expects a number for argument {}, got {}",
                name,
                arg_pos,
                node.kind.type_name()
            ),
            span, // Use call span for arg type errors
        )),
    }
}

fn numbers(args: &[Node], name: &str, span: Span) -> EvalResult<Vec<f64>> {
    args.iter()
        .enumerate()
        .map(|(i, node)| expect_number(node, name, i + 1, span))
        .collect()
}

fn fold_numbers<F: Fn(f64, f64) -> f64>(
    args: Vec<Node>,
    span: Span,
    start: f64,
    func: F,
    operator: &str,
) -> EvalResult {
    let result = numbers(&args, operator, span)?.into_iter().fold(start, func);
    Ok(Node::new_number(result, span))
}

fn compare_numbers<F: Fn(f64, f64) -> bool>(
    args: Vec<Node>,
    span: Span,
    compare: F,
    operator: &str,
) -> EvalResult {
    // Every argument is type checked even once the chain has failed
    let values = numbers(&args, operator, span)?;
    let holds = values.windows(2).all(|pair| compare(pair[0], pair[1]));
    Ok(Node::new_bool(holds, span))
}

// --- Arithmetic ---

fn prim_add(args: Vec<Node>, span: Span) -> EvalResult {
    // (+) -> 0
    // (+ 1 2 3) -> 6
    fold_numbers(args, span, 0.0, |acc, val| acc + val, "+")
}

fn prim_sub(args: Vec<Node>, span: Span) -> EvalResult {
    // (- x) -> -x
    // (- x y z) -> x - y - z
    match numbers(&args, "-", span)?.split_first() {
        Some((first, [])) => Ok(Node::new_number(-first, span)),
        Some((first, rest)) => Ok(Node::new_number(
            rest.iter().fold(*first, |acc, val| acc - val),
            span,
        )),
        None => Err(arity_error(Arity::at_least(1), 0, span)),
    }
}

fn prim_mul(args: Vec<Node>, span: Span) -> EvalResult {
    // (*) -> 1
    // (* 1 2 3) -> 6
    fold_numbers(args, span, 1.0, |acc, val| acc * val, "*")
}

fn prim_div(args: Vec<Node>, span: Span) -> EvalResult {
    // (/ x) -> 1/x
    // (/ x y z) -> x / y / z
    let values = numbers(&args, "/", span)?;
    let (dividend, divisors) = match values.split_first() {
        Some((first, [])) => (1.0, std::slice::from_ref(first)),
        Some((first, rest)) => (*first, rest),
        None => return Err(arity_error(Arity::at_least(1), 0, span)),
    };
    if divisors.contains(&0.0) {
        return Err(EvalError::InvalidArguments(
            "Division by zero".to_string(),
            span,
        ));
    }
    Ok(Node::new_number(
        divisors.iter().fold(dividend, |acc, val| acc / val),
        span,
    ))
}

// --- Comparison ---

fn prim_equals(args: Vec<Node>, span: Span) -> EvalResult {
    compare_numbers(args, span, |left, right| left == right, "=")
}

fn prim_less_than(args: Vec<Node>, span: Span) -> EvalResult {
    compare_numbers(args, span, |left, right| left < right, "<")
}

fn prim_less_than_or_equals(args: Vec<Node>, span: Span) -> EvalResult {
    compare_numbers(args, span, |left, right| left <= right, "<=")
}

fn prim_greater_than(args: Vec<Node>, span: Span) -> EvalResult {
    compare_numbers(args, span, |left, right| left > right, ">")
}

fn prim_greater_than_or_equals(args: Vec<Node>, span: Span) -> EvalResult {
    compare_numbers(args, span, |left, right| left >= right, ">=")
}

// --- List Primitives ---

fn prim_cons(args: Vec<Node>, span: Span) -> EvalResult {
    // (cons a b) -> (a . b)
    let (car, cdr) = two_args(args, span)?;
    Ok(Node::new_pair(car, cdr, span))
}

fn expect_pair(arg: &Node, name: &str) -> EvalResult<Rc<Pair>> {
    match &arg.kind {
        Sexpr::Pair(pair) => Ok(pair.clone()),
        other => Err(EvalError::InvalidArguments(
            format!("{}: Expected a pair, got {}", name, other.type_name()),
            arg.span, // Span of the incorrect argument
        )),
    }
}

fn prim_car(args: Vec<Node>, span: Span) -> EvalResult {
    let arg = one_arg(args, span)?;
    Ok(expect_pair(&arg, "car")?.car.clone())
}

fn prim_cdr(args: Vec<Node>, span: Span) -> EvalResult {
    let arg = one_arg(args, span)?;
    Ok(expect_pair(&arg, "cdr")?.cdr.clone())
}

fn prim_list(args: Vec<Node>, span: Span) -> EvalResult {
    // (list) -> ()
    let mut list = Node::new_list(args, Node::new_nil(span));
    list.span = span;
    Ok(list)
}

// --- Type Predicates ---

macro_rules! is_type {
    ($fn_name:ident, $type:pat) => {
        fn $fn_name(args: Vec<Node>, span: Span) -> EvalResult {
            let arg = one_arg(args, span)?;
            Ok(Node::new_bool(matches!(arg.kind, $type), span))
        }
    };
}

is_type!(prim_is_null, Sexpr::Nil);
is_type!(prim_is_pair, Sexpr::Pair(_));
is_type!(prim_is_number, Sexpr::Number(_));
is_type!(prim_is_boolean, Sexpr::Boolean(_));
is_type!(prim_is_symbol, Sexpr::Symbol(_));
is_type!(prim_is_string, Sexpr::String(_));
is_type!(prim_is_char, Sexpr::Character(_));
is_type!(prim_is_procedure, Sexpr::Procedure(_));

// --- Logic and Identity ---

fn prim_not(args: Vec<Node>, span: Span) -> EvalResult {
    let arg = one_arg(args, span)?;
    Ok(Node::new_bool(!arg.is_true(), span))
}

fn prim_is_eq(args: Vec<Node>, span: Span) -> EvalResult {
    // Pairs are identical only when they are the same allocation
    let (left, right) = two_args(args, span)?;
    let same = match (&left.kind, &right.kind) {
        (Sexpr::Pair(a), Sexpr::Pair(b)) => Rc::ptr_eq(a, b),
        (a, b) => a == b,
    };
    Ok(Node::new_bool(same, span))
}

fn prim_is_equal(args: Vec<Node>, span: Span) -> EvalResult {
    let (left, right) = two_args(args, span)?;
    Ok(Node::new_bool(left == right, span))
}
