use crate::environment::{EnvError, Environment};
use crate::source::Span;
use crate::special_forms;
use crate::types::{Lambda, Node, Procedure, Sexpr, Symbol};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use thiserror::Error;
use tracing::trace;

// --- Evaluation Error ---
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    EnvError(#[from] EnvError), // Errors from environment lookup and procedure calls
    #[error("Evaluation Error: Expected a procedure, but got: {0}")]
    NotAProcedure(Sexpr, Span), // Span of the operator expression
    #[error("Evaluation Error: Invalid arguments - {0}")]
    InvalidArguments(String, Span), // Primitive argument of the wrong type or value
    #[error("Evaluation Error: Expected a symbol, but got: {0}")]
    NotASymbol(Sexpr, Span), // e.g. (define 5 1), (lambda (1) x)
    #[error("Evaluation Error: Invalid special form - {message}: {form}")]
    InvalidSpecialForm {
        message: String,
        form: String, // External representation of the offending form
        span: Span,
    },
    #[error("Evaluation Error: Application operator must have a procedure: ()")]
    EmptyApplication(Span),
    #[error("Internal Error: {0}")]
    Internal(String, Span),
}

impl EvalError {
    /// The source location the error should be reported at.
    pub fn span(&self) -> Span {
        match self {
            EvalError::EnvError(EnvError::UnboundVariable(_, span)) => *span,
            EvalError::EnvError(EnvError::ArityMismatch { span, .. }) => *span,
            EvalError::NotAProcedure(_, span)
            | EvalError::InvalidArguments(_, span)
            | EvalError::NotASymbol(_, span)
            | EvalError::EmptyApplication(span)
            | EvalError::Internal(_, span) => *span,
            EvalError::InvalidSpecialForm { span, .. } => *span,
        }
    }
}

// Result type alias for convenience
pub type EvalResult<T = Node> = Result<T, EvalError>;

fn malformed(message: &str, form: &Node) -> EvalError {
    EvalError::InvalidSpecialForm {
        message: message.to_string(),
        form: form.to_string(),
        span: form.span,
    }
}

fn expect_symbol(node: &Node) -> EvalResult<Symbol> {
    node.as_symbol()
        .cloned()
        .ok_or_else(|| EvalError::NotASymbol(node.kind.clone(), node.span))
}

// --- Evaluate Function ---

/// Evaluates a given AST Node within the specified environment.
pub fn evaluate(node: Node, env: Rc<RefCell<Environment>>) -> EvalResult {
    match &node.kind {
        // Self-evaluating atoms
        Sexpr::Number(_) | Sexpr::String(_) | Sexpr::Boolean(_) | Sexpr::Character(_) => Ok(node),

        Sexpr::Symbol(symbol) => Ok(env.borrow().get(symbol.name(), node.span)?),

        Sexpr::Nil => Err(EvalError::EmptyApplication(node.span)),

        Sexpr::Pair(pair) => {
            if let Some(handler) = pair
                .car
                .as_symbol()
                .and_then(|keyword| special_forms::lookup(keyword.name()))
            {
                trace!(form = %pair.car, "special form");
                let operands = pair
                    .cdr
                    .to_vec()
                    .ok_or_else(|| malformed("form must be a proper list", &node))?;
                return handler(&node, operands, env);
            }
            evaluate_application(&node, &pair.car, &pair.cdr, env)
        }

        // Values that only exist at runtime never appear in parsed code
        Sexpr::Unspecified | Sexpr::Procedure(_) => Err(EvalError::Internal(
            format!("cannot evaluate a {} as an expression", node.kind.type_name()),
            node.span,
        )),
    }
}

fn evaluate_application(
    form: &Node,
    operator: &Node,
    operands: &Node,
    env: Rc<RefCell<Environment>>,
) -> EvalResult {
    // Errors raised while evaluating the operator propagate unchanged
    let operator_value = evaluate(operator.clone(), env.clone())?;
    let procedure = match operator_value.kind {
        Sexpr::Procedure(procedure) => procedure,
        other => return Err(EvalError::NotAProcedure(other, operator.span)),
    };

    let operands = operands
        .to_vec()
        .ok_or_else(|| malformed("application must be a proper list", form))?;
    let mut evaluated_args: Vec<Node> = Vec::with_capacity(operands.len());
    for operand_node in operands {
        evaluated_args.push(evaluate(operand_node, env.clone())?);
    }

    apply(&procedure, evaluated_args, form.span)
}

/// Calls `procedure` with already evaluated arguments. `span` is the call site.
pub fn apply(procedure: &Procedure, args: Vec<Node>, span: Span) -> EvalResult {
    match procedure {
        Procedure::Primitive(primitive) => {
            if !primitive.arity.accepts(args.len()) {
                return Err(EvalError::EnvError(EnvError::ArityMismatch {
                    expected: primitive.arity,
                    got: args.len(),
                    span,
                }));
            }
            trace!(primitive = primitive.name, args = args.len(), "apply");
            (primitive.func)(args, span)
        }
        Procedure::Lambda(lambda) => {
            trace!(procedure = ?lambda.name, args = args.len(), "apply");
            let frame =
                Environment::extend(lambda.env.clone(), &lambda.formals, lambda.variadic, args, span)?;
            evaluate_sequence(&lambda.body, frame, span)
        }
    }
}

/// Evaluates `body` in order and returns the last value, or unspecified
/// for an empty body.
pub fn evaluate_sequence(body: &[Node], env: Rc<RefCell<Environment>>, span: Span) -> EvalResult {
    let mut result = Node::new_unspecified(span);
    for expression in body {
        result = evaluate(expression.clone(), env.clone())?;
    }
    Ok(result)
}

// --- Special Forms ---

pub(crate) fn evaluate_quote(
    form: &Node,
    operands: Vec<Node>,
    _env: Rc<RefCell<Environment>>,
) -> EvalResult {
    if let [quoted] = &operands[..] {
        Ok(quoted.clone())
    } else {
        Err(malformed("quote expects exactly one operand", form))
    }
}

pub(crate) fn evaluate_set(
    form: &Node,
    operands: Vec<Node>,
    env: Rc<RefCell<Environment>>,
) -> EvalResult {
    let [target, expression] = &operands[..] else {
        return Err(malformed("set! expects a variable and an expression", form));
    };
    let name = expect_symbol(target)?;
    let value = evaluate(expression.clone(), env.clone())?;
    env.borrow_mut().set(name.name(), value, form.span)?;
    Ok(Node::new_unspecified(form.span))
}

pub(crate) fn evaluate_define(
    form: &Node,
    operands: Vec<Node>,
    env: Rc<RefCell<Environment>>,
) -> EvalResult {
    let Some((target, rest)) = operands.split_first() else {
        return Err(malformed("define expects a name and an expression", form));
    };
    match &target.kind {
        Sexpr::Symbol(name) => {
            let [expression] = rest else {
                return Err(malformed("define expects a name and exactly one expression", form));
            };
            let value = evaluate(expression.clone(), env.clone())?;
            env.borrow_mut().define(name.name().to_string(), value);
        }
        // (define (name . formals) body...)
        Sexpr::Pair(signature) => {
            if rest.is_empty() {
                return Err(malformed("procedure definition needs a body", form));
            }
            let name = expect_symbol(&signature.car)?;
            let (formals, variadic) = parse_formals(&signature.cdr, form)?;
            let lambda = Lambda {
                name: Some(name.name().to_string()),
                formals,
                variadic,
                body: rest.to_vec(),
                env: env.clone(),
            };
            env.borrow_mut()
                .define(name.name().to_string(), Node::new_lambda(lambda, form.span));
        }
        _ => return Err(EvalError::NotASymbol(target.kind.clone(), target.span)),
    }
    Ok(Node::new_unspecified(form.span))
}

pub(crate) fn evaluate_if(
    form: &Node,
    operands: Vec<Node>,
    env: Rc<RefCell<Environment>>,
) -> EvalResult {
    let (condition, consequent, alternate) = match &operands[..] {
        [condition, consequent] => (condition, consequent, None),
        [condition, consequent, alternate] => (condition, consequent, Some(alternate)),
        _ => {
            return Err(malformed(
                "if expects condition, consequent, and optional alternate",
                form,
            ));
        }
    };

    if evaluate(condition.clone(), env.clone())?.is_true() {
        evaluate(consequent.clone(), env)
    } else if let Some(alternate) = alternate {
        evaluate(alternate.clone(), env)
    } else {
        Ok(Node::new_unspecified(form.span))
    }
}

pub(crate) fn evaluate_cond(
    form: &Node,
    operands: Vec<Node>,
    env: Rc<RefCell<Environment>>,
) -> EvalResult {
    for clause in &operands {
        let Some(items) = clause.to_vec() else {
            return Err(malformed("cond clause must be a list", form));
        };
        let Some((test, body)) = items.split_first() else {
            return Err(malformed("cond clause must not be empty", form));
        };

        if test.as_symbol().is_some_and(|symbol| symbol.name() == "else") {
            if body.is_empty() {
                return Err(malformed("else clause needs at least one expression", form));
            }
            return evaluate_sequence(body, env, form.span);
        }

        let value = evaluate(test.clone(), env.clone())?;
        if value.is_true() {
            // A clause without a body yields the value of its test
            return if body.is_empty() {
                Ok(value)
            } else {
                evaluate_sequence(body, env, form.span)
            };
        }
    }
    Ok(Node::new_unspecified(form.span))
}

pub(crate) fn evaluate_begin(
    form: &Node,
    operands: Vec<Node>,
    env: Rc<RefCell<Environment>>,
) -> EvalResult {
    evaluate_sequence(&operands, env, form.span)
}

pub(crate) fn evaluate_lambda(
    form: &Node,
    operands: Vec<Node>,
    env: Rc<RefCell<Environment>>,
) -> EvalResult {
    let Some((formals, body)) = operands.split_first() else {
        return Err(malformed("lambda expects formals and a body", form));
    };
    if body.is_empty() {
        return Err(malformed("lambda needs at least one body expression", form));
    }
    let (formals, variadic) = parse_formals(formals, form)?;
    let lambda = Lambda {
        name: None,
        formals,
        variadic,
        body: body.to_vec(),
        env,
    };
    Ok(Node::new_lambda(lambda, form.span))
}

pub(crate) fn evaluate_let(
    form: &Node,
    operands: Vec<Node>,
    env: Rc<RefCell<Environment>>,
) -> EvalResult {
    let Some((bindings, body)) = operands.split_first() else {
        return Err(malformed("let expects bindings and a body", form));
    };
    if body.is_empty() {
        return Err(malformed("let needs at least one body expression", form));
    }
    let Some(bindings) = bindings.to_vec() else {
        return Err(malformed("let bindings must be a list", form));
    };

    let mut names = Vec::with_capacity(bindings.len());
    let mut values = Vec::with_capacity(bindings.len());
    for binding in &bindings {
        match binding.to_vec().as_deref() {
            Some([name, init]) => {
                names.push(expect_symbol(name)?.name().to_string());
                // Every init sees the enclosing environment, not earlier bindings
                values.push(evaluate(init.clone(), env.clone())?);
            }
            _ => return Err(malformed("each let binding must be (name expression)", form)),
        }
    }
    ensure_distinct(&names, form)?;

    let frame = Environment::extend(env, &names, false, values, form.span)?;
    evaluate_sequence(body, frame, form.span)
}

/// Reads a lambda parameter list: `(a b)`, `(a . rest)` or a bare `args`.
/// Returns the names and whether the last one collects extra arguments.
fn parse_formals(formals: &Node, form: &Node) -> EvalResult<(Vec<String>, bool)> {
    let mut names = Vec::new();
    let mut cursor = formals;
    let variadic = loop {
        match &cursor.kind {
            Sexpr::Nil => break false,
            Sexpr::Pair(pair) => {
                names.push(expect_symbol(&pair.car)?.name().to_string());
                cursor = &pair.cdr;
            }
            Sexpr::Symbol(rest) => {
                names.push(rest.name().to_string());
                break true;
            }
            _ => return Err(EvalError::NotASymbol(cursor.kind.clone(), cursor.span)),
        }
    };
    ensure_distinct(&names, form)?;
    Ok((names, variadic))
}

fn ensure_distinct(names: &[String], form: &Node) -> EvalResult<()> {
    let mut seen = HashSet::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(malformed(&format!("duplicate variable '{}'", name), form));
        }
    }
    Ok(())
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_all, parse_str};
    use crate::types::Arity;

    // Evaluates every datum in `input` and returns the last value
    fn eval_all(input: &str, env: Rc<RefCell<Environment>>) -> EvalResult {
        let nodes = parse_all(input)
            .unwrap_or_else(|e| panic!("Parsing failed for input '{}': {}", input, e));
        let mut result = Node::new_unspecified(Span::default());
        for node in nodes {
            result = evaluate(node, env.clone())?;
        }
        Ok(result)
    }

    // Helper to evaluate input string and check result kind (ignores span)
    fn assert_eval_kind(input: &str, expected_kind: Sexpr, env: Option<Rc<RefCell<Environment>>>) {
        let env = env.unwrap_or_else(Environment::new_global);
        match eval_all(input, env) {
            Ok(result_node) => assert_eq!(result_node.kind, expected_kind, "Input: '{}'", input),
            Err(e) => panic!("Evaluation failed for input '{}': {}", input, e),
        }
    }

    // Helper to check the printed form of a result
    fn assert_eval_prints(input: &str, expected: &str) {
        match eval_all(input, Environment::new_global()) {
            Ok(result_node) => assert_eq!(result_node.to_string(), expected, "Input: '{}'", input),
            Err(e) => panic!("Evaluation failed for input '{}': {}", input, e),
        }
    }

    // Helper to assert evaluation errors
    fn assert_eval_error(
        input: &str,
        expected_error_variant: &EvalError,
        env: Option<Rc<RefCell<Environment>>>,
    ) {
        let env = env.unwrap_or_else(Environment::new_global);
        match eval_all(input, env) {
            Ok(result) => panic!(
                "Expected evaluation to fail for input '{}', but got: {:?}",
                input, result
            ),
            Err(e) => assert_eq!(
                std::mem::discriminant(&e),
                std::mem::discriminant(expected_error_variant),
                "Input: '{}', Expected error variant like {:?}, got: {:?}",
                input,
                expected_error_variant,
                e
            ),
        }
    }

    fn sym(name: &str) -> Sexpr {
        Sexpr::Symbol(Symbol::new(name))
    }

    fn invalid_form() -> EvalError {
        EvalError::InvalidSpecialForm {
            message: String::new(),
            form: String::new(),
            span: Span::default(),
        }
    }

    fn unbound() -> EvalError {
        EvalError::EnvError(EnvError::UnboundVariable(String::new(), Span::default()))
    }

    fn arity_mismatch() -> EvalError {
        EvalError::EnvError(EnvError::ArityMismatch {
            expected: Arity::exactly(0),
            got: 0,
            span: Span::default(),
        })
    }

    #[test]
    fn test_eval_self_evaluating() {
        assert_eval_kind("123", Sexpr::Number(123.0), None);
        assert_eval_kind("-4.5", Sexpr::Number(-4.5), None);
        assert_eval_kind("#t", Sexpr::Boolean(true), None);
        assert_eval_kind("#f", Sexpr::Boolean(false), None);
        assert_eval_kind("#\\a", Sexpr::Character('a'), None);
        assert_eval_kind(r#""hello""#, Sexpr::String("hello".to_string()), None);
    }

    #[test]
    fn test_self_evaluating_is_repeatable_and_pure() {
        let env = Environment::new_global();
        let names_before = env.borrow().identifiers();
        for input in ["42", r#""text""#, "#\\x", "#t", "#f"] {
            let datum = parse_str(input).unwrap();
            let first = evaluate(datum.clone(), env.clone()).unwrap();
            let second = evaluate(datum.clone(), env.clone()).unwrap();
            assert_eq!(first, second, "Input: '{}'", input);
            assert_eq!(first, datum, "Input: '{}'", input);
        }
        assert_eq!(env.borrow().identifiers(), names_before);
    }

    #[test]
    fn test_eval_empty_application() {
        assert_eval_error("()", &EvalError::EmptyApplication(Span::default()), None);
    }

    #[test]
    fn test_eval_symbol_lookup_ok() {
        let env = Environment::new();
        env.borrow_mut()
            .define("x".to_string(), Node::new_number(100.0, Span::default()));
        assert_eval_kind("x", Sexpr::Number(100.0), Some(env));
    }

    #[test]
    fn test_eval_symbol_lookup_unbound() {
        assert_eval_error("y", &unbound(), Some(Environment::new()));
        let err = eval_all("\n  y", Environment::new()).unwrap_err();
        assert_eq!(err.span(), Span::new(3, 4));
    }

    #[test]
    fn test_eval_quote() {
        assert_eval_kind("'1", Sexpr::Number(1.0), None);
        assert_eval_kind("'a", sym("a"), None);
        assert_eval_kind("'#t", Sexpr::Boolean(true), None);
        assert_eval_kind("'()", Sexpr::Nil, None);
        assert_eval_kind("(quote ())", Sexpr::Nil, None);
        assert_eval_prints("'(1 2)", "(1 2)");
        assert_eval_prints("(quote (undefined-fn x . y))", "(undefined-fn x . y)");
        assert_eval_prints("''a", "(quote a)");

        assert_eval_error("(quote a b)", &invalid_form(), None);
        assert_eval_error("(quote)", &invalid_form(), None);
    }

    #[test]
    fn test_invalid_special_form_carries_form_text() {
        let err = eval_all("(quote a b)", Environment::new_global()).unwrap_err();
        match err {
            EvalError::InvalidSpecialForm { form, span, .. } => {
                assert_eq!(form, "(quote a b)");
                assert_eq!(span, Span::new(0, 11));
            }
            other => panic!("Expected InvalidSpecialForm, got {:?}", other),
        }
    }

    #[test]
    fn test_eval_if_true() {
        assert_eval_kind("(if #t 1 2)", Sexpr::Number(1.0), None);
        assert_eval_kind("(if #t 1)", Sexpr::Number(1.0), None);
        assert_eval_kind("(if 0 1 2)", Sexpr::Number(1.0), None); // 0 is true
        assert_eval_kind("(if '() 1 2)", Sexpr::Number(1.0), None); // '() is true
        assert_eval_kind("(if \"hello\" 1 2)", Sexpr::Number(1.0), None);
        assert_eval_kind("(if (quote x) 1 2)", Sexpr::Number(1.0), None);
    }

    #[test]
    fn test_eval_if_false() {
        assert_eval_kind("(if #f 1 2)", Sexpr::Number(2.0), None);
        assert_eval_kind("(if #f 1)", Sexpr::Unspecified, None);
    }

    #[test]
    fn test_eval_if_nested() {
        let env = Environment::new();
        env.borrow_mut()
            .define("x".to_string(), Node::new_bool(true, Span::default()));
        env.borrow_mut()
            .define("y".to_string(), Node::new_bool(false, Span::default()));

        assert_eval_kind("(if x 1 (if y 2 3))", Sexpr::Number(1.0), Some(env.clone()));
        assert_eval_kind("(if y 1 (if x 2 3))", Sexpr::Number(2.0), Some(env));
    }

    #[test]
    fn test_eval_if_does_not_evaluate_unused_branch() {
        let env = Environment::new();
        assert_eval_kind("(if #t 'good unbound-variable)", sym("good"), Some(env.clone()));
        assert_eval_kind("(if #f unbound-variable 'good)", sym("good"), Some(env));
    }

    #[test]
    fn test_eval_if_errors() {
        assert_eval_error("(if)", &invalid_form(), None);
        assert_eval_error("(if #t)", &invalid_form(), None);
        assert_eval_error("(if #t 1 2 3)", &invalid_form(), None);
        assert_eval_error("(if unbound 1 2)", &unbound(), None);
    }

    #[test]
    fn test_eval_define_and_set() {
        assert_eval_kind("(define x 10) x", Sexpr::Number(10.0), None);
        assert_eval_kind("(define x 10)", Sexpr::Unspecified, None);
        assert_eval_kind("(define x 10) (set! x (+ x 1)) x", Sexpr::Number(11.0), None);
        assert_eval_kind("(define x 1) (set! x 2)", Sexpr::Unspecified, None);
        // Redefinition replaces the binding
        assert_eval_kind("(define x 1) (define x 'two) x", sym("two"), None);
    }

    #[test]
    fn test_eval_define_and_set_errors() {
        assert_eval_error("(set! nope 1)", &unbound(), None);
        assert_eval_error("(set! 5 1)", &EvalError::NotASymbol(Sexpr::Nil, Span::default()), None);
        assert_eval_error("(set! x)", &invalid_form(), None);
        assert_eval_error("(define)", &invalid_form(), None);
        assert_eval_error("(define x)", &invalid_form(), None);
        assert_eval_error("(define x 1 2)", &invalid_form(), None);
        assert_eval_error(
            "(define \"x\" 1)",
            &EvalError::NotASymbol(Sexpr::Nil, Span::default()),
            None,
        );
        assert_eval_error("(define (f x))", &invalid_form(), None);
        // A failed initializer leaves nothing behind
        assert_eval_error("(define y nope) y", &unbound(), None);
    }

    #[test]
    fn test_eval_define_procedure_shorthand() {
        assert_eval_kind("(define (square x) (* x x)) (square 5)", Sexpr::Number(25.0), None);
        assert_eval_prints("(define (square x) (* x x)) square", "#<procedure square>");
        assert_eval_prints("(define (tail first . rest) rest) (tail 1 2 3)", "(2 3)");
        assert_eval_prints("(define (all . args) args) (all)", "()");
    }

    #[test]
    fn test_eval_cond() {
        assert_eval_kind("(cond (#f 1) (#t 2))", Sexpr::Number(2.0), None);
        assert_eval_kind("(cond (#f 1) (else 3))", Sexpr::Number(3.0), None);
        assert_eval_kind("(cond (#f 1))", Sexpr::Unspecified, None);
        assert_eval_kind("(cond)", Sexpr::Unspecified, None);
        // Test value is the result when the clause has no body
        assert_eval_kind("(cond (#f) (42))", Sexpr::Number(42.0), None);
        // Clause bodies are sequences
        assert_eval_kind("(define x 0) (cond (#t (set! x 5) (+ x 1)))", Sexpr::Number(6.0), None);
        // Later tests are not evaluated once one succeeds
        assert_eval_kind("(cond (1 'first) (unbound 'second))", sym("first"), None);
    }

    #[test]
    fn test_eval_cond_errors() {
        assert_eval_error("(cond 5)", &invalid_form(), None);
        assert_eval_error("(cond ())", &invalid_form(), None);
        assert_eval_error("(cond (else))", &invalid_form(), None);
    }

    #[test]
    fn test_eval_begin() {
        assert_eval_kind("(begin 1 2 3)", Sexpr::Number(3.0), None);
        assert_eval_kind("(begin)", Sexpr::Unspecified, None);
        assert_eval_kind("(begin (define x 4) (* x x))", Sexpr::Number(16.0), None);
    }

    #[test]
    fn test_eval_lambda_application() {
        assert_eval_kind("((lambda (x y) (+ x y)) 3 4)", Sexpr::Number(7.0), None);
        assert_eval_kind("((lambda () 42))", Sexpr::Number(42.0), None);
        assert_eval_prints("(lambda (x) x)", "#<procedure>");
        // Body is a sequence
        assert_eval_kind("((lambda (x) (set! x (* x 2)) x) 21)", Sexpr::Number(42.0), None);
    }

    #[test]
    fn test_eval_lambda_variadic() {
        assert_eval_prints("((lambda args args) 1 2 3)", "(1 2 3)");
        assert_eval_prints("((lambda args args))", "()");
        assert_eval_prints("((lambda (a . b) b) 1 2 3)", "(2 3)");
        assert_eval_kind("((lambda (a . b) a) 1)", Sexpr::Number(1.0), None);
        assert_eval_error("((lambda (a . b) a))", &arity_mismatch(), None);
    }

    #[test]
    fn test_eval_lambda_errors() {
        assert_eval_error("(lambda (x))", &invalid_form(), None);
        assert_eval_error("(lambda)", &invalid_form(), None);
        assert_eval_error("(lambda (x x) x)", &invalid_form(), None);
        assert_eval_error(
            "(lambda (1) x)",
            &EvalError::NotASymbol(Sexpr::Nil, Span::default()),
            None,
        );
        assert_eval_error("((lambda (x) x))", &arity_mismatch(), None);
        assert_eval_error("((lambda (x) x) 1 2)", &arity_mismatch(), None);
    }

    #[test]
    fn test_closures_capture_lexical_scope() {
        assert_eval_kind(
            "(define make-adder (lambda (n) (lambda (x) (+ x n))))
             (define add3 (make-adder 3))
             (define n 100)
             (add3 4)",
            Sexpr::Number(7.0),
            None,
        );
        // Each call gets its own frame
        assert_eval_kind(
            "(define (make-counter)
               (let ((count 0))
                 (lambda () (set! count (+ count 1)) count)))
             (define a (make-counter))
             (define b (make-counter))
             (a) (a) (b)
             (a)",
            Sexpr::Number(3.0),
            None,
        );
    }

    #[test]
    fn test_parameters_shadow_globals() {
        let env = Environment::new_global();
        assert_eval_kind(
            "(define x 10) (define (f x) x) (f 1)",
            Sexpr::Number(1.0),
            Some(env.clone()),
        );
        assert_eval_kind("x", Sexpr::Number(10.0), Some(env));
    }

    #[test]
    fn test_define_inside_body_is_local() {
        let env = Environment::new_global();
        assert_eval_kind(
            "(define (outer a) (define helper (lambda (b) (+ a b))) (helper 10)) (outer 5)",
            Sexpr::Number(15.0),
            Some(env.clone()),
        );
        assert_eval_error("helper", &unbound(), Some(env));
    }

    #[test]
    fn test_recursion() {
        assert_eval_kind(
            "(define (fact n) (if (= n 0) 1 (* n (fact (- n 1))))) (fact 10)",
            Sexpr::Number(3628800.0),
            None,
        );
        assert_eval_kind(
            "(define (fib n) (cond ((< n 2) n) (else (+ (fib (- n 1)) (fib (- n 2)))))) (fib 15)",
            Sexpr::Number(610.0),
            None,
        );
    }

    #[test]
    fn test_eval_let() {
        assert_eval_kind("(let ((x 1) (y 2)) (+ x y))", Sexpr::Number(3.0), None);
        assert_eval_kind("(let () 5)", Sexpr::Number(5.0), None);
        // Initializers see the outer binding of x, not the new one
        assert_eval_kind("(let ((x 1)) (let ((x 2) (y x)) y))", Sexpr::Number(1.0), None);
        // The frame does not leak
        assert_eval_error("(let ((z 1)) z) z", &unbound(), None);
    }

    #[test]
    fn test_eval_let_errors() {
        assert_eval_error("(let ((x 1)))", &invalid_form(), None);
        assert_eval_error("(let x 1)", &invalid_form(), None);
        assert_eval_error("(let ((x)) x)", &invalid_form(), None);
        assert_eval_error("(let ((x 1) (x 2)) x)", &invalid_form(), None);
        assert_eval_error(
            "(let ((1 2)) 3)",
            &EvalError::NotASymbol(Sexpr::Nil, Span::default()),
            None,
        );
    }

    #[test]
    fn test_special_form_keywords_cannot_be_shadowed() {
        let env = Environment::new_global();
        assert_eval_kind("(define if 5) (if #f 1 2)", Sexpr::Number(2.0), Some(env.clone()));
        // The variable itself is still reachable in operand position
        assert_eval_kind("(+ if 1)", Sexpr::Number(6.0), Some(env));
    }

    #[test]
    fn test_arguments_evaluate_left_to_right() {
        assert_eval_prints(
            "(define trail '())
             (define (note x) (set! trail (cons x trail)) x)
             (list (note 1) (note 2) (note 3))
             trail",
            "(3 2 1)",
        );
    }

    #[test]
    fn test_eval_not_procedure_error() {
        let not_proc = EvalError::NotAProcedure(Sexpr::Nil, Span::default());
        assert_eval_error("(1 2 3)", &not_proc, None);
        assert_eval_error("(\"hello\" 1)", &not_proc, None);
        assert_eval_error("((list 1 2) 3)", &not_proc, None);

        let err = eval_all("(5 6)", Environment::new_global()).unwrap_err();
        assert_eq!(err, EvalError::NotAProcedure(Sexpr::Number(5.0), Span::new(1, 2)));
    }

    #[test]
    fn test_operator_errors_are_not_masked() {
        // An unbound operator reports the lookup failure, not "not a procedure"
        assert_eval_error("(undefined-fn 1)", &unbound(), None);
        // Operands are not evaluated when the operator is not a procedure
        assert_eval_error(
            "(1 undefined)",
            &EvalError::NotAProcedure(Sexpr::Nil, Span::default()),
            None,
        );
    }

    #[test]
    fn test_improper_forms_are_rejected() {
        assert_eval_error("(+ 1 . 2)", &invalid_form(), None);
        assert_eval_error("(quote . a)", &invalid_form(), None);
    }

    #[test]
    fn test_runtime_values_are_not_code() {
        let env = Environment::new_global();
        let procedure = env.borrow().get("car", Span::default()).unwrap();
        assert!(matches!(
            evaluate(procedure, env.clone()),
            Err(EvalError::Internal(..))
        ));
        assert!(matches!(
            evaluate(Node::new_unspecified(Span::default()), env),
            Err(EvalError::Internal(..))
        ));
    }

    #[test]
    fn test_apply_checks_primitive_arity() {
        let env = Environment::new_global();
        let car = match env.borrow().get("car", Span::default()).unwrap().kind {
            Sexpr::Procedure(procedure) => procedure,
            other => panic!("Expected a procedure, got {:?}", other),
        };
        let result = apply(&car, vec![], Span::default());
        assert_eq!(
            result,
            Err(EvalError::EnvError(EnvError::ArityMismatch {
                expected: Arity::exactly(1),
                got: 0,
                span: Span::default(),
            }))
        );
        let list = evaluate(parse_str("'(1 2)").unwrap(), env.clone()).unwrap();
        assert_eq!(apply(&car, vec![list], Span::default()).unwrap().kind, Sexpr::Number(1.0));
    }
}
