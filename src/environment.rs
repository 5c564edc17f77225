use crate::primitives;
use crate::source::Span;
use crate::types::{Arity, Node};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    #[error("Unbound variable: '{0}'")]
    UnboundVariable(String, Span), // Name, and where it was referenced
    #[error("Procedure expects {expected}, got {got}")]
    ArityMismatch {
        expected: Arity,
        got: usize,
        span: Span, // Span of the call
    },
}

/// One lexical scope. Frames chain outward to the global frame.
#[derive(Debug)]
pub struct Environment {
    // Shared with every frame and closure created beneath this one.
    outer: Option<Rc<RefCell<Environment>>>,
    bindings: HashMap<String, Node>, // Maps variable names to values
}

impl Environment {
    /// An empty frame with no parent.
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Environment {
            outer: None,
            bindings: HashMap::new(),
        }))
    }

    /// Creates a global environment with every primitive procedure bound.
    pub fn new_global() -> Rc<RefCell<Environment>> {
        let env_ptr = Environment::new();
        primitives::install(&mut env_ptr.borrow_mut());
        env_ptr
    }

    /// An empty frame whose lookups fall through to `outer_env`.
    pub fn new_enclosed(outer_env: Rc<RefCell<Environment>>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Environment {
            outer: Some(outer_env),
            bindings: HashMap::new(),
        }))
    }

    /// Creates a child frame of `outer_env` binding `formals` to `arguments`.
    ///
    /// When `variadic` is set the last formal receives every argument past the
    /// fixed ones, collected into a proper list.
    pub fn extend(
        outer_env: Rc<RefCell<Environment>>,
        formals: &[String],
        variadic: bool,
        arguments: Vec<Node>,
        call_span: Span,
    ) -> Result<Rc<RefCell<Environment>>, EnvError> {
        let arity = if variadic {
            Arity::at_least(formals.len().saturating_sub(1))
        } else {
            Arity::exactly(formals.len())
        };
        if !arity.accepts(arguments.len()) {
            return Err(EnvError::ArityMismatch {
                expected: arity,
                got: arguments.len(),
                span: call_span,
            });
        }

        let mut bindings = HashMap::with_capacity(formals.len());
        let mut arguments = arguments.into_iter();
        for name in &formals[..arity.required] {
            // accepts() guarantees enough arguments for the fixed formals
            if let Some(value) = arguments.next() {
                bindings.insert(name.clone(), value);
            }
        }
        if let (true, Some(rest_name)) = (variadic, formals.last()) {
            let rest = Node::new_list(arguments.collect(), Node::new_nil(call_span));
            bindings.insert(rest_name.clone(), rest);
        }

        Ok(Rc::new(RefCell::new(Environment {
            outer: Some(outer_env),
            bindings,
        })))
    }

    /// Binds `name` in this frame, replacing any binding it already holds
    /// here. Outer frames are never touched.
    pub fn define(&mut self, name: String, value: Node) {
        self.bindings.insert(name, value);
    }

    /// Resolves `name` in the nearest frame that binds it.
    pub fn get(&self, name: &str, span: Span) -> Result<Node, EnvError> {
        match (self.bindings.get(name), &self.outer) {
            (Some(value), _) => Ok(value.clone()),
            (None, Some(outer)) => outer.borrow().get(name, span),
            (None, None) => Err(EnvError::UnboundVariable(name.to_string(), span)),
        }
    }

    /// Rebinds `name` in the nearest frame that already binds it. Never
    /// creates a binding; an unbound name is an error.
    pub fn set(&mut self, name: &str, value: Node, span: Span) -> Result<(), EnvError> {
        if let Some(slot) = self.bindings.get_mut(name) {
            *slot = value;
            return Ok(());
        }
        match &self.outer {
            Some(outer) => outer.borrow_mut().set(name, value, span),
            None => Err(EnvError::UnboundVariable(name.to_string(), span)),
        }
    }

    /// Gets every identifier visible from this frame.
    pub fn identifiers(&self) -> HashSet<String> {
        let mut identifiers: HashSet<String> = self.bindings.keys().cloned().collect();
        if let Some(outer) = &self.outer {
            identifiers.extend(outer.borrow().identifiers());
        }
        identifiers
    }
}
