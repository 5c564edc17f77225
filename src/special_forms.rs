//! Keyword table consulted by the evaluator before ordinary application.
//!
//! The table is built once, on first use, and is read-only afterwards.
//! Keywords are matched by name only, so binding a variable called `if`
//! does not stop `(if ...)` from being the conditional form.

use crate::environment::Environment;
use crate::evaluator::{self, EvalResult};
use crate::types::Node;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::OnceLock;

/// Receives the whole form (for diagnostics), its operands, and the
/// environment the form is evaluated in.
pub type SpecialFormHandler = fn(&Node, Vec<Node>, Rc<RefCell<Environment>>) -> EvalResult;

pub struct SpecialForms {
    handlers: HashMap<&'static str, SpecialFormHandler>,
}

impl SpecialForms {
    fn builtin() -> Self {
        let mut forms = SpecialForms {
            handlers: HashMap::new(),
        };
        forms.define("quote", evaluator::evaluate_quote);
        forms.define("set!", evaluator::evaluate_set);
        forms.define("define", evaluator::evaluate_define);
        forms.define("if", evaluator::evaluate_if);
        forms.define("cond", evaluator::evaluate_cond);
        forms.define("begin", evaluator::evaluate_begin);
        forms.define("lambda", evaluator::evaluate_lambda);
        forms.define("let", evaluator::evaluate_let);
        forms
    }

    fn define(&mut self, keyword: &'static str, handler: SpecialFormHandler) {
        self.handlers.insert(keyword, handler);
    }

    pub fn get(&self, keyword: &str) -> Option<SpecialFormHandler> {
        self.handlers.get(keyword).copied()
    }

    pub fn keywords(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }
}

static SPECIAL_FORMS: OnceLock<SpecialForms> = OnceLock::new();

pub fn registry() -> &'static SpecialForms {
    SPECIAL_FORMS.get_or_init(SpecialForms::builtin)
}

pub fn lookup(keyword: &str) -> Option<SpecialFormHandler> {
    registry().get(keyword)
}

/// Every special form keyword, for REPL completion.
pub fn identifiers() -> HashSet<String> {
    registry().keywords().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_keywords() {
        let mut keywords: Vec<&str> = registry().keywords().collect();
        keywords.sort_unstable();
        assert_eq!(
            keywords,
            vec!["begin", "cond", "define", "if", "lambda", "let", "quote", "set!"]
        );
    }

    #[test]
    fn test_lookup() {
        assert!(lookup("quote").is_some());
        assert!(lookup("else").is_none());
        assert!(lookup("car").is_none());
        assert!(identifiers().contains("set!"));
    }

    #[test]
    fn test_registry_is_built_once() {
        assert!(std::ptr::eq(registry(), registry()));
    }
}
