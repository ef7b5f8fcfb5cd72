// ABOUTME: Immutable lexical environments for let/fn/loop bindings

use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One lexical scope. Environments are immutable after construction and
/// chained by `Arc`, so closures and parallel branches share them without
/// copying; new scopes are prepended, never edited in place.
#[derive(Debug)]
pub struct Env {
    bindings: HashMap<String, Value>,
    parent: Option<Arc<Env>>,
}

impl Env {
    /// The empty root scope.
    pub fn root() -> Arc<Self> {
        Arc::new(Env { bindings: HashMap::new(), parent: None })
    }

    /// A child scope with a single binding.
    pub fn with_binding(parent: &Arc<Env>, name: String, value: Value) -> Arc<Self> {
        let mut bindings = HashMap::with_capacity(1);
        bindings.insert(name, value);
        Arc::new(Env { bindings, parent: Some(Arc::clone(parent)) })
    }

    /// A child scope with several bindings introduced at once (fn params,
    /// loop re-entry).
    pub fn with_bindings(
        parent: &Arc<Env>,
        bindings: impl IntoIterator<Item = (String, Value)>,
    ) -> Arc<Self> {
        Arc::new(Env {
            bindings: bindings.into_iter().collect(),
            parent: Some(Arc::clone(parent)),
        })
    }

    /// Look a symbol up in this scope and its parents.
    pub fn get(&self, name: &str) -> Option<&Value> {
        if let Some(value) = self.bindings.get(name) {
            return Some(value);
        }
        self.parent.as_deref()?.get(name)
    }
}
