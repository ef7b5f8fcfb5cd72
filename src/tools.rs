// ABOUTME: Tool contract for host-provided side effects

use crate::error::Error;
use crate::signature::Signature;
use crate::value::{StrMap, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A tool is host Rust code callable from a program. It receives a
/// string-keyed argument map and returns a plain value, an `{ok v}` /
/// `{error reason}` envelope as a map value, or an Err to signal a raise.
pub trait ToolFn: Send + Sync {
    fn call(&self, args: &StrMap) -> Result<Value, String>;
}

impl<F> ToolFn for F
where
    F: Fn(&StrMap) -> Result<Value, String> + Send + Sync,
{
    fn call(&self, args: &StrMap) -> Result<Value, String> {
        self(args)
    }
}

/// A registered tool: the handler plus its declared metadata.
#[derive(Clone)]
pub struct Tool {
    handler: Arc<dyn ToolFn>,
    pub signature: Option<Signature>,
    pub raw_signature: Option<String>,
    pub cache: bool,
    pub description: Option<String>,
}

impl Tool {
    pub fn new(handler: impl ToolFn + 'static) -> Self {
        Tool {
            handler: Arc::new(handler),
            signature: None,
            raw_signature: None,
            cache: false,
            description: None,
        }
    }

    /// Attach a declared signature, used for input validation, output
    /// validation, and prompt schema rendering.
    pub fn with_signature(mut self, signature: &str) -> Result<Self, Error> {
        self.signature = Some(crate::signature::parse_signature(signature)?);
        self.raw_signature = Some(signature.to_string());
        Ok(self)
    }

    /// Enable content-addressed memoization keyed by canonicalized args.
    pub fn cached(mut self) -> Self {
        self.cache = true;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn call(&self, args: &StrMap) -> Result<Value, String> {
        self.handler.call(args)
    }
}

/// Name → tool table. BTreeMap keeps the listing sorted for error hints.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry::default()
    }

    pub fn register(&mut self, name: &str, tool: Tool) {
        self.tools.insert(name.to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Sorted tool names, for the unknown-tool error message.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }
}
