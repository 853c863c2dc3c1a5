//! Decode-time scopes and schema paths.
//!
//! Sequence lengths and variant tags reference previously decoded fields by
//! name. Each struct decode pushes a small ordered scope; lookups walk from
//! the innermost scope outward, so a local reference always resolves to the
//! nearest enclosing sibling while context-level references still work.

use indexmap::IndexMap;

use crate::types::DecodedValue;

/// Stack of per-struct name→value scopes.
#[derive(Debug, Default)]
pub(crate) struct ScopeStack {
    scopes: Vec<IndexMap<String, DecodedValue>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self) {
        self.scopes.push(IndexMap::new());
    }

    pub fn pop(&mut self) {
        self.scopes.pop();
    }

    /// Record a decoded member in the innermost scope.
    pub fn insert(&mut self, name: &str, value: DecodedValue) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    /// Innermost-first lookup through every open scope.
    pub fn lookup(&self, name: &str) -> Option<&DecodedValue> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }
}

/// Dotted schema path of the field currently being decoded, e.g.
/// `event.payload.samples[2]`.
#[derive(Debug)]
pub(crate) struct SchemaPath {
    segments: Vec<String>,
}

impl SchemaPath {
    pub fn root(name: &str) -> Self {
        Self { segments: vec![name.to_string()] }
    }

    pub fn push(&mut self, name: &str) {
        self.segments.push(name.to_string());
    }

    pub fn push_index(&mut self, index: usize) {
        let last = self.segments.last_mut().expect("path always has a root");
        last.push('[');
        last.push_str(&index.to_string());
        last.push(']');
    }

    pub fn pop_index(&mut self) {
        let last = self.segments.last_mut().expect("path always has a root");
        if let Some(open) = last.rfind('[') {
            last.truncate(open);
        }
    }

    pub fn pop(&mut self) {
        self.segments.pop();
    }

    pub fn render(&self) -> String {
        self.segments.join(".")
    }
}
