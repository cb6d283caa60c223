//! Template variables for a single adapter invocation
//!
//! Command arguments and fetch URLs are written as templates; the values
//! substituted into them are collected here before each invocation.

use std::collections::HashMap;
use std::path::Path;

/// Named values available to `${{ name }}` expressions
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: HashMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    /// Insert a path value, rendered with `Path::display`
    pub fn with_path(self, key: &str, path: &Path) -> Self {
        let rendered = path.display().to_string();
        self.with(key, rendered)
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.values.get(key)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }
}
