//! Expression allow-list for EXPRESSION-mapped fields
//!
//! Metadata never carries SQL. An EXPRESSION field names a template registered here by
//! the application; the template may reference the owning object's runtime alias
//! through the `{alias}` placeholder and nothing else is substituted.

use std::collections::BTreeMap;

use crate::error::{QueryError, Result};

const ALIAS_PLACEHOLDER: &str = "{alias}";

/// Registry of vetted SQL templates keyed by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpressionRegistry {
    templates: BTreeMap<String, String>,
}

impl ExpressionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, template: impl Into<String>) {
        self.templates.insert(name.into(), template.into());
    }

    pub fn with(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.register(name, template);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Render a template for the given table alias
    pub fn render(&self, name: &str, alias: &str) -> Result<String> {
        let template = self.get(name).ok_or_else(|| {
            QueryError::validation(format!(
                "Expression template '{}' is not in the allow-list",
                name
            ))
        })?;
        Ok(format!("({})", template.replace(ALIAS_PLACEHOLDER, alias)))
    }
}
