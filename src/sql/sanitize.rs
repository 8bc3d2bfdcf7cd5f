//! SQL Identifier Sanitization Utilities
//!
//! Every identifier that reaches generated SQL comes from catalog metadata. These
//! helpers validate those identifiers when a snapshot is built and quote them when
//! SQL is rendered.

use std::sync::LazyLock;

use regex::Regex;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Quote a SQL identifier to make it safe for use in queries
///
/// # Example
/// ```
/// use runtara_dynamic_query::sql::quote_identifier;
///
/// let quoted = quote_identifier("emp_code");
/// assert_eq!(quoted, "\"emp_code\"");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    // Escape any double quotes in the identifier by doubling them
    let escaped = identifier.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Quote a possibly schema-qualified table name part by part
///
/// # Example
/// ```
/// use runtara_dynamic_query::sql::quote_qualified_name;
///
/// assert_eq!(quote_qualified_name("hr.employee"), "\"hr\".\"employee\"");
/// assert_eq!(quote_qualified_name("employee"), "\"employee\"");
/// ```
pub fn quote_qualified_name(name: &str) -> String {
    name.split('.')
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(".")
}

/// Render a metadata-derived key as a SQL string literal (used for JSON object keys)
pub fn quote_key_literal(key: &str) -> String {
    format!("'{}'", key.replace('\'', "''"))
}

/// Validate a metadata identifier (column, output key, table part)
///
/// Rules:
/// - Must start with a letter or underscore
/// - Can only contain ASCII letters, digits and underscores
///
/// # Example
/// ```
/// use runtara_dynamic_query::sql::validate_identifier;
///
/// assert!(validate_identifier("deptName").is_ok());
/// assert!(validate_identifier("dept name").is_err());
/// ```
pub fn validate_identifier(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Identifier cannot be empty".to_string());
    }

    if !IDENTIFIER_RE.is_match(name) {
        return Err(format!(
            "Identifier '{}' is invalid. Must start with a letter or underscore and contain only letters, digits and underscores.",
            name
        ));
    }

    Ok(())
}

/// Validate a table name that may be qualified with a schema (`schema.table`)
pub fn validate_qualified_name(name: &str) -> Result<(), String> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(format!(
            "Table name '{}' has too many qualifiers (expected table or schema.table)",
            name
        ));
    }
    parts.into_iter().try_for_each(validate_identifier)
}
