//! Configuration for the query engine
//!
//! Provides a builder pattern for configuring planning and SQL generation.

use crate::sql::expression::ExpressionRegistry;

/// Names of the tables the PostgreSQL catalog loader reads metadata from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataTables {
    pub objects: String,
    pub fields: String,
    pub relations: String,
    pub join_keys: String,
}

impl Default for MetadataTables {
    fn default() -> Self {
        Self {
            objects: "__dq_object".to_string(),
            fields: "__dq_field".to_string(),
            relations: "__dq_relation".to_string(),
            join_keys: "__dq_join_key".to_string(),
        }
    }
}

impl MetadataTables {
    /// Same tables, each name prefixed (useful for isolating test runs)
    pub fn with_prefix(prefix: &str) -> Self {
        let base = Self::default();
        Self {
            objects: format!("{}{}", prefix, base.objects),
            fields: format!("{}{}", prefix, base.fields),
            relations: format!("{}{}", prefix, base.relations),
            join_keys: format!("{}{}", prefix, base.join_keys),
        }
    }
}

/// Configuration for the query engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// LIMIT applied when a request carries none (default: 100)
    pub default_limit: i64,
    /// Upper bound for any requested LIMIT (default: 10000)
    pub max_limit: i64,
    /// Prefix of synthetic parameter names (default: "p", giving p1, p2, ...)
    pub param_prefix: String,
    /// Marker embedded in EXISTS subqueries and replaced by the target's filters
    pub exists_filter_token: String,
    /// Metadata tables read by the PostgreSQL catalog loader
    pub metadata_tables: MetadataTables,
    /// Allow-list of SQL templates usable by EXPRESSION fields
    pub expressions: ExpressionRegistry,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfigBuilder::new().build()
    }
}

impl EngineConfig {
    /// Create a new configuration builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Clamp a requested limit into `1..=max_limit`, falling back to the default
    pub fn effective_limit(&self, requested: Option<i64>) -> i64 {
        match requested {
            Some(limit) if limit > 0 => limit.min(self.max_limit),
            _ => self.default_limit,
        }
    }
}

/// Builder for EngineConfig
#[derive(Debug)]
pub struct EngineConfigBuilder {
    default_limit: i64,
    max_limit: i64,
    param_prefix: String,
    exists_filter_token: String,
    metadata_tables: MetadataTables,
    expressions: ExpressionRegistry,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            default_limit: 100,
            max_limit: 10_000,
            param_prefix: "p".to_string(),
            exists_filter_token: "/*__exists_filter__*/".to_string(),
            metadata_tables: MetadataTables::default(),
            expressions: ExpressionRegistry::new(),
        }
    }

    /// Set the LIMIT used when a request has none (default: 100)
    pub fn default_limit(mut self, limit: i64) -> Self {
        self.default_limit = limit;
        self
    }

    /// Set the maximum LIMIT a request may ask for (default: 10000)
    pub fn max_limit(mut self, limit: i64) -> Self {
        self.max_limit = limit;
        self
    }

    /// Set the synthetic parameter name prefix (default: "p")
    pub fn param_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.param_prefix = prefix.into();
        self
    }

    /// Set the EXISTS filter marker
    pub fn exists_filter_token(mut self, token: impl Into<String>) -> Self {
        self.exists_filter_token = token.into();
        self
    }

    /// Set the metadata table names used by the PostgreSQL loader
    pub fn metadata_tables(mut self, tables: MetadataTables) -> Self {
        self.metadata_tables = tables;
        self
    }

    /// Register a vetted expression template
    pub fn expression(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.expressions.register(name, template);
        self
    }

    /// Replace the whole expression allow-list
    pub fn expressions(mut self, registry: ExpressionRegistry) -> Self {
        self.expressions = registry;
        self
    }

    /// Build the configuration
    pub fn build(self) -> EngineConfig {
        EngineConfig {
            default_limit: self.default_limit,
            max_limit: self.max_limit.max(1),
            param_prefix: self.param_prefix,
            exists_filter_token: self.exists_filter_token,
            metadata_tables: self.metadata_tables,
            expressions: self.expressions,
        }
    }
}
