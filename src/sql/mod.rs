//! SQL utilities for the query engine
//!
//! Provides statement generation, filter rendering, expression templates and
//! identifier sanitization.

pub mod condition;
pub mod expression;
pub mod generator;
pub mod sanitize;

pub use condition::{BoundParameter, ConditionBuilder, FilterOperator, QueryContext};
pub use expression::ExpressionRegistry;
pub use generator::{GeneratedQuery, ResolvedFields, SqlGenerator};
pub use sanitize::{
    quote_identifier, quote_key_literal, quote_qualified_name, validate_identifier,
    validate_qualified_name,
};
