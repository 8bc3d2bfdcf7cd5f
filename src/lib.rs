//! # runtara-dynamic-query
//!
//! A metadata-driven dynamic query engine for PostgreSQL.
//!
//! Callers describe what they want in terms of catalog objects and fields
//! (`"dept.deptName"`); the engine finds join paths across the relation graph,
//! decides between JOIN and correlated EXISTS for filter-only objects, allocates
//! table aliases and emits parameterized SQL with a bound parameter list.
//!
//! ## Features
//!
//! - **Shortest join paths**: hop count first, relation weight second, deterministic ties
//! - **JOIN or EXISTS**: per-relation filter modes keep to-many filters from multiplying rows
//! - **Nested JSON output**: to-one objects as `jsonb_build_object`, to-many as `jsonb_agg`
//! - **Bound parameters only**: every literal is a `$n` placeholder; identifiers come from
//!   validated metadata
//! - **Pluggable catalog, cache and executor**: traits with in-memory and sqlx implementations
//!
//! ## Quick Start
//!
//! ```rust
//! use runtara_dynamic_query::{
//!     CatalogSnapshot, DataType, FieldMeta, FilterCriteria, JoinKey, ObjectMeta, QueryEngine,
//!     QueryRequest, RelationMeta, RelationType,
//! };
//!
//! let catalog = CatalogSnapshot::builder("hr")
//!     .object(ObjectMeta::new("emp", "hr.employee"))
//!     .object(ObjectMeta::new("dept", "hr.department"))
//!     .field(FieldMeta::column("emp", "code", "emp_code", DataType::String))
//!     .field(FieldMeta::column("dept", "name", "dept_name", DataType::String))
//!     .relation(RelationMeta::new(
//!         "emp_dept",
//!         "emp",
//!         "dept",
//!         RelationType::ManyToOne,
//!         vec![JoinKey::eq("dept_id", "id")],
//!     ))
//!     .build()?;
//!
//! let engine = QueryEngine::with_defaults(&catalog);
//! let query = engine.generate(
//!     &QueryRequest::new("emp")
//!         .select("emp.code")
//!         .select("dept.name")
//!         .filter(FilterCriteria::eq("emp.code", "A-1")),
//! )?;
//!
//! assert!(query.sql.starts_with("SELECT e0.\"emp_code\" AS \"empCode\""));
//! assert_eq!(query.parameter_map()["p1"], "A-1");
//! # Ok::<(), runtara_dynamic_query::QueryError>(())
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use runtara_dynamic_query::EngineConfig;
//!
//! let config = EngineConfig::builder()
//!     .default_limit(50)           // LIMIT when a request has none
//!     .max_limit(1000)             // Upper bound for requested limits
//!     .param_prefix("p")           // Parameter names p1, p2, ...
//!     .expression("full_name", "{alias}.first_name || ' ' || {alias}.last_name")
//!     .build();
//! ```
//!
//! ## Execution
//!
//! The engine never opens connections itself. Generated queries run through a
//! [`QueryExecutor`]; [`PgExecutor`] runs them on a sqlx pool and [`PoolRegistry`]
//! keeps one pool per catalog connection id.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod metadata;
pub mod naming;
pub mod planner;
pub mod request;
pub mod resolver;
pub mod sql;

// Re-export main types for convenience
pub use catalog::{
    CatalogDocument, CatalogSnapshot, InMemoryMetadataCache, MetadataCache, MetadataCatalog,
    PgCatalogLoader,
};
pub use config::{EngineConfig, EngineConfigBuilder, MetadataTables};
pub use engine::QueryEngine;
pub use error::{QueryError, Result};
pub use executor::{JsonRow, PgExecutor, PoolRegistry, QueryExecutor};
pub use graph::RelationGraph;
pub use metadata::{
    DataType, FieldMapping, FieldMeta, FilterMode, JoinKey, JoinType, KeyOperator, ObjectMeta,
    RelationMeta, RelationType,
};
pub use planner::{JoinPlan, PathPlanner, PlanRequest, PlanStep};
pub use request::{
    FilterCondition, FilterCriteria, FilterGroup, LogicalOperator, NullsOrder, QueryRequest,
    SortCriteria, SortDirection,
};
pub use resolver::{FieldPath, FieldResolver, FieldRole, ResolvedField};

// Re-export SQL utilities for advanced users
pub use sql::{BoundParameter, ExpressionRegistry, FilterOperator, GeneratedQuery};
