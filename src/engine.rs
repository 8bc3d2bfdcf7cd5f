//! QueryEngine - Main entry point for metadata-driven queries
//!
//! Ties the pipeline together: resolve dot-paths, plan joins, bind aliases,
//! generate SQL, and optionally hand the statement to a [`QueryExecutor`].

use std::collections::HashSet;

use tracing::{Instrument, debug, debug_span};
use uuid::Uuid;

use crate::catalog::MetadataCatalog;
use crate::config::EngineConfig;
use crate::error::{QueryError, Result};
use crate::executor::{JsonRow, QueryExecutor};
use crate::graph::RelationGraph;
use crate::planner::{PathPlanner, PlanRequest, ShortestPaths};
use crate::request::QueryRequest;
use crate::resolver::{FieldResolver, FieldRole, ResolvedField, bind_aliases};
use crate::sql::{GeneratedQuery, ResolvedFields, SqlGenerator};

/// Metadata-driven query engine over one catalog snapshot
///
/// Holds only immutable data; one engine can serve any number of concurrent requests.
pub struct QueryEngine<'a, C: MetadataCatalog + ?Sized> {
    catalog: &'a C,
    graph: RelationGraph,
    config: EngineConfig,
}

impl<'a, C: MetadataCatalog + ?Sized> QueryEngine<'a, C> {
    /// Create an engine, building the relation graph from the catalog
    pub fn new(catalog: &'a C, config: EngineConfig) -> Self {
        let graph = RelationGraph::build(catalog.all_relations());
        debug!(
            catalog_id = catalog.catalog_id(),
            edges = graph.edge_count(),
            "Relation graph built"
        );
        Self {
            catalog,
            graph,
            config,
        }
    }

    pub fn with_defaults(catalog: &'a C) -> Self {
        Self::new(catalog, EngineConfig::default())
    }

    pub fn catalog(&self) -> &C {
        self.catalog
    }

    pub fn graph(&self) -> &RelationGraph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Connection id owning the request's root table
    pub fn connection_id(&self, request: &QueryRequest) -> Result<&'a str> {
        self.catalog
            .find_object(&request.root_object)
            .map(|o| o.connection_id.as_str())
            .ok_or_else(|| {
                QueryError::metadata_not_found(format!("Object '{}'", request.root_object))
            })
    }

    /// Turn a request into parameterized SQL
    pub fn generate(&self, request: &QueryRequest) -> Result<GeneratedQuery> {
        let request_id = Uuid::new_v4();
        let span = debug_span!("generate", %request_id, root = %request.root_object);
        let _guard = span.enter();

        let root = request.root_object.as_str();
        if self.catalog.find_object(root).is_none() {
            return Err(QueryError::metadata_not_found(format!("Object '{}'", root)));
        }

        let paths = ShortestPaths::compute(&self.graph, root);
        // One resolver per request: object entries are shared by select, filter and sort
        let mut resolver = FieldResolver::new(self.catalog, &paths);

        let mut select = if request.count_only {
            Vec::new()
        } else {
            resolver.resolve(&request.select_fields, FieldRole::Select)?
        };

        let mut seen = HashSet::new();
        let filter_paths: Vec<&str> = request
            .filters
            .iter()
            .flat_map(|criteria| criteria.field_paths())
            .filter(|path| seen.insert(*path))
            .collect();
        let mut filters = resolver.resolve(&filter_paths, FieldRole::Filter)?;

        let mut sorts = if request.count_only {
            Vec::new()
        } else {
            let sort_paths: Vec<&str> = request.sorts.iter().map(|s| s.field.as_str()).collect();
            resolver.resolve(&sort_paths, FieldRole::Sort)?
        };

        let plan_request = self.plan_request(request, &select, &filters, &sorts);
        let plan = PathPlanner::new(
            self.catalog,
            &self.graph,
            &self.config.exists_filter_token,
        )
        .plan_with_paths(&plan_request, &paths)?;

        bind_aliases(&mut select, &plan)?;
        bind_aliases(&mut filters, &plan)?;
        bind_aliases(&mut sorts, &plan)?;

        let fields = ResolvedFields {
            select,
            filters: filters.into_iter().map(|f| (f.path.clone(), f)).collect(),
            sorts,
        };

        SqlGenerator::new(self.catalog, &self.config).generate(request, &plan, &fields)
    }

    /// Split the objects a request touches into required and filter-only
    ///
    /// Objects named only by filters are left to the planner, even when a filter also
    /// names other objects; the generator renders such a filter's EXISTS parts inline.
    fn plan_request(
        &self,
        request: &QueryRequest,
        select: &[ResolvedField],
        filters: &[ResolvedField],
        sorts: &[ResolvedField],
    ) -> PlanRequest {
        let root = request.root_object.as_str();
        let mut plan_request = PlanRequest::new(root);

        for field in select.iter().chain(sorts) {
            if field.object_code != root {
                plan_request
                    .required_objects
                    .insert(field.object_code.clone());
            }
        }

        for field in filters {
            if field.object_code != root
                && !plan_request.required_objects.contains(&field.object_code)
            {
                plan_request
                    .filter_only_objects
                    .insert(field.object_code.clone());
            }
        }

        debug!(
            required = plan_request.required_objects.len(),
            filter_only = plan_request.filter_only_objects.len(),
            "Plan request built"
        );
        plan_request
    }

    /// Generate and run a request, returning its rows
    pub async fn query<E: QueryExecutor>(
        &self,
        executor: &E,
        request: &QueryRequest,
    ) -> Result<Vec<JsonRow>> {
        let generated = self.generate(request)?;
        let span = debug_span!("query", root = %request.root_object);
        executor.execute(&generated).instrument(span).await
    }

    /// Count the root rows a request matches, ignoring its selection and pagination
    pub async fn count<E: QueryExecutor>(
        &self,
        executor: &E,
        request: &QueryRequest,
    ) -> Result<i64> {
        let generated = self.generate(&request.to_count_request())?;
        let span = debug_span!("count", root = %request.root_object);
        executor.execute_scalar(&generated).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogSnapshot;
    use crate::metadata::{
        DataType, FieldMeta, FilterMode, JoinKey, ObjectMeta, RelationMeta, RelationType,
    };
    use crate::request::FilterCriteria;

    fn catalog(dept_mode: FilterMode) -> CatalogSnapshot {
        CatalogSnapshot::builder("hr")
            .object(ObjectMeta::new("emp", "employee").connection("main"))
            .object(ObjectMeta::new("dept", "department"))
            .field(FieldMeta::column("emp", "code", "emp_code", DataType::String))
            .field(FieldMeta::column("dept", "region", "region", DataType::String))
            .relation(
                RelationMeta::new(
                    "emp_dept",
                    "emp",
                    "dept",
                    RelationType::ManyToOne,
                    vec![JoinKey::eq("dept_id", "id")],
                )
                .filter_mode(dept_mode),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_unknown_root() {
        let catalog = catalog(FilterMode::Auto);
        let engine = QueryEngine::with_defaults(&catalog);
        let result = engine.generate(&QueryRequest::new("ghost"));
        assert!(matches!(result, Err(QueryError::MetadataNotFound(_))));
    }

    #[test]
    fn test_connection_id() {
        let catalog = catalog(FilterMode::Auto);
        let engine = QueryEngine::with_defaults(&catalog);
        assert_eq!(engine.connection_id(&QueryRequest::new("emp")).unwrap(), "main");
    }

    fn mixed_filter() -> QueryRequest {
        QueryRequest::new("emp").filter(FilterCriteria::or(vec![
            FilterCriteria::eq("emp.code", "A1"),
            FilterCriteria::eq("dept.region", "EU"),
        ]))
    }

    #[test]
    fn test_mixed_filter_joins_to_one_object() {
        let catalog = catalog(FilterMode::Auto);
        let engine = QueryEngine::with_defaults(&catalog);

        let query = engine.generate(&mixed_filter()).unwrap();
        assert!(query.sql.contains("LEFT JOIN \"department\" d0"));
        assert!(!query.sql.contains("EXISTS"));
        assert!(!query.sql.contains("GROUP BY"));
        assert!(
            query
                .sql
                .contains("WHERE (e0.\"emp_code\" = $1::text OR d0.\"region\" = $2::text)")
        );
    }

    #[test]
    fn test_mixed_filter_keeps_exists_inline() {
        for mode in [FilterMode::ExistsPreferred, FilterMode::ExistsOnly] {
            let catalog = catalog(mode);
            let engine = QueryEngine::with_defaults(&catalog);

            let query = engine.generate(&mixed_filter()).unwrap();
            assert!(!query.sql.contains("JOIN"));
            assert!(query.sql.contains(
                "WHERE (e0.\"emp_code\" = $1::text OR EXISTS (SELECT 1 FROM \"department\" x0_d0 WHERE e0.\"dept_id\" = x0_d0.\"id\" AND x0_d0.\"region\" = $2::text))"
            ));
        }
    }

    #[test]
    fn test_selected_object_is_not_filter_only() {
        let catalog = catalog(FilterMode::ExistsOnly);
        let engine = QueryEngine::with_defaults(&catalog);
        let request = QueryRequest::new("emp")
            .select("dept.region")
            .filter(FilterCriteria::eq("dept.region", "EU"));

        let query = engine.generate(&request).unwrap();
        assert!(query.sql.contains("LEFT JOIN \"department\" d0"));
        assert!(query.sql.contains("WHERE d0.\"region\" = $1::text"));
    }
}
