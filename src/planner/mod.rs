//! Join path planning
//!
//! Turns the set of objects a request touches into a [`JoinPlan`]: JOIN steps for
//! every object that is selected or sorted on, and for filter-only objects either a
//! JOIN or a correlated EXISTS predicate depending on the relations' filter modes.

pub mod alias;
pub mod path;
pub mod plan;

use tracing::debug;

use crate::catalog::MetadataCatalog;
use crate::error::{QueryError, Result};
use crate::graph::RelationGraph;
use crate::metadata::{FilterMode, JoinKey, ObjectMeta, RelationMeta};
use crate::sql::sanitize::{quote_identifier, quote_qualified_name};

pub use alias::AliasAllocator;
pub use path::ShortestPaths;
pub use plan::{ExistsStep, FilterStrategy, JoinPlan, JoinStep, PlanRequest, PlanStep};

/// Decide how a filter-only object reached through `path` enters the query
pub fn filter_strategy(path: &[&RelationMeta]) -> FilterStrategy {
    let has = |mode: FilterMode| path.iter().any(|r| r.filter_mode == mode);

    if has(FilterMode::JoinOnly) {
        FilterStrategy::Join
    } else if has(FilterMode::ExistsOnly) || has(FilterMode::ExistsPreferred) {
        FilterStrategy::Exists
    } else if path
        .iter()
        .any(|r| r.filter_mode == FilterMode::Auto && r.relation_type.is_to_many())
    {
        FilterStrategy::Exists
    } else {
        FilterStrategy::Join
    }
}

/// Render the ANDed ON predicate of a relation between two aliases
pub fn render_join_predicate(from_alias: &str, to_alias: &str, keys: &[JoinKey]) -> String {
    keys.iter()
        .map(|key| {
            format!(
                "{}.{} {} {}.{}",
                from_alias,
                quote_identifier(&key.from_column),
                key.comparison(),
                to_alias,
                quote_identifier(&key.to_column)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Plans joins for one catalog snapshot
pub struct PathPlanner<'a, C: MetadataCatalog + ?Sized> {
    catalog: &'a C,
    graph: &'a RelationGraph,
    filter_token: &'a str,
}

impl<'a, C: MetadataCatalog + ?Sized> PathPlanner<'a, C> {
    pub fn new(catalog: &'a C, graph: &'a RelationGraph, filter_token: &'a str) -> Self {
        Self {
            catalog,
            graph,
            filter_token,
        }
    }

    /// Plan a request, computing shortest paths from its root
    pub fn plan(&self, request: &PlanRequest) -> Result<JoinPlan> {
        let paths = ShortestPaths::compute(self.graph, &request.root_object);
        self.plan_with_paths(request, &paths)
    }

    /// Plan a request against shortest paths already computed for its root
    pub fn plan_with_paths(
        &self,
        request: &PlanRequest,
        paths: &ShortestPaths<'_>,
    ) -> Result<JoinPlan> {
        if paths.root() != request.root_object {
            return Err(QueryError::validation(format!(
                "Shortest paths were computed from '{}', not '{}'",
                paths.root(),
                request.root_object
            )));
        }

        let root = self.object(&request.root_object)?;
        let mut aliases = AliasAllocator::new();
        let root_alias = aliases.alloc(&root.alias_hint)?;
        let mut plan = JoinPlan::new(&root.object_code, &root.table_name, &root_alias);

        self.plan_required(request, paths, &mut plan, &mut aliases)?;
        self.plan_filter_only(request, paths, &mut plan, &mut aliases)?;

        plan.check_aliases()?;

        debug!(
            root = %plan.root_object,
            joins = plan.join_steps().count(),
            exists = plan.exists_steps().count(),
            "Join plan built"
        );

        Ok(plan)
    }

    fn plan_required(
        &self,
        request: &PlanRequest,
        paths: &ShortestPaths<'_>,
        plan: &mut JoinPlan,
        aliases: &mut AliasAllocator,
    ) -> Result<()> {
        let mut pending: Vec<&RelationMeta> = Vec::new();
        for object_code in &request.required_objects {
            for edge in paths.path_to(object_code)? {
                if !pending
                    .iter()
                    .any(|seen| seen.relation_code == edge.relation_code)
                {
                    pending.push(edge);
                }
            }
        }

        while !pending.is_empty() {
            let mut progressed = false;
            let mut remaining = Vec::with_capacity(pending.len());

            for edge in pending {
                if plan.is_joined(&edge.from_object) {
                    if !plan.is_joined(&edge.to_object) {
                        self.emit_join(plan, aliases, edge)?;
                    }
                    progressed = true;
                } else {
                    remaining.push(edge);
                }
            }

            if !progressed {
                let stuck: Vec<&str> = remaining
                    .iter()
                    .map(|edge| edge.relation_code.as_str())
                    .collect();
                return Err(QueryError::CyclicOrUnreachablePlan(format!(
                    "No relation among [{}] starts from a joined object",
                    stuck.join(", ")
                )));
            }
            pending = remaining;
        }

        Ok(())
    }

    fn plan_filter_only(
        &self,
        request: &PlanRequest,
        paths: &ShortestPaths<'_>,
        plan: &mut JoinPlan,
        aliases: &mut AliasAllocator,
    ) -> Result<()> {
        let mut as_join = Vec::new();
        let mut as_exists = Vec::new();

        for object_code in &request.filter_only_objects {
            if !request.is_filter_only(object_code) || plan.is_joined(object_code) {
                continue;
            }
            let path = paths.path_to(object_code)?;
            let strategy = filter_strategy(&path);
            debug!(object = %object_code, ?strategy, "Filter-only object");
            match strategy {
                FilterStrategy::Join => as_join.push(path),
                FilterStrategy::Exists => as_exists.push((object_code.as_str(), path)),
            }
        }

        for path in as_join {
            for edge in path {
                if !plan.is_joined(&edge.to_object) {
                    self.emit_join(plan, aliases, edge)?;
                }
            }
        }

        let mut scope = 0;
        for (object_code, path) in as_exists {
            if plan.is_joined(object_code) {
                continue;
            }
            let step = self.build_exists(plan, object_code, &path, scope)?;
            plan.push_exists(step);
            scope += 1;
        }

        Ok(())
    }

    fn emit_join(
        &self,
        plan: &mut JoinPlan,
        aliases: &mut AliasAllocator,
        edge: &RelationMeta,
    ) -> Result<()> {
        let target = self.object(&edge.to_object)?;
        let from_alias = plan
            .alias_of(&edge.from_object)
            .ok_or_else(|| {
                QueryError::CyclicOrUnreachablePlan(format!(
                    "Relation '{}' starts from unjoined object '{}'",
                    edge.relation_code, edge.from_object
                ))
            })?
            .to_string();
        let to_alias = aliases.alloc(&target.alias_hint)?;
        let to_many = edge.relation_type.is_to_many() || plan.is_to_many(&edge.from_object);

        let step = JoinStep {
            relation_code: edge.relation_code.clone(),
            join_type: edge.join_type,
            on_predicate: render_join_predicate(&from_alias, &to_alias, &edge.join_keys),
            from_alias,
            to_object: target.object_code.clone(),
            to_table: target.table_name.clone(),
            to_alias,
        };
        plan.push_join(step, to_many);
        Ok(())
    }

    /// Correlated subquery over the part of `path` not joined in the outer query
    fn build_exists(
        &self,
        plan: &JoinPlan,
        object_code: &str,
        path: &[&RelationMeta],
        scope: usize,
    ) -> Result<ExistsStep> {
        let start = path
            .iter()
            .rposition(|edge| plan.is_joined(&edge.to_object))
            .map(|i| i + 1)
            .unwrap_or(0);
        let suffix = &path[start..];
        let Some(first) = suffix.first() else {
            return Err(QueryError::CyclicOrUnreachablePlan(format!(
                "'{}' has no relation left to put in an EXISTS subquery",
                object_code
            )));
        };

        let anchor_object = first.from_object.clone();
        let anchor_alias = plan.alias_of(&anchor_object).ok_or_else(|| {
            QueryError::CyclicOrUnreachablePlan(format!(
                "EXISTS anchor '{}' is not joined",
                anchor_object
            ))
        })?;

        let mut local = AliasAllocator::scoped(format!("x{}", scope));
        let mut local_aliases = std::collections::BTreeMap::new();
        let mut from_clause = String::new();
        let mut correlation = String::new();
        let mut previous_alias = String::new();

        for (i, edge) in suffix.iter().enumerate() {
            let target = self.object(&edge.to_object)?;
            let alias = local.alloc(&target.alias_hint)?;
            let table = quote_qualified_name(&target.table_name);

            if i == 0 {
                from_clause = format!("{} {}", table, alias);
                correlation = render_join_predicate(anchor_alias, &alias, &edge.join_keys);
            } else {
                from_clause.push_str(&format!(
                    " INNER JOIN {} {} ON {}",
                    table,
                    alias,
                    render_join_predicate(&previous_alias, &alias, &edge.join_keys)
                ));
            }

            local_aliases.insert(target.object_code.clone(), alias.clone());
            previous_alias = alias;
        }

        let sql = format!(
            "EXISTS (SELECT 1 FROM {} WHERE {} AND {})",
            from_clause, correlation, self.filter_token
        );

        debug!(
            object = %object_code,
            anchor = %anchor_object,
            hops = suffix.len(),
            "EXISTS subquery planned"
        );

        Ok(ExistsStep {
            target_object: object_code.to_string(),
            target_alias: previous_alias,
            anchor_object,
            relation_codes: suffix.iter().map(|edge| edge.relation_code.clone()).collect(),
            local_aliases,
            sql,
            filter_token: self.filter_token.to_string(),
        })
    }

    fn object(&self, object_code: &str) -> Result<&'a ObjectMeta> {
        self.catalog
            .find_object(object_code)
            .ok_or_else(|| QueryError::metadata_not_found(format!("Object '{}'", object_code)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogSnapshot;
    use crate::metadata::{JoinType, RelationType};

    const TOKEN: &str = "/*__exists_filter__*/";

    fn catalog(emp_proj_mode: FilterMode, emp_dept_mode: FilterMode) -> CatalogSnapshot {
        CatalogSnapshot::builder("hr")
            .object(ObjectMeta::new("emp", "hr.employee").alias_hint("Employee"))
            .object(ObjectMeta::new("dept", "hr.department").alias_hint("Department"))
            .object(ObjectMeta::new("proj", "hr.project").alias_hint("Project"))
            .object(ObjectMeta::new("site", "hr.site").alias_hint("Site"))
            .relation(
                RelationMeta::new(
                    "emp_dept",
                    "emp",
                    "dept",
                    RelationType::ManyToOne,
                    vec![JoinKey::eq("dept_id", "id")],
                )
                .filter_mode(emp_dept_mode),
            )
            .relation(
                RelationMeta::new(
                    "emp_proj",
                    "emp",
                    "proj",
                    RelationType::OneToMany,
                    vec![JoinKey::eq("id", "emp_id")],
                )
                .filter_mode(emp_proj_mode),
            )
            .relation(
                RelationMeta::new(
                    "proj_site",
                    "proj",
                    "site",
                    RelationType::ManyToOne,
                    vec![JoinKey::eq("site_id", "id")],
                )
                .join_type(JoinType::Inner),
            )
            .build()
            .unwrap()
    }

    fn plan(catalog: &CatalogSnapshot, request: &PlanRequest) -> Result<JoinPlan> {
        let graph = RelationGraph::build(catalog.all_relations());
        PathPlanner::new(catalog, &graph, TOKEN).plan(request)
    }

    #[test]
    fn test_required_object_joined() {
        let catalog = catalog(FilterMode::Auto, FilterMode::Auto);
        let plan = plan(&catalog, &PlanRequest::new("emp").require("dept")).unwrap();

        assert_eq!(plan.root_alias, "e0");
        let joins: Vec<_> = plan.join_steps().collect();
        assert_eq!(joins.len(), 1);
        assert_eq!(
            joins[0].to_sql(),
            "LEFT JOIN \"hr\".\"department\" d0 ON e0.\"dept_id\" = d0.\"id\""
        );
        assert!(!plan.is_to_many("dept"));
    }

    #[test]
    fn test_two_hop_required_emits_in_order() {
        let catalog = catalog(FilterMode::Auto, FilterMode::Auto);
        let plan = plan(&catalog, &PlanRequest::new("emp").require("site")).unwrap();

        let codes: Vec<&str> = plan.join_steps().map(|j| j.relation_code.as_str()).collect();
        assert_eq!(codes, vec!["emp_proj", "proj_site"]);
        assert_eq!(plan.alias_of("proj"), Some("p0"));
        assert_eq!(plan.alias_of("site"), Some("s0"));
        assert!(plan.is_to_many("site"));
        assert!(plan
            .join_steps()
            .last()
            .unwrap()
            .to_sql()
            .starts_with("INNER JOIN"));
    }

    #[test]
    fn test_filter_only_to_one_auto_is_join() {
        let catalog = catalog(FilterMode::Auto, FilterMode::Auto);
        let plan = plan(&catalog, &PlanRequest::new("emp").filter_only("dept")).unwrap();

        assert!(plan.is_joined("dept"));
        assert_eq!(plan.exists_steps().count(), 0);
    }

    #[test]
    fn test_filter_only_to_many_auto_is_exists() {
        let catalog = catalog(FilterMode::Auto, FilterMode::Auto);
        let plan = plan(&catalog, &PlanRequest::new("emp").filter_only("proj")).unwrap();

        assert!(!plan.is_joined("proj"));
        let step = plan.exists_step_for("proj").unwrap();
        assert_eq!(step.anchor_object, "emp");
        assert_eq!(step.target_alias, "x0_p0");
        assert_eq!(
            step.sql,
            format!(
                "EXISTS (SELECT 1 FROM \"hr\".\"project\" x0_p0 WHERE e0.\"id\" = x0_p0.\"emp_id\" AND {})",
                TOKEN
            )
        );
        assert_eq!(plan.field_alias("proj"), Some("x0_p0"));
    }

    #[test]
    fn test_exists_only_never_joins() {
        let catalog = catalog(FilterMode::Auto, FilterMode::ExistsOnly);
        let plan = plan(&catalog, &PlanRequest::new("emp").filter_only("dept")).unwrap();

        assert!(!plan.is_joined("dept"));
        assert!(plan.exists_step_for("dept").is_some());
    }

    #[test]
    fn test_join_only_never_exists() {
        let catalog = catalog(FilterMode::JoinOnly, FilterMode::Auto);
        let plan = plan(&catalog, &PlanRequest::new("emp").filter_only("proj")).unwrap();

        assert!(plan.is_joined("proj"));
        assert!(plan.exists_step_for("proj").is_none());
        assert!(plan.is_to_many("proj"));
    }

    #[test]
    fn test_multi_hop_exists_anchored_at_deepest_join() {
        let catalog = catalog(FilterMode::Auto, FilterMode::Auto);
        let request = PlanRequest::new("emp").filter_only("site");
        let plan = plan(&catalog, &request).unwrap();

        let step = plan.exists_step_for("site").unwrap();
        assert_eq!(step.anchor_object, "emp");
        assert_eq!(step.relation_codes, vec!["emp_proj", "proj_site"]);
        assert_eq!(
            step.sql,
            format!(
                "EXISTS (SELECT 1 FROM \"hr\".\"project\" x0_p0 INNER JOIN \"hr\".\"site\" x0_s0 ON x0_p0.\"site_id\" = x0_s0.\"id\" WHERE e0.\"id\" = x0_p0.\"emp_id\" AND {})",
                TOKEN
            )
        );

        let request = PlanRequest::new("emp").require("proj").filter_only("site");
        let plan = self::plan(&catalog, &request).unwrap();
        let step = plan.exists_step_for("site").unwrap();
        assert_eq!(step.anchor_object, "proj");
        assert_eq!(step.relation_codes, vec!["proj_site"]);
        assert_eq!(
            step.sql,
            format!(
                "EXISTS (SELECT 1 FROM \"hr\".\"site\" x0_s0 WHERE p0.\"site_id\" = x0_s0.\"id\" AND {})",
                TOKEN
            )
        );
    }

    #[test]
    fn test_unreachable_filter_only_is_no_path() {
        let catalog = catalog(FilterMode::Auto, FilterMode::Auto);
        let result = plan(&catalog, &PlanRequest::new("dept").filter_only("emp"));
        assert!(matches!(result, Err(QueryError::NoPath { .. })));
    }

    #[test]
    fn test_unknown_root() {
        let catalog = catalog(FilterMode::Auto, FilterMode::Auto);
        let result = plan(&catalog, &PlanRequest::new("ghost"));
        assert!(matches!(result, Err(QueryError::MetadataNotFound(_))));
    }

    #[test]
    fn test_aliases_unique_across_scopes() {
        let catalog = catalog(FilterMode::Auto, FilterMode::ExistsOnly);
        let request = PlanRequest::new("emp")
            .require("proj")
            .filter_only("dept")
            .filter_only("site");
        let plan = plan(&catalog, &request).unwrap();

        assert!(plan.check_aliases().is_ok());
        let all = plan.all_aliases();
        assert!(all.contains(&"x0_d0"));
        assert!(all.contains(&"p0"));
    }

    #[test]
    fn test_strategy_precedence() {
        let to_many = RelationMeta::new(
            "a",
            "x",
            "y",
            RelationType::OneToMany,
            vec![JoinKey::eq("id", "x_id")],
        );
        let to_one = RelationMeta::new(
            "b",
            "y",
            "z",
            RelationType::ManyToOne,
            vec![JoinKey::eq("z_id", "id")],
        );

        assert_eq!(filter_strategy(&[&to_one]), FilterStrategy::Join);
        assert_eq!(filter_strategy(&[&to_many]), FilterStrategy::Exists);

        let preferred = to_one.clone().filter_mode(FilterMode::ExistsPreferred);
        assert_eq!(filter_strategy(&[&preferred]), FilterStrategy::Exists);

        let join_only = to_many.clone().filter_mode(FilterMode::JoinOnly);
        let exists_only = to_one.clone().filter_mode(FilterMode::ExistsOnly);
        assert_eq!(filter_strategy(&[&join_only, &exists_only]), FilterStrategy::Join);
    }
}
