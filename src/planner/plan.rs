//! Join plan types
//!
//! A [`JoinPlan`] is built fresh for each request and is read-only once the planner
//! returns it.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::{QueryError, Result};
use crate::metadata::JoinType;
use crate::sql::sanitize::quote_qualified_name;

/// Objects a plan must cover, split by how they are used
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanRequest {
    pub root_object: String,
    /// Objects that must be joined (selected or sorted on)
    pub required_objects: BTreeSet<String>,
    /// Objects referenced only by filters; may become EXISTS predicates
    pub filter_only_objects: BTreeSet<String>,
}

impl PlanRequest {
    pub fn new(root_object: impl Into<String>) -> Self {
        Self {
            root_object: root_object.into(),
            ..Default::default()
        }
    }

    pub fn require(mut self, object_code: impl Into<String>) -> Self {
        self.required_objects.insert(object_code.into());
        self
    }

    pub fn filter_only(mut self, object_code: impl Into<String>) -> Self {
        self.filter_only_objects.insert(object_code.into());
        self
    }

    pub fn is_filter_only(&self, object_code: &str) -> bool {
        self.filter_only_objects.contains(object_code)
            && !self.required_objects.contains(object_code)
    }
}

/// How a filter-only object is brought into the query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStrategy {
    Join,
    Exists,
}

/// A JOIN in the outer query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinStep {
    pub relation_code: String,
    pub join_type: JoinType,
    pub from_alias: String,
    pub to_object: String,
    pub to_table: String,
    pub to_alias: String,
    /// Rendered ON predicate (join keys ANDed)
    pub on_predicate: String,
}

impl JoinStep {
    pub fn to_sql(&self) -> String {
        format!(
            "{} {} {} ON {}",
            self.join_type.as_sql(),
            quote_qualified_name(&self.to_table),
            self.to_alias,
            self.on_predicate
        )
    }
}

/// A correlated EXISTS predicate reaching a filter-only object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistsStep {
    pub target_object: String,
    /// Alias of the target inside the subquery
    pub target_alias: String,
    /// Outer object the subquery is correlated with
    pub anchor_object: String,
    pub relation_codes: Vec<String>,
    /// Subquery aliases, scoped to this step only
    pub local_aliases: BTreeMap<String, String>,
    /// `EXISTS (...)` SQL containing the filter token
    pub sql: String,
    pub filter_token: String,
}

impl ExistsStep {
    /// The EXISTS predicate with the filter token replaced by `condition`
    pub fn render(&self, condition: &str) -> String {
        self.sql.replace(&self.filter_token, condition)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStep {
    Join(JoinStep),
    Exists(ExistsStep),
}

#[derive(Debug, Clone)]
pub struct JoinPlan {
    pub root_object: String,
    pub root_table: String,
    pub root_alias: String,
    aliases: BTreeMap<String, String>,
    to_many: BTreeSet<String>,
    steps: Vec<PlanStep>,
}

impl JoinPlan {
    pub(crate) fn new(root_object: &str, root_table: &str, root_alias: &str) -> Self {
        let mut aliases = BTreeMap::new();
        aliases.insert(root_object.to_string(), root_alias.to_string());
        Self {
            root_object: root_object.to_string(),
            root_table: root_table.to_string(),
            root_alias: root_alias.to_string(),
            aliases,
            to_many: BTreeSet::new(),
            steps: Vec::new(),
        }
    }

    pub(crate) fn push_join(&mut self, step: JoinStep, to_many: bool) {
        self.aliases
            .insert(step.to_object.clone(), step.to_alias.clone());
        if to_many {
            self.to_many.insert(step.to_object.clone());
        }
        self.steps.push(PlanStep::Join(step));
    }

    pub(crate) fn push_exists(&mut self, step: ExistsStep) {
        self.steps.push(PlanStep::Exists(step));
    }

    /// Alias of an object joined in the outer query
    pub fn alias_of(&self, object_code: &str) -> Option<&str> {
        self.aliases.get(object_code).map(String::as_str)
    }

    /// Alias under which filters on `object_code` must be rendered
    pub fn field_alias(&self, object_code: &str) -> Option<&str> {
        self.alias_of(object_code).or_else(|| {
            self.exists_step_for(object_code)
                .map(|step| step.target_alias.as_str())
        })
    }

    pub fn is_joined(&self, object_code: &str) -> bool {
        self.aliases.contains_key(object_code)
    }

    /// Whether a joined object sits behind a one-to-many or many-to-many hop
    pub fn is_to_many(&self, object_code: &str) -> bool {
        self.to_many.contains(object_code)
    }

    pub fn has_to_many_join(&self) -> bool {
        !self.to_many.is_empty()
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn join_steps(&self) -> impl Iterator<Item = &JoinStep> {
        self.steps.iter().filter_map(|step| match step {
            PlanStep::Join(join) => Some(join),
            PlanStep::Exists(_) => None,
        })
    }

    pub fn exists_steps(&self) -> impl Iterator<Item = &ExistsStep> {
        self.steps.iter().filter_map(|step| match step {
            PlanStep::Join(_) => None,
            PlanStep::Exists(exists) => Some(exists),
        })
    }

    pub fn exists_step_for(&self, object_code: &str) -> Option<&ExistsStep> {
        self.exists_steps()
            .find(|step| step.target_object == object_code)
    }

    /// Every alias in the plan, outer scope first, then each EXISTS scope
    pub fn all_aliases(&self) -> Vec<&str> {
        let mut all: Vec<&str> = self.aliases.values().map(String::as_str).collect();
        for step in self.exists_steps() {
            all.extend(step.local_aliases.values().map(String::as_str));
        }
        all
    }

    /// Fails with `AmbiguousAlias` if any two tables share an alias, across all scopes
    pub fn check_aliases(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for alias in self.all_aliases() {
            if !seen.insert(alias) {
                return Err(QueryError::AmbiguousAlias(alias.to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join(to: &str, alias: &str) -> JoinStep {
        JoinStep {
            relation_code: format!("root_{}", to),
            join_type: JoinType::Left,
            from_alias: "e0".to_string(),
            to_object: to.to_string(),
            to_table: format!("hr.{}", to),
            to_alias: alias.to_string(),
            on_predicate: format!("e0.\"{}_id\" = {}.\"id\"", to, alias),
        }
    }

    #[test]
    fn test_plan_request_filter_only() {
        let request = PlanRequest::new("emp")
            .require("dept")
            .filter_only("dept")
            .filter_only("proj");
        assert!(!request.is_filter_only("dept"));
        assert!(request.is_filter_only("proj"));
    }

    #[test]
    fn test_join_step_sql() {
        assert_eq!(
            join("dept", "d0").to_sql(),
            "LEFT JOIN \"hr\".\"dept\" d0 ON e0.\"dept_id\" = d0.\"id\""
        );
    }

    #[test]
    fn test_exists_render_replaces_token() {
        let step = ExistsStep {
            target_object: "proj".to_string(),
            target_alias: "x0_p0".to_string(),
            anchor_object: "emp".to_string(),
            relation_codes: vec!["emp_proj".to_string()],
            local_aliases: BTreeMap::from([("proj".to_string(), "x0_p0".to_string())]),
            sql: "EXISTS (SELECT 1 FROM \"proj\" x0_p0 WHERE x0_p0.\"emp_id\" = e0.\"id\" AND __F__)"
                .to_string(),
            filter_token: "__F__".to_string(),
        };
        assert_eq!(
            step.render("x0_p0.\"status\" = $1::text"),
            "EXISTS (SELECT 1 FROM \"proj\" x0_p0 WHERE x0_p0.\"emp_id\" = e0.\"id\" AND x0_p0.\"status\" = $1::text)"
        );
    }

    #[test]
    fn test_alias_lookup_and_collision_check() {
        let mut plan = JoinPlan::new("emp", "hr.employee", "e0");
        plan.push_join(join("dept", "d0"), false);
        plan.push_join(join("proj", "p0"), true);

        assert_eq!(plan.alias_of("dept"), Some("d0"));
        assert!(plan.is_to_many("proj"));
        assert!(!plan.is_to_many("dept"));
        assert!(plan.check_aliases().is_ok());

        plan.push_join(join("dup", "d0"), false);
        assert!(matches!(plan.check_aliases(), Err(QueryError::AmbiguousAlias(a)) if a == "d0"));
    }
}
