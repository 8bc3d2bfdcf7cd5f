//! Filter condition building for SQL WHERE clauses
//!
//! Converts [`FilterCriteria`] trees over resolved fields into boolean SQL with
//! positional placeholders. Every literal goes through [`QueryContext::bind`]; no
//! request value is ever written into the SQL text.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueryError, Result};
use crate::planner::ExistsStep;
use crate::request::{FilterCondition, FilterCriteria, FilterGroup};
use crate::resolver::ResolvedField;
use crate::sql::expression::ExpressionRegistry;

/// A named parameter value, in binding order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoundParameter {
    pub name: String,
    pub value: Value,
}

/// Parameter allocation for one generated statement
///
/// Names are `{prefix}1`, `{prefix}2`, ... and parameter `n` is rendered as the
/// PostgreSQL placeholder `$n`.
#[derive(Debug, Clone)]
pub struct QueryContext {
    prefix: String,
    parameters: Vec<BoundParameter>,
}

impl QueryContext {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            parameters: Vec::new(),
        }
    }

    /// Bind a value and return its placeholder cast to `sql_type`
    pub fn bind(&mut self, value: Value, sql_type: &str) -> String {
        let position = self.parameters.len() + 1;
        self.parameters.push(BoundParameter {
            name: format!("{}{}", self.prefix, position),
            value,
        });
        format!("${}::{}", position, sql_type)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn parameters(&self) -> &[BoundParameter] {
        &self.parameters
    }

    pub fn into_parameters(self) -> Vec<BoundParameter> {
        self.parameters
    }
}

/// Supported filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    NotIn,
    Between,
    Like,
    ILike,
    IsNull,
    IsNotNull,
}

impl FromStr for FilterOperator {
    type Err = QueryError;

    fn from_str(code: &str) -> Result<Self> {
        let operator = match code.to_ascii_uppercase().as_str() {
            "EQ" => FilterOperator::Eq,
            "NE" => FilterOperator::Ne,
            "GT" => FilterOperator::Gt,
            "GE" => FilterOperator::Ge,
            "LT" => FilterOperator::Lt,
            "LE" => FilterOperator::Le,
            "IN" => FilterOperator::In,
            "NOT_IN" => FilterOperator::NotIn,
            "BETWEEN" => FilterOperator::Between,
            "LIKE" => FilterOperator::Like,
            "ILIKE" => FilterOperator::ILike,
            "IS_NULL" => FilterOperator::IsNull,
            "IS_NOT_NULL" => FilterOperator::IsNotNull,
            _ => return Err(QueryError::unsupported_operator(code)),
        };
        Ok(operator)
    }
}

impl FilterOperator {
    fn comparison(&self) -> Option<&'static str> {
        match self {
            FilterOperator::Eq => Some("="),
            FilterOperator::Ne => Some("<>"),
            FilterOperator::Gt => Some(">"),
            FilterOperator::Ge => Some(">="),
            FilterOperator::Lt => Some("<"),
            FilterOperator::Le => Some("<="),
            _ => None,
        }
    }
}

/// Renders filter trees against fields resolved for one request
pub struct ConditionBuilder<'a> {
    fields: &'a BTreeMap<String, ResolvedField>,
    expressions: &'a ExpressionRegistry,
    /// EXISTS steps keyed by target object
    exists: BTreeMap<&'a str, &'a ExistsStep>,
}

impl<'a> ConditionBuilder<'a> {
    /// `fields` maps every filtered dot-path to its resolved, alias-bound field
    pub fn new(
        fields: &'a BTreeMap<String, ResolvedField>,
        expressions: &'a ExpressionRegistry,
    ) -> Self {
        Self {
            fields,
            expressions,
            exists: BTreeMap::new(),
        }
    }

    /// Wrap each subtree whose fields all belong to one EXISTS target in that step
    ///
    /// The subtree is rendered whole inside the subquery, so its conditions must hold
    /// for the same related row.
    pub fn with_exists_steps(mut self, steps: impl IntoIterator<Item = &'a ExistsStep>) -> Self {
        self.exists = steps
            .into_iter()
            .map(|step| (step.target_object.as_str(), step))
            .collect();
        self
    }

    /// The EXISTS step owning every field of `criteria`, if there is one
    pub fn exists_scope(&self, criteria: &FilterCriteria) -> Option<&'a ExistsStep> {
        if self.exists.is_empty() {
            return None;
        }
        let mut objects = criteria
            .field_paths()
            .into_iter()
            .filter_map(|path| self.fields.get(path))
            .map(|field| field.object_code.as_str());

        let first = objects.next()?;
        if objects.any(|object| object != first) {
            return None;
        }
        self.exists.get(first).copied()
    }

    /// Build one criterion (leaf or group) into a boolean SQL expression
    pub fn build(&self, criteria: &FilterCriteria, ctx: &mut QueryContext) -> Result<String> {
        self.build_scoped(criteria, ctx, false)
    }

    /// Build several criteria and AND them; `None` when the list is empty
    pub fn build_all<'c>(
        &self,
        criteria: impl IntoIterator<Item = &'c FilterCriteria>,
        ctx: &mut QueryContext,
    ) -> Result<Option<String>> {
        let clauses = criteria
            .into_iter()
            .map(|c| self.build(c, ctx))
            .collect::<Result<Vec<_>>>()?;
        if clauses.is_empty() {
            Ok(None)
        } else {
            Ok(Some(clauses.join(" AND ")))
        }
    }

    fn build_scoped(
        &self,
        criteria: &FilterCriteria,
        ctx: &mut QueryContext,
        in_exists: bool,
    ) -> Result<String> {
        let scope = if in_exists {
            None
        } else {
            self.exists_scope(criteria)
        };
        if let Some(step) = scope {
            let condition = self.build_scoped(criteria, ctx, true)?;
            return Ok(step.render(&condition));
        }

        match criteria {
            FilterCriteria::Condition(condition) => self.build_condition(condition, ctx),
            FilterCriteria::Group(group) => self.build_group(group, ctx, in_exists),
        }
    }

    fn build_group(
        &self,
        group: &FilterGroup,
        ctx: &mut QueryContext,
        in_exists: bool,
    ) -> Result<String> {
        if group.children.is_empty() {
            return Err(QueryError::validation(
                "Filter group requires at least one condition",
            ));
        }

        let mut clauses = Vec::with_capacity(group.children.len());
        for child in &group.children {
            clauses.push(self.build_scoped(child, ctx, in_exists)?);
        }

        let joined = format!("({})", clauses.join(group.logic.as_sql()));
        if group.negate {
            Ok(format!("NOT {}", joined))
        } else {
            Ok(joined)
        }
    }

    fn build_condition(
        &self,
        condition: &FilterCondition,
        ctx: &mut QueryContext,
    ) -> Result<String> {
        let operator: FilterOperator = condition.operator.parse()?;
        let field = self.fields.get(&condition.field).ok_or_else(|| {
            QueryError::metadata_not_found(format!("Field '{}' was not resolved", condition.field))
        })?;
        let expr = field.sql_expr(self.expressions)?;
        let cast = field.data_type.sql_cast();

        match operator {
            FilterOperator::Eq
            | FilterOperator::Ne
            | FilterOperator::Gt
            | FilterOperator::Ge
            | FilterOperator::Lt
            | FilterOperator::Le => {
                let value = match &condition.value {
                    Some(value) if !value.is_null() => value.clone(),
                    // EQ/NE against null mean IS [NOT] NULL
                    _ if operator == FilterOperator::Eq => return Ok(format!("{} IS NULL", expr)),
                    _ if operator == FilterOperator::Ne => {
                        return Ok(format!("{} IS NOT NULL", expr));
                    }
                    _ => {
                        return Err(QueryError::validation(format!(
                            "{} on '{}' requires a value",
                            condition.operator, condition.field
                        )));
                    }
                };
                let symbol = operator.comparison().unwrap_or("=");
                Ok(format!("{} {} {}", expr, symbol, ctx.bind(value, cast)))
            }
            FilterOperator::In | FilterOperator::NotIn => {
                let values = list_values(condition)?;
                if values.is_empty() {
                    let constant = if operator == FilterOperator::In { "FALSE" } else { "TRUE" };
                    return Ok(constant.to_string());
                }
                let placeholders: Vec<String> =
                    values.into_iter().map(|v| ctx.bind(v, cast)).collect();
                let keyword = if operator == FilterOperator::In { "IN" } else { "NOT IN" };
                Ok(format!("{} {} ({})", expr, keyword, placeholders.join(", ")))
            }
            FilterOperator::Between => {
                let (Some(low), Some(high)) = (
                    condition.value.clone().filter(|v| !v.is_null()),
                    condition.value2.clone().filter(|v| !v.is_null()),
                ) else {
                    return Err(QueryError::unsupported_operator(format!(
                        "BETWEEN on '{}' requires both value and value2",
                        condition.field
                    )));
                };
                let low = ctx.bind(low, cast);
                let high = ctx.bind(high, cast);
                Ok(format!("{} BETWEEN {} AND {}", expr, low, high))
            }
            FilterOperator::Like | FilterOperator::ILike => {
                let pattern = match &condition.value {
                    Some(Value::String(s)) => Value::String(s.clone()),
                    _ => {
                        return Err(QueryError::validation(format!(
                            "{} on '{}' requires a string pattern",
                            condition.operator, condition.field
                        )));
                    }
                };
                let keyword = if operator == FilterOperator::Like { "LIKE" } else { "ILIKE" };
                Ok(format!("{} {} {}", expr, keyword, ctx.bind(pattern, "text")))
            }
            FilterOperator::IsNull => Ok(format!("{} IS NULL", expr)),
            FilterOperator::IsNotNull => Ok(format!("{} IS NOT NULL", expr)),
        }
    }
}

/// `values`, or `value` when it holds an array
fn list_values(condition: &FilterCondition) -> Result<Vec<Value>> {
    match (&condition.values, &condition.value) {
        (Some(values), _) => Ok(values.clone()),
        (None, Some(Value::Array(values))) => Ok(values.clone()),
        _ => Err(QueryError::validation(format!(
            "{} on '{}' requires a list of values",
            condition.operator, condition.field
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{DataType, FieldMapping};
    use serde_json::json;

    fn field(path: &str, alias: &str, column: &str, data_type: DataType) -> ResolvedField {
        let (object, code) = path.split_once('.').unwrap();
        ResolvedField {
            path: path.to_string(),
            object_code: object.to_string(),
            field_code: code.to_string(),
            alias: Some(alias.to_string()),
            output_key: code.to_string(),
            relation_path: Vec::new(),
            mapping: FieldMapping::Column {
                column: column.to_string(),
            },
            data_type,
            to_many: false,
        }
    }

    fn fields() -> BTreeMap<String, ResolvedField> {
        [
            field("emp.code", "e0", "emp_code", DataType::String),
            field("emp.age", "e0", "age", DataType::Integer),
            field("dept.region", "d0", "region", DataType::String),
            field("proj.status", "x0_p0", "status", DataType::String),
            field("proj.name", "x0_p0", "project_name", DataType::String),
        ]
        .into_iter()
        .map(|f| (f.path.clone(), f))
        .collect()
    }

    fn build(criteria: FilterCriteria) -> Result<(String, Vec<BoundParameter>)> {
        let fields = fields();
        let registry = ExpressionRegistry::new();
        let builder = ConditionBuilder::new(&fields, &registry);
        let mut ctx = QueryContext::new("p");
        let sql = builder.build(&criteria, &mut ctx)?;
        Ok((sql, ctx.into_parameters()))
    }

    // ========================================================================
    // Comparisons
    // ========================================================================

    #[test]
    fn test_simple_comparisons() {
        let (sql, params) = build(FilterCriteria::eq("emp.code", "A1")).unwrap();
        assert_eq!(sql, "e0.\"emp_code\" = $1::text");
        assert_eq!(
            params,
            vec![BoundParameter {
                name: "p1".to_string(),
                value: json!("A1")
            }]
        );

        let (sql, _) = build(FilterCriteria::ge("emp.age", 30)).unwrap();
        assert_eq!(sql, "e0.\"age\" >= $1::bigint");

        let (sql, _) = build(FilterCriteria::ne("dept.region", "EU")).unwrap();
        assert_eq!(sql, "d0.\"region\" <> $1::text");
    }

    #[test]
    fn test_eq_null_is_null_check() {
        let (sql, params) = build(FilterCriteria::eq("emp.code", Value::Null)).unwrap();
        assert_eq!(sql, "e0.\"emp_code\" IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_operator_codes_are_case_insensitive() {
        assert_eq!("not_in".parse::<FilterOperator>().unwrap(), FilterOperator::NotIn);
        assert_eq!("Ilike".parse::<FilterOperator>().unwrap(), FilterOperator::ILike);
        let err =
            build(FilterCriteria::condition("emp.code", "REGEX", Some(json!("x")))).unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedOperator(op) if op == "REGEX"));
    }

    // ========================================================================
    // Lists and ranges
    // ========================================================================

    #[test]
    fn test_in_binds_each_element() {
        let (sql, params) =
            build(FilterCriteria::in_list("emp.age", vec![json!(1), json!(2), json!(3)])).unwrap();
        assert_eq!(sql, "e0.\"age\" IN ($1::bigint, $2::bigint, $3::bigint)");
        let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn test_empty_lists() {
        let (sql, params) = build(FilterCriteria::in_list("emp.age", vec![])).unwrap();
        assert_eq!(sql, "FALSE");
        assert!(params.is_empty());

        let (sql, _) = build(FilterCriteria::not_in("emp.age", vec![])).unwrap();
        assert_eq!(sql, "TRUE");
    }

    #[test]
    fn test_between_requires_both_bounds() {
        let (sql, params) = build(FilterCriteria::between("emp.age", 20, 30)).unwrap();
        assert_eq!(sql, "e0.\"age\" BETWEEN $1::bigint AND $2::bigint");
        assert_eq!(params.len(), 2);

        let one_bound = FilterCriteria::condition("emp.age", "BETWEEN", Some(json!(20)));
        assert!(matches!(build(one_bound), Err(QueryError::UnsupportedOperator(_))));
    }

    #[test]
    fn test_like_binds_pattern_as_is() {
        let (sql, params) = build(FilterCriteria::ilike("dept.region", "eu")).unwrap();
        assert_eq!(sql, "d0.\"region\" ILIKE $1::text");
        assert_eq!(params[0].value, json!("eu"));
    }

    #[test]
    fn test_is_null_binds_nothing() {
        let (sql, params) = build(FilterCriteria::is_null("dept.region")).unwrap();
        assert_eq!(sql, "d0.\"region\" IS NULL");
        assert!(params.is_empty());

        let (sql, _) = build(FilterCriteria::is_not_null("dept.region")).unwrap();
        assert_eq!(sql, "d0.\"region\" IS NOT NULL");
    }

    // ========================================================================
    // Groups
    // ========================================================================

    #[test]
    fn test_nested_groups_number_parameters_in_order() {
        let criteria = FilterCriteria::or(vec![
            FilterCriteria::eq("emp.code", "A1"),
            FilterCriteria::and(vec![
                FilterCriteria::gt("emp.age", 40),
                FilterCriteria::eq("dept.region", "EU"),
            ]),
        ]);
        let (sql, params) = build(criteria).unwrap();
        assert_eq!(
            sql,
            "(e0.\"emp_code\" = $1::text OR (e0.\"age\" > $2::bigint AND d0.\"region\" = $3::text))"
        );
        let values: Vec<Value> = params.into_iter().map(|p| p.value).collect();
        assert_eq!(values, vec![json!("A1"), json!(40), json!("EU")]);
    }

    #[test]
    fn test_negated_group() {
        let criteria = FilterCriteria::and(vec![FilterCriteria::eq("emp.code", "A1")]).negate();
        let (sql, _) = build(criteria).unwrap();
        assert_eq!(sql, "NOT (e0.\"emp_code\" = $1::text)");
    }

    #[test]
    fn test_empty_group_rejected() {
        assert!(matches!(
            build(FilterCriteria::and(vec![])),
            Err(QueryError::Validation(_))
        ));
    }

    // ========================================================================
    // EXISTS scopes
    // ========================================================================

    fn project_step() -> ExistsStep {
        ExistsStep {
            target_object: "proj".to_string(),
            target_alias: "x0_p0".to_string(),
            anchor_object: "emp".to_string(),
            relation_codes: vec!["emp_proj".to_string()],
            local_aliases: BTreeMap::from([("proj".to_string(), "x0_p0".to_string())]),
            sql: "EXISTS (SELECT 1 FROM \"project\" x0_p0 WHERE e0.\"id\" = x0_p0.\"emp_id\" AND /*f*/)"
                .to_string(),
            filter_token: "/*f*/".to_string(),
        }
    }

    #[test]
    fn test_single_object_subtree_wrapped_in_exists() {
        let fields = fields();
        let registry = ExpressionRegistry::new();
        let step = project_step();
        let builder = ConditionBuilder::new(&fields, &registry).with_exists_steps([&step]);
        let mut ctx = QueryContext::new("p");

        let criteria = FilterCriteria::or(vec![
            FilterCriteria::eq("emp.code", "A1"),
            FilterCriteria::and(vec![
                FilterCriteria::eq("proj.status", "ACTIVE"),
                FilterCriteria::like("proj.name", "Apollo%"),
            ]),
        ]);
        assert!(builder.exists_scope(&criteria).is_none());

        let sql = builder.build(&criteria, &mut ctx).unwrap();
        assert_eq!(
            sql,
            "(e0.\"emp_code\" = $1::text OR EXISTS (SELECT 1 FROM \"project\" x0_p0 WHERE e0.\"id\" = x0_p0.\"emp_id\" AND (x0_p0.\"status\" = $2::text AND x0_p0.\"project_name\" LIKE $3::text)))"
        );
        assert_eq!(ctx.len(), 3);
    }

    #[test]
    fn test_unscoped_builder_renders_plain_conditions() {
        let (sql, _) = build(FilterCriteria::eq("proj.status", "ACTIVE")).unwrap();
        assert_eq!(sql, "x0_p0.\"status\" = $1::text");
    }

    #[test]
    fn test_unresolved_field() {
        assert!(matches!(
            build(FilterCriteria::eq("emp.ghost", 1)),
            Err(QueryError::MetadataNotFound(_))
        ));
    }
}
