//! SQL statement assembly
//!
//! Combines a [`JoinPlan`] with alias-bound [`ResolvedField`]s into one parameterized
//! PostgreSQL SELECT. Fields of the root object are selected flat; every other object
//! becomes one JSON column named after its object code, an object for to-one
//! relations and an array (`jsonb_agg`) for to-many relations.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::catalog::MetadataCatalog;
use crate::config::EngineConfig;
use crate::error::{QueryError, Result};
use crate::metadata::FieldMapping;
use crate::planner::JoinPlan;
use crate::request::{NullsOrder, QueryRequest, SortDirection};
use crate::resolver::ResolvedField;
use crate::sql::condition::{BoundParameter, ConditionBuilder, QueryContext};
use crate::sql::sanitize::{quote_identifier, quote_key_literal, quote_qualified_name};

/// A statement ready for execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedQuery {
    pub sql: String,
    /// Values in placeholder order: `parameters[0]` binds `$1`
    pub parameters: Vec<BoundParameter>,
}

impl GeneratedQuery {
    /// Parameters keyed by synthetic name (`p1`, `p2`, ...)
    pub fn parameter_map(&self) -> BTreeMap<String, Value> {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.parameters.iter().map(|p| &p.value)
    }
}

/// Fields of one request, resolved and bound to plan aliases
#[derive(Debug, Clone, Default)]
pub struct ResolvedFields {
    /// In `select_fields` order
    pub select: Vec<ResolvedField>,
    /// Keyed by dot-path
    pub filters: BTreeMap<String, ResolvedField>,
    /// Parallel to the request's `sorts`
    pub sorts: Vec<ResolvedField>,
}

/// Renders statements for one catalog and configuration
pub struct SqlGenerator<'a, C: MetadataCatalog + ?Sized> {
    catalog: &'a C,
    config: &'a EngineConfig,
}

impl<'a, C: MetadataCatalog + ?Sized> SqlGenerator<'a, C> {
    pub fn new(catalog: &'a C, config: &'a EngineConfig) -> Self {
        Self { catalog, config }
    }

    pub fn generate(
        &self,
        request: &QueryRequest,
        plan: &JoinPlan,
        fields: &ResolvedFields,
    ) -> Result<GeneratedQuery> {
        let mut ctx = QueryContext::new(self.config.param_prefix.as_str());
        let mut sql = String::from("SELECT ");

        let mut order_by = Vec::new();
        let mut group_by = Vec::new();
        if request.count_only {
            sql.push_str(&self.count_expression(plan)?);
        } else {
            let select = self.select_list(plan, &fields.select)?;
            order_by = self.order_by(request, fields)?;
            if request.distinct {
                check_distinct_order(plan, &select, &fields.sorts, &order_by)?;
                sql.push_str("DISTINCT ");
            }
            sql.push_str(&select.columns.join(", "));

            // Any to-many join repeats root rows, aggregated or not
            if plan.has_to_many_join() {
                group_by = select.plain;
                group_by.push(format!(
                    "{}.{}",
                    plan.root_alias,
                    quote_identifier(self.primary_key(&plan.root_object)?)
                ));
                group_by.extend(order_by.iter().map(|(_, expr)| expr.clone()));
                let mut seen = BTreeSet::new();
                group_by.retain(|expr| seen.insert(expr.clone()));
            }
        }

        sql.push_str(" FROM ");
        sql.push_str(&quote_qualified_name(&plan.root_table));
        sql.push(' ');
        sql.push_str(&plan.root_alias);
        for join in plan.join_steps() {
            sql.push(' ');
            sql.push_str(&join.to_sql());
        }

        if let Some(where_clause) = self.where_clause(request, plan, fields, &mut ctx)? {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause);
        }

        if !request.count_only {
            if !group_by.is_empty() {
                sql.push_str(" GROUP BY ");
                sql.push_str(&group_by.join(", "));
            }

            if !order_by.is_empty() {
                let rendered: Vec<String> = order_by
                    .into_iter()
                    .map(|(suffix, expr)| format!("{} {}", expr, suffix))
                    .collect();
                sql.push_str(" ORDER BY ");
                sql.push_str(&rendered.join(", "));
            }

            let limit = self.config.effective_limit(request.limit);
            sql.push_str(" LIMIT ");
            sql.push_str(&ctx.bind(Value::from(limit), "bigint"));

            match request.offset {
                Some(offset) if offset < 0 => {
                    return Err(QueryError::validation(format!(
                        "Offset must not be negative, got {}",
                        offset
                    )));
                }
                Some(offset) if offset > 0 => {
                    sql.push_str(" OFFSET ");
                    sql.push_str(&ctx.bind(Value::from(offset), "bigint"));
                }
                _ => {}
            }
        }

        debug!(
            root = %plan.root_object,
            parameters = ctx.len(),
            count_only = request.count_only,
            "Generated query"
        );
        trace!(sql = %sql, "Generated SQL");

        Ok(GeneratedQuery {
            sql,
            parameters: ctx.into_parameters(),
        })
    }

    fn count_expression(&self, plan: &JoinPlan) -> Result<String> {
        if plan.has_to_many_join() {
            let pk = self.primary_key(&plan.root_object)?;
            Ok(format!(
                "COUNT(DISTINCT {}.{})",
                plan.root_alias,
                quote_identifier(pk)
            ))
        } else {
            Ok("COUNT(*)".to_string())
        }
    }

    fn select_list(&self, plan: &JoinPlan, select: &[ResolvedField]) -> Result<SelectList> {
        if select.is_empty() {
            return Ok(SelectList {
                columns: vec![format!("{}.*", plan.root_alias)],
                plain: Vec::new(),
                root_columns: Vec::new(),
                root_star: true,
            });
        }

        let mut columns = Vec::new();
        let mut plain = Vec::new();
        let mut root_columns = Vec::new();
        let mut nested: Vec<(&str, Vec<&ResolvedField>)> = Vec::new();

        for field in select {
            if field.object_code == plan.root_object {
                let expr = field.sql_expr(&self.config.expressions)?;
                columns.push(format!("{} AS {}", expr, quote_identifier(&field.output_key)));
                plain.push(expr.clone());
                root_columns.push(expr);
            } else {
                match nested.iter_mut().find(|(object, _)| *object == field.object_code) {
                    Some((_, members)) => members.push(field),
                    None => nested.push((field.object_code.as_str(), vec![field])),
                }
            }
        }

        let aggregated = nested
            .iter()
            .filter(|(object, _)| plan.is_to_many(object))
            .count();

        for (object, members) in &nested {
            let mut pairs = Vec::with_capacity(members.len());
            for field in members {
                let expr = field.sql_expr(&self.config.expressions)?;
                pairs.push(format!("{}, {}", quote_key_literal(&field.output_key), expr));
                if !plan.is_to_many(object) {
                    plain.push(expr);
                }
            }
            let json = format!("jsonb_build_object({})", pairs.join(", "));

            if plan.is_to_many(object) {
                let alias = plan.alias_of(object).ok_or_else(|| {
                    QueryError::CyclicOrUnreachablePlan(format!(
                        "Object '{}' is not joined",
                        object
                    ))
                })?;
                let pk = self.primary_key(object)?;
                // Several to-many joins multiply each other's rows
                let distinct = if aggregated > 1 { "DISTINCT " } else { "" };
                columns.push(format!(
                    "COALESCE(jsonb_agg({}{}) FILTER (WHERE {}.{} IS NOT NULL), '[]'::jsonb) AS {}",
                    distinct,
                    json,
                    alias,
                    quote_identifier(pk),
                    quote_identifier(object)
                ));
            } else {
                columns.push(format!("{} AS {}", json, quote_identifier(object)));
            }
        }

        Ok(SelectList {
            columns,
            plain,
            root_columns,
            root_star: false,
        })
    }

    fn where_clause(
        &self,
        request: &QueryRequest,
        plan: &JoinPlan,
        fields: &ResolvedFields,
        ctx: &mut QueryContext,
    ) -> Result<Option<String>> {
        let plain = ConditionBuilder::new(&fields.filters, &self.config.expressions);
        // Parts of a filter that also names other objects get an EXISTS of their own
        let scoped = ConditionBuilder::new(&fields.filters, &self.config.expressions)
            .with_exists_steps(plan.exists_steps());
        let mut outer = Vec::new();
        let mut routed: BTreeMap<&str, Vec<String>> = BTreeMap::new();

        for criteria in &request.filters {
            match scoped.exists_scope(criteria) {
                Some(step) => routed
                    .entry(step.target_object.as_str())
                    .or_default()
                    .push(plain.build(criteria, ctx)?),
                None => outer.push(scoped.build(criteria, ctx)?),
            }
        }

        for step in plan.exists_steps() {
            if let Some(conditions) = routed.remove(step.target_object.as_str()) {
                outer.push(step.render(&conditions.join(" AND ")));
            }
        }

        if outer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(outer.join(" AND ")))
        }
    }

    /// (direction suffix, expression) per sort criterion
    fn order_by(
        &self,
        request: &QueryRequest,
        fields: &ResolvedFields,
    ) -> Result<Vec<(String, String)>> {
        if fields.sorts.len() != request.sorts.len() {
            return Err(QueryError::validation(
                "Every sort criterion needs exactly one resolved field",
            ));
        }

        request
            .sorts
            .iter()
            .zip(&fields.sorts)
            .map(|(sort, field)| {
                if field.to_many {
                    return Err(QueryError::validation(format!(
                        "Cannot sort by '{}': it belongs to a to-many relation",
                        field.path
                    )));
                }
                let mut suffix = match sort.direction {
                    SortDirection::Asc => "ASC".to_string(),
                    SortDirection::Desc => "DESC".to_string(),
                };
                match sort.nulls {
                    Some(NullsOrder::First) => suffix.push_str(" NULLS FIRST"),
                    Some(NullsOrder::Last) => suffix.push_str(" NULLS LAST"),
                    None => {}
                }
                Ok((suffix, field.sql_expr(&self.config.expressions)?))
            })
            .collect()
    }

    fn primary_key(&self, object_code: &str) -> Result<&'a str> {
        self.catalog
            .find_object(object_code)
            .map(|o| o.primary_key.as_str())
            .ok_or_else(|| QueryError::metadata_not_found(format!("Object '{}'", object_code)))
    }
}

struct SelectList {
    columns: Vec<String>,
    /// Expressions outside any aggregate
    plain: Vec<String>,
    /// Root expressions selected as top-level columns
    root_columns: Vec<String>,
    /// Whether the list is the `alias.*` default
    root_star: bool,
}

/// SELECT DISTINCT can only be ordered by expressions it selects
fn check_distinct_order(
    plan: &JoinPlan,
    select: &SelectList,
    sorts: &[ResolvedField],
    order_by: &[(String, String)],
) -> Result<()> {
    for (field, (_, expr)) in sorts.iter().zip(order_by) {
        let selected = if select.root_star {
            field.object_code == plan.root_object
                && matches!(field.mapping, FieldMapping::Column { .. })
        } else {
            select.root_columns.contains(expr)
        };
        if !selected {
            return Err(QueryError::validation(format!(
                "Cannot sort DISTINCT rows by '{}': it is not a selected column",
                field.path
            )));
        }
    }
    Ok(())
}
