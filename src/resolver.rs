//! Field path resolution
//!
//! Turns `"object.field"` dot-paths into [`ResolvedField`]s carrying everything SQL
//! generation needs. A resolver lives for one request: each distinct object is looked
//! up once, with its field list and its relation path from the root, however many
//! select, filter or sort paths refer to it.

use std::collections::BTreeMap;
use std::fmt;

use crate::catalog::MetadataCatalog;
use crate::error::{QueryError, Result};
use crate::metadata::{DataType, FieldMapping, FieldMeta};
use crate::planner::{JoinPlan, ShortestPaths};
use crate::sql::expression::ExpressionRegistry;
use crate::sql::sanitize::quote_identifier;

/// A parsed `"object.field"` reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    pub object_code: String,
    pub field_code: String,
}

impl FieldPath {
    /// Parse a dot-path: exactly one dot, both parts non-empty, no whitespace
    pub fn parse(path: &str) -> Result<Self> {
        if path.chars().any(char::is_whitespace) {
            return Err(QueryError::invalid_field_path(format!(
                "'{}' contains whitespace",
                path
            )));
        }

        let mut parts = path.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(object), Some(field), None) if !object.is_empty() && !field.is_empty() => {
                Ok(Self {
                    object_code: object.to_string(),
                    field_code: field.to_string(),
                })
            }
            _ => Err(QueryError::invalid_field_path(format!(
                "'{}' is not of the form object.field",
                path
            ))),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.object_code, self.field_code)
    }
}

/// What a field is being resolved for; each role has its own metadata flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Select,
    Filter,
    Sort,
}

impl FieldRole {
    fn allowed(&self, field: &FieldMeta) -> bool {
        match self {
            FieldRole::Select => field.allow_select,
            FieldRole::Filter => field.allow_filter,
            FieldRole::Sort => field.allow_sort,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            FieldRole::Select => "selected",
            FieldRole::Filter => "filtered on",
            FieldRole::Sort => "sorted on",
        }
    }
}

/// A field reference resolved against the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    pub path: String,
    pub object_code: String,
    pub field_code: String,
    /// Runtime table alias; bound after planning
    pub alias: Option<String>,
    /// Key under which the value appears in results
    pub output_key: String,
    /// Relation codes followed from the root, in order
    pub relation_path: Vec<String>,
    pub mapping: FieldMapping,
    pub data_type: DataType,
    /// Some hop on the relation path is ONE_TO_MANY or MANY_TO_MANY
    pub to_many: bool,
}

impl ResolvedField {
    pub fn is_root(&self) -> bool {
        self.relation_path.is_empty()
    }

    pub fn bound_alias(&self) -> Result<&str> {
        self.alias.as_deref().ok_or_else(|| {
            QueryError::CyclicOrUnreachablePlan(format!(
                "Field '{}' has no alias bound",
                self.path
            ))
        })
    }

    /// SQL expression for this field under its bound alias
    pub fn sql_expr(&self, expressions: &ExpressionRegistry) -> Result<String> {
        let alias = self.bound_alias()?;
        match &self.mapping {
            FieldMapping::Column { column } => {
                Ok(format!("{}.{}", alias, quote_identifier(column)))
            }
            FieldMapping::Expression { template } => expressions.render(template, alias),
        }
    }
}

struct ObjectEntry<'a> {
    fields: &'a [FieldMeta],
    relation_path: Vec<String>,
    to_many: bool,
}

/// Resolves dot-paths for one request rooted at one object
pub struct FieldResolver<'a, C: MetadataCatalog + ?Sized> {
    catalog: &'a C,
    paths: &'a ShortestPaths<'a>,
    objects: BTreeMap<String, ObjectEntry<'a>>,
}

impl<'a, C: MetadataCatalog + ?Sized> FieldResolver<'a, C> {
    pub fn new(catalog: &'a C, paths: &'a ShortestPaths<'a>) -> Self {
        Self {
            catalog,
            paths,
            objects: BTreeMap::new(),
        }
    }

    /// Resolve a batch of dot-paths; output order matches input order
    pub fn resolve<S: AsRef<str>>(
        &mut self,
        paths: &[S],
        role: FieldRole,
    ) -> Result<Vec<ResolvedField>> {
        let parsed = paths
            .iter()
            .map(|p| FieldPath::parse(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        for path in &parsed {
            if self.objects.contains_key(&path.object_code) {
                continue;
            }
            let entry = self.load_object(&path.object_code)?;
            self.objects.insert(path.object_code.clone(), entry);
        }

        parsed
            .iter()
            .map(|path| {
                let entry = &self.objects[&path.object_code];
                let field = entry
                    .fields
                    .iter()
                    .find(|f| f.field_code == path.field_code)
                    .ok_or_else(|| QueryError::metadata_not_found(format!("Field '{}'", path)))?;

                if !role.allowed(field) {
                    return Err(QueryError::validation(format!(
                        "Field '{}' cannot be {}",
                        path,
                        role.verb()
                    )));
                }

                Ok(ResolvedField {
                    path: path.to_string(),
                    object_code: path.object_code.clone(),
                    field_code: path.field_code.clone(),
                    alias: None,
                    output_key: field.output_key(),
                    relation_path: entry.relation_path.clone(),
                    mapping: field.mapping.clone(),
                    data_type: field.data_type,
                    to_many: entry.to_many,
                })
            })
            .collect()
    }

    pub fn resolve_one(&mut self, path: &str, role: FieldRole) -> Result<ResolvedField> {
        let mut resolved = self.resolve(&[path], role)?;
        resolved
            .pop()
            .ok_or_else(|| QueryError::invalid_field_path(path.to_string()))
    }

    /// Number of objects looked up so far
    pub fn loaded_objects(&self) -> usize {
        self.objects.len()
    }

    fn load_object(&self, object_code: &str) -> Result<ObjectEntry<'a>> {
        if self.catalog.find_object(object_code).is_none() {
            return Err(QueryError::metadata_not_found(format!(
                "Object '{}'",
                object_code
            )));
        }

        let relations = self.paths.path_to(object_code)?;
        Ok(ObjectEntry {
            fields: self.catalog.find_fields_by_object(object_code),
            to_many: relations.iter().any(|r| r.relation_type.is_to_many()),
            relation_path: relations
                .iter()
                .map(|r| r.relation_code.clone())
                .collect(),
        })
    }
}

/// Bind every field's runtime alias from a finished plan
pub fn bind_aliases(fields: &mut [ResolvedField], plan: &JoinPlan) -> Result<()> {
    for field in fields {
        let alias = plan.field_alias(&field.object_code).ok_or_else(|| {
            QueryError::CyclicOrUnreachablePlan(format!(
                "Object '{}' has no alias in the plan",
                field.object_code
            ))
        })?;
        field.alias = Some(alias.to_string());
    }
    Ok(())
}
