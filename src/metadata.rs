//! Metadata model for the query engine
//!
//! Immutable descriptions of objects (tables/views), fields, relations and join keys.
//! The engine never mutates these; they come from a catalog snapshot.

use serde::{Deserialize, Serialize};

use crate::naming::snake_to_camel;
use crate::sql::sanitize::{validate_identifier, validate_qualified_name};

// ============================================================================
// Objects
// ============================================================================

fn default_primary_key() -> String {
    "id".to_string()
}

/// A queryable entity backed by a table or view
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Stable code, unique within a catalog
    pub object_code: String,
    /// Human-readable name
    #[serde(default)]
    pub display_name: String,
    /// Backing table or view, optionally schema-qualified (`hr.employee`)
    pub table_name: String,
    /// Hint used to derive runtime table aliases
    #[serde(default)]
    pub alias_hint: String,
    /// Connection that owns the table
    #[serde(default)]
    pub connection_id: String,
    /// Primary key column (default: `id`)
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
}

impl ObjectMeta {
    /// Create a new object with `id` as primary key and the code as alias hint
    pub fn new(object_code: impl Into<String>, table_name: impl Into<String>) -> Self {
        let object_code = object_code.into();
        Self {
            display_name: object_code.clone(),
            alias_hint: object_code.clone(),
            object_code,
            table_name: table_name.into(),
            connection_id: String::new(),
            primary_key: default_primary_key(),
        }
    }

    pub fn alias_hint(mut self, hint: impl Into<String>) -> Self {
        self.alias_hint = hint.into();
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn connection(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = connection_id.into();
        self
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Validate the identifiers this object contributes to SQL
    pub fn validate(&self) -> Result<(), String> {
        validate_identifier(&self.object_code)
            .map_err(|e| format!("Object code: {}", e))?;
        validate_qualified_name(&self.table_name)
            .map_err(|e| format!("Object '{}': {}", self.object_code, e))?;
        validate_identifier(&self.primary_key)
            .map_err(|e| format!("Object '{}' primary key: {}", self.object_code, e))
    }
}

// ============================================================================
// Fields
// ============================================================================

/// Data type tag of a field, used to cast bound parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
    Timestamp,
    Uuid,
    Json,
}

impl DataType {
    /// PostgreSQL type a bound parameter is cast to
    pub fn sql_cast(&self) -> &'static str {
        match self {
            DataType::String => "text",
            DataType::Integer => "bigint",
            DataType::Decimal => "numeric",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Timestamp => "timestamptz",
            DataType::Uuid => "uuid",
            DataType::Json => "jsonb",
        }
    }
}

/// How a field maps onto SQL
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldMapping {
    /// A physical column of the object's table
    Column { column: String },
    /// A vetted template from the expression allow-list
    Expression { template: String },
}

fn default_true() -> bool {
    true
}

/// A selectable/filterable/sortable attribute of an object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldMeta {
    pub object_code: String,
    pub field_code: String,
    #[serde(default)]
    pub label: String,
    /// Output/JSON key; defaults to the camelCase column name when empty
    #[serde(default)]
    pub alias_hint: String,
    pub mapping: FieldMapping,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default = "default_true")]
    pub allow_select: bool,
    #[serde(default = "default_true")]
    pub allow_filter: bool,
    #[serde(default = "default_true")]
    pub allow_sort: bool,
    #[serde(default)]
    pub not_null: bool,
}

impl FieldMeta {
    /// Create a column-mapped field; all usage flags enabled
    pub fn column(
        object_code: impl Into<String>,
        field_code: impl Into<String>,
        column: impl Into<String>,
        data_type: DataType,
    ) -> Self {
        let field_code = field_code.into();
        Self {
            object_code: object_code.into(),
            label: field_code.clone(),
            field_code,
            alias_hint: String::new(),
            mapping: FieldMapping::Column {
                column: column.into(),
            },
            data_type,
            allow_select: true,
            allow_filter: true,
            allow_sort: true,
            not_null: false,
        }
    }

    /// Create an expression-mapped field referencing an allow-listed template
    pub fn expression(
        object_code: impl Into<String>,
        field_code: impl Into<String>,
        template: impl Into<String>,
        data_type: DataType,
    ) -> Self {
        let mut field = Self::column(object_code, field_code, "", data_type);
        field.mapping = FieldMapping::Expression {
            template: template.into(),
        };
        field
    }

    pub fn alias_hint(mut self, hint: impl Into<String>) -> Self {
        self.alias_hint = hint.into();
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn no_select(mut self) -> Self {
        self.allow_select = false;
        self
    }

    pub fn no_filter(mut self) -> Self {
        self.allow_filter = false;
        self
    }

    pub fn no_sort(mut self) -> Self {
        self.allow_sort = false;
        self
    }

    /// Key under which the field appears in results
    pub fn output_key(&self) -> String {
        if !self.alias_hint.is_empty() {
            return self.alias_hint.clone();
        }
        match &self.mapping {
            FieldMapping::Column { column } => snake_to_camel(column),
            FieldMapping::Expression { .. } => self.field_code.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let context = format!("Field '{}.{}'", self.object_code, self.field_code);
        validate_identifier(&self.field_code).map_err(|e| format!("{}: {}", context, e))?;
        if let FieldMapping::Column { column } = &self.mapping {
            validate_identifier(column).map_err(|e| format!("{} column: {}", context, e))?;
        }
        validate_identifier(&self.output_key())
            .map_err(|e| format!("{} output key: {}", context, e))
    }
}

// ============================================================================
// Relations
// ============================================================================

/// Cardinality of a relation seen from its `from` side
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    ManyToOne,
    OneToMany,
    OneToOne,
    ManyToMany,
}

impl RelationType {
    /// Whether following the relation can multiply rows of the source side
    pub fn is_to_many(&self) -> bool {
        matches!(self, RelationType::OneToMany | RelationType::ManyToMany)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinType {
    Inner,
    #[default]
    Left,
}

impl JoinType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// Policy deciding JOIN vs correlated EXISTS when an object is only filtered on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterMode {
    #[default]
    Auto,
    JoinOnly,
    ExistsPreferred,
    ExistsOnly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum KeyOperator {
    #[default]
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<>")]
    Ne,
}

/// One predicate pair of a relation's ON clause
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinKey {
    pub from_column: String,
    #[serde(default)]
    pub operator: KeyOperator,
    pub to_column: String,
    #[serde(default)]
    pub null_safe: bool,
}

impl JoinKey {
    pub fn eq(from_column: impl Into<String>, to_column: impl Into<String>) -> Self {
        Self {
            from_column: from_column.into(),
            operator: KeyOperator::Eq,
            to_column: to_column.into(),
            null_safe: false,
        }
    }

    pub fn null_safe(mut self) -> Self {
        self.null_safe = true;
        self
    }

    /// SQL comparison between the two sides
    pub fn comparison(&self) -> &'static str {
        match (self.operator, self.null_safe) {
            (KeyOperator::Eq, false) => "=",
            (KeyOperator::Ne, false) => "<>",
            (KeyOperator::Eq, true) => "IS NOT DISTINCT FROM",
            (KeyOperator::Ne, true) => "IS DISTINCT FROM",
        }
    }
}

fn default_weight() -> i32 {
    1
}

/// A directed, typed edge between two objects
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelationMeta {
    pub relation_code: String,
    pub from_object: String,
    pub to_object: String,
    pub relation_type: RelationType,
    #[serde(default)]
    pub join_type: JoinType,
    #[serde(default)]
    pub filter_mode: FilterMode,
    #[serde(default = "default_true")]
    pub navigable: bool,
    #[serde(default = "default_weight")]
    pub path_weight: i32,
    pub join_keys: Vec<JoinKey>,
}

impl RelationMeta {
    /// Create a navigable LEFT relation with weight 1 and AUTO filter mode
    pub fn new(
        relation_code: impl Into<String>,
        from_object: impl Into<String>,
        to_object: impl Into<String>,
        relation_type: RelationType,
        join_keys: Vec<JoinKey>,
    ) -> Self {
        Self {
            relation_code: relation_code.into(),
            from_object: from_object.into(),
            to_object: to_object.into(),
            relation_type,
            join_type: JoinType::Left,
            filter_mode: FilterMode::Auto,
            navigable: true,
            path_weight: default_weight(),
            join_keys,
        }
    }

    pub fn join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    pub fn filter_mode(mut self, mode: FilterMode) -> Self {
        self.filter_mode = mode;
        self
    }

    pub fn weight(mut self, weight: i32) -> Self {
        self.path_weight = weight;
        self
    }

    pub fn not_navigable(mut self) -> Self {
        self.navigable = false;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.join_keys.is_empty() {
            return Err(format!(
                "Relation '{}' must have at least one join key",
                self.relation_code
            ));
        }
        for key in &self.join_keys {
            validate_identifier(&key.from_column)
                .and_then(|_| validate_identifier(&key.to_column))
                .map_err(|e| format!("Relation '{}': {}", self.relation_code, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_key_prefers_alias_hint() {
        let field = FieldMeta::column("dept", "deptName", "dept_name", DataType::String)
            .alias_hint("departmentName");
        assert_eq!(field.output_key(), "departmentName");
    }

    #[test]
    fn test_output_key_defaults_to_camel_column() {
        let field = FieldMeta::column("dept", "name", "dept_name", DataType::String);
        assert_eq!(field.output_key(), "deptName");
    }

    #[test]
    fn test_field_validation_rejects_bad_column() {
        let field = FieldMeta::column("dept", "name", "name; drop", DataType::String);
        assert!(field.validate().is_err());
    }

    #[test]
    fn test_expression_field_skips_column_check() {
        let field = FieldMeta::expression("emp", "fullName", "full_name", DataType::String);
        assert!(field.validate().is_ok());
        assert_eq!(field.output_key(), "fullName");
    }

    #[test]
    fn test_join_key_comparison() {
        assert_eq!(JoinKey::eq("a", "b").comparison(), "=");
        assert_eq!(
            JoinKey::eq("a", "b").null_safe().comparison(),
            "IS NOT DISTINCT FROM"
        );
        let ne = JoinKey {
            operator: KeyOperator::Ne,
            ..JoinKey::eq("a", "b").null_safe()
        };
        assert_eq!(ne.comparison(), "IS DISTINCT FROM");
    }

    #[test]
    fn test_relation_requires_join_key() {
        let rel = RelationMeta::new("r", "a", "b", RelationType::ManyToOne, vec![]);
        assert!(rel.validate().unwrap_err().contains("at least one join key"));
    }

    #[test]
    fn test_relation_deserialization_defaults() {
        let json = r#"{
            "relationCode": "emp_dept",
            "fromObject": "emp",
            "toObject": "dept",
            "relationType": "MANY_TO_ONE",
            "joinKeys": [{"fromColumn": "dept_id", "toColumn": "id"}]
        }"#;
        let rel: RelationMeta = serde_json::from_str(json).unwrap();
        assert_eq!(rel.join_type, JoinType::Left);
        assert_eq!(rel.filter_mode, FilterMode::Auto);
        assert!(rel.navigable);
        assert_eq!(rel.path_weight, 1);
        assert_eq!(rel.join_keys[0].operator, KeyOperator::Eq);
    }

    #[test]
    fn test_field_mapping_serialization() {
        let mapping = FieldMapping::Expression {
            template: "full_name".to_string(),
        };
        let json = serde_json::to_string(&mapping).unwrap();
        assert_eq!(json, r#"{"kind":"EXPRESSION","template":"full_name"}"#);
    }

    #[test]
    fn test_to_many_relation_types() {
        assert!(RelationType::OneToMany.is_to_many());
        assert!(RelationType::ManyToMany.is_to_many());
        assert!(!RelationType::ManyToOne.is_to_many());
        assert!(!RelationType::OneToOne.is_to_many());
    }
}
