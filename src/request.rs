//! Query request types
//!
//! Requests speak only in object and field codes (`"dept.deptName"` dot-paths);
//! they never carry table or column names.

use serde::{Deserialize, Serialize};

// ============================================================================
// Filters
// ============================================================================

/// Connective of a filter group
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

impl LogicalOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            LogicalOperator::And => " AND ",
            LogicalOperator::Or => " OR ",
        }
    }
}

/// A single field comparison
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    /// Dot-path of the filtered field
    pub field: String,
    /// Operator code (`EQ`, `IN`, `BETWEEN`, ...), case-insensitive
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Upper bound for BETWEEN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<serde_json::Value>,
    /// List for IN / NOT_IN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<serde_json::Value>>,
}

/// Children combined with one connective, optionally negated
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilterGroup {
    #[serde(default)]
    pub logic: LogicalOperator,
    #[serde(default)]
    pub negate: bool,
    pub children: Vec<FilterCriteria>,
}

/// A filter tree node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FilterCriteria {
    Group(FilterGroup),
    Condition(FilterCondition),
}

impl FilterCriteria {
    /// Build a comparison with an operator code and a single value
    pub fn condition(
        field: impl Into<String>,
        operator: impl Into<String>,
        value: Option<serde_json::Value>,
    ) -> Self {
        FilterCriteria::Condition(FilterCondition {
            field: field.into(),
            operator: operator.into(),
            value,
            value2: None,
            values: None,
        })
    }

    pub fn eq(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::condition(field, "EQ", Some(value.into()))
    }

    pub fn ne(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::condition(field, "NE", Some(value.into()))
    }

    pub fn gt(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::condition(field, "GT", Some(value.into()))
    }

    pub fn ge(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::condition(field, "GE", Some(value.into()))
    }

    pub fn lt(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::condition(field, "LT", Some(value.into()))
    }

    pub fn le(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::condition(field, "LE", Some(value.into()))
    }

    /// Pattern match; the pattern is bound as given, with no added wildcards
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::condition(field, "LIKE", Some(serde_json::Value::String(pattern.into())))
    }

    pub fn ilike(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::condition(field, "ILIKE", Some(serde_json::Value::String(pattern.into())))
    }

    pub fn in_list(field: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        Self::list(field, "IN", values)
    }

    pub fn not_in(field: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        Self::list(field, "NOT_IN", values)
    }

    fn list(field: impl Into<String>, operator: &str, values: Vec<serde_json::Value>) -> Self {
        FilterCriteria::Condition(FilterCondition {
            field: field.into(),
            operator: operator.to_string(),
            value: None,
            value2: None,
            values: Some(values),
        })
    }

    pub fn between(
        field: impl Into<String>,
        low: impl Into<serde_json::Value>,
        high: impl Into<serde_json::Value>,
    ) -> Self {
        FilterCriteria::Condition(FilterCondition {
            field: field.into(),
            operator: "BETWEEN".to_string(),
            value: Some(low.into()),
            value2: Some(high.into()),
            values: None,
        })
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::condition(field, "IS_NULL", None)
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::condition(field, "IS_NOT_NULL", None)
    }

    pub fn and(children: Vec<FilterCriteria>) -> Self {
        Self::group(LogicalOperator::And, children)
    }

    pub fn or(children: Vec<FilterCriteria>) -> Self {
        Self::group(LogicalOperator::Or, children)
    }

    fn group(logic: LogicalOperator, children: Vec<FilterCriteria>) -> Self {
        FilterCriteria::Group(FilterGroup {
            logic,
            negate: false,
            children,
        })
    }

    /// Negate this criterion; a single condition is wrapped in a one-child group
    pub fn negate(self) -> Self {
        match self {
            FilterCriteria::Group(mut group) => {
                group.negate = !group.negate;
                FilterCriteria::Group(group)
            }
            condition => FilterCriteria::Group(FilterGroup {
                logic: LogicalOperator::And,
                negate: true,
                children: vec![condition],
            }),
        }
    }

    /// Every field dot-path referenced anywhere in this tree, in order of appearance
    pub fn field_paths(&self) -> Vec<&str> {
        let mut paths = Vec::new();
        self.collect_paths(&mut paths);
        paths
    }

    fn collect_paths<'a>(&'a self, paths: &mut Vec<&'a str>) {
        match self {
            FilterCriteria::Condition(condition) => paths.push(&condition.field),
            FilterCriteria::Group(group) => {
                for child in &group.children {
                    child.collect_paths(paths);
                }
            }
        }
    }
}

// ============================================================================
// Sorting
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "asc")]
    Asc,
    #[serde(alias = "desc")]
    Desc,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum NullsOrder {
    #[serde(alias = "first")]
    First,
    #[serde(alias = "last")]
    Last,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SortCriteria {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
    /// Database default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nulls: Option<NullsOrder>,
}

impl SortCriteria {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
            nulls: None,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
            nulls: None,
        }
    }

    pub fn nulls_first(mut self) -> Self {
        self.nulls = Some(NullsOrder::First);
        self
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls = Some(NullsOrder::Last);
        self
    }
}

// ============================================================================
// Request
// ============================================================================

/// A declarative query against one root object
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub root_object: String,
    #[serde(default)]
    pub select_fields: Vec<String>,
    /// Top-level criteria, ANDed together
    #[serde(default)]
    pub filters: Vec<FilterCriteria>,
    #[serde(default)]
    pub sorts: Vec<SortCriteria>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default)]
    pub count_only: bool,
}

impl QueryRequest {
    pub fn new(root_object: impl Into<String>) -> Self {
        Self {
            root_object: root_object.into(),
            ..Default::default()
        }
    }

    /// Add a field dot-path to the SELECT list
    pub fn select(mut self, field: impl Into<String>) -> Self {
        self.select_fields.push(field.into());
        self
    }

    pub fn select_all<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn filter(mut self, criteria: FilterCriteria) -> Self {
        self.filters.push(criteria);
        self
    }

    pub fn sort(mut self, sort: SortCriteria) -> Self {
        self.sorts.push(sort);
        self
    }

    /// Set pagination
    pub fn paginate(mut self, offset: i64, limit: i64) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Count matching root rows instead of returning them
    pub fn count_only(mut self) -> Self {
        self.count_only = true;
        self
    }

    /// The same request with `count_only` set
    pub fn to_count_request(&self) -> Self {
        Self {
            count_only: true,
            ..self.clone()
        }
    }
}
