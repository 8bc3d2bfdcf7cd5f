//! Metadata catalog port
//!
//! The engine reads metadata through [`MetadataCatalog`]. [`CatalogSnapshot`] is the
//! in-memory implementation: it is validated once when built and then shared
//! read-only by any number of concurrent requests.

pub mod cache;
pub mod postgres;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};
use crate::metadata::{FieldMeta, ObjectMeta, RelationMeta};

pub use cache::{InMemoryMetadataCache, MetadataCache};
pub use postgres::PgCatalogLoader;

/// Read-only view of one catalog's metadata
///
/// Implementations must return a consistent snapshot for the duration of a plan.
pub trait MetadataCatalog {
    fn catalog_id(&self) -> &str;

    fn find_object(&self, object_code: &str) -> Option<&ObjectMeta>;

    fn find_field(&self, object_code: &str, field_code: &str) -> Option<&FieldMeta>;

    /// All fields of an object, in catalog order
    fn find_fields_by_object(&self, object_code: &str) -> &[FieldMeta];

    /// All relations of the catalog with their join keys
    fn all_relations(&self) -> &[RelationMeta];
}

/// Serialized form of a catalog snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDocument {
    pub catalog_id: String,
    #[serde(default)]
    pub objects: Vec<ObjectMeta>,
    #[serde(default)]
    pub fields: Vec<FieldMeta>,
    #[serde(default)]
    pub relations: Vec<RelationMeta>,
}

/// Validated, immutable in-memory catalog
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    catalog_id: String,
    objects: BTreeMap<String, ObjectMeta>,
    fields: BTreeMap<String, Vec<FieldMeta>>,
    relations: Vec<RelationMeta>,
}

impl CatalogSnapshot {
    pub fn builder(catalog_id: impl Into<String>) -> CatalogSnapshotBuilder {
        CatalogSnapshotBuilder {
            document: CatalogDocument {
                catalog_id: catalog_id.into(),
                ..Default::default()
            },
        }
    }

    /// Build a snapshot from its JSON document form
    pub fn from_json(json: &str) -> Result<Self> {
        let document: CatalogDocument = serde_json::from_str(json)?;
        Self::from_document(document)
    }

    /// Validate a document and index it
    pub fn from_document(document: CatalogDocument) -> Result<Self> {
        let mut objects = BTreeMap::new();
        for object in document.objects {
            object.validate().map_err(QueryError::Validation)?;
            if objects.contains_key(&object.object_code) {
                return Err(QueryError::validation(format!(
                    "Duplicate object code '{}'",
                    object.object_code
                )));
            }
            objects.insert(object.object_code.clone(), object);
        }

        let mut fields: BTreeMap<String, Vec<FieldMeta>> = BTreeMap::new();
        for field in document.fields {
            field.validate().map_err(QueryError::Validation)?;
            if !objects.contains_key(&field.object_code) {
                return Err(QueryError::validation(format!(
                    "Field '{}.{}' references unknown object",
                    field.object_code, field.field_code
                )));
            }
            let entry = fields.entry(field.object_code.clone()).or_default();
            if entry.iter().any(|f| f.field_code == field.field_code) {
                return Err(QueryError::validation(format!(
                    "Duplicate field '{}.{}'",
                    field.object_code, field.field_code
                )));
            }
            entry.push(field);
        }

        {
            let mut relation_codes = HashSet::new();
            for relation in &document.relations {
                relation.validate().map_err(QueryError::Validation)?;
                if !relation_codes.insert(relation.relation_code.as_str()) {
                    return Err(QueryError::validation(format!(
                        "Duplicate relation code '{}'",
                        relation.relation_code
                    )));
                }
                for end in [&relation.from_object, &relation.to_object] {
                    if !objects.contains_key(end) {
                        return Err(QueryError::validation(format!(
                            "Relation '{}' references unknown object '{}'",
                            relation.relation_code, end
                        )));
                    }
                }
            }
        }

        Ok(Self {
            catalog_id: document.catalog_id,
            objects,
            fields,
            relations: document.relations,
        })
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectMeta> {
        self.objects.values()
    }
}

impl MetadataCatalog for CatalogSnapshot {
    fn catalog_id(&self) -> &str {
        &self.catalog_id
    }

    fn find_object(&self, object_code: &str) -> Option<&ObjectMeta> {
        self.objects.get(object_code)
    }

    fn find_field(&self, object_code: &str, field_code: &str) -> Option<&FieldMeta> {
        self.find_fields_by_object(object_code)
            .iter()
            .find(|f| f.field_code == field_code)
    }

    fn find_fields_by_object(&self, object_code: &str) -> &[FieldMeta] {
        self.fields
            .get(object_code)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn all_relations(&self) -> &[RelationMeta] {
        &self.relations
    }
}

/// Builder for [`CatalogSnapshot`]
#[derive(Debug)]
pub struct CatalogSnapshotBuilder {
    document: CatalogDocument,
}

impl CatalogSnapshotBuilder {
    pub fn object(mut self, object: ObjectMeta) -> Self {
        self.document.objects.push(object);
        self
    }

    pub fn field(mut self, field: FieldMeta) -> Self {
        self.document.fields.push(field);
        self
    }

    pub fn relation(mut self, relation: RelationMeta) -> Self {
        self.document.relations.push(relation);
        self
    }

    pub fn build(self) -> Result<CatalogSnapshot> {
        CatalogSnapshot::from_document(self.document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{DataType, JoinKey, RelationType};

    fn small_catalog() -> CatalogSnapshotBuilder {
        CatalogSnapshot::builder("hr")
            .object(ObjectMeta::new("emp", "hr.employee"))
            .object(ObjectMeta::new("dept", "hr.department"))
            .field(FieldMeta::column("emp", "code", "emp_code", DataType::String))
            .field(FieldMeta::column("dept", "name", "dept_name", DataType::String))
    }

    #[test]
    fn test_lookup() {
        let catalog = small_catalog().build().unwrap();
        assert_eq!(catalog.catalog_id(), "hr");
        assert!(catalog.find_object("emp").is_some());
        assert!(catalog.find_object("nope").is_none());
        assert!(catalog.find_field("dept", "name").is_some());
        assert!(catalog.find_field("dept", "code").is_none());
        assert_eq!(catalog.find_fields_by_object("emp").len(), 1);
        assert!(catalog.find_fields_by_object("nope").is_empty());
    }

    #[test]
    fn test_duplicate_object_rejected() {
        let result = small_catalog()
            .object(ObjectMeta::new("emp", "hr.other"))
            .build();
        assert!(matches!(
            result,
            Err(QueryError::Validation(msg)) if msg.contains("Duplicate object")
        ));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let result = small_catalog()
            .field(FieldMeta::column("emp", "code", "other", DataType::String))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_relation_to_unknown_object_rejected() {
        let result = small_catalog()
            .relation(RelationMeta::new(
                "emp_x",
                "emp",
                "ghost",
                RelationType::ManyToOne,
                vec![JoinKey::eq("x_id", "id")],
            ))
            .build();
        assert!(matches!(result, Err(QueryError::Validation(msg)) if msg.contains("ghost")));
    }

    #[test]
    fn test_invalid_table_name_rejected() {
        let result = CatalogSnapshot::builder("x")
            .object(ObjectMeta::new("evil", "t; DROP TABLE users"))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "catalogId": "hr",
            "objects": [
                {"objectCode": "emp", "tableName": "employee", "aliasHint": "Employee"}
            ],
            "fields": [
                {"objectCode": "emp", "fieldCode": "code",
                 "mapping": {"kind": "COLUMN", "column": "emp_code"}}
            ]
        }"#;
        let catalog = CatalogSnapshot::from_json(json).unwrap();
        let object = catalog.find_object("emp").unwrap();
        assert_eq!(object.primary_key, "id");
        assert_eq!(object.alias_hint, "Employee");
        let field = catalog.find_field("emp", "code").unwrap();
        assert!(field.allow_select && field.allow_filter && field.allow_sort);
        assert_eq!(field.data_type, DataType::String);
    }
}
