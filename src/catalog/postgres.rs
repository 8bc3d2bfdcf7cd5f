//! PostgreSQL-backed metadata catalog loader
//!
//! Reads objects, fields, relations and join keys for one catalog id from four
//! metadata tables and assembles a validated [`CatalogSnapshot`].

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::catalog::{CatalogDocument, CatalogSnapshot};
use crate::config::MetadataTables;
use crate::error::{QueryError, Result};
use crate::metadata::{FieldMapping, FieldMeta, JoinKey, ObjectMeta, RelationMeta};
use crate::sql::sanitize::quote_identifier;

/// Loads catalog snapshots from PostgreSQL metadata tables
pub struct PgCatalogLoader {
    pool: PgPool,
    tables: MetadataTables,
}

impl PgCatalogLoader {
    pub fn new(pool: PgPool, tables: MetadataTables) -> Self {
        Self { pool, tables }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn tables(&self) -> &MetadataTables {
        &self.tables
    }

    /// Create the metadata tables if they don't exist
    pub async fn ensure_tables(&self) -> Result<()> {
        let statements = [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    catalog_id TEXT NOT NULL,
                    object_code TEXT NOT NULL,
                    display_name TEXT NOT NULL DEFAULT '',
                    table_name TEXT NOT NULL,
                    alias_hint TEXT NOT NULL DEFAULT '',
                    connection_id TEXT NOT NULL DEFAULT '',
                    primary_key TEXT NOT NULL DEFAULT 'id',
                    PRIMARY KEY (catalog_id, object_code)
                )
                "#,
                quote_identifier(&self.tables.objects)
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    catalog_id TEXT NOT NULL,
                    object_code TEXT NOT NULL,
                    field_code TEXT NOT NULL,
                    position INTEGER NOT NULL DEFAULT 0,
                    label TEXT NOT NULL DEFAULT '',
                    alias_hint TEXT NOT NULL DEFAULT '',
                    mapping_kind TEXT NOT NULL CHECK (mapping_kind IN ('COLUMN', 'EXPRESSION')),
                    mapping_value TEXT NOT NULL,
                    data_type TEXT NOT NULL DEFAULT 'string',
                    allow_select BOOLEAN NOT NULL DEFAULT TRUE,
                    allow_filter BOOLEAN NOT NULL DEFAULT TRUE,
                    allow_sort BOOLEAN NOT NULL DEFAULT TRUE,
                    not_null BOOLEAN NOT NULL DEFAULT FALSE,
                    PRIMARY KEY (catalog_id, object_code, field_code)
                )
                "#,
                quote_identifier(&self.tables.fields)
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    catalog_id TEXT NOT NULL,
                    relation_code TEXT NOT NULL,
                    from_object TEXT NOT NULL,
                    to_object TEXT NOT NULL,
                    relation_type TEXT NOT NULL,
                    join_type TEXT NOT NULL DEFAULT 'LEFT',
                    filter_mode TEXT NOT NULL DEFAULT 'AUTO',
                    navigable BOOLEAN NOT NULL DEFAULT TRUE,
                    path_weight INTEGER NOT NULL DEFAULT 1,
                    PRIMARY KEY (catalog_id, relation_code)
                )
                "#,
                quote_identifier(&self.tables.relations)
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    catalog_id TEXT NOT NULL,
                    relation_code TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    from_column TEXT NOT NULL,
                    operator TEXT NOT NULL DEFAULT '=',
                    to_column TEXT NOT NULL,
                    null_safe BOOLEAN NOT NULL DEFAULT FALSE,
                    PRIMARY KEY (catalog_id, relation_code, position)
                )
                "#,
                quote_identifier(&self.tables.join_keys)
            ),
        ];

        for statement in &statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Load and validate the snapshot of one catalog
    pub async fn load(&self, catalog_id: &str) -> Result<CatalogSnapshot> {
        let objects = self.load_objects(catalog_id).await?;
        let fields = self.load_fields(catalog_id).await?;
        let relations = self.load_relations(catalog_id).await?;

        debug!(
            catalog_id,
            objects = objects.len(),
            fields = fields.len(),
            relations = relations.len(),
            "loaded catalog metadata"
        );

        CatalogSnapshot::from_document(CatalogDocument {
            catalog_id: catalog_id.to_string(),
            objects,
            fields,
            relations,
        })
    }

    /// Replace the stored metadata of a catalog with the given document
    pub async fn store(&self, document: &CatalogDocument) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for table in [
            &self.tables.join_keys,
            &self.tables.relations,
            &self.tables.fields,
            &self.tables.objects,
        ] {
            let delete_sql = format!(
                "DELETE FROM {} WHERE catalog_id = $1",
                quote_identifier(table)
            );
            sqlx::query(&delete_sql)
                .bind(&document.catalog_id)
                .execute(&mut *tx)
                .await?;
        }

        let insert_object = format!(
            "INSERT INTO {} (catalog_id, object_code, display_name, table_name, alias_hint, connection_id, primary_key) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            quote_identifier(&self.tables.objects)
        );
        for object in &document.objects {
            sqlx::query(&insert_object)
                .bind(&document.catalog_id)
                .bind(&object.object_code)
                .bind(&object.display_name)
                .bind(&object.table_name)
                .bind(&object.alias_hint)
                .bind(&object.connection_id)
                .bind(&object.primary_key)
                .execute(&mut *tx)
                .await?;
        }

        let insert_field = format!(
            "INSERT INTO {} (catalog_id, object_code, field_code, position, label, alias_hint, mapping_kind, mapping_value, data_type, allow_select, allow_filter, allow_sort, not_null) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            quote_identifier(&self.tables.fields)
        );
        for (position, field) in document.fields.iter().enumerate() {
            let (kind, value) = match &field.mapping {
                FieldMapping::Column { column } => ("COLUMN", column.as_str()),
                FieldMapping::Expression { template } => ("EXPRESSION", template.as_str()),
            };
            sqlx::query(&insert_field)
                .bind(&document.catalog_id)
                .bind(&field.object_code)
                .bind(&field.field_code)
                .bind(position as i32)
                .bind(&field.label)
                .bind(&field.alias_hint)
                .bind(kind)
                .bind(value)
                .bind(enum_to_string(&field.data_type)?)
                .bind(field.allow_select)
                .bind(field.allow_filter)
                .bind(field.allow_sort)
                .bind(field.not_null)
                .execute(&mut *tx)
                .await?;
        }

        let insert_relation = format!(
            "INSERT INTO {} (catalog_id, relation_code, from_object, to_object, relation_type, join_type, filter_mode, navigable, path_weight) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            quote_identifier(&self.tables.relations)
        );
        let insert_key = format!(
            "INSERT INTO {} (catalog_id, relation_code, position, from_column, operator, to_column, null_safe) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            quote_identifier(&self.tables.join_keys)
        );
        for relation in &document.relations {
            sqlx::query(&insert_relation)
                .bind(&document.catalog_id)
                .bind(&relation.relation_code)
                .bind(&relation.from_object)
                .bind(&relation.to_object)
                .bind(enum_to_string(&relation.relation_type)?)
                .bind(enum_to_string(&relation.join_type)?)
                .bind(enum_to_string(&relation.filter_mode)?)
                .bind(relation.navigable)
                .bind(relation.path_weight)
                .execute(&mut *tx)
                .await?;

            for (position, key) in relation.join_keys.iter().enumerate() {
                sqlx::query(&insert_key)
                    .bind(&document.catalog_id)
                    .bind(&relation.relation_code)
                    .bind(position as i32)
                    .bind(&key.from_column)
                    .bind(enum_to_string(&key.operator)?)
                    .bind(&key.to_column)
                    .bind(key.null_safe)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_objects(&self, catalog_id: &str) -> Result<Vec<ObjectMeta>> {
        let select_sql = format!(
            r#"
            SELECT object_code, display_name, table_name, alias_hint, connection_id, primary_key
            FROM {}
            WHERE catalog_id = $1
            ORDER BY object_code
            "#,
            quote_identifier(&self.tables.objects)
        );

        let rows = sqlx::query(&select_sql)
            .bind(catalog_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<ObjectMeta> {
                Ok(ObjectMeta {
                    object_code: row.try_get("object_code")?,
                    display_name: row.try_get("display_name")?,
                    table_name: row.try_get("table_name")?,
                    alias_hint: row.try_get("alias_hint")?,
                    connection_id: row.try_get("connection_id")?,
                    primary_key: row.try_get("primary_key")?,
                })
            })
            .collect()
    }

    async fn load_fields(&self, catalog_id: &str) -> Result<Vec<FieldMeta>> {
        let select_sql = format!(
            r#"
            SELECT object_code, field_code, label, alias_hint, mapping_kind, mapping_value,
                   data_type, allow_select, allow_filter, allow_sort, not_null
            FROM {}
            WHERE catalog_id = $1
            ORDER BY object_code, position, field_code
            "#,
            quote_identifier(&self.tables.fields)
        );

        let rows = sqlx::query(&select_sql)
            .bind(catalog_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<FieldMeta> {
                let kind: String = row.try_get("mapping_kind")?;
                let value: String = row.try_get("mapping_value")?;
                let mapping = match kind.as_str() {
                    "COLUMN" => FieldMapping::Column { column: value },
                    "EXPRESSION" => FieldMapping::Expression { template: value },
                    other => {
                        return Err(QueryError::validation(format!(
                            "Unknown field mapping kind '{}'",
                            other
                        )));
                    }
                };
                let data_type: String = row.try_get("data_type")?;

                Ok(FieldMeta {
                    object_code: row.try_get("object_code")?,
                    field_code: row.try_get("field_code")?,
                    label: row.try_get("label")?,
                    alias_hint: row.try_get("alias_hint")?,
                    mapping,
                    data_type: parse_enum(&data_type)?,
                    allow_select: row.try_get("allow_select")?,
                    allow_filter: row.try_get("allow_filter")?,
                    allow_sort: row.try_get("allow_sort")?,
                    not_null: row.try_get("not_null")?,
                })
            })
            .collect()
    }

    async fn load_relations(&self, catalog_id: &str) -> Result<Vec<RelationMeta>> {
        let keys_sql = format!(
            r#"
            SELECT relation_code, from_column, operator, to_column, null_safe
            FROM {}
            WHERE catalog_id = $1
            ORDER BY relation_code, position
            "#,
            quote_identifier(&self.tables.join_keys)
        );

        let key_rows = sqlx::query(&keys_sql)
            .bind(catalog_id)
            .fetch_all(&self.pool)
            .await?;

        let mut keys: BTreeMap<String, Vec<JoinKey>> = BTreeMap::new();
        for row in &key_rows {
            let relation_code: String = row.try_get("relation_code")?;
            let operator: String = row.try_get("operator")?;
            keys.entry(relation_code).or_default().push(JoinKey {
                from_column: row.try_get("from_column")?,
                operator: parse_enum(&operator)?,
                to_column: row.try_get("to_column")?,
                null_safe: row.try_get("null_safe")?,
            });
        }

        let relations_sql = format!(
            r#"
            SELECT relation_code, from_object, to_object, relation_type, join_type,
                   filter_mode, navigable, path_weight
            FROM {}
            WHERE catalog_id = $1
            ORDER BY relation_code
            "#,
            quote_identifier(&self.tables.relations)
        );

        let rows = sqlx::query(&relations_sql)
            .bind(catalog_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<RelationMeta> {
                let relation_code: String = row.try_get("relation_code")?;
                let relation_type: String = row.try_get("relation_type")?;
                let join_type: String = row.try_get("join_type")?;
                let filter_mode: String = row.try_get("filter_mode")?;

                Ok(RelationMeta {
                    join_keys: keys.remove(&relation_code).unwrap_or_default(),
                    relation_code,
                    from_object: row.try_get("from_object")?,
                    to_object: row.try_get("to_object")?,
                    relation_type: parse_enum(&relation_type)?,
                    join_type: parse_enum(&join_type)?,
                    filter_mode: parse_enum(&filter_mode)?,
                    navigable: row.try_get("navigable")?,
                    path_weight: row.try_get("path_weight")?,
                })
            })
            .collect()
    }
}

/// Parse a stored enum code using the type's serde representation
fn parse_enum<T: DeserializeOwned>(code: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(code.to_string()))
        .map_err(|e| QueryError::validation(format!("Unknown metadata code '{}': {}", code, e)))
}

fn enum_to_string<T: serde::Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(QueryError::validation(format!(
            "Expected a string code, got {}",
            other
        ))),
    }
}
