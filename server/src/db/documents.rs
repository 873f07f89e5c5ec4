//! Generic keyed-document store.
//!
//! The services only rely on get/query/set/update/delete by `(collection, id)`
//! and read-your-writes on a single key. `SqliteDocumentStore` keeps each
//! document as a JSON text column and filters with `json_extract`.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::db::DbPool;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    #[error("document store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed document: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// `Ok(None)` when the document does not exist.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, DocumentError>;

    /// Documents whose top-level fields equal every `(field, value)` filter.
    async fn query(
        &self,
        collection: &str,
        filters: &[(&str, Value)],
    ) -> Result<Vec<(String, Value)>, DocumentError>;

    /// Create or replace.
    async fn set(&self, collection: &str, id: &str, value: Value) -> Result<(), DocumentError>;

    /// Insert only if absent; `AlreadyExists` otherwise. Atomic per key.
    async fn create(&self, collection: &str, id: &str, value: Value) -> Result<(), DocumentError>;

    /// Replace the document only while its top-level `field` still equals
    /// `expected`. Returns whether the swap happened.
    async fn replace_if(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        expected: &Value,
        value: Value,
    ) -> Result<bool, DocumentError>;

    /// Merge `fields` into an existing document; `NotFound` if it does not exist.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), DocumentError>;

    /// Deleting a missing document is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), DocumentError>;

    /// Delete only while `field` still equals `expected`. Returns whether a
    /// document was removed.
    async fn delete_if(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        expected: &Value,
    ) -> Result<bool, DocumentError>;
}

pub async fn get_as<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
) -> Result<Option<T>, DocumentError> {
    match store.get(collection, id).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| DocumentError::Malformed(format!("{}/{}: {}", collection, id, e))),
        None => Ok(None),
    }
}

/// Query and deserialize. Documents that fail to parse are skipped with a warning.
pub async fn query_as<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    filters: &[(&str, Value)],
) -> Result<Vec<(String, T)>, DocumentError> {
    let docs = store.query(collection, filters).await?;
    Ok(docs
        .into_iter()
        .filter_map(|(id, value)| match serde_json::from_value(value) {
            Ok(doc) => Some((id, doc)),
            Err(e) => {
                tracing::warn!("Skipping malformed document {}/{}: {}", collection, id, e);
                None
            }
        })
        .collect())
}

pub async fn set_as<T: Serialize + Sync>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
    doc: &T,
) -> Result<(), DocumentError> {
    let value = serde_json::to_value(doc)
        .map_err(|e| DocumentError::Malformed(format!("{}/{}: {}", collection, id, e)))?;
    store.set(collection, id, value).await
}

#[derive(Clone)]
pub struct SqliteDocumentStore {
    db: DbPool,
}

impl SqliteDocumentStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, DocumentError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, DocumentError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|e| DocumentError::Unavailable(format!("DB lock error: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| DocumentError::Unavailable(format!("Task join error: {}", e)))?
    }
}

fn sql_error(e: rusqlite::Error) -> DocumentError {
    DocumentError::Unavailable(e.to_string())
}

fn parse_body(collection: &str, id: &str, body: &str) -> Result<Value, DocumentError> {
    serde_json::from_str(body)
        .map_err(|e| DocumentError::Malformed(format!("{}/{}: {}", collection, id, e)))
}

/// `json_extract` condition on `field` matching `expected`, with its bound params.
fn field_condition(
    field: &str,
    expected: &Value,
    first_param: usize,
) -> (String, Vec<rusqlite::types::Value>) {
    let path = rusqlite::types::Value::Text(format!("$.{}", field));
    match filter_param(expected) {
        Some(param) => (
            format!(
                "json_extract(body, ?{}) = ?{}",
                first_param,
                first_param + 1
            ),
            vec![path, param],
        ),
        None => (
            format!("json_extract(body, ?{}) IS NULL", first_param),
            vec![path],
        ),
    }
}

/// Map a JSON filter value onto what `json_extract` returns for it.
fn filter_param(value: &Value) -> Option<rusqlite::types::Value> {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(Sql::Integer(i64::from(*b))),
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => Sql::Integer(i),
            None => Sql::Real(n.as_f64().unwrap_or_default()),
        }),
        Value::String(s) => Some(Sql::Text(s.clone())),
        // Nested values compare as their JSON text
        other => Some(Sql::Text(other.to_string())),
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, DocumentError> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.blocking(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_error)?;
            body.map(|b| parse_body(&collection, &id, &b)).transpose()
        })
        .await
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[(&str, Value)],
    ) -> Result<Vec<(String, Value)>, DocumentError> {
        let mut sql = String::from("SELECT id, body FROM documents WHERE collection = ?1");
        let mut args: Vec<rusqlite::types::Value> =
            vec![rusqlite::types::Value::Text(collection.to_string())];

        for (field, value) in filters {
            args.push(rusqlite::types::Value::Text(format!("$.{}", field)));
            let path_idx = args.len();
            match filter_param(value) {
                Some(param) => {
                    args.push(param);
                    sql.push_str(&format!(
                        " AND json_extract(body, ?{}) = ?{}",
                        path_idx,
                        args.len()
                    ));
                }
                None => sql.push_str(&format!(" AND json_extract(body, ?{}) IS NULL", path_idx)),
            }
        }
        sql.push_str(" ORDER BY created_at, id");

        let collection = collection.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(sql_error)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(sql_error)?;

            let mut docs = Vec::new();
            for row in rows {
                let (id, body) = row.map_err(sql_error)?;
                let value = parse_body(&collection, &id, &body)?;
                docs.push((id, value));
            }
            Ok(docs)
        })
        .await
    }

    async fn set(&self, collection: &str, id: &str, value: Value) -> Result<(), DocumentError> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.blocking(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO documents (collection, id, body, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
                params![collection, id, value.to_string(), now],
            )
            .map_err(sql_error)?;
            Ok(())
        })
        .await
    }

    async fn create(&self, collection: &str, id: &str, value: Value) -> Result<(), DocumentError> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.blocking(move |conn| {
            let now = Utc::now().to_rfc3339();
            let inserted = conn
                .execute(
                    "INSERT INTO documents (collection, id, body, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)
                     ON CONFLICT(collection, id) DO NOTHING",
                    params![collection, id, value.to_string(), now],
                )
                .map_err(sql_error)?;
            if inserted == 0 {
                return Err(DocumentError::AlreadyExists { collection, id });
            }
            Ok(())
        })
        .await
    }

    async fn replace_if(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        expected: &Value,
        value: Value,
    ) -> Result<bool, DocumentError> {
        let (condition, extra) = field_condition(field, expected, 5);
        let sql = format!(
            "UPDATE documents SET body = ?3, updated_at = ?4 WHERE collection = ?1 AND id = ?2 AND {}",
            condition
        );
        let mut args: Vec<rusqlite::types::Value> = vec![
            rusqlite::types::Value::Text(collection.to_string()),
            rusqlite::types::Value::Text(id.to_string()),
            rusqlite::types::Value::Text(value.to_string()),
            rusqlite::types::Value::Text(Utc::now().to_rfc3339()),
        ];
        args.extend(extra);

        self.blocking(move |conn| {
            let changed = conn
                .execute(&sql, rusqlite::params_from_iter(args.iter()))
                .map_err(sql_error)?;
            Ok(changed == 1)
        })
        .await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), DocumentError> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.blocking(move |conn| {
            // Read-modify-write under the connection lock
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_error)?;
            let Some(body) = body else {
                return Err(DocumentError::NotFound { collection, id });
            };

            let mut doc = parse_body(&collection, &id, &body)?;
            let Some(object) = doc.as_object_mut() else {
                return Err(DocumentError::Malformed(format!(
                    "{}/{}: not an object",
                    collection, id
                )));
            };
            object.extend(fields);

            conn.execute(
                "UPDATE documents SET body = ?3, updated_at = ?4 WHERE collection = ?1 AND id = ?2",
                params![collection, id, doc.to_string(), Utc::now().to_rfc3339()],
            )
            .map_err(sql_error)?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), DocumentError> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.blocking(move |conn| {
            conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )
            .map_err(sql_error)?;
            Ok(())
        })
        .await
    }

    async fn delete_if(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        expected: &Value,
    ) -> Result<bool, DocumentError> {
        let (condition, extra) = field_condition(field, expected, 3);
        let sql = format!(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2 AND {}",
            condition
        );
        let mut args: Vec<rusqlite::types::Value> = vec![
            rusqlite::types::Value::Text(collection.to_string()),
            rusqlite::types::Value::Text(id.to_string()),
        ];
        args.extend(extra);

        self.blocking(move |conn| {
            let removed = conn
                .execute(&sql, rusqlite::params_from_iter(args.iter()))
                .map_err(sql_error)?;
            Ok(removed == 1)
        })
        .await
    }
}
