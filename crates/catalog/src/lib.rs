//! In-memory schema cache.
//!
//! One [`Object`] exists per schema entity, decoded from the records of
//! the system catalog table stored in page 1. The catalog also carries an
//! opaque version string that changes on every schema install; plans are
//! stamped with the version observed at planning time and the VM refuses
//! to run a plan whose version no longer matches.

use common::{DbError, DbResult, PageNumber, SCHEMA_ROOT_PAGE};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use types::SqlType;

/// Reserved name of the system catalog table itself.
pub const SCHEMA_TABLE_NAME: &str = "cdb_schema";

/// Kinds of schema entities the catalog tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectType {
    #[serde(rename = "table")]
    Table,
    #[serde(rename = "index")]
    Index,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Index => "index",
        }
    }

    pub fn from_str(raw: &str) -> DbResult<Self> {
        match raw {
            "table" => Ok(Self::Table),
            "index" => Ok(Self::Index),
            other => Err(DbError::Corruption(format!(
                "unknown catalog object type '{other}'"
            ))),
        }
    }
}

/// One schema entity: a row of the system catalog table.
#[derive(Clone, Debug, PartialEq)]
pub struct Object {
    pub object_type: ObjectType,
    /// Entity name; equals `table_name` for tables.
    pub name: String,
    /// Table the entity belongs to.
    pub table_name: String,
    /// Root page of the entity's B-tree. Never changes for the entity's
    /// lifetime, even across splits.
    pub root_page: PageNumber,
    /// Column layout as a JSON document (see [`TableSchema`]).
    pub json_schema: String,
}

/// Column layout stored in a catalog object's `sql` cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn to_json(&self) -> DbResult<String> {
        serde_json::to_string(self)
            .map_err(|e| DbError::Corruption(format!("schema serialize failed: {e}")))
    }

    pub fn from_json(raw: &str) -> DbResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| DbError::Corruption(format!("invalid stored schema: {e}")))
    }
}

/// A single column declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: SqlType,
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: SqlType, primary_key: bool) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key,
        }
    }
}

/// The fixed shape of the system catalog table. It is never stored as a
/// catalog record; the engine knows it by heart.
pub fn schema_table_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("id", SqlType::Integer, true),
        ColumnDef::new("type", SqlType::Text, false),
        ColumnDef::new("name", SqlType::Text, false),
        ColumnDef::new("table_name", SqlType::Text, false),
        ColumnDef::new("rootpage", SqlType::Integer, false),
        ColumnDef::new("sql", SqlType::Text, false),
    ]
}

struct CatalogInner {
    objects: Vec<Object>,
    generation: u64,
}

/// Schema cache shared across statements. Reads take the shared lock;
/// installs happen only under the pager's exclusive transaction lock.
pub struct Catalog {
    inner: RwLock<CatalogInner>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CatalogInner {
                objects: Vec::new(),
                generation: 1,
            }),
        }
    }

    /// Opaque version token; changes on every schema install.
    pub fn version(&self) -> String {
        self.inner.read().generation.to_string()
    }

    /// Replace the cached object list and regenerate the version.
    pub fn install_objects(&self, objects: Vec<Object>) {
        let mut inner = self.inner.write();
        inner.objects = objects;
        inner.generation += 1;
    }

    /// All cached objects, in catalog order.
    pub fn objects(&self) -> Vec<Object> {
        self.inner.read().objects.clone()
    }

    pub fn table_exists(&self, table: &str) -> bool {
        if table == SCHEMA_TABLE_NAME {
            return true;
        }
        self.inner
            .read()
            .objects
            .iter()
            .any(|o| o.object_type == ObjectType::Table && o.name == table)
    }

    /// Root page of a table's B-tree.
    pub fn root_page_of(&self, table: &str) -> DbResult<PageNumber> {
        if table == SCHEMA_TABLE_NAME {
            return Ok(SCHEMA_ROOT_PAGE);
        }
        self.inner
            .read()
            .objects
            .iter()
            .find(|o| o.object_type == ObjectType::Table && o.name == table)
            .map(|o| o.root_page)
            .ok_or_else(|| DbError::Planner(format!("unknown table '{table}'")))
    }

    /// Declared columns of a table, in schema order.
    pub fn columns_of(&self, table: &str) -> DbResult<Vec<ColumnDef>> {
        if table == SCHEMA_TABLE_NAME {
            return Ok(schema_table_columns());
        }
        let inner = self.inner.read();
        let object = inner
            .objects
            .iter()
            .find(|o| o.object_type == ObjectType::Table && o.name == table)
            .ok_or_else(|| DbError::Planner(format!("unknown table '{table}'")))?;
        Ok(TableSchema::from_json(&object.json_schema)?.columns)
    }

    /// Name of the table's primary-key column, if it declares one.
    pub fn primary_key_of(&self, table: &str) -> DbResult<Option<String>> {
        Ok(self
            .columns_of(table)?
            .into_iter()
            .find(|c| c.primary_key)
            .map(|c| c.name))
    }

    /// Declared type of one column.
    pub fn column_type_of(&self, table: &str, column: &str) -> DbResult<SqlType> {
        self.columns_of(table)?
            .into_iter()
            .find(|c| c.name == column)
            .map(|c| c.column_type)
            .ok_or_else(|| {
                DbError::Planner(format!("unknown column '{column}' on table '{table}'"))
            })
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
