//! Embedder facade tying the engine together.
//!
//! `Database::open` builds the stack (storage with journal recovery if a
//! crash left one behind, then pager, catalog, KV, and VM), bootstraps
//! page 1 as the catalog root on first open, and loads the schema cache.
//! `execute` drives the compare-and-retry protocol: parse, plan against
//! the current catalog, execute, and re-plan when the VM reports
//! `VersionChanged`.

use std::sync::Arc;

use btree::Kv;
use catalog::Catalog;
use common::{DbError, DbResult, SCHEMA_ROOT_PAGE};
use pager::{PageType, Pager};
use parser::{Statement, parse_sql};
use planner::plan_statement;
use storage::{FileStorage, MemoryStorage, Storage};
use types::Value;
use vm::{ExecuteResult, Vm};

/// Attempts at re-planning after a catalog version mismatch before the
/// error is handed to the caller.
const MAX_REPLANS: usize = 5;

/// An open database.
pub struct Database {
    kv: Arc<Kv>,
    catalog: Arc<Catalog>,
    vm: Vm,
}

impl Database {
    /// Open (or create) the database file for `name`; the empty string
    /// selects the default name. A leftover journal is recovered before
    /// anything else happens.
    pub fn open(name: &str) -> DbResult<Self> {
        Self::with_storage(Box::new(FileStorage::open(name)?))
    }

    /// A throwaway database backed by memory.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::with_storage(Box::new(MemoryStorage::new()))
    }

    fn with_storage(storage: Box<dyn Storage>) -> DbResult<Self> {
        let pager = Arc::new(Pager::open(storage)?);
        let catalog = Arc::new(Catalog::new());
        let kv = Arc::new(Kv::new(pager, Arc::clone(&catalog)));
        let db = Self {
            vm: Vm::new(Arc::clone(&kv)),
            kv,
            catalog,
        };
        db.bootstrap()?;
        Ok(db)
    }

    /// Initialize page 1 as an empty catalog leaf on first open, then
    /// load the schema cache.
    fn bootstrap(&self) -> DbResult<()> {
        self.kv.begin_write()?;
        let page = self.kv.pager().get_page(SCHEMA_ROOT_PAGE)?;
        if page.page_type()? == PageType::Unknown {
            tracing::debug!("initializing empty catalog root");
            let mut page = page;
            page.set_page_type(PageType::Leaf);
            self.kv.pager().put_page(page)?;
            self.kv.end_write()?;
        } else {
            self.kv.rollback_write();
        }

        self.kv.begin_read()?;
        let loaded = self.kv.parse_schema();
        self.kv.end_read()?;
        loaded
    }

    /// Execute one or more SQL statements, returning one result per
    /// statement.
    pub fn execute(&self, sql: &str) -> DbResult<Vec<ExecuteResult>> {
        self.execute_with_params(sql, &[])
    }

    /// Execute with positional parameters bound to `?` placeholders.
    pub fn execute_with_params(
        &self,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Vec<ExecuteResult>> {
        let statements = parse_sql(sql)?;
        let mut results = Vec::with_capacity(statements.len());
        for statement in &statements {
            results.push(self.run_statement(statement, params)?);
        }
        Ok(results)
    }

    fn run_statement(&self, statement: &Statement, params: &[Value]) -> DbResult<ExecuteResult> {
        for _ in 0..MAX_REPLANS {
            let plan = plan_statement(statement, &self.catalog)?;
            match self.vm.execute(&plan, params) {
                Err(DbError::VersionChanged { expected, actual }) => {
                    tracing::debug!(expected, actual, "catalog changed, re-planning");
                }
                other => return other,
            }
        }
        Err(DbError::Planner(
            "catalog keeps changing; giving up after re-planning".into(),
        ))
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn kv(&self) -> &Arc<Kv> {
        &self.kv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_bootstraps_an_empty_catalog() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.catalog().objects().is_empty());
        assert!(db.catalog().table_exists("cdb_schema"));
    }

    #[test]
    fn statements_run_in_order_within_one_call() {
        let db = Database::open_in_memory().unwrap();
        let results = db
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT); SELECT COUNT(*) FROM t")
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[1].rows,
            vec![
                vec![Some("COUNT(*)".to_string())],
                vec![Some("0".to_string())]
            ]
        );
    }

    #[test]
    fn parse_errors_surface_before_any_execution() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.execute("FROBNICATE"),
            Err(DbError::Parser(_))
        ));
    }
}
