//! Bytecode virtual machine.
//!
//! A statement compiles to an [`ExecutionPlan`]: an ordered list of
//! register-machine [`Command`]s plus the catalog version the planner
//! observed. [`Vm::execute`] dispatches commands one at a time against a
//! routine state of registers, cursors, and transaction flags that is
//! destroyed on `Halt`; each command returns halt, jump, or advance. In
//! explain mode the program is rendered as a table instead of being run.

mod affinity;
mod command;
#[cfg(test)]
mod tests;

pub use affinity::{compare_values, numeric_value, values_equal};
pub use command::{BinaryArgs, Command, CompareArgs, Outcome};

use std::sync::Arc;

use btree::{Cursor, Kv};
use common::DbResult;
use hashbrown::HashMap;
use types::Value;

/// Header row of an explain-mode result table.
pub const EXPLAIN_HEADER: [&str; 8] = ["addr", "opcode", "p1", "p2", "p3", "p4", "p5", "comment"];

/// A compiled statement, ready for the VM.
#[derive(Clone, Debug)]
pub struct ExecutionPlan {
    /// Render the program instead of running it.
    pub explain: bool,
    pub commands: Vec<Command>,
    /// Catalog version observed at planning time; checked by
    /// `Transaction` before any lock-protected work.
    pub expected_catalog_version: String,
    /// Column names emitted as the first result row, when present.
    pub result_header: Option<Vec<String>>,
}

/// What a statement execution produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecuteResult {
    /// Optional status text for statements that return no rows.
    pub text: Option<String>,
    /// Result rows; `None` cells are SQL NULL.
    pub rows: Vec<Vec<Option<String>>>,
}

/// Per-execution state: the register file, open cursors, transaction
/// flags, and the output buffer. Dropped when the routine halts.
#[derive(Default)]
pub(crate) struct Routine {
    pub(crate) registers: HashMap<usize, Value>,
    pub(crate) cursors: HashMap<usize, Cursor>,
    pub(crate) in_read_transaction: bool,
    pub(crate) in_write_transaction: bool,
    pub(crate) rows: Vec<Vec<Option<String>>>,
}

impl Routine {
    /// Read a register; unset registers hold NULL.
    pub(crate) fn reg(&self, index: usize) -> Value {
        self.registers.get(&index).cloned().unwrap_or(Value::Null)
    }

    pub(crate) fn set_reg(&mut self, index: usize, value: Value) {
        self.registers.insert(index, value);
    }

    pub(crate) fn cursor_mut(&mut self, id: usize) -> DbResult<&mut Cursor> {
        self.cursors
            .get_mut(&id)
            .ok_or_else(|| common::DbError::Plan(format!("cursor {id} is not open")))
    }
}

pub(crate) struct ExecContext<'a> {
    pub kv: &'a Arc<Kv>,
    pub expected_version: &'a str,
    pub params: &'a [Value],
}

/// The virtual machine. Owns a handle to the KV layer; one instance
/// serves any number of sequential executions.
pub struct Vm {
    kv: Arc<Kv>,
}

impl Vm {
    pub fn new(kv: Arc<Kv>) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &Arc<Kv> {
        &self.kv
    }

    /// Run a plan with the given bound parameters.
    ///
    /// On error the routine is aborted: cursors are dropped, a write
    /// transaction is rolled back without entering the commit path, and
    /// a read transaction is released.
    pub fn execute(&self, plan: &ExecutionPlan, params: &[Value]) -> DbResult<ExecuteResult> {
        if plan.explain {
            return Ok(self.explain(plan));
        }

        let mut routine = Routine::default();
        if let Some(header) = &plan.result_header {
            routine
                .rows
                .push(header.iter().map(|name| Some(name.clone())).collect());
        }

        let ctx = ExecContext {
            kv: &self.kv,
            expected_version: &plan.expected_catalog_version,
            params,
        };

        let mut pc = 0usize;
        while let Some(command) = plan.commands.get(pc) {
            match command.execute(&mut routine, &ctx) {
                Ok(outcome) => {
                    if outcome.halt {
                        break;
                    }
                    pc = outcome.jump.unwrap_or(pc + 1);
                }
                Err(err) => {
                    self.abort(&mut routine);
                    return Err(err);
                }
            }
        }

        Ok(ExecuteResult {
            text: None,
            rows: routine.rows,
        })
    }

    fn explain(&self, plan: &ExecutionPlan) -> ExecuteResult {
        let mut rows = Vec::with_capacity(plan.commands.len() + 1);
        rows.push(
            EXPLAIN_HEADER
                .iter()
                .map(|name| Some((*name).to_string()))
                .collect(),
        );
        for (addr, command) in plan.commands.iter().enumerate() {
            rows.push(command.explain_row(addr));
        }
        ExecuteResult { text: None, rows }
    }

    fn abort(&self, routine: &mut Routine) {
        tracing::warn!("aborting routine");
        routine.cursors.clear();
        if routine.in_write_transaction {
            routine.in_write_transaction = false;
            self.kv.rollback_write();
        }
        if routine.in_read_transaction {
            routine.in_read_transaction = false;
            let _ = self.kv.end_read();
        }
    }
}
