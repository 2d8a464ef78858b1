use common::{DbError, DbResult, PageNumber};
use types::Value;

use crate::affinity::{compare_values, numeric_value, values_equal};
use crate::{ExecContext, Routine};

/// What a command tells the dispatch loop to do next.
#[derive(Clone, Copy, Debug, Default)]
pub struct Outcome {
    pub halt: bool,
    pub jump: Option<usize>,
}

impl Outcome {
    fn advance() -> Self {
        Self::default()
    }

    fn jump(address: usize) -> Self {
        Self {
            halt: false,
            jump: Some(address),
        }
    }

    fn halt() -> Self {
        Self {
            halt: true,
            jump: None,
        }
    }
}

/// Register operands for an arithmetic opcode: `r[dest] = r[lhs] op r[rhs]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryArgs {
    pub lhs: usize,
    pub rhs: usize,
    pub dest: usize,
}

/// Register operands for a compare opcode: jump to `target` when
/// `r[lhs] op r[rhs]` holds, fall through otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompareArgs {
    pub lhs: usize,
    pub rhs: usize,
    pub target: usize,
}

/// One bytecode instruction of the register machine.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Unconditional jump; planners emit it as a one-instruction prologue.
    Init { target: usize },
    /// Begin a read (`write == false`) or write transaction, first
    /// checking the plan's catalog version against the live catalog.
    Transaction { write: bool },
    OpenRead { cursor: usize, root: PageNumber },
    OpenWrite { cursor: usize, root: PageNumber },
    /// Position the cursor at the first record; jump to `end` when empty.
    Rewind { cursor: usize, end: usize },
    /// Advance the cursor; jump to `loop_start` while records remain.
    Next { cursor: usize, loop_start: usize },
    /// Store the decoded integer key under the cursor into a register.
    RowId { cursor: usize, dest: usize },
    /// Store one cell of the record under the cursor into a register.
    Column { cursor: usize, column: usize, dest: usize },
    Integer { value: i64, dest: usize },
    String { dest: usize, value: String },
    Copy { src: usize, dest: usize },
    /// Store a bound parameter into a register.
    Variable { index: usize, dest: usize },
    /// Encode registers `start .. start + count` as a record into `dest`.
    MakeRecord { start: usize, count: usize, dest: usize },
    NewRowId { root: PageNumber, dest: usize },
    /// Insert `r[record]` (bytes) under key `r[key]` (integer) through the
    /// cursor.
    Insert { cursor: usize, record: usize, key: usize },
    /// Allocate a fresh B-tree and store its root page number.
    CreateBTree { dest: usize },
    /// Reload the catalog from the system table.
    ParseSchema,
    /// Emit registers `start .. start + count` as a result row.
    ResultRow { start: usize, count: usize },
    /// Close cursors, end any open transaction, stop the routine.
    Halt,
    Add(BinaryArgs),
    Subtract(BinaryArgs),
    Multiply(BinaryArgs),
    Divide(BinaryArgs),
    Exp(BinaryArgs),
    Equal(CompareArgs),
    NotEqual(CompareArgs),
    Lt(CompareArgs),
    Lte(CompareArgs),
    Gt(CompareArgs),
    Gte(CompareArgs),
}

impl Command {
    pub(crate) fn execute(
        &self,
        routine: &mut Routine,
        ctx: &ExecContext<'_>,
    ) -> DbResult<Outcome> {
        match self {
            Command::Init { target } => Ok(Outcome::jump(*target)),

            Command::Transaction { write } => {
                let actual = ctx.kv.catalog().version();
                if actual != ctx.expected_version {
                    tracing::debug!(
                        expected = ctx.expected_version,
                        actual,
                        "catalog version gate rejected plan"
                    );
                    return Err(DbError::VersionChanged {
                        expected: ctx.expected_version.to_string(),
                        actual,
                    });
                }
                if *write {
                    ctx.kv.begin_write()?;
                    routine.in_write_transaction = true;
                } else {
                    ctx.kv.begin_read()?;
                    routine.in_read_transaction = true;
                }
                Ok(Outcome::advance())
            }

            Command::OpenRead { cursor, root } | Command::OpenWrite { cursor, root } => {
                routine.cursors.insert(*cursor, ctx.kv.new_cursor(*root));
                Ok(Outcome::advance())
            }

            Command::Rewind { cursor, end } => {
                if routine.cursor_mut(*cursor)?.goto_first_record()? {
                    Ok(Outcome::advance())
                } else {
                    Ok(Outcome::jump(*end))
                }
            }

            Command::Next { cursor, loop_start } => {
                if routine.cursor_mut(*cursor)?.goto_next()? {
                    Ok(Outcome::jump(*loop_start))
                } else {
                    Ok(Outcome::advance())
                }
            }

            Command::RowId { cursor, dest } => {
                let key = routine
                    .cursor_mut(*cursor)?
                    .key()?
                    .ok_or_else(|| DbError::Plan(format!("cursor {cursor} is not positioned")))?;
                routine.set_reg(*dest, Value::Int(codec::decode_key(&key)?));
                Ok(Outcome::advance())
            }

            Command::Column {
                cursor,
                column,
                dest,
            } => {
                let record = routine
                    .cursor_mut(*cursor)?
                    .value()?
                    .ok_or_else(|| DbError::Plan(format!("cursor {cursor} is not positioned")))?;
                let cells = codec::decode_record(&record)?;
                let cell = cells.get(*column).cloned().ok_or_else(|| {
                    DbError::Plan(format!("record has no column {column}"))
                })?;
                routine.set_reg(*dest, cell);
                Ok(Outcome::advance())
            }

            Command::Integer { value, dest } => {
                routine.set_reg(*dest, Value::Int(*value));
                Ok(Outcome::advance())
            }

            Command::String { dest, value } => {
                routine.set_reg(*dest, Value::Text(value.clone()));
                Ok(Outcome::advance())
            }

            Command::Copy { src, dest } => {
                let value = routine.reg(*src);
                routine.set_reg(*dest, value);
                Ok(Outcome::advance())
            }

            Command::Variable { index, dest } => {
                let value = ctx.params.get(*index).cloned().ok_or_else(|| {
                    DbError::Plan(format!("no value bound for parameter {index}"))
                })?;
                routine.set_reg(*dest, value);
                Ok(Outcome::advance())
            }

            Command::MakeRecord { start, count, dest } => {
                let cells: Vec<Value> = (*start..*start + *count).map(|i| routine.reg(i)).collect();
                let record = codec::encode_record(&cells)?;
                routine.set_reg(*dest, Value::Blob(record));
                Ok(Outcome::advance())
            }

            Command::NewRowId { root, dest } => {
                let rowid = ctx.kv.new_rowid(*root)?;
                routine.set_reg(*dest, Value::Int(rowid));
                Ok(Outcome::advance())
            }

            Command::Insert {
                cursor,
                record,
                key,
            } => {
                let rowid = routine.reg(*key).as_int().ok_or_else(|| {
                    DbError::Plan(format!("Insert key register {key} must hold an integer"))
                })?;
                let Value::Blob(record) = routine.reg(*record) else {
                    return Err(DbError::Plan(format!(
                        "Insert record register {record} must hold record bytes"
                    )));
                };
                let encoded = codec::encode_key(rowid)?;
                routine.cursor_mut(*cursor)?.set(&encoded, &record)?;
                Ok(Outcome::advance())
            }

            Command::CreateBTree { dest } => {
                let root = ctx.kv.new_btree()?;
                routine.set_reg(*dest, Value::Int(i64::from(root)));
                Ok(Outcome::advance())
            }

            Command::ParseSchema => {
                ctx.kv.parse_schema()?;
                Ok(Outcome::advance())
            }

            Command::ResultRow { start, count } => {
                let row = (*start..*start + *count)
                    .map(|i| routine.reg(i).to_result_cell())
                    .collect();
                routine.rows.push(row);
                Ok(Outcome::advance())
            }

            Command::Halt => {
                routine.cursors.clear();
                if routine.in_read_transaction {
                    routine.in_read_transaction = false;
                    ctx.kv.end_read()?;
                }
                if routine.in_write_transaction {
                    routine.in_write_transaction = false;
                    ctx.kv.end_write()?;
                }
                Ok(Outcome::halt())
            }

            Command::Add(args) => self.binary(routine, args, |a, b| Ok(a.wrapping_add(b))),
            Command::Subtract(args) => self.binary(routine, args, |a, b| Ok(a.wrapping_sub(b))),
            Command::Multiply(args) => self.binary(routine, args, |a, b| Ok(a.wrapping_mul(b))),
            Command::Divide(args) => self.binary(routine, args, |a, b| {
                if b == 0 {
                    Err(DbError::Plan("division by zero".into()))
                } else {
                    Ok(a.wrapping_div(b))
                }
            }),
            Command::Exp(args) => self.binary(routine, args, |a, b| {
                let exponent = u32::try_from(b)
                    .map_err(|_| DbError::Plan(format!("invalid exponent {b}")))?;
                a.checked_pow(exponent)
                    .ok_or_else(|| DbError::Plan(format!("{a}^{b} overflows")))
            }),

            Command::Equal(args) => self.compare(routine, args, |l, r| values_equal(l, r)),
            Command::NotEqual(args) => self.compare(routine, args, |l, r| !values_equal(l, r)),
            Command::Lt(args) => {
                self.compare(routine, args, |l, r| compare_values(l, r).is_lt())
            }
            Command::Lte(args) => {
                self.compare(routine, args, |l, r| compare_values(l, r).is_le())
            }
            Command::Gt(args) => {
                self.compare(routine, args, |l, r| compare_values(l, r).is_gt())
            }
            Command::Gte(args) => {
                self.compare(routine, args, |l, r| compare_values(l, r).is_ge())
            }
        }
    }

    fn binary(
        &self,
        routine: &mut Routine,
        args: &BinaryArgs,
        op: impl Fn(i64, i64) -> DbResult<i64>,
    ) -> DbResult<Outcome> {
        let lhs = numeric_value(&routine.reg(args.lhs));
        let rhs = numeric_value(&routine.reg(args.rhs));
        routine.set_reg(args.dest, Value::Int(op(lhs, rhs)?));
        Ok(Outcome::advance())
    }

    fn compare(
        &self,
        routine: &mut Routine,
        args: &CompareArgs,
        holds: impl Fn(&Value, &Value) -> bool,
    ) -> DbResult<Outcome> {
        let lhs = routine.reg(args.lhs);
        let rhs = routine.reg(args.rhs);
        if holds(&lhs, &rhs) {
            Ok(Outcome::jump(args.target))
        } else {
            Ok(Outcome::advance())
        }
    }

    /// One explain-mode row: `(addr, opcode, p1, p2, p3, p4, p5, comment)`.
    pub fn explain_row(&self, addr: usize) -> Vec<Option<String>> {
        let (opcode, p1, p2, p3, p4, comment) = self.describe();
        vec![
            Some(addr.to_string()),
            Some(opcode.to_string()),
            Some(p1.to_string()),
            Some(p2.to_string()),
            Some(p3.to_string()),
            Some(p4),
            Some("0".to_string()),
            Some(comment),
        ]
    }

    #[allow(clippy::too_many_lines)]
    fn describe(&self) -> (&'static str, i64, i64, i64, String, String) {
        let n = |v: usize| v as i64;
        match self {
            Command::Init { target } => (
                "Init",
                0,
                n(*target),
                0,
                String::new(),
                format!("Start at {target}"),
            ),
            Command::Transaction { write } => (
                "Transaction",
                0,
                i64::from(*write),
                0,
                String::new(),
                (if *write { "write transaction" } else { "read transaction" }).to_string(),
            ),
            Command::OpenRead { cursor, root } => (
                "OpenRead",
                n(*cursor),
                i64::from(*root),
                0,
                String::new(),
                format!("cursor {cursor} on root page {root}"),
            ),
            Command::OpenWrite { cursor, root } => (
                "OpenWrite",
                n(*cursor),
                i64::from(*root),
                0,
                String::new(),
                format!("cursor {cursor} on root page {root}"),
            ),
            Command::Rewind { cursor, end } => (
                "Rewind",
                n(*cursor),
                n(*end),
                0,
                String::new(),
                format!("jump to {end} when empty"),
            ),
            Command::Next { cursor, loop_start } => (
                "Next",
                n(*cursor),
                n(*loop_start),
                0,
                String::new(),
                format!("jump to {loop_start} while records remain"),
            ),
            Command::RowId { cursor, dest } => (
                "RowId",
                n(*cursor),
                n(*dest),
                0,
                String::new(),
                format!("r[{dest}]=rowid of cursor {cursor}"),
            ),
            Command::Column {
                cursor,
                column,
                dest,
            } => (
                "Column",
                n(*cursor),
                n(*column),
                n(*dest),
                String::new(),
                format!("r[{dest}]=column {column} of cursor {cursor}"),
            ),
            Command::Integer { value, dest } => (
                "Integer",
                *value,
                n(*dest),
                0,
                String::new(),
                format!("r[{dest}]={value}"),
            ),
            Command::String { dest, value } => (
                "String",
                0,
                n(*dest),
                0,
                value.clone(),
                format!("r[{dest}]='{value}'"),
            ),
            Command::Copy { src, dest } => (
                "Copy",
                n(*src),
                n(*dest),
                0,
                String::new(),
                format!("r[{dest}]=r[{src}]"),
            ),
            Command::Variable { index, dest } => (
                "Variable",
                n(*index),
                n(*dest),
                0,
                String::new(),
                format!("r[{dest}]=parameter {index}"),
            ),
            Command::MakeRecord { start, count, dest } => (
                "MakeRecord",
                n(*start),
                n(*count),
                n(*dest),
                String::new(),
                format!("r[{dest}]=record(r[{start}..{}])", start + count),
            ),
            Command::NewRowId { root, dest } => (
                "NewRowId",
                i64::from(*root),
                n(*dest),
                0,
                String::new(),
                format!("r[{dest}]=next rowid of root {root}"),
            ),
            Command::Insert {
                cursor,
                record,
                key,
            } => (
                "Insert",
                n(*cursor),
                n(*record),
                n(*key),
                String::new(),
                format!("insert r[{record}] under key r[{key}]"),
            ),
            Command::CreateBTree { dest } => (
                "CreateBTree",
                0,
                n(*dest),
                0,
                String::new(),
                format!("r[{dest}]=new btree root"),
            ),
            Command::ParseSchema => (
                "ParseSchema",
                0,
                0,
                0,
                String::new(),
                "reload catalog".to_string(),
            ),
            Command::ResultRow { start, count } => (
                "ResultRow",
                n(*start),
                n(*count),
                0,
                String::new(),
                format!("output r[{start}..{}]", start + count),
            ),
            Command::Halt => (
                "Halt",
                0,
                0,
                0,
                String::new(),
                String::new(),
            ),
            Command::Add(a) => describe_binary("Add", a, "+"),
            Command::Subtract(a) => describe_binary("Subtract", a, "-"),
            Command::Multiply(a) => describe_binary("Multiply", a, "*"),
            Command::Divide(a) => describe_binary("Divide", a, "/"),
            Command::Exp(a) => describe_binary("Exp", a, "^"),
            Command::Equal(a) => describe_compare("Equal", a, "=="),
            Command::NotEqual(a) => describe_compare("NotEqual", a, "!="),
            Command::Lt(a) => describe_compare("Lt", a, "<"),
            Command::Lte(a) => describe_compare("Lte", a, "<="),
            Command::Gt(a) => describe_compare("Gt", a, ">"),
            Command::Gte(a) => describe_compare("Gte", a, ">="),
        }
    }
}

fn describe_binary(
    name: &'static str,
    args: &BinaryArgs,
    symbol: &str,
) -> (&'static str, i64, i64, i64, String, String) {
    (
        name,
        args.lhs as i64,
        args.dest as i64,
        args.rhs as i64,
        String::new(),
        format!("r[{}]=r[{}]{symbol}r[{}]", args.dest, args.lhs, args.rhs),
    )
}

fn describe_compare(
    name: &'static str,
    args: &CompareArgs,
    symbol: &str,
) -> (&'static str, i64, i64, i64, String, String) {
    (
        name,
        args.lhs as i64,
        args.target as i64,
        args.rhs as i64,
        String::new(),
        format!(
            "jump to {} when r[{}]{symbol}r[{}]",
            args.target, args.lhs, args.rhs
        ),
    )
}
