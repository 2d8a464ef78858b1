//! Query planner: lowers AST statements to bytecode execution plans.
//!
//! Every plan opens with the one-instruction `Init` prologue and carries
//! the catalog version observed here; the VM's `Transaction` opcode
//! compares that version against the live catalog and rejects stale
//! plans with `VersionChanged`, at which point the caller re-plans.

#[cfg(test)]
mod tests;

use catalog::{Catalog, ColumnDef, SCHEMA_TABLE_NAME, TableSchema};
use common::{DbError, DbResult, SCHEMA_ROOT_PAGE};
use parser::{BinaryOp, Create, Expr, Insert, Select, SelectItem, Statement, UnaryOp, Update};
use types::SqlType;
use vm::{BinaryArgs, Command, CompareArgs, ExecutionPlan};

/// Compile one statement against the current catalog.
pub fn plan_statement(stmt: &Statement, catalog: &Catalog) -> DbResult<ExecutionPlan> {
    match stmt {
        Statement::Explain(inner) => {
            let mut plan = plan_statement(inner, catalog)?;
            plan.explain = true;
            Ok(plan)
        }
        Statement::Create(create) => plan_create(create, catalog),
        Statement::Insert(insert) => plan_insert(insert, catalog),
        Statement::Select(select) => plan_select(select, catalog),
        Statement::Update(update) => plan_update(update, catalog),
    }
}

/// Hands out register indexes, starting at 1.
#[derive(Default)]
struct Registers {
    next: usize,
}

impl Registers {
    fn new() -> Self {
        Self { next: 1 }
    }

    fn alloc(&mut self) -> usize {
        let reg = self.next;
        self.next += 1;
        reg
    }

    fn alloc_block(&mut self, count: usize) -> usize {
        let start = self.next;
        self.next += count;
        start
    }
}

/// Where column references resolve while scanning a table: the primary
/// key reads through `RowId`, every other declared column through
/// `Column` with its ordinal among the record cells.
struct TableContext {
    cursor: usize,
    primary_key: Option<String>,
    record_columns: Vec<String>,
}

impl TableContext {
    fn resolve(catalog: &Catalog, table: &str, cursor: usize) -> DbResult<Self> {
        let columns = catalog.columns_of(table)?;
        let primary_key = catalog.primary_key_of(table)?;
        let record_columns = columns
            .iter()
            .filter(|c| !c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        Ok(Self {
            cursor,
            primary_key,
            record_columns,
        })
    }

    fn emit_column(
        &self,
        name: &str,
        regs: &mut Registers,
        commands: &mut Vec<Command>,
    ) -> DbResult<usize> {
        let dest = regs.alloc();
        if self.primary_key.as_deref() == Some(name) {
            commands.push(Command::RowId {
                cursor: self.cursor,
                dest,
            });
            return Ok(dest);
        }
        let column = self
            .record_columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DbError::Planner(format!("unknown column '{name}'")))?;
        commands.push(Command::Column {
            cursor: self.cursor,
            column,
            dest,
        });
        Ok(dest)
    }
}

/// Compile an expression, returning the register holding its value.
fn compile_expr(
    expr: &Expr,
    ctx: Option<&TableContext>,
    regs: &mut Registers,
    commands: &mut Vec<Command>,
) -> DbResult<usize> {
    match expr {
        Expr::IntLit(value) => {
            let dest = regs.alloc();
            commands.push(Command::Integer {
                value: *value,
                dest,
            });
            Ok(dest)
        }
        Expr::StringLit(value) => {
            let dest = regs.alloc();
            commands.push(Command::String {
                dest,
                value: value.clone(),
            });
            Ok(dest)
        }
        Expr::Variable(index) => {
            let dest = regs.alloc();
            commands.push(Command::Variable {
                index: *index,
                dest,
            });
            Ok(dest)
        }
        Expr::Column(name) => {
            let ctx = ctx.ok_or_else(|| {
                DbError::Planner(format!("column '{name}' is not allowed here"))
            })?;
            ctx.emit_column(name, regs, commands)
        }
        Expr::Count => Err(DbError::Planner(
            "COUNT(*) must be the only select item".into(),
        )),
        Expr::Unary {
            op: UnaryOp::Minus,
            expr,
        } => {
            let zero = regs.alloc();
            commands.push(Command::Integer {
                value: 0,
                dest: zero,
            });
            let rhs = compile_expr(expr, ctx, regs, commands)?;
            let dest = regs.alloc();
            commands.push(Command::Subtract(BinaryArgs {
                lhs: zero,
                rhs,
                dest,
            }));
            Ok(dest)
        }
        Expr::Binary { left, op, right } => {
            let lhs = compile_expr(left, ctx, regs, commands)?;
            let rhs = compile_expr(right, ctx, regs, commands)?;
            let dest = regs.alloc();
            let args = BinaryArgs { lhs, rhs, dest };
            let command = match op {
                BinaryOp::Add => Command::Add(args),
                BinaryOp::Subtract => Command::Subtract(args),
                BinaryOp::Multiply => Command::Multiply(args),
                BinaryOp::Divide => Command::Divide(args),
                BinaryOp::Exp => Command::Exp(args),
                BinaryOp::Eq | BinaryOp::Lt | BinaryOp::Gt => {
                    return Err(DbError::Planner(
                        "comparisons are only supported in WHERE".into(),
                    ));
                }
            };
            commands.push(command);
            Ok(dest)
        }
    }
}

/// Compile a WHERE clause into a complementary compare that jumps past
/// the row when the condition does not hold. Returns the command index
/// to patch with the "skip row" address.
fn compile_filter(
    selection: &Expr,
    ctx: &TableContext,
    regs: &mut Registers,
    commands: &mut Vec<Command>,
) -> DbResult<usize> {
    let Expr::Binary { left, op, right } = selection else {
        return Err(DbError::Planner(
            "WHERE supports a single comparison".into(),
        ));
    };

    let lhs = compile_expr(left, Some(ctx), regs, commands)?;
    let rhs = compile_expr(right, Some(ctx), regs, commands)?;
    let args = CompareArgs {
        lhs,
        rhs,
        target: 0,
    };
    let command = match op {
        BinaryOp::Eq => Command::NotEqual(args),
        BinaryOp::Lt => Command::Gte(args),
        BinaryOp::Gt => Command::Lte(args),
        _ => {
            return Err(DbError::Planner(
                "WHERE supports =, <, and > comparisons".into(),
            ));
        }
    };
    commands.push(command);
    Ok(commands.len() - 1)
}

fn patch_jump(commands: &mut [Command], index: usize, address: usize) {
    match &mut commands[index] {
        Command::Rewind { end, .. } => *end = address,
        Command::Next { loop_start, .. } => *loop_start = address,
        Command::Init { target } => *target = address,
        Command::Equal(args)
        | Command::NotEqual(args)
        | Command::Lt(args)
        | Command::Lte(args)
        | Command::Gt(args)
        | Command::Gte(args) => args.target = address,
        _ => {}
    }
}

fn base_plan(catalog: &Catalog) -> (Vec<Command>, ExecutionPlan) {
    let plan = ExecutionPlan {
        explain: false,
        commands: Vec::new(),
        expected_catalog_version: catalog.version(),
        result_header: None,
    };
    (vec![Command::Init { target: 1 }], plan)
}

fn plan_create(create: &Create, catalog: &Catalog) -> DbResult<ExecutionPlan> {
    if create.table == SCHEMA_TABLE_NAME {
        return Err(DbError::Planner(format!(
            "'{SCHEMA_TABLE_NAME}' is reserved"
        )));
    }
    if catalog.table_exists(&create.table) {
        return Err(DbError::Planner(format!(
            "table '{}' already exists",
            create.table
        )));
    }
    if create.columns.is_empty() {
        return Err(DbError::Planner(
            "a table needs at least one column".into(),
        ));
    }

    let mut columns = Vec::with_capacity(create.columns.len());
    for decl in &create.columns {
        let column_type = SqlType::from_declared(&decl.ty).ok_or_else(|| {
            DbError::Planner(format!("unsupported column type '{}'", decl.ty))
        })?;
        if decl.primary_key && column_type != SqlType::Integer {
            return Err(DbError::Planner(
                "PRIMARY KEY column must be INTEGER".into(),
            ));
        }
        columns.push(ColumnDef::new(&decl.name, column_type, decl.primary_key));
    }
    let json_schema = TableSchema { columns }.to_json()?;

    let (mut commands, mut plan) = base_plan(catalog);
    let mut regs = Registers::new();
    commands.push(Command::Transaction { write: true });
    commands.push(Command::OpenWrite {
        cursor: 0,
        root: SCHEMA_ROOT_PAGE,
    });

    let root_reg = regs.alloc();
    commands.push(Command::CreateBTree { dest: root_reg });

    // Catalog record cells: type, name, table_name, rootpage, sql.
    let record_start = regs.alloc_block(5);
    commands.push(Command::String {
        dest: record_start,
        value: "table".into(),
    });
    commands.push(Command::String {
        dest: record_start + 1,
        value: create.table.clone(),
    });
    commands.push(Command::String {
        dest: record_start + 2,
        value: create.table.clone(),
    });
    commands.push(Command::Copy {
        src: root_reg,
        dest: record_start + 3,
    });
    commands.push(Command::String {
        dest: record_start + 4,
        value: json_schema,
    });

    let record_reg = regs.alloc();
    commands.push(Command::MakeRecord {
        start: record_start,
        count: 5,
        dest: record_reg,
    });
    let key_reg = regs.alloc();
    commands.push(Command::NewRowId {
        root: SCHEMA_ROOT_PAGE,
        dest: key_reg,
    });
    commands.push(Command::Insert {
        cursor: 0,
        record: record_reg,
        key: key_reg,
    });
    commands.push(Command::ParseSchema);
    commands.push(Command::Halt);

    plan.commands = commands;
    Ok(plan)
}

fn plan_insert(insert: &Insert, catalog: &Catalog) -> DbResult<ExecutionPlan> {
    let root = catalog.root_page_of(&insert.table)?;
    let columns = catalog.columns_of(&insert.table)?;
    let primary_key = catalog.primary_key_of(&insert.table)?;

    let target_columns: Vec<String> = if insert.columns.is_empty() {
        columns.iter().map(|c| c.name.clone()).collect()
    } else {
        for name in &insert.columns {
            if !columns.iter().any(|c| &c.name == name) {
                return Err(DbError::Planner(format!(
                    "unknown column '{name}' on table '{}'",
                    insert.table
                )));
            }
        }
        insert.columns.clone()
    };

    let record_columns: Vec<&ColumnDef> =
        columns.iter().filter(|c| !c.primary_key).collect();

    let (mut commands, mut plan) = base_plan(catalog);
    let mut regs = Registers::new();
    commands.push(Command::Transaction { write: true });
    commands.push(Command::OpenWrite { cursor: 0, root });

    for row in &insert.rows {
        if row.len() != target_columns.len() {
            return Err(DbError::Planner(format!(
                "expected {} values, got {}",
                target_columns.len(),
                row.len()
            )));
        }
        let value_of = |name: &str| {
            target_columns
                .iter()
                .position(|c| c == name)
                .map(|i| &row[i])
        };

        // The primary key becomes the rowid; a fresh one is allocated
        // when the statement does not supply it.
        let key_reg = match primary_key.as_deref().and_then(|name| value_of(name)) {
            Some(expr) => compile_expr(expr, None, &mut regs, &mut commands)?,
            None => {
                let dest = regs.alloc();
                commands.push(Command::NewRowId { root, dest });
                dest
            }
        };

        // Record cells hold the non-key columns in declared order; a
        // fresh register block leaves unsupplied columns NULL.
        let block = regs.alloc_block(record_columns.len());
        for (offset, column) in record_columns.iter().enumerate() {
            if let Some(expr) = value_of(&column.name) {
                let value_reg = compile_expr(expr, None, &mut regs, &mut commands)?;
                commands.push(Command::Copy {
                    src: value_reg,
                    dest: block + offset,
                });
            }
        }

        let record_reg = regs.alloc();
        commands.push(Command::MakeRecord {
            start: block,
            count: record_columns.len(),
            dest: record_reg,
        });
        commands.push(Command::Insert {
            cursor: 0,
            record: record_reg,
            key: key_reg,
        });
    }

    commands.push(Command::Halt);
    plan.commands = commands;
    Ok(plan)
}

fn plan_select(select: &Select, catalog: &Catalog) -> DbResult<ExecutionPlan> {
    match &select.table {
        None => plan_literal_select(select, catalog),
        Some(table) => {
            let is_count = select
                .items
                .iter()
                .any(|item| matches!(item, SelectItem::Expr(Expr::Count)));
            if is_count {
                if select.items.len() != 1 {
                    return Err(DbError::Planner(
                        "COUNT(*) must be the only select item".into(),
                    ));
                }
                plan_count(select, table, catalog)
            } else {
                plan_scan(select, table, catalog)
            }
        }
    }
}

fn plan_literal_select(select: &Select, catalog: &Catalog) -> DbResult<ExecutionPlan> {
    let (mut commands, mut plan) = base_plan(catalog);
    let mut regs = Registers::new();

    let mut value_regs = Vec::with_capacity(select.items.len());
    let mut header = Vec::with_capacity(select.items.len());
    for item in &select.items {
        let SelectItem::Expr(expr) = item else {
            return Err(DbError::Planner("SELECT * requires a table".into()));
        };
        value_regs.push(compile_expr(expr, None, &mut regs, &mut commands)?);
        header.push(item_label(expr));
    }

    let block = regs.alloc_block(value_regs.len());
    for (offset, reg) in value_regs.iter().enumerate() {
        commands.push(Command::Copy {
            src: *reg,
            dest: block + offset,
        });
    }
    commands.push(Command::ResultRow {
        start: block,
        count: select.items.len(),
    });
    commands.push(Command::Halt);

    plan.commands = commands;
    plan.result_header = Some(header);
    Ok(plan)
}

fn plan_count(select: &Select, table: &str, catalog: &Catalog) -> DbResult<ExecutionPlan> {
    let root = catalog.root_page_of(table)?;
    let ctx = TableContext::resolve(catalog, table, 0)?;

    let (mut commands, mut plan) = base_plan(catalog);
    let mut regs = Registers::new();
    commands.push(Command::Transaction { write: false });
    commands.push(Command::OpenRead { cursor: 0, root });

    let count_reg = regs.alloc();
    let one_reg = regs.alloc();
    commands.push(Command::Integer {
        value: 0,
        dest: count_reg,
    });
    commands.push(Command::Integer {
        value: 1,
        dest: one_reg,
    });

    let rewind_index = commands.len();
    commands.push(Command::Rewind { cursor: 0, end: 0 });

    let loop_start = commands.len();
    let mut skip_jumps = Vec::new();
    if let Some(selection) = &select.selection {
        skip_jumps.push(compile_filter(selection, &ctx, &mut regs, &mut commands)?);
    }
    commands.push(Command::Add(BinaryArgs {
        lhs: count_reg,
        rhs: one_reg,
        dest: count_reg,
    }));

    let next_index = commands.len();
    commands.push(Command::Next {
        cursor: 0,
        loop_start,
    });

    let end = commands.len();
    commands.push(Command::ResultRow {
        start: count_reg,
        count: 1,
    });
    commands.push(Command::Halt);

    patch_jump(&mut commands, rewind_index, end);
    for index in skip_jumps {
        patch_jump(&mut commands, index, next_index);
    }

    plan.commands = commands;
    plan.result_header = Some(vec!["COUNT(*)".to_string()]);
    Ok(plan)
}

fn plan_scan(select: &Select, table: &str, catalog: &Catalog) -> DbResult<ExecutionPlan> {
    let root = catalog.root_page_of(table)?;
    let ctx = TableContext::resolve(catalog, table, 0)?;
    let columns = catalog.columns_of(table)?;

    // Expand `*` to the declared column list.
    let mut items = Vec::new();
    for item in &select.items {
        match item {
            SelectItem::Wildcard => {
                items.extend(columns.iter().map(|c| Expr::Column(c.name.clone())));
            }
            SelectItem::Expr(expr) => items.push(expr.clone()),
        }
    }
    if items.is_empty() {
        return Err(DbError::Planner("nothing to select".into()));
    }
    let header: Vec<String> = items.iter().map(item_label).collect();

    let (mut commands, mut plan) = base_plan(catalog);
    let mut regs = Registers::new();
    commands.push(Command::Transaction { write: false });
    commands.push(Command::OpenRead { cursor: 0, root });

    let rewind_index = commands.len();
    commands.push(Command::Rewind { cursor: 0, end: 0 });

    let loop_start = commands.len();
    let mut skip_jumps = Vec::new();
    if let Some(selection) = &select.selection {
        skip_jumps.push(compile_filter(selection, &ctx, &mut regs, &mut commands)?);
    }

    let mut value_regs = Vec::with_capacity(items.len());
    for expr in &items {
        value_regs.push(compile_expr(expr, Some(&ctx), &mut regs, &mut commands)?);
    }
    let block = regs.alloc_block(value_regs.len());
    for (offset, reg) in value_regs.iter().enumerate() {
        commands.push(Command::Copy {
            src: *reg,
            dest: block + offset,
        });
    }
    commands.push(Command::ResultRow {
        start: block,
        count: items.len(),
    });

    let next_index = commands.len();
    commands.push(Command::Next {
        cursor: 0,
        loop_start,
    });

    let end = commands.len();
    commands.push(Command::Halt);

    patch_jump(&mut commands, rewind_index, end);
    for index in skip_jumps {
        patch_jump(&mut commands, index, next_index);
    }

    plan.commands = commands;
    plan.result_header = Some(header);
    Ok(plan)
}

fn plan_update(update: &Update, catalog: &Catalog) -> DbResult<ExecutionPlan> {
    let root = catalog.root_page_of(&update.table)?;
    let ctx = TableContext::resolve(catalog, &update.table, 0)?;
    let primary_key = ctx.primary_key.clone();

    for (name, _) in &update.assignments {
        if primary_key.as_deref() == Some(name) {
            return Err(DbError::Planner(
                "updating the PRIMARY KEY is not supported".into(),
            ));
        }
        if !ctx.record_columns.iter().any(|c| c == name) {
            return Err(DbError::Planner(format!(
                "unknown column '{name}' on table '{}'",
                update.table
            )));
        }
    }

    let (mut commands, mut plan) = base_plan(catalog);
    let mut regs = Registers::new();
    commands.push(Command::Transaction { write: true });
    commands.push(Command::OpenWrite { cursor: 0, root });

    let rewind_index = commands.len();
    commands.push(Command::Rewind { cursor: 0, end: 0 });

    let loop_start = commands.len();
    let mut skip_jumps = Vec::new();
    if let Some(selection) = &update.selection {
        skip_jumps.push(compile_filter(selection, &ctx, &mut regs, &mut commands)?);
    }

    // Rebuild the record: assigned columns from their expressions (which
    // may read the current row), the rest carried over unchanged.
    let block = regs.alloc_block(ctx.record_columns.len());
    for (offset, column) in ctx.record_columns.iter().enumerate() {
        let assigned = update
            .assignments
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, expr)| expr);
        match assigned {
            Some(expr) => {
                let value_reg = compile_expr(expr, Some(&ctx), &mut regs, &mut commands)?;
                commands.push(Command::Copy {
                    src: value_reg,
                    dest: block + offset,
                });
            }
            None => {
                commands.push(Command::Column {
                    cursor: 0,
                    column: offset,
                    dest: block + offset,
                });
            }
        }
    }

    let key_reg = regs.alloc();
    commands.push(Command::RowId {
        cursor: 0,
        dest: key_reg,
    });
    let record_reg = regs.alloc();
    commands.push(Command::MakeRecord {
        start: block,
        count: ctx.record_columns.len(),
        dest: record_reg,
    });
    commands.push(Command::Insert {
        cursor: 0,
        record: record_reg,
        key: key_reg,
    });

    let next_index = commands.len();
    commands.push(Command::Next {
        cursor: 0,
        loop_start,
    });

    let end = commands.len();
    commands.push(Command::Halt);

    patch_jump(&mut commands, rewind_index, end);
    for index in skip_jumps {
        patch_jump(&mut commands, index, next_index);
    }

    plan.commands = commands;
    Ok(plan)
}

/// Human-readable label for a select item, used for the result header.
fn item_label(expr: &Expr) -> String {
    match expr {
        Expr::Column(name) => name.clone(),
        Expr::Count => "COUNT(*)".to_string(),
        Expr::IntLit(value) => value.to_string(),
        Expr::StringLit(value) => format!("'{value}'"),
        Expr::Variable(index) => format!("?{}", index + 1),
        Expr::Unary {
            op: UnaryOp::Minus,
            expr,
        } => format!("-{}", item_label(expr)),
        Expr::Binary { left, op, right } => {
            let symbol = match op {
                BinaryOp::Add => "+",
                BinaryOp::Subtract => "-",
                BinaryOp::Multiply => "*",
                BinaryOp::Divide => "/",
                BinaryOp::Exp => "^",
                BinaryOp::Eq => "=",
                BinaryOp::Lt => "<",
                BinaryOp::Gt => ">",
            };
            format!("{} {symbol} {}", item_label(left), item_label(right))
        }
    }
}
