//! SQL front end: parse text into the engine's AST.
//!
//! Tokenizing and precedence live in the host `sqlparser` crate; this
//! layer lowers its generic AST into the small dialect the planner
//! understands and rejects everything else with a parse error.

mod ast;

pub use ast::*;

use common::{DbError, DbResult};
use sqlparser::ast as sqlast;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;

/// Parse SQL text into internal AST statements.
pub fn parse_sql(sql: &str) -> DbResult<Vec<Statement>> {
    let dialect = GenericDialect {};
    let stmts = SqlParser::parse_sql(&dialect, sql)
        .map_err(|e| DbError::Parser(format!("SQL parse error: {e}")))?;

    let mut params = ParamCounter::default();
    stmts
        .into_iter()
        .map(|stmt| map_statement(stmt, &mut params))
        .collect()
}

/// Allocates positions for anonymous `?` placeholders, left to right.
#[derive(Default)]
struct ParamCounter {
    next: usize,
}

impl ParamCounter {
    fn allocate(&mut self) -> usize {
        let position = self.next;
        self.next += 1;
        position
    }
}

fn map_statement(stmt: sqlast::Statement, params: &mut ParamCounter) -> DbResult<Statement> {
    use sqlast::Statement as SqlStatement;

    match stmt {
        SqlStatement::CreateTable {
            name,
            columns,
            constraints,
            ..
        } => {
            let table = normalize_object_name(&name)?;
            let primary_key = resolve_primary_key(&columns, &constraints)?;

            let columns = columns
                .into_iter()
                .map(|col| {
                    let name = normalize_ident(&col.name);
                    let primary_key = Some(&name) == primary_key.as_ref();
                    ColumnDecl {
                        name,
                        ty: col.data_type.to_string().to_uppercase(),
                        primary_key,
                    }
                })
                .collect();

            Ok(Statement::Create(Create { table, columns }))
        }

        SqlStatement::Insert {
            table_name,
            columns,
            source,
            ..
        } => {
            let table = normalize_object_name(&table_name)?;
            let columns = columns.iter().map(normalize_ident).collect();
            let source =
                source.ok_or_else(|| DbError::Parser("INSERT requires a VALUES list".into()))?;
            let rows = extract_values(*source, params)?;
            Ok(Statement::Insert(Insert {
                table,
                columns,
                rows,
            }))
        }

        SqlStatement::Query(query) => Ok(Statement::Select(map_select(*query, params)?)),

        SqlStatement::Update {
            table,
            assignments,
            selection,
            ..
        } => {
            let table = table_name_from_with_joins(&table)?;
            let assignments = assignments
                .into_iter()
                .map(|assign| {
                    let ident = assign
                        .id
                        .last()
                        .ok_or_else(|| DbError::Parser("invalid assignment target".into()))?;
                    Ok((normalize_ident(ident), map_expr(assign.value, params)?))
                })
                .collect::<DbResult<Vec<_>>>()?;
            let selection = selection.map(|expr| map_expr(expr, params)).transpose()?;
            Ok(Statement::Update(Update {
                table,
                assignments,
                selection,
            }))
        }

        SqlStatement::Explain {
            statement, analyze, ..
        } => {
            if analyze {
                return Err(DbError::Parser("EXPLAIN ANALYZE is not supported".into()));
            }
            Ok(Statement::Explain(Box::new(map_statement(
                *statement, params,
            )?)))
        }

        other => Err(DbError::Parser(format!(
            "unsupported statement: {other}"
        ))),
    }
}

fn map_select(query: sqlast::Query, params: &mut ParamCounter) -> DbResult<Select> {
    use sqlast::SetExpr;

    if !query.order_by.is_empty() {
        return Err(DbError::Parser("ORDER BY is not supported".into()));
    }
    if query.limit.is_some() || query.offset.is_some() {
        return Err(DbError::Parser("LIMIT/OFFSET is not supported".into()));
    }

    let select = match *query.body {
        SetExpr::Select(select) => select,
        _ => return Err(DbError::Parser("only plain SELECT is supported".into())),
    };

    let sqlast::Select {
        projection,
        from,
        selection,
        ..
    } = *select;

    if from.len() > 1 {
        return Err(DbError::Parser("joins are not supported".into()));
    }

    let table = from
        .first()
        .map(table_name_from_with_joins)
        .transpose()?;
    let items = projection
        .into_iter()
        .map(|item| map_select_item(item, params))
        .collect::<DbResult<Vec<_>>>()?;
    let selection = selection.map(|expr| map_expr(expr, params)).transpose()?;

    Ok(Select {
        items,
        table,
        selection,
    })
}

fn map_select_item(item: sqlast::SelectItem, params: &mut ParamCounter) -> DbResult<SelectItem> {
    match item {
        sqlast::SelectItem::Wildcard(_) => Ok(SelectItem::Wildcard),
        sqlast::SelectItem::UnnamedExpr(expr) => Ok(SelectItem::Expr(map_expr(expr, params)?)),
        sqlast::SelectItem::QualifiedWildcard(_, _) => {
            Err(DbError::Parser("qualified wildcard is not supported".into()))
        }
        sqlast::SelectItem::ExprWithAlias { .. } => {
            Err(DbError::Parser("select aliases are not supported".into()))
        }
    }
}

fn extract_values(
    query: sqlast::Query,
    params: &mut ParamCounter,
) -> DbResult<Vec<Vec<Expr>>> {
    match *query.body {
        sqlast::SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(DbError::Parser("INSERT requires at least one row".into()));
            }
            values
                .rows
                .into_iter()
                .map(|row| row.into_iter().map(|expr| map_expr(expr, params)).collect())
                .collect()
        }
        _ => Err(DbError::Parser("INSERT expects a VALUES list".into())),
    }
}

fn map_expr(expr: sqlast::Expr, params: &mut ParamCounter) -> DbResult<Expr> {
    use sqlast::Expr as SqlExpr;

    match expr {
        SqlExpr::Identifier(ident) => Ok(Expr::Column(normalize_ident(&ident))),
        SqlExpr::CompoundIdentifier(idents) => {
            let ident = idents
                .last()
                .ok_or_else(|| DbError::Parser("invalid identifier".into()))?;
            Ok(Expr::Column(normalize_ident(ident)))
        }
        SqlExpr::Value(value) => map_value(value, params),
        SqlExpr::BinaryOp { left, op, right } => Ok(Expr::Binary {
            left: Box::new(map_expr(*left, params)?),
            op: map_binary_op(op)?,
            right: Box::new(map_expr(*right, params)?),
        }),
        SqlExpr::UnaryOp { op, expr } => match op {
            sqlast::UnaryOperator::Minus => Ok(Expr::Unary {
                op: UnaryOp::Minus,
                expr: Box::new(map_expr(*expr, params)?),
            }),
            sqlast::UnaryOperator::Plus => map_expr(*expr, params),
            other => Err(DbError::Parser(format!(
                "unsupported unary operator: {other}"
            ))),
        },
        SqlExpr::Function(func) => map_function(&func),
        SqlExpr::Nested(expr) => map_expr(*expr, params),
        other => Err(DbError::Parser(format!("unsupported expression: {other}"))),
    }
}

fn map_function(func: &sqlast::Function) -> DbResult<Expr> {
    let name = func
        .name
        .0
        .last()
        .map(|ident| ident.value.to_lowercase())
        .unwrap_or_default();
    let is_count_star = name == "count"
        && matches!(
            func.args.as_slice(),
            [sqlast::FunctionArg::Unnamed(
                sqlast::FunctionArgExpr::Wildcard
            )]
        );
    if is_count_star {
        Ok(Expr::Count)
    } else {
        Err(DbError::Parser(format!("unsupported function: {name}")))
    }
}

fn map_value(value: sqlast::Value, params: &mut ParamCounter) -> DbResult<Expr> {
    use sqlast::Value as SqlValue;

    match value {
        SqlValue::Number(num, _) => num
            .parse::<i64>()
            .map(Expr::IntLit)
            .map_err(|_| DbError::Parser(format!("invalid integer literal: {num}"))),
        SqlValue::SingleQuotedString(s) => Ok(Expr::StringLit(s)),
        SqlValue::Placeholder(marker) => map_placeholder(&marker, params),
        other => Err(DbError::Parser(format!("unsupported literal: {other}"))),
    }
}

/// `?` takes the next position left to right; `?3` and `$3` are explicit
/// 1-based positions.
fn map_placeholder(marker: &str, params: &mut ParamCounter) -> DbResult<Expr> {
    if marker == "?" {
        return Ok(Expr::Variable(params.allocate()));
    }
    let digits = marker.trim_start_matches(['?', '$']);
    let position: usize = digits
        .parse()
        .map_err(|_| DbError::Parser(format!("invalid parameter marker: {marker}")))?;
    if position == 0 {
        return Err(DbError::Parser("parameter positions start at 1".into()));
    }
    Ok(Expr::Variable(position - 1))
}

fn map_binary_op(op: sqlast::BinaryOperator) -> DbResult<BinaryOp> {
    use sqlast::BinaryOperator as SqlBinary;

    Ok(match op {
        SqlBinary::Plus => BinaryOp::Add,
        SqlBinary::Minus => BinaryOp::Subtract,
        SqlBinary::Multiply => BinaryOp::Multiply,
        SqlBinary::Divide => BinaryOp::Divide,
        SqlBinary::BitwiseXor | SqlBinary::PGExp => BinaryOp::Exp,
        SqlBinary::Eq => BinaryOp::Eq,
        SqlBinary::Lt => BinaryOp::Lt,
        SqlBinary::Gt => BinaryOp::Gt,
        other => {
            return Err(DbError::Parser(format!(
                "unsupported operator: {other}"
            )));
        }
    })
}

fn normalize_ident(ident: &sqlast::Ident) -> String {
    ident.value.to_lowercase()
}

fn normalize_object_name(name: &sqlast::ObjectName) -> DbResult<String> {
    name.0
        .first()
        .map(|ident| ident.value.to_lowercase())
        .ok_or_else(|| DbError::Parser("invalid object name".into()))
}

fn table_name_from_with_joins(table: &sqlast::TableWithJoins) -> DbResult<String> {
    if !table.joins.is_empty() {
        return Err(DbError::Parser("joins are not supported".into()));
    }
    match &table.relation {
        sqlast::TableFactor::Table { name, .. } => normalize_object_name(name),
        _ => Err(DbError::Parser("unsupported table factor".into())),
    }
}

/// Resolve the primary key from inline column options and table-level
/// constraints. Only a single INTEGER PRIMARY KEY column is supported;
/// defining one both ways is an error.
fn resolve_primary_key(
    columns: &[sqlast::ColumnDef],
    constraints: &[sqlast::TableConstraint],
) -> DbResult<Option<String>> {
    let inline = extract_inline_primary_key(columns)?;
    let table_level = extract_table_primary_key(constraints)?;

    match (inline, table_level) {
        (Some(_), Some(_)) => Err(DbError::Parser(
            "PRIMARY KEY defined both inline and at table level".into(),
        )),
        (Some(pk), None) | (None, Some(pk)) => Ok(Some(pk)),
        (None, None) => Ok(None),
    }
}

fn extract_table_primary_key(
    constraints: &[sqlast::TableConstraint],
) -> DbResult<Option<String>> {
    for constraint in constraints {
        if let sqlast::TableConstraint::Unique {
            columns,
            is_primary: true,
            ..
        } = constraint
        {
            return match columns.as_slice() {
                [column] => Ok(Some(normalize_ident(column))),
                _ => Err(DbError::Parser(
                    "composite primary keys are not supported".into(),
                )),
            };
        }
    }
    Ok(None)
}

fn extract_inline_primary_key(columns: &[sqlast::ColumnDef]) -> DbResult<Option<String>> {
    let mut found = Vec::new();
    for column in columns {
        let is_primary = column.options.iter().any(|opt| {
            matches!(
                opt.option,
                sqlast::ColumnOption::Unique {
                    is_primary: true,
                    ..
                }
            )
        });
        if is_primary {
            found.push(normalize_ident(&column.name));
        }
    }

    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        _ => Err(DbError::Parser(
            "composite primary keys are not supported".into(),
        )),
    }
}
