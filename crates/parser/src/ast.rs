/// Statements the planner understands.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Select(Select),
    Create(Create),
    Insert(Insert),
    Update(Update),
    /// Compile the inner statement but render its program instead of
    /// running it.
    Explain(Box<Statement>),
}

/// `SELECT items [FROM table [WHERE selection]]`. Table-less selects
/// (`SELECT 1`) evaluate their items once.
#[derive(Clone, Debug, PartialEq)]
pub struct Select {
    pub items: Vec<SelectItem>,
    pub table: Option<String>,
    pub selection: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SelectItem {
    Wildcard,
    Expr(Expr),
}

/// `CREATE TABLE table (columns...)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Create {
    pub table: String,
    pub columns: Vec<ColumnDecl>,
}

/// One column declaration; `ty` is the declared type name as written.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDecl {
    pub name: String,
    pub ty: String,
    pub primary_key: bool,
}

/// `INSERT INTO table [(columns...)] VALUES (row), (row), ...`.
#[derive(Clone, Debug, PartialEq)]
pub struct Insert {
    pub table: String,
    /// Explicit column list; empty means "declared order".
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Expr>>,
}

/// `UPDATE table SET col = expr, ... [WHERE selection]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, Expr)>,
    pub selection: Option<Expr>,
}

/// Binary operators, with precedence resolved by the host parser
/// (`=` lowest, then `< >`, then `+ -`, then `* /`, then `^`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Exp,
    Eq,
    Lt,
    Gt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Minus,
}

/// Expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    IntLit(i64),
    StringLit(String),
    /// Reference to a named column of the selected table.
    Column(String),
    /// Positional parameter (0-based), bound at execute time.
    Variable(usize),
    /// `COUNT(*)`.
    Count,
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
}
