use crate::diagnostics::SourceSpan;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Bool(bool),
    Number(f64),
    /// Byte-string payload; Lua strings are not required to be UTF-8.
    Str(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
    Length,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    Name(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    /// Both `t[k]` and the `t.k` sugar (the latter with a string-literal key).
    Index {
        target: Box<Expr>,
        key: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Function {
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    Table(Vec<TableItem>),
}

#[derive(Debug, Clone)]
pub enum TableItem {
    /// `{ expr }` — appended at the next free integer key.
    Positional(Expr),
    /// `{ name = expr }`
    Named(String, Expr),
    /// `{ [expr] = expr }`
    Keyed(Expr, Expr),
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    /// `a, b = e1, e2` — targets are names or index expressions.
    Assign {
        targets: Vec<Expr>,
        values: Vec<Expr>,
    },
    Local {
        names: Vec<String>,
        values: Vec<Expr>,
    },
    /// `function a.b.c(...) ... end`
    Function {
        target: Expr,
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    LocalFunction {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    Call(Expr),
    Do(Vec<Stmt>),
    If {
        arms: Vec<(Expr, Vec<Stmt>)>,
        else_body: Option<Vec<Stmt>>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    Repeat {
        body: Vec<Stmt>,
        until: Expr,
    },
    NumericFor {
        var: String,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    Return(Vec<Expr>),
    Break,
}

/// A compiled unit of Lua source.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub body: Vec<Stmt>,
}
