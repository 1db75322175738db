#![forbid(unsafe_code)]

use miette::SourceSpan;

pub mod build;

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

pub type Ident = Spanned<String>;

/// One compilation unit as handed over by the parser.
#[derive(Clone, Debug, PartialEq)]
pub struct Module {
    pub name: String,
    pub decls: Vec<Decl>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decl {
    Struct(StructDecl),
    Const(ConstDecl),
    Fn(FnDecl),
}

impl Decl {
    pub fn name(&self) -> &Ident {
        match self {
            Decl::Struct(s) => &s.name,
            Decl::Const(c) => &c.name,
            Decl::Fn(f) => &f.name,
        }
    }
}

/// `packed? struct Name align(N)? { field: Type, ... }`
#[derive(Clone, Debug, PartialEq)]
pub struct StructDecl {
    pub span: Span,
    pub name: Ident,
    pub fields: Vec<FieldDecl>,
    pub packed: bool,
    pub align: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDecl {
    pub span: Span,
    pub name: Ident,
    pub ty: TypeExpr,
}

/// `const NAME: Type = expr`. Module-level and block-level constants share this shape.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstDecl {
    pub span: Span,
    pub name: Ident,
    pub ty: Option<TypeExpr>,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FnDecl {
    pub span: Span,
    pub name: Ident,
    pub params: Vec<Param>,
    pub ret: TypeExpr,
    /// `None` for extern declarations.
    pub body: Option<Block>,
    /// `#[release]`: `own` arguments are freed by the call rather than moved.
    pub release: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Qualifier {
    None,
    Own,
    Ref,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub span: Span,
    pub name: Ident,
    pub qual: Qualifier,
    pub ty: TypeExpr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeExpr {
    pub span: Span,
    pub kind: TypeExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeExprKind {
    /// Primitive (`u8`, `i64`, `usize`, `bool`) or struct name.
    Named(String),
    Void,
    /// `*T` / `*?T`
    Pointer {
        target: Box<TypeExpr>,
        nullable: bool,
    },
    /// `[]T`
    Slice(Box<TypeExpr>),
    /// `[N]T`; `N` is a comptime expression.
    Array {
        elem: Box<TypeExpr>,
        len: Box<Expr>,
    },
    /// `T | Error{A, B}`
    ErrorUnion {
        success: Box<TypeExpr>,
        errors: Vec<Ident>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub span: Span,
    pub stmts: Vec<Stmt>,
    pub tail: Option<Box<Expr>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Let(LetStmt),
    Const(ConstDecl),
    Assign(AssignStmt),
    Expr(Expr),
    Return(ReturnStmt),
    If(IfStmt),
    While(WhileStmt),
    For(ForStmt),
    Break(Span),
    Continue(Span),
    Block(Block),
    Defer(DeferStmt),
    Comptime(Block),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LetStmt {
    pub span: Span,
    pub name: Ident,
    pub mutable: bool,
    pub ty: Option<TypeExpr>,
    pub value: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssignStmt {
    pub span: Span,
    pub target: Expr,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReturnStmt {
    pub span: Span,
    pub value: Option<Expr>,
}

/// `if cond { } else { }` or, with a capture, `if ptr |p| { } else { }`.
#[derive(Clone, Debug, PartialEq)]
pub struct IfStmt {
    pub span: Span,
    pub cond: Expr,
    pub capture: Option<Ident>,
    pub then_block: Block,
    pub else_block: Option<Block>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WhileStmt {
    pub span: Span,
    pub cond: Expr,
    pub body: Block,
}

/// `for var in start..end { }`
#[derive(Clone, Debug, PartialEq)]
pub struct ForStmt {
    pub span: Span,
    pub var: Ident,
    pub start: Expr,
    pub end: Expr,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeferStmt {
    pub span: Span,
    pub on_error: bool,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Ident(String),
    Int(i128),
    Bool(bool),
    Null,
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Call {
        callee: Ident,
        args: Vec<Expr>,
    },
    /// `ref place`
    Ref(Box<Expr>),
    /// `ptr^`
    Deref(Box<Expr>),
    Field {
        base: Box<Expr>,
        field: Ident,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    /// `base[start..end]`
    Slice {
        base: Box<Expr>,
        start: Box<Expr>,
        end: Box<Expr>,
    },
    ArrayLit(Vec<Expr>),
    /// `[value; count]`
    ArrayRepeat {
        value: Box<Expr>,
        count: Box<Expr>,
    },
    StructLit {
        name: Ident,
        fields: Vec<(Ident, Expr)>,
    },
    /// `expr?`
    Try(Box<Expr>),
    /// `expr else fallback`
    Catch {
        expr: Box<Expr>,
        fallback: Box<Expr>,
    },
    /// `Error.Name`
    ErrorTag(Ident),
    Comptime(Box<Block>),
    Cast {
        expr: Box<Expr>,
        ty: TypeExpr,
    },
    /// `allocate(T)`
    Allocate(TypeExpr),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,

    /// `+%`, `-%`, `*%`
    AddWrap,
    SubWrap,
    MulWrap,

    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,

    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    And,
    Or,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::AddWrap => "+%",
            BinOp::SubWrap => "-%",
            BinOp::MulWrap => "*%",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
        )
    }
}

impl Expr {
    pub fn new(span: Span, kind: ExprKind) -> Self {
        Self { span, kind }
    }

    /// Name of the binding this expression is rooted at, if it is a plain place
    /// (`x`, `x.f`, `x.f.g`).
    pub fn place_root(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Ident(n) => Some(n.as_str()),
            ExprKind::Field { base, .. } => base.place_root(),
            _ => None,
        }
    }
}
