//! Expression tree produced by the parser and consumed by the code
//! generator. Thrown away once code generation for a `compile` call
//! finishes - ownership lives entirely within that call's stack frame.

use crate::error::SourceLoc;
use crate::symbol::SymbolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitOr,
    BitAnd,
    Lt,
    Lte,
    Gt,
    Gte,
    Equ,
    NotEqu,
    LogAnd,
    LogOr,
    Assign,
    Declare,
    DeclareConst,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    OrAssign,
    AndAssign,
}

impl BinOp {
    /// Whether this operator is from the assignment-family precedence
    /// level (spec §4.2 precedence 1) - illegal in expression context.
    pub fn is_assignment_family(self) -> bool {
        matches!(
            self,
            BinOp::Assign
                | BinOp::Declare
                | BinOp::DeclareConst
                | BinOp::AddAssign
                | BinOp::SubAssign
                | BinOp::MulAssign
                | BinOp::DivAssign
                | BinOp::ModAssign
                | BinOp::OrAssign
                | BinOp::AndAssign
        )
    }

    /// The underlying arithmetic/bitwise op a compound assignment lowers
    /// to (`x += e` reads `x`, computes `x + e`, writes back `x`).
    pub fn compound_base(self) -> Option<BinOp> {
        Some(match self {
            BinOp::AddAssign => BinOp::Add,
            BinOp::SubAssign => BinOp::Sub,
            BinOp::MulAssign => BinOp::Mul,
            BinOp::DivAssign => BinOp::Div,
            BinOp::ModAssign => BinOp::Mod,
            BinOp::OrAssign => BinOp::BitOr,
            BinOp::AndAssign => BinOp::BitAnd,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Pos,
    Not,
}

/// A function declaration's signature, recorded on its `Proc` node so the
/// code generator can zero-initialize locals and know the arity.
#[derive(Debug, Clone)]
pub struct ProcDecl {
    pub name: String,
    pub symbol: SymbolId,
    pub num_args: usize,
    pub num_locals: usize,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Null,
    Bool(bool),
    /// Index into the compile-time number pool.
    Num(u32),
    /// Index into the compile-time string pool.
    Str(u32),
    /// An identifier reference. Resolved against the symbol table at parse
    /// time (`None` means undeclared - reported as an error lazily by the
    /// code generator, matching `tiny.c`'s `CompileGetId`). `:=`/`::`
    /// mutate this field in place once they know the identifier is being
    /// declared rather than read.
    Id { name: String, symbol: Option<SymbolId> },
    /// Callee is resolved by name against the symbol table at code-gen
    /// time (not at parse time), exactly as `CompileCall` does - this is
    /// what lets a foreign function bound *after* parsing but *before*
    /// code generation still resolve.
    Call { callee: String, args: Vec<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Unary { op: UnOp, expr: Box<Expr> },
    Paren(Box<Expr>),
    Block(Vec<Expr>),
    Proc { decl: ProcDecl, body: Box<Expr> },
    If { cond: Box<Expr>, body: Box<Expr>, alt: Option<Box<Expr>> },
    While { cond: Box<Expr>, body: Box<Expr> },
    For { init: Box<Expr>, cond: Box<Expr>, step: Box<Expr>, body: Box<Expr> },
    Return(Option<Box<Expr>>),
}
