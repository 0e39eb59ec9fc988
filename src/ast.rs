//! Expression and statement nodes.
//!
//! Both syntactic categories are closed enums, so every pass (parser,
//! sculptor, resolver, evaluator) matches exhaustively and a new node kind
//! cannot be half-supported.  Nodes are immutable once built; the only
//! "rewriting" is the sculptor's deep clone, which builds fresh nodes.

use std::rc::Rc;

use crate::diag::Position;
use crate::interner::Symbol;
use crate::token::{Lit, Token};
use crate::value::TypeKind;

/// Identity of a variable-ish node, unique per session.  Keys the resolver's
/// scope-distance table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

#[derive(Debug, PartialEq, Clone)]
pub enum Expr {
    Literal {
        value: Lit,
        pos: Position,
    },
    Variable {
        name: Symbol,
        id: NodeId,
        pos: Position,
    },
    Group(Box<Expr>),
    /// `!e`, `-e`, and the absolute value form `|e|`.
    Unary {
        op: Token,
        operand: Box<Expr>,
    },
    Binary {
        op: Token,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Short-circuiting `and` / `or` / `nand` / `nor` / `implies`.
    Logical {
        op: Token,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `cond ? then : otherwise`, right-associative.
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// Plain or desugared-compound assignment; `op` is the source operator
    /// (`=`, `+=`, `++`, ...) kept for diagnostics.
    Assign {
        name: Symbol,
        id: NodeId,
        op: Token,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        paren: Token,
        args: Vec<Expr>,
    },
    Get {
        object: Box<Expr>,
        name: Symbol,
        pos: Position,
    },
    Set {
        object: Box<Expr>,
        name: Symbol,
        pos: Position,
        value: Box<Expr>,
    },
    This {
        id: NodeId,
        pos: Position,
    },
    /// `#name` inside a mould.  Must never survive expansion.
    Sharp {
        name: Symbol,
        pos: Position,
    },
}

impl Expr {
    /// Position of the node, for error reporting.
    pub fn pos(&self) -> Position {
        match self {
            Expr::Literal { pos, .. } => *pos,
            Expr::Variable { pos, .. } => *pos,
            Expr::Group(inner) => inner.pos(),
            Expr::Unary { op, .. } => op.pos,
            Expr::Binary { op, .. } => op.pos,
            Expr::Logical { op, .. } => op.pos,
            Expr::Conditional { cond, .. } => cond.pos(),
            Expr::Assign { op, .. } => op.pos,
            Expr::Call { paren, .. } => paren.pos,
            Expr::Get { pos, .. } => *pos,
            Expr::Set { pos, .. } => *pos,
            Expr::This { pos, .. } => *pos,
            Expr::Sharp { pos, .. } => *pos,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Stmt {
    Nop,
    Expr(Box<Expr>),
    /// `<type> name (= init)? ;`
    Decl {
        ty: TypeKind,
        name: Symbol,
        pos: Position,
        init: Option<Box<Expr>>,
    },
    Block(Vec<Stmt>),
    If {
        cond: Box<Expr>,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Box<Expr>,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Box<Expr>,
    },
    For {
        init: Box<Stmt>,
        cond: Option<Box<Expr>>,
        incr: Option<Box<Expr>>,
        body: Box<Stmt>,
    },
    Switch {
        controls: Vec<Expr>,
        cases: Vec<SwitchCase>,
        default: Option<Vec<Stmt>>,
        pos: Position,
    },
    Break(Position),
    Continue(Position),
    Exit(Position),
    Return {
        value: Option<Box<Expr>>,
        pos: Position,
    },
    Fun(Rc<FunDecl>),
    ClassDecl {
        name: Symbol,
        pos: Position,
        methods: Vec<Rc<FunDecl>>,
    },
    /// A structure-template declaration.  The template is registered with the
    /// session's table at parse time; the statement itself records it in the
    /// program and is a no-op to execute.
    Structure(Rc<Structure>),
    /// A statement produced by instantiating a structure's mould.
    Expansion {
        name: Symbol,
        body: Box<Stmt>,
    },
}

#[derive(Debug, PartialEq, Clone)]
pub struct SwitchCase {
    pub tests: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub pos: Position,
}

/// A function declaration, shared between the statement node and the
/// function values closing over it.
#[derive(Debug, PartialEq)]
pub struct FunDecl {
    pub name: Symbol,
    pub pos: Position,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Param {
    pub ty: TypeKind,
    pub name: Symbol,
    pub pos: Position,
}

/// A user-defined statement form: the sculpture is the pattern recognized at
/// call sites, the mould the statement template each match expands to.
#[derive(Debug, PartialEq)]
pub struct Structure {
    pub sculpture: Sculpture,
    pub mould: Stmt,
}

/// The pattern half of a structure: a leading literal word followed by
/// literal tokens and typed placeholders, matched verbatim in order.
#[derive(Debug, PartialEq)]
pub struct Sculpture {
    pub name: Symbol,
    pub pieces: Vec<PatternPiece>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum PatternPiece {
    /// A token the call site must spell exactly.
    Literal(Token),
    /// `<name:expression>` or `<name:statement>`.
    Place(Placeholder),
}

#[derive(Debug, PartialEq, Clone)]
pub struct Placeholder {
    pub name: Symbol,
    pub kind: PlaceholderKind,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PlaceholderKind {
    Expression,
    Statement,
}
