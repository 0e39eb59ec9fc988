//! Structure instantiation.
//!
//! A structure pairs a sculpture (token-and-placeholder pattern) with a
//! mould (statement template).  The parser matches call sites against the
//! sculpture and collects name→fragment bindings; this module turns a match
//! into a statement by deep-cloning the mould and splicing the bindings in
//! at each sharp.  Clones share no node with the template and carry fresh
//! node ids, so every use site is resolved and evaluated independently.

use std::collections::HashMap;
use std::rc::Rc;

use log::trace;

use crate::ast::{Expr, PatternPiece, Stmt, Structure, SwitchCase};
use crate::ctx::Context;
use crate::interner::Symbol;

/// The fragments a call-site match bound to the sculpture's placeholders.
#[derive(Debug, Clone)]
pub enum Binding {
    Expr(Expr),
    Stmt(Stmt),
}

pub type Bindings = HashMap<Symbol, Binding>;

/// The session's table of declared structures, keyed by the sculpture's
/// leading word.  A redeclaration replaces the previous template, which is
/// what an interactive session wants.
#[derive(Debug, Default)]
pub struct StructureTable {
    entries: HashMap<Symbol, Rc<Structure>>,
}

impl StructureTable {
    pub fn new() -> StructureTable {
        StructureTable {
            entries: HashMap::new(),
        }
    }

    pub fn declare(&mut self, structure: Rc<Structure>) {
        self.entries
            .insert(structure.sculpture.name.clone(), structure);
    }

    pub fn lookup(&self, name: &Symbol) -> Option<Rc<Structure>> {
        self.entries.get(name).cloned()
    }
}

/// Names a sharp in the mould that none of the sculpture's placeholders
/// declares, if any.  Checked when the structure is declared, so that
/// instantiation can treat a missing binding as an internal fault.
pub fn unknown_sharp(structure: &Structure) -> Option<Symbol> {
    let declared: Vec<&Symbol> = structure
        .sculpture
        .pieces
        .iter()
        .filter_map(|piece| match piece {
            PatternPiece::Place(p) => Some(&p.name),
            PatternPiece::Literal(_) => None,
        })
        .collect();
    let mut found = None;
    visit_sharps(&structure.mould, &mut |name| {
        if found.is_none() && !declared.iter().any(|d| *d == name) {
            found = Some(name.clone());
        }
    });
    found
}

fn visit_sharps(stmt: &Stmt, visit: &mut dyn FnMut(&Symbol)) {
    fn expr(e: &Expr, visit: &mut dyn FnMut(&Symbol)) {
        match e {
            Expr::Sharp { name, .. } => visit(name),
            Expr::Literal { .. } | Expr::Variable { .. } | Expr::This { .. } => (),
            Expr::Group(inner) => expr(inner, visit),
            Expr::Unary { operand, .. } => expr(operand, visit),
            Expr::Binary { lhs, rhs, .. } | Expr::Logical { lhs, rhs, .. } => {
                expr(lhs, visit);
                expr(rhs, visit);
            }
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                expr(cond, visit);
                expr(then, visit);
                expr(otherwise, visit);
            }
            Expr::Assign { value, .. } => expr(value, visit),
            Expr::Call { callee, args, .. } => {
                expr(callee, visit);
                for arg in args {
                    expr(arg, visit);
                }
            }
            Expr::Get { object, .. } => expr(object, visit),
            Expr::Set { object, value, .. } => {
                expr(object, visit);
                expr(value, visit);
            }
        }
    }

    match stmt {
        Stmt::Nop | Stmt::Break(_) | Stmt::Continue(_) | Stmt::Exit(_) | Stmt::Structure(_) => (),
        Stmt::Expr(e) => expr(e, visit),
        Stmt::Decl { init, .. } => {
            if let Some(init) = init {
                expr(init, visit);
            }
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                visit_sharps(s, visit);
            }
        }
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => {
            expr(cond, visit);
            visit_sharps(then_branch, visit);
            if let Some(e) = else_branch {
                visit_sharps(e, visit);
            }
        }
        Stmt::While { cond, body } => {
            expr(cond, visit);
            visit_sharps(body, visit);
        }
        Stmt::DoWhile { body, cond } => {
            visit_sharps(body, visit);
            expr(cond, visit);
        }
        Stmt::For {
            init,
            cond,
            incr,
            body,
        } => {
            visit_sharps(init, visit);
            if let Some(c) = cond {
                expr(c, visit);
            }
            if let Some(i) = incr {
                expr(i, visit);
            }
            visit_sharps(body, visit);
        }
        Stmt::Switch {
            controls,
            cases,
            default,
            ..
        } => {
            for c in controls {
                expr(c, visit);
            }
            for case in cases {
                for t in &case.tests {
                    expr(t, visit);
                }
                for s in &case.body {
                    visit_sharps(s, visit);
                }
            }
            if let Some(stmts) = default {
                for s in stmts {
                    visit_sharps(s, visit);
                }
            }
        }
        Stmt::Return { value, .. } => {
            if let Some(v) = value {
                expr(v, visit);
            }
        }
        Stmt::Fun(decl) => {
            for s in &decl.body {
                visit_sharps(s, visit);
            }
        }
        Stmt::ClassDecl { methods, .. } => {
            for m in methods {
                for s in &m.body {
                    visit_sharps(s, visit);
                }
            }
        }
        Stmt::Expansion { body, .. } => visit_sharps(body, visit),
    }
}

/// Instantiates `structure` with the given bindings: a deep clone of the
/// mould with every bound sharp replaced by its fragment (itself cloned, so
/// a placeholder referenced twice yields two independent subtrees).
///
/// Sharps without a binding are kept verbatim; they can only occur while an
/// enclosing mould is being declared, and are filled in when that mould is
/// itself instantiated.  One surviving into a resolved program is a fault
/// in the expander, not in the program being parsed.
pub fn instantiate(ctx: &Context, structure: &Structure, bindings: &Bindings) -> Stmt {
    trace!(
        "instantiating structure '{}' with {} bindings",
        structure.sculpture.name,
        bindings.len()
    );
    clone_stmt(ctx, &structure.mould, bindings)
}

fn clone_stmt(ctx: &Context, stmt: &Stmt, bindings: &Bindings) -> Stmt {
    match stmt {
        // A statement placeholder is spelled `#name;` in the mould: an
        // expression statement wrapping a lone sharp.
        Stmt::Expr(e) => {
            if let Expr::Sharp { name, .. } = e.as_ref() {
                if let Some(Binding::Stmt(s)) = bindings.get(name) {
                    return clone_stmt(ctx, s, bindings);
                }
            }
            Stmt::Expr(Box::new(clone_expr(ctx, e, bindings)))
        }
        Stmt::Nop => Stmt::Nop,
        Stmt::Break(pos) => Stmt::Break(*pos),
        Stmt::Continue(pos) => Stmt::Continue(*pos),
        Stmt::Exit(pos) => Stmt::Exit(*pos),
        Stmt::Decl {
            ty,
            name,
            pos,
            init,
        } => Stmt::Decl {
            ty: *ty,
            name: name.clone(),
            pos: *pos,
            init: init
                .as_ref()
                .map(|e| Box::new(clone_expr(ctx, e, bindings))),
        },
        Stmt::Block(stmts) => Stmt::Block(
            stmts
                .iter()
                .map(|s| clone_stmt(ctx, s, bindings))
                .collect(),
        ),
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => Stmt::If {
            cond: Box::new(clone_expr(ctx, cond, bindings)),
            then_branch: Box::new(clone_stmt(ctx, then_branch, bindings)),
            else_branch: else_branch
                .as_ref()
                .map(|s| Box::new(clone_stmt(ctx, s, bindings))),
        },
        Stmt::While { cond, body } => Stmt::While {
            cond: Box::new(clone_expr(ctx, cond, bindings)),
            body: Box::new(clone_stmt(ctx, body, bindings)),
        },
        Stmt::DoWhile { body, cond } => Stmt::DoWhile {
            body: Box::new(clone_stmt(ctx, body, bindings)),
            cond: Box::new(clone_expr(ctx, cond, bindings)),
        },
        Stmt::For {
            init,
            cond,
            incr,
            body,
        } => Stmt::For {
            init: Box::new(clone_stmt(ctx, init, bindings)),
            cond: cond
                .as_ref()
                .map(|e| Box::new(clone_expr(ctx, e, bindings))),
            incr: incr
                .as_ref()
                .map(|e| Box::new(clone_expr(ctx, e, bindings))),
            body: Box::new(clone_stmt(ctx, body, bindings)),
        },
        Stmt::Switch {
            controls,
            cases,
            default,
            pos,
        } => Stmt::Switch {
            controls: controls
                .iter()
                .map(|e| clone_expr(ctx, e, bindings))
                .collect(),
            cases: cases
                .iter()
                .map(|case| SwitchCase {
                    tests: case
                        .tests
                        .iter()
                        .map(|e| clone_expr(ctx, e, bindings))
                        .collect(),
                    body: case
                        .body
                        .iter()
                        .map(|s| clone_stmt(ctx, s, bindings))
                        .collect(),
                    pos: case.pos,
                })
                .collect(),
            default: default.as_ref().map(|stmts| {
                stmts
                    .iter()
                    .map(|s| clone_stmt(ctx, s, bindings))
                    .collect()
            }),
            pos: *pos,
        },
        Stmt::Return { value, pos } => Stmt::Return {
            value: value
                .as_ref()
                .map(|e| Box::new(clone_expr(ctx, e, bindings))),
            pos: *pos,
        },
        // Function bodies inside a mould are cloned like any other
        // statements so each expansion gets its own declarations.
        Stmt::Fun(decl) => Stmt::Fun(Rc::new(crate::ast::FunDecl {
            name: decl.name.clone(),
            pos: decl.pos,
            params: decl.params.clone(),
            body: decl
                .body
                .iter()
                .map(|s| clone_stmt(ctx, s, bindings))
                .collect(),
        })),
        Stmt::ClassDecl { name, pos, methods } => Stmt::ClassDecl {
            name: name.clone(),
            pos: *pos,
            methods: methods
                .iter()
                .map(|m| {
                    Rc::new(crate::ast::FunDecl {
                        name: m.name.clone(),
                        pos: m.pos,
                        params: m.params.clone(),
                        body: m
                            .body
                            .iter()
                            .map(|s| clone_stmt(ctx, s, bindings))
                            .collect(),
                    })
                })
                .collect(),
        },
        Stmt::Structure(structure) => Stmt::Structure(structure.clone()),
        Stmt::Expansion { name, body } => Stmt::Expansion {
            name: name.clone(),
            body: Box::new(clone_stmt(ctx, body, bindings)),
        },
    }
}

fn clone_expr(ctx: &Context, expr: &Expr, bindings: &Bindings) -> Expr {
    match expr {
        Expr::Sharp { name, pos } => match bindings.get(name) {
            // The fragment is cloned too: a second reference to the same
            // placeholder must not alias the first.
            Some(Binding::Expr(e)) => clone_expr(ctx, e, bindings),
            Some(Binding::Stmt(_)) => panic!(
                "internal error: statement placeholder '#{}' used in expression position",
                name
            ),
            // A sharp without a binding belongs to an enclosing mould that
            // is still being declared; it is kept for that mould's own
            // instantiation to fill in.
            None => Expr::Sharp {
                name: name.clone(),
                pos: *pos,
            },
        },
        Expr::Literal { value, pos } => Expr::Literal {
            value: value.clone(),
            pos: *pos,
        },
        Expr::Variable { name, pos, .. } => Expr::Variable {
            name: name.clone(),
            id: ctx.fresh_id(),
            pos: *pos,
        },
        Expr::Group(inner) => Expr::Group(Box::new(clone_expr(ctx, inner, bindings))),
        Expr::Unary { op, operand } => Expr::Unary {
            op: op.clone(),
            operand: Box::new(clone_expr(ctx, operand, bindings)),
        },
        Expr::Binary { op, lhs, rhs } => Expr::Binary {
            op: op.clone(),
            lhs: Box::new(clone_expr(ctx, lhs, bindings)),
            rhs: Box::new(clone_expr(ctx, rhs, bindings)),
        },
        Expr::Logical { op, lhs, rhs } => Expr::Logical {
            op: op.clone(),
            lhs: Box::new(clone_expr(ctx, lhs, bindings)),
            rhs: Box::new(clone_expr(ctx, rhs, bindings)),
        },
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => Expr::Conditional {
            cond: Box::new(clone_expr(ctx, cond, bindings)),
            then: Box::new(clone_expr(ctx, then, bindings)),
            otherwise: Box::new(clone_expr(ctx, otherwise, bindings)),
        },
        Expr::Assign {
            name,
            op,
            value,
            ..
        } => Expr::Assign {
            name: name.clone(),
            id: ctx.fresh_id(),
            op: op.clone(),
            value: Box::new(clone_expr(ctx, value, bindings)),
        },
        Expr::Call {
            callee,
            paren,
            args,
        } => Expr::Call {
            callee: Box::new(clone_expr(ctx, callee, bindings)),
            paren: paren.clone(),
            args: args
                .iter()
                .map(|a| clone_expr(ctx, a, bindings))
                .collect(),
        },
        Expr::Get { object, name, pos } => Expr::Get {
            object: Box::new(clone_expr(ctx, object, bindings)),
            name: name.clone(),
            pos: *pos,
        },
        Expr::Set {
            object,
            name,
            pos,
            value,
        } => Expr::Set {
            object: Box::new(clone_expr(ctx, object, bindings)),
            name: name.clone(),
            pos: *pos,
            value: Box::new(clone_expr(ctx, value, bindings)),
        },
        Expr::This { pos, .. } => Expr::This {
            id: ctx.fresh_id(),
            pos: *pos,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Placeholder, PlaceholderKind, Sculpture};
    use crate::diag::Position;
    use crate::token::{Token, TokenKind};

    fn pos() -> Position {
        Position::new(1, 1)
    }

    fn var(ctx: &Context, name: &str) -> Expr {
        Expr::Variable {
            name: ctx.symbol(name),
            id: ctx.fresh_id(),
            pos: pos(),
        }
    }

    fn sharp(ctx: &Context, name: &str) -> Expr {
        Expr::Sharp {
            name: ctx.symbol(name),
            pos: pos(),
        }
    }

    /// `unless ( <c:expression> ) <b:statement>` expanding to
    /// `{ if (!#c) #b }`.
    fn unless_structure(ctx: &Context) -> Structure {
        let bang = Token::new(TokenKind::Bang, ctx.symbol("!"), None, pos());
        let mould = Stmt::Block(vec![Stmt::If {
            cond: Box::new(Expr::Unary {
                op: bang,
                operand: Box::new(sharp(ctx, "c")),
            }),
            then_branch: Box::new(Stmt::Expr(Box::new(sharp(ctx, "b")))),
            else_branch: None,
        }]);
        Structure {
            sculpture: Sculpture {
                name: ctx.symbol("unless"),
                pieces: vec![
                    PatternPiece::Literal(Token::new(
                        TokenKind::LeftParen,
                        ctx.symbol("("),
                        None,
                        pos(),
                    )),
                    PatternPiece::Place(Placeholder {
                        name: ctx.symbol("c"),
                        kind: PlaceholderKind::Expression,
                    }),
                    PatternPiece::Literal(Token::new(
                        TokenKind::RightParen,
                        ctx.symbol(")"),
                        None,
                        pos(),
                    )),
                    PatternPiece::Place(Placeholder {
                        name: ctx.symbol("b"),
                        kind: PlaceholderKind::Statement,
                    }),
                ],
            },
            mould,
        }
    }

    fn unless_bindings(ctx: &Context, cond_var: &str, body_var: &str) -> Bindings {
        let mut bindings = Bindings::new();
        bindings.insert(ctx.symbol("c"), Binding::Expr(var(ctx, cond_var)));
        bindings.insert(
            ctx.symbol("b"),
            Binding::Stmt(Stmt::Expr(Box::new(var(ctx, body_var)))),
        );
        bindings
    }

    fn variable_ids(stmt: &Stmt) -> Vec<crate::ast::NodeId> {
        // Walks the clone looking for variable nodes.
        fn walk_expr(e: &Expr, out: &mut Vec<crate::ast::NodeId>) {
            match e {
                Expr::Variable { id, .. } => out.push(*id),
                Expr::Unary { operand, .. } => walk_expr(operand, out),
                Expr::Group(inner) => walk_expr(inner, out),
                _ => (),
            }
        }
        let mut out = vec![];
        if let Stmt::Block(stmts) = stmt {
            if let Some(Stmt::If {
                cond, then_branch, ..
            }) = stmts.first()
            {
                walk_expr(cond, &mut out);
                if let Stmt::Expr(e) = then_branch.as_ref() {
                    walk_expr(e, &mut out);
                }
            }
        }
        out
    }

    #[test]
    fn substitutes_expression_and_statement_placeholders() {
        let ctx = Context::new();
        let structure = unless_structure(&ctx);
        let expanded = instantiate(&ctx, &structure, &unless_bindings(&ctx, "flag", "work"));
        let ids = variable_ids(&expanded);
        assert_eq!(ids.len(), 2, "expected cond and body variables: {:?}", expanded);
    }

    #[test]
    fn expansions_are_independent() {
        let ctx = Context::new();
        let structure = unless_structure(&ctx);
        let first = instantiate(&ctx, &structure, &unless_bindings(&ctx, "a", "x"));
        let second = instantiate(&ctx, &structure, &unless_bindings(&ctx, "b", "y"));
        let first_ids = variable_ids(&first);
        let second_ids = variable_ids(&second);
        for id in &first_ids {
            assert!(
                !second_ids.contains(id),
                "expansions share node id {:?}",
                id
            );
        }
    }

    #[test]
    fn repeated_placeholder_references_get_fresh_ids() {
        let ctx = Context::new();
        // structure twice <e:expression> => { #e; #e; }
        let structure = Structure {
            sculpture: Sculpture {
                name: ctx.symbol("twice"),
                pieces: vec![PatternPiece::Place(Placeholder {
                    name: ctx.symbol("e"),
                    kind: PlaceholderKind::Expression,
                })],
            },
            mould: Stmt::Block(vec![
                Stmt::Expr(Box::new(sharp(&ctx, "e"))),
                Stmt::Expr(Box::new(sharp(&ctx, "e"))),
            ]),
        };
        let mut bindings = Bindings::new();
        bindings.insert(ctx.symbol("e"), Binding::Expr(var(&ctx, "n")));
        let expanded = instantiate(&ctx, &structure, &bindings);
        if let Stmt::Block(stmts) = &expanded {
            match (&stmts[0], &stmts[1]) {
                (Stmt::Expr(a), Stmt::Expr(b)) => match (a.as_ref(), b.as_ref()) {
                    (Expr::Variable { id: ida, .. }, Expr::Variable { id: idb, .. }) => {
                        assert_ne!(ida, idb)
                    }
                    other => panic!("unexpected clones: {:?}", other),
                },
                other => panic!("unexpected block: {:?}", other),
            }
        } else {
            panic!("expected block, got {:?}", expanded);
        }
    }

    #[test]
    fn unknown_sharp_is_detected() {
        let ctx = Context::new();
        let mut structure = unless_structure(&ctx);
        // Rename the pattern placeholder so the mould's `#c` dangles.
        structure.sculpture.pieces[1] = PatternPiece::Place(Placeholder {
            name: ctx.symbol("cond"),
            kind: PlaceholderKind::Expression,
        });
        assert_eq!(unknown_sharp(&structure), Some(ctx.symbol("c")));
    }

    #[test]
    fn complete_sculpture_has_no_unknown_sharp() {
        let ctx = Context::new();
        let structure = unless_structure(&ctx);
        assert_eq!(unknown_sharp(&structure), None);
    }

    #[test]
    fn unbound_sharps_survive_for_an_enclosing_mould() {
        let ctx = Context::new();
        let structure = unless_structure(&ctx);
        // No bindings at all: both sharps belong to some enclosing mould.
        let cloned = instantiate(&ctx, &structure, &Bindings::new());
        let mut names = vec![];
        visit_sharps(&cloned, &mut |name| names.push(name.clone()));
        assert_eq!(names, vec![ctx.symbol("c"), ctx.symbol("b")]);
    }

    #[test]
    fn table_lookup_by_leading_word() {
        let ctx = Context::new();
        let mut table = StructureTable::new();
        table.declare(Rc::new(unless_structure(&ctx)));
        assert!(table.lookup(&ctx.symbol("unless")).is_some());
        assert!(table.lookup(&ctx.symbol("until")).is_none());
    }
}
