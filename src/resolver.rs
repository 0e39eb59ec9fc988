//! Static scope resolution.
//!
//! A single pass over the parsed program that computes, for every variable
//! reference and assignment target, how many lexical scopes lie between the
//! reference and its declaration.  The evaluator later reads exactly that
//! many hops out, which is what makes shadowing and closures behave.  Names
//! found in no enclosing scope are left unresolved and looked up in the
//! globals by name at run time.
//!
//! The same pass rejects control statements that have no legal target:
//! `return` outside a function, `break`/`continue` outside anything
//! breakable, `this` outside a method.

use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::ast::{Expr, FunDecl, NodeId, Stmt};
use crate::ctx::Context;
use crate::diag::{Diagnostic, Position, SyntaxError};
use crate::interner::Symbol;

/// Scope distances keyed by node identity.  One table accumulates across a
/// session, so interactive inputs keep their annotations.
#[derive(Debug, Default)]
pub struct Resolutions {
    distances: HashMap<NodeId, usize>,
}

impl Resolutions {
    pub fn new() -> Resolutions {
        Resolutions {
            distances: HashMap::new(),
        }
    }

    pub fn distance(&self, id: NodeId) -> Option<usize> {
        self.distances.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum VarState {
    Declared,
    Initialized,
}

#[derive(Debug)]
pub struct Resolver<'r> {
    resolutions: &'r mut Resolutions,
    this_sym: Symbol,
    scopes: Vec<HashMap<Symbol, VarState>>,
    diagnostics: Vec<Diagnostic>,
    function_depth: u32,
    class_depth: u32,
    /// Constructs `continue` may target.
    loop_depth: u32,
    /// Constructs `break` may target: loops and switches.
    break_depth: u32,
}

impl<'r> Resolver<'r> {
    pub fn new(ctx: &Rc<Context>, resolutions: &'r mut Resolutions) -> Resolver<'r> {
        Resolver {
            resolutions,
            this_sym: ctx.symbol("this"),
            scopes: Vec::new(),
            diagnostics: Vec::new(),
            function_depth: 0,
            class_depth: 0,
            loop_depth: 0,
            break_depth: 0,
        }
    }

    /// Resolves a program.  An empty diagnostic list means every reference
    /// was annotated (or deliberately left global) and all control
    /// statements are legal.
    pub fn resolve(mut self, program: &[Stmt]) -> Vec<Diagnostic> {
        for stmt in program {
            self.stmt(stmt);
        }
        debug!(
            "resolved: {} annotations, {} diagnostics",
            self.resolutions.len(),
            self.diagnostics.len()
        );
        self.diagnostics
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Nop | Stmt::Exit(_) | Stmt::Structure(_) => (),
            Stmt::Expr(e) => self.expr(e),
            Stmt::Decl {
                name, pos, init, ..
            } => {
                self.declare(name, *pos);
                if let Some(init) = init {
                    self.expr(init);
                }
                self.initialize(name);
            }
            Stmt::Block(stmts) => {
                self.scopes.push(HashMap::new());
                for s in stmts {
                    self.stmt(s);
                }
                self.scopes.pop();
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expr(cond);
                self.stmt(then_branch);
                if let Some(e) = else_branch {
                    self.stmt(e);
                }
            }
            Stmt::While { cond, body } => {
                self.expr(cond);
                self.in_loop(|r| r.stmt(body));
            }
            Stmt::DoWhile { body, cond } => {
                self.in_loop(|r| r.stmt(body));
                self.expr(cond);
            }
            Stmt::For {
                init,
                cond,
                incr,
                body,
            } => {
                // The header gets its own scope so a declared counter
                // shadows correctly and dies with the loop.
                self.scopes.push(HashMap::new());
                self.stmt(init);
                if let Some(cond) = cond {
                    self.expr(cond);
                }
                if let Some(incr) = incr {
                    self.expr(incr);
                }
                self.in_loop(|r| r.stmt(body));
                self.scopes.pop();
            }
            Stmt::Switch {
                controls,
                cases,
                default,
                ..
            } => {
                for c in controls {
                    self.expr(c);
                }
                self.break_depth += 1;
                for case in cases {
                    for t in &case.tests {
                        self.expr(t);
                    }
                    for s in &case.body {
                        self.stmt(s);
                    }
                }
                if let Some(stmts) = default {
                    for s in stmts {
                        self.stmt(s);
                    }
                }
                self.break_depth -= 1;
            }
            Stmt::Break(pos) => {
                if self.break_depth == 0 {
                    self.report(*pos, SyntaxError::BreakOutsideLoop);
                }
            }
            Stmt::Continue(pos) => {
                if self.loop_depth == 0 {
                    self.report(*pos, SyntaxError::ContinueOutsideLoop);
                }
            }
            Stmt::Return { value, pos } => {
                if self.function_depth == 0 {
                    self.report(*pos, SyntaxError::ReturnOutsideFunction);
                }
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            Stmt::Fun(decl) => {
                self.declare(&decl.name, decl.pos);
                self.initialize(&decl.name);
                self.function(decl);
            }
            Stmt::ClassDecl { name, pos, methods } => {
                self.declare(name, *pos);
                self.initialize(name);
                self.class_depth += 1;
                let mut this_scope = HashMap::new();
                this_scope.insert(self.this_sym.clone(), VarState::Initialized);
                self.scopes.push(this_scope);
                for method in methods {
                    self.function(method);
                }
                self.scopes.pop();
                self.class_depth -= 1;
            }
            Stmt::Expansion { body, .. } => self.stmt(body),
        }
    }

    /// A function body: one scope for parameters and body statements, with
    /// `break`/`continue` fenced off from any enclosing loop.
    fn function(&mut self, decl: &FunDecl) {
        self.function_depth += 1;
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        let saved_breaks = std::mem::replace(&mut self.break_depth, 0);
        self.scopes.push(HashMap::new());
        for param in &decl.params {
            self.declare(&param.name, param.pos);
            self.initialize(&param.name);
        }
        for stmt in &decl.body {
            self.stmt(stmt);
        }
        self.scopes.pop();
        self.loop_depth = saved_loops;
        self.break_depth = saved_breaks;
        self.function_depth -= 1;
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal { .. } => (),
            Expr::Variable { name, id, pos } => {
                if let Some(scope) = self.scopes.last() {
                    if scope.get(name) == Some(&VarState::Declared) {
                        self.report(*pos, SyntaxError::SelfReferentialInit);
                    }
                }
                self.resolve_local(*id, name);
            }
            Expr::Group(inner) => self.expr(inner),
            Expr::Unary { operand, .. } => self.expr(operand),
            Expr::Binary { lhs, rhs, .. } | Expr::Logical { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond);
                self.expr(then);
                self.expr(otherwise);
            }
            Expr::Assign {
                name, id, value, ..
            } => {
                self.expr(value);
                self.resolve_local(*id, name);
            }
            Expr::Call { callee, args, .. } => {
                self.expr(callee);
                for arg in args {
                    self.expr(arg);
                }
            }
            Expr::Get { object, .. } => self.expr(object),
            Expr::Set { object, value, .. } => {
                self.expr(object);
                self.expr(value);
            }
            Expr::This { id, pos } => {
                if self.class_depth == 0 {
                    self.report(*pos, SyntaxError::ThisOutsideClass);
                } else {
                    let this_sym = self.this_sym.clone();
                    self.resolve_local(*id, &this_sym);
                }
            }
            Expr::Sharp { name, pos } => panic!(
                "internal error: placeholder '#{}' survived expansion at {}",
                name, pos
            ),
        }
    }

    /// Fixes the reference's scope distance: the first enclosing scope that
    /// knows the name, innermost being distance zero.  Names in no scope
    /// are globals, resolved by name at evaluation time.
    fn resolve_local(&mut self, id: NodeId, name: &Symbol) {
        for (hops, scope) in self.scopes.iter().rev().enumerate() {
            if scope.contains_key(name) {
                self.resolutions.distances.insert(id, hops);
                return;
            }
        }
    }

    fn declare(&mut self, name: &Symbol, pos: Position) {
        if let Some(scope) = self.scopes.last_mut() {
            if scope.contains_key(name) {
                self.diagnostics.push(Diagnostic {
                    pos,
                    lexeme: Some(name.name().to_string()),
                    error: SyntaxError::AlreadyDeclared,
                });
            } else {
                scope.insert(name.clone(), VarState::Declared);
            }
        }
        // Global declarations are checked by the environment at run time.
    }

    fn initialize(&mut self, name: &Symbol) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.clone(), VarState::Initialized);
        }
    }

    fn in_loop(&mut self, f: impl FnOnce(&mut Self)) {
        self.loop_depth += 1;
        self.break_depth += 1;
        f(self);
        self.loop_depth -= 1;
        self.break_depth -= 1;
    }

    fn report(&mut self, pos: Position, error: SyntaxError) {
        self.diagnostics.push(Diagnostic {
            pos,
            lexeme: None,
            error,
        });
    }
}
