//! Tree-walking evaluator.
//!
//! Every statement execution yields a [`Signal`] returned by value; loops
//! absorb `Break`/`Continue`, calls absorb `Return`, and `Exit` rides an
//! interrupt channel through the expression stack until the top-level driver
//! stops the program.  No flag globals anywhere.

use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use log::debug;

use crate::ast::{Expr, Stmt, SwitchCase};
use crate::ctx::Context;
use crate::diag::{FullRuntimeError, Position, RuntimeError};
use crate::env::Scope;
use crate::interner::Symbol;
use crate::resolver::Resolutions;
use crate::token::{Lit, Token, TokenKind};
use crate::value::{Class, Function, Instance, Native, NativeFn, TypeKind, Value};

/// The outcome of executing one statement.
#[derive(Debug, PartialEq)]
pub enum Signal {
    Normal,
    Break,
    Continue,
    Return(Value),
    Exit,
}

/// What stops an expression mid-evaluation: a runtime error, or an `exit`
/// executed somewhere inside a call.
enum Interrupt {
    Error(FullRuntimeError),
    Exit,
}

impl From<FullRuntimeError> for Interrupt {
    fn from(e: FullRuntimeError) -> Interrupt {
        Interrupt::Error(e)
    }
}

/// Evaluates an expression inside `exec_stmt`, turning an exit interrupt
/// into the `Exit` signal and an error into the statement's error.
macro_rules! eval {
    ($self:ident, $expr:expr, $env:expr, $res:expr) => {
        match $self.eval_expr($expr, $env, $res) {
            Ok(value) => value,
            Err(Interrupt::Exit) => return Ok(Signal::Exit),
            Err(Interrupt::Error(error)) => return Err(error),
        }
    };
}

pub struct Evaluator<'t, W: Write> {
    output: &'t mut W,
    globals: Rc<Scope>,
    this_sym: Symbol,
}

impl<'t, W: Write> Evaluator<'t, W> {
    pub fn new(output: &'t mut W, ctx: &Rc<Context>) -> Evaluator<'t, W> {
        Evaluator {
            output,
            globals: Scope::global(),
            this_sym: ctx.symbol("this"),
        }
    }

    /// The outermost scope; persists across runs of one evaluator.
    pub fn globals(&self) -> &Rc<Scope> {
        &self.globals
    }

    /// Registers a host function in the global scope under the declared
    /// type `function`.
    pub fn register_native(
        &mut self,
        name: Symbol,
        arity: usize,
        body: NativeFn,
    ) -> Result<(), RuntimeError> {
        let native = Value::Native(Rc::new(Native {
            name: name.clone(),
            arity,
            body,
        }));
        self.globals.declare(TypeKind::Function, &name, Some(native))
    }

    /// Executes a program in the global environment.  Returns the signal
    /// that ended it: `Normal` for a program that ran to completion, `Exit`
    /// when an `exit` statement halted it.
    pub fn run(
        &mut self,
        program: &[Stmt],
        res: &Resolutions,
    ) -> Result<Signal, FullRuntimeError> {
        let env = self.globals.clone();
        for stmt in program {
            match self.exec_stmt(stmt, &env, res)? {
                Signal::Normal => (),
                signal => {
                    debug!("program halted by {:?}", signal);
                    return Ok(signal);
                }
            }
        }
        Ok(Signal::Normal)
    }

    fn exec_stmts(
        &mut self,
        stmts: &[Stmt],
        env: &Rc<Scope>,
        res: &Resolutions,
    ) -> Result<Signal, FullRuntimeError> {
        for stmt in stmts {
            match self.exec_stmt(stmt, env, res)? {
                Signal::Normal => (),
                // A non-normal signal suppresses the rest of the block.
                signal => return Ok(signal),
            }
        }
        Ok(Signal::Normal)
    }

    fn exec_stmt(
        &mut self,
        stmt: &Stmt,
        env: &Rc<Scope>,
        res: &Resolutions,
    ) -> Result<Signal, FullRuntimeError> {
        match stmt {
            Stmt::Nop | Stmt::Structure(_) => Ok(Signal::Normal),
            Stmt::Expr(e) => {
                eval!(self, e, env, res);
                Ok(Signal::Normal)
            }
            Stmt::Decl {
                ty,
                name,
                pos,
                init,
            } => {
                let value = match init {
                    Some(init) => Some(eval!(self, init, env, res)),
                    None => None,
                };
                env.declare(*ty, name, value).map_err(|e| e.at(*pos))?;
                Ok(Signal::Normal)
            }
            Stmt::Block(stmts) => {
                let inner = Scope::child(env);
                self.exec_stmts(stmts, &inner, res)
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let test = eval!(self, cond, env, res);
                if self.truthy(test, cond.pos())? {
                    self.exec_stmt(then_branch, env, res)
                } else if let Some(else_branch) = else_branch {
                    self.exec_stmt(else_branch, env, res)
                } else {
                    Ok(Signal::Normal)
                }
            }
            Stmt::While { cond, body } => {
                loop {
                    let test = eval!(self, cond, env, res);
                    if !self.truthy(test, cond.pos())? {
                        break;
                    }
                    match self.exec_stmt(body, env, res)? {
                        Signal::Normal | Signal::Continue => (),
                        Signal::Break => break,
                        signal => return Ok(signal),
                    }
                }
                Ok(Signal::Normal)
            }
            Stmt::DoWhile { body, cond } => {
                loop {
                    match self.exec_stmt(body, env, res)? {
                        Signal::Normal | Signal::Continue => (),
                        Signal::Break => break,
                        signal => return Ok(signal),
                    }
                    let test = eval!(self, cond, env, res);
                    if !self.truthy(test, cond.pos())? {
                        break;
                    }
                }
                Ok(Signal::Normal)
            }
            Stmt::For {
                init,
                cond,
                incr,
                body,
            } => {
                let header = Scope::child(env);
                match self.exec_stmt(init, &header, res)? {
                    Signal::Normal => (),
                    signal => return Ok(signal),
                }
                loop {
                    if let Some(cond) = cond {
                        let test = eval!(self, cond, &header, res);
                        if !self.truthy(test, cond.pos())? {
                            break;
                        }
                    }
                    match self.exec_stmt(body, &header, res)? {
                        Signal::Normal | Signal::Continue => (),
                        Signal::Break => break,
                        signal => return Ok(signal),
                    }
                    if let Some(incr) = incr {
                        eval!(self, incr, &header, res);
                    }
                }
                Ok(Signal::Normal)
            }
            Stmt::Switch {
                controls,
                cases,
                default,
                ..
            } => self.exec_switch(controls, cases, default.as_deref(), env, res),
            Stmt::Break(_) => Ok(Signal::Break),
            Stmt::Continue(_) => Ok(Signal::Continue),
            Stmt::Exit(_) => Ok(Signal::Exit),
            Stmt::Return { value, .. } => {
                let result = match value {
                    Some(value) => eval!(self, value, env, res),
                    None => Value::Void,
                };
                Ok(Signal::Return(result))
            }
            Stmt::Fun(decl) => {
                let function = Value::Function(Rc::new(Function {
                    decl: decl.clone(),
                    closure: env.clone(),
                }));
                env.declare(TypeKind::Function, &decl.name, Some(function))
                    .map_err(|e| e.at(decl.pos))?;
                Ok(Signal::Normal)
            }
            Stmt::ClassDecl { name, pos, methods } => {
                let mut table = HashMap::new();
                for method in methods {
                    table.insert(
                        method.name.clone(),
                        Rc::new(Function {
                            decl: method.clone(),
                            closure: env.clone(),
                        }),
                    );
                }
                let class = Value::Class(Rc::new(Class {
                    name: name.clone(),
                    methods: table,
                }));
                env.declare(TypeKind::Class, name, Some(class))
                    .map_err(|e| e.at(*pos))?;
                Ok(Signal::Normal)
            }
            Stmt::Expansion { body, .. } => self.exec_stmt(body, env, res),
        }
    }

    /// Controls are evaluated once; cases are tried in source order, a case
    /// matching only when every control/test pair is equal.  The first
    /// matching case runs; `default` runs only when nothing matched.
    fn exec_switch(
        &mut self,
        controls: &[Expr],
        cases: &[SwitchCase],
        default: Option<&[Stmt]>,
        env: &Rc<Scope>,
        res: &Resolutions,
    ) -> Result<Signal, FullRuntimeError> {
        let mut control_values = Vec::with_capacity(controls.len());
        for control in controls {
            control_values.push(eval!(self, control, env, res));
        }
        for case in cases {
            if case.tests.len() != control_values.len() {
                continue;
            }
            let mut matched = true;
            for (control, test) in control_values.iter().zip(&case.tests) {
                let test_value = eval!(self, test, env, res);
                if !control.equals(&test_value) {
                    matched = false;
                    break;
                }
            }
            if matched {
                return match self.exec_stmts(&case.body, env, res)? {
                    // A break truncates the switch, nothing more.
                    Signal::Break | Signal::Normal => Ok(Signal::Normal),
                    signal => Ok(signal),
                };
            }
        }
        if let Some(stmts) = default {
            return match self.exec_stmts(stmts, env, res)? {
                Signal::Break | Signal::Normal => Ok(Signal::Normal),
                signal => Ok(signal),
            };
        }
        Ok(Signal::Normal)
    }

    fn eval_expr(
        &mut self,
        expr: &Expr,
        env: &Rc<Scope>,
        res: &Resolutions,
    ) -> Result<Value, Interrupt> {
        match expr {
            Expr::Literal { value, .. } => Ok(literal_value(value)),
            Expr::Variable { name, id, pos } => {
                let value = match res.distance(*id) {
                    Some(distance) => env.get_at(distance, name),
                    None => self.globals.get(name),
                };
                value.map_err(|e| e.at(*pos).into())
            }
            Expr::Group(inner) => self.eval_expr(inner, env, res),
            Expr::Unary { op, operand } => {
                let value = self.eval_expr(operand, env, res)?;
                self.unary(op, value).map_err(|e| e.at(op.pos).into())
            }
            Expr::Binary { op, lhs, rhs } => {
                let left = self.eval_expr(lhs, env, res)?;
                let right = self.eval_expr(rhs, env, res)?;
                self.binary(op, left, right)
                    .map_err(|e| e.at(op.pos).into())
            }
            Expr::Logical { op, lhs, rhs } => self.logical(op, lhs, rhs, env, res),
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                let test = self.eval_expr(cond, env, res)?;
                if self.truthy(test, cond.pos())? {
                    self.eval_expr(then, env, res)
                } else {
                    self.eval_expr(otherwise, env, res)
                }
            }
            Expr::Assign {
                name, id, op, value, ..
            } => {
                let result = self.eval_expr(value, env, res)?;
                let assigned = match res.distance(*id) {
                    Some(distance) => env.assign_at(distance, name, result.clone()),
                    None => self.globals.assign(name, result.clone()),
                };
                assigned.map_err(|e| e.at(op.pos))?;
                Ok(result)
            }
            Expr::Call {
                callee,
                paren,
                args,
            } => {
                let target = self.eval_expr(callee, env, res)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_expr(arg, env, res)?);
                }
                self.call(target, values, paren.pos, res)
            }
            Expr::Get { object, name, pos } => {
                let value = self.eval_expr(object, env, res)?;
                self.get_property(value, name).map_err(|e| e.at(*pos).into())
            }
            Expr::Set {
                object,
                name,
                pos,
                value,
            } => {
                let target = self.eval_expr(object, env, res)?;
                let instance = match target {
                    Value::Instance(instance) => instance,
                    _ => return Err(RuntimeError::NotAnInstance.at(*pos).into()),
                };
                let result = self.eval_expr(value, env, res)?;
                instance
                    .fields
                    .borrow_mut()
                    .insert(name.clone(), result.clone());
                Ok(result)
            }
            Expr::This { id, pos } => {
                let this_sym = self.this_sym.clone();
                let value = match res.distance(*id) {
                    Some(distance) => env.get_at(distance, &this_sym),
                    None => self.globals.get(&this_sym),
                };
                value.map_err(|e| e.at(*pos).into())
            }
            Expr::Sharp { name, pos } => panic!(
                "internal error: placeholder '#{}' survived expansion at {}",
                name, pos
            ),
        }
    }

    fn call(
        &mut self,
        target: Value,
        args: Vec<Value>,
        pos: Position,
        res: &Resolutions,
    ) -> Result<Value, Interrupt> {
        let arity = match target.arity() {
            Some(arity) => arity,
            None => return Err(RuntimeError::NotCallable.at(pos).into()),
        };
        if args.len() != arity {
            return Err(RuntimeError::BadArity {
                expected: arity,
                got: args.len(),
            }
            .at(pos)
            .into());
        }
        match target {
            Value::Native(native) => (native.body)(self.output, &args)
                .map_err(|e| e.at(pos).into()),
            Value::Function(function) => self.call_function(&function, args, pos, res),
            Value::Class(class) => Ok(Value::Instance(Rc::new(Instance::new(class)))),
            _ => Err(RuntimeError::NotCallable.at(pos).into()),
        }
    }

    /// Invokes a user function: one fresh scope chained to the captured
    /// closure (not the caller), parameters bound there, body executed.
    /// A `Return` signal carries the result; normal exit yields no value.
    fn call_function(
        &mut self,
        function: &Function,
        args: Vec<Value>,
        pos: Position,
        res: &Resolutions,
    ) -> Result<Value, Interrupt> {
        let scope = Scope::child(&function.closure);
        for (param, value) in function.decl.params.iter().zip(args) {
            scope
                .declare(param.ty, &param.name, Some(value))
                .map_err(|e| e.at(pos))?;
        }
        match self.exec_stmts(&function.decl.body, &scope, res) {
            Ok(Signal::Return(value)) => Ok(value),
            Ok(Signal::Exit) => Err(Interrupt::Exit),
            Ok(_) => Ok(Value::Void),
            Err(error) => Err(Interrupt::Error(error)),
        }
    }

    fn get_property(&self, value: Value, name: &Symbol) -> Result<Value, RuntimeError> {
        let instance = match value {
            Value::Instance(instance) => instance,
            _ => return Err(RuntimeError::NotAnInstance),
        };
        if let Some(field) = instance.fields.borrow().get(name) {
            return Ok(field.clone());
        }
        if let Some(method) = instance.class.method(name) {
            // Bind `this`: a fresh scope between the method body and its
            // closure, holding the receiver.
            let this_scope = Scope::child(&method.closure);
            this_scope.declare(
                TypeKind::Instance,
                &self.this_sym,
                Some(Value::Instance(instance.clone())),
            )?;
            return Ok(Value::Function(Rc::new(Function {
                decl: method.decl.clone(),
                closure: this_scope,
            })));
        }
        Err(RuntimeError::UndefinedProperty(name.name().to_string()))
    }

    fn unary(&self, op: &Token, value: Value) -> Result<Value, RuntimeError> {
        match op.kind {
            TokenKind::Bang => match value {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(RuntimeError::UnaryOperand {
                    op: op.lexeme.name().to_string(),
                    expected: "bool",
                    got: other.type_kind().to_string(),
                }),
            },
            TokenKind::Minus => match value {
                Value::Int(n) => Ok(Value::Int(-n)),
                Value::Double(n) => Ok(Value::Double(-n)),
                other => Err(RuntimeError::UnaryOperand {
                    op: op.lexeme.name().to_string(),
                    expected: "number",
                    got: other.type_kind().to_string(),
                }),
            },
            TokenKind::Pipe => match value {
                Value::Int(n) => Ok(Value::Int(n.wrapping_abs())),
                Value::Double(n) => Ok(Value::Double(n.abs())),
                other => Err(RuntimeError::UnaryOperand {
                    op: op.lexeme.name().to_string(),
                    expected: "number",
                    got: other.type_kind().to_string(),
                }),
            },
            _ => unreachable!("not a unary operator: {}", op),
        }
    }

    fn binary(&self, op: &Token, lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
        match op.kind {
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent
            | TokenKind::Caret => self.arithmetic(op, lhs, rhs),
            TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => {
                // The wildcard wins every comparison.
                if matches!(lhs, Value::Any) || matches!(rhs, Value::Any) {
                    return Ok(Value::Bool(true));
                }
                let ordering = lhs
                    .total_order(&rhs)
                    .ok_or_else(|| operand_error(op, &lhs, &rhs))?;
                let result = match op.kind {
                    TokenKind::Less => ordering.is_lt(),
                    TokenKind::LessEqual => ordering.is_le(),
                    TokenKind::Greater => ordering.is_gt(),
                    _ => ordering.is_ge(),
                };
                Ok(Value::Bool(result))
            }
            TokenKind::EqualEqual => Ok(Value::Bool(lhs.equals(&rhs))),
            TokenKind::BangEqual => {
                if matches!(lhs, Value::Any) || matches!(rhs, Value::Any) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(!lhs.equals(&rhs)))
            }
            _ => unreachable!("not a binary operator: {}", op),
        }
    }

    /// `int ⊗ int → int`, anything involving a double → double, plus string
    /// concatenation for `+`.
    fn arithmetic(&self, op: &Token, lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
        if let (Value::Str(l), Value::Str(r)) = (&lhs, &rhs) {
            if op.kind == TokenKind::Plus {
                let mut joined = String::with_capacity(l.len() + r.len());
                joined.push_str(l);
                joined.push_str(r);
                return Ok(Value::Str(Rc::from(joined.as_str())));
            }
        }
        match (&lhs, &rhs) {
            (Value::Int(l), Value::Int(r)) => self.int_arithmetic(op, *l, *r),
            (Value::Int(_) | Value::Double(_), Value::Int(_) | Value::Double(_)) => {
                let (l, r) = match (&lhs, &rhs) {
                    (Value::Int(l), Value::Double(r)) => (*l as f64, *r),
                    (Value::Double(l), Value::Int(r)) => (*l, *r as f64),
                    (Value::Double(l), Value::Double(r)) => (*l, *r),
                    _ => unreachable!(),
                };
                self.double_arithmetic(op, l, r)
            }
            _ => Err(operand_error(op, &lhs, &rhs)),
        }
    }

    fn int_arithmetic(&self, op: &Token, l: i64, r: i64) -> Result<Value, RuntimeError> {
        let result = match op.kind {
            TokenKind::Plus => l.wrapping_add(r),
            TokenKind::Minus => l.wrapping_sub(r),
            TokenKind::Star => l.wrapping_mul(r),
            TokenKind::Slash => {
                if r == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                l.wrapping_div(r)
            }
            TokenKind::Percent => {
                if r == 0 {
                    return Err(RuntimeError::ModuloByZero);
                }
                l.wrapping_rem(r)
            }
            TokenKind::Caret => {
                if r < 0 {
                    return Err(RuntimeError::NegativeExponent);
                }
                l.wrapping_pow(r.min(u32::MAX as i64) as u32)
            }
            _ => unreachable!(),
        };
        Ok(Value::Int(result))
    }

    fn double_arithmetic(&self, op: &Token, l: f64, r: f64) -> Result<Value, RuntimeError> {
        let result = match op.kind {
            TokenKind::Plus => l + r,
            TokenKind::Minus => l - r,
            TokenKind::Star => l * r,
            TokenKind::Slash => {
                if r == 0.0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                l / r
            }
            TokenKind::Percent => {
                if r == 0.0 {
                    return Err(RuntimeError::ModuloByZero);
                }
                l % r
            }
            TokenKind::Caret => l.powf(r),
            _ => unreachable!(),
        };
        Ok(Value::Double(result))
    }

    /// Short-circuiting logical operators.  All of them produce a bool; the
    /// right operand is only evaluated when it can still affect the result.
    fn logical(
        &mut self,
        op: &Token,
        lhs: &Expr,
        rhs: &Expr,
        env: &Rc<Scope>,
        res: &Resolutions,
    ) -> Result<Value, Interrupt> {
        let left = self.eval_expr(lhs, env, res)?;
        let left = self.truthy(left, lhs.pos())?;
        let short = match op.kind {
            // `implies` is decided early by a false antecedent.
            TokenKind::And | TokenKind::Nand | TokenKind::Implies => !left,
            TokenKind::Or | TokenKind::Nor => left,
            _ => unreachable!("not a logical operator: {}", op),
        };
        if short {
            let result = match op.kind {
                TokenKind::And => false,
                TokenKind::Nand => true,
                TokenKind::Or => true,
                TokenKind::Nor => false,
                // A false antecedent makes the implication true.
                TokenKind::Implies => true,
                _ => unreachable!(),
            };
            return Ok(Value::Bool(result));
        }
        let right = self.eval_expr(rhs, env, res)?;
        let right = self.truthy(right, rhs.pos())?;
        let result = match op.kind {
            TokenKind::And => right,
            TokenKind::Nand => !right,
            TokenKind::Or => right,
            TokenKind::Nor => !right,
            TokenKind::Implies => right,
            _ => unreachable!(),
        };
        Ok(Value::Bool(result))
    }

    fn truthy(&self, value: Value, pos: Position) -> Result<bool, FullRuntimeError> {
        match value {
            Value::Void => Err(RuntimeError::BadCondition(
                TypeKind::Void.to_string(),
            )
            .at(pos)),
            other => Ok(other.is_truthy()),
        }
    }
}

impl<W: Write> std::fmt::Debug for Evaluator<'_, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("globals", &self.globals)
            .finish()
    }
}

fn literal_value(lit: &Lit) -> Value {
    match lit {
        Lit::Int(n) => Value::Int(*n),
        Lit::Double(n) => Value::Double(*n),
        Lit::Char(c) => Value::Char(*c),
        Lit::Str(s) => Value::Str(s.clone()),
        Lit::Bool(b) => Value::Bool(*b),
        Lit::Any => Value::Any,
    }
}

fn operand_error(op: &Token, lhs: &Value, rhs: &Value) -> RuntimeError {
    RuntimeError::BinaryOperands {
        op: op.lexeme.name().to_string(),
        lhs: lhs.type_kind().to_string(),
        rhs: rhs.type_kind().to_string(),
    }
}
