//! API to control the interpreter.

use std::cell::RefCell;
use std::error::Error;
use std::fmt;
use std::io::Write;
use std::rc::Rc;

use log::debug;

use crate::ast::Stmt;
use crate::ctx::Context;
use crate::diag::{Diagnostic, FullRuntimeError, RuntimeError};
use crate::eval::{Evaluator, Signal};
use crate::lexer::Lexer;
use crate::parser::{ImportResolver, NoImports, Parser};
use crate::resolver::{Resolutions, Resolver};
use crate::sculpt::StructureTable;
use crate::token::Token;
use crate::value::NativeFn;

/// Tree-walk interpreter session.
///
/// Holds everything that survives between inputs: the global environment,
/// the declared structure templates and the accumulated scope resolutions.
/// The four phases are exposed separately so a driver can run them once per
/// file or once per interactive line.
///
/// # Example
///
/// Define a function in one input and call it from later ones:
///
/// ```
/// use std::io::Write;
/// use rforge::interpreter::Interpreter;
/// use rforge::value::Value;
///
/// let mut output: Vec<u8> = Vec::new();
/// let mut interp = Interpreter::new(&mut output);
/// interp.register_native("print", 1, |out, args| {
///     writeln!(out, "{}", args[0])?;
///     Ok(Value::Void)
/// }).expect("registering print");
///
/// let func_def = r#"
///     function max(int x, int y) {
///         if (x > y) {
///             return x;
///         }
///         return y;
///     }
/// "#;
/// interp.eval(func_def).expect("interpreter error");
///
/// interp.eval("print(max(10, 20));").expect("interpreter error");
/// interp.eval("print(max(5, 4));").expect("interpreter error");
///
/// drop(interp);
/// assert_eq!(output, b"20\n5\n");
/// ```
pub struct Interpreter<'t, W: Write> {
    ctx: Rc<Context>,
    evaluator: Evaluator<'t, W>,
    structures: Rc<RefCell<StructureTable>>,
    resolutions: Resolutions,
    imports: Rc<dyn ImportResolver>,
    had_error: bool,
    had_runtime_error: bool,
}

/// Errors the interpreter can raise.
#[derive(Debug)]
pub enum ForgeError {
    /// One or more lexical, parse or resolution diagnostics.
    Syntax(Vec<Diagnostic>),

    /// The runtime error that aborted evaluation.
    Runtime(FullRuntimeError),
}

impl fmt::Display for ForgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForgeError::Syntax(diagnostics) => {
                for (i, d) in diagnostics.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "error: {}", d)?;
                }
                Ok(())
            }
            ForgeError::Runtime(e) => write!(f, "runtime error: {}", e),
        }
    }
}

impl Error for ForgeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ForgeError::Syntax(_) => None,
            ForgeError::Runtime(e) => Some(e),
        }
    }
}

impl From<FullRuntimeError> for ForgeError {
    fn from(e: FullRuntimeError) -> ForgeError {
        ForgeError::Runtime(e)
    }
}

impl From<Vec<Diagnostic>> for ForgeError {
    fn from(diagnostics: Vec<Diagnostic>) -> ForgeError {
        ForgeError::Syntax(diagnostics)
    }
}

impl<'t, W: Write> Interpreter<'t, W> {
    pub fn new(output: &'t mut W) -> Interpreter<'t, W> {
        let ctx = Context::new();
        Interpreter {
            evaluator: Evaluator::new(output, &ctx),
            ctx,
            structures: Rc::new(RefCell::new(StructureTable::new())),
            resolutions: Resolutions::new(),
            imports: Rc::new(NoImports),
            had_error: false,
            had_runtime_error: false,
        }
    }

    /// Installs the driver's import resolver; parsed `import` directives
    /// fetch their source text through it.
    pub fn set_import_resolver(&mut self, imports: Rc<dyn ImportResolver>) {
        self.imports = imports;
    }

    /// Registers a native callable in the global scope before (or between)
    /// interpretations.
    pub fn register_native(
        &mut self,
        name: &str,
        arity: usize,
        body: NativeFn,
    ) -> Result<(), RuntimeError> {
        let sym = self.ctx.symbol(name);
        self.evaluator.register_native(sym, arity, body)
    }

    /// Lexes one source unit.
    pub fn lex(&mut self, source: &str) -> Result<Vec<Token>, ForgeError> {
        let (tokens, diagnostics) = Lexer::new(source, self.ctx.clone()).scan();
        if diagnostics.is_empty() {
            Ok(tokens)
        } else {
            self.had_error = true;
            Err(diagnostics.into())
        }
    }

    /// Lexes and parses one source unit, expanding structures.  Lexical and
    /// parse diagnostics are reported together.
    pub fn parse(&mut self, source: &str) -> Result<Vec<Stmt>, ForgeError> {
        let (tokens, mut diagnostics) = Lexer::new(source, self.ctx.clone()).scan();
        let parser = Parser::new(
            tokens,
            self.ctx.clone(),
            self.structures.clone(),
            self.imports.clone(),
        );
        let (program, mut parse_diagnostics) = parser.parse_program();
        diagnostics.append(&mut parse_diagnostics);
        if diagnostics.is_empty() {
            Ok(program)
        } else {
            self.had_error = true;
            Err(diagnostics.into())
        }
    }

    /// Resolves a parsed program, accumulating scope distances in the
    /// session.
    pub fn resolve(&mut self, program: &[Stmt]) -> Result<(), ForgeError> {
        let diagnostics = Resolver::new(&self.ctx, &mut self.resolutions).resolve(program);
        if diagnostics.is_empty() {
            Ok(())
        } else {
            self.had_error = true;
            Err(diagnostics.into())
        }
    }

    /// Interprets an already-resolved program against the session's global
    /// environment.  Returns the signal that ended execution; `Exit` tells
    /// the driver to stop feeding further input.
    pub fn interpret(&mut self, program: &[Stmt]) -> Result<Signal, ForgeError> {
        match self.evaluator.run(program, &self.resolutions) {
            Ok(signal) => Ok(signal),
            Err(e) => {
                self.had_runtime_error = true;
                Err(e.into())
            }
        }
    }

    /// Parses, resolves and interprets one source unit: the whole pipeline
    /// as a driver normally wants it.
    pub fn eval(&mut self, source: &str) -> Result<Signal, ForgeError> {
        let program = self.parse(source)?;
        self.resolve(&program)?;
        debug!("interpreting {} statements", program.len());
        self.interpret(&program)
    }

    /// True when any lexical, parse or resolution error was reported.
    pub fn had_error(&self) -> bool {
        self.had_error
    }

    /// True when a runtime error aborted an interpretation.
    pub fn had_runtime_error(&self) -> bool {
        self.had_runtime_error
    }

    /// Clears both error flags, e.g. between interactive inputs.
    pub fn clear_errors(&mut self) {
        self.had_error = false;
        self.had_runtime_error = false;
    }
}

impl<W: Write> fmt::Debug for Interpreter<'_, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("resolutions", &self.resolutions.len())
            .field("had_error", &self.had_error)
            .field("had_runtime_error", &self.had_runtime_error)
            .finish()
    }
}
