//! Diagnostics: source positions and the error types of every phase.
//!
//! Lexical and parse/static errors are reported as [`Diagnostic`]s carrying a
//! position and, when available, the offending lexeme; several of them can be
//! accumulated in one run.  Runtime errors abort the program and are reported
//! as a single [`FullRuntimeError`].

use std::fmt;
use std::io;

use thiserror::Error;

/// A 1-based line/column pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Position {
        Position { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A positioned lexical or parse/static error.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub pos: Position,
    /// Offending lexeme, when one exists (not for e.g. an unterminated string).
    pub lexeme: Option<String>,
    pub error: SyntaxError,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lexeme {
            Some(lexeme) => write!(f, "{}: at '{}': {}", self.pos, lexeme, self.error),
            None => write!(f, "{}: {}", self.pos, self.error),
        }
    }
}

impl std::error::Error for Diagnostic {}

/// Errors raised while lexing, parsing or resolving.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyntaxError {
    #[error("unexpected character: {0:?}")]
    UnexpectedChar(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unterminated character literal")]
    UnterminatedChar,
    #[error("empty character literal")]
    EmptyChar,
    #[error("unknown escape sequence: \\{0}")]
    BadEscape(char),
    #[error("integer literal has a leading zero")]
    LeadingZero,
    #[error("cannot parse number literal: {0}")]
    BadNumberLiteral(String),
    #[error("unterminated block comment")]
    UnterminatedComment,

    #[error("unexpected token, expected {expected}")]
    UnexpectedToken { expected: String },
    #[error("expected identifier")]
    ExpectedIdentifier,
    #[error("expected a type name")]
    ExpectedTypeName,
    #[error("expected expression")]
    ExpectedExpression,
    #[error("invalid assignment target")]
    InvalidAssignmentTarget,
    #[error("import failed: {0}")]
    ImportFailed(String),

    #[error("placeholder kind must be 'expression' or 'statement'")]
    BadPlaceholderKind,
    #[error("duplicate placeholder '{0}' in sculpture")]
    DuplicatePlaceholder(String),
    #[error("a sculpture must begin with a literal word")]
    SculptureNeedsKeyword,
    #[error("call site does not match structure '{0}'")]
    SculptureMismatch(String),
    #[error("placeholder '#{0}' is not in the sculpture")]
    UnknownSharp(String),

    #[error("variable already declared in this scope")]
    AlreadyDeclared,
    #[error("cannot read a variable in its own initializer")]
    SelfReferentialInit,
    #[error("'return' outside of a function")]
    ReturnOutsideFunction,
    #[error("'break' outside of a loop")]
    BreakOutsideLoop,
    #[error("'continue' outside of a loop")]
    ContinueOutsideLoop,
    #[error("'this' outside of a class method")]
    ThisOutsideClass,
}

/// Errors raised during evaluation.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),
    #[error("variable '{0}' is not initialized")]
    UninitializedVariable(String),
    #[error("variable '{0}' already declared in this scope")]
    RedeclaredVariable(String),
    #[error("cannot assign {offered} to '{name}' of type {declared}")]
    AssignTypeMismatch {
        name: String,
        declared: String,
        offered: String,
    },
    #[error("operator '{op}' cannot be applied to {lhs} and {rhs}")]
    BinaryOperands {
        op: String,
        lhs: String,
        rhs: String,
    },
    #[error("operator '{op}' requires a {expected} operand, got {got}")]
    UnaryOperand {
        op: String,
        expected: &'static str,
        got: String,
    },
    #[error("condition must be a value, got {0}")]
    BadCondition(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("modulo by zero")]
    ModuloByZero,
    #[error("integer exponent must be non-negative")]
    NegativeExponent,
    #[error("expression does not result in a callable value")]
    NotCallable,
    #[error("expected {expected} arguments but got {got}")]
    BadArity { expected: usize, got: usize },
    #[error("only instances have properties")]
    NotAnInstance,
    #[error("undefined property: {0}")]
    UndefinedProperty(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A runtime error with the position of the construct that raised it.
#[derive(Debug, Error)]
#[error("{pos}: {error}")]
pub struct FullRuntimeError {
    pub pos: Position,
    pub error: RuntimeError,
}

impl RuntimeError {
    /// Attaches a source position to this error.
    pub fn at(self, pos: Position) -> FullRuntimeError {
        FullRuntimeError { pos, error: self }
    }
}
