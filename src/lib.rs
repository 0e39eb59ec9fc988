//! A port to Rust of the tree-walking interpreter for the Forge scripting
//! language: lexer, macro-expanding parser, static resolver and evaluator.
//!
//! # Examples
//!
//! See [`crate::interpreter::Interpreter`].
//!
//! # Phases
//!
//! The four phases are separable — a driver can lex, parse, resolve and
//! interpret one source unit at a time, or feed an interactive line through
//! the whole pipeline with [`interpreter::Interpreter::eval`].  Everything
//! that survives between inputs (global environment, structure templates,
//! scope resolutions) lives in the `Interpreter` session.

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod ast;
pub mod ctx;
pub mod diag;
pub mod env;
pub mod eval;
pub mod interner;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod sculpt;
pub mod token;
pub mod value;
