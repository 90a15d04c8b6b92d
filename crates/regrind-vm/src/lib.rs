//! Reference regex engine for the regrind fuzzer.
//!
//! A deliberately small backtracking engine over the shared bytecode
//! instruction set: a recursive-descent parser for a practical regex
//! subset, a per-width compiler, and an interpreter instrumented to
//! stream branch coverage and mutation suggestions into the fuzzer's
//! coverage sink.
//!
//! The engine exists so the fuzzer has something real to drive in-tree;
//! any other engine can take its place by implementing
//! [`regrind_fuzz::matcher::RegexEngine`].
//!
//! - [`parser`] — pattern text to AST
//! - [`compile`] — AST to per-width bytecode
//! - [`interp`] — the instrumented backtracking interpreter
//! - [`engine`] — the `RegexEngine` implementation tying them together

pub mod compile;
pub mod engine;
pub mod interp;
pub mod parser;

pub use compile::CompileLimit;
pub use engine::{BacktrackEngine, CompiledRegex};
pub use interp::Scratch;
pub use parser::{Ast, CharClass, ParseError};
