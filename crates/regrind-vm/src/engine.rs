//! The [`RegexEngine`] implementation backed by the bytecode interpreter.

use regrind_fuzz::config::RegexFlags;
use regrind_fuzz::matcher::{CompileError, CoverageSink, ExecError, MatchStatus, RegexEngine};
use regrind_fuzz::unit::{SubjectRef, Width};

use crate::compile::compile;
use crate::interp::{run, Scratch};
use crate::parser::parse;

/// Both width programs, compiled eagerly so either subject representation
/// can execute without a lazy tier-up step.
pub struct CompiledRegex {
    one_byte: Vec<u8>,
    two_byte: Vec<u8>,
}

/// A backtracking bytecode regex engine for a practical pattern subset.
///
/// Patterns outside the subset (lookaround, backreferences, unbounded
/// repetition of nullable nodes) are rejected at compile time; the fuzzer
/// treats that like any other host-engine refusal.
pub struct BacktrackEngine;

impl RegexEngine for BacktrackEngine {
    type Program = CompiledRegex;
    type Scratch = Scratch;

    fn compile(&self, pattern: &str, flags: &RegexFlags) -> Result<CompiledRegex, CompileError> {
        let ast = parse(pattern).map_err(|e| CompileError::Rejected(e.to_string()))?;
        let one_byte =
            compile(&ast, Width::One, flags).map_err(|e| CompileError::Rejected(e.to_string()))?;
        let two_byte =
            compile(&ast, Width::Two, flags).map_err(|e| CompileError::Rejected(e.to_string()))?;
        log::debug!(
            "compiled /{}/: {} bytes one-byte, {} bytes two-byte",
            pattern,
            one_byte.len(),
            two_byte.len()
        );
        Ok(CompiledRegex { one_byte, two_byte })
    }

    fn new_scratch(&self) -> Scratch {
        Scratch::default()
    }

    fn execute(
        &self,
        program: &CompiledRegex,
        scratch: &mut Scratch,
        subject: SubjectRef<'_>,
        sink: &mut dyn CoverageSink,
    ) -> Result<MatchStatus, ExecError> {
        let code = match subject.width() {
            Width::One => &program.one_byte,
            Width::Two => &program.two_byte,
        };
        run(code, subject, scratch, sink)
    }

    fn bytecode<'p>(&self, program: &'p CompiledRegex, width: Width) -> Option<&'p [u8]> {
        Some(match width {
            Width::One => &program.one_byte,
            Width::Two => &program.two_byte,
        })
    }
}
