//! The boundary between the fuzzing engine and the host regex engine.
//!
//! The host is anything implementing [`RegexEngine`]: it compiles a pattern
//! once, then executes it against subjects while streaming branch events
//! into a [`CoverageSink`]. [`MatcherAdapter`] wraps a compiled program
//! with everything the campaigns need: priming executions that force the
//! engine to commit to both widths, per-execution coverage maps produced
//! by value, and a small mutex-protected pool of per-thread scratch state.

use std::sync::Mutex;

use thiserror::Error;

use crate::config::RegexFlags;
use crate::coverage::CoverageMap;
use crate::unit::{SubjectRef, Width};

/// Receives instrumentation events during one execution.
pub trait CoverageSink {
    /// A taken branch from `src` to `dst`.
    fn cover(&mut self, src: u32, dst: u32);

    /// One iteration of a self-looping scan instruction.
    fn cover_self(&mut self, pc: u32);

    /// A hint that writing `ch` at subject position `pos` may flip the
    /// branch from `src` to `dst`.
    fn suggest(&mut self, src: u32, dst: u32, ch: u16, pos: i32);

    /// The furthest subject position the engine reached.
    fn cursor(&mut self, pos: u32);

    /// True once the caller's execution budget is spent; the engine should
    /// wind down promptly.
    fn over_budget(&self) -> bool;
}

/// How one execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    Match,
    NoMatch,
    /// The sink reported the budget spent mid-match.
    BudgetExceeded,
}

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("pattern rejected: {0}")]
    Rejected(String),

    #[error("engine produced no interpretable bytecode for {0} subjects")]
    NoBytecode(Width),

    #[error("pattern compiles to a trivial matcher with no branches to fuzz")]
    TrivialMatcher,

    #[error("priming execution failed: {0}")]
    Priming(#[from] ExecError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// The engine internally narrowed the subject representation; the
    /// execution did not happen at the requested width.
    #[error("engine demoted the subject to a narrower representation")]
    WidthDemoted,

    #[error("engine fault: {0}")]
    EngineFault(String),
}

/// A host regex engine.
pub trait RegexEngine: Send + Sync {
    /// Compiled artifact, shared read-only across worker threads.
    type Program: Send + Sync;

    /// Per-thread mutable execution state (backtrack stack and the like).
    type Scratch: Send;

    fn compile(&self, pattern: &str, flags: &RegexFlags) -> Result<Self::Program, CompileError>;

    fn new_scratch(&self) -> Self::Scratch;

    /// Run `program` against `subject`, streaming events into `sink`.
    fn execute(
        &self,
        program: &Self::Program,
        scratch: &mut Self::Scratch,
        subject: SubjectRef<'_>,
        sink: &mut dyn CoverageSink,
    ) -> Result<MatchStatus, ExecError>;

    /// The compiled bytecode for one width, if the engine has it.
    fn bytecode<'p>(&self, program: &'p Self::Program, width: Width) -> Option<&'p [u8]>;
}

/// Result of one adapted execution.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub matched: bool,
    pub coverage: CoverageMap,
    /// The execution blew through `max_total`; the map holds the partial
    /// trace up to that point.
    pub budget_exceeded: bool,
}

struct ExecSink<'a> {
    map: &'a mut CoverageMap,
    max_total: Option<u64>,
}

impl CoverageSink for ExecSink<'_> {
    fn cover(&mut self, src: u32, dst: u32) {
        self.map.record_edge(src, dst);
    }

    fn cover_self(&mut self, pc: u32) {
        self.map.record_self_edge(pc);
    }

    fn suggest(&mut self, src: u32, dst: u32, ch: u16, pos: i32) {
        self.map.record_suggestion(src, dst, ch, pos);
    }

    fn cursor(&mut self, pos: u32) {
        self.map.set_last_cursor_pos(pos);
    }

    fn over_budget(&self) -> bool {
        self.max_total.is_some_and(|limit| self.map.total() > limit)
    }
}

const PRIMING_ONE_BYTE: &[u8] = b"0123";
// Greek small letter gamma forces a genuinely two-byte subject.
const PRIMING_TWO_BYTE: &[u16] = &[0x03b3, 0x0031, 0x0032, 0x0033];

/// A compiled pattern plus the engine that runs it.
pub struct MatcherAdapter<E: RegexEngine> {
    engine: E,
    program: E::Program,
    scratch_pool: Mutex<Vec<E::Scratch>>,
}

impl<E: RegexEngine> MatcherAdapter<E> {
    /// Compile `pattern` and prime it once per requested width so the
    /// engine commits to supporting each. A width without bytecode, or a
    /// priming run that records no branches at all, is a compile failure:
    /// there is nothing for the fuzzer to drive.
    pub fn compile(
        engine: E,
        pattern: &str,
        flags: &RegexFlags,
        widths: &[Width],
    ) -> Result<Self, CompileError> {
        let program = engine.compile(pattern, flags)?;
        let adapter = Self {
            engine,
            program,
            scratch_pool: Mutex::new(Vec::new()),
        };
        for &width in widths {
            if adapter.bytecode(width).is_none() {
                return Err(CompileError::NoBytecode(width));
            }
            let subject = match width {
                Width::One => SubjectRef::OneByte(PRIMING_ONE_BYTE),
                Width::Two => SubjectRef::TwoByte(PRIMING_TWO_BYTE),
            };
            let outcome = adapter.execute(subject, None)?;
            if outcome.coverage.total() == 0 {
                return Err(CompileError::TrivialMatcher);
            }
        }
        Ok(adapter)
    }

    /// Execute against one subject. The coverage map is produced by value;
    /// nothing is communicated through shared state.
    pub fn execute(
        &self,
        subject: SubjectRef<'_>,
        max_total: Option<u64>,
    ) -> Result<ExecutionOutcome, ExecError> {
        let mut scratch = {
            let mut pool = self.scratch_pool.lock().unwrap();
            pool.pop()
        }
        .unwrap_or_else(|| self.engine.new_scratch());

        let mut coverage = CoverageMap::new();
        let status = {
            let mut sink = ExecSink {
                map: &mut coverage,
                max_total,
            };
            self.engine
                .execute(&self.program, &mut scratch, subject, &mut sink)
        };

        self.scratch_pool.lock().unwrap().push(scratch);

        let status = status?;
        Ok(ExecutionOutcome {
            matched: status == MatchStatus::Match,
            budget_exceeded: status == MatchStatus::BudgetExceeded,
            coverage,
        })
    }

    pub fn bytecode(&self, width: Width) -> Option<&[u8]> {
        self.engine.bytecode(&self.program, width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays a scripted edge trace; enough engine to test the adapter.
    struct ScriptEngine {
        edges: Vec<(u32, u32)>,
        demote_two_byte: bool,
        scratches_made: AtomicUsize,
    }

    impl ScriptEngine {
        fn new(edges: Vec<(u32, u32)>) -> Self {
            Self {
                edges,
                demote_two_byte: false,
                scratches_made: AtomicUsize::new(0),
            }
        }
    }

    impl RegexEngine for ScriptEngine {
        type Program = Vec<u8>;
        type Scratch = ();

        fn compile(&self, pattern: &str, _flags: &RegexFlags) -> Result<Vec<u8>, CompileError> {
            if pattern.is_empty() {
                return Err(CompileError::Rejected("empty".into()));
            }
            Ok(vec![0x01, 0, 0, 0])
        }

        fn new_scratch(&self) {
            self.scratches_made.fetch_add(1, Ordering::SeqCst);
        }

        fn execute(
            &self,
            _program: &Vec<u8>,
            _scratch: &mut (),
            subject: SubjectRef<'_>,
            sink: &mut dyn CoverageSink,
        ) -> Result<MatchStatus, ExecError> {
            if self.demote_two_byte && subject.width() == Width::Two {
                return Err(ExecError::WidthDemoted);
            }
            for &(src, dst) in &self.edges {
                sink.cover(src, dst);
                if sink.over_budget() {
                    return Ok(MatchStatus::BudgetExceeded);
                }
            }
            sink.cursor(subject.len() as u32);
            Ok(MatchStatus::Match)
        }

        fn bytecode<'p>(&self, program: &'p Vec<u8>, _width: Width) -> Option<&'p [u8]> {
            Some(program)
        }
    }

    fn both_widths() -> Vec<Width> {
        vec![Width::One, Width::Two]
    }

    #[test]
    fn test_compile_and_prime() {
        let engine = ScriptEngine::new(vec![(8, 16), (16, 32)]);
        let adapter =
            MatcherAdapter::compile(engine, "a+", &RegexFlags::default(), &both_widths()).unwrap();
        assert!(adapter.bytecode(Width::One).is_some());
    }

    #[test]
    fn test_trivial_matcher_rejected() {
        let engine = ScriptEngine::new(Vec::new());
        let err = MatcherAdapter::compile(engine, "a", &RegexFlags::default(), &both_widths())
            .err()
            .unwrap();
        assert!(matches!(err, CompileError::TrivialMatcher));
    }

    #[test]
    fn test_demotion_surfaces_at_priming() {
        let mut engine = ScriptEngine::new(vec![(8, 16)]);
        engine.demote_two_byte = true;
        let err = MatcherAdapter::compile(engine, "a", &RegexFlags::default(), &both_widths())
            .err()
            .unwrap();
        assert!(matches!(err, CompileError::Priming(ExecError::WidthDemoted)));
    }

    #[test]
    fn test_execute_produces_coverage_by_value() {
        let engine = ScriptEngine::new(vec![(8, 16), (16, 32), (8, 16)]);
        let adapter =
            MatcherAdapter::compile(engine, "a", &RegexFlags::default(), &[Width::One]).unwrap();

        let outcome = adapter.execute(SubjectRef::OneByte(b"xyz"), None).unwrap();
        assert!(outcome.matched);
        assert!(!outcome.budget_exceeded);
        assert_eq!(outcome.coverage.total(), 3);
        assert_eq!(outcome.coverage.last_cursor_pos(), Some(3));

        // A second execution starts from a fresh map.
        let again = adapter.execute(SubjectRef::OneByte(b"xyz"), None).unwrap();
        assert_eq!(again.coverage.total(), 3);
        assert_eq!(again.coverage.path_hash(), outcome.coverage.path_hash());
    }

    #[test]
    fn test_budget_exceeded_keeps_partial_map() {
        let edges: Vec<(u32, u32)> = (0..100).map(|i| (i * 8, i * 8 + 8)).collect();
        let engine = ScriptEngine::new(edges);
        let adapter =
            MatcherAdapter::compile(engine, "a", &RegexFlags::default(), &[Width::One]).unwrap();

        let outcome = adapter
            .execute(SubjectRef::OneByte(b"xyz"), Some(10))
            .unwrap();
        assert!(outcome.budget_exceeded);
        assert!(!outcome.matched);
        assert_eq!(outcome.coverage.total(), 11);
    }

    #[test]
    fn test_scratch_pool_recycles() {
        let engine = ScriptEngine::new(vec![(8, 16)]);
        let adapter =
            MatcherAdapter::compile(engine, "a", &RegexFlags::default(), &[Width::One]).unwrap();
        for _ in 0..10 {
            adapter.execute(SubjectRef::OneByte(b"q"), None).unwrap();
        }
        // One scratch for priming, recycled ever after.
        assert_eq!(adapter.engine.scratches_made.load(Ordering::SeqCst), 1);
    }
}
