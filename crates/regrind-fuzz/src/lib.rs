//! Coverage-guided fuzzing engine hunting catastrophic regex backtracking.
//!
//! Given a compiled pattern and a set of fixed subject lengths, the engine
//! searches the space of byte (or two-byte code unit) strings for the
//! inputs that drive an instrumented regex interpreter through the most
//! work, AFL-style:
//!
//! ```text
//! 1. Seed each (length, width) campaign with "aaa...a", execute, keep the
//!    coverage map, and mine interesting characters from the bytecode
//! 2. Refill the work queue from the corpus: one representative per
//!    covered edge plus a staleness-biased sample of the rest
//! 3. Pop a parent, generate 200 mutated children, execute each
//! 4. Bucketize coverage; keep children that push past the corpus's
//!    upper bound and aren't whole-trace duplicates
//! 5. Flush the generation, update the upper bound and staleness, repeat
//!    until the stall budget or the global deadline runs out
//! ```
//!
//! The host regex engine stays behind the [`matcher::RegexEngine`] trait;
//! it compiles patterns, executes subjects, and streams `(src_pc, dst_pc)`
//! branch events into the coverage map. The slowest input found is
//! reported through [`progress::FuzzReport`].
//!
//! # Module structure
//!
//! - [`coverage`] — edge-hit map, bucketization, chained path hash
//! - [`unit`] — one-byte/two-byte code-unit abstraction
//! - [`mutate`] — the mutation operators and their dispatch mixture
//! - [`interesting`] — static interesting-char mining from bytecode
//! - [`corpus`] — flushed/pending entries, upper bound, staleness
//! - [`queue`] — per-generation parent selection
//! - [`matcher`] — the engine boundary and the matcher adapter
//! - [`campaign`] — one (length, width) fuzzing campaign
//! - [`scheduler`] — the worker pool driving all campaigns
//! - [`config`] / [`progress`] — run configuration and observer events
//!
//! Runs are deterministic for a fixed seed and a single worker thread;
//! with more workers, campaign interleaving is scheduler-dependent but
//! each campaign's RNG stream is still seed-stable.

pub mod campaign;
pub mod config;
pub mod corpus;
pub mod coverage;
pub mod interesting;
pub mod matcher;
pub mod mutate;
pub mod progress;
pub mod queue;
pub mod scheduler;
pub mod unit;

pub use config::{ConfigError, FuzzConfig, RegexFlags};
pub use coverage::{CoverageMap, Suggestion, MAP_SIZE};
pub use matcher::{
    CompileError, CoverageSink, ExecError, ExecutionOutcome, MatchStatus, MatcherAdapter,
    RegexEngine,
};
pub use progress::{
    format_report, CampaignSummary, FuzzReport, NullObserver, ProgressEvent, ProgressObserver,
    RetireReason,
};
pub use scheduler::{fuzz, FuzzError};
pub use unit::{CodeUnit, SubjectRef, Width};
