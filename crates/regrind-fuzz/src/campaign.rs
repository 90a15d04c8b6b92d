//! One fuzzing campaign: a single `(length, width)` pair with its own
//! corpus, work queue, RNG, and stall accounting.
//!
//! A campaign is born seeded (a buffer of `'a'`s executed once to prime
//! coverage and mine interesting characters) and then advances in bounded
//! work steps under a scheduler. Everything below the campaign level is
//! swallowed inside the step: a width-demoted child is dropped silently, a
//! budget-blowing child is the discovery the whole run is looking for.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::config::{N_CHILDREN, REPORT_INTERVAL, WORK_SLICE};
use crate::corpus::{Corpus, CorpusEntry};
use crate::interesting::extract_interesting;
use crate::matcher::{ExecError, MatcherAdapter, RegexEngine};
use crate::progress::{CampaignSummary, ProgressEvent, RetireReason, SlowestSummary};
use crate::queue::WorkQueue;
use crate::unit::{escape_units, CodeUnit, Width};

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("seed execution failed: {0}")]
    SeedFailure(#[from] ExecError),
}

/// Shared per-step context handed down by the scheduler.
pub struct StepCtx<'a> {
    pub max_total: Option<u64>,
    pub deadline: Option<Instant>,
    pub stop: &'a AtomicBool,
}

impl StepCtx<'_> {
    fn cancelled(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// What one work step reported back.
#[derive(Debug, Default)]
pub struct StepOutcome {
    /// A child exceeded the coverage-total bound; the run is done.
    pub budget_found: bool,
}

#[derive(Debug, Default)]
struct CampaignStats {
    executions: u64,
    execs_since_report: u64,
    generations: u64,
}

/// Width-erased view of a campaign, so one scheduler list can hold both
/// one-byte and two-byte campaigns.
pub trait CampaignRunner: Send {
    fn width(&self) -> Width;
    fn length(&self) -> u32;
    fn seed(&mut self, text_seeds: &[String]) -> Result<(), CampaignError>;
    fn run_step(&mut self, ctx: &StepCtx<'_>) -> StepOutcome;
    fn stall_accum(&self) -> Duration;
    fn maybe_progress(&mut self, run_elapsed: Duration, debug_mode: bool) -> Option<ProgressEvent>;
    fn summarize(&self, reason: RetireReason) -> CampaignSummary;
}

pub struct FuzzCampaign<C: CodeUnit, E: RegexEngine> {
    length: u32,
    adapter: Arc<MatcherAdapter<E>>,
    corpus: Corpus<C>,
    queue: WorkQueue,
    rng: ChaCha8Rng,
    stats: CampaignStats,
    stall_accum: Duration,
    last_report: Option<Instant>,
}

impl<C: CodeUnit, E: RegexEngine> FuzzCampaign<C, E> {
    pub fn new(length: u32, adapter: Arc<MatcherAdapter<E>>, rng: ChaCha8Rng) -> Self {
        Self {
            length,
            adapter,
            corpus: Corpus::new(),
            queue: WorkQueue::new(),
            rng,
            stats: CampaignStats::default(),
            stall_accum: Duration::ZERO,
            last_report: None,
        }
    }

    fn slowest_summary(&self) -> Option<SlowestSummary> {
        self.corpus.maximizing_entry().map(|e| SlowestSummary {
            escaped: escape_units(e.buf()),
            total: e.coverage().total(),
        })
    }

    /// Execute one child and fold the outcome into the corpus. Returns
    /// true when the child blew the execution budget.
    fn evaluate_child(&mut self, child: Box<[C]>, max_total: Option<u64>) -> bool {
        let outcome = match self.adapter.execute(C::as_subject(&child), max_total) {
            Ok(outcome) => outcome,
            Err(ExecError::WidthDemoted) => return false,
            Err(e) => {
                debug!("dropping child after engine fault: {}", e);
                return false;
            }
        };

        self.stats.executions += 1;
        self.stats.execs_since_report += 1;

        let mut coverage = outcome.coverage;
        coverage.bucketize();
        self.corpus.bump_staleness(&coverage);

        let keep = outcome.budget_exceeded
            || (self.corpus.has_new_path(&coverage) && !self.corpus.is_redundant(&coverage));
        if keep {
            self.corpus.add_suggested_chars(&coverage);
            self.corpus.record(CorpusEntry::new(child, coverage));
        }
        outcome.budget_exceeded
    }

    pub fn corpus(&self) -> &Corpus<C> {
        &self.corpus
    }

    pub fn executions(&self) -> u64 {
        self.stats.executions
    }
}

impl<C: CodeUnit, E: RegexEngine> CampaignRunner for FuzzCampaign<C, E> {
    fn width(&self) -> Width {
        C::WIDTH
    }

    fn length(&self) -> u32 {
        self.length
    }

    /// Establish the baseline corpus: the all-`'a'` subject, plus any text
    /// seeds of matching length, then one flush and a pass of the
    /// interesting-char miner over the compiled bytecode.
    fn seed(&mut self, text_seeds: &[String]) -> Result<(), CampaignError> {
        let baseline: Vec<C> = vec![C::from_u32('a' as u32); self.length as usize];
        let mut outcome = self
            .adapter
            .execute(C::as_subject(&baseline), None)
            .map_err(CampaignError::SeedFailure)?;
        outcome.coverage.bucketize();
        self.corpus
            .record(CorpusEntry::new(baseline.into_boxed_slice(), outcome.coverage));

        for seed in text_seeds {
            let units = C::units_of_str(seed);
            if units.len() != self.length as usize {
                warn!(
                    "skipping text seed of {} units for {} len={}",
                    units.len(),
                    C::WIDTH,
                    self.length
                );
                continue;
            }
            match self.adapter.execute(C::as_subject(&units), None) {
                Ok(mut outcome) => {
                    outcome.coverage.bucketize();
                    self.corpus
                        .record(CorpusEntry::new(units.into_boxed_slice(), outcome.coverage));
                }
                Err(e) => warn!("text seed execution failed: {}", e),
            }
        }

        self.corpus.flush_generation();

        if let Some(code) = self.adapter.bytecode(C::WIDTH) {
            let mined = extract_interesting::<C>(code);
            debug!(
                "{} len={}: mined {} interesting chars",
                C::WIDTH,
                self.length,
                mined.len()
            );
            self.corpus.set_interesting(mined);
        }
        Ok(())
    }

    fn run_step(&mut self, ctx: &StepCtx<'_>) -> StepOutcome {
        let mut step_start = Instant::now();
        let mut budget_found = false;

        'step: while step_start.elapsed() < WORK_SLICE && !ctx.cancelled() {
            if !self.queue.has_next() {
                let before = self.corpus.flushed_len();
                self.corpus.flush_generation();
                self.stats.generations += 1;
                if self.corpus.flushed_len() > before {
                    self.stall_accum = Duration::ZERO;
                    step_start = Instant::now();
                }
                self.queue.fill(&self.corpus, &mut self.rng);
                if !self.queue.has_next() {
                    break;
                }
            }

            let parent_idx = match self.queue.pop() {
                Some(idx) => idx,
                None => break,
            };
            let children = self
                .corpus
                .generate_children(parent_idx, N_CHILDREN, &mut self.rng);
            for child in children {
                if ctx.cancelled() {
                    break 'step;
                }
                if self.evaluate_child(child, ctx.max_total) {
                    budget_found = true;
                    break 'step;
                }
            }
        }

        self.stall_accum += step_start.elapsed();
        StepOutcome { budget_found }
    }

    fn stall_accum(&self) -> Duration {
        self.stall_accum
    }

    fn maybe_progress(&mut self, run_elapsed: Duration, debug_mode: bool) -> Option<ProgressEvent> {
        let now = Instant::now();
        let interval = match self.last_report {
            None => run_elapsed,
            Some(last) => now.duration_since(last),
        };
        if self.last_report.is_some() && interval < REPORT_INTERVAL {
            return None;
        }

        let secs = interval.as_secs_f64();
        let execs_per_sec = if secs > 0.0 {
            self.stats.execs_since_report as f64 / secs
        } else {
            0.0
        };
        self.stats.execs_since_report = 0;
        self.last_report = Some(now);

        Some(ProgressEvent {
            width: C::WIDTH,
            length: self.length,
            elapsed_secs: run_elapsed.as_secs_f64(),
            execs_per_sec,
            corpus_size: self.corpus.flushed_len(),
            generations: self.stats.generations,
            slowest: self.slowest_summary(),
            upper_bound_residency: self.corpus.upper_bound().residency(),
            corpus_bytes: debug_mode.then(|| self.corpus.memory_footprint()),
        })
    }

    fn summarize(&self, reason: RetireReason) -> CampaignSummary {
        CampaignSummary {
            width: C::WIDTH,
            length: self.length,
            corpus_size: self.corpus.flushed_len(),
            generations: self.stats.generations,
            executions: self.stats.executions,
            slowest: self.slowest_summary(),
            retired: reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegexFlags;
    use crate::matcher::{CompileError, CoverageSink, MatchStatus};
    use crate::unit::SubjectRef;
    use rand::SeedableRng;

    /// Coverage depends on subject content: one edge per distinct unit
    /// value, hit once per occurrence, so mutated children keep finding
    /// "new behavior".
    struct ContentEngine;

    impl RegexEngine for ContentEngine {
        type Program = Vec<u8>;
        type Scratch = ();

        fn compile(&self, _pattern: &str, _flags: &RegexFlags) -> Result<Vec<u8>, CompileError> {
            let mut b = regrind_bytecode::ProgramBuilder::new();
            let t = b.new_label();
            b.check_char(b'a' as u32, t);
            b.bind(t);
            b.succeed();
            Ok(b.finish())
        }

        fn new_scratch(&self) {}

        fn execute(
            &self,
            _program: &Vec<u8>,
            _scratch: &mut (),
            subject: SubjectRef<'_>,
            sink: &mut dyn CoverageSink,
        ) -> Result<MatchStatus, ExecError> {
            for i in 0..subject.len() {
                let unit = subject.unit(i);
                sink.cover(unit * 8, unit * 8 + 8);
                if sink.over_budget() {
                    return Ok(MatchStatus::BudgetExceeded);
                }
            }
            Ok(MatchStatus::NoMatch)
        }

        fn bytecode<'p>(&self, program: &'p Vec<u8>, _width: Width) -> Option<&'p [u8]> {
            Some(program)
        }
    }

    fn adapter() -> Arc<MatcherAdapter<ContentEngine>> {
        Arc::new(
            MatcherAdapter::compile(ContentEngine, "a", &RegexFlags::default(), &[Width::One])
                .unwrap(),
        )
    }

    fn campaign(length: u32) -> FuzzCampaign<u8, ContentEngine> {
        FuzzCampaign::new(length, adapter(), ChaCha8Rng::seed_from_u64(1234))
    }

    fn unlimited_ctx(stop: &AtomicBool) -> StepCtx<'_> {
        StepCtx {
            max_total: None,
            deadline: None,
            stop,
        }
    }

    #[test]
    fn test_seed_establishes_baseline() {
        let mut c = campaign(8);
        c.seed(&[]).unwrap();
        assert_eq!(c.corpus().flushed_len(), 1);
        assert_eq!(c.corpus().entry(0).buf(), b"aaaaaaaa");
        assert!(c.corpus().entry(0).coverage().total() > 0);
        // The miner saw the CheckChar('a') in the stub bytecode.
        assert_eq!(c.corpus().interesting(), &[b'a']);
    }

    #[test]
    fn test_seed_accepts_matching_length_text_seeds() {
        let mut c = campaign(4);
        c.seed(&["wxyz".into(), "toolong".into()]).unwrap();
        // Baseline plus the one seed of matching length.
        assert_eq!(c.corpus().flushed_len(), 2);
    }

    #[test]
    fn test_work_step_grows_corpus() {
        let mut c = campaign(6);
        c.seed(&[]).unwrap();
        let stop = AtomicBool::new(false);
        c.run_step(&unlimited_ctx(&stop));
        assert!(c.executions() > 0);
        // Content-sensitive coverage means mutations keep finding novelty.
        assert!(c.corpus().flushed_len() + c.corpus().pending_len() > 1);
    }

    #[test]
    fn test_budget_violation_stops_step_and_records() {
        let mut c = campaign(6);
        c.seed(&[]).unwrap();
        let stop = AtomicBool::new(false);
        let ctx = StepCtx {
            max_total: Some(2),
            deadline: None,
            stop: &stop,
        };
        let outcome = c.run_step(&ctx);
        assert!(outcome.budget_found);
        // The violating child landed in the corpus as a discovery.
        assert!(c.corpus().pending_len() > 0 || c.corpus().flushed_len() > 1);
    }

    #[test]
    fn test_stop_flag_cancels_step() {
        let mut c = campaign(6);
        c.seed(&[]).unwrap();
        let stop = AtomicBool::new(true);
        let before = Instant::now();
        c.run_step(&unlimited_ctx(&stop));
        assert!(before.elapsed() < WORK_SLICE);
        assert_eq!(c.executions(), 0);
    }

    #[test]
    fn test_progress_event_shape() {
        let mut c = campaign(5);
        c.seed(&[]).unwrap();
        let stop = AtomicBool::new(false);
        c.run_step(&unlimited_ctx(&stop));

        let event = c.maybe_progress(Duration::from_secs(1), true).unwrap();
        assert_eq!(event.length, 5);
        assert_eq!(event.width, Width::One);
        assert!(event.execs_per_sec > 0.0);
        assert!(event.upper_bound_residency > 0.0);
        assert!(event.corpus_bytes.is_some());
        assert!(event.slowest.is_some());

        // Immediately asking again is rate-limited.
        assert!(c.maybe_progress(Duration::from_secs(1), true).is_none());
    }

    #[test]
    fn test_summarize() {
        let mut c = campaign(5);
        c.seed(&[]).unwrap();
        let summary = c.summarize(RetireReason::Deadline);
        assert_eq!(summary.length, 5);
        assert_eq!(summary.corpus_size, 1);
        assert_eq!(summary.retired, RetireReason::Deadline);
        assert_eq!(summary.slowest.as_ref().unwrap().escaped, "aaaaa");
    }
}
