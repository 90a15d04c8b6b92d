//! The scheduler: a fixed worker pool time-slicing a rotating list of
//! campaigns.
//!
//! Campaigns live in a mutex-protected deque. A worker detaches the head,
//! runs one bounded work step with no locks held, then either re-attaches
//! the campaign at the tail or retires it (stall budget spent, global
//! deadline elapsed, or a budget-blowing discovery made). Idle workers
//! park on a condition variable; when the active count reaches zero every
//! worker is signaled to exit.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::campaign::{CampaignRunner, FuzzCampaign, StepCtx};
use crate::config::{ConfigError, FuzzConfig};
use crate::matcher::{CompileError, MatcherAdapter, RegexEngine};
use crate::progress::{FuzzReport, ProgressObserver, RetireReason};
use crate::unit::Width;

/// Errors that prevent a run from starting at all. Everything after
/// startup is reported through the [`FuzzReport`].
#[derive(Error, Debug)]
pub enum FuzzError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

struct WorkState {
    campaigns: VecDeque<Box<dyn CampaignRunner>>,
    active: usize,
    finished: Vec<crate::progress::CampaignSummary>,
    budget_found: bool,
}

struct Shared {
    state: Mutex<WorkState>,
    cv: Condvar,
    stop: AtomicBool,
}

/// Run a complete fuzzing session: compile once, seed one campaign per
/// `(length, width)` pair, then drive them to retirement.
pub fn fuzz<E: RegexEngine + 'static>(
    config: &FuzzConfig,
    engine: E,
    observer: &dyn ProgressObserver,
) -> Result<FuzzReport, FuzzError> {
    config.validate()?;

    let adapter = Arc::new(MatcherAdapter::compile(
        engine,
        &config.pattern,
        &config.flags,
        &config.widths,
    )?);

    let master_seed = if config.seed == 0 {
        rand::random::<u64>()
    } else {
        config.seed as u64
    };
    debug!("master seed {}", master_seed);

    let run_start = Instant::now();

    let mut campaigns: VecDeque<Box<dyn CampaignRunner>> = VecDeque::new();
    let mut finished = Vec::new();
    let mut campaign_index = 0u64;
    for &length in &config.lengths {
        for &width in &config.widths {
            let rng = ChaCha8Rng::seed_from_u64(
                master_seed.wrapping_add(campaign_index.wrapping_mul(0x9e37_79b9_7f4a_7c15)),
            );
            campaign_index += 1;

            let mut campaign: Box<dyn CampaignRunner> = match width {
                Width::One => Box::new(FuzzCampaign::<u8, E>::new(
                    length,
                    Arc::clone(&adapter),
                    rng,
                )),
                Width::Two => Box::new(FuzzCampaign::<u16, E>::new(
                    length,
                    Arc::clone(&adapter),
                    rng,
                )),
            };

            match campaign.seed(&config.text_seeds) {
                Ok(()) => {
                    info!("campaign {} len={} seeded", width, length);
                    campaigns.push_back(campaign);
                }
                Err(e) => {
                    // Campaign-local: the others keep going.
                    warn!("campaign {} len={} failed to start: {}", width, length, e);
                    finished.push(campaign.summarize(RetireReason::SeedFailed));
                }
            }
        }
    }

    let n_campaigns = campaigns.len();
    let n_workers = (config.n_threads as usize).min(n_campaigns);
    let deadline = config.timeout().map(|t| run_start + t);
    let stall_limit = config.stall_limit();
    let max_total = config.max_total();
    let debug_mode = config.debug;

    let shared = Shared {
        state: Mutex::new(WorkState {
            campaigns,
            active: n_campaigns,
            finished,
            budget_found: false,
        }),
        cv: Condvar::new(),
        stop: AtomicBool::new(false),
    };

    if n_workers > 0 {
        thread::scope(|scope| {
            for _ in 0..n_workers {
                scope.spawn(|| {
                    worker_loop(
                        &shared,
                        deadline,
                        stall_limit,
                        max_total,
                        debug_mode,
                        run_start,
                        observer,
                    )
                });
            }
        });
    }

    let state = shared.state.into_inner().unwrap();
    let total_executions = state.finished.iter().map(|c| c.executions).sum();
    Ok(FuzzReport {
        campaigns: state.finished,
        total_executions,
        elapsed_secs: run_start.elapsed().as_secs_f64(),
        budget_exceeded: state.budget_found,
    })
}

fn worker_loop(
    shared: &Shared,
    deadline: Option<Instant>,
    stall_limit: Option<Duration>,
    max_total: Option<u64>,
    debug_mode: bool,
    run_start: Instant,
    observer: &dyn ProgressObserver,
) {
    loop {
        // Detach the head campaign, or exit once nothing is active.
        let mut campaign = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.active == 0 {
                    return;
                }
                if let Some(c) = state.campaigns.pop_front() {
                    break c;
                }
                state = shared.cv.wait(state).unwrap();
            }
        };

        let mut retire = None;
        let expired =
            shared.stop.load(Ordering::Relaxed) || deadline.is_some_and(|d| Instant::now() >= d);
        if expired {
            retire = Some(RetireReason::Deadline);
        } else {
            let ctx = StepCtx {
                max_total,
                deadline,
                stop: &shared.stop,
            };
            let outcome = campaign.run_step(&ctx);

            if let Some(event) = campaign.maybe_progress(run_start.elapsed(), debug_mode) {
                observer.on_progress(&event);
            }

            if outcome.budget_found {
                shared.stop.store(true, Ordering::Relaxed);
                retire = Some(RetireReason::BudgetFound);
            } else if stall_limit.is_some_and(|limit| campaign.stall_accum() > limit) {
                retire = Some(RetireReason::Stalled);
            }
        }

        let mut state = shared.state.lock().unwrap();
        match retire {
            Some(reason) => {
                info!(
                    "campaign {} len={} retired: {:?}",
                    campaign.width(),
                    campaign.length(),
                    reason
                );
                let summary = campaign.summarize(reason);
                state.finished.push(summary.clone());
                if reason == RetireReason::BudgetFound {
                    state.budget_found = true;
                }
                state.active -= 1;
                shared.cv.notify_all();
                drop(state);
                observer.on_campaign_retired(&summary);
            }
            None => {
                state.campaigns.push_back(campaign);
                shared.cv.notify_one();
            }
        }
    }
}
