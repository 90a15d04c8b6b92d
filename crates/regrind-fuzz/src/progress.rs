//! Progress events, the observer boundary, and report formatting.

use serde::Serialize;

use crate::unit::Width;

/// The current slowest discovery of one campaign: its subject rendered
/// with `\xHH` / `\uHHHH` escapes, and the coverage total it reached.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlowestSummary {
    pub escaped: String,
    pub total: u64,
}

/// Emitted at each work interrupt, at most every ~500 ms per campaign.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub width: Width,
    pub length: u32,
    pub elapsed_secs: f64,
    pub execs_per_sec: f64,
    pub corpus_size: usize,
    pub generations: u64,
    pub slowest: Option<SlowestSummary>,
    pub upper_bound_residency: f64,
    /// Approximate corpus bytes; populated in debug mode only.
    pub corpus_bytes: Option<usize>,
}

/// Why a campaign left the scheduler.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum RetireReason {
    /// Global wall-clock budget elapsed.
    Deadline,
    /// No corpus growth within the per-campaign stall budget.
    Stalled,
    /// The priming corpus could not be established.
    SeedFailed,
    /// An execution blew the coverage-total bound; the run succeeded.
    BudgetFound,
}

/// End-of-life summary for one campaign.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignSummary {
    pub width: Width,
    pub length: u32,
    pub corpus_size: usize,
    pub generations: u64,
    pub executions: u64,
    pub slowest: Option<SlowestSummary>,
    pub retired: RetireReason,
}

/// Final report for the whole run.
#[derive(Debug, Clone, Serialize)]
pub struct FuzzReport {
    pub campaigns: Vec<CampaignSummary>,
    pub total_executions: u64,
    pub elapsed_secs: f64,
    /// Some execution exceeded `max_total`.
    pub budget_exceeded: bool,
}

impl FuzzReport {
    /// True when at least one campaign got past seeding.
    pub fn any_started(&self) -> bool {
        self.campaigns
            .iter()
            .any(|c| c.retired != RetireReason::SeedFailed)
    }

    /// The slowest discovery across all campaigns.
    pub fn slowest(&self) -> Option<&CampaignSummary> {
        self.campaigns
            .iter()
            .filter(|c| c.slowest.is_some())
            .max_by_key(|c| c.slowest.as_ref().map(|s| s.total))
    }
}

/// Receives engine progress. One shared observer serves all workers, so
/// implementations synchronize their own output.
pub trait ProgressObserver: Sync {
    fn on_progress(&self, _event: &ProgressEvent) {}
    fn on_campaign_retired(&self, _summary: &CampaignSummary) {}
}

/// Discards everything.
pub struct NullObserver;

impl ProgressObserver for NullObserver {}

/// Format a final report for human consumption.
pub fn format_report(report: &FuzzReport) -> String {
    let mut out = String::new();

    out.push_str("═══════════════════════════════════════════════════════════════════════\n");
    out.push_str("  regrind report\n");
    out.push_str("═══════════════════════════════════════════════════════════════════════\n\n");

    out.push_str(&format!("Elapsed:           {:.1}s\n", report.elapsed_secs));
    out.push_str(&format!("Total executions:  {}\n", report.total_executions));
    out.push_str(&format!("Campaigns:         {}\n", report.campaigns.len()));
    if report.budget_exceeded {
        out.push_str("Budget:            exceeded, a sufficiently slow input was found\n");
    }
    out.push('\n');

    for c in &report.campaigns {
        out.push_str(&format!(
            "─── {} len={} ───────────────────────────────────────────────────\n",
            c.width, c.length
        ));
        out.push_str(&format!("  Retired:     {:?}\n", c.retired));
        out.push_str(&format!("  Corpus:      {} entries\n", c.corpus_size));
        out.push_str(&format!("  Generations: {}\n", c.generations));
        out.push_str(&format!("  Executions:  {}\n", c.executions));
        match &c.slowest {
            Some(s) => {
                out.push_str(&format!("  Slowest:     \"{}\" total={}\n", s.escaped, s.total));
            }
            None => out.push_str("  Slowest:     none recorded\n"),
        }
    }

    if let Some(worst) = report.slowest() {
        let s = worst.slowest.as_ref().expect("filtered to Some");
        out.push_str(&format!(
            "\nSUMMARY {} len={} word=\"{}\" Total={}\n",
            worst.width, worst.length, s.escaped, s.total
        ));
    }

    out.push_str("═══════════════════════════════════════════════════════════════════════\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(width: Width, total: Option<u64>, retired: RetireReason) -> CampaignSummary {
        CampaignSummary {
            width,
            length: 8,
            corpus_size: 3,
            generations: 2,
            executions: 500,
            slowest: total.map(|t| SlowestSummary {
                escaped: "aaaa\\xff".into(),
                total: t,
            }),
            retired,
        }
    }

    #[test]
    fn test_report_formatting() {
        let report = FuzzReport {
            campaigns: vec![
                summary(Width::One, Some(120), RetireReason::Deadline),
                summary(Width::Two, Some(999), RetireReason::Stalled),
            ],
            total_executions: 1000,
            elapsed_secs: 2.5,
            budget_exceeded: false,
        };
        let text = format_report(&report);
        assert!(text.contains("Total executions:  1000"));
        assert!(text.contains("1-byte len=8"));
        assert!(text.contains("2-byte len=8"));
        assert!(text.contains("word=\"aaaa\\xff\" Total=999"));
    }

    #[test]
    fn test_slowest_picks_max_total() {
        let report = FuzzReport {
            campaigns: vec![
                summary(Width::One, Some(120), RetireReason::Deadline),
                summary(Width::Two, None, RetireReason::SeedFailed),
                summary(Width::Two, Some(999), RetireReason::Deadline),
            ],
            total_executions: 0,
            elapsed_secs: 0.0,
            budget_exceeded: false,
        };
        let worst = report.slowest().unwrap();
        assert_eq!(worst.slowest.as_ref().unwrap().total, 999);
    }

    #[test]
    fn test_any_started() {
        let all_failed = FuzzReport {
            campaigns: vec![summary(Width::One, None, RetireReason::SeedFailed)],
            total_executions: 0,
            elapsed_secs: 0.0,
            budget_exceeded: false,
        };
        assert!(!all_failed.any_started());

        let one_ran = FuzzReport {
            campaigns: vec![
                summary(Width::One, None, RetireReason::SeedFailed),
                summary(Width::One, Some(5), RetireReason::Deadline),
            ],
            total_executions: 10,
            elapsed_secs: 0.1,
            budget_exceeded: false,
        };
        assert!(one_ran.any_started());
    }

    #[test]
    fn test_report_serializes() {
        let report = FuzzReport {
            campaigns: vec![summary(Width::One, Some(1), RetireReason::BudgetFound)],
            total_executions: 1,
            elapsed_secs: 0.5,
            budget_exceeded: true,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"budget_exceeded\":true"));
        assert!(json.contains("\"width\":1"));
    }
}
