//! CLI driver for the regrind slow-regex fuzzer.
//!
//! # Usage
//!
//! ```bash
//! # Fuzz one pattern at a few subject lengths for a minute
//! regrind '\d+1\d+2' --lengths 10,20,40 --timeout-secs 60
//!
//! # Both code-unit widths, stop as soon as an execution gets expensive
//! regrind 'a(b|c+)+d' --lengths 30 --widths 1,2 --max-total 1000000
//!
//! # Deterministic run with JSON output
//! regrind 'foo+' --lengths 12 --seed 7 --timeout-secs 10 --json
//! ```

use clap::Parser;
use regrind_fuzz::progress::{CampaignSummary, ProgressEvent, ProgressObserver};
use regrind_fuzz::{format_report, fuzz, FuzzConfig, RegexFlags, Width};
use regrind_vm::BacktrackEngine;

#[derive(Parser)]
#[command(name = "regrind")]
#[command(about = "Coverage-guided search for catastrophic regex backtracking")]
#[command(version)]
struct Cli {
    /// Regular expression source.
    pattern: String,

    /// Regex flags, any of g i m s u y (sticky y is ignored).
    #[arg(short, long, default_value = "")]
    flags: String,

    /// Subject lengths to fuzz, comma separated; one campaign per length
    /// per width.
    #[arg(short, long, value_delimiter = ',', required = true)]
    lengths: Vec<u32>,

    /// Code-unit widths to fuzz (1, 2, or 1,2).
    #[arg(short, long, value_delimiter = ',', default_values_t = [1u8])]
    widths: Vec<u8>,

    /// Global wall-clock budget in seconds (-1 = unlimited).
    #[arg(short, long, default_value_t = -1)]
    timeout_secs: i32,

    /// Per-campaign no-progress budget in seconds (-1 = unlimited).
    #[arg(long, default_value_t = -1)]
    stall_secs: i32,

    /// Per-execution coverage-total bound; exceeding it ends the run
    /// successfully (-1 = unlimited).
    #[arg(short, long, default_value_t = -1)]
    max_total: i64,

    /// Worker thread count.
    #[arg(short = 'j', long, default_value_t = 1)]
    threads: u16,

    /// RNG seed; 0 = nondeterministic.
    #[arg(short, long, default_value_t = 0)]
    seed: u32,

    /// Extra initial corpus entry (repeatable); must match a campaign
    /// length to be used.
    #[arg(long = "text-seed")]
    text_seeds: Vec<String>,

    /// Per-slice diagnostics.
    #[arg(short, long)]
    debug: bool,

    /// Emit the final report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

/// Streams one line per progress event to stderr.
struct StderrObserver;

impl ProgressObserver for StderrObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        let slowest = event
            .slowest
            .as_ref()
            .map(|s| format!("slowest \"{}\" total={}", s.escaped, s.total))
            .unwrap_or_else(|| "slowest none".to_string());
        let mut line = format!(
            "{} len={} | {:7.1}s | {:9.0} exec/s | corpus {:4} | gen {:3} | residency {:5.2}% | {}",
            event.width,
            event.length,
            event.elapsed_secs,
            event.execs_per_sec,
            event.corpus_size,
            event.generations,
            event.upper_bound_residency * 100.0,
            slowest
        );
        if let Some(bytes) = event.corpus_bytes {
            line.push_str(&format!(" | mem {}kb", bytes / 1024));
        }
        eprintln!("{}", line);
    }

    fn on_campaign_retired(&self, summary: &CampaignSummary) {
        eprintln!(
            "{} len={} retired ({:?}) after {} executions",
            summary.width, summary.length, summary.retired, summary.executions
        );
    }
}

fn parse_widths(raw: &[u8]) -> Result<Vec<Width>, String> {
    let mut widths = Vec::new();
    for &w in raw {
        let width = match w {
            1 => Width::One,
            2 => Width::Two,
            other => return Err(format!("unsupported code-unit width {}", other)),
        };
        if !widths.contains(&width) {
            widths.push(width);
        }
    }
    Ok(widths)
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let flags = match RegexFlags::parse(&cli.flags) {
        Ok(flags) => flags,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let widths = match parse_widths(&cli.widths) {
        Ok(widths) => widths,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let config = FuzzConfig {
        pattern: cli.pattern,
        flags,
        lengths: cli.lengths,
        widths,
        timeout_secs: cli.timeout_secs,
        stall_secs: cli.stall_secs,
        max_total: cli.max_total,
        n_threads: cli.threads,
        seed: cli.seed,
        text_seeds: cli.text_seeds,
        debug: cli.debug,
    };

    eprintln!("Fuzzing /{}/ at lengths {:?}", config.pattern, config.lengths);
    eprintln!(
        "  widths: {:?}  threads: {}  seed: {}  timeout: {}s  stall: {}s  max-total: {}",
        config.widths.iter().map(|w| w.bytes()).collect::<Vec<_>>(),
        config.n_threads,
        config.seed,
        config.timeout_secs,
        config.stall_secs,
        config.max_total,
    );

    let report = match fuzz(&config, BacktrackEngine, &StderrObserver) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: failed to serialize report: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        println!("{}", format_report(&report));
    }

    // Startup failures (every campaign dead before its first work step)
    // are the only nonzero exit; a deadline or a max-total discovery is a
    // successful run.
    if !report.any_started() {
        eprintln!("Error: no campaign could be seeded");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_widths() {
        assert_eq!(parse_widths(&[1]).unwrap(), vec![Width::One]);
        assert_eq!(parse_widths(&[1, 2, 1]).unwrap(), vec![Width::One, Width::Two]);
        assert!(parse_widths(&[3]).is_err());
    }

    #[test]
    fn test_cli_parses_typical_invocations() {
        let cli = Cli::try_parse_from([
            "regrind",
            "\\d+1\\d+2",
            "--lengths",
            "10,20",
            "--widths",
            "1,2",
            "--timeout-secs",
            "30",
            "--seed",
            "7",
        ])
        .unwrap();
        assert_eq!(cli.pattern, "\\d+1\\d+2");
        assert_eq!(cli.lengths, vec![10, 20]);
        assert_eq!(cli.widths, vec![1, 2]);
        assert_eq!(cli.timeout_secs, 30);
        assert_eq!(cli.seed, 7);
    }

    #[test]
    fn test_lengths_required() {
        assert!(Cli::try_parse_from(["regrind", "a+"]).is_err());
    }
}
