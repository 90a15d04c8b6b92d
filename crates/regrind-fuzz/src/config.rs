//! Typed configuration for a fuzzing run.

use std::time::Duration;

use thiserror::Error;

use crate::unit::Width;

/// Children generated per popped parent.
pub const N_CHILDREN: usize = 200;

/// How long one campaign may hold a worker before yielding.
pub const WORK_SLICE: Duration = Duration::from_millis(100);

/// Minimum interval between progress events per campaign.
pub const REPORT_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("regex pattern is empty")]
    EmptyPattern,

    #[error("unknown regex flag '{0}'")]
    UnknownFlag(char),

    #[error("no subject lengths given")]
    NoLengths,

    #[error("subject length {0} outside [1, 65535]")]
    LengthOutOfRange(u32),

    #[error("no code-unit width selected")]
    NoWidths,

    #[error("worker thread count must be at least 1")]
    ZeroThreads,
}

/// Parsed regex flags. `y` (sticky) is accepted and ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegexFlags {
    pub global: bool,
    pub ignore_case: bool,
    pub multiline: bool,
    pub dot_all: bool,
    pub unicode: bool,
}

impl RegexFlags {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let mut flags = RegexFlags::default();
        for c in s.chars() {
            match c {
                'g' => flags.global = true,
                'i' => flags.ignore_case = true,
                'm' => flags.multiline = true,
                's' => flags.dot_all = true,
                'u' => flags.unicode = true,
                'y' => log::warn!("sticky flag 'y' is ignored"),
                other => return Err(ConfigError::UnknownFlag(other)),
            }
        }
        Ok(flags)
    }
}

/// Everything the engine needs for one run. `-1` means "unlimited" for the
/// three budget fields.
#[derive(Debug, Clone)]
pub struct FuzzConfig {
    /// Regular expression source.
    pub pattern: String,
    /// Parsed flag set.
    pub flags: RegexFlags,
    /// One campaign per length per enabled width.
    pub lengths: Vec<u32>,
    /// Code-unit widths to fuzz.
    pub widths: Vec<Width>,
    /// Global wall-clock budget in seconds.
    pub timeout_secs: i32,
    /// Per-campaign no-progress budget in seconds.
    pub stall_secs: i32,
    /// Per-execution coverage-total bound. Exceeding it ends the whole run
    /// successfully: the interesting input was found.
    pub max_total: i64,
    /// Worker thread count.
    pub n_threads: u16,
    /// RNG seed; 0 means nondeterministic.
    pub seed: u32,
    /// Extra initial corpus entries beyond the `'a'...'a'` baseline.
    pub text_seeds: Vec<String>,
    /// Per-slice diagnostics.
    pub debug: bool,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            flags: RegexFlags::default(),
            lengths: Vec::new(),
            widths: vec![Width::One],
            timeout_secs: -1,
            stall_secs: -1,
            max_total: -1,
            n_threads: 1,
            seed: 0,
            text_seeds: Vec::new(),
            debug: false,
        }
    }
}

impl FuzzConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pattern.is_empty() {
            return Err(ConfigError::EmptyPattern);
        }
        if self.lengths.is_empty() {
            return Err(ConfigError::NoLengths);
        }
        for &len in &self.lengths {
            if !(1..=65535).contains(&len) {
                return Err(ConfigError::LengthOutOfRange(len));
            }
        }
        if self.widths.is_empty() {
            return Err(ConfigError::NoWidths);
        }
        if self.n_threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs >= 0).then(|| Duration::from_secs(self.timeout_secs as u64))
    }

    pub fn stall_limit(&self) -> Option<Duration> {
        (self.stall_secs >= 0).then(|| Duration::from_secs(self.stall_secs as u64))
    }

    pub fn max_total(&self) -> Option<u64> {
        (self.max_total >= 0).then(|| self.max_total as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> FuzzConfig {
        FuzzConfig {
            pattern: "a+b".into(),
            lengths: vec![10],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert_eq!(valid().validate(), Ok(()));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let mut c = valid();
        c.pattern.clear();
        assert_eq!(c.validate(), Err(ConfigError::EmptyPattern));
    }

    #[test]
    fn test_length_bounds() {
        let mut c = valid();
        c.lengths = vec![0];
        assert_eq!(c.validate(), Err(ConfigError::LengthOutOfRange(0)));
        c.lengths = vec![65536];
        assert_eq!(c.validate(), Err(ConfigError::LengthOutOfRange(65536)));
        c.lengths = vec![];
        assert_eq!(c.validate(), Err(ConfigError::NoLengths));
        c.lengths = vec![1, 65535];
        assert_eq!(c.validate(), Ok(()));
    }

    #[test]
    fn test_widths_and_threads() {
        let mut c = valid();
        c.widths.clear();
        assert_eq!(c.validate(), Err(ConfigError::NoWidths));
        c = valid();
        c.n_threads = 0;
        assert_eq!(c.validate(), Err(ConfigError::ZeroThreads));
    }

    #[test]
    fn test_flag_parsing() {
        let flags = RegexFlags::parse("gimsu").unwrap();
        assert!(flags.global && flags.ignore_case && flags.multiline);
        assert!(flags.dot_all && flags.unicode);

        // Sticky is tolerated but has no effect.
        assert_eq!(RegexFlags::parse("y").unwrap(), RegexFlags::default());

        assert_eq!(RegexFlags::parse("x"), Err(ConfigError::UnknownFlag('x')));
    }

    #[test]
    fn test_unlimited_budgets() {
        let c = valid();
        assert_eq!(c.timeout(), None);
        assert_eq!(c.stall_limit(), None);
        assert_eq!(c.max_total(), None);

        let mut c = valid();
        c.timeout_secs = 5;
        c.max_total = 1000;
        assert_eq!(c.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(c.max_total(), Some(1000));
    }
}
