//! Run options.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Default number of concurrent provisioner calls.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Whether a run deploys or only previews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    #[default]
    Apply,
    WhatIf,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Apply => "apply",
            RunMode::WhatIf => "what-if",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "apply" => Some(RunMode::Apply),
            "what-if" | "whatif" | "what_if" => Some(RunMode::WhatIf),
            _ => None,
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options controlling a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub mode: RunMode,
    pub skip_validate: bool,
    pub max_concurrency: usize,
    /// Limit for each provisioner call
    pub call_timeout: Option<Duration>,
    /// Limit for the whole run; checked between batches
    pub run_timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Apply,
            skip_validate: false,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            call_timeout: None,
            run_timeout: None,
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn skip_validate(mut self, skip: bool) -> Self {
        self.skip_validate = skip;
        self
    }

    /// Values below one are raised to one.
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }
}

/// Shared flag requesting that a run stop before its next batch.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Why a run stopped before finishing its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interruption {
    Cancelled,
    DeadlineExceeded,
}

impl Interruption {
    /// Whether a run should stop now. Cancellation wins over the deadline.
    pub fn check(cancel: &CancelHandle, deadline: Option<Instant>) -> Option<Interruption> {
        if cancel.is_cancelled() {
            Some(Interruption::Cancelled)
        } else if deadline.map_or(false, |d| Instant::now() >= d) {
            Some(Interruption::DeadlineExceeded)
        } else {
            None
        }
    }
}

impl fmt::Display for Interruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interruption::Cancelled => write!(f, "cancelled"),
            Interruption::DeadlineExceeded => write!(f, "run deadline exceeded"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!(RunMode::from_str("What-If"), Some(RunMode::WhatIf));
        assert_eq!(RunMode::from_str("apply"), Some(RunMode::Apply));
        assert_eq!(RunMode::from_str("destroy"), None);
        assert_eq!(RunMode::WhatIf.to_string(), "what-if");
    }

    #[test]
    fn test_interruption_check() {
        let cancel = CancelHandle::new();
        assert_eq!(Interruption::check(&cancel, None), None);

        let passed = Instant::now();
        assert_eq!(
            Interruption::check(&cancel, Some(passed)),
            Some(Interruption::DeadlineExceeded)
        );
        let later = Instant::now() + Duration::from_secs(3600);
        assert_eq!(Interruption::check(&cancel, Some(later)), None);

        cancel.cancel();
        assert_eq!(
            Interruption::check(&cancel, Some(passed)),
            Some(Interruption::Cancelled)
        );
    }

    #[test]
    fn test_options_builder() {
        let options = RunOptions::new()
            .mode(RunMode::WhatIf)
            .max_concurrency(0)
            .call_timeout(Duration::from_secs(30));

        assert_eq!(options.mode, RunMode::WhatIf);
        assert_eq!(options.max_concurrency, 1);
        assert_eq!(options.call_timeout, Some(Duration::from_secs(30)));
        assert!(options.run_timeout.is_none());
        assert!(!options.skip_validate);
    }

    #[test]
    fn test_cancel_handle_is_shared() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_cancelled());
        clone.cancel();
        assert!(handle.is_cancelled());
    }
}
