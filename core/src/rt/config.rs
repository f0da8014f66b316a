use std::time::Duration;

pub const TIMEOUT_ENV: &str = "BLOCKRT_TIMEOUT_MS";
pub const CATCH_ERRORS_ENV: &str = "BLOCKRT_CATCH_ERRORS";

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Scheduler knobs shared by every process a [`super::ThreadManager`] starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Wall-clock budget of one `run_step` burst.
    pub timeout: Duration,
    /// Turn evaluation errors into a terminated, flagged process instead of
    /// returning them from `step()`.
    pub catch_errors: bool,
    /// Broadcasts leave already-running listener scripts alone instead of
    /// restarting them.
    pub thread_safe: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            catch_errors: true,
            thread_safe: false,
        }
    }
}

impl SchedulerConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_catch_errors(mut self, catch_errors: bool) -> Self {
        self.catch_errors = catch_errors;
        self
    }

    pub fn with_thread_safe(mut self, thread_safe: bool) -> Self {
        self.thread_safe = thread_safe;
        self
    }

    /// Defaults overridden by `BLOCKRT_TIMEOUT_MS` and `BLOCKRT_CATCH_ERRORS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`SchedulerConfig::from_env`], reading variables through `lookup`.
    /// Unparseable timeouts are ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(ms) = lookup(TIMEOUT_ENV).and_then(|raw| raw.trim().parse::<u64>().ok()) {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup(CATCH_ERRORS_ENV) {
            config.catch_errors = env_toggle_enabled(&raw);
        }
        config
    }
}

/// Empty, `0`, `false` and `off` (any case) disable a toggle.
pub fn env_toggle_enabled(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }
    !(trimmed == "0" || trimmed.eq_ignore_ascii_case("false") || trimmed.eq_ignore_ascii_case("off"))
}

