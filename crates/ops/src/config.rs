use std::str::FromStr;
use std::time::Duration;

/// What a batch does when confirmations do not arrive in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Log the unconfirmed names and return normally.
    #[default]
    Warn,
    Fail,
}

impl FromStr for TimeoutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(TimeoutPolicy::Warn),
            "fail" => Ok(TimeoutPolicy::Fail),
            other => Err(format!("unknown timeout policy `{}` (expected warn|fail)", other)),
        }
    }
}

/// What an install batch does when a store call fails for one definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    #[default]
    Abort,
    /// Log, record the name as failed and carry on with the rest.
    Continue,
}

impl FromStr for FaultPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(FaultPolicy::Abort),
            "continue" => Ok(FaultPolicy::Continue),
            other => Err(format!("unknown fault policy `{}` (expected abort|continue)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub confirm_timeout: Duration,
    pub timeout_policy: TimeoutPolicy,
    pub install_faults: FaultPolicy,
    /// Bounded wait for a controller to stop after the shutdown signal.
    pub drain: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            confirm_timeout: Duration::from_secs(60),
            timeout_policy: TimeoutPolicy::Warn,
            install_faults: FaultPolicy::Abort,
            drain: Duration::from_secs(30),
        }
    }
}

impl ProtocolConfig {
    /// Defaults overridden by `KOPE_CONFIRM_TIMEOUT_SECS`, `KOPE_TIMEOUT_POLICY`,
    /// `KOPE_INSTALL_FAULTS` and `KOPE_DRAIN_SECS`. Unparsable values keep the default.
    pub fn from_env() -> Self {
        let d = Self::default();
        let secs = |key: &str, fallback: Duration| {
            std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok()).map(Duration::from_secs).unwrap_or(fallback)
        };
        Self {
            confirm_timeout: secs("KOPE_CONFIRM_TIMEOUT_SECS", d.confirm_timeout),
            timeout_policy: std::env::var("KOPE_TIMEOUT_POLICY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(d.timeout_policy),
            install_faults: std::env::var("KOPE_INSTALL_FAULTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(d.install_faults),
            drain: secs("KOPE_DRAIN_SECS", d.drain),
        }
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }

    pub fn with_install_faults(mut self, policy: FaultPolicy) -> Self {
        self.install_faults = policy;
        self
    }

    pub fn with_drain(mut self, drain: Duration) -> Self {
        self.drain = drain;
        self
    }
}
