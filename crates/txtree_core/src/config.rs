//! Hierarchy configuration.

/// How an out-of-order activation scope release is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeReleasePolicy {
    /// Pop the activation stack by one level, then report the error.
    #[default]
    AlwaysPop,
    /// Report the error and leave the activation stack untouched.
    Strict,
}

/// Configuration for a [`crate::TransactionArena`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Behavior of out-of-order activation scope releases.
    pub scope_release: ScopeReleasePolicy,

    /// Number of raised events each transaction keeps for inspection (0 = none).
    pub event_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scope_release: ScopeReleasePolicy::AlwaysPop,
            event_history: 256,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the out-of-order release policy.
    #[must_use]
    pub const fn scope_release(mut self, policy: ScopeReleasePolicy) -> Self {
        self.scope_release = policy;
        self
    }

    /// Sets how many events each transaction retains.
    #[must_use]
    pub const fn event_history(mut self, limit: usize) -> Self {
        self.event_history = limit;
        self
    }
}
