//! Tunable defaults for the conversation engine.
//!
//! Intentionally minimal: a plain struct with a `Default` impl, no
//! file-parsing dependency. Callers that want to load these from
//! TOML/YAML/env do so themselves and construct a `ChatterConfig` by hand.

/// Global tunables for the routing queue, agent manager, and context window.
///
/// # Example
///
/// ```rust
/// use agent_chatter::ChatterConfig;
///
/// let config = ChatterConfig::default();
/// assert_eq!(config.max_queue_size, 50);
/// ```
#[derive(Debug, Clone)]
pub struct ChatterConfig {
    /// Hard cap on pending routing items; past this, new items are dropped
    /// with a `queue_overflow` protection event.
    pub max_queue_size: usize,
    /// Per-parent-message cap; past this, further items for the same parent
    /// are demoted to `P3_EXTEND` rather than dropped.
    pub max_branch_size: usize,
    /// Maximum consecutive turns drawn from the local set before the
    /// scheduler forces a scan of the global set.
    pub max_local_seq: usize,
    /// Default agent turn timeout.
    pub default_agent_timeout: std::time::Duration,
    /// Upper bound an adapter override may raise `default_agent_timeout` to.
    pub max_agent_timeout: std::time::Duration,
    /// Number of most recent messages kept in the sliding context window.
    pub context_window_size: usize,
    /// Soft character cap for the current team task string.
    pub team_task_soft_cap: usize,
}

impl Default for ChatterConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 50,
            max_branch_size: 10,
            max_local_seq: 5,
            default_agent_timeout: std::time::Duration::from_secs(5 * 60),
            max_agent_timeout: std::time::Duration::from_secs(30 * 60),
            context_window_size: 5,
            team_task_soft_cap: 280,
        }
    }
}
