//! Worker loop state machines.
//!
//! The counters driving the circuit breaker, session rotation, and
//! supervisor backoff live in explicit structs with pure transition
//! methods so each rule can be asserted directly in tests.

use std::time::Duration;

/// Per-run state of the worker loop.
///
/// `no_task` polls never touch either counter; only handled tasks
/// (success or error) and iteration exceptions do.
#[derive(Debug, Default)]
pub struct WorkerState {
    consecutive_failures: u32,
    session_task_count: u32,
}

impl WorkerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any success wipes the failure streak, whatever its length.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Record one failed iteration and return the streak length.
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures += 1;
        self.consecutive_failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record one handled task (success or error, never `no_task`)
    /// against the current browser session; returns the new count.
    pub fn record_task_handled(&mut self) -> u32 {
        self.session_task_count += 1;
        self.session_task_count
    }

    pub fn session_task_count(&self) -> u32 {
        self.session_task_count
    }

    /// Called after a session rotation.
    pub fn reset_session_count(&mut self) {
        self.session_task_count = 0;
    }
}

/// Supervisor restart backoff: doubles on each consecutive crash,
/// capped, and resets after a clean loop completion.
#[derive(Debug)]
pub struct RestartBackoff {
    initial: Duration,
    max: Duration,
    delay: Duration,
}

impl RestartBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            delay: initial,
        }
    }

    /// Delay to sleep before the next restart after a crash. The
    /// internal delay doubles (capped) for the crash after this one.
    pub fn on_crash(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (self.delay * 2).min(self.max);
        delay
    }

    /// A clean (non-crash) loop completion restarts immediately and
    /// resets the escalation.
    pub fn on_clean_exit(&mut self) {
        self.delay = self.initial;
    }

    pub fn current_delay(&self) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_streak_counts_up() {
        let mut state = WorkerState::new();
        assert_eq!(state.record_failure(), 1);
        assert_eq!(state.record_failure(), 2);
        assert_eq!(state.record_failure(), 3);
    }

    #[test]
    fn test_success_resets_failures_from_any_count() {
        let mut state = WorkerState::new();
        state.record_failure();
        state.record_failure();
        state.record_success();
        assert_eq!(state.consecutive_failures(), 0);
        // A lone failure after recovery starts a fresh streak.
        assert_eq!(state.record_failure(), 1);
    }

    #[test]
    fn test_session_count_independent_of_failures() {
        let mut state = WorkerState::new();
        state.record_failure();
        assert_eq!(state.record_task_handled(), 1);
        state.record_success();
        assert_eq!(state.record_task_handled(), 2);
        state.reset_session_count();
        assert_eq!(state.session_task_count(), 0);
        assert_eq!(state.consecutive_failures(), 0);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff =
            RestartBackoff::new(Duration::from_secs(5), Duration::from_secs(60));
        assert_eq!(backoff.on_crash(), Duration::from_secs(5));
        assert_eq!(backoff.on_crash(), Duration::from_secs(10));
        assert_eq!(backoff.on_crash(), Duration::from_secs(20));
        assert_eq!(backoff.on_crash(), Duration::from_secs(40));
        assert_eq!(backoff.on_crash(), Duration::from_secs(60));
        assert_eq!(backoff.on_crash(), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_resets_after_clean_exit() {
        let mut backoff =
            RestartBackoff::new(Duration::from_secs(5), Duration::from_secs(60));
        backoff.on_crash();
        backoff.on_crash();
        backoff.on_clean_exit();
        assert_eq!(backoff.on_crash(), Duration::from_secs(5));
    }
}
