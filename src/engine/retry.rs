// ABOUTME: Retry policy for a task's own execution failures
// ABOUTME: Bounds the number of attempts; dependency failures never consume a retry

/// Bound on execution attempts for a task.
///
/// A task goes terminal `failed` on the failure that brings `fail_count` up
/// to `max_attempts`; with the default of 1, the first failure is final.
/// The policy applies only to the task's own execution failures - a failure
/// inherited from a dependency terminates the task immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Allow up to `max_attempts` executions. Zero is clamped to one, since
    /// every task gets at least one attempt.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// No retries: the first failure is terminal.
    pub fn none() -> Self {
        Self::new(1)
    }

    /// Whether a task with `fail_count` recorded failures may run again.
    pub fn should_retry(&self, fail_count: u32) -> bool {
        fail_count < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}
