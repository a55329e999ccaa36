//! Retry policy: decides retry vs. give up after a failed delivery.

/// What to do with a task after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the task back at the tail of the queue.
    Requeue,
    /// Mark the task Failed and drop it.
    GiveUp,
}

/// Retry policy for failed deliveries.
///
/// `retry_count` counts failures, so a task that always fails is attempted
/// `max_retries + 1` times in total. Retried tasks go straight back to the
/// tail of the queue with no extra delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Decide based on the retry count *after* the failure was recorded.
    ///
    /// Example with max_retries=3:
    /// - retry_count 1, 2, 3: requeue
    /// - retry_count 4: give up
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count <= self.max_retries {
            RetryDecision::Requeue
        } else {
            RetryDecision::GiveUp
        }
    }

    /// Total delivery attempts a permanently failing task gets.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_policy_allows_three_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.max_attempts(), 4);
    }

    #[rstest]
    #[case(1, RetryDecision::Requeue)]
    #[case(2, RetryDecision::Requeue)]
    #[case(3, RetryDecision::GiveUp)]
    #[case(10, RetryDecision::GiveUp)]
    fn decides_by_retry_count(#[case] retry_count: u32, #[case] expected: RetryDecision) {
        let policy = RetryPolicy::new(2);
        assert_eq!(policy.decide(retry_count), expected);
    }

    #[test]
    fn zero_retries_gives_up_on_first_failure() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.decide(1), RetryDecision::GiveUp);
        assert_eq!(policy.max_attempts(), 1);
    }
}
