use chrono::{DateTime, Duration, Utc};

/// Minutes to wait after the 1st, 2nd, 3rd and 4th failed attempt. Later
/// failures keep the last step.
const RETRY_STEPS_MINUTES: [i64; 4] = [1, 5, 15, 60];

/// Delay before the next attempt after `attempt` consecutive failures.
pub fn retry_delay(attempt: u32) -> Duration {
    let index = (attempt.max(1) as usize - 1).min(RETRY_STEPS_MINUTES.len() - 1);
    Duration::minutes(RETRY_STEPS_MINUTES[index])
}

/// When an entry whose `attempt`-th attempt failed at `failed_at` becomes
/// eligible again.
pub fn next_attempt_at(failed_at: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
    failed_at + retry_delay(attempt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_steps_then_holds() {
        let minutes: Vec<i64> = (1..=8).map(|n| retry_delay(n).num_minutes()).collect();
        assert_eq!(minutes, vec![1, 5, 15, 60, 60, 60, 60, 60]);
    }

    #[test]
    fn test_zero_is_treated_as_first_failure() {
        assert_eq!(retry_delay(0), Duration::minutes(1));
    }

    #[test]
    fn test_next_attempt_is_measured_from_failure() {
        let failed_at = Utc::now();
        assert_eq!(
            next_attempt_at(failed_at, 3),
            failed_at + Duration::minutes(15)
        );
    }
}
