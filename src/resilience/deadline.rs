use crate::error::{GuardError, GuardResult};
use std::time::Duration;
use tokio::time::Instant;

/// Upper bound on how far ahead a deadline is placed
pub const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Absolute point in time by which a request must finish.
///
/// Built on the tokio clock so paused-time tests advance it deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    /// Deadline `timeout` from now, saturating at [`FAR_FUTURE`] past now for huge timeouts
    pub fn after(timeout: Duration) -> Self {
        let now = Instant::now();
        Self(
            now.checked_add(timeout)
                .unwrap_or_else(|| now + FAR_FUTURE),
        )
    }

    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Whether work starting `delay` from now would begin before the deadline
    pub fn allows(&self, delay: Duration) -> bool {
        Instant::now()
            .checked_add(delay)
            .is_some_and(|start| start < self.0)
    }

    /// Fail with a deadline error naming `stage` if already expired
    pub fn check(&self, stage: &str) -> GuardResult<()> {
        if self.is_expired() {
            Err(GuardError::deadline_exceeded(stage))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expires_with_the_tokio_clock() {
        let deadline = Deadline::after(Duration::from_secs(2));
        assert!(!deadline.is_expired());
        assert!(deadline.allows(Duration::from_secs(1)));
        assert!(!deadline.allows(Duration::from_secs(3)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
        assert!(deadline.check("waiting").unwrap_err().is_deadline_exceeded());
    }

    #[tokio::test(start_paused = true)]
    async fn huge_durations_do_not_overflow() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(!deadline.allows(Duration::MAX));
        assert!(!deadline.allows(Duration::from_secs(u64::MAX)));

        let unbounded = Deadline::after(Duration::MAX);
        assert!(!unbounded.is_expired());
        assert!(unbounded.remaining() <= FAR_FUTURE);
        assert!(unbounded.allows(Duration::from_secs(3_600)));
    }
}
