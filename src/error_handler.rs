use std::time::Duration;
use tokio::time::sleep;

/// Bounded exponential backoff for retryable I/O.
///
/// Delays double on every attempt starting from `base_delay_secs` and are
/// capped at `max_delay_secs`. Once `max_retries` sleeps have been taken,
/// further calls fail with [`RetriesExhausted`].
#[derive(Debug)]
pub struct ExponentialBackoff {
    base_delay_secs: u64,
    max_delay_secs: u64,
    max_retries: u32,
    current_attempt: u32,
}

#[derive(Debug)]
pub struct RetriesExhausted {
    pub attempts: u32,
}

impl std::fmt::Display for RetriesExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "maximum retry attempts exceeded ({})", self.attempts)
    }
}

impl std::error::Error for RetriesExhausted {}

impl ExponentialBackoff {
    pub fn new(base_delay_secs: u64, max_delay_secs: u64, max_retries: u32) -> Self {
        Self {
            base_delay_secs,
            max_delay_secs,
            max_retries,
            current_attempt: 0,
        }
    }

    /// Delay the next sleep would take, without taking it.
    pub fn next_delay(&self) -> Duration {
        let doubled = self
            .base_delay_secs
            .saturating_mul(2_u64.saturating_pow(self.current_attempt));
        Duration::from_secs(doubled.min(self.max_delay_secs))
    }

    pub async fn sleep(&mut self) -> Result<(), RetriesExhausted> {
        if self.current_attempt >= self.max_retries {
            return Err(RetriesExhausted {
                attempts: self.current_attempt,
            });
        }

        let delay = self.next_delay();

        log::warn!(
            "⏳ Retry attempt {} of {} in {}s",
            self.current_attempt + 1,
            self.max_retries,
            delay.as_secs()
        );

        sleep(delay).await;
        self.current_attempt += 1;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_attempt() {
        let mut backoff = ExponentialBackoff::new(2, 60, 5);

        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        backoff.current_attempt = 1;
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        backoff.current_attempt = 2;
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_is_capped() {
        let mut backoff = ExponentialBackoff::new(2, 10, 20);
        backoff.current_attempt = 10;
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_sleep_fails_after_max_retries() {
        let mut backoff = ExponentialBackoff::new(0, 0, 2);

        assert!(backoff.sleep().await.is_ok());
        assert!(backoff.sleep().await.is_ok());
        let err = backoff.sleep().await.unwrap_err();
        assert_eq!(err.attempts, 2);
    }

    #[tokio::test]
    async fn test_reset_restores_budget() {
        let mut backoff = ExponentialBackoff::new(0, 0, 1);

        assert!(backoff.sleep().await.is_ok());
        assert!(backoff.sleep().await.is_err());

        backoff.reset();
        assert!(backoff.sleep().await.is_ok());
    }
}
