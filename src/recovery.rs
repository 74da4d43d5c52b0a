use crate::config::RecoveryConfig;
use crate::error::DeviceError;
use std::time::Duration;
use tracing::{info, warn};

/// Reconnect backoff for the capture device.
///
/// There is no retry limit: an always-on camera keeps trying for as long as
/// the engine is running. Each failed attempt is reported as
/// `DeviceError::ReconnectExhausted` and answered with a delay.
#[derive(Debug, Clone)]
pub struct CameraRecovery {
    base_delay: Duration,
    max_delay: Duration,
    exponential_backoff: bool,
    attempts: u32,
}

impl CameraRecovery {
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms.max(config.backoff_ms)),
            exponential_backoff: config.exponential_backoff,
            attempts: 0,
        }
    }

    /// Record a failed reopen and return how long to wait before the next one
    pub fn handle_failure(&mut self, error: &DeviceError) -> Duration {
        self.attempts += 1;
        let delay = self.calculate_delay(self.attempts - 1);

        let exhausted = DeviceError::ReconnectExhausted {
            attempt: self.attempts,
            details: error.to_string(),
        };
        warn!("{}; retrying in {:?}", exhausted, delay);

        delay
    }

    /// Reset after a successful reconnection
    pub fn reset(&mut self) {
        if self.attempts > 0 {
            info!(
                "Camera recovered after {} failed attempt(s), reset backoff",
                self.attempts
            );
        }
        self.attempts = 0;
    }

    /// Failed attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn calculate_delay(&self, retry_count: u32) -> Duration {
        if !self.exponential_backoff {
            return self.base_delay;
        }

        let factor = 2u32.saturating_pow(retry_count.min(16));
        let delay = self.base_delay.saturating_mul(factor);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(exponential: bool) -> RecoveryConfig {
        RecoveryConfig {
            backoff_ms: 100,
            max_backoff_ms: 1000,
            exponential_backoff: exponential,
        }
    }

    #[test]
    fn test_fixed_backoff() {
        let mut recovery = CameraRecovery::new(&config(false));
        for _ in 0..10 {
            assert_eq!(
                recovery.handle_failure(&DeviceError::Disconnected),
                Duration::from_millis(100)
            );
        }
        assert_eq!(recovery.attempts(), 10);
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let mut recovery = CameraRecovery::new(&config(true));
        let delays: Vec<_> = (0..6)
            .map(|_| recovery.handle_failure(&DeviceError::NotOpen))
            .collect();

        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(400));
        assert_eq!(delays[3], Duration::from_millis(800));
        assert_eq!(delays[4], Duration::from_millis(1000));
        assert_eq!(delays[5], Duration::from_millis(1000));
    }

    #[test]
    fn test_reset_restarts_backoff() {
        let mut recovery = CameraRecovery::new(&config(true));
        recovery.handle_failure(&DeviceError::Disconnected);
        recovery.handle_failure(&DeviceError::Disconnected);
        recovery.reset();

        assert_eq!(recovery.attempts(), 0);
        assert_eq!(
            recovery.handle_failure(&DeviceError::Disconnected),
            Duration::from_millis(100)
        );
    }
}
