//! Transaction configuration

use std::time::Duration;

/// Default overall transaction timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Per-run transaction configuration
///
/// The timeout bounds the whole transaction: attempts are retried until the
/// deadline elapses, never a fixed number of times.
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Overall deadline for the transaction, retries included
    pub timeout: Duration,
}

impl TransactionConfig {
    /// Configuration with the default timeout
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the overall timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeout() {
        assert_eq!(TransactionConfig::default().timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_timeout_override() {
        let config = TransactionConfig::new().timeout(Duration::from_millis(100));
        assert_eq!(config.timeout, Duration::from_millis(100));
    }
}
