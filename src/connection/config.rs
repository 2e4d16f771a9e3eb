//! Connection configuration

use std::time::Duration;

/// Outbound connection options
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Fixed delay between connection attempts (no backoff)
    pub retry_interval: Duration,

    /// Give up and close after this many failed attempts (None = retry forever)
    pub max_attempts: Option<u32>,

    /// Budget for each of the send and receive halves of a request
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            max_attempts: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectionConfig {
    /// Set the retry interval
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Close after `max` failed attempts
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    /// Retry forever
    pub fn unlimited_attempts(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();

        assert_eq!(config.retry_interval, Duration::from_secs(1));
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_builder_max_attempts() {
        let config = ConnectionConfig::default().max_attempts(3);
        assert_eq!(config.max_attempts, Some(3));

        let config = config.unlimited_attempts();
        assert_eq!(config.max_attempts, None);
    }

    #[test]
    fn test_builder_intervals() {
        let config = ConnectionConfig::default()
            .retry_interval(Duration::from_millis(50))
            .timeout(Duration::from_millis(200));

        assert_eq!(config.retry_interval, Duration::from_millis(50));
        assert_eq!(config.timeout, Duration::from_millis(200));
    }
}
