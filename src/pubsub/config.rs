//! Broker and subscriber configuration

use std::time::Duration;

use crate::connection::ConnectionConfig;

/// Broker options
#[derive(Debug, Clone, Default)]
pub struct BrokerConfig {
    /// Settings for each reverse connection to a subscriber
    pub subscriber_connection: ConnectionConfig,
}

impl BrokerConfig {
    /// Set the reverse connection settings
    pub fn subscriber_connection(mut self, config: ConnectionConfig) -> Self {
        self.subscriber_connection = config;
        self
    }
}

/// Subscriber options
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Settings for the connection to the broker
    pub broker_connection: ConnectionConfig,

    /// Interval between keep-alive registrations
    pub reregister_interval: Duration,

    /// Consecutive failed registrations before the broker connection is
    /// rebuilt
    pub reset_threshold: u32,

    /// Fixed identifier instead of a generated UUID
    pub identifier: Option<String>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            broker_connection: ConnectionConfig::default(),
            reregister_interval: Duration::from_secs(5),
            reset_threshold: 1,
            identifier: None,
        }
    }
}

impl SubscriberConfig {
    /// Set the broker connection settings
    pub fn broker_connection(mut self, config: ConnectionConfig) -> Self {
        self.broker_connection = config;
        self
    }

    /// Set the re-registration interval
    pub fn reregister_interval(mut self, interval: Duration) -> Self {
        self.reregister_interval = interval;
        self
    }

    /// Set the reset threshold (at least 1)
    pub fn reset_threshold(mut self, threshold: u32) -> Self {
        self.reset_threshold = threshold.max(1);
        self
    }

    /// Use a fixed identifier
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_subscriber_config() {
        let config = SubscriberConfig::default();

        assert_eq!(config.reregister_interval, Duration::from_secs(5));
        assert_eq!(config.reset_threshold, 1);
        assert!(config.identifier.is_none());
        assert_eq!(config.broker_connection.retry_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_builder_reset_threshold_floor() {
        let config = SubscriberConfig::default().reset_threshold(0);
        assert_eq!(config.reset_threshold, 1);

        let config = config.reset_threshold(3);
        assert_eq!(config.reset_threshold, 3);
    }

    #[test]
    fn test_broker_config_connection() {
        let config = BrokerConfig::default()
            .subscriber_connection(ConnectionConfig::default().max_attempts(5));

        assert_eq!(config.subscriber_connection.max_attempts, Some(5));
    }
}
