//! Client configuration surface.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::pool::PoolConfig;

/// Full tunable surface for a [`crate::client::Client`]. Construct via
/// [`ClientConfigBuilder`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub hosts: Vec<String>,
    pub send_receive_timeout: Duration,
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    pub socket_recycle_age: Duration,
    pub key_prefix: Vec<u8>,
    pub dead_server_retry_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let pool_defaults = PoolConfig::default();
        ClientConfig {
            hosts: Vec::new(),
            send_receive_timeout: pool_defaults.send_receive_timeout,
            min_pool_size: pool_defaults.min_pool_size,
            max_pool_size: pool_defaults.max_pool_size,
            socket_recycle_age: pool_defaults.socket_recycle_age,
            key_prefix: Vec::new(),
            dead_server_retry_interval: pool_defaults.dead_server_retry_interval,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_pool_size: self.min_pool_size,
            max_pool_size: self.max_pool_size,
            send_receive_timeout: self.send_receive_timeout,
            socket_recycle_age: self.socket_recycle_age,
            dead_server_retry_interval: self.dead_server_retry_interval,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(Error::Configuration("at least one host is required".into()));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(Error::Configuration(format!(
                "min_pool_size ({}) must be <= max_pool_size ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }
}

/// Builder for [`ClientConfig`], wiring together client-construction
/// tunables through a fluent setter chain.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn send_receive_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_receive_timeout = timeout;
        self
    }

    pub fn min_pool_size(mut self, size: usize) -> Self {
        self.config.min_pool_size = size;
        self
    }

    pub fn max_pool_size(mut self, size: usize) -> Self {
        self.config.max_pool_size = size;
        self
    }

    pub fn socket_recycle_age(mut self, age: Duration) -> Self {
        self.config.socket_recycle_age = age;
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    pub fn dead_server_retry_interval(mut self, interval: Duration) -> Self {
        self.config.dead_server_retry_interval = interval;
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = ClientConfig::default();
        assert_eq!(config.send_receive_timeout, Duration::from_millis(2000));
        assert_eq!(config.min_pool_size, 5);
        assert_eq!(config.max_pool_size, 10);
        assert_eq!(config.socket_recycle_age, Duration::from_secs(1800));
        assert!(config.key_prefix.is_empty());
    }

    #[test]
    fn rejects_min_greater_than_max() {
        let result = ClientConfig::builder()
            .hosts(["localhost:11211"])
            .min_pool_size(20)
            .max_pool_size(10)
            .build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn rejects_empty_hosts() {
        let result = ClientConfig::builder().build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn builder_accepts_equal_min_and_max() {
        let result = ClientConfig::builder()
            .hosts(["localhost:11211"])
            .min_pool_size(5)
            .max_pool_size(5)
            .build();
        assert!(result.is_ok());
    }
}
