use std::time::Duration;

use crate::core::EngineConfig;
use crate::Error;

/// Builder for [`EngineConfig`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use shardis::core::builder::EngineConfigBuilder;
///
/// let config = EngineConfigBuilder::new()
///     .retry_attempts(3)
///     .retry_interval(Duration::from_millis(1500))
///     .response_timeout(Duration::from_secs(3))
///     .build()
///     .unwrap();
/// assert_eq!(config.retry_attempts, 3);
/// ```
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    retry_attempts: Option<u32>,
    retry_interval: Option<Duration>,
    response_timeout: Option<Duration>,
}

impl EngineConfigBuilder {
    /// Creates a new [`EngineConfigBuilder`] instance.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of retry attempts after the initial one.
    ///
    /// # Arguments
    ///
    /// * `attempts` - Retries paced by the retry interval before the
    ///   dispatch fails with a retry-exhausted error
    #[inline]
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    /// Sets the pacing interval between dispatch attempts.
    ///
    /// # Arguments
    ///
    /// * `interval` - Time an attempt may spend acquiring a connection and
    ///   writing before it is replaced by the next attempt
    #[inline]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = Some(interval);
        self
    }

    /// Sets the server response timeout, measured from write completion.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum time to wait for the server's reply
    #[inline]
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    /// Builds the [`EngineConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the retry interval or response
    /// timeout is zero.
    pub fn build(self) -> Result<EngineConfig, Error> {
        let defaults = EngineConfig::default();
        let config = EngineConfig {
            retry_attempts: self.retry_attempts.unwrap_or(defaults.retry_attempts),
            retry_interval: self.retry_interval.unwrap_or(defaults.retry_interval),
            response_timeout: self.response_timeout.unwrap_or(defaults.response_timeout),
        };

        if config.retry_interval.is_zero() {
            return Err(Error::InvalidArgument {
                message: "retry interval must be non-zero".to_string(),
            });
        }
        if config.response_timeout.is_zero() {
            return Err(Error::InvalidArgument {
                message: "response timeout must be non-zero".to_string(),
            });
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = EngineConfigBuilder::new().build().unwrap();
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_interval, Duration::from_millis(1500));
        assert_eq!(config.response_timeout, Duration::from_millis(3000));
    }

    #[test]
    fn test_builder_chaining() {
        let config = EngineConfigBuilder::new()
            .retry_attempts(5)
            .retry_interval(Duration::from_millis(100))
            .response_timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.retry_interval, Duration::from_millis(100));
        assert_eq!(config.response_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_builder_zero_retry_interval() {
        let result = EngineConfigBuilder::new()
            .retry_interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn test_builder_zero_response_timeout() {
        let result = EngineConfigBuilder::new()
            .response_timeout(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn test_builder_zero_attempts_allowed() {
        let config = EngineConfigBuilder::new().retry_attempts(0).build().unwrap();
        assert_eq!(config.retry_attempts, 0);
    }
}
