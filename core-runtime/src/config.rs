//! # Runtime Configuration Module
//!
//! Provides configuration management for the relay runtime.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a
//! `RuntimeConfig` holding the settings shared by every channel in a
//! process: the event bus capacity, the channel name used when a role does
//! not name one, and the logging setup. The builder validates eagerly so a
//! misconfigured host fails at startup rather than on first use.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::RuntimeConfig;
//! use core_runtime::logging::{LogFormat, LoggingConfig};
//!
//! let config = RuntimeConfig::builder()
//!     .event_buffer_size(256)
//!     .default_channel("camera")
//!     .logging(LoggingConfig::default().with_format(LogFormat::Compact))
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.default_channel, "camera");
//! let bus = config.event_bus();
//! assert_eq!(bus.subscriber_count(), 0);
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::RuntimeConfig;
//!
//! // An empty channel name can never be attached to.
//! let config = RuntimeConfig::builder()
//!     .default_channel("")
//!     .build()
//!     .expect("Should fail - empty channel name");
//! ```

use crate::error::{Error, Result};
use crate::events::{EventBus, DEFAULT_EVENT_BUFFER_SIZE};
use crate::logging::LoggingConfig;

/// Channel name used when a role is not configured with one.
pub const DEFAULT_CHANNEL: &str = "default";

/// Upper bound on the event bus capacity.
pub const MAX_EVENT_BUFFER_SIZE: usize = 10_000;

/// Process-wide relay configuration.
///
/// Use [`RuntimeConfigBuilder`] to construct instances.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Capacity of the relay event bus
    pub event_buffer_size: usize,

    /// Channel name used when none is configured
    pub default_channel: String,

    /// Logging and tracing setup
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Creates a new builder for constructing a `RuntimeConfig`.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Event buffer size is within 1..=10,000
    /// - Default channel name is not empty or surrounded by whitespace
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size > MAX_EVENT_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "Event buffer size exceeds maximum of {}",
                MAX_EVENT_BUFFER_SIZE
            )));
        }

        if self.default_channel.is_empty() {
            return Err(Error::Config(
                "Default channel name cannot be empty".to_string(),
            ));
        }

        if self.default_channel.trim() != self.default_channel {
            return Err(Error::Config(format!(
                "Default channel name '{}' has leading or trailing whitespace",
                self.default_channel
            )));
        }

        Ok(())
    }

    /// Creates an event bus sized by this configuration.
    pub fn event_bus(&self) -> EventBus {
        EventBus::new(self.event_buffer_size)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
            default_channel: DEFAULT_CHANNEL.to_string(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Builder for constructing [`RuntimeConfig`] instances.
///
/// Unset values fall back to the defaults; [`build()`](RuntimeConfigBuilder::build)
/// validates the result.
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    event_buffer_size: Option<usize>,
    default_channel: Option<String>,
    logging: Option<LoggingConfig>,
}

impl RuntimeConfigBuilder {
    /// Sets the relay event bus capacity.
    ///
    /// Default: 100
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::RuntimeConfig;
    ///
    /// let builder = RuntimeConfig::builder().event_buffer_size(500);
    /// ```
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Sets the channel name used when a role does not name one.
    ///
    /// Default: `"default"`
    pub fn default_channel(mut self, channel: impl Into<String>) -> Self {
        self.default_channel = Some(channel.into());
        self
    }

    /// Sets the logging configuration.
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Builds the final `RuntimeConfig` instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the resulting configuration fails
    /// [`RuntimeConfig::validate`].
    pub fn build(self) -> Result<RuntimeConfig> {
        let config = RuntimeConfig {
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            default_channel: self
                .default_channel
                .unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
            logging: self.logging.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogFormat, LogLevel};

    #[test]
    fn test_builder_defaults() {
        let config = RuntimeConfig::builder().build().unwrap();

        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert_eq!(config.default_channel, "default");
    }

    #[test]
    fn test_default_matches_builder() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_channel, DEFAULT_CHANNEL);
    }

    #[test]
    fn test_builder_with_custom_values() {
        let config = RuntimeConfig::builder()
            .event_buffer_size(512)
            .default_channel("camera")
            .logging(
                LoggingConfig::default()
                    .with_format(LogFormat::Json)
                    .with_level(LogLevel::Debug),
            )
            .build()
            .unwrap();

        assert_eq!(config.event_buffer_size, 512);
        assert_eq!(config.default_channel, "camera");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_validate_rejects_zero_buffer_size() {
        let result = RuntimeConfig::builder().event_buffer_size(0).build();

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("must be greater than 0"));
    }

    #[test]
    fn test_validate_rejects_excessive_buffer_size() {
        let result = RuntimeConfig::builder().event_buffer_size(20_000).build();

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_validate_accepts_boundary_buffer_sizes() {
        assert!(RuntimeConfig::builder().event_buffer_size(1).build().is_ok());
        assert!(RuntimeConfig::builder()
            .event_buffer_size(MAX_EVENT_BUFFER_SIZE)
            .build()
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_channel() {
        let result = RuntimeConfig::builder().default_channel("").build();

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_validate_rejects_padded_channel() {
        let result = RuntimeConfig::builder().default_channel(" cam ").build();

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("whitespace"));
    }

    #[test]
    fn test_event_bus_uses_configured_capacity() {
        let config = RuntimeConfig::builder().event_buffer_size(4).build().unwrap();
        let bus = config.event_bus();
        let _sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_config_is_cloneable() {
        let config = RuntimeConfig::builder()
            .default_channel("mic")
            .build()
            .unwrap();

        let cloned = config.clone();
        assert_eq!(cloned.default_channel, config.default_channel);
        assert_eq!(cloned.event_buffer_size, config.event_buffer_size);
    }
}
