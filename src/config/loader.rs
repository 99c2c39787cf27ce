use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::channel::ChannelKind;

use super::types::Config;

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        debug!(path = %path.display(), "loading configuration");

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(yaml).context("failed to parse YAML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Ensure at least one channel is defined
        if self.channels.is_empty() {
            anyhow::bail!("at least one channel must be defined");
        }

        // Validate channel names and kinds are unique
        let mut channel_names = std::collections::HashSet::new();
        let mut channel_kinds = std::collections::HashSet::new();
        for channel in &self.channels {
            if !channel_names.insert(channel.name.as_str()) {
                anyhow::bail!("duplicate channel name: {}", channel.name);
            }
            if !channel_kinds.insert(channel.kind) {
                anyhow::bail!(
                    "duplicate channel kind: {} is configured more than once",
                    channel.kind.name()
                );
            }

            // Real channels need a provider endpoint; mock channels don't
            if channel.mock.is_none() && channel.api_url.is_empty() {
                anyhow::bail!(
                    "channel '{}' must have an api_url or mock configuration",
                    channel.name
                );
            }

            if channel.timeout.is_zero() {
                anyhow::bail!("channel '{}' timeout must be non-zero", channel.name);
            }

            if channel.max_text_length() == 0 {
                anyhow::bail!("channel '{}' max_text_length must be non-zero", channel.name);
            }
        }

        // Primary must reference a configured channel
        let primary = self
            .channels
            .iter()
            .find(|c| c.name == self.delivery.primary)
            .ok_or_else(|| {
                anyhow::anyhow!("delivery.primary references unknown channel: {}", self.delivery.primary)
            })?;

        // Fallback, when set, must exist, differ from primary, and be SMS-class
        if let Some(ref fallback) = self.delivery.fallback {
            if *fallback == self.delivery.primary {
                anyhow::bail!("delivery.fallback must differ from delivery.primary");
            }

            let fallback_channel = self
                .channels
                .iter()
                .find(|c| c.name == *fallback)
                .ok_or_else(|| {
                    anyhow::anyhow!("delivery.fallback references unknown channel: {}", fallback)
                })?;

            if fallback_channel.kind != ChannelKind::Sms {
                anyhow::bail!(
                    "delivery.fallback channel '{}' must be of kind sms",
                    fallback
                );
            }

            if primary.kind != ChannelKind::Whatsapp {
                anyhow::bail!(
                    "delivery.primary channel '{}' must be of kind whatsapp when a fallback is configured",
                    primary.name
                );
            }
        }

        // Retry budgets and backoff bounds
        if self.delivery.max_attempts == 0 {
            anyhow::bail!("delivery.max_attempts must be at least 1");
        }
        if self.delivery.otp_max_attempts == 0 {
            anyhow::bail!("delivery.otp_max_attempts must be at least 1");
        }
        if self.delivery.urgent_max_attempts == 0 {
            anyhow::bail!("delivery.urgent_max_attempts must be at least 1");
        }
        if self.delivery.fallback_max_attempts == 0 {
            anyhow::bail!("delivery.fallback_max_attempts must be at least 1");
        }
        if self.delivery.max_in_flight == 0 {
            anyhow::bail!("delivery.max_in_flight must be at least 1");
        }
        if self.delivery.base_delay.is_zero() {
            anyhow::bail!("delivery.base_delay must be non-zero");
        }
        if self.delivery.base_delay > self.delivery.max_delay {
            anyhow::bail!("delivery.base_delay must not exceed delivery.max_delay");
        }
        if !self.delivery.country_code.chars().all(|c| c.is_ascii_digit()) {
            anyhow::bail!("delivery.country_code must contain only digits");
        }

        if self.health_check.failure_threshold == 0 {
            anyhow::bail!("health_check.failure_threshold must be at least 1");
        }
        if self.health_check.interval.is_zero() {
            anyhow::bail!("health_check.interval must be non-zero");
        }

        if self.alerts.buffer_size == 0 {
            anyhow::bail!("alerts.buffer_size must be at least 1");
        }
        if self.alerts.sweep_interval.is_zero() {
            anyhow::bail!("alerts.sweep_interval must be non-zero");
        }

        if !(0.0..=1.0).contains(&self.settings.trace_sample_rate) {
            anyhow::bail!("settings.trace_sample_rate must be within 0.0 - 1.0");
        }
        if self.settings.store_capacity == 0 {
            anyhow::bail!("settings.store_capacity must be at least 1");
        }

        info!("configuration validated successfully");
        Ok(())
    }
}
