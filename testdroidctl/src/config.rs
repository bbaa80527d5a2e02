//! CLI configuration management
//!
//! Handles loading and saving CLI-specific configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::Credentials;
use crate::client::ClientOptions;
use crate::poll::PollPolicy;

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CliConfig {
    /// Testdroid Cloud URL
    pub cloud_url: String,

    /// Account user name
    #[serde(default)]
    pub username: Option<String>,

    /// Account password. Read from the file if present, never written back.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Default output format
    pub output_format: String,

    /// Enable verbose logging by default
    pub verbose: bool,

    /// Request timeout in seconds
    pub timeout: u64,

    /// Attempts when waiting for a proxy session
    pub proxy_attempts: u32,

    /// Delay between proxy attempts in milliseconds
    pub proxy_delay_ms: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        let poll = PollPolicy::default();
        Self {
            cloud_url: "https://cloud.testdroid.com".to_string(),
            username: None,
            password: None,
            output_format: "table".to_string(),
            verbose: false,
            timeout: 30,
            proxy_attempts: poll.max_attempts,
            proxy_delay_ms: poll.delay.as_millis() as u64,
        }
    }
}

impl CliConfig {
    /// Load configuration from `path`, or the default location.
    ///
    /// A missing file yields the defaults; nothing is written.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read CLI config file")?;
        toml::from_str(&content).context("Failed to parse CLI config file")
    }

    /// Save configuration to `path`, or the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        // Create parent directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize CLI config")?;
        std::fs::write(&config_path, content).context("Failed to write CLI config file")?;

        Ok(config_path)
    }

    /// Default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(xdg_config)
        } else {
            dirs::config_dir().context("Cannot determine config directory")?
        };

        Ok(config_dir.join("testdroid").join("cli.toml"))
    }

    /// Create a new builder for constructing configuration
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Credentials for the client, failing if any part is missing.
    pub fn credentials(&self) -> Result<Credentials> {
        let username = self
            .username
            .clone()
            .context("No username configured (use --username or TESTDROID_USERNAME)")?;
        let password = self
            .password
            .clone()
            .context("No password configured (use --password or TESTDROID_PASSWORD)")?;
        Ok(Credentials::new(self.cloud_url.clone(), username, password))
    }

    /// Client tunables derived from this configuration.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            timeout: Duration::from_secs(self.timeout),
            user_agent: format!("testdroidctl/{}", env!("CARGO_PKG_VERSION")),
            proxy_poll: self.proxy_poll(),
            ..ClientOptions::default()
        }
    }

    pub fn proxy_poll(&self) -> PollPolicy {
        PollPolicy::new(
            self.proxy_attempts,
            Duration::from_millis(self.proxy_delay_ms),
        )
    }
}

/// Builder for CLI configuration with validation and priority chain support
///
/// Priority chain (lowest to highest):
/// 1. Defaults
/// 2. Config file
/// 3. Environment variables
/// 4. CLI arguments
///
/// Each layer only fills values the layers above it left unset, so apply
/// CLI arguments first, then environment, then the file.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    cloud_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    output_format: Option<String>,
    verbose: Option<bool>,
    timeout: Option<u64>,
    proxy_attempts: Option<u32>,
    proxy_delay_ms: Option<u64>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cloud URL (with validation)
    pub fn with_cloud_url(mut self, url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        Self::validate_url(&url)?;
        self.cloud_url = Some(url);
        Ok(self)
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set output format (with validation)
    pub fn with_output_format(mut self, format: impl Into<String>) -> Result<Self> {
        let format = format.into();
        Self::validate_output_format(&format)?;
        self.output_format = Some(format);
        Ok(self)
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    /// Set timeout (with validation)
    pub fn with_timeout(mut self, timeout: u64) -> Result<Self> {
        Self::validate_timeout(timeout)?;
        self.timeout = Some(timeout);
        Ok(self)
    }

    /// Set the number of proxy poll attempts (with validation)
    pub fn with_proxy_attempts(mut self, attempts: u32) -> Result<Self> {
        Self::validate_proxy_attempts(attempts)?;
        self.proxy_attempts = Some(attempts);
        Ok(self)
    }

    /// Set the delay between proxy poll attempts (with validation)
    pub fn with_proxy_delay_ms(mut self, delay_ms: u64) -> Result<Self> {
        Self::validate_proxy_delay(delay_ms)?;
        self.proxy_delay_ms = Some(delay_ms);
        Ok(self)
    }

    /// Fill unset values from the config file
    pub fn with_config_file(self, path: Option<&Path>, load_file: bool) -> Result<Self> {
        if !load_file {
            return Ok(self);
        }

        let config = match CliConfig::load(path) {
            Ok(config) => config,
            // An explicitly named file must load
            Err(e) if path.is_some() => return Err(e),
            Err(_) => return Ok(self),
        };

        Ok(Self {
            cloud_url: self.cloud_url.or(Some(config.cloud_url)),
            username: self.username.or(config.username),
            password: self.password.or(config.password),
            output_format: self.output_format.or(Some(config.output_format)),
            verbose: self.verbose.or(Some(config.verbose)),
            timeout: self.timeout.or(Some(config.timeout)),
            proxy_attempts: self.proxy_attempts.or(Some(config.proxy_attempts)),
            proxy_delay_ms: self.proxy_delay_ms.or(Some(config.proxy_delay_ms)),
        })
    }

    /// Fill unset values from `TESTDROID_*` environment variables
    pub fn with_env_overrides(mut self) -> Self {
        if self.cloud_url.is_none() {
            if let Ok(url) = std::env::var("TESTDROID_URL") {
                if Self::validate_url(&url).is_ok() {
                    self.cloud_url = Some(url);
                }
            }
        }

        if self.username.is_none() {
            self.username = std::env::var("TESTDROID_USERNAME").ok();
        }

        if self.password.is_none() {
            self.password = std::env::var("TESTDROID_PASSWORD").ok();
        }

        if self.output_format.is_none() {
            if let Ok(format) = std::env::var("TESTDROID_FORMAT") {
                if Self::validate_output_format(&format).is_ok() {
                    self.output_format = Some(format);
                }
            }
        }

        if self.verbose.is_none() {
            if let Ok(verbose) = std::env::var("TESTDROID_VERBOSE") {
                self.verbose = Some(verbose.to_lowercase() == "true" || verbose == "1");
            }
        }

        if self.timeout.is_none() {
            if let Some(timeout) = env_number("TESTDROID_TIMEOUT") {
                if Self::validate_timeout(timeout).is_ok() {
                    self.timeout = Some(timeout);
                }
            }
        }

        if self.proxy_attempts.is_none() {
            if let Some(attempts) = env_number::<u32>("TESTDROID_PROXY_ATTEMPTS") {
                if Self::validate_proxy_attempts(attempts).is_ok() {
                    self.proxy_attempts = Some(attempts);
                }
            }
        }

        if self.proxy_delay_ms.is_none() {
            if let Some(delay_ms) = env_number("TESTDROID_PROXY_DELAY_MS") {
                if Self::validate_proxy_delay(delay_ms).is_ok() {
                    self.proxy_delay_ms = Some(delay_ms);
                }
            }
        }

        self
    }

    /// Build the final configuration with validation
    pub fn build(self) -> Result<CliConfig> {
        let defaults = CliConfig::default();

        let cloud_url = self.cloud_url.unwrap_or(defaults.cloud_url);
        let output_format = self.output_format.unwrap_or(defaults.output_format);
        let timeout = self.timeout.unwrap_or(defaults.timeout);
        let proxy_attempts = self.proxy_attempts.unwrap_or(defaults.proxy_attempts);
        let proxy_delay_ms = self.proxy_delay_ms.unwrap_or(defaults.proxy_delay_ms);

        Self::validate_url(&cloud_url)?;
        Self::validate_output_format(&output_format)?;
        Self::validate_timeout(timeout)?;
        Self::validate_proxy_attempts(proxy_attempts)?;
        Self::validate_proxy_delay(proxy_delay_ms)?;

        Ok(CliConfig {
            cloud_url,
            username: self.username,
            password: self.password,
            output_format,
            verbose: self.verbose.unwrap_or(defaults.verbose),
            timeout,
            proxy_attempts,
            proxy_delay_ms,
        })
    }

    fn validate_url(url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(anyhow::anyhow!("Cloud URL cannot be empty"));
        }

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(anyhow::anyhow!(
                "Cloud URL must start with http:// or https://"
            ));
        }

        Ok(())
    }

    fn validate_output_format(format: &str) -> Result<()> {
        match format {
            "table" | "json" => Ok(()),
            _ => Err(anyhow::anyhow!(
                "Invalid output format '{}'. Must be 'table' or 'json'",
                format
            )),
        }
    }

    fn validate_timeout(timeout: u64) -> Result<()> {
        if timeout == 0 {
            return Err(anyhow::anyhow!("Timeout must be greater than 0"));
        }

        if timeout > 300 {
            return Err(anyhow::anyhow!(
                "Timeout must be less than or equal to 300 seconds"
            ));
        }

        Ok(())
    }

    fn validate_proxy_attempts(attempts: u32) -> Result<()> {
        if attempts == 0 {
            return Err(anyhow::anyhow!("Proxy attempts must be greater than 0"));
        }

        Ok(())
    }

    fn validate_proxy_delay(delay_ms: u64) -> Result<()> {
        if delay_ms > 60_000 {
            return Err(anyhow::anyhow!(
                "Proxy delay must be less than or equal to 60000 ms"
            ));
        }

        Ok(())
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
