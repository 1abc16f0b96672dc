//! Pipeline configuration loaded from environment variables.
//!
//! All configuration is loaded from environment variables with sensible
//! defaults for development. In production, configure via environment
//! variables or a `.env` file.
//!
//! # Security Configuration
//!
//! - `INSECURE_COOKIES`: drop the `Secure` attribute and `__Host-` prefix from
//!   session and CSRF cookies (plain-HTTP development only)
//! - `TRUSTED_PROXIES`: CIDR ranges whose `X-Forwarded-For` entries are skipped
//!   when deriving the client address
//!
//! # Tuning
//!
//! - `REQUEST_TIMEOUT_MS`: handler deadline (default: 30000)
//! - `RATE_LIMIT_CAPACITY`: token bucket capacity per client (default: 100)
//! - `RATE_LIMIT_REPLENISH`: tokens added per second (default: 10)
//! - `RATE_LIMIT_SWEEP_SECS`: idle client eviction interval (default: derived
//!   from capacity and replenish rate)
//! - `MAX_FORM_BODY_SIZE`: largest form body buffered for CSRF lookup

use std::env;
use std::time::Duration;

use crate::error::{CoreResult, Error};

/// Pipeline configuration.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    // =========================================================================
    // Cookie Configuration
    // =========================================================================
    /// Issue cookies without `Secure` and the `__Host-` prefix (default: false)
    pub insecure_cookies: bool,

    // =========================================================================
    // Deadline Configuration
    // =========================================================================
    /// Deadline for the handler chain (default: 30 seconds)
    pub request_timeout: Duration,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Bucket capacity per client (default: 100). Set to 0 to disable.
    pub rate_limit_capacity: f64,

    /// Tokens replenished per second (default: 10)
    pub rate_limit_replenish: f64,

    /// Idle client eviction interval. `None` derives it from the bucket shape.
    pub rate_limit_sweep_interval: Option<Duration>,

    /// Trusted proxy CIDR ranges.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty (the peer address is always the client address)
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // CSRF Configuration
    // =========================================================================
    /// Largest urlencoded body buffered to look up the `_csrf` field (default: 1MB)
    pub max_form_body_size: usize,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if any value cannot be parsed or fails validation.
    pub fn from_env() -> CoreResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let sweep_secs: u64 = Self::parse_env("RATE_LIMIT_SWEEP_SECS", 0)?;

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,

            // Cookies
            insecure_cookies: Self::parse_env("INSECURE_COOKIES", false)?,

            // Deadline
            request_timeout: Duration::from_millis(Self::parse_env("REQUEST_TIMEOUT_MS", 30_000)?),

            // Rate limiting
            rate_limit_capacity: Self::parse_env("RATE_LIMIT_CAPACITY", 100.0)?,
            rate_limit_replenish: Self::parse_env("RATE_LIMIT_REPLENISH", 10.0)?,
            rate_limit_sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            trusted_proxies: Self::parse_trusted_proxies(),

            // CSRF
            max_form_body_size: Self::parse_env("MAX_FORM_BODY_SIZE", 1024 * 1024)?,

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if validation fails.
    pub fn validate(&self) -> CoreResult<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "REQUEST_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if !self.rate_limit_capacity.is_finite() || self.rate_limit_capacity < 0.0 {
            return Err(Error::Config(format!(
                "RATE_LIMIT_CAPACITY ({}) must be a non-negative number",
                self.rate_limit_capacity
            )));
        }

        if self.rate_limiting_enabled()
            && (!self.rate_limit_replenish.is_finite() || self.rate_limit_replenish <= 0.0)
        {
            return Err(Error::Config(format!(
                "RATE_LIMIT_REPLENISH ({}) must be greater than 0",
                self.rate_limit_replenish
            )));
        }

        if self.max_form_body_size == 0 {
            return Err(Error::Config(
                "MAX_FORM_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_capacity > 0.0
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> CoreResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse trusted proxy CIDR ranges from environment variable.
    fn parse_trusted_proxies() -> Vec<String> {
        env::var("TRUSTED_PROXIES")
            .ok()
            .map(|s| split_list(&s))
            .unwrap_or_default()
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            insecure_cookies: false,
            request_timeout: Duration::from_secs(30),
            rate_limit_capacity: 100.0,
            rate_limit_replenish: 10.0,
            rate_limit_sweep_interval: None,
            trusted_proxies: vec![],
            max_form_body_size: 1024 * 1024,
            log_level: "info".to_string(),
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert!(!config.insecure_cookies);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.rate_limit_sweep_interval.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "192.168.1.1".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "192.168.1.1:8080");
    }

    #[test]
    fn test_rate_limiting_enabled() {
        assert!(Config::default().rate_limiting_enabled());

        let config = Config {
            rate_limit_capacity: 0.0,
            rate_limit_replenish: 0.0,
            ..Config::default()
        };
        assert!(!config.rate_limiting_enabled());
        // Replenish is irrelevant once limiting is off.
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_replenish() {
        let config = Config {
            rate_limit_replenish: 0.0,
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("RATE_LIMIT_REPLENISH"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let config = Config {
            request_timeout: Duration::ZERO,
            ..Config::default()
        };

        assert!(config.validate().unwrap_err().to_string().contains("REQUEST_TIMEOUT_MS"));
    }

    #[test]
    fn test_validate_negative_capacity() {
        let config = Config {
            rate_limit_capacity: -1.0,
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metrics_addr_disabled() {
        let config = Config {
            metrics_port: 0,
            ..Config::default()
        };
        assert!(config.metrics_addr().is_none());
        assert_eq!(Config::default().metrics_addr().unwrap().port(), 9090);
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(" 10.0.0.0/8, ,::1/128 "),
            vec!["10.0.0.0/8".to_string(), "::1/128".to_string()]
        );
        assert!(split_list("").is_empty());
    }
}
