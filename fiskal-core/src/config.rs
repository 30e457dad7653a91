//! Configuration and environment selection.
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// CIS environment selection for the fiscalization service endpoint.
/// - Demo: the public test service ("CIS test") that accepts demo certificates.
/// - Production: the live service; requires a production Fiskal certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvironmentType {
    Demo,
    Production,
}

/// Error returned when parsing an [`EnvironmentType`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentParseError {
    #[error("invalid environment type: {input}")]
    Invalid { input: String },
}

impl FromStr for EnvironmentType {
    type Err = EnvironmentParseError;
    fn from_str(env: &str) -> Result<EnvironmentType, EnvironmentParseError> {
        match env.to_ascii_lowercase().as_str() {
            "demo" => Ok(EnvironmentType::Demo),
            "production" => Ok(EnvironmentType::Production),
            _ => Err(EnvironmentParseError::Invalid {
                input: env.to_string(),
            }),
        }
    }
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Demo => "demo",
            EnvironmentType::Production => "production",
        }
    }

    pub fn endpoint_url(&self) -> &'static str {
        match self {
            EnvironmentType::Demo => "https://cistest.apis-it.hr:8449/FiskalizacijaServiceTest",
            EnvironmentType::Production => "https://cis.porezna-uprava.hr:8449/FiskalizacijaService",
        }
    }
}

/// Configuration for the protocol client.
///
/// # Examples
/// ```rust
/// use fiskal_core::config::{Config, EnvironmentType};
///
/// let config = Config::new(EnvironmentType::Demo);
/// assert!(config.endpoint_url().contains("cistest"));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    env: EnvironmentType,
    endpoint_override: Option<String>,
}

impl Config {
    pub fn new(env: EnvironmentType) -> Self {
        Self {
            env,
            endpoint_override: None,
        }
    }

    /// Point the client at a non-standard service URL (local stubs, proxies).
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint_override = Some(url.into());
        self
    }

    pub fn env(&self) -> EnvironmentType {
        self.env
    }

    pub fn endpoint_url(&self) -> &str {
        self.endpoint_override
            .as_deref()
            .unwrap_or_else(|| self.env.endpoint_url())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(EnvironmentType::Demo)
    }
}
