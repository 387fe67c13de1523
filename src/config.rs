//! Configuration loading via `ortho-config`.

use std::num::NonZeroUsize;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default Compute Engine REST endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1";

/// Default binary used to mint access tokens.
pub const DEFAULT_GCLOUD_BIN: &str = "gcloud";

/// Default cap on simultaneous provider calls.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Compute API settings derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "KEYSWEEP",
    discovery(
        app_name = "keysweep",
        env_var = "KEYSWEEP_CONFIG_PATH",
        config_file_name = "keysweep.toml",
        dotfile_name = ".keysweep.toml",
        project_file_name = "keysweep.toml"
    )
)]
pub struct ComputeConfig {
    /// OAuth access token. When unset the token is requested from
    /// `gcloud auth print-access-token`.
    pub access_token: Option<String>,
    /// Base URL of the Compute Engine v1 API.
    #[ortho_config(default = DEFAULT_API_ENDPOINT.to_owned())]
    pub api_endpoint: String,
    /// Path to the `gcloud` executable.
    #[ortho_config(default = DEFAULT_GCLOUD_BIN.to_owned())]
    pub gcloud_bin: String,
    /// Maximum number of provider calls in flight at once.
    #[ortho_config(default = DEFAULT_MAX_CONCURRENCY)]
    pub max_concurrency: usize,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to keysweep.toml",
            self.env_var, self.toml_key
        )
    }
}

impl ComputeConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("keysweep")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Returns the configured access token when it holds a non-blank value.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// Returns the validated concurrency cap.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the cap is zero.
    pub fn concurrency_limit(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.max_concurrency).ok_or_else(|| {
            let field = FieldMetadata::new(
                "concurrency limit",
                "KEYSWEEP_MAX_CONCURRENCY",
                "max_concurrency",
            );
            ConfigError::Invalid(format!(
                "{} must be at least 1: {}",
                field.description,
                field.hint()
            ))
        })
    }

    /// Performs semantic validation. Error messages include guidance on how
    /// to provide values via environment variables or configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required field is empty or out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.api_endpoint,
            &FieldMetadata::new(
                "Compute API endpoint",
                "KEYSWEEP_API_ENDPOINT",
                "api_endpoint",
            ),
        )?;
        if self.access_token().is_none() {
            Self::require_field(
                &self.gcloud_bin,
                &FieldMetadata::new("gcloud binary", "KEYSWEEP_GCLOUD_BIN", "gcloud_bin"),
            )?;
        }
        self.concurrency_limit()?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value outside its accepted range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
