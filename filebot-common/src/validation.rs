//! Configuration validation for filebot.
//!
//! Provides validation logic for configuration fields to ensure
//! all required values are present and within valid ranges.

use thiserror::Error;

use crate::config::{
    BackendsConfig, Config, HealthConfig, LimitsConfig, ObservabilityConfig, TelegramConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.telegram.validate() {
            errors.push(e);
        }

        if let Err(e) = self.health.validate() {
            errors.push(e);
        }

        if let Err(e) = self.limits.validate() {
            errors.push(e);
        }

        if let Err(e) = self.backends.validate() {
            errors.push(e);
        }

        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }

        if self.sessions.sweep_interval_secs == 0 && self.idle_timeout().is_some() {
            errors.push(ValidationError::InvalidValue {
                field: "sessions.sweep_interval_secs".into(),
                reason: "must be positive when idle eviction is enabled".into(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

impl Validate for TelegramConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.bot_token.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "telegram.bot_token".into(),
            });
        }

        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err(ValidationError::InvalidValue {
                field: "telegram.api_base".into(),
                reason: format!("'{}' is not an http(s) URL", self.api_base),
            });
        }

        Ok(())
    }
}

impl Validate for HealthConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "health.port".into(),
            });
        }

        if self.bind.parse::<std::net::IpAddr>().is_err() {
            return Err(ValidationError::InvalidValue {
                field: "health.bind".into(),
                reason: format!("'{}' is not an IP address", self.bind),
            });
        }

        Ok(())
    }
}

impl Validate for LimitsConfig {
    fn validate(&self) -> ValidationResult<()> {
        let byte_limits = [
            (self.split_max_bytes, "limits.split_max_bytes"),
            (self.pdf2image_max_bytes, "limits.pdf2image_max_bytes"),
            (self.merge_max_file_bytes, "limits.merge_max_file_bytes"),
            (self.merge_max_total_bytes, "limits.merge_max_total_bytes"),
            (self.archive_max_bytes, "limits.archive_max_bytes"),
        ];

        for (value, field) in byte_limits {
            if value == 0 {
                return Err(ValidationError::InvalidValue {
                    field: field.into(),
                    reason: "must be greater than zero".into(),
                });
            }
        }

        if self.merge_max_files == 0 {
            return Err(ValidationError::InvalidValue {
                field: "limits.merge_max_files".into(),
                reason: "must be greater than zero".into(),
            });
        }

        if self.merge_max_file_bytes > self.merge_max_total_bytes {
            return Err(ValidationError::Conflict {
                reason: format!(
                    "limits.merge_max_file_bytes ({}) exceeds limits.merge_max_total_bytes ({})",
                    self.merge_max_file_bytes, self.merge_max_total_bytes
                ),
            });
        }

        Ok(())
    }
}

impl Validate for BackendsConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !(self.raster_zoom > 0.0 && self.raster_zoom <= 8.0) {
            return Err(ValidationError::InvalidValue {
                field: "backends.raster_zoom".into(),
                reason: format!("{} is outside (0, 8]", self.raster_zoom),
            });
        }

        if self.pdftoppm_path.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "backends.pdftoppm_path".into(),
            });
        }

        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
        const FORMATS: &[&str] = &["pretty", "json"];

        if !LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("expected one of {LEVELS:?}"),
            });
        }

        if !FORMATS.contains(&self.log_format.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("expected one of {FORMATS:?}"),
            });
        }

        Ok(())
    }
}
