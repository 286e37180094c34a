//! Call settings and their lazily-resolved defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::callable::page::PageDescriptor;
use crate::callable::pipeline::{Pipeline, Stage};
use crate::error::ConfigError;

/// Service-wide fallbacks for settings a callable leaves unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallDefaults {
    /// Client-side timeout for each call.
    pub timeout: Duration,
    /// Whether calls known to be idempotent retry transient errors by default.
    pub is_idempotent_retrying: bool,
    /// Maximum attempts for a retrying call, including the first.
    pub max_attempts: u32,
}

impl Default for CallDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            is_idempotent_retrying: true,
            max_attempts: 16,
        }
    }
}

/// How a single API method is invoked.
///
/// Nothing is validated when the settings are built; [`CallSettings::pipeline`]
/// resolves them against `defaults` when the call is made.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSettings {
    /// Explicit timeout; falls back to `defaults.timeout`.
    pub timeout: Option<Duration>,
    /// Retry transient errors.
    pub is_retrying: bool,
    /// Explicit attempt budget; falls back to `defaults.max_attempts`.
    pub max_attempts: Option<u32>,
    /// Present for page-streaming methods.
    pub page_descriptor: Option<PageDescriptor>,
    pub defaults: Option<CallDefaults>,
}

impl CallSettings {
    /// Settings for an idempotent method.
    ///
    /// `is_retrying` wins when given; otherwise the defaults' idempotent
    /// retry policy decides. Having neither is an error.
    pub fn idempotent(
        is_retrying: Option<bool>,
        defaults: Option<CallDefaults>,
    ) -> Result<Self, ConfigError> {
        let is_retrying = match (is_retrying, &defaults) {
            (Some(flag), _) => flag,
            (None, Some(d)) => d.is_idempotent_retrying,
            (None, None) => return Err(ConfigError::MissingRetryPolicy),
        };
        Ok(Self {
            is_retrying,
            defaults,
            ..Default::default()
        })
    }

    /// The timeout in effect: explicit, else from defaults.
    pub fn resolved_timeout(&self) -> Result<Duration, ConfigError> {
        let timeout = self
            .timeout
            .or_else(|| self.defaults.as_ref().map(|d| d.timeout))
            .ok_or(ConfigError::MissingTimeout)?;
        if timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(timeout)
    }

    /// The attempt budget in effect: explicit, else from defaults.
    pub fn resolved_max_attempts(&self) -> Result<u32, ConfigError> {
        let max_attempts = self
            .max_attempts
            .or_else(|| self.defaults.as_ref().map(|d| d.max_attempts))
            .ok_or(ConfigError::MissingMaxAttempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts);
        }
        Ok(max_attempts)
    }

    /// Resolve into the ordered stages applied around the raw call.
    pub fn pipeline(&self) -> Result<Pipeline, ConfigError> {
        let mut stages = Vec::with_capacity(3);
        if self.is_retrying {
            stages.push(Stage::Retry {
                max_attempts: self.resolved_max_attempts()?,
            });
        }
        stages.push(Stage::Timeout {
            timeout: self.resolved_timeout()?,
        });
        if let Some(descriptor) = &self.page_descriptor {
            stages.push(Stage::PageStream {
                descriptor: descriptor.clone(),
            });
        }
        Ok(Pipeline::new(stages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> CallDefaults {
        CallDefaults {
            timeout: Duration::from_secs(10),
            max_attempts: 6,
            ..Default::default()
        }
    }

    #[test]
    fn defaults_fill_unset_fields() {
        let settings = CallSettings {
            is_retrying: true,
            defaults: Some(defaults()),
            ..Default::default()
        };
        assert_eq!(settings.resolved_timeout().unwrap(), Duration::from_secs(10));
        assert_eq!(settings.resolved_max_attempts().unwrap(), 6);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let settings = CallSettings {
            timeout: Some(Duration::from_secs(100)),
            max_attempts: Some(60),
            defaults: Some(defaults()),
            ..Default::default()
        };
        assert_eq!(settings.resolved_timeout().unwrap(), Duration::from_secs(100));
        assert_eq!(settings.resolved_max_attempts().unwrap(), 60);
    }

    #[test]
    fn missing_values_are_errors() {
        let settings = CallSettings {
            is_retrying: true,
            ..Default::default()
        };
        assert_eq!(settings.resolved_timeout(), Err(ConfigError::MissingTimeout));
        assert_eq!(settings.pipeline(), Err(ConfigError::MissingMaxAttempts));

        let zero = CallSettings {
            timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        assert_eq!(zero.pipeline(), Err(ConfigError::InvalidTimeout));

        let no_attempts = CallSettings {
            timeout: Some(Duration::from_secs(1)),
            is_retrying: true,
            max_attempts: Some(0),
            ..Default::default()
        };
        assert_eq!(no_attempts.pipeline(), Err(ConfigError::InvalidMaxAttempts));
    }

    #[test]
    fn max_attempts_ignored_when_not_retrying() {
        let settings = CallSettings {
            timeout: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        let pipeline = settings.pipeline().unwrap();
        assert_eq!(pipeline.max_attempts(), None);
    }

    #[test]
    fn idempotent_uses_default_policy() {
        let on = CallDefaults {
            is_idempotent_retrying: true,
            ..Default::default()
        };
        assert!(CallSettings::idempotent(None, Some(on)).unwrap().is_retrying);

        let off = CallDefaults {
            is_idempotent_retrying: false,
            ..Default::default()
        };
        assert!(!CallSettings::idempotent(None, Some(off.clone())).unwrap().is_retrying);
        assert!(CallSettings::idempotent(Some(true), Some(off)).unwrap().is_retrying);
    }

    #[test]
    fn idempotent_without_flag_or_defaults() {
        assert_eq!(
            CallSettings::idempotent(None, None),
            Err(ConfigError::MissingRetryPolicy)
        );
        assert!(!CallSettings::idempotent(Some(false), None).unwrap().is_retrying);
    }

    #[test]
    fn defaults_deserialize_with_fallbacks() {
        let d: CallDefaults =
            serde_json::from_str(r#"{ "max_attempts": 3 }"#).unwrap();
        assert_eq!(d.max_attempts, 3);
        assert_eq!(d.timeout, Duration::from_secs(30));
        assert!(d.is_idempotent_retrying);
    }
}
