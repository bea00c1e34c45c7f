use std::{env, time::Duration};

use url::Url;

/// Refresh this long before expiry so a token never lapses mid-request.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(300);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Registration details and transport knobs shared by every provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub client_id: String,
    pub redirect_uri: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub refresh_skew: Duration,
}

impl ClientSettings {
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            refresh_skew: DEFAULT_REFRESH_SKEW,
        }
    }

    /// Read `FHIR_CLIENT_ID`, `FHIR_REDIRECT_URI` and the optional
    /// `FHIR_HTTP_TIMEOUT_SECS`, `FHIR_CONNECT_TIMEOUT_SECS`,
    /// `FHIR_REFRESH_SKEW_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let client_id = required_env("FHIR_CLIENT_ID")?;
        let redirect_uri = required_env("FHIR_REDIRECT_URI")?;

        let mut settings = Self::new(client_id, redirect_uri);
        if let Some(secs) = optional_secs("FHIR_HTTP_TIMEOUT_SECS")? {
            settings.timeout = secs;
        }
        if let Some(secs) = optional_secs("FHIR_CONNECT_TIMEOUT_SECS")? {
            settings.connect_timeout = secs;
        }
        if let Some(secs) = optional_secs("FHIR_REFRESH_SKEW_SECS")? {
            settings.refresh_skew = secs;
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: "client_id",
                reason: "must not be empty".into(),
            });
        }
        Url::parse(&self.redirect_uri).map_err(|err| ConfigError::Invalid {
            name: "redirect_uri",
            reason: err.to_string(),
        })?;
        if self.refresh_skew.is_zero() {
            return Err(ConfigError::Invalid {
                name: "refresh_skew",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_owned()),
        _ => Err(ConfigError::MissingEnv(name)),
    }
}

fn optional_secs(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    let Ok(raw) = env::var(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|secs| Some(Duration::from_secs(secs)))
        .map_err(|err| ConfigError::Invalid {
            name,
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_five_minute_skew() {
        let settings = ClientSettings::new("app", "https://app.example.com/callback");
        assert_eq!(settings.refresh_skew, Duration::from_secs(300));
        settings.validate().expect("valid");
    }

    #[test]
    fn zero_skew_is_rejected() {
        let settings = ClientSettings::new("app", "https://app.example.com/callback")
            .with_refresh_skew(Duration::ZERO);
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid {
                name: "refresh_skew",
                ..
            })
        ));
    }

    #[test]
    fn relative_redirect_is_rejected() {
        let settings = ClientSettings::new("app", "/callback");
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid {
                name: "redirect_uri",
                ..
            })
        ));
    }
}
