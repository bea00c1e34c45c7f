use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};

/// Lifetime assumed when a token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Token endpoint payload for both the authorization-code and refresh grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// SMART launch context echo.
    #[serde(default)]
    pub patient: Option<String>,
    #[serde(default)]
    pub encounter: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl TokenResponse {
    pub fn expires_at(&self, now: OffsetDateTime) -> OffsetDateTime {
        let secs = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS).max(0);
        now.checked_add(Duration::seconds(secs)).unwrap_or(now)
    }
}

/// Authenticated session against one FHIR server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub provider_id: String,
    pub provider_name: String,
    pub base_url: String,
    /// Empty when the token response carried no patient context.
    pub patient_id: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub scope: String,
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// CapabilityStatement fetched after the exchange; advisory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
}

impl Connection {
    pub fn is_authenticated(&self, now: OffsetDateTime) -> bool {
        self.active && now < self.expires_at
    }

    /// `true` when the token expires within `skew` of `now` (or already has).
    pub fn expires_within(&self, now: OffsetDateTime, skew: Duration) -> bool {
        self.expires_at - now <= skew
    }

    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.split_whitespace()
    }

    /// Apply a refresh grant. Refresh token and scope only change when the
    /// provider sent new values.
    pub fn apply_refresh(&mut self, response: TokenResponse, now: OffsetDateTime) {
        self.expires_at = response.expires_at(now);
        self.access_token = response.access_token;
        if let Some(refresh_token) = response.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        if let Some(scope) = response.scope {
            self.scope = scope;
        }
    }
}
