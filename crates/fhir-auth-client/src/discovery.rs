//! `/.well-known/smart-configuration` discovery for servers that are not in
//! the provider registry.

use fhir_auth_core::ProviderConfig;
use reqwest::{Client as HttpClient, header};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use crate::error::{FhirAuthError, RequestError};

const WELL_KNOWN_PATH: &str = ".well-known/smart-configuration";

/// Subset of the SMART configuration document this client acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartConfiguration {
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    #[serde(default)]
    pub introspection_endpoint: Option<String>,
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub response_types_supported: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

impl SmartConfiguration {
    pub fn supports_s256(&self) -> bool {
        self.code_challenge_methods_supported
            .iter()
            .any(|method| method == "S256")
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// `launch-ehr` advertised; the authorize request then carries
    /// `launch`/`iss`.
    pub fn supports_ehr_launch(&self) -> bool {
        self.has_capability("launch-ehr")
    }

    /// Custom provider config for `base_url` using the discovered endpoints.
    ///
    /// `scopes` wins when non-empty; otherwise the advertised scopes are used.
    pub fn provider_config(&self, base_url: &str, scopes: &[String]) -> ProviderConfig {
        let scopes = if scopes.is_empty() {
            self.scopes_supported.clone()
        } else {
            scopes.to_vec()
        };
        ProviderConfig::custom_template()
            .with_base_url(base_url)
            .with_endpoints(&self.authorization_endpoint, &self.token_endpoint)
            .with_scopes(scopes)
            .with_launch_context(self.supports_ehr_launch())
    }
}

/// Fetch `{base_url}/.well-known/smart-configuration`.
#[instrument(skip(http))]
pub async fn discover_smart_configuration(
    http: &HttpClient,
    base_url: &str,
) -> Result<SmartConfiguration, FhirAuthError> {
    let url = Url::parse(&format!("{}/{WELL_KNOWN_PATH}", base_url.trim_end_matches('/')))?;
    let response = http
        .get(url.clone())
        .header(header::ACCEPT, "application/json")
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(RequestError::new(status, body, url.as_str()).into());
    }

    let config: SmartConfiguration = serde_json::from_str(&body)?;
    debug!(
        target: "fhir_auth.discovery",
        authorization_endpoint = %config.authorization_endpoint,
        token_endpoint = %config.token_endpoint,
        s256 = config.supports_s256(),
        "smart configuration discovered"
    );
    Ok(config)
}
