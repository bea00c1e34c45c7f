//! Async SMART-on-FHIR client: authorization-code + PKCE, token refresh and
//! authenticated FHIR requests.
//!
//! ```no_run
//! # async fn demo() -> Result<(), fhir_auth_client::FhirAuthError> {
//! use fhir_auth_client::{ClientSettings, FhirAuthClient};
//!
//! let settings = ClientSettings::new("my-app", "https://app.example.com/callback");
//! let client = FhirAuthClient::from_registered_provider("epic", settings)?;
//! let request = client.authorization_url(None)?;
//! // redirect the user to `request.url`, then on callback:
//! let connection = client.exchange_code("code-from-callback", &request.state, None).await?;
//! let patient: serde_json::Value = client
//!     .get(&format!("Patient/{}", connection.patient_id))
//!     .await?;
//! # let _ = patient;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
pub mod discovery;
mod error;

pub use client::{AuthorizationRequest, ClientBuilder, FhirAuthClient, RequestOptions, SessionState};
pub use config::{
    ClientSettings, ConfigError, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REFRESH_SKEW, DEFAULT_TIMEOUT,
};
pub use discovery::{SmartConfiguration, discover_smart_configuration};
pub use error::{AuthError, AuthErrorKind, FhirAuthError, RequestError};

pub use fhir_auth_core::{Connection, LaunchContext, ProviderConfig, parse_launch_context};
