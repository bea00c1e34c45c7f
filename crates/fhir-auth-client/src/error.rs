use std::fmt;

use fhir_auth_core::{RegistryError, SessionStoreError};
use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;

const AUTH_FAILURE_EN: &str =
    "Could not connect to your health record provider. Please try again.";
const AUTH_FAILURE_ES: &str =
    "No se pudo conectar con su proveedor de historial médico. Por favor, inténtelo de nuevo.";

/// Classification of authentication failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Returned `state` did not match the stored one, or none was stored.
    StateMismatch,
    /// No PKCE verifier was supplied or stored.
    MissingVerifier,
    NotAuthenticated,
    NoRefreshToken,
    /// Token endpoint answered with a non-2xx status.
    TokenEndpoint,
    /// Token endpoint answered 2xx with an unusable payload.
    InvalidTokenResponse,
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AuthErrorKind::StateMismatch => "state mismatch",
            AuthErrorKind::MissingVerifier => "missing code verifier",
            AuthErrorKind::NotAuthenticated => "not authenticated",
            AuthErrorKind::NoRefreshToken => "no refresh token",
            AuthErrorKind::TokenEndpoint => "token endpoint error",
            AuthErrorKind::InvalidTokenResponse => "invalid token response",
        };
        f.write_str(label)
    }
}

/// Failure of an authorization, exchange or refresh step.
///
/// Always fatal to the current operation; the client never retries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthError {
    kind: AuthErrorKind,
    message: String,
    localized_message: String,
    status: Option<u16>,
    body: Option<String>,
}

impl AuthError {
    pub fn new(
        kind: AuthErrorKind,
        message: impl Into<String>,
        localized_message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            localized_message: localized_message.into(),
            status: None,
            body: None,
        }
    }

    pub(crate) fn state_mismatch() -> Self {
        Self::new(
            AuthErrorKind::StateMismatch,
            "invalid state - possible CSRF",
            "Estado inválido: posible ataque CSRF",
        )
    }

    pub(crate) fn missing_verifier() -> Self {
        Self::new(
            AuthErrorKind::MissingVerifier,
            "no PKCE code verifier available for this authorization",
            "No hay verificador PKCE para esta autorización",
        )
    }

    pub(crate) fn not_authenticated() -> Self {
        Self::new(
            AuthErrorKind::NotAuthenticated,
            "not authenticated",
            "No autenticado",
        )
    }

    pub(crate) fn no_refresh_token() -> Self {
        Self::new(
            AuthErrorKind::NoRefreshToken,
            "no refresh token - reauthentication required",
            "No hay token de actualización: se requiere volver a autenticarse",
        )
    }

    pub(crate) fn token_endpoint(grant: &str, status: StatusCode, body: String) -> Self {
        Self {
            kind: AuthErrorKind::TokenEndpoint,
            message: format!("{grant} grant failed with {status}"),
            localized_message: format!("La solicitud de token falló ({})", status.as_u16()),
            status: Some(status.as_u16()),
            body: Some(body),
        }
    }

    pub(crate) fn invalid_token_response(detail: impl fmt::Display) -> Self {
        Self::new(
            AuthErrorKind::InvalidTokenResponse,
            format!("invalid token response: {detail}"),
            "Respuesta de token inválida",
        )
    }

    pub fn kind(&self) -> AuthErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn localized_message(&self) -> &str {
        &self.localized_message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Raw token endpoint body, kept for diagnostics.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            Some(body) if !body.is_empty() => write!(f, "{}: {}", self.message, body),
            _ => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for AuthError {}

/// Non-2xx answer from a FHIR resource request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("request to {url} failed with {status}: {body}")]
pub struct RequestError {
    pub status: StatusCode,
    pub body: String,
    pub url: String,
    pub localized_message: String,
}

impl RequestError {
    pub(crate) fn new(status: StatusCode, body: String, url: impl Into<String>) -> Self {
        Self {
            status,
            body,
            url: url.into(),
            localized_message: format!(
                "No se pudo obtener este recurso ({})",
                status.as_u16()
            ),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }
}

/// Errors produced by [`crate::FhirAuthClient`].
#[derive(Debug, Error)]
pub enum FhirAuthError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("provider registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("session store error: {0}")]
    Store(#[from] SessionStoreError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid client configuration: {0}")]
    Config(#[from] ConfigError),
}

impl FhirAuthError {
    pub fn as_auth(&self) -> Option<&AuthError> {
        match self {
            FhirAuthError::Auth(err) => Some(err),
            _ => None,
        }
    }

    pub fn as_request(&self) -> Option<&RequestError> {
        match self {
            FhirAuthError::Request(err) => Some(err),
            _ => None,
        }
    }

    /// Text suitable for showing to the person using the app.
    ///
    /// Resource failures stay per-resource; everything else is reported as a
    /// connection problem.
    pub fn user_message(&self) -> String {
        match self {
            FhirAuthError::Request(err) => format!(
                "This part of your health record could not be loaded ({}).",
                err.status.as_u16()
            ),
            _ => AUTH_FAILURE_EN.to_owned(),
        }
    }

    /// Spanish counterpart of [`FhirAuthError::user_message`].
    pub fn localized_user_message(&self) -> String {
        match self {
            FhirAuthError::Request(err) => err.localized_message.clone(),
            _ => AUTH_FAILURE_ES.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_endpoint_error_keeps_body() {
        let err = AuthError::token_endpoint(
            "authorization_code",
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant"}"#.into(),
        );
        assert_eq!(err.kind(), AuthErrorKind::TokenEndpoint);
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("invalid_grant"));
        assert!(!err.localized_message().is_empty());
    }

    #[test]
    fn user_messages_distinguish_auth_and_request_failures() {
        let auth: FhirAuthError = AuthError::state_mismatch().into();
        assert!(auth.user_message().contains("health record provider"));
        assert!(auth.localized_user_message().starts_with("No se pudo conectar"));

        let request: FhirAuthError =
            RequestError::new(StatusCode::NOT_FOUND, "{}".into(), "https://x/Patient/1").into();
        assert!(request.user_message().contains("404"));
        assert!(request.as_request().is_some());
        assert!(request.as_auth().is_none());
    }
}
