use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use fhir_auth_core::{
    Clock, Connection, InMemorySessionStore, LaunchContext, PendingAuthorization, PkcePair,
    ProviderConfig, ProviderRegistry, SessionStore, SystemClock, TokenResponse, generate_state,
};
use reqwest::{
    Client as HttpClient, Method, Response, StatusCode,
    header::{self, HeaderMap, HeaderName, HeaderValue},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;
use url::Url;

use crate::{
    config::{ClientSettings, ConfigError},
    error::{AuthError, FhirAuthError, RequestError},
};

const FHIR_JSON: &str = "application/fhir+json";

/// Lifecycle of one end-user session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    /// Authorize URL handed out; waiting for the callback.
    AuthorizationRequested,
    Authenticated,
    Refreshing,
    Disconnected,
}

/// Output of [`FhirAuthClient::authorization_url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
    pub code_verifier: String,
}

/// Per-call knobs for [`FhirAuthClient::request`].
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            query: Vec::new(),
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Builder for [`FhirAuthClient`].
pub struct ClientBuilder {
    settings: ClientSettings,
    store: Option<Arc<dyn SessionStore>>,
    clock: Option<Arc<dyn Clock>>,
    http: Option<HttpClient>,
    registry: Option<ProviderRegistry>,
}

impl ClientBuilder {
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            store: None,
            clock: None,
            http: None,
            registry: None,
        }
    }

    /// Storage for the per-attempt state and verifier. Defaults to an
    /// in-memory map owned by the client.
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a prebuilt HTTP client instead of one built from the settings'
    /// timeouts.
    pub fn http_client(mut self, http: HttpClient) -> Self {
        self.http = Some(http);
        self
    }

    /// Resolve provider ids against `registry` rather than the built-in one.
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn refresh_skew(mut self, skew: std::time::Duration) -> Self {
        self.settings.refresh_skew = skew;
        self
    }

    pub fn registered_provider(self, id: &str) -> Result<FhirAuthClient, FhirAuthError> {
        let provider = match &self.registry {
            Some(registry) => registry.get(id)?,
            None => ProviderRegistry::builtin()?.get(id)?,
        };
        self.build(provider)
    }

    pub fn custom_provider(self, provider: ProviderConfig) -> Result<FhirAuthClient, FhirAuthError> {
        self.build(provider)
    }

    fn build(self, provider: ProviderConfig) -> Result<FhirAuthClient, FhirAuthError> {
        self.settings.validate()?;
        provider.validate()?;

        let refresh_skew =
            time::Duration::try_from(self.settings.refresh_skew).map_err(|err| {
                ConfigError::Invalid {
                    name: "refresh_skew",
                    reason: err.to_string(),
                }
            })?;
        let http = match self.http {
            Some(http) => http,
            None => HttpClient::builder()
                .timeout(self.settings.timeout)
                .connect_timeout(self.settings.connect_timeout)
                .build()?,
        };

        debug!(
            target: "fhir_auth.client",
            provider = %provider.id,
            base_url = %provider.base_url,
            "client constructed"
        );

        Ok(FhirAuthClient {
            provider,
            settings: self.settings,
            refresh_skew,
            http,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemorySessionStore::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            connection: RwLock::new(None),
            phase: RwLock::new(SessionState::Unauthenticated),
            refresh_gate: Mutex::new(()),
        })
    }
}

/// SMART-on-FHIR client for one provider and one end-user session.
///
/// Drives the authorization-code + PKCE flow, keeps the resulting
/// [`Connection`] fresh and signs FHIR resource requests with it.
pub struct FhirAuthClient {
    provider: ProviderConfig,
    settings: ClientSettings,
    refresh_skew: time::Duration,
    http: HttpClient,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    connection: RwLock<Option<Connection>>,
    phase: RwLock<SessionState>,
    refresh_gate: Mutex<()>,
}

impl fmt::Debug for FhirAuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FhirAuthClient")
            .field("provider", &self.provider.id)
            .field("client_id", &self.settings.client_id)
            .field("state", &self.session_state())
            .finish_non_exhaustive()
    }
}

impl FhirAuthClient {
    pub fn builder(settings: ClientSettings) -> ClientBuilder {
        ClientBuilder::new(settings)
    }

    /// Client for a provider from the built-in registry.
    pub fn from_registered_provider(
        id: &str,
        settings: ClientSettings,
    ) -> Result<Self, FhirAuthError> {
        Self::builder(settings).registered_provider(id)
    }

    /// Client for a caller-supplied configuration, usually derived from
    /// [`ProviderConfig::custom_template`].
    pub fn from_custom_config(
        provider: ProviderConfig,
        settings: ClientSettings,
    ) -> Result<Self, FhirAuthError> {
        Self::builder(settings).custom_provider(provider)
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn session_state(&self) -> SessionState {
        *self.phase.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connection(&self) -> Option<Connection> {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        let now = self.clock.now();
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|conn| conn.is_authenticated(now))
    }

    /// CapabilityStatement captured after the code exchange, if the server
    /// returned one.
    pub fn capabilities(&self) -> Option<Value> {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|conn| conn.capabilities.clone())
    }

    /// Build the authorize URL and remember state + verifier for the callback.
    ///
    /// Performs no network I/O.
    #[instrument(skip(self, launch), fields(provider = %self.provider.id))]
    pub fn authorization_url(
        &self,
        launch: Option<&LaunchContext>,
    ) -> Result<AuthorizationRequest, FhirAuthError> {
        let state = generate_state();
        let pkce = PkcePair::generate();

        let mut url = Url::parse(&self.provider.authorize_url)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.settings.client_id)
                .append_pair("redirect_uri", &self.settings.redirect_uri)
                .append_pair("scope", &self.provider.scope_string())
                .append_pair("state", &state)
                .append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", "S256")
                .append_pair("aud", &self.provider.base_url);

            if self.provider.requires_launch_context {
                if let Some(token) = launch.and_then(|ctx| ctx.launch.as_deref()) {
                    query.append_pair("launch", token);
                }
                let iss = launch
                    .map(|ctx| ctx.iss.as_str())
                    .filter(|iss| !iss.is_empty())
                    .unwrap_or(&self.provider.base_url);
                query.append_pair("iss", iss);
            }
        }

        PendingAuthorization::new(&state, &pkce.verifier).persist(self.store.as_ref())?;
        self.set_phase(SessionState::AuthorizationRequested);
        info!(
            target: "fhir_auth.client",
            ehr_launch = launch.is_some_and(LaunchContext::is_ehr_launch),
            "authorization url issued"
        );

        Ok(AuthorizationRequest {
            url,
            state,
            code_verifier: pkce.verifier,
        })
    }

    /// Trade the callback `code` for tokens.
    ///
    /// `state` must equal the value stored by
    /// [`FhirAuthClient::authorization_url`]; the check runs before any
    /// request is sent. `code_verifier` overrides the stored verifier.
    #[instrument(skip_all, fields(provider = %self.provider.id))]
    pub async fn exchange_code(
        &self,
        code: &str,
        state: &str,
        code_verifier: Option<&str>,
    ) -> Result<Connection, FhirAuthError> {
        let (stored_state, stored_verifier) = PendingAuthorization::load(self.store.as_ref())?;
        if stored_state.as_deref() != Some(state) {
            warn!(target: "fhir_auth.client", "state mismatch on callback");
            return Err(AuthError::state_mismatch().into());
        }
        let verifier = code_verifier
            .map(str::to_owned)
            .or(stored_verifier)
            .ok_or_else(AuthError::missing_verifier)?;

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
            ("client_id", self.settings.client_id.as_str()),
            ("code_verifier", verifier.as_str()),
        ];
        let token = self.post_token("authorization_code", &form).await?;

        let now = self.clock.now();
        let mut connection = Connection {
            id: Ulid::new().to_string(),
            provider_id: self.provider.id.clone(),
            provider_name: self.provider.name.clone(),
            base_url: self.provider.base_url.clone(),
            patient_id: token.patient.clone().unwrap_or_default(),
            expires_at: token.expires_at(now),
            scope: token
                .scope
                .clone()
                .unwrap_or_else(|| self.provider.scope_string()),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            active: true,
            created_at: now,
            capabilities: None,
        };

        self.store_connection(Some(connection.clone()));
        PendingAuthorization::clear(self.store.as_ref())?;
        self.set_phase(SessionState::Authenticated);
        info!(
            target: "fhir_auth.client",
            connection_id = %connection.id,
            has_patient = !connection.patient_id.is_empty(),
            has_refresh_token = connection.refresh_token.is_some(),
            "authorization code exchanged"
        );

        match self.fetch_capabilities(&connection.access_token).await {
            Ok(statement) => {
                connection.capabilities = Some(statement.clone());
                self.update_connection(|conn| conn.capabilities = Some(statement));
            }
            Err(err) => {
                warn!(target: "fhir_auth.client", error = %err, "capability statement unavailable");
            }
        }

        Ok(connection)
    }

    /// Run the refresh grant now, regardless of expiry.
    pub async fn refresh_token(&self) -> Result<Connection, FhirAuthError> {
        let _gate = self.refresh_gate.lock().await;
        self.refresh_locked().await
    }

    /// Current access token, refreshed first when it expires within the
    /// configured skew.
    pub async fn ensure_valid_token(&self) -> Result<String, FhirAuthError> {
        let current = self.current_connection()?;
        if !self.needs_refresh(&current) {
            return Ok(current.access_token);
        }

        let _gate = self.refresh_gate.lock().await;
        // another caller may have refreshed while we waited
        let current = self.current_connection()?;
        if !self.needs_refresh(&current) {
            return Ok(current.access_token);
        }
        Ok(self.refresh_locked().await?.access_token)
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, FhirAuthError> {
        self.request(endpoint, RequestOptions::default()).await
    }

    /// Authenticated FHIR request.
    ///
    /// Relative endpoints resolve against the provider base URL. A `401` is
    /// retried once after a refresh when the connection holds a refresh token.
    #[instrument(skip(self, options), fields(provider = %self.provider.id, method = %options.method))]
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T, FhirAuthError> {
        let url = self.resolve_url(endpoint, &options.query)?;
        let token = self.ensure_valid_token().await?;
        let mut response = self.send(&url, &options, &token).await?;

        if response.status() == StatusCode::UNAUTHORIZED && self.has_refresh_token() {
            warn!(target: "fhir_auth.client", url = %url, "token rejected; refreshing once");
            let token = self.refresh_after_rejection(&token).await?;
            response = self.send(&url, &options, &token).await?;
        }

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            debug!(target: "fhir_auth.client", url = %url, status = status.as_u16(), "resource request failed");
            return Err(RequestError::new(status, body, url.as_str()).into());
        }

        let value = if body.trim().is_empty() {
            serde_json::from_value(Value::Null)?
        } else {
            serde_json::from_str(&body)?
        };
        Ok(value)
    }

    /// Drop the connection and any pending authorization. Safe to call twice.
    pub fn disconnect(&self) -> Result<(), FhirAuthError> {
        let previous = self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        PendingAuthorization::clear(self.store.as_ref())?;
        self.set_phase(SessionState::Disconnected);
        if let Some(conn) = previous {
            info!(target: "fhir_auth.client", connection_id = %conn.id, "disconnected");
        }
        Ok(())
    }

    /// Caller must hold `refresh_gate`.
    async fn refresh_locked(&self) -> Result<Connection, FhirAuthError> {
        let current = self.current_connection()?;
        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or_else(AuthError::no_refresh_token)?;

        self.set_phase(SessionState::Refreshing);
        // never ask for more than the connection was granted
        let scope = if current.scope.trim().is_empty() {
            self.provider.scope_string()
        } else {
            current.scope.clone()
        };
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.settings.client_id.as_str()),
            ("scope", scope.as_str()),
        ];
        let result = self.post_token("refresh_token", &form).await;
        self.leave_refreshing();
        let token = result?;

        let now = self.clock.now();
        let refreshed = self
            .update_connection(|conn| conn.apply_refresh(token, now))
            .ok_or_else(AuthError::not_authenticated)?;
        info!(
            target: "fhir_auth.client",
            connection_id = %refreshed.id,
            expires_at = %refreshed.expires_at,
            "access token refreshed"
        );
        Ok(refreshed)
    }

    /// Refresh after the server rejected `rejected`, unless a concurrent
    /// caller already replaced it.
    async fn refresh_after_rejection(&self, rejected: &str) -> Result<String, FhirAuthError> {
        let _gate = self.refresh_gate.lock().await;
        let current = self.current_connection()?;
        if current.access_token != rejected {
            return Ok(current.access_token);
        }
        Ok(self.refresh_locked().await?.access_token)
    }

    async fn post_token(
        &self,
        grant: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, FhirAuthError> {
        let response = self
            .http
            .post(&self.provider.token_url)
            .header(header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                target: "fhir_auth.client",
                grant,
                status = status.as_u16(),
                "token endpoint rejected grant"
            );
            return Err(AuthError::token_endpoint(grant, status, body).into());
        }

        let body = response.text().await?;

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(AuthError::invalid_token_response)?;
        if token.access_token.is_empty() {
            return Err(AuthError::invalid_token_response("missing access_token").into());
        }
        Ok(token)
    }

    async fn fetch_capabilities(&self, access_token: &str) -> Result<Value, FhirAuthError> {
        let url = self.resolve_url("metadata", &[])?;
        let response = self
            .http
            .get(url.clone())
            .header(header::ACCEPT, FHIR_JSON)
            .bearer_auth(access_token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RequestError::new(status, body, url.as_str()).into());
        }
        Ok(response.json().await?)
    }

    async fn send(
        &self,
        url: &Url,
        options: &RequestOptions,
        access_token: &str,
    ) -> Result<Response, FhirAuthError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(FHIR_JSON));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));
        headers.extend(options.headers.clone());
        headers.remove(header::AUTHORIZATION);

        let mut builder = self
            .http
            .request(options.method.clone(), url.clone())
            .headers(headers)
            .bearer_auth(access_token);
        if let Some(body) = &options.body {
            builder = builder.body(serde_json::to_vec(body)?);
        }
        Ok(builder.send().await?)
    }

    fn resolve_url(&self, endpoint: &str, query: &[(String, String)]) -> Result<Url, FhirAuthError> {
        let mut url = if is_absolute(endpoint) {
            Url::parse(endpoint)?
        } else {
            Url::parse(&format!(
                "{}/{}",
                self.provider.base_url.trim_end_matches('/'),
                endpoint.trim_start_matches('/')
            ))?
        };
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn needs_refresh(&self, conn: &Connection) -> bool {
        conn.expires_within(self.clock.now(), self.refresh_skew)
    }

    fn has_refresh_token(&self) -> bool {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|conn| conn.refresh_token.is_some())
    }

    fn current_connection(&self) -> Result<Connection, AuthError> {
        self.connection().ok_or_else(AuthError::not_authenticated)
    }

    fn store_connection(&self, connection: Option<Connection>) {
        *self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner) = connection;
    }

    fn update_connection(&self, apply: impl FnOnce(&mut Connection)) -> Option<Connection> {
        let mut guard = self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let conn = guard.as_mut()?;
        apply(conn);
        Some(conn.clone())
    }

    fn set_phase(&self, next: SessionState) {
        *self.phase.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn leave_refreshing(&self) {
        let mut phase = self.phase.write().unwrap_or_else(PoisonError::into_inner);
        if *phase == SessionState::Refreshing {
            *phase = SessionState::Authenticated;
        }
    }
}

fn is_absolute(endpoint: &str) -> bool {
    let lower = endpoint.get(..8).unwrap_or(endpoint).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> FhirAuthClient {
        FhirAuthClient::from_registered_provider(
            "epic",
            ClientSettings::new("app-123", "https://app.example.com/callback"),
        )
        .expect("client")
    }

    #[test]
    fn absolute_detection() {
        assert!(is_absolute("https://other.example.com/Patient"));
        assert!(is_absolute("HTTP://other.example.com"));
        assert!(!is_absolute("Patient/123"));
        assert!(!is_absolute("/Patient"));
        assert!(!is_absolute("http"));
    }

    #[test]
    fn relative_endpoints_join_base_url() {
        let client = client();
        let base = client.provider().base_url.trim_end_matches('/').to_owned();
        let url = client.resolve_url("Patient/123", &[]).unwrap();
        assert_eq!(url.as_str(), format!("{base}/Patient/123"));
        let url = client.resolve_url("/Patient/123", &[]).unwrap();
        assert_eq!(url.as_str(), format!("{base}/Patient/123"));
    }

    #[test]
    fn query_pairs_are_appended() {
        let client = client();
        let url = client
            .resolve_url("Observation", &[("category".into(), "vital-signs".into())])
            .unwrap();
        assert_eq!(url.query(), Some("category=vital-signs"));
    }

    #[test]
    fn authorization_url_moves_to_requested_state() {
        let client = client();
        assert_eq!(client.session_state(), SessionState::Unauthenticated);
        let request = client.authorization_url(None).expect("url");
        assert_eq!(client.session_state(), SessionState::AuthorizationRequested);
        assert!(!client.is_authenticated());

        let pairs: Vec<(String, String)> = request.url.query_pairs().into_owned().collect();
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("state"), Some(request.state.as_str()));
        assert_eq!(get("client_id"), Some("app-123"));
        // epic requires launch context, so iss falls back to the base url
        assert_eq!(get("iss"), Some(client.provider().base_url.as_str()));
        assert_eq!(get("launch"), None);
    }

    fn query_value(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn ehr_launch_copies_launch_and_issuer() {
        let client = client();
        let ctx = LaunchContext {
            launch: Some("launch-token-9".into()),
            iss: "https://ehr.hospital.example/fhir/r4".into(),
            ..LaunchContext::default()
        };
        let request = client.authorization_url(Some(&ctx)).expect("url");
        assert_eq!(
            query_value(&request.url, "launch").as_deref(),
            Some("launch-token-9")
        );
        assert_eq!(
            query_value(&request.url, "iss").as_deref(),
            Some("https://ehr.hospital.example/fhir/r4")
        );
        // aud stays the provider base url whatever the issuer says
        assert_eq!(
            query_value(&request.url, "aud").as_deref(),
            Some(client.provider().base_url.as_str())
        );
    }

    #[test]
    fn empty_issuer_falls_back_to_base_url() {
        let client = client();
        let ctx = LaunchContext {
            launch: Some("abc".into()),
            ..LaunchContext::default()
        };
        let request = client.authorization_url(Some(&ctx)).expect("url");
        assert_eq!(query_value(&request.url, "launch").as_deref(), Some("abc"));
        assert_eq!(
            query_value(&request.url, "iss").as_deref(),
            Some(client.provider().base_url.as_str())
        );
    }

    #[test]
    fn providers_without_launch_context_omit_launch_and_issuer() {
        for id in ["medicare-blue-button", "va"] {
            let client = FhirAuthClient::from_registered_provider(
                id,
                ClientSettings::new("app-123", "https://app.example.com/callback"),
            )
            .expect("client");
            assert!(!client.provider().requires_launch_context);

            let ctx = LaunchContext {
                launch: Some("abc".into()),
                iss: "https://ehr.hospital.example/fhir".into(),
                ..LaunchContext::default()
            };
            for launch in [None, Some(&ctx)] {
                let request = client.authorization_url(launch).expect("url");
                assert_eq!(query_value(&request.url, "launch"), None, "{id}");
                assert_eq!(query_value(&request.url, "iss"), None, "{id}");
                assert_eq!(
                    query_value(&request.url, "code_challenge_method").as_deref(),
                    Some("S256")
                );
            }
        }
    }

    #[test]
    fn custom_template_is_rejected_until_filled_in() {
        let settings = ClientSettings::new("app", "https://app.example.com/callback");
        let err = FhirAuthClient::from_registered_provider("custom", settings.clone())
            .expect_err("blank template");
        assert!(matches!(err, FhirAuthError::Registry(_)));

        let config = ProviderConfig::custom_template()
            .with_base_url("https://fhir.example.org/r4")
            .with_endpoints(
                "https://fhir.example.org/oauth/authorize",
                "https://fhir.example.org/oauth/token",
            )
            .with_scopes(["openid", "patient/*.read"]);
        let client = FhirAuthClient::from_custom_config(config, settings).expect("custom");
        assert_eq!(client.provider().id, "custom");
    }

    #[test]
    fn disconnect_is_idempotent() {
        let client = client();
        client.authorization_url(None).expect("url");
        client.disconnect().expect("first");
        client.disconnect().expect("second");
        assert_eq!(client.session_state(), SessionState::Disconnected);
        assert!(client.connection().is_none());
    }
}
