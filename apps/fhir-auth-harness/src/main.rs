//! Single-user harness for trying SMART launches against sandbox EHRs.
//!
//! One `FhirAuthClient` backs every route, so whoever reaches the listener
//! acts as the signed-in patient. The listener is therefore restricted to
//! loopback addresses.

use std::{collections::HashMap, net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{
    Json, Router,
    extract::{OriginalUri, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use fhir_auth_client::{
    ClientSettings, FhirAuthClient, FhirAuthError, RequestOptions, discover_smart_configuration,
};
use fhir_auth_core::{ProviderRegistry, parse_launch_context};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

#[derive(Clone)]
struct AppState {
    config: Arc<HarnessConfig>,
    client: Arc<FhirAuthClient>,
}

#[derive(Debug, Clone)]
struct HarnessConfig {
    listen_addr: SocketAddr,
    provider: String,
    provider_dir: Option<PathBuf>,
    issuer: Option<String>,
    scopes: Vec<String>,
}

impl HarnessConfig {
    fn from_env() -> Result<Self, HarnessError> {
        let listen_addr: SocketAddr = std::env::var("HARNESS_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .map_err(|err| HarnessError::Config(format!("invalid HARNESS_LISTEN_ADDR: {err}")))?;
        ensure_loopback(listen_addr)?;

        let provider = std::env::var("FHIR_PROVIDER").unwrap_or_else(|_| "epic".to_string());
        let provider_dir = std::env::var("FHIR_PROVIDER_DIR").ok().map(PathBuf::from);

        let issuer = match std::env::var("FHIR_ISSUER") {
            Ok(raw) => {
                Url::parse(&raw)
                    .map_err(|err| HarnessError::Config(format!("invalid FHIR_ISSUER: {err}")))?;
                Some(raw)
            }
            Err(_) => None,
        };

        let scopes = std::env::var("FHIR_SCOPES")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Ok(Self {
            listen_addr,
            provider,
            provider_dir,
            issuer,
            scopes,
        })
    }

    fn registry(&self) -> Result<ProviderRegistry, HarnessError> {
        let builtin = ProviderRegistry::builtin()
            .map_err(|err| HarnessError::Config(err.to_string()))?
            .clone();
        let Some(dir) = &self.provider_dir else {
            return Ok(builtin);
        };
        let extra = ProviderRegistry::load_dir(dir)
            .map_err(|err| HarnessError::Config(err.to_string()))?;
        info!(dir = %dir.display(), providers = extra.len(), "loaded operator providers");
        Ok(builtin.merge(extra))
    }
}

fn ensure_loopback(addr: SocketAddr) -> Result<(), HarnessError> {
    if addr.ip().is_loopback() {
        return Ok(());
    }
    Err(HarnessError::Config(format!(
        "HARNESS_LISTEN_ADDR {addr} is not a loopback address; the harness holds a single user's session"
    )))
}

#[derive(Debug, Error)]
enum HarnessError {
    #[error("{0}")]
    Config(String),
    #[error("launch request is missing `iss`")]
    MissingIss,
    #[error("missing authorization code")]
    MissingCode,
    #[error("missing authorization state")]
    MissingState,
    #[error("authorization server returned {0}")]
    Provider(String),
    #[error(transparent)]
    Fhir(#[from] FhirAuthError),
    #[error("{0}")]
    Other(String),
}

impl IntoResponse for HarnessError {
    fn into_response(self) -> Response {
        let status = match &self {
            HarnessError::Config(_) | HarnessError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HarnessError::MissingIss | HarnessError::MissingCode | HarnessError::MissingState => {
                StatusCode::BAD_REQUEST
            }
            HarnessError::Provider(_) => StatusCode::BAD_GATEWAY,
            HarnessError::Fhir(err) => fhir_status(err),
        };
        let mut body = serde_json::json!({ "error": self.to_string() });
        if let HarnessError::Fhir(err) = &self {
            body["message"] = Value::String(err.user_message());
            body["localized_message"] = Value::String(err.localized_user_message());
        }
        (status, Json(body)).into_response()
    }
}

fn fhir_status(err: &FhirAuthError) -> StatusCode {
    if let Some(request) = err.as_request() {
        return StatusCode::from_u16(request.status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    }
    match err {
        FhirAuthError::Auth(_) => StatusCode::UNAUTHORIZED,
        FhirAuthError::Config(_) | FhirAuthError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    }
}

#[tokio::main]
async fn main() -> Result<(), HarnessError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fhir_auth_harness=info,fhir_auth=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(HarnessConfig::from_env()?);
    let settings =
        ClientSettings::from_env().map_err(|err| HarnessError::Config(err.to_string()))?;
    let client = build_client(&config, settings).await?;
    info!(
        provider = %client.provider().id,
        base_url = %client.provider().base_url,
        "fhir client ready"
    );

    let app_state = AppState {
        config: Arc::clone(&config),
        client: Arc::new(client),
    };

    let router = Router::new()
        .route("/health", get(health))
        .route("/login", get(login))
        .route("/launch", get(ehr_launch))
        .route("/callback", get(callback))
        .route("/status", get(status))
        .route("/fhir/{*path}", get(fhir_proxy))
        .route("/logout", post(logout))
        .with_state(app_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        );

    info!("listening on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .map_err(|err| HarnessError::Other(format!("failed to bind listener: {err}")))?;
    axum::serve(listener, router)
        .await
        .map_err(|err| HarnessError::Other(format!("server error: {err}")))
}

async fn build_client(
    config: &HarnessConfig,
    settings: ClientSettings,
) -> Result<FhirAuthClient, HarnessError> {
    if let Some(issuer) = &config.issuer {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| HarnessError::Other(format!("http client: {err}")))?;
        let discovered = discover_smart_configuration(&http, issuer).await?;
        if !discovered.supports_s256() {
            warn!(issuer = %issuer, "server does not advertise S256; continuing anyway");
        }
        let provider = discovered.provider_config(issuer, &config.scopes);
        return Ok(FhirAuthClient::builder(settings)
            .http_client(http)
            .custom_provider(provider)?);
    }

    let registry = config.registry()?;
    let builder = FhirAuthClient::builder(settings);
    if config.scopes.is_empty() {
        return Ok(builder.registry(registry).registered_provider(&config.provider)?);
    }
    let provider = registry
        .get(&config.provider)
        .map_err(FhirAuthError::from)?
        .with_scopes(config.scopes.iter().cloned());
    Ok(builder.custom_provider(provider)?)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

async fn login(State(state): State<AppState>) -> Result<Response, HarnessError> {
    let request = state.client.authorization_url(None)?;
    Ok(Redirect::to(request.url.as_str()).into_response())
}

async fn ehr_launch(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> Result<Response, HarnessError> {
    let absolute = format!("http://{}{}", state.config.listen_addr, uri);
    let context = parse_launch_context(&absolute)
        .map_err(|err| HarnessError::Other(format!("launch url: {err}")))?;
    if !context.is_ehr_launch() {
        return Err(HarnessError::MissingIss);
    }
    if context.iss.trim_end_matches('/') != state.client.provider().base_url.trim_end_matches('/')
    {
        warn!(iss = %context.iss, "launch issuer differs from configured provider");
    }
    let request = state.client.authorization_url(Some(&context))?;
    Ok(Redirect::to(request.url.as_str()).into_response())
}

#[derive(Debug, Deserialize)]
struct AuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
struct ConnectionSummary {
    connection_id: String,
    provider_id: String,
    provider_name: String,
    patient_id: String,
    scopes: Vec<String>,
    has_refresh_token: bool,
    #[serde(with = "time::serde::rfc3339")]
    expires_at: OffsetDateTime,
    fhir_version: Option<String>,
}

async fn callback(
    State(state): State<AppState>,
    Query(params): Query<AuthCallback>,
) -> Result<Json<ConnectionSummary>, HarnessError> {
    if let Some(error) = params.error {
        return Err(HarnessError::Provider(format!(
            "{}: {}",
            error,
            params.error_description.unwrap_or_default()
        )));
    }
    let code = params.code.ok_or(HarnessError::MissingCode)?;
    let returned_state = params.state.ok_or(HarnessError::MissingState)?;

    let conn = state
        .client
        .exchange_code(&code, &returned_state, None)
        .await?;

    Ok(Json(ConnectionSummary {
        fhir_version: conn
            .capabilities
            .as_ref()
            .and_then(|cap| cap.get("fhirVersion"))
            .and_then(Value::as_str)
            .map(str::to_string),
        scopes: conn.scopes().map(str::to_string).collect(),
        has_refresh_token: conn.refresh_token.is_some(),
        connection_id: conn.id,
        provider_id: conn.provider_id,
        provider_name: conn.provider_name,
        patient_id: conn.patient_id,
        expires_at: conn.expires_at,
    }))
}

#[derive(Serialize)]
struct StatusView {
    state: String,
    provider: String,
    authenticated: bool,
    patient_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    expires_at: Option<OffsetDateTime>,
}

async fn status(State(state): State<AppState>) -> Json<StatusView> {
    let conn = state.client.connection();
    Json(StatusView {
        state: format!("{:?}", state.client.session_state()),
        provider: state.client.provider().id.clone(),
        authenticated: state.client.is_authenticated(),
        patient_id: conn.as_ref().map(|c| c.patient_id.clone()),
        expires_at: conn.map(|c| c.expires_at),
    })
}

async fn fhir_proxy(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, HarnessError> {
    let options = query
        .into_iter()
        .fold(RequestOptions::new(), |options, (key, value)| {
            options.query(key, value)
        });
    let resource = state.client.request::<Value>(&path, options).await?;
    Ok(Json(resource))
}

async fn logout(State(state): State<AppState>) -> Result<Json<Value>, HarnessError> {
    state.client.disconnect()?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
