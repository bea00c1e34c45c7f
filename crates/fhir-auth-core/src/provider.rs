//! Static per-vendor OAuth configuration.
//!
//! Built-in providers ship as a JSON manifest embedded in the crate and are
//! validated against `providers/schema/provider.schema.json` on first use.
//! Operators can add providers with [`ProviderRegistry::load_dir`], which
//! reads every `*.provider.json` file in a directory through the same schema.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use jsonschema::Validator;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Id of the blank template callers fill in themselves.
pub const CUSTOM_PROVIDER_ID: &str = "custom";

static PROVIDER_SCHEMA: &str = include_str!("../providers/schema/provider.schema.json");
static BUILTIN_PROVIDERS: &str = include_str!("../providers/builtin.providers.json");

static SCHEMA_CACHE: OnceCell<Validator> = OnceCell::new();
static BUILTIN_REGISTRY: OnceCell<ProviderRegistry> = OnceCell::new();

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown FHIR provider `{0}`")]
    UnknownProvider(String),
    #[error("invalid provider schema: {0}")]
    SchemaInvalid(String),
    #[error("failed to read provider manifest `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in provider manifest `{origin}`: {source}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("provider manifest `{origin}` does not satisfy schema: {errors:?}")]
    Invalid { origin: String, errors: Vec<String> },
    #[error("duplicate provider manifest for id `{0}`")]
    DuplicateId(String),
    #[error("invalid provider config `{id}`: {reason}")]
    InvalidConfig { id: String, reason: String },
}

/// OAuth endpoints, scopes and flags for one EHR vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localized_name: Option<String>,
    /// FHIR API root; also sent as the `aud` parameter.
    pub base_url: String,
    pub authorize_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    #[serde(default)]
    pub supported_resources: Vec<String>,
    /// Provider expects `launch`/`iss` on the authorize request.
    pub requires_launch_context: bool,
    pub patient_facing: bool,
}

impl ProviderConfig {
    /// Blank configuration for a caller-supplied server.
    pub fn custom_template() -> Self {
        Self {
            id: CUSTOM_PROVIDER_ID.to_owned(),
            name: "Custom FHIR Server".to_owned(),
            localized_name: Some("Servidor FHIR personalizado".to_owned()),
            base_url: String::new(),
            authorize_url: String::new(),
            token_url: String::new(),
            scopes: Vec::new(),
            supported_resources: Vec::new(),
            requires_launch_context: false,
            patient_facing: false,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_endpoints(
        mut self,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        self.authorize_url = authorize_url.into();
        self.token_url = token_url.into();
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_launch_context(mut self, required: bool) -> Self {
        self.requires_launch_context = required;
        self
    }

    /// Space-joined scope string for the authorize request.
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }

    pub fn supports_resource(&self, resource_type: &str) -> bool {
        self.supported_resources
            .iter()
            .any(|resource| resource == resource_type)
    }

    /// Check a caller-built config before it is used for a flow.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: String| RegistryError::InvalidConfig {
            id: self.id.clone(),
            reason,
        };
        if self.id.trim().is_empty() {
            return Err(invalid("id is empty".into()));
        }
        for (field, value) in [
            ("base_url", &self.base_url),
            ("authorize_url", &self.authorize_url),
            ("token_url", &self.token_url),
        ] {
            let url = Url::parse(value).map_err(|err| invalid(format!("{field}: {err}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(invalid(format!("{field} must use http or https")));
            }
        }
        if self.scopes.iter().all(|scope| scope.trim().is_empty()) {
            return Err(invalid("at least one scope is required".into()));
        }
        Ok(())
    }
}

/// Immutable lookup table of provider configurations keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    /// Registry of the providers shipped with the crate.
    pub fn builtin() -> Result<&'static ProviderRegistry, RegistryError> {
        BUILTIN_REGISTRY.get_or_try_init(|| Self::from_json_str("builtin", BUILTIN_PROVIDERS))
    }

    /// Parse a manifest holding one provider object or an array of them.
    pub fn from_json_str(origin: &str, contents: &str) -> Result<Self, RegistryError> {
        let value: Value = serde_json::from_str(contents).map_err(|source| RegistryError::Json {
            origin: origin.to_owned(),
            source,
        })?;
        let mut registry = Self::default();
        registry.insert_manifest(origin, value)?;
        Ok(registry)
    }

    /// Load every `*.provider.json` file under `root`.
    pub fn load_dir(root: &Path) -> Result<Self, RegistryError> {
        let entries = fs::read_dir(root).map_err(|source| RegistryError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(".provider.json"))
            })
            .collect();
        paths.sort();

        let mut registry = Self::default();
        for path in paths {
            let contents = fs::read_to_string(&path).map_err(|source| RegistryError::Io {
                path: path.clone(),
                source,
            })?;
            let origin = path.display().to_string();
            let value: Value =
                serde_json::from_str(&contents).map_err(|source| RegistryError::Json {
                    origin: origin.clone(),
                    source,
                })?;
            registry.insert_manifest(&origin, value)?;
        }

        tracing::debug!(
            target: "fhir_auth.registry",
            root = %root.display(),
            providers = registry.providers.len(),
            "loaded provider manifests",
        );
        Ok(registry)
    }

    /// Overlay `other` on top of `self`; entries in `other` win.
    pub fn merge(mut self, other: ProviderRegistry) -> Self {
        self.providers.extend(other.providers);
        self
    }

    /// Registered entry only; the `custom` template is not stored here.
    pub fn lookup(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.get(id)
    }

    /// Resolve `id`, handing out a blank template for `custom`.
    pub fn get(&self, id: &str) -> Result<ProviderConfig, RegistryError> {
        if let Some(config) = self.lookup(id) {
            return Ok(config.clone());
        }
        if id == CUSTOM_PROVIDER_ID {
            return Ok(ProviderConfig::custom_template());
        }
        Err(RegistryError::UnknownProvider(id.to_owned()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn patient_facing(&self) -> Vec<&ProviderConfig> {
        self.iter().filter(|config| config.patient_facing).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn insert_manifest(&mut self, origin: &str, value: Value) -> Result<(), RegistryError> {
        let items = match value {
            Value::Array(items) => items,
            single => vec![single],
        };
        let schema = schema()?;
        for item in items {
            validate_manifest(schema, origin, &item)?;
            let config: ProviderConfig =
                serde_json::from_value(item).map_err(|source| RegistryError::Json {
                    origin: origin.to_owned(),
                    source,
                })?;
            if self.providers.contains_key(&config.id) || config.id == CUSTOM_PROVIDER_ID {
                return Err(RegistryError::DuplicateId(config.id));
            }
            self.providers.insert(config.id.clone(), config);
        }
        Ok(())
    }
}

/// Look up a provider in the built-in registry.
pub fn get_provider_config(id: &str) -> Result<ProviderConfig, RegistryError> {
    ProviderRegistry::builtin()?.get(id)
}

/// Built-in providers flagged as patient-facing, ordered by id.
pub fn list_patient_facing_providers() -> Result<Vec<ProviderConfig>, RegistryError> {
    Ok(ProviderRegistry::builtin()?
        .patient_facing()
        .into_iter()
        .cloned()
        .collect())
}

fn schema() -> Result<&'static Validator, RegistryError> {
    SCHEMA_CACHE.get_or_try_init(|| {
        let value: Value =
            serde_json::from_str(PROVIDER_SCHEMA).map_err(|source| RegistryError::Json {
                origin: "provider.schema.json".into(),
                source,
            })?;
        jsonschema::validator_for(&value).map_err(|err| RegistryError::SchemaInvalid(err.to_string()))
    })
}

fn validate_manifest(schema: &Validator, origin: &str, value: &Value) -> Result<(), RegistryError> {
    let errors: Vec<String> = schema.iter_errors(value).map(|err| err.to_string()).collect();
    if !errors.is_empty() {
        return Err(RegistryError::Invalid {
            origin: origin.to_owned(),
            errors,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn write_manifest(dir: &Path, name: &str, value: &Value) {
        let path = dir.join(format!("{name}.provider.json"));
        fs::write(path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
    }

    fn sandbox_manifest(id: &str) -> Value {
        json!({
            "id": id,
            "name": "Sandbox",
            "base_url": "https://sandbox.example/fhir",
            "authorize_url": "https://sandbox.example/authorize",
            "token_url": "https://sandbox.example/token",
            "scopes": ["patient/Patient.read"],
            "supported_resources": ["Patient"],
            "requires_launch_context": false,
            "patient_facing": true
        })
    }

    #[test]
    fn builtin_registry_has_every_vendor() {
        let registry = ProviderRegistry::builtin().expect("builtin");
        let ids: Vec<_> = registry.ids().collect();
        assert_eq!(
            ids,
            vec![
                "allscripts",
                "athenahealth",
                "cerner",
                "epic",
                "medicare-blue-button",
                "meditech",
                "va",
                "va-health",
            ]
        );
        for config in registry.iter() {
            config.validate().expect("builtin entry is valid");
        }
    }

    #[test]
    fn launch_requirements_match_vendor_behavior() {
        let registry = ProviderRegistry::builtin().unwrap();
        for id in ["epic", "cerner", "va-health", "allscripts", "athenahealth", "meditech"] {
            let config = registry.lookup(id).unwrap();
            assert!(config.requires_launch_context, "{id} should require launch");
            assert!(config.scopes.iter().any(|s| s == "launch/patient"));
        }
        for id in ["medicare-blue-button", "va"] {
            assert!(!registry.lookup(id).unwrap().requires_launch_context);
        }
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let err = get_provider_config("nextgen").expect_err("unknown");
        assert!(matches!(err, RegistryError::UnknownProvider(id) if id == "nextgen"));
    }

    #[test]
    fn custom_resolves_to_blank_template() {
        let config = get_provider_config("custom").expect("custom");
        assert!(config.base_url.is_empty());
        assert!(config.scopes.is_empty());
        assert!(matches!(
            config.validate(),
            Err(RegistryError::InvalidConfig { .. })
        ));

        let filled = config
            .with_base_url("https://fhir.local/r4")
            .with_endpoints("https://fhir.local/auth", "https://fhir.local/token")
            .with_scopes(["patient/*.read"]);
        filled.validate().expect("filled template validates");
    }

    #[test]
    fn patient_facing_filter() {
        let ids: Vec<_> = list_patient_facing_providers()
            .unwrap()
            .into_iter()
            .map(|config| config.id)
            .collect();
        assert_eq!(ids, vec!["cerner", "epic", "medicare-blue-button", "va-health"]);
    }

    #[test]
    fn loads_manifests_from_directory() {
        let root = tempdir().expect("tempdir");
        write_manifest(root.path(), "sandbox", &sandbox_manifest("sandbox"));
        write_manifest(
            root.path(),
            "pair",
            &json!([sandbox_manifest("sandbox-a"), sandbox_manifest("sandbox-b")]),
        );
        fs::write(root.path().join("notes.json"), b"not a manifest").unwrap();

        let loaded = ProviderRegistry::load_dir(root.path()).expect("load");
        assert_eq!(loaded.len(), 3);

        let merged = ProviderRegistry::builtin().unwrap().clone().merge(loaded);
        assert_eq!(merged.get("sandbox-b").unwrap().name, "Sandbox");
        assert!(merged.lookup("epic").is_some());
    }

    #[test]
    fn schema_violations_are_reported() {
        let mut manifest = sandbox_manifest("broken");
        manifest.as_object_mut().unwrap().remove("token_url");
        let err = ProviderRegistry::from_json_str("inline", &manifest.to_string())
            .expect_err("schema violation");
        match err {
            RegistryError::Invalid { origin, errors } => {
                assert_eq!(origin, "inline");
                assert!(errors.iter().any(|e| e.contains("token_url")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let doc = json!([sandbox_manifest("dup"), sandbox_manifest("dup")]);
        let err = ProviderRegistry::from_json_str("inline", &doc.to_string()).expect_err("dup");
        assert!(matches!(err, RegistryError::DuplicateId(id) if id == "dup"));
    }

    #[test]
    fn custom_id_is_reserved() {
        let err = ProviderRegistry::from_json_str("inline", &sandbox_manifest("custom").to_string())
            .expect_err("reserved");
        assert!(matches!(err, RegistryError::DuplicateId(_)));
    }
}
