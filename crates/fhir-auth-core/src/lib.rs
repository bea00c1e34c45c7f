//! Building blocks shared by SMART-on-FHIR clients: provider registry, PKCE
//! helpers, session storage, launch-context parsing and connection types.
//!
//! Nothing in this crate performs network I/O.

pub mod clock;
pub mod launch;
pub mod pkce;
pub mod provider;
pub mod state;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use launch::{LaunchContext, LaunchError, parse_launch_context};
pub use pkce::{
    PkceError, PkcePair, generate_code_challenge, generate_code_verifier,
    generate_code_verifier_with_len, generate_state,
};
pub use provider::{
    CUSTOM_PROVIDER_ID, ProviderConfig, ProviderRegistry, RegistryError, get_provider_config,
    list_patient_facing_providers,
};
pub use state::{
    InMemorySessionStore, PendingAuthorization, STATE_KEY, SessionStore, SessionStoreError,
    VERIFIER_KEY,
};
pub use types::{Connection, DEFAULT_EXPIRES_IN_SECS, TokenResponse};
