//! SMART "EHR launch" context carried on the inbound launch URL.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("launch url is not parseable: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Parameters an EHR supplies when it initiates the app launch.
///
/// `iss` is always present; it is empty when the EHR omitted it, which callers
/// performing an EHR launch should treat as a launch error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch: Option<String>,
    #[serde(default)]
    pub iss: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl LaunchContext {
    pub fn is_ehr_launch(&self) -> bool {
        !self.iss.is_empty()
    }
}

/// Extract the launch parameters from `url`. Never fails on missing values.
pub fn parse_launch_context(url: &str) -> Result<LaunchContext, LaunchError> {
    let parsed = Url::parse(url)?;
    let mut context = LaunchContext::default();
    for (key, value) in parsed.query_pairs() {
        let value = value.into_owned();
        match key.as_ref() {
            "launch" => context.launch = Some(value),
            "iss" => context.iss = value,
            "aud" => context.aud = Some(value),
            "patient" => context.patient = Some(value),
            "encounter" => context.encounter = Some(value),
            "location" => context.location = Some(value),
            _ => {}
        }
    }
    Ok(context)
}
