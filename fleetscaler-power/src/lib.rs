use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PowerError {
    #[error("power API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("power API returned {status}: {body}")]
    NonSuccess { status: StatusCode, body: String },
}

impl From<PowerError> for fleetscaler_core::ControllerError {
    fn from(err: PowerError) -> Self {
        fleetscaler_core::ControllerError::Power(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    On,
    Off,
}

impl PowerAction {
    fn as_str(self) -> &'static str {
        match self {
            PowerAction::On => "on",
            PowerAction::Off => "off",
        }
    }
}

#[derive(Debug, Serialize)]
struct PowerRequest<'a> {
    action: &'a str,
    server: &'a str,
}

/// Client for the external VM power API. The client does not pre-validate
/// `server_name` against any local list — the power service is the sole
/// authority on whether a server exists.
pub struct PowerClient {
    http: Client,
    base_url: String,
}

impl PowerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Requests a power state transition for `server_name`. Deliberately
    /// carries no explicit client-side timeout beyond reqwest's transport
    /// defaults, matching the upstream service's contract.
    pub async fn set_power(&self, server_name: &str, action: PowerAction) -> Result<(), PowerError> {
        let url = format!("{}/api/v1/servers/power", self.base_url.trim_end_matches('/'));
        let request = PowerRequest {
            action: action.as_str(),
            server: server_name,
        };

        let response = self.http.post(&url).json(&request).send().await?;
        let status = response.status();

        if status == StatusCode::OK {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(PowerError::NonSuccess { status, body })
    }
}
