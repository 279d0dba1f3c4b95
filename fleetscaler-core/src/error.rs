use thiserror::Error;

/// Aggregate error type for the controller's domain operations.
///
/// Individual crates (`fleetscaler-power`, `fleetscaler-metrics`, ...) define
/// their own narrower error enums for the failure modes specific to that
/// client; this type is what the engine and the binary actually match on.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("power API error: {0}")]
    Power(String),

    #[error("metrics error: {0}")]
    Metrics(String),

    #[error("upstream publish error: {0}")]
    Upstream(String),

    #[error("deploy error: {0}")]
    Deploy(String),

    #[error("remote shell error: {0}")]
    Shell(String),
}

pub type ControllerResult<T> = Result<T, ControllerError>;

impl From<serde_json::Error> for ControllerError {
    fn from(err: serde_json::Error) -> Self {
        ControllerError::Config(format!("JSON parsing error: {err}"))
    }
}

impl From<std::io::Error> for ControllerError {
    fn from(err: std::io::Error) -> Self {
        ControllerError::Upstream(format!("IO error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_variant_prefix() {
        let err = ControllerError::Power("unknown server 'x'".to_string());
        assert_eq!(err.to_string(), "power API error: unknown server 'x'");
    }
}
