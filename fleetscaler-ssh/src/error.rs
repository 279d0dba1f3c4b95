use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("failed to spawn ssh: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("remote command timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<ShellError> for fleetscaler_core::ControllerError {
    fn from(err: ShellError) -> Self {
        fleetscaler_core::ControllerError::Shell(err.to_string())
    }
}
