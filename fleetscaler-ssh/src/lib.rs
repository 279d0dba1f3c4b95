mod error;
mod reachability;
mod remote_shell;

pub use error::ShellError;
pub use reachability::is_reachable;
pub use remote_shell::{run_remote_command, run_remote_script, RemoteCommandOutput};
