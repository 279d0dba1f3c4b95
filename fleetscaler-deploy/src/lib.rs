use base64::{engine::general_purpose::STANDARD, Engine as _};
use fleetscaler_core::{Agent, DeploySecrets};
use fleetscaler_ssh::{run_remote_script, ShellError};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_REPO_URL: &str = "https://github.com/xscotophilic/cluster-ops-playground";
const DEFAULT_COMPOSE_PATH: &str = "distributed-pluggable-api/compose";
const DEFAULT_TARGET_DIR: &str = "pluggable-api";

const DEPLOY_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Self-contained provisioning recipe, piped over the remote shell's stdin
/// and invoked as `bash -s -- <repo> <compose_path> <target_dir> <cors_b64>
/// <postgres_b64> <redis_b64>`. Idempotent and atomic from the caller's
/// point of view: a prior deploy directory is backed up before the new one
/// is swapped in, and restored if the compose file is missing or `compose up`
/// fails.
const PROVISION_SCRIPT: &str = r#"#!/bin/bash
set -euo pipefail

if [ "${DEBUG:-0}" = "1" ]; then
  set -x
fi

pluggable_api_repo="$1"
relative_compose_root="$2"
target_sub_dir="$3"
cors_b64="$4"
postgres_b64="$5"
redis_b64="$6"

decode_b64() {
  local input="$1"
  local out
  if out=$(printf "%s" "$input" | base64 --decode 2>/dev/null); then
    printf '%s' "$out"
    return 0
  fi
  if out=$(printf "%s" "$input" | base64 -d 2>/dev/null); then
    printf '%s' "$out"
    return 0
  fi
  if out=$(printf "%s" "$input" | base64 -D 2>/dev/null); then
    printf '%s' "$out"
    return 0
  fi
  printf ''
  return 0
}

cors_origins="$(decode_b64 "${cors_b64}")"
postgres_url="$(decode_b64 "${postgres_b64}")"
redis_url="$(decode_b64 "${redis_b64}")"

case "$relative_compose_root" in
  /*) ;;
  *) relative_compose_root="/${relative_compose_root}" ;;
esac

case "$target_sub_dir" in
  /*) ;;
  *) target_sub_dir="/${target_sub_dir}" ;;
esac

if ! readlink -f / >/dev/null 2>&1; then
    echo "[ERROR] readlink -f not available on remote host." >&2
    exit 1
fi

user_home=$(readlink -f "$HOME")
deploy_dir=$(readlink -f "$user_home$target_sub_dir")

for d in "$deploy_dir"; do
  case "$d" in
    "$user_home"/*) ;;
    *)
      echo "[ERROR] Directory outside user home: $d" >&2
      exit 2
      ;;
  esac
done

if [ -z "$deploy_dir" ] || [ "$deploy_dir" = "/" ] || [ "$deploy_dir" = "$user_home" ]; then
    echo "[ERROR] Refusing to operate on unsafe deploy_dir: '$deploy_dir'" >&2
    exit 2
fi

if ! command -v git >/dev/null 2>&1; then
    echo "[INFO] git not found, attempting installation..."
    if command -v apt-get >/dev/null 2>&1; then
        sudo apt-get update -y || { echo "[ERROR] apt-get update failed"; exit 3; }
        sudo apt-get install -y git || { echo "[ERROR] git installation failed"; exit 3; }
    else
        echo "[WARN] No supported package manager to install git." >&2
        if ! command -v git >/dev/null 2>&1; then
            echo "[ERROR] git not found and cannot be installed."
            exit 3
        fi
    fi
fi

tmpdir=""
if tmpdir=$(mktemp -d /tmp/deploy.XXXXXX 2>/dev/null); then
    :
elif tmpdir=$(mktemp -d 2>/dev/null); then
    :
else
    tmpdir="/tmp/deploy.$RANDOM.$$"
    mkdir -p "$tmpdir"
fi

cleanup() {
  if [ -n "$tmpdir" ] && [[ "$tmpdir" == /tmp/deploy.* ]]; then
    rm -rf "$tmpdir"
  fi
}
trap cleanup EXIT

echo "[INFO] Cloning repository $pluggable_api_repo into $tmpdir/repo"
if ! git clone --depth=1 "$pluggable_api_repo" "$tmpdir/repo"; then
    echo "[ERROR] Repository clone failed."
    exit 4
fi

echo "[INFO] Preparing $deploy_dir directory (safe replace with backup)"
mkdir -p "$(dirname "$deploy_dir")"

backup_dir="${deploy_dir}.bak.$(date +%s)"

if [ -d "$deploy_dir" ]; then
    echo "[INFO] Backing up existing deploy dir to $backup_dir"
    if mv "$deploy_dir" "$backup_dir" 2>/dev/null; then
        echo "[INFO] Backup created."
    else
        echo "[WARN] mv failed; attempting copy+remove fallback"
        rm -rf "$backup_dir"
        mkdir -p "$backup_dir"
        cp -a "$deploy_dir"/. "$backup_dir"/ || { echo "[WARN] copy fallback failed"; }
        rm -rf "$deploy_dir"
    fi
fi

if mv "$tmpdir/repo" "$deploy_dir" 2>/dev/null; then
    echo "[INFO] Repository moved into place."
else
    echo "[INFO] Fallback safe move"
    rm -rf "$deploy_dir"
    mv "$tmpdir/repo" "$deploy_dir"
fi

compose_dir=$(readlink -f "$deploy_dir$relative_compose_root")

for d in "$compose_dir"; do
  case "$d" in
    "$user_home"/*) ;;
    *)
      echo "[ERROR] Directory outside user home: $d" >&2
      exit 2
      ;;
  esac
done

compose_file="$compose_dir/docker-compose.yml"
if [ ! -f "$compose_file" ]; then
    echo "[ERROR] docker-compose.yml not found at $compose_file"
    if [ -d "$backup_dir" ]; then
        echo "[INFO] Restoring previous version from backup..."
        rm -rf "$deploy_dir"
        mv "$backup_dir" "$deploy_dir"
    fi
    exit 6
fi

env_file="$compose_dir/.env"
mkdir -p "$(dirname "$env_file")"

sanitize_value() {
  printf "%s" "$1" | tr -d '\r\n'
}

cors_line=$(sanitize_value "$cors_origins")
pg_line=$(sanitize_value "$postgres_url")
redis_line=$(sanitize_value "$redis_url")

{
  printf '%s\n' "CORS_ORIGINS=${cors_line}"
  printf '%s\n' "POSTGRES_URL=${pg_line}"
  printf '%s\n' "REDIS_URL=${redis_line}"
} > "$env_file"

chmod 600 "$env_file" || true
echo "[INFO] Wrote $env_file"

if ! command -v docker >/dev/null 2>&1; then
    echo "[INFO] Docker not found, attempting installation..."
    if command -v apt-get >/dev/null 2>&1; then
        export DEBIAN_FRONTEND=noninteractive
        echo "[INFO] Adding Docker official repository..."
        sudo mkdir -p /etc/apt/keyrings
        curl -fsSL https://download.docker.com/linux/ubuntu/gpg | sudo gpg --dearmor -o /etc/apt/keyrings/docker.gpg 2>/dev/null || { echo "[ERROR] Failed to add Docker GPG key"; exit 5; }

        ARCH=$(dpkg --print-architecture)
        echo "deb [arch=${ARCH} signed-by=/etc/apt/keyrings/docker.gpg] https://download.docker.com/linux/ubuntu $(lsb_release -cs) stable" | \
          sudo tee /etc/apt/sources.list.d/docker.list > /dev/null

        sudo -E apt-get update -y || { echo "[ERROR] apt-get update failed"; exit 5; }
        sudo -E apt-get install -y docker-ce docker-ce-cli containerd.io docker-compose-plugin || { echo "[ERROR] Docker installation failed"; exit 5; }
        sudo systemctl enable --now docker || { echo "[ERROR] Docker service activation failed"; exit 5; }
    else
        echo "[WARN] Unsupported OS for automated Docker installation." >&2
        if ! command -v docker >/dev/null 2>&1; then
            echo "[ERROR] Docker not available."
            exit 5
        fi
    fi
else
    echo "[INFO] Docker already installed."
fi

if ! docker compose version >/dev/null 2>&1; then
    echo "[INFO] Docker Compose not found, attempting installation..."
    if command -v apt-get >/dev/null 2>&1; then
        export DEBIAN_FRONTEND=noninteractive
        sudo mkdir -p /etc/apt/keyrings
        curl -fsSL https://download.docker.com/linux/ubuntu/gpg | sudo gpg --dearmor -o /etc/apt/keyrings/docker.gpg 2>/dev/null || true

        ARCH=$(dpkg --print-architecture)
        echo "deb [arch=${ARCH} signed-by=/etc/apt/keyrings/docker.gpg] https://download.docker.com/linux/ubuntu $(lsb_release -cs) stable" | \
          sudo tee /etc/apt/sources.list.d/docker.list > /dev/null

        sudo -E apt-get update -y || { echo "[ERROR] apt-get update failed"; exit 5; }
        sudo -E apt-get install -y docker-compose-plugin || { echo "[ERROR] Docker Compose installation failed"; exit 5; }
    else
        echo "[WARN] Unsupported OS for automated Docker Compose installation." >&2
        exit 5
    fi
else
    echo "[INFO] Docker Compose already installed."
fi

echo "[INFO] Starting services using docker compose..."
if ! sudo docker compose -f "$compose_file" up -d --remove-orphans; then
    echo "[ERROR] docker compose failed to start services." >&2
    if [ -d "$backup_dir" ]; then
        echo "[INFO] Rolling back to previous version..."
        rm -rf "$deploy_dir"
        mv "$backup_dir" "$deploy_dir"
        echo "[INFO] Previous version restored."
    fi
    exit 7
fi

if [ -d "$backup_dir" ]; then
    rm -rf "$backup_dir"
fi

echo "[SUCCESS] Deployment completed. Services should be running."

echo "[INFO] docker compose ps (services):"
sudo docker compose -f "$compose_file" ps || true

echo "[INFO] recent logs (tail 100):"
sudo docker compose -f "$compose_file" logs --tail=100 || true

exit 0
"#;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Shell(#[from] ShellError),

    #[error("deploy recipe exited with status {status}, output:\n{output}")]
    RecipeFailed { status: i32, output: String },
}

impl From<DeployError> for fleetscaler_core::ControllerError {
    fn from(err: DeployError) -> Self {
        fleetscaler_core::ControllerError::Deploy(err.to_string())
    }
}

/// Executes the provisioning recipe against a single agent. Recipe
/// parameters default to the pluggable-API reference stack and are
/// overridable via environment for other deployments of the same recipe.
pub struct RemoteDeployer {
    repo_url: String,
    compose_path: String,
    target_dir: String,
}

impl Default for RemoteDeployer {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RemoteDeployer {
    pub fn from_env() -> Self {
        Self {
            repo_url: std::env::var("DEPLOY_REPO_URL").unwrap_or_else(|_| DEFAULT_REPO_URL.to_string()),
            compose_path: std::env::var("DEPLOY_COMPOSE_PATH")
                .unwrap_or_else(|_| DEFAULT_COMPOSE_PATH.to_string()),
            target_dir: std::env::var("DEPLOY_TARGET_DIR")
                .unwrap_or_else(|_| DEFAULT_TARGET_DIR.to_string()),
        }
    }

    pub async fn deploy(&self, agent: &Agent, secrets: &DeploySecrets) -> Result<(), DeployError> {
        let positional_args = vec![
            self.repo_url.clone(),
            self.compose_path.clone(),
            self.target_dir.clone(),
            STANDARD.encode(secrets.cors_origins.as_bytes()),
            STANDARD.encode(secrets.postgres_url.as_bytes()),
            STANDARD.encode(secrets.redis_url.as_bytes()),
        ];

        let output =
            run_remote_script(&agent.ssh, PROVISION_SCRIPT, &positional_args, DEPLOY_TIMEOUT).await?;

        if !output.succeeded() {
            return Err(DeployError::RecipeFailed {
                status: output.status,
                output: format!("{}{}", output.stdout, output.stderr),
            });
        }

        tracing::info!(server = %agent.server_name, "remote deploy succeeded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_recipe_when_env_unset() {
        std::env::remove_var("DEPLOY_REPO_URL");
        std::env::remove_var("DEPLOY_COMPOSE_PATH");
        std::env::remove_var("DEPLOY_TARGET_DIR");

        let deployer = RemoteDeployer::from_env();
        assert_eq!(deployer.repo_url, DEFAULT_REPO_URL);
        assert_eq!(deployer.compose_path, DEFAULT_COMPOSE_PATH);
        assert_eq!(deployer.target_dir, DEFAULT_TARGET_DIR);
    }

    #[test]
    fn secrets_are_base64_encoded_before_shipping() {
        let encoded = STANDARD.encode(b"https://allow.example");
        assert_eq!(encoded, "aHR0cHM6Ly9hbGxvdy5leGFtcGxl");
    }
}
