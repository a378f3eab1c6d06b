//! Engine configuration read from `MERGE_READINESS_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const PREFIX: &str = "MERGE_READINESS_";

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_GIT_BINARY: &str = "git";

/// Upper bound on a single git invocation (6 minutes).
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 360;

const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 15;
const DEFAULT_PULL_QUEUE_LENGTH: usize = 1000;
const DEFAULT_HOOK_QUEUE_LENGTH: usize = 1000;
const DEFAULT_MAX_CHECK_RETRIES: u32 = 3;
const DEFAULT_WIP_PREFIXES: &[&str] = &["WIP:", "[WIP]"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: String,
        value: String,
        reason: String,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub listen_addr: SocketAddr,

    /// Bare repositories with relative paths resolve under this directory.
    pub repo_root: Option<PathBuf>,

    /// Patch artifacts live under `<data_dir>/patches`.
    pub data_dir: PathBuf,

    /// Disposable indexes are created here.
    pub scratch_dir: PathBuf,

    pub git_binary: PathBuf,
    pub command_timeout: Duration,
    pub delivery_timeout: Duration,
    pub pull_queue_length: usize,
    pub hook_queue_length: usize,
    pub max_check_retries: u32,
    pub wip_prefixes: Vec<String>,

    /// JSON file of per-repository webhook endpoints.
    pub hooks_file: Option<PathBuf>,

    /// JSON snapshot that seeds the in-memory store.
    pub seed_file: Option<PathBuf>,
}

impl EngineConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which receives full
    /// variable names such as `MERGE_READINESS_LISTEN_ADDR`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let env = Env { lookup };

        let listen_addr = env
            .get("LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = listen_addr
            .parse()
            .map_err(|e: std::net::AddrParseError| invalid("LISTEN_ADDR", &listen_addr, e))?;

        let wip_prefixes = match env.get("WIP_PREFIXES") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_WIP_PREFIXES.iter().map(|p| p.to_string()).collect(),
        };

        Ok(EngineConfig {
            listen_addr,
            repo_root: env.path("REPO_ROOT"),
            data_dir: env
                .path("DATA_DIR")
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            scratch_dir: env.path("SCRATCH_DIR").unwrap_or_else(std::env::temp_dir),
            git_binary: env
                .path("GIT_BINARY")
                .unwrap_or_else(|| PathBuf::from(DEFAULT_GIT_BINARY)),
            command_timeout: Duration::from_secs(
                env.parse("COMMAND_TIMEOUT_SECS", DEFAULT_COMMAND_TIMEOUT_SECS)?,
            ),
            delivery_timeout: Duration::from_secs(
                env.parse("DELIVERY_TIMEOUT_SECS", DEFAULT_DELIVERY_TIMEOUT_SECS)?,
            ),
            pull_queue_length: env.positive("PULL_QUEUE_LENGTH", DEFAULT_PULL_QUEUE_LENGTH)?,
            hook_queue_length: env.positive("HOOK_QUEUE_LENGTH", DEFAULT_HOOK_QUEUE_LENGTH)?,
            max_check_retries: env.parse("MAX_CHECK_RETRIES", DEFAULT_MAX_CHECK_RETRIES)?,
            wip_prefixes,
            hooks_file: env.path("HOOKS_FILE"),
            seed_file: env.path("SEED_FILE"),
        })
    }

    pub fn patch_dir(&self) -> PathBuf {
        self.data_dir.join("patches")
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Unset and empty variables both read as `None`.
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{}{}", PREFIX, name)).filter(|v| !v.trim().is_empty())
    }

    fn path(&self, name: &str) -> Option<PathBuf> {
        self.get(name).map(PathBuf::from)
    }

    fn parse<T>(&self, name: &str, default: T) -> ConfigResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            Some(raw) => raw.trim().parse().map_err(|e| invalid(name, &raw, e)),
            None => Ok(default),
        }
    }

    fn positive(&self, name: &str, default: usize) -> ConfigResult<usize> {
        let value = self.parse(name, default)?;
        if value == 0 {
            return Err(invalid(name, "0", "must be at least 1"));
        }
        Ok(value)
    }
}

fn invalid(name: &str, value: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        var: format!("{}{}", PREFIX, name),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
