use crate::{commands::GlobalArgs, env::EnvManager, error::CliError};
use harvest_core::retry::RetryPolicy;
use harvest_sync::config::{QueueNames, ReconcilerConfig};
use std::{path::PathBuf, str::FromStr, time::Duration};

pub const DATA_DIR_VAR: &str = "HARVEST_DATA_DIR";
pub const STAGING_QUEUE_VAR: &str = "HARVEST_STAGING_QUEUE";
pub const MAIN_QUEUE_VAR: &str = "HARVEST_MAIN_QUEUE";
pub const CALL_TIMEOUT_VAR: &str = "HARVEST_CALL_TIMEOUT_MS";
pub const RETRY_ATTEMPTS_VAR: &str = "HARVEST_RETRY_ATTEMPTS";

const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RETRY_ATTEMPTS: usize = 3;

/// Settings for one CLI invocation.
///
/// Flags win over the env file, which wins over the process environment,
/// which wins over the built-in defaults.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub data_dir: PathBuf,
    pub queues: QueueNames,
    pub call_timeout: Option<Duration>,
    pub retry_attempts: usize,
}

impl HarvestConfig {
    pub fn resolve(args: &GlobalArgs) -> Result<Self, CliError> {
        let mut env = EnvManager::from_process();
        if let Some(path) = &args.env_file {
            env.load_from_file(path)?;
        }
        Self::from_sources(args, &env)
    }

    fn from_sources(args: &GlobalArgs, env: &EnvManager) -> Result<Self, CliError> {
        let data_dir = match (&args.data_dir, env.get(DATA_DIR_VAR)) {
            (Some(dir), _) => dir.clone(),
            (None, Some(dir)) => PathBuf::from(dir),
            (None, None) => dirs::home_dir()
                .ok_or_else(|| CliError::Config("Could not determine home directory".into()))?
                .join(".harvest"),
        };

        let mut queues = QueueNames::default();
        if let Some(name) = env.get(STAGING_QUEUE_VAR) {
            queues.staging = name.to_string();
        }
        if let Some(name) = env.get(MAIN_QUEUE_VAR) {
            queues.main = name.to_string();
        }
        if queues.staging == queues.main {
            return Err(CliError::Config(format!(
                "Staging and main queue must differ, both are '{}'",
                queues.main
            )));
        }

        let timeout_ms = match args.timeout_ms {
            Some(ms) => ms,
            None => parse_var(env, CALL_TIMEOUT_VAR)?.unwrap_or(DEFAULT_CALL_TIMEOUT_MS),
        };

        let retry_attempts = match args.retries {
            Some(n) => n,
            None => parse_var(env, RETRY_ATTEMPTS_VAR)?.unwrap_or(DEFAULT_RETRY_ATTEMPTS),
        };

        Ok(Self {
            data_dir,
            queues,
            call_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
            retry_attempts: retry_attempts.max(1),
        })
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    pub fn queues_path(&self) -> PathBuf {
        self.data_dir.join("queues")
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            queues: self.queues.clone(),
            call_timeout: self.call_timeout,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            ..RetryPolicy::default()
        }
    }
}

fn parse_var<T: FromStr>(env: &EnvManager, key: &str) -> Result<Option<T>, CliError> {
    env.get(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| CliError::Config(format!("{key} is not a valid number: '{raw}'")))
        })
        .transpose()
}
