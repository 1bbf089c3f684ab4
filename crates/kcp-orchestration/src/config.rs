//! Runtime configuration for the orchestration manager.

use std::time::Duration;

use crate::error::{Error, Result};

const ENV_POLL_INTERVAL_SECS: &str = "KCP_ORCH_POLL_INTERVAL_SECS";
const ENV_RETRY_BACKOFF_SECS: &str = "KCP_ORCH_RETRY_BACKOFF_SECS";
const ENV_CANCEL_POLL_INTERVAL_SECS: &str = "KCP_ORCH_CANCEL_POLL_INTERVAL_SECS";
const ENV_MAINTENANCE_POLICY_NAME: &str = "KCP_ORCH_MAINTENANCE_POLICY_NAME";
const ENV_DEFAULT_KYMA_VERSION: &str = "KCP_ORCH_DEFAULT_KYMA_VERSION";
const ENV_DEFAULT_KUBERNETES_VERSION: &str = "KCP_ORCH_DEFAULT_KUBERNETES_VERSION";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_RETRY_BACKOFF_SECS: u64 = 60;
const DEFAULT_CANCEL_POLL_INTERVAL_SECS: u64 = 5;

/// Default name of the maintenance policy document.
pub const DEFAULT_MAINTENANCE_POLICY_NAME: &str = "orchestration-config";

/// Orchestration manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestrationConfig {
    /// Interval between completion checks while waiting on operations.
    pub poll_interval: Duration,
    /// Re-schedule delay after a failed store write.
    pub retry_backoff: Duration,
    /// Interval between cancellation checks while waiting for a maintenance window.
    pub cancel_poll_interval: Duration,
    /// Name of the maintenance policy document in the config source.
    pub maintenance_policy_name: String,
    /// Kyma version stamped when an orchestration pins none.
    pub default_kyma_version: Option<String>,
    /// Kubernetes version stamped when an orchestration pins none.
    pub default_kubernetes_version: Option<String>,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            retry_backoff: Duration::from_secs(DEFAULT_RETRY_BACKOFF_SECS),
            cancel_poll_interval: Duration::from_secs(DEFAULT_CANCEL_POLL_INTERVAL_SECS),
            maintenance_policy_name: DEFAULT_MAINTENANCE_POLICY_NAME.to_string(),
            default_kyma_version: None,
            default_kubernetes_version: None,
        }
    }
}

impl OrchestrationConfig {
    /// Loads the config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when an interval is not a positive integer.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads the config with a custom environment source.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when an interval is not a positive integer.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| get_env(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            poll_interval: Duration::from_secs(parse_positive_u64_env(
                &get_env,
                ENV_POLL_INTERVAL_SECS,
                DEFAULT_POLL_INTERVAL_SECS,
            )?),
            retry_backoff: Duration::from_secs(parse_positive_u64_env(
                &get_env,
                ENV_RETRY_BACKOFF_SECS,
                DEFAULT_RETRY_BACKOFF_SECS,
            )?),
            cancel_poll_interval: Duration::from_secs(parse_positive_u64_env(
                &get_env,
                ENV_CANCEL_POLL_INTERVAL_SECS,
                DEFAULT_CANCEL_POLL_INTERVAL_SECS,
            )?),
            maintenance_policy_name: non_empty(ENV_MAINTENANCE_POLICY_NAME)
                .unwrap_or_else(|| DEFAULT_MAINTENANCE_POLICY_NAME.to_string()),
            default_kyma_version: non_empty(ENV_DEFAULT_KYMA_VERSION),
            default_kubernetes_version: non_empty(ENV_DEFAULT_KUBERNETES_VERSION),
        })
    }
}

fn parse_positive_u64_env<F>(get_env: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };

    let parsed = raw.trim().parse::<u64>().map_err(|_| {
        Error::configuration(format!("{key} must be a positive integer, got '{raw}'"))
    })?;
    if parsed == 0 {
        return Err(Error::configuration(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(parsed)
}
