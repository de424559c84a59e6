use crate::constants::ENV_PREFIX;
use crate::error::{self, Result};
use crate::AccountsReader;
use serde::Deserialize;
use snafu::ResultExt;
use std::path::PathBuf;
use std::time::Duration;

/// Settings for a test run, read from `TESTBED_`-prefixed environment variables.
///
/// # Example
///
/// ```text
/// TESTBED_NAMESPACE=integration
/// TESTBED_CREDENTIALS=/etc/testbed/credentials.yaml
/// TESTBED_WAIT_TIMEOUT_MS=300000
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
pub struct Settings {
    /// The namespace that cluster-backed resources are deployed into.
    #[serde(default = "namespace")]
    pub namespace: String,

    /// Path to the YAML credentials file. Only needed by services whose account has a
    /// credentials id.
    #[serde(default)]
    pub credentials: Option<PathBuf>,

    /// How long to sleep between two evaluations of a readiness check.
    #[serde(default = "wait_interval_ms")]
    pub wait_interval_ms: u64,

    /// How long a readiness check may take before it fails with a timeout.
    #[serde(default = "wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// How many times a transient control plane failure is retried.
    #[serde(default = "retry_max")]
    pub retry_max: u32,

    #[serde(default = "retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Ok(envy::prefixed(ENV_PREFIX)
            .from_env::<Settings>()
            .context(error::SettingsSnafu)?)
    }

    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// An [`AccountsReader`] for the configured credentials file, or an empty one.
    pub fn accounts(&self) -> Result<AccountsReader> {
        match &self.credentials {
            Some(path) => AccountsReader::from_path(path),
            None => Ok(AccountsReader::empty()),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: namespace(),
            credentials: None,
            wait_interval_ms: wait_interval_ms(),
            wait_timeout_ms: wait_timeout_ms(),
            retry_max: retry_max(),
            retry_delay_ms: retry_delay_ms(),
        }
    }
}

fn namespace() -> String {
    String::from("testbed")
}

fn wait_interval_ms() -> u64 {
    1000
}

fn wait_timeout_ms() -> u64 {
    10 * 60 * 1000
}

fn retry_max() -> u32 {
    3
}

fn retry_delay_ms() -> u64 {
    5000
}

#[test]
fn settings_from_iter() {
    let settings: Settings = envy::prefixed(ENV_PREFIX)
        .from_iter(vec![
            ("TESTBED_NAMESPACE".to_string(), "integration".to_string()),
            ("TESTBED_WAIT_TIMEOUT_MS".to_string(), "300000".to_string()),
            ("TESTBED_UNRELATED".to_string(), "x".to_string()),
        ])
        .unwrap();
    assert_eq!(settings.namespace, "integration");
    assert_eq!(settings.wait_timeout(), Duration::from_secs(300));
    assert_eq!(settings.wait_interval(), Duration::from_secs(1));
    assert_eq!(settings.retry_max, 3);
    assert!(settings.credentials.is_none());
}

#[test]
fn defaults_match_serde_defaults() {
    let settings: Settings = envy::prefixed(ENV_PREFIX)
        .from_iter(Vec::<(String, String)>::new())
        .unwrap();
    assert_eq!(settings, Settings::default());
}
