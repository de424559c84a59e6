use crate::error::{self, Result};
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// The credential bundle of a service kind. An account is loaded once, when its service binding
/// is constructed, and is read-only afterwards.
///
/// Accounts that need secrets name their section of the credentials file with
/// [`Account::credentials_id`]. Accounts for resources deployed by the test run itself usually
/// need nothing and are built with `Default`.
pub trait Account: DeserializeOwned + Default + Send + Sync + 'static {
    /// The key of this account in the credentials file, `None` if the account has no secrets.
    fn credentials_id() -> Option<&'static str> {
        None
    }
}

/// An account for services that need no credentials at all.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct NoAccount;

impl Account for NoAccount {}

#[derive(Debug, Default, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    services: BTreeMap<String, CredentialsEntry>,
}

#[derive(Debug, Deserialize)]
struct CredentialsEntry {
    credentials: serde_yaml::Value,
}

/// Reads accounts out of a YAML credentials file of the form:
///
/// ```yaml
/// services:
///   aws:
///     credentials:
///       access_key: AKIA...
///       secret_key: ...
/// ```
#[derive(Debug, Default)]
pub struct AccountsReader {
    path: Option<PathBuf>,
    file: CredentialsFile,
}

impl AccountsReader {
    /// A reader without a credentials file. Only accounts without a credentials id can be loaded.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the credentials file at `path`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let data = fs::read_to_string(&path).context(error::ReadCredentialsSnafu { path: &path })?;
        let file = serde_yaml::from_str(&data).context(error::ParseCredentialsSnafu { path: &path })?;
        Ok(Self {
            path: Some(path),
            file,
        })
    }

    /// Load the account `A`. Fails if `A` names a credentials id that is missing from the file.
    pub fn load<A: Account>(&self) -> Result<A> {
        let id = match A::credentials_id() {
            None => return Ok(A::default()),
            Some(id) => id,
        };
        let path = self
            .path
            .as_ref()
            .context(error::NoCredentialsFileSnafu {
                id,
                env: crate::constants::ENV_CREDENTIALS,
            })?;
        let entry = self
            .file
            .services
            .get(id)
            .context(error::MissingCredentialsSnafu { id, path })?;
        debug!("Loading credentials '{}' from '{}'", id, path.display());
        Ok(serde_yaml::from_value(entry.credentials.clone())
            .context(error::DeserializeCredentialsSnafu { id })?)
    }

    /// The ids present in the credentials file.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.file.services.keys().map(String::as_str)
    }
}

/// Sub-accounts addressed by name within one account, for example one set of credentials per
/// dataset. Asking for a name that is not configured is a configuration error.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamedAccounts<T>(BTreeMap<String, T>);

impl<T> NamedAccounts<T> {
    pub fn get(&self, name: &str) -> Result<&T> {
        Ok(self.0.get(name).context(error::UnknownNameSnafu {
            what: "named account",
            name,
        })?)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl<T> FromIterator<(String, T)> for NamedAccounts<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
