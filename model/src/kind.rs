use crate::error::{self, Result};
use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::convert::TryFrom;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Identifies a category of externally deployed test dependency, e.g. `broker` or
/// `dataset-store`. A `ServiceKind` is the key under which a service is registered, deployed and
/// shared during a test run.
///
/// Kinds are lowercase ASCII alphanumerics and `-`, the same rules as a Kubernetes label value
/// without dots or underscores, so that a kind can be used to name and label what it deploys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceKind(String);

impl ServiceKind {
    pub fn new<S: Into<String>>(value: S) -> Result<Self> {
        let value = value.into();
        ensure!(
            !value.is_empty(),
            error::InvalidKindSnafu {
                value,
                reason: "a kind cannot be empty",
            }
        );
        ensure!(
            value.len() <= 63,
            error::InvalidKindSnafu {
                value,
                reason: "a kind cannot be longer than 63 characters",
            }
        );
        ensure!(
            value
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
            error::InvalidKindSnafu {
                value,
                reason: "only lowercase alphanumerics and '-' are allowed",
            }
        );
        ensure!(
            !value.starts_with('-') && !value.ends_with('-'),
            error::InvalidKindSnafu {
                value,
                reason: "a kind must start and end with an alphanumeric",
            }
        );
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for ServiceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl AsRef<str> for ServiceKind {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for ServiceKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ServiceKind {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ServiceKind {
    type Error = crate::Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ServiceKind> for String {
    fn from(kind: ServiceKind) -> Self {
        kind.0
    }
}

#[test]
fn valid_kinds() {
    for value in ["broker", "dataset-store", "s3", "knative-serving-2"] {
        assert_eq!(ServiceKind::new(value).unwrap().as_str(), value);
    }
}

#[test]
fn invalid_kinds() {
    for value in ["", "Broker", "data_store", "-broker", "broker-", "a.b"] {
        assert!(ServiceKind::new(value).is_err(), "'{}' should be invalid", value);
    }
}

#[test]
fn kind_serde() {
    let kind: ServiceKind = serde_plain::from_str("dataset-store").unwrap();
    assert_eq!(kind.as_str(), "dataset-store");
    assert!(serde_plain::from_str::<ServiceKind>("Dataset").is_err());
}
