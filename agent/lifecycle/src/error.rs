use crate::provider::ProviderError;
use snafu::Snafu;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use testbed_model::{DeploymentState, ServiceKind};

/// The error type of the lifecycle orchestrator.
///
/// Only transient collaborator errors are ever retried, and only inside a
/// [`RetryPolicy`](crate::retry::RetryPolicy). Every variant here is fatal for the test context
/// that receives it, except [`Error::Teardown`] which the [`Suite`](crate::Suite) harness reports
/// only when nothing else failed.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Unable to deploy '{}': {}", kind, source))]
    Deployment {
        kind: ServiceKind,
        source: ProviderError,
    },

    #[snafu(display("Unable to determine whether '{}' is deployed: {}", kind, source))]
    DeploymentCheck {
        kind: ServiceKind,
        source: ProviderError,
    },

    #[snafu(display("Timed out after {:?}: {}", timeout, description))]
    Timeout {
        description: String,
        timeout: Duration,
    },

    #[snafu(display("Failure detected: {}", description))]
    PollFailure { description: String },

    #[snafu(display("Check failed: {}: {}", description, source))]
    PollCheck {
        description: String,
        source: ProviderError,
    },

    #[snafu(display("{}", message))]
    Configuration { message: String },

    #[snafu(display("{}", source))]
    Model { source: testbed_model::Error },

    #[snafu(display("Unable to open the resources of '{}': {}", kind, source))]
    OpenResources {
        kind: ServiceKind,
        source: ProviderError,
    },

    #[snafu(display("Unable to restart '{}': {}", kind, source))]
    Restart {
        kind: ServiceKind,
        source: ProviderError,
    },

    #[snafu(display("'{}' is a {} service and cannot {}", kind, tier, action))]
    Unsupported {
        kind: ServiceKind,
        tier: &'static str,
        action: &'static str,
    },

    #[snafu(display(
        "The {} of '{}' is not available while the service is '{}'",
        what,
        kind,
        state
    ))]
    NotReady {
        kind: ServiceKind,
        what: &'static str,
        state: DeploymentState,
    },

    #[snafu(display("Teardown of '{}' failed: {}", kind, source))]
    Teardown {
        kind: ServiceKind,
        source: TeardownFailures,
    },

    #[snafu(display("'{}' requires '{}', which failed: {}", kind, dependency, source))]
    Dependency {
        kind: ServiceKind,
        dependency: ServiceKind,
        source: Box<Error>,
    },

    #[snafu(display("Service '{}' is unavailable: {}", kind, source))]
    Unavailable {
        kind: ServiceKind,
        source: Arc<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Look through [`Error::Unavailable`] and [`Error::Dependency`] at the failure that made a
    /// service unavailable.
    pub fn root(&self) -> &Error {
        match self {
            Error::Unavailable { source, .. } => source.root(),
            Error::Dependency { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Error::Timeout { .. })
    }

    /// `true` for an explicit failure signal or a permanent error from a readiness check.
    pub fn is_poll_failure(&self) -> bool {
        matches!(self.root(), Error::PollFailure { .. } | Error::PollCheck { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self.root(), Error::Configuration { .. } | Error::Model { .. })
    }
}

impl From<testbed_model::Error> for Error {
    fn from(source: testbed_model::Error) -> Self {
        Error::Model { source }
    }
}

/// The teardown step that failed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TeardownStep {
    Cleanup,
    CloseResources,
    Undeploy,
    ReleaseDependency,
}

impl Display for TeardownStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TeardownStep::Cleanup => "cleanup",
            TeardownStep::CloseResources => "close resources",
            TeardownStep::Undeploy => "undeploy",
            TeardownStep::ReleaseDependency => "release dependency",
        };
        Display::fmt(s, f)
    }
}

/// The failures of the teardown steps of one service. Steps are isolated: every step runs even
/// when an earlier one failed, so there may be more than one failure.
#[derive(Debug, Default)]
pub struct TeardownFailures {
    failures: Vec<(TeardownStep, ProviderError)>,
}

impl TeardownFailures {
    pub(crate) fn push(&mut self, step: TeardownStep, error: ProviderError) {
        self.failures.push((step, error));
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn steps(&self) -> impl Iterator<Item = TeardownStep> + '_ {
        self.failures.iter().map(|(step, _)| *step)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(TeardownStep, ProviderError)> {
        self.failures.iter()
    }
}

impl Display for TeardownFailures {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, (step, error)) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", step, error)?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownFailures {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|(_, e)| e as &(dyn std::error::Error + 'static))
    }
}
