use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Where a service binding is in its lifecycle.
///
/// ```text
/// NotDeployed -> Deploying -> Deployed -> Ready -> ResourcesOpen
///                    |                                  |
///                    v                                  v
///                 Failed                  (ResourcesClosed ->) CleanedUp | Undeployed
/// ```
///
/// `Deployed` means the resource exists; `Ready` means it is also available (for example all of
/// its replicas are up). A `CleanedUp` resource is still deployed and may be opened again by a
/// later test context. `Failed` is recorded when deploying or waiting for readiness fails.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeploymentState {
    NotDeployed,
    Deploying,
    Deployed,
    Ready,
    ResourcesOpen,
    ResourcesClosed,
    CleanedUp,
    Undeployed,
    Failed,
}

impl DeploymentState {
    /// Whether a deployment is known to be standing in this state. `NotDeployed`, `Undeployed`
    /// and `Failed` require a new deployment attempt.
    pub fn is_deployed(&self) -> bool {
        matches!(
            self,
            DeploymentState::Deployed
                | DeploymentState::Ready
                | DeploymentState::ResourcesOpen
                | DeploymentState::ResourcesClosed
                | DeploymentState::CleanedUp
        )
    }

    /// Terminal states end one test context's use of a binding.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentState::CleanedUp | DeploymentState::Undeployed)
    }
}

impl Default for DeploymentState {
    fn default() -> Self {
        DeploymentState::NotDeployed
    }
}

impl Display for DeploymentState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // serde_plain cannot fail for a unit variant enum
        let s = serde_plain::to_string(self).unwrap_or_else(|_| format!("{:?}", self));
        Display::fmt(&s, f)
    }
}

#[test]
fn display_uses_serialized_name() {
    assert_eq!(DeploymentState::ResourcesOpen.to_string(), "resourcesOpen");
    assert_eq!(DeploymentState::NotDeployed.to_string(), "notDeployed");
}

#[test]
fn deployed_states() {
    assert!(DeploymentState::CleanedUp.is_deployed());
    assert!(DeploymentState::CleanedUp.is_terminal());
    assert!(!DeploymentState::Undeployed.is_deployed());
    assert!(!DeploymentState::Failed.is_deployed());
}
