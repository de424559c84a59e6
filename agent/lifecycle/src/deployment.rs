/*!

The `deployment` module defines the [`Deployment`] state machine which drives one resource through
deploy, readiness, cleanup and undeploy by dispatching on its [`Capabilities`].

!*/

use crate::error::{self, Result};
use crate::provider::{Capabilities, ProviderResult};
use crate::wait::{wait_for, PollSpec};
use crate::Context;
use log::{debug, info};
use snafu::{OptionExt, ResultExt};
use testbed_model::{DeploymentState, ServiceKind};

/// The deploy/ready/cleanup/undeploy state machine of one resource.
///
/// The `Deployment` never retries: a failed deploy or readiness wait leaves it `Failed` and the
/// error goes to the caller. Retrying flaky control plane calls is up to the collaborator, see
/// [`RetryPolicy`](crate::retry::RetryPolicy).
#[derive(Debug)]
pub struct Deployment {
    kind: ServiceKind,
    capabilities: Capabilities,
    readiness: Option<PollSpec>,
    state: DeploymentState,
}

impl Deployment {
    pub fn new(kind: ServiceKind, capabilities: Capabilities) -> Self {
        Self {
            kind,
            capabilities,
            readiness: None,
            state: DeploymentState::NotDeployed,
        }
    }

    /// Override the interval and timeout of the readiness wait, which otherwise come from the
    /// run's settings.
    pub fn with_readiness(mut self, spec: PollSpec) -> Self {
        self.set_readiness(spec);
        self
    }

    pub(crate) fn set_readiness(&mut self, spec: PollSpec) {
        self.readiness = Some(spec);
    }

    pub fn kind(&self) -> &ServiceKind {
        &self.kind
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn state(&self) -> DeploymentState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: DeploymentState) {
        debug!("'{}': {} -> {}", self.kind, self.state, state);
        self.state = state;
    }

    fn readiness_spec(&self, ctx: &Context) -> PollSpec {
        self.readiness
            .clone()
            .unwrap_or_else(|| ctx.poll(format!("Waiting until '{}' is ready", self.kind)))
    }

    /// Deploy the resource unless it is already deployed, then wait until it is ready.
    ///
    /// Calling `deploy` on a deployed resource does nothing, which is what lets a reusable
    /// resource survive from one test context to the next.
    pub async fn deploy(&mut self, ctx: &Context) -> Result<()> {
        let deployed = self
            .capabilities
            .is_deployed(ctx)
            .await
            .context(error::DeploymentCheckSnafu { kind: self.kind.clone() })?;
        if deployed {
            debug!("'{}' is already deployed, skipping deploy", self.kind);
            self.set_state(DeploymentState::Ready);
            return Ok(());
        }

        info!("Deploying '{}' ({})", self.kind, self.capabilities.tier());
        self.set_state(DeploymentState::Deploying);
        if let Err(e) = self.capabilities.deploy(ctx).await {
            self.set_state(DeploymentState::Failed);
            return Err(e).context(error::DeploymentSnafu { kind: self.kind.clone() });
        }
        self.set_state(DeploymentState::Deployed);

        if let Err(e) = self.wait_until_ready(ctx).await {
            self.set_state(DeploymentState::Failed);
            return Err(e);
        }
        info!("'{}' is ready", self.kind);
        self.set_state(DeploymentState::Ready);
        Ok(())
    }

    /// Block until the extended tiers report readiness, failing fast on their failure signal.
    /// The base tier is ready as soon as `deploy` returns.
    async fn wait_until_ready(&self, ctx: &Context) -> Result<()> {
        let extended = match self.capabilities.extended_view() {
            Some(extended) => extended,
            None => return Ok(()),
        };
        let spec = self.readiness_spec(ctx);
        wait_for(
            &spec,
            || extended.is_ready(ctx),
            || extended.has_failed(ctx),
        )
        .await
    }

    /// Reset the resource's internal state without undeploying it. `None` unless the resource is
    /// reusable.
    pub async fn cleanup(&mut self, ctx: &Context) -> Option<ProviderResult<()>> {
        info!("Cleaning up '{}'", self.kind);
        let result = self.capabilities.cleanup(ctx).await?;
        if result.is_ok() {
            self.set_state(DeploymentState::CleanedUp);
        }
        Some(result)
    }

    pub async fn undeploy(&mut self, ctx: &Context) -> ProviderResult<()> {
        if let Capabilities::External = self.capabilities {
            debug!("'{}' is managed externally, nothing to undeploy", self.kind);
            return Ok(());
        }
        info!("Undeploying '{}'", self.kind);
        self.capabilities.undeploy(ctx).await?;
        self.set_state(DeploymentState::Undeployed);
        Ok(())
    }

    /// Undeploy whatever a failed deploy left standing, e.g. a resource that started but never
    /// became ready. Does nothing unless the deployment is `Failed` and the collaborator still
    /// reports the resource as deployed.
    pub async fn discard(&mut self, ctx: &Context) -> ProviderResult<()> {
        if self.state != DeploymentState::Failed {
            return Ok(());
        }
        if let Capabilities::External = self.capabilities {
            return Ok(());
        }
        if !self.capabilities.is_deployed(ctx).await? {
            debug!("Nothing of '{}' is left standing", self.kind);
            return Ok(());
        }
        info!("Undeploying what is left of '{}' after a failed deploy", self.kind);
        self.capabilities.undeploy(ctx).await?;
        self.set_state(DeploymentState::Undeployed);
        Ok(())
    }

    /// Restart an extended resource and wait until it is ready again.
    pub async fn restart(&mut self, ctx: &Context) -> Result<()> {
        let extended = self
            .capabilities
            .extended_view()
            .context(error::UnsupportedSnafu {
                kind: self.kind.clone(),
                tier: self.capabilities.tier(),
                action: "restart",
            })?;
        info!("Restarting '{}'", self.kind);
        extended
            .restart(ctx)
            .await
            .context(error::RestartSnafu { kind: self.kind.clone() })?;
        self.wait_until_ready(ctx).await
    }
}
