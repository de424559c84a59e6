/*!

The `provider` module defines the capability traits that collaborators implement for each kind of
service. A collaborator decides *how* a resource is deployed, checked and cleaned; the
[`Deployment`](crate::Deployment) state machine decides *when*.

!*/

mod error;

pub use self::error::{AsFailure, Failure, IntoProviderError, ProviderError, ProviderResult};
use crate::Context;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use testbed_model::PodSelector;

/// The base capability: a resource that can be brought up, torn down, and asked whether it
/// exists.
///
/// `deploy` is expected to block until the resource exists (for example until a container has
/// started). Readiness beyond existence is the business of [`ExtendedDeployable::is_ready`].
#[async_trait::async_trait]
pub trait Deployable: Send + Sync {
    async fn deploy(&self, ctx: &Context) -> ProviderResult<()>;

    async fn undeploy(&self, ctx: &Context) -> ProviderResult<()>;

    async fn is_deployed(&self, ctx: &Context) -> ProviderResult<bool>;
}

/// A cluster-backed resource whose availability is observed separately from its existence.
#[async_trait::async_trait]
pub trait ExtendedDeployable: Deployable {
    /// `true` once the resource is available, e.g. all of its replicas are up.
    async fn is_ready(&self, ctx: &Context) -> ProviderResult<bool>;

    /// `true` if the resource reports that it will never become ready. Checked on every tick of
    /// the readiness wait so that a broken deployment fails fast instead of timing out.
    async fn has_failed(&self, _ctx: &Context) -> ProviderResult<bool> {
        Ok(false)
    }

    async fn restart(&self, ctx: &Context) -> ProviderResult<()>;

    /// Selects the pods that run this resource, `None` when that is not meaningful.
    fn pod_selector(&self) -> Option<PodSelector>;

    /// The namespace the resource lives in.
    fn target_namespace(&self, ctx: &Context) -> String {
        ctx.namespace().to_string()
    }
}

/// A resource that can be kept deployed between test contexts. `cleanup` resets what tests
/// created inside the resource (tables, topics, files) without tearing down the deployment.
#[async_trait::async_trait]
pub trait ReusableDeployable: ExtendedDeployable {
    async fn cleanup(&self, ctx: &Context) -> ProviderResult<()>;
}

/// The capability set of a service's backing resource. The [`Deployment`](crate::Deployment)
/// state machine dispatches on this value.
pub enum Capabilities {
    /// The resource is managed outside the test run (a cloud service, a shared cluster
    /// component). Only client resources are opened and closed.
    External,
    Base(Box<dyn Deployable>),
    Extended(Box<dyn ExtendedDeployable>),
    Reusable(Box<dyn ReusableDeployable>),
}

impl Capabilities {
    pub fn base<D: Deployable + 'static>(deployable: D) -> Self {
        Capabilities::Base(Box::new(deployable))
    }

    pub fn extended<D: ExtendedDeployable + 'static>(deployable: D) -> Self {
        Capabilities::Extended(Box::new(deployable))
    }

    pub fn reusable<D: ReusableDeployable + 'static>(deployable: D) -> Self {
        Capabilities::Reusable(Box::new(deployable))
    }

    pub fn tier(&self) -> &'static str {
        match self {
            Capabilities::External => "external",
            Capabilities::Base(_) => "base",
            Capabilities::Extended(_) => "extended",
            Capabilities::Reusable(_) => "reusable",
        }
    }

    pub fn is_reusable(&self) -> bool {
        matches!(self, Capabilities::Reusable(_))
    }

    pub(crate) async fn deploy(&self, ctx: &Context) -> ProviderResult<()> {
        match self {
            Capabilities::External => Ok(()),
            Capabilities::Base(d) => d.deploy(ctx).await,
            Capabilities::Extended(d) => d.deploy(ctx).await,
            Capabilities::Reusable(d) => d.deploy(ctx).await,
        }
    }

    pub(crate) async fn undeploy(&self, ctx: &Context) -> ProviderResult<()> {
        match self {
            Capabilities::External => Ok(()),
            Capabilities::Base(d) => d.undeploy(ctx).await,
            Capabilities::Extended(d) => d.undeploy(ctx).await,
            Capabilities::Reusable(d) => d.undeploy(ctx).await,
        }
    }

    pub(crate) async fn is_deployed(&self, ctx: &Context) -> ProviderResult<bool> {
        match self {
            Capabilities::External => Ok(true),
            Capabilities::Base(d) => d.is_deployed(ctx).await,
            Capabilities::Extended(d) => d.is_deployed(ctx).await,
            Capabilities::Reusable(d) => d.is_deployed(ctx).await,
        }
    }

    /// The readiness checks of the extended tiers, `None` for the others.
    pub(crate) fn extended_view(&self) -> Option<&dyn ExtendedView> {
        match self {
            Capabilities::External | Capabilities::Base(_) => None,
            Capabilities::Extended(d) => Some(d),
            Capabilities::Reusable(d) => Some(d),
        }
    }

    pub(crate) async fn cleanup(&self, ctx: &Context) -> Option<ProviderResult<()>> {
        match self {
            Capabilities::Reusable(d) => Some(d.cleanup(ctx).await),
            _ => None,
        }
    }
}

impl Debug for Capabilities {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Capabilities::{}", self.tier())
    }
}

/// Forwards the [`ExtendedDeployable`] methods of either extended tier so that the state machine
/// can wait for readiness without caring which one it has.
#[async_trait::async_trait]
pub(crate) trait ExtendedView: Send + Sync {
    async fn is_ready(&self, ctx: &Context) -> ProviderResult<bool>;
    async fn has_failed(&self, ctx: &Context) -> ProviderResult<bool>;
    async fn restart(&self, ctx: &Context) -> ProviderResult<()>;
}

#[async_trait::async_trait]
impl ExtendedView for Box<dyn ExtendedDeployable> {
    async fn is_ready(&self, ctx: &Context) -> ProviderResult<bool> {
        self.as_ref().is_ready(ctx).await
    }

    async fn has_failed(&self, ctx: &Context) -> ProviderResult<bool> {
        self.as_ref().has_failed(ctx).await
    }

    async fn restart(&self, ctx: &Context) -> ProviderResult<()> {
        self.as_ref().restart(ctx).await
    }
}

#[async_trait::async_trait]
impl ExtendedView for Box<dyn ReusableDeployable> {
    async fn is_ready(&self, ctx: &Context) -> ProviderResult<bool> {
        self.as_ref().is_ready(ctx).await
    }

    async fn has_failed(&self, ctx: &Context) -> ProviderResult<bool> {
        self.as_ref().has_failed(ctx).await
    }

    async fn restart(&self, ctx: &Context) -> ProviderResult<()> {
        self.as_ref().restart(ctx).await
    }
}

/// You implement `Connector` to open and close the client side of a service: the `Client` that
/// talks to the deployed resource and the `Validation` helper built on top of it.
///
/// ## Custom Types
///
/// - `A` is the [`Account`](testbed_model::Account) holding the credentials of the service.
/// - `C` is the live client handle, e.g. a producer/consumer pair or an API session.
/// - `V` is the validation helper used by tests to assert facts about the resource and to clean
///   up what they created.
///
#[async_trait::async_trait]
pub trait Connector<A, C, V>: Send + Sync
where
    A: Send + Sync,
    C: Send + Sync,
    V: Send + Sync,
{
    /// Create the client. Called once the resource is deployed and ready.
    async fn open(&self, account: &A, ctx: &Context) -> ProviderResult<C>;

    /// Create the validation helper for a freshly opened client.
    fn validation(&self, client: &Arc<C>) -> V;

    /// Release the client. Called before the resource is undeployed.
    async fn close(&self, _client: &C, _validation: &V) -> ProviderResult<()> {
        Ok(())
    }
}
