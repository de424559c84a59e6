/*!

The `service` module defines [`Service`], which couples the [`Deployment`] of a resource with the
client resources opened against it, and hooks both into the before-all/after-all callbacks of a
test context.

!*/

use crate::error::{self, Error, Result, TeardownFailures, TeardownStep};
use crate::provider::{Capabilities, Connector, Failure, ProviderError};
use crate::registry::{Demand, Dependency};
use crate::wait::PollSpec;
use crate::{Context, Deployment};
use async_trait::async_trait;
use log::{debug, error, info};
use snafu::{ensure, ResultExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use testbed_model::{Account, DeploymentState, ServiceKind};
use tokio::sync::Mutex;

/// The type-erased view of a [`Service`] used by the
/// [`ServiceRegistry`](crate::ServiceRegistry) and the [`Suite`](crate::Suite) harness.
#[async_trait]
pub trait Binding: Send + Sync {
    fn kind(&self) -> &ServiceKind;

    fn state(&self) -> DeploymentState;

    /// Deploy the resource if needed, wait for readiness and open client resources. Every
    /// successful call takes a lease that a later [`Binding::after_all`] gives back.
    async fn before_all(&self) -> Result<()>;

    /// Give back a lease. The last lease closes client resources and then either cleans up
    /// or undeploys the resource, depending on whether a later test context still needs it.
    async fn after_all(&self) -> Result<()>;

    /// Undeploy a resource that was kept deployed for reuse but is no longer leased. Called by
    /// [`ServiceRegistry::shutdown`](crate::ServiceRegistry::shutdown) at the end of a run.
    async fn shutdown(&self) -> Result<()>;
}

/// A test dependency: a deployable resource, the account used to reach it, and the client and
/// validation helper opened against it.
///
/// ## Custom Types
///
/// - `A` is the [`Account`] loaded from the run's credentials file.
/// - `C` is the client handle produced by the [`Connector`].
/// - `V` is the validation helper produced by the [`Connector`].
///
/// The client and validation helper can only be obtained while the service is in
/// [`DeploymentState::ResourcesOpen`], i.e. between a successful `before_all` and the last
/// `after_all`.
pub struct Service<A, C, V>
where
    A: Account,
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    kind: ServiceKind,
    ctx: Context,
    account: A,
    connector: Box<dyn Connector<A, C, V>>,
    dependencies: Vec<Box<dyn Dependency>>,
    demand: Arc<Demand>,
    inner: Mutex<Inner>,
    /// Mirrors `Inner::failures` so that a caller can tell, before it queues on the lock, which
    /// failures happened before it arrived.
    failures: AtomicU64,
    status: RwLock<Status<C, V>>,
}

struct Inner {
    deployment: Deployment,
    leases: usize,
    failures: u64,
    last_failure: Option<Arc<Error>>,
    /// Leases held on other services while this one is deployed, in acquisition order.
    acquired: Vec<Arc<dyn Binding>>,
}

struct Status<C, V> {
    state: DeploymentState,
    handles: Option<Handles<C, V>>,
}

struct Handles<C, V> {
    client: Arc<C>,
    validation: Arc<V>,
}

impl<A, C, V> Service<A, C, V>
where
    A: Account,
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new<K>(
        kind: ServiceKind,
        account: A,
        capabilities: Capabilities,
        connector: K,
        ctx: Context,
    ) -> Self
    where
        K: Connector<A, C, V> + 'static,
    {
        Self {
            kind: kind.clone(),
            ctx,
            account,
            connector: Box::new(connector),
            dependencies: Vec::new(),
            demand: Arc::new(Demand::default()),
            inner: Mutex::new(Inner {
                deployment: Deployment::new(kind, capabilities),
                leases: 0,
                failures: 0,
                last_failure: None,
                acquired: Vec::new(),
            }),
            failures: AtomicU64::new(0),
            status: RwLock::new(Status {
                state: DeploymentState::NotDeployed,
                handles: None,
            }),
        }
    }

    /// Override the readiness wait of the underlying [`Deployment`].
    pub fn with_readiness(mut self, spec: PollSpec) -> Self {
        self.inner.get_mut().deployment.set_readiness(spec);
        self
    }

    /// Acquire `dependency` before this service deploys and give it back once this service is
    /// undeployed. Dependencies are acquired in the order they are added and released in
    /// reverse. A dependency must not require this service in turn.
    pub fn requires<D>(mut self, dependency: D) -> Self
    where
        D: Dependency + 'static,
    {
        self.dependencies.push(Box::new(dependency));
        self
    }

    /// Share the reuse bookkeeping of a registry.
    pub(crate) fn with_demand(mut self, demand: Arc<Demand>) -> Self {
        self.demand = demand;
        self
    }

    pub fn kind(&self) -> &ServiceKind {
        &self.kind
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn state(&self) -> DeploymentState {
        self.read_status(|status| status.state)
    }

    pub fn account(&self) -> Result<&A> {
        self.require_open("account")?;
        Ok(&self.account)
    }

    pub fn client(&self) -> Result<Arc<C>> {
        self.read_handles("client", |handles| Arc::clone(&handles.client))
    }

    pub fn validation(&self) -> Result<Arc<V>> {
        self.read_handles("validation", |handles| Arc::clone(&handles.validation))
    }

    /// Restart the resource and wait until it is ready again. Client resources stay open.
    pub async fn restart(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.deployment.restart(&self.ctx).await
    }

    fn read_status<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&Status<C, V>) -> T,
    {
        let status = self.status.read().unwrap_or_else(PoisonError::into_inner);
        f(&status)
    }

    fn write_status<F>(&self, f: F)
    where
        F: FnOnce(&mut Status<C, V>),
    {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut status)
    }

    fn publish(&self, state: DeploymentState) {
        self.write_status(|status| status.state = state);
    }

    fn require_open(&self, what: &'static str) -> Result<()> {
        let state = self.state();
        ensure!(
            state == DeploymentState::ResourcesOpen,
            error::NotReadySnafu {
                kind: self.kind.clone(),
                what,
                state,
            }
        );
        Ok(())
    }

    fn read_handles<T, F>(&self, what: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&Handles<C, V>) -> T,
    {
        self.read_status(|status| match (&status.state, &status.handles) {
            (DeploymentState::ResourcesOpen, Some(handles)) => Ok(f(handles)),
            (state, _) => error::NotReadySnafu {
                kind: self.kind.clone(),
                what,
                state: *state,
            }
            .fail(),
        })
    }

    /// Acquire dependencies, deploy, wait for readiness and open client resources.
    async fn open(&self, inner: &mut Inner) -> Result<()> {
        // A resource kept deployed for reuse still holds its dependencies.
        if inner.acquired.is_empty() {
            for dependency in &self.dependencies {
                debug!("'{}' requires '{}'", self.kind, dependency.kind());
                let binding = dependency.acquire().await.map_err(|e| Error::Dependency {
                    kind: self.kind.clone(),
                    dependency: dependency.kind().clone(),
                    source: Box::new(e),
                })?;
                inner.acquired.push(binding);
            }
        }

        let deployed = inner.deployment.deploy(&self.ctx).await;
        self.publish(inner.deployment.state());
        deployed?;

        debug!("Opening the resources of '{}'", self.kind);
        let client = self
            .connector
            .open(&self.account, &self.ctx)
            .await
            .context(error::OpenResourcesSnafu {
                kind: self.kind.clone(),
            })?;
        let client = Arc::new(client);
        let validation = Arc::new(self.connector.validation(&client));
        self.write_status(|status| {
            status.handles = Some(Handles { client, validation });
            status.state = DeploymentState::ResourcesOpen;
        });
        info!("'{}' is open", self.kind);
        Ok(())
    }

    async fn close(&self, failures: &mut TeardownFailures) {
        let mut handles = None;
        self.write_status(|status| handles = status.handles.take());
        if let Some(handles) = handles {
            debug!("Closing the resources of '{}'", self.kind);
            if let Err(e) = self
                .connector
                .close(&handles.client, &handles.validation)
                .await
            {
                error!("Unable to close the resources of '{}': {}", self.kind, e);
                failures.push(TeardownStep::CloseResources, e);
            }
        }
        self.publish(DeploymentState::ResourcesClosed);
    }

    /// Give back the leases this service holds on its dependencies, most recent first.
    async fn release_dependencies(&self, inner: &mut Inner, failures: &mut TeardownFailures) {
        while let Some(dependency) = inner.acquired.pop() {
            debug!(
                "Releasing '{}', no longer required by '{}'",
                dependency.kind(),
                self.kind
            );
            if let Err(e) = dependency.after_all().await {
                error!("Unable to release '{}': {}", dependency.kind(), e);
                failures.push(
                    TeardownStep::ReleaseDependency,
                    ProviderError::new_with_source_and_context(
                        Failure::Permanent,
                        format!("Unable to release '{}'", dependency.kind()),
                        e,
                    ),
                );
            }
        }
    }

    /// Undo what a failed `open` left behind: whatever the failed deploy started, then the
    /// dependencies unless the resource is still deployed. Failures are logged only, the open
    /// error is what the caller sees.
    async fn abandon(&self, inner: &mut Inner) {
        if inner.deployment.state() == DeploymentState::Failed {
            if let Err(e) = inner.deployment.discard(&self.ctx).await {
                error!(
                    "Unable to undeploy what is left of '{}' after a failed deploy: {}",
                    self.kind, e
                );
            }
            self.publish(inner.deployment.state());
        }
        // A resource left deployed keeps its dependencies until shutdown.
        if !inner.deployment.state().is_deployed() {
            let mut failures = TeardownFailures::default();
            self.release_dependencies(inner, &mut failures).await;
        }
    }

    async fn teardown(&self, inner: &mut Inner, still_needed: bool) -> TeardownFailures {
        let mut failures = TeardownFailures::default();
        let reusable = inner.deployment.capabilities().is_reusable();
        if reusable && still_needed {
            info!(
                "'{}' is needed by a later test context, cleaning up instead of undeploying",
                self.kind
            );
            if let Some(Err(e)) = inner.deployment.cleanup(&self.ctx).await {
                error!("Unable to clean up '{}': {}", self.kind, e);
                failures.push(TeardownStep::Cleanup, e);
            }
            self.close(&mut failures).await;
            if failures.is_empty() {
                self.publish(DeploymentState::CleanedUp);
            }
        } else {
            self.close(&mut failures).await;
            match inner.deployment.undeploy(&self.ctx).await {
                Ok(()) if inner.deployment.state() == DeploymentState::Undeployed => {
                    self.publish(DeploymentState::Undeployed)
                }
                Ok(()) => {}
                Err(e) => {
                    error!("Unable to undeploy '{}': {}", self.kind, e);
                    failures.push(TeardownStep::Undeploy, e);
                }
            }
            self.release_dependencies(inner, &mut failures).await;
        }
        failures
    }

    fn teardown_result(&self, failures: TeardownFailures) -> Result<()> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Teardown {
                kind: self.kind.clone(),
                source: failures,
            })
        }
    }
}

#[async_trait]
impl<A, C, V> Binding for Service<A, C, V>
where
    A: Account,
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn kind(&self) -> &ServiceKind {
        &self.kind
    }

    fn state(&self) -> DeploymentState {
        Service::state(self)
    }

    async fn before_all(&self) -> Result<()> {
        let seen = self.failures.load(Ordering::Acquire);
        let mut inner = self.inner.lock().await;
        if inner.failures > seen {
            if let Some(failure) = &inner.last_failure {
                debug!(
                    "'{}' failed while this context was waiting for it",
                    self.kind
                );
                return Err(Error::Unavailable {
                    kind: self.kind.clone(),
                    source: Arc::clone(failure),
                });
            }
        }
        if inner.leases > 0 {
            inner.leases += 1;
            debug!(
                "'{}' is already open, now shared by {} contexts",
                self.kind, inner.leases
            );
            return Ok(());
        }
        match self.open(&mut inner).await {
            Ok(()) => {
                inner.leases = 1;
                Ok(())
            }
            Err(e) => {
                error!("'{}' is unavailable: {}", self.kind, e);
                self.abandon(&mut inner).await;
                let failure = Arc::new(e);
                inner.failures += 1;
                inner.last_failure = Some(Arc::clone(&failure));
                self.failures.store(inner.failures, Ordering::Release);
                Err(Error::Unavailable {
                    kind: self.kind.clone(),
                    source: failure,
                })
            }
        }
    }

    async fn after_all(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        // Released under the lock so that the last context to tear down sees the final demand.
        let still_needed = self.demand.release(&self.kind);
        if inner.leases == 0 {
            debug!("'{}' holds no lease, nothing to tear down", self.kind);
            return Ok(());
        }
        inner.leases -= 1;
        if inner.leases > 0 {
            debug!(
                "'{}' is still used by {} contexts, keeping it open",
                self.kind, inner.leases
            );
            return Ok(());
        }
        let failures = self.teardown(&mut inner, still_needed).await;
        self.teardown_result(failures)
    }

    async fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.leases > 0
            || !inner.deployment.state().is_deployed()
            || matches!(inner.deployment.capabilities(), Capabilities::External)
        {
            return Ok(());
        }
        info!("Shutting down '{}'", self.kind);
        let failures = self.teardown(&mut inner, false).await;
        self.teardown_result(failures)
    }
}
