/*!

The `registry` module keeps one shared [`Service`] per [`ServiceKind`] for a test run and does the
bookkeeping that decides whether a reusable resource is cleaned up or undeployed when a test
context finishes with it.

!*/

use crate::error::{self, Error, Result};
use crate::service::{Binding, Service};
use crate::Context;
use async_trait::async_trait;
use log::{debug, error, info};
use snafu::{ensure, OptionExt};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use testbed_model::{Account, ServiceKind};
use tokio::sync::OnceCell;

/// Counts, per kind, the test contexts that declared they need the kind and have not finished
/// with it yet.
#[derive(Debug, Default)]
pub struct Demand {
    pending: Mutex<HashMap<ServiceKind, usize>>,
}

impl Demand {
    /// Record that one more test context will use `kind`.
    pub fn mark_needed(&self, kind: &ServiceKind) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending.entry(kind.clone()).or_insert(0) += 1;
    }

    /// The number of contexts that still need `kind`.
    pub fn pending(&self, kind: &ServiceKind) -> usize {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.get(kind).copied().unwrap_or(0)
    }

    pub fn is_still_needed(&self, kind: &ServiceKind) -> bool {
        self.pending(kind) > 0
    }

    /// One context is done with `kind`. Returns whether another context still needs it. Never
    /// goes below zero, so a context that never declared its need does not skew the count.
    pub(crate) fn release(&self, kind: &ServiceKind) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.get_mut(kind) {
            Some(count) if *count > 0 => {
                *count -= 1;
                *count > 0
            }
            _ => false,
        }
    }
}

/// Another service that a [`Service`] needs while it is deployed, e.g. the blob store that
/// holds the checkpoints of an event hub. See [`Service::requires`].
#[async_trait]
pub trait Dependency: Send + Sync {
    fn kind(&self) -> &ServiceKind;

    /// Take a lease on the dependency, deploying it if needed. The lease is given back with
    /// [`Binding::after_all`].
    async fn acquire(&self) -> Result<Arc<dyn Binding>>;
}

type Factory<A, C, V> = Box<dyn Fn(&Context) -> Result<Service<A, C, V>> + Send + Sync>;

struct Slot<A, C, V>
where
    A: Account,
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    kind: ServiceKind,
    factory: Factory<A, C, V>,
    shared: OnceCell<Arc<Service<A, C, V>>>,
}

impl<A, C, V> Slot<A, C, V>
where
    A: Account,
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn shared(&self, ctx: &Context, demand: &Arc<Demand>) -> Result<Arc<Service<A, C, V>>> {
        let service = self
            .shared
            .get_or_try_init(|| async {
                debug!("Creating the shared '{}' service", self.kind);
                let service = (self.factory)(ctx)?;
                Ok::<_, Error>(Arc::new(service.with_demand(Arc::clone(demand))))
            })
            .await?;
        Ok(Arc::clone(service))
    }

    /// A new instance that shares nothing with the registry, so its teardown always undeploys.
    fn fresh(&self, ctx: &Context) -> Result<Service<A, C, V>> {
        debug!("Creating a fresh '{}' service", self.kind);
        (self.factory)(ctx)
    }
}

#[async_trait]
trait ErasedSlot: Send + Sync {
    async fn shared(&self, ctx: &Context, demand: &Arc<Demand>) -> Result<Arc<dyn Binding>>;

    fn fresh(&self, ctx: &Context) -> Result<Box<dyn Binding>>;

    fn created(&self) -> Option<Arc<dyn Binding>>;
}

#[async_trait]
impl<A, C, V> ErasedSlot for Slot<A, C, V>
where
    A: Account,
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn shared(&self, ctx: &Context, demand: &Arc<Demand>) -> Result<Arc<dyn Binding>> {
        let service: Arc<dyn Binding> = Slot::shared(self, ctx, demand).await?;
        Ok(service)
    }

    fn fresh(&self, ctx: &Context) -> Result<Box<dyn Binding>> {
        Ok(Box::new(Slot::fresh(self, ctx)?))
    }

    fn created(&self) -> Option<Arc<dyn Binding>> {
        self.shared
            .get()
            .map(|service| Arc::clone(service) as Arc<dyn Binding>)
    }
}

/// Holds one lazily created, shared [`Service`] per registered kind.
///
/// Contexts that use a kind at the same time share one instance of it; whichever context asks
/// first creates and deploys it while the others wait. When a context finishes, the
/// registry's [`Demand`] decides whether a reusable resource is kept for a later context.
///
/// # Example
///
/// ```no_run
/// # use testbed_lifecycle::{Context, ServiceRegistry};
/// # async fn run(registry: &ServiceRegistry) -> testbed_lifecycle::Result<()> {
/// let kind = "broker".parse()?;
/// registry.mark_needed(&kind);
/// let broker = registry.get(&kind).await?;
/// // ... run tests ...
/// broker.after_all().await?;
/// registry.shutdown().await
/// # }
/// ```
pub struct ServiceRegistry {
    ctx: Context,
    demand: Arc<Demand>,
    slots: RwLock<HashMap<ServiceKind, Arc<dyn ErasedSlot>>>,
}

impl ServiceRegistry {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            demand: Arc::new(Demand::default()),
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Register how to build the service of `kind`. The `factory` runs at most once for the
    /// shared instance, when the kind is first requested, plus once per [`Registered::create`].
    pub fn register<A, C, V, F>(&self, kind: ServiceKind, factory: F) -> Result<Registered<A, C, V>>
    where
        A: Account,
        C: Send + Sync + 'static,
        V: Send + Sync + 'static,
        F: Fn(&Context) -> Result<Service<A, C, V>> + Send + Sync + 'static,
    {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        ensure!(
            !slots.contains_key(&kind),
            error::ConfigurationSnafu {
                message: format!("A service is already registered for kind '{}'", kind),
            }
        );
        let slot = Arc::new(Slot {
            kind: kind.clone(),
            factory: Box::new(factory),
            shared: OnceCell::new(),
        });
        slots.insert(kind.clone(), Arc::clone(&slot) as Arc<dyn ErasedSlot>);
        info!("Registered service kind '{}'", kind);
        Ok(Registered {
            slot,
            ctx: self.ctx.clone(),
            demand: Arc::clone(&self.demand),
        })
    }

    /// The registered kinds, in no particular order.
    pub fn kinds(&self) -> Vec<ServiceKind> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.keys().cloned().collect()
    }

    fn slot(&self, kind: &ServiceKind) -> Result<Arc<dyn ErasedSlot>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(kind)
            .cloned()
            .context(error::ConfigurationSnafu {
                message: format!("No service is registered for kind '{}'", kind),
            })
    }

    /// Acquire the shared service of `kind`: create it if this is the first request, then run
    /// its [`Binding::before_all`]. The caller owns one lease and must give it back with
    /// [`Binding::after_all`].
    pub async fn get(&self, kind: &ServiceKind) -> Result<Arc<dyn Binding>> {
        let binding = self.slot(kind)?.shared(&self.ctx, &self.demand).await?;
        binding.before_all().await?;
        Ok(binding)
    }

    /// Acquire a new instance of `kind` that is not shared with anyone.
    pub async fn create(&self, kind: &ServiceKind) -> Result<Box<dyn Binding>> {
        let binding = self.slot(kind)?.fresh(&self.ctx)?;
        binding.before_all().await?;
        Ok(binding)
    }

    /// Declare that a test context will use `kind`. Call this for every context before any of
    /// them runs so that reusable resources survive until the last one is done.
    pub fn mark_needed(&self, kind: &ServiceKind) {
        self.demand.mark_needed(kind);
    }

    pub fn is_still_needed(&self, kind: &ServiceKind) -> bool {
        self.demand.is_still_needed(kind)
    }

    pub fn demand(&self) -> &Demand {
        &self.demand
    }

    /// Give up a declared need without having acquired the service, e.g. because setup failed
    /// before reaching it.
    pub(crate) fn release(&self, kind: &ServiceKind) {
        self.demand.release(kind);
    }

    /// Undeploy every shared resource that was kept deployed but is no longer leased. Failures
    /// are logged; the first one is returned after every service has been shut down.
    pub async fn shutdown(&self) -> Result<()> {
        let created: Vec<Arc<dyn Binding>> = {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            slots.values().filter_map(|slot| slot.created()).collect()
        };
        let mut first_error = None;
        for binding in created {
            if let Err(e) = binding.shutdown().await {
                error!("Unable to shut down '{}': {}", binding.kind(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Debug for ServiceRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("ctx", &self.ctx)
            .field("demand", &self.demand)
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// The typed handle returned by [`ServiceRegistry::register`].
pub struct Registered<A, C, V>
where
    A: Account,
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    slot: Arc<Slot<A, C, V>>,
    ctx: Context,
    demand: Arc<Demand>,
}

impl<A, C, V> Registered<A, C, V>
where
    A: Account,
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn kind(&self) -> &ServiceKind {
        &self.slot.kind
    }

    /// Acquire the shared service, see [`ServiceRegistry::get`].
    pub async fn get(&self) -> Result<Arc<Service<A, C, V>>> {
        let service = self.slot.shared(&self.ctx, &self.demand).await?;
        service.before_all().await?;
        Ok(service)
    }

    /// Acquire a new, unshared instance, see [`ServiceRegistry::create`].
    pub async fn create(&self) -> Result<Service<A, C, V>> {
        let service = self.slot.fresh(&self.ctx)?;
        service.before_all().await?;
        Ok(service)
    }

    /// The shared service if it has been created, without taking a lease.
    pub fn service(&self) -> Option<Arc<Service<A, C, V>>> {
        self.slot.shared.get().cloned()
    }

    /// The validation helper of the shared service. A dependent service uses this from its
    /// [`Connector`](crate::provider::Connector) while it holds a lease on this one.
    pub fn validation(&self) -> Result<Arc<V>> {
        match self.service() {
            Some(service) => service.validation(),
            None => error::NotReadySnafu {
                kind: self.slot.kind.clone(),
                what: "validation",
                state: testbed_model::DeploymentState::NotDeployed,
            }
            .fail(),
        }
    }
}

#[async_trait]
impl<A, C, V> Dependency for Registered<A, C, V>
where
    A: Account,
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn kind(&self) -> &ServiceKind {
        &self.slot.kind
    }

    async fn acquire(&self) -> Result<Arc<dyn Binding>> {
        let service: Arc<dyn Binding> = self.get().await?;
        Ok(service)
    }
}

impl<A, C, V> Clone for Registered<A, C, V>
where
    A: Account,
    C: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            ctx: self.ctx.clone(),
            demand: Arc::clone(&self.demand),
        }
    }
}
