use log::{debug, error, info};
use std::fmt::{Debug, Formatter};
use testbed_lifecycle::provider::{
    Deployable, ExtendedDeployable, Failure, IntoProviderError, ProviderResult,
};
use testbed_lifecycle::wait::wait_for;
use testbed_lifecycle::{Context, PodInfo, PodSelector};

/// An ordered group of units that make up one resource, e.g. a broker and the coordination
/// service it depends on.
///
/// Units are deployed in order, each one deployed and ready before the next one starts, and
/// undeployed in reverse order. A deploy that fails stops the units it started before returning
/// the error. Undeploy carries on past a failing unit so that the remaining
/// units are still stopped; the first failure is returned.
pub struct Composite {
    name: String,
    units: Vec<Box<dyn ExtendedDeployable>>,
}

impl Composite {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            units: Vec::new(),
        }
    }

    /// Append a unit. It is deployed after, and undeployed before, the units added so far.
    pub fn unit<D: ExtendedDeployable + 'static>(mut self, unit: D) -> Self {
        self.units.push(Box::new(unit));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl Composite {
    async fn deploy_unit(
        &self,
        ctx: &Context,
        i: usize,
        unit: &dyn ExtendedDeployable,
    ) -> ProviderResult<()> {
        unit.deploy(ctx).await?;
        let spec = ctx.poll(format!("Waiting until unit {} of '{}' is ready", i, self.name));
        wait_for(&spec, || unit.is_ready(ctx), || unit.has_failed(ctx))
            .await
            .context(
                Failure::Permanent,
                format!("Unit {} of '{}' did not become ready", i, self.name),
            )
    }

    /// Stop, in reverse order, the units that a failed deploy started. Units that were already
    /// running before the deploy are left alone.
    async fn roll_back(&self, ctx: &Context, started: &[usize]) {
        for (i, unit) in self.units.iter().enumerate().rev() {
            if !started.contains(&i) {
                continue;
            }
            info!("Rolling back unit {} of '{}'", i, self.name);
            if let Err(e) = unit.undeploy(ctx).await {
                error!("Unable to roll back unit {} of '{}': {}", i, self.name, e);
            }
        }
    }
}

#[async_trait::async_trait]
impl Deployable for Composite {
    async fn deploy(&self, ctx: &Context) -> ProviderResult<()> {
        let mut started = Vec::new();
        for (i, unit) in self.units.iter().enumerate() {
            if unit.is_deployed(ctx).await? {
                debug!("Unit {} of '{}' is already deployed", i, self.name);
                continue;
            }
            info!("Deploying unit {} of '{}'", i, self.name);
            started.push(i);
            if let Err(e) = self.deploy_unit(ctx, i, unit.as_ref()).await {
                self.roll_back(ctx, &started).await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn undeploy(&self, ctx: &Context) -> ProviderResult<()> {
        let mut first_error = None;
        for (i, unit) in self.units.iter().enumerate().rev() {
            info!("Undeploying unit {} of '{}'", i, self.name);
            if let Err(e) = unit.undeploy(ctx).await {
                error!("Unable to undeploy unit {} of '{}': {}", i, self.name, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn is_deployed(&self, ctx: &Context) -> ProviderResult<bool> {
        for unit in &self.units {
            if !unit.is_deployed(ctx).await? {
                return Ok(false);
            }
        }
        Ok(!self.units.is_empty())
    }
}

#[async_trait::async_trait]
impl ExtendedDeployable for Composite {
    async fn is_ready(&self, ctx: &Context) -> ProviderResult<bool> {
        for unit in &self.units {
            if !unit.is_ready(ctx).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn has_failed(&self, ctx: &Context) -> ProviderResult<bool> {
        for unit in &self.units {
            if unit.has_failed(ctx).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn restart(&self, ctx: &Context) -> ProviderResult<()> {
        for unit in &self.units {
            unit.restart(ctx).await?;
        }
        Ok(())
    }

    /// Selects the pods of any unit.
    fn pod_selector(&self) -> Option<PodSelector> {
        let selectors: Vec<PodSelector> = self
            .units
            .iter()
            .filter_map(|unit| unit.pod_selector())
            .collect();
        if selectors.is_empty() {
            return None;
        }
        Some(std::sync::Arc::new(move |pod: &PodInfo| {
            selectors.iter().any(|selector| selector(pod))
        }))
    }

    fn target_namespace(&self, ctx: &Context) -> String {
        self.units
            .first()
            .map(|unit| unit.target_namespace(ctx))
            .unwrap_or_else(|| ctx.namespace().to_string())
    }
}

impl Debug for Composite {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composite")
            .field("name", &self.name)
            .field("units", &self.units.len())
            .finish()
    }
}
