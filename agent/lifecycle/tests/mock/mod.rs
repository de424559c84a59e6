/*!

This test module provides mock implementations of the capability traits and of [`Connector`] that
record what the lifecycle asks of them in a shared [`Journal`], so that tests can assert on the
exact order of deploys, cleanups and closes without any infrastructure.

!*/

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testbed_lifecycle::provider::{
    Capabilities, Connector, Deployable, ExtendedDeployable, Failure, ProviderError,
    ProviderResult, ReusableDeployable,
};
use testbed_lifecycle::{Context, NoAccount, PodSelector, Service, ServiceKind, Settings};
use testbed_model::label_selector;

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A context with short waits so that readiness tests finish quickly.
pub(crate) fn fast_context() -> Context {
    Context::new(Settings {
        wait_interval_ms: 10,
        wait_timeout_ms: 2_000,
        retry_max: 2,
        retry_delay_ms: 10,
        ..Settings::default()
    })
    .with_run_id("test-run")
}

pub(crate) fn kind(name: &str) -> ServiceKind {
    name.parse().unwrap()
}

/// An ordered record of collaborator calls, shared by every mock of a test.
#[derive(Clone, Debug, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub(crate) fn record<S: Into<String>>(&self, event: S) {
        self.0.lock().unwrap().push(event.into());
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, event: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

/// A resource that pretends to be deployed. Its failure modes are switched on with the builder
/// methods.
#[derive(Clone)]
pub(crate) struct MockResource {
    name: String,
    journal: Journal,
    deployed: Arc<AtomicBool>,
    ready_checks: Arc<AtomicUsize>,
    ready_after: usize,
    never_ready: bool,
    fail_deploy: bool,
    fail_readiness: bool,
    fail_cleanup: bool,
    fail_undeploy: bool,
    deploy_delay: Duration,
}

impl MockResource {
    pub(crate) fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            journal: journal.clone(),
            deployed: Arc::new(AtomicBool::new(false)),
            ready_checks: Arc::new(AtomicUsize::new(0)),
            ready_after: 0,
            never_ready: false,
            fail_deploy: false,
            fail_readiness: false,
            fail_cleanup: false,
            fail_undeploy: false,
            deploy_delay: Duration::ZERO,
        }
    }

    /// Report not ready for the first `checks` readiness checks.
    pub(crate) fn ready_after(mut self, checks: usize) -> Self {
        self.ready_after = checks;
        self
    }

    pub(crate) fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    pub(crate) fn failing_deploy(mut self) -> Self {
        self.fail_deploy = true;
        self
    }

    pub(crate) fn failing_readiness(mut self) -> Self {
        self.fail_readiness = true;
        self
    }

    pub(crate) fn failing_cleanup(mut self) -> Self {
        self.fail_cleanup = true;
        self
    }

    pub(crate) fn failing_undeploy(mut self) -> Self {
        self.fail_undeploy = true;
        self
    }

    pub(crate) fn deploy_delay(mut self, delay: Duration) -> Self {
        self.deploy_delay = delay;
        self
    }

    /// Pretend the resource was deployed by someone else.
    pub(crate) fn already_deployed(self) -> Self {
        self.deployed.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn is_up(&self) -> bool {
        self.deployed.load(Ordering::SeqCst)
    }

    pub(crate) fn ready_checks(&self) -> usize {
        self.ready_checks.load(Ordering::SeqCst)
    }

    fn event(&self, action: &str) -> String {
        format!("{}:{}", action, self.name)
    }
}

#[async_trait::async_trait]
impl Deployable for MockResource {
    async fn deploy(&self, _ctx: &Context) -> ProviderResult<()> {
        self.journal.record(self.event("deploy"));
        if !self.deploy_delay.is_zero() {
            tokio::time::sleep(self.deploy_delay).await;
        }
        if self.fail_deploy {
            return Err(ProviderError::new_with_context(
                Failure::Permanent,
                format!("{} refused to start", self.name),
            ));
        }
        self.deployed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn undeploy(&self, _ctx: &Context) -> ProviderResult<()> {
        self.journal.record(self.event("undeploy"));
        if self.fail_undeploy {
            return Err(ProviderError::new_with_context(
                Failure::Permanent,
                format!("{} refused to stop", self.name),
            ));
        }
        self.deployed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_deployed(&self, _ctx: &Context) -> ProviderResult<bool> {
        Ok(self.is_up())
    }
}

#[async_trait::async_trait]
impl ExtendedDeployable for MockResource {
    async fn is_ready(&self, _ctx: &Context) -> ProviderResult<bool> {
        let checks = self.ready_checks.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(!self.never_ready && checks > self.ready_after)
    }

    async fn has_failed(&self, _ctx: &Context) -> ProviderResult<bool> {
        Ok(self.fail_readiness)
    }

    async fn restart(&self, _ctx: &Context) -> ProviderResult<()> {
        self.journal.record(self.event("restart"));
        Ok(())
    }

    fn pod_selector(&self) -> Option<PodSelector> {
        Some(label_selector("app", self.name.as_str()))
    }
}

#[async_trait::async_trait]
impl ReusableDeployable for MockResource {
    async fn cleanup(&self, _ctx: &Context) -> ProviderResult<()> {
        self.journal.record(self.event("cleanup"));
        if self.fail_cleanup {
            return Err(ProviderError::new_with_context(
                Failure::Permanent,
                format!("{} could not be cleaned", self.name),
            ));
        }
        Ok(())
    }
}

/// A pretend client. `serial` tells apart clients opened at different times.
#[derive(Debug)]
pub(crate) struct MockClient {
    pub(crate) name: String,
    pub(crate) serial: usize,
}

#[derive(Debug)]
pub(crate) struct MockValidation {
    pub(crate) client: Arc<MockClient>,
}

#[derive(Clone)]
pub(crate) struct MockConnector {
    name: String,
    journal: Journal,
    opened: Arc<AtomicUsize>,
    fail_open: bool,
    fail_close: bool,
}

impl MockConnector {
    pub(crate) fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            journal: journal.clone(),
            opened: Arc::new(AtomicUsize::new(0)),
            fail_open: false,
            fail_close: false,
        }
    }

    pub(crate) fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub(crate) fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

#[async_trait::async_trait]
impl Connector<NoAccount, MockClient, MockValidation> for MockConnector {
    async fn open(&self, _account: &NoAccount, _ctx: &Context) -> ProviderResult<MockClient> {
        self.journal.record(format!("open:{}", self.name));
        if self.fail_open {
            return Err(ProviderError::new_with_context(
                Failure::Permanent,
                "connection refused",
            ));
        }
        Ok(MockClient {
            name: self.name.clone(),
            serial: self.opened.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    fn validation(&self, client: &Arc<MockClient>) -> MockValidation {
        MockValidation {
            client: Arc::clone(client),
        }
    }

    async fn close(&self, _client: &MockClient, _validation: &MockValidation) -> ProviderResult<()> {
        self.journal.record(format!("close:{}", self.name));
        if self.fail_close {
            return Err(ProviderError::new_with_context(
                Failure::Permanent,
                "connection reset",
            ));
        }
        Ok(())
    }
}

pub(crate) type MockService = Service<NoAccount, MockClient, MockValidation>;

pub(crate) fn mock_service(
    name: &str,
    capabilities: Capabilities,
    journal: &Journal,
    ctx: &Context,
) -> MockService {
    Service::new(
        kind(name),
        NoAccount::default(),
        capabilities,
        MockConnector::new(name, journal),
        ctx.clone(),
    )
}
