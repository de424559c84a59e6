/*!

Mock units and a fake cluster for the provider tests. Units record what they are asked to do in a
shared [`Journal`]; the fake cluster keeps its pods in memory and can replace deleted pods the way
a controller would.

!*/

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use testbed_lifecycle::provider::{
    Deployable, ExtendedDeployable, Failure, ProviderError, ProviderResult,
};
use testbed_lifecycle::{
    label_selector, ClusterApi, Context, PodInfo, PodSelector, ServiceKind, Settings,
    WorkloadInfo,
};

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn fast_context() -> Context {
    Context::new(Settings {
        namespace: "testbed".to_string(),
        wait_interval_ms: 10,
        wait_timeout_ms: 1_000,
        retry_max: 2,
        retry_delay_ms: 10,
        ..Settings::default()
    })
    .with_run_id("provider-test")
}

pub(crate) fn kind(name: &str) -> ServiceKind {
    name.parse().unwrap()
}

#[derive(Clone, Default)]
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

/// One part of a composite resource. It records `deploy`, `ready` (once, when it first reports
/// ready), `restart` and `undeploy`.
#[derive(Clone)]
pub(crate) struct MockUnit {
    name: String,
    journal: Journal,
    deployed: Arc<AtomicBool>,
    announced: Arc<AtomicBool>,
    checks: Arc<AtomicUsize>,
    ready_after: usize,
    broken: bool,
    fail_undeploy: bool,
}

impl MockUnit {
    pub(crate) fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            journal: journal.clone(),
            deployed: Arc::new(AtomicBool::new(false)),
            announced: Arc::new(AtomicBool::new(false)),
            checks: Arc::new(AtomicUsize::new(0)),
            ready_after: 0,
            broken: false,
            fail_undeploy: false,
        }
    }

    pub(crate) fn ready_after(mut self, checks: usize) -> Self {
        self.ready_after = checks;
        self
    }

    /// Deploys, then reports that it failed.
    pub(crate) fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    pub(crate) fn failing_undeploy(mut self) -> Self {
        self.fail_undeploy = true;
        self
    }

    pub(crate) fn already_deployed(self) -> Self {
        self.deployed.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn is_up(&self) -> bool {
        self.deployed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Deployable for MockUnit {
    async fn deploy(&self, _ctx: &Context) -> ProviderResult<()> {
        self.journal.record(format!("deploy:{}", self.name));
        self.deployed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn undeploy(&self, _ctx: &Context) -> ProviderResult<()> {
        self.journal.record(format!("undeploy:{}", self.name));
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
impl ExtendedDeployable for MockUnit {
    async fn is_ready(&self, _ctx: &Context) -> ProviderResult<bool> {
        if !self.is_up() || self.broken {
            return Ok(false);
        }
        let checks = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        let ready = checks > self.ready_after;
        if ready && !self.announced.swap(true, Ordering::SeqCst) {
            self.journal.record(format!("ready:{}", self.name));
        }
        Ok(ready)
    }

    async fn has_failed(&self, _ctx: &Context) -> ProviderResult<bool> {
        Ok(self.broken)
    }

    async fn restart(&self, _ctx: &Context) -> ProviderResult<()> {
        self.journal.record(format!("restart:{}", self.name));
        Ok(())
    }

    fn pod_selector(&self) -> Option<PodSelector> {
        Some(label_selector("app", self.name.as_str()))
    }
}

/// An in-memory cluster. Deleted pods are replaced by `<name>-r` with the same labels when
/// `replace_with` is set, ready or not as configured.
#[derive(Default)]
pub(crate) struct FakeCluster {
    pods: Mutex<BTreeMap<String, Vec<PodInfo>>>,
    workloads: Mutex<BTreeMap<String, Vec<WorkloadInfo>>>,
    deleted: Mutex<Vec<String>>,
    replace_with: Option<bool>,
    flaky_deletes: AtomicUsize,
}

impl FakeCluster {
    pub(crate) fn pod(self, namespace: &str, pod: PodInfo) -> Self {
        self.pods
            .lock()
            .unwrap()
            .entry(namespace.to_string())
            .or_default()
            .push(pod);
        self
    }

    pub(crate) fn workload(self, namespace: &str, workload: WorkloadInfo) -> Self {
        self.workloads
            .lock()
            .unwrap()
            .entry(namespace.to_string())
            .or_default()
            .push(workload);
        self
    }

    /// Scale up: `available` replicas of the workload `name` are now available.
    pub(crate) fn set_available(&self, namespace: &str, name: &str, available: u32) {
        let mut workloads = self.workloads.lock().unwrap();
        for workload in workloads.entry(namespace.to_string()).or_default() {
            if workload.name == name {
                workload.available = available;
            }
        }
    }

    pub(crate) fn replacing(mut self, ready: bool) -> Self {
        self.replace_with = Some(ready);
        self
    }

    /// The next `count` deletes fail with a transient error.
    pub(crate) fn flaky_deletes(self, count: usize) -> Self {
        self.flaky_deletes.store(count, Ordering::SeqCst);
        self
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ClusterApi for FakeCluster {
    async fn list_pods(&self, namespace: &str) -> ProviderResult<Vec<PodInfo>> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> ProviderResult<()> {
        let flaky = self
            .flaky_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if flaky {
            return Err(ProviderError::transient("the control plane is busy"));
        }
        let mut pods = self.pods.lock().unwrap();
        let pods = pods.entry(namespace.to_string()).or_default();
        let position = pods.iter().position(|pod| pod.name == name).ok_or_else(|| {
            ProviderError::new_with_context(
                Failure::Permanent,
                format!("pod '{}' not found", name),
            )
        })?;
        let removed = pods.remove(position);
        self.deleted.lock().unwrap().push(name.to_string());
        if let Some(ready) = self.replace_with {
            let mut replacement = PodInfo::new(format!("{}-r", removed.name)).with_ready(ready);
            replacement.labels = removed.labels;
            pods.push(replacement);
        }
        Ok(())
    }

    async fn list_workloads(&self, namespace: &str) -> ProviderResult<Vec<WorkloadInfo>> {
        Ok(self
            .workloads
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }
}

pub(crate) fn cluster_context(cluster: FakeCluster) -> (Context, Arc<FakeCluster>) {
    let cluster = Arc::new(cluster);
    let ctx = fast_context().with_cluster(Arc::clone(&cluster) as Arc<dyn ClusterApi>);
    (ctx, cluster)
}
