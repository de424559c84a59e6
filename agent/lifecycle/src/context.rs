/*!

The `context` module defines the [`Context`] that is handed to every collaborator call. It
replaces any notion of a global cluster client: whatever a collaborator needs to reach the
infrastructure travels with the context, which also makes it easy to inject fakes in tests.

!*/

use crate::provider::{Failure, IntoProviderError, ProviderError, ProviderResult};
use crate::retry::RetryPolicy;
use crate::wait::PollSpec;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use testbed_model::{PodInfo, Settings, WorkloadInfo};

/// `ClusterApi` is the seam between cluster-backed collaborators and the cluster they deploy
/// into. It is provided as a trait so that fakes can be injected for testing; the `providers`
/// crate has a Kubernetes implementation.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    /// List the pods in `namespace`.
    async fn list_pods(&self, namespace: &str) -> ProviderResult<Vec<PodInfo>>;

    /// Delete the pod `name` in `namespace`, letting its controller replace it.
    async fn delete_pod(&self, namespace: &str, name: &str) -> ProviderResult<()>;

    /// List the replicated workloads in `namespace` with their desired and available replicas.
    async fn list_workloads(&self, namespace: &str) -> ProviderResult<Vec<WorkloadInfo>>;
}

/// Everything a collaborator may need besides its own state.
#[derive(Clone)]
pub struct Context {
    run_id: String,
    settings: Settings,
    cluster: Option<Arc<dyn ClusterApi>>,
}

impl Context {
    /// Create a context for a new test run with a generated run id.
    pub fn new(settings: Settings) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            settings,
            cluster: None,
        }
    }

    pub fn with_run_id<S: Into<String>>(mut self, run_id: S) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_cluster(mut self, cluster: Arc<dyn ClusterApi>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Identifies the test run, e.g. for labelling what it deploys.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The namespace cluster-backed resources are deployed into unless they choose their own.
    pub fn namespace(&self) -> &str {
        &self.settings.namespace
    }

    /// The cluster API, or a permanent error if this run has no cluster.
    pub fn cluster(&self) -> ProviderResult<&dyn ClusterApi> {
        self.cluster
            .as_deref()
            .context(Failure::Permanent, "No cluster API is configured for this test run")
    }

    /// A [`PollSpec`] with the interval and timeout of the run's settings.
    pub fn poll<S: Into<String>>(&self, description: S) -> PollSpec {
        PollSpec::new(description)
            .interval(self.settings.wait_interval())
            .timeout(self.settings.wait_timeout())
    }

    /// A [`RetryPolicy`] retrying transient collaborator errors as the settings allow.
    pub fn retry_policy(&self) -> RetryPolicy<ProviderError> {
        RetryPolicy::transient()
            .max_retries(self.settings.retry_max)
            .delay(self.settings.retry_delay())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("run_id", &self.run_id)
            .field("settings", &self.settings)
            .field("cluster", &self.cluster.is_some())
            .finish()
    }
}
