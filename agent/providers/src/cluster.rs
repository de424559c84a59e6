/*!

[`KubeCluster`] implements [`ClusterApi`] with the `kube` client, so that cluster-backed
collaborators can list and delete pods, and check the replicas of deployments, without holding a
client of their own.

!*/

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use log::{debug, trace};
use std::convert::TryFrom;
use std::path::Path;
use testbed_lifecycle::provider::{Failure, IntoProviderError, ProviderError, ProviderResult};
use testbed_lifecycle::{ClusterApi, PodInfo, WorkloadInfo};

/// A [`ClusterApi`] backed by a Kubernetes cluster.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient configuration: the in-cluster service account, or
    /// `$KUBECONFIG`, or `~/.kube/config`.
    pub async fn try_default() -> ProviderResult<Self> {
        let client = Client::try_default()
            .await
            .context(Failure::Permanent, "Unable to create the Kubernetes client")?;
        Ok(Self::new(client))
    }

    /// Connect using the kubeconfig file at `path`.
    pub async fn from_kubeconfig<P: AsRef<Path>>(path: P) -> ProviderResult<Self> {
        let path = path.as_ref();
        let kubeconfig = Kubeconfig::read_from(path).context(
            Failure::Permanent,
            format!("Unable to read kubeconfig '{}'", path.display()),
        )?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context(Failure::Permanent, "Unable to load the kubeconfig")?;
        let client = Client::try_from(config)
            .context(Failure::Permanent, "Unable to create the Kubernetes client")?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeCluster {
    async fn list_pods(&self, namespace: &str) -> ProviderResult<Vec<PodInfo>> {
        let pods = self
            .pods(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| kube_error(e, format!("Unable to list pods in '{}'", namespace)))?;
        trace!("Found {} pods in '{}'", pods.items.len(), namespace);
        Ok(pods.items.into_iter().map(pod_info).collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> ProviderResult<()> {
        debug!("Deleting pod '{}' in '{}'", name, namespace);
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| {
                kube_error(
                    e,
                    format!("Unable to delete pod '{}' in '{}'", name, namespace),
                )
            })?;
        Ok(())
    }

    async fn list_workloads(&self, namespace: &str) -> ProviderResult<Vec<WorkloadInfo>> {
        let deployments = self
            .deployments(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| {
                kube_error(e, format!("Unable to list deployments in '{}'", namespace))
            })?;
        trace!(
            "Found {} deployments in '{}'",
            deployments.items.len(),
            namespace
        );
        Ok(deployments.items.into_iter().map(workload_info).collect())
    }
}

/// Throttling, server errors and connection problems are worth retrying; anything else, like a
/// 403 or a 404, is not.
pub(crate) fn failure_of(error: &kube::Error) -> Failure {
    match error {
        kube::Error::Api(response) if response.code == 429 || response.code >= 500 => {
            Failure::Transient
        }
        kube::Error::HyperError(_) | kube::Error::Service(_) => Failure::Transient,
        _ => Failure::Permanent,
    }
}

fn kube_error(error: kube::Error, context: String) -> ProviderError {
    ProviderError::new_with_source_and_context(failure_of(&error), context, error)
}

/// The name, labels and readiness of a pod. A pod is ready when its `Ready` condition is `True`.
pub(crate) fn pod_info(pod: Pod) -> PodInfo {
    let ready = pod
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|condition| condition.type_ == "Ready" && condition.status == "True")
        })
        .unwrap_or(false);
    let mut info = PodInfo::new(pod.metadata.name.unwrap_or_default()).with_ready(ready);
    for (key, value) in pod.metadata.labels.unwrap_or_default() {
        info = info.with_label(key, value);
    }
    info
}

/// Desired and available replicas of a deployment. Kubernetes defaults an unset replica count
/// to 1.
pub(crate) fn workload_info(deployment: Deployment) -> WorkloadInfo {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let available = deployment
        .status
        .as_ref()
        .and_then(|status| status.available_replicas)
        .unwrap_or(0);
    let mut info = WorkloadInfo::new(
        deployment.metadata.name.unwrap_or_default(),
        u32::try_from(desired).unwrap_or(0),
        u32::try_from(available).unwrap_or(0),
    );
    for (key, value) in deployment.metadata.labels.unwrap_or_default() {
        info = info.with_label(key, value);
    }
    info
}
