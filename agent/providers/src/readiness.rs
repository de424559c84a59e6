/*!

Readiness checks and restarts for cluster-backed resources, written against the [`ClusterApi`] of
the [`Context`] so that they work with any cluster implementation.

!*/

use log::{debug, info};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use testbed_lifecycle::constants::{LABEL_RUN_ID, LABEL_SERVICE_KIND};
use testbed_lifecycle::provider::{Failure, IntoProviderError, ProviderError, ProviderResult};
use testbed_lifecycle::wait::wait_until;
use testbed_lifecycle::{Context, PodInfo, PodSelector, ServiceKind};

/// The labels to put on the pods of `kind` deployed by this run, so that [`run_selector`] finds
/// them and nothing else.
pub fn run_labels(ctx: &Context, kind: &ServiceKind) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_SERVICE_KIND.to_string(), kind.to_string());
    labels.insert(LABEL_RUN_ID.to_string(), ctx.run_id().to_string());
    labels
}

/// Selects the pods that carry the [`run_labels`] of `kind`.
pub fn run_selector(ctx: &Context, kind: &ServiceKind) -> PodSelector {
    let kind = kind.to_string();
    let run_id = ctx.run_id().to_string();
    Arc::new(move |pod: &PodInfo| {
        pod.has_label(LABEL_SERVICE_KIND, &kind) && pod.has_label(LABEL_RUN_ID, &run_id)
    })
}

async fn selected_pods(
    ctx: &Context,
    namespace: &str,
    selector: &PodSelector,
) -> ProviderResult<Vec<PodInfo>> {
    let pods = ctx.cluster()?.list_pods(namespace).await?;
    Ok(pods.into_iter().filter(|pod| selector(pod)).collect())
}

/// `true` if at least one pod is selected and every selected pod is ready.
pub async fn pods_ready(
    ctx: &Context,
    namespace: &str,
    selector: &PodSelector,
) -> ProviderResult<bool> {
    let pods = selected_pods(ctx, namespace, selector).await?;
    let ready = pods.iter().filter(|pod| pod.ready).count();
    debug!("{} of {} pods ready in '{}'", ready, pods.len(), namespace);
    Ok(!pods.is_empty() && ready == pods.len())
}

/// `true` if `namespace` has at least one replicated workload and every one of them has all of
/// its desired replicas available.
pub async fn replicas_available(ctx: &Context, namespace: &str) -> ProviderResult<bool> {
    let workloads = ctx.cluster()?.list_workloads(namespace).await?;
    let pending: Vec<&str> = workloads
        .iter()
        .filter(|workload| !workload.is_available())
        .map(|workload| workload.name.as_str())
        .collect();
    if !pending.is_empty() {
        debug!("Waiting for replicas of {:?} in '{}'", pending, namespace);
    }
    Ok(!workloads.is_empty() && pending.is_empty())
}

/// `true` if exactly one pod is selected and it is ready. More than one selected pod is a
/// permanent error since the selector is meant to identify a single pod.
pub async fn single_pod_ready(
    ctx: &Context,
    namespace: &str,
    selector: &PodSelector,
) -> ProviderResult<bool> {
    let pods = selected_pods(ctx, namespace, selector).await?;
    match pods.as_slice() {
        [] => Ok(false),
        [pod] => Ok(pod.ready),
        _ => Err(ProviderError::new_with_context(
            Failure::Permanent,
            format!(
                "Expected one pod in '{}' but the selector matches {}",
                namespace,
                pods.len()
            ),
        )),
    }
}

/// Delete every selected pod and wait until replacements are up: none of the deleted pods is
/// listed any more and every selected pod is ready. Listing and deleting are retried on transient
/// errors.
pub async fn restart_pods(
    ctx: &Context,
    namespace: &str,
    selector: &PodSelector,
) -> ProviderResult<()> {
    let cluster = ctx.cluster()?;
    let retry = ctx.retry_policy();
    let pods = retry
        .run(|| selected_pods(ctx, namespace, selector))
        .await?;
    let deleted: HashSet<String> = pods.into_iter().map(|pod| pod.name).collect();
    info!("Restarting {} pods in '{}'", deleted.len(), namespace);
    for name in &deleted {
        retry.run(|| cluster.delete_pod(namespace, name)).await?;
    }

    let spec = ctx.poll(format!("Waiting for restarted pods in '{}'", namespace));
    let deleted = &deleted;
    wait_until(&spec, move || async move {
        let pods = selected_pods(ctx, namespace, selector).await?;
        Ok(!pods.is_empty()
            && pods
                .iter()
                .all(|pod| pod.ready && !deleted.contains(&pod.name)))
    })
    .await
    .context(
        Failure::Permanent,
        format!("Pods in '{}' did not come back after a restart", namespace),
    )
}
