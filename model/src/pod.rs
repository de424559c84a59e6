use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A snapshot of one runtime unit (a pod) of a cluster-backed resource, as reported by a cluster
/// API.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// `true` when the pod reports a `Ready` condition with status `True`.
    #[serde(default)]
    pub ready: bool,
}

impl PodInfo {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_label<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    pub fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels.get(key).map(String::as_str) == Some(value)
    }
}

/// A snapshot of a replicated workload (a Kubernetes `Deployment`): how many replicas it asks for
/// and how many are available.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkloadInfo {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub desired: u32,
    #[serde(default)]
    pub available: u32,
}

impl WorkloadInfo {
    pub fn new<S: Into<String>>(name: S, desired: u32, available: u32) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            desired,
            available,
        }
    }

    pub fn with_label<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// `true` when every desired replica is available. A workload scaled to zero is available.
    pub fn is_available(&self) -> bool {
        self.desired == 0 || self.available == self.desired
    }
}

/// Selects the pods that make up a resource.
pub type PodSelector = Arc<dyn Fn(&PodInfo) -> bool + Send + Sync>;

/// A [`PodSelector`] matching pods that carry the label `key=value`.
pub fn label_selector<K, V>(key: K, value: V) -> PodSelector
where
    K: Into<String>,
    V: Into<String>,
{
    let key = key.into();
    let value = value.into();
    Arc::new(move |pod: &PodInfo| pod.has_label(&key, &value))
}

#[test]
fn workload_is_available_when_replicas_match() {
    assert!(WorkloadInfo::new("broker", 3, 3).is_available());
    assert!(!WorkloadInfo::new("broker", 3, 2).is_available());
    assert!(WorkloadInfo::new("idle", 0, 0).is_available());
    assert!(!WorkloadInfo::new("starting", 1, 0).is_available());
}

#[test]
fn label_selector_matches() {
    let selector = label_selector("app", "broker");
    assert!(selector(&PodInfo::new("a").with_label("app", "broker")));
    assert!(!selector(&PodInfo::new("b").with_label("app", "zookeeper")));
    assert!(!selector(&PodInfo::new("c")));
}
