/*!

Reference collaborators for `testbed-lifecycle`: a locally started process, an ordered composite
of units, a Kubernetes [`ClusterApi`](testbed_lifecycle::ClusterApi), and pod readiness helpers
for resources that run in a cluster.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

mod cluster;
mod composite;
mod process;
pub mod readiness;

pub use cluster::KubeCluster;
pub use composite::Composite;
pub use process::ProcessUnit;
