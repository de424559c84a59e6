/*!

The `testbed-lifecycle` library manages the external dependencies of integration tests: message
brokers, data stores, cluster workloads. You describe how a dependency is deployed by implementing
the [`provider`] traits, and how a client connects to it with a
[`Connector`](provider::Connector), then register the resulting [`Service`] with a
[`ServiceRegistry`]. Test contexts acquire services before they run and give them back
afterwards; the registry deploys each service once, shares it between concurrent contexts, and
keeps reusable services deployed for as long as a later context needs them.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

mod context;
mod deployment;
pub mod error;
pub mod provider;
mod registry;
pub mod retry;
mod service;
mod suite;
pub mod wait;

pub use context::{ClusterApi, Context};
pub use deployment::Deployment;
pub use error::{Error, Result};
pub use registry::{Demand, Dependency, Registered, ServiceRegistry};
pub use service::{Binding, Service};
pub use suite::{Suite, SuiteError};
pub use testbed_model::constants;
pub use testbed_model::{
    label_selector, Account, AccountsReader, DeploymentState, NamedAccounts, NoAccount, PodInfo,
    PodSelector, ServiceKind, Settings, WorkloadInfo,
};
