/*!

This library provides the plain data shared by the testbed crates: service kinds, deployment
states, pod snapshots, accounts and the settings of a test run.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub use account::{Account, AccountsReader, NamedAccounts, NoAccount};
pub use error::{Error, Result};
pub use kind::ServiceKind;
pub use pod::{label_selector, PodInfo, PodSelector, WorkloadInfo};
pub use settings::Settings;
pub use state::DeploymentState;

mod account;
pub mod constants;
mod error;
mod kind;
mod pod;
mod settings;
mod state;
