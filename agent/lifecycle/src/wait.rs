/*!

The `wait` module provides the polling primitive used to gate on readiness: evaluate a success
check, then a failure check, sleep, and repeat until one of them holds or the time budget is
spent. The wait occupies the calling task for its entire duration.

!*/

use crate::error::{self, Result};
use crate::provider::ProviderResult;
use log::{debug, trace};
use snafu::{ensure, ResultExt};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Describes one wait: how often to check, how long to keep checking, and a human readable
/// description such as `"Waiting until the broker is ready"` that errors will carry.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PollSpec {
    description: String,
    interval: Duration,
    timeout: Duration,
}

impl PollSpec {
    /// A spec with a 1 second interval and a 10 minute timeout. See also [`Context::poll`].
    pub fn new<S: Into<String>>(description: S) -> Self {
        Self {
            description: description.into(),
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(10 * 60),
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn interval_duration(&self) -> Duration {
        self.interval
    }

    pub fn timeout_duration(&self) -> Duration {
        self.timeout
    }
}

/// Wait until `success` returns `true`.
///
/// - `success` is evaluated first on every tick; if it holds the wait is over.
/// - Otherwise `failure` is evaluated; if it holds the wait fails with [`Error::PollFailure`].
/// - Otherwise the task sleeps for the spec's interval, never past the deadline, and the next tick
///   starts. Once the timeout has elapsed the wait fails with [`Error::Timeout`].
///
/// A check that returns a transient [`ProviderError`] is treated as not (yet) satisfied, which
/// tolerates things that do not exist yet, like a log file or a pod. A check that returns a
/// permanent error ends the wait with [`Error::PollCheck`].
pub async fn wait_for<S, SFut, F, FFut>(spec: &PollSpec, mut success: S, mut failure: F) -> Result<()>
where
    S: FnMut() -> SFut,
    SFut: Future<Output = ProviderResult<bool>>,
    F: FnMut() -> FFut,
    FFut: Future<Output = ProviderResult<bool>>,
{
    debug!("{}", spec.description);
    let start = Instant::now();
    let mut tick = 0u64;
    loop {
        tick += 1;
        if evaluate(spec, "success", success().await)? {
            debug!(
                "Done after {:?} ({} checks): {}",
                start.elapsed(),
                tick,
                spec.description
            );
            return Ok(());
        }
        ensure!(
            !evaluate(spec, "failure", failure().await)?,
            error::PollFailureSnafu {
                description: &spec.description
            }
        );
        let elapsed = start.elapsed();
        ensure!(
            elapsed < spec.timeout,
            error::TimeoutSnafu {
                description: &spec.description,
                timeout: spec.timeout,
            }
        );
        trace!("Check {} not satisfied: {}", tick, spec.description);
        sleep(spec.interval.min(spec.timeout - elapsed)).await;
    }
}

/// Wait until `success` returns `true`, with no failure signal to watch for.
pub async fn wait_until<S, SFut>(spec: &PollSpec, success: S) -> Result<()>
where
    S: FnMut() -> SFut,
    SFut: Future<Output = ProviderResult<bool>>,
{
    wait_for(spec, success, || async { Ok(false) }).await
}

fn evaluate(spec: &PollSpec, which: &str, outcome: ProviderResult<bool>) -> Result<bool> {
    match outcome {
        Ok(value) => Ok(value),
        Err(e) if e.is_transient() => {
            trace!(
                "Ignoring transient error from the {} check of '{}': {}",
                which,
                spec.description,
                e
            );
            Ok(false)
        }
        Err(e) => Err(e).context(error::PollCheckSnafu {
            description: &spec.description,
        }),
    }
}
