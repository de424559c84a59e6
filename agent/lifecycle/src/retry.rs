/*!

The `retry` module provides a bounded retry wrapper for operations against an external control
plane that exhibit intermittent failures, such as API calls that time out under load.

!*/

use crate::provider::{Failure, ProviderError};
use log::{debug, warn};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Decides which failures are retried, how often, and how long to wait in between.
///
/// # Example
///
/// ```
/// # use testbed_lifecycle::retry::RetryPolicy;
/// # use std::time::Duration;
/// let policy = RetryPolicy::<std::io::Error>::new()
///     .handle(|e| e.kind() == std::io::ErrorKind::TimedOut)
///     .max_retries(3)
///     .delay(Duration::from_secs(5));
/// ```
pub struct RetryPolicy<E> {
    max_retries: u32,
    delay: Duration,
    retryable: Arc<dyn Fn(&E) -> bool + Send + Sync>,
}

impl<E: 'static> RetryPolicy<E> {
    /// A policy that retries nothing until [`RetryPolicy::handle`] says otherwise. Defaults to 3
    /// retries with a 5 second delay.
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(5),
            retryable: Arc::new(|_: &E| false),
        }
    }

    /// Retry failures for which `retryable` returns `true`.
    pub fn handle<F>(mut self, retryable: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(retryable);
        self
    }

    /// The number of additional attempts made after the first one fails.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn is_retryable(&self, error: &E) -> bool {
        (self.retryable)(error)
    }

    /// Run `operation`, repeating it after a retryable failure until it succeeds or the retries
    /// are used up. A non-retryable failure is returned immediately as [`RetryError::Aborted`];
    /// running out of retries returns the last failure as [`RetryError::Exhausted`].
    pub async fn run<T, Op, Fut>(&self, mut operation: Op) -> Result<T, RetryError<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!("Operation succeeded after {} retries", retries);
                    }
                    return Ok(value);
                }
                Err(source) if !self.is_retryable(&source) => {
                    return Err(RetryError::Aborted { retries, source });
                }
                Err(source) if retries >= self.max_retries => {
                    return Err(RetryError::Exhausted { retries, source });
                }
                Err(e) => {
                    retries += 1;
                    warn!(
                        "Operation failed, retrying in {:?} ({} of {}): {}",
                        self.delay, retries, self.max_retries, e
                    );
                    sleep(self.delay).await;
                }
            }
        }
    }
}

impl RetryPolicy<ProviderError> {
    /// The policy for collaborator calls: retry errors flagged [`Failure::Transient`].
    pub fn transient() -> Self {
        Self::new().handle(ProviderError::is_transient)
    }
}

impl<E: 'static> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            delay: self.delay,
            retryable: Arc::clone(&self.retryable),
        }
    }
}

impl<E> Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("delay", &self.delay)
            .finish()
    }
}

/// The error returned by [`RetryPolicy::run`]. Both variants keep the failure that ended the
/// attempts as their source.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation failed with an error the policy does not retry.
    Aborted { retries: u32, source: E },

    /// The operation kept failing with retryable errors until no retries were left.
    Exhausted { retries: u32, source: E },
}

impl<E> RetryError<E> {
    /// How many retries were made before giving up.
    pub fn retries(&self) -> u32 {
        match self {
            RetryError::Aborted { retries, .. } | RetryError::Exhausted { retries, .. } => *retries,
        }
    }

    pub fn inner(&self) -> &E {
        match self {
            RetryError::Aborted { source, .. } | RetryError::Exhausted { source, .. } => source,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Aborted { source, .. } | RetryError::Exhausted { source, .. } => source,
        }
    }
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Aborted { retries, source } => {
                write!(f, "Non-retryable error after {} retries: {}", retries, source)
            }
            RetryError::Exhausted { retries, source } => {
                write!(f, "Giving up after {} retries: {}", retries, source)
            }
        }
    }
}

impl<E> Error for RetryError<E>
where
    E: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner() as &(dyn Error + 'static))
    }
}

/// Lets a collaborator use `?` on a retried call. A non-retryable error passes through
/// unchanged; exhausted retries become a permanent error wrapping the last failure.
impl From<RetryError<ProviderError>> for ProviderError {
    fn from(e: RetryError<ProviderError>) -> Self {
        match e {
            RetryError::Aborted { source, .. } => source,
            RetryError::Exhausted { retries, source } => ProviderError::new_with_source_and_context(
                Failure::Permanent,
                format!("Giving up after {} retries", retries),
                source,
            ),
        }
    }
}
