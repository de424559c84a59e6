/*!

The `suite` module provides [`Suite`], a small harness that plays the role of a test context: it
declares the service kinds it requires, acquires them before its body runs, and gives them back
afterwards.

!*/

use crate::error::Error;
use crate::service::Binding;
use crate::ServiceRegistry;
use log::{error, info, warn};
use std::fmt::{Debug, Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use testbed_model::ServiceKind;

/// A test context that requires a set of service kinds.
///
/// # Example
///
/// ```no_run
/// # use testbed_lifecycle::{Suite, ServiceRegistry};
/// # async fn run(registry: &ServiceRegistry) -> Result<(), Box<dyn std::error::Error>> {
/// let suite = Suite::new("ingest").requires("broker".parse()?);
/// suite.plan(registry);
/// suite
///     .run(registry, || async { Ok::<_, std::io::Error>(()) })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Suite {
    name: String,
    requires: Vec<ServiceKind>,
}

impl Suite {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            requires: Vec::new(),
        }
    }

    pub fn requires(mut self, kind: ServiceKind) -> Self {
        self.requires.push(kind);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required_kinds(&self) -> &[ServiceKind] {
        &self.requires
    }

    /// Declare this suite's needs to the registry. Plan every suite of a run before running
    /// any of them.
    pub fn plan(&self, registry: &ServiceRegistry) {
        for kind in &self.requires {
            registry.mark_needed(kind);
        }
    }

    /// Acquire the required services in order, run `body`, then give the services back in
    /// reverse order.
    ///
    /// - If acquiring a service fails, `body` is skipped and the services already acquired are
    ///   still given back.
    /// - A failure of `body` or of setup takes precedence over teardown failures, which are then
    ///   only logged.
    pub async fn run<T, E, F, Fut>(
        &self,
        registry: &ServiceRegistry,
        body: F,
    ) -> Result<T, SuiteError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        info!("Running suite '{}'", self.name);
        let mut acquired: Vec<Arc<dyn Binding>> = Vec::new();
        let mut setup_error = None;
        for kind in &self.requires {
            match registry.get(kind).await {
                Ok(binding) => acquired.push(binding),
                Err(e) => {
                    error!("Suite '{}' could not acquire '{}': {}", self.name, kind, e);
                    setup_error = Some(e);
                    break;
                }
            }
        }

        let outcome = match setup_error {
            Some(e) => {
                // Kinds never acquired still count as done for this suite.
                for kind in self.requires.iter().skip(acquired.len()) {
                    registry.release(kind);
                }
                Err(SuiteError::Setup(e))
            }
            None => body().await.map_err(SuiteError::Test),
        };

        let mut teardown_errors = Vec::new();
        for binding in acquired.iter().rev() {
            if let Err(e) = binding.after_all().await {
                error!(
                    "Suite '{}' could not tear down '{}': {}",
                    self.name,
                    binding.kind(),
                    e
                );
                teardown_errors.push(e);
            }
        }

        match outcome {
            Err(e) => {
                for suppressed in &teardown_errors {
                    warn!(
                        "Suite '{}' failed ({}), also suppressing: {}",
                        self.name, e, suppressed
                    );
                }
                Err(e)
            }
            Ok(_) if !teardown_errors.is_empty() => Err(SuiteError::Teardown(teardown_errors)),
            Ok(value) => {
                info!("Suite '{}' passed", self.name);
                Ok(value)
            }
        }
    }
}

/// The outcome of a failed [`Suite::run`].
pub enum SuiteError<E> {
    /// A required service could not be acquired; the body did not run.
    Setup(Error),
    /// The body failed.
    Test(E),
    /// The body passed but giving back the services failed.
    Teardown(Vec<Error>),
}

impl<E> SuiteError<E> {
    pub fn is_setup(&self) -> bool {
        matches!(self, SuiteError::Setup(_))
    }

    pub fn is_test(&self) -> bool {
        matches!(self, SuiteError::Test(_))
    }

    pub fn is_teardown(&self) -> bool {
        matches!(self, SuiteError::Teardown(_))
    }
}

impl<E: Display> Display for SuiteError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SuiteError::Setup(e) => write!(f, "Setup failed: {}", e),
            SuiteError::Test(e) => write!(f, "Test failed: {}", e),
            SuiteError::Teardown(errors) => {
                write!(f, "Teardown failed: ")?;
                for (i, e) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl<E: Debug> Debug for SuiteError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SuiteError::Setup(e) => f.debug_tuple("Setup").field(e).finish(),
            SuiteError::Test(e) => f.debug_tuple("Test").field(e).finish(),
            SuiteError::Teardown(errors) => f.debug_tuple("Teardown").field(errors).finish(),
        }
    }
}

impl<E> std::error::Error for SuiteError<E>
where
    E: Debug + Display,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SuiteError::Setup(e) => Some(e),
            SuiteError::Test(_) => None,
            SuiteError::Teardown(errors) => errors
                .first()
                .map(|e| e as &(dyn std::error::Error + 'static)),
        }
    }
}
