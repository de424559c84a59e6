use std::fmt::{Display, Formatter};

/// When a collaborator returns an error, it states whether repeating the call may succeed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Failure {
    /// The call hit an intermittent condition of the infrastructure (a control plane timeout, a
    /// throttled request, a resource that does not exist yet). Retry policies and readiness
    /// checks may repeat the call.
    Transient,

    /// Repeating the call will not help.
    Permanent,
}

impl Failure {
    pub fn message(&self) -> &'static str {
        match self {
            Failure::Transient => "A transient error occurred",
            Failure::Permanent => "An error occurred",
        }
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self.message(), f)
    }
}

/// This is a trait that you can implement for your own state types to describe whether a failure
/// is worth retrying.
///
/// # Example
///
/// ```
/// use testbed_lifecycle::provider::{AsFailure, Failure};
/// struct Attempt {
///     throttled: bool,
/// }
/// impl AsFailure for Attempt {
///     fn as_failure(&self) -> Failure {
///         if self.throttled {
///             Failure::Transient
///         } else {
///             Failure::Permanent
///         }
///     }
/// }
/// ```
///
pub trait AsFailure {
    fn as_failure(&self) -> Failure;
}

impl AsFailure for Failure {
    fn as_failure(&self) -> Failure {
        *self
    }
}

impl AsFailure for &Failure {
    fn as_failure(&self) -> Failure {
        **self
    }
}

/// The error type returned by collaborators: [`Deployable`] implementations, [`Connector`]s and
/// [`ClusterApi`]s.
#[derive(Debug)]
pub struct ProviderError {
    failure: Failure,

    /// Any message to be included with the error. This will be included in the formatted display
    /// before `inner`.
    context: Option<String>,

    /// The error that caused this error.
    inner: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

/// The result type returned by collaborators.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    pub fn new_with_source_and_context<F, S, E>(failure: F, context: S, source: E) -> Self
    where
        F: AsFailure,
        S: Into<String>,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self {
            failure: failure.as_failure(),
            context: Some(context.into()),
            inner: Some(source.into()),
        }
    }

    pub fn new_with_source<F, E>(failure: F, source: E) -> Self
    where
        F: AsFailure,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self {
            failure: failure.as_failure(),
            context: None,
            inner: Some(source.into()),
        }
    }

    pub fn new_with_context<F, S>(failure: F, context: S) -> Self
    where
        F: AsFailure,
        S: Into<String>,
    {
        Self {
            failure: failure.as_failure(),
            context: Some(context.into()),
            inner: None,
        }
    }

    /// Shorthand for a [`Failure::Transient`] error with a message.
    pub fn transient<S: Into<String>>(context: S) -> Self {
        Self::new_with_context(Failure::Transient, context)
    }

    /// Shorthand for a [`Failure::Permanent`] error with a message.
    pub fn permanent<S: Into<String>>(context: S) -> Self {
        Self::new_with_context(Failure::Permanent, context)
    }

    pub fn failure(&self) -> Failure {
        self.failure
    }

    pub fn is_transient(&self) -> bool {
        self.failure == Failure::Transient
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn inner(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.inner.as_ref().map(|some| some.as_ref())
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.failure)?;
        if let Some(context) = self.context() {
            write!(f, ", {}", context)?;
        }
        if let Some(inner) = self.inner() {
            write!(f, ": {}", inner)?;
        }
        Ok(())
    }
}

// Make `ProviderError` function as a standard error.
impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// A trait that makes it possible to convert error types to `ProviderError` using a familiar
/// `context` function.
pub trait IntoProviderError<T> {
    /// Convert `self` into a `ProviderError`.
    fn context<F, S>(self, failure: F, message: S) -> ProviderResult<T>
    where
        S: Into<String>,
        F: AsFailure;
}

// Implement `IntoProviderError` for all standard `Error + Send + Sync + 'static` types.
impl<T, E> IntoProviderError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context<F, S>(self, failure: F, message: S) -> ProviderResult<T>
    where
        S: Into<String>,
        F: AsFailure,
    {
        self.map_err(|e| ProviderError::new_with_source_and_context(failure, message, e))
    }
}

// Implement `IntoProviderError` for options where `None` is converted into an error.
impl<T> IntoProviderError<T> for std::option::Option<T> {
    fn context<F, S>(self, failure: F, message: S) -> ProviderResult<T>
    where
        S: Into<String>,
        F: AsFailure,
    {
        self.ok_or_else(|| ProviderError::new_with_context(failure, message))
    }
}

#[test]
fn display_includes_context_and_inner() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
    let error: ProviderResult<()> = Err(io).context(Failure::Transient, "Unable to read log");
    let error = error.unwrap_err();
    assert!(error.is_transient());
    assert_eq!(
        error.to_string(),
        "A transient error occurred, Unable to read log: no such file"
    );
}

#[test]
fn option_context() {
    let value: Option<u8> = None;
    let error = value.context(Failure::Permanent, "missing").unwrap_err();
    assert_eq!(error.failure(), Failure::Permanent);
    assert_eq!(error.context(), Some("missing"));
}
