mod mock;

use mock::init_logger;
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use testbed_lifecycle::provider::{Failure, ProviderError, ProviderResult};
use testbed_lifecycle::retry::{RetryError, RetryPolicy};
use testbed_lifecycle::wait::{wait_for, wait_until, PollSpec};

fn spec() -> PollSpec {
    PollSpec::new("Waiting for the test condition")
        .interval(Duration::from_millis(100))
        .timeout(Duration::from_secs(5))
}

/// Returns a check that fails `misses` times before it holds, and the counter of its calls.
fn succeeds_after(
    misses: usize,
) -> (
    Arc<AtomicUsize>,
    impl FnMut() -> Ready<ProviderResult<bool>>,
) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let check = move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        ready(Ok(n >= misses))
    };
    (calls, check)
}

#[tokio::test(start_paused = true)]
async fn succeeds_immediately() {
    init_logger();
    let (calls, check) = succeeds_after(0);
    wait_until(&spec(), check).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn succeeds_after_several_checks() {
    init_logger();
    let (calls, check) = succeeds_after(4);
    wait_until(&spec(), check).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[tokio::test(start_paused = true)]
async fn failure_check_ends_the_wait() {
    init_logger();
    let (_, success) = succeeds_after(usize::MAX);
    let error = wait_for(&spec(), success, || async { Ok(true) })
        .await
        .unwrap_err();
    assert!(error.is_poll_failure(), "{}", error);
    assert!(!error.is_timeout());
}

#[tokio::test(start_paused = true)]
async fn success_is_checked_before_failure() {
    init_logger();
    wait_for(&spec(), || async { Ok(true) }, || async { Ok(true) })
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn times_out() {
    init_logger();
    let spec = PollSpec::new("Waiting for something that never happens")
        .interval(Duration::from_secs(1))
        .timeout(Duration::from_secs(10));
    let (calls, check) = succeeds_after(usize::MAX);
    let start = tokio::time::Instant::now();
    let error = wait_until(&spec, check).await.unwrap_err();
    assert!(error.is_timeout(), "{}", error);
    assert!(error
        .to_string()
        .contains("Waiting for something that never happens"));
    // One check at the start of every interval plus one at the deadline.
    assert_eq!(calls.load(Ordering::SeqCst), 11);
    assert!(start.elapsed() >= Duration::from_secs(10));
    assert!(start.elapsed() < Duration::from_secs(11));
}

#[tokio::test(start_paused = true)]
async fn transient_errors_mean_not_yet() {
    init_logger();
    let calls = AtomicUsize::new(0);
    wait_until(&spec(), || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 2 {
                Err(ProviderError::transient("log file does not exist yet"))
            } else {
                Ok(true)
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn permanent_errors_end_the_wait() {
    init_logger();
    let error = wait_until(&spec(), || async {
        ProviderResult::<bool>::Err(ProviderError::permanent("bad credentials"))
    })
    .await
    .unwrap_err();
    assert!(error.is_poll_failure());
    assert!(error.to_string().contains("bad credentials"), "{}", error);
}

#[tokio::test(start_paused = true)]
async fn retry_recovers_from_transient_failures() {
    init_logger();
    let attempts = AtomicUsize::new(0);
    let policy = RetryPolicy::transient()
        .max_retries(3)
        .delay(Duration::from_secs(5));
    let value = policy
        .run(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::transient("request timed out"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
    assert_eq!(value, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_stops_on_non_retryable_failures() {
    init_logger();
    let attempts = AtomicUsize::new(0);
    let error = RetryPolicy::transient()
        .run(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { ProviderResult::<()>::Err(ProviderError::permanent("forbidden")) }
        })
        .await
        .unwrap_err();
    assert!(matches!(error, RetryError::Aborted { retries: 0, .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_gives_up_after_max_retries() {
    init_logger();
    let attempts = AtomicUsize::new(0);
    let error = RetryPolicy::transient()
        .max_retries(2)
        .delay(Duration::from_millis(10))
        .run(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { ProviderResult::<()>::Err(ProviderError::transient("throttled")) }
        })
        .await
        .unwrap_err();
    assert!(matches!(error, RetryError::Exhausted { retries: 2, .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let error = ProviderError::from(error);
    assert_eq!(error.failure(), Failure::Permanent);
    assert!(error.to_string().contains("Giving up after 2 retries"));
    assert!(error.to_string().contains("throttled"));
}

#[tokio::test(start_paused = true)]
async fn retry_with_custom_predicate() {
    init_logger();
    let attempts = AtomicUsize::new(0);
    let policy = RetryPolicy::<std::io::Error>::new()
        .handle(|e| e.kind() == std::io::ErrorKind::TimedOut)
        .max_retries(5)
        .delay(Duration::from_millis(1));
    let result = policy
        .run(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
    assert_eq!(result.unwrap(), "done");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}
