mod mock;

use mock::{fast_context, init_logger, kind, Journal, MockConnector, MockResource};
use std::sync::atomic::{AtomicBool, Ordering};
use testbed_lifecycle::provider::Capabilities;
use testbed_lifecycle::{Context, NoAccount, Service, ServiceRegistry, Suite, SuiteError};

fn registry_with(journal: &Journal, broker: MockResource, store: MockResource) -> ServiceRegistry {
    let registry = ServiceRegistry::new(fast_context());
    let broker_journal = journal.clone();
    registry
        .register(kind("broker"), move |ctx: &Context| {
            Ok(Service::new(
                kind("broker"),
                NoAccount::default(),
                Capabilities::reusable(broker.clone()),
                MockConnector::new("broker", &broker_journal),
                ctx.clone(),
            ))
        })
        .unwrap();
    let store_journal = journal.clone();
    registry
        .register(kind("dataset-store"), move |ctx: &Context| {
            Ok(Service::new(
                kind("dataset-store"),
                NoAccount::default(),
                Capabilities::extended(store.clone()),
                MockConnector::new("dataset-store", &store_journal),
                ctx.clone(),
            ))
        })
        .unwrap();
    registry
}

fn ingest() -> Suite {
    Suite::new("ingest")
        .requires(kind("broker"))
        .requires(kind("dataset-store"))
}

#[tokio::test]
async fn suites_share_a_reusable_broker() {
    init_logger();
    let journal = Journal::default();
    let registry = registry_with(
        &journal,
        MockResource::new("broker", &journal),
        MockResource::new("dataset-store", &journal),
    );
    let ingest = ingest();
    let replay = Suite::new("replay").requires(kind("broker"));
    ingest.plan(&registry);
    replay.plan(&registry);

    let value = ingest
        .run(&registry, || async { Ok::<_, String>(42) })
        .await
        .unwrap();
    assert_eq!(value, 42);
    replay
        .run(&registry, || async { Ok::<_, String>(()) })
        .await
        .unwrap();
    registry.shutdown().await.unwrap();

    assert_eq!(
        journal.events(),
        vec![
            "deploy:broker",
            "open:broker",
            "deploy:dataset-store",
            "open:dataset-store",
            // Released in reverse order of acquisition.
            "close:dataset-store",
            "undeploy:dataset-store",
            "cleanup:broker",
            "close:broker",
            "open:broker",
            "close:broker",
            "undeploy:broker",
        ]
    );
}

#[tokio::test]
async fn setup_failure_skips_the_body_and_releases_what_was_acquired() {
    init_logger();
    let journal = Journal::default();
    let registry = registry_with(
        &journal,
        MockResource::new("broker", &journal),
        MockResource::new("dataset-store", &journal).failing_deploy(),
    );
    let suite = ingest();
    suite.plan(&registry);

    let ran = AtomicBool::new(false);
    let error = suite
        .run(&registry, || {
            ran.store(true, Ordering::SeqCst);
            async { Ok::<_, String>(()) }
        })
        .await
        .unwrap_err();

    assert!(error.is_setup(), "{}", error);
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(journal.count("close:broker"), 1);
    assert_eq!(journal.count("undeploy:broker"), 1);
    assert!(!registry.is_still_needed(&kind("broker")));
    assert!(!registry.is_still_needed(&kind("dataset-store")));
}

#[tokio::test]
async fn test_failure_wins_over_teardown_failure() {
    init_logger();
    let journal = Journal::default();
    let registry = registry_with(
        &journal,
        MockResource::new("broker", &journal).failing_undeploy(),
        MockResource::new("dataset-store", &journal),
    );
    let suite = Suite::new("flaky").requires(kind("broker"));
    suite.plan(&registry);

    let error = suite
        .run(&registry, || async {
            Err::<(), _>("expected 3 messages, got 2".to_string())
        })
        .await
        .unwrap_err();

    match error {
        SuiteError::Test(message) => assert_eq!(message, "expected 3 messages, got 2"),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(journal.count("undeploy:broker"), 1);
}

#[tokio::test]
async fn teardown_failure_is_reported_when_the_body_passes() {
    init_logger();
    let journal = Journal::default();
    let registry = registry_with(
        &journal,
        MockResource::new("broker", &journal).failing_undeploy(),
        MockResource::new("dataset-store", &journal),
    );
    let suite = Suite::new("clean").requires(kind("broker"));
    suite.plan(&registry);

    let error = suite
        .run(&registry, || async { Ok::<_, String>(()) })
        .await
        .unwrap_err();

    assert!(error.is_teardown(), "{}", error);
    assert!(error.to_string().contains("refused to stop"), "{}", error);
}
