// Environment variables
pub const ENV_PREFIX: &str = "TESTBED_";
pub const ENV_CREDENTIALS: &str = "TESTBED_CREDENTIALS";

// Label keys put on what the testbed deploys into a cluster
pub const LABEL_SERVICE_KIND: &str = "testbed.io/service-kind";
pub const LABEL_RUN_ID: &str = "testbed.io/run-id";
