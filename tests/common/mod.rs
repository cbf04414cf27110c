//! Shared fixtures for the integration tests: a client wired to a mockito
//! server standing in for the Gust API.
#![allow(dead_code)]

use std::sync::Once;

use gust_client::Client;

pub const WORKSPACE: &str = "test-ws";

static INIT_LOGGING: Once = Once::new();

/// Route `log` output through env_logger so failing tests can be rerun with
/// `RUST_LOG=debug` for the SDK's request/poll logging.
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn test_client(server: &mockito::ServerGuard) -> Client {
    init_logging();
    Client::builder()
        .base_url(server.url())
        .token("test-token")
        .workspace(WORKSPACE)
        .build()
        .expect("client should build")
}

pub fn test_client_with_job_context(server: &mockito::ServerGuard) -> Client {
    init_logging();
    Client::builder()
        .base_url(server.url())
        .token("test-token")
        .workspace(WORKSPACE)
        .job_id("job-current")
        .root_flow_job_id("job-root")
        .script_path("u/alice/current_script")
        .build()
        .expect("client should build")
}
