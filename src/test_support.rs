//! Shared fixtures for unit tests that talk to in-process HTTP stubs.

use axum::Router;
use tokio::runtime::Runtime;

use crate::config::{DocumentAiCredentials, ServiceAccountKey};

/// Throwaway 2048-bit RSA key in PKCS#8 form, used only to sign test tokens.
const TEST_KEY_PEM: &str = include_str!("pipeline/extraction/testdata/test_rsa_key.pem");

/// Serve `router` on an ephemeral localhost port from a background runtime.
///
/// The blocking reqwest clients under test must be driven from the test
/// thread, outside the runtime, so the runtime is returned to the caller
/// and kept alive for the duration of the test.
pub(crate) fn spawn_stub(router: Router) -> (Runtime, String) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let listener = rt
        .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
        .unwrap();
    let addr = listener.local_addr().unwrap();
    rt.spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (rt, format!("http://{addr}"))
}

/// Service account credentials backed by the test key, minting at `token_uri`.
pub(crate) fn service_account(token_uri: &str) -> DocumentAiCredentials {
    DocumentAiCredentials::ServiceAccount(ServiceAccountKey {
        client_email: "kyc-ocr@kyc-test.iam.gserviceaccount.com".into(),
        private_key: TEST_KEY_PEM.into(),
        private_key_id: Some("key-1".into()),
        token_uri: Some(token_uri.into()),
        project_id: Some("kyc-test".into()),
    })
}
