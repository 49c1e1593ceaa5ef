#![allow(dead_code)]

use fcm_delivery::{FcmConfig, ServiceCredential};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_KEY: &str = include_str!("../fixtures/service_account_key.pem");
pub const ROTATED_KEY: &str = include_str!("../fixtures/rotated_service_account_key.pem");
pub const PROJECT_ID: &str = "test-project";
pub const CLIENT_EMAIL: &str = "sender@test-project.iam.gserviceaccount.com";
pub const SEND_PATH: &str = "/projects/test-project/messages:send";

/// Route library logs to the test harness, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config_for(server: &MockServer) -> FcmConfig {
    FcmConfig {
        project_id: PROJECT_ID.to_string(),
        client_email: CLIENT_EMAIL.to_string(),
        private_key: TEST_KEY.to_string(),
        base_url: server.uri(),
        oauth_url: format!("{}/token", server.uri()),
        auth_retry_delay_ms: 10,
        ..Default::default()
    }
}

pub fn credential() -> ServiceCredential {
    ServiceCredential::new(PROJECT_ID, CLIENT_EMAIL, TEST_KEY).expect("fixture credential")
}

/// Token endpoint handing out a fresh bearer token on every exchange
pub async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.test-access-token",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .mount(server)
        .await;
}

pub async fn mount_send_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"name": "projects/test-project/messages/1"})),
        )
        .with_priority(10)
        .mount(server)
        .await;
}

pub fn fcm_error(status: u16, rpc_status: &str, code: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({
        "error": {
            "code": status,
            "message": format!("{} error", code),
            "status": rpc_status,
            "details": [{
                "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
                "errorCode": code
            }]
        }
    }))
}

pub fn device_token(seed: &str) -> String {
    let mut token = seed.to_string();
    while token.len() < 152 {
        token.push('x');
    }
    token
}
