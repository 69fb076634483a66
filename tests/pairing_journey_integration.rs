//! Integration tests from a caller's perspective.
//!
//! These tests drive the HTTP router end to end against the loopback
//! transport and a temporary credential store: code issuance, busy
//! rejection, failure classification, deadlines, and background linking.
//!
//! Run: `cargo test --test pairing_journey_integration`

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use pairgate::config::{PairingConfig, SessionTimings};
use pairgate::http::router;
use pairgate::pairing::{FsCredentialStore, LoopbackConnector, LoopbackScript, PairingService};

fn quick_config(dir: &TempDir) -> PairingConfig {
    PairingConfig {
        session_dir: dir.path().to_path_buf(),
        timings: SessionTimings {
            connect_settle: Duration::ZERO,
            stabilization: Duration::ZERO,
            linger: Duration::ZERO,
            cleanup_grace: Duration::ZERO,
            ..SessionTimings::default()
        },
        ..PairingConfig::default()
    }
}

fn service_with(config: &PairingConfig, script: LoopbackScript) -> (Arc<PairingService>, Arc<LoopbackConnector>) {
    let connector = Arc::new(LoopbackConnector::new(script));
    let store = Arc::new(FsCredentialStore::new(config.session_dir.clone()));
    let service = Arc::new(PairingService::new(config, connector.clone(), store));
    (service, connector)
}

async fn get_code(service: &Arc<PairingService>, query: &str) -> (StatusCode, Option<String>, serde_json::Value) {
    let uri = if query.is_empty() {
        "/code".to_string()
    } else {
        format!("/code?{}", query)
    };
    let response = router(Arc::clone(service))
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap();
    (status, retry_after, body)
}

async fn wait_until_idle(service: &PairingService) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while service.gate().is_busy() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("gate should clear once the session ends");
}

// ============================================================================
// 1. Code Issuance & Admission Journey
// ============================================================================
mod code_issuance {
    use super::*;

    #[tokio::test]
    async fn test_first_request_gets_code_and_second_is_busy() {
        let dir = TempDir::new().unwrap();
        let config = quick_config(&dir);
        let (service, connector) = service_with(
            &config,
            LoopbackScript {
                code: Some("ABCD-1234".to_string()),
                ..LoopbackScript::default()
            },
        );

        let (status, _, body) = get_code(&service, "number=263714757857").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], "ABCD-1234");
        assert_eq!(body["version"], serde_json::json!([2, 3000, 1015901307]));

        let (status, retry_after, body) = get_code(&service, "number=15550001234").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "Busy");
        assert_eq!(body["retry_after_secs"], 30);
        assert_eq!(retry_after.as_deref(), Some("30"));

        assert_eq!(connector.open_count(), 1, "busy request must not open a transport");
        let control = connector.control().unwrap();
        assert_eq!(control.requested_targets(), vec!["+263714757857".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected_before_admission() {
        let dir = TempDir::new().unwrap();
        let config = quick_config(&dir);
        let (service, connector) = service_with(&config, LoopbackScript::default());

        for query in ["", "number=", "number=12345", "number=12ab567890", "number=1234567890123456"] {
            let (status, _, body) = get_code(&service, query).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "query {:?}", query);
            assert_eq!(body["error"], "Invalid or missing number parameter");
        }
        assert_eq!(connector.open_count(), 0);
        assert!(!service.gate().is_busy());
    }

    #[tokio::test]
    async fn test_already_registered_session_is_reported_and_released() {
        let dir = TempDir::new().unwrap();
        let config = quick_config(&dir);
        let (service, connector) = service_with(
            &config,
            LoopbackScript {
                registered_identity: Some("263714757857:1@s.whatsapp.net".to_string()),
                ..LoopbackScript::default()
            },
        );

        let (status, _, body) = get_code(&service, "number=263714757857").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], "Session already authenticated");
        assert!(body.get("code").is_none());
        assert!(!service.gate().is_busy());
        assert_eq!(connector.control().unwrap().close_count(), 1);
    }
}

// ============================================================================
// 2. Failure Classification Journey
// ============================================================================
mod failures {
    use pairgate::error::TransportError;

    use super::*;

    #[tokio::test]
    async fn test_rate_limited_open_frees_the_gate() {
        let dir = TempDir::new().unwrap();
        let config = quick_config(&dir);
        let (service, _) = service_with(
            &config,
            LoopbackScript {
                open_error: Some(TransportError::with_status("rate-overlimit", 429)),
                ..LoopbackScript::default()
            },
        );

        let (status, _, body) = get_code(&service, "number=263714757857").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["kind"], "RateLimited");
        assert!(!service.gate().is_busy());

        // A fresh attempt is admitted again.
        let (status, _, body) = get_code(&service, "number=263714757857").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["kind"], "RateLimited");
    }

    #[tokio::test]
    async fn test_code_request_failure_classified_by_text() {
        let dir = TempDir::new().unwrap();
        let config = quick_config(&dir);
        let (service, connector) = service_with(
            &config,
            LoopbackScript {
                code_error: Some(TransportError::new("number not registered")),
                ..LoopbackScript::default()
            },
        );

        let (status, _, body) = get_code(&service, "number=263714757857").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["kind"], "InvalidTarget");
        assert_eq!(body["detail"], "number not registered");
        assert!(!service.gate().is_busy());
        assert_eq!(connector.control().unwrap().close_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_connect_hits_deadline() {
        let dir = TempDir::new().unwrap();
        let mut config = quick_config(&dir);
        config.timings.deadline = Duration::from_millis(50);
        config.timings.connect_settle = Duration::from_millis(500);
        let (service, _) = service_with(&config, LoopbackScript::default());

        let (status, _, body) = get_code(&service, "number=263714757857").await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"], "Request timeout");
        assert!(!service.gate().is_busy());
    }
}

// ============================================================================
// 3. Background Linking Journey
// ============================================================================
mod linking {
    use super::*;

    #[tokio::test]
    async fn test_link_delivers_artifact_and_notice_then_wipes() {
        let dir = TempDir::new().unwrap();
        let config = quick_config(&dir);
        let (service, connector) = service_with(&config, LoopbackScript::default());

        let (status, _, body) = get_code(&service, "number=263714757857").await;
        assert_eq!(status, StatusCode::OK);
        let code = body["code"].as_str().unwrap();
        assert_eq!(code.len(), 9);
        assert_eq!(&code[4..5], "-");

        let control = connector.control().unwrap();
        assert!(control.link("263714757857:1@s.whatsapp.net").await);
        wait_until_idle(&service).await;

        let sent = control.sent_messages();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(to, _)| to == "263714757857:1@s.whatsapp.net"));
        assert!(sent[0].1.contains("\"registered\""));
        assert!(sent[1].1.contains("Number: +263714757857"));
        assert_eq!(control.close_count(), 1);

        // The gate clears before the wipe, so wait for the namespace to go.
        let staged = dir.path().join(&config.session_namespace);
        tokio::time::timeout(Duration::from_secs(5), async {
            while staged.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("staged credentials are wiped on release");

        // The service accepts the next caller.
        let (status, _, _) = get_code(&service, "number=15550001234").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_remote_logout_ends_session() {
        let dir = TempDir::new().unwrap();
        let config = quick_config(&dir);
        let (service, connector) = service_with(&config, LoopbackScript::default());

        let (status, _, _) = get_code(&service, "number=263714757857").await;
        assert_eq!(status, StatusCode::OK);

        let control = connector.control().unwrap();
        assert!(
            control
                .close_with(pairgate::error::TransportError::with_status("logged out", 401))
                .await
        );
        wait_until_idle(&service).await;
        assert!(control.sent_messages().is_empty());
        assert_eq!(control.close_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_in_flight_session() {
        let dir = TempDir::new().unwrap();
        let config = quick_config(&dir);
        let (service, connector) = service_with(&config, LoopbackScript::default());

        let (status, _, _) = get_code(&service, "number=263714757857").await;
        assert_eq!(status, StatusCode::OK);
        assert!(service.gate().is_busy());

        let old = connector.control().unwrap();
        assert!(service.shutdown().await);
        assert!(!service.gate().is_busy());
        assert_eq!(old.close_count(), 1);

        // A new caller is admitted; the released session stays inert.
        let (status, _, _) = get_code(&service, "number=15550001234").await;
        assert_eq!(status, StatusCode::OK);
        assert!(!old.link("263714757857:1@s.whatsapp.net").await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(old.sent_messages().is_empty());
        assert!(
            !dir.path()
                .join(&config.session_namespace)
                .join("creds.json")
                .exists()
        );
    }
}
