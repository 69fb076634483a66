//! The pairing code endpoint.
//!
//! `GET /code?number=<8-15 digits>`:
//! - 200 `{code, version, message}` when a code was issued
//! - 200 `{error, detail, version}` when the session is already authenticated
//! - 400 invalid input, 503 busy (with `Retry-After`), 504 timeout
//! - 500 `{error, kind, detail, retryable, version}` on failure

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::config::ClientVersion;
use crate::error::PairingError;
use crate::pairing::{ALREADY_AUTHENTICATED, ErrorKind, Outcome, PairingService};

const CODE_ISSUED_MESSAGE: &str = "Check your phone for the device linking prompt";

#[derive(Debug, Deserialize)]
pub struct CodeQuery {
    pub number: Option<String>,
}

/// Response body for the code endpoint.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CodeResponse {
    Issued {
        code: String,
        version: ClientVersion,
        message: &'static str,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        kind: Option<ErrorKind>,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        retryable: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
        version: ClientVersion,
    },
}

impl CodeResponse {
    fn error(message: impl Into<String>, version: ClientVersion) -> Self {
        CodeResponse::Error {
            error: message.into(),
            kind: None,
            detail: None,
            retryable: None,
            retry_after_secs: None,
            version,
        }
    }
}

/// Map a synchronous outcome to an HTTP status and body.
pub fn outcome_response(outcome: Outcome, version: ClientVersion) -> (StatusCode, CodeResponse) {
    match outcome {
        Outcome::CodeIssued(code) => (
            StatusCode::OK,
            CodeResponse::Issued {
                code,
                version,
                message: CODE_ISSUED_MESSAGE,
            },
        ),
        // A link is only confirmed in the background; if one ever surfaces
        // here the session is, from the caller's view, already authenticated.
        Outcome::Rejected(_) | Outcome::LinkConfirmed(_) => (
            StatusCode::OK,
            CodeResponse::Error {
                error: "Session already authenticated".to_string(),
                kind: None,
                detail: Some(ALREADY_AUTHENTICATED.to_string()),
                retryable: None,
                retry_after_secs: None,
                version,
            },
        ),
        Outcome::Failed {
            kind,
            stage,
            detail,
        } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            CodeResponse::Error {
                error: kind.summary_at(stage).to_string(),
                kind: Some(kind),
                detail: Some(detail),
                retryable: Some(kind.is_retryable()),
                retry_after_secs: None,
                version,
            },
        ),
        Outcome::TimedOut => (
            StatusCode::GATEWAY_TIMEOUT,
            CodeResponse::error("Request timeout", version),
        ),
    }
}

/// Map a pre-admission rejection to an HTTP status and body.
pub fn rejection_response(err: &PairingError, version: ClientVersion) -> (StatusCode, CodeResponse) {
    match err {
        PairingError::InvalidInput { reason } => {
            (StatusCode::BAD_REQUEST, CodeResponse::error(reason.clone(), version))
        }
        PairingError::Busy { retry_after } => (
            StatusCode::SERVICE_UNAVAILABLE,
            CodeResponse::Error {
                error: "Busy".to_string(),
                kind: None,
                detail: Some(format!(
                    "Pairing service is currently busy. Please try again in {} seconds.",
                    retry_after.as_secs()
                )),
                retryable: Some(true),
                retry_after_secs: Some(retry_after.as_secs()),
                version,
            },
        ),
    }
}

/// `GET /code`
pub async fn request_code(
    State(service): State<Arc<PairingService>>,
    Query(query): Query<CodeQuery>,
) -> Response {
    let version = service.client_version();
    let raw = query.number.unwrap_or_default();

    match service.pair(&raw).await {
        Ok(outcome) => {
            let (status, body) = outcome_response(outcome, version);
            (status, Json(body)).into_response()
        }
        Err(err) => {
            let (status, body) = rejection_response(&err, version);
            let mut response = (status, Json(body)).into_response();
            if let PairingError::Busy { retry_after } = err
                && let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().to_string())
            {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
    }
}
