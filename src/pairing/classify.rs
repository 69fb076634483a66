//! Transport error classification.
//!
//! Every transport failure is mapped to an [`ErrorKind`] here and nowhere
//! else. Structured status codes win; the text signature table is a
//! best-effort fallback for transports that only report free text.

use serde::Serialize;

use crate::error::TransportError;
use crate::pairing::stage::LifecycleStage;

/// Stable failure taxonomy exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    RateLimited,
    Timeout,
    InvalidTarget,
    Unauthorized,
    /// Connection dropped without an auth failure; the caller may retry.
    Transient,
    Unknown,
}

impl ErrorKind {
    /// Caller-facing summary for a synchronous failure response.
    pub fn summary(self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "Rate limit exceeded. Try again later.",
            ErrorKind::Timeout => "Connection timeout. Check your internet.",
            ErrorKind::InvalidTarget => "Invalid phone number format.",
            ErrorKind::Unauthorized => "Authentication with the remote service failed.",
            ErrorKind::Transient => "Connection closed unexpectedly. Try again.",
            ErrorKind::Unknown => "Failed to generate pairing code",
        }
    }

    /// [`summary`](Self::summary), refined by where the session was when it
    /// failed. Unclassified failures before the code request are service
    /// errors, not code-generation errors.
    pub fn summary_at(self, stage: LifecycleStage) -> &'static str {
        match (self, stage) {
            (ErrorKind::Unknown, LifecycleStage::Idle | LifecycleStage::Connecting) => {
                "Service error during pairing"
            }
            _ => self.summary(),
        }
    }

    /// Whether re-invoking the request may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::Timeout | ErrorKind::Transient
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::InvalidTarget => "InvalidTarget",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Transient => "Transient",
            ErrorKind::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Lowercase text signatures, checked in order.
const TEXT_SIGNATURES: &[(&str, ErrorKind)] = &[
    ("rate-overlimit", ErrorKind::RateLimited),
    ("rate limit", ErrorKind::RateLimited),
    ("rate-limit", ErrorKind::RateLimited),
    ("ratelimit", ErrorKind::RateLimited),
    ("too many", ErrorKind::RateLimited),
    ("timeout", ErrorKind::Timeout),
    ("timed out", ErrorKind::Timeout),
    ("invalid", ErrorKind::InvalidTarget),
    ("not registered", ErrorKind::InvalidTarget),
    ("unauthorized", ErrorKind::Unauthorized),
    ("logged out", ErrorKind::Unauthorized),
];

fn kind_for_status(status: u16) -> Option<ErrorKind> {
    match status {
        401 | 403 => Some(ErrorKind::Unauthorized),
        429 => Some(ErrorKind::RateLimited),
        408 => Some(ErrorKind::Timeout),
        400 | 404 => Some(ErrorKind::InvalidTarget),
        // Closed, replaced, restart required, service unavailable.
        428 | 440 | 503 | 515 => Some(ErrorKind::Transient),
        _ => None,
    }
}

fn kind_for_text(message: &str) -> Option<ErrorKind> {
    let lower = message.to_lowercase();
    TEXT_SIGNATURES
        .iter()
        .find(|(needle, _)| lower.contains(*needle))
        .map(|(_, kind)| *kind)
}

/// Classify a failed transport operation.
pub fn classify(err: &TransportError) -> ErrorKind {
    err.status_code
        .and_then(kind_for_status)
        .or_else(|| kind_for_text(&err.message))
        .unwrap_or(ErrorKind::Unknown)
}

/// Classify a `closed` connection event.
///
/// A close that carries no recognizable auth failure is `Transient`.
pub fn classify_close(reason: Option<&TransportError>) -> ErrorKind {
    match reason.map(classify) {
        Some(ErrorKind::Unknown) | None => ErrorKind::Transient,
        Some(kind) => kind,
    }
}
