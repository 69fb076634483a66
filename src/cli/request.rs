//! `pairgate request`: ask a running server for a pairing code.

use std::time::Duration;

use reqwest::StatusCode;

/// Covers the server's default deadline plus connection overhead.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(200);

/// Run the request command against `base_url`.
pub async fn run_request_command(number: &str, base_url: &str) -> anyhow::Result<()> {
    let url = format!("{}/code", base_url.trim_end_matches('/'));

    let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    let response = client
        .get(&url)
        .query(&[("number", number)])
        .send()
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to reach pairing server (is it running at {}?): {}",
                base_url,
                e
            )
        })?;

    let status = response.status();
    let body = response
        .json::<serde_json::Value>()
        .await
        .unwrap_or(serde_json::Value::Null);

    let summary = describe_response(status, &body);
    if status.is_success() && body.get("code").is_some() {
        println!("{}", summary);
        Ok(())
    } else {
        anyhow::bail!("{}", summary)
    }
}

/// Render a server response as a single human-readable line.
pub fn describe_response(status: StatusCode, body: &serde_json::Value) -> String {
    let field = |name: &str| body.get(name).and_then(|v| v.as_str());

    if let Some(code) = field("code") {
        return format!("Pairing code: {}", code);
    }

    let error = field("error").unwrap_or("unexpected response");
    let mut line = format!("{} ({})", error, status.as_u16());
    if let Some(detail) = field("detail") {
        line.push_str(": ");
        line.push_str(detail);
    }
    if let Some(secs) = body.get("retry_after_secs").and_then(|v| v.as_u64()) {
        line.push_str(&format!(" [retry in {}s]", secs));
    } else if body.get("retryable").and_then(|v| v.as_bool()) == Some(true) {
        line.push_str(" [retryable]");
    }
    line
}
