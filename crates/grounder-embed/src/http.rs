//! Shared HTTP client construction and response status handling.

use std::time::Duration;

use crate::error::EmbedError;

/// Build an HTTP client with the standard grounder configuration.
///
/// Config: 30s connect timeout, caller-provided request timeout, rustls TLS,
/// `grounder/{version}` user-agent, redirect limit 10.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_client(request_timeout: Duration) -> Result<reqwest::Client, EmbedError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(request_timeout)
        .user_agent(concat!("grounder/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(EmbedError::Http)
}

/// Parse the `Retry-After` header value as whole seconds.
pub(crate) fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    let val = response.headers().get("retry-after")?;
    let secs = val.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

/// Map non-success responses to typed errors, passing successful ones through.
pub(crate) async fn check_status(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, EmbedError> {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(EmbedError::RateLimited {
            retry_after: retry_after(&response),
        });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!("{provider} API error {status}: {body}");
        return Err(EmbedError::Status {
            provider,
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}
