use std::time::Duration;

use reqwest::{Client, Response, StatusCode};

use crate::error::ServiceError;

/// Shared client settings for every collaborator.
pub fn build_client(timeout: Duration) -> Result<Client, ServiceError> {
    let http = Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(30))
        .build()?;

    Ok(http)
}

/// Joins a base URL and a path without doubling the separator.
pub fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Maps a non-2xx response into `UnexpectedStatus`, keeping the body for logs.
pub async fn ensure_success(
    endpoint: &'static str,
    resp: Response,
) -> Result<Response, ServiceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(unexpected(endpoint, status, body))
}

pub fn unexpected(endpoint: &'static str, status: StatusCode, body: String) -> ServiceError {
    const MAX: usize = 160;
    let body = if body.len() > MAX {
        body.chars().take(MAX).collect()
    } else {
        body
    };

    ServiceError::UnexpectedStatus {
        endpoint,
        status: status.as_u16(),
        body,
    }
}
