use std::time::Duration;

use council_core::{CouncilError, CouncilResult};
use reqwest::Client;
use serde::de::DeserializeOwned;

/// Shared reqwest client factory: every adapter builds one client with the
/// provider timeout baked in so deadlines also cover connect time.
pub fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Map transport/status failures to the error taxonomy the federation
/// understands (RateLimited gets skipped, Auth disables, Timeout retries).
pub fn map_status(provider: &str, status: reqwest::StatusCode) -> CouncilError {
    match status.as_u16() {
        401 | 403 => CouncilError::Auth(format!("{provider}: credentials rejected ({status})")),
        404 => CouncilError::NotFound(format!("{provider}: no data ({status})")),
        429 => CouncilError::RateLimited(format!("{provider}: throttled ({status})")),
        _ => CouncilError::Unavailable(format!("{provider}: HTTP {status}")),
    }
}

pub fn map_transport(provider: &str, err: reqwest::Error) -> CouncilError {
    if err.is_timeout() {
        CouncilError::Timeout(format!("{provider}: request timed out"))
    } else {
        CouncilError::Unavailable(format!("{provider}: {err}"))
    }
}

/// GET a JSON document, translating non-2xx and transport errors.
pub async fn get_json<T: DeserializeOwned>(
    client: &Client,
    provider: &str,
    url: &str,
    query: &[(&str, &str)],
) -> CouncilResult<T> {
    let response = client
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| map_transport(provider, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(map_status(provider, status));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| CouncilError::Unavailable(format!("{provider}: bad payload: {e}")))
}

/// POST a JSON body and parse a JSON document.
pub async fn post_json<T: DeserializeOwned>(
    client: &Client,
    provider: &str,
    url: &str,
    body: &serde_json::Value,
) -> CouncilResult<T> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| map_transport(provider, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(map_status(provider, status));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| CouncilError::Unavailable(format!("{provider}: bad payload: {e}")))
}
