use backoff::ExponentialBackoff;
use log::warn;
use reqwest::blocking::{Client, RequestBuilder, Response};
use std::time::Duration;

use crate::config::Config;
use crate::error::CiphrError;

const USER_AGENT: &str = concat!("ciphr/", env!("CARGO_PKG_VERSION"), " (arXiv digest)");

/// Shared blocking client for one run.
pub fn build_client(config: &Config) -> Result<Client, CiphrError> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?;
    Ok(client)
}

/// Exponential backoff bounded by the configured total retry time.
pub fn retry_policy(config: &Config) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(500),
        max_interval: Duration::from_secs(10),
        max_elapsed_time: Some(Duration::from_secs(config.retry_max_elapsed_secs)),
        ..Default::default()
    }
}

/// Send a request, retrying network errors, 429 and 5xx responses.
///
/// Other non-success statuses fail immediately with [`CiphrError::ApiError`].
pub fn send_with_retry<F>(policy: ExponentialBackoff, service: &str, mut build: F) -> Result<Response, CiphrError>
where
    F: FnMut() -> RequestBuilder,
{
    let operation = || {
        let response = build()
            .send()
            .map_err(|e| backoff::Error::transient(CiphrError::NetworkError(e)))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error = CiphrError::ApiError(format!("{} returned status {}", service, status));
        if status.is_server_error() || status.as_u16() == 429 {
            warn!("{} returned status {}, retrying", service, status);
            Err(backoff::Error::transient(error))
        } else {
            Err(backoff::Error::permanent(error))
        }
    };

    backoff::retry(policy, operation).map_err(|e| match e {
        backoff::Error::Permanent(err) => err,
        backoff::Error::Transient { err, .. } => err,
    })
}
