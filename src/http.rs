//! Blocking HTTP helpers shared by the network backends.

use crate::error::{ParleyError, Result};
use std::time::Duration;

/// Build a blocking client bounded by `timeout`.
///
/// For streamed bodies the timeout applies to each read, so it bounds idle
/// gaps rather than the whole reply.
pub fn client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ParleyError::Configuration {
            message: format!("cannot build HTTP client: {e}"),
        })
}

/// Whether a failed status is worth retrying: rate limits, overload and
/// server errors.
pub fn is_transient_status(status: u16) -> bool {
    status == 429 || status == 529 || (500..600).contains(&status)
}

/// Map a transport error for `operation`, turning timeouts into
/// [`ParleyError::Timeout`].
pub fn transport_error(operation: &str, e: reqwest::Error) -> ParleyError {
    if e.is_timeout() {
        ParleyError::Timeout {
            operation: operation.to_string(),
        }
    } else {
        ParleyError::Http(e)
    }
}

/// Shorten a response body for log and error messages.
pub fn excerpt(body: &str) -> String {
    const LIMIT: usize = 300;
    let trimmed = body.trim();
    if trimmed.chars().count() <= LIMIT {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(LIMIT).collect();
        format!("{cut}…")
    }
}
