//! Shared HTTP transport.
//!
//! One `reqwest::Client` per adapter, reused across every method - the
//! client holds a connection pool internally, so there is no need to wrap
//! it in an [`Arc`] to share it.
//!
//! The timeout budget is 5s connect / 30s read / 10s write, with idle
//! pooled connections dropped after 5s. `reqwest` exposes connect and read
//! timeouts directly but has no write-only knob, so the write budget is
//! enforced through the total request ceiling: connect + write + read
//! summed to 45s, which is the longest any request may run even when the
//! upload side is the phase that stalls.
//!
//! The transport owns the transient-failure policy: transport timeouts and
//! HTTP 5xx responses are retried on a fixed 1s/2s/4s schedule, then
//! surfaced as a broker error carrying the last underlying failure.
//! 4xx responses and vendor business errors are *never* retried here - they
//! flow back to the adapter, which maps them through the vendor's error
//! table.
//!
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{map_deserialization_error, DalalError, Result};

/// Delays before each retry of a transient failure.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
/// No write-only timeout exists in `reqwest`; this budget is folded into
/// the total request ceiling below.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Request body variants across the supported vendors: Kite Connect takes
/// form-encoded bodies, SmartAPI takes JSON.
#[derive(Debug, Clone)]
pub(crate) enum RequestBody {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

/// A thin retrying wrapper over `reqwest::Client`.
pub(crate) struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub(crate) fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            // A stalled upload has no dedicated knob; the total ceiling
            // (connect + write + read) still bounds it.
            .timeout(CONNECT_TIMEOUT + WRITE_TIMEOUT + READ_TIMEOUT)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// The underlying client, for request shapes the JSON path does not
    /// cover (login redirect chains, bulk dump downloads).
    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Issue a request and parse the response body as JSON, retrying
    /// transient failures per the fixed schedule.
    ///
    /// Returns the HTTP status alongside the body: vendors signal business
    /// errors both in-band (`status: "error"`) and via 4xx statuses, and the
    /// adapter needs both to decide.
    pub(crate) async fn request_json(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: RequestBody,
    ) -> Result<(StatusCode, Value)> {
        let mut last_error: Option<DalalError> = None;

        for attempt in 0..=RETRY_DELAYS.len() {
            if attempt > 0 {
                let delay = RETRY_DELAYS[attempt - 1];
                debug!("retrying {} {} in {:?} (attempt {})", method, url, delay, attempt);
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .request(method.clone(), url)
                .headers(headers.clone());
            request = match &body {
                RequestBody::Empty => request,
                RequestBody::Json(json) => request.json(json),
                RequestBody::Form(fields) => request.form(fields),
            };

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() {
                        warn!("{} {} returned {}", method, url, status);
                        last_error = Some(DalalError::broker(
                            format!("{} {} failed with HTTP {}", method, url, status),
                            None,
                        ));
                        continue;
                    }
                    let text = response.text().await?;
                    let json = if text.is_empty() {
                        Value::Null
                    } else {
                        serde_json::from_str(&text)
                            .map_err(|e| map_deserialization_error(e, &text))?
                    };
                    return Ok((status, json));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    warn!("{} {} transport failure: {}", method, url, e);
                    last_error = Some(DalalError::broker(
                        format!("{} {} transport failure: {}", method, url, e),
                        None,
                    ));
                }
                Err(e) => return Err(DalalError::Http(e)),
            }
        }

        Err(last_error
            .unwrap_or_else(|| DalalError::broker(format!("{} {} failed", method, url), None)))
    }

    /// Plain GET returning the body as text, without the retry schedule.
    /// Used for instrument dump downloads, which have their own cadence.
    pub(crate) async fn get_text(&self, url: &str, headers: HeaderMap) -> Result<String> {
        let response = self.client.get(url).headers(headers).send().await?;
        if !response.status().is_success() {
            return Err(DalalError::broker(
                format!("GET {} failed with HTTP {}", url, response.status()),
                None,
            ));
        }
        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn business_4xx_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/orders")
            .with_status(403)
            .with_body(r#"{"status":"error","error_type":"TokenException","message":"expired"}"#)
            .expect(1)
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let (status, body) = transport
            .request_json(
                Method::GET,
                &format!("{}/orders", server.url()),
                HeaderMap::new(),
                RequestBody::Empty,
            )
            .await
            .unwrap();

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error_type"], "TokenException");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_exhaust_the_retry_budget() {
        let mut server = mockito::Server::new_async().await;
        // Initial attempt plus three retries.
        let mock = server
            .mock("GET", "/flaky")
            .with_status(502)
            .expect(4)
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .request_json(
                Method::GET,
                &format!("{}/flaky", server.url()),
                HeaderMap::new(),
                RequestBody::Empty,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DalalError::Broker { .. }));
        assert!(err.to_string().contains("502"));
        mock.assert_async().await;
    }
}
