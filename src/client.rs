//! HTTP range client: capability probing and ranged/full fetches.
use crate::error::ClientError;
use bytes::Bytes;
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// What the capability probe learned about the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// Total resource size, when the server reported one.
    pub total_size: Option<u64>,
    /// True only when the server explicitly confirmed byte ranges.
    pub supports_ranges: bool,
}

/// Thin wrapper over a [`reqwest::Client`] that speaks byte ranges.
///
/// Every call opens its own request; no state is carried between calls
/// beyond reqwest's internal connection pooling.
#[derive(Debug, Clone)]
pub struct RangeClient {
    http: reqwest::Client,
}

impl RangeClient {
    /// Builds a client. `timeout` bounds connection establishment and
    /// each body read separately, so a stalled server fails fast while
    /// a slow-but-steady transfer of any length is left alone.
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("paraget/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    /// Asks the server for size and range capability.
    ///
    /// Tries a HEAD first; when HEAD does not carry `Accept-Ranges:
    /// bytes`, a one-byte ranged GET is issued and only a 206 answer
    /// counts as confirmation. A server that stays silent about ranges
    /// is treated as not supporting them.
    pub async fn probe(&self, url: &str) -> Result<ProbeResult, ClientError> {
        let mut total_size = None;

        match self.http.head(url).send().await {
            Ok(response) if response.status().is_success() => {
                let headers = response.headers();
                total_size = content_length(headers);
                let confirmed = headers
                    .get(ACCEPT_RANGES)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.trim().eq_ignore_ascii_case("bytes"))
                    .unwrap_or(false);
                if confirmed {
                    return Ok(ProbeResult {
                        total_size,
                        supports_ranges: true,
                    });
                }
            }
            Ok(response) => {
                debug!(status = %response.status(), "HEAD probe rejected, trying ranged GET");
            }
            Err(err) => {
                debug!(%err, "HEAD probe failed, trying ranged GET");
            }
        }

        let response = self
            .http
            .get(url)
            .header(RANGE, "bytes=0-0")
            .send()
            .await?;
        let status = response.status();

        if status == StatusCode::PARTIAL_CONTENT {
            if total_size.is_none() {
                total_size = content_range_total(response.headers());
            }
            return Ok(ProbeResult {
                total_size,
                supports_ranges: true,
            });
        }
        if !status.is_success() {
            return Err(ClientError::UnexpectedStatus(status));
        }

        // Plain 200: the server ignored the range header.
        if total_size.is_none() {
            total_size = content_length(response.headers());
        }
        Ok(ProbeResult {
            total_size,
            supports_ranges: false,
        })
    }

    /// Issues a ranged GET for the inclusive range `[start, end]`.
    ///
    /// Succeeds only on 206 Partial Content; a 200 means the server
    /// ignored the range and is reported as a failure.
    pub async fn fetch_range(
        &self,
        url: &str,
        start: u64,
        end: u64,
    ) -> Result<ByteStream, ClientError> {
        let response = self
            .http
            .get(url)
            .header(RANGE, format!("bytes={}-{}", start, end))
            .send()
            .await?;
        let status = response.status();
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(ClientError::UnexpectedStatus(status));
        }
        Ok(ByteStream { response })
    }

    /// Issues a plain GET for the whole resource.
    pub async fn fetch_full(&self, url: &str) -> Result<ByteStream, ClientError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::UnexpectedStatus(status));
        }
        Ok(ByteStream { response })
    }
}

/// A streaming response body.
pub struct ByteStream {
    response: reqwest::Response,
}

impl ByteStream {
    /// Next piece of the body, or `None` once it is exhausted.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, ClientError> {
        Ok(self.response.chunk().await?)
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Total size out of a `Content-Range: bytes 0-0/12345` header.
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit('/').next())
        .and_then(|total| total.trim().parse().ok())
}
