use std::future::Future;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::http::request::ResolvedRequest;
use crate::http::response::CapturedResponse;

/// Failures of the transport layer. Never retried by this crate.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request to {url} failed: {source}")]
    Execution {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Request to {url} timed out after {}ms", .timeout.as_millis())]
    Timeout { url: String, timeout: Duration },
}

impl TransportError {
    pub fn execution(
        url: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        TransportError::Execution {
            url: url.into(),
            source: source.into(),
        }
    }
}

/// The HTTP capability the engine needs from its host.
pub trait HttpTransport: Send + Sync {
    fn send(
        &self,
        request: &ResolvedRequest,
        timeout: Duration,
    ) -> impl Future<Output = Result<CapturedResponse, TransportError>> + Send;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct Client {
    inner: reqwest::Client,
}

impl Client {
    /// Redirects are not followed; recorded scenarios replay every hop themselves.
    pub fn new() -> Result<Self, TransportError> {
        let inner = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TransportError::execution("<client>", e))?;
        Ok(Self { inner })
    }

    pub fn from_reqwest(inner: reqwest::Client) -> Self {
        Self { inner }
    }

    fn map_error(url: &str, timeout: Duration, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                url: url.to_string(),
                timeout,
            }
        } else {
            TransportError::execution(url, err)
        }
    }
}

impl HttpTransport for Client {
    async fn send(
        &self,
        request: &ResolvedRequest,
        timeout: Duration,
    ) -> Result<CapturedResponse, TransportError> {
        let url = request.url.as_str();
        let mut req = self
            .inner
            .request(request.method.into(), url)
            .timeout(timeout);

        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            req = req.body(body.content.clone());
        }

        let start = Instant::now();
        let response = req
            .send()
            .await
            .map_err(|e| Self::map_error(url, timeout, e))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| Self::map_error(url, timeout, e))?;
        let duration = start.elapsed();

        debug!(%url, status, elapsed_ms = duration.as_millis() as u64, "Response received");
        Ok(CapturedResponse::new(status, headers, body, duration))
    }
}
