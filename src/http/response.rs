use crate::http::types::Status;
use reqwest::header::HeaderMap as Headers;
use std::time::Duration;

/// A response as seen by the capture engine.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: Status,
    pub headers: Headers,
    pub body: String,
    pub duration: Duration,
}

impl CapturedResponse {
    pub fn new(status: u16, headers: Headers, body: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: Status::from(status),
            headers,
            body: body.into(),
            duration,
        }
    }

    /// Build a response with no headers, mostly useful for stub transports.
    pub fn from_body(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, Headers::new(), body, Duration::ZERO)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.parse::<reqwest::header::HeaderName>(),
            value.parse::<reqwest::header::HeaderValue>(),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Header value by (case-insensitive) name, if present and valid text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }

    pub fn text(&self) -> &str {
        &self.body
    }
}
