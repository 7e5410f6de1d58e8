use serde::Serialize;

use crate::http::types::Method;

/// Body of a resolved request, ready to put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedBody {
    pub content_type: Option<String>,
    pub content: String,
}

/// A request with every placeholder resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<ResolvedBody>,
}

impl ResolvedRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body. A `Content-Type` header is added unless one is already present.
    pub fn with_body(mut self, content_type: Option<&str>, content: impl Into<String>) -> Self {
        if let Some(ct) = content_type
            && self.header("content-type").is_none()
        {
            self.headers.push(("Content-Type".to_string(), ct.to_string()));
        }
        self.body = Some(ResolvedBody {
            content_type: content_type.map(str::to_string),
            content: content.into(),
        });
        self
    }

    /// Case-insensitive header lookup; the first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> Option<&str> {
        self.body.as_ref().map(|b| b.content.as_str())
    }
}
