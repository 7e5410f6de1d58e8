use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::form_urlencoded::byte_serialize;

use crate::http::{CapturedResponse, HttpTransport, ResolvedRequest, TransportError};
use crate::parser::{FormParameter, RequestTemplate};
use crate::variable::{Assignments, ExpressionError, VariableContext, VariableResolver};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Turns request templates into wire requests and sends them.
pub struct RequestExecutor<T> {
    transport: Arc<T>,
    resolver: VariableResolver,
    default_headers: Vec<(String, String)>,
}

impl<T> RequestExecutor<T> {
    pub fn new(transport: Arc<T>, resolver: VariableResolver) -> Self {
        Self {
            transport,
            resolver,
            default_headers: Vec::new(),
        }
    }

    pub fn with_default_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.default_headers = headers;
        self
    }

    /// Resolve every placeholder of a template.
    ///
    /// Fields are resolved in document order: URL, query parameters, headers, body. Form values
    /// are URL-encoded after resolution. A string body with non-whitespace content wins over a
    /// form body; GET, HEAD and DELETE send form parameters in the query string.
    ///
    /// `context` is not modified. `{NAME = ...}` assignments come back as [`Assignments`] for
    /// the caller to commit once the request has been sent.
    pub fn resolve(
        &self,
        template: &RequestTemplate,
        context: &VariableContext,
    ) -> Result<(ResolvedRequest, Assignments), ExpressionError> {
        let mut staged = Assignments::default();
        let mut url = self
            .resolver
            .resolve_staged(&template.url, context, &mut staged)?;
        let mut query = self.encode_all(&template.query_parameters, context, &mut staged)?;

        let mut headers = Vec::with_capacity(template.headers.len());
        for (name, value) in &template.headers {
            let value = self.resolver.resolve_staged(value, context, &mut staged)?;
            headers.push((name.clone(), value));
        }

        let mut body = None;
        match &template.string_body {
            Some(string_body) if !string_body.is_blank() => {
                let content =
                    self.resolver
                        .resolve_staged(&string_body.content, context, &mut staged)?;
                body = Some((string_body.content_type.clone(), content));
            }
            _ => {
                if let Some(form) = &template.form_body
                    && !form.parameters.is_empty()
                {
                    let pairs = self.encode_all(&form.parameters, context, &mut staged)?;
                    if template.method.sends_form_as_query() {
                        query.extend(pairs);
                    } else {
                        let content_type = form
                            .content_type
                            .clone()
                            .unwrap_or_else(|| FORM_CONTENT_TYPE.to_string());
                        body = Some((Some(content_type), pairs.join("&")));
                    }
                }
            }
        }

        if !query.is_empty() {
            let separator = if url.contains('?') { '&' } else { '?' };
            url.push(separator);
            url.push_str(&query.join("&"));
        }

        let mut request = ResolvedRequest::new(template.method, url);
        for (name, value) in headers {
            request = request.with_header(name, value);
        }
        for (name, value) in &self.default_headers {
            if request.header(name).is_none() {
                request = request.with_header(name.clone(), value.clone());
            }
        }
        if let Some((content_type, content)) = body {
            request = request.with_body(content_type.as_deref(), content);
        }

        debug!(
            method = %request.method,
            url = %request.url,
            assignments = staged.iter().count(),
            "Resolved request"
        );
        Ok((request, staged))
    }

    fn encode_all(
        &self,
        params: &[FormParameter],
        context: &VariableContext,
        staged: &mut Assignments,
    ) -> Result<Vec<String>, ExpressionError> {
        let mut pairs = Vec::with_capacity(params.len());
        for param in params {
            let value = self.resolver.resolve_staged(&param.value, context, staged)?;
            let value = if param.url_encode {
                encode(&value)
            } else {
                value
            };
            pairs.push(format!("{}={}", encode(&param.name), value));
        }
        Ok(pairs)
    }
}

impl<T: HttpTransport> RequestExecutor<T> {
    /// Send a resolved request. The timeout is enforced here even if the transport ignores it.
    pub async fn execute(
        &self,
        request: &ResolvedRequest,
        timeout: Duration,
    ) -> Result<CapturedResponse, TransportError> {
        match tokio::time::timeout(timeout, self.transport.send(request, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                url: request.url.clone(),
                timeout,
            }),
        }
    }
}

fn encode(text: &str) -> String {
    byte_serialize(text.as_bytes()).collect()
}
