use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::http::Method;

/// One `<FormPostParameter>` or `<QueryStringParameter>`.
#[derive(Debug, Clone, PartialEq)]
pub struct FormParameter {
    pub name: String,
    /// Value template, may contain placeholders
    pub value: String,
    /// Percent-encode the value after resolution
    pub url_encode: bool,
}

impl FormParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            url_encode: true,
        }
    }
}

/// `<FormPostHttpBody>`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormBody {
    pub content_type: Option<String>,
    pub parameters: Vec<FormParameter>,
}

/// `<StringHttpBody>`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StringBody {
    pub content_type: Option<String>,
    pub content: String,
}

impl StringBody {
    /// A string body only counts when it holds something besides whitespace.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// A single `<Request>` element, placeholders left unresolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTemplate {
    pub method: Method,

    /// URL template (required)
    pub url: String,

    /// Human-readable `<Description>`
    pub description: String,

    /// Headers in document order
    pub headers: Vec<(String, String)>,

    pub query_parameters: Vec<FormParameter>,

    pub form_body: Option<FormBody>,

    pub string_body: Option<StringBody>,

    /// Raw capture expressions, one per non-blank line of `<Capture>`
    pub captures: Vec<String>,

    /// `Timeout` attribute (seconds)
    pub timeout: Option<Duration>,

    /// `ThinkTime` attribute (seconds)
    pub think_time: Option<Duration>,

    /// Line of the `<Request>` tag (for error reports)
    pub line_number: usize,
}

impl RequestTemplate {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            description: String::new(),
            headers: Vec::new(),
            query_parameters: Vec::new(),
            form_body: None,
            string_body: None,
            captures: Vec::new(),
            timeout: None,
            think_time: None,
            line_number: 0,
        }
    }

    pub fn form_parameters(&self) -> &[FormParameter] {
        self.form_body
            .as_ref()
            .map(|b| b.parameters.as_slice())
            .unwrap_or_default()
    }

    /// Add capture lines from the text content of a `<Capture>` element.
    pub fn add_capture_block(&mut self, text: &str) {
        self.captures.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
    }
}

impl fmt::Display for RequestTemplate {
    /// `Description: METHOD host/path {'name': 'value', ...}`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.description.is_empty() {
            write!(f, "{}: ", self.description)?;
        }
        let location = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        let location = location.split(['?', '#']).next().unwrap_or_default();
        let params: Vec<String> = self
            .form_parameters()
            .iter()
            .map(|p| format!("'{}': '{}'", p.name, p.value))
            .collect();
        write!(f, "{} {} {{{}}}", self.method, location, params.join(", "))
    }
}

/// One `<TestCase>`: requests that always run together, in order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TestCase {
    pub name: Option<String>,
    pub description: Option<String>,
    pub requests: Vec<RequestTemplate>,
}

impl TestCase {
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.description.as_deref())
            .unwrap_or("unnamed test case")
    }
}

/// A parsed `.webtest` document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Scenario {
    pub test_cases: Vec<TestCase>,

    /// Source file path; the scenario's identity when loaded from disk
    pub source_path: Option<PathBuf>,
}

impl Scenario {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_path(mut self, path: PathBuf) -> Self {
        self.source_path = Some(path);
        self
    }

    pub fn requests(&self) -> impl Iterator<Item = &RequestTemplate> {
        self.test_cases.iter().flat_map(|tc| tc.requests.iter())
    }

    pub fn request_count(&self) -> usize {
        self.test_cases.iter().map(|tc| tc.requests.len()).sum()
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source_path {
            Some(path) => writeln!(f, "Scenario: {}", path.display())?,
            None => writeln!(f, "Scenario: <inline>")?,
        }
        for request in self.requests() {
            write!(f, "\n{}\n", request)?;
        }
        Ok(())
    }
}

/// Errors raised while loading a scenario document.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Structurally invalid document
    #[error("Malformed scenario at line {line}: {message}")]
    Malformed { line: usize, message: String },

    /// Required attribute absent
    #[error("Missing attribute '{attribute}' on <{element}> at line {line}")]
    MissingAttribute {
        element: String,
        attribute: String,
        line: usize,
    },

    #[error("Invalid HTTP method '{method}' at line {line}")]
    InvalidMethod { method: String, line: usize },

    /// Not well-formed XML
    #[error("Invalid XML at line {line}: {message}")]
    Xml { line: usize, message: String },

    #[error("No requests found in scenario")]
    NoRequests,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}: {source}", .path.display())]
    InFile {
        path: PathBuf,
        source: Box<ParseError>,
    },
}

pub type ParseResult<T> = Result<T, ParseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_block_splits_lines() {
        let mut request = RequestTemplate::new(Method::Post, "http://example.com/");
        request.add_capture_block(
            "\n      {SID = <SID></SID>}\n\n      {FOO = <FOO>([^<]+)</FOO>}\n   ",
        );
        assert_eq!(
            request.captures,
            vec!["{SID = <SID></SID>}", "{FOO = <FOO>([^<]+)</FOO>}"]
        );
    }

    #[test]
    fn test_display_summary() {
        let mut request = RequestTemplate::new(Method::Post, "http://{SERVER}/login?x=1");
        request.description = "Login to the application".to_string();
        request.form_body = Some(FormBody {
            content_type: None,
            parameters: vec![
                FormParameter::new("username", "{USERNAME}"),
                FormParameter::new("password", "{PASSWORD}"),
            ],
        });
        assert_eq!(
            request.to_string(),
            "Login to the application: POST {SERVER}/login {'username': '{USERNAME}', 'password': '{PASSWORD}'}"
        );
    }

    #[test]
    fn test_blank_string_body() {
        let body = StringBody {
            content_type: None,
            content: "  \n ".to_string(),
        };
        assert!(body.is_blank());
    }

    #[test]
    fn test_test_case_label() {
        let mut tc = TestCase::default();
        assert_eq!(tc.label(), "unnamed test case");
        tc.description = Some("Checkout".to_string());
        assert_eq!(tc.label(), "Checkout");
        tc.name = Some("checkout-flow".to_string());
        assert_eq!(tc.label(), "checkout-flow");
    }
}
