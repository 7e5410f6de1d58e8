use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::debug;

use crate::http::Method;
use crate::parser::types::{
    FormBody, FormParameter, ParseError, ParseResult, RequestTemplate, Scenario, StringBody,
    TestCase,
};

/// Parser for `.webtest` XML documents.
///
/// Only recognized elements are extracted; anything else is skipped. Requests that are not
/// inside a `<TestCase>` element are collected into one implicit test case named after the
/// root element's `Name` attribute.
pub struct WebtestParser;

impl WebtestParser {
    pub fn parse_file<P: AsRef<Path>>(path: P) -> ParseResult<Scenario> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let scenario = Self::parse_content(&content).map_err(|e| ParseError::InFile {
            path: path.to_path_buf(),
            source: Box::new(e),
        })?;
        Ok(scenario.with_source_path(path.to_path_buf()))
    }

    pub fn parse_content(content: &str) -> ParseResult<Scenario> {
        let mut reader = Reader::from_str(content);
        let mut builder = ScenarioBuilder::default();
        let mut depth = 0usize;

        loop {
            let line = line_at(content, reader.buffer_position() as usize);
            match reader.read_event() {
                Ok(Event::Start(element)) => {
                    depth += 1;
                    builder.open(&element, depth, line)?;
                }
                Ok(Event::Empty(element)) => {
                    builder.open(&element, depth + 1, line)?;
                    builder.close(element.local_name().as_ref(), depth + 1, line)?;
                }
                Ok(Event::End(element)) => {
                    builder.close(element.local_name().as_ref(), depth, line)?;
                    depth = depth.saturating_sub(1);
                }
                Ok(Event::Text(text)) => {
                    if builder.collecting() {
                        let text = text.unescape().map_err(|e| ParseError::Xml {
                            line,
                            message: e.to_string(),
                        })?;
                        builder.text.push_str(&text);
                    }
                }
                Ok(Event::CData(cdata)) => {
                    if builder.collecting() {
                        builder.text.push_str(&String::from_utf8_lossy(&cdata));
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(ParseError::Xml {
                        line: line_at(content, reader.error_position() as usize),
                        message: e.to_string(),
                    });
                }
                _ => {}
            }
        }

        let end_line = line_at(content, content.len());
        if depth != 0 {
            return Err(ParseError::Malformed {
                line: end_line,
                message: "unexpected end of document".to_string(),
            });
        }
        builder.finish(end_line)
    }
}

/// Elements whose text content is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextElement {
    Description,
    Capture,
    StringHttpBody,
}

impl TextElement {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"Description" => Some(TextElement::Description),
            b"Capture" => Some(TextElement::Capture),
            b"StringHttpBody" => Some(TextElement::StringHttpBody),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            TextElement::Description => "Description",
            TextElement::Capture => "Capture",
            TextElement::StringHttpBody => "StringHttpBody",
        }
    }
}

#[derive(Default)]
struct ScenarioBuilder {
    seen_root: bool,
    root_name: Option<String>,
    test_cases: Vec<TestCase>,
    /// Open `<TestCase>` and the depth it was opened at
    current_case: Option<(TestCase, usize)>,
    /// Requests found outside any `<TestCase>`
    loose: TestCase,
    request: Option<RequestTemplate>,
    text_element: Option<TextElement>,
    text: String,
}

impl ScenarioBuilder {
    fn collecting(&self) -> bool {
        self.text_element.is_some()
    }

    fn open(&mut self, element: &BytesStart<'_>, depth: usize, line: usize) -> ParseResult<()> {
        let name = element.local_name();
        let name = name.as_ref();

        if !self.seen_root {
            self.seen_root = true;
            self.root_name = read_attributes(element, line)?.remove("Name");
        }

        if let Some(open) = self.text_element {
            return Err(malformed(
                line,
                format!(
                    "<{}> not allowed inside <{}>",
                    String::from_utf8_lossy(name),
                    open.name()
                ),
            ));
        }

        match name {
            b"TestCase" => {
                if self.current_case.is_none() {
                    let mut attrs = read_attributes(element, line)?;
                    let case = TestCase {
                        name: attrs.remove("Name").filter(|n| !n.is_empty()),
                        description: attrs.remove("Description").filter(|d| !d.is_empty()),
                        requests: Vec::new(),
                    };
                    self.current_case = Some((case, depth));
                }
            }
            b"Request" => {
                if self.request.is_some() {
                    return Err(malformed(line, "<Request> not allowed inside <Request>"));
                }
                self.request = Some(parse_request(element, line)?);
            }
            b"Header" => {
                let request = self.request_mut("Header", line)?;
                let attrs = read_attributes(element, line)?;
                if let Some((name, value)) = name_value(&attrs) {
                    request.headers.push((name, value));
                }
            }
            b"QueryStringParameter" => {
                let request = self.request_mut("QueryStringParameter", line)?;
                if let Some(param) = parse_parameter(element, line)? {
                    request.query_parameters.push(param);
                }
            }
            b"FormPostHttpBody" => {
                let request = self.request_mut("FormPostHttpBody", line)?;
                let content_type = read_attributes(element, line)?
                    .remove("ContentType")
                    .filter(|ct| !ct.is_empty());
                let body = request.form_body.get_or_insert_with(FormBody::default);
                if content_type.is_some() {
                    body.content_type = content_type;
                }
            }
            b"FormPostParameter" => {
                let param = parse_parameter(element, line)?;
                let request = self.request_mut("FormPostParameter", line)?;
                if let Some(param) = param {
                    request
                        .form_body
                        .get_or_insert_with(FormBody::default)
                        .parameters
                        .push(param);
                }
            }
            _ => {
                if let Some(text_element) = TextElement::from_name(name) {
                    self.open_text(text_element, element, line)?;
                }
            }
        }
        Ok(())
    }

    fn open_text(
        &mut self,
        text_element: TextElement,
        element: &BytesStart<'_>,
        line: usize,
    ) -> ParseResult<()> {
        match text_element {
            // Allowed at test case level as well
            TextElement::Description => {}
            TextElement::Capture => {
                self.request_mut("Capture", line)?;
            }
            TextElement::StringHttpBody => {
                let content_type = read_attributes(element, line)?
                    .remove("ContentType")
                    .filter(|ct| !ct.is_empty());
                let request = self.request_mut("StringHttpBody", line)?;
                request.string_body = Some(StringBody {
                    content_type,
                    content: String::new(),
                });
            }
        }
        self.text_element = Some(text_element);
        self.text.clear();
        Ok(())
    }

    fn close(&mut self, name: &[u8], depth: usize, line: usize) -> ParseResult<()> {
        if let Some(open) = self.text_element {
            if TextElement::from_name(name) != Some(open) {
                return Err(malformed(
                    line,
                    format!(
                        "expected </{}>, found </{}>",
                        open.name(),
                        String::from_utf8_lossy(name)
                    ),
                ));
            }
            self.close_text(open);
            return Ok(());
        }

        match name {
            b"Request" => {
                if let Some(request) = self.request.take() {
                    match self.current_case.as_mut() {
                        Some((case, _)) => case.requests.push(request),
                        None => self.loose.requests.push(request),
                    }
                }
            }
            b"TestCase" => {
                if let Some((case, case_depth)) = self.current_case.take() {
                    if case_depth == depth {
                        self.push_case(case);
                    } else {
                        self.current_case = Some((case, case_depth));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close_text(&mut self, element: TextElement) {
        let text = std::mem::take(&mut self.text);
        self.text_element = None;

        match element {
            TextElement::Description => {
                let description = text.trim().to_string();
                if let Some(request) = self.request.as_mut() {
                    request.description.push_str(&description);
                } else if let Some((case, _)) = self.current_case.as_mut() {
                    case.description = Some(description).filter(|d| !d.is_empty());
                }
            }
            TextElement::Capture => {
                if let Some(request) = self.request.as_mut() {
                    request.add_capture_block(&text);
                }
            }
            TextElement::StringHttpBody => {
                if let Some(body) = self.request.as_mut().and_then(|r| r.string_body.as_mut()) {
                    body.content.push_str(&text);
                }
            }
        }
    }

    fn push_case(&mut self, case: TestCase) {
        if case.requests.is_empty() {
            debug!(test_case = case.label(), "Skipping test case without requests");
        } else {
            self.test_cases.push(case);
        }
    }

    fn request_mut(&mut self, element: &str, line: usize) -> ParseResult<&mut RequestTemplate> {
        self.request
            .as_mut()
            .ok_or_else(|| malformed(line, format!("<{}> not inside <Request>", element)))
    }

    fn finish(mut self, line: usize) -> ParseResult<Scenario> {
        if !self.seen_root {
            return Err(malformed(line, "document has no root element"));
        }
        if self.request.is_some() || self.current_case.is_some() {
            return Err(malformed(line, "unexpected end of document"));
        }

        if !self.loose.requests.is_empty() {
            let mut loose = std::mem::take(&mut self.loose);
            loose.name = self.root_name.take().filter(|n| !n.is_empty());
            self.test_cases.insert(0, loose);
        }

        if self.test_cases.is_empty() {
            return Err(ParseError::NoRequests);
        }

        Ok(Scenario {
            test_cases: self.test_cases,
            source_path: None,
        })
    }
}

fn parse_request(element: &BytesStart<'_>, line: usize) -> ParseResult<RequestTemplate> {
    let mut attrs = read_attributes(element, line)?;

    let method = attrs.remove("Method").ok_or_else(|| missing("Request", "Method", line))?;
    let url = attrs.remove("Url").ok_or_else(|| missing("Request", "Url", line))?;
    let method: Method = method
        .parse()
        .map_err(|_| ParseError::InvalidMethod { method, line })?;

    let mut request = RequestTemplate::new(method, url);
    request.line_number = line;
    request.timeout = parse_seconds(&attrs, "Timeout", line)?;
    request.think_time = parse_seconds(&attrs, "ThinkTime", line)?;
    Ok(request)
}

fn parse_parameter(element: &BytesStart<'_>, line: usize) -> ParseResult<Option<FormParameter>> {
    let attrs = read_attributes(element, line)?;
    let url_encode = match attrs.get("UrlEncode") {
        None => true,
        Some(flag) => match flag.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "" => true,
            "false" | "0" => false,
            other => {
                return Err(malformed(
                    line,
                    format!("invalid UrlEncode value '{}'", other),
                ));
            }
        },
    };
    Ok(name_value(&attrs).map(|(name, value)| FormParameter {
        name,
        value,
        url_encode,
    }))
}

/// `Name`/`Value` pair; dropped when `Name` is empty or `Value` is absent.
fn name_value(attrs: &HashMap<String, String>) -> Option<(String, String)> {
    let name = attrs.get("Name").filter(|n| !n.is_empty())?;
    let value = attrs.get("Value")?;
    Some((name.clone(), value.clone()))
}

fn parse_seconds(
    attrs: &HashMap<String, String>,
    attribute: &str,
    line: usize,
) -> ParseResult<Option<Duration>> {
    let Some(raw) = attrs.get(attribute) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .map(Some)
        .ok_or_else(|| {
            malformed(
                line,
                format!("{} must be a non-negative number of seconds, got '{}'", attribute, raw),
            )
        })
}

fn read_attributes(element: &BytesStart<'_>, line: usize) -> ParseResult<HashMap<String, String>> {
    let mut attrs = HashMap::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| ParseError::Xml {
            line,
            message: e.to_string(),
        })?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| ParseError::Xml {
            line,
            message: e.to_string(),
        })?;
        attrs.insert(key, value.into_owned());
    }
    Ok(attrs)
}

fn line_at(content: &str, offset: usize) -> usize {
    let end = offset.min(content.len());
    content.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}

fn malformed(line: usize, message: impl Into<String>) -> ParseError {
    ParseError::Malformed {
        line,
        message: message.into(),
    }
}

fn missing(element: &str, attribute: &str, line: usize) -> ParseError {
    ParseError::MissingAttribute {
        element: element.to_string(),
        attribute: attribute.to_string(),
        line,
    }
}
