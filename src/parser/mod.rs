pub mod types;
pub mod webtest_file;

// Re-export commonly used types
pub use types::{
    FormBody, FormParameter, ParseError, ParseResult, RequestTemplate, Scenario, StringBody,
    TestCase,
};
pub use webtest_file::WebtestParser;

/// Parse a `.webtest` file from disk.
pub fn parse_file<P: AsRef<std::path::Path>>(path: P) -> ParseResult<Scenario> {
    WebtestParser::parse_file(path)
}

/// Parse `.webtest` XML from a string.
pub fn parse_content(content: &str) -> ParseResult<Scenario> {
    WebtestParser::parse_content(content)
}
