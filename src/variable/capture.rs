use regex::Regex;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::http::CapturedResponse;
use crate::runner::types::CapturePolicy;
use crate::variable::extractor;
use crate::variable::resolver::{ExpressionError, VariableResolver, is_variable_name};
use crate::variable::types::VariableContext;

/// Where a capture expression looks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CaptureSource {
    /// Response body
    Body,
    /// Named response header (`@Name:` prefix)
    Header(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// One empty tag pair such as `<SID></SID>` marks the hole; everything else is literal
    Hole,
    /// Regular expression with at most one capture group
    Regex,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    #[error("Malformed capture expression '{expression}': {reason}")]
    Malformed { expression: String, reason: String },

    #[error("No match for '{pattern}' while capturing {variable}")]
    Mismatch { variable: String, pattern: String },

    #[error("Header '{header}' not found while capturing {variable}")]
    HeaderNotFound { variable: String, header: String },

    #[error("Invalid pattern '{pattern}' for {variable}: {message}")]
    InvalidPattern {
        variable: String,
        pattern: String,
        message: String,
    },

    #[error(transparent)]
    Expression(#[from] ExpressionError),
}

impl CaptureError {
    /// Errors a `warn` policy tolerates.
    pub fn is_mismatch(&self) -> bool {
        matches!(
            self,
            CaptureError::Mismatch { .. } | CaptureError::HeaderNotFound { .. }
        )
    }
}

/// A compiled `{NAME = pattern}` line from a `<Capture>` block.
#[derive(Debug, Clone)]
pub struct CaptureExpression {
    pub name: String,
    pub source: CaptureSource,
    /// Pattern text after the source prefix, placeholders unresolved
    pub pattern: String,
    pub kind: PatternKind,
    /// Pre-built matcher when the pattern has no placeholders
    compiled: Option<Regex>,
}

impl CaptureExpression {
    /// Parse and validate one expression.
    pub fn parse(expression: &str) -> Result<Self, CaptureError> {
        let malformed = |reason: &str| CaptureError::Malformed {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let inner = expression
            .trim()
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(|| malformed("expected '{NAME = pattern}'"))?
            .trim_start();

        let name_len = inner
            .bytes()
            .take_while(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || *b == b'_')
            .count();
        let name = &inner[..name_len];
        if !is_variable_name(name) {
            return Err(malformed("missing upper-case variable name"));
        }

        let rest = inner[name_len..].trim_start();
        let Some(rest) = rest.strip_prefix('=') else {
            return Err(malformed(&format!("expected '=' after {}", name)));
        };
        if rest.starts_with('=') {
            return Err(malformed("'==' is not an assignment"));
        }

        let pattern = rest.trim();
        let (source, pattern) = match header_prefix_regex().captures(pattern) {
            Some(caps) => {
                let header = caps.get(1).map_or("", |m| m.as_str());
                let body = caps.get(2).map_or("", |m| m.as_str());
                (CaptureSource::Header(header.to_string()), body)
            }
            None => (CaptureSource::Body, pattern),
        };
        if pattern.is_empty() {
            return Err(malformed("empty pattern"));
        }

        let kind = match count_holes(pattern) {
            0 => PatternKind::Regex,
            1 => PatternKind::Hole,
            _ => return Err(malformed("more than one capture marker")),
        };

        let mut capture = Self {
            name: name.to_string(),
            source,
            pattern: pattern.to_string(),
            kind,
            compiled: None,
        };

        if !has_placeholders(pattern) {
            let regex = compile(kind, pattern).map_err(|reason| malformed(&reason))?;
            capture.compiled = Some(regex);
        }
        Ok(capture)
    }

    /// Parse every line of a request's capture block.
    pub fn parse_all(expressions: &[String]) -> Result<Vec<Self>, CaptureError> {
        expressions.iter().map(|e| Self::parse(e)).collect()
    }

    /// The matcher, with `{VAR}` references expanded through `lookup`.
    fn matcher<F>(&self, resolver: &VariableResolver, lookup: F) -> Result<Cow<'_, Regex>, CaptureError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(regex) = &self.compiled {
            return Ok(Cow::Borrowed(regex));
        }
        let (expanded, built) = match self.kind {
            PatternKind::Regex => {
                let expanded = resolver.resolve_with(&self.pattern, lookup)?;
                let built = regex_matcher(&expanded);
                (expanded, built)
            }
            // Expanded values are literal text around the hole
            PatternKind::Hole => {
                let (prefix, name, suffix) = split_hole(&self.pattern);
                let prefix = resolver.resolve_with(prefix, &lookup)?;
                let suffix = resolver.resolve_with(suffix, &lookup)?;
                let built = hole_matcher(&prefix, name, &suffix);
                (format!("{}<{}></{}>{}", prefix, name, name, suffix), built)
            }
        };
        built
            .map(Cow::Owned)
            .map_err(|message| CaptureError::InvalidPattern {
                variable: self.name.clone(),
                pattern: expanded,
                message,
            })
    }
}

fn compile(kind: PatternKind, pattern: &str) -> Result<Regex, String> {
    match kind {
        PatternKind::Regex => regex_matcher(pattern),
        PatternKind::Hole => {
            let (prefix, name, suffix) = split_hole(pattern);
            hole_matcher(prefix, name, suffix)
        }
    }
}

fn regex_matcher(pattern: &str) -> Result<Regex, String> {
    let regex = Regex::new(pattern).map_err(|e| e.to_string())?;
    if regex.captures_len() > 2 {
        return Err("at most one capture group is allowed".to_string());
    }
    Ok(regex)
}

fn hole_matcher(prefix: &str, name: &str, suffix: &str) -> Result<Regex, String> {
    let source = format!(
        "(?s){}(.*?){}",
        regex::escape(&format!("{}<{}>", prefix, name)),
        regex::escape(&format!("</{}>{}", name, suffix))
    );
    Regex::new(&source).map_err(|e| e.to_string())
}

/// Outcome of one capture block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureOutcome {
    /// (name, value) in expression order
    pub captured: Vec<(String, String)>,
    /// Names left unset under the `warn` policy
    pub skipped: Vec<String>,
}

/// Applies capture expressions to responses.
#[derive(Debug, Clone, Default)]
pub struct CaptureEngine {
    resolver: VariableResolver,
    policy: CapturePolicy,
}

impl CaptureEngine {
    pub fn new(resolver: VariableResolver, policy: CapturePolicy) -> Self {
        Self { resolver, policy }
    }

    pub fn policy(&self) -> CapturePolicy {
        self.policy
    }

    /// Evaluate one expression and write exactly one variable, or fail without writing.
    pub fn capture(
        &self,
        expr: &CaptureExpression,
        response: &CapturedResponse,
        context: &mut VariableContext,
    ) -> Result<String, CaptureError> {
        let value = self.extract(expr, response, |name| context.get(name))?;
        context.set(expr.name.as_str(), value.as_str());
        Ok(value)
    }

    /// Evaluate a whole block. Later expressions see values captured earlier in the block.
    ///
    /// Under [`CapturePolicy::Fail`] nothing is written unless every expression matches.
    /// Under [`CapturePolicy::Warn`] mismatches are logged and their variables left unset.
    pub fn capture_all(
        &self,
        exprs: &[CaptureExpression],
        response: &CapturedResponse,
        context: &mut VariableContext,
    ) -> Result<CaptureOutcome, CaptureError> {
        let mut staged: HashMap<&str, String> = HashMap::new();
        let mut outcome = CaptureOutcome::default();

        for expr in exprs {
            let lookup = |name: &str| staged.get(name).cloned().or_else(|| context.get(name));
            match self.extract(expr, response, lookup) {
                Ok(value) => {
                    debug!(variable = %expr.name, %value, "Captured");
                    staged.insert(expr.name.as_str(), value.clone());
                    outcome.captured.push((expr.name.clone(), value));
                }
                Err(e) if self.policy == CapturePolicy::Warn && e.is_mismatch() => {
                    warn!(variable = %expr.name, error = %e, "Capture skipped");
                    outcome.skipped.push(expr.name.clone());
                }
                Err(e) => return Err(e),
            }
        }

        for (name, value) in &outcome.captured {
            context.set(name.as_str(), value.as_str());
        }
        Ok(outcome)
    }

    fn extract<F>(
        &self,
        expr: &CaptureExpression,
        response: &CapturedResponse,
        lookup: F,
    ) -> Result<String, CaptureError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let regex = expr.matcher(&self.resolver, lookup)?;
        let haystack = match &expr.source {
            CaptureSource::Body => response.text(),
            CaptureSource::Header(header) => {
                response
                    .header(header)
                    .ok_or_else(|| CaptureError::HeaderNotFound {
                        variable: expr.name.clone(),
                        header: header.clone(),
                    })?
            }
        };
        extractor::extract_match(&regex, haystack).ok_or_else(|| CaptureError::Mismatch {
            variable: expr.name.clone(),
            pattern: expr.pattern.clone(),
        })
    }
}

fn header_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^@([A-Za-z0-9_-]+):\s?(.*)$").unwrap())
}

fn tag_pair_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([A-Za-z_][\w.:-]*)></([A-Za-z_][\w.:-]*)>").unwrap())
}

/// Number of `<X></X>` pairs with matching names.
fn count_holes(pattern: &str) -> usize {
    tag_pair_regex()
        .captures_iter(pattern)
        .filter(|caps| caps.get(1).map(|m| m.as_str()) == caps.get(2).map(|m| m.as_str()))
        .count()
}

/// `(prefix, X, suffix)` around the first `<X></X>` pair.
fn split_hole(pattern: &str) -> (&str, &str, &str) {
    let Some(caps) = tag_pair_regex()
        .captures_iter(pattern)
        .find(|caps| caps.get(1).map(|m| m.as_str()) == caps.get(2).map(|m| m.as_str()))
    else {
        return (pattern, "", "");
    };
    match (caps.get(0), caps.get(1)) {
        (Some(whole), Some(name)) => (
            &pattern[..whole.start()],
            name.as_str(),
            &pattern[whole.end()..],
        ),
        _ => (pattern, "", ""),
    }
}

/// Whether the pattern holds `{...}` expressions to expand before matching.
fn has_placeholders(pattern: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\s*[A-Za-z_]").unwrap())
        .is_match(pattern)
}
