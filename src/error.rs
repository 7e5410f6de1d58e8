use thiserror::Error;

use crate::http::TransportError;
use crate::parser::ParseError;
use crate::variable::{CaptureError, ExpressionError};

#[derive(Error, Debug)]
pub enum WebtestError {
    #[error("Malformed scenario: {0}")]
    MalformedScenario(#[from] ParseError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An error raised while handling one request of a numbered test case.
    #[error("test {test_number}, request {request_index}: {source}")]
    Step {
        test_number: u32,
        request_index: usize,
        source: Box<WebtestError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run aborted after a failed test case")]
    RunAborted,

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl WebtestError {
    /// Attach test case and request context to an error.
    pub fn at_step(self, test_number: u32, request_index: usize) -> Self {
        WebtestError::Step {
            test_number,
            request_index,
            source: Box::new(self),
        }
    }

    /// Innermost error, with any step context peeled off.
    pub fn root(&self) -> &WebtestError {
        match self {
            WebtestError::Step { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.root(),
            WebtestError::Transport(TransportError::Timeout { .. })
        )
    }

    pub fn is_capture_mismatch(&self) -> bool {
        matches!(self.root(), WebtestError::Capture(e) if e.is_mismatch())
    }

    pub fn is_malformed_capture(&self) -> bool {
        matches!(
            self.root(),
            WebtestError::Capture(CaptureError::Malformed { .. })
        )
    }
}

impl From<toml::de::Error> for WebtestError {
    fn from(err: toml::de::Error) -> Self {
        WebtestError::Config(err.to_string())
    }
}

/// Result type for the webtest crate
pub type Result<T> = std::result::Result<T, WebtestError>;
