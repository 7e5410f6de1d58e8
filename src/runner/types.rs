use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::WebtestError;
use crate::http::Method;
use crate::runner::correlate::CorrelationHint;
use crate::variable::VariableScope;

/// How a worker picks test sets for each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sequence {
    /// Every test set, in order
    #[default]
    Sequential,
    /// One test set chosen uniformly at random
    Random,
    /// One test set chosen with probability proportional to its weight
    Weighted,
    /// The test set at `worker_id % set_count`
    Thread,
}

impl FromStr for Sequence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(Sequence::Sequential),
            "random" => Ok(Sequence::Random),
            "weighted" => Ok(Sequence::Weighted),
            "thread" => Ok(Sequence::Thread),
            other => Err(format!(
                "sequence must be 'sequential', 'random', 'weighted' or 'thread', got '{}'",
                other
            )),
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Sequence::Sequential => "sequential",
            Sequence::Random => "random",
            Sequence::Weighted => "weighted",
            Sequence::Thread => "thread",
        };
        f.write_str(name)
    }
}

/// What happens to the rest of a run after a test case fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Continue,
    Abort,
}

/// What a capture mismatch does to the test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapturePolicy {
    /// The test case fails
    #[default]
    Fail,
    /// Log a warning and leave the variable unset
    Warn,
}

/// Per-test-case lifecycle. `Done` goes back to `Pending` on the next selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TestCaseState {
    Pending,
    Evaluating,
    Executing,
    Capturing,
    Done,
    Failed,
}

/// Run-wide settings.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub sequence: Sequence,

    /// Pause after each request
    pub think_time: Duration,

    /// Per-request timeout unless the request sets its own
    pub timeout: Duration,

    pub on_failure: FailurePolicy,

    pub on_capture_mismatch: CapturePolicy,

    /// Scope for variables that are neither local nor global yet
    pub capture_scope: VariableScope,

    /// Report request parameters that appear in earlier responses
    pub correlate: bool,

    /// RNG seed for random and weighted sequencing
    pub seed: Option<u64>,

    /// Headers added to every request that does not set them
    pub default_headers: Vec<(String, String)>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sequence: Sequence::default(),
            think_time: Duration::ZERO,
            timeout: Duration::from_secs(30),
            on_failure: FailurePolicy::default(),
            on_capture_mismatch: CapturePolicy::default(),
            capture_scope: VariableScope::default(),
            correlate: false,
            seed: None,
            default_headers: Vec::new(),
        }
    }
}

/// Result of one request.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// Request number (test case block + index + 1)
    pub number: u32,

    pub description: String,

    pub method: Method,

    /// Resolved URL, or the template when resolution failed
    pub url: String,

    pub status: Option<u16>,

    pub duration: Duration,

    /// Response received with a status below 400
    pub success: bool,

    pub error: Option<String>,

    /// Variables written by the capture block
    pub captured: Vec<(String, String)>,

    pub correlations: Vec<CorrelationHint>,
}

/// Result of one test case.
#[derive(Debug)]
pub struct TestCaseReport {
    pub number: u32,
    pub name: String,
    pub source_path: Option<PathBuf>,
    pub state: TestCaseState,
    pub requests: Vec<RequestOutcome>,
    pub error: Option<WebtestError>,
}

impl TestCaseReport {
    pub fn new(number: u32, name: impl Into<String>, source_path: Option<PathBuf>) -> Self {
        Self {
            number,
            name: name.into(),
            source_path,
            state: TestCaseState::Pending,
            requests: Vec::new(),
            error: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.state == TestCaseState::Done && self.requests.iter().all(|r| r.success)
    }

    pub fn duration(&self) -> Duration {
        self.requests.iter().map(|r| r.duration).sum()
    }
}

/// Result of one iteration of one worker.
#[derive(Debug)]
pub struct IterationReport {
    pub iteration: u64,
    pub worker: usize,
    pub test_cases: Vec<TestCaseReport>,
    /// The run was aborted or cancelled before the iteration completed
    pub aborted: bool,
}

impl IterationReport {
    pub fn new(iteration: u64, worker: usize) -> Self {
        Self {
            iteration,
            worker,
            test_cases: Vec::new(),
            aborted: false,
        }
    }

    pub fn passed(&self) -> bool {
        !self.aborted && self.test_cases.iter().all(TestCaseReport::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestCaseReport> {
        self.test_cases.iter().filter(|tc| !tc.passed())
    }
}

/// Totals over a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestSummary {
    pub iterations: usize,
    pub test_cases: usize,
    pub passed: usize,
    pub failed: usize,
    pub requests: usize,
    pub failed_requests: usize,
    pub total_duration: Duration,
}

impl TestSummary {
    pub fn from_reports<'a>(reports: impl IntoIterator<Item = &'a IterationReport>) -> Self {
        let mut summary = TestSummary::default();
        for report in reports {
            summary.iterations += 1;
            for tc in &report.test_cases {
                summary.test_cases += 1;
                if tc.passed() {
                    summary.passed += 1;
                } else {
                    summary.failed += 1;
                }
                summary.requests += tc.requests.len();
                summary.failed_requests += tc.requests.iter().filter(|r| !r.success).count();
                summary.total_duration += tc.duration();
            }
        }
        summary
    }
}
