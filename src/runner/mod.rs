pub mod correlate;
pub mod executor;
pub mod plan;
pub mod reporter;
pub mod sequencer;
pub mod types;

pub use correlate::{CorrelationHint, Correlator};
pub use executor::RequestExecutor;
pub use plan::{PlannedRequest, PlannedSet, PlannedTestCase, TestPlan, TestPlanBuilder, TestSet};
pub use reporter::TestReporter;
pub use sequencer::{RunControl, RunnerFactory, TestSequencer};
pub use types::{
    CapturePolicy, FailurePolicy, IterationReport, RequestOutcome, RunConfig, Sequence,
    TestCaseReport, TestCaseState, TestSummary,
};
