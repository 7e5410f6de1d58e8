pub mod error;
pub mod http;
pub mod logger;
pub mod parser;
pub mod runner;
pub mod variable;

// Re-export commonly used types
pub use error::{Result, WebtestError};
pub use http::{CapturedResponse, Client, HttpTransport, ResolvedRequest};
pub use parser::{RequestTemplate, Scenario, TestCase};
pub use runner::{RunConfig, RunnerFactory, TestPlan, TestSequencer, TestSet};
pub use variable::{MacroRegistry, SharedVariables, VariableContext, VariableResolver};
