pub mod capture;
pub mod config;
pub mod extractor;
pub mod macros;
pub mod resolver;
pub mod types;

pub use capture::{CaptureEngine, CaptureError, CaptureExpression, CaptureOutcome, CaptureSource};
pub use config::ConfigLoader;
pub use macros::MacroRegistry;
pub use resolver::{Assignments, ExpressionError, VariableResolver};
pub use types::{Environment, SharedVariables, VariableContext, VariableScope, WebtestConfig};
