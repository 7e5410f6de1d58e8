use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::parser::FormParameter;
use crate::variable::VariableContext;

/// Earlier responses in which a request parameter's name appears.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrelationHint {
    pub parameter: String,
    /// Request numbers, oldest first
    pub found_in: Vec<u32>,
}

/// Remembers response bodies per scenario file so later requests can be checked for
/// parameters that probably come from an earlier response and should be captured.
#[derive(Debug, Default)]
pub struct Correlator {
    responses: HashMap<Option<PathBuf>, Vec<(u32, String)>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the body of response `number`, replacing an earlier body with the same number.
    pub fn record(&mut self, scenario: Option<&Path>, number: u32, body: &str) {
        let responses = self
            .responses
            .entry(scenario.map(Path::to_path_buf))
            .or_default();
        match responses.iter_mut().find(|(n, _)| *n == number) {
            Some(entry) => entry.1 = body.to_string(),
            None => responses.push((number, body.to_string())),
        }
    }

    /// Forget every recorded response. Called at the start of each iteration.
    pub fn reset(&mut self) {
        self.responses.clear();
    }

    /// Report parameters that are neither already variables nor empty, with the earlier
    /// responses of the same scenario that contain their name.
    pub fn correlate(
        &self,
        scenario: Option<&Path>,
        parameters: &[FormParameter],
        context: &VariableContext,
    ) -> Vec<CorrelationHint> {
        let key = scenario.map(Path::to_path_buf);
        let Some(responses) = self.responses.get(&key).filter(|r| !r.is_empty()) else {
            return Vec::new();
        };

        let mut hints = Vec::new();
        for param in parameters {
            if context.contains(&param.name) {
                info!(parameter = %param.name, "Parameter already set or captured, skipping");
                continue;
            }
            if param.value.is_empty() {
                continue;
            }

            let found_in: Vec<u32> = responses
                .iter()
                .filter(|(_, body)| body.contains(param.name.as_str()))
                .map(|(number, _)| *number)
                .collect();

            if found_in.is_empty() {
                info!(parameter = %param.name, "Parameter not found in any earlier response");
            } else {
                info!(parameter = %param.name, found_in = ?found_in, "Parameter found in earlier responses");
            }
            hints.push(CorrelationHint {
                parameter: param.name.clone(),
                found_in,
            });
        }
        hints
    }
}
