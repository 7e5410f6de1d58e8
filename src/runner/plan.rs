use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Result, WebtestError};
use crate::parser::{RequestTemplate, Scenario, WebtestParser};
use crate::variable::{CaptureError, CaptureExpression, WebtestConfig};

/// First test case number; each test case gets a block of this size.
pub const TEST_NUMBER_BLOCK: u32 = 1000;

/// Scenario files that run together, in order, in one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSet {
    pub files: Vec<PathBuf>,
    /// Relative probability under weighted sequencing
    pub weight: f64,
}

impl TestSet {
    pub fn new<P: Into<PathBuf>>(files: impl IntoIterator<Item = P>) -> Self {
        Self {
            files: files.into_iter().map(Into::into).collect(),
            weight: 1.0,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// A request ready to run: its number and its compiled capture block.
#[derive(Debug, Clone)]
pub struct PlannedRequest {
    pub number: u32,
    /// Position within the test case, from 0
    pub index: usize,
    pub template: RequestTemplate,
    pub captures: Vec<CaptureExpression>,
}

#[derive(Debug, Clone)]
pub struct PlannedTestCase {
    pub number: u32,
    pub name: String,
    pub source_path: Option<PathBuf>,
    pub requests: Vec<PlannedRequest>,
    /// First capture block that failed to compile, with its request index. Such a test case
    /// fails every time it is selected, without sending anything.
    pub invalid_capture: Option<(usize, CaptureError)>,
}

impl PlannedTestCase {
    pub fn is_runnable(&self) -> bool {
        self.invalid_capture.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct PlannedSet {
    pub weight: f64,
    pub test_cases: Vec<Arc<PlannedTestCase>>,
}

/// Every scenario of a run, parsed once and numbered.
#[derive(Debug, Clone, Default)]
pub struct TestPlan {
    pub before_set: Option<PlannedSet>,
    pub sets: Vec<PlannedSet>,
    pub after_set: Option<PlannedSet>,
}

impl TestPlan {
    pub fn builder() -> TestPlanBuilder {
        TestPlanBuilder::default()
    }

    /// All files as one test set.
    pub fn from_files<P: Into<PathBuf>>(files: impl IntoIterator<Item = P>) -> Result<Self> {
        Self::builder().test_set(TestSet::new(files)).build()
    }

    pub fn from_config(config: &WebtestConfig) -> Result<Self> {
        let mut builder = Self::builder();
        if !config.before_set.is_empty() {
            builder = builder.before_set(TestSet::new(config.before_set.iter().cloned()));
        }
        for set in &config.test_sets {
            builder =
                builder.test_set(TestSet::new(set.files.iter().cloned()).with_weight(set.weight));
        }
        if !config.after_set.is_empty() {
            builder = builder.after_set(TestSet::new(config.after_set.iter().cloned()));
        }
        builder.build()
    }

    pub fn test_cases(&self) -> impl Iterator<Item = &Arc<PlannedTestCase>> {
        self.before_set
            .iter()
            .chain(self.sets.iter())
            .chain(self.after_set.iter())
            .flat_map(|set| set.test_cases.iter())
    }

    pub fn weights(&self) -> Vec<f64> {
        self.sets.iter().map(|s| s.weight).collect()
    }
}

enum SetSource {
    Files(TestSet),
    Scenarios { scenarios: Vec<Scenario>, weight: f64 },
}

#[derive(Default)]
pub struct TestPlanBuilder {
    before_set: Option<SetSource>,
    sets: Vec<SetSource>,
    after_set: Option<SetSource>,
}

impl TestPlanBuilder {
    pub fn before_set(mut self, set: TestSet) -> Self {
        self.before_set = Some(SetSource::Files(set));
        self
    }

    pub fn after_set(mut self, set: TestSet) -> Self {
        self.after_set = Some(SetSource::Files(set));
        self
    }

    pub fn test_set(mut self, set: TestSet) -> Self {
        self.sets.push(SetSource::Files(set));
        self
    }

    /// A test set made of already parsed scenarios.
    pub fn scenario_set(mut self, scenarios: Vec<Scenario>, weight: f64) -> Self {
        self.sets.push(SetSource::Scenarios { scenarios, weight });
        self
    }

    pub fn before_scenarios(mut self, scenarios: Vec<Scenario>) -> Self {
        self.before_set = Some(SetSource::Scenarios {
            scenarios,
            weight: 1.0,
        });
        self
    }

    pub fn after_scenarios(mut self, scenarios: Vec<Scenario>) -> Self {
        self.after_set = Some(SetSource::Scenarios {
            scenarios,
            weight: 1.0,
        });
        self
    }

    /// Parse, number and compile everything. Numbering follows the order
    /// before set, test sets, after set; a file listed twice keeps its first numbers.
    /// A malformed capture expression marks only its own test case as failing.
    pub fn build(self) -> Result<TestPlan> {
        let mut numberer = Numberer::default();

        let before_set = self
            .before_set
            .map(|source| numberer.plan_set(source))
            .transpose()?;
        let sets = self
            .sets
            .into_iter()
            .map(|source| numberer.plan_set(source))
            .collect::<Result<Vec<_>>>()?;
        let after_set = self
            .after_set
            .map(|source| numberer.plan_set(source))
            .transpose()?;

        let plan = TestPlan {
            before_set,
            sets,
            after_set,
        };
        info!(
            test_sets = plan.sets.len(),
            test_cases = plan.test_cases().count(),
            "Test plan loaded"
        );
        Ok(plan)
    }
}

#[derive(Default)]
struct Numberer {
    next_block: u32,
    by_path: HashMap<PathBuf, Vec<Arc<PlannedTestCase>>>,
}

impl Numberer {
    fn plan_set(&mut self, source: SetSource) -> Result<PlannedSet> {
        match source {
            SetSource::Files(set) => {
                let mut test_cases = Vec::new();
                for file in &set.files {
                    test_cases.extend(self.plan_file(file)?);
                }
                Ok(PlannedSet {
                    weight: set.weight,
                    test_cases,
                })
            }
            SetSource::Scenarios { scenarios, weight } => {
                let mut test_cases = Vec::new();
                for scenario in scenarios {
                    test_cases.extend(self.plan_scenario(scenario)?);
                }
                Ok(PlannedSet { weight, test_cases })
            }
        }
    }

    fn plan_file(&mut self, path: &Path) -> Result<Vec<Arc<PlannedTestCase>>> {
        if let Some(cached) = self.by_path.get(path) {
            return Ok(cached.clone());
        }
        let scenario = WebtestParser::parse_file(path)?;
        let planned = self.plan_scenario(scenario)?;
        self.by_path.insert(path.to_path_buf(), planned.clone());
        Ok(planned)
    }

    fn plan_scenario(&mut self, scenario: Scenario) -> Result<Vec<Arc<PlannedTestCase>>> {
        let source_path = scenario.source_path;
        let mut planned = Vec::with_capacity(scenario.test_cases.len());

        for test_case in scenario.test_cases {
            let number = self.allocate()?;
            let name = match (&test_case.name, &source_path) {
                (Some(name), _) => name.clone(),
                (None, Some(path)) => path.display().to_string(),
                (None, None) => test_case.label().to_string(),
            };
            if test_case.requests.len() >= TEST_NUMBER_BLOCK as usize {
                return Err(WebtestError::Config(format!(
                    "test case '{}' has {} requests; at most {} are supported",
                    name,
                    test_case.requests.len(),
                    TEST_NUMBER_BLOCK - 1
                )));
            }

            let mut requests = Vec::with_capacity(test_case.requests.len());
            let mut invalid_capture = None;
            for (index, template) in test_case.requests.into_iter().enumerate() {
                let captures = match CaptureExpression::parse_all(&template.captures) {
                    Ok(captures) => captures,
                    Err(e) => {
                        warn!(
                            test_number = number,
                            request_index = index,
                            error = %e,
                            "Test case will fail: invalid capture expression"
                        );
                        if invalid_capture.is_none() {
                            invalid_capture = Some((index, e));
                        }
                        Vec::new()
                    }
                };
                requests.push(PlannedRequest {
                    number: number + index as u32 + 1,
                    index,
                    template,
                    captures,
                });
            }

            debug!(test_number = number, name = %name, requests = requests.len(), "Planned test case");
            planned.push(Arc::new(PlannedTestCase {
                number,
                name,
                source_path: source_path.clone(),
                requests,
                invalid_capture,
            }));
        }
        Ok(planned)
    }

    fn allocate(&mut self) -> Result<u32> {
        let number = self.next_block.max(TEST_NUMBER_BLOCK);
        self.next_block = number
            .checked_add(TEST_NUMBER_BLOCK)
            .ok_or_else(|| WebtestError::Config("too many test cases".to_string()))?;
        Ok(number)
    }
}
