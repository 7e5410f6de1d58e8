use rand::distr::weighted::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{Result, WebtestError};
use crate::http::HttpTransport;
use crate::runner::correlate::Correlator;
use crate::runner::executor::RequestExecutor;
use crate::runner::plan::{PlannedRequest, PlannedTestCase, TestPlan};
use crate::runner::types::{
    FailurePolicy, IterationReport, RequestOutcome, RunConfig, Sequence, TestCaseReport,
    TestCaseState,
};
use crate::variable::{
    CaptureEngine, MacroRegistry, SharedVariables, VariableContext, VariableResolver,
};

/// Stop flags shared by every worker of a run.
#[derive(Debug, Default)]
pub struct RunControl {
    aborted: AtomicBool,
    cancelled: AtomicBool,
}

impl RunControl {
    /// Ask every worker to stop selecting test cases.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.is_aborted() || self.is_cancelled()
    }

    fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(WebtestError::RunAborted)
        } else if self.is_cancelled() {
            Err(WebtestError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Builds one [`TestSequencer`] per worker. Workers share the plan, the run configuration,
/// the transport and the global variable scope.
pub struct RunnerFactory<T> {
    plan: Arc<TestPlan>,
    config: Arc<RunConfig>,
    transport: Arc<T>,
    globals: SharedVariables,
    variables: HashMap<String, String>,
    macros: Arc<MacroRegistry>,
    control: Arc<RunControl>,
    weighted: Option<WeightedIndex<f64>>,
}

impl<T: HttpTransport> RunnerFactory<T> {
    pub fn new(plan: TestPlan, config: RunConfig, transport: Arc<T>) -> Result<Self> {
        if plan.sets.is_empty() {
            return Err(WebtestError::Config(
                "a run needs at least one test set".to_string(),
            ));
        }

        let weights = plan.weights();
        if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(WebtestError::Config(format!(
                "test set weight must be a non-negative number, got {}",
                bad
            )));
        }

        let weighted = if config.sequence == Sequence::Weighted {
            let dist = WeightedIndex::new(&weights).map_err(|e| {
                WebtestError::Config(format!("invalid test set weights {:?}: {}", weights, e))
            })?;
            Some(dist)
        } else {
            None
        };

        info!(
            sequence = %config.sequence,
            test_sets = plan.sets.len(),
            "Runner ready"
        );

        Ok(Self {
            plan: Arc::new(plan),
            config: Arc::new(config),
            transport,
            globals: SharedVariables::new(),
            variables: HashMap::new(),
            macros: Arc::new(MacroRegistry::with_builtins()),
            control: Arc::new(RunControl::default()),
            weighted,
        })
    }

    /// Shared scope handed to every worker.
    pub fn with_globals(mut self, globals: SharedVariables) -> Self {
        self.globals = globals;
        self
    }

    /// Initial local variables of each worker.
    pub fn with_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_macros(mut self, macros: MacroRegistry) -> Self {
        self.macros = Arc::new(macros);
        self
    }

    pub fn globals(&self) -> &SharedVariables {
        &self.globals
    }

    pub fn control(&self) -> Arc<RunControl> {
        Arc::clone(&self.control)
    }

    pub fn plan(&self) -> &TestPlan {
        &self.plan
    }

    pub fn worker(&self, worker_id: usize) -> TestSequencer<T> {
        let mut context = VariableContext::with_globals(self.globals.clone())
            .with_capture_scope(self.config.capture_scope);
        context.extend(self.variables.clone());

        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(worker_id as u64)),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        let resolver = VariableResolver::new(Arc::clone(&self.macros));
        TestSequencer {
            worker_id,
            plan: Arc::clone(&self.plan),
            config: Arc::clone(&self.config),
            control: Arc::clone(&self.control),
            executor: RequestExecutor::new(Arc::clone(&self.transport), resolver.clone())
                .with_default_headers(self.config.default_headers.clone()),
            captures: CaptureEngine::new(resolver, self.config.on_capture_mismatch),
            context,
            rng,
            weighted: self.weighted.clone(),
            correlator: Correlator::new(),
            iteration: 0,
            started: false,
            finished: false,
        }
    }
}

/// Drives the iterations of one worker.
///
/// The worker owns its local variables, which persist across iterations, and reads and writes
/// the run's global scope. Requests of a test case run strictly in document order.
pub struct TestSequencer<T> {
    worker_id: usize,
    plan: Arc<TestPlan>,
    config: Arc<RunConfig>,
    control: Arc<RunControl>,
    executor: RequestExecutor<T>,
    captures: CaptureEngine,
    context: VariableContext,
    rng: StdRng,
    weighted: Option<WeightedIndex<f64>>,
    correlator: Correlator,
    iteration: u64,
    started: bool,
    finished: bool,
}

impl<T: HttpTransport> TestSequencer<T> {
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn context(&self) -> &VariableContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut VariableContext {
        &mut self.context
    }

    /// Indexes of the test sets the next iteration runs.
    pub fn select_sets(&mut self) -> Vec<usize> {
        let count = self.plan.sets.len();
        match self.config.sequence {
            Sequence::Sequential => (0..count).collect(),
            Sequence::Random => vec![self.rng.random_range(0..count)],
            Sequence::Weighted => match &self.weighted {
                Some(dist) => vec![dist.sample(&mut self.rng)],
                None => (0..count).collect(),
            },
            Sequence::Thread => vec![self.worker_id % count],
        }
    }

    /// Run one iteration. The first iteration of a worker starts with the before set.
    ///
    /// Fails with [`WebtestError::RunAborted`] once any worker aborted the run, and with
    /// [`WebtestError::Cancelled`] after [`RunControl::cancel`].
    pub async fn run_iteration(&mut self) -> Result<IterationReport> {
        self.control.check()?;
        self.iteration += 1;
        self.correlator.reset();

        let plan = Arc::clone(&self.plan);
        let mut queue: Vec<Arc<PlannedTestCase>> = Vec::new();
        if !self.started {
            self.started = true;
            if let Some(before) = &plan.before_set {
                queue.extend(before.test_cases.iter().cloned());
            }
        }
        for index in self.select_sets() {
            queue.extend(plan.sets[index].test_cases.iter().cloned());
        }

        info!(
            worker = self.worker_id,
            iteration = self.iteration,
            test_cases = queue.len(),
            "Starting iteration"
        );
        let mut report = IterationReport::new(self.iteration, self.worker_id);
        self.run_queue(queue, &mut report).await;
        Ok(report)
    }

    /// Run the after set once, if this worker ran at all and the run was not cancelled.
    pub async fn finish(&mut self) -> Option<IterationReport> {
        if self.finished || !self.started || self.control.is_cancelled() {
            return None;
        }
        self.finished = true;
        self.correlator.reset();
        let after = self.plan.after_set.as_ref()?;
        let queue: Vec<_> = after.test_cases.to_vec();

        info!(worker = self.worker_id, test_cases = queue.len(), "Running after set");
        let mut report = IterationReport::new(self.iteration, self.worker_id);
        for test_case in queue {
            let tc_report = self.run_test_case(&test_case).await;
            report.test_cases.push(tc_report);
        }
        Some(report)
    }

    async fn run_queue(&mut self, queue: Vec<Arc<PlannedTestCase>>, report: &mut IterationReport) {
        for test_case in queue {
            if self.control.is_stopped() {
                report.aborted = true;
                break;
            }

            let tc_report = self.run_test_case(&test_case).await;
            let failed = tc_report.state == TestCaseState::Failed;
            report.test_cases.push(tc_report);

            if failed && self.config.on_failure == FailurePolicy::Abort {
                warn!(
                    worker = self.worker_id,
                    test_number = test_case.number,
                    "Aborting run after failed test case"
                );
                self.control.abort();
                report.aborted = true;
                break;
            }
        }
    }

    async fn run_test_case(&mut self, test_case: &PlannedTestCase) -> TestCaseReport {
        let mut report = TestCaseReport::new(
            test_case.number,
            test_case.name.clone(),
            test_case.source_path.clone(),
        );
        info!(
            worker = self.worker_id,
            test_number = test_case.number,
            name = %test_case.name,
            "Running test case"
        );

        if let Some((index, err)) = &test_case.invalid_capture {
            error!(
                worker = self.worker_id,
                test_number = test_case.number,
                request_index = index,
                error = %err,
                "Test case not run"
            );
            report.state = TestCaseState::Failed;
            report.error = Some(WebtestError::from(err.clone()).at_step(test_case.number, *index));
            return report;
        }

        for request in &test_case.requests {
            let mut outcome = RequestOutcome {
                number: request.number,
                description: request.template.description.clone(),
                method: request.template.method,
                url: request.template.url.clone(),
                status: None,
                duration: Duration::ZERO,
                success: false,
                error: None,
                captured: Vec::new(),
                correlations: Vec::new(),
            };

            let result = self
                .run_request(test_case, request, &mut report.state, &mut outcome)
                .await;
            if let Err(err) = result {
                error!(
                    worker = self.worker_id,
                    test_number = test_case.number,
                    request_index = request.index,
                    error = %err,
                    "Test case failed"
                );
                outcome.success = false;
                outcome.error = Some(err.to_string());
                report.requests.push(outcome);
                report.state = TestCaseState::Failed;
                report.error = Some(err.at_step(test_case.number, request.index));
                return report;
            }
            report.requests.push(outcome);
        }

        report.state = TestCaseState::Done;
        report
    }

    async fn run_request(
        &mut self,
        test_case: &PlannedTestCase,
        request: &PlannedRequest,
        state: &mut TestCaseState,
        outcome: &mut RequestOutcome,
    ) -> Result<()> {
        let template = &request.template;
        let scenario = test_case.source_path.as_deref();

        *state = TestCaseState::Evaluating;
        self.context.pin_globals();
        let resolved = self.executor.resolve(template, &self.context);
        self.context.release_globals();
        let (resolved, assignments) = resolved?;
        outcome.url = resolved.url.clone();

        if self.config.correlate {
            outcome.correlations =
                self.correlator
                    .correlate(scenario, template.form_parameters(), &self.context);
        }

        *state = TestCaseState::Executing;
        let timeout = template.timeout.unwrap_or(self.config.timeout);
        let started = Instant::now();
        let response = self.executor.execute(&resolved, timeout).await?;
        outcome.duration = started.elapsed();
        assignments.commit(&mut self.context);
        outcome.status = Some(response.status.code());
        outcome.success = !response.is_error();
        debug!(
            test_number = request.number,
            status = response.status.code(),
            body = %response.body,
            "Response received"
        );

        if self.config.correlate {
            self.correlator
                .record(scenario, request.number, &response.body);
        }

        *state = TestCaseState::Capturing;
        let captured = self
            .captures
            .capture_all(&request.captures, &response, &mut self.context)?;
        outcome.captured = captured.captured;

        info!(
            worker = self.worker_id,
            test_number = request.number,
            request_index = request.index,
            method = %resolved.method,
            url = %resolved.url,
            status = response.status.code(),
            duration_ms = outcome.duration.as_millis() as u64,
            "Request completed"
        );

        let think_time = template.think_time.unwrap_or(self.config.think_time);
        if !think_time.is_zero() {
            tokio::time::sleep(think_time).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{CapturedResponse, ResolvedRequest, TransportError};
    use crate::parser::{Scenario, parse_content};
    use crate::runner::types::CapturePolicy;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubTransport {
        routes: HashMap<String, (u16, String)>,
        calls: Mutex<Vec<String>>,
    }

    impl StubTransport {
        fn route(mut self, url: &str, status: u16, body: &str) -> Self {
            self.routes
                .insert(url.to_string(), (status, body.to_string()));
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl HttpTransport for StubTransport {
        async fn send(
            &self,
            request: &ResolvedRequest,
            _timeout: Duration,
        ) -> std::result::Result<CapturedResponse, TransportError> {
            self.calls.lock().unwrap().push(request.url.clone());
            let (status, body) = self
                .routes
                .get(&request.url)
                .cloned()
                .unwrap_or((404, String::new()));
            Ok(CapturedResponse::from_body(status, body))
        }
    }

    struct SlowTransport;

    impl HttpTransport for SlowTransport {
        async fn send(
            &self,
            _request: &ResolvedRequest,
            _timeout: Duration,
        ) -> std::result::Result<CapturedResponse, TransportError> {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(CapturedResponse::from_body(200, "late"))
        }
    }

    fn scenario(name: &str, requests: &str) -> Scenario {
        parse_content(&format!(
            r#"<TestCase Name="{}"><Items>{}</Items></TestCase>"#,
            name, requests
        ))
        .unwrap()
    }

    fn get(url: &str) -> String {
        format!(r#"<Request Method="GET" Url="{}" />"#, url)
    }

    fn login_scenario() -> Scenario {
        scenario(
            "login",
            r#"<Request Method="GET" Url="http://app/login">
                 <Capture><![CDATA[{SID = <sid></sid>}]]></Capture>
               </Request>
               <Request Method="GET" Url="http://app/home?sid={SID}" />"#,
        )
    }

    fn factory(
        plan: TestPlan,
        config: RunConfig,
        transport: StubTransport,
    ) -> RunnerFactory<StubTransport> {
        RunnerFactory::new(plan, config, Arc::new(transport)).unwrap()
    }

    #[tokio::test]
    async fn test_capture_feeds_next_request() {
        let transport = StubTransport::default()
            .route("http://app/login", 200, "<sid>abc123</sid>")
            .route("http://app/home?sid=abc123", 200, "welcome");
        let plan = TestPlan::builder()
            .scenario_set(vec![login_scenario()], 1.0)
            .build()
            .unwrap();
        let factory = factory(plan, RunConfig::default(), transport);
        let mut worker = factory.worker(0);

        let report = worker.run_iteration().await.unwrap();
        assert!(report.passed());
        let tc = &report.test_cases[0];
        assert_eq!(tc.number, 1000);
        assert_eq!(tc.requests[0].number, 1001);
        assert_eq!(
            tc.requests[0].captured,
            vec![("SID".to_string(), "abc123".to_string())]
        );
        assert_eq!(tc.requests[1].url, "http://app/home?sid=abc123");
        assert_eq!(worker.context().get("SID").as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_capture_mismatch_fails_test_case() {
        let transport = StubTransport::default().route("http://app/login", 200, "no session");
        let plan = TestPlan::builder()
            .scenario_set(vec![login_scenario()], 1.0)
            .build()
            .unwrap();
        let transport = Arc::new(transport);
        let factory =
            RunnerFactory::new(plan, RunConfig::default(), Arc::clone(&transport)).unwrap();
        let mut worker = factory.worker(0);

        let report = worker.run_iteration().await.unwrap();
        let tc = &report.test_cases[0];
        assert_eq!(tc.state, TestCaseState::Failed);
        assert_eq!(tc.requests.len(), 1);
        let err = tc.error.as_ref().unwrap();
        assert!(err.is_capture_mismatch());
        assert!(matches!(
            err,
            WebtestError::Step {
                test_number: 1000,
                request_index: 0,
                ..
            }
        ));
        assert!(!worker.context().contains("SID"));
        assert_eq!(transport.calls(), vec!["http://app/login"]);
    }

    #[tokio::test]
    async fn test_capture_mismatch_warn_policy_continues() {
        let transport = StubTransport::default().route("http://app/login", 200, "no session");
        let plan = TestPlan::builder()
            .scenario_set(vec![login_scenario()], 1.0)
            .build()
            .unwrap();
        let config = RunConfig {
            on_capture_mismatch: CapturePolicy::Warn,
            ..RunConfig::default()
        };
        let factory = factory(plan, config, transport);
        let mut worker = factory.worker(0);

        let report = worker.run_iteration().await.unwrap();
        let tc = &report.test_cases[0];
        // the second request cannot resolve {SID}
        assert_eq!(tc.state, TestCaseState::Failed);
        assert_eq!(tc.requests.len(), 2);
        assert!(tc.requests[0].success);
        assert!(matches!(
            tc.error.as_ref().unwrap().root(),
            WebtestError::Expression(_)
        ));
    }

    #[tokio::test]
    async fn test_error_status_is_unsuccessful_but_not_fatal() {
        let transport = StubTransport::default().route("http://app/b", 200, "");
        let plan = TestPlan::builder()
            .scenario_set(
                vec![scenario(
                    "status",
                    &format!("{}{}", get("http://app/a"), get("http://app/b")),
                )],
                1.0,
            )
            .build()
            .unwrap();
        let factory = factory(plan, RunConfig::default(), transport);
        let report = factory.worker(0).run_iteration().await.unwrap();

        let tc = &report.test_cases[0];
        assert_eq!(tc.state, TestCaseState::Done);
        assert_eq!(tc.requests[0].status, Some(404));
        assert!(!tc.requests[0].success);
        assert!(tc.requests[1].success);
        assert!(!tc.passed());
    }

    #[tokio::test]
    async fn test_assignment_committed_after_response() {
        let transport = StubTransport::default()
            .route("http://app/orders/42", 200, "created")
            .route("http://app/orders/42/items", 200, "items");
        let plan = TestPlan::builder()
            .scenario_set(
                vec![scenario(
                    "order",
                    &[
                        get("http://app/orders/{ORDER = 42}"),
                        get("http://app/orders/{ORDER}/items"),
                    ]
                    .concat(),
                )],
                1.0,
            )
            .build()
            .unwrap();
        let factory = factory(plan, RunConfig::default(), transport);
        let mut worker = factory.worker(0);

        let report = worker.run_iteration().await.unwrap();
        assert!(report.passed());
        assert_eq!(worker.context().get("ORDER").as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_timed_out_request_leaves_assignment_unset() {
        let plan = TestPlan::builder()
            .scenario_set(
                vec![scenario(
                    "order",
                    r#"<Request Method="GET" Url="http://app/slow?id={ORDER = random_digits(6)}" Timeout="0.05" />"#,
                )],
                1.0,
            )
            .build()
            .unwrap();
        let factory = RunnerFactory::new(plan, RunConfig::default(), Arc::new(SlowTransport)).unwrap();
        let mut worker = factory.worker(0);

        let report = worker.run_iteration().await.unwrap();
        let tc = &report.test_cases[0];
        assert_eq!(tc.state, TestCaseState::Failed);
        assert!(tc.error.as_ref().unwrap().is_timeout());
        assert!(tc.requests[0].url.starts_with("http://app/slow?id="));
        assert!(!worker.context().contains("ORDER"));
    }

    #[tokio::test]
    async fn test_unresolved_request_leaves_assignment_unset() {
        let transport = Arc::new(StubTransport::default());
        let plan = TestPlan::builder()
            .scenario_set(
                vec![scenario(
                    "order",
                    r#"<Request Method="GET" Url="http://app/{ORDER = 42}">
                         <Headers><Header Name="X-Token" Value="{TOKEN}" /></Headers>
                       </Request>"#,
                )],
                1.0,
            )
            .build()
            .unwrap();
        let factory =
            RunnerFactory::new(plan, RunConfig::default(), Arc::clone(&transport)).unwrap();
        let mut worker = factory.worker(0);

        let report = worker.run_iteration().await.unwrap();
        assert_eq!(report.test_cases[0].state, TestCaseState::Failed);
        assert!(!worker.context().contains("ORDER"));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_correlation_looks_only_at_current_iteration() {
        let transport = StubTransport::default().route(
            "http://app/form",
            200,
            r#"<input name="csrf_token" value="x">"#,
        );
        let plan = TestPlan::builder()
            .scenario_set(
                vec![scenario(
                    "form",
                    &[
                        get("http://app/form"),
                        r#"<Request Method="POST" Url="http://app/form">
                             <FormPostHttpBody>
                               <FormPostParameter Name="csrf_token" Value="recorded" />
                             </FormPostHttpBody>
                           </Request>"#
                            .to_string(),
                    ]
                    .concat(),
                )],
                1.0,
            )
            .build()
            .unwrap();
        let config = RunConfig {
            correlate: true,
            ..RunConfig::default()
        };
        let factory = factory(plan, config, transport);
        let mut worker = factory.worker(0);

        for _ in 0..4 {
            let report = worker.run_iteration().await.unwrap();
            let hints = &report.test_cases[0].requests[1].correlations;
            assert_eq!(hints.len(), 1);
            assert_eq!(hints[0].parameter, "csrf_token");
            assert_eq!(hints[0].found_in, vec![1001]);
        }
    }

    #[tokio::test]
    async fn test_malformed_capture_fails_only_its_test_case() {
        let transport = Arc::new(StubTransport::default().route("http://app/ok", 200, "fine"));
        let broken = scenario(
            "broken",
            r#"<Request Method="GET" Url="http://app/broken">
                 <Capture><![CDATA[{SESSION_ID != <SID></SID>}]]></Capture>
               </Request>"#,
        );
        let plan = TestPlan::builder()
            .scenario_set(vec![broken, scenario("fine", &get("http://app/ok"))], 1.0)
            .build()
            .unwrap();
        let factory =
            RunnerFactory::new(plan, RunConfig::default(), Arc::clone(&transport)).unwrap();
        let mut worker = factory.worker(0);

        let report = worker.run_iteration().await.unwrap();
        let (broken, fine) = (&report.test_cases[0], &report.test_cases[1]);
        assert_eq!(broken.state, TestCaseState::Failed);
        assert!(broken.requests.is_empty());
        let err = broken.error.as_ref().unwrap();
        assert!(err.is_malformed_capture());
        assert!(matches!(
            err,
            WebtestError::Step {
                test_number: 1000,
                request_index: 0,
                ..
            }
        ));
        assert!(fine.passed());
        assert_eq!(transport.calls(), vec!["http://app/ok"]);
    }

    #[tokio::test]
    async fn test_thread_partitioning() {
        let plan = TestPlan::builder()
            .scenario_set(vec![scenario("a", &get("http://app/a"))], 1.0)
            .scenario_set(vec![scenario("b", &get("http://app/b"))], 1.0)
            .build()
            .unwrap();
        let config = RunConfig {
            sequence: Sequence::Thread,
            ..RunConfig::default()
        };
        let factory = factory(plan, config, StubTransport::default());

        for (worker_id, expected) in [(0, "a"), (1, "b"), (2, "a"), (3, "b")] {
            let mut worker = factory.worker(worker_id);
            for _ in 0..3 {
                let report = worker.run_iteration().await.unwrap();
                assert_eq!(report.test_cases.len(), 1);
                assert_eq!(report.test_cases[0].name, expected);
            }
        }
    }

    #[tokio::test]
    async fn test_sequential_runs_every_set_in_order() {
        let plan = TestPlan::builder()
            .scenario_set(vec![scenario("a", &get("http://app/a"))], 1.0)
            .scenario_set(vec![scenario("b", &get("http://app/b"))], 1.0)
            .build()
            .unwrap();
        let factory = factory(plan, RunConfig::default(), StubTransport::default());
        let report = factory.worker(5).run_iteration().await.unwrap();

        let names: Vec<&str> = report.test_cases.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_before_and_after_sets_run_once() {
        let transport = Arc::new(StubTransport::default());
        let plan = TestPlan::builder()
            .before_scenarios(vec![scenario("login", &get("http://app/login"))])
            .scenario_set(vec![scenario("work", &get("http://app/work"))], 1.0)
            .after_scenarios(vec![scenario("logout", &get("http://app/logout"))])
            .build()
            .unwrap();
        let factory =
            RunnerFactory::new(plan, RunConfig::default(), Arc::clone(&transport)).unwrap();
        let mut worker = factory.worker(0);

        worker.run_iteration().await.unwrap();
        worker.run_iteration().await.unwrap();
        assert!(worker.finish().await.is_some());
        assert!(worker.finish().await.is_none());

        assert_eq!(
            transport.calls(),
            vec![
                "http://app/login",
                "http://app/work",
                "http://app/work",
                "http://app/logout",
            ]
        );
    }

    #[tokio::test]
    async fn test_abort_policy_stops_every_worker() {
        let plan = TestPlan::builder()
            .scenario_set(
                vec![
                    scenario("broken", &get("http://{MISSING}/")),
                    scenario("never", &get("http://app/never")),
                ],
                1.0,
            )
            .build()
            .unwrap();
        let config = RunConfig {
            on_failure: FailurePolicy::Abort,
            ..RunConfig::default()
        };
        let factory = factory(plan, config, StubTransport::default());
        let mut first = factory.worker(0);
        let mut second = factory.worker(1);

        let report = first.run_iteration().await.unwrap();
        assert!(report.aborted);
        assert_eq!(report.test_cases.len(), 1);
        assert!(factory.control().is_aborted());

        assert!(matches!(
            first.run_iteration().await,
            Err(WebtestError::RunAborted)
        ));
        assert!(matches!(
            second.run_iteration().await,
            Err(WebtestError::RunAborted)
        ));
    }

    #[tokio::test]
    async fn test_continue_policy_runs_remaining_test_cases() {
        let plan = TestPlan::builder()
            .scenario_set(
                vec![
                    scenario("broken", &get("http://{MISSING}/")),
                    scenario("next", &get("http://app/next")),
                ],
                1.0,
            )
            .build()
            .unwrap();
        let factory = factory(plan, RunConfig::default(), StubTransport::default());
        let report = factory.worker(0).run_iteration().await.unwrap();

        assert!(!report.aborted);
        assert_eq!(report.test_cases.len(), 2);
        assert_eq!(report.failures().count(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_worker_stops_selecting() {
        let plan = TestPlan::builder()
            .scenario_set(vec![scenario("a", &get("http://app/a"))], 1.0)
            .build()
            .unwrap();
        let factory = factory(plan, RunConfig::default(), StubTransport::default());
        let mut worker = factory.worker(0);
        worker.run_iteration().await.unwrap();

        factory.control().cancel();
        assert!(matches!(
            worker.run_iteration().await,
            Err(WebtestError::Cancelled)
        ));
        assert!(worker.finish().await.is_none());
    }

    #[test]
    fn test_weighted_selection_is_seeded() {
        let plan = TestPlan::builder()
            .scenario_set(vec![scenario("a", &get("http://app/a"))], 1.0)
            .scenario_set(vec![scenario("b", &get("http://app/b"))], 3.0)
            .build()
            .unwrap();
        let config = RunConfig {
            sequence: Sequence::Weighted,
            seed: Some(7),
            ..RunConfig::default()
        };
        let factory = factory(plan, config, StubTransport::default());

        let mut first = factory.worker(0);
        let mut again = factory.worker(0);
        let picks: Vec<_> = (0..50).map(|_| first.select_sets()).collect();
        let repeat: Vec<_> = (0..50).map(|_| again.select_sets()).collect();
        assert_eq!(picks, repeat);

        let mut worker = factory.worker(1);
        let mut counts = [0usize; 2];
        for _ in 0..8000 {
            counts[worker.select_sets()[0]] += 1;
        }
        let ratio = counts[1] as f64 / counts[0] as f64;
        assert!((2.6..3.4).contains(&ratio), "ratio {}", ratio);
    }

    #[test]
    fn test_invalid_weights_are_rejected() {
        let build = |weights: [f64; 2]| {
            TestPlan::builder()
                .scenario_set(vec![scenario("a", &get("http://app/a"))], weights[0])
                .scenario_set(vec![scenario("b", &get("http://app/b"))], weights[1])
                .build()
                .unwrap()
        };
        let weighted = RunConfig {
            sequence: Sequence::Weighted,
            ..RunConfig::default()
        };
        let transport = Arc::new(StubTransport::default());

        assert!(RunnerFactory::new(build([0.0, 0.0]), weighted.clone(), transport.clone()).is_err());
        assert!(
            RunnerFactory::new(build([-1.0, 2.0]), RunConfig::default(), transport.clone())
                .is_err()
        );
        assert!(RunnerFactory::new(build([0.0, 2.0]), weighted, transport.clone()).is_ok());
        assert!(
            RunnerFactory::new(TestPlan::default(), RunConfig::default(), transport).is_err()
        );
    }
}
