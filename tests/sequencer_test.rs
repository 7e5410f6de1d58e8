use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use webtest::http::{CapturedResponse, HttpTransport, ResolvedRequest, TransportError};
use webtest::parser::parse_content;
use webtest::runner::{RunConfig, RunnerFactory, Sequence, TestPlan};
use webtest::variable::{
    CaptureEngine, CaptureExpression, SharedVariables, VariableContext, VariableScope,
};

/// Echoes the request path back as `<PATH>...</PATH>`.
struct EchoTransport;

impl HttpTransport for EchoTransport {
    async fn send(
        &self,
        request: &ResolvedRequest,
        _timeout: Duration,
    ) -> Result<CapturedResponse, TransportError> {
        let path = request
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&request.url);
        Ok(CapturedResponse::from_body(
            200,
            format!("<PATH>{}</PATH>", path),
        ))
    }
}

fn single_request(name: &str, url: &str, capture: Option<&str>) -> webtest::Scenario {
    let capture = capture
        .map(|c| format!("<Capture><![CDATA[{}]]></Capture>", c))
        .unwrap_or_default();
    parse_content(&format!(
        r#"<TestCase Name="{}"><Items><Request Method="GET" Url="{}">{}</Request></Items></TestCase>"#,
        name, url, capture
    ))
    .unwrap()
}

#[test]
fn test_concurrent_global_captures_are_not_lost() {
    const THREADS: usize = 8;
    const CAPTURES: usize = 50;

    let globals = SharedVariables::new();
    let expr = CaptureExpression::parse("{VALUE = <V></V>}").unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let globals = globals.clone();
            let expr = expr.clone();
            thread::spawn(move || {
                let engine = CaptureEngine::default();
                let mut ctx =
                    VariableContext::with_globals(globals).with_capture_scope(VariableScope::Global);
                for m in 0..CAPTURES {
                    let response =
                        CapturedResponse::from_body(200, format!("<V>{}-{}</V>", t, m));
                    let mut renamed = expr.clone();
                    renamed.name = format!("T{}_M{}", t, m);
                    engine.capture(&renamed, &response, &mut ctx).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(globals.len(), THREADS * CAPTURES);
    assert_eq!(globals.get("T3_M7").as_deref(), Some("3-7"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_global_capture_visible_to_other_worker() {
    let producer = single_request(
        "producer",
        "http://app/token/xyz",
        Some("{TOKEN = app/token/(\\w+)}"),
    );
    let consumer = single_request("consumer", "http://app/use/{TOKEN}", None);
    let plan = TestPlan::builder()
        .scenario_set(vec![producer], 1.0)
        .scenario_set(vec![consumer], 1.0)
        .build()
        .unwrap();
    let config = RunConfig {
        sequence: Sequence::Thread,
        capture_scope: VariableScope::Global,
        ..RunConfig::default()
    };
    let factory = RunnerFactory::new(plan, config, Arc::new(EchoTransport)).unwrap();

    let mut first = factory.worker(0);
    let handle = tokio::spawn(async move { first.run_iteration().await.unwrap() });
    let report = handle.await.unwrap();
    assert!(report.passed());
    assert_eq!(factory.globals().get("TOKEN").as_deref(), Some("xyz"));

    let mut second = factory.worker(1);
    let report = second.run_iteration().await.unwrap();
    assert!(report.passed());
    assert_eq!(report.test_cases[0].requests[0].url, "http://app/use/xyz");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_workers_share_globals_concurrently() {
    const WORKERS: usize = 6;
    const ITERATIONS: usize = 20;

    let globals = SharedVariables::new();
    let mut handles = Vec::new();
    for w in 0..WORKERS {
        let scenario = single_request(
            "count",
            &format!("http://app/w{}/{{N = random_int(0, 1000000)}}", w),
            Some(&format!("{{LAST_W{} = app/([^<]*)}}", w)),
        );
        let plan = TestPlan::builder()
            .scenario_set(vec![scenario], 1.0)
            .build()
            .unwrap();
        let config = RunConfig {
            capture_scope: VariableScope::Global,
            ..RunConfig::default()
        };
        let factory = RunnerFactory::new(plan, config, Arc::new(EchoTransport))
            .unwrap()
            .with_globals(globals.clone());
        let mut worker = factory.worker(w);
        handles.push(tokio::spawn(async move {
            for _ in 0..ITERATIONS {
                assert!(worker.run_iteration().await.unwrap().passed());
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for w in 0..WORKERS {
        let last = globals.get(&format!("LAST_W{}", w)).unwrap();
        assert!(last.starts_with(&format!("w{}/", w)), "{}", last);
    }
}

#[tokio::test]
async fn test_weighted_runs_converge_to_weights() {
    let plan = TestPlan::builder()
        .scenario_set(vec![single_request("a", "http://app/a", None)], 1.0)
        .scenario_set(vec![single_request("b", "http://app/b", None)], 3.0)
        .build()
        .unwrap();
    let config = RunConfig {
        sequence: Sequence::Weighted,
        seed: Some(2024),
        ..RunConfig::default()
    };
    let factory = RunnerFactory::new(plan, config, Arc::new(EchoTransport)).unwrap();
    let mut worker = factory.worker(0);

    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..4000 {
        let report = worker.run_iteration().await.unwrap();
        assert_eq!(report.test_cases.len(), 1);
        *counts.entry(report.test_cases[0].name.clone()).or_default() += 1;
    }

    let ratio = counts["b"] as f64 / counts["a"] as f64;
    assert!((2.5..3.5).contains(&ratio), "ratio {} from {:?}", ratio, counts);
}

#[tokio::test]
async fn test_random_sequence_runs_one_set() {
    let plan = TestPlan::builder()
        .scenario_set(vec![single_request("a", "http://app/a", None)], 1.0)
        .scenario_set(vec![single_request("b", "http://app/b", None)], 1.0)
        .build()
        .unwrap();
    let config = RunConfig {
        sequence: Sequence::Random,
        seed: Some(1),
        ..RunConfig::default()
    };
    let factory = RunnerFactory::new(plan, config, Arc::new(EchoTransport)).unwrap();
    let mut worker = factory.worker(0);

    let mut seen = std::collections::HashSet::new();
    for _ in 0..200 {
        let report = worker.run_iteration().await.unwrap();
        assert_eq!(report.test_cases.len(), 1);
        seen.insert(report.test_cases[0].name.clone());
    }
    assert_eq!(seen.len(), 2);
}
