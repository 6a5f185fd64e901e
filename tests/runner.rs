use httpmock::{
    Method::{GET, POST},
    MockServer,
};
use serial_test::serial;
use std::time::Duration;

mod common;

use gosling::prelude::*;

// Paths used in load tests performed during these tests.
const INDEX_PATH: &str = "/";
const ABOUT_PATH: &str = "/about.html";
const CART_PATH: &str = "/cart";
const SLOW_PATH: &str = "/slow";

// Load test configuration.
const CONCURRENCY: usize = 4;
const REQUESTS: usize = 20;

fn defaults() -> RunConfig {
    RunConfig::default()
        .set_concurrency(CONCURRENCY)
        .set_requests(REQUESTS)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
// Targets run one at a time, in document order, across scenes.
async fn test_sequential_targets() {
    let server = MockServer::start_async().await;
    let index = server
        .mock_async(|when, then| {
            when.method(GET).path(INDEX_PATH);
            then.status(200).delay(Duration::from_millis(10));
        })
        .await;
    let about = server
        .mock_async(|when, then| {
            when.method(GET).path(ABOUT_PATH);
            then.status(200).delay(Duration::from_millis(10));
        })
        .await;

    let scenes = vec![
        Scene::new("first")
            .register_target(common::target(&server, "index", INDEX_PATH))
            .register_target(common::target(&server, "about", ABOUT_PATH)),
        Scene::new("second").register_target(common::target(&server, "index again", INDEX_PATH)),
    ];
    let collector = common::CollectReporter::new();
    let batch = ScenarioRunner::new(defaults())
        .register_reporter(collector.clone())
        .run_all(&scenes, &[])
        .await
        .unwrap();

    assert_eq!(batch.completed(), 3);
    assert_eq!(batch.skipped() + batch.failed() + batch.canceled(), 0);
    assert!(!batch.interrupted);
    assert_eq!(index.hits_async().await, 2 * REQUESTS);
    assert_eq!(about.hits_async().await, REQUESTS);

    // Reporters see every target as soon as it finishes, in order.
    let names: Vec<String> = collector.reports().into_iter().map(|r| r.target).collect();
    assert_eq!(names, vec!["index", "about", "index again"]);
    assert_eq!(*collector.batches.lock().unwrap(), 1);

    // A run never overlaps the next one.
    let results = collector.results();
    for pair in results.windows(2) {
        assert!(pair[0].stopped <= pair[1].started);
    }
    for result in &results {
        assert_eq!(result.requests, REQUESTS);
        assert_eq!(result.concurrency, CONCURRENCY);
        // Records are not kept unless a reporter asks for them.
        assert!(result.records.is_empty());
    }

    let positions: Vec<(usize, usize)> = batch
        .targets()
        .map(|report| (report.scene_index, report.target_index))
        .collect();
    assert_eq!(positions, vec![(0, 0), (0, 1), (1, 0)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
// Target headers override global headers, and methods and bodies are sent as
// configured.
async fn test_request_contents() {
    let server = MockServer::start_async().await;
    let overridden = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(INDEX_PATH)
                .header("x-token", "target")
                .header("accept", "text/html");
            then.status(200);
        })
        .await;
    let global = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(ABOUT_PATH)
                .header("x-token", "global")
                .header("accept", "text/html");
            then.status(200);
        })
        .await;
    let cart = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(CART_PATH)
                .header("content-type", "application/json")
                .body(r#"{"sku": 42}"#);
            then.status(201);
        })
        .await;

    let global_headers = vec![
        Header::new("X-Token", "global"),
        Header::new("Accept", "text/html"),
    ];
    let scenes = vec![Scene::new("storefront")
        .register_target(
            common::target(&server, "index", INDEX_PATH).set_header("x-token", "target"),
        )
        .register_target(common::target(&server, "about", ABOUT_PATH))
        .register_target(
            common::target(&server, "add to cart", CART_PATH)
                .set_method("POST")
                .set_body(r#"{"sku": 42}"#)
                .set_header("Content-Type", "application/json"),
        )];

    let batch = ScenarioRunner::new(defaults())
        .run_all(&scenes, &global_headers)
        .await
        .unwrap();
    assert_eq!(batch.completed(), 3);
    assert_eq!(overridden.hits_async().await, REQUESTS);
    assert_eq!(global.hits_async().await, REQUESTS);
    assert_eq!(cart.hits_async().await, REQUESTS);

    let results: Vec<&RunResult> = batch.results().collect();
    assert_eq!(results[2].status_codes.get(&201), Some(&REQUESTS));
    assert!(results.iter().all(|result| result.errors == 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
// A target that can't be configured is skipped, the others still run.
async fn test_config_error_skips_target() {
    let server = MockServer::start_async().await;
    let index = server
        .mock_async(|when, then| {
            when.method(GET).path(INDEX_PATH);
            then.status(200);
        })
        .await;

    let scenes = vec![Scene::new("mixed")
        .register_target(common::target(&server, "before", INDEX_PATH))
        .register_target(TargetDescriptor::new("no url", ""))
        .register_target(
            common::target(&server, "bad header", INDEX_PATH).set_header("Bad Header", "x"),
        )
        .register_target(common::target(&server, "after", INDEX_PATH))];

    let collector = common::CollectReporter::new();
    let batch = ScenarioRunner::new(defaults())
        .register_reporter(collector.clone())
        .run_all(&scenes, &[])
        .await
        .unwrap();

    assert_eq!(batch.completed(), 2);
    assert_eq!(batch.skipped(), 2);
    assert_eq!(index.hits_async().await, 2 * REQUESTS);

    let reports = collector.reports();
    assert_eq!(reports.len(), 4);
    match &reports[1].outcome {
        TargetOutcome::Skipped { error } => assert!(error.contains("no url"), "{}", error),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(matches!(reports[2].outcome, TargetOutcome::Skipped { .. }));
    assert!(reports[3].outcome.result().is_some());

    // Aborting on config errors stops the batch at the first bad target.
    let result = ScenarioRunner::new(defaults())
        .set_abort_on_config_error(true)
        .run_all(&scenes, &[])
        .await;
    assert!(matches!(result, Err(GoslingError::InvalidTarget { .. })));
    assert_eq!(index.hits_async().await, 3 * REQUESTS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
// Per-target overrides replace the defaults for that target only.
async fn test_overrides() {
    let server = MockServer::start_async().await;
    let index = server
        .mock_async(|when, then| {
            when.method(GET).path(INDEX_PATH);
            then.status(200);
        })
        .await;
    let about = server
        .mock_async(|when, then| {
            when.method(GET).path(ABOUT_PATH);
            then.status(200);
        })
        .await;

    let scenes = vec![Scene::new("overrides")
        .register_target(
            common::target(&server, "index", INDEX_PATH).set_overrides(TargetOverrides {
                concurrency: Some(2),
                requests: Some(7),
                ..Default::default()
            }),
        )
        .register_target(common::target(&server, "about", ABOUT_PATH))];

    let batch = ScenarioRunner::new(defaults())
        .run_all(&scenes, &[])
        .await
        .unwrap();
    let results: Vec<&RunResult> = batch.results().collect();
    assert_eq!(results[0].requests, 7);
    assert_eq!(results[0].concurrency, 2);
    assert_eq!(results[1].requests, REQUESTS);
    assert_eq!(results[1].concurrency, CONCURRENCY);
    assert_eq!(index.hits_async().await, 7);
    assert_eq!(about.hits_async().await, REQUESTS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
// A run time override bounds the target by duration instead of request count.
async fn test_run_time_override() {
    let server = MockServer::start_async().await;
    let index = server
        .mock_async(|when, then| {
            when.method(GET).path(INDEX_PATH);
            then.status(200).delay(Duration::from_millis(10));
        })
        .await;

    let scenes = vec![Scene::new("timed").register_target(
        common::target(&server, "index", INDEX_PATH).set_overrides(TargetOverrides {
            run_time: Some("1s".to_string()),
            ..Default::default()
        }),
    )];

    let batch = ScenarioRunner::new(defaults())
        .run_all(&scenes, &[])
        .await
        .unwrap();
    let result = batch.results().next().unwrap();
    assert_eq!(result.stop_reason, StopReason::RunTime);
    assert!(result.duration >= Duration::from_secs(1));
    assert_eq!(index.hits_async().await, result.requests);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
// Report files are written once the batch is complete.
async fn test_report_files() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(INDEX_PATH);
            then.status(200).body("ok");
        })
        .await;

    let json_file = common::temp_file("report.json");
    let markdown_file = common::temp_file("report.md");
    common::cleanup_files(vec![&json_file, &markdown_file]);

    let scenes = vec![Scene::new("reports")
        .register_target(common::target(&server, "index", INDEX_PATH))
        .register_target(TargetDescriptor::new("broken", ""))];
    ScenarioRunner::new(defaults())
        .register_reporter(ReportFileReporter::new(&json_file).unwrap())
        .register_reporter(ReportFileReporter::new(&markdown_file).unwrap())
        .run_all(&scenes, &[])
        .await
        .unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_file).unwrap()).unwrap();
    let targets = json["scenes"][0]["targets"].as_array().unwrap();
    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0]["outcome"], "completed");
    assert_eq!(targets[0]["requests"], REQUESTS);
    assert_eq!(targets[0]["status_codes"]["200"], REQUESTS);
    assert_eq!(targets[1]["outcome"], "skipped");

    let markdown = std::fs::read_to_string(&markdown_file).unwrap();
    assert!(markdown.starts_with("# Gosling Load Test Report"));
    assert!(markdown.contains("| reports | index |"));
    assert!(markdown.contains("broken"));

    common::cleanup_files(vec![&json_file, &markdown_file]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
// The request log gets one line per request, after the csv header.
async fn test_request_log() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(INDEX_PATH);
            then.status(200);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(ABOUT_PATH);
            then.status(404);
        })
        .await;

    let csv_file = common::temp_file("requests.csv");
    let json_file = common::temp_file("requests.json");
    common::cleanup_files(vec![&csv_file, &json_file]);

    let scenes = vec![Scene::new("logged")
        .register_target(common::target(&server, "index", INDEX_PATH))
        .register_target(common::target(&server, "about", ABOUT_PATH))];
    let batch = ScenarioRunner::new(defaults())
        .register_reporter(RequestLogReporter::new(&csv_file, LogFormat::Csv))
        .register_reporter(RequestLogReporter::new(&json_file, LogFormat::Json))
        .run_all(&scenes, &[])
        .await
        .unwrap();

    assert_eq!(common::file_length(&csv_file), 1 + 2 * REQUESTS);
    assert_eq!(common::file_length(&json_file), 2 * REQUESTS);
    let csv = std::fs::read_to_string(&csv_file).unwrap();
    assert!(csv.starts_with("target,worker,elapsed,latency,status_code,size,error\n"));
    assert_eq!(csv.lines().filter(|line| line.starts_with("about,")).count(), REQUESTS);

    // Records are released once every reporter has seen them.
    assert!(batch.results().all(|result| result.records.is_empty()));

    common::cleanup_files(vec![&csv_file, &json_file]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
// An interrupt stops the running target and cancels the ones after it.
async fn test_interrupt() {
    let server = MockServer::start_async().await;
    let slow = server
        .mock_async(|when, then| {
            when.method(GET).path(SLOW_PATH);
            then.status(200).delay(Duration::from_millis(20));
        })
        .await;
    let index = server
        .mock_async(|when, then| {
            when.method(GET).path(INDEX_PATH);
            then.status(200);
        })
        .await;

    let scenes = vec![
        Scene::new("interrupted")
            .register_target(common::target(&server, "slow", SLOW_PATH))
            .register_target(common::target(&server, "index", INDEX_PATH)),
        Scene::new("never started").register_target(common::target(&server, "index", INDEX_PATH)),
    ];
    // Without the interrupt, each target would run for a minute.
    let defaults = RunConfig::default()
        .set_concurrency(CONCURRENCY)
        .set_requests(0)
        .set_run_time(Duration::from_secs(60));

    let interrupt = Interrupt::new();
    let trigger = interrupt.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(trigger.trigger());
    });

    let batch = ScenarioRunner::new(defaults)
        .set_interrupt(interrupt)
        .run_all(&scenes, &[])
        .await
        .unwrap();

    assert!(batch.interrupted);
    assert_eq!(batch.completed(), 1);
    assert_eq!(batch.canceled(), 2);
    let result = batch.results().next().unwrap();
    assert_eq!(result.stop_reason, StopReason::Interrupted);
    assert!(result.duration < Duration::from_secs(5), "{:?}", result.duration);
    // In-flight requests were allowed to finish and were counted.
    assert_eq!(slow.hits_async().await, result.requests);
    assert_eq!(index.hits_async().await, 0);
}
