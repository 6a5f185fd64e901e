use async_trait::async_trait;
use gumdrop::Options;
use httpmock::MockServer;
use std::sync::{Arc, Mutex};

use gosling::prelude::*;

/// Not all functions are used by all tests, so we enable allow(dead_code) to avoid
/// compiler warnings during testing.

/// Build a GET target against a path on the mock server.
#[allow(dead_code)]
pub fn target(server: &MockServer, name: &str, path: &str) -> TargetDescriptor {
    TargetDescriptor::new(name, &server.url(path))
}

/// Build a request template for a GET of a path on the mock server.
#[allow(dead_code)]
pub fn template(server: &MockServer, path: &str) -> RequestTemplate {
    RequestTemplate::build(&target(server, path, path), &[])
        .expect("failed to build request template")
}

/// The following options are configured by default, if not set to a custom value:
///  --file scenario.json
///  --quiet
#[allow(dead_code)]
pub fn build_configuration(custom: Vec<&str>) -> GoslingConfiguration {
    let mut configuration: Vec<&str> = vec![];
    configuration.extend_from_slice(&custom);

    if !configuration.contains(&"--file") {
        configuration.extend_from_slice(&["--file", "scenario.json"]);
    }
    if !configuration.contains(&"--quiet") && !configuration.contains(&"-v") {
        configuration.push("--quiet");
    }

    GoslingConfiguration::parse_args_default(&configuration)
        .expect("failed to parse options and generate a configuration")
}

/// Records every report it receives, so tests can inspect them after the batch.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct CollectReporter {
    pub reports: Arc<Mutex<Vec<TargetReport>>>,
    pub batches: Arc<Mutex<usize>>,
    pub keep_records: bool,
}
#[allow(dead_code)]
impl CollectReporter {
    pub fn new() -> Self {
        CollectReporter::default()
    }

    pub fn with_records() -> Self {
        CollectReporter {
            keep_records: true,
            ..Default::default()
        }
    }

    pub fn reports(&self) -> Vec<TargetReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn results(&self) -> Vec<RunResult> {
        self.reports()
            .into_iter()
            .filter_map(|report| report.outcome.result().cloned())
            .collect()
    }
}

#[async_trait]
impl Reporter for CollectReporter {
    async fn report_target(&mut self, report: &TargetReport) -> Result<(), GoslingError> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }

    async fn finish(&mut self, _batch: &BatchReport) -> Result<(), GoslingError> {
        *self.batches.lock().unwrap() += 1;
        Ok(())
    }

    fn wants_records(&self) -> bool {
        self.keep_records
    }
}

/// Returns the number of lines in a file.
#[allow(dead_code)]
pub fn file_length(file_name: &str) -> usize {
    std::fs::read_to_string(file_name)
        .map(|contents| contents.lines().count())
        .unwrap_or(0)
}

/// A path in the temporary directory unique to this test process.
#[allow(dead_code)]
pub fn temp_file(name: &str) -> String {
    std::env::temp_dir()
        .join(format!("gosling-{}-{}", std::process::id(), name))
        .display()
        .to_string()
}

/// Helper to delete test artifacts, if existing.
#[allow(dead_code)]
pub fn cleanup_files(files: Vec<&str>) {
    for file in files {
        let _ = std::fs::remove_file(file);
    }
}
