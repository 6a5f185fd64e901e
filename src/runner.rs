//! The scenario orchestrator.
//!
//! [`ScenarioRunner::run_all`] works through every target of every scene in
//! order, one at a time. For each target it builds the request template, layers
//! the target's overrides on the default [`RunConfig`], starts the engine, arms
//! the interrupt and (when a run time is set) the duration timer, and waits for
//! the run to drain before handing the result to every registered
//! [`Reporter`]. Only then does the next target start.
//!
//! A target that can't be configured is skipped and reported as such, the rest
//! of the batch still runs. After an interrupt, targets that haven't started
//! yet are reported as canceled.

use chrono::prelude::*;
use serde::Serialize;
use std::fmt;

use crate::engine::{LoadEngine, RunConfig};
use crate::interrupt::Interrupt;
use crate::logger::RequestLogReporter;
use crate::metrics::{format_millis, format_number, RunResult};
use crate::report::{PrintReporter, ReportFileReporter, Reporter};
use crate::request::RequestTemplate;
use crate::scenario::{Header, Scene, TargetDescriptor};
use crate::{util, GoslingConfiguration, GoslingError};

/// What happened to one target.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum TargetOutcome {
    /// The target was load tested.
    Completed(RunResult),
    /// The target's configuration is invalid, it was not load tested.
    Skipped { error: String },
    /// The run could not be started or did not complete.
    Failed { error: String },
    /// An interrupt was received before the target was started.
    Canceled,
}
impl TargetOutcome {
    pub fn result(&self) -> Option<&RunResult> {
        match self {
            TargetOutcome::Completed(result) => Some(result),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TargetOutcome::Completed(_) => "completed",
            TargetOutcome::Skipped { .. } => "skipped (config error)",
            TargetOutcome::Failed { .. } => "failed",
            TargetOutcome::Canceled => "canceled",
        }
    }
}

/// The report for one target, handed to every reporter.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub scene: String,
    /// Position of the scene in the document, starting at 0.
    pub scene_index: usize,
    /// Position of the target in its scene, starting at 0.
    pub target_index: usize,
    /// Display name of the target.
    pub target: String,
    #[serde(flatten)]
    pub outcome: TargetOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SceneReport {
    pub name: String,
    pub targets: Vec<TargetReport>,
}

/// The reports of every target in a batch, in the order they ran.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub started: DateTime<Local>,
    pub stopped: DateTime<Local>,
    /// An interrupt was received during the batch.
    pub interrupted: bool,
    pub scenes: Vec<SceneReport>,
}
impl BatchReport {
    fn new() -> Self {
        BatchReport {
            started: Local::now(),
            stopped: Local::now(),
            interrupted: false,
            scenes: Vec::new(),
        }
    }

    /// Every target report, in the order the targets ran.
    pub fn targets(&self) -> impl Iterator<Item = &TargetReport> {
        self.scenes.iter().flat_map(|scene| scene.targets.iter())
    }

    /// The results of every completed target.
    pub fn results(&self) -> impl Iterator<Item = &RunResult> {
        self.targets().filter_map(|report| report.outcome.result())
    }

    pub fn completed(&self) -> usize {
        self.results().count()
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, TargetOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, TargetOutcome::Failed { .. }))
    }

    pub fn canceled(&self) -> usize {
        self.count(|outcome| matches!(outcome, TargetOutcome::Canceled))
    }

    fn count(&self, filter: impl Fn(&TargetOutcome) -> bool) -> usize {
        self.targets()
            .filter(|report| filter(&report.outcome))
            .count()
    }
}

/// Implement format trait to allow displaying a batch summary.
impl fmt::Display for BatchReport {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            fmt,
            "\n === BATCH SUMMARY ===\n ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<30} | {:<22} | {:>10} | {:>8} | {:>9}",
            "Target", "Outcome", "Requests", "Req/s", "p50 (ms)"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        for scene in &self.scenes {
            writeln!(fmt, " {}", scene.name)?;
            for report in &scene.targets {
                match report.outcome.result() {
                    Some(result) => writeln!(
                        fmt,
                        "   {:<28} | {:<22} | {:>10} | {:>8.2} | {:>9}",
                        util::truncate_string(&report.target, 28),
                        report.outcome.label(),
                        format_number(result.requests),
                        result.requests_per_second(),
                        format_millis(result.latency.percentile(0.5)),
                    )?,
                    None => writeln!(
                        fmt,
                        "   {:<28} | {:<22} |",
                        util::truncate_string(&report.target, 28),
                        report.outcome.label(),
                    )?,
                }
            }
        }
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {} completed, {} skipped, {} failed, {} canceled{}",
            self.completed(),
            self.skipped(),
            self.failed(),
            self.canceled(),
            if self.interrupted { " (interrupted)" } else { "" }
        )
    }
}

/// Runs scenes and their targets in sequence.
pub struct ScenarioRunner {
    defaults: RunConfig,
    reporters: Vec<Box<dyn Reporter>>,
    interrupt: Interrupt,
    abort_on_config_error: bool,
}
impl ScenarioRunner {
    /// Create a runner applying `defaults` to every target without overrides.
    pub fn new(defaults: RunConfig) -> Self {
        ScenarioRunner {
            defaults,
            reporters: Vec::new(),
            interrupt: Interrupt::new(),
            abort_on_config_error: false,
        }
    }

    /// Create a runner from command line options, stopped by ctrl-c.
    pub fn from_configuration(configuration: &GoslingConfiguration) -> Result<Self, GoslingError> {
        let mut runner = ScenarioRunner::new(configuration.run_config()?)
            .set_interrupt(Interrupt::ctrlc()?)
            .set_abort_on_config_error(configuration.abort_on_config_error);
        if !configuration.no_print_metrics {
            runner = runner.register_reporter(PrintReporter::new());
        }
        if !configuration.report_file.is_empty() {
            runner = runner.register_reporter(ReportFileReporter::new(&configuration.report_file)?);
        }
        if !configuration.request_log.is_empty() {
            runner = runner.register_reporter(RequestLogReporter::new(
                &configuration.request_log,
                configuration.request_format.unwrap_or_default(),
            ));
        }
        Ok(runner)
    }

    pub fn register_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    pub fn set_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Return the error instead of skipping a target that can't be configured.
    pub fn set_abort_on_config_error(mut self, abort_on_config_error: bool) -> Self {
        self.abort_on_config_error = abort_on_config_error;
        self
    }

    /// Load test every target of every scene, in order.
    pub async fn run_all(
        &mut self,
        scenes: &[Scene],
        global_headers: &[Header],
    ) -> Result<BatchReport, GoslingError> {
        let keep_records =
            self.defaults.keep_records || self.reporters.iter().any(|r| r.wants_records());
        let mut batch = BatchReport::new();

        for (scene_index, scene) in scenes.iter().enumerate() {
            info!("scene {}: {}", scene_index + 1, scene.name);
            let mut scene_report = SceneReport {
                name: scene.name.clone(),
                targets: Vec::with_capacity(scene.targets.len()),
            };

            for (target_index, target) in scene.targets.iter().enumerate() {
                let name = target.display_name();
                let outcome = if self.interrupt.is_canceled() {
                    info!("{}: canceled", name);
                    TargetOutcome::Canceled
                } else {
                    match self.run_target(target, global_headers, keep_records).await {
                        Ok(result) => TargetOutcome::Completed(result),
                        Err(e) if e.is_config_error() => {
                            if self.abort_on_config_error {
                                return Err(e);
                            }
                            warn!("{}: skipped: {}", name, e);
                            TargetOutcome::Skipped {
                                error: e.to_string(),
                            }
                        }
                        Err(e) => {
                            error!("{}: failed: {}", name, e);
                            TargetOutcome::Failed {
                                error: e.to_string(),
                            }
                        }
                    }
                };

                let mut report = TargetReport {
                    scene: scene.name.clone(),
                    scene_index,
                    target_index,
                    target: name,
                    outcome,
                };
                for reporter in self.reporters.iter_mut() {
                    if let Err(e) = reporter.report_target(&report).await {
                        warn!("{}: reporter failed: {}", report.target, e);
                    }
                }
                if let TargetOutcome::Completed(result) = &mut report.outcome {
                    result.clear_records();
                }
                scene_report.targets.push(report);
            }
            batch.scenes.push(scene_report);
        }

        batch.stopped = Local::now();
        batch.interrupted = self.interrupt.is_canceled();
        for reporter in self.reporters.iter_mut() {
            if let Err(e) = reporter.finish(&batch).await {
                warn!("reporter failed: {}", e);
            }
        }
        Ok(batch)
    }

    async fn run_target(
        &self,
        target: &TargetDescriptor,
        global_headers: &[Header],
        keep_records: bool,
    ) -> Result<RunResult, GoslingError> {
        let template = RequestTemplate::build(target, global_headers)?;
        let mut config = self.defaults.with_overrides(&target.overrides)?;
        config.keep_records = keep_records;
        config.validate()?;

        let run = LoadEngine::start(template, &config)?;
        // Both are disarmed when dropped, as this function returns.
        let _interrupt = self.interrupt.arm(run.stop_handle());
        let _timer = (!config.run_time.is_zero()).then(|| run.stop_after(config.run_time));
        run.wait().await
    }
}
