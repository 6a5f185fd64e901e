//! The load generation engine.
//!
//! [`LoadEngine::start`] takes one [`RequestTemplate`] and a [`RunConfig`] and
//! launches a fixed pool of workers on the current tokio runtime. Each worker
//! loops: wait for a throttle permit (if a request rate is configured), claim
//! one unit of the request budget (if a request count is configured), send
//! the request, and hand the [`OutcomeRecord`] to the collector.
//!
//! A run is stopped exactly once, by whichever comes first of the request
//! budget running out, the duration timer armed with
//! [`RunHandle::stop_after`], or an explicit [`StopHandle::stop`] call. Later
//! triggers are ignored. Once stopped, no new request is sent; requests
//! already in flight complete (or time out) and are recorded, and
//! [`RunHandle::wait`] returns only after all of them are accounted for.

use chrono::prelude::*;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use strum_macros::Display;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::client::{self, TransportOptions};
use crate::metrics::{OutcomeRecord, RunMetrics, RunResult};
use crate::request::RequestTemplate;
use crate::scenario::TargetOverrides;
use crate::{throttle, util, GoslingError};

/// Slowest supported throttle rate, one request every 1,000 seconds.
const MIN_QPS: f64 = 0.001;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum StopReason {
    /// Every request in the budget was dispatched.
    #[strum(to_string = "budget exhausted")]
    BudgetExhausted,
    /// The configured run time elapsed.
    #[strum(to_string = "run time elapsed")]
    RunTime,
    /// An interrupt was received.
    #[strum(to_string = "interrupted")]
    Interrupted,
    /// Stopped by an explicit call.
    #[strum(to_string = "stopped")]
    Stopped,
    /// Every worker exited without being told to stop.
    #[strum(to_string = "drained")]
    Drained,
}

/// How to load test one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of concurrent workers.
    pub concurrency: usize,
    /// Total number of requests, 0 for no limit.
    pub requests: usize,
    /// Maximum requests per second across all workers, 0 for no limit.
    pub qps: f64,
    /// Per-request timeout, zero for none.
    pub timeout: Duration,
    /// How long to run, zero for no limit.
    pub run_time: Duration,
    pub transport: TransportOptions,
    /// Keep every outcome record in the result.
    pub keep_records: bool,
}
impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            concurrency: 50,
            requests: 200,
            qps: 0.0,
            timeout: Duration::from_secs(10),
            run_time: Duration::ZERO,
            transport: TransportOptions::default(),
            keep_records: false,
        }
    }
}
impl RunConfig {
    pub fn set_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn set_requests(mut self, requests: usize) -> Self {
        self.requests = requests;
        self
    }

    pub fn set_qps(mut self, qps: f64) -> Self {
        self.qps = qps;
        self
    }

    pub fn set_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn set_run_time(mut self, run_time: Duration) -> Self {
        self.run_time = run_time;
        self
    }

    pub fn set_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    pub fn set_keep_records(mut self, keep_records: bool) -> Self {
        self.keep_records = keep_records;
        self
    }

    /// Layer a target's overrides over this configuration.
    ///
    /// Setting a run time without also setting a request count lifts the
    /// request count limit for the target.
    pub fn with_overrides(&self, overrides: &TargetOverrides) -> Result<RunConfig, GoslingError> {
        let mut config = self.clone();
        if let Some(concurrency) = overrides.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(requests) = overrides.requests {
            config.requests = requests;
        }
        if let Some(qps) = overrides.qps {
            config.qps = qps;
        }
        if let Some(timeout) = overrides.timeout {
            config.timeout = util::seconds_to_duration("overrides.timeout", timeout)?;
        }
        if let Some(run_time) = overrides.run_time.as_ref() {
            let seconds = util::parse_timespan(run_time);
            if seconds == 0 {
                return Err(GoslingError::InvalidOption {
                    option: "overrides.run_time".to_string(),
                    value: run_time.to_string(),
                    detail: "overrides.run_time must be a timespan of at least 1 second."
                        .to_string(),
                });
            }
            config.run_time = Duration::from_secs(seconds as u64);
            if overrides.requests.is_none() {
                config.requests = 0;
            }
        }
        Ok(config)
    }

    /// Confirm the configuration describes a run that can finish.
    ///
    /// A concurrency of 0 is raised to 1. Workers beyond the request count
    /// exit as soon as the budget runs out.
    pub fn validate(&mut self) -> Result<(), GoslingError> {
        if !self.qps.is_finite() || self.qps < 0.0 || (self.qps > 0.0 && self.qps < MIN_QPS) {
            return Err(GoslingError::InvalidOption {
                option: "qps".to_string(),
                value: self.qps.to_string(),
                detail: "qps must be 0 (unlimited) or at least 0.001.".to_string(),
            });
        } else if self.qps > 1_000_000.0 {
            return Err(GoslingError::InvalidOption {
                option: "qps".to_string(),
                value: self.qps.to_string(),
                detail: "qps can not be set to more than 1,000,000 requests per second."
                    .to_string(),
            });
        }
        if self.requests == 0 && self.run_time.is_zero() {
            return Err(GoslingError::InvalidOption {
                option: "requests".to_string(),
                value: self.requests.to_string(),
                detail: "requests must be set to at least 1 unless a run time is set."
                    .to_string(),
            });
        }
        if self.concurrency == 0 {
            warn!("concurrency must be at least 1, using 1");
            self.concurrency = 1;
        }
        if self.requests > 0 && self.concurrency > self.requests {
            info!(
                "concurrency {} is larger than the {} requests, some workers will be idle",
                self.concurrency, self.requests
            );
        }
        Ok(())
    }
}

/// Result of claiming one request from the budget.
#[derive(Debug, PartialEq)]
enum Claim {
    Granted,
    /// Granted, and no budget is left for anyone else.
    Last,
    Exhausted,
}

/// State shared by every worker of a run.
struct RunState {
    reason: OnceLock<StopReason>,
    stopping: watch::Sender<bool>,
    budget: Option<AtomicUsize>,
}
impl RunState {
    fn new(requests: usize) -> Self {
        RunState {
            reason: OnceLock::new(),
            stopping: watch::Sender::new(false),
            budget: if requests > 0 {
                Some(AtomicUsize::new(requests))
            } else {
                None
            },
        }
    }

    fn claim(&self) -> Claim {
        let Some(budget) = self.budget.as_ref() else {
            return Claim::Granted;
        };
        match budget.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        {
            Ok(1) => Claim::Last,
            Ok(_) => Claim::Granted,
            Err(_) => Claim::Exhausted,
        }
    }
}

/// Stops a run. Cheap to clone and safe to use from any task or thread.
#[derive(Clone)]
pub struct StopHandle {
    state: Arc<RunState>,
}
impl StopHandle {
    /// Stop the run, recording `reason`. Returns `true` only for the call that
    /// actually stopped the run: every later call, whatever its reason, is a
    /// no-op and returns `false`.
    pub fn stop(&self, reason: StopReason) -> bool {
        if self.state.reason.set(reason).is_err() {
            return false;
        }
        debug!("stopping run: {}", reason);
        self.state.stopping.send_replace(true);
        true
    }

    pub fn is_stopping(&self) -> bool {
        self.state.reason.get().is_some()
    }

    /// The reason the run stopped, if it has.
    pub fn reason(&self) -> Option<StopReason> {
        self.state.reason.get().copied()
    }
}

/// Stops the run with [`StopReason::RunTime`] when it fires. Dropping the
/// timer disarms it.
pub struct StopTimer {
    task: JoinHandle<()>,
}
impl Drop for StopTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A running load test against one target.
pub struct RunHandle {
    name: String,
    concurrency: usize,
    runtime: Handle,
    stop: StopHandle,
    workers: Vec<JoinHandle<()>>,
    collector: JoinHandle<RunMetrics>,
    throttle_shutdown: Option<flume::Sender<bool>>,
    started: Instant,
    started_at: DateTime<Local>,
}
impl RunHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stop the run once `duration` has passed since it started.
    pub fn stop_after(&self, duration: Duration) -> StopTimer {
        let stop = self.stop.clone();
        let deadline = tokio::time::Instant::from_std(self.started + duration);
        let name = self.name.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if stop.stop(StopReason::RunTime) {
                info!("{}: run time of {:?} elapsed", name, duration);
            }
        });
        StopTimer { task }
    }

    /// Wait for every worker to exit and every outcome to be recorded.
    pub async fn wait(self) -> Result<RunResult, GoslingError> {
        let mut failure = None;
        for joined in join_all(self.workers).await {
            if let Err(e) = joined {
                error!("{}: worker failed: {}", self.name, e);
                failure.get_or_insert(e);
            }
        }
        let duration = self.started.elapsed();

        // Only takes effect if nothing else stopped the run.
        self.stop.stop(StopReason::Drained);
        if let Some(throttle_shutdown) = self.throttle_shutdown {
            let _ = throttle_shutdown.send_async(true).await;
        }

        let metrics = self.collector.await?;
        if let Some(e) = failure {
            return Err(e.into());
        }

        let stop_reason = self.stop.reason().unwrap_or(StopReason::Drained);
        info!(
            "{}: {} requests in {:.2}s ({})",
            self.name,
            metrics.requests,
            duration.as_secs_f64(),
            stop_reason
        );
        Ok(RunResult::new(
            &self.name,
            self.concurrency,
            self.started_at,
            duration,
            stop_reason,
            metrics,
        ))
    }
}

/// Launches runs.
pub struct LoadEngine;
impl LoadEngine {
    /// Start load testing `template`, returning immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(template: RequestTemplate, config: &RunConfig) -> Result<RunHandle, GoslingError> {
        let runtime = Handle::try_current().map_err(|e| GoslingError::Resource {
            detail: format!("no tokio runtime: {}", e),
        })?;
        let client = client::build_client(&config.transport, config.timeout)?;
        let concurrency = config.concurrency.max(1);

        let state = Arc::new(RunState::new(config.requests));
        let stop = StopHandle {
            state: state.clone(),
        };
        let (throttle, throttle_shutdown) = throttle::setup_throttle(config.qps);

        let (outcome_tx, outcome_rx) = flume::unbounded();
        let collector = runtime.spawn(collector_main(outcome_rx, config.keep_records));

        info!(
            "{}: launching {} workers ({} requests, {} qps, {:?} run time)",
            template.name, concurrency, config.requests, config.qps, config.run_time
        );
        let name = template.name.clone();
        let template = Arc::new(template);
        let started = Instant::now();
        let started_at = Local::now();
        let workers = (0..concurrency)
            .map(|index| {
                let worker = Worker {
                    index,
                    template: template.clone(),
                    client: client.clone(),
                    state: state.clone(),
                    stopping: state.stopping.subscribe(),
                    throttle: throttle.clone(),
                    outcome_tx: outcome_tx.clone(),
                    started,
                };
                runtime.spawn(worker.run())
            })
            .collect();

        Ok(RunHandle {
            name,
            concurrency,
            runtime,
            stop,
            workers,
            collector,
            throttle_shutdown,
            started,
            started_at,
        })
    }
}

struct Worker {
    index: usize,
    template: Arc<RequestTemplate>,
    client: reqwest::Client,
    state: Arc<RunState>,
    stopping: watch::Receiver<bool>,
    throttle: Option<flume::Sender<bool>>,
    outcome_tx: flume::Sender<OutcomeRecord>,
    started: Instant,
}
impl Worker {
    async fn run(mut self) {
        debug!("{}: worker {} starting", self.template.name, self.index);
        loop {
            if self.is_stopping() {
                break;
            }

            // Add a token to the throttle, blocking until there is room.
            if let Some(throttle) = self.throttle.as_ref() {
                tokio::select! {
                    biased;
                    _ = self.stopping.changed() => break,
                    sent = throttle.send_async(true) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }

            if self.is_stopping() {
                break;
            }
            // A claimed request is always dispatched, even if the run stops
            // before it is sent.
            let claim = self.state.claim();
            if claim == Claim::Exhausted {
                break;
            }
            if claim == Claim::Last {
                let stop = StopHandle {
                    state: self.state.clone(),
                };
                stop.stop(StopReason::BudgetExhausted);
            }

            let record = self.dispatch().await;
            if self.outcome_tx.send(record).is_err() {
                break;
            }
        }
        debug!("{}: worker {} exiting", self.template.name, self.index);
    }

    fn is_stopping(&self) -> bool {
        self.state.reason.get().is_some()
    }

    async fn dispatch(&self) -> OutcomeRecord {
        let elapsed = self.started.elapsed().as_micros() as u64;
        let dispatched = Instant::now();
        let outcome = match self.template.request_builder(&self.client).send().await {
            Ok(response) => {
                let status_code = response.status().as_u16();
                response
                    .bytes()
                    .await
                    .map(|body| (status_code, body.len() as u64))
            }
            Err(e) => Err(e),
        };
        let latency = dispatched.elapsed().as_micros() as u64;

        let (status_code, size, error) = match outcome {
            Ok((status_code, size)) => (status_code, size, None),
            Err(e) => {
                trace!("{}: worker {}: {}", self.template.name, self.index, e);
                (0, 0, Some(describe_error(&e)))
            }
        };
        OutcomeRecord {
            worker: self.index,
            elapsed,
            latency,
            status_code,
            size,
            error,
        }
    }
}

/// Fold every outcome into the run's metrics, until all workers have exited.
async fn collector_main(
    receiver: flume::Receiver<OutcomeRecord>,
    keep_records: bool,
) -> RunMetrics {
    let mut metrics = RunMetrics::new(keep_records);
    while let Ok(record) = receiver.recv_async().await {
        metrics.record(record);
    }
    metrics
}

/// A short description of a transport error, without the URL, so identical
/// failures are counted together.
fn describe_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        return "request timed out".to_string();
    }
    let kind = if error.is_connect() {
        "connection failed"
    } else if error.is_redirect() {
        "too many redirects"
    } else if error.is_body() || error.is_decode() {
        "failed to read response body"
    } else {
        "request failed"
    };
    let Some(mut cause) = std::error::Error::source(error) else {
        return kind.to_string();
    };
    while let Some(source) = cause.source() {
        cause = source;
    }
    format!("{}: {}", kind, cause)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scenario::TargetDescriptor;

    #[test]
    fn stop_transitions_once() {
        let stop = StopHandle {
            state: Arc::new(RunState::new(0)),
        };
        assert!(!stop.is_stopping());
        assert_eq!(stop.reason(), None);

        assert!(stop.stop(StopReason::RunTime));
        assert!(stop.is_stopping());

        // Later triggers don't replace the reason.
        assert!(!stop.stop(StopReason::Interrupted));
        assert!(!stop.clone().stop(StopReason::BudgetExhausted));
        assert_eq!(stop.reason(), Some(StopReason::RunTime));
    }

    #[test]
    fn concurrent_stop_has_one_winner() {
        let stop = StopHandle {
            state: Arc::new(RunState::new(0)),
        };
        let winners: usize = (0..16)
            .map(|_| {
                let stop = stop.clone();
                std::thread::spawn(move || stop.stop(StopReason::Stopped))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
        assert!(*stop.state.stopping.borrow());
    }

    #[test]
    fn budget() {
        let state = RunState::new(3);
        assert_eq!(state.claim(), Claim::Granted);
        assert_eq!(state.claim(), Claim::Granted);
        assert_eq!(state.claim(), Claim::Last);
        assert_eq!(state.claim(), Claim::Exhausted);
        assert_eq!(state.claim(), Claim::Exhausted);

        // No request count, no limit.
        let state = RunState::new(0);
        for _ in 0..1_000 {
            assert_eq!(state.claim(), Claim::Granted);
        }
    }

    #[test]
    fn concurrent_budget_claims() {
        let state = Arc::new(RunState::new(1_000));
        let granted: usize = (0..8)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || {
                    let mut granted = 0;
                    loop {
                        match state.claim() {
                            Claim::Exhausted => break granted,
                            _ => granted += 1,
                        }
                    }
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .sum();
        assert_eq!(granted, 1_000);
    }

    #[test]
    fn overrides() {
        let defaults = RunConfig::default();
        let config = defaults.with_overrides(&TargetOverrides::default()).unwrap();
        assert_eq!(config, defaults);

        let overrides = TargetOverrides {
            concurrency: Some(4),
            qps: Some(2.5),
            timeout: Some(0.5),
            ..Default::default()
        };
        let config = defaults.with_overrides(&overrides).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.requests, 200);
        assert_eq!(config.qps, 2.5);
        assert_eq!(config.timeout, Duration::from_millis(500));

        // A run time without a request count lifts the count limit.
        let overrides = TargetOverrides {
            run_time: Some("1m".to_string()),
            ..Default::default()
        };
        let config = defaults.with_overrides(&overrides).unwrap();
        assert_eq!(config.run_time, Duration::from_secs(60));
        assert_eq!(config.requests, 0);

        let overrides = TargetOverrides {
            run_time: Some("10s".to_string()),
            requests: Some(50),
            ..Default::default()
        };
        let config = defaults.with_overrides(&overrides).unwrap();
        assert_eq!(config.requests, 50);

        let overrides = TargetOverrides {
            run_time: Some("soon".to_string()),
            ..Default::default()
        };
        assert!(defaults.with_overrides(&overrides).is_err());

        let overrides = TargetOverrides {
            timeout: Some(-1.0),
            ..Default::default()
        };
        assert!(defaults.with_overrides(&overrides).is_err());
    }

    #[test]
    fn validate() {
        let mut config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency, 50);

        let mut config = RunConfig::default().set_concurrency(0);
        config.validate().unwrap();
        assert_eq!(config.concurrency, 1);

        // Extra workers are kept, the budget stops them.
        let mut config = RunConfig::default().set_concurrency(10).set_requests(3);
        config.validate().unwrap();
        assert_eq!(config.concurrency, 10);

        // Unbounded by count, bounded by time.
        let mut config = RunConfig::default()
            .set_requests(0)
            .set_run_time(Duration::from_secs(1));
        config.validate().unwrap();
        assert_eq!(config.concurrency, 50);

        // Never finishes.
        let mut config = RunConfig::default().set_requests(0);
        assert!(config.validate().is_err());

        let mut config = RunConfig::default().set_qps(-1.0);
        assert!(config.validate().is_err());
        let mut config = RunConfig::default().set_qps(f64::NAN);
        assert!(config.validate().is_err());
        let mut config = RunConfig::default().set_qps(2_000_000.0);
        assert!(config.validate().is_err());
        let mut config = RunConfig::default().set_qps(1e-20);
        assert!(config.validate().is_err());
        let mut config = RunConfig::default().set_qps(0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn start_requires_runtime() {
        let template =
            RequestTemplate::build(&TargetDescriptor::new("index", "http://127.0.0.1/"), &[])
                .unwrap();
        match LoadEngine::start(template, &RunConfig::default()) {
            Err(GoslingError::Resource { .. }) => (),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("started without a runtime"),
        }
    }

    #[test]
    fn stop_reasons() {
        assert_eq!(StopReason::BudgetExhausted.to_string(), "budget exhausted");
        assert_eq!(StopReason::RunTime.to_string(), "run time elapsed");
        assert_eq!(
            serde_json::to_string(&StopReason::Interrupted).unwrap(),
            "\"Interrupted\""
        );
    }
}
