//! Functions and structures related to configuring a Gosling load test.
//!
//! Gosling is configured at run time by passing in the options and flags
//! defined by the [`GoslingConfiguration`] structure. These become the default
//! [`RunConfig`] of every target, and each target can override some of them in
//! the scenario document.

use gumdrop::Options;
use serde::{Deserialize, Serialize};
use simplelog::*;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::client::TransportOptions;
use crate::engine::RunConfig;
use crate::logger::LogFormat;
use crate::util;
use crate::GoslingError;

/// Default number of concurrent workers.
const DEFAULT_CONCURRENCY: usize = 50;
/// Default number of requests per target.
const DEFAULT_REQUESTS: usize = 200;
/// Default per-request timeout, in seconds.
const DEFAULT_TIMEOUT: f32 = 10.0;

/// Runtime options available when launching a Gosling load test.
///
/// Gosling leverages [`gumdrop`](https://docs.rs/gumdrop/) to derive the help
/// output from the below structure.
#[derive(Options, Debug, Clone, Default, Serialize, Deserialize)]
#[options(
    help = r#"Gosling is a scenario-driven HTTP load testing tool.

The following runtime options are available when launching a load test:"#
)]
pub struct GoslingConfiguration {
    /// Displays this help
    #[options(short = "h")]
    pub help: bool,
    /// Prints version information
    #[options(short = "V")]
    pub version: bool,
    /// Loads the scenario document (JSON)
    #[options(short = "f", meta = "FILE")]
    pub file: String,

    /// Sets concurrent workers per target (default: 50)
    #[options(short = "c")]
    pub concurrency: Option<usize>,
    /// Sets requests per target (default: 200)
    #[options(short = "n")]
    pub requests: Option<usize>,
    /// Sets maximum requests per second (default: unlimited)
    #[options(short = "q", meta = "QPS")]
    pub qps: f64,
    /// Sets per-request timeout, in seconds (default: 10)
    #[options(no_short, meta = "VALUE")]
    pub timeout: Option<String>,
    /// Stops each target after (30s, 20m, 3h, 1h30m, etc)
    #[options(short = "t", meta = "TIME")]
    pub run_time: String,
    /// Sets log file name
    #[options(short = "G", meta = "NAME")]
    pub log_file: String,
    /// Increases log file level (-g, -gg, etc)
    #[options(short = "g", count)]
    pub log_level: u8,
    /// Decreases verbosity
    #[options(no_short, count)]
    pub quiet: u8,
    /// Increases verbosity (-v, -vv, etc)
    #[options(
        count,
        short = "v",
        // Add a blank line and then a 'Transport:' header after this option
        help = "Increases verbosity (-v, -vv, etc)\n\nTransport:"
    )]
    pub verbose: u8,

    /// Doesn't request gzip compressed responses
    #[options(no_short)]
    pub disable_compression: bool,
    /// Opens a new connection for every request
    #[options(no_short)]
    pub disable_keepalive: bool,
    /// Doesn't follow redirects
    #[options(no_short)]
    pub disable_redirects: bool,
    /// Uses HTTP/2
    #[options(no_short)]
    pub h2: bool,
    /// Sends requests through a proxy
    // Add a blank line and then a 'Reports:' header after this option
    #[options(short = "x", meta = "URL", help = "Sends requests through a proxy\n\nReports:")]
    pub proxy: String,

    /// Doesn't display metrics
    #[options(no_short)]
    pub no_print_metrics: bool,
    /// Creates a report file (.md or .json)
    #[options(no_short, meta = "NAME")]
    pub report_file: String,
    /// Sets request log file name
    #[options(short = "R", meta = "NAME")]
    pub request_log: String,
    /// Sets request log format (csv, json, raw, pretty)
    #[options(
        no_short,
        meta = "FORMAT",
        help = "Sets request log format (csv, json, raw, pretty)\n\nAdvanced:"
    )]
    pub request_format: Option<LogFormat>,

    /// Exits instead of skipping a misconfigured target
    #[options(no_short)]
    pub abort_on_config_error: bool,
}
impl GoslingConfiguration {
    /// Validate that the configured options are consistent.
    pub fn validate(&self) -> Result<(), GoslingError> {
        // Can't set both --verbose and --quiet.
        if self.verbose > 0 && self.quiet > 0 {
            return Err(GoslingError::InvalidOption {
                option: "--verbose".to_string(),
                value: self.verbose.to_string(),
                detail: "--verbose can not be set with --quiet.".to_string(),
            });
        }

        if self.file.is_empty() {
            return Err(GoslingError::InvalidOption {
                option: "--file".to_string(),
                value: self.file.clone(),
                detail: "a scenario document must be set with --file.".to_string(),
            });
        }

        if self.request_format.is_some() && self.request_log.is_empty() {
            return Err(GoslingError::InvalidOption {
                option: "--request-format".to_string(),
                value: format!("{:?}", self.request_format),
                detail: "--request-format can not be set without --request-log.".to_string(),
            });
        }

        // The generated run configuration must be usable.
        let mut run_config = self.run_config()?;
        run_config.validate()?;

        Ok(())
    }

    /// Build the default run configuration applied to every target.
    ///
    /// Setting a run time without setting a request count runs each target for
    /// the run time, however many requests that takes.
    pub fn run_config(&self) -> Result<RunConfig, GoslingError> {
        let run_time = if self.run_time.is_empty() {
            Duration::ZERO
        } else {
            match util::parse_timespan(&self.run_time) {
                0 => {
                    return Err(GoslingError::InvalidOption {
                        option: "--run-time".to_string(),
                        value: self.run_time.clone(),
                        detail: "--run-time must be a timespan of at least 1 second.".to_string(),
                    })
                }
                seconds => Duration::from_secs(seconds as u64),
            }
        };

        let requests = match self.requests {
            Some(requests) => requests,
            None if !run_time.is_zero() => 0,
            None => DEFAULT_REQUESTS,
        };

        let timeout = match self.timeout.as_ref() {
            Some(timeout) => match util::get_float_from_string(Some(timeout.clone())) {
                Some(seconds) => util::seconds_to_duration("--timeout", seconds)?,
                None => {
                    return Err(GoslingError::InvalidOption {
                        option: "--timeout".to_string(),
                        value: timeout.clone(),
                        detail: "--timeout must be a number of seconds.".to_string(),
                    })
                }
            },
            None => util::seconds_to_duration("--timeout", DEFAULT_TIMEOUT)?,
        };

        let proxy = if self.proxy.is_empty() {
            None
        } else {
            Some(
                Url::parse(&self.proxy).map_err(|e| GoslingError::InvalidOption {
                    option: "--proxy".to_string(),
                    value: self.proxy.clone(),
                    detail: format!("--proxy must be a valid URL: {}", e),
                })?,
            )
        };

        Ok(RunConfig::default()
            .set_concurrency(self.concurrency.unwrap_or(DEFAULT_CONCURRENCY))
            .set_requests(requests)
            .set_qps(self.qps)
            .set_timeout(timeout)
            .set_run_time(run_time)
            .set_transport(TransportOptions {
                disable_compression: self.disable_compression,
                disable_keepalive: self.disable_keepalive,
                disable_redirects: self.disable_redirects,
                http2: self.h2,
                proxy,
            })
            .set_keep_records(!self.request_log.is_empty()))
    }

    /// Initialize the logger which writes to standard out and optionally to
    /// a log file.
    pub fn initialize_logger(&self) {
        // Configure output level.
        let debug_level = match self.verbose {
            0 => match self.quiet {
                0 => LevelFilter::Info,
                _ => LevelFilter::Warn,
            },
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Configure log file level.
        let log_level = match self.log_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
        loggers.push(SimpleLogger::new(debug_level, Config::default()));

        if !self.log_file.is_empty() {
            let log_to_file = PathBuf::from(&self.log_file);
            match std::fs::File::create(&log_to_file) {
                Ok(file) => loggers.push(WriteLogger::new(log_level, Config::default(), file)),
                Err(e) => eprintln!("failed to create {}: {}", log_to_file.display(), e),
            }
        }

        if let Err(e) = CombinedLogger::init(loggers) {
            info!("failed to initialize CombinedLogger: {}", e);
        }

        info!("Output verbosity level: {}", debug_level);
        if !self.log_file.is_empty() {
            info!(
                "Writing to log file {}, verbosity level: {}",
                self.log_file, log_level
            );
        }
    }
}
