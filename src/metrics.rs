//! Outcome records and the per-target aggregate built from them.
//!
//! Every request a worker dispatches produces exactly one [`OutcomeRecord`],
//! whether it completed, failed or timed out. The records of one run are sent
//! to a single collector which folds them into a [`RunResult`]: request and
//! error counts, latency and size [`Distribution`]s, and per-status-code and
//! per-error counters.
//!
//! Latencies are recorded in microseconds and displayed in milliseconds.

use chrono::prelude::*;
use itertools::Itertools;
use num_format::{Locale, ToFormattedString};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::engine::StopReason;
use crate::util;

/// The percentiles included in reports.
pub const PERCENTILES: [f64; 7] = [0.1, 0.25, 0.5, 0.75, 0.9, 0.95, 0.99];

/// Number of buckets in the latency histogram.
const HISTOGRAM_BUCKETS: usize = 10;

/// The outcome of one request attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Index of the worker that dispatched the request.
    pub worker: usize,
    /// Microseconds between the start of the run and dispatch.
    pub elapsed: u64,
    /// Microseconds from dispatch until the final byte was read, or the error.
    pub latency: u64,
    /// The response status code, 0 if no response was received.
    pub status_code: u16,
    /// Size of the response body in bytes.
    pub size: u64,
    /// Why the request failed, if it did.
    pub error: Option<String>,
}
impl OutcomeRecord {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A compact distribution of values.
///
/// Values are counted in rounded buckets so a run of any length needs a
/// bounded amount of memory: values below 1,000 are stored exactly, larger
/// values are rounded to three significant digits. The minimum, maximum and
/// mean are exact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    /// Rounded value to number of times seen.
    pub counts: BTreeMap<u64, usize>,
    /// Number of values recorded.
    pub count: usize,
    /// Sum of all values recorded.
    pub total: u64,
    pub min: u64,
    pub max: u64,
}
impl Distribution {
    pub fn record(&mut self, value: u64) {
        if self.count == 0 || value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
        self.count += 1;
        self.total += value;
        *self.counts.entry(round_value(value)).or_insert(0) += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn mean(&self) -> f64 {
        match self.count {
            0 => 0.0,
            _ => self.total as f64 / self.count as f64,
        }
    }

    /// The value that `percent` (0.0 to 1.0) of the recorded values are at or
    /// below, clamped to the exact minimum and maximum.
    pub fn percentile(&self, percent: f64) -> u64 {
        let wanted = (self.count as f64 * percent).round() as usize;
        let mut seen: usize = 0;
        for (value, count) in &self.counts {
            seen += count;
            if seen >= wanted {
                return (*value).clamp(self.min, self.max);
            }
        }
        self.max
    }

    /// Split the range between minimum and maximum into `buckets` evenly
    /// spaced marks, and count how many values fall at or below each mark
    /// (and above the previous one).
    pub fn histogram(&self, buckets: usize) -> Vec<(u64, usize)> {
        if self.count == 0 || buckets == 0 {
            return Vec::new();
        }
        let step = (self.max - self.min) as f64 / buckets as f64;
        let mut marks: Vec<(u64, usize)> = (1..=buckets)
            .map(|i| ((self.min as f64 + step * i as f64).round() as u64, 0))
            .collect();
        // Rounding may leave the last mark short of the maximum.
        if let Some(last) = marks.last_mut() {
            last.0 = self.max;
        }
        let mut bucket = 0;
        for (value, count) in &self.counts {
            let value = (*value).clamp(self.min, self.max);
            while bucket < marks.len() - 1 && value > marks[bucket].0 {
                bucket += 1;
            }
            marks[bucket].1 += count;
        }
        marks.into_iter().dedup_by(|a, b| a.0 == b.0).collect()
    }
}

/// Round values so similar values are counted together.
fn round_value(value: u64) -> u64 {
    if value < 1_000 {
        return value;
    }
    let mut scale = 1;
    while value / scale >= 1_000 {
        scale *= 10;
    }
    (value + scale / 2) / scale * scale
}

/// Folds outcome records into counters as they arrive, in any order.
#[derive(Debug, Default)]
pub(crate) struct RunMetrics {
    pub(crate) requests: usize,
    pub(crate) errors: usize,
    pub(crate) latency: Distribution,
    pub(crate) size: Distribution,
    pub(crate) status_codes: BTreeMap<u16, usize>,
    pub(crate) error_kinds: BTreeMap<String, usize>,
    pub(crate) records: Option<Vec<OutcomeRecord>>,
}
impl RunMetrics {
    pub(crate) fn new(keep_records: bool) -> Self {
        RunMetrics {
            records: if keep_records { Some(Vec::new()) } else { None },
            ..Default::default()
        }
    }

    pub(crate) fn record(&mut self, record: OutcomeRecord) {
        self.requests += 1;
        self.latency.record(record.latency);
        match record.error.as_ref() {
            Some(error) => {
                self.errors += 1;
                *self.error_kinds.entry(error.clone()).or_insert(0) += 1;
            }
            None => {
                self.size.record(record.size);
            }
        }
        if record.status_code > 0 {
            *self.status_codes.entry(record.status_code).or_insert(0) += 1;
        }
        if let Some(records) = self.records.as_mut() {
            records.push(record);
        }
    }
}

/// The aggregate result of load testing one target.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Display name of the target.
    pub name: String,
    /// Number of workers used.
    pub concurrency: usize,
    pub started: DateTime<Local>,
    pub stopped: DateTime<Local>,
    /// Wall-clock time from start until the last request was recorded.
    pub duration: Duration,
    /// The trigger that stopped the run.
    pub stop_reason: StopReason,
    /// Number of requests dispatched, each with exactly one outcome.
    pub requests: usize,
    /// Number of requests that got no response.
    pub errors: usize,
    /// Latency of every request, in microseconds.
    pub latency: Distribution,
    /// Size of every response body, in bytes.
    pub size: Distribution,
    pub status_codes: BTreeMap<u16, usize>,
    /// Error description to number of occurrences.
    pub error_kinds: BTreeMap<String, usize>,
    /// Every outcome record, only populated when the run keeps records.
    pub records: Vec<OutcomeRecord>,
}
impl RunResult {
    pub(crate) fn new(
        name: &str,
        concurrency: usize,
        started: DateTime<Local>,
        duration: Duration,
        stop_reason: StopReason,
        metrics: RunMetrics,
    ) -> Self {
        RunResult {
            name: name.to_string(),
            concurrency,
            started,
            stopped: Local::now(),
            duration,
            stop_reason,
            requests: metrics.requests,
            errors: metrics.errors,
            latency: metrics.latency,
            size: metrics.size,
            status_codes: metrics.status_codes,
            error_kinds: metrics.error_kinds,
            records: metrics.records.unwrap_or_default(),
        }
    }

    pub fn requests_per_second(&self) -> f64 {
        per_second(self.requests, self.duration)
    }

    /// Drop the raw records once they are no longer needed.
    pub fn clear_records(&mut self) {
        self.records = Vec::new();
    }

    pub(crate) fn fmt_summary(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " {} (stopped: {})", self.name, self.stop_reason)?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>10} | {:>10} | {:>10} | {:>11}",
            "Duration", "Workers", "Requests", "Errors", "Req/s"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>10} | {:>10} | {:>10} | {:>11.2}",
            format!("{:.4} secs", self.duration.as_secs_f64()),
            format_number(self.concurrency),
            format_number(self.requests),
            format_number(self.errors),
            self.requests_per_second(),
        )?;
        if self.size.is_empty() {
            return Ok(());
        }
        writeln!(
            fmt,
            " {:<24} | {:>10} bytes total, {} bytes/request",
            "Data",
            format_number(self.size.total as usize),
            format_number(self.size.mean().round() as usize),
        )
    }

    pub(crate) fn fmt_latency(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.latency.is_empty() {
            return Ok(());
        }
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>11} | {:>10} | {:>10} | {:>11}",
            "Latency (ms)", "Avg", "Min", "Max", "Median"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>11} | {:>10} | {:>10} | {:>11}",
            "",
            format!("{:.2}", self.latency.mean() / 1_000.0),
            format_millis(self.latency.min),
            format_millis(self.latency.max),
            format_millis(self.latency.percentile(0.5)),
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " Latency distribution (ms):")?;
        for percent in PERCENTILES {
            writeln!(
                fmt,
                "   {:>3}% in {}",
                (percent * 100.0) as usize,
                format_millis(self.latency.percentile(percent))
            )?;
        }

        let histogram = self.latency.histogram(HISTOGRAM_BUCKETS);
        let tallest = histogram.iter().map(|(_, count)| *count).max().unwrap_or(0);
        writeln!(fmt, " Latency histogram (ms):")?;
        for (mark, count) in histogram {
            let bar = match tallest {
                0 => 0,
                _ => count * 40 / tallest,
            };
            writeln!(
                fmt,
                "   {:>10} [{:>8}] |{}",
                format_millis(mark),
                format_number(count),
                "■".repeat(bar)
            )?;
        }
        Ok(())
    }

    pub(crate) fn fmt_status_codes(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.status_codes.is_empty() {
            return Ok(());
        }
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " Status codes: {}", prepare_status_codes(&self.status_codes))
    }

    pub(crate) fn fmt_errors(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error_kinds.is_empty() {
            return Ok(());
        }
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " {:<11} | Error", "Count")?;
        // Most frequent error first.
        for (error, count) in self
            .error_kinds
            .iter()
            .sorted_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)))
        {
            writeln!(
                fmt,
                " {:<11} | {}",
                format_number(*count),
                util::truncate_string(error, 64)
            )?;
        }
        Ok(())
    }
}

impl Serialize for RunResult {
    // Derived serialization would lose the computed rates and percentiles.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let percentiles: BTreeMap<String, u64> = PERCENTILES
            .iter()
            .map(|p| (format!("p{}", (p * 100.0) as usize), self.latency.percentile(*p)))
            .collect();

        let mut s = serializer.serialize_struct("RunResult", 16)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("concurrency", &self.concurrency)?;
        s.serialize_field("started", &self.started.to_rfc3339())?;
        s.serialize_field("stopped", &self.stopped.to_rfc3339())?;
        s.serialize_field("duration_ms", &(self.duration.as_millis() as u64))?;
        s.serialize_field("stop_reason", &self.stop_reason)?;
        s.serialize_field("requests", &self.requests)?;
        s.serialize_field("errors", &self.errors)?;
        s.serialize_field("requests_per_second", &self.requests_per_second())?;
        s.serialize_field("latency_us", &self.latency)?;
        s.serialize_field("latency_percentiles_us", &percentiles)?;
        s.serialize_field("size_bytes", &self.size)?;
        s.serialize_field("status_codes", &self.status_codes)?;
        s.serialize_field("errors_by_kind", &self.error_kinds)?;
        s.end()
    }
}

/// Implement format trait to allow displaying a run result.
impl fmt::Display for RunResult {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_summary(fmt)?;
        self.fmt_latency(fmt)?;
        self.fmt_status_codes(fmt)?;
        self.fmt_errors(fmt)
    }
}

/// Helper to calculate a rate over a duration.
pub(crate) fn per_second(total: usize, duration: Duration) -> f64 {
    let seconds = duration.as_secs_f64();
    if seconds == 0.0 {
        0.0
    } else {
        total as f64 / seconds
    }
}

/// Format large number in locale appropriate style.
pub(crate) fn format_number(number: usize) -> String {
    (number).to_formatted_string(&Locale::en)
}

/// Format microseconds as milliseconds.
pub(crate) fn format_millis(micros: u64) -> String {
    format!("{:.2}", micros as f64 / 1_000.0)
}

/// Helper to list status codes and their counts, `100 [200], 3 [404]`.
pub(crate) fn prepare_status_codes(status_code_counts: &BTreeMap<u16, usize>) -> String {
    status_code_counts
        .iter()
        .map(|(status_code, count)| format!("{} [{}]", format_number(*count), status_code))
        .join(", ")
}
