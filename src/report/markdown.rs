use crate::metrics::{format_millis, prepare_status_codes};
use crate::runner::{BatchReport, TargetOutcome};
use crate::GoslingError;
use std::io::Write;

struct Markdown<'m, 'w, W: Write> {
    w: &'w mut W,
    batch: &'m BatchReport,
}

pub(crate) fn write_markdown_report<W: Write>(
    w: &mut W,
    batch: &BatchReport,
) -> Result<(), GoslingError> {
    Markdown { w, batch }.write()
}

impl<W: Write> Markdown<'_, '_, W> {
    pub fn write(mut self) -> Result<(), GoslingError> {
        self.write_header()?;
        self.write_overview()?;
        self.write_request_metrics()?;
        self.write_latency_metrics()?;
        self.write_status_code_metrics()?;
        self.write_error_metrics()?;
        self.write_skipped_targets()?;

        Ok(())
    }

    fn write_header(&mut self) -> Result<(), GoslingError> {
        writeln!(self.w, "# Gosling Load Test Report\n")?;

        Ok(())
    }

    fn write_overview(&mut self) -> Result<(), GoslingError> {
        let elapsed = (self.batch.stopped - self.batch.started).num_seconds().max(0);
        let (hours, minutes, seconds) = (elapsed / 3600, (elapsed / 60) % 60, elapsed % 60);
        let started = self.batch.started.format("%y-%m-%d %H:%M:%S");
        let stopped = self.batch.stopped.format("%y-%m-%d %H:%M:%S");
        let completed = self.batch.completed();
        let skipped = self.batch.skipped();
        let failed = self.batch.failed();
        let canceled = self.batch.canceled();

        write!(
            self.w,
            r#"
## Overview

| Started | Stopped | Elapsed | Completed | Skipped | Failed | Canceled |
| ------- | ------- | ------- | --------: | ------: | -----: | -------: |
| {started} | {stopped} | {hours:02}:{minutes:02}:{seconds:02} | {completed} | {skipped} | {failed} | {canceled} |
"#
        )?;

        if self.batch.interrupted {
            writeln!(self.w, "\nThe load test was interrupted.")?;
        }

        Ok(())
    }

    fn write_request_metrics(&mut self) -> Result<(), GoslingError> {
        write!(
            self.w,
            r#"
## Request Metrics

| Scene | Target | Stopped | Workers | # Requests | # Errors | Average (ms) | Min (ms) | Max (ms) | RPS |
| ----- | ------ | ------- | ------: | ---------: | -------: | -----------: | -------: | -------: | --: |
"#
        )?;

        for report in self.batch.targets() {
            let Some(result) = report.outcome.result() else {
                continue;
            };
            writeln!(
                self.w,
                r#"| {scene} | {target} | {reason} | {workers} | {requests} | {errors} | {average:.2} | {min} | {max} | {rps:.2} |"#,
                scene = report.scene,
                target = report.target,
                reason = result.stop_reason,
                workers = result.concurrency,
                requests = result.requests,
                errors = result.errors,
                average = result.latency.mean() / 1_000.0,
                min = format_millis(result.latency.min),
                max = format_millis(result.latency.max),
                rps = result.requests_per_second(),
            )?;
        }

        Ok(())
    }

    fn write_latency_metrics(&mut self) -> Result<(), GoslingError> {
        write!(
            self.w,
            r#"
## Latency Metrics

| Target | 10%ile (ms) | 25%ile (ms) | 50%ile (ms) | 75%ile (ms) | 90%ile (ms) | 95%ile (ms) | 99%ile (ms) |
| ------ | ----------: | ----------: | ----------: | ----------: | ----------: | ----------: | ----------: |
"#
        )?;

        for report in self.batch.targets() {
            let Some(result) = report.outcome.result() else {
                continue;
            };
            let percentile = |percent| format_millis(result.latency.percentile(percent));
            writeln!(
                self.w,
                r#"| {target} | {p10} | {p25} | {p50} | {p75} | {p90} | {p95} | {p99} |"#,
                target = report.target,
                p10 = percentile(0.1),
                p25 = percentile(0.25),
                p50 = percentile(0.5),
                p75 = percentile(0.75),
                p90 = percentile(0.9),
                p95 = percentile(0.95),
                p99 = percentile(0.99),
            )?;
        }

        Ok(())
    }

    fn write_status_code_metrics(&mut self) -> Result<(), GoslingError> {
        if self.batch.results().all(|result| result.status_codes.is_empty()) {
            return Ok(());
        }

        write!(
            self.w,
            r#"
## Status Code Metrics

| Target | Status Codes |
| ------ | ------------ |
"#
        )?;

        for report in self.batch.targets() {
            let Some(result) = report.outcome.result() else {
                continue;
            };
            let status_codes = prepare_status_codes(&result.status_codes);
            writeln!(self.w, r#"| {target} | {status_codes} |"#, target = report.target)?;
        }

        Ok(())
    }

    fn write_error_metrics(&mut self) -> Result<(), GoslingError> {
        if self.batch.results().all(|result| result.error_kinds.is_empty()) {
            return Ok(());
        }

        write!(
            self.w,
            r#"
## Error Metrics

| Target |  #  | Error |
| ------ | --: | ----- |
"#
        )?;

        for report in self.batch.targets() {
            let Some(result) = report.outcome.result() else {
                continue;
            };
            for (error, occurrences) in &result.error_kinds {
                writeln!(
                    self.w,
                    r#"| {target} | {occurrences} | {error} |"#,
                    target = report.target
                )?;
            }
        }

        Ok(())
    }

    fn write_skipped_targets(&mut self) -> Result<(), GoslingError> {
        if self.batch.skipped() + self.batch.failed() == 0 {
            return Ok(());
        }

        write!(
            self.w,
            r#"
## Skipped Targets

| Scene | Target | Outcome | Error |
| ----- | ------ | ------- | ----- |
"#
        )?;

        for report in self.batch.targets() {
            let (outcome, error) = match &report.outcome {
                TargetOutcome::Skipped { error } => ("skipped", error),
                TargetOutcome::Failed { error } => ("failed", error),
                _ => continue,
            };
            writeln!(
                self.w,
                r#"| {scene} | {target} | {outcome} | {error} |"#,
                scene = report.scene,
                target = report.target,
            )?;
        }

        Ok(())
    }
}
