//! Reporting.
//!
//! Reporters receive a [`TargetReport`] as soon as each target is done, and
//! the complete [`BatchReport`] once every target has run. Gosling provides
//! three:
//!  - [`PrintReporter`] prints results to stdout;
//!  - [`ReportFileReporter`] writes the batch to a Markdown or JSON file;
//!  - [`RequestLogReporter`](crate::logger::RequestLogReporter) writes every
//!    request to a log file.
//!
//! A failing reporter is logged and does not stop the batch.

mod markdown;

use async_trait::async_trait;
use std::path::Path;

use crate::runner::{BatchReport, TargetOutcome, TargetReport};
use crate::GoslingError;

#[async_trait]
pub trait Reporter: Send {
    /// Called once for every target, in the order the targets ran.
    async fn report_target(&mut self, report: &TargetReport) -> Result<(), GoslingError>;

    /// Called once after every target has been reported.
    async fn finish(&mut self, _batch: &BatchReport) -> Result<(), GoslingError> {
        Ok(())
    }

    /// Return `true` to receive every outcome record in
    /// [`RunResult::records`](crate::metrics::RunResult::records).
    fn wants_records(&self) -> bool {
        false
    }
}

/// Prints each result, and a summary of the batch, to stdout.
#[derive(Debug, Default)]
pub struct PrintReporter;
impl PrintReporter {
    pub fn new() -> Self {
        PrintReporter
    }
}

#[async_trait]
impl Reporter for PrintReporter {
    async fn report_target(&mut self, report: &TargetReport) -> Result<(), GoslingError> {
        match &report.outcome {
            TargetOutcome::Completed(result) => println!("\n{}", result),
            TargetOutcome::Skipped { error } => {
                println!("\n {}: skipped, {}", report.target, error)
            }
            TargetOutcome::Failed { error } => println!("\n {}: failed, {}", report.target, error),
            TargetOutcome::Canceled => (),
        }
        Ok(())
    }

    async fn finish(&mut self, batch: &BatchReport) -> Result<(), GoslingError> {
        println!("{}", batch);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ReportFormat {
    Markdown,
    Json,
}

/// Writes the batch to a file once every target has run. The format is
/// chosen by extension: `.md` for Markdown, `.json` for JSON.
#[derive(Debug)]
pub struct ReportFileReporter {
    path: String,
    format: ReportFormat,
}
impl ReportFileReporter {
    pub fn new(path: &str) -> Result<Self, GoslingError> {
        let extension = Path::new(path)
            .extension()
            .and_then(|extension| extension.to_str())
            .map(|extension| extension.to_lowercase());
        let format = match extension.as_deref() {
            Some("md") => ReportFormat::Markdown,
            Some("json") => ReportFormat::Json,
            _ => {
                return Err(GoslingError::InvalidOption {
                    option: "--report-file".to_string(),
                    value: path.to_string(),
                    detail: "the report file must end in .md or .json".to_string(),
                })
            }
        };
        Ok(ReportFileReporter {
            path: path.to_string(),
            format,
        })
    }
}

#[async_trait]
impl Reporter for ReportFileReporter {
    async fn report_target(&mut self, _report: &TargetReport) -> Result<(), GoslingError> {
        Ok(())
    }

    async fn finish(&mut self, batch: &BatchReport) -> Result<(), GoslingError> {
        let contents = match self.format {
            ReportFormat::Markdown => {
                let mut contents = Vec::new();
                markdown::write_markdown_report(&mut contents, batch)?;
                contents
            }
            ReportFormat::Json => serde_json::to_vec_pretty(batch)?,
        };
        tokio::fs::write(&self.path, contents).await?;
        info!("wrote report file to: {}", self.path);
        Ok(())
    }
}
