//! Optional request log.
//!
//! The request log is enabled with the `--request-log` run-time option. When
//! enabled, every outcome record of every target is written to the log file
//! once the target has finished, using Tokio's asynchronous
//! [`BufWriter`](https://docs.rs/tokio/*/tokio/io/struct.BufWriter.html).
//!
//! The format of the log is configured with `--request-format`:
//!  - `csv` (the default): one line per request, with a header line;
//!  - `json`: one JSON object per line;
//!  - `raw`: one line per request, in Rust debug format;
//!  - `pretty`: multiple lines per request, in Rust pretty debug format.
//!
//! A `json` line looks like:
//! ```json
//! {"target":"index","worker":3,"elapsed":10532,"latency":2051,"status_code":200,"size":612,"error":null}
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::metrics::OutcomeRecord;
use crate::report::Reporter;
use crate::runner::{BatchReport, TargetReport};
use crate::GoslingError;

/// Supported request log formats.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogFormat {
    #[default]
    Csv,
    Json,
    Raw,
    Pretty,
}

/// One line of the request log.
#[derive(Debug, Serialize)]
struct RequestLogEntry<'a> {
    target: &'a str,
    #[serde(flatten)]
    record: &'a OutcomeRecord,
}

/// Writes every outcome record to a file.
pub struct RequestLogReporter {
    path: String,
    format: LogFormat,
    file: Option<BufWriter<File>>,
}
impl RequestLogReporter {
    pub fn new(path: &str, format: LogFormat) -> Self {
        RequestLogReporter {
            path: path.to_string(),
            format,
            file: None,
        }
    }

    // The file is created when the first target is reported.
    async fn file(&mut self) -> Result<&mut BufWriter<File>, GoslingError> {
        if self.file.is_none() {
            let file = File::create(&self.path).await?;
            info!("writing requests to request_log: {}", self.path);
            let mut file = BufWriter::with_capacity(64 * 1024, file);
            if self.format == LogFormat::Csv {
                file.write_all(format!("{}\n", csv_header()).as_bytes())
                    .await?;
            }
            self.file = Some(file);
        }
        self.file.as_mut().ok_or_else(|| GoslingError::Resource {
            detail: format!("failed to open {}", self.path),
        })
    }
}

#[async_trait]
impl Reporter for RequestLogReporter {
    async fn report_target(&mut self, report: &TargetReport) -> Result<(), GoslingError> {
        let Some(result) = report.outcome.result() else {
            return Ok(());
        };
        let format = self.format;
        let file = self.file().await?;
        for record in &result.records {
            let entry = RequestLogEntry {
                target: &report.target,
                record,
            };
            let formatted = format_entry(format, &entry)?;
            file.write_all(format!("{}\n", formatted).as_bytes())
                .await?;
        }
        Ok(())
    }

    async fn finish(&mut self, _batch: &BatchReport) -> Result<(), GoslingError> {
        if let Some(file) = self.file.as_mut() {
            info!("flushing request_log: {}", self.path);
            file.flush().await?;
        }
        Ok(())
    }

    fn wants_records(&self) -> bool {
        true
    }
}

fn format_entry(format: LogFormat, entry: &RequestLogEntry) -> Result<String, GoslingError> {
    Ok(match format {
        LogFormat::Csv => format_csv(entry),
        LogFormat::Json => serde_json::to_string(entry)?,
        LogFormat::Raw => format!("{:?}", entry),
        LogFormat::Pretty => format!("{:#?}", entry),
    })
}

fn csv_header() -> &'static str {
    "target,worker,elapsed,latency,status_code,size,error"
}

fn format_csv(entry: &RequestLogEntry) -> String {
    format!(
        "{},{},{},{},{},{},{}",
        csv_field(entry.target),
        entry.record.worker,
        entry.record.elapsed,
        entry.record.latency,
        entry.record.status_code,
        entry.record.size,
        csv_field(entry.record.error.as_deref().unwrap_or("")),
    )
}

// Quote fields containing separators, quotes or line breaks.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
