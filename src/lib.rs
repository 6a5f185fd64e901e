//! # Gosling
//!
//! Gosling is a scenario-driven HTTP load testing tool. A load test is described
//! by a scenario document: an ordered list of scenes, each an ordered list of
//! targets (a URL together with its method, body and headers). Gosling works
//! through the targets one at a time, hammering each with a configurable number
//! of concurrent workers, optionally capped to a maximum number of requests per
//! second, and reports latency, throughput and error statistics for every target.
//!
//! Gosling uses [`reqwest`](https://docs.rs/reqwest/) to provide the HTTP client
//! and [`tokio`](https://docs.rs/tokio/) to run the workers.
//!
//! ## Scenario documents
//!
//! Scenarios are JSON documents. Headers listed in `globalheaders` are sent with
//! every request, and can be overridden per target:
//!
//! ```json
//! {
//!   "globalheaders": [
//!     { "key": "Authorization", "value": "Bearer abc" }
//!   ],
//!   "scene": [
//!     {
//!       "name": "storefront",
//!       "urls": [
//!         { "name": "index", "url": "http://shop.local/", "method": "GET" },
//!         {
//!           "name": "add to cart",
//!           "url": "http://shop.local/cart",
//!           "method": "POST",
//!           "data": "{\"sku\": 42}",
//!           "headers": [{ "key": "Content-Type", "value": "application/json" }]
//!         }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! ## Running a load test
//!
//! ```bash
//! $ gosling -f storefront.json -c 20 -n 1000 -q 200
//! ```
//!
//! The above launches 20 concurrent workers against each target in turn, issuing
//! 1,000 requests per target at no more than 200 requests per second. Use
//! `-t 30s` instead of `-n` to run each target for a fixed amount of time. Pressing
//! ctrl-c stops the running target cleanly (in-flight requests are allowed to
//! finish and are included in the metrics) and skips any remaining targets.
//!
//! ## Embedding
//!
//! The engine and the orchestrator can also be driven directly:
//!
//! ```rust,no_run
//! use gosling::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), GoslingError> {
//!     let document = ScenarioDocument::from_file("storefront.json")?;
//!     let defaults = RunConfig::default().set_concurrency(10).set_requests(100);
//!     let batch = ScenarioRunner::new(defaults)
//!         .register_reporter(PrintReporter::new())
//!         .run_all(&document.scenes, &document.global_headers)
//!         .await?;
//!     println!("{} of {} targets completed", batch.completed(), document.target_count());
//!     Ok(())
//! }
//! ```

#[macro_use]
extern crate log;

pub mod client;
pub mod config;
pub mod engine;
pub mod interrupt;
pub mod logger;
pub mod metrics;
pub mod prelude;
pub mod report;
pub mod request;
pub mod runner;
pub mod scenario;
mod throttle;
pub mod util;

use std::{fmt, io};

pub use crate::config::GoslingConfiguration;

/// An enumeration of all errors Gosling can return.
#[derive(Debug)]
pub enum GoslingError {
    /// Wraps a [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    Io(io::Error),
    /// Wraps a ['tokio::task::JoinError'](https://docs.rs/tokio/*/tokio/task/struct.JoinError.html).
    TokioJoin(tokio::task::JoinError),
    /// Wraps a [`serde_json::Error`](https://docs.rs/serde_json/*/serde_json/struct.Error.html).
    Serde(serde_json::Error),
    /// Invalid option or value specified, may only be invalid in context.
    InvalidOption {
        /// The invalid option that caused this error, may be only invalid in context.
        option: String,
        /// The invalid value that caused this error, may be only invalid in context.
        value: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// A target could not be turned into a request template.
    InvalidTarget {
        /// The name of the offending target.
        target: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// The scenario document could not be loaded.
    InvalidDocument {
        /// Where the document was loaded from.
        path: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// The engine could not allocate what it needs to run.
    Resource {
        /// An optional explanation of the error.
        detail: String,
    },
}
/// Implement a helper to provide a text description of all possible types of errors.
impl GoslingError {
    fn describe(&self) -> &str {
        match *self {
            GoslingError::Io(_) => "io::Error",
            GoslingError::TokioJoin(_) => "tokio::task::JoinError",
            GoslingError::Serde(_) => "serde_json::Error",
            GoslingError::InvalidOption { .. } => "invalid option or value specified",
            GoslingError::InvalidTarget { .. } => "invalid target",
            GoslingError::InvalidDocument { .. } => "invalid scenario document",
            GoslingError::Resource { .. } => "failed to allocate load test resources",
        }
    }

    /// Returns `true` for errors caused by the configuration or the scenario
    /// document, which are detected before any request is sent.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            GoslingError::InvalidOption { .. }
                | GoslingError::InvalidTarget { .. }
                | GoslingError::InvalidDocument { .. }
        )
    }
}

/// Implement format trait to allow displaying errors.
impl fmt::Display for GoslingError {
    // Implement display of error with `{}` marker.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            GoslingError::Io(ref source) => {
                write!(f, "GoslingError: {} ({})", self.describe(), source)
            }
            GoslingError::TokioJoin(ref source) => {
                write!(f, "GoslingError: {} ({})", self.describe(), source)
            }
            GoslingError::Serde(ref source) => {
                write!(f, "GoslingError: {} ({})", self.describe(), source)
            }
            GoslingError::InvalidOption {
                ref option,
                ref value,
                ref detail,
            } => write!(
                f,
                "GoslingError: {} ({} = {:?}: {})",
                self.describe(),
                option,
                value,
                detail
            ),
            GoslingError::InvalidTarget {
                ref target,
                ref detail,
            } => write!(f, "GoslingError: {} ({}: {})", self.describe(), target, detail),
            GoslingError::InvalidDocument {
                ref path,
                ref detail,
            } => write!(f, "GoslingError: {} ({}: {})", self.describe(), path, detail),
            GoslingError::Resource { ref detail } => {
                write!(f, "GoslingError: {} ({})", self.describe(), detail)
            }
        }
    }
}

// Define the lower level source of this error, if any.
impl std::error::Error for GoslingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            GoslingError::Io(ref source) => Some(source),
            GoslingError::TokioJoin(ref source) => Some(source),
            GoslingError::Serde(ref source) => Some(source),
            _ => None,
        }
    }
}

/// Auto-convert IO errors.
impl From<io::Error> for GoslingError {
    fn from(err: io::Error) -> GoslingError {
        GoslingError::Io(err)
    }
}

/// Auto-convert TokioJoin errors.
impl From<tokio::task::JoinError> for GoslingError {
    fn from(err: tokio::task::JoinError) -> GoslingError {
        GoslingError::TokioJoin(err)
    }
}

/// Auto-convert serde_json errors.
impl From<serde_json::Error> for GoslingError {
    fn from(err: serde_json::Error) -> GoslingError {
        GoslingError::Serde(err)
    }
}
