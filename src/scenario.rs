//! Scenes, targets and the scenario document describing a load test.
//!
//! A scenario document holds the global headers and an ordered list of
//! [`Scene`]s. Each scene holds an ordered list of [`TargetDescriptor`]s. The
//! document is read once, before any load is generated, and is never modified
//! afterwards.
//!
//! Documents are JSON. The short keys `globalheaders`, `scene`, `urls` and
//! `data` are accepted as aliases of `global_headers`, `scenes`, `targets` and
//! `body`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::GoslingError;

/// A single header, applied globally or to one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    pub value: String,
}
impl Header {
    pub fn new(key: &str, value: &str) -> Self {
        Header {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Optional per-target values layered over the process-wide defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetOverrides {
    /// Number of concurrent workers.
    pub concurrency: Option<usize>,
    /// Total number of requests to issue.
    pub requests: Option<usize>,
    /// Maximum requests per second, 0 for unlimited.
    pub qps: Option<f64>,
    /// Per-request timeout in seconds, 0 for none.
    pub timeout: Option<f32>,
    /// How long to run this target (30s, 20m, 1h30m, etc).
    pub run_time: Option<String>,
}
impl TargetOverrides {
    pub fn is_empty(&self) -> bool {
        self == &TargetOverrides::default()
    }
}

fn default_method() -> String {
    "GET".to_string()
}

/// One HTTP endpoint/method/body/header combination to load test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Human readable name, used in logs and reports.
    #[serde(default)]
    pub name: String,
    /// The full URL to request.
    #[serde(default)]
    pub url: String,
    /// The HTTP method, `GET` if not set.
    #[serde(default = "default_method")]
    pub method: String,
    /// The raw request body, empty for no body.
    #[serde(default, alias = "data", rename = "body")]
    pub body: String,
    /// Headers for this target only, applied on top of the global headers.
    #[serde(default)]
    pub headers: Vec<Header>,
    /// Values overriding the process-wide run configuration.
    #[serde(default, skip_serializing_if = "TargetOverrides::is_empty")]
    pub overrides: TargetOverrides,
}
impl TargetDescriptor {
    /// Create a new `GET` target with no body and no headers.
    pub fn new(name: &str, url: &str) -> Self {
        TargetDescriptor {
            name: name.to_string(),
            url: url.to_string(),
            method: default_method(),
            body: String::new(),
            headers: Vec::new(),
            overrides: TargetOverrides::default(),
        }
    }

    pub fn set_method(mut self, method: &str) -> Self {
        self.method = method.to_string();
        self
    }

    pub fn set_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn set_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push(Header::new(key, value));
        self
    }

    pub fn set_overrides(mut self, overrides: TargetOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// The name used to identify this target in logs and reports: the
    /// configured name, or `METHOD url` if no name was set.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("{} {}", self.method.trim(), self.url)
        } else {
            self.name.clone()
        }
    }
}

/// A named group of targets tested together, in sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "urls", rename = "targets")]
    pub targets: Vec<TargetDescriptor>,
}
impl Scene {
    pub fn new(name: &str) -> Self {
        Scene {
            name: name.to_string(),
            targets: Vec::new(),
        }
    }

    pub fn register_target(mut self, target: TargetDescriptor) -> Self {
        self.targets.push(target);
        self
    }
}

/// A complete load test description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDocument {
    #[serde(default, alias = "globalheaders", rename = "global_headers")]
    pub global_headers: Vec<Header>,
    #[serde(default, alias = "scene", rename = "scenes")]
    pub scenes: Vec<Scene>,
}
impl ScenarioDocument {
    /// Load and validate a scenario document from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, GoslingError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| GoslingError::InvalidDocument {
                path: path.display().to_string(),
                detail: format!("failed to read document: {}", e),
            })?;
        let document = Self::parse(&path.display().to_string(), &contents)?;
        info!(
            "loaded {} scenes with {} targets from {}",
            document.scenes.len(),
            document.target_count(),
            path.display()
        );
        Ok(document)
    }

    /// Parse and validate a scenario document from a JSON string.
    ///
    /// `source` is only used to identify the document in errors.
    pub fn parse(source: &str, contents: &str) -> Result<Self, GoslingError> {
        let document: ScenarioDocument =
            serde_json::from_str(contents).map_err(|e| GoslingError::InvalidDocument {
                path: source.to_string(),
                detail: e.to_string(),
            })?;
        document.validate(source)?;
        Ok(document)
    }

    /// Confirm the document describes at least one target.
    ///
    /// Individual targets are validated later, when their request template is
    /// built, so a single bad target doesn't prevent the others from running.
    pub fn validate(&self, source: &str) -> Result<(), GoslingError> {
        if self.target_count() == 0 {
            return Err(GoslingError::InvalidDocument {
                path: source.to_string(),
                detail: "no targets are defined".to_string(),
            });
        }
        for header in &self.global_headers {
            if header.key.trim().is_empty() {
                return Err(GoslingError::InvalidDocument {
                    path: source.to_string(),
                    detail: "global header with an empty key".to_string(),
                });
            }
        }
        for (index, scene) in self.scenes.iter().enumerate() {
            if scene.targets.is_empty() {
                warn!("scene {} ({}) has no targets", index + 1, scene.name);
            }
        }
        Ok(())
    }

    /// Total number of targets across all scenes.
    pub fn target_count(&self) -> usize {
        self.scenes.iter().map(|scene| scene.targets.len()).sum()
    }
}
