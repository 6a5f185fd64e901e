pub use crate::client::TransportOptions;
pub use crate::engine::{LoadEngine, RunConfig, RunHandle, StopHandle, StopReason};
pub use crate::interrupt::Interrupt;
pub use crate::logger::{LogFormat, RequestLogReporter};
pub use crate::metrics::{OutcomeRecord, RunResult};
pub use crate::report::{PrintReporter, ReportFileReporter, Reporter};
pub use crate::request::RequestTemplate;
pub use crate::runner::{BatchReport, ScenarioRunner, TargetOutcome, TargetReport};
pub use crate::scenario::{Header, Scene, ScenarioDocument, TargetDescriptor, TargetOverrides};
pub use crate::{GoslingConfiguration, GoslingError};
