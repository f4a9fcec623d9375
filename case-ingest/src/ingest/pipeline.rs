//! Ordered execution of ingest modules against one unit.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use process_utils::TerminationCode;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::context::IngestJobContext;
use super::job::ModuleFailure;
use super::module::{IngestModule, ModuleGranularity};
use crate::case::{Content, DataSource, ObjectId};
use crate::error::{Error, Result};

/// A unit of work handed to a pipeline.
#[derive(Debug, Clone, Copy)]
pub enum IngestUnit<'a> {
    DataSource(&'a DataSource),
    File(&'a Content),
}

impl IngestUnit<'_> {
    pub fn id(&self) -> UnitId {
        match self {
            IngestUnit::DataSource(ds) => UnitId::DataSource(ds.id),
            IngestUnit::File(file) => UnitId::File(file.id),
        }
    }

    pub fn granularity(&self) -> ModuleGranularity {
        match self {
            IngestUnit::DataSource(_) => ModuleGranularity::DataSourceLevel,
            IngestUnit::File(_) => ModuleGranularity::FileLevel,
        }
    }
}

/// Identity of a unit in reports and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum UnitId {
    DataSource(ObjectId),
    File(ObjectId),
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitId::DataSource(id) => write!(f, "data-source:{id}"),
            UnitId::File(id) => write!(f, "file:{id}"),
        }
    }
}

/// How one module invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ModuleOutcome {
    Completed,
    Terminated { code: TerminationCode },
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    pub module: String,
    pub outcome: ModuleOutcome,
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
}

/// Result of running one unit through a pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub unit: UnitId,
    /// Modules that were invoked, in order.
    pub modules: Vec<ModuleReport>,
    /// Modules left unexecuted after a termination.
    pub skipped_modules: Vec<String>,
    /// The code attributed to this unit.
    pub termination_code: TerminationCode,
}

impl UnitReport {
    fn new(unit: UnitId) -> Self {
        Self {
            unit,
            modules: Vec::new(),
            skipped_modules: Vec::new(),
            termination_code: TerminationCode::None,
        }
    }

    /// Failures raised by modules on this unit.
    pub fn failures(&self) -> impl Iterator<Item = ModuleFailure> + '_ {
        self.modules.iter().filter_map(|report| match &report.outcome {
            ModuleOutcome::Failed { message } => Some(ModuleFailure {
                module: report.module.clone(),
                unit: self.unit,
                message: message.clone(),
            }),
            _ => None,
        })
    }

    pub fn failed_modules(&self) -> Vec<String> {
        self.failures().map(|f| f.module).collect()
    }

    #[cfg(test)]
    pub(crate) fn for_test(
        unit: UnitId,
        termination_code: TerminationCode,
        failures: Vec<(String, String)>,
    ) -> Self {
        let mut report = Self::new(unit);
        report.termination_code = termination_code;
        report.modules = failures
            .into_iter()
            .map(|(module, message)| ModuleReport {
                module,
                outcome: ModuleOutcome::Failed { message },
                duration: Duration::ZERO,
            })
            .collect();
        report
    }
}

fn serialize_millis<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u128(duration.as_millis())
}

/// An ordered list of modules of one granularity.
#[derive(Debug)]
pub struct IngestPipeline {
    granularity: ModuleGranularity,
    modules: Vec<IngestModule>,
}

impl IngestPipeline {
    /// Build a pipeline; every module must have the pipeline's granularity.
    pub fn new(granularity: ModuleGranularity, modules: Vec<IngestModule>) -> Result<Self> {
        if let Some(module) = modules.iter().find(|m| m.granularity() != granularity) {
            return Err(Error::validation(format!(
                "module '{}' is {} but the pipeline is {}",
                module.name(),
                module.granularity(),
                granularity
            )));
        }
        Ok(Self {
            granularity,
            modules,
        })
    }

    pub fn granularity(&self) -> ModuleGranularity {
        self.granularity
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name().to_string()).collect()
    }

    /// Start every module. Modules that fail to start are removed from the
    /// pipeline and returned with their error.
    pub async fn start_up(&mut self, ctx: &IngestJobContext) -> Vec<(String, Error)> {
        let mut failed = Vec::new();
        let mut started = Vec::with_capacity(self.modules.len());
        for module in self.modules.drain(..) {
            match module.start_up(ctx).await {
                Ok(()) => started.push(module),
                Err(e) => {
                    error!(
                        job_id = %ctx.job_id(),
                        module = module.name(),
                        error = %e,
                        "Ingest module failed to start"
                    );
                    failed.push((module.name().to_string(), e));
                }
            }
        }
        self.modules = started;
        failed
    }

    pub async fn shut_down(&self, ctx: &IngestJobContext) {
        for module in &self.modules {
            module.shut_down(ctx).await;
        }
    }

    /// Run every module on `unit` in order.
    ///
    /// A failing module is recorded and the next module still runs. A module
    /// returning a termination code, or cancellation observed between
    /// modules, leaves the remaining modules unexecuted for this unit only.
    pub async fn run(&self, ctx: &IngestJobContext, unit: IngestUnit<'_>) -> Result<UnitReport> {
        if unit.granularity() != self.granularity {
            return Err(Error::validation(format!(
                "{} unit given to a {} pipeline",
                unit.granularity(),
                self.granularity
            )));
        }

        let unit_id = unit.id();
        let mut report = UnitReport::new(unit_id);

        for (index, module) in self.modules.iter().enumerate() {
            if ctx.is_cancelled() {
                report.termination_code = TerminationCode::Cancellation;
                report.skipped_modules = self.remaining_names(index);
                break;
            }

            let start = Instant::now();
            let invocation = match (module, unit) {
                (IngestModule::File(m), IngestUnit::File(file)) => m.process(ctx, file),
                (IngestModule::DataSource(m), IngestUnit::DataSource(ds)) => m.process(ctx, ds),
                _ => {
                    return Err(Error::validation(format!(
                        "module '{}' does not accept {}",
                        module.name(),
                        unit_id
                    )));
                }
            };
            let result = AssertUnwindSafe(invocation).catch_unwind().await;
            let duration = start.elapsed();

            let outcome = match result {
                Ok(Ok(TerminationCode::None)) => ModuleOutcome::Completed,
                Ok(Ok(code)) => ModuleOutcome::Terminated { code },
                Ok(Err(e)) => {
                    warn!(
                        job_id = %ctx.job_id(),
                        module = module.name(),
                        unit = %unit_id,
                        error = %e,
                        "Ingest module failed"
                    );
                    ModuleOutcome::Failed {
                        message: e.to_string(),
                    }
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(
                        job_id = %ctx.job_id(),
                        module = module.name(),
                        unit = %unit_id,
                        panic = %message,
                        "Ingest module panicked"
                    );
                    ModuleOutcome::Failed { message }
                }
            };

            let terminated = match &outcome {
                ModuleOutcome::Terminated { code } => Some(*code),
                _ => None,
            };
            report.modules.push(ModuleReport {
                module: module.name().to_string(),
                outcome,
                duration,
            });

            if let Some(code) = terminated {
                debug!(
                    job_id = %ctx.job_id(),
                    module = module.name(),
                    unit = %unit_id,
                    %code,
                    "Ingest module terminated early"
                );
                report.termination_code = code;
                report.skipped_modules = self.remaining_names(index + 1);
                break;
            }
        }

        Ok(report)
    }

    fn remaining_names(&self, from: usize) -> Vec<String> {
        self.modules[from..]
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "module panicked".to_string()
    }
}
