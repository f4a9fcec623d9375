//! Ingest execution: modules, pipelines, jobs and their scheduler.
//!
//! A job names the data sources to ingest and the modules to run on them.
//! The [`IngestJobScheduler`] runs each data-source-level pipeline once per
//! data source and fans every file out to the file-level pipeline over a
//! bounded worker set. Modules observe cancellation and time budgets through
//! the [`IngestJobContext`] they are handed.

mod context;
mod events;
mod job;
mod module;
pub mod modules;
mod pipeline;
mod registry;
mod scheduler;
mod terminator;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::IngestJobContext;
pub use events::IngestEvent;
pub use job::{
    IngestJob, IngestJobOptions, IngestJobSnapshot, JobId, JobState, ModuleFailure,
    ModuleSelection,
};
pub use module::{DataSourceIngestModule, FileIngestModule, IngestModule, ModuleGranularity};
pub use modules::{
    DataSourceSummaryModule, ExecuteCommandModule, HashCalculationModule,
    register_builtin_modules,
};
pub use pipeline::{IngestPipeline, IngestUnit, ModuleOutcome, ModuleReport, UnitId, UnitReport};
pub use registry::{ModuleDescriptor, ModuleFactory, ModuleRegistry};
pub use scheduler::{IngestJobScheduler, SchedulerConfig};
pub use terminator::IngestJobTerminator;
