//! Ingest module contract.

use std::sync::Arc;

use async_trait::async_trait;
use process_utils::TerminationCode;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::context::IngestJobContext;
use crate::Result;
use crate::case::{Content, DataSource};

/// Unit of work a module processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModuleGranularity {
    /// Invoked once per file.
    FileLevel,
    /// Invoked once per data source.
    DataSourceLevel,
}

/// A module that analyzes one file at a time.
///
/// Implementations are shared by all file workers of a pipeline and must
/// keep no per-file state between calls. A module that blocks on an external
/// operation should poll a terminator from the context and return its code.
#[async_trait]
pub trait FileIngestModule: Send + Sync {
    fn name(&self) -> &str;

    /// Called once per data source before any file is processed.
    async fn start_up(&self, _ctx: &IngestJobContext) -> Result<()> {
        Ok(())
    }

    /// Process one file. Returns [`TerminationCode::None`] when it ran to
    /// completion.
    async fn process(&self, ctx: &IngestJobContext, file: &Content) -> Result<TerminationCode>;

    /// Called once per data source after every file has been processed.
    async fn shut_down(&self, _ctx: &IngestJobContext) {}
}

/// A module that analyzes a whole data source in one call.
#[async_trait]
pub trait DataSourceIngestModule: Send + Sync {
    fn name(&self) -> &str;

    async fn start_up(&self, _ctx: &IngestJobContext) -> Result<()> {
        Ok(())
    }

    async fn process(
        &self,
        ctx: &IngestJobContext,
        data_source: &DataSource,
    ) -> Result<TerminationCode>;

    async fn shut_down(&self, _ctx: &IngestJobContext) {}
}

/// A module of either granularity.
#[derive(Clone)]
pub enum IngestModule {
    File(Arc<dyn FileIngestModule>),
    DataSource(Arc<dyn DataSourceIngestModule>),
}

impl IngestModule {
    pub fn name(&self) -> &str {
        match self {
            IngestModule::File(module) => module.name(),
            IngestModule::DataSource(module) => module.name(),
        }
    }

    pub fn granularity(&self) -> ModuleGranularity {
        match self {
            IngestModule::File(_) => ModuleGranularity::FileLevel,
            IngestModule::DataSource(_) => ModuleGranularity::DataSourceLevel,
        }
    }

    pub(crate) async fn start_up(&self, ctx: &IngestJobContext) -> Result<()> {
        match self {
            IngestModule::File(module) => module.start_up(ctx).await,
            IngestModule::DataSource(module) => module.start_up(ctx).await,
        }
    }

    pub(crate) async fn shut_down(&self, ctx: &IngestJobContext) {
        match self {
            IngestModule::File(module) => module.shut_down(ctx).await,
            IngestModule::DataSource(module) => module.shut_down(ctx).await,
        }
    }
}

impl std::fmt::Debug for IngestModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestModule")
            .field("name", &self.name())
            .field("granularity", &self.granularity())
            .finish()
    }
}
