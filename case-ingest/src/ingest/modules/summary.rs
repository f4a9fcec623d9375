//! Data source summary module.

use std::sync::Arc;

use async_trait::async_trait;
use process_utils::TerminationCode;
use serde_json::json;
use tracing::info;

use crate::case::{ContentProvider, DataSource};
use crate::error::{Error, Result};
use crate::ingest::context::IngestJobContext;
use crate::ingest::module::DataSourceIngestModule;

/// Counts the files and bytes of a data source and reports them once.
pub struct DataSourceSummaryModule {
    provider: Arc<dyn ContentProvider>,
}

impl DataSourceSummaryModule {
    pub const NAME: &'static str = "summary";

    pub fn new(provider: Arc<dyn ContentProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl DataSourceIngestModule for DataSourceSummaryModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn process(
        &self,
        ctx: &IngestJobContext,
        data_source: &DataSource,
    ) -> Result<TerminationCode> {
        if ctx.is_cancelled() {
            return Ok(TerminationCode::Cancellation);
        }

        let provider = Arc::clone(&self.provider);
        let ds = data_source.clone();
        let files = tokio::task::spawn_blocking(move || provider.data_source_files(&ds))
            .await
            .map_err(|e| Error::module(Self::NAME, format!("summary task failed: {e}")))?
            .map_err(|e| Error::module(Self::NAME, e.to_string()))?;

        let bytes: u64 = files.iter().map(|f| f.size).sum();
        let unallocated = files.iter().filter(|f| f.unallocated).count();
        info!(
            job_id = %ctx.job_id(),
            data_source = %data_source.name,
            files = files.len(),
            bytes,
            unallocated,
            "Data source summary"
        );
        ctx.post_content_changed(
            data_source.id,
            Self::NAME,
            json!({ "files": files.len(), "bytes": bytes, "unallocated": unallocated }),
        );
        Ok(TerminationCode::None)
    }
}
