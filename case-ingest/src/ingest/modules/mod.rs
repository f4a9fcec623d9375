//! Built-in ingest modules.

mod exec;
mod hash;
mod summary;

use std::sync::Arc;

use serde_json::json;

pub use exec::ExecuteCommandModule;
pub use hash::HashCalculationModule;
pub use summary::DataSourceSummaryModule;

use super::registry::ModuleRegistry;
use crate::Result;
use crate::case::ContentProvider;

/// Register the built-in modules.
///
/// `exec` is registered with an empty command and must be configured before
/// it can be selected.
pub fn register_builtin_modules(
    registry: &ModuleRegistry,
    provider: Arc<dyn ContentProvider>,
) -> Result<()> {
    registry.register_data_source_module(
        DataSourceSummaryModule::NAME,
        "Counts files and bytes of a data source",
        json!({}),
        move |_| Ok(DataSourceSummaryModule::new(Arc::clone(&provider))),
    )?;
    registry.register_file_module(
        HashCalculationModule::NAME,
        "Computes MD5 and SHA-256 digests of local files",
        json!({ "rehash": false }),
        HashCalculationModule::from_config,
    )?;
    registry.register_file_module(
        ExecuteCommandModule::NAME,
        "Runs a shell command for every file",
        json!({ "command": "", "timeout_secs": null }),
        ExecuteCommandModule::from_config,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::InMemoryCase;
    use crate::ingest::job::ModuleSelection;

    #[test]
    fn test_builtin_modules_are_registered() {
        let registry = ModuleRegistry::new();
        register_builtin_modules(&registry, Arc::new(InMemoryCase::new())).unwrap();

        let names: Vec<_> = registry.enumerate().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["summary", "hash", "exec"]);
        assert!(
            registry
                .validate_selection(
                    &ModuleSelection::new()
                        .with_data_source_module("summary")
                        .with_file_module("hash")
                )
                .is_ok()
        );
        // Unconfigured exec cannot be built.
        assert!(registry.create("exec").is_err());
        registry
            .configure("exec", json!({ "command": "true" }))
            .unwrap();
        assert!(registry.create("exec").is_ok());
    }
}
