//! Registry of available ingest modules.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::job::ModuleSelection;
use super::module::{DataSourceIngestModule, FileIngestModule, IngestModule, ModuleGranularity};
use super::pipeline::IngestPipeline;
use crate::error::{Error, Result};

/// Builds a module instance from its configuration.
pub type ModuleFactory = Arc<dyn Fn(&Value) -> Result<IngestModule> + Send + Sync>;

/// Public description of a registered module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub granularity: ModuleGranularity,
    pub description: String,
    /// Configuration handed to the factory.
    pub config: Value,
}

struct Registration {
    descriptor: ModuleDescriptor,
    factory: ModuleFactory,
}

/// Named module factories, in registration order.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<Vec<Registration>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module factory. Names must be unique.
    pub fn register(&self, descriptor: ModuleDescriptor, factory: ModuleFactory) -> Result<()> {
        let mut modules = self.modules.write();
        if modules.iter().any(|r| r.descriptor.name == descriptor.name) {
            return Err(Error::validation(format!(
                "module '{}' is already registered",
                descriptor.name
            )));
        }
        info!(
            module = %descriptor.name,
            granularity = %descriptor.granularity,
            "Registered ingest module"
        );
        modules.push(Registration {
            descriptor,
            factory,
        });
        Ok(())
    }

    pub fn register_file_module<M, F>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        config: Value,
        factory: F,
    ) -> Result<()>
    where
        M: FileIngestModule + 'static,
        F: Fn(&Value) -> Result<M> + Send + Sync + 'static,
    {
        self.register(
            ModuleDescriptor {
                name: name.into(),
                granularity: ModuleGranularity::FileLevel,
                description: description.into(),
                config,
            },
            Arc::new(move |config| Ok(IngestModule::File(Arc::new(factory(config)?)))),
        )
    }

    pub fn register_data_source_module<M, F>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        config: Value,
        factory: F,
    ) -> Result<()>
    where
        M: DataSourceIngestModule + 'static,
        F: Fn(&Value) -> Result<M> + Send + Sync + 'static,
    {
        self.register(
            ModuleDescriptor {
                name: name.into(),
                granularity: ModuleGranularity::DataSourceLevel,
                description: description.into(),
                config,
            },
            Arc::new(move |config| Ok(IngestModule::DataSource(Arc::new(factory(config)?)))),
        )
    }

    /// Replace the configuration of a registered module.
    ///
    /// The new configuration is checked by building one instance with it.
    pub fn configure(&self, name: &str, config: Value) -> Result<()> {
        let mut modules = self.modules.write();
        let registration = modules
            .iter_mut()
            .find(|r| r.descriptor.name == name)
            .ok_or_else(|| Error::not_found("module", name))?;
        (registration.factory)(&config)?;
        registration.descriptor.config = config;
        debug!(module = name, "Updated module configuration");
        Ok(())
    }

    /// Every registered module, in registration order.
    pub fn enumerate(&self) -> Vec<ModuleDescriptor> {
        self.modules
            .read()
            .iter()
            .map(|r| r.descriptor.clone())
            .collect()
    }

    /// Registered modules of one granularity.
    pub fn enumerate_granularity(&self, granularity: ModuleGranularity) -> Vec<ModuleDescriptor> {
        self.enumerate()
            .into_iter()
            .filter(|d| d.granularity == granularity)
            .collect()
    }

    pub fn descriptor(&self, name: &str) -> Option<ModuleDescriptor> {
        self.modules
            .read()
            .iter()
            .find(|r| r.descriptor.name == name)
            .map(|r| r.descriptor.clone())
    }

    /// Build a fresh instance of a module with its registered configuration.
    pub fn create(&self, name: &str) -> Result<IngestModule> {
        let (factory, config, granularity) = {
            let modules = self.modules.read();
            let registration = modules
                .iter()
                .find(|r| r.descriptor.name == name)
                .ok_or_else(|| Error::not_found("module", name))?;
            (
                Arc::clone(&registration.factory),
                registration.descriptor.config.clone(),
                registration.descriptor.granularity,
            )
        };

        let module = factory(&config)?;
        if module.granularity() != granularity {
            return Err(Error::validation(format!(
                "factory for '{name}' built a {} module, expected {granularity}",
                module.granularity()
            )));
        }
        Ok(module)
    }

    /// Check that a selection names registered modules of the right
    /// granularity, without duplicates.
    pub fn validate_selection(&self, selection: &ModuleSelection) -> Result<()> {
        if selection.is_empty() {
            return Err(Error::validation("no ingest modules selected"));
        }

        let checks = [
            (&selection.data_source_modules, ModuleGranularity::DataSourceLevel),
            (&selection.file_modules, ModuleGranularity::FileLevel),
        ];
        for (names, expected) in checks {
            let mut seen = HashSet::new();
            for name in names {
                if !seen.insert(name.as_str()) {
                    return Err(Error::validation(format!(
                        "module '{name}' is selected more than once"
                    )));
                }
                let descriptor = self
                    .descriptor(name)
                    .ok_or_else(|| Error::validation(format!("unknown ingest module '{name}'")))?;
                if descriptor.granularity != expected {
                    return Err(Error::validation(format!(
                        "module '{name}' is {} and cannot run as {expected}",
                        descriptor.granularity
                    )));
                }
            }
        }
        Ok(())
    }

    /// Build a pipeline from module names, skipping modules whose factory
    /// fails. Returns the pipeline and the failures.
    pub fn build_pipeline(
        &self,
        granularity: ModuleGranularity,
        names: &[String],
    ) -> Result<(IngestPipeline, Vec<(String, Error)>)> {
        let mut modules = Vec::with_capacity(names.len());
        let mut failures = Vec::new();
        for name in names {
            match self.create(name) {
                Ok(module) => modules.push(module),
                Err(e) => failures.push((name.clone(), e)),
            }
        }
        Ok((IngestPipeline::new(granularity, modules)?, failures))
    }
}
