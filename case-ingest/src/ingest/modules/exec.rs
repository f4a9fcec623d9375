//! Module running an external command for every file.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use process_utils::{TerminationCode, shell_command};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::case::Content;
use crate::error::{Error, Result};
use crate::ingest::context::IngestJobContext;
use crate::ingest::module::FileIngestModule;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ExecConfig {
    command: String,
    timeout_secs: Option<u64>,
}

/// Runs a shell command per file, killing it when the job is cancelled or
/// the command overruns its time budget.
///
/// The command line may use `{path}`, `{name}`, `{id}` and `{data_source}`.
pub struct ExecuteCommandModule {
    command: String,
    timeout: Option<Duration>,
}

impl ExecuteCommandModule {
    pub const NAME: &'static str = "exec";

    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: None,
        }
    }

    /// Override the job's process time budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let config: ExecConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::config(format!("exec: {e}")))?;
        if config.command.trim().is_empty() {
            return Err(Error::config("exec: 'command' must not be empty"));
        }
        let mut module = Self::new(config.command);
        if let Some(secs) = config.timeout_secs {
            module = module.with_timeout(Duration::from_secs(secs));
        }
        Ok(module)
    }

    fn substitute_variables(&self, ctx: &IngestJobContext, file: &Content) -> String {
        let path = file
            .local_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| file.path());
        self.command
            .replace("{path}", &path)
            .replace("{name}", &file.name)
            .replace("{id}", &file.id.to_string())
            .replace("{data_source}", &ctx.data_source().name)
    }
}

#[async_trait]
impl FileIngestModule for ExecuteCommandModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn process(&self, ctx: &IngestJobContext, file: &Content) -> Result<TerminationCode> {
        let command_line = self.substitute_variables(ctx, file);
        debug!(file_id = file.id, command = %command_line, "Executing command");

        let terminator = match self.timeout {
            Some(timeout) => ctx.process_terminator_with_timeout(timeout),
            None => ctx.process_terminator_with_global_timeout(true),
        };
        let mut cmd = shell_command(&command_line);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let outcome = ctx.execute(&mut cmd, &terminator).await?;
        if outcome.termination_code.is_terminated() {
            warn!(
                file_id = file.id,
                code = %outcome.termination_code,
                "Command terminated"
            );
            return Ok(outcome.termination_code);
        }

        match outcome.status {
            Some(status) if status.success() => {
                info!(file_id = file.id, duration_ms = outcome.duration.as_millis() as u64, "Command finished");
                Ok(TerminationCode::None)
            }
            Some(status) => Err(Error::module(
                Self::NAME,
                format!("command exited with {status}"),
            )),
            None => Err(Error::module(Self::NAME, "command produced no exit status")),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ingest::job::IngestJobOptions;
    use crate::ingest::test_support::{test_context, test_context_with_options};
    use serde_json::json;

    #[test]
    fn test_config_requires_command() {
        assert!(ExecuteCommandModule::from_config(&json!({})).is_err());
        assert!(ExecuteCommandModule::from_config(&json!({ "command": "  " })).is_err());
        let module =
            ExecuteCommandModule::from_config(&json!({ "command": "true", "timeout_secs": 3 }))
                .unwrap();
        assert_eq!(module.timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_substitute_variables() {
        let (ctx, _job) = test_context();
        let mut file = Content::new(42, 1, "a.txt");
        file.parent_path = "/docs".to_string();
        let module = ExecuteCommandModule::new("scan {path} {name} {id} {data_source}");
        assert_eq!(
            module.substitute_variables(&ctx, &file),
            "scan /docs/a.txt a.txt 42 image"
        );
    }

    #[tokio::test]
    async fn test_exit_status_maps_to_result() {
        let (ctx, _job) = test_context();
        let file = Content::new(1, 1, "a");
        let ok = ExecuteCommandModule::new("exit 0").process(&ctx, &file).await.unwrap();
        assert_eq!(ok, TerminationCode::None);

        let err = ExecuteCommandModule::new("exit 3").process(&ctx, &file).await.unwrap_err();
        assert!(matches!(err, Error::ModuleExecution { .. }));
    }

    #[tokio::test]
    async fn test_overrunning_command_times_out() {
        let (ctx, _job) = test_context();
        let code = ExecuteCommandModule::new("sleep 5")
            .with_timeout(Duration::from_millis(50))
            .process(&ctx, &Content::new(1, 1, "a"))
            .await
            .unwrap();
        assert_eq!(code, TerminationCode::Timeout);
    }

    #[tokio::test]
    async fn test_job_budget_applies_without_module_timeout() {
        let (ctx, _job) = test_context_with_options(IngestJobOptions {
            max_process_run_time_secs: Some(0),
            ..Default::default()
        });
        let code = ExecuteCommandModule::new("sleep 5")
            .process(&ctx, &Content::new(1, 1, "a"))
            .await
            .unwrap();
        assert_eq!(code, TerminationCode::Timeout);
    }
}
