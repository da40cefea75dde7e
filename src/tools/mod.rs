//! External tools: resolution at startup and process execution.

pub mod resolver;
pub mod runner;

pub use resolver::{ResolvedTools, Tool, ToolResolver};
pub use runner::{ProcessRunner, ToolOutput, ToolRunner};

use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, ToolTimeouts};
use crate::error::ConvertError;

/// Everything a converter needs to call external tools
#[derive(Clone)]
pub struct ToolContext {
    pub tools: ResolvedTools,
    pub runner: Arc<dyn ToolRunner>,
    pub timeouts: ToolTimeouts,
}

impl ToolContext {
    pub fn new(tools: ResolvedTools, runner: Arc<dyn ToolRunner>, timeouts: ToolTimeouts) -> Self {
        Self { tools, runner, timeouts }
    }

    /// Resolve every tool from the configuration and run them as child processes
    pub fn from_config(config: &Config) -> Self {
        let tools = ToolResolver::new(config.tools_dir.clone()).resolve_all();
        Self::new(tools, Arc::new(ProcessRunner), config.timeouts)
    }

    /// Path of `tool`, or `ExternalToolUnavailable`
    pub fn require(&self, tool: Tool) -> Result<&Path, ConvertError> {
        self.tools
            .get(tool)
            .ok_or_else(|| ConvertError::ExternalToolUnavailable(tool.name().to_string()))
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("tools", &self.tools)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}
