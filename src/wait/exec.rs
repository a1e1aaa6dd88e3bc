use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::ReadinessCheck;
use crate::container::StartedContainer;
use crate::error::ContainerError;

/// Ready once a command run inside the container exits with the expected
/// code (and, optionally, prints the expected text).
#[derive(Debug, Clone)]
pub struct ExecProbe {
    cmd: Vec<String>,
    exit_code: i64,
    output_contains: Option<String>,
}

impl ExecProbe {
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            exit_code: 0,
            output_contains: None,
        }
    }

    pub fn with_exit_code(mut self, exit_code: i64) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// Requires the control-stripped output to contain `text`.
    pub fn with_output_containing(mut self, text: impl Into<String>) -> Self {
        self.output_contains = Some(text.into());
        self
    }
}

#[async_trait]
impl ReadinessCheck for ExecProbe {
    async fn is_ready(&self, container: &StartedContainer) -> Result<bool, ContainerError> {
        let result = container.exec(self.cmd.as_slice()).await?;
        if result.exit_code != Some(self.exit_code) {
            debug!(container = %container.id(), exit_code = ?result.exit_code, "Exec probe exit code mismatch");
            return Ok(false);
        }
        Ok(match &self.output_contains {
            Some(text) => result.output.contains(text.as_str()),
            None => true,
        })
    }

    fn describe(&self) -> String {
        format!("exec `{}`", self.cmd.join(" "))
    }
}

/// Ready once the container logs match a pattern a given number of times.
#[derive(Debug, Clone)]
pub struct LogPattern {
    pattern: Regex,
    times: usize,
}

impl LogPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            times: 1,
        })
    }

    /// Requires at least `times` matches; zero is treated as one.
    pub fn with_times(mut self, times: usize) -> Self {
        self.times = times.max(1);
        self
    }
}

#[async_trait]
impl ReadinessCheck for LogPattern {
    async fn is_ready(&self, container: &StartedContainer) -> Result<bool, ContainerError> {
        let logs = container.logs().await?;
        Ok(self.pattern.find_iter(&logs).count() >= self.times)
    }

    fn describe(&self) -> String {
        format!("log /{}/ x{}", self.pattern.as_str(), self.times)
    }
}
