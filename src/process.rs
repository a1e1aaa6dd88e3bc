//! External process invocation.
//!
//! Credential helpers are plain executables that speak over stdin/stdout.
//! [`ProcessRunner`] captures their output and exit code, and
//! [`ExecutableLookup`] decides where a named executable lives. Both are
//! traits so tests can substitute scripted implementations.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `-1` if the process was terminated by a signal.
    pub exit_code: i32,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a program to completion.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        program: &Path,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> std::io::Result<ProcessOutput>;
}

/// Finds executables by name.
pub trait ExecutableLookup: Send + Sync {
    fn find(&self, name: &str) -> Option<PathBuf>;
}

/// Runs programs with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> std::io::Result<ProcessOutput> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let (Some(input), Some(pipe)) = (stdin, child.stdin.as_mut()) {
            pipe.write_all(input).await?;
            pipe.shutdown().await?;
        }
        // Close our end so the child sees EOF.
        drop(child.stdin.take());

        let output = child.wait_with_output().await?;
        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

/// Searches the directories listed in `PATH`.
#[derive(Debug, Clone, Default)]
pub struct PathLookup;

impl ExecutableLookup for PathLookup {
    fn find(&self, name: &str) -> Option<PathBuf> {
        let paths = std::env::var_os("PATH")?;
        std::env::split_paths(&paths).find_map(|dir| {
            candidate_names(name)
                .into_iter()
                .map(|candidate| dir.join(candidate))
                .find(|path| path.is_file())
        })
    }
}

#[cfg(windows)]
fn candidate_names(name: &str) -> Vec<String> {
    vec![format!("{name}.exe"), format!("{name}.cmd"), name.to_string()]
}

#[cfg(not(windows))]
fn candidate_names(name: &str) -> Vec<String> {
    vec![name.to_string()]
}
