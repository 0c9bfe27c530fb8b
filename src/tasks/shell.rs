// ABOUTME: Shell command task - renders a command line from arguments and runs it
// ABOUTME: Distinguishes formatting faults from empty renders with a tagged error type

use indexmap::IndexMap;
use serde_json::{json, Value};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

use super::TaskFn;
use crate::engine::error::TaskError;

/// Why a command line could not be produced from the task's arguments.
///
/// The split matters for callers: a formatting fault means the template
/// raised while composing, while `NoCommand` means it completed but yielded
/// nothing runnable. Both are decided here, explicitly, never inferred from
/// the shape of a later failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateFault {
    /// Composition raised; carries the template's own message.
    Formatting(String),
    /// Composition completed without producing a command line.
    NoCommand,
}

/// Renders resolved arguments into a runnable command line.
pub trait CommandTemplate: Send + Sync + 'static {
    fn render(
        &self,
        args: &[Value],
        kwargs: &IndexMap<String, Value>,
    ) -> Result<String, TemplateFault>;
}

impl<F> CommandTemplate for F
where
    F: Fn(&[Value], &IndexMap<String, Value>) -> Result<String, TemplateFault>
        + Send
        + Sync
        + 'static,
{
    fn render(
        &self,
        args: &[Value],
        kwargs: &IndexMap<String, Value>,
    ) -> Result<String, TemplateFault> {
        self(args, kwargs)
    }
}

/// Task that composes a shell command line and runs it under `/bin/sh -c`.
///
/// On success the task's value is the exit code (always zero). A non-zero
/// exit, a failed render, or an unopenable redirect file each map to their
/// own fault in the engine's taxonomy.
pub struct ShellTask {
    name: String,
    template: Box<dyn CommandTemplate>,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
}

impl ShellTask {
    pub fn new(name: impl Into<String>, template: impl CommandTemplate) -> Self {
        Self {
            name: name.into(),
            template: Box::new(template),
            stdout: None,
            stderr: None,
        }
    }

    /// Task that always runs the same fixed command line.
    pub fn from_command(name: impl Into<String>, command: impl Into<String>) -> Self {
        let line = command.into();
        Self::new(name, move |_args: &[Value], _kwargs: &IndexMap<String, Value>| {
            if line.trim().is_empty() {
                Err(TemplateFault::NoCommand)
            } else {
                Ok(line.clone())
            }
        })
    }

    /// Redirect the command's stdout to a file, creating parent directories.
    pub fn with_stdout(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    /// Redirect the command's stderr to a file, creating parent directories.
    pub fn with_stderr(mut self, path: impl Into<PathBuf>) -> Self {
        self.stderr = Some(path.into());
        self
    }

    fn open_redirect(&self, path: &Path) -> Result<File, TaskError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| TaskError::ExecutionFailed {
                    task: self.name.clone(),
                    message: format!(
                        "could not create directory for redirect '{}': {e}",
                        path.display()
                    ),
                })?;
            }
        }
        File::create(path).map_err(|e| TaskError::ExecutionFailed {
            task: self.name.clone(),
            message: format!("could not open redirect file '{}': {e}", path.display()),
        })
    }
}

impl TaskFn for ShellTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(
        &self,
        args: &[Value],
        kwargs: &IndexMap<String, Value>,
    ) -> Result<Value, TaskError> {
        let line = self
            .template
            .render(args, kwargs)
            .map_err(|fault| match fault {
                TemplateFault::Formatting(message) => TaskError::BadFormatting {
                    task: self.name.clone(),
                    message,
                },
                TemplateFault::NoCommand => TaskError::NoResult {
                    task: self.name.clone(),
                },
            })?;

        debug!(task = %self.name, command = %line, "running shell command");

        let stdout = match &self.stdout {
            Some(path) => Stdio::from(self.open_redirect(path)?),
            None => Stdio::null(),
        };
        let stderr = match &self.stderr {
            Some(path) => Stdio::from(self.open_redirect(path)?),
            None => Stdio::null(),
        };

        let status = Command::new("/bin/sh")
            .arg("-c")
            .arg(&line)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .map_err(|e| TaskError::ExecutionFailed {
                task: self.name.clone(),
                message: format!("could not spawn shell: {e}"),
            })?;

        match status.code() {
            Some(0) => Ok(json!(0)),
            Some(code) => Err(TaskError::NonZeroExit {
                task: self.name.clone(),
                code,
            }),
            None => Err(TaskError::ExecutionFailed {
                task: self.name.clone(),
                message: "command terminated by signal".to_string(),
            }),
        }
    }
}
