pub mod handlers;

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::config::Reconfigure;
use crate::core::wire::{self, WireError};

/// One entry of the batch returned by `GET /tasks/{session}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Task {
    pub id: i64,
    pub session: String,
    #[serde(rename = "task")]
    pub kind: String,
    #[serde(default)]
    args: Option<String>,
}

impl Task {
    #[cfg(test)]
    pub fn new(id: i64, session: &str, kind: &str, args: &str) -> Self {
        Self {
            id,
            session: session.to_string(),
            kind: kind.to_string(),
            args: Some(args.to_string()),
        }
    }

    pub fn args(&self) -> &str {
        self.args.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    List,
    Processes,
    ExecForeground,
    ExecBackground,
    Reconfigure,
    Download,
    Upload,
    Kill,
}

impl TaskKind {
    /// Maps the wire name to a kind. Unknown names yield `None` and are skipped
    /// by the dispatcher so older or newer controllers keep working.
    pub fn from_wire(name: &str) -> Option<Self> {
        let kind = match name {
            "ls" => Self::List,
            "ps" => Self::Processes,
            "exec_fg" => Self::ExecForeground,
            "exec_bg" => Self::ExecBackground,
            "reconfig" => Self::Reconfigure,
            "download" => Self::Download,
            "upload" => Self::Upload,
            "kill" => Self::Kill,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn parse(line: &str) -> Result<Self, TaskError> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(TaskError::EmptyCommandLine)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

/// A task whose arguments have been validated for its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List { path: PathBuf },
    Processes,
    ExecForeground(CommandLine),
    ExecBackground(CommandLine),
    Reconfigure(Reconfigure),
    Download { path: PathBuf },
    Upload { dest: PathBuf, contents: Vec<u8> },
    Kill,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("no binary given to execute")]
    EmptyCommandLine,
    #[error("upload expects <path>:<contents>, got {0} field(s)")]
    UploadFields(usize),
    #[error("invalid upload destination: {0}")]
    UploadDestination(WireError),
    #[error("invalid upload contents: {0}")]
    UploadContents(WireError),
}

impl Command {
    pub fn decode(kind: TaskKind, args: &str) -> Result<Self, TaskError> {
        let command = match kind {
            TaskKind::List => Self::List {
                path: PathBuf::from(args),
            },
            TaskKind::Processes => Self::Processes,
            TaskKind::ExecForeground => Self::ExecForeground(CommandLine::parse(args)?),
            TaskKind::ExecBackground => Self::ExecBackground(CommandLine::parse(args)?),
            TaskKind::Reconfigure => Self::Reconfigure(Reconfigure::parse(args)),
            TaskKind::Download => Self::Download {
                path: PathBuf::from(args),
            },
            TaskKind::Upload => {
                let fields: Vec<&str> = args.split(':').collect();
                let [dest, contents] = fields.as_slice() else {
                    return Err(TaskError::UploadFields(fields.len()));
                };
                let dest = wire::decode(dest).map_err(TaskError::UploadDestination)?;
                let contents = wire::decode_bin(contents).map_err(TaskError::UploadContents)?;
                Self::Upload {
                    dest: PathBuf::from(dest),
                    contents,
                }
            }
            TaskKind::Kill => Self::Kill,
        };
        Ok(command)
    }
}

/// Raw handler output, encoded by the shipper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    /// Uncompressed file contents; shipped through the binary encoding.
    File(Vec<u8>),
}

impl Payload {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn success() -> Self {
        Self::text("true")
    }
}
