use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::output::normalize_command_text;

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates the classification a dispatched command resolves to.
pub enum CommandStatus {
    Success,
    Error,
    Timeout,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One device command as it will be put on the wire.
pub struct CommandRequest {
    pub text: String,
    pub normalized_text: String,
    pub timeout_seconds: u64,
    pub wait_for_completion: bool,
}

impl CommandRequest {
    pub fn new(
        text: &str,
        wait_for_completion: bool,
        timeout_seconds: u64,
        command_prefix: &str,
    ) -> Result<Self, CommandError> {
        if text.trim().is_empty() {
            return Err(CommandError::EmptyCommand);
        }
        Ok(Self {
            text: text.to_string(),
            normalized_text: normalize_command_text(text, command_prefix),
            timeout_seconds: timeout_seconds.max(1),
            wait_for_completion,
        })
    }

    /// Hard client-side bound for the whole network call.
    pub fn client_deadline(&self, grace: Duration) -> Duration {
        Duration::from_secs(self.timeout_seconds).saturating_add(grace)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// A command the device executed successfully.
pub struct CommandResult {
    pub status: CommandStatus,
    pub raw_output: String,
    pub completion_time: Option<String>,
    pub duration_ms: u64,
}

impl CommandResult {
    /// Human-readable output with echoed command lines and status markers removed.
    pub fn output(&self, command_prefix: &str) -> String {
        crate::output::extract_output_with_prefix(&self.raw_output, command_prefix)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// A command accepted by the queue but not waited on.
pub struct QueuedCommand {
    pub command_id: String,
    pub text: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `CommandOutcome` values.
pub enum CommandOutcome {
    Completed(CommandResult),
    Queued(QueuedCommand),
}

impl CommandOutcome {
    pub fn completed(&self) -> Option<&CommandResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Queued(_) => None,
        }
    }

    pub fn into_completed(self) -> Option<CommandResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Queued(_) => None,
        }
    }
}

pub fn is_success(result: &CommandResult) -> bool {
    result.status == CommandStatus::Success && !result.raw_output.trim().is_empty()
}

#[derive(Debug, Error)]
/// Enumerates supported `CommandError` values.
pub enum CommandError {
    #[error("command text must not be empty")]
    EmptyCommand,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("command endpoint returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("command endpoint did not answer within {seconds}s")]
    DeadlineElapsed { seconds: u64 },
    #[error("malformed command payload: {0}")]
    MalformedPayload(String),
    #[error("device rejected command: {message}")]
    Rejected { message: String, raw_output: String },
    #[error("device did not complete command within {timeout_seconds}s")]
    DeviceTimeout {
        timeout_seconds: u64,
        raw_output: String,
    },
}

impl CommandError {
    /// Every failure is either an explicit device timeout or an error.
    pub fn status(&self) -> CommandStatus {
        match self {
            Self::DeviceTimeout { .. } => CommandStatus::Timeout,
            _ => CommandStatus::Error,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.status() == CommandStatus::Timeout
    }

    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::Rejected { raw_output, .. } | Self::DeviceTimeout { raw_output, .. } => {
                Some(raw_output.as_str())
            }
            _ => None,
        }
    }
}
