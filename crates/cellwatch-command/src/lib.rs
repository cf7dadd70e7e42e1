//! Command dispatch client for the modem's serial command-queue endpoint.
//!
//! Turns a fire-and-forget or blocking device command into a classified
//! `success` / `error` / `timeout` result with a client-enforced deadline.
mod client;
mod output;
mod types;

pub use client::{CommandClient, CommandClientConfig};
pub use output::{
    extract_output, extract_output_with_prefix, normalize_command_text, DEFAULT_COMMAND_PREFIX,
};
pub use types::{
    is_success, CommandError, CommandOutcome, CommandRequest, CommandResult, CommandStatus,
    QueuedCommand, DEFAULT_TIMEOUT_SECONDS,
};
