use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    output::{extract_output_with_prefix, DEFAULT_COMMAND_PREFIX},
    CommandError, CommandOutcome, CommandRequest, CommandResult, CommandStatus, QueuedCommand,
    DEFAULT_TIMEOUT_SECONDS,
};

const MAX_ERROR_BODY_CHARS: usize = 800;

#[derive(Debug, Clone)]
/// Connection settings for the command-queue endpoint.
pub struct CommandClientConfig {
    pub api_base: String,
    pub queue_path: String,
    pub result_path: String,
    pub command_prefix: String,
    /// Added on top of the device wait to bound a hung transport.
    pub request_grace: Duration,
    pub fetch_timeout: Duration,
}

impl Default for CommandClientConfig {
    fn default() -> Self {
        Self {
            api_base: "http://192.168.225.1".to_string(),
            queue_path: "/cgi-bin/at_queue".to_string(),
            result_path: "/cgi-bin/at_result".to_string(),
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
            request_grace: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueueEnvelope {
    #[serde(default)]
    command_id: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    response: Option<WireResponse>,
    #[serde(default)]
    command: Option<WireCommand>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    status: String,
    #[serde(default)]
    raw_output: Option<String>,
    #[serde(default)]
    completion_time: Option<Value>,
    #[serde(default)]
    duration_ms: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireCommand {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
}

#[derive(Debug, Clone)]
/// Issues device commands through the command-queue endpoint.
pub struct CommandClient {
    http: reqwest::Client,
    config: CommandClientConfig,
}

impl CommandClient {
    pub fn new(config: CommandClientConfig) -> Result<Self, CommandError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("cellwatch-command"));
        let http = reqwest::Client::builder().default_headers(headers).build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &CommandClientConfig {
        &self.config
    }

    fn endpoint_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Sends `command_text`, waiting up to the default 30s for completion.
    pub async fn send_command(&self, command_text: &str) -> Result<CommandOutcome, CommandError> {
        self.send(command_text, true, DEFAULT_TIMEOUT_SECONDS).await
    }

    /// Dispatches one command. There is no retry; callers own retry policy.
    pub async fn send(
        &self,
        command_text: &str,
        wait_for_completion: bool,
        timeout_seconds: u64,
    ) -> Result<CommandOutcome, CommandError> {
        let request = CommandRequest::new(
            command_text,
            wait_for_completion,
            timeout_seconds,
            &self.config.command_prefix,
        )?;
        let deadline = request.client_deadline(self.config.request_grace);

        let mut builder = self
            .http
            .get(self.endpoint_url(&self.config.queue_path))
            .query(&[("command", request.normalized_text.as_str())]);
        if request.wait_for_completion {
            let timeout = request.timeout_seconds.to_string();
            builder = builder.query(&[("wait", "1"), ("timeout", timeout.as_str())]);
        }

        tracing::debug!(
            command = request.normalized_text.as_str(),
            wait = request.wait_for_completion,
            timeout_seconds = request.timeout_seconds,
            "dispatching device command"
        );
        let started = Instant::now();
        let envelope = self.execute(builder, deadline).await?;
        let outcome = classify_queue_envelope(
            &request,
            envelope,
            started.elapsed(),
            &self.config.command_prefix,
        );
        match &outcome {
            Ok(CommandOutcome::Completed(result)) => tracing::debug!(
                command = request.normalized_text.as_str(),
                duration_ms = result.duration_ms,
                "device command completed"
            ),
            Ok(CommandOutcome::Queued(queued)) => tracing::debug!(
                command = request.normalized_text.as_str(),
                command_id = queued.command_id.as_str(),
                "device command queued"
            ),
            Err(error) => tracing::debug!(
                command = request.normalized_text.as_str(),
                status = error.status().as_str(),
                error = %error,
                "device command failed"
            ),
        }
        outcome
    }

    /// Looks up a previously queued command; `None` while it is still pending.
    pub async fn fetch_result(
        &self,
        command_id: &str,
    ) -> Result<Option<CommandResult>, CommandError> {
        let builder = self
            .http
            .get(self.endpoint_url(&self.config.result_path))
            .query(&[("command_id", command_id)]);
        let envelope = self.execute(builder, self.config.fetch_timeout).await?;
        if let Some(message) = envelope_error(&envelope) {
            return Err(CommandError::Rejected {
                message,
                raw_output: response_output(envelope.response.as_ref()),
            });
        }
        match envelope.response {
            Some(response) => classify_response(
                response,
                DEFAULT_TIMEOUT_SECONDS,
                Duration::ZERO,
                &self.config.command_prefix,
            )
            .map(Some),
            None => Ok(None),
        }
    }

    async fn execute(
        &self,
        builder: reqwest::RequestBuilder,
        deadline: Duration,
    ) -> Result<QueueEnvelope, CommandError> {
        let seconds = deadline.as_secs();
        let call = async {
            let response = builder.timeout(deadline).send().await?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(CommandError::HttpStatus {
                    status: status.as_u16(),
                    body: truncate_for_error(&body, MAX_ERROR_BODY_CHARS),
                });
            }
            serde_json::from_str::<QueueEnvelope>(&body)
                .map_err(|error| CommandError::MalformedPayload(error.to_string()))
        };
        match tokio::time::timeout(deadline, call).await {
            Ok(Err(CommandError::Http(error))) if error.is_timeout() => {
                Err(CommandError::DeadlineElapsed { seconds })
            }
            Ok(result) => result,
            Err(_) => Err(CommandError::DeadlineElapsed { seconds }),
        }
    }
}

fn classify_queue_envelope(
    request: &CommandRequest,
    envelope: QueueEnvelope,
    elapsed: Duration,
    command_prefix: &str,
) -> Result<CommandOutcome, CommandError> {
    if let Some(message) = envelope_error(&envelope) {
        return Err(CommandError::Rejected {
            message,
            raw_output: response_output(envelope.response.as_ref()),
        });
    }

    if let Some(response) = envelope.response {
        return classify_response(response, request.timeout_seconds, elapsed, command_prefix)
            .map(CommandOutcome::Completed);
    }

    if request.wait_for_completion {
        return Err(CommandError::MalformedPayload(
            "wait-mode reply carried no response".to_string(),
        ));
    }

    let command = envelope.command;
    let command_id = envelope
        .command_id
        .as_ref()
        .and_then(value_to_string)
        .or_else(|| command.as_ref()?.id.as_ref().and_then(value_to_string))
        .ok_or_else(|| CommandError::MalformedPayload("reply missing command_id".to_string()))?;
    Ok(CommandOutcome::Queued(QueuedCommand {
        command_id,
        text: command
            .as_ref()
            .and_then(|command| command.text.clone())
            .or_else(|| Some(request.normalized_text.clone())),
        timestamp: command
            .as_ref()
            .and_then(|command| command.timestamp.as_ref())
            .and_then(value_to_string),
    }))
}

fn classify_response(
    response: WireResponse,
    timeout_seconds: u64,
    elapsed: Duration,
    command_prefix: &str,
) -> Result<CommandResult, CommandError> {
    let raw_output = response.raw_output.unwrap_or_default();
    match response.status.trim().to_ascii_lowercase().as_str() {
        "success" => {
            if raw_output.trim().is_empty() {
                return Err(CommandError::Rejected {
                    message: "device returned empty output".to_string(),
                    raw_output,
                });
            }
            let duration_ms = response
                .duration_ms
                .filter(|value| value.is_finite() && *value >= 0.0)
                .map(|value| value.round() as u64)
                .unwrap_or_else(|| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
            Ok(CommandResult {
                status: CommandStatus::Success,
                raw_output,
                completion_time: response.completion_time.as_ref().and_then(value_to_string),
                duration_ms,
            })
        }
        "error" => {
            let detail = extract_output_with_prefix(&raw_output, command_prefix);
            let message = if detail.is_empty() {
                "device reported an error".to_string()
            } else {
                detail
            };
            Err(CommandError::Rejected {
                message,
                raw_output,
            })
        }
        "timeout" => Err(CommandError::DeviceTimeout {
            timeout_seconds,
            raw_output,
        }),
        other => Err(CommandError::MalformedPayload(format!(
            "unknown response status `{other}`"
        ))),
    }
}

fn envelope_error(envelope: &QueueEnvelope) -> Option<String> {
    if let Some(error) = envelope
        .error
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return Some(error.to_string());
    }
    let status = envelope.status.as_deref().map(str::trim)?;
    status
        .eq_ignore_ascii_case("error")
        .then(|| "command endpoint reported an error".to_string())
}

fn response_output(response: Option<&WireResponse>) -> String {
    response
        .and_then(|response| response.raw_output.clone())
        .unwrap_or_default()
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn truncate_for_error(body: &str, max_chars: usize) -> String {
    if body.chars().count() <= max_chars {
        return body.to_string();
    }
    let mut truncated = body.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}
