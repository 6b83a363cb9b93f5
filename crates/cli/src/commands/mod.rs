pub mod ask;
pub mod clear;
pub mod config;
pub mod schema;
pub mod seed;

use datapilot_core::config::{AppConfig, LoadOptions};
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Runtime;

use crate::logging;

/// `(error_class, message, exit_code)` carried out of a command's async body.
pub type Failure = (&'static str, String, u8);

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with(command, message, None)
    }

    pub fn success_with(command: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub(crate) fn from_failure(command: &str, (error_class, message, exit_code): Failure) -> Self {
        Self::failure(command, error_class, message, exit_code)
    }

    /// Lines printed ahead of the envelope, such as streamed chunks. The
    /// envelope always stays on the last line.
    pub(crate) fn with_preamble(mut self, lines: &[String]) -> Self {
        if !lines.is_empty() {
            self.output = format!("{}\n{}", lines.join("\n"), self.output);
        }
        self
    }
}

/// Loads configuration, installs logging and builds the async runtime every
/// command body runs on.
pub(crate) fn prepare(
    command: &str,
    options: LoadOptions,
) -> Result<(AppConfig, Runtime), CommandResult> {
    let config = AppConfig::load(options).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })?;
    logging::init(&config.logging);

    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
            CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            )
        })?;

    Ok((config, runtime))
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::CommandResult;

    #[test]
    fn failure_envelope_carries_error_class_and_exit_code() {
        let result = CommandResult::failure("ask", "rate_limited", "wait 30 seconds", 7);
        let payload: Value = serde_json::from_str(&result.output).expect("json envelope");

        assert_eq!(result.exit_code, 7);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "rate_limited");
        assert!(payload.get("data").is_none());
    }

    #[test]
    fn preamble_keeps_envelope_on_last_line() {
        let result = CommandResult::success_with("ask", "20", Some(json!({ "iterations": 2 })))
            .with_preamble(&["{\"kind\":\"progress\"}".to_string()]);

        let last = result.output.lines().last().expect("envelope line");
        let payload: Value = serde_json::from_str(last).expect("json envelope");
        assert_eq!(payload["data"]["iterations"], 2);
        assert_eq!(result.output.lines().count(), 2);
    }
}
