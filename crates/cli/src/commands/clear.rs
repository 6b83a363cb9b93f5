use datapilot_core::config::LoadOptions;
use serde_json::json;

use crate::commands::{prepare, CommandResult};
use crate::session;

pub fn run(options: LoadOptions, thread: &str) -> CommandResult {
    let (config, _runtime) = match prepare("clear", options) {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    match session::remove(&config.memory.session_dir, thread) {
        Ok(removed) => {
            tracing::info!(event_name = "cli.session.cleared", thread_id = thread, removed);
            let message = if removed {
                format!("cleared history for thread `{thread}`")
            } else {
                format!("no history stored for thread `{thread}`")
            };
            CommandResult::success_with(
                "clear",
                message,
                Some(json!({ "thread_id": thread, "removed": removed })),
            )
        }
        Err(error) => CommandResult::failure("clear", "session_persist", format!("{error:#}"), 6),
    }
}
