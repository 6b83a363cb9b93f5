use datapilot_core::config::LoadOptions;
use datapilot_core::SchemaSnapshot;
use datapilot_db::{connect_read_only, load_snapshot};
use serde_json::json;

use crate::commands::{prepare, CommandResult, Failure};

pub fn run(options: LoadOptions) -> CommandResult {
    let (config, runtime) = match prepare("schema", options) {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result: Result<SchemaSnapshot, Failure> = runtime.block_on(async {
        let pool = connect_read_only(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let snapshot = load_snapshot(&pool).await;
        pool.close().await;
        snapshot.map_err(|error| ("schema_load", error.to_string(), 4u8))
    });

    match result {
        Ok(snapshot) => {
            let tables = snapshot.tables().len();
            let data = json!({ "tables": snapshot.tables() });
            CommandResult::success_with(
                "schema",
                format!("{tables} tables\n{}", snapshot.render()),
                Some(data),
            )
        }
        Err(failure) => CommandResult::from_failure("schema", failure),
    }
}
