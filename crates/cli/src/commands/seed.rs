use datapilot_core::config::LoadOptions;
use datapilot_db::{connect_with_settings, migrations, DemoDataset};

use crate::commands::{prepare, CommandResult, Failure};

pub fn run(options: LoadOptions) -> CommandResult {
    let (config, runtime) = match prepare("seed", options) {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        // Seeding writes, so it never goes through the read-only pool.
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seed_result = DemoDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 5u8))?;

        let run_result: Result<Vec<(&'static str, i64)>, Failure> = if verification.all_present {
            Ok(seed_result.tables_seeded)
        } else {
            Err(("seed_verification", verification_message(&verification.failed_checks()), 5u8))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(tables) => {
            let lines = tables
                .iter()
                .map(|(table, rows)| format!("  - {table}: {rows} rows"))
                .collect::<Vec<_>>();
            CommandResult::success(
                "seed",
                format!("demo dataset loaded:\n{}", lines.join("\n")),
            )
        }
        Err(failure) => CommandResult::from_failure("seed", failure),
    }
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
