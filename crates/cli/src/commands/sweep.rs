use std::sync::Arc;

use whistle_core::config::AppConfig;
use whistle_db::{connect_with_config, SqlApprovalStore};

use crate::commands::{engine_for, load_config, runtime, to_data, CommandResult, EXIT_DATABASE};

pub fn run() -> CommandResult {
    match load_config("sweep") {
        Ok(config) => run_with(&config),
        Err(result) => result,
    }
}

/// Runs one escalation sweep against the configured database.
pub fn run_with(config: &AppConfig) -> CommandResult {
    let runtime = match runtime("sweep") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return CommandResult::failure(
                    "sweep",
                    "db_connectivity",
                    error.to_string(),
                    EXIT_DATABASE,
                );
            }
        };

        let engine = engine_for(config, Arc::new(SqlApprovalStore::new(pool.clone())));
        let result = match engine.sweep().await {
            Ok(report) => CommandResult::success_with_data(
                "sweep",
                format!(
                    "escalated {} of {} overdue stage(s); {} skipped, {} failed",
                    report.escalated,
                    report.scanned,
                    report.skipped,
                    report.failures.len()
                ),
                to_data(&report),
            ),
            Err(error) => CommandResult::workflow_failure("sweep", &error),
        };
        engine.flush_notifications().await;
        pool.close().await;
        result
    })
}
