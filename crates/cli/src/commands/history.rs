use std::sync::Arc;

use whistle_core::config::AppConfig;
use whistle_core::domain::expense::ExpenseRequestId;
use whistle_db::{connect_with_config, SqlApprovalStore};

use crate::commands::{engine_for, load_config, runtime, to_data, CommandResult, EXIT_DATABASE};

pub fn run(request_id: &str) -> CommandResult {
    match load_config("history") {
        Ok(config) => run_with(&config, request_id),
        Err(result) => result,
    }
}

/// Prints a request with every stage record, ordered by stage.
pub fn run_with(config: &AppConfig, request_id: &str) -> CommandResult {
    let runtime = match runtime("history") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };
    let request_id = ExpenseRequestId(request_id.trim().to_string());

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return CommandResult::failure(
                    "history",
                    "db_connectivity",
                    error.to_string(),
                    EXIT_DATABASE,
                );
            }
        };

        let engine = engine_for(config, Arc::new(SqlApprovalStore::new(pool.clone())));
        let result = match engine.history(&request_id).await {
            Ok(history) => {
                let active = history
                    .active_stage()
                    .map(|stage| format!("active stage {}", stage.stage_number))
                    .unwrap_or_else(|| "no active stage".to_string());
                CommandResult::success_with_data(
                    "history",
                    format!(
                        "{request_id}: payment status {}, {} record(s), {active}",
                        history.request.payment_status.as_str(),
                        history.records.len()
                    ),
                    to_data(&history),
                )
            }
            Err(error) => CommandResult::workflow_failure("history", &error),
        };
        pool.close().await;
        result
    })
}
