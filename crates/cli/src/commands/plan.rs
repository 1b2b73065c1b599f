use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use whistle_core::config::AppConfig;
use whistle_core::domain::expense::{
    ExpenseRequest, ExpenseRequestId, PaymentMethod, PaymentMethodType, PaymentStatus, Requester,
};
use whistle_core::workflow::{InMemoryApprovalStore, WorkflowConfig};

use crate::commands::{engine_for, load_config, to_data, CommandResult};

/// Inputs for a dry-run workflow decision.
#[derive(Clone, Debug)]
pub struct PlanArgs {
    pub amount: Decimal,
    pub method: String,
    pub requires_approval: bool,
    pub requester: String,
    pub category: String,
}

pub fn run(args: &PlanArgs) -> CommandResult {
    match load_config("plan") {
        Ok(config) => run_with(&config, args),
        Err(result) => result,
    }
}

/// Decides the workflow for a hypothetical request. Nothing is persisted.
pub fn run_with(config: &AppConfig, args: &PlanArgs) -> CommandResult {
    let Some(method_type) = PaymentMethodType::parse(&args.method) else {
        return CommandResult::failure(
            "plan",
            "invalid_argument",
            format!(
                "unknown payment method `{}`; expected one of person_reimbursement, credit_card, \
                 direct_vendor, purchase_order",
                args.method
            ),
            1,
        );
    };
    if args.amount <= Decimal::ZERO {
        return CommandResult::failure(
            "plan",
            "invalid_argument",
            "amount must be greater than zero",
            1,
        );
    }

    let now = Utc::now();
    let request = ExpenseRequest {
        id: ExpenseRequestId("EXP-PLAN".to_string()),
        requester_id: args.requester.clone(),
        amount: args.amount,
        currency: "USD".to_string(),
        category: args.category.clone(),
        description: "dry-run plan".to_string(),
        business_justification: None,
        has_business_case: false,
        competitive_quote_count: 0,
        has_receipt: true,
        payment_method: PaymentMethod {
            method_type,
            requires_approval: args.requires_approval,
        },
        payment_status: PaymentStatus::PendingApproval,
        created_at: now,
        updated_at: now,
    };

    let engine = engine_for(config, Arc::new(InMemoryApprovalStore::new()));
    match engine.plan(&request, &Requester::from_id(args.requester.clone())) {
        Ok(plan) => CommandResult::success_with_data("plan", summarize(&plan), to_data(&plan)),
        Err(error) => CommandResult::workflow_failure("plan", &error),
    }
}

fn summarize(plan: &WorkflowConfig) -> String {
    if plan.is_auto_approved() {
        let reason = plan.auto_approval_reason.as_deref().unwrap_or("auto-approved");
        return format!("auto-approved: {reason}");
    }

    let names: Vec<&str> = plan.stages.iter().map(|stage| stage.name.as_str()).collect();
    format!("{} stage(s): {}", plan.stages.len(), names.join(" -> "))
}
