pub mod commands;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::process::ExitCode;

use commands::plan::PlanArgs;

#[derive(Debug, Parser)]
#[command(
    name = "whistle",
    about = "Whistle expense approval operator CLI",
    long_about = "Operate the Whistle approval engine: migrations, config inspection, dry-run \
                  workflow plans, escalation sweeps, and request history.",
    after_help = "Examples:\n  whistle migrate\n  \
                  whistle plan --amount 1500 --method direct_vendor --requires-approval\n  \
                  whistle sweep\n  whistle history --request-id EXP-2026-0001"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Decide the approval workflow for a hypothetical request without saving it")]
    Plan {
        #[arg(long, help = "Requested amount, e.g. 1500 or 62.50")]
        amount: Decimal,
        #[arg(
            long,
            default_value = "person_reimbursement",
            help = "person_reimbursement | credit_card | direct_vendor | purchase_order"
        )]
        method: String,
        #[arg(long, help = "Payment method is configured to always require approval")]
        requires_approval: bool,
        #[arg(long, default_value = "requester", help = "Requester id in the directory")]
        requester: String,
        #[arg(long, default_value = "general", help = "Expense category")]
        category: String,
    },
    #[command(about = "Escalate overdue pending stages once and report the outcome")]
    Sweep,
    #[command(about = "Show a request and all of its approval stages")]
    History {
        #[arg(long, help = "Expense request id")]
        request_id: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Plan { amount, method, requires_approval, requester, category } => {
            let args = PlanArgs { amount, method, requires_approval, requester, category };
            commands::plan::run(&args)
        }
        Command::Sweep => commands::sweep::run(),
        Command::History { request_id } => commands::history::run(&request_id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
