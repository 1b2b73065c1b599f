use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Map};
use toml::Value;

use whistle_core::config::AppConfig;

use crate::commands::{load_config, CommandResult};

struct Entry {
    key_path: String,
    env_keys: &'static [&'static str],
    value: String,
}

pub fn run() -> CommandResult {
    match load_config("config") {
        Ok(config) => run_with(&config),
        Err(result) => result,
    }
}

/// Effective configuration with the source of each value. Precedence is
/// env > file > default; organization members are summarized by count.
pub fn run_with(config: &AppConfig) -> CommandResult {
    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    let mut data = Map::new();

    for entry in entries(config) {
        let source = field_source(
            &entry.key_path,
            entry.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", entry.key_path, entry.value));
        data.insert(entry.key_path, json!({ "value": entry.value, "source": source }));
    }

    CommandResult::success_with_data("config", lines.join("\n"), Some(data.into()))
}

fn entry(key_path: &str, env_keys: &'static [&'static str], value: impl ToString) -> Entry {
    Entry { key_path: key_path.to_string(), env_keys, value: value.to_string() }
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let workflow = &config.workflow;
    let mut entries = vec![
        entry("database.url", &["WHISTLE_DATABASE_URL"], &config.database.url),
        entry(
            "database.max_connections",
            &["WHISTLE_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections,
        ),
        entry(
            "database.timeout_secs",
            &["WHISTLE_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs,
        ),
        entry(
            "logging.level",
            &["WHISTLE_LOGGING_LEVEL", "WHISTLE_LOG_LEVEL"],
            &config.logging.level,
        ),
        entry(
            "logging.format",
            &["WHISTLE_LOGGING_FORMAT", "WHISTLE_LOG_FORMAT"],
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
        ),
        entry(
            "workflow.high_value_threshold",
            &["WHISTLE_WORKFLOW_HIGH_VALUE_THRESHOLD"],
            workflow.high_value_threshold,
        ),
        entry(
            "workflow.executive_threshold",
            &["WHISTLE_WORKFLOW_EXECUTIVE_THRESHOLD"],
            workflow.executive_threshold,
        ),
        entry("workflow.manager_deadline_hours", &[], workflow.manager_deadline_hours),
        entry("workflow.finance_deadline_hours", &[], workflow.finance_deadline_hours),
        entry("workflow.executive_deadline_hours", &[], workflow.executive_deadline_hours),
        entry(
            "workflow.default_escalation_role",
            &["WHISTLE_WORKFLOW_DEFAULT_ESCALATION_ROLE"],
            workflow.default_escalation_role.as_str(),
        ),
        entry("workflow.allow_delegation", &[], workflow.allow_delegation),
        entry(
            "workflow.notification_timeout_ms",
            &["WHISTLE_WORKFLOW_NOTIFICATION_TIMEOUT_MS"],
            workflow.notification_timeout_ms,
        ),
    ];

    for (method, policy) in &workflow.payment_methods {
        let limit = policy
            .auto_approval_limit
            .map(|limit| limit.to_string())
            .unwrap_or_else(|| "<none>".to_string());
        entries.push(entry(
            &format!("workflow.payment_methods.{}", method.as_str()),
            &[],
            format!(
                "auto_approval_limit={limit}, always_requires_approval={}",
                policy.always_requires_approval
            ),
        ));
    }

    entries.push(entry(
        "organization.members",
        &[],
        format!("{} member(s)", config.organization.members.len()),
    ));
    entries
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("whistle.toml"), PathBuf::from("config/whistle.toml")]
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
