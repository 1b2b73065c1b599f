use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::approval::ApproverRole;
use crate::domain::expense::PaymentMethodType;
use crate::workflow::resolver::DirectoryMember;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub workflow: WorkflowSettings,
    pub risk: RiskSettings,
    pub organization: OrganizationConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Longest stage deadline a workflow may carry, one year.
pub const MAX_DEADLINE_HOURS: u32 = 8_760;

/// Business rules the workflow determiner and engine run against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkflowSettings {
    pub high_value_threshold: Decimal,
    pub executive_threshold: Decimal,
    pub manager_deadline_hours: u32,
    pub finance_deadline_hours: u32,
    pub executive_deadline_hours: u32,
    pub default_escalation_role: ApproverRole,
    pub allow_delegation: bool,
    pub notification_timeout_ms: u64,
    pub notifications: NotificationSettings,
    pub payment_methods: BTreeMap<PaymentMethodType, PaymentMethodPolicy>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethodPolicy {
    /// Highest amount approved without review; `None` means never.
    pub auto_approval_limit: Option<Decimal>,
    pub always_requires_approval: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub notify_on_activation: bool,
    pub notify_requester: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RiskSettings {
    pub medium_amount: Decimal,
    pub high_amount: Decimal,
    pub critical_amount: Decimal,
    pub high_risk_categories: Vec<String>,
    pub rejection_history_threshold: u32,
}

#[derive(Clone, Debug, Default)]
pub struct OrganizationConfig {
    pub members: Vec<DirectoryMember>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub high_value_threshold: Option<Decimal>,
    pub executive_threshold: Option<Decimal>,
    pub default_escalation_role: Option<ApproverRole>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://whistle.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            workflow: WorkflowSettings::default(),
            risk: RiskSettings::default(),
            organization: OrganizationConfig::default(),
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        let payment_methods = BTreeMap::from([
            (
                PaymentMethodType::PersonReimbursement,
                PaymentMethodPolicy {
                    auto_approval_limit: Some(Decimal::new(50, 0)),
                    always_requires_approval: false,
                },
            ),
            (
                PaymentMethodType::CreditCard,
                PaymentMethodPolicy {
                    auto_approval_limit: Some(Decimal::new(200, 0)),
                    always_requires_approval: false,
                },
            ),
            (
                PaymentMethodType::DirectVendor,
                PaymentMethodPolicy {
                    auto_approval_limit: Some(Decimal::new(100, 0)),
                    always_requires_approval: false,
                },
            ),
            (
                PaymentMethodType::PurchaseOrder,
                PaymentMethodPolicy { auto_approval_limit: None, always_requires_approval: true },
            ),
        ]);

        Self {
            high_value_threshold: Decimal::new(1_000, 0),
            executive_threshold: Decimal::new(5_000, 0),
            manager_deadline_hours: 48,
            finance_deadline_hours: 72,
            executive_deadline_hours: 120,
            default_escalation_role: ApproverRole::Executive,
            allow_delegation: true,
            notification_timeout_ms: 2_000,
            notifications: NotificationSettings {
                notify_on_activation: true,
                notify_requester: true,
            },
            payment_methods,
        }
    }
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            medium_amount: Decimal::new(1_000, 0),
            high_amount: Decimal::new(10_000, 0),
            critical_amount: Decimal::new(50_000, 0),
            high_risk_categories: vec![
                "cash_advance".to_string(),
                "gift".to_string(),
                "entertainment".to_string(),
            ],
            rejection_history_threshold: 3,
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("whistle.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(workflow) = patch.workflow {
            let settings = &mut self.workflow;
            if let Some(value) = workflow.high_value_threshold {
                settings.high_value_threshold = value;
            }
            if let Some(value) = workflow.executive_threshold {
                settings.executive_threshold = value;
            }
            if let Some(value) = workflow.manager_deadline_hours {
                settings.manager_deadline_hours = value;
            }
            if let Some(value) = workflow.finance_deadline_hours {
                settings.finance_deadline_hours = value;
            }
            if let Some(value) = workflow.executive_deadline_hours {
                settings.executive_deadline_hours = value;
            }
            if let Some(value) = workflow.default_escalation_role {
                settings.default_escalation_role = value;
            }
            if let Some(value) = workflow.allow_delegation {
                settings.allow_delegation = value;
            }
            if let Some(value) = workflow.notification_timeout_ms {
                settings.notification_timeout_ms = value;
            }
            if let Some(value) = workflow.notify_on_activation {
                settings.notifications.notify_on_activation = value;
            }
            if let Some(value) = workflow.notify_requester {
                settings.notifications.notify_requester = value;
            }
            for (method_type, method_patch) in workflow.payment_methods {
                let policy = settings.payment_methods.entry(method_type).or_insert(
                    PaymentMethodPolicy {
                        auto_approval_limit: None,
                        always_requires_approval: false,
                    },
                );
                if let Some(limit) = method_patch.auto_approval_limit {
                    policy.auto_approval_limit = Some(limit);
                }
                if let Some(always) = method_patch.always_requires_approval {
                    policy.always_requires_approval = always;
                }
            }
        }

        if let Some(risk) = patch.risk {
            if let Some(value) = risk.medium_amount {
                self.risk.medium_amount = value;
            }
            if let Some(value) = risk.high_amount {
                self.risk.high_amount = value;
            }
            if let Some(value) = risk.critical_amount {
                self.risk.critical_amount = value;
            }
            if let Some(value) = risk.high_risk_categories {
                self.risk.high_risk_categories = value;
            }
            if let Some(value) = risk.rejection_history_threshold {
                self.risk.rejection_history_threshold = value;
            }
        }

        if let Some(organization) = patch.organization {
            self.organization.members = organization.members;
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("WHISTLE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("WHISTLE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("WHISTLE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("WHISTLE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("WHISTLE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("WHISTLE_WORKFLOW_HIGH_VALUE_THRESHOLD") {
            self.workflow.high_value_threshold =
                parse_decimal("WHISTLE_WORKFLOW_HIGH_VALUE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("WHISTLE_WORKFLOW_EXECUTIVE_THRESHOLD") {
            self.workflow.executive_threshold =
                parse_decimal("WHISTLE_WORKFLOW_EXECUTIVE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("WHISTLE_WORKFLOW_DEFAULT_ESCALATION_ROLE") {
            self.workflow.default_escalation_role = ApproverRole::parse(&value).ok_or_else(|| {
                ConfigError::InvalidEnvOverride {
                    key: "WHISTLE_WORKFLOW_DEFAULT_ESCALATION_ROLE".to_string(),
                    value: value.clone(),
                }
            })?;
        }
        if let Some(value) = read_env("WHISTLE_WORKFLOW_NOTIFICATION_TIMEOUT_MS") {
            self.workflow.notification_timeout_ms =
                parse_u64("WHISTLE_WORKFLOW_NOTIFICATION_TIMEOUT_MS", &value)?;
        }

        let log_level =
            read_env("WHISTLE_LOGGING_LEVEL").or_else(|| read_env("WHISTLE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("WHISTLE_LOGGING_FORMAT").or_else(|| read_env("WHISTLE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(value) = overrides.high_value_threshold {
            self.workflow.high_value_threshold = value;
        }
        if let Some(value) = overrides.executive_threshold {
            self.workflow.executive_threshold = value;
        }
        if let Some(value) = overrides.default_escalation_role {
            self.workflow.default_escalation_role = value;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_logging(&self.logging)?;
        validate_workflow(&self.workflow)?;
        validate_risk(&self.risk)?;
        validate_organization(&self.organization)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("whistle.toml"), PathBuf::from("config/whistle.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_workflow(workflow: &WorkflowSettings) -> Result<(), ConfigError> {
    if workflow.high_value_threshold <= Decimal::ZERO {
        return Err(ConfigError::Validation(
            "workflow.high_value_threshold must be greater than zero".to_string(),
        ));
    }

    if workflow.executive_threshold <= workflow.high_value_threshold {
        return Err(ConfigError::Validation(
            "workflow.executive_threshold must be greater than workflow.high_value_threshold"
                .to_string(),
        ));
    }

    let deadlines = [
        ("workflow.manager_deadline_hours", workflow.manager_deadline_hours),
        ("workflow.finance_deadline_hours", workflow.finance_deadline_hours),
        ("workflow.executive_deadline_hours", workflow.executive_deadline_hours),
    ];
    for (key, hours) in deadlines {
        if hours == 0 || hours > MAX_DEADLINE_HOURS {
            return Err(ConfigError::Validation(format!(
                "{key} must be in range 1..={MAX_DEADLINE_HOURS}"
            )));
        }
    }

    if workflow.notification_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "workflow.notification_timeout_ms must be greater than zero".to_string(),
        ));
    }

    for (method_type, policy) in &workflow.payment_methods {
        if let Some(limit) = policy.auto_approval_limit {
            if limit < Decimal::ZERO {
                return Err(ConfigError::Validation(format!(
                    "workflow.payment_methods.{method_type}.auto_approval_limit must not be negative"
                )));
            }
        }
    }

    Ok(())
}

fn validate_risk(risk: &RiskSettings) -> Result<(), ConfigError> {
    if !(risk.medium_amount < risk.high_amount && risk.high_amount < risk.critical_amount) {
        return Err(ConfigError::Validation(
            "risk amounts must be strictly increasing (medium < high < critical)".to_string(),
        ));
    }

    Ok(())
}

fn validate_organization(organization: &OrganizationConfig) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for member in &organization.members {
        if member.id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "organization.members[].id must not be empty".to_string(),
            ));
        }
        if !seen.insert(member.id.trim().to_ascii_lowercase()) {
            return Err(ConfigError::Validation(format!(
                "organization.members contains duplicate id `{}`",
                member.id
            )));
        }
    }

    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value.trim()).map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    logging: Option<LoggingPatch>,
    workflow: Option<WorkflowPatch>,
    risk: Option<RiskPatch>,
    organization: Option<OrganizationPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    high_value_threshold: Option<Decimal>,
    executive_threshold: Option<Decimal>,
    manager_deadline_hours: Option<u32>,
    finance_deadline_hours: Option<u32>,
    executive_deadline_hours: Option<u32>,
    default_escalation_role: Option<ApproverRole>,
    allow_delegation: Option<bool>,
    notification_timeout_ms: Option<u64>,
    notify_on_activation: Option<bool>,
    notify_requester: Option<bool>,
    #[serde(default)]
    payment_methods: BTreeMap<PaymentMethodType, PaymentMethodPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentMethodPatch {
    auto_approval_limit: Option<Decimal>,
    always_requires_approval: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RiskPatch {
    medium_amount: Option<Decimal>,
    high_amount: Option<Decimal>,
    critical_amount: Option<Decimal>,
    high_risk_categories: Option<Vec<String>>,
    rejection_history_threshold: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct OrganizationPatch {
    #[serde(default)]
    members: Vec<DirectoryMember>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use rust_decimal::Decimal;
    use tempfile::TempDir;

    use super::{
        AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, MAX_DEADLINE_HOURS,
    };
    use crate::domain::approval::ApproverRole;
    use crate::domain::expense::PaymentMethodType;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_documented_auto_approval_ceilings() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;
        let methods = &config.workflow.payment_methods;

        ensure(
            methods[&PaymentMethodType::PersonReimbursement].auto_approval_limit
                == Some(Decimal::new(50, 0)),
            "person reimbursement ceiling should default to 50",
        )?;
        ensure(
            methods[&PaymentMethodType::CreditCard].auto_approval_limit
                == Some(Decimal::new(200, 0)),
            "credit card ceiling should default to 200",
        )?;
        ensure(
            methods[&PaymentMethodType::PurchaseOrder].auto_approval_limit.is_none(),
            "purchase orders should never auto-approve",
        )?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation_and_method_tables() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_WHISTLE_DB_URL", "sqlite://interpolated.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("whistle.toml");
            fs::write(
                &path,
                r#"
[database]
url = "${TEST_WHISTLE_DB_URL}"

[workflow]
high_value_threshold = 2000
executive_threshold = "8000"

[workflow.payment_methods.credit_card]
auto_approval_limit = 75

[[organization.members]]
id = "u-coach"
name = "Coach Carter"
email = "coach@league.test"
manager_id = "u-director"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://interpolated.db",
                "database url should be interpolated from the environment",
            )?;
            ensure(
                config.workflow.high_value_threshold == Decimal::new(2_000, 0),
                "high value threshold should come from the file",
            )?;
            ensure(
                config.workflow.executive_threshold == Decimal::new(8_000, 0),
                "string decimals should be accepted",
            )?;
            ensure(
                config.workflow.payment_methods[&PaymentMethodType::CreditCard].auto_approval_limit
                    == Some(Decimal::new(75, 0)),
                "credit card ceiling should be patched",
            )?;
            ensure(
                config.workflow.payment_methods.contains_key(&PaymentMethodType::PurchaseOrder),
                "unpatched payment methods keep their defaults",
            )?;
            ensure(config.organization.members.len() == 1, "directory members should load")
        })();

        clear_vars(&["TEST_WHISTLE_DB_URL"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("WHISTLE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("WHISTLE_WORKFLOW_DEFAULT_ESCALATION_ROLE", "finance");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("whistle.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.workflow.default_escalation_role == ApproverRole::Finance,
                "env escalation role should win over defaults",
            )
        })();

        clear_vars(&["WHISTLE_DATABASE_URL", "WHISTLE_WORKFLOW_DEFAULT_ESCALATION_ROLE"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("WHISTLE_LOG_LEVEL", "warn");
        env::set_var("WHISTLE_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )
        })();

        clear_vars(&["WHISTLE_LOG_LEVEL", "WHISTLE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn validation_rejects_inverted_thresholds() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                high_value_threshold: Some(Decimal::new(9_000, 0)),
                executive_threshold: Some(Decimal::new(5_000, 0)),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure but config load succeeded".into()),
            Err(error) => error,
        };

        ensure(
            matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("executive_threshold")
            ),
            "validation failure should mention workflow.executive_threshold",
        )
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("WHISTLE_WORKFLOW_HIGH_VALUE_THRESHOLD", "a lot");

        let result = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => Err("expected env override failure".to_string()),
            Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                key == "WHISTLE_WORKFLOW_HIGH_VALUE_THRESHOLD",
                "error should name the offending variable",
            ),
            Err(other) => Err(format!("unexpected error: {other}")),
        };

        clear_vars(&["WHISTLE_WORKFLOW_HIGH_VALUE_THRESHOLD"]);
        result
    }

    #[test]
    fn validation_rejects_deadlines_beyond_a_year() -> Result<(), String> {
        let mut config = AppConfig::default();
        config.workflow.manager_deadline_hours = u32::MAX;

        let error = match config.validate() {
            Ok(()) => return Err("expected validation failure for an unbounded deadline".into()),
            Err(error) => error,
        };
        ensure(
            matches!(
                error,
                ConfigError::Validation(ref message)
                    if message.contains("workflow.manager_deadline_hours")
            ),
            "validation failure should name workflow.manager_deadline_hours",
        )?;

        config.workflow.manager_deadline_hours = MAX_DEADLINE_HOURS;
        config.validate().map_err(|error| format!("one-year deadline should be valid: {error}"))
    }
}
