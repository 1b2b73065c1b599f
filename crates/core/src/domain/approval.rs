use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::domain::expense::ExpenseRequestId;

/// Version written into every structured column envelope.
pub const STRUCTURED_SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        Self(format!("APR-{}", Uuid::new_v4()))
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authoritative per-stage state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Approved,
    Rejected,
    NeedsInfo,
    Delegated,
    Escalated,
    Expired,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::NeedsInfo => "needs_info",
            Self::Delegated => "delegated",
            Self::Escalated => "escalated",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "needs_info" => Some(Self::NeedsInfo),
            "delegated" => Some(Self::Delegated),
            "escalated" => Some(Self::Escalated),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Expired)
    }

    /// States in which an approver decision may be accepted.
    pub fn accepts_decisions(&self) -> bool {
        matches!(self, Self::Pending | Self::Escalated)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Abstract approver role a stage is assigned to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverRole {
    Manager,
    Finance,
    Executive,
}

impl ApproverRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Finance => "finance",
            Self::Executive => "executive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "manager" => Some(Self::Manager),
            "finance" => Some(Self::Finance),
            "executive" => Some(Self::Executive),
            _ => None,
        }
    }
}

impl fmt::Display for ApproverRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn requires_additional_review(&self) -> bool {
        *self >= Self::High
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approver {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: ApproverRole,
    #[serde(default)]
    pub delegated: bool,
    /// The approver this delegate stands in for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_by: Option<String>,
    /// Added by the escalation sweep rather than by the workflow plan.
    #[serde(default)]
    pub escalated: bool,
}

impl Approver {
    fn is_original(&self) -> bool {
        !self.delegated && !self.escalated
    }
}

/// Declarative requirements a stage places on the request before it is
/// reviewed. Unknown top-level keys are kept in `extensions`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConditions {
    pub requires_business_case: bool,
    pub requires_competitive_quotes: bool,
    pub minimum_quotes: u32,
    pub requires_justification: bool,
    pub requires_receipt: bool,
    #[serde(flatten, deserialize_with = "deserialize_extensions")]
    pub extensions: BTreeMap<String, JsonValue>,
}

impl StageConditions {
    pub fn is_empty(&self) -> bool {
        !self.requires_business_case
            && !self.requires_competitive_quotes
            && !self.requires_justification
            && !self.requires_receipt
            && self.extensions.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationRules {
    pub escalate_to: Option<ApproverRole>,
    pub notify_requester: bool,
    #[serde(flatten, deserialize_with = "deserialize_extensions")]
    pub extensions: BTreeMap<String, JsonValue>,
}

/// Collects unknown keys. Rows written before extensions were flattened
/// carry them under a nested `extensions` object, which is lifted here.
fn deserialize_extensions<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, JsonValue>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut extensions = BTreeMap::<String, JsonValue>::deserialize(deserializer)?;
    if matches!(extensions.get("extensions"), Some(JsonValue::Object(_))) {
        if let Some(JsonValue::Object(nested)) = extensions.remove("extensions") {
            for (key, value) in nested {
                extensions.entry(key).or_insert(value);
            }
        }
    }
    Ok(extensions)
}

/// One persisted stage of a request's approval workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: ApprovalId,
    pub request_id: ExpenseRequestId,
    pub requester_id: String,
    pub stage_number: u32,
    pub total_stages: u32,
    pub stage_name: String,
    pub is_parallel: bool,
    pub required_approvers: Vec<Approver>,
    pub minimum_approvers: u32,
    pub requires_all_approvers: bool,
    pub stage_status: StageStatus,
    pub stage_started_at: Option<DateTime<Utc>>,
    pub stage_deadline: Option<DateTime<Utc>>,
    pub escalation_hours: u32,
    pub approval_conditions: StageConditions,
    pub escalation_rules: EscalationRules,
    pub allow_delegation: bool,
    pub approval_limit: Option<Decimal>,
    pub risk_level: RiskLevel,
    pub requires_additional_review: bool,
    pub approver_id: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approval_notes: Option<String>,
    pub approved_amount: Option<Decimal>,
    pub received_approvals: Vec<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub required_information: Vec<String>,
    pub delegated_to: Option<String>,
    pub delegated_by: Option<String>,
    pub delegated_at: Option<DateTime<Utc>>,
    pub delegation_reason: Option<String>,
    pub escalated_to: Option<String>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub escalation_reason: Option<String>,
    pub conditions_met: Option<bool>,
    pub unmet_conditions: Vec<String>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRecord {
    /// The stage currently waiting on its approvers.
    pub fn is_active(&self) -> bool {
        self.stage_status == StageStatus::Pending && self.stage_started_at.is_some()
    }

    pub fn is_final_stage(&self) -> bool {
        self.stage_number == self.total_stages
    }

    pub fn authorizes(&self, actor_id: &str) -> bool {
        let actor = normalize_id(actor_id);
        self.required_approvers.iter().any(|approver| normalize_id(&approver.id) == actor)
    }

    /// Approvals needed before the stage as a whole is approved. On an
    /// all-approvers stage only the planned approvers count; delegates and
    /// escalation targets never raise the bar.
    pub fn approvals_required(&self) -> usize {
        if !self.is_parallel {
            return 1;
        }
        if self.requires_all_approvers {
            let originals =
                self.required_approvers.iter().filter(|approver| approver.is_original()).count();
            return originals.max(1);
        }
        usize::try_from(self.minimum_approvers).unwrap_or(1).max(1)
    }

    /// Distinct approvals credited so far. A delegate's approval is credited
    /// to the approver who delegated, so an approver and their delegate count
    /// once. An escalation target's approval settles an all-approvers stage.
    pub fn approvals_received(&self) -> usize {
        let mut credited = BTreeSet::new();
        for actor in &self.received_approvals {
            let actor = normalize_id(actor);
            let Some(approver) =
                self.required_approvers.iter().find(|approver| normalize_id(&approver.id) == actor)
            else {
                continue;
            };
            if approver.escalated && self.is_parallel && self.requires_all_approvers {
                return self.approvals_required();
            }
            let principal = if approver.delegated {
                approver
                    .delegated_by
                    .as_deref()
                    .or(self.delegated_by.as_deref())
                    .map(normalize_id)
                    .unwrap_or(actor)
            } else {
                actor
            };
            credited.insert(principal);
        }
        credited.len()
    }

    pub fn has_approval_from(&self, actor_id: &str) -> bool {
        let actor = normalize_id(actor_id);
        self.received_approvals.iter().any(|id| normalize_id(id) == actor)
    }
}

pub(crate) fn normalize_id(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{EscalationRules, RiskLevel, StageConditions, StageStatus};

    #[test]
    fn stage_status_round_trips_through_storage_strings() {
        for status in [
            StageStatus::Pending,
            StageStatus::Approved,
            StageStatus::Rejected,
            StageStatus::NeedsInfo,
            StageStatus::Delegated,
            StageStatus::Escalated,
            StageStatus::Expired,
        ] {
            assert_eq!(StageStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(StageStatus::parse("archived"), None);
    }

    #[test]
    fn only_pending_and_escalated_stages_accept_decisions() {
        assert!(StageStatus::Pending.accepts_decisions());
        assert!(StageStatus::Escalated.accepts_decisions());
        assert!(!StageStatus::NeedsInfo.accepts_decisions());
        assert!(!StageStatus::Approved.accepts_decisions());
        assert!(StageStatus::Expired.is_terminal());
    }

    #[test]
    fn high_and_critical_risk_require_additional_review() {
        assert!(!RiskLevel::Medium.requires_additional_review());
        assert!(RiskLevel::High.requires_additional_review());
        assert!(RiskLevel::Critical.requires_additional_review());
    }

    #[test]
    fn nested_extensions_from_older_rows_are_lifted() {
        let conditions: StageConditions = serde_json::from_str(
            r#"{"requires_business_case":true,"extensions":{"board_signoff":true}}"#,
        )
        .expect("conditions should parse");

        assert!(conditions.requires_business_case);
        assert!(conditions.extensions.contains_key("board_signoff"));
        assert!(!conditions.extensions.contains_key("extensions"));
        assert!(!conditions.is_empty());

        let empty: StageConditions =
            serde_json::from_str(r#"{"requires_receipt":false,"extensions":{}}"#).expect("parse");
        assert!(empty.is_empty());
    }

    #[test]
    fn bare_unknown_condition_keys_land_in_extensions() {
        let conditions: StageConditions =
            serde_json::from_str(r#"{"requires_business_case":true,"board_signoff":true}"#)
                .expect("conditions should parse");

        assert_eq!(conditions.extensions.get("board_signoff"), Some(&serde_json::json!(true)));

        let reencoded = serde_json::to_value(&conditions).expect("encode");
        assert_eq!(reencoded["board_signoff"], serde_json::json!(true));
        assert!(reencoded.get("extensions").is_none());
    }

    #[test]
    fn escalation_rules_keep_custom_keys() {
        let rules: EscalationRules =
            serde_json::from_str(r#"{"escalate_to":"executive","page_on_call":"finance-ops"}"#)
                .expect("rules should parse");

        assert_eq!(rules.extensions.get("page_on_call"), Some(&serde_json::json!("finance-ops")));
        assert!(!rules.notify_requester);
    }
}
