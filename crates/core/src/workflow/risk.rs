use rust_decimal::Decimal;

use crate::config::RiskSettings;
use crate::domain::approval::RiskLevel;
use crate::domain::expense::{ExpenseRequest, Requester};

pub trait RiskAssessor: Send + Sync {
    fn assess(
        &self,
        request: &ExpenseRequest,
        stage_number: u32,
        requester: &Requester,
    ) -> RiskLevel;
}

/// Scores a request from its amount, category and the requester's recent
/// rejection history. The highest signal wins.
#[derive(Clone, Debug)]
pub struct RuleBasedRiskAssessor {
    settings: RiskSettings,
}

impl RuleBasedRiskAssessor {
    pub fn new(settings: RiskSettings) -> Self {
        Self { settings }
    }

    fn amount_level(&self, request: &ExpenseRequest) -> RiskLevel {
        if request.amount >= self.settings.critical_amount {
            RiskLevel::Critical
        } else if request.amount >= self.settings.high_amount {
            RiskLevel::High
        } else if request.amount >= self.settings.medium_amount {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    fn category_level(&self, request: &ExpenseRequest) -> RiskLevel {
        let category = request.category.trim().to_ascii_lowercase();
        let flagged = self
            .settings
            .high_risk_categories
            .iter()
            .any(|candidate| candidate.trim().to_ascii_lowercase() == category);
        if flagged {
            RiskLevel::High
        } else {
            RiskLevel::Low
        }
    }

    fn history_level(&self, requester: &Requester) -> RiskLevel {
        let threshold = self.settings.rejection_history_threshold;
        if threshold == 0 || requester.recent_rejections == 0 {
            return RiskLevel::Low;
        }
        if requester.recent_rejections >= threshold {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        }
    }
}

impl Default for RuleBasedRiskAssessor {
    fn default() -> Self {
        Self::new(RiskSettings::default())
    }
}

impl RiskAssessor for RuleBasedRiskAssessor {
    fn assess(
        &self,
        request: &ExpenseRequest,
        _stage_number: u32,
        requester: &Requester,
    ) -> RiskLevel {
        let mut level = self.amount_level(request);
        level = level.max(self.category_level(request));
        level = level.max(self.history_level(requester));

        // A missing receipt on a non-trivial amount always gets a second look.
        let receipt_floor = self.settings.medium_amount / Decimal::TWO;
        if !request.has_receipt && level == RiskLevel::Low && request.amount >= receipt_floor {
            level = RiskLevel::Medium;
        }

        level
    }
}
