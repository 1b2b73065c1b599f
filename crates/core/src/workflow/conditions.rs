use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::approval::StageConditions;
use crate::domain::expense::ExpenseRequest;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionEvaluation {
    pub satisfied: bool,
    pub unmet: Vec<String>,
}

impl ConditionEvaluation {
    fn from_unmet(unmet: Vec<String>) -> Self {
        Self { satisfied: unmet.is_empty(), unmet }
    }
}

/// Checks a stage's declarative requirements against the request as it
/// stands now.
#[derive(Clone, Copy, Debug, Default)]
pub struct StageConditionEvaluator;

impl StageConditionEvaluator {
    pub fn evaluate(
        &self,
        conditions: &StageConditions,
        request: &ExpenseRequest,
    ) -> ConditionEvaluation {
        let mut unmet = Vec::new();

        if conditions.requires_business_case && !request.has_business_case {
            unmet.push("business case document is required".to_string());
        }

        if conditions.requires_justification && !has_text(request.business_justification.as_deref())
        {
            unmet.push("business justification is required".to_string());
        }

        if conditions.requires_competitive_quotes {
            let minimum = conditions.minimum_quotes.max(1);
            if request.competitive_quote_count < minimum {
                unmet.push(format!(
                    "at least {minimum} competitive quotes are required (found {})",
                    request.competitive_quote_count
                ));
            }
        }

        if conditions.requires_receipt && !request.has_receipt {
            unmet.push("receipt is required".to_string());
        }

        for key in conditions.extensions.keys() {
            debug!(
                event_name = "workflow.conditions.extension_skipped",
                request_id = %request.id,
                condition = %key,
                "custom stage condition has no evaluator and is treated as informational"
            );
        }

        ConditionEvaluation::from_unmet(unmet)
    }
}

fn has_text(value: Option<&str>) -> bool {
    value.map(|text| !text.trim().is_empty()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::StageConditionEvaluator;
    use crate::domain::approval::StageConditions;
    use crate::workflow::test_support::expense_request;

    #[test]
    fn empty_conditions_are_satisfied() {
        let evaluation = StageConditionEvaluator
            .evaluate(&StageConditions::default(), &expense_request(Decimal::new(100, 0)));

        assert!(evaluation.satisfied);
        assert!(evaluation.unmet.is_empty());
    }

    #[test]
    fn executive_conditions_report_each_missing_requirement() {
        let conditions = StageConditions {
            requires_business_case: true,
            requires_competitive_quotes: true,
            minimum_quotes: 3,
            ..StageConditions::default()
        };
        let mut request = expense_request(Decimal::new(7_500, 0));
        request.has_business_case = false;
        request.competitive_quote_count = 1;

        let evaluation = StageConditionEvaluator.evaluate(&conditions, &request);

        assert!(!evaluation.satisfied);
        assert_eq!(evaluation.unmet.len(), 2);
        assert!(evaluation.unmet[0].contains("business case"));
        assert!(evaluation.unmet[1].contains("found 1"));
    }

    #[test]
    fn blank_justification_does_not_count() {
        let conditions =
            StageConditions { requires_justification: true, ..StageConditions::default() };
        let mut request = expense_request(Decimal::new(300, 0));
        request.business_justification = Some("   ".to_string());

        assert!(!StageConditionEvaluator.evaluate(&conditions, &request).satisfied);

        request.business_justification = Some("Season opener travel".to_string());
        assert!(StageConditionEvaluator.evaluate(&conditions, &request).satisfied);
    }

    #[test]
    fn extension_keys_never_block_a_stage() {
        let mut conditions = StageConditions::default();
        conditions.extensions.insert("board_signoff".to_string(), json!(true));

        let evaluation =
            StageConditionEvaluator.evaluate(&conditions, &expense_request(Decimal::new(10, 0)));
        assert!(evaluation.satisfied);
    }
}
