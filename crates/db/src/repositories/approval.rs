use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tracing::debug;

use whistle_core::domain::approval::{ApprovalId, ApprovalRecord, RiskLevel, StageStatus};
use whistle_core::domain::expense::{
    ExpenseRequest, ExpenseRequestId, PaymentMethod, PaymentMethodType, PaymentStatus,
};
use whistle_core::workflow::{ApprovalStore, StoreError, WorkflowOutcome};

use super::RepositoryError;
use crate::codec::{
    decode_decimal, decode_envelope, decode_optional_decimal, decode_optional_timestamp,
    decode_timestamp, encode_envelope, encode_optional_timestamp, encode_timestamp,
};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, requester_id, amount, currency, category, description,
    business_justification, has_business_case, competitive_quote_count, has_receipt,
    payment_method_type, payment_method_requires_approval, payment_status, created_at,
    updated_at";

const RECORD_COLUMNS: &str = "id, request_id, requester_id, stage_number, total_stages,
    stage_name, is_parallel, required_approvers, minimum_approvers, requires_all_approvers,
    stage_status, stage_started_at, stage_deadline, escalation_hours, approval_conditions,
    escalation_rules, allow_delegation, approval_limit, risk_level, requires_additional_review,
    approver_id, approved_at, approval_notes, approved_amount, received_approvals, rejected_at,
    rejection_reason, required_information, delegated_to, delegated_by, delegated_at,
    delegation_reason, escalated_to, escalated_at, escalation_reason, conditions_met,
    unmet_conditions, version, created_at, updated_at";

/// SQLite implementation of the workflow store. Multi-row writes run in a
/// transaction; record updates are conditional on the stored status and
/// version.
#[derive(Clone)]
pub struct SqlApprovalStore {
    pool: DbPool,
}

impl SqlApprovalStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn insert_workflow_tx(
        &self,
        request: &ExpenseRequest,
        records: &[ApprovalRecord],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO expense_request (id, requester_id, amount, currency, category,
                 description, business_justification, has_business_case,
                 competitive_quote_count, has_receipt, payment_method_type,
                 payment_method_requires_approval, payment_status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.requester_id)
        .bind(request.amount.to_string())
        .bind(&request.currency)
        .bind(&request.category)
        .bind(&request.description)
        .bind(&request.business_justification)
        .bind(request.has_business_case)
        .bind(i64::from(request.competitive_quote_count))
        .bind(request.has_receipt)
        .bind(request.payment_method.method_type.as_str())
        .bind(request.payment_method.requires_approval)
        .bind(request.payment_status.as_str())
        .bind(encode_timestamp(request.created_at))
        .bind(encode_timestamp(request.updated_at))
        .execute(&mut *tx)
        .await?;

        for record in records {
            insert_record(&mut tx, record).await?;
        }

        tx.commit().await?;
        debug!(
            event_name = "db.workflow.inserted",
            request_id = %request.id,
            records = records.len(),
            "expense workflow persisted"
        );
        Ok(())
    }

    async fn find_request_row(
        &self,
        id: &ExpenseRequestId,
    ) -> Result<Option<ExpenseRequest>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM expense_request WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(request_from_row).transpose()
    }

    async fn find_record_row(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRecord>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {RECORD_COLUMNS} FROM approval_record WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_records(
        &self,
        request_id: &ExpenseRequestId,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_record
             WHERE request_id = ? ORDER BY stage_number ASC"
        ))
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn conditional_update(
        &self,
        record: &ApprovalRecord,
        expected_status: StageStatus,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE approval_record SET
                 required_approvers = ?, minimum_approvers = ?, stage_status = ?,
                 stage_started_at = ?, stage_deadline = ?, approver_id = ?, approved_at = ?,
                 approval_notes = ?, approved_amount = ?, received_approvals = ?,
                 rejected_at = ?, rejection_reason = ?, required_information = ?,
                 delegated_to = ?, delegated_by = ?, delegated_at = ?, delegation_reason = ?,
                 escalated_to = ?, escalated_at = ?, escalation_reason = ?,
                 conditions_met = ?, unmet_conditions = ?, version = ?, updated_at = ?
             WHERE id = ? AND stage_status = ? AND version = ?",
        )
        .bind(encode_envelope("required_approvers", &record.required_approvers)?)
        .bind(i64::from(record.minimum_approvers))
        .bind(record.stage_status.as_str())
        .bind(encode_optional_timestamp(record.stage_started_at))
        .bind(encode_optional_timestamp(record.stage_deadline))
        .bind(&record.approver_id)
        .bind(encode_optional_timestamp(record.approved_at))
        .bind(&record.approval_notes)
        .bind(record.approved_amount.map(|amount| amount.to_string()))
        .bind(encode_envelope("received_approvals", &record.received_approvals)?)
        .bind(encode_optional_timestamp(record.rejected_at))
        .bind(&record.rejection_reason)
        .bind(encode_envelope("required_information", &record.required_information)?)
        .bind(&record.delegated_to)
        .bind(&record.delegated_by)
        .bind(encode_optional_timestamp(record.delegated_at))
        .bind(&record.delegation_reason)
        .bind(&record.escalated_to)
        .bind(encode_optional_timestamp(record.escalated_at))
        .bind(&record.escalation_reason)
        .bind(record.conditions_met)
        .bind(encode_envelope("unmet_conditions", &record.unmet_conditions)?)
        .bind(i64::from(expected_version) + 1)
        .bind(encode_timestamp(record.updated_at))
        .bind(&record.id.0)
        .bind(expected_status.as_str())
        .bind(i64::from(expected_version))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn overdue_rows(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_record
             WHERE stage_status = 'pending'
               AND stage_started_at IS NOT NULL
               AND stage_deadline IS NOT NULL
               AND stage_deadline < ?
             ORDER BY stage_deadline ASC"
        ))
        .bind(encode_timestamp(now))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn finalize_tx(
        &self,
        request_id: &ExpenseRequestId,
        outcome: WorkflowOutcome,
        at: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let at_text = encode_timestamp(at);
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE expense_request SET payment_status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(outcome.payment_status().as_str())
        .bind(&at_text)
        .bind(&request_id.0)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::Decode(format!(
                "expense request `{request_id}` is missing"
            )));
        }

        let statement = match outcome {
            WorkflowOutcome::Approved => {
                "UPDATE approval_record
                 SET stage_status = 'approved', updated_at = ?, version = version + 1
                 WHERE request_id = ? AND stage_status != 'approved'"
            }
            WorkflowOutcome::Rejected => {
                "UPDATE approval_record
                 SET stage_status = 'expired', updated_at = ?, version = version + 1
                 WHERE request_id = ? AND stage_status NOT IN ('approved', 'rejected', 'expired')"
            }
        };
        sqlx::query(statement).bind(&at_text).bind(&request_id.0).execute(&mut *tx).await?;

        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_record
             WHERE request_id = ? ORDER BY stage_number ASC"
        ))
        .bind(&request_id.0)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        rows.iter().map(record_from_row).collect()
    }
}

async fn insert_record(
    tx: &mut Transaction<'_, Sqlite>,
    record: &ApprovalRecord,
) -> Result<(), RepositoryError> {
    sqlx::query(&format!(
        "INSERT INTO approval_record ({RECORD_COLUMNS})
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                 ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&record.id.0)
    .bind(&record.request_id.0)
    .bind(&record.requester_id)
    .bind(i64::from(record.stage_number))
    .bind(i64::from(record.total_stages))
    .bind(&record.stage_name)
    .bind(record.is_parallel)
    .bind(encode_envelope("required_approvers", &record.required_approvers)?)
    .bind(i64::from(record.minimum_approvers))
    .bind(record.requires_all_approvers)
    .bind(record.stage_status.as_str())
    .bind(encode_optional_timestamp(record.stage_started_at))
    .bind(encode_optional_timestamp(record.stage_deadline))
    .bind(i64::from(record.escalation_hours))
    .bind(encode_envelope("approval_conditions", &record.approval_conditions)?)
    .bind(encode_envelope("escalation_rules", &record.escalation_rules)?)
    .bind(record.allow_delegation)
    .bind(record.approval_limit.map(|limit| limit.to_string()))
    .bind(record.risk_level.as_str())
    .bind(record.requires_additional_review)
    .bind(&record.approver_id)
    .bind(encode_optional_timestamp(record.approved_at))
    .bind(&record.approval_notes)
    .bind(record.approved_amount.map(|amount| amount.to_string()))
    .bind(encode_envelope("received_approvals", &record.received_approvals)?)
    .bind(encode_optional_timestamp(record.rejected_at))
    .bind(&record.rejection_reason)
    .bind(encode_envelope("required_information", &record.required_information)?)
    .bind(&record.delegated_to)
    .bind(&record.delegated_by)
    .bind(encode_optional_timestamp(record.delegated_at))
    .bind(&record.delegation_reason)
    .bind(&record.escalated_to)
    .bind(encode_optional_timestamp(record.escalated_at))
    .bind(&record.escalation_reason)
    .bind(record.conditions_met)
    .bind(encode_envelope("unmet_conditions", &record.unmet_conditions)?)
    .bind(i64::from(record.version))
    .bind(encode_timestamp(record.created_at))
    .bind(encode_timestamp(record.updated_at))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn decode_u32(row: &SqliteRow, column: &str) -> Result<u32, RepositoryError> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("`{column}` out of range: {value}")))
}

fn request_from_row(row: &SqliteRow) -> Result<ExpenseRequest, RepositoryError> {
    let method_text: String = row.try_get("payment_method_type")?;
    let method_type = PaymentMethodType::parse(&method_text).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown payment method `{method_text}`"))
    })?;
    let status_text: String = row.try_get("payment_status")?;
    let payment_status = PaymentStatus::parse(&status_text).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown payment status `{status_text}`"))
    })?;
    let amount: String = row.try_get("amount")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(ExpenseRequest {
        id: ExpenseRequestId(row.try_get("id")?),
        requester_id: row.try_get("requester_id")?,
        amount: decode_decimal("amount", &amount)?,
        currency: row.try_get("currency")?,
        category: row.try_get("category")?,
        description: row.try_get("description")?,
        business_justification: row.try_get("business_justification")?,
        has_business_case: row.try_get("has_business_case")?,
        competitive_quote_count: decode_u32(row, "competitive_quote_count")?,
        has_receipt: row.try_get("has_receipt")?,
        payment_method: PaymentMethod {
            method_type,
            requires_approval: row.try_get("payment_method_requires_approval")?,
        },
        payment_status,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<ApprovalRecord, RepositoryError> {
    let id: String = row.try_get("id")?;
    let status_text: String = row.try_get("stage_status")?;
    let stage_status = StageStatus::parse(&status_text)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown stage status `{status_text}`")))?;
    let risk_text: String = row.try_get("risk_level")?;
    let risk_level = RiskLevel::parse(&risk_text)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown risk level `{risk_text}`")))?;

    let envelope = |column: &str| -> Result<String, RepositoryError> { Ok(row.try_get(column)?) };
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let record = ApprovalRecord {
        request_id: ExpenseRequestId(row.try_get("request_id")?),
        requester_id: row.try_get("requester_id")?,
        stage_number: decode_u32(row, "stage_number")?,
        total_stages: decode_u32(row, "total_stages")?,
        stage_name: row.try_get("stage_name")?,
        is_parallel: row.try_get("is_parallel")?,
        required_approvers: decode_envelope(
            "required_approvers",
            &id,
            &envelope("required_approvers")?,
        ),
        minimum_approvers: decode_u32(row, "minimum_approvers")?,
        requires_all_approvers: row.try_get("requires_all_approvers")?,
        stage_status,
        stage_started_at: decode_optional_timestamp(
            "stage_started_at",
            row.try_get("stage_started_at")?,
        )?,
        stage_deadline: decode_optional_timestamp(
            "stage_deadline",
            row.try_get("stage_deadline")?,
        )?,
        escalation_hours: decode_u32(row, "escalation_hours")?,
        approval_conditions: decode_envelope(
            "approval_conditions",
            &id,
            &envelope("approval_conditions")?,
        ),
        escalation_rules: decode_envelope("escalation_rules", &id, &envelope("escalation_rules")?),
        allow_delegation: row.try_get("allow_delegation")?,
        approval_limit: decode_optional_decimal("approval_limit", row.try_get("approval_limit")?)?,
        risk_level,
        requires_additional_review: row.try_get("requires_additional_review")?,
        approver_id: row.try_get("approver_id")?,
        approved_at: decode_optional_timestamp("approved_at", row.try_get("approved_at")?)?,
        approval_notes: row.try_get("approval_notes")?,
        approved_amount: decode_optional_decimal(
            "approved_amount",
            row.try_get("approved_amount")?,
        )?,
        received_approvals: decode_envelope(
            "received_approvals",
            &id,
            &envelope("received_approvals")?,
        ),
        rejected_at: decode_optional_timestamp("rejected_at", row.try_get("rejected_at")?)?,
        rejection_reason: row.try_get("rejection_reason")?,
        required_information: decode_envelope(
            "required_information",
            &id,
            &envelope("required_information")?,
        ),
        delegated_to: row.try_get("delegated_to")?,
        delegated_by: row.try_get("delegated_by")?,
        delegated_at: decode_optional_timestamp("delegated_at", row.try_get("delegated_at")?)?,
        delegation_reason: row.try_get("delegation_reason")?,
        escalated_to: row.try_get("escalated_to")?,
        escalated_at: decode_optional_timestamp("escalated_at", row.try_get("escalated_at")?)?,
        escalation_reason: row.try_get("escalation_reason")?,
        conditions_met: row.try_get("conditions_met")?,
        unmet_conditions: decode_envelope("unmet_conditions", &id, &envelope("unmet_conditions")?),
        version: decode_u32(row, "version")?,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
        id: ApprovalId(id.clone()),
    };
    Ok(record)
}

#[async_trait]
impl ApprovalStore for SqlApprovalStore {
    async fn insert_workflow(
        &self,
        request: &ExpenseRequest,
        records: &[ApprovalRecord],
    ) -> Result<(), StoreError> {
        Ok(self.insert_workflow_tx(request, records).await?)
    }

    async fn find_request(
        &self,
        id: &ExpenseRequestId,
    ) -> Result<Option<ExpenseRequest>, StoreError> {
        Ok(self.find_request_row(id).await?)
    }

    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<ApprovalRecord>, StoreError> {
        Ok(self.find_record_row(id).await?)
    }

    async fn list_for_request(
        &self,
        request_id: &ExpenseRequestId,
    ) -> Result<Vec<ApprovalRecord>, StoreError> {
        Ok(self.list_records(request_id).await?)
    }

    async fn compare_and_swap(
        &self,
        record: &ApprovalRecord,
        expected_status: StageStatus,
        expected_version: u32,
    ) -> Result<bool, StoreError> {
        Ok(self.conditional_update(record, expected_status, expected_version).await?)
    }

    async fn list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRecord>, StoreError> {
        Ok(self.overdue_rows(now).await?)
    }

    async fn finalize_request(
        &self,
        request_id: &ExpenseRequestId,
        outcome: WorkflowOutcome,
        at: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRecord>, StoreError> {
        Ok(self.finalize_tx(request_id, outcome, at).await?)
    }
}
