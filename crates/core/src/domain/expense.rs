use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpenseRequestId(pub String);

impl fmt::Display for ExpenseRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodType {
    PersonReimbursement,
    CreditCard,
    DirectVendor,
    PurchaseOrder,
}

impl PaymentMethodType {
    pub const ALL: [PaymentMethodType; 4] =
        [Self::PersonReimbursement, Self::CreditCard, Self::DirectVendor, Self::PurchaseOrder];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PersonReimbursement => "person_reimbursement",
            Self::CreditCard => "credit_card",
            Self::DirectVendor => "direct_vendor",
            Self::PurchaseOrder => "purchase_order",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "person_reimbursement" => Some(Self::PersonReimbursement),
            "credit_card" => Some(Self::CreditCard),
            "direct_vendor" => Some(Self::DirectVendor),
            "purchase_order" => Some(Self::PurchaseOrder),
            _ => None,
        }
    }

    /// Vendor-facing methods must show competitive quotes at the executive tier.
    pub fn requires_competitive_quotes(&self) -> bool {
        matches!(self, Self::DirectVendor | Self::PurchaseOrder)
    }
}

impl fmt::Display for PaymentMethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payment method attached to a request, as configured by the
/// surrounding system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub method_type: PaymentMethodType,
    pub requires_approval: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    PendingApproval,
    Approved,
    Rejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending_approval" => Some(Self::PendingApproval),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: String,
    pub name: String,
    pub email: String,
    pub department: Option<String>,
    pub manager_id: Option<String>,
    /// Rejected requests in the trailing review window; feeds risk assessment.
    pub recent_rejections: u32,
}

impl Requester {
    /// A requester known only by id. Resolvers fall back to their directory
    /// for organizational attributes.
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            email: String::new(),
            id,
            department: None,
            manager_id: None,
            recent_rejections: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRequest {
    pub id: ExpenseRequestId,
    pub requester_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub category: String,
    pub description: String,
    pub business_justification: Option<String>,
    pub has_business_case: bool,
    pub competitive_quote_count: u32,
    pub has_receipt: bool,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
