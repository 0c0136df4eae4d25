use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::LoanError;

/// unique identifier for a loan
pub type LoanId = Uuid;

/// unique identifier for an installment
pub type InstallmentId = Uuid;

/// unique identifier for a payment
pub type PaymentId = Uuid;

/// tenant (organisation) identifier
pub type OrgId = Uuid;

/// compound key every loan lookup goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoanKey {
    pub org_id: OrgId,
    pub loan_id: LoanId,
}

impl LoanKey {
    pub fn new(org_id: OrgId, loan_id: LoanId) -> Self {
        Self { org_id, loan_id }
    }
}

impl fmt::Display for LoanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org_id, self.loan_id)
    }
}

/// loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    /// installments outstanding, nothing late
    Pending,
    /// stopped by an administrator or flagged for follow-up
    Reminded,
    /// at least one installment past its due date
    Overdue,
    /// every installment paid
    Paid,
}

/// installment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallmentStatus {
    Pending,
    Overdue,
    Paid,
}

impl InstallmentStatus {
    /// statuses a charge may consume
    pub const OPEN: [InstallmentStatus; 2] = [InstallmentStatus::Pending, InstallmentStatus::Overdue];

    pub fn is_open(&self) -> bool {
        !matches!(self, InstallmentStatus::Paid)
    }
}

/// repayment frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// every 7 days
    Weekly,
    /// every 14 days
    Biweekly,
    /// every calendar month
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Weekly => "weekly",
            Frequency::Biweekly => "biweekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = LoanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weekly" => Ok(Frequency::Weekly),
            "biweekly" => Ok(Frequency::Biweekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(LoanError::InvalidLoanTerms {
                message: format!("unknown frequency '{}'", other),
            }),
        }
    }
}

/// how installment amounts absorb the rounding remainder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentRounding {
    /// every installment carries the same rounded amount, drift is kept
    #[default]
    Uniform,
    /// the final installment takes whatever makes the sum match the total
    AbsorbInFinal,
}

/// receipt progress of a recorded payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptStatus {
    /// payment stored, receipt not confirmed yet
    PendingReceipt,
    /// claimed by a single issuer call, nobody else may issue
    Issuing,
    Issued,
    /// issuer rejected or failed, awaiting reconciliation
    Failed,
}

impl ReceiptStatus {
    /// free to be claimed for issuance
    pub fn needs_receipt(&self) -> bool {
        matches!(self, ReceiptStatus::PendingReceipt | ReceiptStatus::Failed)
    }
}
