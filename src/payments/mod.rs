pub mod applier;

use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LoanError, Result};
use crate::types::{InstallmentId, PaymentId};

pub use applier::{apply_payment, AppliedPayment};

/// charge request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// explicit target, otherwise the earliest open installment
    pub installment_id: Option<InstallmentId>,
    pub amount: Money,
    pub method: Option<String>,
}

impl ChargeRequest {
    /// charge the next open installment
    pub fn next(amount: Money) -> Self {
        Self {
            installment_id: None,
            amount,
            method: None,
        }
    }

    /// charge a specific installment
    pub fn for_installment(installment_id: InstallmentId, amount: Money) -> Self {
        Self {
            installment_id: Some(installment_id),
            amount,
            method: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.amount.is_positive() {
            return Err(LoanError::InvalidPaymentAmount { amount: self.amount });
        }
        Ok(())
    }
}

/// charge result handed back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub payment_id: PaymentId,
    pub receipt_url: String,
}
