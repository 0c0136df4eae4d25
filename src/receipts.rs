use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

use crate::config::ReceiptConfig;
use crate::errors::{LoanError, Result};
use crate::loan::{Loan, Payment};
use crate::types::{LoanId, OrgId, PaymentId};

/// loan fields printed on a receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLoan {
    pub id: LoanId,
    pub borrower_name: String,
    pub borrower_phone: Option<String>,
}

/// payment fields printed on a receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptPayment {
    pub id: PaymentId,
    /// two-decimal amount
    pub amount: String,
    pub paid_at: DateTime<Utc>,
    pub method: Option<String>,
}

/// receipt issuance request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRequest {
    pub org_id: OrgId,
    pub loan: ReceiptLoan,
    pub payment: ReceiptPayment,
}

impl ReceiptRequest {
    pub fn new(loan: &Loan, payment: &Payment) -> Self {
        Self {
            org_id: loan.org_id,
            loan: ReceiptLoan {
                id: loan.id,
                borrower_name: loan.borrower.name.clone(),
                borrower_phone: loan.borrower.phone.clone(),
            },
            payment: ReceiptPayment {
                id: payment.id,
                amount: payment.amount.to_cents_string(),
                paid_at: payment.paid_at,
                method: payment.method.clone(),
            },
        }
    }
}

/// what the issuer hands back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedReceipt {
    pub storage_path: String,
    pub signed_url: String,
    pub expires_at: DateTime<Utc>,
}

/// stored receipt, one per payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: Uuid,
    pub org_id: OrgId,
    pub loan_id: LoanId,
    pub payment_id: PaymentId,
    pub storage_path: String,
    pub signed_url: String,
    pub expires_at: DateTime<Utc>,
}

impl Receipt {
    pub fn from_issued(request: &ReceiptRequest, issued: IssuedReceipt) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id: request.org_id,
            loan_id: request.loan.id,
            payment_id: request.payment.id,
            storage_path: issued.storage_path,
            signed_url: issued.signed_url,
            expires_at: issued.expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// renders and stores a receipt document, returning a signed link
pub trait ReceiptIssuer: Send + Sync {
    fn generate_receipt(&self, request: &ReceiptRequest) -> Result<IssuedReceipt>;
}

/// mock issuer for testing and local runs
///
/// links expire `ttl` after the payment timestamp so output is deterministic
pub struct MockReceiptIssuer {
    base_url: String,
    ttl: Duration,
    failing: AtomicBool,
    issued: AtomicUsize,
}

impl MockReceiptIssuer {
    pub fn new(base_url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ttl,
            failing: AtomicBool::new(false),
            issued: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &ReceiptConfig) -> Self {
        Self::new(config.base_url.clone(), config.signed_url_ttl())
    }

    /// make subsequent calls fail until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn issued_count(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

impl ReceiptIssuer for MockReceiptIssuer {
    fn generate_receipt(&self, request: &ReceiptRequest) -> Result<IssuedReceipt> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LoanError::ReceiptIssuance {
                message: format!("storage unavailable for payment {}", request.payment.id),
            });
        }

        let storage_path = format!(
            "receipts/{}/{}/{}.pdf",
            request.org_id, request.loan.id, request.payment.id
        );
        let expires_at = request.payment.paid_at + self.ttl;

        self.issued.fetch_add(1, Ordering::SeqCst);

        Ok(IssuedReceipt {
            signed_url: format!("{}/{}?expires={}", self.base_url, storage_path, expires_at.timestamp()),
            storage_path,
            expires_at,
        })
    }
}

impl<T: ReceiptIssuer + ?Sized> ReceiptIssuer for std::sync::Arc<T> {
    fn generate_receipt(&self, request: &ReceiptRequest) -> Result<IssuedReceipt> {
        (**self).generate_receipt(request)
    }
}
