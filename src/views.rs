//! serializable read models
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::loan::{Borrower, Installment, Loan, Payment};
use crate::types::{
    Frequency, InstallmentId, LoanId, LoanStatus, OrgId, PaymentId, ReceiptStatus,
};

/// loan overview with derived totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanView {
    pub id: LoanId,
    pub org_id: OrgId,
    pub external_id: Option<String>,
    pub borrower: Borrower,
    pub status: LoanStatus,
    pub is_stopped: bool,
    pub terms: TermsView,
    pub totals: TotalsView,
    pub next_installment: Option<Installment>,
    pub installments: Vec<Installment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermsView {
    pub principal: Money,
    pub interest_rate: Rate,
    pub frequency: Frequency,
    pub number_of_installments: usize,
    pub issued_at: DateTime<Utc>,
    pub maturity_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalsView {
    pub total_due: Money,
    pub total_paid: Money,
    pub outstanding: Money,
    pub open_installments: usize,
    pub payment_count: usize,
}

impl LoanView {
    pub fn from_loan(loan: &Loan) -> Self {
        let next_installment = loan
            .open_installments()
            .min_by_key(|i| (i.due_date, i.sequence))
            .cloned();

        LoanView {
            id: loan.id,
            org_id: loan.org_id,
            external_id: loan.external_id.clone(),
            borrower: loan.borrower.clone(),
            status: loan.status,
            is_stopped: loan.is_stopped,
            terms: TermsView {
                principal: loan.principal,
                interest_rate: loan.interest_rate,
                frequency: loan.frequency,
                number_of_installments: loan.installments.len(),
                issued_at: loan.issued_at,
                maturity_date: loan.maturity_date,
            },
            totals: TotalsView {
                total_due: loan.total_due(),
                total_paid: loan.total_paid(),
                outstanding: loan.outstanding(),
                open_installments: loan.open_installments().count(),
                payment_count: loan.payments.len(),
            },
            next_installment,
            installments: loan.installments.clone(),
        }
    }

    /// convert to pretty-printed json string
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// flat payment listing row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentView {
    pub id: PaymentId,
    pub loan_id: LoanId,
    pub installment_id: Option<InstallmentId>,
    pub installment_sequence: Option<u32>,
    pub borrower_name: String,
    pub amount: Money,
    pub paid_at: DateTime<Utc>,
    pub method: Option<String>,
    pub receipt_status: ReceiptStatus,
}

impl PaymentView {
    pub fn from_payment(loan: &Loan, payment: &Payment) -> Self {
        let installment_sequence = payment
            .installment_id
            .and_then(|id| loan.installment(id))
            .map(|i| i.sequence);

        PaymentView {
            id: payment.id,
            loan_id: payment.loan_id,
            installment_id: payment.installment_id,
            installment_sequence,
            borrower_name: loan.borrower.name.clone(),
            amount: payment.amount,
            paid_at: payment.paid_at,
            method: payment.method.clone(),
            receipt_status: payment.receipt_status,
        }
    }
}

/// organisation cash position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashSummary {
    pub total_collected: Money,
    /// pending plus overdue
    pub pending_installments: usize,
    pub overdue_installments: usize,
}

impl CashSummary {
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
