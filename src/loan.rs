use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::errors::{LoanError, Result};
use crate::installments::{InstallmentSchedule, LoanTerms};
use crate::types::{
    Frequency, InstallmentId, InstallmentRounding, InstallmentStatus, LoanId, LoanKey, LoanStatus,
    OrgId, PaymentId, ReceiptStatus,
};

/// borrower contact details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Borrower {
    pub name: String,
    pub phone: Option<String>,
    /// national identity document number
    pub national_id: String,
}

impl Borrower {
    pub fn new(name: impl Into<String>, national_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: None,
            national_id: national_id.into(),
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LoanError::InvalidBorrower {
                message: "borrower name is required".to_string(),
            });
        }
        if self.national_id.trim().is_empty() {
            return Err(LoanError::InvalidBorrower {
                message: "borrower national id is required".to_string(),
            });
        }
        Ok(())
    }
}

/// one scheduled repayment unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub id: InstallmentId,
    pub loan_id: LoanId,
    pub org_id: OrgId,
    pub sequence: u32,
    pub due_date: NaiveDate,
    pub amount: Money,
    pub status: InstallmentStatus,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Installment {
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// pending and past its due date as of `as_of`
    pub fn is_late(&self, as_of: NaiveDate) -> bool {
        self.status == InstallmentStatus::Pending && self.due_date < as_of
    }

    pub(crate) fn mark_paid(&mut self, at: DateTime<Utc>) {
        self.status = InstallmentStatus::Paid;
        self.paid_at = Some(at);
    }
}

/// recorded payment, append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub loan_id: LoanId,
    pub installment_id: Option<InstallmentId>,
    pub org_id: OrgId,
    pub amount: Money,
    pub paid_at: DateTime<Utc>,
    pub method: Option<String>,
    pub receipt_status: ReceiptStatus,
}

/// loan creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLoan {
    pub borrower: Borrower,
    pub external_id: Option<String>,
    pub terms: LoanTerms,
}

/// editable loan fields, `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoanUpdate {
    pub borrower_name: Option<String>,
    /// an empty string clears the phone
    pub borrower_phone: Option<String>,
    pub borrower_national_id: Option<String>,
    pub interest_rate: Option<Rate>,
    pub maturity_date: Option<NaiveDate>,
    pub status: Option<LoanStatus>,
}

/// loan aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    // identification
    pub id: LoanId,
    pub org_id: OrgId,
    pub external_id: Option<String>,
    pub borrower: Borrower,

    // terms
    pub principal: Money,
    pub interest_rate: Rate,
    pub frequency: Frequency,
    pub issued_at: DateTime<Utc>,
    pub maturity_date: Option<NaiveDate>,

    // status
    pub status: LoanStatus,
    pub is_stopped: bool,

    pub installments: Vec<Installment>,
    pub payments: Vec<Payment>,
}

impl Loan {
    /// build a loan and its installments in one step
    pub fn originate(
        org_id: OrgId,
        request: NewLoan,
        issued_at: DateTime<Utc>,
        rounding: InstallmentRounding,
    ) -> Result<Self> {
        request.borrower.validate()?;
        let schedule = InstallmentSchedule::generate(&request.terms, issued_at, rounding)?;

        let loan_id = Uuid::new_v4();
        let installments = schedule
            .installments
            .iter()
            .map(|row| Installment {
                id: Uuid::new_v4(),
                loan_id,
                org_id,
                sequence: row.sequence,
                due_date: row.due_date,
                amount: row.amount,
                status: InstallmentStatus::Pending,
                paid_at: None,
            })
            .collect();

        Ok(Self {
            id: loan_id,
            org_id,
            external_id: request.external_id,
            borrower: request.borrower,
            principal: request.terms.principal,
            interest_rate: request.terms.interest_rate,
            frequency: request.terms.frequency,
            issued_at,
            maturity_date: schedule.maturity_date(),
            status: LoanStatus::Pending,
            is_stopped: false,
            installments,
            payments: Vec::new(),
        })
    }

    pub fn key(&self) -> LoanKey {
        LoanKey::new(self.org_id, self.id)
    }

    pub fn installment(&self, id: InstallmentId) -> Option<&Installment> {
        self.installments.iter().find(|i| i.id == id)
    }

    pub fn payment(&self, id: PaymentId) -> Option<&Payment> {
        self.payments.iter().find(|p| p.id == id)
    }

    pub fn open_installments(&self) -> impl Iterator<Item = &Installment> {
        self.installments.iter().filter(|i| i.is_open())
    }

    pub fn is_fully_paid(&self) -> bool {
        self.installments.iter().all(|i| !i.is_open())
    }

    /// sum of scheduled installment amounts
    pub fn total_due(&self) -> Money {
        self.installments.iter().map(|i| i.amount).sum()
    }

    /// sum of recorded payments
    pub fn total_paid(&self) -> Money {
        self.payments.iter().map(|p| p.amount).sum()
    }

    /// scheduled amount still open
    pub fn outstanding(&self) -> Money {
        self.open_installments().map(|i| i.amount).sum()
    }

    /// promote to paid once nothing is open, never demotes
    pub fn recompute_status(&mut self) -> LoanStatus {
        if self.is_fully_paid() {
            self.status = LoanStatus::Paid;
        }
        self.status
    }

    /// administrative stop, returns the status before stopping
    pub fn stop(&mut self) -> LoanStatus {
        let previous = self.status;
        self.is_stopped = true;
        self.status = if previous == LoanStatus::Paid {
            LoanStatus::Paid
        } else {
            LoanStatus::Reminded
        };
        previous
    }

    /// apply an edit; everything is validated before anything changes
    pub fn apply_update(&mut self, update: &LoanUpdate) -> Result<()> {
        if let Some(name) = &update.borrower_name {
            if name.trim().is_empty() {
                return Err(LoanError::InvalidBorrower {
                    message: "borrower name is required".to_string(),
                });
            }
        }

        if let Some(national_id) = &update.borrower_national_id {
            if national_id.trim().is_empty() {
                return Err(LoanError::InvalidBorrower {
                    message: "borrower national id is required".to_string(),
                });
            }
        }

        if let Some(rate) = update.interest_rate {
            if rate.is_negative() {
                return Err(LoanError::InvalidLoanTerms {
                    message: format!("interest rate must not be negative, got {}", rate),
                });
            }
        }

        if let Some(target) = update.status {
            let fully_paid = self.is_fully_paid();
            if (target == LoanStatus::Paid) != fully_paid {
                return Err(LoanError::InvalidStatusOverride {
                    from: self.status,
                    to: target,
                });
            }
        }

        if let Some(name) = &update.borrower_name {
            self.borrower.name = name.clone();
        }
        if let Some(phone) = &update.borrower_phone {
            self.borrower.phone = if phone.trim().is_empty() {
                None
            } else {
                Some(phone.clone())
            };
        }
        if let Some(national_id) = &update.borrower_national_id {
            self.borrower.national_id = national_id.clone();
        }
        // installments keep their original amounts
        if let Some(rate) = update.interest_rate {
            self.interest_rate = rate;
        }
        if let Some(maturity) = update.maturity_date {
            self.maturity_date = Some(maturity);
        }
        if let Some(status) = update.status {
            self.status = status;
        }

        Ok(())
    }

    /// flag late installments, returns how many changed
    pub fn mark_overdue(&mut self, as_of: NaiveDate) -> usize {
        let mut flagged = 0;
        for installment in self.installments.iter_mut() {
            if installment.is_late(as_of) {
                installment.status = InstallmentStatus::Overdue;
                flagged += 1;
            }
        }

        let any_overdue = self
            .installments
            .iter()
            .any(|i| i.status == InstallmentStatus::Overdue);
        if any_overdue && !self.is_stopped && self.status == LoanStatus::Pending {
            self.status = LoanStatus::Overdue;
        }

        flagged
    }
}
