use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{LoanError, Result};
use crate::installments::resolve_index;
use crate::loan::{Loan, Payment};
use crate::payments::ChargeRequest;
use crate::types::{InstallmentId, LoanStatus, ReceiptStatus};

/// payment application result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedPayment {
    pub payment: Payment,
    pub installment_id: InstallmentId,
    pub installment_sequence: u32,
    pub previous_status: LoanStatus,
    pub loan_status: LoanStatus,
}

impl AppliedPayment {
    /// this payment closed the last open installment
    pub fn settled_loan(&self) -> bool {
        self.previous_status != LoanStatus::Paid && self.loan_status == LoanStatus::Paid
    }
}

/// record a payment against the resolved installment of `loan`
///
/// resolution happens on the loan passed in, so when the caller holds the
/// loan exclusively the paid flip acts as a compare-and-swap on the
/// installment status. nothing is mutated when an error is returned.
pub fn apply_payment(
    loan: &mut Loan,
    request: &ChargeRequest,
    default_method: Option<&str>,
    paid_at: DateTime<Utc>,
) -> Result<AppliedPayment> {
    request.validate()?;

    let index = resolve_index(loan.id, &loan.installments, request.installment_id)?;

    // keeps the unchecked loan totals in range
    Money::checked_sum(loan.payments.iter().map(|p| p.amount))
        .and_then(|paid| paid.checked_add(request.amount))
        .ok_or(LoanError::InvalidPaymentAmount { amount: request.amount })?;
    let previous_status = loan.status;

    let method = request
        .method
        .clone()
        .or_else(|| default_method.map(str::to_string));

    let installment = &mut loan.installments[index];
    let payment = Payment {
        id: Uuid::new_v4(),
        loan_id: loan.id,
        installment_id: Some(installment.id),
        org_id: loan.org_id,
        amount: request.amount,
        paid_at,
        method,
        receipt_status: ReceiptStatus::PendingReceipt,
    };

    installment.mark_paid(paid_at);
    let installment_id = installment.id;
    let installment_sequence = installment.sequence;

    loan.payments.push(payment.clone());
    let loan_status = loan.recompute_status();

    Ok(AppliedPayment {
        payment,
        installment_id,
        installment_sequence,
        previous_status,
        loan_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;
    use crate::installments::LoanTerms;
    use crate::loan::{Borrower, NewLoan};
    use crate::types::{Frequency, InstallmentRounding, InstallmentStatus};
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn loan(principal: i64, count: u32) -> Loan {
        Loan::originate(
            Uuid::new_v4(),
            NewLoan {
                borrower: Borrower::new("Juan Perez", "30123456"),
                external_id: None,
                terms: LoanTerms {
                    principal: Money::from_major(principal),
                    interest_rate: Rate::from_percentage(20),
                    number_of_installments: count,
                    frequency: Frequency::Weekly,
                },
            },
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            InstallmentRounding::Uniform,
        )
        .unwrap()
    }

    fn paid_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 11, 30, 0).unwrap()
    }

    #[test]
    fn test_first_installment_charge() {
        let mut loan = loan(1_000, 4);
        let first = loan.installments[0].id;

        let applied = apply_payment(
            &mut loan,
            &ChargeRequest::for_installment(first, Money::from_major(300)).with_method("cash"),
            None,
            paid_at(),
        )
        .unwrap();

        assert_eq!(applied.installment_id, first);
        assert_eq!(applied.installment_sequence, 1);
        assert_eq!(applied.loan_status, LoanStatus::Pending);
        assert!(!applied.settled_loan());

        assert_eq!(loan.installments[0].status, InstallmentStatus::Paid);
        assert_eq!(loan.installments[0].paid_at, Some(paid_at()));
        assert_eq!(loan.open_installments().count(), 3);

        assert_eq!(loan.payments.len(), 1);
        let payment = &loan.payments[0];
        assert_eq!(payment.method.as_deref(), Some("cash"));
        assert_eq!(payment.installment_id, Some(first));
        assert_eq!(payment.org_id, loan.org_id);
        assert_eq!(payment.receipt_status, ReceiptStatus::PendingReceipt);
    }

    #[test]
    fn test_sequential_charges_settle_loan() {
        let mut loan = loan(1_000, 4);

        for expected_sequence in 1..=4 {
            let applied = apply_payment(
                &mut loan,
                &ChargeRequest::next(Money::from_major(300)),
                None,
                paid_at(),
            )
            .unwrap();
            assert_eq!(applied.installment_sequence, expected_sequence);
        }

        assert_eq!(loan.status, LoanStatus::Paid);
        assert_eq!(loan.total_paid(), Money::from_major(1_200));

        let err = apply_payment(&mut loan, &ChargeRequest::next(Money::from_major(1)), None, paid_at())
            .unwrap_err();
        assert_eq!(err, LoanError::NoPendingInstallments { loan_id: loan.id });
    }

    #[test]
    fn test_single_installment_settles() {
        let mut loan = loan(100, 1);
        let applied = apply_payment(
            &mut loan,
            &ChargeRequest::next(Money::from_major(120)),
            None,
            paid_at(),
        )
        .unwrap();

        assert!(applied.settled_loan());
        assert_eq!(loan.status, LoanStatus::Paid);
    }

    #[test]
    fn test_rejected_charge_leaves_loan_untouched() {
        let mut loan = loan(1_000, 2);
        let before = loan.clone();

        let err = apply_payment(&mut loan, &ChargeRequest::next(Money::ZERO), None, paid_at()).unwrap_err();
        assert!(matches!(err, LoanError::InvalidPaymentAmount { .. }));
        assert_eq!(loan, before);

        let first = loan.installments[0].id;
        apply_payment(&mut loan, &ChargeRequest::for_installment(first, Money::from_major(600)), None, paid_at())
            .unwrap();
        let snapshot = loan.clone();

        let err = apply_payment(
            &mut loan,
            &ChargeRequest::for_installment(first, Money::from_major(600)),
            None,
            paid_at(),
        )
        .unwrap_err();
        assert_eq!(err, LoanError::InstallmentAlreadyPaid { id: first });
        assert_eq!(loan, snapshot);
    }

    #[test]
    fn test_payment_total_overflow_rejected() {
        let mut loan = loan(1_000, 3);
        let huge = Money::from_decimal(Decimal::MAX);

        apply_payment(&mut loan, &ChargeRequest::next(huge), None, paid_at()).unwrap();
        let snapshot = loan.clone();

        let err = apply_payment(&mut loan, &ChargeRequest::next(huge), None, paid_at()).unwrap_err();
        assert_eq!(err, LoanError::InvalidPaymentAmount { amount: huge });
        assert_eq!(loan, snapshot);
        assert_eq!(loan.total_paid(), huge);
    }

    #[test]
    fn test_default_method_applies_only_when_missing() {
        let mut loan = loan(1_000, 2);

        apply_payment(&mut loan, &ChargeRequest::next(Money::from_major(600)), Some("cash"), paid_at()).unwrap();
        apply_payment(
            &mut loan,
            &ChargeRequest::next(Money::from_major(600)).with_method("transfer"),
            Some("cash"),
            paid_at(),
        )
        .unwrap();

        assert_eq!(loan.payments[0].method.as_deref(), Some("cash"));
        assert_eq!(loan.payments[1].method.as_deref(), Some("transfer"));
    }

    #[test]
    fn test_status_not_demoted_on_partial_payment() {
        let mut loan = loan(1_000, 3);
        loan.status = LoanStatus::Overdue;

        let applied = apply_payment(&mut loan, &ChargeRequest::next(Money::from_major(400)), None, paid_at())
            .unwrap();

        assert_eq!(applied.previous_status, LoanStatus::Overdue);
        assert_eq!(applied.loan_status, LoanStatus::Overdue);
    }
}
