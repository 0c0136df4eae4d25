use tracing::debug;

use crate::errors::{LoanError, Result};
use crate::loan::Installment;
use crate::types::{InstallmentId, LoanId};

/// pick the installment a charge applies to, returning its position
///
/// an explicit id must exist on the loan and still be open; without one the
/// earliest-due open installment wins, ties going to the lower sequence
pub fn resolve_index(
    loan_id: LoanId,
    installments: &[Installment],
    installment_id: Option<InstallmentId>,
) -> Result<usize> {
    if let Some(id) = installment_id {
        let index = installments
            .iter()
            .position(|i| i.id == id)
            .ok_or(LoanError::InstallmentNotFound { id })?;

        if !installments[index].is_open() {
            return Err(LoanError::InstallmentAlreadyPaid { id });
        }

        return Ok(index);
    }

    let index = installments
        .iter()
        .enumerate()
        .filter(|(_, i)| i.is_open())
        .min_by_key(|(_, i)| (i.due_date, i.sequence))
        .map(|(index, _)| index)
        .ok_or(LoanError::NoPendingInstallments { loan_id })?;

    debug!(
        %loan_id,
        sequence = installments[index].sequence,
        due_date = %installments[index].due_date,
        "resolved next open installment"
    );

    Ok(index)
}

/// borrowing variant of [`resolve_index`]
pub fn resolve_installment(
    loan_id: LoanId,
    installments: &[Installment],
    installment_id: Option<InstallmentId>,
) -> Result<&Installment> {
    resolve_index(loan_id, installments, installment_id).map(|index| &installments[index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Money;
    use crate::types::InstallmentStatus;
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn installment(loan_id: LoanId, sequence: u32, day: u32, status: InstallmentStatus) -> Installment {
        Installment {
            id: Uuid::new_v4(),
            loan_id,
            org_id: Uuid::nil(),
            sequence,
            due_date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            amount: Money::from_major(100),
            status,
            paid_at: if status == InstallmentStatus::Paid { Some(Utc::now()) } else { None },
        }
    }

    #[test]
    fn test_picks_earliest_open() {
        let loan_id = Uuid::new_v4();
        let list = vec![
            installment(loan_id, 1, 1, InstallmentStatus::Paid),
            installment(loan_id, 2, 8, InstallmentStatus::Pending),
            installment(loan_id, 3, 15, InstallmentStatus::Overdue),
        ];

        let picked = resolve_installment(loan_id, &list, None).unwrap();
        assert_eq!(picked.sequence, 2);
    }

    #[test]
    fn test_overdue_counts_as_open() {
        let loan_id = Uuid::new_v4();
        let list = vec![
            installment(loan_id, 1, 1, InstallmentStatus::Overdue),
            installment(loan_id, 2, 8, InstallmentStatus::Pending),
        ];
        assert_eq!(resolve_index(loan_id, &list, None).unwrap(), 0);
    }

    #[test]
    fn test_due_date_beats_list_order() {
        let loan_id = Uuid::new_v4();
        let list = vec![
            installment(loan_id, 2, 20, InstallmentStatus::Pending),
            installment(loan_id, 1, 10, InstallmentStatus::Pending),
        ];
        assert_eq!(resolve_installment(loan_id, &list, None).unwrap().sequence, 1);
    }

    #[test]
    fn test_tie_goes_to_lower_sequence() {
        let loan_id = Uuid::new_v4();
        let list = vec![
            installment(loan_id, 3, 10, InstallmentStatus::Pending),
            installment(loan_id, 2, 10, InstallmentStatus::Pending),
        ];
        assert_eq!(resolve_installment(loan_id, &list, None).unwrap().sequence, 2);
    }

    #[test]
    fn test_explicit_id() {
        let loan_id = Uuid::new_v4();
        let list = vec![
            installment(loan_id, 1, 1, InstallmentStatus::Pending),
            installment(loan_id, 2, 8, InstallmentStatus::Pending),
        ];
        let target = list[1].id;
        assert_eq!(resolve_index(loan_id, &list, Some(target)).unwrap(), 1);
    }

    #[test]
    fn test_explicit_paid_rejected() {
        let loan_id = Uuid::new_v4();
        let list = vec![installment(loan_id, 1, 1, InstallmentStatus::Paid)];
        let id = list[0].id;
        assert_eq!(
            resolve_index(loan_id, &list, Some(id)),
            Err(LoanError::InstallmentAlreadyPaid { id })
        );
    }

    #[test]
    fn test_unknown_id() {
        let loan_id = Uuid::new_v4();
        let list = vec![installment(loan_id, 1, 1, InstallmentStatus::Pending)];
        let id = Uuid::new_v4();
        assert_eq!(
            resolve_index(loan_id, &list, Some(id)),
            Err(LoanError::InstallmentNotFound { id })
        );
    }

    #[test]
    fn test_nothing_open() {
        let loan_id = Uuid::new_v4();
        let list = vec![
            installment(loan_id, 1, 1, InstallmentStatus::Paid),
            installment(loan_id, 2, 8, InstallmentStatus::Paid),
        ];
        assert_eq!(
            resolve_index(loan_id, &list, None),
            Err(LoanError::NoPendingInstallments { loan_id })
        );
        assert_eq!(
            resolve_index(loan_id, &[], None),
            Err(LoanError::NoPendingInstallments { loan_id })
        );
    }
}
