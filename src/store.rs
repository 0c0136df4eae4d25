use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::errors::{LoanError, Result};
use crate::loan::{Installment, Loan, Payment};
use crate::receipts::Receipt;
use crate::types::{InstallmentStatus, LoanKey, OrgId, PaymentId};

/// persistence boundary for loans and receipts
///
/// every lookup is scoped by organisation through [`LoanKey`] or an explicit
/// org id. `update_loan` is the atomic per-loan read-modify-write: the
/// closure sees the current loan and its changes are committed only when it
/// returns `Ok`.
pub trait LoanStore: Send + Sync {
    /// store a freshly originated loan with its installments
    fn insert_loan(&self, loan: Loan) -> Result<()>;

    fn find_loan(&self, key: LoanKey) -> Result<Option<Loan>>;

    /// loans of one organisation, oldest issue first
    fn list_loans(&self, org_id: OrgId) -> Result<Vec<Loan>>;

    fn update_loan<T, F>(&self, key: LoanKey, f: F) -> Result<T>
    where
        F: FnOnce(&mut Loan) -> Result<T>;

    /// remove a loan with its installments, payments and receipts
    fn delete_loan(&self, key: LoanKey) -> Result<bool>;

    /// earliest installment of the loan whose status is in `statuses`,
    /// ordered by due date then sequence
    fn first_installment(
        &self,
        key: LoanKey,
        statuses: &[InstallmentStatus],
    ) -> Result<Option<Installment>>;

    fn count_installments(&self, org_id: OrgId, statuses: &[InstallmentStatus]) -> Result<usize>;

    /// every payment of the organisation
    fn list_payments(&self, org_id: OrgId) -> Result<Vec<Payment>>;

    fn save_receipt(&self, receipt: Receipt) -> Result<()>;

    fn find_receipt(&self, org_id: OrgId, payment_id: PaymentId) -> Result<Option<Receipt>>;
}

/// in-memory store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    loans: RwLock<HashMap<LoanKey, Loan>>,
    receipts: RwLock<HashMap<(OrgId, PaymentId), Receipt>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn loans_read(&self) -> Result<RwLockReadGuard<'_, HashMap<LoanKey, Loan>>> {
        self.loans.read().map_err(|_| poisoned("loans"))
    }

    fn loans_write(&self) -> Result<RwLockWriteGuard<'_, HashMap<LoanKey, Loan>>> {
        self.loans.write().map_err(|_| poisoned("loans"))
    }

    fn receipts_read(&self) -> Result<RwLockReadGuard<'_, HashMap<(OrgId, PaymentId), Receipt>>> {
        self.receipts.read().map_err(|_| poisoned("receipts"))
    }

    fn receipts_write(&self) -> Result<RwLockWriteGuard<'_, HashMap<(OrgId, PaymentId), Receipt>>> {
        self.receipts.write().map_err(|_| poisoned("receipts"))
    }
}

impl LoanStore for InMemoryStore {
    fn insert_loan(&self, loan: Loan) -> Result<()> {
        let mut loans = self.loans_write()?;
        let key = loan.key();
        if loans.contains_key(&key) {
            return Err(LoanError::Storage {
                message: format!("loan {} already exists", key),
            });
        }
        loans.insert(key, loan);
        Ok(())
    }

    fn find_loan(&self, key: LoanKey) -> Result<Option<Loan>> {
        Ok(self.loans_read()?.get(&key).cloned())
    }

    fn list_loans(&self, org_id: OrgId) -> Result<Vec<Loan>> {
        let loans = self.loans_read()?;
        let mut found: Vec<Loan> = loans
            .values()
            .filter(|loan| loan.org_id == org_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.issued_at.cmp(&b.issued_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    fn update_loan<T, F>(&self, key: LoanKey, f: F) -> Result<T>
    where
        F: FnOnce(&mut Loan) -> Result<T>,
    {
        let mut loans = self.loans_write()?;
        let current = loans.get_mut(&key).ok_or(LoanError::LoanNotFound { id: key.loan_id })?;

        // work on a copy so an error leaves the stored loan untouched
        let mut draft = current.clone();
        let value = f(&mut draft)?;
        *current = draft;
        Ok(value)
    }

    fn delete_loan(&self, key: LoanKey) -> Result<bool> {
        let removed = self.loans_write()?.remove(&key);
        match removed {
            Some(loan) => {
                let mut receipts = self.receipts_write()?;
                receipts.retain(|_, receipt| {
                    !(receipt.org_id == loan.org_id && receipt.loan_id == loan.id)
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn first_installment(
        &self,
        key: LoanKey,
        statuses: &[InstallmentStatus],
    ) -> Result<Option<Installment>> {
        let loans = self.loans_read()?;
        let loan = loans.get(&key).ok_or(LoanError::LoanNotFound { id: key.loan_id })?;
        Ok(loan
            .installments
            .iter()
            .filter(|i| statuses.contains(&i.status))
            .min_by_key(|i| (i.due_date, i.sequence))
            .cloned())
    }

    fn count_installments(&self, org_id: OrgId, statuses: &[InstallmentStatus]) -> Result<usize> {
        let loans = self.loans_read()?;
        Ok(loans
            .values()
            .filter(|loan| loan.org_id == org_id)
            .flat_map(|loan| loan.installments.iter())
            .filter(|i| statuses.contains(&i.status))
            .count())
    }

    fn list_payments(&self, org_id: OrgId) -> Result<Vec<Payment>> {
        let loans = self.loans_read()?;
        Ok(loans
            .values()
            .filter(|loan| loan.org_id == org_id)
            .flat_map(|loan| loan.payments.iter().cloned())
            .collect())
    }

    fn save_receipt(&self, receipt: Receipt) -> Result<()> {
        self.receipts_write()?
            .insert((receipt.org_id, receipt.payment_id), receipt);
        Ok(())
    }

    fn find_receipt(&self, org_id: OrgId, payment_id: PaymentId) -> Result<Option<Receipt>> {
        Ok(self.receipts_read()?.get(&(org_id, payment_id)).cloned())
    }
}

fn poisoned(what: &str) -> LoanError {
    LoanError::Storage {
        message: format!("{} lock poisoned", what),
    }
}
