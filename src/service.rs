use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::activity::{ActivityAction, ActivityEntry, ActivityLog, ActivitySink};
use crate::config::EngineConfig;
use crate::context::{Operation, RequestContext};
use crate::decimal::Money;
use crate::errors::{LoanError, Result};
use crate::loan::{Installment, Loan, LoanUpdate, NewLoan, Payment};
use crate::payments::{apply_payment, AppliedPayment, ChargeReceipt, ChargeRequest};
use crate::receipts::{MockReceiptIssuer, Receipt, ReceiptIssuer, ReceiptRequest};
use crate::store::{InMemoryStore, LoanStore};
use crate::types::{InstallmentStatus, LoanId, LoanKey, PaymentId, ReceiptStatus};
use crate::views::{CashSummary, LoanView, PaymentView};

/// outcome of a receipt reconciliation sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptReissue {
    pub issued: Vec<Receipt>,
    pub failed: Vec<PaymentId>,
}

/// loan servicing engine
///
/// every operation takes the caller's [`RequestContext`]; the organisation in
/// the context scopes every lookup and the role gates the operation.
/// time-dependent operations read the clock from the [`SafeTimeProvider`]
/// passed in.
pub struct LoanService<S: LoanStore> {
    store: S,
    receipts: Box<dyn ReceiptIssuer>,
    activity: Box<dyn ActivitySink>,
    config: EngineConfig,
}

impl LoanService<InMemoryStore> {
    /// fully in-memory engine with the mock receipt issuer
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        let issuer = MockReceiptIssuer::from_config(&config.receipt);
        Self::new(InMemoryStore::new(), issuer, ActivityLog::new(), config)
    }
}

impl<S: LoanStore> LoanService<S> {
    pub fn new(
        store: S,
        receipts: impl ReceiptIssuer + 'static,
        activity: impl ActivitySink + 'static,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            receipts: Box::new(receipts),
            activity: Box::new(activity),
            config,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// originate a loan and persist it with its installments
    #[instrument(skip_all, fields(org_id = %ctx.org_id))]
    pub fn create_loan(
        &self,
        ctx: &RequestContext,
        request: NewLoan,
        time: &SafeTimeProvider,
    ) -> Result<Loan> {
        ctx.authorize(Operation::CreateLoan)?;

        let now = time.now();
        let loan = Loan::originate(ctx.org_id, request, now, self.config.installment_rounding)?;
        self.store.insert_loan(loan.clone())?;

        info!(
            loan_id = %loan.id,
            installments = loan.installments.len(),
            total_due = %loan.total_due(),
            "loan created"
        );
        self.log_activity(
            ctx,
            Some(loan.id),
            ActivityAction::LoanCreated,
            None,
            Some(loan_snapshot(&loan)),
            now,
        );

        Ok(loan)
    }

    pub fn list_loans(&self, ctx: &RequestContext) -> Result<Vec<Loan>> {
        ctx.authorize(Operation::ReadLoans)?;
        self.store.list_loans(ctx.org_id)
    }

    pub fn get_loan(&self, ctx: &RequestContext, loan_id: LoanId) -> Result<Loan> {
        ctx.authorize(Operation::ReadLoans)?;
        self.load(ctx, loan_id)
    }

    pub fn loan_overview(&self, ctx: &RequestContext, loan_id: LoanId) -> Result<LoanView> {
        Ok(LoanView::from_loan(&self.get_loan(ctx, loan_id)?))
    }

    /// earliest open installment, the one a charge without an id would hit
    pub fn next_installment(&self, ctx: &RequestContext, loan_id: LoanId) -> Result<Option<Installment>> {
        ctx.authorize(Operation::ReadLoans)?;
        self.store
            .first_installment(LoanKey::new(ctx.org_id, loan_id), &InstallmentStatus::OPEN)
    }

    /// edit borrower details, rate, maturity or status; installments are never repriced
    #[instrument(skip_all, fields(org_id = %ctx.org_id, loan_id = %loan_id))]
    pub fn update_loan(
        &self,
        ctx: &RequestContext,
        loan_id: LoanId,
        update: &LoanUpdate,
        time: &SafeTimeProvider,
    ) -> Result<Loan> {
        ctx.authorize(Operation::UpdateLoan)?;

        let (before, loan) = self
            .store
            .update_loan(LoanKey::new(ctx.org_id, loan_id), |loan| {
                let before = loan_snapshot(loan);
                loan.apply_update(update)?;
                Ok((before, loan.clone()))
            })?;

        info!(status = ?loan.status, "loan updated");
        self.log_activity(
            ctx,
            Some(loan_id),
            ActivityAction::LoanUpdated,
            Some(before),
            Some(loan_snapshot(&loan)),
            time.now(),
        );

        Ok(loan)
    }

    /// delete a loan with its installments, payments and receipts
    #[instrument(skip_all, fields(org_id = %ctx.org_id, loan_id = %loan_id))]
    pub fn remove_loan(&self, ctx: &RequestContext, loan_id: LoanId, time: &SafeTimeProvider) -> Result<()> {
        ctx.authorize(Operation::RemoveLoan)?;

        let key = LoanKey::new(ctx.org_id, loan_id);
        let loan = self.load(ctx, loan_id)?;
        if !self.store.delete_loan(key)? {
            return Err(LoanError::LoanNotFound { id: loan_id });
        }

        info!(payments = loan.payments.len(), "loan removed");
        self.log_activity(
            ctx,
            Some(loan_id),
            ActivityAction::LoanDeleted,
            Some(loan_snapshot(&loan)),
            None,
            time.now(),
        );

        Ok(())
    }

    /// record a payment and issue its receipt
    ///
    /// the installment is resolved and flipped to paid inside the store's
    /// atomic update, so concurrent charges never consume the same
    /// installment. the same update claims the receipt for this call, so a
    /// concurrent reissue sweep leaves it alone. if issuance fails the
    /// payment stays recorded with a failed receipt status and the issuer's
    /// error is returned.
    #[instrument(skip_all, fields(org_id = %ctx.org_id, loan_id = %loan_id))]
    pub fn charge(
        &self,
        ctx: &RequestContext,
        loan_id: LoanId,
        request: &ChargeRequest,
        time: &SafeTimeProvider,
    ) -> Result<ChargeReceipt> {
        ctx.authorize(Operation::Charge)?;
        request.validate()?;

        let key = LoanKey::new(ctx.org_id, loan_id);
        let paid_at = time.now();
        let default_method = self.config.default_payment_method.as_deref();

        let applied: AppliedPayment = self.store.update_loan(key, |loan| {
            let applied = apply_payment(loan, request, default_method, paid_at)?;
            claim_receipt(loan, key, applied.payment.id)?;
            Ok(applied)
        })?;

        info!(
            payment_id = %applied.payment.id,
            installment = applied.installment_sequence,
            amount = %applied.payment.amount,
            loan_status = ?applied.loan_status,
            "installment charged"
        );
        if applied.settled_loan() {
            info!("loan fully paid");
        }

        self.log_activity(
            ctx,
            Some(loan_id),
            ActivityAction::InstallmentPaid,
            None,
            Some(json!({
                "installment_id": applied.installment_id,
                "installment_sequence": applied.installment_sequence,
                "amount": applied.payment.amount,
                "payment_id": applied.payment.id,
                "method": applied.payment.method,
                "loan_status": applied.loan_status,
            })),
            paid_at,
        );

        let receipt = self.issue_receipt(key, applied.payment.id)?;

        Ok(ChargeReceipt {
            payment_id: applied.payment.id,
            receipt_url: receipt.signed_url,
        })
    }

    /// administrative stop; payment history is left alone
    #[instrument(skip_all, fields(org_id = %ctx.org_id, loan_id = %loan_id))]
    pub fn stop_loan(
        &self,
        ctx: &RequestContext,
        loan_id: LoanId,
        reason: Option<&str>,
        time: &SafeTimeProvider,
    ) -> Result<Loan> {
        ctx.authorize(Operation::StopLoan)?;

        let (before, loan) = self
            .store
            .update_loan(LoanKey::new(ctx.org_id, loan_id), |loan| {
                let before = loan_snapshot(loan);
                loan.stop();
                Ok((before, loan.clone()))
            })?;

        info!(status = ?loan.status, reason = reason.unwrap_or(""), "loan stopped");

        let mut after = loan_snapshot(&loan);
        if let (Some(reason), Some(fields)) = (reason, after.as_object_mut()) {
            fields.insert("stop_reason".to_string(), Value::String(reason.to_string()));
        }
        self.log_activity(
            ctx,
            Some(loan_id),
            ActivityAction::LoanStopped,
            Some(before),
            Some(after),
            time.now(),
        );

        Ok(loan)
    }

    /// every payment of the organisation, newest first
    pub fn list_payments(&self, ctx: &RequestContext) -> Result<Vec<PaymentView>> {
        ctx.authorize(Operation::ReadPayments)?;

        let loans = self.store.list_loans(ctx.org_id)?;
        let mut rows: Vec<PaymentView> = loans
            .iter()
            .flat_map(|loan| {
                loan.payments
                    .iter()
                    .map(move |payment| PaymentView::from_payment(loan, payment))
            })
            .collect();
        rows.sort_by(|a, b| b.paid_at.cmp(&a.paid_at));
        Ok(rows)
    }

    pub fn get_receipt(&self, ctx: &RequestContext, payment_id: PaymentId) -> Result<Option<Receipt>> {
        ctx.authorize(Operation::ReadPayments)?;
        self.store.find_receipt(ctx.org_id, payment_id)
    }

    pub fn cash_summary(&self, ctx: &RequestContext) -> Result<CashSummary> {
        ctx.authorize(Operation::ReadSummary)?;

        let payments = self.store.list_payments(ctx.org_id)?;
        let total_collected = Money::checked_sum(payments.iter().map(|p| p.amount)).ok_or_else(|| {
            LoanError::AmountOverflow {
                message: format!("collected total over {} payments", payments.len()),
            }
        })?;

        Ok(CashSummary {
            total_collected,
            pending_installments: self
                .store
                .count_installments(ctx.org_id, &InstallmentStatus::OPEN)?,
            overdue_installments: self
                .store
                .count_installments(ctx.org_id, &[InstallmentStatus::Overdue])?,
        })
    }

    /// audit trail of one loan, newest first
    pub fn activity_for_loan(&self, ctx: &RequestContext, loan_id: LoanId) -> Result<Vec<ActivityEntry>> {
        ctx.authorize(Operation::ReadActivity)?;
        self.activity.entries_for_loan(ctx.org_id, loan_id)
    }

    /// flag pending installments due before today as overdue
    ///
    /// returns the number of installments flagged across the organisation
    #[instrument(skip_all, fields(org_id = %ctx.org_id))]
    pub fn refresh_overdue(&self, ctx: &RequestContext, time: &SafeTimeProvider) -> Result<usize> {
        ctx.authorize(Operation::RefreshOverdue)?;

        let now = time.now();
        let as_of = now.date_naive();
        let mut flagged_total = 0;

        for candidate in self.store.list_loans(ctx.org_id)? {
            if candidate.is_fully_paid() {
                continue;
            }

            let updated = self.store.update_loan(candidate.key(), |loan| {
                let before = loan_snapshot(loan);
                let flagged = loan.mark_overdue(as_of);
                Ok((flagged, before, loan_snapshot(loan)))
            });
            let (flagged, before, after) = match updated {
                Ok(result) => result,
                // removed since the listing
                Err(LoanError::LoanNotFound { .. }) => {
                    debug!(loan_id = %candidate.id, "loan gone before overdue check");
                    continue;
                }
                Err(err) => return Err(err),
            };

            if flagged > 0 {
                debug!(loan_id = %candidate.id, flagged, "installments overdue");
                let mut after = after;
                if let Some(fields) = after.as_object_mut() {
                    fields.insert("overdue_installments".to_string(), json!(flagged));
                }
                self.log_activity(
                    ctx,
                    Some(candidate.id),
                    ActivityAction::LoanOverdue,
                    Some(before),
                    Some(after),
                    now,
                );
                flagged_total += flagged;
            }
        }

        info!(flagged = flagged_total, %as_of, "overdue sweep finished");
        Ok(flagged_total)
    }

    /// retry issuance for every payment still missing a receipt
    ///
    /// each payment is claimed before the issuer is called; payments another
    /// call has already claimed are skipped.
    #[instrument(skip_all, fields(org_id = %ctx.org_id))]
    pub fn reissue_receipts(&self, ctx: &RequestContext, time: &SafeTimeProvider) -> Result<ReceiptReissue> {
        ctx.authorize(Operation::ReissueReceipts)?;

        let mut outcome = ReceiptReissue::default();

        for loan in self.store.list_loans(ctx.org_id)? {
            let key = loan.key();
            for payment in loan.payments.iter().filter(|p| p.receipt_status.needs_receipt()) {
                match self.store.update_loan(key, |current| claim_receipt(current, key, payment.id)) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(payment_id = %payment.id, "receipt claimed elsewhere");
                        continue;
                    }
                    Err(LoanError::LoanNotFound { .. }) => break,
                    Err(err) => {
                        warn!(payment_id = %payment.id, error = %err, "could not claim receipt");
                        outcome.failed.push(payment.id);
                        continue;
                    }
                }

                match self.issue_receipt(key, payment.id) {
                    Ok(receipt) => {
                        self.log_activity(
                            ctx,
                            Some(loan.id),
                            ActivityAction::ReceiptReissued,
                            Some(json!({ "receipt_status": payment.receipt_status })),
                            Some(json!({
                                "receipt_status": ReceiptStatus::Issued,
                                "payment_id": payment.id,
                                "storage_path": receipt.storage_path,
                            })),
                            time.now(),
                        );
                        outcome.issued.push(receipt);
                    }
                    Err(_) => outcome.failed.push(payment.id),
                }
            }
        }

        info!(
            issued = outcome.issued.len(),
            failed = outcome.failed.len(),
            "receipt reissue finished"
        );
        Ok(outcome)
    }

    fn load(&self, ctx: &RequestContext, loan_id: LoanId) -> Result<Loan> {
        self.store
            .find_loan(LoanKey::new(ctx.org_id, loan_id))?
            .ok_or(LoanError::LoanNotFound { id: loan_id })
    }

    // caller must hold the claim on the payment's receipt
    fn issue_receipt(&self, key: LoanKey, payment_id: PaymentId) -> Result<Receipt> {
        let loan = self
            .store
            .find_loan(key)?
            .ok_or(LoanError::LoanNotFound { id: key.loan_id })?;
        let payment = loan.payment(payment_id).ok_or_else(|| LoanError::Storage {
            message: format!("payment {} missing from loan {}", payment_id, key),
        })?;
        let request = ReceiptRequest::new(&loan, payment);

        // a receipt that could not be stored counts as not issued
        let issued = self.receipts.generate_receipt(&request).and_then(|issued| {
            let receipt = Receipt::from_issued(&request, issued);
            self.store.save_receipt(receipt.clone())?;
            Ok(receipt)
        });

        match issued {
            Ok(receipt) => {
                self.release_claim(key, payment_id, ReceiptStatus::Issued)?;
                debug!(%payment_id, path = %receipt.storage_path, "receipt issued");
                Ok(receipt)
            }
            Err(err) => {
                warn!(%payment_id, error = %err, "receipt issuance failed, payment kept for reissue");
                if let Err(store_err) = self.release_claim(key, payment_id, ReceiptStatus::Failed) {
                    warn!(%payment_id, error = %store_err, "could not flag failed receipt");
                }
                Err(match err {
                    LoanError::ReceiptIssuance { .. } => err,
                    other => LoanError::ReceiptIssuance {
                        message: other.to_string(),
                    },
                })
            }
        }
    }

    /// settle a claimed receipt; a status nobody claimed is left untouched
    fn release_claim(&self, key: LoanKey, payment_id: PaymentId, status: ReceiptStatus) -> Result<()> {
        let released = self.store.update_loan(key, |loan| {
            let payment = find_payment_mut(loan, key, payment_id)?;
            if payment.receipt_status != ReceiptStatus::Issuing {
                return Ok(false);
            }
            payment.receipt_status = status;
            Ok(true)
        })?;
        if !released {
            warn!(%payment_id, ?status, "receipt claim already released");
        }
        Ok(())
    }

    // best effort, a failed write never fails the operation
    fn log_activity(
        &self,
        ctx: &RequestContext,
        loan_id: Option<LoanId>,
        action: ActivityAction,
        before: Option<Value>,
        after: Option<Value>,
        at: DateTime<Utc>,
    ) {
        let entry = ActivityEntry::new(
            ctx.org_id,
            loan_id,
            ctx.user_id.clone(),
            action,
            before.as_ref(),
            after.as_ref(),
            at,
        );
        if let Err(err) = self.activity.record(entry) {
            warn!(%action, error = %err, "activity log write failed");
        }
    }
}

/// loan fields tracked by the activity diff
/// compare-and-swap a payment's receipt into `Issuing`, false when already taken
fn claim_receipt(loan: &mut Loan, key: LoanKey, payment_id: PaymentId) -> Result<bool> {
    let payment = find_payment_mut(loan, key, payment_id)?;
    if !payment.receipt_status.needs_receipt() {
        return Ok(false);
    }
    payment.receipt_status = ReceiptStatus::Issuing;
    Ok(true)
}

fn find_payment_mut(loan: &mut Loan, key: LoanKey, payment_id: PaymentId) -> Result<&mut Payment> {
    loan.payments
        .iter_mut()
        .find(|p| p.id == payment_id)
        .ok_or_else(|| LoanError::Storage {
            message: format!("payment {} missing from loan {}", payment_id, key),
        })
}

fn loan_snapshot(loan: &Loan) -> Value {
    json!({
        "external_id": loan.external_id,
        "borrower_name": loan.borrower.name,
        "borrower_phone": loan.borrower.phone,
        "borrower_national_id": loan.borrower.national_id,
        "principal": loan.principal,
        "interest_rate": loan.interest_rate,
        "frequency": loan.frequency,
        "maturity_date": loan.maturity_date,
        "status": loan.status,
        "is_stopped": loan.is_stopped,
    })
}
