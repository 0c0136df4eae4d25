use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::RwLock;
use uuid::Uuid;

use crate::errors::{LoanError, Result};
use crate::types::{LoanId, OrgId};

/// audited actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityAction {
    #[serde(rename = "loan.created")]
    LoanCreated,
    #[serde(rename = "loan.updated")]
    LoanUpdated,
    #[serde(rename = "loan.deleted")]
    LoanDeleted,
    #[serde(rename = "loan.installment_paid")]
    InstallmentPaid,
    #[serde(rename = "loan.stopped")]
    LoanStopped,
    #[serde(rename = "loan.overdue")]
    LoanOverdue,
    #[serde(rename = "loan.receipt_reissued")]
    ReceiptReissued,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::LoanCreated => "loan.created",
            ActivityAction::LoanUpdated => "loan.updated",
            ActivityAction::LoanDeleted => "loan.deleted",
            ActivityAction::InstallmentPaid => "loan.installment_paid",
            ActivityAction::LoanStopped => "loan.stopped",
            ActivityAction::LoanOverdue => "loan.overdue",
            ActivityAction::ReceiptReissued => "loan.receipt_reissued",
        }
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// before/after pair of a changed field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub before: Value,
    pub after: Value,
}

/// one audit trail row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub org_id: OrgId,
    pub loan_id: Option<LoanId>,
    pub actor_id: String,
    pub action: ActivityAction,
    pub diff: BTreeMap<String, FieldChange>,
    pub day_hash: String,
    pub created_at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(
        org_id: OrgId,
        loan_id: Option<LoanId>,
        actor_id: impl Into<String>,
        action: ActivityAction,
        before: Option<&Value>,
        after: Option<&Value>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            loan_id,
            actor_id: actor_id.into(),
            action,
            diff: diff_objects(before, after),
            day_hash: day_hash(org_id, created_at),
            created_at,
        }
    }
}

/// top-level fields whose json differs between two snapshots
///
/// non-object snapshots count as empty; missing fields show up as null
pub fn diff_objects(before: Option<&Value>, after: Option<&Value>) -> BTreeMap<String, FieldChange> {
    let empty = Map::new();
    let before = before.and_then(Value::as_object).unwrap_or(&empty);
    let after = after.and_then(Value::as_object).unwrap_or(&empty);

    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();

    keys.into_iter()
        .filter_map(|key| {
            let prev = before.get(key).cloned().unwrap_or(Value::Null);
            let next = after.get(key).cloned().unwrap_or(Value::Null);
            if prev == next {
                None
            } else {
                Some((key.clone(), FieldChange { before: prev, after: next }))
            }
        })
        .collect()
}

/// hex sha-256 of `"{org}:{yyyy-mm-dd}"`, groups an org's activity per day
pub fn day_hash(org_id: OrgId, timestamp: DateTime<Utc>) -> String {
    let day_key = timestamp.format("%Y-%m-%d");
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", org_id, day_key).as_bytes());
    hex::encode(hasher.finalize())
}

/// audit trail destination
pub trait ActivitySink: Send + Sync {
    fn record(&self, entry: ActivityEntry) -> Result<()>;

    /// entries for one loan, newest first
    fn entries_for_loan(&self, org_id: OrgId, loan_id: LoanId) -> Result<Vec<ActivityEntry>>;
}

/// in-memory activity log
#[derive(Debug, Default)]
pub struct ActivityLog {
    entries: RwLock<Vec<ActivityEntry>>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.entries.read().map_err(|_| poisoned())?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// every entry of an org for one day hash
    pub fn entries_for_day(&self, org_id: OrgId, day_hash: &str) -> Result<Vec<ActivityEntry>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .iter()
            .filter(|e| e.org_id == org_id && e.day_hash == day_hash)
            .cloned()
            .collect())
    }
}

impl ActivitySink for ActivityLog {
    fn record(&self, entry: ActivityEntry) -> Result<()> {
        self.entries.write().map_err(|_| poisoned())?.push(entry);
        Ok(())
    }

    fn entries_for_loan(&self, org_id: OrgId, loan_id: LoanId) -> Result<Vec<ActivityEntry>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let mut found: Vec<ActivityEntry> = entries
            .iter()
            .filter(|e| e.org_id == org_id && e.loan_id == Some(loan_id))
            .cloned()
            .collect();
        // stable sort keeps insertion order for equal timestamps, reverse it first
        found.reverse();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}

impl<T: ActivitySink + ?Sized> ActivitySink for std::sync::Arc<T> {
    fn record(&self, entry: ActivityEntry) -> Result<()> {
        (**self).record(entry)
    }

    fn entries_for_loan(&self, org_id: OrgId, loan_id: LoanId) -> Result<Vec<ActivityEntry>> {
        (**self).entries_for_loan(org_id, loan_id)
    }
}

fn poisoned() -> LoanError {
    LoanError::Storage {
        message: "activity log lock poisoned".to_string(),
    }
}
