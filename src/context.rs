use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{LoanError, Result};
use crate::types::OrgId;

/// organisation member role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "owner")]
    Owner,
    #[serde(rename = "supervisor")]
    Supervisor,
    /// front-desk cashier
    #[serde(rename = "caja")]
    Cashier,
    #[serde(rename = "readonly")]
    ReadOnly,
}

impl FromStr for Role {
    type Err = LoanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "owner" => Ok(Role::Owner),
            "supervisor" => Ok(Role::Supervisor),
            "caja" | "cashier" => Ok(Role::Cashier),
            "readonly" => Ok(Role::ReadOnly),
            other => Err(LoanError::InvalidConfiguration {
                message: format!("unknown role '{}'", other),
            }),
        }
    }
}

/// engine operations subject to role checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateLoan,
    ReadLoans,
    UpdateLoan,
    RemoveLoan,
    Charge,
    StopLoan,
    ReadPayments,
    ReadSummary,
    ReadActivity,
    RefreshOverdue,
    ReissueReceipts,
}

impl Operation {
    pub fn allowed_roles(&self) -> &'static [Role] {
        use Role::*;
        match self {
            Operation::CreateLoan
            | Operation::UpdateLoan
            | Operation::StopLoan
            | Operation::RefreshOverdue
            | Operation::ReissueReceipts => &[Owner, Supervisor],
            Operation::RemoveLoan => &[Owner],
            Operation::Charge => &[Owner, Supervisor, Cashier],
            Operation::ReadLoans
            | Operation::ReadPayments
            | Operation::ReadSummary
            | Operation::ReadActivity => &[Owner, Supervisor, Cashier, ReadOnly],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateLoan => "create loans",
            Operation::ReadLoans => "read loans",
            Operation::UpdateLoan => "update loans",
            Operation::RemoveLoan => "remove loans",
            Operation::Charge => "charge installments",
            Operation::StopLoan => "stop loans",
            Operation::ReadPayments => "read payments",
            Operation::ReadSummary => "read cash summaries",
            Operation::ReadActivity => "read activity",
            Operation::RefreshOverdue => "refresh overdue installments",
            Operation::ReissueReceipts => "reissue receipts",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// caller identity, passed explicitly into every engine call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub org_id: OrgId,
    pub user_id: String,
    pub role: Role,
}

impl RequestContext {
    pub fn new(org_id: OrgId, user_id: impl Into<String>, role: Role) -> Self {
        Self {
            org_id,
            user_id: user_id.into(),
            role,
        }
    }

    /// context for automated payment notifications
    pub fn webhook(org_id: OrgId) -> Self {
        Self::new(org_id, "webhook", Role::Owner)
    }

    pub fn can(&self, operation: Operation) -> bool {
        operation.allowed_roles().contains(&self.role)
    }

    /// fail with `Forbidden` unless the role may perform the operation
    pub fn authorize(&self, operation: Operation) -> Result<()> {
        if self.can(operation) {
            Ok(())
        } else {
            Err(LoanError::Forbidden {
                role: self.role,
                operation: operation.name().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_role_matrix() {
        let org = Uuid::new_v4();
        let owner = RequestContext::new(org, "u1", Role::Owner);
        let supervisor = RequestContext::new(org, "u2", Role::Supervisor);
        let cashier = RequestContext::new(org, "u3", Role::Cashier);
        let readonly = RequestContext::new(org, "u4", Role::ReadOnly);

        assert!(owner.can(Operation::RemoveLoan));
        assert!(!supervisor.can(Operation::RemoveLoan));

        assert!(cashier.can(Operation::Charge));
        assert!(!cashier.can(Operation::CreateLoan));
        assert!(!cashier.can(Operation::StopLoan));

        assert!(readonly.can(Operation::ReadLoans));
        assert!(readonly.can(Operation::ReadSummary));
        assert!(!readonly.can(Operation::Charge));
    }

    #[test]
    fn test_authorize_reports_role() {
        let ctx = RequestContext::new(Uuid::new_v4(), "u", Role::ReadOnly);
        let err = ctx.authorize(Operation::Charge).unwrap_err();
        assert_eq!(
            err,
            LoanError::Forbidden {
                role: Role::ReadOnly,
                operation: "charge installments".to_string(),
            }
        );
    }

    #[test]
    fn test_webhook_context() {
        let org = Uuid::new_v4();
        let ctx = RequestContext::webhook(org);
        assert_eq!(ctx.org_id, org);
        assert_eq!(ctx.user_id, "webhook");
        assert!(ctx.can(Operation::Charge));
    }

    #[test]
    fn test_context_wire_form() {
        let org = Uuid::new_v4();
        let value = serde_json::to_value(RequestContext::new(org, "u7", Role::Supervisor)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "org_id": org, "user_id": "u7", "role": "supervisor" })
        );
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("caja".parse::<Role>().unwrap(), Role::Cashier);
        assert_eq!("readonly".parse::<Role>().unwrap(), Role::ReadOnly);
        assert!("admin".parse::<Role>().is_err());
        assert_eq!(serde_json::to_string(&Role::Cashier).unwrap(), "\"caja\"");
    }
}
