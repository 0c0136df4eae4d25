use thiserror::Error;
use uuid::Uuid;

use crate::context::Role;
use crate::decimal::Money;
use crate::types::LoanStatus;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoanError {
    #[error("invalid loan terms: {message}")]
    InvalidLoanTerms {
        message: String,
    },

    #[error("invalid borrower details: {message}")]
    InvalidBorrower {
        message: String,
    },

    #[error("loan not found: {id}")]
    LoanNotFound {
        id: Uuid,
    },

    #[error("installment not found: {id}")]
    InstallmentNotFound {
        id: Uuid,
    },

    #[error("installment already paid: {id}")]
    InstallmentAlreadyPaid {
        id: Uuid,
    },

    #[error("no pending installments on loan {loan_id}")]
    NoPendingInstallments {
        loan_id: Uuid,
    },

    #[error("invalid payment amount: {amount}")]
    InvalidPaymentAmount {
        amount: Money,
    },

    #[error("invalid status override: {from:?} -> {to:?}")]
    InvalidStatusOverride {
        from: LoanStatus,
        to: LoanStatus,
    },

    #[error("role {role:?} may not {operation}")]
    Forbidden {
        role: Role,
        operation: String,
    },

    #[error("receipt issuance failed: {message}")]
    ReceiptIssuance {
        message: String,
    },

    #[error("amount overflow: {message}")]
    AmountOverflow {
        message: String,
    },

    #[error("storage error: {message}")]
    Storage {
        message: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },
}

impl LoanError {
    /// status code a transport boundary should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            LoanError::InvalidLoanTerms { .. }
            | LoanError::InvalidBorrower { .. }
            | LoanError::InvalidPaymentAmount { .. }
            | LoanError::InstallmentAlreadyPaid { .. }
            | LoanError::NoPendingInstallments { .. } => 400,
            LoanError::Forbidden { .. } => 403,
            LoanError::LoanNotFound { .. } | LoanError::InstallmentNotFound { .. } => 404,
            LoanError::InvalidStatusOverride { .. } => 409,
            LoanError::ReceiptIssuance { .. } => 502,
            LoanError::AmountOverflow { .. }
            | LoanError::Storage { .. }
            | LoanError::InvalidConfiguration { .. } => 500,
        }
    }

    /// caller mistakes, as opposed to collaborator or engine failures
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.http_status())
    }
}

pub type Result<T> = std::result::Result<T, LoanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let id = Uuid::new_v4();
        assert_eq!(LoanError::LoanNotFound { id }.http_status(), 404);
        assert_eq!(LoanError::InstallmentAlreadyPaid { id }.http_status(), 400);
        assert_eq!(
            LoanError::Forbidden { role: Role::ReadOnly, operation: "charge".to_string() }.http_status(),
            403
        );
        assert_eq!(LoanError::ReceiptIssuance { message: "down".to_string() }.http_status(), 502);
    }

    #[test]
    fn test_client_errors() {
        assert!(LoanError::InvalidPaymentAmount { amount: Money::ZERO }.is_client_error());
        assert!(!LoanError::Storage { message: "poisoned".to_string() }.is_client_error());
        assert!(!LoanError::AmountOverflow { message: "collected".to_string() }.is_client_error());
        assert!(!LoanError::ReceiptIssuance { message: "timeout".to_string() }.is_client_error());
    }

    #[test]
    fn test_messages() {
        let err = LoanError::InvalidPaymentAmount { amount: Money::from_major(-5) };
        assert_eq!(err.to_string(), "invalid payment amount: -5");
    }
}
