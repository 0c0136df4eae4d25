pub mod activity;
pub mod config;
pub mod context;
pub mod decimal;
pub mod errors;
pub mod installments;
pub mod loan;
pub mod payments;
pub mod receipts;
pub mod service;
pub mod store;
pub mod types;
pub mod views;

// re-export key types
pub use activity::{ActivityAction, ActivityEntry, ActivityLog, ActivitySink, FieldChange};
pub use config::{EngineConfig, ReceiptConfig};
pub use context::{Operation, RequestContext, Role};
pub use decimal::{Money, Rate};
pub use errors::{LoanError, Result};
pub use installments::{InstallmentSchedule, LoanTerms, ScheduledInstallment};
pub use loan::{Borrower, Installment, Loan, LoanUpdate, NewLoan, Payment};
pub use payments::{AppliedPayment, ChargeReceipt, ChargeRequest};
pub use receipts::{IssuedReceipt, MockReceiptIssuer, Receipt, ReceiptIssuer, ReceiptRequest};
pub use service::{LoanService, ReceiptReissue};
pub use store::{InMemoryStore, LoanStore};
pub use types::{
    Frequency, InstallmentId, InstallmentRounding, InstallmentStatus, LoanId, LoanKey, LoanStatus,
    OrgId, PaymentId, ReceiptStatus,
};
pub use views::{CashSummary, LoanView, PaymentView};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
