pub mod resolver;
pub mod schedule;

pub use resolver::{resolve_index, resolve_installment};
pub use schedule::{advance, first_due_date, InstallmentSchedule, LoanTerms, ScheduledInstallment};
