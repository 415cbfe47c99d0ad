//! Domain models for billing-service.

mod account;
mod attendance;
mod bill;
mod customer;
mod period;

pub use account::{
    receivable_account_name, Account, AccountType, BankTransaction, LedgerAdjustment,
    LedgerMirrorJob, MirrorJobStatus, RelatedEntityType, TransactionType,
};
pub use attendance::{AdditionalProduct, AttendanceRecord, AttendanceStatus};
pub use bill::{Bill, BillFilter, BillStatus, Payment, PaymentMethod};
pub use customer::{BillingType, CreateCustomer, Customer, CustomerType};
pub use period::{BillingPeriod, PeriodError};
