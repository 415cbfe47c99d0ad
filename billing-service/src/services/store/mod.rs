//! Persistence boundary for billing-service.
//!
//! Every write that must move a customer's balance together with a bill goes
//! through a single store call, so implementations can commit both atomically.

mod memory;
mod mongo;

pub use memory::InMemoryBillingStore;
pub use mongo::MongoBillingStore;

use crate::models::{
    Account, AccountType, AttendanceRecord, BankTransaction, Bill, BillFilter, Customer,
    LedgerMirrorJob,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} already exists: {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("{entity} {id} was modified concurrently")]
    VersionConflict { entity: &'static str, id: String },

    #[error("ledger mirror job {id} is no longer pending")]
    AlreadySettled { id: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { .. }
            | StoreError::VersionConflict { .. }
            | StoreError::AlreadySettled { .. } => {
                AppError::Conflict(anyhow::anyhow!(err.to_string()))
            }
            StoreError::NotFound { .. } => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            other => AppError::DatabaseError(anyhow::anyhow!(other.to_string())),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage operations used by the billing engine, payment recorder and ledger mirror.
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn health_check(&self) -> StoreResult<()>;

    // Customers

    async fn insert_customer(&self, customer: &Customer) -> StoreResult<()>;

    async fn get_customer(&self, customer_id: &str) -> StoreResult<Option<Customer>>;

    async fn list_customers(&self) -> StoreResult<Vec<Customer>>;

    /// Overwrite the customer's profile and billing terms. `balance_due` is
    /// left untouched; it only moves through bill and payment deltas.
    async fn update_customer(&self, customer: &Customer) -> StoreResult<Customer>;

    /// Active daily-milk customers among `customer_ids`.
    async fn find_billable_customers(&self, customer_ids: &[String])
        -> StoreResult<Vec<Customer>>;

    // Attendance

    /// Insert or replace the record for `(customer_id, date)`.
    async fn upsert_attendance(&self, record: &AttendanceRecord) -> StoreResult<AttendanceRecord>;

    /// Distinct customer ids with any attendance in `[start, end]`.
    async fn attendance_customer_ids(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<String>>;

    /// A customer's records in `[start, end]`, oldest first.
    async fn attendance_for_customer(
        &self,
        customer_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<AttendanceRecord>>;

    // Bills

    /// Plain insert; fails with `Duplicate` when the customer already has a
    /// bill for the period.
    async fn insert_bill(&self, bill: &Bill) -> StoreResult<()>;

    async fn get_bill(&self, bill_id: &str) -> StoreResult<Option<Bill>>;

    async fn find_bill_for_period(
        &self,
        customer_id: &str,
        billing_period: &str,
    ) -> StoreResult<Option<Bill>>;

    /// Bills matching `filter`, newest period first.
    async fn list_bills(&self, filter: &BillFilter) -> StoreResult<Vec<Bill>>;

    /// Write `bill` and add `balance_delta` to its customer's `balance_due` as
    /// one atomic unit.
    ///
    /// `expected_version` is `None` for a new bill and the version that was
    /// read otherwise. The stored bill gets the next version and is returned.
    async fn save_bill_with_balance(
        &self,
        bill: Bill,
        expected_version: Option<i64>,
        balance_delta: Decimal,
    ) -> StoreResult<Bill>;

    /// Remove a bill and add `balance_delta` to its customer's balance atomically.
    async fn remove_bill_with_balance(
        &self,
        bill_id: &str,
        expected_version: i64,
        balance_delta: Decimal,
    ) -> StoreResult<()>;

    /// Flip every unpaid bill due before `as_of` to overdue. Returns the count.
    async fn mark_overdue(&self, as_of: NaiveDate) -> StoreResult<u64>;

    // Accounts

    async fn insert_account(&self, account: &Account) -> StoreResult<()>;

    async fn get_account(&self, account_id: &str) -> StoreResult<Option<Account>>;

    async fn find_account_by_name(
        &self,
        name: &str,
        account_type: AccountType,
    ) -> StoreResult<Option<Account>>;

    /// Add `delta` to the account balance and append `transaction` with its
    /// `balance_after` filled in. When `settles_job` is set, that mirror job is
    /// marked applied in the same unit, and nothing is written unless the job
    /// was still pending (`AlreadySettled` otherwise).
    async fn apply_account_delta(
        &self,
        account_id: &str,
        delta: Decimal,
        transaction: BankTransaction,
        settles_job: Option<&str>,
    ) -> StoreResult<(Account, BankTransaction)>;

    /// An account's transactions, oldest first.
    async fn list_account_transactions(&self, account_id: &str)
        -> StoreResult<Vec<BankTransaction>>;

    // Ledger mirror retry queue

    async fn enqueue_mirror_job(&self, job: &LedgerMirrorJob) -> StoreResult<()>;

    /// Pending jobs, oldest first.
    async fn pending_mirror_jobs(&self) -> StoreResult<Vec<LedgerMirrorJob>>;

    /// Overwrite a job that is still pending. Fails with `AlreadySettled` once
    /// another writer has moved it out of `Pending`.
    async fn update_mirror_job(&self, job: &LedgerMirrorJob) -> StoreResult<()>;
}
