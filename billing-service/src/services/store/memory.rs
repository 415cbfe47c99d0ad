//! In-memory `BillingStore` for tests and local runs without MongoDB.

use super::{BillingStore, StoreError, StoreResult};
use crate::models::{
    Account, AccountType, AttendanceRecord, BankTransaction, Bill, BillFilter, BillStatus,
    Customer, LedgerMirrorJob, MirrorJobStatus,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    customers: HashMap<String, Customer>,
    attendance: HashMap<String, AttendanceRecord>,
    bills: HashMap<String, Bill>,
    accounts: HashMap<String, Account>,
    transactions: Vec<BankTransaction>,
    mirror_jobs: Vec<LedgerMirrorJob>,
}

impl MemoryState {
    fn bill_for_period(&self, customer_id: &str, billing_period: &str) -> Option<&Bill> {
        self.bills
            .values()
            .find(|b| b.customer_id == customer_id && b.billing_period == billing_period)
    }
}

/// All collections live behind one lock, so every multi-record write is atomic.
#[derive(Default)]
pub struct InMemoryBillingStore {
    state: RwLock<MemoryState>,
    fail_account_writes: RwLock<bool>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `apply_account_delta` fail until switched off again.
    pub async fn set_fail_account_writes(&self, fail: bool) {
        *self.fail_account_writes.write().await = fail;
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert_customer(&self, customer: &Customer) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.customers.contains_key(&customer.id) {
            return Err(StoreError::Duplicate {
                entity: "customer",
                key: customer.id.clone(),
            });
        }
        state.customers.insert(customer.id.clone(), customer.clone());
        Ok(())
    }

    async fn get_customer(&self, customer_id: &str) -> StoreResult<Option<Customer>> {
        Ok(self.state.read().await.customers.get(customer_id).cloned())
    }

    async fn list_customers(&self) -> StoreResult<Vec<Customer>> {
        let state = self.state.read().await;
        let mut customers: Vec<Customer> = state.customers.values().cloned().collect();
        customers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(customers)
    }

    async fn update_customer(&self, customer: &Customer) -> StoreResult<Customer> {
        let mut state = self.state.write().await;
        let stored = state
            .customers
            .get_mut(&customer.id)
            .ok_or_else(|| StoreError::not_found("customer", &customer.id))?;
        let balance_due = stored.balance_due;
        let created_at = stored.created_at;
        *stored = Customer {
            balance_due,
            created_at,
            updated_at: Utc::now(),
            ..customer.clone()
        };
        Ok(stored.clone())
    }

    async fn find_billable_customers(
        &self,
        customer_ids: &[String],
    ) -> StoreResult<Vec<Customer>> {
        let state = self.state.read().await;
        Ok(customer_ids
            .iter()
            .filter_map(|id| state.customers.get(id))
            .filter(|c| c.is_billable())
            .cloned()
            .collect())
    }

    async fn upsert_attendance(&self, record: &AttendanceRecord) -> StoreResult<AttendanceRecord> {
        let mut state = self.state.write().await;
        state.attendance.insert(record.id.clone(), record.clone());
        Ok(record.clone())
    }

    async fn attendance_customer_ids(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<String>> {
        let state = self.state.read().await;
        let ids: BTreeSet<String> = state
            .attendance
            .values()
            .filter(|r| r.date >= start && r.date <= end)
            .map(|r| r.customer_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn attendance_for_customer(
        &self,
        customer_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<AttendanceRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<AttendanceRecord> = state
            .attendance
            .values()
            .filter(|r| r.customer_id == customer_id && r.date >= start && r.date <= end)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.date);
        Ok(records)
    }

    async fn insert_bill(&self, bill: &Bill) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state
            .bill_for_period(&bill.customer_id, &bill.billing_period)
            .is_some()
            || state.bills.contains_key(&bill.id)
        {
            return Err(StoreError::Duplicate {
                entity: "bill",
                key: format!("{}/{}", bill.customer_id, bill.billing_period),
            });
        }
        state.bills.insert(bill.id.clone(), bill.clone());
        Ok(())
    }

    async fn get_bill(&self, bill_id: &str) -> StoreResult<Option<Bill>> {
        Ok(self.state.read().await.bills.get(bill_id).cloned())
    }

    async fn find_bill_for_period(
        &self,
        customer_id: &str,
        billing_period: &str,
    ) -> StoreResult<Option<Bill>> {
        Ok(self
            .state
            .read()
            .await
            .bill_for_period(customer_id, billing_period)
            .cloned())
    }

    async fn list_bills(&self, filter: &BillFilter) -> StoreResult<Vec<Bill>> {
        let state = self.state.read().await;
        let mut bills: Vec<Bill> = state
            .bills
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        bills.sort_by(|a, b| {
            b.billing_period
                .cmp(&a.billing_period)
                .then_with(|| a.customer_name.cmp(&b.customer_name))
        });
        Ok(bills)
    }

    async fn save_bill_with_balance(
        &self,
        mut bill: Bill,
        expected_version: Option<i64>,
        balance_delta: Decimal,
    ) -> StoreResult<Bill> {
        let mut state = self.state.write().await;

        match expected_version {
            None => {
                if state
                    .bill_for_period(&bill.customer_id, &bill.billing_period)
                    .is_some()
                {
                    return Err(StoreError::Duplicate {
                        entity: "bill",
                        key: format!("{}/{}", bill.customer_id, bill.billing_period),
                    });
                }
                bill.version = 1;
            }
            Some(expected) => {
                let current = state
                    .bills
                    .get(&bill.id)
                    .ok_or_else(|| StoreError::not_found("bill", &bill.id))?;
                if current.version != expected {
                    return Err(StoreError::VersionConflict {
                        entity: "bill",
                        id: bill.id.clone(),
                    });
                }
                bill.version = expected + 1;
            }
        }

        // Validate the customer before touching anything so a failure leaves no trace.
        if !balance_delta.is_zero() {
            let customer = state
                .customers
                .get_mut(&bill.customer_id)
                .ok_or_else(|| StoreError::not_found("customer", &bill.customer_id))?;
            customer.balance_due += balance_delta;
            customer.updated_at = Utc::now();
        }

        state.bills.insert(bill.id.clone(), bill.clone());
        Ok(bill)
    }

    async fn remove_bill_with_balance(
        &self,
        bill_id: &str,
        expected_version: i64,
        balance_delta: Decimal,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let bill = state
            .bills
            .get(bill_id)
            .ok_or_else(|| StoreError::not_found("bill", bill_id))?;
        if bill.version != expected_version {
            return Err(StoreError::VersionConflict {
                entity: "bill",
                id: bill_id.to_string(),
            });
        }
        let customer_id = bill.customer_id.clone();

        if !balance_delta.is_zero() {
            let customer = state
                .customers
                .get_mut(&customer_id)
                .ok_or_else(|| StoreError::not_found("customer", &customer_id))?;
            customer.balance_due += balance_delta;
            customer.updated_at = Utc::now();
        }

        state.bills.remove(bill_id);
        Ok(())
    }

    async fn mark_overdue(&self, as_of: NaiveDate) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut updated = 0;
        for bill in state.bills.values_mut() {
            if bill.status == BillStatus::Unpaid && bill.due_date < as_of {
                bill.status = BillStatus::Overdue;
                bill.version += 1;
                bill.updated_at = now;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let taken = state
            .accounts
            .values()
            .any(|a| a.name == account.name && a.account_type == account.account_type);
        if taken || state.accounts.contains_key(&account.id) {
            return Err(StoreError::Duplicate {
                entity: "account",
                key: format!("{} ({})", account.name, account.account_type),
            });
        }
        state.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn get_account(&self, account_id: &str) -> StoreResult<Option<Account>> {
        Ok(self.state.read().await.accounts.get(account_id).cloned())
    }

    async fn find_account_by_name(
        &self,
        name: &str,
        account_type: AccountType,
    ) -> StoreResult<Option<Account>> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .values()
            .find(|a| a.name == name && a.account_type == account_type)
            .cloned())
    }

    async fn apply_account_delta(
        &self,
        account_id: &str,
        delta: Decimal,
        mut transaction: BankTransaction,
        settles_job: Option<&str>,
    ) -> StoreResult<(Account, BankTransaction)> {
        if *self.fail_account_writes.read().await {
            return Err(StoreError::Unavailable(
                "account writes are disabled".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        if let Some(job_id) = settles_job {
            let job = state
                .mirror_jobs
                .iter()
                .find(|j| j.id == job_id)
                .ok_or_else(|| StoreError::not_found("ledger mirror job", job_id))?;
            if job.status != MirrorJobStatus::Pending {
                return Err(StoreError::AlreadySettled {
                    id: job_id.to_string(),
                });
            }
        }

        let account = state
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| StoreError::not_found("account", account_id))?;
        account.current_balance += delta;
        account.updated_at = Utc::now();
        let account = account.clone();

        transaction.balance_after = account.current_balance;
        state.transactions.push(transaction.clone());

        if let Some(job_id) = settles_job {
            if let Some(job) = state.mirror_jobs.iter_mut().find(|j| j.id == job_id) {
                job.status = MirrorJobStatus::Applied;
                job.last_error = None;
                job.updated_at = Utc::now();
            }
        }

        Ok((account, transaction))
    }

    async fn list_account_transactions(
        &self,
        account_id: &str,
    ) -> StoreResult<Vec<BankTransaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn enqueue_mirror_job(&self, job: &LedgerMirrorJob) -> StoreResult<()> {
        self.state.write().await.mirror_jobs.push(job.clone());
        Ok(())
    }

    async fn pending_mirror_jobs(&self) -> StoreResult<Vec<LedgerMirrorJob>> {
        let state = self.state.read().await;
        Ok(state
            .mirror_jobs
            .iter()
            .filter(|j| j.status == MirrorJobStatus::Pending)
            .cloned()
            .collect())
    }

    async fn update_mirror_job(&self, job: &LedgerMirrorJob) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let stored = state
            .mirror_jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| StoreError::not_found("ledger mirror job", &job.id))?;
        if stored.status != MirrorJobStatus::Pending {
            return Err(StoreError::AlreadySettled { id: job.id.clone() });
        }
        *stored = job.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BillingType, CreateCustomer, CustomerType};

    fn customer() -> Customer {
        Customer::new(CreateCustomer {
            name: "Lakshmi".to_string(),
            phone: None,
            customer_type: CustomerType::DailyMilk,
            billing_type: BillingType::Subscription,
            subscription_amount: Some(Decimal::new(3000, 0)),
            price_per_liter: None,
            is_active: true,
        })
    }

    fn bill(customer: &Customer, total: Decimal) -> Bill {
        let now = Utc::now();
        Bill {
            id: uuid::Uuid::new_v4().to_string(),
            customer_id: customer.id.clone(),
            customer_name: customer.name.clone(),
            billing_period: "2024-05".to_string(),
            billing_type: BillingType::Subscription,
            total_amount: total,
            base_amount: total,
            additional_amount: Decimal::ZERO,
            total_liters: Decimal::ZERO,
            price_per_liter: None,
            subscription_amount: Some(Decimal::new(3000, 0)),
            delivered_days: 31,
            total_days: 31,
            proration_factor: Some(Decimal::ONE),
            status: BillStatus::Unpaid,
            due_date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            invoice_number: "INV-2024-05-0001-0001".to_string(),
            payments: Vec::new(),
            notes: None,
            version: 0,
            generated_by: "admin".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_bill_moves_balance_and_bumps_version() {
        let store = InMemoryBillingStore::new();
        let customer = customer();
        store.insert_customer(&customer).await.unwrap();

        let saved = store
            .save_bill_with_balance(bill(&customer, Decimal::new(3000, 0)), None, Decimal::new(3000, 0))
            .await
            .unwrap();
        assert_eq!(saved.version, 1);

        let stored = store.get_customer(&customer.id).await.unwrap().unwrap();
        assert_eq!(stored.balance_due, Decimal::new(3000, 0));
    }

    #[tokio::test]
    async fn stale_version_is_rejected_without_side_effects() {
        let store = InMemoryBillingStore::new();
        let customer = customer();
        store.insert_customer(&customer).await.unwrap();
        let saved = store
            .save_bill_with_balance(bill(&customer, Decimal::new(100, 0)), None, Decimal::new(100, 0))
            .await
            .unwrap();

        let err = store
            .save_bill_with_balance(saved.clone(), Some(saved.version + 5), Decimal::new(50, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));

        let stored = store.get_customer(&customer.id).await.unwrap().unwrap();
        assert_eq!(stored.balance_due, Decimal::new(100, 0));
    }

    #[tokio::test]
    async fn missing_customer_leaves_no_bill_behind() {
        let store = InMemoryBillingStore::new();
        let ghost = customer();

        let err = store
            .save_bill_with_balance(bill(&ghost, Decimal::TEN), None, Decimal::TEN)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store
            .find_bill_for_period(&ghost.id, "2024-05")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_customer_keeps_balance() {
        let store = InMemoryBillingStore::new();
        let customer = customer();
        store.insert_customer(&customer).await.unwrap();
        store
            .save_bill_with_balance(bill(&customer, Decimal::TEN), None, Decimal::TEN)
            .await
            .unwrap();

        let mut changed = customer.clone();
        changed.subscription_amount = Some(Decimal::new(4000, 0));
        changed.balance_due = Decimal::new(-999, 0);
        let updated = store.update_customer(&changed).await.unwrap();

        assert_eq!(updated.subscription_amount, Some(Decimal::new(4000, 0)));
        assert_eq!(updated.balance_due, Decimal::TEN);
    }

    #[tokio::test]
    async fn overdue_sweep_only_touches_unpaid_bills_past_due() {
        let store = InMemoryBillingStore::new();
        let customer = customer();
        store.insert_customer(&customer).await.unwrap();
        let unpaid = bill(&customer, Decimal::TEN);
        store.insert_bill(&unpaid).await.unwrap();

        let before_due = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        assert_eq!(store.mark_overdue(before_due).await.unwrap(), 0);

        let after_due = NaiveDate::from_ymd_opt(2024, 6, 11).unwrap();
        assert_eq!(store.mark_overdue(after_due).await.unwrap(), 1);
        let stored = store.get_bill(&unpaid.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BillStatus::Overdue);
        assert_eq!(stored.version, unpaid.version + 1);
    }
}
