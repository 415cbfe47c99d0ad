//! MongoDB-backed `BillingStore`.
//!
//! Bill writes and account adjustments run inside multi-document transactions,
//! which need a replica set (a single-node replica set is enough).

use super::{BillingStore, StoreError, StoreResult};
use crate::models::{
    Account, AccountType, AttendanceRecord, BankTransaction, Bill, BillFilter, BillStatus,
    Customer, CustomerType, LedgerMirrorJob, MirrorJobStatus,
};
use crate::services::metrics::STORE_OPERATION_DURATION;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, to_bson, Bson, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOptions, IndexOptions},
    Client as MongoClient, ClientSession, Collection, Database, IndexModel,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, instrument};

const DUPLICATE_KEY: i32 = 11000;

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}

fn money(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

fn now_bson() -> StoreResult<Bson> {
    Ok(to_bson(&Utc::now())?)
}

/// Commit on success, abort on failure, and hand back the body's result.
async fn finish_transaction<T>(
    session: &mut ClientSession,
    result: StoreResult<T>,
) -> StoreResult<T> {
    match result {
        Ok(value) => {
            session.commit_transaction().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(abort_err) = session.abort_transaction().await {
                tracing::warn!(error = %abort_err, "Failed to abort transaction");
            }
            Err(e)
        }
    }
}

#[derive(Clone)]
pub struct MongoBillingStore {
    client: MongoClient,
    db: Database,
}

impl MongoBillingStore {
    pub async fn connect(uri: &str, database: &str) -> StoreResult<Self> {
        info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            StoreError::Database(e)
        })?;
        let db = client.database(database);
        info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> StoreResult<()> {
        info!("Creating MongoDB indexes for billing-service");

        let bill_period_index = IndexModel::builder()
            .keys(doc! { "customer_id": 1, "billing_period": 1 })
            .options(
                IndexOptions::builder()
                    .name("customer_period_unique".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.bills().create_index(bill_period_index, None).await?;

        let bill_status_index = IndexModel::builder()
            .keys(doc! { "status": 1, "due_date": 1 })
            .options(
                IndexOptions::builder()
                    .name("status_due_date_idx".to_string())
                    .build(),
            )
            .build();
        self.bills().create_index(bill_status_index, None).await?;

        let invoice_index = IndexModel::builder()
            .keys(doc! { "invoice_number": 1 })
            .options(
                IndexOptions::builder()
                    .name("invoice_number_unique".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.bills().create_index(invoice_index, None).await?;

        let attendance_index = IndexModel::builder()
            .keys(doc! { "customer_id": 1, "date": 1 })
            .options(
                IndexOptions::builder()
                    .name("customer_date_unique".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.attendance().create_index(attendance_index, None).await?;

        let attendance_date_index = IndexModel::builder()
            .keys(doc! { "date": 1 })
            .options(IndexOptions::builder().name("date_idx".to_string()).build())
            .build();
        self.attendance()
            .create_index(attendance_date_index, None)
            .await?;

        let account_name_index = IndexModel::builder()
            .keys(doc! { "name": 1, "account_type": 1 })
            .options(
                IndexOptions::builder()
                    .name("name_type_unique".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.accounts().create_index(account_name_index, None).await?;

        let transaction_account_index = IndexModel::builder()
            .keys(doc! { "account_id": 1, "created_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("account_created_idx".to_string())
                    .build(),
            )
            .build();
        self.transactions()
            .create_index(transaction_account_index, None)
            .await?;

        let job_status_index = IndexModel::builder()
            .keys(doc! { "status": 1, "created_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("status_created_idx".to_string())
                    .build(),
            )
            .build();
        self.mirror_jobs()
            .create_index(job_status_index, None)
            .await?;

        info!("Successfully created all MongoDB indexes");
        Ok(())
    }

    fn customers(&self) -> Collection<Customer> {
        self.db.collection("customers")
    }

    fn attendance(&self) -> Collection<AttendanceRecord> {
        self.db.collection("attendance")
    }

    fn bills(&self) -> Collection<Bill> {
        self.db.collection("bills")
    }

    fn accounts(&self) -> Collection<Account> {
        self.db.collection("accounts")
    }

    fn transactions(&self) -> Collection<BankTransaction> {
        self.db.collection("bank_transactions")
    }

    fn mirror_jobs(&self) -> Collection<LedgerMirrorJob> {
        self.db.collection("ledger_mirror_jobs")
    }

    async fn adjust_customer_balance(
        &self,
        session: &mut ClientSession,
        customer_id: &str,
        delta: Decimal,
    ) -> StoreResult<()> {
        let customer = self
            .customers()
            .find_one_with_session(doc! { "_id": customer_id }, None, session)
            .await?
            .ok_or_else(|| StoreError::not_found("customer", customer_id))?;

        let balance_due = customer.balance_due + delta;
        self.customers()
            .update_one_with_session(
                doc! { "_id": customer_id },
                doc! { "$set": { "balance_due": money(balance_due), "updated_at": now_bson()? } },
                None,
                session,
            )
            .await?;
        Ok(())
    }

    async fn save_bill_in_session(
        &self,
        session: &mut ClientSession,
        mut bill: Bill,
        expected_version: Option<i64>,
        balance_delta: Decimal,
    ) -> StoreResult<Bill> {
        match expected_version {
            None => {
                bill.version = 1;
                if let Err(e) = self
                    .bills()
                    .insert_one_with_session(&bill, None, session)
                    .await
                {
                    if is_duplicate_key(&e) {
                        return Err(StoreError::Duplicate {
                            entity: "bill",
                            key: format!("{}/{}", bill.customer_id, bill.billing_period),
                        });
                    }
                    return Err(e.into());
                }
            }
            Some(expected) => {
                bill.version = expected + 1;
                let result = self
                    .bills()
                    .replace_one_with_session(
                        doc! { "_id": &bill.id, "version": expected },
                        &bill,
                        None,
                        session,
                    )
                    .await?;
                if result.matched_count == 0 {
                    return Err(StoreError::VersionConflict {
                        entity: "bill",
                        id: bill.id.clone(),
                    });
                }
            }
        }

        if !balance_delta.is_zero() {
            self.adjust_customer_balance(session, &bill.customer_id, balance_delta)
                .await?;
        }
        Ok(bill)
    }

    async fn remove_bill_in_session(
        &self,
        session: &mut ClientSession,
        bill_id: &str,
        expected_version: i64,
        balance_delta: Decimal,
    ) -> StoreResult<()> {
        let bill = self
            .bills()
            .find_one_with_session(doc! { "_id": bill_id }, None, session)
            .await?
            .ok_or_else(|| StoreError::not_found("bill", bill_id))?;

        let result = self
            .bills()
            .delete_one_with_session(
                doc! { "_id": bill_id, "version": expected_version },
                None,
                session,
            )
            .await?;
        if result.deleted_count == 0 {
            return Err(StoreError::VersionConflict {
                entity: "bill",
                id: bill_id.to_string(),
            });
        }

        if !balance_delta.is_zero() {
            self.adjust_customer_balance(session, &bill.customer_id, balance_delta)
                .await?;
        }
        Ok(())
    }

    async fn apply_delta_in_session(
        &self,
        session: &mut ClientSession,
        account_id: &str,
        delta: Decimal,
        mut transaction: BankTransaction,
        settles_job: Option<&str>,
    ) -> StoreResult<(Account, BankTransaction)> {
        // Claim the job first; a second retry pass matches nothing and the
        // whole transaction aborts before the balance moves.
        if let Some(job_id) = settles_job {
            let claimed = self
                .mirror_jobs()
                .update_one_with_session(
                    doc! { "_id": job_id, "status": to_bson(&MirrorJobStatus::Pending)? },
                    doc! {
                        "$set": { "status": to_bson(&MirrorJobStatus::Applied)?, "updated_at": now_bson()? },
                        "$unset": { "last_error": "" },
                    },
                    None,
                    session,
                )
                .await?;
            if claimed.matched_count == 0 {
                return Err(StoreError::AlreadySettled {
                    id: job_id.to_string(),
                });
            }
        }

        let mut account = self
            .accounts()
            .find_one_with_session(doc! { "_id": account_id }, None, session)
            .await?
            .ok_or_else(|| StoreError::not_found("account", account_id))?;

        account.current_balance += delta;
        account.updated_at = Utc::now();
        self.accounts()
            .update_one_with_session(
                doc! { "_id": account_id },
                doc! { "$set": {
                    "current_balance": money(account.current_balance),
                    "updated_at": to_bson(&account.updated_at)?,
                } },
                None,
                session,
            )
            .await?;

        transaction.balance_after = account.current_balance;
        self.transactions()
            .insert_one_with_session(&transaction, None, session)
            .await?;

        Ok((account, transaction))
    }
}

#[async_trait]
impl BillingStore for MongoBillingStore {
    async fn health_check(&self) -> StoreResult<()> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["health_check"])
            .start_timer();
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                StoreError::Database(e)
            })?;
        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, customer), fields(customer_id = %customer.id))]
    async fn insert_customer(&self, customer: &Customer) -> StoreResult<()> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["insert_customer"])
            .start_timer();
        self.customers()
            .insert_one(customer, None)
            .await
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    StoreError::Duplicate {
                        entity: "customer",
                        key: customer.id.clone(),
                    }
                } else {
                    e.into()
                }
            })?;
        timer.observe_duration();
        Ok(())
    }

    async fn get_customer(&self, customer_id: &str) -> StoreResult<Option<Customer>> {
        Ok(self
            .customers()
            .find_one(doc! { "_id": customer_id }, None)
            .await?)
    }

    async fn list_customers(&self) -> StoreResult<Vec<Customer>> {
        let options = FindOptions::builder().sort(doc! { "name": 1 }).build();
        let cursor = self.customers().find(None, options).await?;
        Ok(cursor.try_collect().await?)
    }

    #[instrument(skip(self, customer), fields(customer_id = %customer.id))]
    async fn update_customer(&self, customer: &Customer) -> StoreResult<Customer> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["update_customer"])
            .start_timer();
        let result = self
            .customers()
            .update_one(
                doc! { "_id": &customer.id },
                doc! { "$set": {
                    "name": &customer.name,
                    "phone": to_bson(&customer.phone)?,
                    "customer_type": to_bson(&customer.customer_type)?,
                    "billing_type": to_bson(&customer.billing_type)?,
                    "subscription_amount": customer.subscription_amount.map(money),
                    "price_per_liter": customer.price_per_liter.map(money),
                    "is_active": customer.is_active,
                    "updated_at": now_bson()?,
                } },
                None,
            )
            .await?;
        if result.matched_count == 0 {
            return Err(StoreError::not_found("customer", &customer.id));
        }
        timer.observe_duration();

        self.get_customer(&customer.id)
            .await?
            .ok_or_else(|| StoreError::not_found("customer", &customer.id))
    }

    async fn find_billable_customers(
        &self,
        customer_ids: &[String],
    ) -> StoreResult<Vec<Customer>> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["find_billable_customers"])
            .start_timer();
        let filter = doc! {
            "_id": { "$in": customer_ids },
            "is_active": true,
            "customer_type": to_bson(&CustomerType::DailyMilk)?,
        };
        let cursor = self.customers().find(filter, None).await?;
        let customers: Vec<Customer> = cursor.try_collect().await?;
        timer.observe_duration();
        Ok(customers)
    }

    async fn upsert_attendance(&self, record: &AttendanceRecord) -> StoreResult<AttendanceRecord> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["upsert_attendance"])
            .start_timer();
        let options = mongodb::options::ReplaceOptions::builder()
            .upsert(true)
            .build();
        self.attendance()
            .replace_one(doc! { "_id": &record.id }, record, options)
            .await?;
        timer.observe_duration();
        Ok(record.clone())
    }

    async fn attendance_customer_ids(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<String>> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["attendance_customer_ids"])
            .start_timer();
        let filter = doc! { "date": { "$gte": start.to_string(), "$lte": end.to_string() } };
        let values = self
            .attendance()
            .distinct("customer_id", filter, None)
            .await?;
        timer.observe_duration();
        Ok(values
            .into_iter()
            .filter_map(|v| match v {
                Bson::String(s) => Some(s),
                _ => None,
            })
            .collect())
    }

    async fn attendance_for_customer(
        &self,
        customer_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<AttendanceRecord>> {
        let filter = doc! {
            "customer_id": customer_id,
            "date": { "$gte": start.to_string(), "$lte": end.to_string() },
        };
        let options = FindOptions::builder().sort(doc! { "date": 1 }).build();
        let cursor = self.attendance().find(filter, options).await?;
        Ok(cursor.try_collect().await?)
    }

    #[instrument(skip(self, bill), fields(customer_id = %bill.customer_id, billing_period = %bill.billing_period))]
    async fn insert_bill(&self, bill: &Bill) -> StoreResult<()> {
        self.bills().insert_one(bill, None).await.map_err(|e| {
            if is_duplicate_key(&e) {
                StoreError::Duplicate {
                    entity: "bill",
                    key: format!("{}/{}", bill.customer_id, bill.billing_period),
                }
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn get_bill(&self, bill_id: &str) -> StoreResult<Option<Bill>> {
        Ok(self.bills().find_one(doc! { "_id": bill_id }, None).await?)
    }

    async fn find_bill_for_period(
        &self,
        customer_id: &str,
        billing_period: &str,
    ) -> StoreResult<Option<Bill>> {
        Ok(self
            .bills()
            .find_one(
                doc! { "customer_id": customer_id, "billing_period": billing_period },
                None,
            )
            .await?)
    }

    async fn list_bills(&self, filter: &BillFilter) -> StoreResult<Vec<Bill>> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["list_bills"])
            .start_timer();
        let mut query = Document::new();
        if let Some(customer_id) = &filter.customer_id {
            query.insert("customer_id", customer_id);
        }
        if let Some(period) = &filter.billing_period {
            query.insert("billing_period", period);
        }
        if let Some(status) = filter.status {
            query.insert("status", status.as_str());
        }
        let options = FindOptions::builder()
            .sort(doc! { "billing_period": -1, "customer_name": 1 })
            .build();
        let cursor = self.bills().find(query, options).await?;
        let bills: Vec<Bill> = cursor.try_collect().await?;
        timer.observe_duration();
        Ok(bills)
    }

    #[instrument(skip(self, bill), fields(bill_id = %bill.id, customer_id = %bill.customer_id, delta = %balance_delta))]
    async fn save_bill_with_balance(
        &self,
        bill: Bill,
        expected_version: Option<i64>,
        balance_delta: Decimal,
    ) -> StoreResult<Bill> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["save_bill_with_balance"])
            .start_timer();
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        let result = self
            .save_bill_in_session(&mut session, bill, expected_version, balance_delta)
            .await;
        let saved = finish_transaction(&mut session, result).await?;
        timer.observe_duration();
        Ok(saved)
    }

    #[instrument(skip(self), fields(delta = %balance_delta))]
    async fn remove_bill_with_balance(
        &self,
        bill_id: &str,
        expected_version: i64,
        balance_delta: Decimal,
    ) -> StoreResult<()> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["remove_bill_with_balance"])
            .start_timer();
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        let result = self
            .remove_bill_in_session(&mut session, bill_id, expected_version, balance_delta)
            .await;
        finish_transaction(&mut session, result).await?;
        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_overdue(&self, as_of: NaiveDate) -> StoreResult<u64> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["mark_overdue"])
            .start_timer();
        let result = self
            .bills()
            .update_many(
                doc! {
                    "status": BillStatus::Unpaid.as_str(),
                    "due_date": { "$lt": as_of.to_string() },
                },
                doc! {
                    "$set": { "status": BillStatus::Overdue.as_str(), "updated_at": now_bson()? },
                    "$inc": { "version": 1_i64 },
                },
                None,
            )
            .await?;
        timer.observe_duration();
        Ok(result.modified_count)
    }

    #[instrument(skip(self, account), fields(name = %account.name))]
    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        self.accounts()
            .insert_one(account, None)
            .await
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    StoreError::Duplicate {
                        entity: "account",
                        key: format!("{} ({})", account.name, account.account_type),
                    }
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    async fn get_account(&self, account_id: &str) -> StoreResult<Option<Account>> {
        Ok(self
            .accounts()
            .find_one(doc! { "_id": account_id }, None)
            .await?)
    }

    async fn find_account_by_name(
        &self,
        name: &str,
        account_type: AccountType,
    ) -> StoreResult<Option<Account>> {
        Ok(self
            .accounts()
            .find_one(
                doc! { "name": name, "account_type": account_type.as_str() },
                None,
            )
            .await?)
    }

    #[instrument(skip(self, transaction), fields(delta = %delta))]
    async fn apply_account_delta(
        &self,
        account_id: &str,
        delta: Decimal,
        transaction: BankTransaction,
        settles_job: Option<&str>,
    ) -> StoreResult<(Account, BankTransaction)> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["apply_account_delta"])
            .start_timer();
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        let result = self
            .apply_delta_in_session(&mut session, account_id, delta, transaction, settles_job)
            .await;
        let applied = finish_transaction(&mut session, result).await?;
        timer.observe_duration();
        Ok(applied)
    }

    async fn list_account_transactions(
        &self,
        account_id: &str,
    ) -> StoreResult<Vec<BankTransaction>> {
        let options = FindOptions::builder().sort(doc! { "created_at": 1 }).build();
        let cursor = self
            .transactions()
            .find(doc! { "account_id": account_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn enqueue_mirror_job(&self, job: &LedgerMirrorJob) -> StoreResult<()> {
        self.mirror_jobs().insert_one(job, None).await?;
        Ok(())
    }

    async fn pending_mirror_jobs(&self) -> StoreResult<Vec<LedgerMirrorJob>> {
        let options = FindOptions::builder().sort(doc! { "created_at": 1 }).build();
        let cursor = self
            .mirror_jobs()
            .find(
                doc! { "status": to_bson(&MirrorJobStatus::Pending)? },
                options,
            )
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn update_mirror_job(&self, job: &LedgerMirrorJob) -> StoreResult<()> {
        let pending = to_bson(&MirrorJobStatus::Pending)?;
        let result = self
            .mirror_jobs()
            .replace_one(doc! { "_id": &job.id, "status": pending }, job, None)
            .await?;
        if result.matched_count == 0 {
            let exists = self
                .mirror_jobs()
                .count_documents(doc! { "_id": &job.id }, None)
                .await?;
            if exists > 0 {
                return Err(StoreError::AlreadySettled { id: job.id.clone() });
            }
            return Err(StoreError::not_found("ledger mirror job", &job.id));
        }
        Ok(())
    }
}
