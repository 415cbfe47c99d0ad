//! Monthly bill generation and bill maintenance.

use crate::models::{
    AttendanceRecord, Bill, BillFilter, BillStatus, BillingPeriod, BillingType, Customer,
    LedgerAdjustment, RelatedEntityType,
};
use crate::services::ledger_mirror::{LedgerMirror, MirrorOutcome};
use crate::services::locks::{bill_lock_key, KeyedLocks};
use crate::services::metrics::record_bill_generated;
use crate::services::store::{BillingStore, StoreError};
use chrono::{NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Round a money amount to cents, halves away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComputeError {
    #[error("customer {0} is on a subscription but has no subscription_amount")]
    MissingSubscriptionAmount(String),
    #[error("customer {0} is billed per liter but has no price_per_liter")]
    MissingPricePerLiter(String),
    #[error("charges for customer {0} exceed the representable amount")]
    Overflow(String),
}

/// Amounts derived from one customer's attendance for one period.
#[derive(Debug, Clone, PartialEq)]
pub struct BillComputation {
    pub billing_type: BillingType,
    pub base_amount: Decimal,
    pub additional_amount: Decimal,
    pub total_amount: Decimal,
    pub total_liters: Decimal,
    pub delivered_days: u32,
    pub total_days: u32,
    pub proration_factor: Option<Decimal>,
    pub subscription_amount: Option<Decimal>,
    pub price_per_liter: Option<Decimal>,
}

/// Compute a customer's charges for `period` from its attendance records.
///
/// Subscriptions are prorated by delivered days over days in the month.
/// Per-liter customers pay for the milk delivered on present days. Additional
/// products are charged on every record regardless of status.
pub fn compute_charges(
    customer: &Customer,
    records: &[AttendanceRecord],
    period: BillingPeriod,
) -> Result<BillComputation, ComputeError> {
    let records: Vec<&AttendanceRecord> =
        records.iter().filter(|r| period.contains(r.date)).collect();

    let total_days = period.days_in_month();
    let delivered_days = records.iter().filter(|r| r.is_present()).count() as u32;
    let overflow = || ComputeError::Overflow(customer.id.clone());
    let total_liters = records
        .iter()
        .filter(|r| r.is_present())
        .try_fold(Decimal::ZERO, |acc, r| acc.checked_add(r.milk_quantity))
        .ok_or_else(overflow)?;
    let additional_amount = round_money(
        records
            .iter()
            .try_fold(Decimal::ZERO, |acc, r| acc.checked_add(r.additional_total()?))
            .ok_or_else(overflow)?,
    );

    let (base_amount, proration_factor) = match customer.billing_type {
        BillingType::Subscription => {
            let subscription = customer
                .subscription_amount
                .ok_or_else(|| ComputeError::MissingSubscriptionAmount(customer.id.clone()))?;
            let delivered = Decimal::from(delivered_days);
            let days = Decimal::from(total_days);
            let factor = delivered / days;
            let base = subscription
                .checked_mul(delivered)
                .ok_or_else(overflow)?
                / days;
            (round_money(base), Some(factor.round_dp(4)))
        }
        BillingType::PerLiter => {
            let price = customer
                .price_per_liter
                .ok_or_else(|| ComputeError::MissingPricePerLiter(customer.id.clone()))?;
            let base = total_liters.checked_mul(price).ok_or_else(overflow)?;
            (round_money(base), None)
        }
    };
    let total_amount = base_amount
        .checked_add(additional_amount)
        .ok_or_else(overflow)?;

    Ok(BillComputation {
        billing_type: customer.billing_type,
        base_amount,
        additional_amount,
        total_amount,
        total_liters,
        delivered_days,
        total_days,
        proration_factor,
        subscription_amount: match customer.billing_type {
            BillingType::Subscription => customer.subscription_amount,
            BillingType::PerLiter => None,
        },
        price_per_liter: match customer.billing_type {
            BillingType::PerLiter => customer.price_per_liter,
            BillingType::Subscription => None,
        },
    })
}

/// `INV-{period}-{last 4 of customer id}-{last 4 digits of the clock in millis}`.
fn mint_invoice_number(period: BillingPeriod, customer_id: &str) -> String {
    let chars: Vec<char> = customer_id.chars().collect();
    let suffix: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    let millis = Utc::now().timestamp_millis().rem_euclid(10_000);
    format!("INV-{}-{}-{:04}", period, suffix, millis)
}

#[derive(Debug, Error)]
enum CustomerBillingFailure {
    #[error(transparent)]
    Compute(#[from] ComputeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-customer result of a generation run.
#[derive(Debug, Clone, Serialize)]
pub struct BillDetail {
    pub customer_id: String,
    pub customer_name: String,
    pub bill_id: String,
    pub invoice_number: String,
    /// `created` or `updated`
    pub action: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub previous_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance_delta: Decimal,
    pub ledger: MirrorOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerBillingError {
    pub customer_id: String,
    pub customer_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationSummary {
    pub billing_period: String,
    pub bills_generated: usize,
    pub details: Vec<BillDetail>,
    pub errors: Vec<CustomerBillingError>,
    pub ledger_warnings: Vec<String>,
}

/// Outcome of removing a bill.
#[derive(Debug, Clone, Serialize)]
pub struct BillRemoval {
    pub bill_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub reversed_amount: Decimal,
    pub ledger: MirrorOutcome,
}

/// Totals for one billing period.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub billing_period: String,
    pub bill_count: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub billed_total: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub collected_total: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub outstanding_total: Decimal,
    pub unpaid: usize,
    pub paid: usize,
    pub overdue: usize,
}

#[derive(Clone)]
pub struct BillingEngine {
    store: Arc<dyn BillingStore>,
    mirror: LedgerMirror,
    locks: KeyedLocks,
    due_day: u32,
}

impl BillingEngine {
    pub fn new(
        store: Arc<dyn BillingStore>,
        mirror: LedgerMirror,
        locks: KeyedLocks,
        due_day: u32,
    ) -> Self {
        Self {
            store,
            mirror,
            locks,
            due_day,
        }
    }

    /// Generate or refresh every billable customer's bill for `year`-`month`.
    ///
    /// Customers are processed independently; one customer's failure is
    /// reported in `errors` and the rest of the batch carries on.
    #[instrument(skip(self), fields(billing_period = tracing::field::Empty))]
    pub async fn generate_monthly_bills(
        &self,
        year: i32,
        month: u32,
        actor: &str,
    ) -> Result<GenerationSummary, AppError> {
        let period =
            BillingPeriod::new(year, month).map_err(|e| AppError::BadRequest(e.into()))?;
        let due_date = period
            .due_date(self.due_day)
            .map_err(|e| AppError::ConfigError(e.into()))?;
        tracing::Span::current().record("billing_period", period.to_string().as_str());

        let customer_ids = self
            .store
            .attendance_customer_ids(period.first_day(), period.last_day())
            .await?;
        let mut customers = self.store.find_billable_customers(&customer_ids).await?;
        customers.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        info!(
            candidates = customers.len(),
            "Starting monthly bill generation"
        );

        let mut summary = GenerationSummary {
            billing_period: period.to_string(),
            bills_generated: 0,
            details: Vec::new(),
            errors: Vec::new(),
            ledger_warnings: Vec::new(),
        };

        for customer in &customers {
            match self.bill_customer(customer, period, due_date, actor).await {
                Ok(detail) => {
                    record_bill_generated(detail.action);
                    if let Some(warning) = detail.ledger.warning(&detail.customer_name) {
                        summary.ledger_warnings.push(warning);
                    }
                    summary.details.push(detail);
                }
                Err(e) => {
                    warn!(customer_id = %customer.id, error = %e, "Failed to bill customer");
                    record_bill_generated("failed");
                    summary.errors.push(CustomerBillingError {
                        customer_id: customer.id.clone(),
                        customer_name: customer.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        summary.bills_generated = summary.details.len();

        info!(
            bills_generated = summary.bills_generated,
            errors = summary.errors.len(),
            "Monthly bill generation finished"
        );
        Ok(summary)
    }

    async fn bill_customer(
        &self,
        customer: &Customer,
        period: BillingPeriod,
        due_date: NaiveDate,
        actor: &str,
    ) -> Result<BillDetail, CustomerBillingFailure> {
        let billing_period = period.to_string();
        let _guard = self
            .locks
            .lock(&bill_lock_key(&customer.id, &billing_period))
            .await;

        let records = self
            .store
            .attendance_for_customer(&customer.id, period.first_day(), period.last_day())
            .await?;
        let computed = compute_charges(customer, &records, period)?;
        let existing = self
            .store
            .find_bill_for_period(&customer.id, &billing_period)
            .await?;

        let now = Utc::now();
        let (bill, expected_version, previous_amount) = match existing {
            Some(mut bill) => {
                let previous = bill.total_amount;
                let version = bill.version;
                apply_computation(&mut bill, &computed);
                bill.customer_name = customer.name.clone();
                bill.due_date = due_date;
                bill.generated_by = actor.to_string();
                bill.updated_at = now;
                (bill, Some(version), previous)
            }
            None => {
                let mut bill = Bill {
                    id: Uuid::new_v4().to_string(),
                    customer_id: customer.id.clone(),
                    customer_name: customer.name.clone(),
                    billing_period: billing_period.clone(),
                    billing_type: computed.billing_type,
                    total_amount: Decimal::ZERO,
                    base_amount: Decimal::ZERO,
                    additional_amount: Decimal::ZERO,
                    total_liters: Decimal::ZERO,
                    price_per_liter: None,
                    subscription_amount: None,
                    delivered_days: 0,
                    total_days: 0,
                    proration_factor: None,
                    status: BillStatus::Unpaid,
                    due_date,
                    invoice_number: mint_invoice_number(period, &customer.id),
                    payments: Vec::new(),
                    notes: None,
                    version: 0,
                    generated_by: actor.to_string(),
                    created_at: now,
                    updated_at: now,
                };
                apply_computation(&mut bill, &computed);
                (bill, None, Decimal::ZERO)
            }
        };

        let delta = bill.total_amount - previous_amount;
        let action = if expected_version.is_some() {
            "updated"
        } else {
            "created"
        };
        let saved = self
            .store
            .save_bill_with_balance(bill, expected_version, delta)
            .await?;

        let ledger = self
            .mirror
            .apply(LedgerAdjustment {
                customer_name: saved.customer_name.clone(),
                delta,
                description: format!(
                    "Monthly bill {} ({})",
                    saved.billing_period, saved.invoice_number
                ),
                related_entity_type: RelatedEntityType::Bill,
                related_entity_id: saved.id.clone(),
                requested_by: actor.to_string(),
            })
            .await;

        info!(
            customer_id = %saved.customer_id,
            bill_id = %saved.id,
            total_amount = %saved.total_amount,
            delta = %delta,
            action,
            "Bill written"
        );

        Ok(BillDetail {
            customer_id: saved.customer_id,
            customer_name: saved.customer_name,
            bill_id: saved.id,
            invoice_number: saved.invoice_number,
            action,
            total_amount: saved.total_amount,
            previous_amount,
            balance_delta: delta,
            ledger,
        })
    }

    /// Load a bill or fail with 404.
    pub async fn get_bill(&self, bill_id: &str) -> Result<Bill, AppError> {
        self.store
            .get_bill(bill_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Bill {} not found", bill_id)))
    }

    pub async fn list_bills(&self, filter: &BillFilter) -> Result<Vec<Bill>, AppError> {
        Ok(self.store.list_bills(filter).await?)
    }

    /// Manually override a bill's status. Balances are not touched.
    #[instrument(skip(self, notes))]
    pub async fn update_status(
        &self,
        bill_id: &str,
        status: BillStatus,
        notes: Option<String>,
    ) -> Result<Bill, AppError> {
        let bill = self.get_bill(bill_id).await?;
        let _guard = self
            .locks
            .lock(&bill_lock_key(&bill.customer_id, &bill.billing_period))
            .await;

        let mut bill = self.get_bill(bill_id).await?;
        let expected = bill.version;
        bill.status = status;
        if notes.is_some() {
            bill.notes = notes;
        }
        bill.updated_at = Utc::now();

        let saved = self
            .store
            .save_bill_with_balance(bill, Some(expected), Decimal::ZERO)
            .await?;
        info!(bill_id = %saved.id, status = saved.status.as_str(), "Bill status updated");
        Ok(saved)
    }

    /// Remove a bill and reverse its charge on the customer's balance.
    #[instrument(skip(self))]
    pub async fn delete_bill(&self, bill_id: &str, actor: &str) -> Result<BillRemoval, AppError> {
        let bill = self.get_bill(bill_id).await?;
        let _guard = self
            .locks
            .lock(&bill_lock_key(&bill.customer_id, &bill.billing_period))
            .await;

        let bill = self.get_bill(bill_id).await?;
        let reversal = -bill.total_amount;
        self.store
            .remove_bill_with_balance(&bill.id, bill.version, reversal)
            .await?;

        let ledger = self
            .mirror
            .apply(LedgerAdjustment {
                customer_name: bill.customer_name.clone(),
                delta: reversal,
                description: format!(
                    "Bill {} ({}) removed",
                    bill.billing_period, bill.invoice_number
                ),
                related_entity_type: RelatedEntityType::Bill,
                related_entity_id: bill.id.clone(),
                requested_by: actor.to_string(),
            })
            .await;

        info!(bill_id = %bill.id, reversed = %bill.total_amount, "Bill removed");
        Ok(BillRemoval {
            bill_id: bill.id,
            reversed_amount: bill.total_amount,
            ledger,
        })
    }

    /// Mark unpaid bills due before `as_of` as overdue.
    pub async fn mark_overdue(&self, as_of: NaiveDate) -> Result<u64, AppError> {
        let updated = self.store.mark_overdue(as_of).await?;
        info!(as_of = %as_of, updated, "Overdue sweep finished");
        Ok(updated)
    }

    pub async fn summarize(&self, period: BillingPeriod) -> Result<PeriodSummary, AppError> {
        let bills = self
            .store
            .list_bills(&BillFilter {
                billing_period: Some(period.to_string()),
                ..Default::default()
            })
            .await?;
        Ok(summarize_bills(&period.to_string(), &bills))
    }
}

fn apply_computation(bill: &mut Bill, computed: &BillComputation) {
    bill.billing_type = computed.billing_type;
    bill.total_amount = computed.total_amount;
    bill.base_amount = computed.base_amount;
    bill.additional_amount = computed.additional_amount;
    bill.total_liters = computed.total_liters;
    bill.price_per_liter = computed.price_per_liter;
    bill.subscription_amount = computed.subscription_amount;
    bill.delivered_days = computed.delivered_days;
    bill.total_days = computed.total_days;
    bill.proration_factor = computed.proration_factor;
}

fn summarize_bills(billing_period: &str, bills: &[Bill]) -> PeriodSummary {
    let mut summary = PeriodSummary {
        billing_period: billing_period.to_string(),
        bill_count: bills.len(),
        ..Default::default()
    };
    for bill in bills {
        summary.billed_total += bill.total_amount;
        summary.collected_total += bill.total_paid();
        summary.outstanding_total += bill.outstanding();
        match bill.status {
            BillStatus::Unpaid => summary.unpaid += 1,
            BillStatus::Paid => summary.paid += 1,
            BillStatus::Overdue => summary.overdue += 1,
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdditionalProduct, AttendanceStatus, CreateCustomer, CustomerType};

    fn customer(billing_type: BillingType, subscription: Option<i64>, price: Option<i64>) -> Customer {
        Customer::new(CreateCustomer {
            name: "Sita".to_string(),
            phone: None,
            customer_type: CustomerType::DailyMilk,
            billing_type,
            subscription_amount: subscription.map(Decimal::from),
            price_per_liter: price.map(Decimal::from),
            is_active: true,
        })
    }

    fn record(
        customer: &Customer,
        date: NaiveDate,
        status: AttendanceStatus,
        liters: Decimal,
        extra: Option<Decimal>,
    ) -> AttendanceRecord {
        AttendanceRecord {
            id: AttendanceRecord::record_id(&customer.id, date),
            customer_id: customer.id.clone(),
            date,
            status,
            milk_quantity: liters,
            additional_products: extra
                .map(|amount| {
                    vec![AdditionalProduct {
                        product_type: "curd".to_string(),
                        quantity: Decimal::ONE,
                        unit_price: amount,
                        total_amount: amount,
                    }]
                })
                .unwrap_or_default(),
            marked_by: None,
            updated_at: Utc::now(),
        }
    }

    fn day(year: i32, month: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, d).unwrap()
    }

    #[test]
    fn subscription_is_prorated_by_delivered_days() {
        let c = customer(BillingType::Subscription, Some(3000), None);
        let period = BillingPeriod::new(2024, 6).unwrap();
        let mut records: Vec<AttendanceRecord> = (1..=15)
            .map(|d| record(&c, day(2024, 6, d), AttendanceStatus::Present, Decimal::ONE, None))
            .collect();
        records.push(record(
            &c,
            day(2024, 6, 20),
            AttendanceStatus::Absent,
            Decimal::ZERO,
            Some(Decimal::new(120, 0)),
        ));

        let computed = compute_charges(&c, &records, period).unwrap();
        assert_eq!(computed.delivered_days, 15);
        assert_eq!(computed.total_days, 30);
        assert_eq!(computed.proration_factor, Some(Decimal::new(5, 1)));
        assert_eq!(computed.base_amount, Decimal::new(1500, 0));
        assert_eq!(computed.additional_amount, Decimal::new(120, 0));
        assert_eq!(computed.total_amount, Decimal::new(1620, 0));
    }

    #[test]
    fn per_liter_charges_present_days_only() {
        let c = customer(BillingType::PerLiter, None, Some(60));
        let period = BillingPeriod::new(2024, 5).unwrap();
        let mut records: Vec<AttendanceRecord> = (1..=20)
            .map(|d| {
                record(
                    &c,
                    day(2024, 5, d),
                    AttendanceStatus::Present,
                    Decimal::new(21, 1),
                    None,
                )
            })
            .collect();
        records.push(record(
            &c,
            day(2024, 5, 21),
            AttendanceStatus::Absent,
            Decimal::new(5, 0),
            Some(Decimal::new(80, 0)),
        ));

        let computed = compute_charges(&c, &records, period).unwrap();
        assert_eq!(computed.total_liters, Decimal::new(42, 0));
        assert_eq!(computed.base_amount, Decimal::new(2520, 0));
        assert_eq!(computed.total_amount, Decimal::new(2600, 0));
        assert_eq!(computed.proration_factor, None);
        assert_eq!(computed.price_per_liter, Some(Decimal::new(60, 0)));
    }

    #[test]
    fn no_deliveries_still_produces_a_bill_amount() {
        let c = customer(BillingType::Subscription, Some(3000), None);
        let period = BillingPeriod::new(2024, 4).unwrap();
        let records = vec![record(
            &c,
            day(2024, 4, 3),
            AttendanceStatus::Absent,
            Decimal::ZERO,
            None,
        )];

        let computed = compute_charges(&c, &records, period).unwrap();
        assert_eq!(computed.delivered_days, 0);
        assert_eq!(computed.total_amount, Decimal::ZERO);
    }

    #[test]
    fn proration_rounds_to_cents() {
        let c = customer(BillingType::Subscription, Some(1000), None);
        let period = BillingPeriod::new(2024, 1).unwrap();
        let records: Vec<AttendanceRecord> = (1..=10)
            .map(|d| record(&c, day(2024, 1, d), AttendanceStatus::Present, Decimal::ONE, None))
            .collect();

        let computed = compute_charges(&c, &records, period).unwrap();
        // 1000 * 10 / 31 = 322.580...
        assert_eq!(computed.base_amount, Decimal::new(32258, 2));
        assert_eq!(computed.proration_factor, Some(Decimal::new(3226, 4)));
    }

    #[test]
    fn missing_rate_is_an_error() {
        let c = customer(BillingType::PerLiter, None, None);
        let period = BillingPeriod::new(2024, 1).unwrap();
        assert_eq!(
            compute_charges(&c, &[], period),
            Err(ComputeError::MissingPricePerLiter(c.id.clone()))
        );
    }

    #[test]
    fn charges_too_large_for_decimal_are_an_error() {
        let mut c = customer(BillingType::PerLiter, None, Some(1));
        c.price_per_liter = Some(Decimal::MAX);
        let period = BillingPeriod::new(2024, 1).unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let records = vec![record(&c, day, AttendanceStatus::Present, Decimal::TWO, None)];
        assert_eq!(
            compute_charges(&c, &records, period),
            Err(ComputeError::Overflow(c.id.clone()))
        );

        let c = customer(BillingType::Subscription, Some(3000), None);
        let records = vec![
            record(&c, day, AttendanceStatus::Present, Decimal::ONE, Some(Decimal::MAX)),
            record(&c, day.succ_opt().unwrap(), AttendanceStatus::Present, Decimal::ONE, Some(Decimal::MAX)),
        ];
        assert_eq!(
            compute_charges(&c, &records, period),
            Err(ComputeError::Overflow(c.id.clone()))
        );
    }

    #[test]
    fn invoice_number_embeds_period_and_customer_suffix() {
        let period = BillingPeriod::new(2024, 3).unwrap();
        let invoice = mint_invoice_number(period, "customer-ab12");
        assert!(invoice.starts_with("INV-2024-03-ab12-"));
        assert_eq!(invoice.len(), "INV-2024-03-ab12-0000".len());

        let invoice = mint_invoice_number(period, "x9");
        assert!(invoice.starts_with("INV-2024-03-x9-"));
    }

    #[test]
    fn summary_totals_by_status() {
        let c = customer(BillingType::Subscription, Some(3000), None);
        let now = Utc::now();
        let make = |total: i64, status: BillStatus| Bill {
            id: Uuid::new_v4().to_string(),
            customer_id: c.id.clone(),
            customer_name: c.name.clone(),
            billing_period: "2024-05".to_string(),
            billing_type: BillingType::Subscription,
            total_amount: Decimal::from(total),
            base_amount: Decimal::from(total),
            additional_amount: Decimal::ZERO,
            total_liters: Decimal::ZERO,
            price_per_liter: None,
            subscription_amount: Some(Decimal::from(3000)),
            delivered_days: 0,
            total_days: 31,
            proration_factor: None,
            status,
            due_date: day(2024, 6, 10),
            invoice_number: "INV".to_string(),
            payments: Vec::new(),
            notes: None,
            version: 1,
            generated_by: "admin".to_string(),
            created_at: now,
            updated_at: now,
        };
        let bills = vec![make(1000, BillStatus::Unpaid), make(500, BillStatus::Overdue)];

        let summary = summarize_bills("2024-05", &bills);
        assert_eq!(summary.bill_count, 2);
        assert_eq!(summary.billed_total, Decimal::from(1500));
        assert_eq!(summary.outstanding_total, Decimal::from(1500));
        assert_eq!(summary.unpaid, 1);
        assert_eq!(summary.overdue, 1);
    }
}
