//! Payment recording against bills.

use crate::models::{
    Bill, BillStatus, LedgerAdjustment, Payment, PaymentMethod, RelatedEntityType,
};
use crate::services::ledger_mirror::{LedgerMirror, MirrorOutcome};
use crate::services::locks::{bill_lock_key, KeyedLocks};
use crate::services::metrics::record_payment;
use crate::services::store::BillingStore;
use chrono::{NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};

/// When a payment flips a bill to `paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaymentStatusPolicy {
    /// Paid when this one payment covers the bill total. Earlier partial
    /// payments are not added up.
    #[default]
    SinglePayment,
    /// Paid when all payments on the bill together cover the total.
    Cumulative,
}

impl FromStr for PaymentStatusPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" | "single_payment" => Ok(Self::SinglePayment),
            "cumulative" => Ok(Self::Cumulative),
            other => Err(format!("unknown payment status policy '{}'", other)),
        }
    }
}

impl PaymentStatusPolicy {
    fn settles(&self, bill: &Bill, payment_amount: Decimal) -> bool {
        match self {
            Self::SinglePayment => payment_amount >= bill.total_amount,
            Self::Cumulative => bill.total_paid() >= bill.total_amount,
        }
    }
}

/// Payment details supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct PaymentInput {
    /// Defaults to the bill total.
    pub amount: Option<Decimal>,
    /// Defaults to today.
    pub payment_date: Option<NaiveDate>,
    pub method: Option<PaymentMethod>,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    pub bill: Bill,
    pub ledger: MirrorOutcome,
}

#[derive(Clone)]
pub struct PaymentRecorder {
    store: Arc<dyn BillingStore>,
    mirror: LedgerMirror,
    locks: KeyedLocks,
    policy: PaymentStatusPolicy,
}

impl PaymentRecorder {
    pub fn new(
        store: Arc<dyn BillingStore>,
        mirror: LedgerMirror,
        locks: KeyedLocks,
        policy: PaymentStatusPolicy,
    ) -> Self {
        Self {
            store,
            mirror,
            locks,
            policy,
        }
    }

    async fn load_bill(&self, bill_id: &str) -> Result<Bill, AppError> {
        self.store
            .get_bill(bill_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Bill {} not found", bill_id)))
    }

    /// Append a payment to the bill, reduce the customer's balance by the same
    /// amount, and mirror the reduction onto the receivable account.
    #[instrument(skip(self, input))]
    pub async fn record_payment(
        &self,
        bill_id: &str,
        input: PaymentInput,
        actor: &str,
    ) -> Result<PaymentReceipt, AppError> {
        let bill = self.load_bill(bill_id).await?;
        let _guard = self
            .locks
            .lock(&bill_lock_key(&bill.customer_id, &bill.billing_period))
            .await;
        let mut bill = self.load_bill(bill_id).await?;

        let amount = input.amount.unwrap_or(bill.total_amount);
        if amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Payment amount must be greater than zero"
            )));
        }

        let method = input.method.unwrap_or_default();
        let now = Utc::now();
        bill.payments.push(Payment {
            amount,
            payment_date: input.payment_date.unwrap_or_else(|| now.date_naive()),
            method,
            transaction_id: input.transaction_id,
            notes: input.notes,
            recorded_by: actor.to_string(),
            recorded_at: now,
        });
        if self.policy.settles(&bill, amount) {
            bill.status = BillStatus::Paid;
        }
        bill.updated_at = now;

        let expected = bill.version;
        let saved = self
            .store
            .save_bill_with_balance(bill, Some(expected), -amount)
            .await?;
        record_payment(method.as_str(), amount.to_f64().unwrap_or_default());

        let ledger = self
            .mirror
            .apply(LedgerAdjustment {
                customer_name: saved.customer_name.clone(),
                delta: -amount,
                description: format!(
                    "Payment for bill {} ({})",
                    saved.billing_period, saved.invoice_number
                ),
                related_entity_type: RelatedEntityType::Bill,
                related_entity_id: saved.id.clone(),
                requested_by: actor.to_string(),
            })
            .await;

        info!(
            bill_id = %saved.id,
            amount = %amount,
            status = saved.status.as_str(),
            "Payment recorded"
        );
        Ok(PaymentReceipt {
            bill: saved,
            ledger,
        })
    }
}
