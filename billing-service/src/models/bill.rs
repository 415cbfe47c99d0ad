//! Monthly bill model.

use crate::models::BillingType;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Bill status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Unpaid,
    Paid,
    Overdue,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Unpaid => "unpaid",
            BillStatus::Paid => "paid",
            BillStatus::Overdue => "overdue",
        }
    }
}

impl FromStr for BillStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(BillStatus::Unpaid),
            "paid" => Ok(BillStatus::Paid),
            "overdue" => Ok(BillStatus::Overdue),
            other => Err(format!("unknown bill status '{}'", other)),
        }
    }
}

/// How a payment was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Cash,
    Upi,
    BankTransfer,
    Card,
    Cheque,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Upi => "upi",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Card => "card",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::Other => "other",
        }
    }
}

/// Payment embedded in a bill's sub-ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub method: PaymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub recorded_by: String,
    pub recorded_at: DateTime<Utc>,
}

/// One bill per `(customer_id, billing_period)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bill {
    #[serde(rename = "_id")]
    pub id: String,
    pub customer_id: String,
    /// Cached so the bill stays readable if the customer record goes away.
    pub customer_name: String,
    pub billing_period: String,
    pub billing_type: BillingType,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub base_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub additional_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_liters: Decimal,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub price_per_liter: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub subscription_amount: Option<Decimal>,
    pub delivered_days: u32,
    pub total_days: u32,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub proration_factor: Option<Decimal>,
    pub status: BillStatus,
    pub due_date: NaiveDate,
    pub invoice_number: String,
    #[serde(default)]
    pub payments: Vec<Payment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Bumped on every write; writers compare-and-swap on it.
    pub version: i64,
    pub generated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bill {
    pub fn total_paid(&self) -> Decimal {
        self.payments.iter().map(|p| p.amount).sum()
    }

    /// Amount still owed on this bill (never negative).
    pub fn outstanding(&self) -> Decimal {
        (self.total_amount - self.total_paid()).max(Decimal::ZERO)
    }
}

/// Filter parameters for listing bills.
#[derive(Debug, Clone, Default)]
pub struct BillFilter {
    pub customer_id: Option<String>,
    pub billing_period: Option<String>,
    pub status: Option<BillStatus>,
}

impl BillFilter {
    pub fn matches(&self, bill: &Bill) -> bool {
        self.customer_id
            .as_deref()
            .map_or(true, |id| bill.customer_id == id)
            && self
                .billing_period
                .as_deref()
                .map_or(true, |p| bill.billing_period == p)
            && self.status.map_or(true, |s| bill.status == s)
    }
}
