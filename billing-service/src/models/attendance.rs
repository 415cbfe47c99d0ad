//! Daily delivery attendance model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Whether milk was delivered on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

/// Extra product sold alongside the milk delivery (ghee, curd, paneer...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdditionalProduct {
    pub product_type: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
}

/// One customer's delivery record for one calendar day.
///
/// The id is derived from `(customer_id, date)`, so a second mark for the same
/// day replaces the first instead of adding a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub customer_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    /// Liters delivered; only meaningful when present.
    #[serde(default, with = "rust_decimal::serde::float")]
    pub milk_quantity: Decimal,
    #[serde(default)]
    pub additional_products: Vec<AdditionalProduct>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marked_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AttendanceRecord {
    pub fn record_id(customer_id: &str, date: NaiveDate) -> String {
        format!("{}:{}", customer_id, date.format("%Y-%m-%d"))
    }

    pub fn is_present(&self) -> bool {
        self.status == AttendanceStatus::Present
    }

    /// Sum of the day's additional product totals.
    /// Sum of product totals, `None` if it does not fit in a `Decimal`.
    pub fn additional_total(&self) -> Option<Decimal> {
        self.additional_products
            .iter()
            .try_fold(Decimal::ZERO, |acc, p| acc.checked_add(p.total_amount))
    }
}
