//! Customer model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a customer's monthly milk charge is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingType {
    Subscription,
    PerLiter,
}

impl BillingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingType::Subscription => "subscription",
            BillingType::PerLiter => "per_liter",
        }
    }
}

/// Customer segment. Only daily milk customers take part in monthly billing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerType {
    #[serde(rename = "daily milk customer")]
    DailyMilk,
    #[serde(rename = "retail")]
    Retail,
}

impl CustomerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerType::DailyMilk => "daily milk customer",
            CustomerType::Retail => "retail",
        }
    }
}

/// Customer with its running receivable balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub customer_type: CustomerType,
    pub billing_type: BillingType,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub subscription_amount: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub price_per_liter: Option<Decimal>,
    /// Positive means the customer owes money.
    #[serde(with = "rust_decimal::serde::float")]
    pub balance_due: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(input: CreateCustomer) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            phone: input.phone,
            customer_type: input.customer_type,
            billing_type: input.billing_type,
            subscription_amount: input.subscription_amount,
            price_per_liter: input.price_per_liter,
            balance_due: Decimal::ZERO,
            is_active: input.is_active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the monthly billing run should consider this customer.
    pub fn is_billable(&self) -> bool {
        self.is_active && self.customer_type == CustomerType::DailyMilk
    }
}

/// Input for registering a customer.
#[derive(Debug, Clone)]
pub struct CreateCustomer {
    pub name: String,
    pub phone: Option<String>,
    pub customer_type: CustomerType,
    pub billing_type: BillingType,
    pub subscription_amount: Option<Decimal>,
    pub price_per_liter: Option<Decimal>,
    pub is_active: bool,
}
