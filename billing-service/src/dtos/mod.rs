//! Request and response bodies for the HTTP API.

use crate::models::{
    AccountType, AdditionalProduct, AttendanceStatus, Bill, BillingType, Customer, CustomerType,
    PaymentMethod,
};
use crate::services::{GenerationSummary, MirrorOutcome};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::Validate;

/// Reject negative money or quantity fields with a 400.
pub fn ensure_non_negative(field: &str, value: Option<Decimal>) -> Result<(), AppError> {
    match value {
        Some(v) if v < Decimal::ZERO => Err(AppError::BadRequest(anyhow::anyhow!(
            "{} must not be negative",
            field
        ))),
        _ => Ok(()),
    }
}

// Billing

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateMonthlyBillsRequest {
    #[validate(
        required(message = "year is required"),
        range(min = 1, max = 9999, message = "year must be between 1 and 9999")
    )]
    pub year: Option<i32>,
    #[validate(
        required(message = "month is required"),
        range(min = 1, max = 12, message = "month must be between 1 and 12")
    )]
    pub month: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct GenerateMonthlyBillsResponse {
    pub message: String,
    #[serde(flatten)]
    pub summary: GenerationSummary,
}

#[derive(Debug, Deserialize)]
pub struct ListBillsQuery {
    pub status: Option<String>,
    pub period: Option<String>,
}

/// Bill with its customer record attached, when the customer still exists.
#[derive(Debug, Serialize)]
pub struct BillWithCustomer {
    #[serde(flatten)]
    pub bill: Bill,
    pub customer: Option<CustomerSummary>,
}

#[derive(Debug, Serialize)]
pub struct CustomerSummary {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub customer_type: CustomerType,
    pub billing_type: BillingType,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance_due: Decimal,
}

impl From<&Customer> for CustomerSummary {
    fn from(customer: &Customer) -> Self {
        Self {
            id: customer.id.clone(),
            name: customer.name.clone(),
            phone: customer.phone.clone(),
            customer_type: customer.customer_type,
            billing_type: customer.billing_type,
            balance_due: customer.balance_due,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordPaymentRequest {
    pub payment_date: Option<NaiveDate>,
    pub payment_method: Option<PaymentMethod>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub amount: Option<Decimal>,
    #[validate(length(max = 128))]
    pub transaction_id: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecordPaymentResponse {
    pub message: String,
    pub bill: Bill,
    pub ledger: MirrorOutcome,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateStatusRequest {
    pub status: String,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BillMessageResponse {
    pub message: String,
    pub bill: Bill,
}

#[derive(Debug, Serialize)]
pub struct DeleteBillResponse {
    pub message: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub reversed_amount: Decimal,
    pub ledger: MirrorOutcome,
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkOverdueRequest {
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct MarkOverdueResponse {
    pub message: String,
    pub updated: u64,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub period: Option<String>,
}

// Customers

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCustomerRequest {
    #[validate(length(min = 1, max = 200, message = "name is required"))]
    pub name: String,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    pub customer_type: CustomerType,
    pub billing_type: BillingType,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub subscription_amount: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub price_per_liter: Option<Decimal>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Also open the customer's receivable account.
    #[serde(default)]
    pub create_receivable_account: bool,
}

fn default_true() -> bool {
    true
}

/// Partial update of a customer's profile and billing terms.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCustomerRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    pub customer_type: Option<CustomerType>,
    pub billing_type: Option<BillingType>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub subscription_amount: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub price_per_liter: Option<Decimal>,
    pub is_active: Option<bool>,
}

// Attendance

#[derive(Debug, Deserialize, Validate)]
pub struct MarkAttendanceRequest {
    #[validate(length(min = 1, message = "customer_id is required"))]
    pub customer_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub milk_quantity: Option<Decimal>,
    #[serde(default)]
    pub additional_products: Vec<AdditionalProductRequest>,
}

#[derive(Debug, Deserialize)]
pub struct AdditionalProductRequest {
    pub product_type: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
}

impl TryFrom<AdditionalProductRequest> for AdditionalProduct {
    type Error = AppError;

    fn try_from(req: AdditionalProductRequest) -> Result<Self, Self::Error> {
        let total = req.quantity.checked_mul(req.unit_price).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "{} total is too large: {} x {}",
                req.product_type,
                req.quantity,
                req.unit_price
            ))
        })?;
        Ok(Self {
            product_type: req.product_type,
            quantity: req.quantity,
            unit_price: req.unit_price,
            total_amount: crate::services::billing::round_money(total),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AttendanceRangeQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

// Accounts

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAccountRequest {
    /// Required unless `customer_id` is given, in which case the receivable
    /// name is derived from the customer.
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub account_type: AccountType,
    pub customer_id: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub opening_balance: Option<Decimal>,
}

// Ledger retry

#[derive(Debug, Serialize)]
pub struct RetryLedgerResponse {
    pub message: String,
    #[serde(flatten)]
    pub report: crate::services::RetryReport,
}
