//! Bill generation, listing, payments and maintenance.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use std::collections::HashMap;

use crate::{
    dtos::{
        BillMessageResponse, BillWithCustomer, CustomerSummary, DeleteBillResponse,
        GenerateMonthlyBillsRequest, GenerateMonthlyBillsResponse, ListBillsQuery,
        MarkOverdueRequest, MarkOverdueResponse, RecordPaymentRequest, RecordPaymentResponse,
        RetryLedgerResponse, SummaryQuery, UpdateStatusRequest,
    },
    middleware::Actor,
    models::{Bill, BillFilter, BillStatus, BillingPeriod, Customer},
    services::{PaymentInput, PeriodSummary},
    utils::ValidatedJson,
    AppState,
};

fn parse_period(raw: &str) -> Result<BillingPeriod, AppError> {
    raw.parse::<BillingPeriod>()
        .map_err(|e| AppError::BadRequest(e.into()))
}

fn parse_status(raw: &str) -> Result<BillStatus, AppError> {
    raw.parse::<BillStatus>()
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))
}

/// Attach the current customer record to each bill.
async fn with_customers(
    state: &AppState,
    bills: Vec<Bill>,
) -> Result<Vec<BillWithCustomer>, AppError> {
    let mut customers: HashMap<String, Option<Customer>> = HashMap::new();
    for bill in &bills {
        if !customers.contains_key(&bill.customer_id) {
            let customer = state.store.get_customer(&bill.customer_id).await?;
            customers.insert(bill.customer_id.clone(), customer);
        }
    }

    Ok(bills
        .into_iter()
        .map(|bill| {
            let customer = customers
                .get(&bill.customer_id)
                .and_then(|c| c.as_ref())
                .map(CustomerSummary::from);
            BillWithCustomer { bill, customer }
        })
        .collect())
}

/// Generate (or refresh) every billable customer's bill for a month.
pub async fn generate_monthly_bills(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(req): ValidatedJson<GenerateMonthlyBillsRequest>,
) -> Result<Json<GenerateMonthlyBillsResponse>, AppError> {
    if state.config.billing.generation_admin_only {
        actor.require_admin()?;
    }
    let (Some(year), Some(month)) = (req.year, req.month) else {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "year and month are required"
        )));
    };

    tracing::info!(
        year,
        month,
        user_id = %actor.user_id,
        "Generating monthly bills"
    );

    let summary = state
        .engine
        .generate_monthly_bills(year, month, &actor.user_id)
        .await?;

    Ok(Json(GenerateMonthlyBillsResponse {
        message: format!(
            "Generated {} bills for {}",
            summary.bills_generated, summary.billing_period
        ),
        summary,
    }))
}

/// List bills, optionally filtered by status and period.
pub async fn list_bills(
    State(state): State<AppState>,
    _actor: Actor,
    Query(query): Query<ListBillsQuery>,
) -> Result<Json<Vec<BillWithCustomer>>, AppError> {
    let filter = BillFilter {
        customer_id: None,
        billing_period: query
            .period
            .as_deref()
            .map(parse_period)
            .transpose()?
            .map(|p| p.to_string()),
        status: query.status.as_deref().map(parse_status).transpose()?,
    };

    let bills = state.engine.list_bills(&filter).await?;
    Ok(Json(with_customers(&state, bills).await?))
}

/// One customer's bills, newest period first.
pub async fn list_customer_bills(
    State(state): State<AppState>,
    _actor: Actor,
    Path(customer_id): Path<String>,
) -> Result<Json<Vec<Bill>>, AppError> {
    let filter = BillFilter {
        customer_id: Some(customer_id),
        ..Default::default()
    };
    Ok(Json(state.engine.list_bills(&filter).await?))
}

pub async fn get_bill(
    State(state): State<AppState>,
    _actor: Actor,
    Path(bill_id): Path<String>,
) -> Result<Json<BillWithCustomer>, AppError> {
    let bill = state.engine.get_bill(&bill_id).await?;
    let mut bills = with_customers(&state, vec![bill]).await?;
    bills
        .pop()
        .map(Json)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Bill {} not found", bill_id)))
}

/// Record a payment against a bill.
pub async fn record_payment(
    State(state): State<AppState>,
    actor: Actor,
    Path(bill_id): Path<String>,
    ValidatedJson(req): ValidatedJson<RecordPaymentRequest>,
) -> Result<Json<RecordPaymentResponse>, AppError> {
    tracing::info!(
        bill_id = %bill_id,
        user_id = %actor.user_id,
        amount = ?req.amount,
        "Recording payment"
    );

    let receipt = state
        .payments
        .record_payment(
            &bill_id,
            PaymentInput {
                amount: req.amount,
                payment_date: req.payment_date,
                method: req.payment_method,
                transaction_id: req.transaction_id,
                notes: req.notes,
            },
            &actor.user_id,
        )
        .await?;

    Ok(Json(RecordPaymentResponse {
        message: "Payment recorded successfully".to_string(),
        bill: receipt.bill,
        ledger: receipt.ledger,
    }))
}

/// Manually override a bill's status.
pub async fn update_bill_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(bill_id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateStatusRequest>,
) -> Result<Json<BillMessageResponse>, AppError> {
    let status = parse_status(&req.status)?;
    tracing::info!(
        bill_id = %bill_id,
        user_id = %actor.user_id,
        status = status.as_str(),
        "Updating bill status"
    );

    let bill = state
        .engine
        .update_status(&bill_id, status, req.notes)
        .await?;
    Ok(Json(BillMessageResponse {
        message: "Bill status updated".to_string(),
        bill,
    }))
}

/// Remove a bill and reverse its charge. Admins only.
pub async fn delete_bill(
    State(state): State<AppState>,
    actor: Actor,
    Path(bill_id): Path<String>,
) -> Result<Json<DeleteBillResponse>, AppError> {
    actor.require_admin()?;
    let removal = state.engine.delete_bill(&bill_id, &actor.user_id).await?;
    Ok(Json(DeleteBillResponse {
        message: "Bill deleted".to_string(),
        reversed_amount: removal.reversed_amount,
        ledger: removal.ledger,
    }))
}

/// Flip unpaid bills past their due date to overdue.
pub async fn mark_overdue(
    State(state): State<AppState>,
    actor: Actor,
    body: Option<Json<MarkOverdueRequest>>,
) -> Result<Json<MarkOverdueResponse>, AppError> {
    let as_of = body
        .and_then(|Json(req)| req.as_of)
        .unwrap_or_else(|| Utc::now().date_naive());
    tracing::info!(as_of = %as_of, user_id = %actor.user_id, "Running overdue sweep");

    let updated = state.engine.mark_overdue(as_of).await?;
    Ok(Json(MarkOverdueResponse {
        message: format!("{} bills marked overdue", updated),
        updated,
    }))
}

/// Totals for one billing period.
pub async fn period_summary(
    State(state): State<AppState>,
    _actor: Actor,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<PeriodSummary>, AppError> {
    let raw = query
        .period
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("period is required")))?;
    let period = parse_period(&raw)?;
    Ok(Json(state.engine.summarize(period).await?))
}

/// Re-apply ledger updates that previously failed.
pub async fn retry_ledger(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<RetryLedgerResponse>, AppError> {
    tracing::info!(user_id = %actor.user_id, "Retrying pending ledger updates");
    let report = state.mirror.retry_pending().await?;
    Ok(Json(RetryLedgerResponse {
        message: format!(
            "{} of {} pending ledger updates applied",
            report.applied, report.attempted
        ),
        report,
    }))
}
