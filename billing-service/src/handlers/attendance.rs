//! Daily delivery attendance.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;

use crate::{
    dtos::{ensure_non_negative, AttendanceRangeQuery, MarkAttendanceRequest},
    middleware::Actor,
    models::{AdditionalProduct, AttendanceRecord},
    utils::ValidatedJson,
    AppState,
};

/// Record (or replace) a customer's attendance for one day.
pub async fn mark_attendance(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(req): ValidatedJson<MarkAttendanceRequest>,
) -> Result<Json<AttendanceRecord>, AppError> {
    ensure_non_negative("milk_quantity", req.milk_quantity)?;
    for product in &req.additional_products {
        if product.product_type.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "additional product type is required"
            )));
        }
        ensure_non_negative("quantity", Some(product.quantity))?;
        ensure_non_negative("unit_price", Some(product.unit_price))?;
    }

    state
        .store
        .get_customer(&req.customer_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Customer {} not found", req.customer_id))
        })?;

    let additional_products = req
        .additional_products
        .into_iter()
        .map(AdditionalProduct::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let record = AttendanceRecord {
        id: AttendanceRecord::record_id(&req.customer_id, req.date),
        customer_id: req.customer_id,
        date: req.date,
        status: req.status,
        milk_quantity: req.milk_quantity.unwrap_or(Decimal::ZERO),
        additional_products,
        marked_by: Some(actor.user_id),
        updated_at: Utc::now(),
    };

    Ok(Json(state.store.upsert_attendance(&record).await?))
}

/// A customer's attendance between `from` and `to` (inclusive).
pub async fn list_customer_attendance(
    State(state): State<AppState>,
    _actor: Actor,
    Path(customer_id): Path<String>,
    Query(query): Query<AttendanceRangeQuery>,
) -> Result<Json<Vec<AttendanceRecord>>, AppError> {
    let from = query.from.or(NaiveDate::from_ymd_opt(1, 1, 1)).unwrap_or_default();
    let to = query
        .to
        .or(NaiveDate::from_ymd_opt(9999, 12, 31))
        .unwrap_or_default();
    if from > to {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "'from' must not be after 'to'"
        )));
    }

    Ok(Json(
        state
            .store
            .attendance_for_customer(&customer_id, from, to)
            .await?,
    ))
}
