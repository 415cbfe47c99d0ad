//! Customer registration and lookup.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;

use crate::{
    dtos::{ensure_non_negative, CreateCustomerRequest, UpdateCustomerRequest},
    middleware::Actor,
    models::{receivable_account_name, Account, AccountType, CreateCustomer, Customer},
    utils::ValidatedJson,
    AppState,
};

pub async fn create_customer(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(req): ValidatedJson<CreateCustomerRequest>,
) -> Result<(StatusCode, Json<Customer>), AppError> {
    ensure_non_negative("subscription_amount", req.subscription_amount)?;
    ensure_non_negative("price_per_liter", req.price_per_liter)?;

    let customer = Customer::new(CreateCustomer {
        name: req.name.trim().to_string(),
        phone: req.phone,
        customer_type: req.customer_type,
        billing_type: req.billing_type,
        subscription_amount: req.subscription_amount,
        price_per_liter: req.price_per_liter,
        is_active: req.is_active,
    });
    state.store.insert_customer(&customer).await?;

    if req.create_receivable_account {
        let account = Account::new(
            receivable_account_name(&customer.name),
            AccountType::Receivable,
            Some(customer.id.clone()),
            Decimal::ZERO,
            &actor.user_id,
        );
        state.store.insert_account(&account).await?;
        tracing::info!(account_id = %account.id, "Receivable account opened");
    }

    tracing::info!(
        customer_id = %customer.id,
        user_id = %actor.user_id,
        "Customer created"
    );
    Ok((StatusCode::CREATED, Json(customer)))
}

pub async fn list_customers(
    State(state): State<AppState>,
    _actor: Actor,
) -> Result<Json<Vec<Customer>>, AppError> {
    Ok(Json(state.store.list_customers().await?))
}

pub async fn get_customer(
    State(state): State<AppState>,
    _actor: Actor,
    Path(customer_id): Path<String>,
) -> Result<Json<Customer>, AppError> {
    let customer = state
        .store
        .get_customer(&customer_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Customer {} not found", customer_id)))?;
    Ok(Json(customer))
}

/// Change a customer's profile or billing terms. The balance is not editable.
pub async fn update_customer(
    State(state): State<AppState>,
    actor: Actor,
    Path(customer_id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateCustomerRequest>,
) -> Result<Json<Customer>, AppError> {
    ensure_non_negative("subscription_amount", req.subscription_amount)?;
    ensure_non_negative("price_per_liter", req.price_per_liter)?;

    let mut customer = state
        .store
        .get_customer(&customer_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Customer {} not found", customer_id)))?;

    if let Some(name) = req.name {
        customer.name = name.trim().to_string();
    }
    if req.phone.is_some() {
        customer.phone = req.phone;
    }
    if let Some(customer_type) = req.customer_type {
        customer.customer_type = customer_type;
    }
    if let Some(billing_type) = req.billing_type {
        customer.billing_type = billing_type;
    }
    if req.subscription_amount.is_some() {
        customer.subscription_amount = req.subscription_amount;
    }
    if req.price_per_liter.is_some() {
        customer.price_per_liter = req.price_per_liter;
    }
    if let Some(is_active) = req.is_active {
        customer.is_active = is_active;
    }
    customer.updated_at = Utc::now();

    let updated = state.store.update_customer(&customer).await?;
    tracing::info!(
        customer_id = %updated.id,
        user_id = %actor.user_id,
        "Customer updated"
    );
    Ok(Json(updated))
}
