//! Ledger accounts and their transaction history.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use service_core::error::AppError;

use crate::{
    dtos::CreateAccountRequest,
    middleware::Actor,
    models::{receivable_account_name, Account, AccountType, BankTransaction},
    utils::ValidatedJson,
    AppState,
};

/// Open an account. A receivable account for a customer takes its name from
/// the customer unless one is given.
pub async fn create_account(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(req): ValidatedJson<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    let customer = match &req.customer_id {
        Some(customer_id) => Some(state.store.get_customer(customer_id).await?.ok_or_else(
            || AppError::NotFound(anyhow::anyhow!("Customer {} not found", customer_id)),
        )?),
        None => None,
    };

    let name = match (req.name, &customer, req.account_type) {
        (Some(name), _, _) => name.trim().to_string(),
        (None, Some(customer), AccountType::Receivable) => receivable_account_name(&customer.name),
        _ => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "name is required unless a receivable account is opened for a customer"
            )))
        }
    };

    let account = Account::new(
        name,
        req.account_type,
        req.customer_id,
        req.opening_balance.unwrap_or(Decimal::ZERO),
        &actor.user_id,
    );
    state.store.insert_account(&account).await?;

    tracing::info!(
        account_id = %account.id,
        name = %account.name,
        account_type = account.account_type.as_str(),
        "Account created"
    );
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn list_account_transactions(
    State(state): State<AppState>,
    _actor: Actor,
    Path(account_id): Path<String>,
) -> Result<Json<Vec<BankTransaction>>, AppError> {
    state
        .store
        .get_account(&account_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Account {} not found", account_id)))?;

    Ok(Json(
        state.store.list_account_transactions(&account_id).await?,
    ))
}
