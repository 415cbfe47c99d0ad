//! Payment recording integration tests for billing-service.

mod common;

use common::{id_of, money, TestApp};
use serde_json::{json, Value};

/// A customer with one unpaid 1000.00 bill for June 2024. Returns (customer id, bill id).
async fn billed_customer(app: &TestApp, name: &str) -> (String, String) {
    let customer = app.create_subscription_customer(name, 1000.0).await;
    let customer_id = id_of(&customer);
    app.mark_present_days(&customer_id, "2024-06", 30, 1.0).await;
    app.generate(2024, 6).await;

    let bills = app.customer_bills(&customer_id).await;
    assert_eq!(money(&bills[0]["total_amount"]), 1000.0);
    (customer_id, id_of(&bills[0]))
}

async fn pay(app: &TestApp, bill_id: &str, body: Value) -> reqwest::Response {
    app.post(&format!("/billing/{}/payment", bill_id), &body).await
}

#[tokio::test]
async fn full_payment_settles_the_bill() {
    let app = TestApp::spawn().await;
    let (customer_id, bill_id) = billed_customer(&app, "Asha Patil").await;

    let response = pay(
        &app,
        &bill_id,
        json!({ "amount": 1000.0, "payment_method": "upi", "transaction_id": "UPI-123" }),
    )
    .await;
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["bill"]["status"], "paid");
    let payments = body["bill"]["payments"].as_array().unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0]["method"], "upi");
    assert_eq!(payments[0]["recorded_by"], common::OPERATOR_ID);
    assert_eq!(body["ledger"]["outcome"], "applied");
    assert_eq!(money(&body["ledger"]["balance_after"]), 0.0);

    let customer = app.get_customer(&customer_id).await;
    assert_eq!(money(&customer["balance_due"]), 0.0);

    let account_id = app.receivable_account_id("Asha Patil").await;
    let transactions = app.account_transactions(&account_id).await;
    let last = transactions.last().unwrap();
    assert_eq!(last["type"], "deposit");
    assert_eq!(money(&last["amount"]), 1000.0);
}

#[tokio::test]
async fn omitted_amount_pays_the_bill_total() {
    let app = TestApp::spawn().await;
    let (customer_id, bill_id) = billed_customer(&app, "Ravi Kumar").await;

    let response = pay(&app, &bill_id, json!({})).await;
    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["bill"]["status"], "paid");
    assert_eq!(money(&body["bill"]["payments"][0]["amount"]), 1000.0);
    assert_eq!(body["bill"]["payments"][0]["method"], "cash");

    let customer = app.get_customer(&customer_id).await;
    assert_eq!(money(&customer["balance_due"]), 0.0);
}

#[tokio::test]
async fn partial_payments_do_not_aggregate_by_default() {
    let app = TestApp::spawn().await;
    let (customer_id, bill_id) = billed_customer(&app, "Meena Joshi").await;

    let response = pay(&app, &bill_id, json!({ "amount": 400.0 })).await;
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["bill"]["status"], "unpaid");

    let response = pay(&app, &bill_id, json!({ "amount": 600.0 })).await;
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["bill"]["status"], "unpaid");
    assert_eq!(body["bill"]["payments"].as_array().unwrap().len(), 2);

    // The balance still reflects every payment.
    let customer = app.get_customer(&customer_id).await;
    assert_eq!(money(&customer["balance_due"]), 0.0);
}

#[tokio::test]
async fn cumulative_policy_settles_on_running_total() {
    let app = TestApp::spawn_with_cumulative_payments().await;
    let (_, bill_id) = billed_customer(&app, "Kavya Rao").await;

    let response = pay(&app, &bill_id, json!({ "amount": 400.0 })).await;
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["bill"]["status"], "unpaid");

    let response = pay(&app, &bill_id, json!({ "amount": 600.0 })).await;
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["bill"]["status"], "paid");
}

#[tokio::test]
async fn overpayment_leaves_a_credit() {
    let app = TestApp::spawn().await;
    let (customer_id, bill_id) = billed_customer(&app, "Sunil Shah").await;

    let response = pay(&app, &bill_id, json!({ "amount": 1200.0 })).await;
    assert!(response.status().is_success());

    let customer = app.get_customer(&customer_id).await;
    assert_eq!(money(&customer["balance_due"]), -200.0);
}

#[tokio::test]
async fn non_positive_amount_is_rejected_without_changes() {
    let app = TestApp::spawn().await;
    let (customer_id, bill_id) = billed_customer(&app, "Nisha Rao").await;

    let response = pay(&app, &bill_id, json!({ "amount": 0.0 })).await;
    assert_eq!(response.status(), 400);
    let response = pay(&app, &bill_id, json!({ "amount": -50.0 })).await;
    assert_eq!(response.status(), 400);

    let customer = app.get_customer(&customer_id).await;
    assert_eq!(money(&customer["balance_due"]), 1000.0);
    let bill: Value = app
        .get(&format!("/billing/{}", bill_id))
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert!(bill["payments"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn payment_for_unknown_bill_returns_404() {
    let app = TestApp::spawn().await;

    let response = pay(&app, "no-such-bill", json!({ "amount": 100.0 })).await;
    assert_eq!(response.status(), 404);
}
