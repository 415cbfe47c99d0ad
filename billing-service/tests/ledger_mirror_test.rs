//! Receivable ledger reconciliation tests for billing-service.

mod common;

use common::{id_of, money, TestApp};
use serde_json::{json, Value};

#[tokio::test]
async fn generation_mirrors_charges_onto_receivable_account() {
    let app = TestApp::spawn().await;
    let customer = app.create_subscription_customer("Asha Patil", 3000.0).await;
    let customer_id = id_of(&customer);
    app.mark_present_days(&customer_id, "2024-06", 30, 1.0).await;

    let summary = app.generate(2024, 6).await;
    let ledger = &summary["details"][0]["ledger"];
    assert_eq!(ledger["outcome"], "applied");
    assert_eq!(money(&ledger["balance_after"]), 3000.0);
    assert!(summary["ledger_warnings"].as_array().unwrap().is_empty());

    let account_id = app.receivable_account_id("Asha Patil").await;
    let transactions = app.account_transactions(&account_id).await;
    assert_eq!(transactions.len(), 1);
    let tx = &transactions[0];
    assert_eq!(tx["type"], "withdrawal");
    assert_eq!(money(&tx["amount"]), 3000.0);
    assert_eq!(tx["related_entity_type"], "bill");
    assert_eq!(tx["related_entity_id"], summary["details"][0]["bill_id"]);
    assert_eq!(tx["created_by"], common::OPERATOR_ID);
}

#[tokio::test]
async fn customer_without_receivable_account_is_still_billed() {
    let app = TestApp::spawn().await;
    let customer = app
        .create_customer(json!({
            "name": "No Ledger",
            "customer_type": "daily milk customer",
            "billing_type": "subscription",
            "subscription_amount": 3000.0
        }))
        .await;
    let customer_id = id_of(&customer);
    app.mark_present_days(&customer_id, "2024-06", 30, 1.0).await;

    let summary = app.generate(2024, 6).await;
    assert_eq!(summary["bills_generated"], 1);
    assert_eq!(summary["details"][0]["ledger"]["outcome"], "no_account");
    assert_eq!(
        summary["details"][0]["ledger"]["account_name"],
        "No Ledger - Receivable"
    );
    assert_eq!(
        money(&app.get_customer(&customer_id).await["balance_due"]),
        3000.0
    );
}

#[tokio::test]
async fn failed_ledger_write_is_queued_and_retried() {
    let app = TestApp::spawn().await;
    let customer = app.create_subscription_customer("Ravi Kumar", 3000.0).await;
    let customer_id = id_of(&customer);
    app.mark_present_days(&customer_id, "2024-06", 30, 1.0).await;

    app.store.set_fail_account_writes(true).await;
    let summary = app.generate(2024, 6).await;

    // The bill and the customer balance are committed regardless.
    assert_eq!(summary["bills_generated"], 1);
    assert_eq!(summary["details"][0]["ledger"]["outcome"], "queued");
    let warnings = summary["ledger_warnings"].as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].as_str().unwrap().contains("Ravi Kumar"));
    assert_eq!(
        money(&app.get_customer(&customer_id).await["balance_due"]),
        3000.0
    );

    let account_id = app.receivable_account_id("Ravi Kumar").await;
    assert!(app.account_transactions(&account_id).await.is_empty());

    // Still failing: the job stays pending.
    let response = app.post("/billing/ledger/retry", &json!({})).await;
    let report: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(report["attempted"], 1);
    assert_eq!(report["still_pending"], 1);

    app.store.set_fail_account_writes(false).await;
    let response = app.post("/billing/ledger/retry", &json!({})).await;
    assert!(response.status().is_success());
    let report: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(report["attempted"], 1);
    assert_eq!(report["applied"], 1);

    let transactions = app.account_transactions(&account_id).await;
    assert_eq!(transactions.len(), 1);
    assert_eq!(money(&transactions[0]["balance_after"]), 3000.0);

    // Nothing left to retry.
    let response = app.post("/billing/ledger/retry", &json!({})).await;
    let report: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(report["attempted"], 0);
}

#[tokio::test]
async fn payment_succeeds_when_ledger_is_down() {
    let app = TestApp::spawn().await;
    let customer = app.create_subscription_customer("Meena Joshi", 1000.0).await;
    let customer_id = id_of(&customer);
    app.mark_present_days(&customer_id, "2024-06", 30, 1.0).await;
    app.generate(2024, 6).await;
    let bill_id = id_of(&app.customer_bills(&customer_id).await[0]);

    app.store.set_fail_account_writes(true).await;
    let response = app
        .post(
            &format!("/billing/{}/payment", bill_id),
            &json!({ "amount": 1000.0 }),
        )
        .await;
    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["bill"]["status"], "paid");
    assert_eq!(body["ledger"]["outcome"], "queued");
    assert_eq!(
        money(&app.get_customer(&customer_id).await["balance_due"]),
        0.0
    );
}
