//! Store-level guarantees exercised directly against the in-memory store.

use billing_service::models::{
    Bill, BillStatus, BillingType, CreateCustomer, Customer, CustomerType,
};
use billing_service::services::{BillingStore, InMemoryBillingStore, StoreError};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

fn customer() -> Customer {
    Customer::new(CreateCustomer {
        name: "Asha Patil".to_string(),
        phone: None,
        customer_type: CustomerType::DailyMilk,
        billing_type: BillingType::Subscription,
        subscription_amount: Some(Decimal::new(3000, 0)),
        price_per_liter: None,
        is_active: true,
    })
}

fn bill(id: &str, customer_id: &str, period: &str) -> Bill {
    let now = Utc::now();
    Bill {
        id: id.to_string(),
        customer_id: customer_id.to_string(),
        customer_name: "Asha Patil".to_string(),
        billing_period: period.to_string(),
        billing_type: BillingType::Subscription,
        total_amount: Decimal::new(3000, 0),
        base_amount: Decimal::new(3000, 0),
        additional_amount: Decimal::ZERO,
        total_liters: Decimal::new(30, 0),
        price_per_liter: None,
        subscription_amount: Some(Decimal::new(3000, 0)),
        delivered_days: 30,
        total_days: 30,
        proration_factor: Some(Decimal::ONE),
        status: BillStatus::Unpaid,
        due_date: NaiveDate::from_ymd_opt(2024, 7, 10).unwrap(),
        invoice_number: format!("INV-{}-TEST-{}", period, id),
        payments: Vec::new(),
        notes: None,
        version: 1,
        generated_by: "operator-1".to_string(),
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn second_bill_for_same_customer_and_period_is_rejected() {
    let store = InMemoryBillingStore::new();
    let customer = customer();
    store.insert_customer(&customer).await.unwrap();

    store
        .insert_bill(&bill("b1", &customer.id, "2024-06"))
        .await
        .unwrap();
    let err = store
        .insert_bill(&bill("b2", &customer.id, "2024-06"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate { entity: "bill", .. }));

    // A different period is fine.
    store
        .insert_bill(&bill("b3", &customer.id, "2024-07"))
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_writers_cannot_both_win() {
    let store = InMemoryBillingStore::new();
    let customer = customer();
    store.insert_customer(&customer).await.unwrap();

    let created = store
        .save_bill_with_balance(
            bill("b1", &customer.id, "2024-06"),
            None,
            Decimal::new(3000, 0),
        )
        .await
        .unwrap();

    let mut first = created.clone();
    first.total_amount = Decimal::new(3500, 0);
    store
        .save_bill_with_balance(first, Some(created.version), Decimal::new(500, 0))
        .await
        .unwrap();

    let mut second = created.clone();
    second.total_amount = Decimal::new(4000, 0);
    let err = store
        .save_bill_with_balance(second, Some(created.version), Decimal::new(1000, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict { .. }));

    let stored = store.get_customer(&customer.id).await.unwrap().unwrap();
    assert_eq!(stored.balance_due, Decimal::new(3500, 0));
}
