//! Test helper module for billing-service integration tests.
//!
//! Spawns the real HTTP server on a random port backed by the in-memory store.

#![allow(dead_code)]

use billing_service::config::BillingConfig;
use billing_service::services::{init_metrics, InMemoryBillingStore, PaymentStatusPolicy};
use billing_service::startup::Application;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use std::sync::Arc;

pub const OPERATOR_ID: &str = "operator-1";
pub const ADMIN_ID: &str = "admin-1";

/// Test application wrapper for integration tests.
pub struct TestApp {
    pub http_address: String,
    pub http_port: u16,
    pub store: Arc<InMemoryBillingStore>,
    pub client: Client,
}

impl TestApp {
    /// Spawn a new test application with default billing rules.
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn a new test application after adjusting its configuration.
    pub async fn spawn_with(configure: impl FnOnce(&mut BillingConfig)) -> Self {
        init_metrics();

        let mut config = BillingConfig::for_local(0);
        configure(&mut config);

        let store = Arc::new(InMemoryBillingStore::new());
        let app = Application::build_with_store(config, store.clone())
            .await
            .expect("Failed to build test application");

        let http_port = app.http_port();
        let http_address = format!("http://127.0.0.1:{}", http_port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = Client::new();
        let health_url = format!("{}/health", http_address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            http_address,
            http_port,
            store,
            client,
        }
    }

    pub async fn spawn_with_cumulative_payments() -> Self {
        Self::spawn_with(|config| {
            config.billing.payment_status_policy = PaymentStatusPolicy::Cumulative;
        })
        .await
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.http_address, path)
    }

    /// Request carrying the operator's identity headers.
    pub fn as_operator(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("X-User-ID", OPERATOR_ID)
    }

    /// Request carrying an admin's identity headers.
    pub fn as_admin(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("X-User-ID", ADMIN_ID)
            .header("X-User-Role", "admin")
    }

    pub async fn get(&self, path: &str) -> Response {
        self.as_operator(self.client.get(self.url(path)))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post(&self, path: &str, body: &Value) -> Response {
        self.as_operator(self.client.post(self.url(path)).json(body))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn put(&self, path: &str, body: &Value) -> Response {
        self.as_operator(self.client.put(self.url(path)).json(body))
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Register a daily milk customer on a monthly subscription.
    pub async fn create_subscription_customer(&self, name: &str, amount: f64) -> Value {
        self.create_customer(json!({
            "name": name,
            "customer_type": "daily milk customer",
            "billing_type": "subscription",
            "subscription_amount": amount,
            "create_receivable_account": true
        }))
        .await
    }

    /// Register a daily milk customer billed per liter.
    pub async fn create_per_liter_customer(&self, name: &str, price: f64) -> Value {
        self.create_customer(json!({
            "name": name,
            "customer_type": "daily milk customer",
            "billing_type": "per_liter",
            "price_per_liter": price,
            "create_receivable_account": true
        }))
        .await
    }

    pub async fn create_customer(&self, body: Value) -> Value {
        let response = self.post("/customers", &body).await;
        assert_eq!(response.status(), 201, "customer creation failed");
        response.json().await.expect("Failed to parse JSON")
    }

    pub async fn get_customer(&self, customer_id: &str) -> Value {
        let response = self.get(&format!("/customers/{}", customer_id)).await;
        assert!(response.status().is_success());
        response.json().await.expect("Failed to parse JSON")
    }

    /// Mark one day of attendance.
    pub async fn mark(&self, customer_id: &str, date: &str, status: &str, liters: f64) {
        let response = self
            .put(
                "/attendance",
                &json!({
                    "customer_id": customer_id,
                    "date": date,
                    "status": status,
                    "milk_quantity": liters
                }),
            )
            .await;
        assert!(
            response.status().is_success(),
            "attendance failed: {}",
            response.status()
        );
    }

    /// Mark `days` consecutive present days starting on the 1st of `period`.
    pub async fn mark_present_days(&self, customer_id: &str, period: &str, days: u32, liters: f64) {
        for day in 1..=days {
            self.mark(customer_id, &format!("{}-{:02}", period, day), "present", liters)
                .await;
        }
    }

    pub async fn generate(&self, year: i32, month: u32) -> Value {
        let response = self
            .post(
                "/billing/generate-monthly",
                &json!({ "year": year, "month": month }),
            )
            .await;
        assert!(
            response.status().is_success(),
            "generation failed: {}",
            response.status()
        );
        response.json().await.expect("Failed to parse JSON")
    }

    /// All bills for one customer.
    pub async fn customer_bills(&self, customer_id: &str) -> Vec<Value> {
        let response = self
            .get(&format!("/billing/customer/{}", customer_id))
            .await;
        assert!(response.status().is_success());
        response.json().await.expect("Failed to parse JSON")
    }

    /// The id of a customer's receivable account.
    pub async fn receivable_account_id(&self, customer_name: &str) -> String {
        use billing_service::models::{receivable_account_name, AccountType};
        use billing_service::services::BillingStore;

        self.store
            .find_account_by_name(&receivable_account_name(customer_name), AccountType::Receivable)
            .await
            .expect("store lookup failed")
            .expect("receivable account missing")
            .id
    }

    pub async fn account_transactions(&self, account_id: &str) -> Vec<Value> {
        let response = self
            .get(&format!("/accounts/{}/transactions", account_id))
            .await;
        assert!(response.status().is_success());
        response.json().await.expect("Failed to parse JSON")
    }
}

pub fn id_of(value: &Value) -> String {
    value["_id"]
        .as_str()
        .or_else(|| value["id"].as_str())
        .expect("value has no id")
        .to_string()
}

pub fn money(value: &Value) -> f64 {
    value.as_f64().expect("not a number")
}
