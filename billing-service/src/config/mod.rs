//! Configuration module for billing-service.

use crate::services::PaymentStatusPolicy;
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub billing: BillingRules,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub uri: Secret<String>,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct BillingRules {
    /// Day of the following month a bill falls due (1-28).
    pub due_day: u32,
    pub payment_status_policy: PaymentStatusPolicy,
    /// Restrict monthly generation to actors with the `admin` role.
    pub generation_admin_only: bool,
}

impl Default for BillingRules {
    fn default() -> Self {
        Self {
            due_day: 10,
            payment_status_policy: PaymentStatusPolicy::default(),
            generation_admin_only: false,
        }
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let due_day = match env::var("BILLING_DUE_DAY") {
            Ok(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|d| (1..=28).contains(d))
                .ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "BILLING_DUE_DAY must be a day between 1 and 28, got '{}'",
                        raw
                    ))
                })?,
            Err(_) => 10,
        };

        let payment_status_policy = match env::var("BILLING_PAYMENT_STATUS_POLICY") {
            Ok(raw) => raw
                .parse::<PaymentStatusPolicy>()
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
            Err(_) => PaymentStatusPolicy::default(),
        };

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "billing-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                uri: Secret::new(env::var("MONGODB_URI").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("MONGODB_URI is required"))
                })?),
                name: env::var("MONGODB_DATABASE").unwrap_or_else(|_| "dairy".to_string()),
            },
            billing: BillingRules {
                due_day,
                payment_status_policy,
                generation_admin_only: env_flag("BILLING_GENERATION_ADMIN_ONLY"),
            },
        })
    }

    /// Configuration for tests and local runs that use the in-memory store.
    pub fn for_local(port: u16) -> Self {
        Self {
            common: core_config::Config {
                port,
                host: "127.0.0.1".to_string(),
            },
            service_name: "billing-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                uri: Secret::new(String::new()),
                name: "dairy".to_string(),
            },
            billing: BillingRules::default(),
        }
    }
}
