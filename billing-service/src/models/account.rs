//! Ledger accounts, their append-only bank transactions, and pending mirror jobs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account categories kept by the farm's books.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Receivable,
    Payable,
    Bank,
    Cash,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receivable => "receivable",
            Self::Payable => "payable",
            Self::Bank => "bank",
            Self::Cash => "cash",
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Name of the receivable account kept for a customer.
pub fn receivable_account_name(customer_name: &str) -> String {
    format!("{} - Receivable", customer_name.trim())
}

/// Ledger account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub account_type: AccountType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub current_balance: Decimal,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        name: String,
        account_type: AccountType,
        customer_id: Option<String>,
        opening_balance: Decimal,
        created_by: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            account_type,
            customer_id,
            current_balance: opening_balance,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Direction of a bank transaction; the amount itself is never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

impl TransactionType {
    /// Receivable convention: a charge (delta >= 0) is booked as a withdrawal,
    /// a reduction as a deposit.
    pub fn for_delta(delta: Decimal) -> Self {
        if delta >= Decimal::ZERO {
            TransactionType::Withdrawal
        } else {
            TransactionType::Deposit
        }
    }
}

/// What a bank transaction points back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelatedEntityType {
    Bill,
    Account,
}

/// Append-only audit record written with every account balance change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankTransaction {
    #[serde(rename = "_id")]
    pub id: String,
    pub account_id: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance_after: Decimal,
    pub description: String,
    pub related_entity_type: RelatedEntityType,
    pub related_entity_id: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// A balance change to mirror onto a customer's receivable account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerAdjustment {
    pub customer_name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub delta: Decimal,
    pub description: String,
    pub related_entity_type: RelatedEntityType,
    pub related_entity_id: String,
    pub requested_by: String,
}

impl LedgerAdjustment {
    /// Build the audit row for this adjustment against `account_id`.
    ///
    /// `balance_after` is filled in by the store once the new balance is known.
    pub fn to_transaction(&self, account_id: &str) -> BankTransaction {
        BankTransaction {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            transaction_type: TransactionType::for_delta(self.delta),
            amount: self.delta.abs(),
            balance_after: Decimal::ZERO,
            description: self.description.clone(),
            related_entity_type: self.related_entity_type,
            related_entity_id: self.related_entity_id.clone(),
            created_by: self.requested_by.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Retry state of a mirror job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorJobStatus {
    Pending,
    Applied,
    Skipped,
}

/// Ledger adjustment that failed to apply and waits for a retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerMirrorJob {
    #[serde(rename = "_id")]
    pub id: String,
    pub adjustment: LedgerAdjustment,
    pub status: MirrorJobStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerMirrorJob {
    pub fn pending(adjustment: LedgerAdjustment, error: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            adjustment,
            status: MirrorJobStatus::Pending,
            attempts: 1,
            last_error: Some(error),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adjustment(delta: Decimal) -> LedgerAdjustment {
        LedgerAdjustment {
            customer_name: "Ravi".to_string(),
            delta,
            description: "Bill 2024-05".to_string(),
            related_entity_type: RelatedEntityType::Bill,
            related_entity_id: "bill-1".to_string(),
            requested_by: "admin-1".to_string(),
        }
    }

    #[test]
    fn charges_are_withdrawals_and_reductions_are_deposits() {
        let charge = adjustment(Decimal::new(150050, 2)).to_transaction("acc-1");
        assert_eq!(charge.transaction_type, TransactionType::Withdrawal);
        assert_eq!(charge.amount, Decimal::new(150050, 2));

        let credit = adjustment(Decimal::new(-400, 0)).to_transaction("acc-1");
        assert_eq!(credit.transaction_type, TransactionType::Deposit);
        assert_eq!(credit.amount, Decimal::new(400, 0));
    }

    #[test]
    fn zero_delta_counts_as_withdrawal() {
        assert_eq!(
            TransactionType::for_delta(Decimal::ZERO),
            TransactionType::Withdrawal
        );
    }

    #[test]
    fn receivable_name_is_derived_from_display_name() {
        assert_eq!(receivable_account_name("  Meena Devi "), "Meena Devi - Receivable");
    }

    #[test]
    fn transaction_type_serializes_under_type_key() {
        let json = serde_json::to_value(adjustment(Decimal::ONE).to_transaction("acc-9")).unwrap();
        assert_eq!(json["type"], "withdrawal");
        assert_eq!(json["account_id"], "acc-9");
    }
}
