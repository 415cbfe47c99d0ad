//! Mirrors customer balance changes onto their receivable ledger accounts.
//!
//! The mirror never fails its caller. A write that cannot be applied is parked
//! as a `LedgerMirrorJob` and reported through `MirrorOutcome`.

use crate::models::{
    receivable_account_name, AccountType, LedgerAdjustment, LedgerMirrorJob, MirrorJobStatus,
};
use crate::services::metrics::record_ledger_mirror;
use crate::services::store::{BillingStore, StoreError};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// What happened to a mirrored adjustment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MirrorOutcome {
    Applied {
        account_id: String,
        transaction_id: String,
        #[serde(with = "rust_decimal::serde::float")]
        balance_after: Decimal,
    },
    /// Nothing to record for a zero delta.
    SkippedZeroDelta,
    /// The customer has no receivable account; nothing was written.
    NoAccount { account_name: String },
    /// The write failed and was queued for `retry_pending`.
    Queued { job_id: String, error: String },
    /// The write failed and the retry job could not be stored either.
    Lost { error: String },
}

impl MirrorOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            MirrorOutcome::Applied { .. }
                | MirrorOutcome::SkippedZeroDelta
                | MirrorOutcome::NoAccount { .. }
        )
    }

    fn label(&self) -> &'static str {
        match self {
            MirrorOutcome::Applied { .. } => "applied",
            MirrorOutcome::SkippedZeroDelta => "skipped_zero",
            MirrorOutcome::NoAccount { .. } => "no_account",
            MirrorOutcome::Queued { .. } => "queued",
            MirrorOutcome::Lost { .. } => "lost",
        }
    }

    /// Human-readable warning for responses, when the outcome needs attention.
    pub fn warning(&self, customer_name: &str) -> Option<String> {
        match self {
            MirrorOutcome::Queued { job_id, error } => Some(format!(
                "ledger update for {} queued for retry (job {}): {}",
                customer_name, job_id, error
            )),
            MirrorOutcome::Lost { error } => Some(format!(
                "ledger update for {} failed and could not be queued: {}",
                customer_name, error
            )),
            _ => None,
        }
    }
}

/// Result of one retry pass over pending jobs.
#[derive(Debug, Default, Serialize)]
pub struct RetryReport {
    pub attempted: usize,
    pub applied: usize,
    pub skipped: usize,
    pub still_pending: usize,
}

#[derive(Clone)]
pub struct LedgerMirror {
    store: Arc<dyn BillingStore>,
}

impl LedgerMirror {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Apply `adjustment` to the customer's receivable account.
    #[instrument(skip(self, adjustment), fields(customer = %adjustment.customer_name, delta = %adjustment.delta))]
    pub async fn apply(&self, adjustment: LedgerAdjustment) -> MirrorOutcome {
        let outcome = match self.try_apply(&adjustment, None).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Ledger mirror write failed, queueing for retry");
                let job = LedgerMirrorJob::pending(adjustment, e.to_string());
                match self.store.enqueue_mirror_job(&job).await {
                    Ok(()) => MirrorOutcome::Queued {
                        job_id: job.id,
                        error: e.to_string(),
                    },
                    Err(queue_err) => {
                        tracing::error!(error = %queue_err, "Failed to queue ledger mirror job");
                        MirrorOutcome::Lost {
                            error: format!("{}; queueing failed: {}", e, queue_err),
                        }
                    }
                }
            }
        };
        record_ledger_mirror(outcome.label());
        outcome
    }

    async fn try_apply(
        &self,
        adjustment: &LedgerAdjustment,
        settles_job: Option<&str>,
    ) -> Result<MirrorOutcome, StoreError> {
        if adjustment.delta.is_zero() {
            return Ok(MirrorOutcome::SkippedZeroDelta);
        }

        let account_name = receivable_account_name(&adjustment.customer_name);
        let Some(account) = self
            .store
            .find_account_by_name(&account_name, AccountType::Receivable)
            .await?
        else {
            info!(account_name = %account_name, "No receivable account, ledger mirror skipped");
            return Ok(MirrorOutcome::NoAccount { account_name });
        };

        let transaction = adjustment.to_transaction(&account.id);
        let (account, transaction) = self
            .store
            .apply_account_delta(&account.id, adjustment.delta, transaction, settles_job)
            .await?;

        Ok(MirrorOutcome::Applied {
            account_id: account.id,
            transaction_id: transaction.id,
            balance_after: transaction.balance_after,
        })
    }

    /// Re-apply every pending job, oldest first.
    #[instrument(skip(self))]
    pub async fn retry_pending(&self) -> Result<RetryReport, StoreError> {
        let jobs = self.store.pending_mirror_jobs().await?;
        let mut report = RetryReport {
            attempted: jobs.len(),
            ..Default::default()
        };

        for mut job in jobs {
            let skipped = match self.try_apply(&job.adjustment, Some(&job.id)).await {
                Ok(MirrorOutcome::Applied { .. }) => {
                    report.applied += 1;
                    record_ledger_mirror("applied");
                    continue;
                }
                Err(StoreError::AlreadySettled { .. }) => {
                    info!(job_id = %job.id, "Ledger mirror job already settled by another pass");
                    report.skipped += 1;
                    continue;
                }
                Ok(outcome) => {
                    job.status = MirrorJobStatus::Skipped;
                    job.last_error = None;
                    record_ledger_mirror(outcome.label());
                    true
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Ledger mirror retry failed");
                    job.attempts += 1;
                    job.last_error = Some(e.to_string());
                    false
                }
            };

            job.updated_at = Utc::now();
            match self.store.update_mirror_job(&job).await {
                Ok(()) if skipped => report.skipped += 1,
                Ok(()) => report.still_pending += 1,
                Err(StoreError::AlreadySettled { .. }) => report.skipped += 1,
                Err(e) => return Err(e),
            }
        }

        info!(
            attempted = report.attempted,
            applied = report.applied,
            skipped = report.skipped,
            still_pending = report.still_pending,
            "Ledger mirror retry pass finished"
        );
        Ok(report)
    }
}
