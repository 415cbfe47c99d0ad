//! Services module for billing-service.

pub mod billing;
pub mod ledger_mirror;
pub mod locks;
pub mod metrics;
pub mod payments;
pub mod store;

pub use billing::{BillingEngine, GenerationSummary, PeriodSummary};
pub use ledger_mirror::{LedgerMirror, MirrorOutcome, RetryReport};
pub use locks::KeyedLocks;
pub use metrics::{get_metrics, init_metrics};
pub use payments::{PaymentInput, PaymentReceipt, PaymentRecorder, PaymentStatusPolicy};
pub use store::{BillingStore, InMemoryBillingStore, MongoBillingStore, StoreError};
