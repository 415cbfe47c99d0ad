//! Monthly milk billing, payment recording and receivable-ledger
//! reconciliation for the dairy backend.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;

pub use startup::{AppState, Application};
