pub mod allocator;
pub mod auth;
pub mod balance;
pub mod config;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod money;
pub mod routes;
pub mod schemas;
mod setup;
pub mod store;

pub use error::{LedgerError, Result, StoreError};
pub use ledger::{ExpenseDraft, ExpenseEdit, Ledger};
