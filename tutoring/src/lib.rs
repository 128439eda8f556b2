//! # Tutoring
//!
//! Booking, wallet and payout workflows for an online tutoring marketplace.
//!
//! Parents and students buy coins, book classes with tutors and pay for them
//! from their wallet; tutors accept or decline, get paid when the class is
//! over, and withdraw their earnings to a bank account.
//!
//! ## Architecture
//!
//! Each workflow is a manager over repository traits plus injected
//! provider clients:
//!
//! - [`accounts`]: registration, login, parent/student links
//! - [`wallet`]: coin balances and the transaction log behind them
//! - [`payment`]: funding plans and payment reconciliation
//! - [`classroom`]: the booking state machine
//! - [`payout`]: payout requests and the settlement run
//! - [`dispute`]: user disputes resolved by admins
//! - [`notify`]: queued, retried participant emails
//!
//! Storage lives in [`db`] ([`db::PgStore`] for PostgreSQL,
//! [`db::MemoryStore`] for tests and local runs). External services live in
//! [`providers`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tutoring::db::MemoryStore;
//! use tutoring::wallet::WalletManager;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let wallets = WalletManager::new(store.clone());
//!     let check = wallets.verify_ledger(1).await;
//!     println!("{check:?}");
//!     Ok(())
//! }
//! ```

pub mod accounts;
pub mod classroom;
pub mod config;
pub mod db;
pub mod dispute;
pub mod notify;
pub mod payment;
pub mod payout;
pub mod providers;
pub mod wallet;

pub use config::WorkflowConfig;
