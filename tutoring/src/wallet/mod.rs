//! Wallet ledger: per-user coin balances and the transaction log behind them.
//!
//! Every balance change is one [`Transaction`] row. Completed transactions
//! are the only ones that move a balance, so for any wallet the stored
//! balance equals the signed sum of its completed transactions.
//!
//! ## Example
//!
//! ```no_run
//! use rust_decimal::dec;
//! use std::sync::Arc;
//! use tutoring::db::MemoryStore;
//! use tutoring::wallet::{TransactionType, WalletManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let wallet = WalletManager::new(store);
//!
//!     wallet
//!         .credit(1, dec!(25), TransactionType::Bonus, "Welcome bonus")
//!         .await?;
//!     println!("Balance: {}", wallet.get_wallet(1).await?.balance);
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{WalletError, WalletResult};
pub use manager::WalletManager;
pub use models::{
    Direction, LedgerCheck, PendingTransaction, Posting, ReferralBonus, SettleOutcome, Settlement,
    Transaction, TransactionFilter, TransactionId, TransactionStatus, TransactionType, Wallet,
};
