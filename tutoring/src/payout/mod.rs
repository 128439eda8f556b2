//! Tutor payouts.
//!
//! A tutor's payout request reserves coins in `wallet.pending`. A settlement
//! run then moves each request through two provider calls:
//!
//! ```text
//! pending     --claim--> processing --transfer--> transferred
//! transferred --claim--> processing --payout-->   processed
//! ```
//!
//! Every provider call happens under a claim, so two runs never pay the
//! same request. A failed call hands the request back to the state it was
//! claimed from. A whole run holds the store's settlement lock, so only one
//! process spends the platform balance at a time.

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{PayoutError, PayoutResult};
pub use manager::PayoutManager;
pub use models::{
    NewPayoutRequest, PayoutFilter, PayoutId, PayoutRequest, PayoutStatus, SettlementLock,
    SettlementReport, coins_to_eur,
};
