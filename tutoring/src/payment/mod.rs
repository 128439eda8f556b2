//! Wallet funding and payment reconciliation.
//!
//! Buying a funding plan opens a pending `fund_wallet` transaction keyed by
//! the provider's checkout session id. Reconciling that reference is the
//! only path that credits funded coins, and it settles each transaction at
//! most once.

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{PaymentError, PaymentResult};
pub use manager::PaymentManager;
pub use models::{
    FundingPlan, FundingSession, NewFundingPlan, PaymentReference, PlanId, Reconciliation,
};
