//! Disputes raised by users and resolved by admins.

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{DisputeError, DisputeResult};
pub use manager::DisputeManager;
pub use models::{
    Dispute, DisputeFilter, DisputeId, DisputeKind, DisputeStatus, NewDispute, SubmitDispute,
};
