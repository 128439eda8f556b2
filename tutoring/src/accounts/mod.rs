//! Accounts for parents, students, tutors and admins.
//!
//! This module implements:
//! - Argon2id password hashing with server-side pepper
//! - JWT access tokens carrying the account role
//! - Wallet creation at registration
//! - Parent/student links (parents pay for their children's classes)
//! - Referral tracking for the first-funding bonus

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{AccountError, AccountResult};
pub use manager::AccountManager;
pub use models::{
    AccessTokenClaims, Account, LoginRequest, NewAccount, RegisterRequest, Role, UserId,
};
