//! Funding plans and payment reconciliation models.

use crate::wallet::Transaction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Plan ID type
pub type PlanId = i64;

/// Coin bundle a user can buy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingPlan {
    pub id: PlanId,
    pub name: String,
    /// Coins credited once payment succeeds
    pub coins: Decimal,
    pub price_eur: Decimal,
}

/// Plan to insert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFundingPlan {
    pub name: String,
    pub coins: Decimal,
    pub price_eur: Decimal,
}

/// External payment object a pending transaction points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentReference {
    CheckoutSession(String),
    PaymentIntent(String),
}

impl PaymentReference {
    pub fn as_str(&self) -> &str {
        match self {
            PaymentReference::CheckoutSession(id) | PaymentReference::PaymentIntent(id) => id,
        }
    }
}

impl FromStr for PaymentReference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with("cs_") && s.len() > 3 {
            Ok(PaymentReference::CheckoutSession(s.to_string()))
        } else if s.starts_with("pi_") && s.len() > 3 {
            Ok(PaymentReference::PaymentIntent(s.to_string()))
        } else {
            Err(format!("unrecognised payment reference: {s}"))
        }
    }
}

impl std::fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checkout started for a funding plan
#[derive(Debug, Clone, Serialize)]
pub struct FundingSession {
    pub session_id: String,
    pub checkout_url: Option<String>,
    /// Pending `fund_wallet` transaction settled by `complete_payment`
    pub transaction: Transaction,
}

/// Outcome of reconciling a payment reference
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Reconciliation {
    Completed {
        transaction: Transaction,
        bonus: Option<Transaction>,
    },
    Failed {
        transaction: Transaction,
    },
    /// The transaction was settled by an earlier call; nothing changed
    AlreadyProcessed {
        transaction: Transaction,
    },
}

impl Reconciliation {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Reconciliation::Completed { transaction, .. }
            | Reconciliation::Failed { transaction }
            | Reconciliation::AlreadyProcessed { transaction } => transaction,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Reconciliation::Completed { .. } => "completed",
            Reconciliation::Failed { .. } => "failed",
            Reconciliation::AlreadyProcessed { .. } => "already_processed",
        }
    }
}
