//! Payout request models.

use crate::{accounts::UserId, wallet::TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Payout request ID type
pub type PayoutId = i64;

/// Payout request state
///
/// `pending -> processing -> transferred -> processing -> processed`.
/// A failed provider call returns the request to the state it was claimed
/// from, so the next settlement run retries only the outstanding step.
/// A `pending` request older than the payout window becomes `expired` and
/// its coins are released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    /// Claimed by a settlement run
    Processing,
    /// Transfer to the connect account done, bank payout outstanding
    Transferred,
    Processed,
    /// Never transferred within the payout window; reservation released
    Expired,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Transferred => "transferred",
            PayoutStatus::Processed => "processed",
            PayoutStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PayoutStatus::Processed | PayoutStatus::Expired)
    }
}

impl std::fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayoutStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PayoutStatus::Pending),
            "processing" => Ok(PayoutStatus::Processing),
            "transferred" => Ok(PayoutStatus::Transferred),
            "processed" => Ok(PayoutStatus::Processed),
            "expired" => Ok(PayoutStatus::Expired),
            other => Err(format!("unknown payout status: {other}")),
        }
    }
}

/// Tutor withdrawal request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub id: PayoutId,
    pub tutor_id: UserId,
    pub bank_account: String,
    pub coins: Decimal,
    pub amount_eur: Decimal,
    pub status: PayoutStatus,
    /// Provider transfer id, once the transfer succeeded
    pub transfer_reference: Option<String>,
    /// Provider payout id, once the request is processed
    pub payout_reference: Option<String>,
    /// Pending `withdrawal` transaction opened after the transfer
    pub withdrawal_id: Option<TransactionId>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Payout request to insert
#[derive(Debug, Clone)]
pub struct NewPayoutRequest {
    pub tutor_id: UserId,
    pub bank_account: String,
    pub coins: Decimal,
    pub amount_eur: Decimal,
}

/// Payout listing filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayoutFilter {
    pub tutor_id: Option<UserId>,
    pub status: Option<PayoutStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Case-insensitive match on bank account or provider references
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PayoutFilter {
    pub fn page(&self) -> (i64, i64) {
        crate::wallet::models::page_bounds(self.limit, self.offset)
    }

    pub fn matches(&self, request: &PayoutRequest) -> bool {
        if self.tutor_id.is_some_and(|tutor| tutor != request.tutor_id) {
            return false;
        }
        if self.status.is_some_and(|status| status != request.status) {
            return false;
        }
        if self.from.is_some_and(|from| request.created_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| request.created_at > to) {
            return false;
        }
        if let Some(term) = self.search.as_deref().filter(|t| !t.is_empty()) {
            let term = term.to_lowercase();
            let hit = [
                Some(request.bank_account.as_str()),
                request.transfer_reference.as_deref(),
                request.payout_reference.as_deref(),
            ]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&term));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// Result of one settlement run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SettlementReport {
    /// Requests that reached `processed`
    pub processed: Vec<PayoutId>,
    /// Requests left untouched because the platform balance did not cover them
    pub skipped: Vec<PayoutId>,
    /// Requests whose transfer or payout failed this run
    pub failed: Vec<PayoutId>,
    /// Pending requests that aged out of the payout window
    pub expired: Vec<PayoutId>,
}

/// Store-wide right to run a settlement
///
/// Held by at most one run across every process sharing the store.
/// Dropping it releases the lock.
pub struct SettlementLock {
    _held: Box<dyn Send>,
}

impl SettlementLock {
    pub fn new(held: impl Send + 'static) -> Self {
        Self {
            _held: Box::new(held),
        }
    }
}

/// Convert coins to EUR, rounded half away from zero to cents
pub fn coins_to_eur(coins: Decimal, rate: Decimal) -> Decimal {
    (coins * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
