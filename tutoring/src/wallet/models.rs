//! Wallet and transaction data models.

use crate::accounts::UserId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Transaction ID type
pub type TransactionId = i64;

/// Wallet model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    pub balance: Decimal,
    /// Coins reserved by open payout requests.
    pub pending: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Empty wallet, as created at registration
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            pending: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Balance that can still be spent or reserved
    pub fn available(&self) -> Decimal {
        self.balance - self.pending
    }
}

/// Transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    FundWallet,
    CoursePayment,
    Withdrawal,
    Refund,
    Bonus,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::FundWallet => "fund_wallet",
            TransactionType::CoursePayment => "course_payment",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Refund => "refund",
            TransactionType::Bonus => "bonus",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fund_wallet" => Ok(TransactionType::FundWallet),
            "course_payment" => Ok(TransactionType::CoursePayment),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "refund" => Ok(TransactionType::Refund),
            "bonus" => Ok(TransactionType::Bonus),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// Entry direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Credit => "credit",
            Direction::Debit => "debit",
        }
    }

    /// Signed effect of an amount moving in this direction
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            Direction::Credit => amount,
            Direction::Debit => -amount,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(Direction::Credit),
            "debit" => Ok(Direction::Debit),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// Ledger transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub owner_id: UserId,
    pub transaction_type: TransactionType,
    pub direction: Direction,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub narration: String,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Contribution of this transaction to the owner's balance
    pub fn signed_amount(&self) -> Decimal {
        match self.status {
            TransactionStatus::Completed => self.direction.signed(self.amount),
            _ => Decimal::ZERO,
        }
    }
}

/// An immediate balance mutation, recorded as one completed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub user_id: UserId,
    pub amount: Decimal,
    pub direction: Direction,
    pub transaction_type: TransactionType,
    pub narration: String,
    pub reference: Option<String>,
}

impl Posting {
    pub fn credit(
        user_id: UserId,
        amount: Decimal,
        transaction_type: TransactionType,
        narration: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            amount,
            direction: Direction::Credit,
            transaction_type,
            narration: narration.into(),
            reference: None,
        }
    }

    pub fn debit(
        user_id: UserId,
        amount: Decimal,
        transaction_type: TransactionType,
        narration: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            amount,
            direction: Direction::Debit,
            transaction_type,
            narration: narration.into(),
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// A transaction opened in `pending` state, settled later by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransaction {
    pub owner_id: UserId,
    pub transaction_type: TransactionType,
    pub direction: Direction,
    pub amount: Decimal,
    pub narration: String,
    pub reference: String,
}

/// One-time credit paid to the account that referred a new funder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferralBonus {
    pub referrer_id: UserId,
    pub amount: Decimal,
}

/// Outcome to apply to a pending transaction
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// Complete the transaction and apply its amount to the wallet.
    ///
    /// The referral bonus is only paid when the owner has no earlier
    /// completed `fund_wallet` transaction.
    Completed { referral: Option<ReferralBonus> },
    Failed,
}

/// Result of settling a pending transaction
#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    Settled {
        transaction: Transaction,
        bonus: Option<Transaction>,
    },
    AlreadyProcessed(Transaction),
}

/// Transaction listing filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub owner_id: Option<UserId>,
    pub status: Option<TransactionStatus>,
    pub transaction_type: Option<TransactionType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Case-insensitive match on narration or reference
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Default page size for listings
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Largest page size a listing will return
pub const MAX_PAGE_SIZE: i64 = 500;

/// Clamp user-supplied paging to sane bounds
pub fn page_bounds(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (
        limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        offset.unwrap_or(0).max(0),
    )
}

impl TransactionFilter {
    pub fn for_owner(owner_id: UserId) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Default::default()
        }
    }

    pub fn page(&self) -> (i64, i64) {
        page_bounds(self.limit, self.offset)
    }

    /// In-process evaluation of the filter, mirroring the SQL predicate
    pub fn matches(&self, tx: &Transaction) -> bool {
        if self.owner_id.is_some_and(|owner| owner != tx.owner_id) {
            return false;
        }
        if self.status.is_some_and(|status| status != tx.status) {
            return false;
        }
        if self
            .transaction_type
            .is_some_and(|kind| kind != tx.transaction_type)
        {
            return false;
        }
        if self.from.is_some_and(|from| tx.created_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| tx.created_at > to) {
            return false;
        }
        if let Some(term) = self.search.as_deref().filter(|t| !t.is_empty()) {
            let term = term.to_lowercase();
            let in_narration = tx.narration.to_lowercase().contains(&term);
            let in_reference = tx
                .reference
                .as_deref()
                .is_some_and(|r| r.to_lowercase().contains(&term));
            if !in_narration && !in_reference {
                return false;
            }
        }
        true
    }
}

/// Comparison between a stored balance and the ledger that produced it
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LedgerCheck {
    pub stored_balance: Decimal,
    pub ledger_balance: Decimal,
}

impl LedgerCheck {
    pub fn is_consistent(&self) -> bool {
        self.stored_balance == self.ledger_balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    fn tx(direction: Direction, amount: Decimal, status: TransactionStatus) -> Transaction {
        Transaction {
            id: 1,
            owner_id: 7,
            transaction_type: TransactionType::Refund,
            direction,
            amount,
            status,
            narration: "Refund for Algebra with Ada".to_string(),
            reference: Some("cs_test_123".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_available_subtracts_reserved_coins() {
        let mut wallet = Wallet::empty(1);
        wallet.balance = dec!(40.0);
        wallet.pending = dec!(15.0);
        assert_eq!(wallet.available(), dec!(25.0));
    }

    #[test]
    fn test_only_completed_transactions_move_balance() {
        assert_eq!(
            tx(Direction::Debit, dec!(10), TransactionStatus::Completed).signed_amount(),
            dec!(-10)
        );
        assert_eq!(
            tx(Direction::Credit, dec!(10), TransactionStatus::Pending).signed_amount(),
            Decimal::ZERO
        );
        assert_eq!(
            tx(Direction::Credit, dec!(10), TransactionStatus::Failed).signed_amount(),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_enum_strings_round_trip_through_from_str() {
        for kind in [
            TransactionType::FundWallet,
            TransactionType::CoursePayment,
            TransactionType::Withdrawal,
            TransactionType::Refund,
            TransactionType::Bonus,
        ] {
            assert_eq!(kind.as_str().parse::<TransactionType>(), Ok(kind));
        }
        assert!("cash_out".parse::<TransactionType>().is_err());
        assert!("settled".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn test_filter_search_matches_reference_case_insensitively() {
        let transaction = tx(Direction::Credit, dec!(5), TransactionStatus::Completed);
        let filter = TransactionFilter {
            search: Some("CS_TEST".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&transaction));

        let filter = TransactionFilter {
            search: Some("payout".to_string()),
            ..Default::default()
        };
        assert!(!filter.matches(&transaction));
    }

    #[test]
    fn test_filter_owner_and_status() {
        let transaction = tx(Direction::Credit, dec!(5), TransactionStatus::Pending);
        let mut filter = TransactionFilter::for_owner(7);
        assert!(filter.matches(&transaction));
        filter.status = Some(TransactionStatus::Completed);
        assert!(!filter.matches(&transaction));
        assert!(!TransactionFilter::for_owner(8).matches(&transaction));
    }

    #[test]
    fn test_page_bounds_are_clamped() {
        assert_eq!(page_bounds(None, None), (DEFAULT_PAGE_SIZE, 0));
        assert_eq!(page_bounds(Some(0), Some(-4)), (1, 0));
        assert_eq!(page_bounds(Some(10_000), Some(20)), (MAX_PAGE_SIZE, 20));
    }
}
