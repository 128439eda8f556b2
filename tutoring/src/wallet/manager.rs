//! Wallet manager: credits, debits and ledger queries.

use super::{
    errors::{WalletError, WalletResult},
    models::{LedgerCheck, Posting, Transaction, TransactionFilter, TransactionType, Wallet},
};
use crate::{accounts::UserId, db::LedgerRepository};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Wallet manager
#[derive(Clone)]
pub struct WalletManager {
    ledger: Arc<dyn LedgerRepository>,
}

impl WalletManager {
    /// Create a new wallet manager over a ledger repository
    pub fn new(ledger: Arc<dyn LedgerRepository>) -> Self {
        Self { ledger }
    }

    /// Get wallet for a user
    pub async fn get_wallet(&self, user_id: UserId) -> WalletResult<Wallet> {
        self.ledger.get_wallet(user_id).await
    }

    /// Credit a wallet
    ///
    /// Produces exactly one completed credit transaction.
    ///
    /// # Errors
    ///
    /// * `WalletError::InvalidAmount` - Amount is zero or negative
    /// * `WalletError::WalletNotFound` - User has no wallet
    pub async fn credit(
        &self,
        user_id: UserId,
        amount: Decimal,
        transaction_type: TransactionType,
        narration: impl Into<String>,
    ) -> WalletResult<Transaction> {
        ensure_positive(amount)?;
        let transaction = self
            .ledger
            .post(&Posting::credit(user_id, amount, transaction_type, narration))
            .await?;

        tracing::info!(
            user_id,
            transaction_id = transaction.id,
            %amount,
            kind = %transaction_type,
            "Wallet credited"
        );
        Ok(transaction)
    }

    /// Debit a wallet
    ///
    /// The balance check and the decrement are one atomic unit per wallet.
    ///
    /// # Errors
    ///
    /// * `WalletError::InvalidAmount` - Amount is zero or negative
    /// * `WalletError::InsufficientBalance` - Available balance below `amount`
    /// * `WalletError::WalletNotFound` - User has no wallet
    pub async fn debit(
        &self,
        user_id: UserId,
        amount: Decimal,
        transaction_type: TransactionType,
        narration: impl Into<String>,
    ) -> WalletResult<Transaction> {
        ensure_positive(amount)?;
        let transaction = self
            .ledger
            .post(&Posting::debit(user_id, amount, transaction_type, narration))
            .await?;

        tracing::info!(
            user_id,
            transaction_id = transaction.id,
            %amount,
            kind = %transaction_type,
            "Wallet debited"
        );
        Ok(transaction)
    }

    /// Transaction history for one user
    pub async fn history(
        &self,
        user_id: UserId,
        mut filter: TransactionFilter,
    ) -> WalletResult<Vec<Transaction>> {
        filter.owner_id = Some(user_id);
        self.ledger.list_transactions(&filter).await
    }

    /// Transactions across all users (admin)
    pub async fn list(&self, filter: &TransactionFilter) -> WalletResult<Vec<Transaction>> {
        self.ledger.list_transactions(filter).await
    }

    /// Recompute a wallet's balance from its completed transactions
    pub async fn verify_ledger(&self, user_id: UserId) -> WalletResult<LedgerCheck> {
        let wallet = self.ledger.get_wallet(user_id).await?;
        let ledger_balance = self.ledger.completed_sum(user_id).await?;

        let check = LedgerCheck {
            stored_balance: wallet.balance,
            ledger_balance,
        };
        if !check.is_consistent() {
            tracing::error!(
                user_id,
                stored = %check.stored_balance,
                ledger = %check.ledger_balance,
                "Wallet balance diverges from ledger"
            );
        }
        Ok(check)
    }
}

fn ensure_positive(amount: Decimal) -> WalletResult<()> {
    if amount <= Decimal::ZERO {
        return Err(WalletError::InvalidAmount(amount));
    }
    Ok(())
}
