//! Payout requests and the settlement run.

use super::{
    errors::{PayoutError, PayoutResult},
    models::{
        NewPayoutRequest, PayoutFilter, PayoutId, PayoutRequest, PayoutStatus, SettlementReport,
        coins_to_eur,
    },
};
use crate::{
    accounts::{AccountError, Role, UserId},
    config::WorkflowConfig,
    db::{AccountRepository, PayoutRepository},
    providers::{PaymentProvider, PayoutInstruction, TransferRequest},
    wallet::{Direction, PendingTransaction, TransactionType},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Outcome of one request within a settlement run
enum Step {
    Processed,
    Skipped,
    Failed,
}

/// Payout manager
#[derive(Clone)]
pub struct PayoutManager {
    payouts: Arc<dyn PayoutRepository>,
    accounts: Arc<dyn AccountRepository>,
    provider: Arc<dyn PaymentProvider>,
    config: WorkflowConfig,
}

impl PayoutManager {
    pub fn new(
        payouts: Arc<dyn PayoutRepository>,
        accounts: Arc<dyn AccountRepository>,
        provider: Arc<dyn PaymentProvider>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            payouts,
            accounts,
            provider,
            config,
        }
    }

    /// Request a payout of earned coins
    ///
    /// The coins are reserved in `wallet.pending` in the same commit as the
    /// request, so they cannot be spent or requested twice.
    ///
    /// # Errors
    ///
    /// * `PayoutError::PermissionDenied` - Caller is not a tutor
    /// * `PayoutError::NoConnectAccount` - Tutor has no payout account
    /// * `PayoutError::Validation` - Non-positive amount or empty bank account
    /// * `PayoutError::BelowMinimum` - Amount below the configured minimum
    /// * `PayoutError::Wallet` - Available balance does not cover the amount
    pub async fn request_payout(
        &self,
        tutor_id: UserId,
        coins: Decimal,
        bank_account: String,
    ) -> PayoutResult<PayoutRequest> {
        let tutor = self
            .accounts
            .find_by_id(tutor_id)
            .await?
            .ok_or(AccountError::NotFound(tutor_id))?;
        if tutor.role != Role::Tutor {
            return Err(PayoutError::PermissionDenied(
                "only tutors can request payouts".to_string(),
            ));
        }
        if tutor.connect_account_id.is_none() {
            return Err(PayoutError::NoConnectAccount);
        }

        let bank_account = bank_account.trim().to_string();
        if bank_account.is_empty() {
            return Err(PayoutError::Validation(
                "bank account must not be empty".to_string(),
            ));
        }
        if coins <= Decimal::ZERO {
            return Err(PayoutError::Validation(
                "payout amount must be positive".to_string(),
            ));
        }
        if coins < self.config.min_payout_coins {
            return Err(PayoutError::BelowMinimum {
                minimum: self.config.min_payout_coins,
            });
        }

        let request = self
            .payouts
            .insert_request(&NewPayoutRequest {
                tutor_id,
                bank_account,
                coins,
                amount_eur: coins_to_eur(coins, self.config.coin_to_eur_rate),
            })
            .await?;

        tracing::info!(
            payout_id = request.id,
            tutor_id,
            %coins,
            amount_eur = %request.amount_eur,
            "Payout requested"
        );
        Ok(request)
    }

    /// Settle outstanding payout requests
    ///
    /// The run holds the store's settlement lock throughout. Pending
    /// requests older than the payout window expire and release their
    /// coins. The remaining pending requests and every transferred one are
    /// processed oldest first against the platform balance read at the
    /// start of the run. Requests the remaining balance does not cover are
    /// skipped and stay `pending`. A failed transfer returns the request to
    /// `pending`; a failed bank payout keeps it `transferred` for the next
    /// run, however old it gets.
    ///
    /// # Errors
    ///
    /// * `PayoutError::SettlementInProgress` - Another run, in any process, holds the lock
    /// * `PayoutError::Provider` - Platform balance could not be read
    pub async fn settle(&self, now: DateTime<Utc>) -> PayoutResult<SettlementReport> {
        let _lock = self
            .payouts
            .try_lock_settlement()
            .await?
            .ok_or(PayoutError::SettlementInProgress)?;

        let cutoff = now - self.config.payout_window;
        let mut report = SettlementReport::default();
        for request in self.payouts.expire_pending(cutoff).await? {
            tracing::info!(
                payout_id = request.id,
                tutor_id = request.tutor_id,
                coins = %request.coins,
                "Payout request expired, reservation released"
            );
            report.expired.push(request.id);
        }
        metrics::counter!("payouts_expired_total").increment(report.expired.len() as u64);

        let requests = self.payouts.settleable(cutoff).await?;
        if requests.is_empty() {
            return Ok(report);
        }

        let mut budget = self.provider.available_balance().await?;
        tracing::info!(requests = requests.len(), %budget, "Settlement run started");

        for request in requests {
            let payout_id = request.id;
            match self.settle_one(request, &mut budget).await {
                Step::Processed => report.processed.push(payout_id),
                Step::Skipped => report.skipped.push(payout_id),
                Step::Failed => report.failed.push(payout_id),
            }
        }

        metrics::counter!("payouts_settled_total").increment(report.processed.len() as u64);
        metrics::counter!("payouts_skipped_total").increment(report.skipped.len() as u64);
        metrics::counter!("payouts_failed_total").increment(report.failed.len() as u64);
        tracing::info!(
            processed = report.processed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            remaining_budget = %budget,
            "Settlement run finished"
        );
        Ok(report)
    }

    async fn settle_one(&self, request: PayoutRequest, budget: &mut Decimal) -> Step {
        if request.status == PayoutStatus::Pending && request.amount_eur > *budget {
            tracing::info!(
                payout_id = request.id,
                amount_eur = %request.amount_eur,
                budget = %budget,
                "Platform balance does not cover payout, skipping"
            );
            return Step::Skipped;
        }

        let connect_account = match self.connect_account(request.tutor_id).await {
            Ok(account) => account,
            Err(e) => {
                tracing::warn!(payout_id = request.id, error = %e, "Payout has no destination");
                return Step::Failed;
            }
        };

        let payout_id = request.id;
        let request = match request.status {
            PayoutStatus::Pending => match self.transfer(request, &connect_account).await {
                Ok(Some(transferred)) => {
                    *budget -= transferred.amount_eur;
                    transferred
                }
                Ok(None) => return Step::Skipped,
                Err(e) => {
                    tracing::warn!(payout_id, error = %e, "Payout transfer failed");
                    return Step::Failed;
                }
            },
            PayoutStatus::Transferred => request,
            PayoutStatus::Processing | PayoutStatus::Processed | PayoutStatus::Expired => {
                return Step::Skipped;
            }
        };

        match self.pay_out(&request, &connect_account).await {
            Ok(true) => Step::Processed,
            Ok(false) => Step::Skipped,
            Err(e) => {
                tracing::warn!(payout_id, error = %e, "Bank payout failed");
                Step::Failed
            }
        }
    }

    /// Move the coins' EUR value to the tutor's connect account
    ///
    /// Returns `None` when another run claimed the request first.
    async fn transfer(
        &self,
        request: PayoutRequest,
        connect_account: &str,
    ) -> PayoutResult<Option<PayoutRequest>> {
        if !self.payouts.claim(request.id, PayoutStatus::Pending).await? {
            return Ok(None);
        }

        let transfer = match self
            .provider
            .transfer(&TransferRequest {
                amount_eur: request.amount_eur,
                destination: connect_account.to_string(),
                description: format!("Payout request {}", request.id),
            })
            .await
        {
            Ok(transfer) => transfer,
            Err(e) => {
                self.payouts
                    .release(request.id, PayoutStatus::Pending, &e.to_string())
                    .await?;
                return Err(e.into());
            }
        };

        let withdrawal = PendingTransaction {
            owner_id: request.tutor_id,
            transaction_type: TransactionType::Withdrawal,
            direction: Direction::Debit,
            amount: request.coins,
            narration: format!("Payout {} to bank", request.id),
            reference: transfer.id.clone(),
        };
        let transferred = self
            .payouts
            .record_transfer(request.id, &transfer.id, &withdrawal)
            .await
            .inspect_err(|e| {
                // The money has moved; leave the claim in place for manual recovery
                tracing::error!(
                    payout_id = request.id,
                    transfer_reference = %transfer.id,
                    error = %e,
                    "Transfer succeeded but could not be recorded"
                );
            })?;

        tracing::info!(
            payout_id = transferred.id,
            transfer_reference = %transfer.id,
            "Payout transferred"
        );
        Ok(Some(transferred))
    }

    /// Pay a transferred request out to the tutor's bank
    ///
    /// Returns `false` when another run claimed the request first.
    async fn pay_out(&self, request: &PayoutRequest, connect_account: &str) -> PayoutResult<bool> {
        if !self
            .payouts
            .claim(request.id, PayoutStatus::Transferred)
            .await?
        {
            return Ok(false);
        }

        let failure = match self
            .provider
            .payout(&PayoutInstruction {
                amount_eur: request.amount_eur,
                connect_account: connect_account.to_string(),
                bank_account: request.bank_account.clone(),
            })
            .await
        {
            Ok(payout) => match payout.failure_message {
                None => {
                    let processed = self.payouts.finalize(request.id, &payout.id).await?;
                    tracing::info!(
                        payout_id = processed.id,
                        payout_reference = %payout.id,
                        tutor_id = processed.tutor_id,
                        coins = %processed.coins,
                        "Payout processed"
                    );
                    return Ok(true);
                }
                Some(message) => PayoutError::Rejected(message),
            },
            Err(e) => e.into(),
        };

        self.payouts
            .release(request.id, PayoutStatus::Transferred, &failure.to_string())
            .await?;
        Err(failure)
    }

    async fn connect_account(&self, tutor_id: UserId) -> PayoutResult<String> {
        self.accounts
            .find_by_id(tutor_id)
            .await?
            .and_then(|tutor| tutor.connect_account_id)
            .ok_or(PayoutError::NoConnectAccount)
    }

    /// Fetch one payout request; tutors only see their own
    pub async fn get(&self, caller: UserId, payout_id: PayoutId) -> PayoutResult<PayoutRequest> {
        let request = self
            .payouts
            .get_request(payout_id)
            .await?
            .ok_or(PayoutError::NotFound(payout_id))?;
        if request.tutor_id != caller {
            let admin = self
                .accounts
                .find_by_id(caller)
                .await?
                .is_some_and(|account| account.is_admin());
            if !admin {
                return Err(PayoutError::PermissionDenied(
                    "not your payout request".to_string(),
                ));
            }
        }
        Ok(request)
    }

    /// Payout requests across all tutors (admin)
    pub async fn list(&self, filter: &PayoutFilter) -> PayoutResult<Vec<PayoutRequest>> {
        self.payouts.list_requests(filter).await
    }

    /// One tutor's payout requests
    pub async fn list_for_tutor(
        &self,
        tutor_id: UserId,
        mut filter: PayoutFilter,
    ) -> PayoutResult<Vec<PayoutRequest>> {
        filter.tutor_id = Some(tutor_id);
        self.payouts.list_requests(&filter).await
    }
}
