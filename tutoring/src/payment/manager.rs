//! Wallet funding through the payment provider.

use super::{
    errors::{PaymentError, PaymentResult},
    models::{FundingPlan, FundingSession, NewFundingPlan, PaymentReference, PlanId, Reconciliation},
};
use crate::{
    accounts::{AccountError, UserId},
    config::WorkflowConfig,
    db::{AccountRepository, LedgerRepository, PlanRepository},
    providers::{CheckoutRequest, PaymentIntentStatus, PaymentProvider, SessionPaymentStatus},
    wallet::{
        Direction, PendingTransaction, ReferralBonus, SettleOutcome, Settlement,
        TransactionStatus, TransactionType,
    },
};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Payment manager
#[derive(Clone)]
pub struct PaymentManager {
    plans: Arc<dyn PlanRepository>,
    ledger: Arc<dyn LedgerRepository>,
    accounts: Arc<dyn AccountRepository>,
    provider: Arc<dyn PaymentProvider>,
    config: WorkflowConfig,
}

impl PaymentManager {
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        ledger: Arc<dyn LedgerRepository>,
        accounts: Arc<dyn AccountRepository>,
        provider: Arc<dyn PaymentProvider>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            plans,
            ledger,
            accounts,
            provider,
            config,
        }
    }

    pub async fn list_plans(&self) -> PaymentResult<Vec<FundingPlan>> {
        self.plans.list_plans().await
    }

    /// Add a funding plan
    pub async fn create_plan(&self, plan: NewFundingPlan) -> PaymentResult<FundingPlan> {
        let name = plan.name.trim().to_string();
        if name.is_empty() {
            return Err(PaymentError::Validation(
                "plan name must not be empty".to_string(),
            ));
        }
        if plan.coins <= Decimal::ZERO || plan.price_eur <= Decimal::ZERO {
            return Err(PaymentError::Validation(
                "plan coins and price must be positive".to_string(),
            ));
        }

        let plan = self
            .plans
            .insert_plan(&NewFundingPlan { name, ..plan })
            .await?;
        tracing::info!(plan_id = plan.id, coins = %plan.coins, "Funding plan created");
        Ok(plan)
    }

    /// Start buying a plan
    ///
    /// Creates a checkout session and opens a pending `fund_wallet`
    /// transaction for the plan's coins, keyed by the session id. The wallet
    /// is only credited once [`complete_payment`](Self::complete_payment)
    /// sees the session paid.
    ///
    /// # Errors
    ///
    /// * `PaymentError::PlanNotFound` - Unknown plan
    /// * `PaymentError::Provider` - Checkout session could not be created
    pub async fn start_funding(
        &self,
        user_id: UserId,
        plan_id: PlanId,
    ) -> PaymentResult<FundingSession> {
        let plan = self
            .plans
            .get_plan(plan_id)
            .await?
            .ok_or(PaymentError::PlanNotFound(plan_id))?;
        let account = self
            .accounts
            .find_by_id(user_id)
            .await?
            .ok_or(AccountError::NotFound(user_id))?;

        let session = self
            .provider
            .create_checkout_session(&CheckoutRequest {
                name: plan.name.clone(),
                amount_eur: plan.price_eur,
                customer_email: account.email,
                client_reference: format!("user:{user_id}:plan:{plan_id}"),
            })
            .await?;

        let transaction = self
            .ledger
            .open_pending(&PendingTransaction {
                owner_id: user_id,
                transaction_type: TransactionType::FundWallet,
                direction: Direction::Credit,
                amount: plan.coins,
                narration: format!("Wallet funding: {}", plan.name),
                reference: session.id.clone(),
            })
            .await?;

        tracing::info!(
            user_id,
            plan_id,
            reference = %session.id,
            transaction_id = transaction.id,
            "Funding started"
        );
        Ok(FundingSession {
            session_id: session.id,
            checkout_url: session.url,
            transaction,
        })
    }

    /// Reconcile a payment reference with the provider
    ///
    /// A successful payment completes the pending transaction and credits
    /// the wallet; any other provider status marks it failed. Calling this
    /// again for a settled reference changes nothing and reports
    /// [`Reconciliation::AlreadyProcessed`].
    ///
    /// # Errors
    ///
    /// * `PaymentError::InvalidReference` - Not a checkout session or payment intent id
    /// * `PaymentError::NotFound` - No transaction carries the reference
    /// * `PaymentError::Provider` - Lookup failed; the transaction stays pending
    pub async fn complete_payment(&self, reference: &str) -> PaymentResult<Reconciliation> {
        let reference: PaymentReference = reference
            .parse()
            .map_err(PaymentError::InvalidReference)?;
        let transaction = self
            .ledger
            .find_by_reference(reference.as_str())
            .await?
            .ok_or_else(|| PaymentError::NotFound(reference.to_string()))?;

        if transaction.status != TransactionStatus::Pending {
            tracing::debug!(%reference, status = %transaction.status, "Payment already processed");
            return Ok(self.record(Reconciliation::AlreadyProcessed { transaction }));
        }

        let settlement = if self.is_paid(&reference).await? {
            Settlement::Completed {
                referral: self.referral_for(transaction.owner_id).await?,
            }
        } else {
            Settlement::Failed
        };

        let reconciliation = match self.ledger.settle(reference.as_str(), settlement).await? {
            SettleOutcome::AlreadyProcessed(transaction) => {
                Reconciliation::AlreadyProcessed { transaction }
            }
            SettleOutcome::Settled { transaction, bonus }
                if transaction.status == TransactionStatus::Completed =>
            {
                Reconciliation::Completed { transaction, bonus }
            }
            SettleOutcome::Settled { transaction, .. } => Reconciliation::Failed { transaction },
        };

        let tx = reconciliation.transaction();
        tracing::info!(
            %reference,
            user_id = tx.owner_id,
            transaction_id = tx.id,
            outcome = reconciliation.label(),
            "Payment reconciled"
        );
        Ok(self.record(reconciliation))
    }

    async fn is_paid(&self, reference: &PaymentReference) -> PaymentResult<bool> {
        let intent_id = match reference {
            PaymentReference::PaymentIntent(id) => id.clone(),
            PaymentReference::CheckoutSession(id) => {
                let session = self.provider.retrieve_session(id).await?;
                match (session.payment_status, session.payment_intent) {
                    (SessionPaymentStatus::Paid | SessionPaymentStatus::NoPaymentRequired, _) => {
                        return Ok(true);
                    }
                    (SessionPaymentStatus::Unpaid, Some(intent)) => intent,
                    (SessionPaymentStatus::Unpaid, None) => return Ok(false),
                }
            }
        };

        let intent = self.provider.retrieve_payment_intent(&intent_id).await?;
        Ok(intent.status == PaymentIntentStatus::Succeeded)
    }

    async fn referral_for(&self, user_id: UserId) -> PaymentResult<Option<ReferralBonus>> {
        if self.config.referral_bonus_coins <= Decimal::ZERO {
            return Ok(None);
        }
        let referrer = self
            .accounts
            .find_by_id(user_id)
            .await?
            .and_then(|account| account.referred_by);
        Ok(referrer.map(|referrer_id| ReferralBonus {
            referrer_id,
            amount: self.config.referral_bonus_coins,
        }))
    }

    fn record(&self, reconciliation: Reconciliation) -> Reconciliation {
        metrics::counter!("payments_reconciled_total", "outcome" => reconciliation.label())
            .increment(1);
        reconciliation
    }
}
