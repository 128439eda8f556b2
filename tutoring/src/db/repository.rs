//! Repository trait definitions.
//!
//! The managers only talk to storage through these traits. Each method is
//! one commit unit: when a method both changes a status and moves coins,
//! either all of it is observable afterwards or none of it is.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::accounts::{Account, AccountResult, NewAccount, UserId};
use crate::classroom::{
    Classroom, ClassroomFilter, ClassroomId, ClassroomResult, NewClassroom, NewSubject, Subject,
    SubjectId, Transition,
};
use crate::dispute::{Dispute, DisputeFilter, DisputeId, DisputeResult, NewDispute};
use crate::payment::{FundingPlan, NewFundingPlan, PaymentResult, PlanId};
use crate::payout::{
    NewPayoutRequest, PayoutFilter, PayoutId, PayoutRequest, PayoutResult, PayoutStatus,
    SettlementLock,
};
use crate::wallet::{
    PendingTransaction, Posting, SettleOutcome, Settlement, Transaction, TransactionFilter,
    Wallet, WalletResult,
};

/// Account storage
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Insert an account together with its empty wallet
    ///
    /// Fails with `AccountError::EmailTaken` on a duplicate email.
    async fn insert_account(&self, account: &NewAccount) -> AccountResult<Account>;

    async fn find_by_id(&self, user_id: UserId) -> AccountResult<Option<Account>>;

    /// Account and password hash for a (normalised) email
    async fn find_credentials(&self, email: &str) -> AccountResult<Option<(Account, String)>>;

    async fn set_parent(&self, student_id: UserId, parent_id: UserId) -> AccountResult<()>;

    async fn set_connect_account(&self, user_id: UserId, connect_account: &str)
    -> AccountResult<()>;

    /// Delete an account; wallets and transactions stay, classroom and
    /// dispute references to it become null
    async fn delete_account(&self, user_id: UserId) -> AccountResult<()>;
}

/// Wallets and the transaction log
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn get_wallet(&self, user_id: UserId) -> WalletResult<Wallet>;

    /// Apply a posting and record it as one completed transaction
    ///
    /// Debits fail with `WalletError::InsufficientBalance` when the
    /// available balance is below the amount; nothing is written then.
    async fn post(&self, posting: &Posting) -> WalletResult<Transaction>;

    /// Open a pending transaction; the balance is untouched until it settles
    async fn open_pending(&self, pending: &PendingTransaction) -> WalletResult<Transaction>;

    async fn find_by_reference(&self, reference: &str) -> WalletResult<Option<Transaction>>;

    /// Settle the pending transaction carrying `reference` exactly once
    ///
    /// Returns `SettleOutcome::AlreadyProcessed` when it is no longer
    /// pending. On completion the amount and any referral bonus are
    /// applied in the same commit as the status change.
    async fn settle(&self, reference: &str, settlement: Settlement)
    -> WalletResult<SettleOutcome>;

    async fn list_transactions(&self, filter: &TransactionFilter)
    -> WalletResult<Vec<Transaction>>;

    /// Signed sum of the user's completed transactions
    async fn completed_sum(&self, user_id: UserId) -> WalletResult<Decimal>;
}

/// Funding plans
#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn insert_plan(&self, plan: &NewFundingPlan) -> PaymentResult<FundingPlan>;

    async fn get_plan(&self, plan_id: PlanId) -> PaymentResult<Option<FundingPlan>>;

    async fn list_plans(&self) -> PaymentResult<Vec<FundingPlan>>;
}

/// Subjects and classrooms
#[async_trait]
pub trait ClassroomRepository: Send + Sync {
    async fn insert_subject(&self, subject: &NewSubject) -> ClassroomResult<Subject>;

    async fn get_subject(&self, subject_id: SubjectId) -> ClassroomResult<Option<Subject>>;

    async fn list_subjects(&self, tutor_id: UserId) -> ClassroomResult<Vec<Subject>>;

    /// Insert a classroom in `new` state, applying `debit` in the same commit
    ///
    /// The debit's transaction becomes the classroom's `payment_id`.
    async fn insert_classroom(
        &self,
        classroom: &NewClassroom,
        debit: Option<&Posting>,
    ) -> ClassroomResult<Classroom>;

    async fn get_classroom(&self, classroom_id: ClassroomId) -> ClassroomResult<Option<Classroom>>;

    async fn list_classrooms(&self, filter: &ClassroomFilter) -> ClassroomResult<Vec<Classroom>>;

    /// Compare-and-set the status from `transition.from` to `transition.to`
    ///
    /// Fails with `ClassroomError::InvalidTransition` (carrying the current
    /// status) when the classroom is no longer in `transition.from`. The
    /// transition's postings are applied in the same commit.
    async fn transition(
        &self,
        classroom_id: ClassroomId,
        transition: &Transition,
    ) -> ClassroomResult<Classroom>;

    /// Accepted classrooms whose end time is at or before `now`
    async fn due_for_completion(&self, now: DateTime<Utc>) -> ClassroomResult<Vec<Classroom>>;
}

/// Payout requests
#[async_trait]
pub trait PayoutRepository: Send + Sync {
    /// Insert a request and reserve its coins in the tutor's `wallet.pending`
    async fn insert_request(&self, request: &NewPayoutRequest) -> PayoutResult<PayoutRequest>;

    async fn get_request(&self, payout_id: PayoutId) -> PayoutResult<Option<PayoutRequest>>;

    async fn list_requests(&self, filter: &PayoutFilter) -> PayoutResult<Vec<PayoutRequest>>;

    /// Take the settlement lock; `None` while another run holds it
    async fn try_lock_settlement(&self) -> PayoutResult<Option<SettlementLock>>;

    /// Every transferred request plus pending requests created at or after
    /// `pending_since`, oldest first
    async fn settleable(&self, pending_since: DateTime<Utc>) -> PayoutResult<Vec<PayoutRequest>>;

    /// `pending -> expired` for requests created before `cutoff`, releasing
    /// each reservation from `wallet.pending` in the same commit
    async fn expire_pending(&self, cutoff: DateTime<Utc>) -> PayoutResult<Vec<PayoutRequest>>;

    /// Compare-and-set `from -> processing`; false when somebody else got there first
    async fn claim(&self, payout_id: PayoutId, from: PayoutStatus) -> PayoutResult<bool>;

    /// Return a claimed request to `to`, recording why
    async fn release(&self, payout_id: PayoutId, to: PayoutStatus, error: &str)
    -> PayoutResult<()>;

    /// `processing -> transferred`, opening the pending withdrawal in the same commit
    async fn record_transfer(
        &self,
        payout_id: PayoutId,
        transfer_reference: &str,
        withdrawal: &PendingTransaction,
    ) -> PayoutResult<PayoutRequest>;

    /// `processing -> processed`; completes the withdrawal and takes the
    /// coins out of both `balance` and `pending` in the same commit
    async fn finalize(&self, payout_id: PayoutId, payout_reference: &str)
    -> PayoutResult<PayoutRequest>;
}

/// Disputes
#[async_trait]
pub trait DisputeRepository: Send + Sync {
    async fn insert_dispute(&self, dispute: &NewDispute) -> DisputeResult<Dispute>;

    async fn get_dispute(&self, dispute_id: DisputeId) -> DisputeResult<Option<Dispute>>;

    async fn list_disputes(&self, filter: &DisputeFilter) -> DisputeResult<Vec<Dispute>>;

    /// Compare-and-set `open -> resolved`
    async fn resolve_dispute(
        &self,
        dispute_id: DisputeId,
        resolution: &str,
        resolved_at: DateTime<Utc>,
    ) -> DisputeResult<Dispute>;
}
