//! In-memory store.
//!
//! Implements every repository trait over plain collections behind one
//! async mutex, so each trait method is trivially one commit unit. Every
//! method validates before it mutates; a failed call leaves no trace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::repository::{
    AccountRepository, ClassroomRepository, DisputeRepository, LedgerRepository, PayoutRepository,
    PlanRepository,
};
use crate::accounts::{Account, AccountError, AccountResult, NewAccount, UserId};
use crate::classroom::{
    Classroom, ClassroomError, ClassroomFilter, ClassroomId, ClassroomResult, ClassroomStatus,
    NewClassroom, NewSubject, Subject, SubjectId, Transition, payment_reference,
};
use crate::dispute::{
    Dispute, DisputeError, DisputeFilter, DisputeId, DisputeResult, DisputeStatus, NewDispute,
};
use crate::payment::{FundingPlan, NewFundingPlan, PaymentResult, PlanId};
use crate::payout::{
    NewPayoutRequest, PayoutError, PayoutFilter, PayoutId, PayoutRequest, PayoutResult,
    PayoutStatus, SettlementLock,
};
use crate::wallet::{
    Direction, PendingTransaction, Posting, SettleOutcome, Settlement, Transaction,
    TransactionFilter, TransactionId, TransactionStatus, TransactionType, Wallet, WalletError,
    WalletResult,
};

#[derive(Default)]
struct State {
    accounts: BTreeMap<UserId, (Account, String)>,
    wallets: HashMap<UserId, Wallet>,
    transactions: BTreeMap<TransactionId, Transaction>,
    plans: BTreeMap<PlanId, FundingPlan>,
    subjects: BTreeMap<SubjectId, Subject>,
    classrooms: BTreeMap<ClassroomId, Classroom>,
    payouts: BTreeMap<PayoutId, PayoutRequest>,
    disputes: BTreeMap<DisputeId, Dispute>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn reference_taken(&self, reference: &str) -> bool {
        self.transactions
            .values()
            .any(|tx| tx.reference.as_deref() == Some(reference))
    }

    /// Everything `apply_posting` would reject
    fn check_posting(&self, posting: &Posting, reference: Option<&str>) -> WalletResult<()> {
        if posting.amount <= Decimal::ZERO {
            return Err(WalletError::InvalidAmount(posting.amount));
        }
        if let Some(reference) = reference
            && self.reference_taken(reference)
        {
            return Err(WalletError::DuplicateReference(reference.to_string()));
        }
        if posting.direction == Direction::Debit {
            self.check_available(posting.user_id, posting.amount)?;
        }
        Ok(())
    }

    fn check_available(&self, user_id: UserId, amount: Decimal) -> WalletResult<()> {
        let wallet = self
            .wallets
            .get(&user_id)
            .ok_or(WalletError::WalletNotFound(user_id))?;
        if wallet.available() < amount {
            return Err(WalletError::InsufficientBalance {
                user_id,
                available: wallet.available(),
                required: amount,
            });
        }
        Ok(())
    }

    /// Move the balance and append the completed transaction; call
    /// `check_posting` first
    fn apply_posting(&mut self, posting: &Posting, reference: Option<String>) -> Transaction {
        let now = Utc::now();
        let wallet = self
            .wallets
            .entry(posting.user_id)
            .or_insert_with(|| Wallet::empty(posting.user_id));
        wallet.balance += posting.direction.signed(posting.amount);
        wallet.updated_at = now;

        let id = self.next_id();
        let transaction = Transaction {
            id,
            owner_id: posting.user_id,
            transaction_type: posting.transaction_type,
            direction: posting.direction,
            amount: posting.amount,
            status: TransactionStatus::Completed,
            narration: posting.narration.clone(),
            reference,
            created_at: now,
            updated_at: now,
        };
        self.transactions.insert(id, transaction.clone());
        transaction
    }

    fn open_pending(&mut self, pending: &PendingTransaction) -> WalletResult<Transaction> {
        if pending.amount <= Decimal::ZERO {
            return Err(WalletError::InvalidAmount(pending.amount));
        }
        if self.reference_taken(&pending.reference) {
            return Err(WalletError::DuplicateReference(pending.reference.clone()));
        }

        let now = Utc::now();
        let id = self.next_id();
        let transaction = Transaction {
            id,
            owner_id: pending.owner_id,
            transaction_type: pending.transaction_type,
            direction: pending.direction,
            amount: pending.amount,
            status: TransactionStatus::Pending,
            narration: pending.narration.clone(),
            reference: Some(pending.reference.clone()),
            created_at: now,
            updated_at: now,
        };
        self.transactions.insert(id, transaction.clone());
        Ok(transaction)
    }
}

fn page<T>(items: impl Iterator<Item = T>, (limit, offset): (i64, i64)) -> Vec<T> {
    items
        .skip(usize::try_from(offset).unwrap_or(0))
        .take(usize::try_from(limit).unwrap_or(0))
        .collect()
}

/// In-memory implementation of every repository trait
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    settlement: Arc<Mutex<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn insert_account(&self, account: &NewAccount) -> AccountResult<Account> {
        let mut state = self.state.lock().await;
        if state
            .accounts
            .values()
            .any(|(existing, _)| existing.email == account.email)
        {
            return Err(AccountError::EmailTaken);
        }

        let id = state.next_id();
        let created = Account {
            id,
            email: account.email.clone(),
            display_name: account.display_name.clone(),
            role: account.role,
            parent_id: None,
            referred_by: account.referred_by,
            connect_account_id: None,
            created_at: Utc::now(),
        };
        state
            .accounts
            .insert(id, (created.clone(), account.password_hash.clone()));
        state.wallets.insert(id, Wallet::empty(id));
        Ok(created)
    }

    async fn find_by_id(&self, user_id: UserId) -> AccountResult<Option<Account>> {
        let state = self.state.lock().await;
        Ok(state.accounts.get(&user_id).map(|(a, _)| a.clone()))
    }

    async fn find_credentials(&self, email: &str) -> AccountResult<Option<(Account, String)>> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .find(|(account, _)| account.email == email)
            .cloned())
    }

    async fn set_parent(&self, student_id: UserId, parent_id: UserId) -> AccountResult<()> {
        let mut state = self.state.lock().await;
        let (student, _) = state
            .accounts
            .get_mut(&student_id)
            .ok_or(AccountError::NotFound(student_id))?;
        student.parent_id = Some(parent_id);
        Ok(())
    }

    async fn set_connect_account(
        &self,
        user_id: UserId,
        connect_account: &str,
    ) -> AccountResult<()> {
        let mut state = self.state.lock().await;
        let (account, _) = state
            .accounts
            .get_mut(&user_id)
            .ok_or(AccountError::NotFound(user_id))?;
        account.connect_account_id = Some(connect_account.to_string());
        Ok(())
    }

    async fn delete_account(&self, user_id: UserId) -> AccountResult<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.accounts.remove(&user_id).is_none() {
            return Err(AccountError::NotFound(user_id));
        }

        for (account, _) in state.accounts.values_mut() {
            if account.parent_id == Some(user_id) {
                account.parent_id = None;
            }
            if account.referred_by == Some(user_id) {
                account.referred_by = None;
            }
        }
        for classroom in state.classrooms.values_mut() {
            for reference in [
                &mut classroom.tutor_id,
                &mut classroom.student_id,
                &mut classroom.payer_id,
            ] {
                if *reference == Some(user_id) {
                    *reference = None;
                }
            }
        }
        for dispute in state.disputes.values_mut() {
            if dispute.submitter_id == Some(user_id) {
                dispute.submitter_id = None;
            }
        }
        // Subjects are owned by the tutor
        state.subjects.retain(|_, subject| subject.tutor_id != user_id);
        for classroom in state.classrooms.values_mut() {
            if classroom
                .subject_id
                .is_some_and(|id| !state.subjects.contains_key(&id))
            {
                classroom.subject_id = None;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn get_wallet(&self, user_id: UserId) -> WalletResult<Wallet> {
        let state = self.state.lock().await;
        state
            .wallets
            .get(&user_id)
            .cloned()
            .ok_or(WalletError::WalletNotFound(user_id))
    }

    async fn post(&self, posting: &Posting) -> WalletResult<Transaction> {
        let mut state = self.state.lock().await;
        state.check_posting(posting, posting.reference.as_deref())?;
        Ok(state.apply_posting(posting, posting.reference.clone()))
    }

    async fn open_pending(&self, pending: &PendingTransaction) -> WalletResult<Transaction> {
        let mut state = self.state.lock().await;
        state.open_pending(pending)
    }

    async fn find_by_reference(&self, reference: &str) -> WalletResult<Option<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .find(|tx| tx.reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn settle(
        &self,
        reference: &str,
        settlement: Settlement,
    ) -> WalletResult<SettleOutcome> {
        let mut state = self.state.lock().await;
        let current = state
            .transactions
            .values()
            .find(|tx| tx.reference.as_deref() == Some(reference))
            .cloned()
            .ok_or_else(|| WalletError::TransactionNotFound(reference.to_string()))?;

        if current.status != TransactionStatus::Pending {
            return Ok(SettleOutcome::AlreadyProcessed(current));
        }

        let now = Utc::now();
        match settlement {
            Settlement::Failed => {
                let tx = state
                    .transactions
                    .get_mut(&current.id)
                    .ok_or_else(|| WalletError::TransactionNotFound(reference.to_string()))?;
                tx.status = TransactionStatus::Failed;
                tx.updated_at = now;
                Ok(SettleOutcome::Settled {
                    transaction: tx.clone(),
                    bonus: None,
                })
            }
            Settlement::Completed { referral } => {
                if current.direction == Direction::Debit {
                    state.check_available(current.owner_id, current.amount)?;
                }
                let first_funding = current.transaction_type == TransactionType::FundWallet
                    && !state.transactions.values().any(|tx| {
                        tx.id != current.id
                            && tx.owner_id == current.owner_id
                            && tx.transaction_type == TransactionType::FundWallet
                            && tx.status == TransactionStatus::Completed
                    });

                let wallet = state
                    .wallets
                    .entry(current.owner_id)
                    .or_insert_with(|| Wallet::empty(current.owner_id));
                wallet.balance += current.direction.signed(current.amount);
                wallet.updated_at = now;

                let transaction = {
                    let tx = state
                        .transactions
                        .get_mut(&current.id)
                        .ok_or_else(|| WalletError::TransactionNotFound(reference.to_string()))?;
                    tx.status = TransactionStatus::Completed;
                    tx.updated_at = now;
                    tx.clone()
                };

                let bonus = match referral {
                    Some(bonus) if first_funding && bonus.amount > Decimal::ZERO => {
                        let posting = Posting::credit(
                            bonus.referrer_id,
                            bonus.amount,
                            TransactionType::Bonus,
                            format!("Referral bonus for user {}", current.owner_id),
                        );
                        Some(state.apply_posting(&posting, None))
                    }
                    _ => None,
                };

                Ok(SettleOutcome::Settled { transaction, bonus })
            }
        }
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> WalletResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        Ok(page(
            state
                .transactions
                .values()
                .rev()
                .filter(|tx| filter.matches(tx))
                .cloned(),
            filter.page(),
        ))
    }

    async fn completed_sum(&self, user_id: UserId) -> WalletResult<Decimal> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .filter(|tx| tx.owner_id == user_id)
            .map(Transaction::signed_amount)
            .sum())
    }
}

#[async_trait]
impl PlanRepository for MemoryStore {
    async fn insert_plan(&self, plan: &NewFundingPlan) -> PaymentResult<FundingPlan> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let created = FundingPlan {
            id,
            name: plan.name.clone(),
            coins: plan.coins,
            price_eur: plan.price_eur,
        };
        state.plans.insert(id, created.clone());
        Ok(created)
    }

    async fn get_plan(&self, plan_id: PlanId) -> PaymentResult<Option<FundingPlan>> {
        let state = self.state.lock().await;
        Ok(state.plans.get(&plan_id).cloned())
    }

    async fn list_plans(&self) -> PaymentResult<Vec<FundingPlan>> {
        let state = self.state.lock().await;
        let mut plans: Vec<_> = state.plans.values().cloned().collect();
        plans.sort_by(|a, b| a.price_eur.cmp(&b.price_eur).then(a.id.cmp(&b.id)));
        Ok(plans)
    }
}

#[async_trait]
impl ClassroomRepository for MemoryStore {
    async fn insert_subject(&self, subject: &NewSubject) -> ClassroomResult<Subject> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let created = Subject {
            id,
            tutor_id: subject.tutor_id,
            name: subject.name.clone(),
            price: subject.price,
        };
        state.subjects.insert(id, created.clone());
        Ok(created)
    }

    async fn get_subject(&self, subject_id: SubjectId) -> ClassroomResult<Option<Subject>> {
        let state = self.state.lock().await;
        Ok(state.subjects.get(&subject_id).cloned())
    }

    async fn list_subjects(&self, tutor_id: UserId) -> ClassroomResult<Vec<Subject>> {
        let state = self.state.lock().await;
        Ok(state
            .subjects
            .values()
            .filter(|s| s.tutor_id == tutor_id)
            .cloned()
            .collect())
    }

    async fn insert_classroom(
        &self,
        classroom: &NewClassroom,
        debit: Option<&Posting>,
    ) -> ClassroomResult<Classroom> {
        let mut state = self.state.lock().await;
        if let Some(posting) = debit {
            state.check_posting(posting, None)?;
        }

        let id = state.next_id();
        let payment_id = debit.map(|posting| {
            let reference = posting.reference.clone().unwrap_or(payment_reference(id));
            state.apply_posting(posting, Some(reference)).id
        });

        let now = Utc::now();
        let created = Classroom {
            id,
            name: classroom.name.clone(),
            description: classroom.description.clone(),
            tutor_id: Some(classroom.tutor_id),
            student_id: Some(classroom.student_id),
            payer_id: Some(classroom.payer_id),
            subject_id: Some(classroom.subject_id),
            start_time: classroom.start_time,
            end_time: classroom.end_time,
            amount: classroom.amount,
            status: ClassroomStatus::New,
            meeting_link: None,
            decline_reason: None,
            payment_id,
            accepted_at: None,
            created_at: now,
            updated_at: now,
        };
        state.classrooms.insert(id, created.clone());
        Ok(created)
    }

    async fn get_classroom(&self, classroom_id: ClassroomId) -> ClassroomResult<Option<Classroom>> {
        let state = self.state.lock().await;
        Ok(state.classrooms.get(&classroom_id).cloned())
    }

    async fn list_classrooms(&self, filter: &ClassroomFilter) -> ClassroomResult<Vec<Classroom>> {
        let state = self.state.lock().await;
        let mut classrooms: Vec<_> = state
            .classrooms
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        classrooms.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        Ok(page(classrooms.into_iter(), filter.page()))
    }

    async fn transition(
        &self,
        classroom_id: ClassroomId,
        transition: &Transition,
    ) -> ClassroomResult<Classroom> {
        let mut state = self.state.lock().await;
        let current = state
            .classrooms
            .get(&classroom_id)
            .ok_or(ClassroomError::NotFound(classroom_id))?;
        if current.status != transition.from || !transition.from.can_transition_to(transition.to)
        {
            return Err(ClassroomError::InvalidTransition {
                from: current.status,
                to: transition.to,
            });
        }
        for posting in [&transition.debit, &transition.credit].into_iter().flatten() {
            state.check_posting(posting, posting.reference.as_deref())?;
        }

        let payment_id = transition
            .debit
            .as_ref()
            .map(|posting| state.apply_posting(posting, posting.reference.clone()).id);
        if let Some(posting) = &transition.credit {
            state.apply_posting(posting, posting.reference.clone());
        }

        let classroom = state
            .classrooms
            .get_mut(&classroom_id)
            .ok_or(ClassroomError::NotFound(classroom_id))?;
        classroom.status = transition.to;
        if transition.meeting_link.is_some() {
            classroom.meeting_link = transition.meeting_link.clone();
        }
        if transition.decline_reason.is_some() {
            classroom.decline_reason = transition.decline_reason.clone();
        }
        if transition.accepted_at.is_some() {
            classroom.accepted_at = transition.accepted_at;
        }
        if payment_id.is_some() {
            classroom.payment_id = payment_id;
        }
        classroom.updated_at = Utc::now();
        Ok(classroom.clone())
    }

    async fn due_for_completion(&self, now: DateTime<Utc>) -> ClassroomResult<Vec<Classroom>> {
        let state = self.state.lock().await;
        Ok(state
            .classrooms
            .values()
            .filter(|c| c.status == ClassroomStatus::Accepted && c.end_time <= now)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PayoutRepository for MemoryStore {
    async fn insert_request(&self, request: &NewPayoutRequest) -> PayoutResult<PayoutRequest> {
        let mut state = self.state.lock().await;
        state.check_available(request.tutor_id, request.coins)?;

        let now = Utc::now();
        let wallet = state
            .wallets
            .get_mut(&request.tutor_id)
            .ok_or(WalletError::WalletNotFound(request.tutor_id))?;
        wallet.pending += request.coins;
        wallet.updated_at = now;

        let id = state.next_id();
        let created = PayoutRequest {
            id,
            tutor_id: request.tutor_id,
            bank_account: request.bank_account.clone(),
            coins: request.coins,
            amount_eur: request.amount_eur,
            status: PayoutStatus::Pending,
            transfer_reference: None,
            payout_reference: None,
            withdrawal_id: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        };
        state.payouts.insert(id, created.clone());
        Ok(created)
    }

    async fn get_request(&self, payout_id: PayoutId) -> PayoutResult<Option<PayoutRequest>> {
        let state = self.state.lock().await;
        Ok(state.payouts.get(&payout_id).cloned())
    }

    async fn list_requests(&self, filter: &PayoutFilter) -> PayoutResult<Vec<PayoutRequest>> {
        let state = self.state.lock().await;
        Ok(page(
            state
                .payouts
                .values()
                .rev()
                .filter(|r| filter.matches(r))
                .cloned(),
            filter.page(),
        ))
    }

    async fn try_lock_settlement(&self) -> PayoutResult<Option<SettlementLock>> {
        Ok(self
            .settlement
            .clone()
            .try_lock_owned()
            .ok()
            .map(SettlementLock::new))
    }

    async fn settleable(&self, pending_since: DateTime<Utc>) -> PayoutResult<Vec<PayoutRequest>> {
        let state = self.state.lock().await;
        Ok(state
            .payouts
            .values()
            .filter(|r| match r.status {
                PayoutStatus::Transferred => true,
                PayoutStatus::Pending => r.created_at >= pending_since,
                _ => false,
            })
            .cloned()
            .collect())
    }

    async fn expire_pending(&self, cutoff: DateTime<Utc>) -> PayoutResult<Vec<PayoutRequest>> {
        let mut state = self.state.lock().await;
        let stale: Vec<PayoutRequest> = state
            .payouts
            .values()
            .filter(|r| r.status == PayoutStatus::Pending && r.created_at < cutoff)
            .cloned()
            .collect();
        for request in &stale {
            let wallet = state
                .wallets
                .get(&request.tutor_id)
                .ok_or(WalletError::WalletNotFound(request.tutor_id))?;
            if wallet.pending < request.coins {
                return Err(PayoutError::InvalidRecord(format!(
                    "wallet {} does not hold the reserved coins for payout {}",
                    request.tutor_id, request.id
                )));
            }
        }

        let now = Utc::now();
        let mut expired = Vec::with_capacity(stale.len());
        for request in stale {
            if let Some(wallet) = state.wallets.get_mut(&request.tutor_id) {
                wallet.pending -= request.coins;
                wallet.updated_at = now;
            }
            if let Some(stored) = state.payouts.get_mut(&request.id) {
                stored.status = PayoutStatus::Expired;
                stored.last_error = Some("payout window elapsed".to_string());
                stored.updated_at = now;
                expired.push(stored.clone());
            }
        }
        Ok(expired)
    }

    async fn claim(&self, payout_id: PayoutId, from: PayoutStatus) -> PayoutResult<bool> {
        let mut state = self.state.lock().await;
        let request = state
            .payouts
            .get_mut(&payout_id)
            .ok_or(PayoutError::NotFound(payout_id))?;
        if request.status != from {
            return Ok(false);
        }
        request.status = PayoutStatus::Processing;
        request.updated_at = Utc::now();
        Ok(true)
    }

    async fn release(
        &self,
        payout_id: PayoutId,
        to: PayoutStatus,
        error: &str,
    ) -> PayoutResult<()> {
        let mut state = self.state.lock().await;
        let request = state
            .payouts
            .get_mut(&payout_id)
            .ok_or(PayoutError::NotFound(payout_id))?;
        if request.status == PayoutStatus::Processing {
            request.status = to;
            request.last_error = Some(error.to_string());
            request.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_transfer(
        &self,
        payout_id: PayoutId,
        transfer_reference: &str,
        withdrawal: &PendingTransaction,
    ) -> PayoutResult<PayoutRequest> {
        let mut state = self.state.lock().await;
        let status = state
            .payouts
            .get(&payout_id)
            .map(|r| r.status)
            .ok_or(PayoutError::NotFound(payout_id))?;
        if status != PayoutStatus::Processing {
            return Err(PayoutError::NotClaimed(payout_id));
        }

        let transaction = state.open_pending(withdrawal)?;
        let request = state
            .payouts
            .get_mut(&payout_id)
            .ok_or(PayoutError::NotFound(payout_id))?;
        request.status = PayoutStatus::Transferred;
        request.transfer_reference = Some(transfer_reference.to_string());
        request.withdrawal_id = Some(transaction.id);
        request.last_error = None;
        request.updated_at = Utc::now();
        Ok(request.clone())
    }

    async fn finalize(
        &self,
        payout_id: PayoutId,
        payout_reference: &str,
    ) -> PayoutResult<PayoutRequest> {
        let mut state = self.state.lock().await;
        let request = state
            .payouts
            .get(&payout_id)
            .cloned()
            .ok_or(PayoutError::NotFound(payout_id))?;
        if request.status != PayoutStatus::Processing {
            return Err(PayoutError::NotClaimed(payout_id));
        }
        let withdrawal_id = request.withdrawal_id.ok_or_else(|| {
            PayoutError::InvalidRecord(format!("payout {payout_id} has no withdrawal"))
        })?;
        let wallet = state
            .wallets
            .get(&request.tutor_id)
            .ok_or(WalletError::WalletNotFound(request.tutor_id))?;
        if wallet.balance < request.coins || wallet.pending < request.coins {
            return Err(PayoutError::InvalidRecord(format!(
                "wallet {} does not hold the reserved coins for payout {payout_id}",
                request.tutor_id
            )));
        }

        let now = Utc::now();
        let tx = state
            .transactions
            .get_mut(&withdrawal_id)
            .ok_or_else(|| WalletError::TransactionNotFound(withdrawal_id.to_string()))?;
        tx.status = TransactionStatus::Completed;
        tx.updated_at = now;

        if let Some(wallet) = state.wallets.get_mut(&request.tutor_id) {
            wallet.balance -= request.coins;
            wallet.pending -= request.coins;
            wallet.updated_at = now;
        }

        let request = state
            .payouts
            .get_mut(&payout_id)
            .ok_or(PayoutError::NotFound(payout_id))?;
        request.status = PayoutStatus::Processed;
        request.payout_reference = Some(payout_reference.to_string());
        request.last_error = None;
        request.processed_at = Some(now);
        request.updated_at = now;
        Ok(request.clone())
    }
}

#[async_trait]
impl DisputeRepository for MemoryStore {
    async fn insert_dispute(&self, dispute: &NewDispute) -> DisputeResult<Dispute> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let created = Dispute {
            id,
            submitter_id: Some(dispute.submitter_id),
            kind: dispute.kind,
            content: dispute.content.clone(),
            status: DisputeStatus::Open,
            resolution: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        state.disputes.insert(id, created.clone());
        Ok(created)
    }

    async fn get_dispute(&self, dispute_id: DisputeId) -> DisputeResult<Option<Dispute>> {
        let state = self.state.lock().await;
        Ok(state.disputes.get(&dispute_id).cloned())
    }

    async fn list_disputes(&self, filter: &DisputeFilter) -> DisputeResult<Vec<Dispute>> {
        let state = self.state.lock().await;
        Ok(page(
            state
                .disputes
                .values()
                .rev()
                .filter(|d| filter.matches(d))
                .cloned(),
            filter.page(),
        ))
    }

    async fn resolve_dispute(
        &self,
        dispute_id: DisputeId,
        resolution: &str,
        resolved_at: DateTime<Utc>,
    ) -> DisputeResult<Dispute> {
        let mut state = self.state.lock().await;
        let dispute = state
            .disputes
            .get_mut(&dispute_id)
            .ok_or(DisputeError::NotFound(dispute_id))?;
        if dispute.status == DisputeStatus::Resolved {
            return Err(DisputeError::AlreadyResolved(dispute_id));
        }
        dispute.status = DisputeStatus::Resolved;
        dispute.resolution = Some(resolution.to_string());
        dispute.resolved_at = Some(resolved_at);
        Ok(dispute.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::Role;
    use crate::wallet::ReferralBonus;
    use rust_decimal::dec;

    async fn account(store: &MemoryStore, email: &str) -> Account {
        store
            .insert_account(&NewAccount {
                email: email.to_string(),
                display_name: "Test User".to_string(),
                role: Role::Parent,
                password_hash: "hash".to_string(),
                referred_by: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_registration_creates_empty_wallet() {
        let store = MemoryStore::new();
        let user = account(&store, "ada@example.com").await;

        let wallet = store.get_wallet(user.id).await.unwrap();
        assert_eq!(wallet.balance, Decimal::ZERO);
        assert_eq!(wallet.pending, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_rejected() {
        let store = MemoryStore::new();
        account(&store, "ada@example.com").await;
        let err = store
            .insert_account(&NewAccount {
                email: "ada@example.com".to_string(),
                display_name: "Other".to_string(),
                role: Role::Student,
                password_hash: "hash".to_string(),
                referred_by: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::EmailTaken));
    }

    #[tokio::test]
    async fn test_failed_debit_writes_nothing() {
        let store = MemoryStore::new();
        let user = account(&store, "ada@example.com").await;
        store
            .post(&Posting::credit(user.id, dec!(5), TransactionType::Bonus, "seed"))
            .await
            .unwrap();

        let err = store
            .post(&Posting::debit(
                user.id,
                dec!(6),
                TransactionType::CoursePayment,
                "too much",
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InsufficientBalance { .. }));

        let all = store
            .list_transactions(&TransactionFilter::for_owner(user.id))
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(store.get_wallet(user.id).await.unwrap().balance, dec!(5));
    }

    #[tokio::test]
    async fn test_settle_is_exactly_once() {
        let store = MemoryStore::new();
        let referrer = account(&store, "ref@example.com").await;
        let user = account(&store, "ada@example.com").await;
        store
            .open_pending(&PendingTransaction {
                owner_id: user.id,
                transaction_type: TransactionType::FundWallet,
                direction: Direction::Credit,
                amount: dec!(40),
                narration: "Starter pack".to_string(),
                reference: "cs_test_1".to_string(),
            })
            .await
            .unwrap();

        let settlement = Settlement::Completed {
            referral: Some(ReferralBonus {
                referrer_id: referrer.id,
                amount: dec!(5),
            }),
        };
        let first = store.settle("cs_test_1", settlement.clone()).await.unwrap();
        assert!(matches!(
            first,
            SettleOutcome::Settled {
                bonus: Some(_),
                ..
            }
        ));

        let second = store.settle("cs_test_1", settlement).await.unwrap();
        assert!(matches!(second, SettleOutcome::AlreadyProcessed(_)));
        assert_eq!(store.get_wallet(user.id).await.unwrap().balance, dec!(40));
        assert_eq!(store.get_wallet(referrer.id).await.unwrap().balance, dec!(5));
    }

    #[tokio::test]
    async fn test_duplicate_reference_is_rejected() {
        let store = MemoryStore::new();
        let user = account(&store, "ada@example.com").await;
        let pending = PendingTransaction {
            owner_id: user.id,
            transaction_type: TransactionType::FundWallet,
            direction: Direction::Credit,
            amount: dec!(10),
            narration: "Pack".to_string(),
            reference: "cs_dup".to_string(),
        };
        store.open_pending(&pending).await.unwrap();
        let err = store.open_pending(&pending).await.unwrap_err();
        assert!(matches!(err, WalletError::DuplicateReference(_)));
    }
}
