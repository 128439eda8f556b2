//! PostgreSQL implementation of the repository traits.
//!
//! Balance changes are conditional `UPDATE ... RETURNING` statements, so the
//! sufficiency check and the decrement cannot be split by a concurrent
//! request. Status changes lock the row (`FOR UPDATE`) and compare the
//! current status before writing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

use super::repository::{
    AccountRepository, ClassroomRepository, DisputeRepository, LedgerRepository, PayoutRepository,
    PlanRepository,
};
use crate::accounts::{Account, AccountError, AccountResult, NewAccount, UserId};
use crate::classroom::{
    Classroom, ClassroomError, ClassroomFilter, ClassroomId, ClassroomResult, ClassroomStatus,
    NewClassroom, NewSubject, Subject, SubjectId, Transition, payment_reference,
};
use crate::dispute::{Dispute, DisputeError, DisputeFilter, DisputeId, DisputeResult, NewDispute};
use crate::payment::{FundingPlan, NewFundingPlan, PaymentResult, PlanId};
use crate::payout::{
    NewPayoutRequest, PayoutError, PayoutFilter, PayoutId, PayoutRequest, PayoutResult,
    PayoutStatus, SettlementLock,
};
use crate::wallet::{
    Direction, PendingTransaction, Posting, SettleOutcome, Settlement, Transaction,
    TransactionFilter, TransactionStatus, TransactionType, Wallet, WalletError, WalletResult,
};

const ACCOUNT_COLUMNS: &str =
    "id, email, display_name, role, parent_id, referred_by, connect_account_id, created_at";

const TRANSACTION_COLUMNS: &str = "id, owner_id, transaction_type, direction, amount, status,
     narration, reference, created_at, updated_at";

const CLASSROOM_COLUMNS: &str = "id, name, description, tutor_id, student_id, payer_id,
     subject_id, start_time, end_time, amount, status, meeting_link, decline_reason,
     payment_id, accepted_at, created_at, updated_at";

const PAYOUT_COLUMNS: &str = "id, tutor_id, bank_account, coins, amount_eur, status,
     transfer_reference, payout_reference, withdrawal_id, last_error, created_at,
     updated_at, processed_at";

/// `pg_try_advisory_xact_lock` key serialising settlement runs
const SETTLEMENT_LOCK_KEY: i64 = 0x7475_746f_7270_6179;

const DISPUTE_COLUMNS: &str =
    "id, submitter_id, kind, content, status, resolution, created_at, resolved_at";

/// PostgreSQL store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn account_from_row(row: &PgRow) -> AccountResult<Account> {
    let role: String = row.get("role");
    Ok(Account {
        id: row.get("id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        role: role.parse().map_err(AccountError::InvalidRecord)?,
        parent_id: row.get("parent_id"),
        referred_by: row.get("referred_by"),
        connect_account_id: row.get("connect_account_id"),
        created_at: row.get("created_at"),
    })
}

fn wallet_from_row(row: &PgRow) -> Wallet {
    Wallet {
        user_id: row.get("user_id"),
        balance: row.get("balance"),
        pending: row.get("pending"),
        updated_at: row.get("updated_at"),
    }
}

fn transaction_from_row(row: &PgRow) -> WalletResult<Transaction> {
    let transaction_type: String = row.get("transaction_type");
    let direction: String = row.get("direction");
    let status: String = row.get("status");
    Ok(Transaction {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        transaction_type: transaction_type
            .parse()
            .map_err(WalletError::InvalidRecord)?,
        direction: direction.parse().map_err(WalletError::InvalidRecord)?,
        amount: row.get("amount"),
        status: status.parse().map_err(WalletError::InvalidRecord)?,
        narration: row.get("narration"),
        reference: row.get("reference"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn classroom_from_row(row: &PgRow) -> ClassroomResult<Classroom> {
    let status: String = row.get("status");
    Ok(Classroom {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        tutor_id: row.get("tutor_id"),
        student_id: row.get("student_id"),
        payer_id: row.get("payer_id"),
        subject_id: row.get("subject_id"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        amount: row.get("amount"),
        status: status.parse().map_err(ClassroomError::InvalidRecord)?,
        meeting_link: row.get("meeting_link"),
        decline_reason: row.get("decline_reason"),
        payment_id: row.get("payment_id"),
        accepted_at: row.get("accepted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn subject_from_row(row: &PgRow) -> Subject {
    Subject {
        id: row.get("id"),
        tutor_id: row.get("tutor_id"),
        name: row.get("name"),
        price: row.get("price"),
    }
}

fn plan_from_row(row: &PgRow) -> FundingPlan {
    FundingPlan {
        id: row.get("id"),
        name: row.get("name"),
        coins: row.get("coins"),
        price_eur: row.get("price_eur"),
    }
}

fn payout_from_row(row: &PgRow) -> PayoutResult<PayoutRequest> {
    let status: String = row.get("status");
    Ok(PayoutRequest {
        id: row.get("id"),
        tutor_id: row.get("tutor_id"),
        bank_account: row.get("bank_account"),
        coins: row.get("coins"),
        amount_eur: row.get("amount_eur"),
        status: status.parse().map_err(PayoutError::InvalidRecord)?,
        transfer_reference: row.get("transfer_reference"),
        payout_reference: row.get("payout_reference"),
        withdrawal_id: row.get("withdrawal_id"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        processed_at: row.get("processed_at"),
    })
}

fn dispute_from_row(row: &PgRow) -> DisputeResult<Dispute> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    Ok(Dispute {
        id: row.get("id"),
        submitter_id: row.get("submitter_id"),
        kind: kind.parse().map_err(DisputeError::InvalidRecord)?,
        content: row.get("content"),
        status: status.parse().map_err(DisputeError::InvalidRecord)?,
        resolution: row.get("resolution"),
        created_at: row.get("created_at"),
        resolved_at: row.get("resolved_at"),
    })
}

/// Add `amount` to a wallet, creating it if needed
async fn credit_balance(
    conn: &mut PgConnection,
    user_id: UserId,
    amount: Decimal,
) -> WalletResult<()> {
    sqlx::query(
        "INSERT INTO wallets (user_id, balance, pending, updated_at)
         VALUES ($1, $2, 0, NOW())
         ON CONFLICT (user_id)
         DO UPDATE SET balance = wallets.balance + EXCLUDED.balance, updated_at = NOW()",
    )
    .bind(user_id)
    .bind(amount)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Subtract `amount` from a wallet if its available balance covers it
async fn debit_balance(
    conn: &mut PgConnection,
    user_id: UserId,
    amount: Decimal,
) -> WalletResult<()> {
    let updated = sqlx::query(
        "UPDATE wallets
         SET balance = balance - $1, updated_at = NOW()
         WHERE user_id = $2 AND balance - pending >= $1
         RETURNING balance",
    )
    .bind(amount)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    if updated.is_some() {
        return Ok(());
    }
    Err(shortfall(conn, user_id, amount).await)
}

/// Explain why a conditional wallet update matched no row
async fn shortfall(conn: &mut PgConnection, user_id: UserId, required: Decimal) -> WalletError {
    let row = sqlx::query("SELECT balance - pending AS available FROM wallets WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await;

    match row {
        Ok(Some(row)) => WalletError::InsufficientBalance {
            user_id,
            available: row.get("available"),
            required,
        },
        Ok(None) => WalletError::WalletNotFound(user_id),
        Err(e) => WalletError::Database(e),
    }
}

#[allow(clippy::too_many_arguments)]
async fn insert_transaction(
    conn: &mut PgConnection,
    owner_id: UserId,
    transaction_type: TransactionType,
    direction: Direction,
    amount: Decimal,
    status: TransactionStatus,
    narration: &str,
    reference: Option<&str>,
) -> WalletResult<Transaction> {
    let row = sqlx::query(&format!(
        "INSERT INTO transactions
            (owner_id, transaction_type, direction, amount, status, narration, reference)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {TRANSACTION_COLUMNS}"
    ))
    .bind(owner_id)
    .bind(transaction_type.as_str())
    .bind(direction.as_str())
    .bind(amount)
    .bind(status.as_str())
    .bind(narration)
    .bind(reference)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            WalletError::DuplicateReference(reference.unwrap_or_default().to_string())
        } else {
            WalletError::Database(e)
        }
    })?;

    transaction_from_row(&row)
}

/// Apply a posting and record it, inside the caller's transaction
async fn apply_posting(
    conn: &mut PgConnection,
    posting: &Posting,
    reference: Option<&str>,
) -> WalletResult<Transaction> {
    if posting.amount <= Decimal::ZERO {
        return Err(WalletError::InvalidAmount(posting.amount));
    }
    match posting.direction {
        Direction::Credit => credit_balance(conn, posting.user_id, posting.amount).await?,
        Direction::Debit => debit_balance(conn, posting.user_id, posting.amount).await?,
    }
    insert_transaction(
        conn,
        posting.user_id,
        posting.transaction_type,
        posting.direction,
        posting.amount,
        TransactionStatus::Completed,
        &posting.narration,
        reference,
    )
    .await
}

async fn open_pending_in(
    conn: &mut PgConnection,
    pending: &PendingTransaction,
) -> WalletResult<Transaction> {
    if pending.amount <= Decimal::ZERO {
        return Err(WalletError::InvalidAmount(pending.amount));
    }
    insert_transaction(
        conn,
        pending.owner_id,
        pending.transaction_type,
        pending.direction,
        pending.amount,
        TransactionStatus::Pending,
        &pending.narration,
        Some(&pending.reference),
    )
    .await
}

#[async_trait]
impl AccountRepository for PgStore {
    async fn insert_account(&self, account: &NewAccount) -> AccountResult<Account> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "INSERT INTO accounts (email, display_name, role, password_hash, referred_by)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(&account.email)
        .bind(&account.display_name)
        .bind(account.role.as_str())
        .bind(&account.password_hash)
        .bind(account.referred_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AccountError::EmailTaken
            } else {
                AccountError::Database(e)
            }
        })?;
        let created = account_from_row(&row)?;

        sqlx::query("INSERT INTO wallets (user_id, balance, pending) VALUES ($1, 0, 0)")
            .bind(created.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn find_by_id(&self, user_id: UserId) -> AccountResult<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_credentials(&self, email: &str) -> AccountResult<Option<(Account, String)>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS}, password_hash FROM accounts WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Ok((account_from_row(&r)?, r.get("password_hash"))))
            .transpose()
    }

    async fn set_parent(&self, student_id: UserId, parent_id: UserId) -> AccountResult<()> {
        let result = sqlx::query("UPDATE accounts SET parent_id = $2 WHERE id = $1")
            .bind(student_id)
            .bind(parent_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AccountError::NotFound(student_id));
        }
        Ok(())
    }

    async fn set_connect_account(
        &self,
        user_id: UserId,
        connect_account: &str,
    ) -> AccountResult<()> {
        let result = sqlx::query("UPDATE accounts SET connect_account_id = $2 WHERE id = $1")
            .bind(user_id)
            .bind(connect_account)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AccountError::NotFound(user_id));
        }
        Ok(())
    }

    async fn delete_account(&self, user_id: UserId) -> AccountResult<()> {
        // Foreign keys null classroom and dispute references
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AccountError::NotFound(user_id));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for PgStore {
    async fn get_wallet(&self, user_id: UserId) -> WalletResult<Wallet> {
        let row = sqlx::query(
            "SELECT user_id, balance, pending, updated_at FROM wallets WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(wallet_from_row)
            .ok_or(WalletError::WalletNotFound(user_id))
    }

    async fn post(&self, posting: &Posting) -> WalletResult<Transaction> {
        let mut tx = self.pool.begin().await?;
        let transaction = apply_posting(&mut tx, posting, posting.reference.as_deref()).await?;
        tx.commit().await?;
        Ok(transaction)
    }

    async fn open_pending(&self, pending: &PendingTransaction) -> WalletResult<Transaction> {
        let mut conn = self.pool.acquire().await?;
        open_pending_in(&mut conn, pending).await
    }

    async fn find_by_reference(&self, reference: &str) -> WalletResult<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn settle(
        &self,
        reference: &str,
        settlement: Settlement,
    ) -> WalletResult<SettleOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE reference = $1 FOR UPDATE"
        ))
        .bind(reference)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| WalletError::TransactionNotFound(reference.to_string()))?;
        let current = transaction_from_row(&row)?;

        if current.status != TransactionStatus::Pending {
            return Ok(SettleOutcome::AlreadyProcessed(current));
        }

        let (status, referral) = match settlement {
            Settlement::Failed => (TransactionStatus::Failed, None),
            Settlement::Completed { referral } => (TransactionStatus::Completed, referral),
        };

        let mut bonus = None;
        if status == TransactionStatus::Completed {
            // Serialises concurrent first fundings of the same user
            sqlx::query("SELECT user_id FROM wallets WHERE user_id = $1 FOR UPDATE")
                .bind(current.owner_id)
                .fetch_optional(&mut *tx)
                .await?;

            let prior_funding: bool = sqlx::query(
                "SELECT EXISTS(
                    SELECT 1 FROM transactions
                    WHERE owner_id = $1 AND transaction_type = 'fund_wallet'
                      AND status = 'completed' AND id <> $2
                 ) AS prior",
            )
            .bind(current.owner_id)
            .bind(current.id)
            .fetch_one(&mut *tx)
            .await?
            .get("prior");

            match current.direction {
                Direction::Credit => {
                    credit_balance(&mut tx, current.owner_id, current.amount).await?
                }
                Direction::Debit => {
                    debit_balance(&mut tx, current.owner_id, current.amount).await?
                }
            }

            if let Some(referral) = referral
                && current.transaction_type == TransactionType::FundWallet
                && !prior_funding
                && referral.amount > Decimal::ZERO
            {
                let posting = Posting::credit(
                    referral.referrer_id,
                    referral.amount,
                    TransactionType::Bonus,
                    format!("Referral bonus for user {}", current.owner_id),
                );
                bonus = Some(apply_posting(&mut tx, &posting, None).await?);
            }
        }

        let row = sqlx::query(&format!(
            "UPDATE transactions SET status = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(current.id)
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let transaction = transaction_from_row(&row)?;

        tx.commit().await?;
        Ok(SettleOutcome::Settled { transaction, bonus })
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> WalletResult<Vec<Transaction>> {
        let (limit, offset) = filter.page();
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions
             WHERE ($1::BIGINT IS NULL OR owner_id = $1)
               AND ($2::TEXT IS NULL OR status = $2)
               AND ($3::TEXT IS NULL OR transaction_type = $3)
               AND ($4::TIMESTAMPTZ IS NULL OR created_at >= $4)
               AND ($5::TIMESTAMPTZ IS NULL OR created_at <= $5)
               AND ($6::TEXT IS NULL OR narration ILIKE '%' || $6 || '%'
                    OR reference ILIKE '%' || $6 || '%')
             ORDER BY id DESC
             LIMIT $7 OFFSET $8"
        ))
        .bind(filter.owner_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.transaction_type.map(|t| t.as_str()))
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.search.as_deref().filter(|s| !s.is_empty()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn completed_sum(&self, user_id: UserId) -> WalletResult<Decimal> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(CASE WHEN direction = 'credit' THEN amount ELSE -amount END), 0)
                    AS total
             FROM transactions
             WHERE owner_id = $1 AND status = 'completed'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }
}

#[async_trait]
impl PlanRepository for PgStore {
    async fn insert_plan(&self, plan: &NewFundingPlan) -> PaymentResult<FundingPlan> {
        let row = sqlx::query(
            "INSERT INTO funding_plans (name, coins, price_eur) VALUES ($1, $2, $3)
             RETURNING id, name, coins, price_eur",
        )
        .bind(&plan.name)
        .bind(plan.coins)
        .bind(plan.price_eur)
        .fetch_one(&self.pool)
        .await?;

        Ok(plan_from_row(&row))
    }

    async fn get_plan(&self, plan_id: PlanId) -> PaymentResult<Option<FundingPlan>> {
        let row = sqlx::query("SELECT id, name, coins, price_eur FROM funding_plans WHERE id = $1")
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(plan_from_row))
    }

    async fn list_plans(&self) -> PaymentResult<Vec<FundingPlan>> {
        let rows = sqlx::query(
            "SELECT id, name, coins, price_eur FROM funding_plans ORDER BY price_eur, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(plan_from_row).collect())
    }
}

#[async_trait]
impl ClassroomRepository for PgStore {
    async fn insert_subject(&self, subject: &NewSubject) -> ClassroomResult<Subject> {
        let row = sqlx::query(
            "INSERT INTO subjects (tutor_id, name, price) VALUES ($1, $2, $3)
             RETURNING id, tutor_id, name, price",
        )
        .bind(subject.tutor_id)
        .bind(&subject.name)
        .bind(subject.price)
        .fetch_one(&self.pool)
        .await?;

        Ok(subject_from_row(&row))
    }

    async fn get_subject(&self, subject_id: SubjectId) -> ClassroomResult<Option<Subject>> {
        let row = sqlx::query("SELECT id, tutor_id, name, price FROM subjects WHERE id = $1")
            .bind(subject_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(subject_from_row))
    }

    async fn list_subjects(&self, tutor_id: UserId) -> ClassroomResult<Vec<Subject>> {
        let rows = sqlx::query(
            "SELECT id, tutor_id, name, price FROM subjects WHERE tutor_id = $1 ORDER BY id",
        )
        .bind(tutor_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(subject_from_row).collect())
    }

    async fn insert_classroom(
        &self,
        classroom: &NewClassroom,
        debit: Option<&Posting>,
    ) -> ClassroomResult<Classroom> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "INSERT INTO classrooms
                (name, description, tutor_id, student_id, payer_id, subject_id,
                 start_time, end_time, amount, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'new')
             RETURNING {CLASSROOM_COLUMNS}"
        ))
        .bind(&classroom.name)
        .bind(&classroom.description)
        .bind(classroom.tutor_id)
        .bind(classroom.student_id)
        .bind(classroom.payer_id)
        .bind(classroom.subject_id)
        .bind(classroom.start_time)
        .bind(classroom.end_time)
        .bind(classroom.amount)
        .fetch_one(&mut *tx)
        .await?;
        let mut created = classroom_from_row(&row)?;

        if let Some(posting) = debit {
            let reference = posting
                .reference
                .clone()
                .unwrap_or_else(|| payment_reference(created.id));
            let payment = apply_posting(&mut tx, posting, Some(&reference)).await?;

            let row = sqlx::query(&format!(
                "UPDATE classrooms SET payment_id = $2 WHERE id = $1
                 RETURNING {CLASSROOM_COLUMNS}"
            ))
            .bind(created.id)
            .bind(payment.id)
            .fetch_one(&mut *tx)
            .await?;
            created = classroom_from_row(&row)?;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn get_classroom(&self, classroom_id: ClassroomId) -> ClassroomResult<Option<Classroom>> {
        let row = sqlx::query(&format!(
            "SELECT {CLASSROOM_COLUMNS} FROM classrooms WHERE id = $1"
        ))
        .bind(classroom_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(classroom_from_row).transpose()
    }

    async fn list_classrooms(&self, filter: &ClassroomFilter) -> ClassroomResult<Vec<Classroom>> {
        let (limit, offset) = filter.page();
        let rows = sqlx::query(&format!(
            "SELECT {CLASSROOM_COLUMNS} FROM classrooms
             WHERE ($1::BIGINT IS NULL OR $1 IN (tutor_id, student_id, payer_id))
               AND ($2::TEXT IS NULL OR status = $2)
               AND ($3::TIMESTAMPTZ IS NULL OR start_time >= $3)
               AND ($4::TIMESTAMPTZ IS NULL OR start_time <= $4)
               AND ($5::TEXT IS NULL OR name ILIKE '%' || $5 || '%'
                    OR description ILIKE '%' || $5 || '%')
             ORDER BY start_time, id
             LIMIT $6 OFFSET $7"
        ))
        .bind(filter.participant)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.search.as_deref().filter(|s| !s.is_empty()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(classroom_from_row).collect()
    }

    async fn transition(
        &self,
        classroom_id: ClassroomId,
        transition: &Transition,
    ) -> ClassroomResult<Classroom> {
        let mut tx = self.pool.begin().await?;

        let status: String = sqlx::query("SELECT status FROM classrooms WHERE id = $1 FOR UPDATE")
            .bind(classroom_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(ClassroomError::NotFound(classroom_id))?
            .get("status");
        let current: ClassroomStatus = status.parse().map_err(ClassroomError::InvalidRecord)?;

        if current != transition.from || !transition.from.can_transition_to(transition.to) {
            return Err(ClassroomError::InvalidTransition {
                from: current,
                to: transition.to,
            });
        }

        let mut payment_id = None;
        if let Some(posting) = &transition.debit {
            let payment = apply_posting(&mut tx, posting, posting.reference.as_deref()).await?;
            payment_id = Some(payment.id);
        }
        if let Some(posting) = &transition.credit {
            apply_posting(&mut tx, posting, posting.reference.as_deref()).await?;
        }

        let row = sqlx::query(&format!(
            "UPDATE classrooms
             SET status = $2,
                 meeting_link = COALESCE($3, meeting_link),
                 decline_reason = COALESCE($4, decline_reason),
                 accepted_at = COALESCE($5, accepted_at),
                 payment_id = COALESCE($6, payment_id),
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {CLASSROOM_COLUMNS}"
        ))
        .bind(classroom_id)
        .bind(transition.to.as_str())
        .bind(&transition.meeting_link)
        .bind(&transition.decline_reason)
        .bind(transition.accepted_at)
        .bind(payment_id)
        .fetch_one(&mut *tx)
        .await?;
        let updated = classroom_from_row(&row)?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn due_for_completion(&self, now: DateTime<Utc>) -> ClassroomResult<Vec<Classroom>> {
        let rows = sqlx::query(&format!(
            "SELECT {CLASSROOM_COLUMNS} FROM classrooms
             WHERE status = 'accepted' AND end_time <= $1
             ORDER BY end_time, id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(classroom_from_row).collect()
    }
}

#[async_trait]
impl PayoutRepository for PgStore {
    async fn insert_request(&self, request: &NewPayoutRequest) -> PayoutResult<PayoutRequest> {
        let mut tx = self.pool.begin().await?;

        let reserved = sqlx::query(
            "UPDATE wallets
             SET pending = pending + $1, updated_at = NOW()
             WHERE user_id = $2 AND balance - pending >= $1
             RETURNING pending",
        )
        .bind(request.coins)
        .bind(request.tutor_id)
        .fetch_optional(&mut *tx)
        .await?;
        if reserved.is_none() {
            return Err(shortfall(&mut tx, request.tutor_id, request.coins).await.into());
        }

        let row = sqlx::query(&format!(
            "INSERT INTO payout_requests (tutor_id, bank_account, coins, amount_eur, status)
             VALUES ($1, $2, $3, $4, 'pending')
             RETURNING {PAYOUT_COLUMNS}"
        ))
        .bind(request.tutor_id)
        .bind(&request.bank_account)
        .bind(request.coins)
        .bind(request.amount_eur)
        .fetch_one(&mut *tx)
        .await?;
        let created = payout_from_row(&row)?;

        tx.commit().await?;
        Ok(created)
    }

    async fn get_request(&self, payout_id: PayoutId) -> PayoutResult<Option<PayoutRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payout_requests WHERE id = $1"
        ))
        .bind(payout_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(payout_from_row).transpose()
    }

    async fn list_requests(&self, filter: &PayoutFilter) -> PayoutResult<Vec<PayoutRequest>> {
        let (limit, offset) = filter.page();
        let rows = sqlx::query(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payout_requests
             WHERE ($1::BIGINT IS NULL OR tutor_id = $1)
               AND ($2::TEXT IS NULL OR status = $2)
               AND ($3::TIMESTAMPTZ IS NULL OR created_at >= $3)
               AND ($4::TIMESTAMPTZ IS NULL OR created_at <= $4)
               AND ($5::TEXT IS NULL OR bank_account ILIKE '%' || $5 || '%'
                    OR transfer_reference ILIKE '%' || $5 || '%'
                    OR payout_reference ILIKE '%' || $5 || '%')
             ORDER BY id DESC
             LIMIT $6 OFFSET $7"
        ))
        .bind(filter.tutor_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.search.as_deref().filter(|s| !s.is_empty()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payout_from_row).collect()
    }

    async fn try_lock_settlement(&self) -> PayoutResult<Option<SettlementLock>> {
        // The lock lives as long as this transaction; dropping it rolls back
        let mut tx = self.pool.begin().await?;
        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
            .bind(SETTLEMENT_LOCK_KEY)
            .fetch_one(&mut *tx)
            .await?;

        Ok(locked.then(|| SettlementLock::new(tx)))
    }

    async fn settleable(&self, pending_since: DateTime<Utc>) -> PayoutResult<Vec<PayoutRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payout_requests
             WHERE status = 'transferred' OR (status = 'pending' AND created_at >= $1)
             ORDER BY created_at, id"
        ))
        .bind(pending_since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payout_from_row).collect()
    }

    async fn expire_pending(&self, cutoff: DateTime<Utc>) -> PayoutResult<Vec<PayoutRequest>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            "UPDATE payout_requests
             SET status = 'expired', last_error = 'payout window elapsed', updated_at = NOW()
             WHERE status = 'pending' AND created_at < $1
             RETURNING {PAYOUT_COLUMNS}"
        ))
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;
        let expired = rows
            .iter()
            .map(payout_from_row)
            .collect::<PayoutResult<Vec<_>>>()?;

        for request in &expired {
            let released = sqlx::query(
                "UPDATE wallets SET pending = pending - $1, updated_at = NOW()
                 WHERE user_id = $2 AND pending >= $1
                 RETURNING pending",
            )
            .bind(request.coins)
            .bind(request.tutor_id)
            .fetch_optional(&mut *tx)
            .await?;
            if released.is_none() {
                return Err(PayoutError::InvalidRecord(format!(
                    "wallet {} does not hold the reserved coins for payout {}",
                    request.tutor_id, request.id
                )));
            }
        }

        tx.commit().await?;
        Ok(expired)
    }

    async fn claim(&self, payout_id: PayoutId, from: PayoutStatus) -> PayoutResult<bool> {
        let result = sqlx::query(
            "UPDATE payout_requests SET status = 'processing', updated_at = NOW()
             WHERE id = $1 AND status = $2",
        )
        .bind(payout_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_request(payout_id).await? {
            Some(_) => Ok(false),
            None => Err(PayoutError::NotFound(payout_id)),
        }
    }

    async fn release(
        &self,
        payout_id: PayoutId,
        to: PayoutStatus,
        error: &str,
    ) -> PayoutResult<()> {
        sqlx::query(
            "UPDATE payout_requests SET status = $2, last_error = $3, updated_at = NOW()
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(payout_id)
        .bind(to.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_transfer(
        &self,
        payout_id: PayoutId,
        transfer_reference: &str,
        withdrawal: &PendingTransaction,
    ) -> PayoutResult<PayoutRequest> {
        let mut tx = self.pool.begin().await?;

        let status: String =
            sqlx::query("SELECT status FROM payout_requests WHERE id = $1 FOR UPDATE")
                .bind(payout_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(PayoutError::NotFound(payout_id))?
                .get("status");
        if status != PayoutStatus::Processing.as_str() {
            return Err(PayoutError::NotClaimed(payout_id));
        }

        let transaction = open_pending_in(&mut tx, withdrawal).await?;

        let row = sqlx::query(&format!(
            "UPDATE payout_requests
             SET status = 'transferred', transfer_reference = $2, withdrawal_id = $3,
                 last_error = NULL, updated_at = NOW()
             WHERE id = $1
             RETURNING {PAYOUT_COLUMNS}"
        ))
        .bind(payout_id)
        .bind(transfer_reference)
        .bind(transaction.id)
        .fetch_one(&mut *tx)
        .await?;
        let updated = payout_from_row(&row)?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn finalize(
        &self,
        payout_id: PayoutId,
        payout_reference: &str,
    ) -> PayoutResult<PayoutRequest> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payout_requests WHERE id = $1 FOR UPDATE"
        ))
        .bind(payout_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(PayoutError::NotFound(payout_id))?;
        let request = payout_from_row(&row)?;
        if request.status != PayoutStatus::Processing {
            return Err(PayoutError::NotClaimed(payout_id));
        }
        let withdrawal_id = request.withdrawal_id.ok_or_else(|| {
            PayoutError::InvalidRecord(format!("payout {payout_id} has no withdrawal"))
        })?;

        sqlx::query(
            "UPDATE transactions SET status = 'completed', updated_at = NOW()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(withdrawal_id)
        .execute(&mut *tx)
        .await?;

        let released = sqlx::query(
            "UPDATE wallets
             SET balance = balance - $1, pending = pending - $1, updated_at = NOW()
             WHERE user_id = $2 AND pending >= $1 AND balance >= $1
             RETURNING balance",
        )
        .bind(request.coins)
        .bind(request.tutor_id)
        .fetch_optional(&mut *tx)
        .await?;
        if released.is_none() {
            return Err(PayoutError::InvalidRecord(format!(
                "wallet {} does not hold the reserved coins for payout {payout_id}",
                request.tutor_id
            )));
        }

        let row = sqlx::query(&format!(
            "UPDATE payout_requests
             SET status = 'processed', payout_reference = $2, last_error = NULL,
                 processed_at = NOW(), updated_at = NOW()
             WHERE id = $1
             RETURNING {PAYOUT_COLUMNS}"
        ))
        .bind(payout_id)
        .bind(payout_reference)
        .fetch_one(&mut *tx)
        .await?;
        let updated = payout_from_row(&row)?;

        tx.commit().await?;
        Ok(updated)
    }
}

#[async_trait]
impl DisputeRepository for PgStore {
    async fn insert_dispute(&self, dispute: &NewDispute) -> DisputeResult<Dispute> {
        let row = sqlx::query(&format!(
            "INSERT INTO disputes (submitter_id, kind, content, status)
             VALUES ($1, $2, $3, 'open')
             RETURNING {DISPUTE_COLUMNS}"
        ))
        .bind(dispute.submitter_id)
        .bind(dispute.kind.as_str())
        .bind(&dispute.content)
        .fetch_one(&self.pool)
        .await?;

        dispute_from_row(&row)
    }

    async fn get_dispute(&self, dispute_id: DisputeId) -> DisputeResult<Option<Dispute>> {
        let row = sqlx::query(&format!(
            "SELECT {DISPUTE_COLUMNS} FROM disputes WHERE id = $1"
        ))
        .bind(dispute_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(dispute_from_row).transpose()
    }

    async fn list_disputes(&self, filter: &DisputeFilter) -> DisputeResult<Vec<Dispute>> {
        let (limit, offset) = filter.page();
        let rows = sqlx::query(&format!(
            "SELECT {DISPUTE_COLUMNS} FROM disputes
             WHERE ($1::BIGINT IS NULL OR submitter_id = $1)
               AND ($2::TEXT IS NULL OR status = $2)
               AND ($3::TEXT IS NULL OR kind = $3)
               AND ($4::TEXT IS NULL OR content ILIKE '%' || $4 || '%')
             ORDER BY id DESC
             LIMIT $5 OFFSET $6"
        ))
        .bind(filter.submitter_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.search.as_deref().filter(|s| !s.is_empty()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(dispute_from_row).collect()
    }

    async fn resolve_dispute(
        &self,
        dispute_id: DisputeId,
        resolution: &str,
        resolved_at: DateTime<Utc>,
    ) -> DisputeResult<Dispute> {
        let row = sqlx::query(&format!(
            "UPDATE disputes SET status = 'resolved', resolution = $2, resolved_at = $3
             WHERE id = $1 AND status = 'open'
             RETURNING {DISPUTE_COLUMNS}"
        ))
        .bind(dispute_id)
        .bind(resolution)
        .bind(resolved_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => dispute_from_row(&row),
            None => match self.get_dispute(dispute_id).await? {
                Some(_) => Err(DisputeError::AlreadyResolved(dispute_id)),
                None => Err(DisputeError::NotFound(dispute_id)),
            },
        }
    }
}
