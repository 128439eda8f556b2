//! Integration tests for payout requests and settlement runs.

mod common;

use chrono::{Duration, Utc};
use common::Harness;
use rust_decimal::{Decimal, dec};
use tutoring::WorkflowConfig;
use tutoring::accounts::{Account, Role};
use tutoring::db::PayoutRepository;
use tutoring::payout::{PayoutError, PayoutFilter, PayoutManager, PayoutStatus, SettlementReport};
use tutoring::wallet::{TransactionFilter, TransactionStatus, TransactionType, WalletError};

const BANK: &str = "DE89370400440532013000";

/// Tutor with a connect account and `earned` coins in the wallet
async fn earning_tutor(h: &Harness, earned: Decimal) -> Account {
    let (tutor, _) = h.tutor_with_subject("Ada", dec!(10)).await;
    h.fund(tutor.id, earned).await;
    tutor
}

fn withdrawals() -> TransactionFilter {
    TransactionFilter {
        transaction_type: Some(TransactionType::Withdrawal),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_request_reserves_coins() {
    let h = Harness::new();
    let tutor = earning_tutor(&h, dec!(50)).await;

    let request = h
        .payouts
        .request_payout(tutor.id, dec!(20), BANK.to_string())
        .await
        .unwrap();
    assert_eq!(request.status, PayoutStatus::Pending);
    assert_eq!(request.amount_eur, dec!(20.00));

    let wallet = h.wallets.get_wallet(tutor.id).await.unwrap();
    assert_eq!(wallet.balance, dec!(50));
    assert_eq!(wallet.pending, dec!(20));
    assert_eq!(wallet.available(), dec!(30));

    let err = h
        .payouts
        .request_payout(tutor.id, dec!(40), BANK.to_string())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PayoutError::Wallet(WalletError::InsufficientBalance { .. })
    ));
}

#[tokio::test]
async fn test_request_validation() {
    let h = Harness::new();
    let tutor = earning_tutor(&h, dec!(50)).await;
    let student = h.register("Grace", Role::Student).await;
    let unlinked = h.register("Alan", Role::Tutor).await;

    let err = h
        .payouts
        .request_payout(tutor.id, dec!(5), BANK.to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, PayoutError::BelowMinimum { minimum } if minimum == dec!(10)));

    let err = h
        .payouts
        .request_payout(tutor.id, dec!(-20), BANK.to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, PayoutError::Validation(_)));

    let err = h
        .payouts
        .request_payout(tutor.id, dec!(20), "  ".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, PayoutError::Validation(_)));

    let err = h
        .payouts
        .request_payout(student.id, dec!(20), BANK.to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, PayoutError::PermissionDenied(_)));

    let err = h
        .payouts
        .request_payout(unlinked.id, dec!(20), BANK.to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, PayoutError::NoConnectAccount));
}

#[tokio::test]
async fn test_short_platform_balance_skips_request() {
    let h = Harness::new();
    let tutor = earning_tutor(&h, dec!(50)).await;
    h.provider.set_balance(dec!(10.00));

    let request = h
        .payouts
        .request_payout(tutor.id, dec!(15), BANK.to_string())
        .await
        .unwrap();
    let report = h.payouts.settle(Utc::now()).await.unwrap();

    assert_eq!(report.skipped, vec![request.id]);
    assert!(report.processed.is_empty());
    assert!(report.failed.is_empty());

    let request = h.payouts.get(tutor.id, request.id).await.unwrap();
    assert_eq!(request.status, PayoutStatus::Pending);
    assert!(h.provider.transfers().is_empty());
    assert!(
        h.wallets
            .history(tutor.id, withdrawals())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_settlement_processes_request() {
    let h = Harness::new();
    let tutor = earning_tutor(&h, dec!(50)).await;
    h.provider.set_balance(dec!(100));

    let request = h
        .payouts
        .request_payout(tutor.id, dec!(20), BANK.to_string())
        .await
        .unwrap();
    let report = h.payouts.settle(Utc::now()).await.unwrap();
    assert_eq!(report.processed, vec![request.id]);

    let request = h.payouts.get(tutor.id, request.id).await.unwrap();
    assert_eq!(request.status, PayoutStatus::Processed);
    assert!(request.transfer_reference.is_some());
    assert!(request.payout_reference.is_some());
    assert!(request.processed_at.is_some());

    let wallet = h.wallets.get_wallet(tutor.id).await.unwrap();
    assert_eq!(wallet.balance, dec!(30));
    assert_eq!(wallet.pending, dec!(0));

    let withdrawals = h.wallets.history(tutor.id, withdrawals()).await.unwrap();
    assert_eq!(withdrawals.len(), 1);
    assert_eq!(withdrawals[0].status, TransactionStatus::Completed);
    assert_eq!(withdrawals[0].amount, dec!(20));
    assert_eq!(Some(withdrawals[0].id), request.withdrawal_id);

    let payouts = h.provider.payouts();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].bank_account, BANK);
    assert_eq!(payouts[0].connect_account, format!("acct_{}", tutor.id));
    assert_eq!(h.provider.balance(), dec!(80));

    let check = h.wallets.verify_ledger(tutor.id).await.unwrap();
    assert!(check.is_consistent());
}

#[tokio::test]
async fn test_budget_is_spent_oldest_first() {
    let h = Harness::new();
    let tutor = earning_tutor(&h, dec!(50)).await;
    h.provider.set_balance(dec!(25));

    let first = h
        .payouts
        .request_payout(tutor.id, dec!(10), BANK.to_string())
        .await
        .unwrap();
    let second = h
        .payouts
        .request_payout(tutor.id, dec!(20), BANK.to_string())
        .await
        .unwrap();

    let report = h.payouts.settle(Utc::now()).await.unwrap();
    assert_eq!(report.processed, vec![first.id]);
    assert_eq!(report.skipped, vec![second.id]);

    let wallet = h.wallets.get_wallet(tutor.id).await.unwrap();
    assert_eq!(wallet.balance, dec!(40));
    assert_eq!(wallet.pending, dec!(20));
}

#[tokio::test]
async fn test_transfer_failure_returns_request_to_pending() {
    let h = Harness::new();
    let tutor = earning_tutor(&h, dec!(50)).await;
    h.provider.set_balance(dec!(100));
    h.provider.fail_transfers(Some("destination account restricted"));

    let request = h
        .payouts
        .request_payout(tutor.id, dec!(20), BANK.to_string())
        .await
        .unwrap();
    let report = h.payouts.settle(Utc::now()).await.unwrap();
    assert_eq!(report.failed, vec![request.id]);

    let failed = h.payouts.get(tutor.id, request.id).await.unwrap();
    assert_eq!(failed.status, PayoutStatus::Pending);
    assert!(
        failed
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("destination account restricted"))
    );
    assert!(h.wallets.history(tutor.id, withdrawals()).await.unwrap().is_empty());

    h.provider.fail_transfers(None);
    let report = h.payouts.settle(Utc::now()).await.unwrap();
    assert_eq!(report.processed, vec![request.id]);
    assert_eq!(h.balance(tutor.id).await, dec!(30));
}

#[tokio::test]
async fn test_payout_failure_keeps_transfer_and_retries_payout_only() {
    let h = Harness::new();
    let tutor = earning_tutor(&h, dec!(50)).await;
    h.provider.set_balance(dec!(100));
    h.provider.fail_payouts(Some("bank unavailable"));

    let request = h
        .payouts
        .request_payout(tutor.id, dec!(20), BANK.to_string())
        .await
        .unwrap();
    let report = h.payouts.settle(Utc::now()).await.unwrap();
    assert_eq!(report.failed, vec![request.id]);

    let stuck = h.payouts.get(tutor.id, request.id).await.unwrap();
    assert_eq!(stuck.status, PayoutStatus::Transferred);
    assert!(stuck.transfer_reference.is_some());
    assert!(stuck.last_error.is_some());

    let pending = h.wallets.history(tutor.id, withdrawals()).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, TransactionStatus::Pending);
    let wallet = h.wallets.get_wallet(tutor.id).await.unwrap();
    assert_eq!(wallet.balance, dec!(50));
    assert_eq!(wallet.pending, dec!(20));

    h.provider.fail_payouts(None);
    let report = h.payouts.settle(Utc::now()).await.unwrap();
    assert_eq!(report.processed, vec![request.id]);
    assert_eq!(h.provider.transfers().len(), 1, "transfer is not repeated");
    assert_eq!(h.balance(tutor.id).await, dec!(30));
}

#[tokio::test]
async fn test_rejected_payout_is_not_marked_processed() {
    let h = Harness::new();
    let tutor = earning_tutor(&h, dec!(50)).await;
    h.provider.set_balance(dec!(100));
    h.provider.reject_payouts(Some("account closed"));

    let request = h
        .payouts
        .request_payout(tutor.id, dec!(20), BANK.to_string())
        .await
        .unwrap();
    let report = h.payouts.settle(Utc::now()).await.unwrap();
    assert_eq!(report.failed, vec![request.id]);

    let rejected = h.payouts.get(tutor.id, request.id).await.unwrap();
    assert_eq!(rejected.status, PayoutStatus::Transferred);
    assert!(
        rejected
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("account closed"))
    );
    assert_eq!(h.balance(tutor.id).await, dec!(50));
}

#[tokio::test]
async fn test_stale_pending_request_expires_and_releases_coins() {
    let h = Harness::new();
    let tutor = earning_tutor(&h, dec!(50)).await;
    h.provider.set_balance(dec!(100));

    let request = h
        .payouts
        .request_payout(tutor.id, dec!(20), BANK.to_string())
        .await
        .unwrap();
    let report = h
        .payouts
        .settle(Utc::now() + Duration::days(31))
        .await
        .unwrap();
    assert_eq!(report.expired, vec![request.id]);
    assert!(report.processed.is_empty());

    let expired = h.payouts.get(tutor.id, request.id).await.unwrap();
    assert_eq!(expired.status, PayoutStatus::Expired);
    assert!(h.provider.transfers().is_empty());
    assert!(h.wallets.history(tutor.id, withdrawals()).await.unwrap().is_empty());

    let wallet = h.wallets.get_wallet(tutor.id).await.unwrap();
    assert_eq!(wallet.balance, dec!(50));
    assert_eq!(wallet.pending, dec!(0));

    let report = h
        .payouts
        .settle(Utc::now() + Duration::days(32))
        .await
        .unwrap();
    assert_eq!(report, SettlementReport::default());
}

#[tokio::test]
async fn test_transferred_request_is_retried_after_window() {
    let h = Harness::new();
    let tutor = earning_tutor(&h, dec!(50)).await;
    h.provider.set_balance(dec!(100));
    h.provider.fail_payouts(Some("bank unavailable"));

    let request = h
        .payouts
        .request_payout(tutor.id, dec!(20), BANK.to_string())
        .await
        .unwrap();
    let report = h.payouts.settle(Utc::now()).await.unwrap();
    assert_eq!(report.failed, vec![request.id]);

    h.provider.fail_payouts(None);
    let report = h
        .payouts
        .settle(Utc::now() + Duration::days(31))
        .await
        .unwrap();
    assert_eq!(report.processed, vec![request.id]);
    assert!(report.expired.is_empty());

    let request = h.payouts.get(tutor.id, request.id).await.unwrap();
    assert_eq!(request.status, PayoutStatus::Processed);
    assert_eq!(h.provider.transfers().len(), 1);

    let wallet = h.wallets.get_wallet(tutor.id).await.unwrap();
    assert_eq!(wallet.balance, dec!(30));
    assert_eq!(wallet.pending, dec!(0));
    let withdrawals = h.wallets.history(tutor.id, withdrawals()).await.unwrap();
    assert_eq!(withdrawals[0].status, TransactionStatus::Completed);
}

/// A second server process: its own manager over the same store
fn replica(h: &Harness) -> PayoutManager {
    PayoutManager::new(
        h.store.clone(),
        h.store.clone(),
        h.provider.clone(),
        WorkflowConfig::default(),
    )
}

#[tokio::test]
async fn test_settlement_lock_is_shared_through_the_store() {
    let h = Harness::new();
    let tutor = earning_tutor(&h, dec!(50)).await;
    h.provider.set_balance(dec!(100));
    let other = replica(&h);

    let request = h
        .payouts
        .request_payout(tutor.id, dec!(20), BANK.to_string())
        .await
        .unwrap();

    let lock = h
        .store
        .try_lock_settlement()
        .await
        .unwrap()
        .expect("lock should be free");
    assert!(h.store.try_lock_settlement().await.unwrap().is_none());
    assert!(matches!(
        h.payouts.settle(Utc::now()).await,
        Err(PayoutError::SettlementInProgress)
    ));
    assert!(matches!(
        other.settle(Utc::now()).await,
        Err(PayoutError::SettlementInProgress)
    ));
    assert!(h.provider.transfers().is_empty());

    drop(lock);
    let report = other.settle(Utc::now()).await.unwrap();
    assert_eq!(report.processed, vec![request.id]);
}

#[tokio::test]
async fn test_concurrent_runs_never_overcommit_platform_balance() {
    let h = Harness::new();
    let tutor = earning_tutor(&h, dec!(50)).await;
    h.provider.set_balance(dec!(30));
    let other = replica(&h);

    for _ in 0..2 {
        h.payouts
            .request_payout(tutor.id, dec!(20), BANK.to_string())
            .await
            .unwrap();
    }

    let (first, second) = tokio::join!(h.payouts.settle(Utc::now()), other.settle(Utc::now()));
    let processed: usize = [first, second]
        .into_iter()
        .map(|run| match run {
            Ok(report) => report.processed.len(),
            Err(PayoutError::SettlementInProgress) => 0,
            Err(e) => panic!("unexpected settlement error: {e}"),
        })
        .sum();
    assert_eq!(processed, 1);

    let transferred: Decimal = h.provider.transfers().iter().map(|t| t.amount_eur).sum();
    assert_eq!(transferred, dec!(20.00));

    let wallet = h.wallets.get_wallet(tutor.id).await.unwrap();
    assert_eq!(wallet.balance, dec!(30));
    assert_eq!(wallet.pending, dec!(20));
}

#[tokio::test]
async fn test_tutors_only_see_their_own_requests() {
    let h = Harness::new();
    let tutor = earning_tutor(&h, dec!(50)).await;
    let (other, _) = h.tutor_with_subject("Alan", dec!(10)).await;
    let admin = h.admin().await;

    let request = h
        .payouts
        .request_payout(tutor.id, dec!(20), BANK.to_string())
        .await
        .unwrap();

    let err = h.payouts.get(other.id, request.id).await.unwrap_err();
    assert!(matches!(err, PayoutError::PermissionDenied(_)));
    assert!(h.payouts.get(admin.id, request.id).await.is_ok());

    let own = h
        .payouts
        .list_for_tutor(tutor.id, PayoutFilter::default())
        .await
        .unwrap();
    assert_eq!(own.len(), 1);
    let others = h
        .payouts
        .list_for_tutor(other.id, PayoutFilter::default())
        .await
        .unwrap();
    assert!(others.is_empty());
    let all = h.payouts.list(&PayoutFilter::default()).await.unwrap();
    assert_eq!(all.len(), 1);
}
