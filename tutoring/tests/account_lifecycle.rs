//! Integration tests for registration, login, account deletion and disputes.

mod common;

use chrono::{Duration, Utc};
use common::{Harness, PASSWORD, booking};
use rust_decimal::dec;
use tutoring::accounts::{AccountError, LoginRequest, RegisterRequest, Role};
use tutoring::classroom::{BookingMode, ClassroomStatus};
use tutoring::dispute::{DisputeError, DisputeFilter, DisputeKind, DisputeStatus, SubmitDispute};
use tutoring::wallet::{TransactionFilter, TransactionType};

fn request(email: &str, password: &str, role: Role) -> RegisterRequest {
    RegisterRequest {
        email: email.to_string(),
        password: password.to_string(),
        display_name: "Grace".to_string(),
        role,
        referral_code: None,
    }
}

#[tokio::test]
async fn test_register_and_login() {
    let h = Harness::new();
    let account = h
        .accounts
        .register(request("  Grace@Example.com ", PASSWORD, Role::Student))
        .await
        .unwrap();
    assert_eq!(account.email, "grace@example.com");
    assert_eq!(h.balance(account.id).await, dec!(0));

    let (logged_in, token) = h
        .accounts
        .login(LoginRequest {
            email: "grace@example.com".to_string(),
            password: PASSWORD.to_string(),
        })
        .await
        .unwrap();
    assert_eq!(logged_in.id, account.id);

    let claims = h.accounts.verify_access_token(&token).unwrap();
    assert_eq!(claims.sub, account.id);
    assert_eq!(claims.role, Role::Student);

    let err = h
        .accounts
        .login(LoginRequest {
            email: "grace@example.com".to_string(),
            password: "Wrong1234".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::InvalidCredentials));
}

#[tokio::test]
async fn test_registration_rules() {
    let h = Harness::new();
    h.register("Grace", Role::Student).await;

    let err = h
        .accounts
        .register(request("grace@example.com", PASSWORD, Role::Tutor))
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::EmailTaken));

    let err = h
        .accounts
        .register(request("root@example.com", PASSWORD, Role::Admin))
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::PermissionDenied(_)));

    let err = h
        .accounts
        .register(request("weak@example.com", "password", Role::Student))
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::WeakPassword(_)));

    let err = h
        .accounts
        .register(request("not-an-email", PASSWORD, Role::Student))
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::Validation(_)));
}

#[tokio::test]
async fn test_tampered_token_is_rejected() {
    let h = Harness::new();
    h.register("Grace", Role::Student).await;
    let (_, token) = h
        .accounts
        .login(LoginRequest {
            email: "grace@example.com".to_string(),
            password: PASSWORD.to_string(),
        })
        .await
        .unwrap();

    let tampered = format!("{token}x");
    assert!(h.accounts.verify_access_token(&tampered).is_err());
}

#[tokio::test]
async fn test_deleted_tutor_leaves_classroom_history() {
    let h = Harness::new();
    let (tutor, subject) = h.tutor_with_subject("Ada", dec!(10)).await;
    let student = h.register("Grace", Role::Student).await;
    h.fund(student.id, dec!(40)).await;

    let classroom = h
        .classrooms
        .create(student.id, booking(&tutor, &subject, 2, BookingMode::Instant))
        .await
        .unwrap();
    h.classrooms.accept(tutor.id, classroom.id).await.unwrap();

    h.accounts.delete_account(tutor.id).await.unwrap();
    let orphaned = h.classrooms.get(student.id, classroom.id).await.unwrap();
    assert_eq!(orphaned.tutor_id, None);
    assert_eq!(orphaned.student_id, Some(student.id));

    let completed = h
        .classrooms
        .complete_due(Utc::now() + Duration::hours(4))
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].status, ClassroomStatus::Completed);
    assert_eq!(h.balance(student.id).await, dec!(40));

    let refunds = h
        .wallets
        .history(
            student.id,
            TransactionFilter {
                transaction_type: Some(TransactionType::Refund),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, dec!(10));
}

#[tokio::test]
async fn test_deleted_student_keeps_ledger() {
    let h = Harness::new();
    let student = h.register("Grace", Role::Student).await;
    h.fund(student.id, dec!(25)).await;

    h.accounts.delete_account(student.id).await.unwrap();
    assert!(h.accounts.find(student.id).await.unwrap().is_none());
    assert_eq!(h.balance(student.id).await, dec!(25));

    let err = h.accounts.delete_account(student.id).await.unwrap_err();
    assert!(matches!(err, AccountError::NotFound(_)));
}

#[tokio::test]
async fn test_parent_links_child_once() {
    let h = Harness::new();
    let parent = h.register("Alan", Role::Parent).await;
    let other = h.register("Linus", Role::Parent).await;
    let student = h.register("Grace", Role::Student).await;

    let linked = h.accounts.link_child(parent.id, student.id).await.unwrap();
    assert_eq!(linked.parent_id, Some(parent.id));

    let err = h.accounts.link_child(other.id, student.id).await.unwrap_err();
    assert!(matches!(err, AccountError::PermissionDenied(_)));

    let err = h.accounts.link_child(student.id, parent.id).await.unwrap_err();
    assert!(matches!(err, AccountError::PermissionDenied(_)));
}

#[tokio::test]
async fn test_dispute_lifecycle() {
    let h = Harness::new();
    let student = h.register("Grace", Role::Student).await;
    let other = h.register("Alan", Role::Student).await;
    let admin = h.admin().await;

    let dispute = h
        .disputes
        .submit(
            student.id,
            SubmitDispute {
                kind: DisputeKind::Payment,
                content: "  Charged twice for one class  ".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(dispute.status, DisputeStatus::Open);
    assert_eq!(dispute.content, "Charged twice for one class");

    let err = h.disputes.get(other.id, dispute.id).await.unwrap_err();
    assert!(matches!(err, DisputeError::PermissionDenied(_)));
    assert!(
        h.disputes
            .list(other.id, DisputeFilter::default())
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(
        h.disputes
            .list(admin.id, DisputeFilter::default())
            .await
            .unwrap()
            .len(),
        1
    );

    let err = h
        .disputes
        .resolve(student.id, dispute.id, "Refunded")
        .await
        .unwrap_err();
    assert!(matches!(err, DisputeError::PermissionDenied(_)));

    let resolved = h
        .disputes
        .resolve(admin.id, dispute.id, "Refunded the duplicate charge")
        .await
        .unwrap();
    assert_eq!(resolved.status, DisputeStatus::Resolved);
    assert!(resolved.resolved_at.is_some());

    let err = h
        .disputes
        .resolve(admin.id, dispute.id, "Again")
        .await
        .unwrap_err();
    assert!(matches!(err, DisputeError::AlreadyResolved(id) if id == dispute.id));
}

#[tokio::test]
async fn test_blank_dispute_is_rejected() {
    let h = Harness::new();
    let student = h.register("Grace", Role::Student).await;

    let err = h
        .disputes
        .submit(
            student.id,
            SubmitDispute {
                kind: DisputeKind::Other,
                content: "   ".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DisputeError::Validation(_)));

    let err = h
        .disputes
        .submit(
            student.id,
            SubmitDispute {
                kind: DisputeKind::Other,
                content: "x".repeat(5001),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DisputeError::Validation(_)));
}
