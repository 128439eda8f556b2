//! Dispute manager implementation.

use super::{
    errors::{DisputeError, DisputeResult},
    models::{Dispute, DisputeFilter, DisputeId, NewDispute, SubmitDispute},
};
use crate::{
    accounts::{Account, AccountError, UserId},
    db::{AccountRepository, DisputeRepository},
};
use chrono::Utc;
use std::sync::Arc;

const MAX_CONTENT_LEN: usize = 5000;

/// Dispute manager
#[derive(Clone)]
pub struct DisputeManager {
    disputes: Arc<dyn DisputeRepository>,
    accounts: Arc<dyn AccountRepository>,
}

impl DisputeManager {
    pub fn new(
        disputes: Arc<dyn DisputeRepository>,
        accounts: Arc<dyn AccountRepository>,
    ) -> Self {
        Self { disputes, accounts }
    }

    /// Open a dispute
    pub async fn submit(
        &self,
        submitter_id: UserId,
        dispute: SubmitDispute,
    ) -> DisputeResult<Dispute> {
        self.account(submitter_id).await?;
        let content = validate_text(&dispute.content, "dispute content")?;

        let dispute = self
            .disputes
            .insert_dispute(&NewDispute {
                submitter_id,
                kind: dispute.kind,
                content,
            })
            .await?;
        tracing::info!(
            dispute_id = dispute.id,
            submitter_id,
            kind = %dispute.kind,
            "Dispute opened"
        );
        Ok(dispute)
    }

    /// List disputes; non-admins only see their own
    pub async fn list(
        &self,
        caller: UserId,
        mut filter: DisputeFilter,
    ) -> DisputeResult<Vec<Dispute>> {
        if !self.account(caller).await?.is_admin() {
            filter.submitter_id = Some(caller);
        }
        self.disputes.list_disputes(&filter).await
    }

    pub async fn get(&self, caller: UserId, dispute_id: DisputeId) -> DisputeResult<Dispute> {
        let dispute = self
            .disputes
            .get_dispute(dispute_id)
            .await?
            .ok_or(DisputeError::NotFound(dispute_id))?;
        if dispute.submitter_id != Some(caller) && !self.account(caller).await?.is_admin() {
            return Err(DisputeError::PermissionDenied("not your dispute".to_string()));
        }
        Ok(dispute)
    }

    /// Resolve an open dispute (admin only)
    ///
    /// # Errors
    ///
    /// * `DisputeError::PermissionDenied` - Caller is not an admin
    /// * `DisputeError::Validation` - Resolution is blank
    /// * `DisputeError::AlreadyResolved` - Dispute was resolved before
    pub async fn resolve(
        &self,
        caller: UserId,
        dispute_id: DisputeId,
        resolution: &str,
    ) -> DisputeResult<Dispute> {
        if !self.account(caller).await?.is_admin() {
            return Err(DisputeError::PermissionDenied(
                "only admins can resolve disputes".to_string(),
            ));
        }
        let resolution = validate_text(resolution, "resolution")?;

        let dispute = self
            .disputes
            .resolve_dispute(dispute_id, &resolution, Utc::now())
            .await?;
        tracing::info!(dispute_id, resolved_by = caller, "Dispute resolved");
        Ok(dispute)
    }

    async fn account(&self, user_id: UserId) -> DisputeResult<Account> {
        Ok(self
            .accounts
            .find_by_id(user_id)
            .await?
            .ok_or(AccountError::NotFound(user_id))?)
    }
}

fn validate_text(text: &str, field: &str) -> DisputeResult<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(DisputeError::Validation(format!("{field} must not be empty")));
    }
    if text.chars().count() > MAX_CONTENT_LEN {
        return Err(DisputeError::Validation(format!(
            "{field} must be at most {MAX_CONTENT_LEN} characters"
        )));
    }
    Ok(text.to_string())
}
