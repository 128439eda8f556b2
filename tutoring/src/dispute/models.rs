//! Dispute models.

use crate::accounts::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Dispute ID type
pub type DisputeId = i64;

/// What the dispute is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisputeKind {
    Payment,
    Classroom,
    Payout,
    Account,
    Other,
}

impl DisputeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeKind::Payment => "payment",
            DisputeKind::Classroom => "classroom",
            DisputeKind::Payout => "payout",
            DisputeKind::Account => "account",
            DisputeKind::Other => "other",
        }
    }
}

impl std::fmt::Display for DisputeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisputeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment" => Ok(DisputeKind::Payment),
            "classroom" => Ok(DisputeKind::Classroom),
            "payout" => Ok(DisputeKind::Payout),
            "account" => Ok(DisputeKind::Account),
            "other" => Ok(DisputeKind::Other),
            other => Err(format!("unknown dispute kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisputeStatus {
    Open,
    Resolved,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Open => "open",
            DisputeStatus::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisputeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(DisputeStatus::Open),
            "resolved" => Ok(DisputeStatus::Resolved),
            other => Err(format!("unknown dispute status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    /// Null once the submitter's account is deleted
    pub submitter_id: Option<UserId>,
    pub kind: DisputeKind,
    pub content: String,
    pub status: DisputeStatus,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Dispute submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitDispute {
    pub kind: DisputeKind,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct NewDispute {
    pub submitter_id: UserId,
    pub kind: DisputeKind,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisputeFilter {
    pub submitter_id: Option<UserId>,
    pub status: Option<DisputeStatus>,
    pub kind: Option<DisputeKind>,
    /// Case-insensitive match on content
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl DisputeFilter {
    pub fn page(&self) -> (i64, i64) {
        crate::wallet::models::page_bounds(self.limit, self.offset)
    }

    pub fn matches(&self, dispute: &Dispute) -> bool {
        if self
            .submitter_id
            .is_some_and(|id| dispute.submitter_id != Some(id))
        {
            return false;
        }
        if self.status.is_some_and(|status| status != dispute.status) {
            return false;
        }
        if self.kind.is_some_and(|kind| kind != dispute.kind) {
            return false;
        }
        if let Some(term) = self.search.as_deref().filter(|t| !t.is_empty())
            && !dispute
                .content
                .to_lowercase()
                .contains(&term.to_lowercase())
        {
            return false;
        }
        true
    }
}
