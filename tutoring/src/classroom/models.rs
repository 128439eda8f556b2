//! Classroom and subject data models.

use crate::{
    accounts::UserId,
    wallet::{Posting, TransactionId},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Classroom ID type
pub type ClassroomId = i64;

/// Subject ID type
pub type SubjectId = i64;

/// Classroom state
///
/// `new -> accepted | declined`, `accepted -> completed | cancelled`.
/// Declined, completed and cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassroomStatus {
    New,
    Accepted,
    Declined,
    Completed,
    Cancelled,
}

impl ClassroomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassroomStatus::New => "new",
            ClassroomStatus::Accepted => "accepted",
            ClassroomStatus::Declined => "declined",
            ClassroomStatus::Completed => "completed",
            ClassroomStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: ClassroomStatus) -> bool {
        use ClassroomStatus::*;
        matches!(
            (self, next),
            (New, Accepted) | (New, Declined) | (Accepted, Completed) | (Accepted, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ClassroomStatus::Declined | ClassroomStatus::Completed | ClassroomStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ClassroomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassroomStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ClassroomStatus::New),
            "accepted" => Ok(ClassroomStatus::Accepted),
            "declined" => Ok(ClassroomStatus::Declined),
            "completed" => Ok(ClassroomStatus::Completed),
            "cancelled" => Ok(ClassroomStatus::Cancelled),
            other => Err(format!("unknown classroom status: {other}")),
        }
    }
}

/// Subject offered by a tutor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub tutor_id: UserId,
    pub name: String,
    /// Price per class in coins
    pub price: Decimal,
}

/// Subject to insert
#[derive(Debug, Clone)]
pub struct NewSubject {
    pub tutor_id: UserId,
    pub name: String,
    pub price: Decimal,
}

/// Scheduled class between a tutor and a student
///
/// Account references are weak: deleting an account nulls them and keeps
/// the classroom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classroom {
    pub id: ClassroomId,
    pub name: String,
    pub description: Option<String>,
    pub tutor_id: Option<UserId>,
    pub student_id: Option<UserId>,
    /// Wallet debited for the class and refunded on cancellation
    pub payer_id: Option<UserId>,
    pub subject_id: Option<SubjectId>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Subject price at booking time
    pub amount: Decimal,
    pub status: ClassroomStatus,
    pub meeting_link: Option<String>,
    pub decline_reason: Option<String>,
    /// `course_payment` transaction, once the payer has been debited
    pub payment_id: Option<TransactionId>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Classroom {
    pub fn is_paid(&self) -> bool {
        self.payment_id.is_some()
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        [self.tutor_id, self.student_id, self.payer_id].contains(&Some(user_id))
    }
}

/// Ledger reference of the payer debit for a classroom
pub fn payment_reference(classroom_id: ClassroomId) -> String {
    format!("classroom:{classroom_id}:payment")
}

/// Ledger reference of the payer refund for a classroom
pub fn refund_reference(classroom_id: ClassroomId) -> String {
    format!("classroom:{classroom_id}:refund")
}

/// Ledger reference of the tutor earning for a classroom
pub fn earning_reference(classroom_id: ClassroomId) -> String {
    format!("classroom:{classroom_id}:earning")
}

/// When the payer's wallet is debited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingMode {
    /// Scheduled request: balance is checked now, the debit happens when
    /// the tutor accepts.
    #[default]
    Request,
    /// Book now: the debit is committed together with the classroom.
    Instant,
}

/// Booking request from a student, or from a parent for one of its children
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub tutor_id: UserId,
    pub subject_id: SubjectId,
    /// Required when a parent books
    pub student_id: Option<UserId>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub mode: BookingMode,
}

/// Classroom row to insert
#[derive(Debug, Clone)]
pub struct NewClassroom {
    pub name: String,
    pub description: Option<String>,
    pub tutor_id: UserId,
    pub student_id: UserId,
    pub payer_id: UserId,
    pub subject_id: SubjectId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub amount: Decimal,
}

/// A compare-and-set status change plus the ledger effects committed with it
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: ClassroomStatus,
    pub to: ClassroomStatus,
    pub meeting_link: Option<String>,
    pub decline_reason: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    /// Payer debit; its transaction becomes the classroom's `payment_id`
    pub debit: Option<Posting>,
    /// Refund to the payer or earning to the tutor
    pub credit: Option<Posting>,
}

impl Transition {
    pub fn new(from: ClassroomStatus, to: ClassroomStatus) -> Self {
        Self {
            from,
            to,
            meeting_link: None,
            decline_reason: None,
            accepted_at: None,
            debit: None,
            credit: None,
        }
    }

    pub fn meeting_link(mut self, link: Option<String>) -> Self {
        self.meeting_link = link;
        self
    }

    pub fn decline_reason(mut self, reason: String) -> Self {
        self.decline_reason = Some(reason);
        self
    }

    pub fn accepted_at(mut self, at: DateTime<Utc>) -> Self {
        self.accepted_at = Some(at);
        self
    }

    pub fn debit(mut self, posting: Option<Posting>) -> Self {
        self.debit = posting;
        self
    }

    pub fn credit(mut self, posting: Option<Posting>) -> Self {
        self.credit = posting;
        self
    }
}

/// Classroom listing filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassroomFilter {
    /// Tutor, student or payer
    pub participant: Option<UserId>,
    pub status: Option<ClassroomStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Case-insensitive match on name or description
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ClassroomFilter {
    pub fn page(&self) -> (i64, i64) {
        crate::wallet::models::page_bounds(self.limit, self.offset)
    }

    /// In-process evaluation of the filter, mirroring the SQL predicate
    pub fn matches(&self, classroom: &Classroom) -> bool {
        if self
            .participant
            .is_some_and(|user| !classroom.is_participant(user))
        {
            return false;
        }
        if self.status.is_some_and(|status| status != classroom.status) {
            return false;
        }
        if self.from.is_some_and(|from| classroom.start_time < from) {
            return false;
        }
        if self.to.is_some_and(|to| classroom.start_time > to) {
            return false;
        }
        if let Some(term) = self.search.as_deref().filter(|t| !t.is_empty()) {
            let term = term.to_lowercase();
            let in_name = classroom.name.to_lowercase().contains(&term);
            let in_description = classroom
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&term));
            if !in_name && !in_description {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ClassroomStatus::*;

    const ALL: [ClassroomStatus; 5] = [New, Accepted, Declined, Completed, Cancelled];

    #[test]
    fn test_allowed_transitions() {
        assert!(New.can_transition_to(Accepted));
        assert!(New.can_transition_to(Declined));
        assert!(Accepted.can_transition_to(Completed));
        assert!(Accepted.can_transition_to(Cancelled));
    }

    #[test]
    fn test_new_cannot_skip_acceptance() {
        assert!(!New.can_transition_to(Completed));
        assert!(!New.can_transition_to(Cancelled));
        assert!(!Accepted.can_transition_to(Accepted));
        assert!(!Accepted.can_transition_to(Declined));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for state in ALL.into_iter().filter(|s| s.is_terminal()) {
            for next in ALL {
                assert!(
                    !state.can_transition_to(next),
                    "{state} must not move to {next}"
                );
            }
        }
        assert!(!New.is_terminal());
        assert!(!Accepted.is_terminal());
    }

    #[test]
    fn test_status_parses_its_own_string() {
        for state in ALL {
            assert_eq!(state.as_str().parse::<ClassroomStatus>(), Ok(state));
        }
    }
}
