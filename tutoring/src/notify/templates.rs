//! Subject and body text for classroom notifications.

use crate::classroom::Classroom;
use serde::{Deserialize, Serialize};

/// Classroom lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassroomEvent {
    Created,
    Accepted,
    Declined,
    Cancelled,
    Completed,
}

impl ClassroomEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassroomEvent::Created => "created",
            ClassroomEvent::Accepted => "accepted",
            ClassroomEvent::Declined => "declined",
            ClassroomEvent::Cancelled => "cancelled",
            ClassroomEvent::Completed => "completed",
        }
    }
}

impl std::fmt::Display for ClassroomEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render `(subject, body)` for a classroom event
pub fn render(
    event: ClassroomEvent,
    classroom: &Classroom,
    recipient_name: &str,
) -> (String, String) {
    let when = format!(
        "{} to {} UTC",
        classroom.start_time.format("%Y-%m-%d %H:%M"),
        classroom.end_time.format("%H:%M")
    );

    let (subject, detail) = match event {
        ClassroomEvent::Created => (
            format!("New class request: {}", classroom.name),
            format!(
                "A class has been booked for {when}. Price: {} coins.",
                classroom.amount
            ),
        ),
        ClassroomEvent::Accepted => {
            let link = classroom
                .meeting_link
                .as_deref()
                .map(|l| format!("Join here: {l}"))
                .unwrap_or_else(|| "The meeting link will be shared separately.".to_string());
            (
                format!("Class confirmed: {}", classroom.name),
                format!("Your class on {when} has been accepted. {link}"),
            )
        }
        ClassroomEvent::Declined => (
            format!("Class declined: {}", classroom.name),
            format!(
                "Your class on {when} was declined. Reason: {}",
                classroom.decline_reason.as_deref().unwrap_or("not given")
            ),
        ),
        ClassroomEvent::Cancelled => (
            format!("Class cancelled: {}", classroom.name),
            format!("The class on {when} has been cancelled. Any payment has been refunded."),
        ),
        ClassroomEvent::Completed => (
            format!("Class completed: {}", classroom.name),
            format!("Your class on {when} is complete. Thank you for learning with us."),
        ),
    };

    (subject, format!("Hi {recipient_name},\n\n{detail}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classroom::ClassroomStatus;
    use chrono::{TimeZone, Utc};
    use rust_decimal::dec;

    fn classroom() -> Classroom {
        let start = Utc.with_ymd_and_hms(2026, 5, 4, 16, 0, 0).unwrap();
        Classroom {
            id: 3,
            name: "Algebra with Ada".to_string(),
            description: None,
            tutor_id: Some(1),
            student_id: Some(2),
            payer_id: Some(2),
            subject_id: Some(1),
            start_time: start,
            end_time: start + chrono::Duration::hours(1),
            amount: dec!(10),
            status: ClassroomStatus::Accepted,
            meeting_link: Some("https://meet.example.com/j/1".to_string()),
            decline_reason: None,
            payment_id: None,
            accepted_at: None,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn test_accepted_includes_meeting_link() {
        let (subject, body) = render(ClassroomEvent::Accepted, &classroom(), "Grace");
        assert_eq!(subject, "Class confirmed: Algebra with Ada");
        assert!(body.starts_with("Hi Grace,"));
        assert!(body.contains("https://meet.example.com/j/1"));
        assert!(body.contains("2026-05-04 16:00 to 17:00 UTC"));
    }

    #[test]
    fn test_accepted_without_link_says_so() {
        let mut classroom = classroom();
        classroom.meeting_link = None;
        let (_, body) = render(ClassroomEvent::Accepted, &classroom, "Grace");
        assert!(body.contains("shared separately"));
    }

    #[test]
    fn test_declined_carries_reason() {
        let mut classroom = classroom();
        classroom.decline_reason = Some("Travelling that week".to_string());
        let (_, body) = render(ClassroomEvent::Declined, &classroom, "Grace");
        assert!(body.contains("Reason: Travelling that week"));
    }
}
