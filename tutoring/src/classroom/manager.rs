//! Classroom workflow manager.

use super::{
    errors::{ClassroomError, ClassroomResult},
    models::{
        BookingMode, BookingRequest, Classroom, ClassroomFilter, ClassroomId, ClassroomStatus,
        NewClassroom, NewSubject, Subject, SubjectId, Transition, earning_reference,
        payment_reference, refund_reference,
    },
};
use crate::{
    accounts::{Account, AccountError, Role, UserId},
    config::WorkflowConfig,
    db::{AccountRepository, ClassroomRepository, LedgerRepository},
    notify::{ClassroomEvent, Notification, NotificationKey, NotificationQueue, render},
    providers::{Email, MeetingProvider, MeetingRequest},
    wallet::{Posting, TransactionType},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Classroom manager
///
/// Owns the `new -> accepted | declined`, `accepted -> completed | cancelled`
/// state machine and the wallet movements tied to it.
#[derive(Clone)]
pub struct ClassroomManager {
    classrooms: Arc<dyn ClassroomRepository>,
    accounts: Arc<dyn AccountRepository>,
    ledger: Arc<dyn LedgerRepository>,
    meetings: Arc<dyn MeetingProvider>,
    notifications: NotificationQueue,
    config: WorkflowConfig,
}

impl ClassroomManager {
    /// Create a new classroom manager
    ///
    /// # Arguments
    ///
    /// * `classrooms` - Subject and classroom storage
    /// * `accounts` - Account lookups for participants and notification recipients
    /// * `ledger` - Wallet reads for balance pre-checks
    /// * `meetings` - Meeting link provider used on accept
    /// * `notifications` - Queue for participant emails
    /// * `config` - Workflow parameters (cancellation window)
    pub fn new(
        classrooms: Arc<dyn ClassroomRepository>,
        accounts: Arc<dyn AccountRepository>,
        ledger: Arc<dyn LedgerRepository>,
        meetings: Arc<dyn MeetingProvider>,
        notifications: NotificationQueue,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            classrooms,
            accounts,
            ledger,
            meetings,
            notifications,
            config,
        }
    }

    /// Offer a subject at a price per class
    pub async fn create_subject(
        &self,
        tutor_id: UserId,
        name: String,
        price: Decimal,
    ) -> ClassroomResult<Subject> {
        let tutor = self.account(tutor_id).await?;
        if tutor.role != Role::Tutor {
            return Err(ClassroomError::PermissionDenied(
                "only tutors can offer subjects".to_string(),
            ));
        }
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ClassroomError::Validation(
                "subject name must not be empty".to_string(),
            ));
        }
        if price <= Decimal::ZERO {
            return Err(ClassroomError::Validation(
                "subject price must be positive".to_string(),
            ));
        }

        let subject = self
            .classrooms
            .insert_subject(&NewSubject {
                tutor_id,
                name,
                price,
            })
            .await?;
        tracing::info!(tutor_id, subject_id = subject.id, %price, "Subject created");
        Ok(subject)
    }

    /// Subjects offered by a tutor
    pub async fn list_subjects(&self, tutor_id: UserId) -> ClassroomResult<Vec<Subject>> {
        self.classrooms.list_subjects(tutor_id).await
    }

    /// Book a class
    ///
    /// The price is snapshotted from the subject. In [`BookingMode::Request`]
    /// the payer's balance is only checked; in [`BookingMode::Instant`] the
    /// debit is committed together with the classroom.
    ///
    /// # Errors
    ///
    /// * `ClassroomError::Validation` - Bad time window or missing student
    /// * `ClassroomError::TutorNotFound` / `SubjectNotFound` / `StudentNotFound`
    /// * `ClassroomError::PermissionDenied` - Caller may not book for this student
    /// * `ClassroomError::InsufficientFunds` - Payer cannot afford the class;
    ///   nothing is written
    pub async fn create(
        &self,
        caller: UserId,
        request: BookingRequest,
    ) -> ClassroomResult<Classroom> {
        let account = self.account(caller).await?;
        let (student_id, payer_id) = self.resolve_student(&account, request.student_id).await?;

        if request.start_time >= request.end_time {
            return Err(ClassroomError::Validation(
                "start time must be before end time".to_string(),
            ));
        }
        if request.start_time <= Utc::now() {
            return Err(ClassroomError::Validation(
                "start time must be in the future".to_string(),
            ));
        }

        let tutor = self
            .accounts
            .find_by_id(request.tutor_id)
            .await?
            .filter(|a| a.role == Role::Tutor)
            .ok_or(ClassroomError::TutorNotFound(request.tutor_id))?;
        let subject = self.subject(request.subject_id).await?;
        if subject.tutor_id != tutor.id {
            return Err(ClassroomError::Validation(format!(
                "subject {} is not offered by tutor {}",
                subject.id, tutor.id
            )));
        }

        self.ensure_funds(payer_id, subject.price).await?;

        let name = request
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("{} with {}", subject.name, tutor.display_name));
        let debit = (request.mode == BookingMode::Instant).then(|| {
            Posting::debit(
                payer_id,
                subject.price,
                TransactionType::CoursePayment,
                format!("Payment for {name}"),
            )
        });

        let classroom = self
            .classrooms
            .insert_classroom(
                &NewClassroom {
                    name,
                    description: request.description,
                    tutor_id: tutor.id,
                    student_id,
                    payer_id,
                    subject_id: subject.id,
                    start_time: request.start_time,
                    end_time: request.end_time,
                    amount: subject.price,
                },
                debit.as_ref(),
            )
            .await
            .map_err(ClassroomError::from_ledger)?;

        let mode = match request.mode {
            BookingMode::Request => "request",
            BookingMode::Instant => "instant",
        };
        metrics::counter!("classroom_bookings_total", "mode" => mode).increment(1);
        tracing::info!(
            classroom_id = classroom.id,
            tutor_id = tutor.id,
            student_id,
            payer_id,
            amount = %classroom.amount,
            mode,
            "Classroom booked"
        );

        self.notify(
            ClassroomEvent::Created,
            &classroom,
            &[classroom.tutor_id, classroom.payer_id],
        )
        .await;
        Ok(classroom)
    }

    /// Accept a class as its tutor
    ///
    /// An unpaid class is debited in the same commit as the transition. The
    /// meeting link is requested first; when the provider fails the class is
    /// still accepted without a link.
    ///
    /// # Errors
    ///
    /// * `ClassroomError::PermissionDenied` - Caller is not the assigned tutor
    /// * `ClassroomError::InvalidTransition` - Class is no longer `new`
    /// * `ClassroomError::InsufficientFunds` - Payer cannot afford the class
    pub async fn accept(
        &self,
        caller: UserId,
        classroom_id: ClassroomId,
    ) -> ClassroomResult<Classroom> {
        let classroom = self.get_classroom(classroom_id).await?;
        if classroom.tutor_id != Some(caller) {
            return Err(ClassroomError::PermissionDenied(
                "only the assigned tutor can accept this class".to_string(),
            ));
        }
        ensure_status(&classroom, ClassroomStatus::New, ClassroomStatus::Accepted)?;

        let debit = if classroom.is_paid() {
            None
        } else {
            let payer_id = classroom.payer_id.ok_or_else(|| {
                ClassroomError::Validation("classroom has no paying account".to_string())
            })?;
            self.ensure_funds(payer_id, classroom.amount).await?;
            Some(
                Posting::debit(
                    payer_id,
                    classroom.amount,
                    TransactionType::CoursePayment,
                    format!("Payment for {}", classroom.name),
                )
                .with_reference(payment_reference(classroom.id)),
            )
        };

        let meeting_link = self.meeting_link(&classroom).await;
        let transition = Transition::new(ClassroomStatus::New, ClassroomStatus::Accepted)
            .meeting_link(meeting_link)
            .accepted_at(Utc::now())
            .debit(debit);
        let accepted = self
            .classrooms
            .transition(classroom_id, &transition)
            .await
            .map_err(ClassroomError::from_ledger)?;

        record_transition(&accepted);
        self.notify(
            ClassroomEvent::Accepted,
            &accepted,
            &[accepted.student_id, accepted.tutor_id],
        )
        .await;
        Ok(accepted)
    }

    /// Decline a class as its tutor
    ///
    /// A class that was already paid is refunded in the same commit.
    ///
    /// # Errors
    ///
    /// * `ClassroomError::Validation` - Reason missing or blank
    /// * `ClassroomError::PermissionDenied` - Caller is not the assigned tutor
    /// * `ClassroomError::InvalidTransition` - Class is no longer `new`
    pub async fn decline(
        &self,
        caller: UserId,
        classroom_id: ClassroomId,
        reason: &str,
    ) -> ClassroomResult<Classroom> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ClassroomError::Validation(
                "a decline reason is required".to_string(),
            ));
        }

        let classroom = self.get_classroom(classroom_id).await?;
        if classroom.tutor_id != Some(caller) {
            return Err(ClassroomError::PermissionDenied(
                "only the assigned tutor can decline this class".to_string(),
            ));
        }
        ensure_status(&classroom, ClassroomStatus::New, ClassroomStatus::Declined)?;

        let transition = Transition::new(ClassroomStatus::New, ClassroomStatus::Declined)
            .decline_reason(reason.to_string())
            .credit(refund(&classroom));
        let declined = self.classrooms.transition(classroom_id, &transition).await?;

        record_transition(&declined);
        self.notify(ClassroomEvent::Declined, &declined, &[declined.student_id])
            .await;
        Ok(declined)
    }

    /// Cancel an accepted class
    pub async fn cancel(
        &self,
        caller: UserId,
        classroom_id: ClassroomId,
    ) -> ClassroomResult<Classroom> {
        self.cancel_at(caller, classroom_id, Utc::now()).await
    }

    /// Cancel an accepted class as of `now`
    ///
    /// Tutors may cancel within the configured window after accepting;
    /// the student and the payer may cancel until the class starts; admins
    /// always. Any payment is refunded to the payer in the same commit.
    ///
    /// # Errors
    ///
    /// * `ClassroomError::PermissionDenied` - Caller is not a participant
    /// * `ClassroomError::InvalidTransition` - Class is not `accepted`
    /// * `ClassroomError::CancellationWindowElapsed` - Tutor window has passed
    /// * `ClassroomError::AlreadyStarted` - Student or payer cancelling too late
    pub async fn cancel_at(
        &self,
        caller: UserId,
        classroom_id: ClassroomId,
        now: DateTime<Utc>,
    ) -> ClassroomResult<Classroom> {
        let classroom = self.get_classroom(classroom_id).await?;
        let account = self.account(caller).await?;

        let by_tutor = classroom.tutor_id == Some(caller);
        let by_booker = classroom.student_id == Some(caller) || classroom.payer_id == Some(caller);
        if !account.is_admin() && !by_tutor && !by_booker {
            return Err(ClassroomError::PermissionDenied(
                "only participants can cancel this class".to_string(),
            ));
        }
        ensure_status(&classroom, ClassroomStatus::Accepted, ClassroomStatus::Cancelled)?;

        if !account.is_admin() {
            if by_tutor {
                let accepted_at = classroom.accepted_at.unwrap_or(classroom.updated_at);
                if now > accepted_at + self.config.tutor_cancel_window {
                    return Err(ClassroomError::CancellationWindowElapsed);
                }
            } else if now >= classroom.start_time {
                return Err(ClassroomError::AlreadyStarted);
            }
        }

        let transition = Transition::new(ClassroomStatus::Accepted, ClassroomStatus::Cancelled)
            .credit(refund(&classroom));
        let cancelled = self.classrooms.transition(classroom_id, &transition).await?;

        record_transition(&cancelled);
        tracing::info!(
            classroom_id,
            cancelled_by = caller,
            refunded = cancelled.is_paid(),
            "Classroom cancelled"
        );

        let recipients = if account.is_admin() {
            vec![cancelled.tutor_id, cancelled.student_id]
        } else if by_tutor {
            vec![cancelled.student_id]
        } else {
            vec![cancelled.tutor_id]
        };
        self.notify(ClassroomEvent::Cancelled, &cancelled, &recipients)
            .await;
        Ok(cancelled)
    }

    /// Complete every accepted class that has ended by `now`
    ///
    /// The tutor is credited with the class amount in the same commit as
    /// each transition. When the tutor account is gone the payer is refunded
    /// instead. A classroom that fails to complete is logged and
    /// picked up again by the next sweep.
    pub async fn complete_due(&self, now: DateTime<Utc>) -> ClassroomResult<Vec<Classroom>> {
        let due = self.classrooms.due_for_completion(now).await?;
        let mut completed = Vec::with_capacity(due.len());

        for classroom in due {
            let credit = match classroom.tutor_id.filter(|_| classroom.is_paid()) {
                Some(tutor_id) => Some(
                    Posting::credit(
                        tutor_id,
                        classroom.amount,
                        TransactionType::CoursePayment,
                        format!("Earning for {}", classroom.name),
                    )
                    .with_reference(earning_reference(classroom.id)),
                ),
                None => {
                    let refund = refund(&classroom);
                    if refund.is_some() {
                        tracing::warn!(
                            classroom_id = classroom.id,
                            payer_id = ?classroom.payer_id,
                            "Tutor account deleted, refunding payer"
                        );
                    }
                    refund
                }
            };
            let transition = Transition::new(ClassroomStatus::Accepted, ClassroomStatus::Completed)
                .credit(credit);

            match self.classrooms.transition(classroom.id, &transition).await {
                Ok(done) => {
                    record_transition(&done);
                    self.notify(ClassroomEvent::Completed, &done, &[done.student_id])
                        .await;
                    completed.push(done);
                }
                Err(e) => {
                    tracing::warn!(
                        classroom_id = classroom.id,
                        error = %e,
                        "Failed to complete classroom"
                    );
                }
            }
        }

        if !completed.is_empty() {
            tracing::info!(count = completed.len(), "Completed classrooms");
        }
        Ok(completed)
    }

    /// Fetch a classroom visible to the caller
    pub async fn get(
        &self,
        caller: UserId,
        classroom_id: ClassroomId,
    ) -> ClassroomResult<Classroom> {
        let classroom = self.get_classroom(classroom_id).await?;
        if !classroom.is_participant(caller) && !self.account(caller).await?.is_admin() {
            return Err(ClassroomError::PermissionDenied(
                "not a participant of this class".to_string(),
            ));
        }
        Ok(classroom)
    }

    /// List classrooms; non-admins only see their own
    pub async fn list(
        &self,
        caller: UserId,
        mut filter: ClassroomFilter,
    ) -> ClassroomResult<Vec<Classroom>> {
        if !self.account(caller).await?.is_admin() {
            filter.participant = Some(caller);
        }
        self.classrooms.list_classrooms(&filter).await
    }

    async fn account(&self, user_id: UserId) -> ClassroomResult<Account> {
        Ok(self
            .accounts
            .find_by_id(user_id)
            .await?
            .ok_or(AccountError::NotFound(user_id))?)
    }

    async fn get_classroom(&self, classroom_id: ClassroomId) -> ClassroomResult<Classroom> {
        self.classrooms
            .get_classroom(classroom_id)
            .await?
            .ok_or(ClassroomError::NotFound(classroom_id))
    }

    async fn subject(&self, subject_id: SubjectId) -> ClassroomResult<Subject> {
        self.classrooms
            .get_subject(subject_id)
            .await?
            .ok_or(ClassroomError::SubjectNotFound(subject_id))
    }

    /// `(student, payer)` for a booking made by `caller`
    async fn resolve_student(
        &self,
        caller: &Account,
        student_id: Option<UserId>,
    ) -> ClassroomResult<(UserId, UserId)> {
        match caller.role {
            Role::Student => {
                if student_id.is_some_and(|id| id != caller.id) {
                    return Err(ClassroomError::PermissionDenied(
                        "students can only book for themselves".to_string(),
                    ));
                }
                Ok((caller.id, caller.payer_id()))
            }
            Role::Parent => {
                let student_id = student_id.ok_or_else(|| {
                    ClassroomError::Validation("student_id is required for parents".to_string())
                })?;
                let student = self
                    .accounts
                    .find_by_id(student_id)
                    .await?
                    .filter(|a| a.role == Role::Student)
                    .ok_or(ClassroomError::StudentNotFound(student_id))?;
                if student.parent_id != Some(caller.id) {
                    return Err(ClassroomError::PermissionDenied(
                        "student is not linked to this parent".to_string(),
                    ));
                }
                Ok((student.id, caller.id))
            }
            Role::Tutor | Role::Admin => Err(ClassroomError::PermissionDenied(
                "only students and parents can book classes".to_string(),
            )),
        }
    }

    async fn ensure_funds(&self, payer_id: UserId, amount: Decimal) -> ClassroomResult<()> {
        let available = self.ledger.get_wallet(payer_id).await?.available();
        if available < amount {
            return Err(ClassroomError::InsufficientFunds {
                available,
                required: amount,
            });
        }
        Ok(())
    }

    async fn meeting_link(&self, classroom: &Classroom) -> Option<String> {
        let mut attendees = Vec::new();
        for user_id in [classroom.tutor_id, classroom.student_id].into_iter().flatten() {
            if let Ok(Some(account)) = self.accounts.find_by_id(user_id).await {
                attendees.push(account.email);
            }
        }

        let request = MeetingRequest {
            title: classroom.name.clone(),
            start: classroom.start_time,
            end: classroom.end_time,
            attendees,
            request_id: Uuid::new_v4(),
            agenda: classroom.description.clone(),
            timezone: None,
        };
        match self.meetings.create_meeting(&request).await {
            Ok(meeting) => Some(meeting.join_url),
            Err(e) => {
                metrics::counter!("meeting_link_failures_total").increment(1);
                tracing::warn!(
                    classroom_id = classroom.id,
                    request_id = %request.request_id,
                    error = %e,
                    "Meeting link creation failed, accepting without a link"
                );
                None
            }
        }
    }

    /// Queue one email per distinct recipient
    async fn notify(
        &self,
        event: ClassroomEvent,
        classroom: &Classroom,
        recipients: &[Option<UserId>],
    ) {
        let mut seen = Vec::new();
        for user_id in recipients.iter().flatten().copied() {
            if seen.contains(&user_id) {
                continue;
            }
            seen.push(user_id);

            let account = match self.accounts.find_by_id(user_id).await {
                Ok(Some(account)) => account,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "Skipping notification recipient");
                    continue;
                }
            };
            let (subject, body) = render(event, classroom, &account.display_name);
            self.notifications.enqueue(Notification {
                key: NotificationKey {
                    entity_id: classroom.id,
                    event,
                    recipient: user_id,
                },
                email: Email {
                    to: account.email,
                    subject,
                    body,
                },
            });
        }
    }
}

fn ensure_status(
    classroom: &Classroom,
    expected: ClassroomStatus,
    next: ClassroomStatus,
) -> ClassroomResult<()> {
    if classroom.status != expected {
        return Err(ClassroomError::InvalidTransition {
            from: classroom.status,
            to: next,
        });
    }
    Ok(())
}

/// Refund posting for a paid classroom
fn refund(classroom: &Classroom) -> Option<Posting> {
    let payer_id = classroom.payer_id.filter(|_| classroom.is_paid())?;
    Some(
        Posting::credit(
            payer_id,
            classroom.amount,
            TransactionType::Refund,
            format!("Refund for {}", classroom.name),
        )
        .with_reference(refund_reference(classroom.id)),
    )
}

fn record_transition(classroom: &Classroom) {
    metrics::counter!("classroom_transitions_total", "to" => classroom.status.as_str())
        .increment(1);
    tracing::info!(
        classroom_id = classroom.id,
        status = %classroom.status,
        "Classroom transitioned"
    );
}
