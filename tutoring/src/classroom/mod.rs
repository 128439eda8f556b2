//! Classroom booking workflow.
//!
//! A class moves through `new -> accepted | declined` and
//! `accepted -> completed | cancelled`. Every status change is a
//! compare-and-set, committed together with the wallet movement it implies:
//!
//! - booking in instant mode, or accepting a request, debits the payer
//! - declining a paid class, or cancelling an accepted one, refunds the payer
//! - completion credits the tutor

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{ClassroomError, ClassroomResult};
pub use manager::ClassroomManager;
pub use models::{
    BookingMode, BookingRequest, Classroom, ClassroomFilter, ClassroomId, ClassroomStatus,
    NewClassroom, NewSubject, Subject, SubjectId, Transition, earning_reference,
    payment_reference, refund_reference,
};
