//! Domain models - core business types for the booking lifecycle
//!
//! This module contains the canonical data types used throughout the system:
//! - `BookingRecord` - the persisted field reservation entity
//! - `BookingStatus` / `Actor` - state machine vocabulary
//! - `BookingPatch` - partial update applied through the store
//! - `BookingError` - the error taxonomy shared by all services

pub mod booking;
pub mod error;

pub use booking::{
    Actor, BookingId, BookingPatch, BookingRecord, BookingStatus, BookingView, FieldId, TeamRef,
    UserRef,
};
pub use error::{BookingError, Result};
