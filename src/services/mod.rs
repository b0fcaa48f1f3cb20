//! Services - business logic over the booking store
//!
//! This module contains the core booking services:
//! - `store` - `BookingStore` trait and the snapshot-backed `MemoryStore`
//! - `lifecycle` - state machine transitions and attribution rules
//! - `expiry` - pure expiry evaluation plus the persisting sweep
//! - `calendar` - day-indexed month aggregation for the calendar grid

pub mod calendar;
pub mod expiry;
pub mod lifecycle;
pub mod store;

// Re-export commonly used types
pub use calendar::{CalendarAggregator, CalendarFilters, DayCell, MonthView};
pub use expiry::{effective_status, is_expired, ExpirySweeper, SweepReport};
pub use lifecycle::{validate_transition, LifecycleController};
pub use store::{BookingStore, DateRange, MemoryStore};
