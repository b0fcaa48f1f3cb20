//! Calendar aggregation - day-indexed month view of bookings
//!
//! Builds the grid a monthly calendar renders: Monday-first full weeks,
//! leading cells from the previous month and trailing cells from the
//! next, always a multiple of 7. Every cell carries its actual calendar
//! date, so a filler cell matches bookings of its own date only.
//! Expiry is applied per record at view-build time (read-time, never
//! persisted here), and the status filter matches the effective status
//! a client would see.

use crate::domain::{BookingError, BookingStatus, BookingView, FieldId, Result};
use crate::services::expiry::effective_status;
use crate::services::lifecycle::bounded;
use crate::services::store::{BookingStore, DateRange};
use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Optional field/status filters; a booking must match both when present
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CalendarFilters {
    pub field: Option<FieldId>,
    pub status: Option<BookingStatus>,
}

/// One cell of the month grid
#[derive(Debug, Clone, Serialize)]
pub struct DayCell {
    pub date: NaiveDate,
    /// False for leading/trailing filler cells from adjacent months
    pub in_month: bool,
    pub bookings: Vec<BookingView>,
}

/// The full grid for one month, cells in render order
#[derive(Debug, Serialize)]
pub struct MonthView {
    pub year: i32,
    pub month: u32,
    pub cells: Vec<DayCell>,
}

impl MonthView {
    /// ISO-date-string to bookings map, the shape the calendar endpoint
    /// serializes; every grid cell is present, empty days included
    pub fn day_index(&self) -> BTreeMap<String, Vec<BookingView>> {
        self.cells
            .iter()
            .map(|cell| (cell.date.format("%Y-%m-%d").to_string(), cell.bookings.clone()))
            .collect()
    }
}

/// Produces day-indexed views for calendar rendering
pub struct CalendarAggregator {
    store: Arc<dyn BookingStore>,
    deadline: Duration,
}

impl CalendarAggregator {
    pub fn new(store: Arc<dyn BookingStore>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// First and last grid date for a month: the Monday on or before the
    /// 1st through the Sunday on or after the last day
    pub fn grid_range(year: i32, month: u32) -> Result<DateRange> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| BookingError::Conflict(format!("invalid month {year}-{month:02}")))?;

        let next_month = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .ok_or_else(|| BookingError::Conflict(format!("invalid month {year}-{month:02}")))?;
        let last = next_month.pred_opt().ok_or_else(|| {
            BookingError::Conflict(format!("invalid month {year}-{month:02}"))
        })?;

        let lead = first.weekday().num_days_from_monday() as u64;
        let trail = 6 - last.weekday().num_days_from_monday() as u64;
        let start = first - Days::new(lead);
        let end = last + Days::new(trail);
        Ok(DateRange::new(start, end))
    }

    /// Build the month grid, applying filters and read-time expiry
    pub async fn month_view(
        &self,
        year: i32,
        month: u32,
        filters: CalendarFilters,
        now: NaiveDateTime,
    ) -> Result<MonthView> {
        let range = Self::grid_range(year, month)?;

        let bookings = match filters.field {
            Some(field) => {
                bounded(self.deadline, self.store.list_by_field(field, range)).await?
            }
            None => bounded(self.deadline, self.store.list_by_range(range)).await?,
        };

        // Bucket by actual calendar date; store order already has start
        // times ascending within a day
        let mut by_day: FxHashMap<NaiveDate, Vec<BookingView>> = FxHashMap::default();
        for booking in bookings {
            let effective = effective_status(&booking, now);
            if !Self::matches(effective, filters) {
                continue;
            }
            by_day
                .entry(booking.date)
                .or_default()
                .push(BookingView::new(booking, effective));
        }

        let cells: Vec<DayCell> = range
            .from
            .iter_days()
            .take_while(|d| *d <= range.to)
            .map(|date| DayCell {
                date,
                in_month: date.year() == year && date.month() == month,
                bookings: by_day.remove(&date).unwrap_or_default(),
            })
            .collect();

        debug!(year, month, cells = cells.len(), "calendar_month_built");
        Ok(MonthView { year, month, cells })
    }

    /// Day-detail drill-down, same filter and lazy-expiry semantics
    pub async fn bookings_for_day(
        &self,
        date: NaiveDate,
        filters: CalendarFilters,
        now: NaiveDateTime,
    ) -> Result<Vec<BookingView>> {
        let range = DateRange::new(date, date);
        let bookings = match filters.field {
            Some(field) => {
                bounded(self.deadline, self.store.list_by_field(field, range)).await?
            }
            None => bounded(self.deadline, self.store.list_by_range(range)).await?,
        };

        Ok(bookings
            .into_iter()
            .filter_map(|booking| {
                let effective = effective_status(&booking, now);
                Self::matches(effective, filters)
                    .then(|| BookingView::new(booking, effective))
            })
            .collect())
    }

    #[inline]
    fn matches(effective: BookingStatus, filters: CalendarFilters) -> bool {
        filters.status.map_or(true, |wanted| effective == wanted)
    }
}
