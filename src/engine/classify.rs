use crate::limits::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::model::*;

use super::EngineError;

/// Logical category a booking listing is filtered by: temporal buckets
/// relative to a reference instant, or status buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingState {
    All,
    Current,
    Past,
    Future,
    Waiting,
    Rejected,
}

impl BookingState {
    /// Parse the raw request value. Unknown values are a caller error, not
    /// a parse-layer concern, so they surface as BadRequest.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        match raw.to_uppercase().as_str() {
            "ALL" => Ok(BookingState::All),
            "CURRENT" => Ok(BookingState::Current),
            "PAST" => Ok(BookingState::Past),
            "FUTURE" => Ok(BookingState::Future),
            "WAITING" => Ok(BookingState::Waiting),
            "REJECTED" => Ok(BookingState::Rejected),
            _ => Err(EngineError::BadRequest(format!("unknown state: {raw}"))),
        }
    }

    /// The predicate this state selects, evaluated at `now`.
    pub fn matches(&self, booking: &Booking, now: Ms) -> bool {
        match self {
            BookingState::All => true,
            BookingState::Current => booking.span.start <= now && booking.span.end > now,
            BookingState::Past => booking.span.end < now,
            BookingState::Future => booking.span.start > now,
            BookingState::Waiting => booking.status == Status::Waiting,
            BookingState::Rejected => booking.status == Status::Rejected,
        }
    }
}

/// Explicit offset/limit page, threaded through every listing call — there
/// are no ambient pagination defaults in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Result<Self, EngineError> {
        if limit == 0 {
            return Err(EngineError::BadRequest("page limit must be positive".into()));
        }
        if limit > MAX_PAGE_SIZE {
            return Err(EngineError::LimitExceeded("page too large"));
        }
        Ok(Self { offset, limit })
    }

    pub fn slice<T>(&self, mut items: Vec<T>) -> Vec<T> {
        if self.offset >= items.len() {
            return Vec::new();
        }
        let end = (self.offset + self.limit).min(items.len());
        items.drain(..self.offset);
        items.truncate(end - self.offset);
        items
    }
}

/// Listing order: newest window first, ties broken by the newer booking.
pub(crate) fn sort_newest_first(bookings: &mut [BookingInfo]) {
    bookings.sort_by(|a, b| b.start.cmp(&a.start).then(b.id.cmp(&a.id)));
}
