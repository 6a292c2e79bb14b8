use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    if start >= end {
        return Err(EngineError::BadRequest(format!(
            "booking start {start} must be before end {end}"
        )));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking window too wide"));
    }
    Ok(span)
}

/// Collect ids of APPROVED bookings whose window interferes with `span`.
/// The interference test is inclusive on both edges, so a booking ending
/// exactly at `span.start` (or starting exactly at `span.end`) counts.
pub(crate) fn interfering_approved(item: &ItemState, span: &Span) -> Vec<Ulid> {
    item.interfering(span)
        .filter(|b| b.is_approved())
        .map(|b| b.id)
        .collect()
}

/// Availability check run on the create path, under the item's write lock.
/// Read-only: a failed check leaves nothing behind.
pub(crate) fn check_availability(item: &ItemState, span: &Span) -> Result<(), EngineError> {
    let interfering = interfering_approved(item, span);
    if interfering.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Conflict(interfering))
    }
}
