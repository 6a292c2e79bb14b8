use crate::model::*;

// ── Per-item booking summary ─────────────────────────────────────

/// Compute one item's summary in a single sweep over its start-sorted
/// bookings: the APPROVED booking with the greatest `start <= now` (last),
/// the one with the smallest `start > now` (next), and the all-time
/// APPROVED count. Ties on equal `start` go to the larger id, i.e. the
/// most recently created booking.
pub fn summarize(bookings: &[Booking], now: Ms) -> BookingSummary {
    let mut last: Option<&Booking> = None;
    let mut next: Option<&Booking> = None;
    let mut rent_count = 0u64;

    for b in bookings {
        if !b.is_approved() {
            continue;
        }
        rent_count += 1;
        if b.span.start <= now {
            let better = match last {
                None => true,
                Some(cur) => {
                    b.span.start > cur.span.start
                        || (b.span.start == cur.span.start && b.id > cur.id)
                }
            };
            if better {
                last = Some(b);
            }
        } else {
            let better = match next {
                None => true,
                Some(cur) => {
                    b.span.start < cur.span.start
                        || (b.span.start == cur.span.start && b.id > cur.id)
                }
            };
            if better {
                next = Some(b);
            }
        }
    }

    BookingSummary {
        last_booking: last.map(BookingRef::from_booking),
        next_booking: next.map(BookingRef::from_booking),
        rent_count,
    }
}
