use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)` — the booking window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Conflict test between reservation windows. Deliberately inclusive on
    /// both edges: a window ending exactly where another starts still counts
    /// as interfering.
    pub fn interferes(&self, other: &Span) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Lifecycle of a booking. Starts at `Waiting`; the first decision moves it
/// to `Approved` or `Rejected` and it never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Waiting,
    Approved,
    Rejected,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Waiting => write!(f, "WAITING"),
            Status::Approved => write!(f, "APPROVED"),
            Status::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// A single booking as stored inside its item's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub booker_id: Ulid,
    pub span: Span,
    pub status: Status,
}

impl Booking {
    pub fn is_approved(&self) -> bool {
        self.status == Status::Approved
    }
}

/// A comment left on an item by a past renter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Ulid,
    pub author_id: Ulid,
    pub text: String,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct ItemState {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    pub description: String,
    pub available: bool,
    /// All bookings ever made for this item, sorted by `span.start`.
    pub bookings: Vec<Booking>,
    pub comments: Vec<Comment>,
}

impl ItemState {
    pub fn new(
        id: Ulid,
        owner_id: Ulid,
        name: String,
        description: String,
        available: bool,
    ) -> Self {
        Self {
            id,
            owner_id,
            name,
            description,
            available,
            bookings: Vec::new(),
            comments: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Return only bookings whose window interferes with the query window
    /// (inclusive on both edges — touching windows count). Binary search
    /// skips bookings starting strictly after `query.end`.
    pub fn interfering(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start <= query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end >= query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserCreated {
        id: Ulid,
        name: String,
        email: String,
    },
    UserUpdated {
        id: Ulid,
        name: Option<String>,
        email: Option<String>,
    },
    UserRemoved {
        id: Ulid,
    },
    ItemCreated {
        id: Ulid,
        owner_id: Ulid,
        name: String,
        description: String,
        available: bool,
    },
    ItemUpdated {
        id: Ulid,
        name: Option<String>,
        description: Option<String>,
        available: Option<bool>,
    },
    BookingRequested {
        id: Ulid,
        item_id: Ulid,
        booker_id: Ulid,
        span: Span,
    },
    BookingDecided {
        id: Ulid,
        item_id: Ulid,
        approved: bool,
    },
    CommentAdded {
        id: Ulid,
        item_id: Ulid,
        author_id: Ulid,
        text: String,
        created_at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

/// A booking flattened out of its item state for callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub item_id: Ulid,
    pub booker_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub status: Status,
}

impl BookingInfo {
    pub fn from_booking(b: &Booking, item_id: Ulid) -> Self {
        Self {
            id: b.id,
            item_id,
            booker_id: b.booker_id,
            start: b.span.start,
            end: b.span.end,
            status: b.status,
        }
    }
}

/// Weak reference to a booking carried inside a summary — identifier plus
/// the display fields, no ownership of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingRef {
    pub id: Ulid,
    pub booker_id: Ulid,
    pub start: Ms,
    pub end: Ms,
}

impl BookingRef {
    pub fn from_booking(b: &Booking) -> Self {
        Self {
            id: b.id,
            booker_id: b.booker_id,
            start: b.span.start,
            end: b.span.end,
        }
    }
}

/// Per-item booking summary: most recent past and nearest future approved
/// booking relative to a reference instant, plus the all-time approved count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BookingSummary {
    pub last_booking: Option<BookingRef>,
    pub next_booking: Option<BookingRef>,
    pub rent_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    pub description: String,
    pub available: bool,
    /// Present only when the caller owns the item.
    pub summary: Option<BookingSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentInfo {
    pub id: Ulid,
    pub item_id: Ulid,
    pub author_id: Ulid,
    pub text: String,
    pub created_at: Ms,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_interference_is_inclusive() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        let d = Span::new(201, 300);
        assert!(a.interferes(&b));
        assert!(a.interferes(&c)); // touching windows collide
        assert!(!a.interferes(&d));
    }

    #[test]
    fn booking_ordering() {
        let mut item = ItemState::new(Ulid::new(), Ulid::new(), "drill".into(), String::new(), true);
        for (start, end) in [(300, 400), (100, 200), (200, 300)] {
            item.insert_booking(Booking {
                id: Ulid::new(),
                booker_id: Ulid::new(),
                span: Span::new(start, end),
                status: Status::Waiting,
            });
        }
        assert_eq!(item.bookings[0].span.start, 100);
        assert_eq!(item.bookings[1].span.start, 200);
        assert_eq!(item.bookings[2].span.start, 300);
    }

    #[test]
    fn interfering_includes_touching() {
        let mut item = ItemState::new(Ulid::new(), Ulid::new(), "drill".into(), String::new(), true);
        item.insert_booking(Booking {
            id: Ulid::new(),
            booker_id: Ulid::new(),
            span: Span::new(100, 200),
            status: Status::Approved,
        });
        // New window starting exactly where the existing one ends
        let hits: Vec<_> = item.interfering(&Span::new(200, 300)).collect();
        assert_eq!(hits.len(), 1);
        // And the mirror case: ending exactly where the existing one starts
        let hits: Vec<_> = item.interfering(&Span::new(50, 100)).collect();
        assert_eq!(hits.len(), 1);
        // Strictly disjoint windows stay clear
        let hits: Vec<_> = item.interfering(&Span::new(201, 300)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn interfering_skips_far_future() {
        let mut item = ItemState::new(Ulid::new(), Ulid::new(), "drill".into(), String::new(), true);
        for (start, end) in [(100, 200), (450, 600), (1000, 1100)] {
            item.insert_booking(Booking {
                id: Ulid::new(),
                booker_id: Ulid::new(),
                span: Span::new(start, end),
                status: Status::Approved,
            });
        }
        let hits: Vec<_> = item.interfering(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn booking_lookup_by_id() {
        let mut item = ItemState::new(Ulid::new(), Ulid::new(), "drill".into(), String::new(), true);
        let id = Ulid::new();
        item.insert_booking(Booking {
            id,
            booker_id: Ulid::new(),
            span: Span::new(100, 200),
            status: Status::Waiting,
        });
        assert!(item.booking(id).is_some());
        assert!(item.booking(Ulid::new()).is_none());
    }

    #[test]
    fn status_display_matches_wire_labels() {
        assert_eq!(Status::Waiting.to_string(), "WAITING");
        assert_eq!(Status::Approved.to_string(), "APPROVED");
        assert_eq!(Status::Rejected.to_string(), "REJECTED");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingRequested {
            id: Ulid::new(),
            item_id: Ulid::new(),
            booker_id: Ulid::new(),
            span: Span::new(1000, 2000),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
