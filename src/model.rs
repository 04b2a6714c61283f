use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minute of the day, `0..1440`. The only time-of-day type.
pub type Minute = u16;

pub const MINUTES_PER_DAY: Minute = 1440;

/// Half-open interval `[start, end)` in minutes of a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

/// A free interval is a span nobody has booked.
pub type FreeInterval = Span;

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for untrusted input.
    pub fn try_new(start: Minute, end: Minute) -> Option<Self> {
        (start < end && end < MINUTES_PER_DAY).then_some(Self { start, end })
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_minute(&self, t: Minute) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Approval workflow state, persisted as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Deactivated,
    Active,
}

impl ApprovalStatus {
    pub fn code(self) -> i64 {
        match self {
            ApprovalStatus::Pending => 1,
            ApprovalStatus::Approved => 2,
            ApprovalStatus::Deactivated => 3,
            ApprovalStatus::Active => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ApprovalStatus::Pending),
            2 => Some(ApprovalStatus::Approved),
            3 => Some(ApprovalStatus::Deactivated),
            4 => Some(ApprovalStatus::Active),
            _ => None,
        }
    }

    /// Whether the booking still occupies its interval.
    pub fn is_active(self) -> bool {
        self != ApprovalStatus::Deactivated
    }
}

/// Derived occupancy of a booking relative to now. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemporalState {
    Upcoming,
    Ongoing,
    Finished,
}

impl TemporalState {
    pub fn as_str(self) -> &'static str {
        match self {
            TemporalState::Upcoming => "Upcoming",
            TemporalState::Ongoing => "Ongoing",
            TemporalState::Finished => "Finished",
        }
    }
}

/// Someone attending a booking. Opaque to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub name: String,
    /// Daily operating hours.
    pub window: Span,
    /// Open (true) or Closed (false). Closed rooms take no new bookings.
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
    pub status: ApprovalStatus,
    pub participants: Vec<Participant>,
}

/// In-memory state of one resource: its settings plus every booking ever made
/// on it (deactivated ones included, for history).
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub resource: Resource,
    /// Bookings per date, each list sorted by `(span.start, span.end)`.
    pub bookings: std::collections::BTreeMap<NaiveDate, Vec<Booking>>,
}

impl ResourceState {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            bookings: std::collections::BTreeMap::new(),
        }
    }

    /// Insert booking maintaining sort order by span.
    pub fn insert_booking(&mut self, booking: Booking) {
        let day = self.bookings.entry(booking.date).or_default();
        let pos = day
            .binary_search_by_key(&booking.span, |b| b.span)
            .unwrap_or_else(|e| e);
        day.insert(pos, booking);
    }

    pub fn find_booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.values().flatten().find(|b| b.id == id)
    }

    pub fn find_booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.values_mut().flatten().find(|b| b.id == id)
    }

    /// Spans of non-deactivated bookings on `date`, in start order.
    pub fn active_spans(&self, date: NaiveDate) -> Vec<Span> {
        self.active_bookings(date).map(|b| b.span).collect()
    }

    pub fn active_bookings(&self, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        self.bookings
            .get(&date)
            .into_iter()
            .flatten()
            .filter(|b| b.status.is_active())
    }

    pub fn active_count(&self, date: NaiveDate) -> usize {
        self.active_bookings(date).count()
    }

    pub fn all_bookings(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.values().flatten()
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: Ulid,
        name: String,
        window: Span,
        enabled: bool,
    },
    ResourceUpdated {
        id: Ulid,
        name: String,
        window: Span,
        enabled: bool,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        resource_id: Ulid,
        status: ApprovalStatus,
    },
}
