use thiserror::Error;

use crate::model::*;

/// Stored bookings that break basic interval sanity. Never silently repaired.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataIntegrityError {
    #[error("booking {0} has non-positive length")]
    EmptyBooking(Span),
    #[error("booking {booking} lies outside operating window {window}")]
    OutsideWindow { booking: Span, window: Span },
}

// ── Availability Algorithm ────────────────────────────────────────

/// Compute the free intervals of an operating `window` given the active
/// bookings of one resource on one date.
///
/// Single sweep over the bookings in `(start, end)` order; the cursor only
/// moves forward (`max`), so overlapping and back-to-back bookings merge
/// instead of producing negative or duplicated gaps. The result is disjoint,
/// ordered by start, and never contains a zero-length interval.
pub fn free_intervals(window: Span, bookings: &[Span]) -> Result<Vec<FreeInterval>, DataIntegrityError> {
    for &b in bookings {
        check_booking(window, b)?;
    }
    if bookings.is_empty() {
        return Ok(vec![window]);
    }

    let mut sorted = bookings.to_vec();
    sorted.sort();

    let mut free = Vec::new();
    let mut cursor = window.start;
    for b in &sorted {
        if cursor < b.start {
            free.push(Span::new(cursor, b.start));
        }
        cursor = cursor.max(b.end);
    }
    if cursor < window.end {
        free.push(Span::new(cursor, window.end));
    }
    Ok(free)
}

fn check_booking(window: Span, booking: Span) -> Result<(), DataIntegrityError> {
    if booking.start >= booking.end {
        return Err(DataIntegrityError::EmptyBooking(booking));
    }
    if booking.start < window.start || booking.end > window.end {
        return Err(DataIntegrityError::OutsideWindow { booking, window });
    }
    Ok(())
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}
