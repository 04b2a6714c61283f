use crate::model::*;

use super::availability::{free_intervals, merge_overlapping, DataIntegrityError};

/// Why a booking request was turned down. An expected outcome, not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// `start >= end`.
    InvalidRange,
    /// Not inside the resource's operating window.
    OutsideOperatingHours,
    /// Collides with the given (merged) booked interval.
    Overlaps(Span),
}

impl Rejection {
    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::InvalidRange => "invalid_range",
            Rejection::OutsideOperatingHours => "outside_operating_hours",
            Rejection::Overlaps(_) => "overlaps",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::InvalidRange => write!(f, "invalid range: start must be before end"),
            Rejection::OutsideOperatingHours => write!(f, "outside operating hours"),
            Rejection::Overlaps(span) => write!(f, "overlaps booked interval {span}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// Check a proposed `[start, end)` against the active bookings of a resource
/// on one date. Accepts only when the request sits entirely inside a single
/// free interval; partial overlap is always a rejection.
pub fn validate(
    window: Span,
    bookings: &[Span],
    start: Minute,
    end: Minute,
) -> Result<Verdict, DataIntegrityError> {
    if start >= end {
        return Ok(Verdict::Rejected(Rejection::InvalidRange));
    }
    let request = Span::new(start, end);
    if !window.contains_span(&request) {
        return Ok(Verdict::Rejected(Rejection::OutsideOperatingHours));
    }

    let free = free_intervals(window, bookings)?;
    if free.iter().any(|f| f.contains_span(&request)) {
        return Ok(Verdict::Accepted);
    }

    let mut sorted = bookings.to_vec();
    sorted.sort();
    let conflict = merge_overlapping(&sorted)
        .into_iter()
        .find(|b| b.overlaps(&request))
        .unwrap_or(request);
    Ok(Verdict::Rejected(Rejection::Overlaps(conflict)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const H: Minute = 60;

    fn office() -> Span {
        Span::new(8 * H, 16 * H)
    }

    #[test]
    fn accepts_inside_free_interval() {
        let booked = [Span::new(9 * H, 10 * H)];
        assert_eq!(validate(office(), &booked, 8 * H, 9 * H).unwrap(), Verdict::Accepted);
        assert_eq!(validate(office(), &booked, 10 * H, 16 * H).unwrap(), Verdict::Accepted);
    }

    #[test]
    fn rejects_inside_booked_interval() {
        let booked = [Span::new(9 * H, 10 * H)];
        let verdict = validate(office(), &booked, 9 * H + 30, 9 * H + 45).unwrap();
        assert_eq!(verdict, Verdict::Rejected(Rejection::Overlaps(Span::new(9 * H, 10 * H))));
    }

    #[test]
    fn rejects_partial_overlap() {
        let booked = [Span::new(9 * H, 10 * H)];
        let verdict = validate(office(), &booked, 8 * H + 30, 9 * H + 30).unwrap();
        assert_eq!(verdict, Verdict::Rejected(Rejection::Overlaps(Span::new(9 * H, 10 * H))));
    }

    #[test]
    fn rejects_request_spanning_booking() {
        let booked = [Span::new(9 * H, 10 * H)];
        let verdict = validate(office(), &booked, 8 * H, 11 * H).unwrap();
        assert!(matches!(verdict, Verdict::Rejected(Rejection::Overlaps(_))));
    }

    #[test]
    fn overlap_reports_merged_interval() {
        let booked = [Span::new(9 * H, 11 * H), Span::new(10 * H, 12 * H)];
        let verdict = validate(office(), &booked, 11 * H, 11 * H + 30).unwrap();
        assert_eq!(verdict, Verdict::Rejected(Rejection::Overlaps(Span::new(9 * H, 12 * H))));
    }

    #[test]
    fn rejects_inverted_and_empty_range() {
        assert_eq!(
            validate(office(), &[], 10 * H, 10 * H).unwrap(),
            Verdict::Rejected(Rejection::InvalidRange)
        );
        assert_eq!(
            validate(office(), &[], 11 * H, 10 * H).unwrap(),
            Verdict::Rejected(Rejection::InvalidRange)
        );
    }

    #[test]
    fn rejects_outside_operating_hours() {
        assert_eq!(
            validate(office(), &[], 7 * H, 9 * H).unwrap(),
            Verdict::Rejected(Rejection::OutsideOperatingHours)
        );
        assert_eq!(
            validate(office(), &[], 15 * H, 17 * H).unwrap(),
            Verdict::Rejected(Rejection::OutsideOperatingHours)
        );
    }

    #[test]
    fn whole_window_accepted_when_empty() {
        assert!(validate(office(), &[], 8 * H, 16 * H).unwrap().is_accepted());
    }

    #[test]
    fn corrupt_bookings_surface_integrity_error() {
        let booked = [Span::new(6 * H, 7 * H)];
        assert!(validate(office(), &booked, 9 * H, 10 * H).is_err());
    }

    proptest! {
        #[test]
        fn accepted_iff_contained_in_a_free_interval(
            raw in prop::collection::vec((480u16..960, 1u16..120), 0..8),
            start in 480u16..960,
            len in 1u16..240,
        ) {
            let window = office();
            let bookings: Vec<Span> = raw
                .into_iter()
                .map(|(s, l)| Span::new(s, (s + l).min(window.end)))
                .collect();
            let end = (start + len).min(window.end);
            prop_assume!(start < end);

            let verdict = validate(window, &bookings, start, end).unwrap();
            let request = Span::new(start, end);
            let contained = free_intervals(window, &bookings)
                .unwrap()
                .iter()
                .any(|f| f.contains_span(&request));
            let overlaps_any = bookings.iter().any(|b| b.overlaps(&request));

            prop_assert_eq!(verdict.is_accepted(), contained);
            prop_assert_eq!(verdict.is_accepted(), !overlaps_any);
        }
    }
}
