use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::model::*;

/// Build one instant from a calendar date and a minute-of-day.
pub fn combine(date: NaiveDate, minute: Minute) -> NaiveDateTime {
    let time = NaiveTime::from_num_seconds_from_midnight_opt(u32::from(minute) * 60, 0)
        .unwrap_or(NaiveTime::MIN);
    date.and_time(time)
}

/// Where `now` falls relative to a booking: before it, inside it (both ends
/// inclusive), or after it.
pub fn classify_temporal(date: NaiveDate, span: Span, now: NaiveDateTime) -> TemporalState {
    let start = combine(date, span.start);
    let end = combine(date, span.end);
    if now < start {
        TemporalState::Upcoming
    } else if now <= end {
        TemporalState::Ongoing
    } else {
        TemporalState::Finished
    }
}

/// Display label for a persisted approval-status code. Unknown codes are
/// labelled, not rejected.
pub fn label_for_status(code: i64) -> &'static str {
    match ApprovalStatus::from_code(code) {
        Some(ApprovalStatus::Pending) => "Pending",
        Some(ApprovalStatus::Approved) => "Approved",
        Some(ApprovalStatus::Deactivated) => "Deactivated",
        Some(ApprovalStatus::Active) => "Active",
        None => "Unknown",
    }
}
