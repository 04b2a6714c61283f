//! Fixed-step selectable instants for start/end pickers.

use thiserror::Error;

use crate::model::{Minute, Span};

pub const DEFAULT_STEP_MINUTES: Minute = 15;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("slot range inverted: start {start} > end {end}")]
    Inverted { start: Minute, end: Minute },
    #[error("slot step must be positive")]
    ZeroStep,
    #[error("chosen start {start} is not inside free interval {interval}")]
    StartOutsideInterval { start: Minute, interval: Span },
}

/// Every `start + k * step` that is `<= end`. Always includes `start`;
/// includes `end` only when the step divides the range.
pub fn generate(start: Minute, end: Minute, step: Minute) -> Result<Vec<Minute>, RangeError> {
    if step == 0 {
        return Err(RangeError::ZeroStep);
    }
    if start > end {
        return Err(RangeError::Inverted { start, end });
    }
    Ok((start..=end).step_by(step.into()).collect())
}

/// Start choices across a day's free intervals. A start equal to the end of
/// its interval could never be booked, so it is left out.
pub fn start_options(free: &[Span], step: Minute) -> Result<Vec<Minute>, RangeError> {
    let mut options = Vec::new();
    for interval in free {
        options.extend(
            generate(interval.start, interval.end, step)?
                .into_iter()
                .filter(|&m| m < interval.end),
        );
    }
    Ok(options)
}

/// End choices once `chosen_start` has been picked inside `interval`: later
/// than the start and never past the interval end, so the selection cannot
/// cross into a booked period.
pub fn end_options(interval: Span, chosen_start: Minute, step: Minute) -> Result<Vec<Minute>, RangeError> {
    if !interval.contains_minute(chosen_start) {
        return Err(RangeError::StartOutsideInterval { start: chosen_start, interval });
    }
    Ok(generate(chosen_start, interval.end, step)?
        .into_iter()
        .skip(1)
        .collect())
}
