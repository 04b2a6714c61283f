use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::model::*;
use crate::slots;

use super::availability::free_intervals;
use super::classify::classify_temporal;
use super::mutations::integrity_violation;
use super::validate::{validate, Verdict};
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_resource(&self, id: &Ulid) -> Option<Resource> {
        let rs = self.resource_state(id)?;
        let guard = rs.read().await;
        Some(guard.resource.clone())
    }

    /// All resources, ordered by name then id.
    pub async fn list_resources(&self) -> Vec<Resource> {
        let states: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(states.len());
        for rs in states {
            out.push(rs.read().await.resource.clone());
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        let resource_id = self.resource_for_booking(id)?;
        let rs = self.resource_state(&resource_id)?;
        let guard = rs.read().await;
        guard.find_booking(*id).cloned()
    }

    /// Non-deactivated bookings of a resource on one date, in start order.
    pub async fn list_active_bookings(&self, resource_id: Ulid, date: NaiveDate) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard.active_bookings(date).cloned().collect())
    }

    /// Every booking of a resource, deactivated ones included, optionally
    /// restricted to one date. Ordered by date, then start.
    pub async fn list_bookings(&self, resource_id: Ulid, date: Option<NaiveDate>) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        let bookings = match date {
            Some(d) => guard.bookings.get(&d).cloned().unwrap_or_default(),
            None => guard.all_bookings().cloned().collect(),
        };
        Ok(bookings)
    }

    /// Free intervals of a resource on a date. A closed resource has none.
    /// With `min_duration`, shorter intervals are dropped.
    pub async fn compute_free_intervals(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        min_duration: Option<Minute>,
    ) -> Result<Vec<FreeInterval>, EngineError> {
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        if !guard.resource.enabled {
            return Ok(Vec::new());
        }
        let mut free = free_intervals(guard.resource.window, &guard.active_spans(date))
            .map_err(|e| integrity_violation(resource_id, date, e))?;
        if let Some(min) = min_duration {
            free.retain(|f| f.duration() >= min);
        }
        Ok(free)
    }

    /// Check a proposed booking against a snapshot of the resource's current
    /// bookings. Nothing is written; `create_booking` repeats the check under
    /// the write lock.
    pub async fn validate_and_prepare(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        start: Minute,
        end: Minute,
    ) -> Result<Verdict, EngineError> {
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        if !guard.resource.enabled {
            return Err(EngineError::ResourceDisabled(resource_id));
        }
        validate(guard.resource.window, &guard.active_spans(date), start, end)
            .map_err(|e| integrity_violation(resource_id, date, e))
    }

    pub fn classify(booking: &Booking, now: NaiveDateTime) -> TemporalState {
        classify_temporal(booking.date, booking.span, now)
    }

    /// Selectable start times on a date, or, once `chosen_start` is given,
    /// the end times reachable from it without crossing a booking. A start
    /// that is not free yields no options.
    pub async fn slot_options(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        step: Minute,
        chosen_start: Option<Minute>,
    ) -> Result<Vec<Minute>, EngineError> {
        let free = self.compute_free_intervals(resource_id, date, None).await?;
        let options = match chosen_start {
            None => slots::start_options(&free, step)?,
            Some(start) => match free.iter().find(|f| f.contains_minute(start)) {
                Some(interval) => slots::end_options(*interval, start, step)?,
                None => Vec::new(),
            },
        };
        Ok(options)
    }
}
