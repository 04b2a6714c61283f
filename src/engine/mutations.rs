use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::DataIntegrityError;
use super::validate::{validate, Verdict};
use super::{Engine, EngineError, WalCommand};

/// Operating windows must be non-empty and inside one day.
pub(super) fn check_window(window: Span) -> Result<(), EngineError> {
    if window.start >= window.end {
        return Err(EngineError::InvalidWindow(format!(
            "open {} must be before close {}",
            window.start, window.end
        )));
    }
    if window.end >= MINUTES_PER_DAY {
        return Err(EngineError::InvalidWindow(format!(
            "close {} is past the end of the day",
            window.end
        )));
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("resource name too long"));
    }
    Ok(())
}

fn check_participants(participants: &[Participant]) -> Result<(), EngineError> {
    if participants.len() > MAX_PARTICIPANTS {
        return Err(EngineError::LimitExceeded("too many participants"));
    }
    let too_long = |s: &Option<String>| s.as_ref().is_some_and(|v| v.len() > MAX_PARTICIPANT_FIELD_LEN);
    if participants
        .iter()
        .any(|p| p.name.len() > MAX_PARTICIPANT_FIELD_LEN || too_long(&p.company) || too_long(&p.contact))
    {
        return Err(EngineError::LimitExceeded("participant field too long"));
    }
    Ok(())
}

/// Log and count a data-integrity violation, then hand it back as an engine error.
pub(super) fn integrity_violation(resource_id: Ulid, date: NaiveDate, e: DataIntegrityError) -> EngineError {
    warn!("resource {resource_id} on {date}: {e}");
    metrics::counter!(observability::DATA_INTEGRITY_VIOLATIONS_TOTAL).increment(1);
    EngineError::DataIntegrity(e)
}

fn note_rejection(resource_id: Ulid, date: NaiveDate, span: (Minute, Minute), verdict: &Verdict, stage: &'static str) {
    if let Verdict::Rejected(reason) = verdict {
        debug!(
            "booking [{}, {}) on {resource_id} for {date} rejected at {stage}: {reason}",
            span.0, span.1
        );
        metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => reason.label(), "stage" => stage)
            .increment(1);
    }
}

impl Engine {
    pub async fn create_resource(
        &self,
        id: Ulid,
        name: String,
        window: Span,
        enabled: bool,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_RESOURCES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        check_name(&name)?;
        check_window(window)?;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let _writes = self.compaction_gate.read().await;

        let event = Event::ResourceCreated { id, name: name.clone(), window, enabled };
        self.wal_append(&event).await?;
        let rs = ResourceState::new(Resource { id, name, window, enabled });
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        info!("resource {id} created, hours {window}");
        Ok(())
    }

    /// Replace a resource's name, hours and open/closed flag. Hours cannot be
    /// narrowed past any active booking.
    pub async fn update_resource(
        &self,
        id: Ulid,
        name: String,
        window: Span,
        enabled: bool,
    ) -> Result<(), EngineError> {
        check_name(&name)?;
        check_window(window)?;
        let rs = self.resource_state(&id).ok_or(EngineError::NotFound(id))?;
        let _writes = self.compaction_gate.read().await;
        let mut guard = rs.write().await;

        let excluded = guard
            .all_bookings()
            .filter(|b| b.status.is_active() && !window.contains_span(&b.span))
            .count();
        if excluded > 0 {
            return Err(EngineError::WindowExcludesBookings { window, count: excluded });
        }

        let event = Event::ResourceUpdated { id, name, window, enabled };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("resource {id} updated, hours {window}, enabled={enabled}");
        Ok(())
    }

    /// Soft-disable: the resource stays (bookings reference it) but is closed.
    pub async fn disable_resource(&self, id: Ulid) -> Result<(), EngineError> {
        let _writes = self.compaction_gate.read().await;
        let rs = self.resource_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        let event = Event::ResourceUpdated {
            id,
            name: guard.resource.name.clone(),
            window: guard.resource.window,
            enabled: false,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("resource {id} closed");
        Ok(())
    }

    /// Validate, then insert under the resource's write lock after validating
    /// again against the bookings present at that moment. A conflict found at
    /// insert time comes back as the same `Rejected(Overlaps)` a failed
    /// validation would give.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_booking(
        &self,
        id: Ulid,
        resource_id: Ulid,
        date: NaiveDate,
        start: Minute,
        end: Minute,
        participants: Vec<Participant>,
        status: ApprovalStatus,
    ) -> Result<Verdict, EngineError> {
        if self.booking_to_resource.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        check_participants(&participants)?;

        // A booking recorded as already deactivated occupies nothing.
        let occupying = status.is_active();
        if occupying {
            let snapshot = self.validate_and_prepare(resource_id, date, start, end).await?;
            if !snapshot.is_accepted() {
                note_rejection(resource_id, date, (start, end), &snapshot, "validate");
                return Ok(snapshot);
            }
        }

        let _writes = self.compaction_gate.read().await;
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        if !guard.resource.enabled {
            return Err(EngineError::ResourceDisabled(resource_id));
        }
        if occupying && guard.active_count(date) >= MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings for this day"));
        }

        let booked = if occupying { guard.active_spans(date) } else { Vec::new() };
        let verdict = validate(guard.resource.window, &booked, start, end)
            .map_err(|e| integrity_violation(resource_id, date, e))?;
        if !verdict.is_accepted() {
            note_rejection(resource_id, date, (start, end), &verdict, "insert");
            return Ok(verdict);
        }

        let booking = Booking {
            id,
            resource_id,
            date,
            span: Span::new(start, end),
            status,
            participants,
        };
        let event = Event::BookingCreated { booking };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!("booking {id} on {resource_id} for {date} [{start}, {end}) created");
        Ok(Verdict::Accepted)
    }

    /// Move a booking through the approval workflow. Bringing a deactivated
    /// booking back re-checks it against everything booked since.
    pub async fn set_booking_status(&self, id: Ulid, status: ApprovalStatus) -> Result<Verdict, EngineError> {
        let _writes = self.compaction_gate.read().await;
        let (resource_id, mut guard) = self.resolve_booking_write(&id).await?;
        let current = guard.find_booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        if current.status == status {
            return Ok(Verdict::Accepted);
        }

        if !current.status.is_active() && status.is_active() {
            if guard.active_count(current.date) >= MAX_BOOKINGS_PER_DAY {
                return Err(EngineError::LimitExceeded("too many bookings for this day"));
            }
            let verdict = validate(
                guard.resource.window,
                &guard.active_spans(current.date),
                current.span.start,
                current.span.end,
            )
            .map_err(|e| integrity_violation(resource_id, current.date, e))?;
            if !verdict.is_accepted() {
                note_rejection(
                    resource_id,
                    current.date,
                    (current.span.start, current.span.end),
                    &verdict,
                    "reactivate",
                );
                return Ok(verdict);
            }
        }

        let event = Event::BookingStatusChanged { id, resource_id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("booking {id} status {:?} -> {status:?}", current.status);
        Ok(Verdict::Accepted)
    }

    /// Retire a booking. Its interval frees up immediately; the record stays.
    pub async fn deactivate_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.set_booking_status(id, ApprovalStatus::Deactivated).await?;
        self.resource_for_booking(&id).ok_or(EngineError::NotFound(id))
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    /// Writers stay paused until the compacted log has replaced the old one.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _paused = self.compaction_gate.write().await;
        let resources: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for rs in resources {
            let guard = rs.read().await;
            let r = &guard.resource;
            events.push(Event::ResourceCreated {
                id: r.id,
                name: r.name.clone(),
                window: r.window,
                enabled: r.enabled,
            });
            events.extend(
                guard
                    .all_bookings()
                    .map(|b| Event::BookingCreated { booking: b.clone() }),
            );
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} event(s)");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
