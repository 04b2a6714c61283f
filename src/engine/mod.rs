mod availability;
mod classify;
mod error;
mod mutations;
mod queries;
mod validate;

pub use availability::{free_intervals, merge_overlapping, DataIntegrityError};
pub use classify::{classify_temporal, combine, label_for_status};
pub use error::EngineError;
pub use validate::{validate, Rejection, Verdict};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} event(s) failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking store: every resource's state behind its own lock, fed by and
/// persisted to a write-ahead log.
pub struct Engine {
    pub state: DashMap<Ulid, SharedResourceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id → resource id
    pub(super) booking_to_resource: DashMap<Ulid, Ulid>,
    /// Mutations hold this shared from before their resource lock until the
    /// event is applied; compaction holds it exclusively from snapshot to swap.
    pub(super) compaction_gate: RwLock<()>,
}

/// Apply an event directly to a ResourceState (no locking, caller holds the lock).
fn apply_to_resource(rs: &mut ResourceState, event: &Event, booking_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ResourceUpdated {
            name,
            window,
            enabled,
            ..
        } => {
            rs.resource.name = name.clone();
            rs.resource.window = *window;
            rs.resource.enabled = *enabled;
        }
        Event::BookingCreated { booking } => {
            booking_map.insert(booking.id, booking.resource_id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(booking) = rs.find_booking_mut(*id) {
                booking.status = *status;
            }
        }
        // ResourceCreated is handled at the DashMap level, not here
        Event::ResourceCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            booking_to_resource: DashMap::new(),
            compaction_gate: RwLock::new(()),
        };

        // We're the sole owner of these Arcs during replay, so try_write always
        // succeeds instantly. Never use blocking_write here: this may run inside
        // an async context (lazy tenant creation).
        for event in &events {
            match event {
                Event::ResourceCreated { id, name, window, enabled } => {
                    let rs = ResourceState::new(Resource {
                        id: *id,
                        name: name.clone(),
                        window: *window,
                        enabled: *enabled,
                    });
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                other => {
                    let resource_id = event_resource_id(other);
                    if let Some(entry) = engine.state.get(&resource_id) {
                        let rs_arc = entry.clone();
                        match rs_arc.try_write() {
                            Ok(mut guard) => {
                                apply_to_resource(&mut guard, other, &engine.booking_to_resource)
                            }
                            Err(_) => tracing::warn!("replay: resource {resource_id} locked, skipping event"),
                        }
                    } else {
                        tracing::warn!("replay: event for unknown resource {resource_id}");
                    }
                }
            }
        }

        tracing::info!(
            "engine loaded {} resource(s), {} booking(s) from {} WAL event(s)",
            engine.state.len(),
            engine.booking_to_resource.len(),
            events.len()
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) fn resource_state(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn resource_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_resource.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_resource(rs, event, &self.booking_to_resource);
        Ok(())
    }

    /// Lookup booking → resource, get resource, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ResourceState>), EngineError> {
        let resource_id = self
            .resource_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.write_owned().await;
        Ok((resource_id, guard))
    }
}

/// The resource an event belongs to.
fn event_resource_id(event: &Event) -> Ulid {
    match event {
        Event::ResourceCreated { id, .. } | Event::ResourceUpdated { id, .. } => *id,
        Event::BookingCreated { booking } => booking.resource_id,
        Event::BookingStatusChanged { resource_id, .. } => *resource_id,
    }
}
