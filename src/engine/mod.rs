mod availability;
mod conflict;
mod error;
mod hours;
mod mutations;
mod queries;
mod slots;

pub use availability::build_report;
pub use conflict::{find_conflict, too_soon};
pub use error::EngineError;
pub use hours::{default_window, resolve_window};
pub use slots::generate_slots;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedFacilityState = Arc<RwLock<FacilityState>>;

/// Write-path policy switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmissionPolicy {
    /// Also enforce the minimum lead time on direct reservation creation.
    /// Off by default: the grid hides too-soon slots from self-service
    /// users, while direct writes (e.g. staff taking a phone booking for
    /// right now) go through. Named here so the asymmetry is a choice,
    /// not an accident.
    pub enforce_lead_time: bool,
}

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

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the current batch before the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

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
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
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

/// One tenant's booking engine: every facility the tenant operates, each
/// behind its own lock, all durable changes funnelled through one WAL.
pub struct Engine {
    pub state: DashMap<FacilityId, SharedFacilityState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub policy: AdmissionPolicy,
    /// Reverse lookup: reservation id → facility id.
    pub(super) reservation_index: DashMap<ReservationId, FacilityId>,
}

/// Apply an event directly to a FacilityState (no locking — caller holds
/// the lock).
fn apply_to_facility(
    fs: &mut FacilityState,
    event: &Event,
    reservation_index: &DashMap<ReservationId, FacilityId>,
) {
    match event {
        Event::FacilityUpdated {
            name,
            hourly_rate,
            active,
            ..
        } => {
            fs.name = name.clone();
            fs.hourly_rate = *hourly_rate;
            fs.active = *active;
        }
        Event::HoursRuleSet {
            weekday,
            start,
            end,
            available,
            ..
        } => {
            fs.hours[*weekday as usize] = Some(HoursRule {
                start: *start,
                end: *end,
                available: *available,
            });
        }
        Event::HoursRuleCleared { weekday, .. } => {
            fs.hours[*weekday as usize] = None;
        }
        Event::ReservationCreated { reservation } => {
            reservation_index.insert(reservation.id, reservation.facility_id);
            fs.insert_reservation(reservation.clone());
        }
        Event::ReservationStatusChanged { id, status, .. } => {
            if let Some(r) = fs.reservation_mut(*id) {
                r.status = *status;
            }
        }
        // FacilityCreated/Deleted are handled at the DashMap level, not here
        Event::FacilityCreated { .. } | Event::FacilityDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        policy: AdmissionPolicy,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            policy,
            reservation_index: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use
        // blocking_write here because this may run inside an async context
        // (e.g. lazy tenant creation).
        for event in &events {
            match event {
                Event::FacilityCreated {
                    id,
                    name,
                    hourly_rate,
                    active,
                } => {
                    let fs = FacilityState::new(*id, name.clone(), *hourly_rate, *active);
                    engine.state.insert(*id, Arc::new(RwLock::new(fs)));
                }
                Event::FacilityDeleted { id } => {
                    engine.state.remove(id);
                    engine.reservation_index.retain(|_, fid| fid != id);
                }
                other => {
                    if let Some(facility_id) = event_facility_id(other)
                        && let Some(entry) = engine.state.get(&facility_id)
                    {
                        let fs_arc = entry.clone();
                        let mut guard = fs_arc.try_write().expect("replay: uncontended write");
                        apply_to_facility(&mut guard, other, &engine.reservation_index);
                    }
                }
            }
        }

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

    pub fn get_facility(&self, id: &FacilityId) -> Option<SharedFacilityState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn facility_for_reservation(&self, reservation_id: &ReservationId) -> Option<FacilityId> {
        self.reservation_index
            .get(reservation_id)
            .map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call — the invariant sequence for
    /// every durable mutation. The caller holds the facility's write lock
    /// across it, which is what makes admission atomic.
    pub(super) async fn persist_and_apply(
        &self,
        facility_id: FacilityId,
        fs: &mut FacilityState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_facility(fs, event, &self.reservation_index);
        self.notify.send(facility_id, event);
        Ok(())
    }

    /// Lookup reservation → facility, get facility, acquire write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &ReservationId,
    ) -> Result<
        (
            FacilityId,
            tokio::sync::OwnedRwLockWriteGuard<FacilityState>,
        ),
        EngineError,
    > {
        let facility_id = self
            .facility_for_reservation(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let fs = self
            .get_facility(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        let guard = fs.write_owned().await;
        Ok((facility_id, guard))
    }
}

/// Extract the facility id from an event (for non-Create/Delete events).
fn event_facility_id(event: &Event) -> Option<FacilityId> {
    match event {
        Event::HoursRuleSet { facility_id, .. }
        | Event::HoursRuleCleared { facility_id, .. }
        | Event::ReservationStatusChanged { facility_id, .. } => Some(*facility_id),
        Event::ReservationCreated { reservation } => Some(reservation.facility_id),
        Event::FacilityUpdated { id, .. } => Some(*id),
        Event::FacilityCreated { .. } | Event::FacilityDeleted { .. } => None,
    }
}
