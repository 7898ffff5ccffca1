use chrono::NaiveTime;
use tokio::sync::oneshot;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, now_utc, too_soon, validate_range};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_facility(
        &self,
        id: FacilityId,
        name: String,
        hourly_rate: Option<f64>,
        active: bool,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_FACILITIES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many facilities"));
        }
        if name.trim().is_empty() {
            return Err(EngineError::MissingField("name"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("facility name too long"));
        }
        validate_rate(hourly_rate)?;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::FacilityCreated {
            id,
            name: name.clone(),
            hourly_rate,
            active,
        };
        self.wal_append(&event).await?;
        let fs = FacilityState::new(id, name, hourly_rate, active);
        self.state
            .insert(id, std::sync::Arc::new(tokio::sync::RwLock::new(fs)));
        self.notify.send(id, &event);
        Ok(())
    }

    /// Full replacement of the mutable facility fields. Deactivating a
    /// facility leaves its reservations in place but stops all new
    /// availability and admissions.
    pub async fn update_facility(
        &self,
        id: FacilityId,
        name: String,
        hourly_rate: Option<f64>,
        active: bool,
    ) -> Result<(), EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::MissingField("name"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("facility name too long"));
        }
        validate_rate(hourly_rate)?;
        let fs = self.get_facility(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = fs.write().await;

        let event = Event::FacilityUpdated {
            id,
            name,
            hourly_rate,
            active,
        };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Delete refuses while blocking reservations still lie ahead —
    /// cancel or complete them first.
    pub async fn delete_facility(&self, id: FacilityId) -> Result<(), EngineError> {
        let fs = self.get_facility(&id).ok_or(EngineError::NotFound(id))?;
        let guard = fs.read().await;
        let now = now_utc();
        let has_upcoming = guard
            .reservations
            .iter()
            .any(|r| r.status.is_blocking() && r.range.end > now);
        if has_upcoming {
            return Err(EngineError::HasReservations(id));
        }
        drop(guard);

        let event = Event::FacilityDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        self.reservation_index.retain(|_, fid| fid != &id);
        self.notify.send(id, &event);
        Ok(())
    }

    /// Set (or replace) the operating-hours rule for one weekday,
    /// 0 = Sunday .. 6 = Saturday.
    pub async fn set_hours_rule(
        &self,
        facility_id: FacilityId,
        weekday: u8,
        start: NaiveTime,
        end: NaiveTime,
        available: bool,
    ) -> Result<(), EngineError> {
        if weekday > 6 {
            return Err(EngineError::LimitExceeded("weekday must be 0..=6"));
        }
        let fs = self
            .get_facility(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        let mut guard = fs.write().await;

        let event = Event::HoursRuleSet {
            facility_id,
            weekday,
            start,
            end,
            available,
        };
        self.persist_and_apply(facility_id, &mut guard, &event).await
    }

    /// Remove a weekday's rule, reverting that day to the default window.
    /// Clearing an absent rule is a no-op.
    pub async fn clear_hours_rule(
        &self,
        facility_id: FacilityId,
        weekday: u8,
    ) -> Result<(), EngineError> {
        if weekday > 6 {
            return Err(EngineError::LimitExceeded("weekday must be 0..=6"));
        }
        let fs = self
            .get_facility(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        let mut guard = fs.write().await;
        if guard.hours[weekday as usize].is_none() {
            return Ok(());
        }

        let event = Event::HoursRuleCleared {
            facility_id,
            weekday,
        };
        self.persist_and_apply(facility_id, &mut guard, &event).await
    }

    /// Admit a reservation request, or reject it.
    ///
    /// Validation short-circuits in order: required fields, range sanity,
    /// facility existence and activity, conflicts. The conflict check runs
    /// here, at write time, under the facility's write lock — an
    /// availability report the caller saw earlier is display-only and may
    /// be stale the instant it was produced. Holding the lock across
    /// check + WAL append + apply means that of two racing overlapping
    /// requests exactly one commits; the other gets the same Conflict it
    /// would have gotten sequentially.
    ///
    /// Lead time is only enforced when the policy says so; see
    /// [`super::AdmissionPolicy`].
    pub async fn create_reservation(
        &self,
        id: ReservationId,
        request: ReservationRequest,
    ) -> Result<Reservation, EngineError> {
        let ReservationRequest {
            facility_id,
            requester,
            title,
            description,
            start,
            end,
            notes,
        } = request;

        if requester.name.trim().is_empty() {
            return Err(EngineError::MissingField("name"));
        }
        if requester.email.trim().is_empty() {
            return Err(EngineError::MissingField("email"));
        }
        if title.trim().is_empty() {
            return Err(EngineError::MissingField("title"));
        }
        if title.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("title too long"));
        }
        if requester.name.len() > MAX_CONTACT_LEN
            || requester.email.len() > MAX_CONTACT_LEN
            || requester.phone.as_deref().is_some_and(|p| p.len() > MAX_CONTACT_LEN)
        {
            return Err(EngineError::LimitExceeded("contact field too long"));
        }
        if description.as_deref().is_some_and(|d| d.len() > MAX_TEXT_LEN)
            || notes.as_deref().is_some_and(|n| n.len() > MAX_TEXT_LEN)
        {
            return Err(EngineError::LimitExceeded("text field too long"));
        }

        let range = TimeRange { start, end };
        validate_range(&range)?;

        if self.reservation_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let fs = self
            .get_facility(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        let mut guard = fs.write().await;

        if !guard.active {
            return Err(EngineError::FacilityInactive(facility_id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_FACILITY {
            return Err(EngineError::LimitExceeded("too many reservations on facility"));
        }

        check_no_conflict(&guard, &range)?;

        if self.policy.enforce_lead_time && too_soon(range.start, now_utc()) {
            return Err(EngineError::TooSoon(range.start));
        }

        let duration_hours = range.duration_hours();
        let hourly_rate = guard.hourly_rate;
        let total_cost = hourly_rate.map(|rate| duration_hours * rate);

        let reservation = Reservation {
            id,
            facility_id,
            requester,
            title,
            description,
            range,
            notes,
            status: ReservationStatus::Pending,
            duration_hours,
            hourly_rate,
            total_cost,
        };

        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(facility_id, &mut guard, &event).await?;
        Ok(reservation)
    }

    /// Drive the reservation state machine. Creation is the engine's job;
    /// confirm/cancel/complete arrive from the surrounding workflow
    /// through here.
    pub async fn set_reservation_status(
        &self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> Result<FacilityId, EngineError> {
        let (facility_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard
            .reservation(id)
            .ok_or(EngineError::NotFound(id))?
            .status;
        if !current.can_become(status) {
            return Err(EngineError::InvalidTransition {
                from: current,
                to: status,
            });
        }

        let event = Event::ReservationStatusChanged {
            id,
            facility_id,
            status,
        };
        self.persist_and_apply(facility_id, &mut guard, &event).await?;
        Ok(facility_id)
    }

    /// Confirmed reservations whose interval has fully passed, ready to be
    /// moved to completed by the sweeper.
    pub fn collect_finished_reservations(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Vec<ReservationId> {
        let mut finished = Vec::new();
        for entry in self.state.iter() {
            let fs = entry.value().clone();
            if let Ok(guard) = fs.try_read() {
                for r in &guard.reservations {
                    if r.status == ReservationStatus::Confirmed && r.range.end <= now {
                        finished.push(r.id);
                    }
                }
            }
        }
        finished
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: one create per facility, one rule-set
    /// per weekday, one creation per reservation (each embeds its current
    /// status, so status-change churn collapses away).
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.state.iter() {
            let fs = entry.value().clone();
            let guard = fs.try_read().expect("compact: uncontended read");

            events.push(Event::FacilityCreated {
                id: guard.id,
                name: guard.name.clone(),
                hourly_rate: guard.hourly_rate,
                active: guard.active,
            });

            for (weekday, rule) in guard.hours.iter().enumerate() {
                if let Some(rule) = rule {
                    events.push(Event::HoursRuleSet {
                        facility_id: guard.id,
                        weekday: weekday as u8,
                        start: rule.start,
                        end: rule.end,
                        available: rule.available,
                    });
                }
            }

            for reservation in &guard.reservations {
                events.push(Event::ReservationCreated {
                    reservation: reservation.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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

fn validate_rate(rate: Option<f64>) -> Result<(), EngineError> {
    match rate {
        Some(r) if !r.is_finite() || r < 0.0 => {
            Err(EngineError::LimitExceeded("hourly rate out of range"))
        }
        _ => Ok(()),
    }
}
