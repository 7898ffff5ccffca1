use chrono::{NaiveDate, TimeDelta};

use crate::limits::MAX_QUERY_WINDOW_DAYS;
use crate::model::*;

use super::availability::build_report;
use super::conflict::now_utc;
use super::{Engine, EngineError};

impl Engine {
    /// The per-date availability answer for one facility.
    ///
    /// Unknown and inactive facilities are errors; a closed or fully
    /// booked day is not — it comes back as a report with no available
    /// slots. Read-only: runs under the facility's read lock, snapshot
    /// consistency is all the display grid needs.
    pub async fn get_availability(
        &self,
        facility_id: FacilityId,
        date: NaiveDate,
    ) -> Result<AvailabilityReport, EngineError> {
        let fs = self
            .get_facility(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        let guard = fs.read().await;
        if !guard.active {
            return Err(EngineError::FacilityInactive(facility_id));
        }
        Ok(build_report(&guard, date, now_utc()))
    }

    pub fn list_facilities(&self) -> Vec<FacilityInfo> {
        self.state
            .iter()
            .map(|entry| {
                let fs = entry.value().clone();
                let guard = fs.try_read().expect("list_facilities: uncontended read");
                FacilityInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                    hourly_rate: guard.hourly_rate,
                    active: guard.active,
                }
            })
            .collect()
    }

    pub async fn get_hours_rules(
        &self,
        facility_id: FacilityId,
    ) -> Result<Vec<HoursRuleInfo>, EngineError> {
        let fs = match self.get_facility(&facility_id) {
            Some(fs) => fs,
            None => return Ok(vec![]),
        };
        let guard = fs.read().await;
        Ok(guard
            .hours
            .iter()
            .enumerate()
            .filter_map(|(weekday, rule)| {
                rule.map(|r| HoursRuleInfo {
                    facility_id,
                    weekday: weekday as u8,
                    start: r.start,
                    end: r.end,
                    available: r.available,
                })
            })
            .collect())
    }

    /// Reservations on a facility, optionally restricted to those whose
    /// interval intersects `window`. Every status is returned; callers
    /// filter on status themselves.
    pub async fn get_reservations(
        &self,
        facility_id: FacilityId,
        window: Option<TimeRange>,
    ) -> Result<Vec<Reservation>, EngineError> {
        if let Some(w) = &window
            && w.duration() > TimeDelta::days(MAX_QUERY_WINDOW_DAYS)
        {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let fs = match self.get_facility(&facility_id) {
            Some(fs) => fs,
            None => return Ok(vec![]),
        };
        let guard = fs.read().await;
        Ok(match window {
            Some(w) => guard.overlapping(&w).cloned().collect(),
            None => guard.reservations.clone(),
        })
    }

    pub async fn get_reservation(
        &self,
        id: ReservationId,
    ) -> Result<Reservation, EngineError> {
        let facility_id = self
            .facility_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let fs = self
            .get_facility(&facility_id)
            .ok_or(EngineError::NotFound(facility_id))?;
        let guard = fs.read().await;
        guard
            .reservation(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }
}
