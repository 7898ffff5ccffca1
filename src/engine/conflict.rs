use chrono::{DateTime, Datelike, TimeDelta, Utc};

use crate::limits::{MAX_RESERVATION_MINUTES, MAX_VALID_YEAR, MIN_LEAD_TIME_MINUTES, MIN_VALID_YEAR};
use crate::model::{FacilityState, ReservationId, TimeRange};

use super::EngineError;

pub(crate) fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) fn validate_range(range: &TimeRange) -> Result<(), EngineError> {
    if range.start >= range.end {
        return Err(EngineError::InvalidRange {
            start: range.start,
            end: range.end,
        });
    }
    if range.start.year() < MIN_VALID_YEAR || range.end.year() > MAX_VALID_YEAR {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if range.duration() > TimeDelta::minutes(MAX_RESERVATION_MINUTES) {
        return Err(EngineError::LimitExceeded("reservation interval too wide"));
    }
    Ok(())
}

// ── Conflict Detector ─────────────────────────────────────────────

/// First blocking reservation whose interval overlaps `range`, if any.
///
/// This is the single conflict predicate: the availability grid and the
/// admission path both call it, so the two can never disagree on what
/// counts as occupied. Only pending/confirmed reservations block;
/// cancelled/completed never do. Touching endpoints are not a conflict.
pub fn find_conflict(facility: &FacilityState, range: &TimeRange) -> Option<ReservationId> {
    facility
        .overlapping(range)
        .find(|r| r.status.is_blocking())
        .map(|r| r.id)
}

pub(crate) fn check_no_conflict(
    facility: &FacilityState,
    range: &TimeRange,
) -> Result<(), EngineError> {
    match find_conflict(facility, range) {
        Some(id) => Err(EngineError::Conflict(id)),
        None => Ok(()),
    }
}

// ── Lead-Time Guard ───────────────────────────────────────────────

/// A start instant is too soon when it falls inside the minimum lead time
/// from `now`. Independent of conflict detection; the grid reports
/// "booked" ahead of "too_soon" when both apply.
pub fn too_soon(start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    start < now + TimeDelta::minutes(MIN_LEAD_TIME_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Requester, Reservation, ReservationStatus};
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn dt(h: u32, m: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2024, 6, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
            .and_utc()
    }

    fn facility_with(reservations: Vec<(u32, u32, u32, u32, ReservationStatus)>) -> FacilityState {
        let mut fs = FacilityState::new(Ulid::new(), "Hall".into(), None, true);
        for (sh, sm, eh, em, status) in reservations {
            let range = TimeRange::new(dt(sh, sm), dt(eh, em));
            fs.insert_reservation(Reservation {
                id: Ulid::new(),
                facility_id: fs.id,
                requester: Requester {
                    name: "Ada".into(),
                    email: "ada@example.com".into(),
                    phone: None,
                },
                title: "Existing".into(),
                description: None,
                range,
                notes: None,
                status,
                duration_hours: range.duration_hours(),
                hourly_rate: None,
                total_cost: None,
            });
        }
        fs
    }

    #[test]
    fn partial_overlap_conflicts() {
        let fs = facility_with(vec![(10, 0, 11, 0, ReservationStatus::Confirmed)]);
        let candidate = TimeRange::new(dt(10, 30), dt(11, 30));
        assert!(find_conflict(&fs, &candidate).is_some());
    }

    #[test]
    fn touching_endpoints_do_not_conflict() {
        let fs = facility_with(vec![(10, 0, 11, 0, ReservationStatus::Confirmed)]);
        assert!(find_conflict(&fs, &TimeRange::new(dt(11, 0), dt(12, 0))).is_none());
        assert!(find_conflict(&fs, &TimeRange::new(dt(9, 0), dt(10, 0))).is_none());
    }

    #[test]
    fn cancelled_and_completed_never_block() {
        let fs = facility_with(vec![
            (10, 0, 11, 0, ReservationStatus::Cancelled),
            (12, 0, 13, 0, ReservationStatus::Completed),
        ]);
        assert!(find_conflict(&fs, &TimeRange::new(dt(10, 0), dt(13, 0))).is_none());
    }

    #[test]
    fn pending_blocks_like_confirmed() {
        let fs = facility_with(vec![(10, 0, 11, 0, ReservationStatus::Pending)]);
        assert!(find_conflict(&fs, &TimeRange::new(dt(10, 45), dt(11, 15))).is_some());
    }

    #[test]
    fn containing_interval_conflicts() {
        let fs = facility_with(vec![(10, 0, 11, 0, ReservationStatus::Confirmed)]);
        assert!(find_conflict(&fs, &TimeRange::new(dt(9, 0), dt(12, 0))).is_some());
        assert!(find_conflict(&fs, &TimeRange::new(dt(10, 15), dt(10, 45))).is_some());
    }

    #[test]
    fn lead_time_boundary() {
        let now = dt(10, 0);
        assert!(too_soon(dt(10, 30), now));
        assert!(too_soon(dt(11, 59), now));
        // exactly now + 2h is bookable
        assert!(!too_soon(dt(12, 0), now));
        assert!(!too_soon(dt(15, 0), now));
    }

    #[test]
    fn validate_range_rejects_inverted() {
        let inverted = TimeRange {
            start: dt(12, 0),
            end: dt(11, 0),
        };
        assert!(matches!(
            validate_range(&inverted),
            Err(EngineError::InvalidRange { .. })
        ));
        let empty = TimeRange {
            start: dt(12, 0),
            end: dt(12, 0),
        };
        assert!(validate_range(&empty).is_err());
    }

    #[test]
    fn validate_range_rejects_oversized() {
        let range = TimeRange::new(dt(0, 0), dt(0, 0) + TimeDelta::days(40));
        assert!(matches!(
            validate_range(&range),
            Err(EngineError::LimitExceeded(_))
        ));
    }
}
