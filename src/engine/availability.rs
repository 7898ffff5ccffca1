use chrono::{DateTime, NaiveDate, Utc};

use crate::model::{AvailabilityReport, CandidateSlot, FacilityState, TimeRange, UnavailableReason};

use super::conflict::{find_conflict, too_soon};
use super::hours::resolve_window;
use super::slots::generate_slots;

// ── Availability Report Builder ───────────────────────────────────

/// Compose resolver, slot generator, conflict detector and lead-time guard
/// into the per-date answer for one facility.
///
/// Pure: derived entirely from `facility` state and the supplied `now`;
/// recomputing is always safe. The caller (the engine query layer) has
/// already rejected unknown/inactive facilities — an empty or fully
/// unavailable report is a valid result, never an error.
pub fn build_report(
    facility: &FacilityState,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> AvailabilityReport {
    let window = resolve_window(facility, date);

    let day = TimeRange::civil_day(date);
    let blocking_count = facility
        .overlapping(&day)
        .filter(|r| r.status.is_blocking())
        .count();

    let slots = generate_slots(date, &window)
        .into_iter()
        .map(|range| {
            // "booked" wins over "too_soon": a conflict disqualifies the
            // slot regardless of timing.
            let reason = if find_conflict(facility, &range).is_some() {
                Some(UnavailableReason::Booked)
            } else if too_soon(range.start, now) {
                Some(UnavailableReason::TooSoon)
            } else {
                None
            };
            CandidateSlot {
                range,
                available: reason.is_none(),
                reason,
            }
        })
        .collect();

    AvailabilityReport {
        facility_id: facility.id,
        date,
        window,
        slots,
        blocking_count,
    }
}
