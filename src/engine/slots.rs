use chrono::{NaiveDate, TimeDelta};

use crate::limits::SLOT_MINUTES;
use crate::model::{OperatingWindow, TimeRange};

// ── Slot Generator ────────────────────────────────────────────────

/// Emit the fixed-granularity candidate slots for one date and resolved
/// window. Slots start at `date + window.start` and advance by
/// `SLOT_MINUTES`; emission stops once a slot would start at or past
/// `date + window.end`. The final slot's end may run past the nominal
/// close — the grid shows whole slots, it does not clip them.
///
/// Deterministic: identical `(date, window)` inputs always yield the
/// identical sequence. A closed window yields no slots.
pub fn generate_slots(date: NaiveDate, window: &OperatingWindow) -> Vec<TimeRange> {
    if !window.is_open {
        return Vec::new();
    }

    let step = TimeDelta::minutes(SLOT_MINUTES);
    let close = date.and_time(window.end).and_utc();
    let mut cursor = date.and_time(window.start).and_utc();

    let mut slots = Vec::new();
    while cursor < close {
        slots.push(TimeRange::new(cursor, cursor + step));
        cursor += step;
    }
    slots
}
