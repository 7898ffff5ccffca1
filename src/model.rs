use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type FacilityId = Ulid;
pub type ReservationId = Ulid;

/// Half-open instant interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    /// The civil day `[date 00:00, date+1 00:00)`. Dates are wall-clock;
    /// the engine does no timezone conversion beyond pinning them to UTC.
    pub fn civil_day(date: NaiveDate) -> Self {
        let start = date.and_time(NaiveTime::MIN).and_utc();
        Self {
            start,
            end: start + TimeDelta::days(1),
        }
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Fractional hours, e.g. 90 minutes → 1.5.
    pub fn duration_hours(&self) -> f64 {
        self.duration().num_seconds() as f64 / 3600.0
    }

    /// The one overlap predicate. Shared by the availability report and the
    /// admission path; touching endpoints do not overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }
}

/// Weekday index used throughout: 0 = Sunday .. 6 = Saturday.
pub fn weekday_index(date: NaiveDate) -> usize {
    date.weekday().num_days_from_sunday() as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    /// Whether a reservation in this status occupies its interval.
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    /// pending → confirmed | cancelled; confirmed → completed | cancelled.
    pub fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Confirmed, Self::Completed)
                | (Self::Confirmed, Self::Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Contact fields of the person booking. Opaque to the engine — stored,
/// echoed back, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub facility_id: FacilityId,
    pub requester: Requester,
    pub title: String,
    pub description: Option<String>,
    pub range: TimeRange,
    pub notes: Option<String>,
    pub status: ReservationStatus,
    /// Billing fields snapshotted at admission time.
    pub duration_hours: f64,
    pub hourly_rate: Option<f64>,
    pub total_cost: Option<f64>,
}

/// Admission input. Billing fields are derived by the engine, never supplied.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationRequest {
    pub facility_id: FacilityId,
    pub requester: Requester,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Per-weekday operating window. `available = false` closes the whole day
/// regardless of the window times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoursRule {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub available: bool,
}

/// Resolved operating window for one (facility, date). Total — resolution
/// never fails; absence of a rule yields the default window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub is_open: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// A blocking reservation overlaps the slot.
    Booked,
    /// The slot starts inside the minimum lead time.
    TooSoon,
}

impl UnavailableReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Booked => "booked",
            Self::TooSoon => "too_soon",
        }
    }
}

/// One display slot of the availability grid. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSlot {
    pub range: TimeRange,
    pub available: bool,
    pub reason: Option<UnavailableReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityReport {
    pub facility_id: FacilityId,
    pub date: NaiveDate,
    pub window: OperatingWindow,
    pub slots: Vec<CandidateSlot>,
    /// Blocking reservations found on the queried day, for caller diagnostics.
    pub blocking_count: usize,
}

#[derive(Debug, Clone)]
pub struct FacilityState {
    pub id: FacilityId,
    pub name: String,
    pub hourly_rate: Option<f64>,
    pub active: bool,
    /// At most one rule per weekday, indexed 0 = Sunday .. 6 = Saturday.
    pub hours: [Option<HoursRule>; 7],
    /// All reservations (every status), sorted by `range.start`.
    pub reservations: Vec<Reservation>,
}

impl FacilityState {
    pub fn new(id: FacilityId, name: String, hourly_rate: Option<f64>, active: bool) -> Self {
        Self {
            id,
            name,
            hourly_rate,
            active,
            hours: [None; 7],
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by `range.start`.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.range.start, |r| r.range.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: ReservationId) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: ReservationId) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    pub fn remove_reservation(&mut self, id: ReservationId) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Reservations of any status whose interval overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &TimeRange) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.range.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.range.end > query.start)
    }
}

/// WAL record format. One entry per durable state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    FacilityCreated {
        id: FacilityId,
        name: String,
        hourly_rate: Option<f64>,
        active: bool,
    },
    FacilityUpdated {
        id: FacilityId,
        name: String,
        hourly_rate: Option<f64>,
        active: bool,
    },
    FacilityDeleted {
        id: FacilityId,
    },
    HoursRuleSet {
        facility_id: FacilityId,
        weekday: u8,
        start: NaiveTime,
        end: NaiveTime,
        available: bool,
    },
    HoursRuleCleared {
        facility_id: FacilityId,
        weekday: u8,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationStatusChanged {
        id: ReservationId,
        facility_id: FacilityId,
        status: ReservationStatus,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FacilityInfo {
    pub id: FacilityId,
    pub name: String,
    pub hourly_rate: Option<f64>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoursRuleInfo {
    pub facility_id: FacilityId,
    pub weekday: u8,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub available: bool,
}
