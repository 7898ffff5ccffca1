use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::ReservationStatus;

#[derive(Debug)]
pub enum EngineError {
    /// Unknown facility or reservation id.
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Facility exists but is switched off for booking.
    FacilityInactive(Ulid),
    /// A required request field was absent or empty.
    MissingField(&'static str),
    /// Reservation start must be strictly before its end.
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// The requested interval overlaps a blocking reservation. Carries the
    /// id of the first colliding reservation. Covers the race-loser case
    /// too: the same rejection whether the collision was sequential or
    /// concurrent.
    Conflict(Ulid),
    /// The slot starts inside the minimum lead time (only raised when the
    /// admission policy enforces lead time on writes).
    TooSoon(DateTime<Utc>),
    /// Status change not permitted by the reservation state machine.
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    /// Facility still holds blocking reservations and cannot be deleted.
    HasReservations(Ulid),
    LimitExceeded(&'static str),
    /// Durable-store failure, surfaced unmodified. Callers may retry with
    /// fresh conflict data; the engine never retries on its own.
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::FacilityInactive(id) => write!(f, "facility inactive: {id}"),
            EngineError::MissingField(field) => write!(f, "missing required field: {field}"),
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid range: start {start} not before end {end}")
            }
            EngineError::Conflict(id) => write!(f, "slot unavailable: conflicts with reservation {id}"),
            EngineError::TooSoon(start) => {
                write!(f, "start {start} is inside the minimum lead time")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot move reservation from {} to {}", from.as_str(), to.as_str())
            }
            EngineError::HasReservations(id) => {
                write!(f, "cannot delete facility {id}: blocking reservations remain")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
