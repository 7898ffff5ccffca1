//! Hard caps protecting a tenant's engine from unbounded input, plus the
//! scheduling constants the booking rules are built on.

/// Max facilities a single tenant may register.
pub const MAX_FACILITIES_PER_TENANT: usize = 10_000;

/// Max reservations held on one facility (all statuses, including history).
pub const MAX_RESERVATIONS_PER_FACILITY: usize = 100_000;

/// Max length of a facility name or reservation title.
pub const MAX_NAME_LEN: usize = 256;

/// Max length of a requester contact field (name, email, phone).
pub const MAX_CONTACT_LEN: usize = 320;

/// Max length of free-text fields (description, notes).
pub const MAX_TEXT_LEN: usize = 4_096;

/// Widest reservation interval accepted (minutes). 31 days.
pub const MAX_RESERVATION_MINUTES: i64 = 31 * 24 * 60;

/// Widest reservation-listing query window (days).
pub const MAX_QUERY_WINDOW_DAYS: i64 = 366;

/// Earliest/latest year a reservation timestamp may carry. Keeps WAL
/// replay and wire output within sane chrono formatting range.
pub const MIN_VALID_YEAR: i32 = 1970;
pub const MAX_VALID_YEAR: i32 = 9999;

pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

/// Display-grid slot granularity.
pub const SLOT_MINUTES: i64 = 30;

/// Minimum gap between "now" and a slot's start for it to be offered.
pub const MIN_LEAD_TIME_MINUTES: i64 = 120;

/// Default operating window applied when a weekday has no explicit rule.
pub const DEFAULT_OPEN_HOUR: u32 = 9;
pub const DEFAULT_CLOSE_HOUR: u32 = 22;
