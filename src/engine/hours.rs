use chrono::{NaiveDate, NaiveTime};

use crate::limits::{DEFAULT_CLOSE_HOUR, DEFAULT_OPEN_HOUR};
use crate::model::{weekday_index, FacilityState, OperatingWindow};

// ── Operating-Hours Resolver ──────────────────────────────────────

/// The window applied to any weekday without an explicit rule.
pub fn default_window() -> OperatingWindow {
    OperatingWindow {
        start: NaiveTime::from_hms_opt(DEFAULT_OPEN_HOUR, 0, 0).expect("valid default open"),
        end: NaiveTime::from_hms_opt(DEFAULT_CLOSE_HOUR, 0, 0).expect("valid default close"),
        is_open: true,
    }
}

/// Resolve the operating window for a facility on a wall-clock date.
///
/// Total: always produces a window. A rule with `available = false` keeps
/// its times but marks the whole day closed — callers must not book any of
/// it regardless of the window bounds.
pub fn resolve_window(facility: &FacilityState, date: NaiveDate) -> OperatingWindow {
    match facility.hours[weekday_index(date)] {
        Some(rule) => OperatingWindow {
            start: rule.start,
            end: rule.end,
            is_open: rule.available,
        },
        None => default_window(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HoursRule;
    use ulid::Ulid;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn facility() -> FacilityState {
        FacilityState::new(Ulid::new(), "Hall".into(), None, true)
    }

    #[test]
    fn no_rule_resolves_to_default() {
        let fs = facility();
        let window = resolve_window(&fs, NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        assert_eq!(window.start, t(9, 0));
        assert_eq!(window.end, t(22, 0));
        assert!(window.is_open);
    }

    #[test]
    fn rule_overrides_default() {
        let mut fs = facility();
        // 2024-06-10 is a Monday → weekday 1
        fs.hours[1] = Some(HoursRule {
            start: t(7, 30),
            end: t(18, 0),
            available: true,
        });
        let window = resolve_window(&fs, NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        assert_eq!(window.start, t(7, 30));
        assert_eq!(window.end, t(18, 0));
        assert!(window.is_open);
    }

    #[test]
    fn unavailable_rule_closes_whole_day() {
        let mut fs = facility();
        fs.hours[0] = Some(HoursRule {
            start: t(9, 0),
            end: t(22, 0),
            available: false,
        });
        // 2024-06-09 is a Sunday
        let window = resolve_window(&fs, NaiveDate::from_ymd_opt(2024, 6, 9).unwrap());
        assert!(!window.is_open);
        // window times are still reported for display
        assert_eq!(window.start, t(9, 0));
    }

    #[test]
    fn rule_on_other_weekday_does_not_apply() {
        let mut fs = facility();
        fs.hours[2] = Some(HoursRule {
            start: t(12, 0),
            end: t(14, 0),
            available: true,
        });
        // Monday still gets the default
        let window = resolve_window(&fs, NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        assert_eq!(window, default_window());
    }
}
