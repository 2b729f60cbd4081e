use chrono::{NaiveDate, NaiveTime};

use crate::model::{DurationPreset, Ms, Span};

const DAY_MS: Ms = 86_400_000;

// ── Directed time propagation ────────────────────────────────────

/// Which side of the (span, date) coupling an edit came from. Each
/// direction is a separate pure function; there is no bidirectional
/// watcher and nothing to re-enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    FromTime,
    FromDate,
}

/// Settle a (span, date) pair after an edit from one direction.
///
/// `FromTime`: the span is authoritative, the date is re-derived from its
/// start. `FromDate`: the date is authoritative, both endpoints keep their
/// time-of-day and move onto the new date.
pub fn settle(source: UpdateSource, span: Span, date: NaiveDate) -> (Span, NaiveDate) {
    match source {
        UpdateSource::FromTime => (span, date_of(span.start)),
        UpdateSource::FromDate => (project_onto_date(&span, date), date),
    }
}

/// Invariant A: moving the start keeps the duration.
pub fn shift_preserving_duration(prior: &Span, new_start: Ms) -> Span {
    prior.shifted_to(new_start)
}

/// Invariant B: substitute the calendar date under both endpoints, keeping
/// each one's time-of-day. A span that crossed midnight keeps doing so.
pub fn project_onto_date(span: &Span, date: NaiveDate) -> Span {
    let start = with_date(span.start, date);
    let mut end = with_date(span.end, date);
    if end <= start {
        end += DAY_MS;
    }
    Span::new(start, end)
}

/// Quick-duration shortcut: an explicit new duration, not a preserved one.
pub fn preset_end(start: Ms, preset: DurationPreset) -> Ms {
    start + preset.as_ms()
}

// ── UTC date helpers ─────────────────────────────────────────────

/// UTC calendar date of an instant.
pub fn date_of(t: Ms) -> NaiveDate {
    chrono::DateTime::from_timestamp_millis(t)
        .expect("timestamp within validated range")
        .date_naive()
}

/// Keep the time-of-day of `t`, substitute `date`.
pub fn with_date(t: Ms, date: NaiveDate) -> Ms {
    let midnight = date
        .and_time(NaiveTime::MIN)
        .and_utc()
        .timestamp_millis();
    midnight + t.rem_euclid(DAY_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn utc_ms(y: i32, m: u32, d: u32, h: u32, min: u32) -> Ms {
        date(y, m, d)
            .and_hms_opt(h, min, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    #[test]
    fn start_shift_preserves_duration() {
        // 10:00..11:00, start moved to 10:30 -> 10:30..11:30
        let prior = Span::new(
            utc_ms(2025, 1, 1, 10, 0),
            utc_ms(2025, 1, 1, 11, 0),
        );
        let shifted = shift_preserving_duration(&prior, utc_ms(2025, 1, 1, 10, 30));
        assert_eq!(shifted.start, utc_ms(2025, 1, 1, 10, 30));
        assert_eq!(shifted.end, utc_ms(2025, 1, 1, 11, 30));
    }

    #[test]
    fn date_projection_keeps_times_of_day() {
        let span = Span::new(
            utc_ms(2025, 1, 1, 10, 0),
            utc_ms(2025, 1, 1, 11, 0),
        );
        let moved = project_onto_date(&span, date(2025, 1, 2));
        assert_eq!(moved.start, utc_ms(2025, 1, 2, 10, 0));
        assert_eq!(moved.end, utc_ms(2025, 1, 2, 11, 0));
    }

    #[test]
    fn date_projection_preserves_midnight_crossing() {
        // 23:00..01:00 stays a 2h span after the move
        let span = Span::new(
            utc_ms(2025, 1, 1, 23, 0),
            utc_ms(2025, 1, 2, 1, 0),
        );
        let moved = project_onto_date(&span, date(2025, 3, 10));
        assert_eq!(moved.start, utc_ms(2025, 3, 10, 23, 0));
        assert_eq!(moved.end, utc_ms(2025, 3, 11, 1, 0));
        assert_eq!(moved.duration_ms(), span.duration_ms());
    }

    #[test]
    fn settle_from_time_rederives_date() {
        let span = Span::new(
            utc_ms(2025, 6, 5, 9, 0),
            utc_ms(2025, 6, 5, 10, 0),
        );
        // Stale date; FromTime wins
        let (settled, d) = settle(UpdateSource::FromTime, span, date(2024, 1, 1));
        assert_eq!(settled, span);
        assert_eq!(d, date(2025, 6, 5));
    }

    #[test]
    fn settle_from_date_moves_both_endpoints() {
        let span = Span::new(
            utc_ms(2025, 1, 1, 10, 0),
            utc_ms(2025, 1, 1, 11, 0),
        );
        let (settled, d) = settle(UpdateSource::FromDate, span, date(2025, 1, 2));
        assert_eq!(settled.start, utc_ms(2025, 1, 2, 10, 0));
        assert_eq!(settled.end, utc_ms(2025, 1, 2, 11, 0));
        assert_eq!(d, date(2025, 1, 2));
    }

    #[test]
    fn settle_directions_compose_without_cycling() {
        // FromDate then FromTime on the result is a fixed point
        let span = Span::new(
            utc_ms(2025, 1, 1, 10, 0),
            utc_ms(2025, 1, 1, 11, 0),
        );
        let (moved, d) = settle(UpdateSource::FromDate, span, date(2025, 1, 2));
        let (again, d2) = settle(UpdateSource::FromTime, moved, d);
        assert_eq!(again, moved);
        assert_eq!(d2, d);
    }

    #[test]
    fn preset_is_idempotent() {
        let start = utc_ms(2025, 1, 1, 10, 0);
        let once = preset_end(start, DurationPreset::Min45);
        let twice = preset_end(start, DurationPreset::Min45);
        assert_eq!(once, twice);
        assert_eq!(once - start, 45 * 60_000);
    }

    #[test]
    fn with_date_round_trips_date_of() {
        let t = utc_ms(2025, 7, 20, 14, 37);
        assert_eq!(date_of(t), date(2025, 7, 20));
        assert_eq!(with_date(t, date(2025, 7, 20)), t);
    }
}
