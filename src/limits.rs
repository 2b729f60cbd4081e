//! Timing policy and validation limits, in one place.

use crate::model::Ms;

// ── Debounce windows ─────────────────────────────────────────────

/// Quiet period after the last edit to a debounced (free-text) field
/// before its value is persisted.
pub const SAVE_DEBOUNCE_MS: u64 = 500;

/// Quiet period after the last time-range change before a conflict
/// query is issued.
pub const CONFLICT_DEBOUNCE_MS: u64 = 500;

// ── Loading indicator (silent-fast, feedback-slow) ───────────────

/// A conflict query resolving within this window never shows the
/// loading indicator.
pub const INDICATOR_DELAY_MS: u64 = 400;

/// Once shown, the indicator stays visible at least this long so a
/// resolution right after it appears does not flicker.
pub const INDICATOR_MIN_VISIBLE_MS: u64 = 600;

/// How long the one-time "slot available" acknowledgment stays up.
pub const AVAILABLE_ACK_MS: u64 = 2_000;

// ── Defaults ─────────────────────────────────────────────────────

/// New drafts without a prefill get a span of `now..now + 1h`.
pub const DEFAULT_DRAFT_DURATION_MS: Ms = 3_600_000;

// ── Validation limits ────────────────────────────────────────────

/// Nothing schedules before the epoch.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// No appointment runs longer than 7 days.
pub const MAX_SPAN_DURATION_MS: Ms = 7 * 24 * 3_600_000;

pub const MAX_NOTES_LEN: usize = 10_000;
pub const MAX_DETAIL_LEN: usize = 1_000;
