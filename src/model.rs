use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only instant type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Same duration, moved to begin at `start`.
    pub fn shifted_to(&self, start: Ms) -> Span {
        Span::new(start, start + self.duration_ms())
    }
}

// ── Scheduled resource ───────────────────────────────────────────

/// Where the appointment takes place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationKind {
    #[default]
    Clinic,
    Home,
    Video,
    Phone,
}

/// Lifecycle status of a scheduled resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    Scheduled,
    InProgress,
    Attended,
    NoShow,
    Cancelled,
}

impl ResourceStatus {
    /// Cancelled resources never count as conflicting occupancy.
    pub fn blocks_schedule(&self) -> bool {
        !matches!(self, ResourceStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Waived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    Other,
}

/// Optional payment sub-record carried by a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub amount_cents: i64,
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    pub notes: Option<String>,
}

/// The canonical, remote-owned appointment record. The engine never mutates
/// one of these directly; it sends `ResourcePatch` deltas to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledResource {
    pub id: Ulid,
    pub span: Span,
    pub client_id: Option<Ulid>,
    pub location: LocationKind,
    pub location_detail: Option<String>,
    pub notes: Option<String>,
    pub status: ResourceStatus,
    pub payment: Option<Payment>,
}

/// Payload for creating a resource; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResource {
    pub span: Span,
    pub client_id: Option<Ulid>,
    pub location: LocationKind,
    pub location_detail: Option<String>,
    pub notes: Option<String>,
    pub status: ResourceStatus,
    pub payment: Option<Payment>,
}

// ── Editable fields ──────────────────────────────────────────────

/// Every field a session can edit. Used to key per-field save pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Start,
    End,
    LocationKind,
    LocationDetail,
    Notes,
    Status,
    ClientId,
    PaymentAmountCents,
    PaymentStatus,
    PaymentMethod,
    PaymentNotes,
}

/// When a field edit is pushed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePolicy {
    /// Persist on the change/blur event itself.
    Immediate,
    /// Persist after a quiet period since the last edit to that field.
    Debounced,
}

impl Field {
    /// Static immediate/debounced partition. Free-text fields coalesce
    /// keystrokes; everything else commits on change.
    pub fn save_policy(&self) -> SavePolicy {
        match self {
            Field::Notes | Field::LocationDetail | Field::PaymentNotes => SavePolicy::Debounced,
            _ => SavePolicy::Immediate,
        }
    }

    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Field::Start => "start",
            Field::End => "end",
            Field::LocationKind => "location_kind",
            Field::LocationDetail => "location_detail",
            Field::Notes => "notes",
            Field::Status => "status",
            Field::ClientId => "client_id",
            Field::PaymentAmountCents => "payment_amount_cents",
            Field::PaymentStatus => "payment_status",
            Field::PaymentMethod => "payment_method",
            Field::PaymentNotes => "payment_notes",
        }
    }
}

/// A typed single-field mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldEdit {
    Start(Option<Ms>),
    End(Option<Ms>),
    LocationKind(LocationKind),
    LocationDetail(Option<String>),
    Notes(Option<String>),
    Status(ResourceStatus),
    ClientId(Option<Ulid>),
    PaymentAmountCents(Option<i64>),
    PaymentStatus(PaymentStatus),
    PaymentMethod(PaymentMethod),
    PaymentNotes(Option<String>),
}

impl FieldEdit {
    pub fn field(&self) -> Field {
        match self {
            FieldEdit::Start(_) => Field::Start,
            FieldEdit::End(_) => Field::End,
            FieldEdit::LocationKind(_) => Field::LocationKind,
            FieldEdit::LocationDetail(_) => Field::LocationDetail,
            FieldEdit::Notes(_) => Field::Notes,
            FieldEdit::Status(_) => Field::Status,
            FieldEdit::ClientId(_) => Field::ClientId,
            FieldEdit::PaymentAmountCents(_) => Field::PaymentAmountCents,
            FieldEdit::PaymentStatus(_) => Field::PaymentStatus,
            FieldEdit::PaymentMethod(_) => Field::PaymentMethod,
            FieldEdit::PaymentNotes(_) => Field::PaymentNotes,
        }
    }
}

// ── Partial updates ──────────────────────────────────────────────

/// Partial update sent to `RemoteStore::update_fields`. Outer `None` means
/// "field untouched"; the inner option on nullable fields clears the value.
/// A compound save carries `start` and `end` in one patch so the store never
/// observes a transiently inverted pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<Ms>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Ms>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Option<Ulid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_detail: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ResourceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_amount_cents: Option<Option<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_notes: Option<Option<String>>,
}

impl ResourcePatch {
    pub fn from_edits(edits: &[FieldEdit]) -> Self {
        let mut patch = ResourcePatch::default();
        for edit in edits {
            match edit {
                FieldEdit::Start(v) => patch.start = *v,
                FieldEdit::End(v) => patch.end = *v,
                FieldEdit::ClientId(v) => patch.client_id = Some(*v),
                FieldEdit::LocationKind(v) => patch.location = Some(*v),
                FieldEdit::LocationDetail(v) => patch.location_detail = Some(v.clone()),
                FieldEdit::Notes(v) => patch.notes = Some(v.clone()),
                FieldEdit::Status(v) => patch.status = Some(*v),
                FieldEdit::PaymentAmountCents(v) => patch.payment_amount_cents = Some(*v),
                FieldEdit::PaymentStatus(v) => patch.payment_status = Some(*v),
                FieldEdit::PaymentMethod(v) => patch.payment_method = Some(*v),
                FieldEdit::PaymentNotes(v) => patch.payment_notes = Some(v.clone()),
            }
        }
        patch
    }

    pub fn is_empty(&self) -> bool {
        *self == ResourcePatch::default()
    }

    /// Store-side merge. The span is written as a raw pair; the store
    /// validates ordering after the merge so an inverted patch surfaces as
    /// a validation error, not a panic. Payment sub-fields materialize a
    /// default payment record when none exists yet.
    pub fn apply_to(&self, resource: &mut ScheduledResource) {
        match (self.start, self.end) {
            (Some(start), Some(end)) => resource.span = Span { start, end },
            (Some(start), None) => resource.span = resource.span.shifted_to(start),
            (None, Some(end)) => {
                resource.span = Span {
                    start: resource.span.start,
                    end,
                }
            }
            (None, None) => {}
        }
        if let Some(client_id) = self.client_id {
            resource.client_id = client_id;
        }
        if let Some(location) = self.location {
            resource.location = location;
        }
        if let Some(ref detail) = self.location_detail {
            resource.location_detail = detail.clone();
        }
        if let Some(ref notes) = self.notes {
            resource.notes = notes.clone();
        }
        if let Some(status) = self.status {
            resource.status = status;
        }
        let touches_payment = self.payment_amount_cents.is_some()
            || self.payment_status.is_some()
            || self.payment_method.is_some()
            || self.payment_notes.is_some();
        if touches_payment {
            let payment = resource.payment.get_or_insert(Payment {
                amount_cents: 0,
                status: PaymentStatus::Unpaid,
                method: PaymentMethod::Other,
                notes: None,
            });
            if let Some(amount) = self.payment_amount_cents {
                payment.amount_cents = amount.unwrap_or(0);
            }
            if let Some(status) = self.payment_status {
                payment.status = status;
            }
            if let Some(method) = self.payment_method {
                payment.method = method;
            }
            if let Some(ref notes) = self.payment_notes {
                payment.notes = notes.clone();
            }
        }
    }
}

// ── Conflict query types ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictQuery {
    pub span: Span,
    /// The resource under edit, excluded from its own conflict scan.
    pub exclude: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub id: Ulid,
    pub span: Span,
    pub other_party: Option<String>,
    pub location: LocationKind,
    pub status: ResourceStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResult {
    pub conflicts: Vec<ConflictEntry>,
}

impl ConflictResult {
    pub fn has_conflict(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

// ── Quick durations ──────────────────────────────────────────────

/// Fixed duration presets offered by the editor. Applying one sets
/// `end = start + preset`, deliberately discarding the prior duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurationPreset {
    Min30,
    Min45,
    Min60,
    Min90,
}

impl DurationPreset {
    pub fn as_ms(&self) -> Ms {
        let minutes: Ms = match self {
            DurationPreset::Min30 => 30,
            DurationPreset::Min45 => 45,
            DurationPreset::Min60 => 60,
            DurationPreset::Min90 => 90,
        };
        minutes * 60_000
    }
}

// ── Observable editor state ──────────────────────────────────────

/// What the presentation layer sees, published through a watch channel.
/// `is_checking_conflicts` is the loading indicator, already filtered
/// through the silent-fast / feedback-slow policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditorState {
    pub is_saving: bool,
    pub last_saved_at: Option<Ms>,
    pub last_error: Option<String>,
    pub conflicts: Option<ConflictResult>,
    pub is_checking_conflicts: bool,
    pub show_available_ack: bool,
}

impl EditorState {
    pub fn has_conflict(&self) -> bool {
        self.conflicts.as_ref().is_some_and(ConflictResult::has_conflict)
    }
}

/// Caller-supplied prefill for a new-draft session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prefill {
    pub span: Option<Span>,
    pub client_id: Option<Ulid>,
}

/// Calendar date in UTC, the derived field coupled to `start`.
pub type EditDate = NaiveDate;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.overlaps(&Span::new(150, 250)));
        assert!(!s.overlaps(&Span::new(200, 300))); // adjacent, half-open
    }

    #[test]
    fn span_shifted_keeps_duration() {
        let s = Span::new(1_000, 4_000);
        let moved = s.shifted_to(10_000);
        assert_eq!(moved, Span::new(10_000, 13_000));
        assert_eq!(moved.duration_ms(), s.duration_ms());
    }

    #[test]
    fn save_policy_partition() {
        assert_eq!(Field::Notes.save_policy(), SavePolicy::Debounced);
        assert_eq!(Field::LocationDetail.save_policy(), SavePolicy::Debounced);
        assert_eq!(Field::PaymentNotes.save_policy(), SavePolicy::Debounced);
        assert_eq!(Field::Start.save_policy(), SavePolicy::Immediate);
        assert_eq!(Field::End.save_policy(), SavePolicy::Immediate);
        assert_eq!(Field::LocationKind.save_policy(), SavePolicy::Immediate);
        assert_eq!(Field::Status.save_policy(), SavePolicy::Immediate);
        assert_eq!(Field::ClientId.save_policy(), SavePolicy::Immediate);
        assert_eq!(Field::PaymentAmountCents.save_policy(), SavePolicy::Immediate);
    }

    #[test]
    fn patch_from_compound_edit() {
        let patch = ResourcePatch::from_edits(&[
            FieldEdit::Start(Some(1_000)),
            FieldEdit::End(Some(2_000)),
        ]);
        assert_eq!(patch.start, Some(1_000));
        assert_eq!(patch.end, Some(2_000));
        assert!(patch.notes.is_none());
    }

    #[test]
    fn patch_apply_merges_fields() {
        let mut resource = ScheduledResource {
            id: Ulid::new(),
            span: Span::new(1_000, 2_000),
            client_id: None,
            location: LocationKind::Clinic,
            location_detail: None,
            notes: None,
            status: ResourceStatus::Scheduled,
            payment: None,
        };
        let patch = ResourcePatch::from_edits(&[
            FieldEdit::Notes(Some("bring forms".into())),
            FieldEdit::PaymentStatus(PaymentStatus::Paid),
        ]);
        patch.apply_to(&mut resource);
        assert_eq!(resource.notes.as_deref(), Some("bring forms"));
        assert_eq!(resource.payment.as_ref().unwrap().status, PaymentStatus::Paid);
        assert_eq!(resource.span, Span::new(1_000, 2_000)); // untouched
    }

    #[test]
    fn patch_apply_moves_span_atomically() {
        let mut resource = ScheduledResource {
            id: Ulid::new(),
            span: Span::new(10_000, 3_610_000),
            client_id: None,
            location: LocationKind::Clinic,
            location_detail: None,
            notes: None,
            status: ResourceStatus::Scheduled,
            payment: None,
        };
        // Compound move far past the old end
        let patch = ResourcePatch::from_edits(&[
            FieldEdit::Start(Some(20_000_000)),
            FieldEdit::End(Some(23_600_000)),
        ]);
        patch.apply_to(&mut resource);
        assert_eq!(resource.span, Span::new(20_000_000, 23_600_000));
    }

    #[test]
    fn patch_apply_start_only_preserves_duration() {
        let mut resource = ScheduledResource {
            id: Ulid::new(),
            span: Span::new(0, 3_600_000),
            client_id: None,
            location: LocationKind::Clinic,
            location_detail: None,
            notes: None,
            status: ResourceStatus::Scheduled,
            payment: None,
        };
        let patch = ResourcePatch::from_edits(&[FieldEdit::Start(Some(7_200_000))]);
        patch.apply_to(&mut resource);
        assert_eq!(resource.span, Span::new(7_200_000, 10_800_000));
    }

    #[test]
    fn empty_patch_detected() {
        assert!(ResourcePatch::default().is_empty());
        assert!(!ResourcePatch::from_edits(&[FieldEdit::Notes(None)]).is_empty());
    }

    #[test]
    fn cancelled_does_not_block() {
        assert!(!ResourceStatus::Cancelled.blocks_schedule());
        assert!(ResourceStatus::Scheduled.blocks_schedule());
        assert!(ResourceStatus::NoShow.blocks_schedule());
    }

    #[test]
    fn preset_durations() {
        assert_eq!(DurationPreset::Min30.as_ms(), 1_800_000);
        assert_eq!(DurationPreset::Min90.as_ms(), 5_400_000);
    }

    #[test]
    fn patch_serializes_only_touched_fields() {
        let patch = ResourcePatch::from_edits(&[FieldEdit::Notes(Some("hi".into()))]);
        let json = serde_json::to_value(&patch).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert!(obj.contains_key("notes"));
    }
}
