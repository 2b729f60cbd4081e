use ulid::Ulid;

use crate::limits::DEFAULT_DRAFT_DURATION_MS;
use crate::model::*;

use super::invariants::date_of;
use super::SessionTarget;

/// The session-owned mutable projection of a scheduled resource. Exactly
/// one open session owns a snapshot; it is replaced wholesale whenever the
/// session's target identity changes and dropped on close.
///
/// Time endpoints are optional because either may be cleared mid-edit; the
/// remote record is never sent a cleared endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    /// Derived from `start`'s UTC date. Not separately persisted.
    pub date: Option<EditDate>,
    pub client_id: Option<Ulid>,
    pub location: LocationKind,
    pub location_detail: Option<String>,
    pub notes: Option<String>,
    pub status: ResourceStatus,
    pub payment_amount_cents: Option<i64>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub payment_notes: Option<String>,
}

impl Snapshot {
    pub fn from_resource(resource: &ScheduledResource) -> Self {
        Self {
            start: Some(resource.span.start),
            end: Some(resource.span.end),
            date: Some(date_of(resource.span.start)),
            client_id: resource.client_id,
            location: resource.location,
            location_detail: resource.location_detail.clone(),
            notes: resource.notes.clone(),
            status: resource.status,
            payment_amount_cents: resource.payment.as_ref().map(|p| p.amount_cents),
            payment_status: resource.payment.as_ref().map(|p| p.status),
            payment_method: resource.payment.as_ref().map(|p| p.method),
            payment_notes: resource.payment.as_ref().and_then(|p| p.notes.clone()),
        }
    }

    /// Defaults for a new draft: `now..now + 1h` unless the prefill says
    /// otherwise, clinic location, everything else empty.
    pub fn new_draft(now: Ms, prefill: Option<&Prefill>) -> Self {
        let span = prefill
            .and_then(|p| p.span)
            .unwrap_or_else(|| Span::new(now, now + DEFAULT_DRAFT_DURATION_MS));
        Self {
            start: Some(span.start),
            end: Some(span.end),
            date: Some(date_of(span.start)),
            client_id: prefill.and_then(|p| p.client_id),
            location: LocationKind::default(),
            location_detail: None,
            notes: None,
            status: ResourceStatus::Scheduled,
            payment_amount_cents: None,
            payment_status: None,
            payment_method: None,
            payment_notes: None,
        }
    }

    /// Both endpoints present and ordered.
    pub fn range(&self) -> Option<Span> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start < end => Some(Span::new(start, end)),
            _ => None,
        }
    }

    /// Collapse the flattened payment fields back into a record.
    pub fn payment(&self) -> Option<Payment> {
        let untouched = self.payment_amount_cents.is_none()
            && self.payment_status.is_none()
            && self.payment_method.is_none()
            && self.payment_notes.is_none();
        if untouched {
            return None;
        }
        Some(Payment {
            amount_cents: self.payment_amount_cents.unwrap_or(0),
            status: self.payment_status.unwrap_or(PaymentStatus::Unpaid),
            method: self.payment_method.unwrap_or(PaymentMethod::Other),
            notes: self.payment_notes.clone(),
        })
    }

    /// Apply a non-time field edit in place. Time endpoints go through the
    /// invariant-maintaining paths on the session instead.
    pub fn apply_edit(&mut self, edit: &FieldEdit) {
        match edit {
            FieldEdit::Start(_) | FieldEdit::End(_) => {
                debug_assert!(false, "time edits are routed through the session");
            }
            FieldEdit::LocationKind(v) => self.location = *v,
            FieldEdit::LocationDetail(v) => self.location_detail = v.clone(),
            FieldEdit::Notes(v) => self.notes = v.clone(),
            FieldEdit::Status(v) => self.status = *v,
            FieldEdit::ClientId(v) => self.client_id = *v,
            FieldEdit::PaymentAmountCents(v) => self.payment_amount_cents = *v,
            FieldEdit::PaymentStatus(v) => self.payment_status = Some(*v),
            FieldEdit::PaymentMethod(v) => self.payment_method = Some(*v),
            FieldEdit::PaymentNotes(v) => self.payment_notes = v.clone(),
        }
    }
}

// ── Seeding policy ───────────────────────────────────────────────

/// What happens to a field when the session reseeds onto a new target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedPolicy {
    /// Taken from the new target (or draft defaults), always.
    AlwaysReset,
    /// Carried over from the previous snapshot, but only when the new
    /// session was opened with an explicit prefill.
    PreserveIfPrefilled,
}

/// The reseed table. One explicit row per field; no inline conditionals.
pub fn seed_policy(field: Field) -> SeedPolicy {
    match field {
        Field::ClientId => SeedPolicy::PreserveIfPrefilled,
        Field::Start
        | Field::End
        | Field::LocationKind
        | Field::LocationDetail
        | Field::Notes
        | Field::Status
        | Field::PaymentAmountCents
        | Field::PaymentStatus
        | Field::PaymentMethod
        | Field::PaymentNotes => SeedPolicy::AlwaysReset,
    }
}

/// Build the snapshot for a (re)opened session. Returns the snapshot and
/// whether the session counts as prefilled.
pub fn reseed(
    previous: Option<&Snapshot>,
    target: &SessionTarget,
    now: Ms,
) -> (Snapshot, bool) {
    match target {
        SessionTarget::Existing(resource) => (Snapshot::from_resource(resource), false),
        SessionTarget::New { prefill } => {
            let prefilled = prefill.is_some();
            let mut snapshot = Snapshot::new_draft(now, prefill.as_ref());
            if prefilled
                && let Some(previous) = previous
                && seed_policy(Field::ClientId) == SeedPolicy::PreserveIfPrefilled
                && snapshot.client_id.is_none()
            {
                snapshot.client_id = previous.client_id;
            }
            (snapshot, prefilled)
        }
    }
}
