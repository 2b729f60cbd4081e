mod autosave;
mod conflict;
mod error;
pub mod invariants;
mod snapshot;

pub use error::SessionError;
pub use invariants::UpdateSource;
pub use snapshot::{reseed, seed_policy, SeedPolicy, Snapshot};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::notify::{CommandHub, EditorCommand, SessionEvent, SessionHub};
use crate::observability::SESSIONS_ACTIVE;
use crate::store::RemoteStore;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// What an edit session is opened onto.
#[derive(Debug, Clone)]
pub enum SessionTarget {
    /// Edit an already-fetched remote resource.
    Existing(ScheduledResource),
    /// Draft a new resource; persisted on `submit`.
    New { prefill: Option<Prefill> },
}

// ── Session internals ────────────────────────────────────────────

pub(super) struct PendingEdit {
    pub(super) edit: FieldEdit,
    pub(super) timer: JoinHandle<()>,
}

pub(super) struct ConflictTracking {
    pub(super) debounce: Option<JoinHandle<()>>,
    /// Generation of the query currently awaiting its result, if any.
    pub(super) inflight_gen: Option<u64>,
    pub(super) indicator_shown_at: Option<tokio::time::Instant>,
    /// Armed until the session's first successful check completes.
    pub(super) first_ack_pending: bool,
}

impl ConflictTracking {
    fn new() -> Self {
        Self {
            debounce: None,
            inflight_gen: None,
            indicator_shown_at: None,
            first_ack_pending: true,
        }
    }
}

pub(super) struct SessionState {
    pub(super) session_id: Option<Ulid>,
    /// Remote identity of the target; `None` while drafting.
    pub(super) target_id: Option<Ulid>,
    pub(super) snapshot: Option<Snapshot>,
    pub(super) saves_in_flight: usize,
    pub(super) pending: HashMap<Field, PendingEdit>,
    pub(super) conflict: ConflictTracking,
    pub(super) observable: EditorState,
    pub(super) submit_listener: Option<JoinHandle<()>>,
}

impl SessionState {
    fn empty() -> Self {
        Self {
            session_id: None,
            target_id: None,
            snapshot: None,
            saves_in_flight: 0,
            pending: HashMap::new(),
            conflict: ConflictTracking::new(),
            observable: EditorState::default(),
            submit_listener: None,
        }
    }
}

pub(super) struct SessionInner {
    pub(super) store: Arc<dyn RemoteStore>,
    pub(super) hub: Arc<SessionHub>,
    pub(super) commands: Option<Arc<CommandHub>>,
    pub(super) state: Mutex<SessionState>,
    pub(super) watch_tx: watch::Sender<EditorState>,
    /// Bumped on every open/close. Completions carrying an older epoch are
    /// detached: their network calls finish, their state updates are dropped.
    pub(super) epoch: AtomicU64,
    /// Issuance order of conflict queries; only the newest generation's
    /// completion may touch observable state.
    pub(super) conflict_gen: AtomicU64,
}

impl SessionInner {
    pub(super) fn publish(&self, st: &SessionState) {
        self.watch_tx.send_replace(st.observable.clone());
    }
}

/// One appointment editor. Owns the snapshot, the per-field save pipelines,
/// and the conflict checker for at most one open session at a time. Cloning
/// is cheap and shares the same session.
#[derive(Clone)]
pub struct EditorSession {
    pub(super) inner: Arc<SessionInner>,
}

impl EditorSession {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        hub: Arc<SessionHub>,
        commands: Option<Arc<CommandHub>>,
    ) -> Self {
        let (watch_tx, _) = watch::channel(EditorState::default());
        Self {
            inner: Arc::new(SessionInner {
                store,
                hub,
                commands,
                state: Mutex::new(SessionState::empty()),
                watch_tx,
                epoch: AtomicU64::new(0),
                conflict_gen: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EditorState> {
        self.inner.watch_tx.subscribe()
    }

    pub(super) fn current_epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    pub async fn session_id(&self) -> Option<Ulid> {
        self.inner.state.lock().await.session_id
    }

    /// Clone of the current snapshot, for rendering.
    pub async fn snapshot(&self) -> Option<Snapshot> {
        self.inner.state.lock().await.snapshot.clone()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Open (or reopen) the editor onto a target. Any previous session is
    /// closed first: its pending edits are flushed detached, its conflict
    /// state and acknowledgment flag reset, its snapshot replaced wholesale.
    pub async fn open(&self, target: SessionTarget) -> Ulid {
        let inner = &self.inner;
        let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        inner.conflict_gen.fetch_add(1, Ordering::SeqCst);

        let mut st = inner.state.lock().await;
        let flush = teardown_locked(&mut st);
        let old_target = st.target_id.take();
        if let Some(old_session) = st.session_id.take() {
            inner.hub.send(old_session, SessionEvent::SessionClosed);
            inner.hub.remove(&old_session);
        } else {
            metrics::gauge!(SESSIONS_ACTIVE).increment(1.0);
        }
        self.spawn_detached_flush(old_target, flush);

        let previous = st.snapshot.take();
        let (seeded, _prefilled) = snapshot::reseed(previous.as_ref(), &target, now_ms());
        let session_id = Ulid::new();
        st.session_id = Some(session_id);
        st.target_id = match &target {
            SessionTarget::Existing(resource) => Some(resource.id),
            SessionTarget::New { .. } => None,
        };
        st.snapshot = Some(seeded);
        st.saves_in_flight = 0;
        st.conflict = ConflictTracking::new();
        st.observable = EditorState::default();
        inner.publish(&st);

        if let Some(commands) = &inner.commands {
            st.submit_listener = Some(self.spawn_submit_listener(commands.subscribe(), epoch));
        }

        // Check the seeded slot right away (debounced like any range change)
        self.schedule_conflict_check(&mut st, epoch);

        info!(session = %session_id, "edit session opened");
        session_id
    }

    /// Fetch the resource, then open onto it.
    pub async fn open_by_id(&self, id: Ulid) -> Result<Ulid, SessionError> {
        let resource = self
            .inner
            .store
            .get_resource(id)
            .await
            .map_err(|e| SessionError::Store(e.to_string()))?;
        Ok(self.open(SessionTarget::Existing(resource)).await)
    }

    /// Close the session. Pending debounced edits are force-committed, but
    /// their completions (and those of saves already in flight) no longer
    /// touch observable state.
    pub async fn close(&self) {
        let inner = &self.inner;
        let mut st = inner.state.lock().await;
        let Some(session_id) = st.session_id.take() else {
            return;
        };
        inner.epoch.fetch_add(1, Ordering::SeqCst);
        inner.conflict_gen.fetch_add(1, Ordering::SeqCst);

        let flush = teardown_locked(&mut st);
        let target = st.target_id.take();
        st.snapshot = None;
        st.saves_in_flight = 0;
        st.conflict = ConflictTracking::new();
        st.observable = EditorState::default();
        inner.publish(&st);
        drop(st);

        self.spawn_detached_flush(target, flush);
        inner.hub.send(session_id, SessionEvent::SessionClosed);
        inner.hub.remove(&session_id);
        metrics::gauge!(SESSIONS_ACTIVE).decrement(1.0);
        info!(session = %session_id, "edit session closed");
    }

    // ── Field edits ──────────────────────────────────────────────

    /// Route a field edit: time endpoints go through the invariant paths,
    /// everything else through its save policy.
    pub async fn edit_field(&self, edit: FieldEdit) {
        match edit {
            FieldEdit::Start(value) => self.edit_start(value).await,
            FieldEdit::End(value) => self.edit_end(value).await,
            other => {
                let mut st = self.inner.state.lock().await;
                if st.session_id.is_none() {
                    return;
                }
                let epoch = self.current_epoch();
                let Some(snapshot) = st.snapshot.as_mut() else {
                    return;
                };
                snapshot.apply_edit(&other);
                match other.field().save_policy() {
                    SavePolicy::Debounced => self.queue_debounced(&mut st, other, epoch),
                    SavePolicy::Immediate => self.spawn_save(vec![other], epoch),
                }
            }
        }
    }

    /// Blur: flush the field's pending debounced value immediately.
    pub async fn commit_field(&self, field: Field) {
        let mut st = self.inner.state.lock().await;
        if st.session_id.is_none() {
            return;
        }
        let epoch = self.current_epoch();
        if let Some(pending) = st.pending.remove(&field) {
            pending.timer.abort();
            self.spawn_save(vec![pending.edit], epoch);
        }
    }

    /// Force-commit every pending debounced edit (submit shortcut).
    pub async fn flush_all(&self) {
        let mut st = self.inner.state.lock().await;
        if st.session_id.is_none() {
            return;
        }
        let epoch = self.current_epoch();
        let drained: Vec<FieldEdit> = st
            .pending
            .drain()
            .map(|(_, pending)| {
                pending.timer.abort();
                pending.edit
            })
            .collect();
        for edit in drained {
            self.spawn_save(vec![edit], epoch);
        }
    }

    /// Commit a draft session to the store. Flushes pending edits first; an
    /// existing target just returns its id.
    pub async fn submit(&self) -> Result<Ulid, SessionError> {
        self.flush_all().await;
        let epoch = self.current_epoch();
        let draft = {
            let st = self.inner.state.lock().await;
            if st.session_id.is_none() {
                return Err(SessionError::NoOpenSession);
            }
            if let Some(id) = st.target_id {
                return Ok(id);
            }
            let snapshot = st.snapshot.as_ref().ok_or(SessionError::NoOpenSession)?;
            let span = snapshot.range().ok_or(SessionError::EndBeforeStart {
                start: snapshot.start.unwrap_or(0),
                end: snapshot.end.unwrap_or(0),
            })?;
            NewResource {
                span,
                client_id: snapshot.client_id,
                location: snapshot.location,
                location_detail: snapshot.location_detail.clone(),
                notes: snapshot.notes.clone(),
                status: snapshot.status,
                payment: snapshot.payment(),
            }
        };
        let created = self
            .inner
            .store
            .create_resource(draft)
            .await
            .map_err(|e| SessionError::Store(e.to_string()))?;
        let mut st = self.inner.state.lock().await;
        if self.current_epoch() == epoch && st.session_id.is_some() {
            st.target_id = Some(created.id);
        }
        Ok(created.id)
    }

    // ── Time edits (invariant maintenance) ───────────────────────

    async fn edit_start(&self, value: Option<Ms>) {
        let mut st = self.inner.state.lock().await;
        if st.session_id.is_none() {
            return;
        }
        let epoch = self.current_epoch();
        let outcome = {
            let Some(snapshot) = st.snapshot.as_mut() else {
                return;
            };
            match value {
                None => {
                    snapshot.start = None;
                    TimeEditOutcome::Nothing
                }
                Some(new_start) => {
                    if let Some(prior) = snapshot.range() {
                        // Invariant A: the end shifts to keep the duration
                        let shifted = invariants::shift_preserving_duration(&prior, new_start);
                        let stale_date = snapshot
                            .date
                            .unwrap_or_else(|| invariants::date_of(new_start));
                        let (span, date) =
                            invariants::settle(UpdateSource::FromTime, shifted, stale_date);
                        snapshot.start = Some(span.start);
                        snapshot.end = Some(span.end);
                        if snapshot.date != Some(date) {
                            snapshot.date = Some(date);
                        }
                        TimeEditOutcome::Save(vec![
                            FieldEdit::Start(Some(span.start)),
                            FieldEdit::End(Some(span.end)),
                        ])
                    } else {
                        // No prior valid pair: nothing to preserve
                        snapshot.start = Some(new_start);
                        let date = invariants::date_of(new_start);
                        if snapshot.date != Some(date) {
                            snapshot.date = Some(date);
                        }
                        match snapshot.end {
                            Some(end) if end <= new_start => {
                                TimeEditOutcome::Invalid(SessionError::EndBeforeStart {
                                    start: new_start,
                                    end,
                                })
                            }
                            _ => TimeEditOutcome::Save(vec![FieldEdit::Start(Some(new_start))]),
                        }
                    }
                }
            }
        };
        self.finish_time_edit(&mut st, outcome, epoch);
    }

    async fn edit_end(&self, value: Option<Ms>) {
        let mut st = self.inner.state.lock().await;
        if st.session_id.is_none() {
            return;
        }
        let epoch = self.current_epoch();
        let outcome = {
            let Some(snapshot) = st.snapshot.as_mut() else {
                return;
            };
            match value {
                None => {
                    snapshot.end = None;
                    TimeEditOutcome::Nothing
                }
                Some(end) => {
                    snapshot.end = Some(end);
                    match snapshot.start {
                        Some(start) if end <= start => {
                            TimeEditOutcome::Invalid(SessionError::EndBeforeStart { start, end })
                        }
                        _ => TimeEditOutcome::Save(vec![FieldEdit::End(Some(end))]),
                    }
                }
            }
        };
        self.finish_time_edit(&mut st, outcome, epoch);
    }

    /// The date input changed. Both endpoints keep their time-of-day and
    /// move onto the new date, persisted together.
    pub async fn set_date(&self, date: EditDate) {
        let mut st = self.inner.state.lock().await;
        if st.session_id.is_none() {
            return;
        }
        let epoch = self.current_epoch();
        let outcome = {
            let Some(snapshot) = st.snapshot.as_mut() else {
                return;
            };
            if snapshot.date == Some(date) {
                // Already there; re-deriving would only invite cycles
                TimeEditOutcome::Nothing
            } else {
                snapshot.date = Some(date);
                match (snapshot.start, snapshot.end) {
                    (Some(start), Some(end)) if start < end => {
                        let (span, settled_date) = invariants::settle(
                            UpdateSource::FromDate,
                            Span::new(start, end),
                            date,
                        );
                        snapshot.date = Some(settled_date);
                        snapshot.start = Some(span.start);
                        snapshot.end = Some(span.end);
                        TimeEditOutcome::Save(vec![
                            FieldEdit::Start(Some(span.start)),
                            FieldEdit::End(Some(span.end)),
                        ])
                    }
                    (Some(start), None) => {
                        let moved = invariants::with_date(start, date);
                        snapshot.start = Some(moved);
                        TimeEditOutcome::Save(vec![FieldEdit::Start(Some(moved))])
                    }
                    _ => TimeEditOutcome::Nothing,
                }
            }
        };
        self.finish_time_edit(&mut st, outcome, epoch);
    }

    /// Quick-duration shortcut: `end = start + preset`, an explicit new
    /// duration rather than a preserved one.
    pub async fn apply_duration_preset(&self, preset: DurationPreset) {
        let mut st = self.inner.state.lock().await;
        if st.session_id.is_none() {
            return;
        }
        let epoch = self.current_epoch();
        let outcome = {
            let Some(snapshot) = st.snapshot.as_mut() else {
                return;
            };
            let Some(start) = snapshot.start else {
                return;
            };
            let end = invariants::preset_end(start, preset);
            snapshot.end = Some(end);
            TimeEditOutcome::Save(vec![FieldEdit::End(Some(end))])
        };
        self.finish_time_edit(&mut st, outcome, epoch);
    }

    /// Re-run the conflict check for the current range (debounced).
    pub async fn request_conflict_check(&self) {
        let mut st = self.inner.state.lock().await;
        if st.session_id.is_none() {
            return;
        }
        let epoch = self.current_epoch();
        self.schedule_conflict_check(&mut st, epoch);
    }

    fn finish_time_edit(&self, st: &mut SessionState, outcome: TimeEditOutcome, epoch: u64) {
        match outcome {
            TimeEditOutcome::Save(edits) => self.spawn_save(edits, epoch),
            TimeEditOutcome::Invalid(err) => {
                st.observable.last_error = Some(err.to_string());
                self.inner.publish(st);
            }
            TimeEditOutcome::Nothing => {}
        }
        self.schedule_conflict_check(st, epoch);
    }

    // ── Background plumbing ──────────────────────────────────────

    fn spawn_submit_listener(
        &self,
        mut rx: broadcast::Receiver<EditorCommand>,
        epoch: u64,
    ) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(EditorCommand::Submit) => {
                        if session.current_epoch() != epoch {
                            break;
                        }
                        session.flush_all().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Persist edits that were still pending when the session went away.
    /// The calls run to completion but nothing observes them.
    fn spawn_detached_flush(&self, target: Option<Ulid>, edits: Vec<FieldEdit>) {
        let Some(id) = target else { return };
        if edits.is_empty() {
            return;
        }
        let store = self.inner.store.clone();
        tokio::spawn(async move {
            let saves = edits.into_iter().map(|edit| {
                let store = store.clone();
                async move {
                    let field = edit.field();
                    let patch = ResourcePatch::from_edits(std::slice::from_ref(&edit));
                    if let Err(e) = store.update_fields(id, patch).await {
                        tracing::warn!(field = field.label(), "detached flush save failed: {e}");
                    }
                }
            });
            futures::future::join_all(saves).await;
        });
    }
}

enum TimeEditOutcome {
    Save(Vec<FieldEdit>),
    Invalid(SessionError),
    Nothing,
}

/// Abort every session-owned task and hand back the pending edits.
fn teardown_locked(st: &mut SessionState) -> Vec<FieldEdit> {
    let flush: Vec<FieldEdit> = st
        .pending
        .drain()
        .map(|(_, pending)| {
            pending.timer.abort();
            pending.edit
        })
        .collect();
    if let Some(timer) = st.conflict.debounce.take() {
        timer.abort();
    }
    if let Some(listener) = st.submit_listener.take() {
        listener.abort();
    }
    flush
}
