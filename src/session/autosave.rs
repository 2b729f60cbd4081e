use std::time::Duration;

use tracing::{debug, warn};

use crate::limits::*;
use crate::model::*;
use crate::notify::SessionEvent;
use crate::observability::{SAVES_IN_FLIGHT, SAVES_TOTAL, SAVE_DURATION_SECONDS};

use super::error::SessionError;
use super::{now_ms, EditorSession, PendingEdit, SessionState};

impl EditorSession {
    /// Park a debounced edit and (re)start its quiet-period timer. A newer
    /// edit to the same field replaces the parked value and resets the
    /// timer; timers never stack.
    pub(super) fn queue_debounced(&self, st: &mut SessionState, edit: FieldEdit, epoch: u64) {
        let field = edit.field();
        let session = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(SAVE_DEBOUNCE_MS)).await;
            session.flush_pending(field, epoch).await;
        });
        if let Some(previous) = st.pending.insert(field, PendingEdit { edit, timer }) {
            previous.timer.abort();
        }
    }

    /// Timer fired: persist whatever is still parked for the field. Blur
    /// may have flushed it already, in which case there is nothing to do.
    pub(super) async fn flush_pending(&self, field: Field, epoch: u64) {
        let edit = {
            let mut st = self.inner.state.lock().await;
            if self.current_epoch() != epoch || st.session_id.is_none() {
                return;
            }
            st.pending.remove(&field).map(|pending| pending.edit)
        };
        if let Some(edit) = edit {
            self.perform_save(vec![edit], epoch).await;
        }
    }

    pub(super) fn spawn_save(&self, edits: Vec<FieldEdit>, epoch: u64) {
        let session = self.clone();
        tokio::spawn(async move {
            session.perform_save(edits, epoch).await;
        });
    }

    /// One save round trip. Each call is one `update_fields` patch; coupled
    /// time edits arrive here together so the store never sees an inverted
    /// pair. A failure keeps the local edit and surfaces `last_error`; the
    /// user's next edit on the field is the implicit retry.
    pub(super) async fn perform_save(&self, edits: Vec<FieldEdit>, epoch: u64) {
        let inner = &self.inner;

        // Cleared time endpoints are transient local state, never persisted
        let edits: Vec<FieldEdit> = edits
            .into_iter()
            .filter(|edit| !matches!(edit, FieldEdit::Start(None) | FieldEdit::End(None)))
            .collect();
        if edits.is_empty() {
            return;
        }
        let fields: Vec<Field> = edits.iter().map(FieldEdit::field).collect();

        if let Err(err) = validate_edits(&edits) {
            let mut st = inner.state.lock().await;
            if self.current_epoch() != epoch || st.session_id.is_none() {
                return;
            }
            st.observable.last_error = Some(err.to_string());
            inner.publish(&st);
            return;
        }

        let (target, session_id) = {
            let mut st = inner.state.lock().await;
            if self.current_epoch() != epoch || st.session_id.is_none() {
                return;
            }
            // Drafts have no remote identity yet; they persist on submit
            let Some(target) = st.target_id else { return };
            st.saves_in_flight += 1;
            st.observable.is_saving = true;
            inner.publish(&st);
            (target, st.session_id)
        };
        metrics::gauge!(SAVES_IN_FLIGHT).increment(1.0);

        let patch = ResourcePatch::from_edits(&edits);
        let started = std::time::Instant::now();
        let result = inner.store.update_fields(target, patch).await;
        metrics::histogram!(SAVE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        metrics::gauge!(SAVES_IN_FLIGHT).decrement(1.0);

        let mut st = inner.state.lock().await;
        if self.current_epoch() != epoch || st.session_id != session_id {
            debug!("save finished after session detach");
            return;
        }
        st.saves_in_flight = st.saves_in_flight.saturating_sub(1);
        st.observable.is_saving = st.saves_in_flight > 0;
        match result {
            Ok(_) => {
                metrics::counter!(SAVES_TOTAL, "status" => "ok").increment(1);
                let at = now_ms();
                st.observable.last_saved_at = Some(at);
                st.observable.last_error = None;
                inner.publish(&st);
                if let Some(sid) = session_id {
                    inner.hub.send(sid, SessionEvent::SaveCompleted { fields, at });
                }
            }
            Err(e) => {
                metrics::counter!(SAVES_TOTAL, "status" => "error").increment(1);
                warn!("field save failed: {e}");
                st.observable.last_error = Some(e.to_string());
                inner.publish(&st);
                if let Some(sid) = session_id {
                    inner.hub.send(
                        sid,
                        SessionEvent::SaveFailed {
                            fields,
                            message: e.to_string(),
                        },
                    );
                }
            }
        }
    }
}

/// Local validation ahead of the network: malformed timestamps, inverted
/// compound pairs, and oversized free text never leave the client.
fn validate_edits(edits: &[FieldEdit]) -> Result<(), SessionError> {
    let mut start = None;
    let mut end = None;
    for edit in edits {
        match edit {
            FieldEdit::Start(Some(t)) | FieldEdit::End(Some(t)) => {
                if *t < MIN_VALID_TIMESTAMP_MS || *t > MAX_VALID_TIMESTAMP_MS {
                    return Err(SessionError::InvalidTimestamp("timestamp out of range"));
                }
                match edit {
                    FieldEdit::Start(_) => start = Some(*t),
                    _ => end = Some(*t),
                }
            }
            FieldEdit::Notes(Some(text)) if text.len() > MAX_NOTES_LEN => {
                return Err(SessionError::TextTooLong(Field::Notes));
            }
            FieldEdit::PaymentNotes(Some(text)) if text.len() > MAX_NOTES_LEN => {
                return Err(SessionError::TextTooLong(Field::PaymentNotes));
            }
            FieldEdit::LocationDetail(Some(text)) if text.len() > MAX_DETAIL_LEN => {
                return Err(SessionError::TextTooLong(Field::LocationDetail));
            }
            _ => {}
        }
    }
    if let (Some(start), Some(end)) = (start, end) {
        if end <= start {
            return Err(SessionError::EndBeforeStart { start, end });
        }
        if end - start > MAX_SPAN_DURATION_MS {
            return Err(SessionError::InvalidTimestamp("span too wide"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_inverted_compound() {
        let result = validate_edits(&[
            FieldEdit::Start(Some(2_000)),
            FieldEdit::End(Some(1_000)),
        ]);
        assert!(matches!(result, Err(SessionError::EndBeforeStart { .. })));
    }

    #[test]
    fn validate_rejects_oversized_notes() {
        let text = "x".repeat(MAX_NOTES_LEN + 1);
        let result = validate_edits(&[FieldEdit::Notes(Some(text))]);
        assert!(matches!(result, Err(SessionError::TextTooLong(Field::Notes))));
    }

    #[test]
    fn validate_rejects_out_of_range_timestamp() {
        let result = validate_edits(&[FieldEdit::Start(Some(MAX_VALID_TIMESTAMP_MS + 1))]);
        assert!(matches!(result, Err(SessionError::InvalidTimestamp(_))));
    }

    #[test]
    fn validate_accepts_ordinary_edits() {
        assert!(validate_edits(&[
            FieldEdit::Start(Some(1_000)),
            FieldEdit::End(Some(2_000)),
            FieldEdit::Notes(Some("ok".into())),
        ])
        .is_ok());
    }
}
