use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{debug, warn};

use crate::limits::*;
use crate::model::*;
use crate::notify::SessionEvent;
use crate::observability::{
    CONFLICT_CHECKS_TOTAL, CONFLICT_CHECK_DURATION_SECONDS, CONFLICT_RESULTS_STALE_TOTAL,
};

use super::{EditorSession, SessionState, Snapshot};

impl EditorSession {
    /// (Re)arm the debounced conflict check for the snapshot's range. Called
    /// with the state lock held, from every path that can change the range.
    ///
    /// An incomplete or inverted range clears the result right here, with no
    /// query and no debounce wait; any in-flight query is superseded so its
    /// late result cannot resurrect the cleared state.
    pub(super) fn schedule_conflict_check(&self, st: &mut SessionState, epoch: u64) {
        if st.session_id.is_none() {
            return;
        }
        if let Some(timer) = st.conflict.debounce.take() {
            timer.abort();
        }
        let complete = st.snapshot.as_ref().and_then(Snapshot::range).is_some();
        if !complete {
            self.inner.conflict_gen.fetch_add(1, Ordering::SeqCst);
            st.conflict.inflight_gen = None;
            st.observable.conflicts = None;
            self.resolve_indicator_locked(st, epoch);
            self.inner.publish(st);
            return;
        }
        let session = self.clone();
        st.conflict.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(CONFLICT_DEBOUNCE_MS)).await;
            session.run_conflict_check(epoch).await;
        }));
    }

    /// The quiet period elapsed: issue the query for whatever the range is
    /// now. Only the newest generation's completion may touch state.
    pub(super) async fn run_conflict_check(&self, epoch: u64) {
        let inner = &self.inner;
        let (query, generation) = {
            let mut st = inner.state.lock().await;
            if self.current_epoch() != epoch || st.session_id.is_none() {
                return;
            }
            let range = st.snapshot.as_ref().and_then(Snapshot::range);
            let Some(span) = range else {
                // Range went incomplete during the quiet period
                inner.conflict_gen.fetch_add(1, Ordering::SeqCst);
                st.conflict.inflight_gen = None;
                st.observable.conflicts = None;
                self.resolve_indicator_locked(&mut st, epoch);
                inner.publish(&st);
                return;
            };
            let generation = inner.conflict_gen.fetch_add(1, Ordering::SeqCst) + 1;
            st.conflict.inflight_gen = Some(generation);

            // Silent-fast path: the indicator only appears if the query is
            // still unresolved (and still the newest) after the delay.
            let session = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(INDICATOR_DELAY_MS)).await;
                session.maybe_show_indicator(generation, epoch).await;
            });

            (
                ConflictQuery {
                    span,
                    exclude: st.target_id,
                },
                generation,
            )
        };

        metrics::counter!(CONFLICT_CHECKS_TOTAL).increment(1);
        let started = std::time::Instant::now();
        let result = inner.store.check_conflicts(query).await;
        metrics::histogram!(CONFLICT_CHECK_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        let mut st = inner.state.lock().await;
        if self.current_epoch() != epoch || st.session_id.is_none() {
            return;
        }
        if inner.conflict_gen.load(Ordering::SeqCst) != generation {
            // Success or failure, a superseded result never lands
            metrics::counter!(CONFLICT_RESULTS_STALE_TOTAL).increment(1);
            debug!(generation, "superseded conflict result discarded");
            return;
        }
        st.conflict.inflight_gen = None;
        let session_id = st.session_id;
        match result {
            Ok(found) => {
                let has_conflict = found.has_conflict();
                st.observable.conflicts = Some(found);
                if st.conflict.first_ack_pending {
                    st.conflict.first_ack_pending = false;
                    if !has_conflict {
                        st.observable.show_available_ack = true;
                        if let Some(sid) = session_id {
                            inner.hub.send(sid, SessionEvent::AvailabilityConfirmed);
                        }
                        let session = self.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_millis(AVAILABLE_ACK_MS)).await;
                            session.clear_available_ack(epoch).await;
                        });
                    }
                }
                if let Some(sid) = session_id {
                    inner.hub.send(sid, SessionEvent::ConflictsUpdated { has_conflict });
                }
            }
            Err(e) => {
                // No definitive answer is not a conflict; never block editing
                warn!("conflict check failed: {e}");
                st.observable.conflicts = None;
            }
        }
        self.resolve_indicator_locked(&mut st, epoch);
        inner.publish(&st);
    }

    /// Feedback-slow path: show the indicator only if the query it belongs
    /// to is still the one in flight.
    async fn maybe_show_indicator(&self, generation: u64, epoch: u64) {
        let inner = &self.inner;
        let mut st = inner.state.lock().await;
        if self.current_epoch() != epoch || st.session_id.is_none() {
            return;
        }
        if st.conflict.inflight_gen == Some(generation) && !st.observable.is_checking_conflicts {
            st.observable.is_checking_conflicts = true;
            st.conflict.indicator_shown_at = Some(tokio::time::Instant::now());
            inner.publish(&st);
        }
    }

    /// Hide the indicator, honoring the minimum visible time. If it has not
    /// been up long enough, hiding is deferred; the deferred hide backs off
    /// if a newer query has taken the indicator over in the meantime.
    pub(super) fn resolve_indicator_locked(&self, st: &mut SessionState, epoch: u64) {
        if !st.observable.is_checking_conflicts {
            return;
        }
        let Some(shown_at) = st.conflict.indicator_shown_at else {
            return;
        };
        let min_visible = Duration::from_millis(INDICATOR_MIN_VISIBLE_MS);
        let elapsed = shown_at.elapsed();
        if elapsed >= min_visible {
            st.observable.is_checking_conflicts = false;
            st.conflict.indicator_shown_at = None;
            return;
        }
        let session = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(min_visible - elapsed).await;
            let mut st = session.inner.state.lock().await;
            if session.current_epoch() != epoch {
                return;
            }
            if st.conflict.inflight_gen.is_none() && st.observable.is_checking_conflicts {
                st.observable.is_checking_conflicts = false;
                st.conflict.indicator_shown_at = None;
                session.inner.publish(&st);
            }
        });
    }

    async fn clear_available_ack(&self, epoch: u64) {
        let mut st = self.inner.state.lock().await;
        if self.current_epoch() != epoch {
            return;
        }
        if st.observable.show_available_ack {
            st.observable.show_available_ack = false;
            self.inner.publish(&st);
        }
    }
}
