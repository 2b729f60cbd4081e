//! Scheduling-editor synchronization engine.
//!
//! Keeps a session-owned editable snapshot of an appointment consistent
//! with a remote store while the user edits it field-by-field: per-field
//! optimistic autosave with immediate/debounced policies, a debounced and
//! generation-counted conflict check with a silent-fast loading-indicator
//! policy, and invariant-preserving propagation between the coupled
//! (date, start, end) time fields.

pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod session;
pub mod store;

pub use model::{
    ConflictEntry, ConflictQuery, ConflictResult, DurationPreset, EditDate, EditorState, Field,
    FieldEdit, LocationKind, Ms, NewResource, Payment, PaymentMethod, PaymentStatus, Prefill,
    ResourcePatch, ResourceStatus, SavePolicy, ScheduledResource, Span,
};
pub use notify::{CommandHub, EditorCommand, SessionEvent, SessionHub};
pub use session::{EditorSession, SessionError, SessionTarget, Snapshot};
pub use store::{InMemoryRemoteStore, RemoteStore, StoreError};
