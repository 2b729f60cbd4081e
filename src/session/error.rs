use crate::model::{Field, Ms};

#[derive(Debug)]
pub enum SessionError {
    /// No open session, or the session has no remote identity yet.
    NoOpenSession,
    /// The edit would leave the pair inverted.
    EndBeforeStart { start: Ms, end: Ms },
    /// Timestamp outside the representable window, or span too wide.
    InvalidTimestamp(&'static str),
    /// Free-text field over its length cap.
    TextTooLong(Field),
    /// The remote store rejected or failed the call.
    Store(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NoOpenSession => write!(f, "no open edit session"),
            SessionError::EndBeforeStart { start, end } => {
                write!(f, "end {end} is not after start {start}")
            }
            SessionError::InvalidTimestamp(msg) => write!(f, "invalid timestamp: {msg}"),
            SessionError::TextTooLong(field) => {
                write!(f, "{} exceeds length limit", field.label())
            }
            SessionError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}
