//! # Deadline-Core Error Kinds
//!
//! Typed errors returned synchronously by the public API, plus the
//! transport-level consequences of malformed or unnegotiated frames.

use thiserror::Error;

/// Errors produced by the deadline-aware-streams core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeadlineError {
    /// `set_stream_deadline` was called on a reserved stream ID (0-3) or one
    /// above the negotiated stream-ID limit.
    #[error("invalid stream id {0}: reserved or above negotiated limit")]
    InvalidStreamId(u64),

    /// Allocation of new deadline state failed and could not be recovered.
    #[error("resource exhausted allocating deadline state")]
    ResourceExhausted,

    /// A `DEADLINE_CONTROL` or `STREAM_DATA_DROPPED` frame failed to decode.
    #[error("malformed {0} frame")]
    FrameFormat(&'static str),

    /// Either frame arrived without both sides having advertised
    /// `enable_deadline_aware_streams`.
    #[error("{0} received without deadline-aware-streams negotiated")]
    FeatureNotNegotiated(&'static str),
}

impl DeadlineError {
    /// Whether this error must close the connection with a transport-level
    /// frame-format error, per the error handling design.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            DeadlineError::FrameFormat(_) | DeadlineError::FeatureNotNegotiated(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_stream_id_message() {
        let e = DeadlineError::InvalidStreamId(2);
        assert!(e.to_string().contains('2'));
    }

    #[test]
    fn fatal_classification() {
        assert!(!DeadlineError::InvalidStreamId(1).is_connection_fatal());
        assert!(!DeadlineError::ResourceExhausted.is_connection_fatal());
        assert!(DeadlineError::FrameFormat("DEADLINE_CONTROL").is_connection_fatal());
        assert!(DeadlineError::FeatureNotNegotiated("STREAM_DATA_DROPPED").is_connection_fatal());
    }
}
