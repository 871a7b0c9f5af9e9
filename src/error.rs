//! Public error surface. One variant per error kind in the error-handling
//! table; fatal variants carry the diagnostic string surfaced through
//! `SessionHandle::last_fatal()`, per-frame/per-call variants are never
//! returned from the Session API — they only ever become counters and
//! `Heartbeat` payloads.

use thiserror::Error;

/// Fatal or recoverable error kinds produced by the core.
#[derive(Debug, Error, Clone)]
pub enum Error {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("unsupported source scheme: {0}")]
    UnsupportedSource(String),

    #[error("codec error: {0}")]
    CodecError(String),

    #[error("source lost after exhausting reconnect attempts: {0}")]
    SourceLost(String),

    #[error("transient gap in frame delivery")]
    TransientGap,

    #[error("source disconnected")]
    Disconnected,

    #[error("no frames for longer than stall_timeout")]
    Stalled,

    #[error("end of stream")]
    EndOfStream,

    #[error("detector failure: {0}")]
    DetectorFailure(String),

    #[error("detector fatal after repeated failures: {0}")]
    DetectorFatal(String),

    #[error("vision model call timed out")]
    VlmTimeout,

    #[error("vision model transport error: {0}")]
    VlmTransport(String),

    #[error("vision model backend error: {0}")]
    VlmBackend(String),

    #[error("guarder call timed out")]
    GuarderTimeout,

    #[error("guarder error: {0}")]
    GuarderError(String),

    #[error("sink backpressure, oldest event dropped")]
    SinkBackpressure,

    #[error("shutdown did not complete within shutdown_grace")]
    ShutdownTimeout,
}

impl Error {
    /// Whether this kind aborts the whole session (§7 Propagation policy).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SourceUnavailable(_)
                | Error::UnsupportedSource(_)
                | Error::CodecError(_)
                | Error::SourceLost(_)
                | Error::DetectorFatal(_)
                | Error::ShutdownTimeout
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
