//! Errors that terminate a boot session.
//!
//! Channel-level I/O failures never show up here: they are contained at the
//! channel (which closes and drops out of the readiness set). Only conditions
//! the event loop cannot recover from are surfaced to its caller.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum SessionError {
    /// A trigger scanner filled its accumulation buffer without ever
    /// matching. The stream is not behaving like the configured workflow,
    /// so the session fails fast instead of scanning unbounded input.
    #[error("scan buffer overflow while waiting for `{pattern}`")]
    ScanOverflow { pattern: String },

    /// The readiness wait itself failed; no channel can be serviced anymore.
    #[error("readiness wait failed: {0}")]
    Wait(#[from] io::Error),
}
