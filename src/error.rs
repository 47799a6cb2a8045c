//! Error kinds distinguished by the core.

use std::io;

/// Errors the core distinguishes, per the error handling design.
///
/// I/O and framing errors are contained within a session; configuration
/// errors propagate to the facade and abort activation; queue and action
/// errors surface per rule but do not abort the batch.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown directive, bad value, or duplicate ruleset name. Fails config
    /// load.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Activation requested with no listener instances configured.
    #[error("activation requested with no listener instances")]
    NoListeners,

    /// Operation requires a current ruleset but none is set.
    #[error("no current ruleset is set")]
    NoCurrRuleset,

    /// Duplicate ruleset queue.
    #[error("ruleset `{0}` already has a queue attached")]
    RulesQueueExists(String),

    /// Referenced parser not registered.
    #[error("parser `{0}` is not registered")]
    ParserNotFound(String),

    /// ACL or TLS handshake failure; the stream is discarded without a
    /// session ever being created.
    #[error("peer denied: {0}")]
    PeerDenied(String),

    /// Reassembler input violates framing rules.
    #[error("malformed frame: {0}")]
    FrameMalformed(String),

    /// Read error recoverable by the peer reconnecting.
    #[error("transient I/O error: {0}")]
    IoTransient(#[source] io::Error),

    /// Session cap or memory exhaustion.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Cooperative cancellation. Not truly an error; surfaced as partial
    /// completion.
    #[error("shutdown requested")]
    Shutdown,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoTransient(err)
    }
}

/// A specialized `Result` type using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
