//! Session (L4): holds reassembler state, peer info, bound ruleset, and
//! input name; drives the state machine `INIT -> OPEN -> CLOSING -> CLOSED`.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::Error;
use crate::frame::FrameReassembler;
use crate::message::MessageRecord;
use crate::ruleset::Ruleset;
use crate::stream::Stream;

/// A session's lifecycle state. No transition is reversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted but not yet past ACL/handshake.
    Init,
    /// Actively reading and dispatching messages.
    Open,
    /// Tearing down — flushing (regular close) or discarding (error close).
    Closing,
    /// Fully released; removed from the server's session table.
    Closed,
}

/// Everything about a session except its live stream: peer identity, bound
/// ruleset, reassembler state, and lifecycle state. Split out from
/// [`Session`] so the state machine and frame reassembly can be exercised
/// without a real socket.
///
/// `bound_ruleset` is a [`Weak`] reference, not a strong one: the cycle
/// session -> ruleset -> registry -> ... -> session is broken here, the
/// systems-language strategy the design notes call for. A session never
/// keeps a ruleset alive past a config reload that destroyed it; dispatch
/// simply falls back to the registry's current default in that case.
#[derive(Debug)]
struct SessionCore {
    peer_addr: IpAddr,
    peer_fqdn: Option<String>,
    peer_tls_name: Option<String>,
    bound_ruleset: Weak<Ruleset>,
    input_name: Option<String>,
    reassembler: FrameReassembler,
    flow_control_mode: bool,
    state: SessionState,
    shutdown: Arc<AtomicBool>,
}

impl SessionCore {
    fn make_record(&self, payload: Vec<u8>) -> MessageRecord {
        MessageRecord {
            payload,
            peer_addr: self.peer_addr,
            peer_fqdn: self.peer_fqdn.clone(),
            peer_tls_name: self.peer_tls_name.clone(),
            input_name: self.input_name.clone(),
            ruleset: self.bound_ruleset.clone(),
        }
    }

    fn on_data(&mut self, bytes: &[u8]) -> Result<Vec<MessageRecord>, Error> {
        let frames = self.reassembler.feed(bytes)?;
        Ok(frames.into_iter().map(|f| self.make_record(f.payload)).collect())
    }

    fn on_close_regular(&mut self) -> Option<MessageRecord> {
        self.state = SessionState::Closing;
        let record = self
            .reassembler
            .flush_at_close()
            .map(|frame| self.make_record(frame.payload));
        self.state = SessionState::Closed;
        record
    }

    fn on_close_error(&mut self) {
        self.state = SessionState::Closing;
        self.state = SessionState::Closed;
    }
}

/// A single accepted TCP connection.
#[derive(Debug)]
pub struct Session {
    stream: Stream,
    core: SessionCore,
}

impl Session {
    /// Constructs a session in the `INIT` state. The caller transitions it
    /// to `OPEN` once ACL and (for TLS) handshake checks have passed.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: Stream,
        peer_addr: IpAddr,
        peer_fqdn: Option<String>,
        peer_tls_name: Option<String>,
        bound_ruleset: Weak<Ruleset>,
        input_name: Option<String>,
        support_octet_framing: bool,
        disable_lf_delim: bool,
        addtl_frame_delim: Option<u8>,
        flow_control_mode: bool,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Session {
            stream,
            core: SessionCore {
                peer_addr,
                peer_fqdn,
                peer_tls_name,
                bound_ruleset,
                input_name,
                reassembler: FrameReassembler::new(support_octet_framing, disable_lf_delim, addtl_frame_delim),
                flow_control_mode,
                state: SessionState::Init,
                shutdown,
            },
        }
    }

    /// The session's current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.core.state
    }

    /// Transitions `INIT -> OPEN` after a successful accept, ACL check, and
    /// (for TLS) handshake.
    pub fn mark_open(&mut self) {
        debug_assert_eq!(self.core.state, SessionState::Init);
        self.core.state = SessionState::Open;
    }

    /// The remote peer's address.
    pub fn peer_addr(&self) -> IpAddr {
        self.core.peer_addr
    }

    /// Mutable access to the underlying stream, for the server's read loop.
    pub fn stream_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }

    /// Whether flow-control light-delay marking applies to this session's
    /// messages.
    pub fn flow_control_mode(&self) -> bool {
        self.core.flow_control_mode
    }

    /// Non-blocking check of the shared shutdown flag, polled by the
    /// server's read loop after every `recv`.
    pub fn is_shutdown(&self) -> bool {
        self.core.shutdown.load(Ordering::Acquire)
    }

    /// Drives the reassembler over newly received bytes, returning a
    /// message record for each frame this chunk completed, in arrival
    /// order.
    pub fn on_data(&mut self, bytes: &[u8]) -> Result<Vec<MessageRecord>, Error> {
        self.core.on_data(bytes)
    }

    /// Orderly remote close (`recv` returned `0`): flushes any pending
    /// incomplete frame as a final message, then transitions to `CLOSED`.
    pub fn on_close_regular(&mut self) -> Option<MessageRecord> {
        self.core.on_close_regular()
    }

    /// Error-path close: discards any pending incomplete frame without
    /// flushing, then transitions to `CLOSED`.
    pub fn on_close_error(&mut self) {
        self.core.on_close_error()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    fn core(bound_ruleset: Weak<Ruleset>) -> SessionCore {
        SessionCore {
            peer_addr: "127.0.0.1".parse().unwrap(),
            peer_fqdn: None,
            peer_tls_name: None,
            bound_ruleset,
            input_name: None,
            reassembler: FrameReassembler::new(true, false, None),
            flow_control_mode: false,
            state: SessionState::Open,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn on_data_emits_records_in_arrival_order() {
        let mut core = core(Weak::new());

        let records = core.on_data(b"hello\nworld\n").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload, b"hello");
        assert_eq!(records[1].payload, b"world");
    }

    #[test]
    fn regular_close_flushes_partial_frame() {
        let mut core = core(Weak::new());

        core.on_data(b"partial").unwrap();
        let flushed = core.on_close_regular();

        assert_eq!(flushed.unwrap().payload, b"partial");
        assert_eq!(core.state, SessionState::Closed);
    }

    #[test]
    fn error_close_discards_without_flush() {
        let mut core = core(Weak::new());

        core.on_data(b"partial").unwrap();
        core.on_close_error();

        assert_eq!(core.state, SessionState::Closed);
    }
}
