//! The message record submitted by a session to the batch router.

use std::net::IpAddr;
use std::sync::Arc;

use crate::ruleset::Ruleset;

/// A single reassembled message, tagged with the session metadata needed
/// downstream by rules and actions.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    /// The reassembled payload bytes.
    pub payload: Vec<u8>,
    /// Remote peer address.
    pub peer_addr: IpAddr,
    /// Reverse-resolved peer hostname, if known.
    pub peer_fqdn: Option<String>,
    /// Client's SNI hostname, present only for TLS sessions. Unverified —
    /// connection metadata, not a peer identity.
    pub peer_tls_name: Option<String>,
    /// Input name label configured for the listener the session arrived on.
    pub input_name: Option<String>,
    /// Ruleset this message is bound to. A weak reference: a message
    /// outlives neither its session nor, transitively, the ruleset it was
    /// stamped with.
    pub ruleset: std::sync::Weak<Ruleset>,
}

impl MessageRecord {
    /// Resolves the message's bound ruleset, falling back to `default` if
    /// the weak reference has already been invalidated by a config reload.
    pub fn resolve_ruleset(&self, default: &Arc<Ruleset>) -> Arc<Ruleset> {
        self.ruleset.upgrade().unwrap_or_else(|| Arc::clone(default))
    }
}
