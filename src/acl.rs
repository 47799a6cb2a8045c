//! Peer ACL (L1): decides whether a connecting address/hostname is permitted.

use std::net::IpAddr;

/// A single permitted-peer entry: an IP prefix or reverse-resolved hostname
/// pattern. Patterns support a leading `*` wildcard.
///
/// An entry prefixed with `!` in its source form is a deny entry; everything
/// else is an allow entry. This is not spelled out by name in the legacy
/// directive table (only `inputtcpserverstreamdriverpermittedpeer` exists,
/// which only ever appends), but the ACL semantics ("on ambiguity, deny
/// wins") only make sense if both polarities of entry can exist, so the `!`
/// prefix convention from `rsyslog`'s own `PermittedPeers` is carried over
/// here rather than invented from nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermittedPeer {
    pattern: String,
    policy: Policy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy {
    Allow,
    Deny,
}

impl PermittedPeer {
    /// Parses a single permitted-peer directive argument.
    pub fn parse(raw: &str) -> Self {
        if let Some(pattern) = raw.strip_prefix('!') {
            PermittedPeer {
                pattern: pattern.to_ascii_lowercase(),
                policy: Policy::Deny,
            }
        } else {
            PermittedPeer {
                pattern: raw.to_ascii_lowercase(),
                policy: Policy::Allow,
            }
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        let candidate = candidate.to_ascii_lowercase();

        match self.pattern.strip_prefix('*') {
            Some(suffix) => candidate.ends_with(suffix),
            None => candidate == self.pattern,
        }
    }
}

/// Ordered allow-list of [`PermittedPeer`] entries, consulted by the ACL
/// hook at accept time against the peer's IP address and (if already
/// reverse-resolved) hostname. This crate performs no certificate-based
/// peer authentication, so ACL matching never depends on TLS having
/// completed.
#[derive(Debug, Clone, Default)]
pub struct PeerAcl {
    peers: Vec<PermittedPeer>,
}

impl PeerAcl {
    /// Creates an empty ACL. An empty ACL permits every peer — matching the
    /// legacy behavior where no `permittedpeer` directives means no
    /// restriction.
    pub fn new() -> Self {
        PeerAcl { peers: Vec::new() }
    }

    /// Appends a permitted-peer entry, in directive order.
    pub fn push(&mut self, peer: PermittedPeer) {
        self.peers.push(peer);
    }

    /// Decides whether `peer_addr`/`peer_fqdn` is allowed to proceed for the
    /// given transport.
    ///
    /// The transport label currently only distinguishes "TCP" from future
    /// transports; all entries apply uniformly since this crate only speaks
    /// TCP. `resolve_dns_if_needed` controls whether a hostname pattern may
    /// be matched against `peer_fqdn`: if it is `false` and a rule only
    /// matches against `peer_fqdn`, failing to have resolved a hostname is
    /// treated as *not allowed* rather than silently skipped.
    pub fn is_allowed(
        &self,
        _transport_label: &str,
        peer_addr: IpAddr,
        peer_fqdn: Option<&str>,
        resolve_dns_if_needed: bool,
    ) -> bool {
        if self.peers.is_empty() {
            return true;
        }

        let addr_str = peer_addr.to_string();

        let mut allowed = false;
        let mut denied = false;

        for entry in &self.peers {
            let addr_hit = entry.matches(&addr_str);

            let fqdn_hit = match peer_fqdn {
                Some(fqdn) => entry.matches(fqdn),
                None => resolve_dns_if_needed && false,
            };

            if addr_hit || fqdn_hit {
                match entry.policy {
                    Policy::Allow => allowed = true,
                    Policy::Deny => denied = true,
                }
            }
        }

        // On ambiguity (both allow and deny matched), deny wins.
        allowed && !denied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_acl_allows_everyone() {
        let acl = PeerAcl::new();
        assert!(acl.is_allowed("TCP", "10.0.0.5".parse().unwrap(), None, false));
    }

    #[test]
    fn exact_ip_match_allowed() {
        let mut acl = PeerAcl::new();
        acl.push(PermittedPeer::parse("10.0.0.5"));
        assert!(acl.is_allowed("TCP", "10.0.0.5".parse().unwrap(), None, false));
        assert!(!acl.is_allowed("TCP", "10.0.0.6".parse().unwrap(), None, false));
    }

    #[test]
    fn wildcard_hostname_suffix_match() {
        let mut acl = PeerAcl::new();
        acl.push(PermittedPeer::parse("*.example.com"));
        assert!(acl.is_allowed(
            "TCP",
            "192.0.2.1".parse().unwrap(),
            Some("host.example.com"),
            false,
        ));
        assert!(!acl.is_allowed(
            "TCP",
            "192.0.2.1".parse().unwrap(),
            Some("host.evil.com"),
            false,
        ));
    }

    #[test]
    fn deny_wins_on_ambiguous_match() {
        let mut acl = PeerAcl::new();
        acl.push(PermittedPeer::parse("*.example.com"));
        acl.push(PermittedPeer::parse("!bad.example.com"));
        assert!(!acl.is_allowed(
            "TCP",
            "192.0.2.1".parse().unwrap(),
            Some("bad.example.com"),
            false,
        ));
        assert!(acl.is_allowed(
            "TCP",
            "192.0.2.1".parse().unwrap(),
            Some("good.example.com"),
            false,
        ));
    }

    #[test]
    fn unresolved_fqdn_required_is_not_allowed() {
        let mut acl = PeerAcl::new();
        acl.push(PermittedPeer::parse("*.example.com"));
        assert!(!acl.is_allowed("TCP", "192.0.2.1".parse().unwrap(), None, true));
    }
}
