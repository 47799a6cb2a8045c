//! TCP server (L5): owns the listener set, the session cap, and the
//! config/ruleset snapshot a running instance serves against. One
//! [`Runtime`](crate::rt::Runtime) reactor per listener thread — see
//! `crate::rt`'s module docs for why.
//!
//! The legacy source wires five callbacks (accept-filter, recv,
//! open-listen-sockets, regular-close, error-close) from the input facade
//! into a generic, pluggable TCP server. This crate has no separate plugin
//! boundary — the facade and the server are the same crate — so those slots
//! collapse into direct calls below (`PeerAcl::is_allowed`, `Session::on_data`,
//! `Session::on_close_regular`/`on_close_error`) rather than an indirection
//! layer with nothing on the other side of it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::batch::{self, Batch};
use crate::config::{DriverMode, InstanceConfig, ModuleConfig};
use crate::error::Error;
use crate::message::MessageRecord;
use crate::net::tcp::{TcpListener, TcpStream};
use crate::ruleset::{Ruleset, RulesetRegistry};
use crate::rt::Runtime;
use crate::session::Session;
use crate::stream::Stream;
use crate::tls::TlsAcceptor;

/// Minimum interval between consecutive session-cap warning log lines,
/// per spec's "logged at warning level no more than once per second".
const CAP_WARNING_INTERVAL: Duration = Duration::from_secs(1);

/// Size of the per-session read buffer.
const READ_BUF_SIZE: usize = 8192;

/// The shared TCP server for one activated module instance.
///
/// Per the design notes, this is an explicit value owned by the caller
/// (the input facade) and passed through activation, not a module-global
/// singleton — activation still only ever produces at most one of these
/// per process, matching the "singleton per module instance" invariant,
/// but nothing here enforces that with global state.
///
/// The session table the spec describes is represented here only as a
/// cap-enforcing counter: no operation in this module ever needs to look
/// up or iterate live sessions cross-thread (the session cap check and
/// the shutdown broadcast are the only cross-session operations, and both
/// are servable with an atomic counter and an atomic flag). Each session
/// itself is owned directly by the task it runs as, on its listener's own
/// reactor.
#[derive(Debug)]
pub struct TcpServer {
    config: Arc<ModuleConfig>,
    registry: Arc<RulesetRegistry>,
    tls_acceptor: Option<Arc<TlsAcceptor>>,
    session_count: Arc<AtomicUsize>,
    last_cap_warning: Mutex<Instant>,
    shutdown: Arc<AtomicBool>,
}

impl TcpServer {
    /// Constructs the server from a finished config load.
    ///
    /// `construct_finalize`'s validation lives here: `NoListeners` if no
    /// instance was configured, `ConfigInvalid` if more instances were
    /// configured than `max_listeners` permits or if a TLS driver mode was
    /// selected without an acceptor.
    ///
    /// Each instance's bind ruleset is also resolved here, once, rather than
    /// on every accepted connection: an unknown bind-ruleset name is an
    /// activation-time misconfiguration (spec §4.8's "a warning is logged
    /// and that instance uses the default ruleset"), so the warning fires
    /// once per instance here, not once per connection in the accept path.
    pub fn new(
        mut config: ModuleConfig,
        registry: RulesetRegistry,
        tls_acceptor: Option<TlsAcceptor>,
    ) -> Result<Arc<Self>, Error> {
        if config.instances.is_empty() {
            return Err(Error::NoListeners);
        }

        if config.instances.len() > config.max_listeners {
            return Err(Error::ConfigInvalid(format!(
                "{} listener instances configured, exceeding max_listeners={}",
                config.instances.len(),
                config.max_listeners
            )));
        }

        if matches!(config.driver_mode, DriverMode::TlsAnon | DriverMode::TlsX509) && tls_acceptor.is_none()
        {
            return Err(Error::ConfigInvalid(
                "TLS driver mode configured without a TLS acceptor".to_string(),
            ));
        }

        let registry = Arc::new(registry);
        for instance in &mut config.instances {
            let resolved = match instance.bind_ruleset_name.as_deref() {
                Some(name) => registry.get(name).or_else(|| {
                    tracing::warn!(
                        ruleset = name,
                        port = %instance.bind_port,
                        "unknown bind ruleset at activation, falling back to default"
                    );
                    registry.default_ruleset()
                }),
                None => registry.default_ruleset(),
            };
            instance.resolved_ruleset = resolved.as_ref().map(Arc::downgrade);
        }

        Ok(Arc::new(TcpServer {
            config: Arc::new(config),
            registry,
            tls_acceptor: tls_acceptor.map(Arc::new),
            session_count: Arc::new(AtomicUsize::new(0)),
            last_cap_warning: Mutex::new(Instant::now() - CAP_WARNING_INTERVAL),
            shutdown: Arc::new(AtomicBool::new(false)),
        }))
    }

    /// `open_listen_sockets()` + `run()`: spawns one OS thread per
    /// configured instance, each binding its own listener and running its
    /// own reactor, and blocks until every thread exits — normally only
    /// after [`TcpServer::destruct`] is called from another thread.
    pub fn run(self: &Arc<Self>) -> Result<(), Error> {
        let handles: Vec<_> = self
            .config
            .instances
            .iter()
            .cloned()
            .map(|instance| {
                let server = Arc::clone(self);
                thread::spawn(move || server.run_listener(instance))
            })
            .collect();

        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("listener thread panicked");
            }
        }

        Ok(())
    }

    /// Sets the cooperative shutdown flag observed by every listener and
    /// session. Returns immediately; does not wait for teardown to finish.
    pub fn destruct(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Current number of live sessions across every listener thread.
    pub fn session_count(&self) -> usize {
        self.session_count.load(Ordering::Acquire)
    }

    fn run_listener(self: Arc<Self>, instance: InstanceConfig) {
        let rt = Runtime::new();
        if let Err(e) = rt.block_on(self.accept_loop(instance)) {
            tracing::error!(error = %e, "listener exited with error");
        }
    }

    async fn accept_loop(self: Arc<Self>, instance: InstanceConfig) -> Result<(), Error> {
        let addr = format!("0.0.0.0:{}", instance.bind_port);
        let listener = TcpListener::bind(&addr).await?;

        tracing::info!(addr = %addr, "listener bound");

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return Ok(());
            }

            let (stream, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };

            let server = Arc::clone(&self);
            let instance = instance.clone();
            crate::rt::spawn(async move {
                server.handle_connection(stream, peer_addr, instance).await;
            });
        }
    }

    /// Accept-time policy (session cap, peer ACL) followed by the TLS
    /// handshake if configured, then the session's read loop until close.
    async fn handle_connection(self: Arc<Self>, tcp: TcpStream, peer_addr: SocketAddr, instance: InstanceConfig) {
        if !self.reserve_session_slot() {
            self.log_session_cap_rate_limited();
            return;
        }
        let _slot = SessionSlotGuard {
            count: Arc::clone(&self.session_count),
        };

        if !self.config.permitted_peers.is_allowed("TCP", peer_addr.ip(), None, false) {
            tracing::warn!(peer = %peer_addr, "peer denied by ACL at accept");
            return;
        }

        if self.config.keep_alive {
            if let Err(e) = tcp.set_keepalive(true) {
                tracing::warn!(peer = %peer_addr, error = %e, "failed to set keep-alive");
            }
        }

        let stream = match self.config.driver_mode {
            DriverMode::Plaintext => Stream::plain(tcp),
            DriverMode::TlsAnon | DriverMode::TlsX509 => {
                let acceptor = self
                    .tls_acceptor
                    .as_ref()
                    .expect("TLS driver mode requires an acceptor, checked in `TcpServer::new`");

                match Stream::accept_tls(acceptor, tcp).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::warn!(peer = %peer_addr, error = %e, "TLS handshake failed");
                        return;
                    }
                }
            }
        };

        // `peer_tls_name` (the client's SNI hostname) is unverified — no
        // certificate is inspected during the handshake — so it is recorded
        // on the session as metadata only and never fed into ACL matching,
        // which stays IP-based for every driver mode.
        let peer_tls_name = stream.peer_tls_name();

        let Some(ruleset) = self.bound_ruleset(&instance) else {
            tracing::warn!("no ruleset available for accepted session; dropping");
            return;
        };

        let mut session = Session::new(
            stream,
            peer_addr.ip(),
            None,
            peer_tls_name,
            Arc::downgrade(&ruleset),
            instance.input_name.clone(),
            instance.support_octet_framing,
            self.config.disable_lf_delim,
            self.config.addtl_frame_delim,
            self.config.use_flow_control,
            Arc::clone(&self.shutdown),
        );
        session.mark_open();

        self.run_session(&mut session, &ruleset).await;
    }

    /// Returns the instance's ruleset, resolved once at activation (see
    /// [`TcpServer::new`]). Upgrading the weak reference can only fail if
    /// the registry's rulesets were torn down after activation, which this
    /// crate's lifecycle never does mid-run; falls back to the current
    /// default in that case rather than panicking.
    fn bound_ruleset(&self, instance: &InstanceConfig) -> Option<Arc<Ruleset>> {
        instance
            .resolved_ruleset
            .as_ref()
            .and_then(|weak| weak.upgrade())
            .or_else(|| self.registry.default_ruleset())
    }

    /// Drives a session's read loop until close, dispatching every emitted
    /// message record through the batch router as it arrives.
    async fn run_session(&self, session: &mut Session, ruleset: &Arc<Ruleset>) {
        let mut buf = [0u8; READ_BUF_SIZE];

        loop {
            if session.is_shutdown() {
                session.on_close_error();
                break;
            }

            match session.stream_mut().read(&mut buf).await {
                Ok(0) => {
                    let mut records: Vec<MessageRecord> = session.on_close_regular().into_iter().collect();
                    if self.config.emit_msg_on_close {
                        records.push(self.close_message(session, ruleset, "regular"));
                    }
                    self.dispatch(records, ruleset);
                    break;
                }
                Ok(n) => match session.on_data(&buf[..n]) {
                    Ok(records) => self.dispatch(records, ruleset),
                    Err(e) => {
                        tracing::warn!(peer = %session.peer_addr(), error = %e, "frame error, closing session");
                        session.on_close_error();
                        if self.config.emit_msg_on_close {
                            self.dispatch(vec![self.close_message(session, ruleset, "error")], ruleset);
                        }
                        break;
                    }
                },
                Err(e) => {
                    tracing::warn!(peer = %session.peer_addr(), error = %e, "read error, closing session");
                    session.on_close_error();
                    if self.config.emit_msg_on_close {
                        self.dispatch(vec![self.close_message(session, ruleset, "error")], ruleset);
                    }
                    break;
                }
            }
        }
    }

    fn dispatch(&self, records: Vec<MessageRecord>, ruleset: &Arc<Ruleset>) {
        if records.is_empty() {
            return;
        }

        let default = self.registry.default_ruleset().unwrap_or_else(|| Arc::clone(ruleset));
        let mut batch = Batch::new(records, true, Arc::clone(&self.shutdown));
        if let Err(e) = batch::dispatch(&mut batch, Some(Arc::clone(ruleset)), &default) {
            tracing::debug!(error = %e, "batch dispatch stopped early");
        }
    }

    fn close_message(&self, session: &Session, ruleset: &Arc<Ruleset>, reason: &str) -> MessageRecord {
        MessageRecord {
            payload: format!("connection closed ({reason}) peer={}", session.peer_addr()).into_bytes(),
            peer_addr: session.peer_addr(),
            peer_fqdn: None,
            peer_tls_name: None,
            input_name: None,
            ruleset: Arc::downgrade(ruleset),
        }
    }

    fn reserve_session_slot(&self) -> bool {
        loop {
            let current = self.session_count.load(Ordering::Acquire);
            if current >= self.config.max_sessions {
                return false;
            }

            if self
                .session_count
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn log_session_cap_rate_limited(&self) {
        let mut last = self.last_cap_warning.lock().expect("cap warning mutex poisoned");
        if last.elapsed() >= CAP_WARNING_INTERVAL {
            tracing::warn!(
                max_sessions = self.config.max_sessions,
                "session cap reached, rejecting connection"
            );
            *last = Instant::now();
        }
    }
}

/// RAII guard releasing a reserved session slot on every exit path,
/// including the early returns taken on ACL denial and handshake failure.
struct SessionSlotGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for SessionSlotGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::sync::Weak;

    use super::*;
    use crate::action::{Action, Disposition, QueueAction};
    use crate::acl::PeerAcl;
    use crate::config::ModuleConfig;
    use crate::queue::InMemoryQueue;
    use crate::ruleset::Rule;

    fn server_with(registry: RulesetRegistry, config: ModuleConfig) -> Arc<TcpServer> {
        TcpServer::new(config, registry, None).unwrap()
    }

    fn sample_config() -> ModuleConfig {
        ModuleConfig {
            instances: vec![InstanceConfig {
                bind_port: "0".to_string(),
                bind_ruleset_name: None,
                input_name: None,
                support_octet_framing: true,
                resolved_ruleset: None,
            }],
            ..ModuleConfig::default()
        }
    }

    #[test]
    fn new_rejects_empty_instances() {
        let registry = RulesetRegistry::new();
        let err = TcpServer::new(ModuleConfig::default(), registry, None).unwrap_err();
        assert!(matches!(err, Error::NoListeners));
    }

    #[test]
    fn new_rejects_too_many_instances_for_max_listeners() {
        let registry = RulesetRegistry::new();
        let mut config = sample_config();
        config.max_listeners = 0;
        let err = TcpServer::new(config, registry, None).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn new_rejects_tls_mode_without_acceptor() {
        let registry = RulesetRegistry::new();
        let mut config = sample_config();
        config.driver_mode = DriverMode::TlsAnon;
        let err = TcpServer::new(config, registry, None).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn reserve_session_slot_enforces_cap() {
        let mut registry = RulesetRegistry::new();
        registry.construct("main").unwrap();
        registry.finalize();

        let mut config = sample_config();
        config.max_sessions = 1;
        let server = server_with(registry, config);

        assert!(server.reserve_session_slot());
        assert!(!server.reserve_session_slot());
        assert_eq!(server.session_count(), 1);
    }

    #[test]
    fn session_slot_guard_releases_on_drop() {
        let mut registry = RulesetRegistry::new();
        registry.construct("main").unwrap();
        registry.finalize();

        let mut config = sample_config();
        config.max_sessions = 1;
        let server = server_with(registry, config);

        assert!(server.reserve_session_slot());
        {
            let _guard = SessionSlotGuard {
                count: Arc::clone(&server.session_count),
            };
        }
        assert_eq!(server.session_count(), 0);
        assert!(server.reserve_session_slot());
    }

    #[test]
    fn unknown_bind_ruleset_name_falls_back_to_default_at_activation() {
        let mut registry = RulesetRegistry::new();
        registry.construct("main").unwrap();
        registry.finalize();

        let mut config = sample_config();
        config.instances[0].bind_ruleset_name = Some("does-not-exist".to_string());
        let server = server_with(registry, config);

        let resolved = server.bound_ruleset(&server.config.instances[0]).unwrap();
        assert_eq!(resolved.name(), "main");
    }

    #[test]
    fn dispatch_runs_records_through_bound_ruleset() {
        let mut registry = RulesetRegistry::new();
        let rs = registry.construct("main").unwrap();
        let queue = Arc::new(InMemoryQueue::new(4));
        registry.add_rule(&rs, Rule::new(vec![Box::new(QueueAction::new(queue.clone()))]));
        registry.finalize();

        let server = server_with(registry, sample_config());

        let record = MessageRecord {
            payload: b"hi".to_vec(),
            peer_addr: "127.0.0.1".parse::<IpAddr>().unwrap(),
            peer_fqdn: None,
            peer_tls_name: None,
            input_name: None,
            ruleset: Arc::downgrade(&rs),
        };

        server.dispatch(vec![record], &rs);
        assert_eq!(queue.dequeue().unwrap(), b"hi");
    }

    #[test]
    fn peer_acl_denies_before_any_session_is_created() {
        let mut registry = RulesetRegistry::new();
        registry.construct("main").unwrap();
        registry.finalize();

        let mut config = sample_config();
        let mut acl = PeerAcl::new();
        acl.push(crate::acl::PermittedPeer::parse("!10.0.0.1"));
        config.permitted_peers = acl;

        let denied = !config
            .permitted_peers
            .is_allowed("TCP", "10.0.0.1".parse().unwrap(), None, false);
        assert!(denied);

        let _server = server_with(registry, config);
        assert_eq!(_server.session_count(), 0);
    }

    #[test]
    fn disposition_continue_does_not_discard_queue_action_output() {
        let queue = Arc::new(InMemoryQueue::new(1));
        let action = QueueAction::new(queue.clone());
        let record = MessageRecord {
            payload: b"x".to_vec(),
            peer_addr: "127.0.0.1".parse::<IpAddr>().unwrap(),
            peer_fqdn: None,
            peer_tls_name: None,
            input_name: None,
            ruleset: Weak::new(),
        };
        assert_eq!(action.invoke(&record).unwrap(), Disposition::Continue);
        assert_eq!(queue.dequeue().unwrap(), b"x");
    }
}
