//! The legacy directive table (L8's own external interface, per spec
//! §6 — distinct from the generic, out-of-scope configuration parser) and
//! the configuration data model it builds up.

use std::sync::Weak;

use crate::acl::{PeerAcl, PermittedPeer};
use crate::error::Error;
use crate::ruleset::{Ruleset, RulesetRegistry};

/// `driver_mode` as accepted by the stream driver adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverMode {
    /// No encryption.
    #[default]
    Plaintext = 0,
    /// TLS without verifying the peer's certificate chain.
    TlsAnon = 1,
    /// TLS with full X.509 peer verification.
    TlsX509 = 2,
}

impl TryFrom<i64> for DriverMode {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DriverMode::Plaintext),
            1 => Ok(DriverMode::TlsAnon),
            2 => Ok(DriverMode::TlsX509),
            other => Err(Error::ConfigInvalid(format!(
                "unknown stream driver mode `{other}`"
            ))),
        }
    }
}

/// `auth_mode` as accepted by the stream driver adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// No peer identity verification.
    Anon,
    /// Verify the peer's presented name against `permitted_peers`.
    Name,
    /// Verify the peer's certificate fingerprint.
    Fingerprint,
}

impl AuthMode {
    fn parse(word: &str) -> Result<Self, Error> {
        match word.to_ascii_lowercase().as_str() {
            "anon" => Ok(AuthMode::Anon),
            "name" => Ok(AuthMode::Name),
            "fingerprint" => Ok(AuthMode::Fingerprint),
            other => Err(Error::ConfigInvalid(format!(
                "unknown stream driver auth mode `{other}`"
            ))),
        }
    }
}

/// A single pending listener instance, consumed once at activation.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Port to bind, as a string (legacy directives pass ports textually).
    pub bind_port: String,
    /// Ruleset name this listener's sessions should bind to; `None` means
    /// "use the registry's default ruleset".
    pub bind_ruleset_name: Option<String>,
    /// Caller-supplied label attached to every message from this listener.
    pub input_name: Option<String>,
    /// Whether sessions on this listener may use octet-counted framing.
    pub support_octet_framing: bool,
    /// The instance's bound ruleset, resolved once at activation; `None`
    /// until then.
    pub resolved_ruleset: Option<Weak<Ruleset>>,
}

/// The aggregate of all instance configs plus global session/listener caps
/// and stream-driver parameters.
#[derive(Debug, Clone)]
pub struct ModuleConfig {
    /// Maximum concurrent sessions across all listeners.
    pub max_sessions: usize,
    /// Maximum number of listener sockets.
    pub max_listeners: usize,
    /// Stream driver mode (plaintext / TLS-anon / TLS-x509).
    pub driver_mode: DriverMode,
    /// Extra delimiter byte for delimited framing, if any.
    pub addtl_frame_delim: Option<u8>,
    /// Whether LF is disabled as a delimiter.
    pub disable_lf_delim: bool,
    /// Whether messages should be marked light-delayable for flow control.
    pub use_flow_control: bool,
    /// Whether `SO_KEEPALIVE` is requested on accepted streams.
    pub keep_alive: bool,
    /// Whether a synthetic message is emitted at session close.
    pub emit_msg_on_close: bool,
    /// Stream driver authentication mode.
    pub auth_mode: Option<AuthMode>,
    /// Ordered allow-list consulted by the peer ACL.
    pub permitted_peers: PeerAcl,
    /// All pending listener instances accumulated during load.
    pub instances: Vec<InstanceConfig>,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        ModuleConfig {
            max_sessions: 200,
            max_listeners: 20,
            driver_mode: DriverMode::default(),
            addtl_frame_delim: None,
            disable_lf_delim: false,
            use_flow_control: false,
            keep_alive: false,
            emit_msg_on_close: false,
            auth_mode: None,
            permitted_peers: PeerAcl::new(),
            instances: Vec::new(),
        }
    }
}

fn parse_bool(arg: &str) -> Result<bool, Error> {
    match arg.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        other => Err(Error::ConfigInvalid(format!(
            "expected a boolean, got `{other}`"
        ))),
    }
}

fn parse_int(arg: &str) -> Result<i64, Error> {
    arg.parse::<i64>()
        .map_err(|_| Error::ConfigInvalid(format!("expected an integer, got `{arg}`")))
}

/// Accumulates directive-driven configuration state during a single config
/// load/reload pass.
///
/// There is no global or thread-local "current ruleset" here — unlike the
/// legacy source's `ourConf`-style global, the active ruleset is carried
/// explicitly as a field on this struct and threaded through every
/// directive handler.
#[derive(Debug)]
pub struct ConfigLoader {
    config: ModuleConfig,
    registry: RulesetRegistry,
    current_ruleset: Option<String>,
    pending_input_name: Option<String>,
    pending_bind_ruleset: Option<String>,
    default_support_octet_framing: bool,
}

impl ConfigLoader {
    /// Starts a new, empty config load.
    pub fn new() -> Self {
        ConfigLoader {
            config: ModuleConfig::default(),
            registry: RulesetRegistry::new(),
            current_ruleset: None,
            pending_input_name: None,
            pending_bind_ruleset: None,
            default_support_octet_framing: false,
        }
    }

    /// The name of the ruleset directives like `rulesetparser` currently
    /// apply to, if one has been selected.
    pub fn current_ruleset(&self) -> Option<&str> {
        self.current_ruleset.as_deref()
    }

    /// Selects the ruleset that subsequent `rulesetparser` /
    /// `rulesetcreatemainqueue` directives apply to, constructing it if it
    /// does not already exist.
    ///
    /// This corresponds to the source's `ruleset(name="...") { ... }`
    /// block, which sits outside the line-oriented legacy directive table
    /// in §6 but is still this module's own surface, not the generic
    /// config parser's. Opening such a block is itself how a new ruleset
    /// comes to exist — there is no separate "declare a ruleset" directive
    /// — so `begin_ruleset` first tries `RulesetRegistry::set_current`
    /// (the no-op-on-unknown registry operation spec §4.6 lists alongside
    /// `set_default`) and only constructs when that lookup comes back
    /// empty, rather than constructing unconditionally.
    pub fn begin_ruleset(&mut self, name: &str) -> Result<(), Error> {
        if self.registry.set_current(name).is_none() {
            self.registry.construct(name)?;
        }
        self.current_ruleset = Some(name.to_string());
        Ok(())
    }

    /// Clears the current ruleset selection.
    pub fn end_ruleset(&mut self) {
        self.current_ruleset = None;
    }

    /// Parses and applies a single legacy directive line. Unknown
    /// directives and malformed values fail config load with
    /// [`Error::ConfigInvalid`].
    pub fn parse_directive(&mut self, line: &str) -> Result<(), Error> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(());
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let directive = parts.next().unwrap_or("").to_ascii_lowercase();
        let arg = parts.next().unwrap_or("").trim();

        match directive.as_str() {
            "inputtcpserverrun" => {
                self.config.instances.push(InstanceConfig {
                    bind_port: arg.to_string(),
                    bind_ruleset_name: self.pending_bind_ruleset.clone(),
                    input_name: self.pending_input_name.clone(),
                    support_octet_framing: self.default_support_octet_framing,
                    resolved_ruleset: None,
                });
            }
            "inputtcpserverkeepalive" => self.config.keep_alive = parse_bool(arg)?,
            "inputtcpserversupportoctetcountedframing" => {
                self.default_support_octet_framing = parse_bool(arg)?;
            }
            "inputtcpmaxsessions" => {
                self.config.max_sessions = parse_int(arg)?.max(0) as usize;
            }
            "inputtcpmaxlisteners" => {
                self.config.max_listeners = parse_int(arg)?.max(0) as usize;
            }
            "inputtcpservernotifyonconnectionclose" => {
                self.config.emit_msg_on_close = parse_bool(arg)?;
            }
            "inputtcpserverstreamdrivermode" => {
                self.config.driver_mode = DriverMode::try_from(parse_int(arg)?)?;
            }
            "inputtcpserverstreamdriverauthmode" => {
                self.config.auth_mode = Some(AuthMode::parse(arg)?);
            }
            "inputtcpserverstreamdriverpermittedpeer" => {
                self.config.permitted_peers.push(PermittedPeer::parse(arg));
            }
            "inputtcpserveraddtlframedelimiter" => {
                let value = parse_int(arg)?;
                self.config.addtl_frame_delim = if value < 0 { None } else { Some(value as u8) };
            }
            "inputtcpserverdisablelfdelimiter" => {
                self.config.disable_lf_delim = parse_bool(arg)?;
            }
            "inputtcpserverinputname" => {
                self.pending_input_name = Some(arg.to_string());
            }
            "inputtcpserverbindruleset" => {
                self.pending_bind_ruleset = Some(arg.to_string());
            }
            "inputtcpflowcontrol" => {
                self.config.use_flow_control = parse_bool(arg)?;
            }
            "rulesetparser" => {
                let current = self.current_ruleset.clone().ok_or(Error::NoCurrRuleset)?;
                let Some(ruleset) = self.registry.get(&current) else {
                    return Err(Error::NoCurrRuleset);
                };
                self.registry.add_parser(&ruleset, arg)?;
            }
            "rulesetcreatemainqueue" => {
                if parse_bool(arg)? {
                    self.registry.attach_queue(self.current_ruleset.as_deref())?;
                }
            }
            "resetconfigvariables" => {
                self.pending_input_name = None;
                self.pending_bind_ruleset = None;
                self.default_support_octet_framing = false;
            }
            other => {
                return Err(Error::ConfigInvalid(format!("unknown directive `{other}`")));
            }
        }

        Ok(())
    }

    /// Finishes the load, fixing the registry's default ruleset and
    /// handing back the accumulated module config and ruleset registry.
    pub fn finish(mut self) -> (ModuleConfig, RulesetRegistry) {
        self.registry.finalize();
        (self.config, self.registry)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_directive_is_config_invalid() {
        let mut loader = ConfigLoader::new();
        let err = loader.parse_directive("notadirective foo").unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn listener_instance_inherits_pending_input_name_and_ruleset() {
        let mut loader = ConfigLoader::new();
        loader.parse_directive("inputtcpserverinputname imtcp").unwrap();
        loader.parse_directive("inputtcpserverbindruleset main").unwrap();
        loader.parse_directive("inputtcpserverrun 514").unwrap();
        loader.parse_directive("inputtcpserverrun 515").unwrap();

        let (config, _registry) = loader.finish();

        assert_eq!(config.instances.len(), 2);
        assert_eq!(config.instances[0].bind_port, "514");
        assert_eq!(config.instances[0].input_name.as_deref(), Some("imtcp"));
        assert_eq!(
            config.instances[1].bind_ruleset_name.as_deref(),
            Some("main")
        );
    }

    #[test]
    fn reset_config_variables_clears_scratch_state() {
        let mut loader = ConfigLoader::new();
        loader.parse_directive("inputtcpserverinputname imtcp").unwrap();
        loader.parse_directive("resetconfigvariables").unwrap();
        loader.parse_directive("inputtcpserverrun 514").unwrap();

        let (config, _registry) = loader.finish();
        assert!(config.instances[0].input_name.is_none());
    }

    #[test]
    fn rulesetparser_without_current_ruleset_is_rejected() {
        let mut loader = ConfigLoader::new();
        let err = loader.parse_directive("rulesetparser json").unwrap_err();
        assert!(matches!(err, Error::NoCurrRuleset));
    }

    #[test]
    fn rulesetparser_appends_to_current_ruleset() {
        let mut loader = ConfigLoader::new();
        loader.begin_ruleset("main").unwrap();
        loader.parse_directive("rulesetparser json").unwrap();
        loader.end_ruleset();

        let (_config, registry) = loader.finish();
        assert!(registry.get("main").is_some());
    }

    #[test]
    fn rulesetparser_rejects_unregistered_parser_name() {
        let mut loader = ConfigLoader::new();
        loader.begin_ruleset("main").unwrap();
        let err = loader.parse_directive("rulesetparser made-up-format").unwrap_err();
        assert!(matches!(err, Error::ParserNotFound(name) if name == "made-up-format"));
    }

    #[test]
    fn max_sessions_directive_overrides_default() {
        let mut loader = ConfigLoader::new();
        loader.parse_directive("inputtcpmaxsessions 50").unwrap();
        let (config, _registry) = loader.finish();
        assert_eq!(config.max_sessions, 50);
    }

    #[test]
    fn permitted_peer_directive_is_appended() {
        let mut loader = ConfigLoader::new();
        loader
            .parse_directive("inputtcpserverstreamdriverpermittedpeer *.example.com")
            .unwrap();
        let (config, _registry) = loader.finish();
        assert!(config.permitted_peers.is_allowed(
            "TCP",
            "192.0.2.1".parse().unwrap(),
            Some("host.example.com"),
            false,
        ));
    }
}
