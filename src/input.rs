//! Input module facade (L8): the legacy directive surface's own activation
//! logic — accumulates instance configs via [`ConfigLoader`], then on
//! activation constructs the shared [`TcpServer`], binds each instance to
//! its ruleset, and starts it running.

use std::sync::Arc;

use crate::config::ConfigLoader;
use crate::error::Error;
use crate::server::TcpServer;
use crate::tls::TlsAcceptor;

/// Accumulates directives into a [`ConfigLoader`] and, on
/// [`InputModule::activate`], turns the result into a running [`TcpServer`].
///
/// This corresponds to the source's `activate_pre_priv_drop`: construct the
/// shared server (if any instance exists), apply module-level parameters,
/// bind each instance to its ruleset, then open every listening socket
/// before privilege drop. Privilege drop itself is out of scope; see the
/// crate's non-goals.
#[derive(Debug, Default)]
pub struct InputModule {
    loader: ConfigLoader,
}

impl InputModule {
    /// Starts a fresh, empty module.
    pub fn new() -> Self {
        InputModule {
            loader: ConfigLoader::new(),
        }
    }

    /// Selects the ruleset subsequent `rulesetparser`/`rulesetcreatemainqueue`
    /// directives apply to, constructing it if necessary.
    pub fn begin_ruleset(&mut self, name: &str) -> Result<(), Error> {
        self.loader.begin_ruleset(name)
    }

    /// Clears the current ruleset selection.
    pub fn end_ruleset(&mut self) {
        self.loader.end_ruleset()
    }

    /// Parses and applies a single legacy directive line.
    pub fn parse_directive(&mut self, line: &str) -> Result<(), Error> {
        self.loader.parse_directive(line)
    }

    /// Finishes config load and activates the module: builds the shared TCP
    /// server from the accumulated instances and ruleset registry. Fails
    /// with [`Error::NoListeners`] if no instance was ever configured.
    ///
    /// `tls_acceptor` is the already-built TLS driver collaborator, required
    /// only if `inputtcpserverstreamdrivermode` selected a TLS mode —
    /// building the underlying `rustls::ServerConfig` from on-disk
    /// certificates is itself configuration-loader territory and stays out
    /// of scope here, per spec.
    pub fn activate(self, tls_acceptor: Option<TlsAcceptor>) -> Result<Arc<TcpServer>, Error> {
        let (config, registry) = self.loader.finish();
        TcpServer::new(config, registry, tls_acceptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_with_no_instances_fails_no_listeners() {
        let module = InputModule::new();
        let err = module.activate(None).unwrap_err();
        assert!(matches!(err, Error::NoListeners));
    }

    #[test]
    fn activate_builds_server_from_one_instance_and_default_ruleset() {
        let mut module = InputModule::new();
        module.begin_ruleset("main").unwrap();
        module.parse_directive("rulesetparser json").unwrap();
        module.end_ruleset();
        module.parse_directive("inputtcpserverrun 0").unwrap();

        let server = module.activate(None).unwrap();
        assert_eq!(server.session_count(), 0);
    }

    #[test]
    fn activate_rejects_too_many_instances_for_configured_max_listeners() {
        let mut module = InputModule::new();
        module.parse_directive("inputtcpmaxlisteners 1").unwrap();
        module.parse_directive("inputtcpserverrun 0").unwrap();
        module.parse_directive("inputtcpserverrun 0").unwrap();

        let err = module.activate(None).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }
}
