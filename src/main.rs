//! Demo binary: reads legacy directive lines from a config file (or stdin)
//! and runs the resulting TCP server until the process is killed.
//!
//! Process lifecycle, privilege drop, and signal handling are explicitly out
//! of scope for the core (see `weir::server`'s docs); this binary relies on
//! the OS's default `SIGINT`/`SIGTERM` disposition to stop it.

use std::env;
use std::fs;
use std::io::{self, Read};
use std::process::ExitCode;

use weir::input::InputModule;

fn main() -> ExitCode {
    #[cfg(feature = "demo-logging")]
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let source = match read_config_source() {
        Ok(source) => source,
        Err(e) => {
            eprintln!("weir-demo: failed to read config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let module = match load_module(&source) {
        Ok(module) => module,
        Err(e) => {
            eprintln!("weir-demo: {e}");
            return ExitCode::FAILURE;
        }
    };

    let server = match module.activate(None) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("weir-demo: activation failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("weir listening");

    if let Err(e) = server.run() {
        eprintln!("weir-demo: server error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Parses `source` into a ready-to-activate [`InputModule`].
///
/// Two pseudo-directives, `ruleset <name>` / `endruleset`, bracket the lines
/// that belong to a given ruleset — the demo binary's own convention layered
/// on top of the legacy directive table (which has no line-oriented syntax
/// for opening/closing a ruleset block; see `weir::config::ConfigLoader`).
fn load_module(source: &str) -> Result<InputModule, weir::error::Error> {
    let mut module = InputModule::new();

    for raw_line in source.lines() {
        let line = raw_line.trim();

        if let Some(name) = line.strip_prefix("ruleset ") {
            module.begin_ruleset(name.trim())?;
            continue;
        }
        if line == "endruleset" {
            module.end_ruleset();
            continue;
        }

        module.parse_directive(line)?;
    }

    Ok(module)
}

fn read_config_source() -> io::Result<String> {
    match env::args().nth(1) {
        Some(path) => fs::read_to_string(path),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}
