//! `weir` — a TCP log ingestion core: framed message reassembly, peer ACLs,
//! optional TLS, and a named-ruleset router that dispatches batches of
//! messages to chains of output actions.
//!
//! Runs its own cooperative, single-threaded, `epoll(7)`-backed executor
//! (`rt`) rather than pulling in an external async runtime — one reactor per
//! listener thread, as described in [`rt`]'s module docs and [`server`].

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]
#![deny(unused_must_use)]

#[cfg(not(target_os = "linux"))]
compile_error!("This crate is only compatible with Linux systems that support epoll(7).");

pub mod error;

pub mod acl;
pub mod action;
pub mod batch;
pub mod config;
pub mod frame;
pub mod input;
pub mod message;
pub mod queue;
pub mod ruleset;
pub mod server;
pub mod session;
pub mod stream;
pub mod tls;

pub(crate) mod net;
pub(crate) mod rt;
pub(crate) mod time;
pub(crate) mod util;

pub(crate) mod io;
