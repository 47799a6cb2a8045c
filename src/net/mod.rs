//! Networking bindings for `weir`.

mod tcp;
pub use tcp::{TcpListener, TcpStream};
