//! Stream driver adapter (L2): abstracts plaintext vs. TLS I/O behind one
//! read/write surface. Peer identity for ACL purposes is the TCP peer
//! address only — this adapter does no certificate-based authentication,
//! so it has no verified peer name to expose.

use std::io;
use std::net::SocketAddr;

use crate::io::{AsyncReadExt, AsyncWriteExt};
use crate::net::tcp::TcpStream;
use crate::tls::{TlsAcceptor, TlsStream};

/// A single accepted connection, either plaintext or TLS.
///
/// `recv` (here, `read`) returns `0` to signal an orderly remote close, the
/// same as the underlying `TcpStream`; partial reads are legal and common,
/// left to the frame reassembler to stitch back together.
#[derive(Debug)]
pub enum Stream {
    /// An unencrypted TCP connection.
    Plain(TcpStream),
    /// A TLS connection negotiated by [`TlsAcceptor`].
    Tls(TlsStream<TcpStream>),
}

impl Stream {
    /// Accepts a plaintext connection with no further negotiation.
    pub fn plain(stream: TcpStream) -> Self {
        Stream::Plain(stream)
    }

    /// Completes a TLS handshake over `stream` using `acceptor`. If the
    /// handshake fails, the stream is dropped and no `Stream` is produced —
    /// callers must not create a session from an `Err` here.
    pub async fn accept_tls(acceptor: &TlsAcceptor, stream: TcpStream) -> io::Result<Self> {
        let tls = acceptor.accept(stream).await?;
        Ok(Stream::Tls(tls))
    }

    /// The client's SNI hostname, if this is a TLS stream and the peer sent
    /// one. **Unverified** — no certificate is inspected during the
    /// handshake, so this is not a peer identity and must not be used for
    /// ACL matching. Recorded on the session purely as connection metadata.
    pub fn peer_tls_name(&self) -> Option<String> {
        match self {
            Stream::Plain(_) => None,
            Stream::Tls(tls) => tls.sni_hostname(),
        }
    }

    /// The remote peer's socket address.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Stream::Plain(s) => s.peer_addr(),
            Stream::Tls(tls) => tls.io.peer_addr(),
        }
    }

    /// Reads available bytes into `buf`. Returns `0` on orderly remote
    /// close.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf).await,
            Stream::Tls(tls) => tls.read(buf).await,
        }
    }

    /// Writes `buf` in full.
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Stream::Plain(s) => s.write_all(buf).await,
            Stream::Tls(tls) => tls.write_all(buf).await,
        }
    }
}
