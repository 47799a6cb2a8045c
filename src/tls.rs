//! TLS adapter wrapping `rustls` as the external TLS driver collaborator.
//!
//! `rustls`'s connection types are sans-IO: they turn ciphertext bytes into
//! plaintext (and back) but never touch a socket themselves. This module is
//! the glue that drives that state machine over our own [`AsyncRead`] /
//! [`AsyncWrite`] streams, the same role `tokio-rustls`'s `TlsStream` plays
//! over Tokio's I/O traits.

use std::io::{self, Read, Write};
use std::sync::Arc;

use crate::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Accepts TLS connections using a shared server configuration.
#[derive(Debug, Clone)]
pub struct TlsAcceptor {
    config: Arc<rustls::ServerConfig>,
}

impl TlsAcceptor {
    /// Creates an acceptor from a caller-supplied `rustls::ServerConfig`.
    ///
    /// Building that config (loading certificates and a private key from
    /// disk, choosing a client-auth verifier) is configuration-loader
    /// territory and stays out of scope here; the caller hands us an
    /// already-built config.
    pub fn new(config: Arc<rustls::ServerConfig>) -> Self {
        TlsAcceptor { config }
    }

    /// Performs the TLS handshake over `io`, returning an established
    /// [`TlsStream`] once complete.
    ///
    /// Blocks (asynchronously) until handshake completes; if the handshake
    /// fails, the underlying stream should be discarded by the caller — no
    /// session is created for it, per the stream driver adapter's
    /// contract.
    pub async fn accept<IO>(&self, io: IO) -> io::Result<TlsStream<IO>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let conn = rustls::ServerConnection::new(Arc::clone(&self.config))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut stream = TlsStream { io, conn };
        stream.handshake().await?;
        Ok(stream)
    }
}

/// An established TLS connection layered over any `AsyncRead + AsyncWrite`
/// stream.
#[derive(Debug)]
pub struct TlsStream<IO> {
    pub(crate) io: IO,
    conn: rustls::ServerConnection,
}

impl<IO> TlsStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    /// Drives the handshake to completion by alternating writes of pending
    /// ciphertext with reads of new ciphertext from the peer.
    async fn handshake(&mut self) -> io::Result<()> {
        while self.conn.is_handshaking() {
            self.advance().await?;
        }

        Ok(())
    }

    /// Advances the connection state machine by one step: flushes any
    /// ciphertext `rustls` wants written, then, if it still wants more
    /// input, reads and feeds it one more chunk of ciphertext.
    async fn advance(&mut self) -> io::Result<()> {
        while self.conn.wants_write() {
            let mut ciphertext = Vec::new();
            self.conn.write_tls(&mut ciphertext)?;
            self.io.write_all(&ciphertext).await?;
        }

        if self.conn.wants_read() {
            let mut buf = [0u8; 4096];
            let n = self.io.read(&mut buf).await?;

            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed connection during TLS handshake",
                ));
            }

            let mut cursor = &buf[..n];
            self.conn.read_tls(&mut cursor)?;
            self.conn
                .process_new_packets()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        }

        Ok(())
    }

    /// Returns the SNI hostname the client sent in its `ClientHello`, if
    /// any.
    ///
    /// This is **not** a verified peer identity: it comes straight from the
    /// unauthenticated handshake extension, no certificate is inspected (no
    /// client-auth verifier is configured on [`TlsAcceptor`]), and a client
    /// can send any hostname it likes here. Do not feed this into ACL
    /// matching as if it were the peer's verified name.
    pub fn sni_hostname(&self) -> Option<String> {
        self.conn.server_name().map(str::to_string)
    }

    /// Reads decrypted application bytes into `buf`, returning the number
    /// of bytes read (`0` signals orderly close, matching the stream
    /// driver adapter's `recv` contract).
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.advance().await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Encrypts and writes `buf` in full.
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.conn.writer().write_all(buf)?;

        while self.conn.wants_write() {
            let mut ciphertext = Vec::new();
            self.conn.write_tls(&mut ciphertext)?;
            self.io.write_all(&ciphertext).await?;
        }

        Ok(())
    }
}
