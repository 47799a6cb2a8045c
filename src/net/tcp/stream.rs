use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use crate::io::AsyncRead;
use crate::io::AsyncWrite;
use crate::rt::Runtime;

/// A TCP stream between a local and a remote socket.
///
/// Reading and writing to a TcpStream is usually done using the methods found
/// on the `AsyncRead` and `AsyncWrite` traits.
#[derive(Debug)]
pub struct TcpStream(std::net::TcpStream);

impl TcpStream {
    /// Returns the socket address of the local half of this TCP connection.
    #[inline]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()
    }

    /// Returns the socket address of the remote peer of this TCP connection.
    #[inline]
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.0.peer_addr()
    }

    /// Gets the value of the `IP_TTL` option for this socket.
    pub fn ttl(&self) -> io::Result<u32> {
        self.0.ttl()
    }

    /// Sets the value for the `IP_TTL` option on this socket.
    ///
    /// This value sets the time-to-live field that is used in every packet sent
    /// from this socket.
    pub fn set_ttl(&self, ttl: u32) -> io::Result<()> {
        self.0.set_ttl(ttl)
    }

    /// Enables or disables `SO_KEEPALIVE` on this socket.
    pub fn set_keepalive(&self, enable: bool) -> io::Result<()> {
        let value: libc::c_int = enable as libc::c_int;

        let ret = unsafe {
            libc::setsockopt(
                self.0.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_KEEPALIVE,
                &value as *const libc::c_int as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };

        if ret == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }
}

impl TryFrom<std::net::TcpStream> for TcpStream {
    type Error = io::Error;

    fn try_from(stream: std::net::TcpStream) -> Result<Self, Self::Error> {
        // Required to make sure `stream` can be polled without blocking when
        // awaited.
        stream.set_nonblocking(true)?;
        Ok(TcpStream(stream))
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        // SAFETY: The current runtime is guaranteed to be set via thread-local
        // storage when entering `Runtime::block_on`, which is the only entry
        // point for asynchronous execution, therefore, any async code,
        // including this `Drop`, must be running within a valid runtime context
        // to be called.
        Runtime::current()
            .scheduler
            .unregister_fd(self.0.as_raw_fd());

        // Inner `std::net::TcpStream` is dropped...
    }
}

impl AsyncRead for TcpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        ctx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        match self.0.read(buf) {
            Ok(rbytes) => Poll::Ready(Ok(rbytes)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                // Register for read readiness notifications.
                let events = libc::EPOLLIN;

                Runtime::current().scheduler.register_fd(
                    self.0.as_raw_fd(),
                    events as u32,
                    ctx.waker().clone(),
                );

                Poll::Pending
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl AsyncWrite for TcpStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        ctx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.0.write(buf) {
            Ok(wbytes) => Poll::Ready(Ok(wbytes)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                // Register for write readiness notifications.
                let events = libc::EPOLLOUT;

                Runtime::current().scheduler.register_fd(
                    self.0.as_raw_fd(),
                    events as u32,
                    ctx.waker().clone(),
                );

                Poll::Pending
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.0.shutdown(std::net::Shutdown::Write) {
            Ok(()) => Poll::Ready(Ok(())),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                // Register for write readiness notifications, so shutdown can
                // be retried.
                let events = libc::EPOLLOUT;

                Runtime::current().scheduler.register_fd(
                    self.0.as_raw_fd(),
                    events as u32,
                    ctx.waker().clone(),
                );

                Poll::Pending
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}
