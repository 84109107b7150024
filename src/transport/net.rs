use std::{
    io::{self, IoSlice, Read, Write},
    mem,
    net::{Shutdown, TcpStream, ToSocketAddrs},
    os::{
        fd::{AsRawFd, RawFd},
        unix::net::UnixStream,
    },
    time::Duration,
};

use log::trace;
use rustls::{ClientConnection, StreamOwned};

use crate::config::TlsContext;

use super::{
    AddressFamily, ConnectionIdentity, Endpoint, TlsStage, TransportError,
    stream::{Connector, SocketOption, StreamPrimitive},
    tls,
};

/// Default stream: a std socket, optionally wrapped in a rustls session.
pub enum NetStream {
    Tcp(TcpStream),
    Unix(UnixStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
    Closed,
}

fn not_connected() -> io::Error {
    io::Error::from(io::ErrorKind::NotConnected)
}

fn ignore_not_connected(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

fn setsockopt(fd: RawFd, level: i32, name: i32, value: i32) -> io::Result<()> {
    // SAFETY: `value` outlives the call and the length matches its type.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            (&value as *const i32).cast(),
            mem::size_of::<i32>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// A stream is dead once the peer hung up, errored, or a readable socket has nothing left
/// to peek at (orderly shutdown).
fn socket_alive(fd: RawFd) -> bool {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: single valid pollfd, zero timeout.
    let rc = unsafe { libc::poll(&mut pfd, 1, 0) };
    if rc < 0 {
        return false;
    }
    if rc == 0 {
        return true;
    }
    if pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
        return false;
    }

    let mut byte = 0u8;
    // SAFETY: one-byte buffer owned by this frame.
    let n = unsafe {
        libc::recv(
            fd,
            (&mut byte as *mut u8).cast(),
            1,
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        )
    };
    match n {
        0 => false,
        n if n > 0 => true,
        _ => io::Error::last_os_error().kind() == io::ErrorKind::WouldBlock,
    }
}

impl StreamPrimitive for NetStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            NetStream::Tcp(s) => s.read(buf),
            NetStream::Unix(s) => s.read(buf),
            NetStream::Tls(s) => s.read(buf),
            NetStream::Closed => Err(not_connected()),
        }
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        match self {
            NetStream::Tcp(s) => s.write_vectored(bufs),
            NetStream::Unix(s) => s.write_vectored(bufs),
            NetStream::Tls(s) => {
                let n = s.write_vectored(bufs)?;
                s.flush()?;
                Ok(n)
            }
            NetStream::Closed => Err(not_connected()),
        }
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            NetStream::Tcp(s) => s.set_read_timeout(timeout),
            NetStream::Unix(s) => s.set_read_timeout(timeout),
            NetStream::Tls(s) => s.sock.set_read_timeout(timeout),
            NetStream::Closed => Err(not_connected()),
        }
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            NetStream::Tcp(s) => s.set_write_timeout(timeout),
            NetStream::Unix(s) => s.set_write_timeout(timeout),
            NetStream::Tls(s) => s.sock.set_write_timeout(timeout),
            NetStream::Closed => Err(not_connected()),
        }
    }

    fn set_option(&mut self, option: SocketOption) -> io::Result<()> {
        match (option, &*self) {
            (SocketOption::NoDelay(on), NetStream::Tcp(s)) => s.set_nodelay(on),
            (SocketOption::NoDelay(on), NetStream::Tls(s)) => s.sock.set_nodelay(on),
            (SocketOption::NoDelay(_), NetStream::Unix(_)) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "TCP_NODELAY on a UNIX domain socket",
            )),
            (SocketOption::KeepAlive(on), _) => {
                let fd = self.raw_fd().ok_or_else(not_connected)?;
                setsockopt(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, i32::from(on))
            }
            (SocketOption::Raw { level, name, value }, _) => {
                let fd = self.raw_fd().ok_or_else(not_connected)?;
                setsockopt(fd, level, name, value)
            }
            (_, NetStream::Closed) => Err(not_connected()),
        }
    }

    fn check_liveness(&mut self) -> bool {
        self.raw_fd().is_some_and(socket_alive)
    }

    fn raw_fd(&self) -> Option<RawFd> {
        match self {
            NetStream::Tcp(s) => Some(s.as_raw_fd()),
            NetStream::Unix(s) => Some(s.as_raw_fd()),
            NetStream::Tls(s) => Some(s.sock.as_raw_fd()),
            NetStream::Closed => None,
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match mem::replace(self, NetStream::Closed) {
            NetStream::Tcp(s) => ignore_not_connected(s.shutdown(Shutdown::Both)),
            NetStream::Unix(s) => ignore_not_connected(s.shutdown(Shutdown::Both)),
            NetStream::Tls(mut s) => {
                s.conn.send_close_notify();
                // the peer may already be gone; the socket is shut down regardless
                let _ = s.flush();
                ignore_not_connected(s.sock.shutdown(Shutdown::Both))
            }
            NetStream::Closed => Ok(()),
        }
    }
}

/// Opens std sockets and upgrades them with rustls.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemConnector;

impl Connector for SystemConnector {
    type Stream = NetStream;

    fn connect(
        &self,
        endpoint: &Endpoint,
        identity: &ConnectionIdentity,
        timeout: Duration,
    ) -> Result<NetStream, TransportError> {
        trace!("opening '{}' for {identity}", endpoint.dsn());

        let connect_failed = |source| TransportError::Connect {
            dsn: endpoint.dsn(),
            source,
        };

        if endpoint.family == AddressFamily::Unix {
            return UnixStream::connect(&endpoint.host)
                .map(NetStream::Unix)
                .map_err(connect_failed);
        }

        let addrs = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|source| TransportError::NameResolution {
                host: endpoint.host.clone(),
                source,
            })?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(NetStream::Tcp(stream)),
                Err(e) => last_error = Some(e),
            }
        }

        Err(match last_error {
            Some(e) => connect_failed(e),
            None => TransportError::NameResolution {
                host: endpoint.host.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
            },
        })
    }

    fn upgrade_tls(
        &self,
        stream: &mut NetStream,
        endpoint: &Endpoint,
        context: &TlsContext,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let config = tls::client_config(context)?;
        let server_name = tls::server_name(endpoint, context)?;

        let NetStream::Tcp(tcp) = stream else {
            return Err(TransportError::Tls {
                stage: TlsStage::Setup,
                reason: format!("cannot upgrade '{}', not a TCP stream", endpoint.dsn()),
            });
        };

        tcp.set_read_timeout(Some(timeout))?;
        tcp.set_write_timeout(Some(timeout))?;
        let conn = tls::handshake(config, server_name, tcp)?;

        if let NetStream::Tcp(tcp) = mem::replace(stream, NetStream::Closed) {
            *stream = NetStream::Tls(Box::new(StreamOwned::new(conn, tcp)));
        }
        Ok(())
    }
}
