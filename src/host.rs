// Author: Lukas Bower
// Purpose: Host-mode transport and platform backed by std::net for running the console on a workstation.
#![allow(clippy::module_name_repetitions)]

//! Host-mode bindings.
//!
//! [`TcpTransport`] maps the non-blocking socket contract onto
//! `std::net` sockets; [`HostPlatform`] delays with `thread::sleep`.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use embedded_io::{ErrorKind, ErrorType};
use log::{debug, trace};
use thiserror::Error;

use crate::transport::{Platform, Transport};

/// Slot index of a socket owned by [`TcpTransport`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SocketId(u16);

/// Errors surfaced by [`TcpTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HostError {
    /// The operating system rejected a socket call.
    #[error("{op} failed: {kind}")]
    Io {
        /// Socket call that failed.
        op: &'static str,
        /// Reported error kind.
        kind: io::ErrorKind,
    },
    /// The handle does not name an open socket.
    #[error("unknown socket {0:?}")]
    UnknownSocket(SocketId),
    /// A listener was used as a stream or the other way round.
    #[error("socket {0:?} has the wrong role for this call")]
    WrongRole(SocketId),
    /// Every slot is in use.
    #[error("socket table full")]
    TableFull,
}

impl HostError {
    fn io(op: &'static str, err: &io::Error) -> Self {
        Self::Io {
            op,
            kind: err.kind(),
        }
    }
}

impl embedded_io::Error for HostError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { kind, .. } => match kind {
                io::ErrorKind::ConnectionReset => ErrorKind::ConnectionReset,
                io::ErrorKind::ConnectionAborted => ErrorKind::ConnectionAborted,
                io::ErrorKind::ConnectionRefused => ErrorKind::ConnectionRefused,
                io::ErrorKind::NotConnected => ErrorKind::NotConnected,
                io::ErrorKind::AddrInUse => ErrorKind::AddrInUse,
                io::ErrorKind::AddrNotAvailable => ErrorKind::AddrNotAvailable,
                io::ErrorKind::BrokenPipe => ErrorKind::BrokenPipe,
                io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                io::ErrorKind::TimedOut => ErrorKind::TimedOut,
                io::ErrorKind::InvalidInput => ErrorKind::InvalidInput,
                _ => ErrorKind::Other,
            },
            Self::UnknownSocket(_) => ErrorKind::NotConnected,
            Self::WrongRole(_) => ErrorKind::InvalidInput,
            Self::TableFull => ErrorKind::OutOfMemory,
        }
    }
}

#[derive(Debug)]
enum HostSocket {
    Listener(TcpListener),
    Stream(TcpStream),
}

fn would_block(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Non-blocking TCP sockets bound to a fixed local address.
#[derive(Debug)]
pub struct TcpTransport {
    bind_addr: IpAddr,
    slots: Vec<Option<HostSocket>>,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

impl TcpTransport {
    /// Create a transport whose listeners bind to `bind_addr`.
    #[must_use]
    pub fn new(bind_addr: IpAddr) -> Self {
        Self {
            bind_addr,
            slots: Vec::new(),
        }
    }

    /// Local address of an open socket, useful when listening on port 0.
    pub fn local_addr(&self, socket: SocketId) -> Option<SocketAddr> {
        match self.slots.get(usize::from(socket.0))?.as_ref()? {
            HostSocket::Listener(listener) => listener.local_addr().ok(),
            HostSocket::Stream(stream) => stream.local_addr().ok(),
        }
    }

    fn insert(&mut self, socket: HostSocket) -> Result<SocketId, HostError> {
        let index = match self.slots.iter().position(Option::is_none) {
            Some(index) => index,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        let id = u16::try_from(index).map_err(|_| HostError::TableFull)?;
        self.slots[index] = Some(socket);
        Ok(SocketId(id))
    }

    fn stream(&mut self, socket: SocketId) -> Result<&mut TcpStream, HostError> {
        match self
            .slots
            .get_mut(usize::from(socket.0))
            .and_then(Option::as_mut)
        {
            Some(HostSocket::Stream(stream)) => Ok(stream),
            Some(HostSocket::Listener(_)) => Err(HostError::WrongRole(socket)),
            None => Err(HostError::UnknownSocket(socket)),
        }
    }
}

impl ErrorType for TcpTransport {
    type Error = HostError;
}

impl Transport for TcpTransport {
    type Socket = SocketId;

    fn listen(&mut self, port: u16) -> Result<Self::Socket, Self::Error> {
        let listener = TcpListener::bind(SocketAddr::new(self.bind_addr, port))
            .map_err(|err| HostError::io("bind", &err))?;
        listener
            .set_nonblocking(true)
            .map_err(|err| HostError::io("set_nonblocking", &err))?;
        debug!(
            "[login-console] host listener bound: {:?}",
            listener.local_addr().ok()
        );
        self.insert(HostSocket::Listener(listener))
    }

    fn accept(&mut self, listener: Self::Socket) -> nb::Result<Self::Socket, Self::Error> {
        let accepted = match self
            .slots
            .get(usize::from(listener.0))
            .and_then(Option::as_ref)
        {
            Some(HostSocket::Listener(socket)) => socket.accept(),
            Some(HostSocket::Stream(_)) => {
                return Err(nb::Error::Other(HostError::WrongRole(listener)))
            }
            None => return Err(nb::Error::Other(HostError::UnknownSocket(listener))),
        };
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(err) if would_block(&err) => return Err(nb::Error::WouldBlock),
            Err(err) => return Err(nb::Error::Other(HostError::io("accept", &err))),
        };
        stream
            .set_nonblocking(true)
            .map_err(|err| nb::Error::Other(HostError::io("set_nonblocking", &err)))?;
        let _ = stream.set_nodelay(true);
        debug!("[login-console] host accepted peer {}", peer);
        self.insert(HostSocket::Stream(stream))
            .map_err(nb::Error::Other)
    }

    fn send(&mut self, socket: Self::Socket, data: &[u8]) -> nb::Result<usize, Self::Error> {
        let stream = self.stream(socket).map_err(nb::Error::Other)?;
        match stream.write(data) {
            Ok(sent) => {
                trace!("[login-console] host send {} bytes", sent);
                Ok(sent)
            }
            Err(err) if would_block(&err) => Err(nb::Error::WouldBlock),
            Err(err) => Err(nb::Error::Other(HostError::io("send", &err))),
        }
    }

    fn recv(&mut self, socket: Self::Socket, buf: &mut [u8]) -> nb::Result<usize, Self::Error> {
        let stream = self.stream(socket).map_err(nb::Error::Other)?;
        match stream.read(buf) {
            Ok(received) => Ok(received),
            Err(err) if would_block(&err) => Err(nb::Error::WouldBlock),
            Err(err) => Err(nb::Error::Other(HostError::io("recv", &err))),
        }
    }

    fn close(&mut self, socket: Self::Socket) {
        let Some(slot) = self.slots.get_mut(usize::from(socket.0)) else {
            return;
        };
        if let Some(HostSocket::Stream(stream)) = slot.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Host platform; never runs in interrupt context.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPlatform;

impl Platform for HostPlatform {
    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }

    fn in_interrupt(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> TcpTransport {
        TcpTransport::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    fn accept_with_retry(transport: &mut TcpTransport, listener: SocketId) -> SocketId {
        for _ in 0..200 {
            match transport.accept(listener) {
                Ok(client) => return client,
                Err(nb::Error::WouldBlock) => thread::sleep(Duration::from_millis(5)),
                Err(nb::Error::Other(err)) => panic!("accept failed: {err}"),
            }
        }
        panic!("no client arrived");
    }

    #[test]
    fn accept_would_block_without_peer() {
        let mut transport = loopback();
        let listener = transport.listen(0).unwrap();
        assert!(matches!(
            transport.accept(listener),
            Err(nb::Error::WouldBlock)
        ));
    }

    #[test]
    fn exchanges_bytes_with_a_peer() {
        let mut transport = loopback();
        let listener = transport.listen(0).unwrap();
        let addr = transport.local_addr(listener).unwrap();
        let mut peer = TcpStream::connect(addr).unwrap();
        let client = accept_with_retry(&mut transport, listener);

        assert_eq!(transport.send(client, b"Login as:").unwrap(), 9);
        let mut buf = [0u8; 9];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"Login as:");

        peer.write_all(b"micro\r").unwrap();
        let mut inbound = [0u8; 16];
        let mut received = 0;
        for _ in 0..200 {
            match transport.recv(client, &mut inbound[received..]) {
                Ok(len) => {
                    received += len;
                    if received == 6 {
                        break;
                    }
                }
                Err(nb::Error::WouldBlock) => thread::sleep(Duration::from_millis(5)),
                Err(nb::Error::Other(err)) => panic!("recv failed: {err}"),
            }
        }
        assert_eq!(&inbound[..received], b"micro\r");
    }

    #[test]
    fn closed_handles_are_rejected() {
        let mut transport = loopback();
        let listener = transport.listen(0).unwrap();
        transport.close(listener);
        transport.close(listener);

        assert!(matches!(
            transport.accept(listener),
            Err(nb::Error::Other(HostError::UnknownSocket(_)))
        ));
        let mut buf = [0u8; 4];
        assert!(matches!(
            transport.recv(SocketId(7), &mut buf),
            Err(nb::Error::Other(HostError::UnknownSocket(_)))
        ));
    }

    #[test]
    fn listener_cannot_carry_data() {
        let mut transport = loopback();
        let listener = transport.listen(0).unwrap();
        let err = transport.send(listener, b"x").unwrap_err();
        assert!(matches!(
            err,
            nb::Error::Other(HostError::WrongRole(id)) if id == listener
        ));
        assert_eq!(
            embedded_io::Error::kind(&HostError::WrongRole(listener)),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn host_platform_is_never_in_interrupt() {
        let mut platform = HostPlatform;
        platform.delay_ms(0);
        assert!(!platform.in_interrupt());
    }
}
