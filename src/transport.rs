// Author: Lukas Bower
// Purpose: Define the socket and platform seams the login console is driven through.

//! Transport and platform abstractions.
//!
//! Every socket operation except [`Transport::listen`] and [`Transport::close`]
//! is non-blocking and reports back-pressure through [`nb::Error::WouldBlock`],
//! following the same contract as the serial drivers.

use core::fmt;

use embedded_io::ErrorType;

/// Non-blocking socket provider backing the console.
pub trait Transport: ErrorType {
    /// Handle identifying an open socket.
    type Socket: Copy + PartialEq + fmt::Debug;

    /// Open a non-blocking listening socket bound to `port`.
    fn listen(&mut self, port: u16) -> Result<Self::Socket, Self::Error>;

    /// Accept a pending client on `listener`.
    fn accept(&mut self, listener: Self::Socket) -> nb::Result<Self::Socket, Self::Error>;

    /// Send as much of `data` as the socket accepts, returning the byte count.
    fn send(&mut self, socket: Self::Socket, data: &[u8]) -> nb::Result<usize, Self::Error>;

    /// Receive into `buf`, returning the byte count; zero means the peer closed.
    fn recv(&mut self, socket: Self::Socket, buf: &mut [u8]) -> nb::Result<usize, Self::Error>;

    /// Close a socket; closing an unknown handle is a no-op.
    fn close(&mut self, socket: Self::Socket);
}

/// Platform services the console needs beyond sockets.
pub trait Platform {
    /// Pause the caller for roughly `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);

    /// Returns `true` when executing in interrupt context, where delaying is forbidden.
    fn in_interrupt(&self) -> bool;
}

/// Tri-state result of a single non-blocking send or receive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IoStatus {
    /// Bytes moved; the count is always positive.
    Ok(usize),
    /// No progress now; retry on a later tick.
    Again,
    /// The connection is unusable and must be reset.
    Failed,
}
