// Author: Lukas Bower
// Purpose: Scripted in-memory transport and platform used to exercise the login console.

//! Test doubles for [`Transport`] and [`Platform`].
//!
//! [`LoopbackTransport`] hands out a single listener and client and replays
//! scripted receive and send outcomes. Unscripted receives would-block and
//! unscripted sends accept every byte.

use std::collections::VecDeque;

use embedded_io::{ErrorKind, ErrorType};
use thiserror::Error;

use crate::transport::{Platform, Transport};

/// Socket handle issued by [`LoopbackTransport`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LoopbackSocket(pub u16);

/// Failures injected by [`LoopbackTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LoopbackError {
    /// A scripted listen failure.
    #[error("listen refused")]
    ListenRefused,
    /// A scripted accept failure.
    #[error("accept failed")]
    AcceptFailed,
    /// A scripted send failure.
    #[error("send failed")]
    SendFailed,
    /// A scripted receive failure.
    #[error("receive failed")]
    RecvFailed,
    /// The handle was never issued or is already closed.
    #[error("unknown socket {0:?}")]
    UnknownSocket(LoopbackSocket),
}

impl embedded_io::Error for LoopbackError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::ListenRefused => ErrorKind::AddrInUse,
            Self::UnknownSocket(_) => ErrorKind::NotConnected,
            Self::AcceptFailed | Self::SendFailed | Self::RecvFailed => ErrorKind::Other,
        }
    }
}

/// Outcome of the next receive on the client socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvStep {
    /// Deliver bytes; whatever does not fit stays queued for the next call.
    Data(Vec<u8>),
    /// No data available.
    WouldBlock,
    /// The peer closed the connection.
    Closed,
    /// The receive fails.
    Fail,
}

/// Outcome of the next send on the client socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStep {
    /// Accept at most this many bytes.
    Partial(usize),
    /// Accept nothing and ask the caller to retry.
    WouldBlock,
    /// Report success without taking any bytes.
    Zero,
    /// The send fails.
    Fail,
}

/// In-memory transport replaying scripted socket behaviour.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    next_id: u16,
    listener: Option<LoopbackSocket>,
    client: Option<LoopbackSocket>,
    listen_failures: u32,
    pending_clients: u32,
    accept_failures: u32,
    recv_script: VecDeque<RecvStep>,
    send_script: VecDeque<SendStep>,
    sent: Vec<u8>,
    writes: Vec<Vec<u8>>,
    closed: Vec<LoopbackSocket>,
    listen_calls: u32,
    send_calls: u32,
    recv_calls: u32,
}

impl LoopbackTransport {
    /// Create a transport with no clients waiting.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` listen calls fail.
    pub fn fail_next_listens(&mut self, count: u32) {
        self.listen_failures = count;
    }

    /// Queue a client that the next accept will return.
    pub fn queue_client(&mut self) {
        self.pending_clients += 1;
    }

    /// Make the next accept fail.
    pub fn fail_next_accept(&mut self) {
        self.accept_failures += 1;
    }

    /// Append a receive outcome.
    pub fn script_recv(&mut self, step: RecvStep) {
        self.recv_script.push_back(step);
    }

    /// Append bytes the client "types".
    pub fn feed(&mut self, data: &[u8]) {
        self.script_recv(RecvStep::Data(data.to_vec()));
    }

    /// Append a send outcome.
    pub fn script_send(&mut self, step: SendStep) {
        self.send_script.push_back(step);
    }

    /// Every byte accepted by sends so far.
    pub fn sent(&self) -> &[u8] {
        &self.sent
    }

    /// Drain the bytes accepted by sends so far.
    pub fn take_sent(&mut self) -> Vec<u8> {
        self.writes.clear();
        core::mem::take(&mut self.sent)
    }

    /// Bytes accepted by each successful send call, in order.
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    /// Sockets closed so far, in order.
    pub fn closed(&self) -> &[LoopbackSocket] {
        &self.closed
    }

    /// Currently open client socket.
    pub fn client(&self) -> Option<LoopbackSocket> {
        self.client
    }

    /// Currently open listening socket.
    pub fn listener(&self) -> Option<LoopbackSocket> {
        self.listener
    }

    /// Listen calls made so far.
    pub fn listen_calls(&self) -> u32 {
        self.listen_calls
    }

    /// Send calls made so far.
    pub fn send_calls(&self) -> u32 {
        self.send_calls
    }

    /// Receive calls made so far.
    pub fn recv_calls(&self) -> u32 {
        self.recv_calls
    }

    /// Receive steps not consumed yet.
    pub fn pending_recv(&self) -> usize {
        self.recv_script.len()
    }

    fn issue(&mut self) -> LoopbackSocket {
        self.next_id = self.next_id.wrapping_add(1);
        LoopbackSocket(self.next_id)
    }

    fn check_client(&self, socket: LoopbackSocket) -> Result<(), LoopbackError> {
        if self.client == Some(socket) {
            Ok(())
        } else {
            Err(LoopbackError::UnknownSocket(socket))
        }
    }
}

impl ErrorType for LoopbackTransport {
    type Error = LoopbackError;
}

impl Transport for LoopbackTransport {
    type Socket = LoopbackSocket;

    fn listen(&mut self, _port: u16) -> Result<Self::Socket, Self::Error> {
        self.listen_calls += 1;
        if self.listen_failures > 0 {
            self.listen_failures -= 1;
            return Err(LoopbackError::ListenRefused);
        }
        let socket = self.issue();
        self.listener = Some(socket);
        Ok(socket)
    }

    fn accept(&mut self, listener: Self::Socket) -> nb::Result<Self::Socket, Self::Error> {
        if self.listener != Some(listener) {
            return Err(nb::Error::Other(LoopbackError::UnknownSocket(listener)));
        }
        if self.accept_failures > 0 {
            self.accept_failures -= 1;
            return Err(nb::Error::Other(LoopbackError::AcceptFailed));
        }
        if self.pending_clients == 0 {
            return Err(nb::Error::WouldBlock);
        }
        self.pending_clients -= 1;
        let socket = self.issue();
        self.client = Some(socket);
        Ok(socket)
    }

    fn send(&mut self, socket: Self::Socket, data: &[u8]) -> nb::Result<usize, Self::Error> {
        self.send_calls += 1;
        self.check_client(socket).map_err(nb::Error::Other)?;
        let accepted = match self.send_script.pop_front() {
            None => data.len(),
            Some(SendStep::Partial(limit)) => limit.min(data.len()),
            Some(SendStep::WouldBlock) => return Err(nb::Error::WouldBlock),
            Some(SendStep::Zero) => 0,
            Some(SendStep::Fail) => return Err(nb::Error::Other(LoopbackError::SendFailed)),
        };
        if accepted > 0 {
            self.sent.extend_from_slice(&data[..accepted]);
            self.writes.push(data[..accepted].to_vec());
        }
        Ok(accepted)
    }

    fn recv(&mut self, socket: Self::Socket, buf: &mut [u8]) -> nb::Result<usize, Self::Error> {
        self.recv_calls += 1;
        self.check_client(socket).map_err(nb::Error::Other)?;
        match self.recv_script.pop_front() {
            None | Some(RecvStep::WouldBlock) => Err(nb::Error::WouldBlock),
            Some(RecvStep::Closed) => Ok(0),
            Some(RecvStep::Fail) => Err(nb::Error::Other(LoopbackError::RecvFailed)),
            Some(RecvStep::Data(mut data)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                if len < data.len() {
                    let rest = data.split_off(len);
                    self.recv_script.push_front(RecvStep::Data(rest));
                }
                Ok(len)
            }
        }
    }

    fn close(&mut self, socket: Self::Socket) {
        if self.client == Some(socket) {
            self.client = None;
        } else if self.listener == Some(socket) {
            self.listener = None;
        } else {
            return;
        }
        self.closed.push(socket);
    }
}

/// Platform double recording every delay request.
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    delays: Vec<u32>,
    in_interrupt: bool,
}

impl RecordingPlatform {
    /// Create a platform running in thread context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend subsequent calls run inside an interrupt handler.
    pub fn set_interrupt(&mut self, in_interrupt: bool) {
        self.in_interrupt = in_interrupt;
    }

    /// Delays requested so far, in milliseconds.
    pub fn delays(&self) -> &[u32] {
        &self.delays
    }
}

impl Platform for RecordingPlatform {
    fn delay_ms(&mut self, ms: u32) {
        self.delays.push(ms);
    }

    fn in_interrupt(&self) -> bool {
        self.in_interrupt
    }
}
