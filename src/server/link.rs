// Author: Lukas Bower
// Purpose: Socket ownership and the non-blocking send/receive primitives of the login console.

use log::{debug, warn};
use nb::Error as NbError;

use super::SessionTelemetry;
use crate::telnet::CommandFilter;
use crate::transport::{IoStatus, Platform, Transport};

/// Sockets plus the per-connection I/O bookkeeping.
///
/// The primitives only report [`IoStatus::Failed`]; tearing the session down
/// is left to the state machine.
pub(super) struct Link<T: Transport> {
    pub(super) transport: T,
    pub(super) listener: Option<T::Socket>,
    pub(super) client: Option<T::Socket>,
    pub(super) idle_ticks: u32,
    pub(super) telemetry: SessionTelemetry,
    filter: CommandFilter,
    send_retries: u8,
    max_send_retries: u8,
    retry_delay_ms: u32,
}

impl<T: Transport> Link<T> {
    pub(super) fn new(transport: T, max_send_retries: u8, retry_delay_ms: u32) -> Self {
        Self {
            transport,
            listener: None,
            client: None,
            idle_ticks: 0,
            telemetry: SessionTelemetry::default(),
            filter: CommandFilter::new(),
            send_retries: 0,
            max_send_retries,
            retry_delay_ms,
        }
    }

    /// Close both sockets and forget every per-connection counter.
    pub(super) fn close_all(&mut self) {
        if let Some(client) = self.client.take() {
            self.transport.close(client);
        }
        if let Some(listener) = self.listener.take() {
            self.transport.close(listener);
        }
        self.filter.reset();
        self.send_retries = 0;
        self.idle_ticks = 0;
    }

    /// One non-blocking send to the client.
    ///
    /// Would-block is tolerated `max_send_retries` times in a row before the
    /// send is reported as failed.
    pub(super) fn send_non_blocking(&mut self, data: &[u8]) -> IoStatus {
        let Some(client) = self.client else {
            return IoStatus::Failed;
        };
        match self.transport.send(client, data) {
            Ok(sent) if sent > 0 => {
                self.send_retries = 0;
                self.telemetry.record_tx(sent);
                debug!("[login-console] send: len={} of {}", sent, data.len());
                IoStatus::Ok(sent.min(data.len()))
            }
            Ok(_) => {
                warn!("[login-console] send: transport accepted zero bytes");
                IoStatus::Failed
            }
            Err(NbError::WouldBlock) => {
                self.send_retries = self.send_retries.saturating_add(1);
                if self.send_retries <= self.max_send_retries {
                    IoStatus::Again
                } else {
                    warn!(
                        "[login-console] send: still blocked after {} retries",
                        self.max_send_retries
                    );
                    IoStatus::Failed
                }
            }
            Err(NbError::Other(err)) => {
                warn!("[login-console] send failed: {:?}", err);
                IoStatus::Failed
            }
        }
    }

    /// Send all of `data`, pausing between would-block outcomes.
    ///
    /// Refused in interrupt context. Never resets the session.
    pub(super) fn send_with_retries<P: Platform>(&mut self, platform: &mut P, data: &[u8]) -> bool {
        if platform.in_interrupt() {
            warn!(
                "[login-console] refusing blocking send of {} bytes from interrupt context",
                data.len()
            );
            return false;
        }
        let Some(client) = self.client else {
            return false;
        };

        let mut offset = 0;
        let mut retries = 0u8;
        while offset < data.len() {
            match self.transport.send(client, &data[offset..]) {
                Ok(sent) if sent > 0 => {
                    offset += sent.min(data.len() - offset);
                    retries = 0;
                    self.telemetry.record_tx(sent);
                }
                Ok(_) => return false,
                Err(NbError::WouldBlock) => {
                    if retries >= self.max_send_retries {
                        warn!(
                            "[login-console] write abandoned: {} of {} bytes sent",
                            offset,
                            data.len()
                        );
                        return false;
                    }
                    retries += 1;
                    platform.delay_ms(self.retry_delay_ms);
                }
                Err(NbError::Other(err)) => {
                    debug!("[login-console] write failed: {:?}", err);
                    return false;
                }
            }
        }
        true
    }

    /// One non-blocking receive from the client into `buf`.
    ///
    /// Telnet commands are stripped in place; the returned count covers the
    /// remaining data bytes at the front of `buf`.
    pub(super) fn receive_non_blocking(&mut self, buf: &mut [u8]) -> IoStatus {
        let Some(client) = self.client else {
            return IoStatus::Again;
        };
        match self.transport.recv(client, buf) {
            Ok(0) => {
                debug!("[login-console] receive: peer closed");
                IoStatus::Failed
            }
            Ok(received) => {
                let received = received.min(buf.len());
                self.idle_ticks = 0;
                let kept = self.filter.filter(&mut buf[..received]);
                self.telemetry.record_rx(received, received - kept);
                debug!(
                    "[login-console] receive: len={} kept={}",
                    received, kept
                );
                if kept > 0 {
                    IoStatus::Ok(kept)
                } else {
                    IoStatus::Again
                }
            }
            Err(NbError::WouldBlock) => IoStatus::Again,
            Err(NbError::Other(err)) => {
                warn!("[login-console] receive failed: {:?}", err);
                IoStatus::Failed
            }
        }
    }
}
