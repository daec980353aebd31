// Author: Lukas Bower
// Purpose: Cooperative connection state machine gating the interpreter behind a Telnet-style login.

//! Login console session.
//!
//! [`LoginServer`] owns the sockets, the receive ring and every counter of the
//! single client slot. The scheduler calls [`LoginServer::run`] once per tick;
//! each call performs at most one receive or one send step and never blocks.
//! The interpreter drains input with [`LoginServer::rx_char`] and answers with
//! [`LoginServer::write_raw`] or [`LoginServer::write_cooked`].

mod link;
mod state;

use log::{debug, info, warn};
use nb::Error as NbError;

pub use state::{ConnState, LoginStep, ResetReason};

use self::link::Link;
use crate::config::{ConfigError, ServerConfig};
use crate::credential::{CredentialMatcher, MatchOutcome, LINE_CAPACITY};
use crate::ring::{RxRing, RX_BUFFER_SIZE};
use crate::telnet::{PASSWORD_OPTIONS, REPL_OPTIONS, USER_OPTIONS};
use crate::transport::{IoStatus, Platform, Transport};

const REQUEST_USER: &[u8] = b"Login as:";
const REQUEST_PASSWORD: &[u8] = b"Password:";
const INVALID_LOGIN: &[u8] = b"\r\nInvalid credentials, try again.\r\n";
const LOGIN_SUCCESS: &[u8] = b"\r\nLogin succeeded!\r\nType \"help()\" for more information.\r\n";

/// Largest chunk read per tick while a credential is being typed.
const LOGIN_CHUNK_LEN: usize = LINE_CAPACITY * 4;

/// Counters describing the console's activity since construction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionTelemetry {
    /// Clients accepted.
    pub connections: u32,
    /// Successful logins.
    pub logins: u32,
    /// Rejected login attempts.
    pub login_failures: u32,
    /// Sessions torn down for any reason.
    pub resets: u32,
    /// Sessions torn down by the idle timeout.
    pub timeouts: u32,
    /// Interpreter writes that could not be delivered.
    pub tx_failures: u32,
    /// Bytes received from clients, Telnet commands included.
    pub rx_bytes: u64,
    /// Received bytes discarded as Telnet commands.
    pub rx_filtered: u64,
    /// Bytes sent to clients.
    pub tx_bytes: u64,
}

impl SessionTelemetry {
    fn record_rx(&mut self, received: usize, filtered: usize) {
        self.rx_bytes = self.rx_bytes.saturating_add(received as u64);
        self.rx_filtered = self.rx_filtered.saturating_add(filtered as u64);
    }

    fn record_tx(&mut self, sent: usize) {
        self.tx_bytes = self.tx_bytes.saturating_add(sent as u64);
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum CredentialField {
    User,
    Password,
}

/// Single-client login console driven by a cooperative scheduler.
pub struct LoginServer<T: Transport, P: Platform, const N: usize = RX_BUFFER_SIZE> {
    config: ServerConfig,
    platform: P,
    link: Link<T>,
    state: ConnState,
    rx: RxRing<N>,
    matcher: CredentialMatcher,
    tx_offset: usize,
    timeout_threshold: u32,
    login_retries: u8,
    enabled: bool,
    credentials_valid: bool,
}

impl<T: Transport, P: Platform, const N: usize> LoginServer<T, P, N> {
    /// Validate `config` and build a disabled server.
    pub fn new(config: ServerConfig, transport: T, platform: P) -> Result<Self, ConfigError> {
        config.validate()?;
        let link = Link::new(
            transport,
            config.max_send_retries,
            config.send_retry_delay_ms,
        );
        let timeout_threshold = config.timeout_threshold();
        Ok(Self {
            config,
            platform,
            link,
            state: ConnState::Disabled,
            rx: RxRing::new(),
            matcher: CredentialMatcher::new(),
            tx_offset: 0,
            timeout_threshold,
            login_retries: 0,
            enabled: false,
            credentials_valid: false,
        })
    }

    fn set_state(&mut self, next: ConnState) {
        if self.state != next {
            debug!("[login-console] state: {:?} -> {:?}", self.state, next);
            if next.label() != self.state.label() {
                info!(
                    "[login-console] state: {} -> {}",
                    self.state.label(),
                    next.label()
                );
            }
            self.state = next;
        }
    }

    /// Advance the state machine by one scheduler tick.
    pub fn run(&mut self) {
        match self.state {
            ConnState::Disabled => self.wait_for_enabled(),
            ConnState::Starting => self.start_listener(),
            ConnState::Connected(step) => self.drive_login(step),
            ConnState::LoggedIn => self.process_session(),
        }
        self.tick_idle_timer();
    }

    /// Allow the server to open its listening socket on the next tick.
    pub fn enable(&mut self) {
        if !self.enabled {
            info!("[login-console] enabled");
        }
        self.enabled = true;
    }

    /// Drop any client, close every socket and stop listening.
    pub fn disable(&mut self) {
        if self.link.listener.is_some() || self.link.client.is_some() {
            self.reset(ResetReason::Disabled);
        }
        if self.enabled {
            info!("[login-console] disabled");
        }
        self.enabled = false;
        self.set_state(ConnState::Disabled);
    }

    /// Returns `true` when the server may accept connections.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns `true` while a client is logged in.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == ConnState::LoggedIn
    }

    /// Send `data` verbatim to the connected client.
    pub fn write_raw(&mut self, data: &[u8]) {
        if data.is_empty() || self.link.client.is_none() {
            return;
        }
        self.flush(data);
    }

    /// Send `data` with every line feed expanded to CR-LF.
    pub fn write_cooked(&mut self, data: &[u8]) {
        if self.link.client.is_none() {
            return;
        }
        let mut start = 0;
        for (idx, &byte) in data.iter().enumerate() {
            if byte == b'\n' {
                self.flush(&data[start..idx]);
                self.flush(b"\r\n");
                start = idx + 1;
            }
        }
        if start < data.len() {
            self.flush(&data[start..]);
        }
    }

    /// Returns `true` when a logged-in client has unread input.
    #[must_use]
    pub fn rx_any(&self) -> bool {
        self.link.client.is_some() && self.state == ConnState::LoggedIn && !self.rx.is_empty()
    }

    /// Pop the next byte typed by the logged-in client.
    pub fn rx_char(&mut self) -> Option<u8> {
        if self.state != ConnState::LoggedIn {
            return None;
        }
        self.rx.pop()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Configuration the server was built with.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Activity counters.
    #[must_use]
    pub fn telemetry(&self) -> SessionTelemetry {
        self.link.telemetry
    }

    /// Failed login attempts on the current connection.
    #[must_use]
    pub fn login_retries(&self) -> u8 {
        self.login_retries
    }

    /// Ticks since the client last sent anything.
    #[must_use]
    pub fn idle_ticks(&self) -> u32 {
        self.link.idle_ticks
    }

    /// Silent ticks tolerated before a connected client is dropped.
    #[must_use]
    pub fn timeout_threshold(&self) -> u32 {
        self.timeout_threshold
    }

    /// Latched once any login on this server succeeded.
    #[must_use]
    pub fn credentials_valid(&self) -> bool {
        self.credentials_valid
    }

    /// Bytes waiting in the receive ring.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.rx.len()
    }

    /// Borrow the transport.
    pub fn transport(&self) -> &T {
        &self.link.transport
    }

    /// Borrow the transport mutably (used by tests to script traffic).
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.link.transport
    }

    /// Borrow the platform mutably.
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    fn flush(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if !self.link.send_with_retries(&mut self.platform, data) {
            self.link.telemetry.tx_failures = self.link.telemetry.tx_failures.saturating_add(1);
        }
    }

    fn wait_for_enabled(&mut self) {
        self.link.listener = None;
        self.link.client = None;
        if self.enabled {
            self.set_state(ConnState::Starting);
        }
    }

    fn start_listener(&mut self) {
        let port = self.config.listen_port;
        match self.link.transport.listen(port) {
            Ok(listener) => {
                info!("[login-console] listening on port {}", port);
                self.link.listener = Some(listener);
                self.set_state(ConnState::Connected(LoginStep::Welcome));
            }
            Err(err) => {
                warn!("[login-console] listen on port {} failed: {:?}", port, err);
            }
        }
    }

    fn poll_accept(&mut self, listener: T::Socket) {
        match self.link.transport.accept(listener) {
            Ok(client) => {
                self.link.client = Some(client);
                self.link.idle_ticks = 0;
                self.link.telemetry.connections = self.link.telemetry.connections.saturating_add(1);
                info!("[login-console] client accepted: socket={:?}", client);
            }
            Err(NbError::WouldBlock) => {}
            Err(NbError::Other(err)) => {
                warn!("[login-console] accept failed: {:?}", err);
                self.reset(ResetReason::AcceptFailed);
            }
        }
    }

    fn drive_login(&mut self, step: LoginStep) {
        if self.link.client.is_none() {
            match self.link.listener {
                Some(listener) => self.poll_accept(listener),
                None => self.set_state(ConnState::Starting),
            }
            return;
        }

        match step {
            LoginStep::Welcome => {
                let banner = self.config.banner.as_bytes();
                self.send_and_proceed(banner, LoginStep::SendUserOptions);
            }
            LoginStep::SendUserOptions => {
                self.send_and_proceed(&USER_OPTIONS, LoginStep::RequestUser);
            }
            LoginStep::RequestUser => {
                self.matcher.clear();
                self.send_and_proceed(REQUEST_USER, LoginStep::GetUser);
            }
            LoginStep::GetUser => match self.poll_credential(CredentialField::User) {
                MatchOutcome::Match => self.set_state(ConnState::Connected(LoginStep::RequestPassword)),
                MatchOutcome::Mismatch => self.reject_login(CredentialField::User),
                MatchOutcome::Pending => {}
            },
            LoginStep::RequestPassword => {
                self.matcher.clear();
                self.send_and_proceed(REQUEST_PASSWORD, LoginStep::SendPasswordOptions);
            }
            LoginStep::SendPasswordOptions => {
                self.send_and_proceed(&PASSWORD_OPTIONS, LoginStep::GetPassword);
            }
            LoginStep::GetPassword => match self.poll_credential(CredentialField::Password) {
                MatchOutcome::Match => {
                    self.credentials_valid = true;
                    self.set_state(ConnState::Connected(LoginStep::SendReplOptions));
                }
                MatchOutcome::Mismatch => self.reject_login(CredentialField::Password),
                MatchOutcome::Pending => {}
            },
            LoginStep::InvalidLogin => {
                if self.send_message(INVALID_LOGIN) {
                    self.login_retries = self.login_retries.saturating_add(1);
                    if self.login_retries >= self.config.max_login_retries {
                        warn!(
                            "[login-console] login attempts exhausted ({})",
                            self.login_retries
                        );
                        self.reset(ResetReason::LoginRetriesExhausted);
                    } else {
                        self.set_state(ConnState::Connected(LoginStep::RequestUser));
                    }
                }
            }
            LoginStep::SendReplOptions => {
                self.send_and_proceed(&REPL_OPTIONS, LoginStep::LoginSuccess);
            }
            LoginStep::LoginSuccess => {
                if self.send_message(LOGIN_SUCCESS) {
                    self.rx.clear();
                    self.login_retries = 0;
                    self.link.telemetry.logins = self.link.telemetry.logins.saturating_add(1);
                    info!("[login-console] login succeeded");
                    self.set_state(ConnState::LoggedIn);
                }
            }
        }
    }

    fn reject_login(&mut self, field: CredentialField) {
        self.link.telemetry.login_failures = self.link.telemetry.login_failures.saturating_add(1);
        warn!(
            "[login-console] login rejected: field={:?} attempt={}",
            field,
            self.login_retries.saturating_add(1)
        );
        self.set_state(ConnState::Connected(LoginStep::InvalidLogin));
    }

    fn poll_credential(&mut self, field: CredentialField) -> MatchOutcome {
        let mut chunk = [0u8; LOGIN_CHUNK_LEN];
        match self.link.receive_non_blocking(&mut chunk) {
            IoStatus::Ok(len) => {
                let expected = match field {
                    CredentialField::User => self.config.user.as_bytes(),
                    CredentialField::Password => self.config.password.as_bytes(),
                };
                self.matcher.feed(&chunk[..len], expected)
            }
            IoStatus::Again => MatchOutcome::Pending,
            IoStatus::Failed => {
                self.reset(ResetReason::ReceiveFailed);
                MatchOutcome::Pending
            }
        }
    }

    fn send_and_proceed(&mut self, data: &[u8], next: LoginStep) {
        if self.send_message(data) {
            self.set_state(ConnState::Connected(next));
        }
    }

    /// Push the rest of a login message; `true` once all of it has been sent.
    fn send_message(&mut self, data: &[u8]) -> bool {
        let offset = self.tx_offset.min(data.len());
        if offset == data.len() {
            self.tx_offset = 0;
            return true;
        }
        match self.link.send_non_blocking(&data[offset..]) {
            IoStatus::Ok(sent) => {
                let total = offset + sent;
                if total >= data.len() {
                    self.tx_offset = 0;
                    true
                } else {
                    self.tx_offset = total;
                    false
                }
            }
            IoStatus::Again => false,
            IoStatus::Failed => {
                self.reset(ResetReason::SendFailed);
                false
            }
        }
    }

    fn process_session(&mut self) {
        let span = self.rx.writable_span();
        if span.is_empty() {
            return;
        }
        match self.link.receive_non_blocking(span) {
            IoStatus::Ok(len) => self.rx.commit(len),
            IoStatus::Again => {}
            IoStatus::Failed => self.reset(ResetReason::ReceiveFailed),
        }
    }

    fn tick_idle_timer(&mut self) {
        let counting = match self.state {
            ConnState::LoggedIn => true,
            ConnState::Connected(_) => self.link.client.is_some(),
            ConnState::Disabled | ConnState::Starting => false,
        };
        if !counting {
            return;
        }
        let elapsed = self.link.idle_ticks;
        self.link.idle_ticks = elapsed.saturating_add(1);
        if elapsed > self.timeout_threshold {
            warn!(
                "[login-console] client idle for {} ticks (threshold {})",
                elapsed, self.timeout_threshold
            );
            self.link.telemetry.timeouts = self.link.telemetry.timeouts.saturating_add(1);
            self.reset(ResetReason::IdleTimeout);
        }
    }

    /// Close both sockets, discard buffered data and restart from `Starting`.
    fn reset(&mut self, reason: ResetReason) {
        info!(
            "[login-console] reset: reason={} state={}",
            reason.label(),
            self.state.label()
        );
        self.link.close_all();
        self.rx.clear();
        self.matcher.reset();
        self.tx_offset = 0;
        self.login_retries = 0;
        self.link.telemetry.resets = self.link.telemetry.resets.saturating_add(1);
        self.set_state(ConnState::Starting);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{LoopbackTransport, RecordingPlatform, RecvStep, SendStep};

    type TestServer = LoginServer<LoopbackTransport, RecordingPlatform, 16>;

    fn server() -> TestServer {
        let config = ServerConfig::default()
            .with_credentials("alice", "secret")
            .unwrap()
            .with_banner("hello\r\n")
            .with_timing(400, 4);
        LoginServer::new(config, LoopbackTransport::new(), RecordingPlatform::new()).unwrap()
    }

    fn connected(step: LoginStep) -> ConnState {
        ConnState::Connected(step)
    }

    fn run_until(server: &mut TestServer, target: ConnState) {
        for _ in 0..32 {
            if server.state() == target {
                return;
            }
            server.run();
        }
        panic!("never reached {:?}, stuck in {:?}", target, server.state());
    }

    #[test]
    fn starts_disabled_and_waits_for_enable() {
        let mut server = server();
        server.run();
        assert_eq!(server.state(), ConnState::Disabled);

        server.enable();
        server.run();
        assert_eq!(server.state(), ConnState::Starting);
        server.run();
        assert_eq!(server.state(), connected(LoginStep::Welcome));
    }

    #[test]
    fn listen_failure_is_retried_next_tick() {
        let mut server = server();
        server.transport_mut().fail_next_listens(2);
        server.enable();
        server.run();

        server.run();
        server.run();
        assert_eq!(server.state(), ConnState::Starting);
        server.run();
        assert_eq!(server.state(), connected(LoginStep::Welcome));
        assert_eq!(server.transport().listen_calls(), 3);
    }

    #[test]
    fn waits_for_a_client_without_counting_idle_ticks() {
        let mut server = server();
        server.enable();
        run_until(&mut server, connected(LoginStep::Welcome));

        for _ in 0..100 {
            server.run();
        }
        assert_eq!(server.state(), connected(LoginStep::Welcome));
        assert_eq!(server.idle_ticks(), 0);
        assert!(server.transport().sent().is_empty());
    }

    #[test]
    fn partial_banner_send_resumes_at_offset() {
        let mut server = server();
        server.transport_mut().queue_client();
        server.transport_mut().script_send(SendStep::Partial(2));
        server.enable();
        run_until(&mut server, connected(LoginStep::Welcome));
        server.run(); // accept
        server.run(); // "he"
        assert_eq!(server.state(), connected(LoginStep::Welcome));
        server.run(); // "llo\r\n"
        assert_eq!(server.state(), connected(LoginStep::SendUserOptions));
        assert_eq!(server.transport().sent(), b"hello\r\n");
    }

    #[test]
    fn send_retry_exhaustion_resets() {
        let mut server = server();
        server.transport_mut().queue_client();
        server.enable();
        run_until(&mut server, connected(LoginStep::Welcome));
        server.run(); // accept
        for _ in 0..=ServerConfig::default().max_send_retries {
            server.transport_mut().script_send(SendStep::WouldBlock);
        }

        for _ in 0..ServerConfig::default().max_send_retries {
            server.run();
            assert_eq!(server.state(), connected(LoginStep::Welcome));
        }
        server.run();
        assert_eq!(server.state(), ConnState::Starting);
        assert_eq!(server.transport().closed().len(), 2);
    }

    #[test]
    fn would_block_receive_leaves_state_untouched() {
        let mut server = server();
        server.transport_mut().queue_client();
        server.enable();
        run_until(&mut server, connected(LoginStep::GetUser));
        let idle = server.idle_ticks();

        server.transport_mut().script_recv(RecvStep::WouldBlock);
        server.run();
        assert_eq!(server.state(), connected(LoginStep::GetUser));
        assert_eq!(server.idle_ticks(), idle + 1);
    }

    #[test]
    fn telnet_replies_do_not_count_as_credentials() {
        let mut server = server();
        server.transport_mut().queue_client();
        server.enable();
        run_until(&mut server, connected(LoginStep::GetUser));

        server
            .transport_mut()
            .script_recv(RecvStep::Data(vec![255, 253, 1, 255, 254, 34]));
        server.run();
        assert_eq!(server.state(), connected(LoginStep::GetUser));
        assert_eq!(server.idle_ticks(), 1);

        server
            .transport_mut()
            .script_recv(RecvStep::Data(b"alice\r\n".to_vec()));
        server.run();
        assert_eq!(server.state(), connected(LoginStep::RequestPassword));
        assert_eq!(server.telemetry().rx_filtered, 6);
    }

    #[test]
    fn disable_closes_sockets_from_any_state() {
        let mut server = server();
        server.transport_mut().queue_client();
        server.enable();
        run_until(&mut server, connected(LoginStep::GetUser));

        server.disable();
        assert_eq!(server.state(), ConnState::Disabled);
        assert!(!server.is_enabled());
        assert_eq!(server.transport().closed().len(), 2);
        assert_eq!(server.telemetry().resets, 1);

        server.run();
        assert_eq!(server.state(), ConnState::Disabled);
    }

    fn fatal_send_during_welcome(step: SendStep) -> TestServer {
        let mut server = server();
        server.transport_mut().queue_client();
        server.enable();
        run_until(&mut server, connected(LoginStep::Welcome));
        server.run(); // accept
        server.transport_mut().script_send(step);
        server.run();
        server
    }

    #[test]
    fn send_error_during_login_resets() {
        let server = fatal_send_during_welcome(SendStep::Fail);

        assert_eq!(server.state(), ConnState::Starting);
        assert_eq!(server.transport().closed().len(), 2);
        assert_eq!(server.telemetry().resets, 1);
        assert!(server.transport().sent().is_empty());
    }

    #[test]
    fn zero_byte_send_during_login_resets() {
        let server = fatal_send_during_welcome(SendStep::Zero);

        assert_eq!(server.state(), ConnState::Starting);
        assert_eq!(server.transport().closed().len(), 2);
        assert_eq!(server.telemetry().resets, 1);
    }

    #[test]
    fn disable_without_open_sockets_is_not_a_reset() {
        let mut server = server();
        server.transport_mut().fail_next_listens(1);
        server.enable();
        server.run();
        server.run();
        assert_eq!(server.state(), ConnState::Starting);

        server.disable();
        assert_eq!(server.state(), ConnState::Disabled);
        assert_eq!(server.telemetry().resets, 0);
        assert!(server.transport().closed().is_empty());
    }

    #[test]
    fn interpreter_writes_are_noops_without_client() {
        let mut server = server();
        server.write_raw(b"lost");
        server.write_cooked(b"lost\n");

        assert_eq!(server.transport().send_calls(), 0);
        assert_eq!(server.telemetry().tx_failures, 0);
    }
}
