// Author: Lukas Bower
// Purpose: Integration tests walking clients through the login handshake.
#![cfg(feature = "std")]

use login_console::telnet::{PASSWORD_OPTIONS, REPL_OPTIONS, USER_OPTIONS};
use login_console::test_support::{LoopbackTransport, RecordingPlatform, RecvStep};
use login_console::{ConnState, LoginServer, LoginStep, ServerConfig};

type Server = LoginServer<LoopbackTransport, RecordingPlatform>;

const BANNER: &str = "board console\r\n";

fn server() -> Server {
    let config = ServerConfig::default()
        .with_credentials("alice", "secret")
        .expect("credentials")
        .with_banner(BANNER)
        .with_timing(4_000, 4);
    LoginServer::new(config, LoopbackTransport::new(), RecordingPlatform::new())
        .expect("valid config")
}

fn run_until(server: &mut Server, target: ConnState) {
    for _ in 0..64 {
        if server.state() == target {
            return;
        }
        server.run();
    }
    panic!("never reached {target:?}, stuck in {:?}", server.state());
}

fn at_user_prompt() -> Server {
    let mut server = server();
    server.enable();
    server.transport_mut().queue_client();
    run_until(&mut server, ConnState::Connected(LoginStep::GetUser));
    server
}

fn fail_once(server: &mut Server) {
    server.transport_mut().feed(b"mallory\r");
    server.run();
    assert_eq!(server.state(), ConnState::Connected(LoginStep::InvalidLogin));
    server.run();
}

#[test]
fn successful_login_emits_the_full_handshake() {
    let mut server = at_user_prompt();
    server.transport_mut().feed(b"alice\r\n");
    run_until(&mut server, ConnState::Connected(LoginStep::GetPassword));
    server.transport_mut().feed(b"secret\r\n");
    run_until(&mut server, ConnState::LoggedIn);

    let mut expected = Vec::new();
    expected.extend_from_slice(BANNER.as_bytes());
    expected.extend_from_slice(&USER_OPTIONS);
    expected.extend_from_slice(b"Login as:");
    expected.extend_from_slice(b"Password:");
    expected.extend_from_slice(&PASSWORD_OPTIONS);
    expected.extend_from_slice(&REPL_OPTIONS);
    expected.extend_from_slice(
        b"\r\nLogin succeeded!\r\nType \"help()\" for more information.\r\n",
    );
    assert_eq!(server.transport().sent(), expected.as_slice());

    assert!(server.is_active());
    assert!(server.credentials_valid());
    assert_eq!(server.login_retries(), 0);
    let telemetry = server.telemetry();
    assert_eq!(telemetry.connections, 1);
    assert_eq!(telemetry.logins, 1);
    assert_eq!(telemetry.login_failures, 0);
}

#[test]
fn wrong_password_asks_for_the_username_again() {
    let mut server = at_user_prompt();
    server.transport_mut().feed(b"alice\r");
    server.run();
    assert_eq!(
        server.state(),
        ConnState::Connected(LoginStep::RequestPassword)
    );

    run_until(&mut server, ConnState::Connected(LoginStep::GetPassword));
    server.transport_mut().feed(b"wrong\r");
    server.run();
    assert_eq!(server.state(), ConnState::Connected(LoginStep::InvalidLogin));

    server.transport_mut().take_sent();
    server.run();
    assert_eq!(server.login_retries(), 1);
    assert_eq!(server.state(), ConnState::Connected(LoginStep::RequestUser));
    server.run();
    assert_eq!(
        server.transport().sent(),
        b"\r\nInvalid credentials, try again.\r\nLogin as:"
    );
    assert!(!server.credentials_valid());
}

#[test]
fn three_failures_drop_the_connection() {
    let mut server = at_user_prompt();
    let client = server.transport().client().expect("client accepted");
    let listener = server.transport().listener().expect("listening");

    fail_once(&mut server);
    assert_eq!(server.login_retries(), 1);
    run_until(&mut server, ConnState::Connected(LoginStep::GetUser));
    fail_once(&mut server);
    assert_eq!(server.login_retries(), 2);
    run_until(&mut server, ConnState::Connected(LoginStep::GetUser));
    fail_once(&mut server);

    assert_eq!(server.state(), ConnState::Starting);
    assert!(!server.is_active());
    assert_eq!(server.login_retries(), 0);
    assert_eq!(server.transport().closed(), &[client, listener]);
    let telemetry = server.telemetry();
    assert_eq!(telemetry.login_failures, 3);
    assert_eq!(telemetry.resets, 1);
}

#[test]
fn terminator_split_across_prompts_is_swallowed() {
    let mut server = at_user_prompt();
    server.transport_mut().feed(b"alice\r");
    run_until(&mut server, ConnState::Connected(LoginStep::GetPassword));

    // The LF of the username's CR-LF arrives with the password.
    server.transport_mut().feed(b"\nsecret\r");
    server.run();
    assert_eq!(
        server.state(),
        ConnState::Connected(LoginStep::SendReplOptions)
    );
}

#[test]
fn credential_typed_in_pieces_with_negotiation_replies() {
    let mut server = at_user_prompt();
    server.transport_mut().feed(&[255, 253, 1, b'a', b'l']);
    server.transport_mut().feed(&[b'i', 255, 251, 34]);
    server.transport_mut().feed(b"ce\r");

    server.run();
    server.run();
    assert_eq!(server.state(), ConnState::Connected(LoginStep::GetUser));
    server.run();
    assert_eq!(
        server.state(),
        ConnState::Connected(LoginStep::RequestPassword)
    );
}

#[test]
fn overlong_and_empty_lines_are_rejected() {
    let mut server = at_user_prompt();
    server.transport_mut().feed(b"averyveryverylongname\r");
    server.run();
    assert_eq!(server.state(), ConnState::Connected(LoginStep::InvalidLogin));

    run_until(&mut server, ConnState::Connected(LoginStep::GetUser));
    server.transport_mut().feed(b"\r");
    server.run();
    assert_eq!(server.state(), ConnState::Connected(LoginStep::InvalidLogin));
    assert_eq!(server.telemetry().login_failures, 2);
}

#[test]
fn answer_after_an_unterminated_overlong_line_is_read_fresh() {
    let mut server = at_user_prompt();
    server.transport_mut().feed(b"0123456789abcdef");
    server.run();
    assert_eq!(server.state(), ConnState::Connected(LoginStep::InvalidLogin));

    server.transport_mut().take_sent();
    run_until(&mut server, ConnState::Connected(LoginStep::GetUser));
    assert_eq!(
        server.transport().sent(),
        b"\r\nInvalid credentials, try again.\r\nLogin as:"
    );

    server.transport_mut().feed(b"alice\r");
    server.run();
    assert_eq!(
        server.state(),
        ConnState::Connected(LoginStep::RequestPassword)
    );
    assert_eq!(server.login_retries(), 1);
}

#[test]
fn peer_close_during_login_resets_and_relistens() {
    let mut server = at_user_prompt();
    server.transport_mut().script_recv(RecvStep::Closed);
    server.run();
    assert_eq!(server.state(), ConnState::Starting);
    assert_eq!(server.transport().client(), None);

    server.run();
    assert_eq!(server.state(), ConnState::Connected(LoginStep::Welcome));
    assert_eq!(server.transport().listen_calls(), 2);
}

#[test]
fn accept_failure_resets() {
    let mut server = server();
    server.enable();
    run_until(&mut server, ConnState::Connected(LoginStep::Welcome));
    server.transport_mut().fail_next_accept();

    server.run();
    assert_eq!(server.state(), ConnState::Starting);
    assert_eq!(server.telemetry().resets, 1);
}

#[test]
fn disable_then_enable_starts_over() {
    let mut server = at_user_prompt();
    server.disable();
    assert_eq!(server.state(), ConnState::Disabled);
    assert!(!server.is_active());

    server.enable();
    server.transport_mut().queue_client();
    run_until(&mut server, ConnState::Connected(LoginStep::GetUser));
    assert_eq!(server.telemetry().connections, 2);
}
