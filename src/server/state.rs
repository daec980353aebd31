// Author: Lukas Bower
// Purpose: Connection states, login steps and reset reasons for the login console.

/// Position within the login handshake, meaningful only while connected.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoginStep {
    /// Send the banner.
    Welcome,
    /// Negotiate terminal options for the username prompt.
    SendUserOptions,
    /// Send `Login as:`.
    RequestUser,
    /// Read and check the username.
    GetUser,
    /// Send `Password:`.
    RequestPassword,
    /// Negotiate terminal options for the password prompt.
    SendPasswordOptions,
    /// Read and check the password.
    GetPassword,
    /// Report a failed attempt.
    InvalidLogin,
    /// Switch the client into character mode.
    SendReplOptions,
    /// Send the success banner and hand over to the interpreter.
    LoginSuccess,
}

/// Top-level connection state; the login step only exists under `Connected`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnState {
    /// No sockets open; waiting for the server to be enabled.
    Disabled,
    /// Creating the listening socket.
    Starting,
    /// Listening, or a client is working through the login handshake.
    Connected(LoginStep),
    /// A client logged in; received bytes flow to the interpreter.
    LoggedIn,
}

impl ConnState {
    /// Short label used in log lines.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Starting => "starting",
            Self::Connected(_) => "connected",
            Self::LoggedIn => "logged-in",
        }
    }
}

/// Why a session was torn down.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResetReason {
    /// Accepting a client failed.
    AcceptFailed,
    /// A send failed or exhausted its retries.
    SendFailed,
    /// A receive failed or the client closed the connection.
    ReceiveFailed,
    /// Too many failed login attempts.
    LoginRetriesExhausted,
    /// The client stayed silent past the idle threshold.
    IdleTimeout,
    /// The server was disabled.
    Disabled,
}

impl ResetReason {
    /// Short label used in log lines.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::AcceptFailed => "accept-failed",
            Self::SendFailed => "send-failed",
            Self::ReceiveFailed => "receive-failed",
            Self::LoginRetriesExhausted => "login-retries-exhausted",
            Self::IdleTimeout => "idle-timeout",
            Self::Disabled => "disabled",
        }
    }
}
