// Author: Lukas Bower
// Purpose: Describe the tunables of the login console and validate them before use.

//! Login console configuration.
//!
//! Defaults give a five minute idle timeout, 25 send retries spaced 5 ms
//! apart and three login attempts per connection.

use heapless::String as HeaplessString;
use thiserror::Error;

use crate::credential::MAX_CREDENTIAL_LEN;

/// TCP port the console listens on unless overridden.
pub const DEFAULT_LISTEN_PORT: u16 = 23;
/// Username accepted by the default configuration.
pub const DEFAULT_USER: &str = "micro";
/// Password accepted by the default configuration.
pub const DEFAULT_PASSWORD: &str = "python";
/// Banner sent to every client before negotiation starts.
pub const DEFAULT_BANNER: &str = concat!(
    "login-console ",
    env!("CARGO_PKG_VERSION"),
    "; single-client terminal\r\n"
);
/// Idle period after which a connected client is dropped (milliseconds).
pub const LOGIN_TIMEOUT_MS: u32 = 5 * 60 * 1000;
/// Scheduler period between two [`crate::LoginServer::run`] calls (milliseconds).
pub const DEFAULT_TICK_PERIOD_MS: u32 = 4;
/// Would-block outcomes tolerated before a send is treated as fatal.
pub const SEND_RETRIES_MAX: u8 = 25;
/// Delay between attempts of a retrying send (milliseconds).
pub const SEND_RETRY_DELAY_MS: u32 = 5;
/// Failed login attempts allowed before the connection is dropped.
pub const LOGIN_RETRIES_MAX: u8 = 3;

/// Fixed-capacity credential storage.
pub type Credential = HeaplessString<MAX_CREDENTIAL_LEN>;

/// Errors raised while building or validating a [`ServerConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A credential was empty; empty lines never match.
    #[error("{field} must not be empty")]
    EmptyCredential {
        /// Credential that failed validation.
        field: &'static str,
    },
    /// A credential does not fit the login line buffer.
    #[error("{field} exceeds {max} bytes")]
    CredentialTooLong {
        /// Credential that failed validation.
        field: &'static str,
        /// Longest accepted credential.
        max: usize,
    },
    /// A credential contains a byte the line discipline would consume.
    #[error("{field} contains control or non-ASCII bytes")]
    InvalidCredentialByte {
        /// Credential that failed validation.
        field: &'static str,
    },
    /// The scheduler period was zero.
    #[error("tick period must be non-zero")]
    ZeroTickPeriod,
    /// The idle timeout is shorter than a single scheduler tick.
    #[error("login timeout {timeout_ms} ms is shorter than one {tick_ms} ms tick")]
    TimeoutBelowTick {
        /// Configured idle timeout.
        timeout_ms: u32,
        /// Configured tick period.
        tick_ms: u32,
    },
    /// A retry ceiling was zero.
    #[error("{field} must be non-zero")]
    ZeroRetries {
        /// Retry ceiling that failed validation.
        field: &'static str,
    },
}

/// Runtime configuration for [`crate::LoginServer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Port the listening socket binds to.
    pub listen_port: u16,
    /// Username expected at the `Login as:` prompt.
    pub user: Credential,
    /// Password expected at the `Password:` prompt.
    pub password: Credential,
    /// Banner sent as the first message of every connection.
    pub banner: &'static str,
    /// Idle timeout applied once a client is connected (milliseconds).
    pub login_timeout_ms: u32,
    /// Period of the scheduler driving the server (milliseconds).
    pub tick_period_ms: u32,
    /// Would-block outcomes tolerated per stalled send.
    pub max_send_retries: u8,
    /// Delay between attempts of the retrying send (milliseconds).
    pub send_retry_delay_ms: u32,
    /// Failed logins tolerated before the connection is reset.
    pub max_login_retries: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            user: credential_from(DEFAULT_USER),
            password: credential_from(DEFAULT_PASSWORD),
            banner: DEFAULT_BANNER,
            login_timeout_ms: LOGIN_TIMEOUT_MS,
            tick_period_ms: DEFAULT_TICK_PERIOD_MS,
            max_send_retries: SEND_RETRIES_MAX,
            send_retry_delay_ms: SEND_RETRY_DELAY_MS,
            max_login_retries: LOGIN_RETRIES_MAX,
        }
    }
}

fn credential_from(value: &str) -> Credential {
    let mut credential = Credential::new();
    // Defaults are short ASCII literals; truncation cannot happen.
    let _ = credential.push_str(value);
    credential
}

fn parse_credential(field: &'static str, value: &str) -> Result<Credential, ConfigError> {
    let mut credential = Credential::new();
    credential
        .push_str(value)
        .map_err(|_| ConfigError::CredentialTooLong {
            field,
            max: MAX_CREDENTIAL_LEN,
        })?;
    Ok(credential)
}

fn check_credential(field: &'static str, credential: &Credential) -> Result<(), ConfigError> {
    if credential.is_empty() {
        return Err(ConfigError::EmptyCredential { field });
    }
    if credential
        .bytes()
        .any(|byte| !byte.is_ascii() || byte.is_ascii_control())
    {
        return Err(ConfigError::InvalidCredentialByte { field });
    }
    Ok(())
}

impl ServerConfig {
    /// Replace the expected username and password.
    pub fn with_credentials(mut self, user: &str, password: &str) -> Result<Self, ConfigError> {
        self.user = parse_credential("user", user)?;
        self.password = parse_credential("password", password)?;
        Ok(self)
    }

    /// Override the listening port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    /// Override the banner sent on connect.
    #[must_use]
    pub fn with_banner(mut self, banner: &'static str) -> Self {
        self.banner = banner;
        self
    }

    /// Override the idle timeout and scheduler period together.
    #[must_use]
    pub fn with_timing(mut self, login_timeout_ms: u32, tick_period_ms: u32) -> Self {
        self.login_timeout_ms = login_timeout_ms;
        self.tick_period_ms = tick_period_ms;
        self
    }

    /// Override the login attempt ceiling.
    #[must_use]
    pub fn with_login_retries(mut self, max_login_retries: u8) -> Self {
        self.max_login_retries = max_login_retries;
        self
    }

    /// Override the send retry ceiling and the delay between retries.
    #[must_use]
    pub fn with_send_retries(mut self, max_send_retries: u8, delay_ms: u32) -> Self {
        self.max_send_retries = max_send_retries;
        self.send_retry_delay_ms = delay_ms;
        self
    }

    /// Number of ticks a connected client may stay silent before it is dropped.
    #[must_use]
    pub fn timeout_threshold(&self) -> u32 {
        self.login_timeout_ms
            .checked_div(self.tick_period_ms)
            .unwrap_or(0)
    }

    /// Check every field for values the state machine cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_credential("user", &self.user)?;
        check_credential("password", &self.password)?;
        if self.tick_period_ms == 0 {
            return Err(ConfigError::ZeroTickPeriod);
        }
        if self.timeout_threshold() == 0 {
            return Err(ConfigError::TimeoutBelowTick {
                timeout_ms: self.login_timeout_ms,
                tick_ms: self.tick_period_ms,
            });
        }
        if self.max_send_retries == 0 {
            return Err(ConfigError::ZeroRetries {
                field: "max_send_retries",
            });
        }
        if self.max_login_retries == 0 {
            return Err(ConfigError::ZeroRetries {
                field: "max_login_retries",
            });
        }
        Ok(())
    }
}
