// Author: Lukas Bower
// Purpose: Crate root for the login console library.
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]
#![deny(deprecated)]
#![warn(missing_docs)]

//! Single-client Telnet-style login console.
//!
//! The console listens on a TCP port, walks a connecting client through a
//! username/password exchange and then hands the byte stream to an
//! interpreter. Everything is driven from [`LoginServer::run`], which a
//! cooperative scheduler calls once per tick; sockets and delays are reached
//! through the [`Transport`] and [`Platform`] traits so the same state machine
//! runs on a board or, with the `std` feature, on a workstation.

pub mod config;
pub mod credential;
pub mod ring;
pub mod server;
pub mod telnet;
pub mod transport;

#[cfg(feature = "std")]
/// Host-mode transport and platform built on `std::net`.
pub mod host;

#[cfg(any(test, feature = "std"))]
pub mod test_support;

pub use config::{ConfigError, ServerConfig};
pub use credential::{CredentialMatcher, MatchOutcome};
pub use ring::RxRing;
pub use server::{ConnState, LoginServer, LoginStep, ResetReason, SessionTelemetry};
pub use transport::{IoStatus, Platform, Transport};
