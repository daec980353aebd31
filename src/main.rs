// Author: Lukas Bower
// Purpose: Host entry point serving the login console over TCP with an echo interpreter.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Host entry point for the login console.

use std::env;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser};
use env_logger::Env;
use log::{info, LevelFilter};

use login_console::config::{DEFAULT_LISTEN_PORT, DEFAULT_TICK_PERIOD_MS, LOGIN_TIMEOUT_MS};
use login_console::host::{HostPlatform, TcpTransport};
use login_console::{LoginServer, Platform, ServerConfig, Transport};

const PROMPT: &[u8] = b">>> ";
const ENV_PREFIX: &str = "LOGIN_CONSOLE_";

/// Login console command-line arguments.
#[derive(Debug, Parser)]
#[command(author = "Lukas Bower", version, about = "Telnet-style login console", long_about = None)]
struct Cli {
    /// Address the listener binds to.
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// TCP port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Username expected at the `Login as:` prompt.
    #[arg(long)]
    user: Option<String>,

    /// Password expected at the `Password:` prompt.
    #[arg(long)]
    password: Option<String>,

    /// Scheduler period in milliseconds.
    #[arg(long)]
    tick_ms: Option<u32>,

    /// Idle period in milliseconds before a client is dropped.
    #[arg(long)]
    timeout_ms: Option<u32>,

    /// Stop after this many ticks instead of running forever.
    #[arg(long)]
    ticks: Option<u64>,

    /// Raise the log level; repeat for trace output.
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

/// Resolve a setting from the CLI, falling back to `LOGIN_CONSOLE_<name>`.
///
/// Blank variables count as unset.
fn env_override<T>(cli_value: Option<T>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    if cli_value.is_some() {
        return Ok(cli_value);
    }
    let key = format!("{ENV_PREFIX}{name}");
    let raw = match env::var(&key) {
        Ok(raw) => raw,
        Err(env::VarError::NotPresent) => return Ok(None),
        Err(err) => return Err(anyhow!("failed to read {key}: {err}")),
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|err| anyhow!("invalid {key} value '{trimmed}': {err}"))
}

fn build_config(cli: &Cli) -> Result<ServerConfig> {
    let port = env_override(cli.port, "PORT")?.unwrap_or(DEFAULT_LISTEN_PORT);
    let tick_ms = env_override(cli.tick_ms, "TICK_MS")?.unwrap_or(DEFAULT_TICK_PERIOD_MS);
    let timeout_ms = env_override(cli.timeout_ms, "TIMEOUT_MS")?.unwrap_or(LOGIN_TIMEOUT_MS);

    let mut config = ServerConfig::default()
        .with_port(port)
        .with_timing(timeout_ms, tick_ms);
    let user = env_override(cli.user.clone(), "USER")?;
    let password = env_override(cli.password.clone(), "PASSWORD")?;
    if user.is_some() || password.is_some() {
        let user = user.unwrap_or_else(|| config.user.as_str().to_owned());
        let password = password.unwrap_or_else(|| config.password.as_str().to_owned());
        config = config
            .with_credentials(&user, &password)
            .context("invalid credentials")?;
    }
    config.validate().context("invalid console configuration")?;
    Ok(config)
}

/// Line-echoing stand-in for the interpreter behind the console.
#[derive(Debug, Default)]
struct EchoRepl {
    line: Vec<u8>,
    prompted: bool,
}

impl EchoRepl {
    fn poll<T: Transport, P: Platform>(&mut self, server: &mut LoginServer<T, P>) {
        if !server.is_active() {
            self.line.clear();
            self.prompted = false;
            return;
        }
        if !self.prompted {
            server.write_raw(PROMPT);
            self.prompted = true;
        }
        while server.rx_any() {
            let Some(byte) = server.rx_char() else {
                break;
            };
            match byte {
                b'\r' => {
                    server.write_cooked(b"\n");
                    if !self.line.is_empty() {
                        server.write_cooked(&self.line);
                        server.write_cooked(b"\n");
                    }
                    server.write_raw(PROMPT);
                    self.line.clear();
                }
                b'\n' | 0 => {}
                0x08 | 0x7f => {
                    if self.line.pop().is_some() {
                        server.write_raw(b"\x08 \x08");
                    }
                }
                byte => {
                    self.line.push(byte);
                    server.write_raw(&[byte]);
                }
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = build_config(&cli)?;
    let tick = Duration::from_millis(u64::from(config.tick_period_ms));
    info!(
        "[login-console] serving on {}:{} (tick {} ms, idle limit {} ticks)",
        cli.bind,
        config.listen_port,
        config.tick_period_ms,
        config.timeout_threshold()
    );

    let mut server = LoginServer::new(config, TcpTransport::new(cli.bind), HostPlatform)
        .context("failed to build login console")?;
    server.enable();
    let mut repl = EchoRepl::default();

    let mut elapsed = 0u64;
    while cli.ticks.map_or(true, |limit| elapsed < limit) {
        server.run();
        repl.poll(&mut server);
        thread::sleep(tick);
        elapsed += 1;
    }

    server.disable();
    let telemetry = server.telemetry();
    info!(
        "[login-console] shutdown: connections={} logins={} failures={} resets={}",
        telemetry.connections, telemetry.logins, telemetry.login_failures, telemetry.resets
    );
    Ok(())
}
