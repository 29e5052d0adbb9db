//! # Modem Session Protocol
//!
//! Sequences AT exchanges over a [`Transport`] into the four operations the
//! link flows need:
//!
//! ```text
//! Idle → Sent(Probe)     → Succeeded | Failed      AT
//! Idle → Sent(Connect)   → Succeeded | Failed      AT^NDISDUP=1,1,"<apn>"
//! Idle → Sent(Hangup)    → Succeeded | Failed      AT^NDISDUP=1,0  (+ grace read)
//! Idle → Sent(DhcpQuery) → Succeeded | Failed      AT^DHCP?
//! ```
//!
//! Every operation is a single request/response round except hangup. The
//! modem acknowledges `NDISDUP=1,0` before the radio link is actually torn
//! down, so a reply with neither `OK` nor `ERROR` means "still pending":
//! the session keeps reading on the same command with [`HANGUP_GRACE`]
//! instead of resending.
//!
//! [`HANGUP_GRACE`]: crate::config::HANGUP_GRACE

use std::fmt;
use std::time::Duration;

use crate::config::ModemConfig;
use crate::error::{Error, Result};
use crate::lease::{parse_lease, Lease};
use crate::transport::{exchange, Transport};

const PROBE_BUDGET: usize = 10;
const CONNECT_BUDGET: usize = 30;
const HANGUP_BUDGET: usize = 20;
const HANGUP_GRACE_BUDGET: usize = 10;
const DHCP_BUDGET: usize = 100;

/// The AT commands the session issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtCommand {
    Probe,
    Connect,
    Hangup,
    DhcpQuery,
}

impl AtCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            AtCommand::Probe => "probe",
            AtCommand::Connect => "connect",
            AtCommand::Hangup => "hangup",
            AtCommand::DhcpQuery => "dhcp query",
        }
    }

    fn read_budget(&self) -> usize {
        match self {
            AtCommand::Probe => PROBE_BUDGET,
            AtCommand::Connect => CONNECT_BUDGET,
            AtCommand::Hangup => HANGUP_BUDGET,
            AtCommand::DhcpQuery => DHCP_BUDGET,
        }
    }
}

impl fmt::Display for AtCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the session is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Sent(AtCommand),
    Succeeded(AtCommand),
    Failed(AtCommand),
}

/// Classified reply to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    Ok(String),
    Error(String),
    /// Neither token arrived before the read ended. Holds whatever partial
    /// text did arrive, possibly nothing.
    Timeout(String),
}

impl Exchange {
    /// Classify a raw reply by the literal `OK` / `ERROR` tokens it contains.
    /// `OK` wins when both are present.
    pub fn classify(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw).into_owned();
        if text.contains("OK") {
            Exchange::Ok(text)
        } else if text.contains("ERROR") {
            Exchange::Error(text)
        } else {
            Exchange::Timeout(text)
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Exchange::Ok(_))
    }

    pub fn text(&self) -> &str {
        match self {
            Exchange::Ok(t) | Exchange::Error(t) | Exchange::Timeout(t) => t,
        }
    }

    /// Turn a non-`OK` reply into the matching error for `command`.
    ///
    /// An empty read is a timeout. Any other reply without `OK`, `ERROR`
    /// included, is a rejection carrying the raw text.
    fn into_result(self, command: AtCommand) -> Result<String> {
        match self {
            Exchange::Ok(text) => Ok(text),
            Exchange::Timeout(text) if text.trim().is_empty() => Err(Error::Timeout {
                command,
                response: text,
            }),
            Exchange::Error(text) | Exchange::Timeout(text) => Err(Error::Rejected {
                command,
                response: text,
            }),
        }
    }
}

/// How a successful hangup was confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HangupOutcome {
    /// `OK` arrived within the first read.
    Confirmed,
    /// `OK` only arrived during the grace read.
    Delayed,
}

/// An open AT control channel plus the settings its exchanges need.
///
/// Dropping the session drops the transport, which closes the port.
pub struct ModemSession<T: Transport> {
    transport: T,
    carrier: String,
    read_timeout: Duration,
    hangup_grace: Duration,
    state: SessionState,
}

impl<T: Transport> ModemSession<T> {
    pub fn new(transport: T, config: &ModemConfig) -> Self {
        Self {
            transport,
            carrier: config.carrier.clone(),
            read_timeout: config.read_timeout(),
            hangup_grace: config.hangup_grace(),
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Give the transport back, e.g. to inspect a scripted one.
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Liveness check. Succeeds iff the modem answers `OK`.
    pub fn probe(&mut self) -> Result<()> {
        let reply = self.round(AtCommand::Probe)?;
        self.finish(AtCommand::Probe, reply.into_result(AtCommand::Probe))
            .map(drop)
    }

    /// Bring the data connection up on the configured carrier APN.
    pub fn connect(&mut self) -> Result<()> {
        let reply = self.round(AtCommand::Connect)?;
        self.finish(AtCommand::Connect, reply.into_result(AtCommand::Connect))
            .map(drop)
    }

    /// Drop the data connection, tolerating a late `OK`.
    pub fn hangup(&mut self) -> Result<HangupOutcome> {
        let outcome = self.hangup_rounds();
        self.finish(AtCommand::Hangup, outcome)
    }

    fn hangup_rounds(&mut self) -> Result<HangupOutcome> {
        let command = AtCommand::Hangup;
        match self.round(command)? {
            Exchange::Ok(_) => Ok(HangupOutcome::Confirmed),
            Exchange::Error(text) => Err(Error::Rejected {
                command,
                response: text,
            }),
            Exchange::Timeout(text) => {
                tracing::debug!(
                    response = ?text,
                    grace_s = self.hangup_grace.as_secs(),
                    "hangup not yet acknowledged, waiting"
                );
                let late = self
                    .transport
                    .read_bounded(HANGUP_GRACE_BUDGET, self.hangup_grace)?;
                match Exchange::classify(&late) {
                    Exchange::Ok(text) => {
                        tracing::debug!(response = ?text, "hangup delayed response");
                        Ok(HangupOutcome::Delayed)
                    }
                    other => Err(Error::Timeout {
                        command,
                        response: other.text().to_string(),
                    }),
                }
            }
        }
    }

    /// Ask the modem for its DHCP status.
    ///
    /// `Ok(None)` when the reply lacks `OK` or its payload does not decode.
    pub fn dhcp_status(&mut self) -> Result<Option<Lease>> {
        let command = AtCommand::DhcpQuery;
        let reply = self.round(command)?;
        let lease = match reply {
            Exchange::Ok(text) => {
                let lease = parse_lease(&text);
                if lease.is_none() {
                    tracing::debug!(response = ?text, "DHCP status did not decode");
                }
                lease
            }
            other => {
                tracing::debug!(response = ?other.text(), "DHCP status not acknowledged");
                None
            }
        };
        self.state = if lease.is_some() {
            SessionState::Succeeded(command)
        } else {
            SessionState::Failed(command)
        };
        Ok(lease)
    }

    fn command_line(&self, command: AtCommand) -> String {
        match command {
            AtCommand::Probe => "AT".to_string(),
            AtCommand::Connect => format!("AT^NDISDUP=1,1,\"{}\"", self.carrier),
            AtCommand::Hangup => "AT^NDISDUP=1,0".to_string(),
            AtCommand::DhcpQuery => "AT^DHCP?".to_string(),
        }
    }

    fn round(&mut self, command: AtCommand) -> Result<Exchange> {
        let line = self.command_line(command);
        self.state = SessionState::Sent(command);
        let raw = match exchange(
            &mut self.transport,
            &line,
            command.read_budget(),
            self.read_timeout,
        ) {
            Ok(raw) => raw,
            Err(e) => {
                self.state = SessionState::Failed(command);
                return Err(e);
            }
        };
        let reply = Exchange::classify(&raw);
        tracing::debug!(%command, response = ?reply.text(), "modem reply");
        Ok(reply)
    }

    fn finish<R>(&mut self, command: AtCommand, result: Result<R>) -> Result<R> {
        self.state = match &result {
            Ok(_) => SessionState::Succeeded(command),
            Err(_) => SessionState::Failed(command),
        };
        result
    }
}
