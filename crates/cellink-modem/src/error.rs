//! Error taxonomy for the modem control engine.

use thiserror::Error;

use crate::session::AtCommand;

#[derive(Debug, Error)]
pub enum Error {
    /// The serial control channel could not be opened.
    #[error("modem device {path} unavailable: {reason}")]
    DeviceUnavailable { path: String, reason: String },
    /// The modem answered `ERROR`, or something other than `OK`.
    #[error("{command} rejected: {response:?}")]
    Rejected { command: AtCommand, response: String },
    /// The read budget ran out before any recognizable token arrived.
    #[error("{command} timed out: {response:?}")]
    Timeout { command: AtCommand, response: String },
    /// DHCP status missing or unparsable.
    #[error("modem reported no usable DHCP lease")]
    NoLease,
    /// A host network query or mutation failed.
    #[error("{operation} failed: {reason}")]
    Collaborator {
        operation: &'static str,
        reason: String,
    },
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn collaborator(operation: &'static str, reason: impl Into<String>) -> Self {
        Error::Collaborator {
            operation,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
