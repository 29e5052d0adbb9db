//! # cellink-modem
//!
//! Control engine for NDIS-mode cellular USB modems driven over an AT
//! command channel:
//!
//! - **lease**: decodes `^DHCP` status lines into a typed [`Lease`]
//! - **transport**: bounded command/response exchange over a serial port
//! - **session**: probe, connect, hangup (with delayed-OK tolerance), DHCP query
//! - **reconcile**: drives host address, route, and DNS from a lease
//! - **flow**: the connect and disconnect sequences tying it together

pub mod config;
pub mod error;
pub mod flow;
pub mod lease;
pub mod reconcile;
pub mod session;
pub mod transport;

pub use config::ModemConfig;
pub use error::{Error, Result};
pub use flow::{ConnectReport, DisconnectReport, LinkController};
pub use lease::{parse_lease, Lease};
pub use reconcile::{GatewayRoute, InterfaceState, NetworkReconciler};
pub use session::{AtCommand, Exchange, HangupOutcome, ModemSession, SessionState};
pub use transport::{exchange, SerialTransport, Transport};
