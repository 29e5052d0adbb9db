//! cellink
//!
//! Brings an NDIS cellular modem online or offline and keeps the host's
//! address, default route, and DNS in step with it.
//!
//! - `-c` probes the modem, dials the carrier APN, reads the DHCP lease,
//!   and applies it to the interface
//! - `-d` hangs up and removes whatever the modem had installed
//!
//! Modem and host failures are logged, not turned into an exit status: the
//! process exits 0 once it has run its flows, so callers must read the log.

mod system;

use std::path::PathBuf;

use cellink_modem::config::ModemConfigInput;
use cellink_modem::{LinkController, ModemConfig, SerialTransport};
use clap::{ArgAction, CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::system::SystemReconciler;

/// Cellular modem link control.
#[derive(Parser, Debug)]
#[command(name = "cellink", about = "Connect or disconnect an NDIS cellular modem")]
struct Cli {
    /// Connect modem to network.
    #[arg(short, long, action = ArgAction::Count)]
    connect: u8,

    /// Disconnect modem from network.
    #[arg(short, long, action = ArgAction::Count)]
    disconnect: u8,

    /// Increase output verbosity (-v errors, -vv everything).
    #[arg(short, long, action = ArgAction::Count)]
    verbosity: u8,

    /// TOML file with device, baud_rate, interface, and carrier.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial device for AT commands.
    #[arg(long)]
    device: Option<String>,

    /// Network interface the modem appears as.
    #[arg(long)]
    interface: Option<String>,

    /// Carrier APN.
    #[arg(long)]
    carrier: Option<String>,
}

impl Cli {
    fn wants_connect(&self) -> bool {
        self.connect > 0
    }

    fn wants_disconnect(&self) -> bool {
        self.disconnect > 0
    }

    fn modem_config(&self) -> anyhow::Result<ModemConfig> {
        let mut input = match &self.config {
            Some(path) => ModemConfigInput::load(path).map_err(|e| anyhow::anyhow!(e))?,
            None => ModemConfigInput::default(),
        };
        if self.device.is_some() {
            input.device = self.device.clone();
        }
        if self.interface.is_some() {
            input.interface = self.interface.clone();
        }
        if self.carrier.is_some() {
            input.carrier = self.carrier.clone();
        }
        input
            .resolve()
            .map_err(|e| anyhow::anyhow!("Invalid modem config: {}", e))
    }
}

/// Log filter for a `-v` count when `RUST_LOG` is not set.
fn verbosity_filter(count: u8) -> &'static str {
    match count {
        0 => "off",
        1 => "warn",
        2 => "debug",
        _ => "trace",
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(verbosity_filter(cli.verbosity))),
        )
        .with_target(false)
        .compact()
        .init();

    if !cli.wants_connect() && !cli.wants_disconnect() {
        Cli::command().print_help()?;
        return Ok(());
    }

    let config = cli.modem_config()?;
    let net = SystemReconciler;
    let controller = LinkController::new(&config, &net);

    if cli.wants_connect() {
        tracing::info!(
            device = %config.device,
            interface = %config.interface,
            "connecting with modem"
        );
        match controller.connect(SerialTransport::open) {
            Ok(report) => {
                tracing::info!(lease = %report.lease, "modem online");
                for e in &report.failures {
                    tracing::warn!(error = %e, "host configuration incomplete");
                }
            }
            Err(e) => tracing::error!(error = %e, "connect failed"),
        }
    }

    if cli.wants_disconnect() {
        tracing::info!(
            device = %config.device,
            interface = %config.interface,
            "disconnecting modem"
        );
        let report = controller.disconnect(SerialTransport::open);
        if report.is_clean() {
            tracing::info!("modem offline");
        } else {
            if let Err(e) = &report.hangup {
                tracing::error!(error = %e, "hangup failed");
            }
            for e in &report.failures {
                tracing::warn!(error = %e, "host teardown incomplete");
            }
        }
    }

    Ok(())
}
