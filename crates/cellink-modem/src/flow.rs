//! # Link Flows
//!
//! Top-level connect and disconnect. Each flow opens its own session,
//! runs the exchanges, hands the result to the reconciler, and drops the
//! session on every exit path.
//!
//! ```text
//! connect:    open → probe (ignored) → NDISDUP=1,1 → DHCP? → apply_lease
//! disconnect: open → NDISDUP=1,0 (+ grace) → teardown (always)
//! ```

use crate::config::ModemConfig;
use crate::error::{Error, Result};
use crate::lease::Lease;
use crate::reconcile::{apply_lease, teardown, NetworkReconciler};
use crate::session::{HangupOutcome, ModemSession};
use crate::transport::Transport;

/// Result of a connect that got as far as a lease.
#[derive(Debug)]
pub struct ConnectReport {
    pub lease: Lease,
    /// Reconciler steps that failed; the modem itself is online.
    pub failures: Vec<Error>,
}

/// Result of a disconnect. Teardown always runs, so both halves are kept.
#[derive(Debug)]
pub struct DisconnectReport {
    pub hangup: Result<HangupOutcome>,
    pub failures: Vec<Error>,
}

impl DisconnectReport {
    pub fn is_clean(&self) -> bool {
        self.hangup.is_ok() && self.failures.is_empty()
    }
}

/// Runs the connect and disconnect flows against one modem.
pub struct LinkController<'a, R: NetworkReconciler + ?Sized> {
    config: &'a ModemConfig,
    net: &'a R,
}

impl<'a, R: NetworkReconciler + ?Sized> LinkController<'a, R> {
    pub fn new(config: &'a ModemConfig, net: &'a R) -> Self {
        Self { config, net }
    }

    /// Bring the modem online and configure the host from its lease.
    ///
    /// `open` is called once to obtain the transport. No host state is
    /// touched unless the modem accepted the connect and reported a lease.
    pub fn connect<T, F>(&self, open: F) -> Result<ConnectReport>
    where
        T: Transport,
        F: FnOnce(&ModemConfig) -> Result<T>,
    {
        let mut session = ModemSession::new(open(self.config)?, self.config);

        if let Err(e) = session.probe() {
            tracing::warn!(error = %e, "modem probe failed, connecting anyway");
        }

        session.connect()?;
        tracing::info!(carrier = %self.config.carrier, "modem connected");

        let lease = session.dhcp_status()?.ok_or(Error::NoLease)?;
        drop(session);
        tracing::info!(%lease, "lease received");

        let failures = apply_lease(
            self.net,
            &self.config.interface,
            &self.config.dns_tag(),
            &lease,
        );
        Ok(ConnectReport { lease, failures })
    }

    /// Hang up and erase the host state belonging to the modem.
    ///
    /// Teardown runs even when the device cannot be opened or the hangup
    /// fails, so stale routes and DNS entries never outlive the link.
    pub fn disconnect<T, F>(&self, open: F) -> DisconnectReport
    where
        T: Transport,
        F: FnOnce(&ModemConfig) -> Result<T>,
    {
        let hangup = open(self.config).and_then(|transport| {
            let mut session = ModemSession::new(transport, self.config);
            session.hangup()
        });
        match &hangup {
            Ok(outcome) => tracing::info!(?outcome, "modem hung up"),
            Err(e) => tracing::warn!(error = %e, "hangup failed, tearing down anyway"),
        }

        let failures = teardown(self.net, &self.config.interface, &self.config.dns_tag());
        DisconnectReport { hangup, failures }
    }
}
