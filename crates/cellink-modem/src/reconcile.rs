//! # Host Network Reconciliation
//!
//! The engine never touches the OS directly. It drives a
//! [`NetworkReconciler`] with the lease it got from the modem, so tests can
//! substitute a recording fake and the binary can plug in `ip`/`resolvconf`.
//!
//! Each step is independent: a failed step is logged and collected, and the
//! remaining steps still run.

use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::lease::Lease;

/// IPv4 configuration currently on a host interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceState {
    pub address: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
}

/// A default route and the device it leaves through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRoute {
    pub address: Ipv4Addr,
    pub device: String,
}

/// Host network operations the link flows depend on.
///
/// Calls are made sequentially from the flow's thread.
pub trait NetworkReconciler {
    /// `Ok(None)` when the interface does not exist.
    fn interface_state(&self, iface: &str) -> Result<Option<InterfaceState>>;
    fn set_interface_address(
        &self,
        iface: &str,
        address: Ipv4Addr,
        prefix_bits: u8,
    ) -> Result<()>;
    fn flush_interface_address(&self, iface: &str) -> Result<()>;
    /// Current default route, restricted to `iface` when given.
    fn default_gateway(&self, iface: Option<&str>) -> Result<Option<GatewayRoute>>;
    fn set_default_gateway(&self, address: Ipv4Addr) -> Result<()>;
    fn remove_default_gateway(&self, address: Ipv4Addr, device: &str) -> Result<()>;
    fn add_dns_server(&self, address: Ipv4Addr, tag: &str) -> Result<()>;
    fn remove_dns_server(&self, tag: &str) -> Result<()>;
}

/// Bring `iface` in line with `lease`: address, default route, DNS.
///
/// Returns the failures of individual steps; an empty vec means every step
/// succeeded or had nothing to do.
pub fn apply_lease<R: NetworkReconciler + ?Sized>(
    net: &R,
    iface: &str,
    dns_tag: &str,
    lease: &Lease,
) -> Vec<Error> {
    let mut failures = Vec::new();

    if let Err(e) = apply_address(net, iface, lease) {
        tracing::warn!(interface = iface, error = %e, "address update failed");
        failures.push(e);
    }
    failures.extend(apply_gateway(net, iface, lease.gateway));
    match net.add_dns_server(lease.dns_primary, dns_tag) {
        Ok(()) => tracing::debug!(dns = %lease.dns_primary, tag = dns_tag, "DNS added"),
        Err(e) => {
            tracing::warn!(dns = %lease.dns_primary, error = %e, "DNS add failed");
            failures.push(e);
        }
    }

    failures
}

/// Remove everything [`apply_lease`] may have installed for `iface`.
pub fn teardown<R: NetworkReconciler + ?Sized>(
    net: &R,
    iface: &str,
    dns_tag: &str,
) -> Vec<Error> {
    let mut failures = Vec::new();

    match net.interface_state(iface) {
        Ok(Some(_)) => match net.flush_interface_address(iface) {
            Ok(()) => tracing::debug!(interface = iface, "address erased"),
            Err(e) => failures.push(e),
        },
        Ok(None) => tracing::debug!(interface = iface, "interface absent, nothing to erase"),
        Err(e) => failures.push(e),
    }

    match net.default_gateway(Some(iface)) {
        Ok(Some(route)) => match net.remove_default_gateway(route.address, iface) {
            Ok(()) => tracing::debug!(
                gateway = %route.address,
                interface = iface,
                "gateway removed"
            ),
            Err(e) => failures.push(e),
        },
        Ok(None) => {}
        Err(e) => failures.push(e),
    }

    match net.remove_dns_server(dns_tag) {
        Ok(()) => tracing::debug!(tag = dns_tag, "DNS removed"),
        Err(e) => failures.push(e),
    }

    for e in &failures {
        tracing::warn!(interface = iface, error = %e, "teardown step failed");
    }
    failures
}

fn apply_address<R: NetworkReconciler + ?Sized>(
    net: &R,
    iface: &str,
    lease: &Lease,
) -> Result<()> {
    let Some(current) = net.interface_state(iface)? else {
        tracing::warn!(interface = iface, "interface not found, leaving address alone");
        return Ok(());
    };
    if current.address == Some(lease.address) && current.netmask == Some(lease.netmask) {
        tracing::debug!(interface = iface, address = %lease.address, "address already current");
        return Ok(());
    }

    net.flush_interface_address(iface)?;
    net.set_interface_address(iface, lease.address, lease.netmask_bits())?;
    tracing::info!(
        interface = iface,
        address = %lease.address,
        prefix = lease.netmask_bits(),
        "interface address set"
    );
    Ok(())
}

fn apply_gateway<R: NetworkReconciler + ?Sized>(
    net: &R,
    iface: &str,
    gateway: Ipv4Addr,
) -> Vec<Error> {
    let mut failures = Vec::new();

    match net.default_gateway(Some(iface)) {
        Ok(Some(current)) if current.address == gateway => {
            tracing::debug!(%gateway, "gateway already set");
            return failures;
        }
        Ok(Some(current)) => {
            if let Err(e) = net.remove_default_gateway(current.address, &current.device) {
                tracing::warn!(
                    gateway = %current.address,
                    error = %e,
                    "old gateway removal failed"
                );
                failures.push(e);
            }
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(interface = iface, error = %e, "gateway query failed");
            failures.push(e);
        }
    }

    match net.set_default_gateway(gateway) {
        Ok(()) => tracing::info!(%gateway, "default gateway set"),
        Err(e) => {
            tracing::warn!(%gateway, error = %e, "gateway setup failed");
            failures.push(e);
        }
    }
    failures
}
