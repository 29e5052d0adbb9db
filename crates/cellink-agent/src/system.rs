//! Host network reconciler. Applies modem leases with `ip` and `resolvconf`.
//!
//! Interface addresses are read with `getifaddrs`; everything that mutates
//! state shells out, the same way an operator would by hand.

use std::io::Write;
use std::net::Ipv4Addr;
use std::process::{Command, Stdio};

use cellink_modem::{Error, GatewayRoute, InterfaceState, NetworkReconciler, Result};

/// [`NetworkReconciler`] backed by the running Linux host.
#[derive(Debug, Default)]
pub struct SystemReconciler;

impl NetworkReconciler for SystemReconciler {
    fn interface_state(&self, iface: &str) -> Result<Option<InterfaceState>> {
        read_iface_ipv4(iface)
    }

    fn set_interface_address(
        &self,
        iface: &str,
        address: Ipv4Addr,
        prefix_bits: u8,
    ) -> Result<()> {
        let cidr = format!("{address}/{prefix_bits}");
        run("ip", &["address", "add", &cidr, "dev", iface])
    }

    fn flush_interface_address(&self, iface: &str) -> Result<()> {
        run("ip", &["addr", "flush", "dev", iface])
    }

    fn default_gateway(&self, iface: Option<&str>) -> Result<Option<GatewayRoute>> {
        let output = capture("ip", &["-4", "route", "show", "default"])?;
        let route = parse_default_route(&output, iface);
        if let Some(r) = &route {
            tracing::debug!(gateway = %r.address, device = %r.device, "current gateway");
        }
        Ok(route)
    }

    fn set_default_gateway(&self, address: Ipv4Addr) -> Result<()> {
        run("ip", &["route", "add", "default", "via", &address.to_string()])
    }

    fn remove_default_gateway(&self, address: Ipv4Addr, device: &str) -> Result<()> {
        run(
            "ip",
            &["route", "del", "default", "via", &address.to_string(), "dev", device],
        )
    }

    fn add_dns_server(&self, address: Ipv4Addr, tag: &str) -> Result<()> {
        let mut child = Command::new("resolvconf")
            .args(["-a", tag])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::collaborator("resolvconf -a", e.to_string()))?;
        if let Some(mut stdin) = child.stdin.take() {
            writeln!(stdin, "nameserver {address}")
                .map_err(|e| Error::collaborator("resolvconf -a", e.to_string()))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| Error::collaborator("resolvconf -a", e.to_string()))?;
        check("resolvconf -a", &output)
    }

    fn remove_dns_server(&self, tag: &str) -> Result<()> {
        run("resolvconf", &["-d", tag])
    }
}

/// Pick the default route out of `ip -4 route show default` output.
///
/// Lines look like `default via 192.168.1.1 dev eth0 proto dhcp metric 100`.
/// With `iface` set, only a route leaving through that device counts.
pub fn parse_default_route(output: &str, iface: Option<&str>) -> Option<GatewayRoute> {
    output.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        if tokens.next()? != "default" {
            return None;
        }
        let mut address = None;
        let mut device = None;
        while let Some(key) = tokens.next() {
            match key {
                "via" => address = tokens.next().and_then(|v| v.parse::<Ipv4Addr>().ok()),
                "dev" => device = tokens.next(),
                _ => {}
            }
        }
        let route = GatewayRoute {
            address: address?,
            device: device?.to_string(),
        };
        match iface {
            Some(name) if route.device != name => None,
            _ => Some(route),
        }
    })
}

/// First IPv4 address and netmask on `iface`.
///
/// `None` if the interface does not exist; an interface without an IPv4
/// address yields an empty [`InterfaceState`]. Fails when the address list
/// cannot be read at all.
pub fn read_iface_ipv4(iface: &str) -> Result<Option<InterfaceState>> {
    let path = format!("/sys/class/net/{}/", iface);
    if !std::path::Path::new(&path).exists() {
        return Ok(None);
    }

    let mut state = InterfaceState::default();

    // Use libc getifaddrs for reliable interface address resolution.
    unsafe {
        let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
        getifaddrs_status(libc::getifaddrs(&mut ifaddrs))?;

        let mut current = ifaddrs;
        while !current.is_null() {
            let ifa = &*current;
            if !ifa.ifa_addr.is_null() {
                let name = std::ffi::CStr::from_ptr(ifa.ifa_name).to_string_lossy();
                if name == iface
                    && (*ifa.ifa_addr).sa_family == libc::AF_INET as libc::sa_family_t
                {
                    state.address = Some(sockaddr_ipv4(ifa.ifa_addr));
                    if !ifa.ifa_netmask.is_null() {
                        state.netmask = Some(sockaddr_ipv4(ifa.ifa_netmask));
                    }
                    break;
                }
            }
            current = ifa.ifa_next;
        }

        libc::freeifaddrs(ifaddrs);
    }

    Ok(Some(state))
}

fn getifaddrs_status(ret: libc::c_int) -> Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(Error::collaborator(
            "getifaddrs",
            std::io::Error::last_os_error().to_string(),
        ))
    }
}

unsafe fn sockaddr_ipv4(sa: *const libc::sockaddr) -> Ipv4Addr {
    let addr = unsafe { &*(sa as *const libc::sockaddr_in) };
    Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr))
}

fn run(program: &str, args: &[&str]) -> Result<()> {
    let label = command_label(program, args);
    tracing::trace!(command = %label, "running");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::collaborator("spawn", format!("{label}: {e}")))?;
    check_labelled(&label, &output)
}

fn capture(program: &str, args: &[&str]) -> Result<String> {
    let label = command_label(program, args);
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::collaborator("spawn", format!("{label}: {e}")))?;
    check_labelled(&label, &output)?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn check(operation: &'static str, output: &std::process::Output) -> Result<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(Error::collaborator(operation, failure_reason(output)))
    }
}

fn check_labelled(label: &str, output: &std::process::Output) -> Result<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(Error::collaborator(
            "host command",
            format!("{label}: {}", failure_reason(output)),
        ))
    }
}

fn failure_reason(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        output.status.to_string()
    } else {
        format!("{} ({stderr})", output.status)
    }
}

fn command_label(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}
