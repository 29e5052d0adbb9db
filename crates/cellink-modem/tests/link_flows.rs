//! Integration tests for the connect and disconnect flows.
//!
//! A scripted transport stands in for the modem and a recording reconciler
//! stands in for the host, so each test checks both the AT traffic and the
//! exact host mutations a flow performs.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::Duration;

use cellink_modem::{
    Error, GatewayRoute, HangupOutcome, InterfaceState, LinkController, ModemConfig,
    NetworkReconciler, Result, Transport,
};

const DHCP_REPLY: &[u8] =
    b"^DHCP:0100000A,00FFFFFF,0200000A,0200000A,0800000A,0900000A,150000000,50000000\r\nOK\r\n";

// ─── Mock Infrastructure ────────────────────────────────────────────────

#[derive(Default)]
struct ScriptedModem {
    sent: Vec<String>,
    replies: VecDeque<Vec<u8>>,
    reads: Vec<(usize, Duration)>,
}

impl ScriptedModem {
    fn new(replies: &[&[u8]]) -> Self {
        Self {
            replies: replies.iter().map(|r| r.to_vec()).collect(),
            ..Default::default()
        }
    }
}

impl Transport for ScriptedModem {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.sent.push(String::from_utf8_lossy(bytes).into_owned());
        Ok(())
    }

    fn read_bounded(&mut self, budget: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.reads.push((budget, timeout));
        let mut reply = self.replies.pop_front().unwrap_or_default();
        reply.truncate(budget);
        Ok(reply)
    }
}

struct RecordingHost {
    state: Mutex<Option<InterfaceState>>,
    gateway: Mutex<Option<GatewayRoute>>,
    calls: Mutex<Vec<String>>,
}

impl RecordingHost {
    fn new(state: Option<InterfaceState>, gateway: Option<GatewayRoute>) -> Self {
        Self {
            state: Mutex::new(state),
            gateway: Mutex::new(gateway),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl NetworkReconciler for RecordingHost {
    fn interface_state(&self, _iface: &str) -> Result<Option<InterfaceState>> {
        Ok(*self.state.lock().unwrap())
    }

    fn set_interface_address(&self, iface: &str, address: Ipv4Addr, bits: u8) -> Result<()> {
        self.log(format!("addr set {iface} {address}/{bits}"));
        Ok(())
    }

    fn flush_interface_address(&self, iface: &str) -> Result<()> {
        self.log(format!("addr flush {iface}"));
        Ok(())
    }

    fn default_gateway(&self, _iface: Option<&str>) -> Result<Option<GatewayRoute>> {
        Ok(self.gateway.lock().unwrap().clone())
    }

    fn set_default_gateway(&self, address: Ipv4Addr) -> Result<()> {
        self.log(format!("gw set {address}"));
        Ok(())
    }

    fn remove_default_gateway(&self, address: Ipv4Addr, device: &str) -> Result<()> {
        self.log(format!("gw del {address} {device}"));
        Ok(())
    }

    fn add_dns_server(&self, address: Ipv4Addr, tag: &str) -> Result<()> {
        self.log(format!("dns add {address} {tag}"));
        Ok(())
    }

    fn remove_dns_server(&self, tag: &str) -> Result<()> {
        self.log(format!("dns del {tag}"));
        Ok(())
    }
}

/// Hand a borrowed scripted modem to a flow so it can be inspected after.
fn opener<'m>(
    modem: &'m mut ScriptedModem,
) -> impl FnOnce(&ModemConfig) -> Result<&'m mut ScriptedModem> {
    move |_| Ok(modem)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn wwan0_gateway() -> Option<GatewayRoute> {
    Some(GatewayRoute {
        address: Ipv4Addr::new(10, 0, 0, 2),
        device: "wwan0".into(),
    })
}

// ─── Connect ────────────────────────────────────────────────────────────

#[test]
fn connect_configures_host_from_lease() {
    init_tracing();
    let config = ModemConfig::default();
    let host = RecordingHost::new(
        Some(InterfaceState {
            address: Some(Ipv4Addr::new(192, 168, 8, 100)),
            netmask: Some(Ipv4Addr::new(255, 255, 255, 0)),
        }),
        None,
    );
    let mut modem = ScriptedModem::new(&[b"\r\nOK\r\n", b"\r\nOK\r\n", DHCP_REPLY]);

    let report = LinkController::new(&config, &host)
        .connect(opener(&mut modem))
        .unwrap();

    assert_eq!(report.lease.address, Ipv4Addr::new(10, 0, 0, 1));
    assert_eq!(report.lease.netmask_bits(), 24);
    assert!(report.failures.is_empty());

    assert_eq!(
        modem.sent,
        vec!["AT\r", "AT^NDISDUP=1,1,\"h2g2\"\r", "AT^DHCP?\r"]
    );
    assert_eq!(host.count("addr set"), 1);
    assert_eq!(
        host.calls(),
        vec![
            "addr flush wwan0",
            "addr set wwan0 10.0.0.1/24",
            "gw set 10.0.0.2",
            "dns add 10.0.0.8 wwan0.modem",
        ]
    );
}

#[test]
fn connect_proceeds_when_probe_fails() {
    init_tracing();
    let config = ModemConfig::default();
    let host = RecordingHost::new(Some(InterfaceState::default()), None);
    let mut modem = ScriptedModem::new(&[b"", b"\r\nOK\r\n", DHCP_REPLY]);

    let report = LinkController::new(&config, &host)
        .connect(opener(&mut modem))
        .unwrap();

    assert_eq!(report.lease.gateway, Ipv4Addr::new(10, 0, 0, 2));
    assert_eq!(modem.sent.len(), 3);
}

#[test]
fn connect_rejected_leaves_host_untouched() {
    init_tracing();
    let config = ModemConfig::default();
    let host = RecordingHost::new(Some(InterfaceState::default()), None);
    let mut modem = ScriptedModem::new(&[b"\r\nOK\r\n", b"\r\nERROR\r\n"]);

    let err = LinkController::new(&config, &host)
        .connect(opener(&mut modem))
        .unwrap_err();

    assert!(matches!(err, Error::Rejected { .. }), "{err}");
    // no DHCP query after a rejected connect
    assert_eq!(modem.sent.len(), 2);
    assert!(host.calls().is_empty());
}

#[test]
fn connect_without_lease_leaves_host_untouched() {
    init_tracing();
    let config = ModemConfig::default();
    let host = RecordingHost::new(Some(InterfaceState::default()), None);
    let mut modem = ScriptedModem::new(&[
        b"\r\nOK\r\n",
        b"\r\nOK\r\n",
        b"^DHCP:garbage\r\nOK\r\n",
    ]);

    let err = LinkController::new(&config, &host)
        .connect(opener(&mut modem))
        .unwrap_err();

    assert!(matches!(err, Error::NoLease));
    assert!(host.calls().is_empty());
}

#[test]
fn connect_with_unavailable_device_fails_early() {
    init_tracing();
    let config = ModemConfig::default();
    let host = RecordingHost::new(Some(InterfaceState::default()), None);

    let err = LinkController::new(&config, &host)
        .connect(|cfg| -> Result<ScriptedModem> {
            Err(Error::DeviceUnavailable {
                path: cfg.device.clone(),
                reason: "No such file or directory".into(),
            })
        })
        .unwrap_err();

    assert!(err.to_string().contains("/dev/ttyUSB0"), "{err}");
    assert!(host.calls().is_empty());
}

#[test]
fn connect_skips_address_when_already_current() {
    init_tracing();
    let config = ModemConfig::default();
    let host = RecordingHost::new(
        Some(InterfaceState {
            address: Some(Ipv4Addr::new(10, 0, 0, 1)),
            netmask: Some(Ipv4Addr::new(255, 255, 255, 0)),
        }),
        wwan0_gateway(),
    );
    let mut modem = ScriptedModem::new(&[b"\r\nOK\r\n", b"\r\nOK\r\n", DHCP_REPLY]);

    LinkController::new(&config, &host)
        .connect(opener(&mut modem))
        .unwrap();

    assert_eq!(host.calls(), vec!["dns add 10.0.0.8 wwan0.modem"]);
}

#[test]
fn connect_accepts_lease_with_unreadable_rates() {
    init_tracing();
    let config = ModemConfig::default();
    let host = RecordingHost::new(Some(InterfaceState::default()), None);
    let mut modem = ScriptedModem::new(&[
        b"\r\nOK\r\n",
        b"\r\nOK\r\n",
        b"^DHCP:0100000A,00FFFFFF,0200000A,0200000A,0800000A,0900000A,,1.5e8\r\nOK\r\n",
    ]);

    let report = LinkController::new(&config, &host)
        .connect(opener(&mut modem))
        .unwrap();

    assert_eq!(report.lease.rx_max_bps, "");
    assert_eq!(report.lease.tx_max_bps, "1.5e8");
    assert_eq!(host.count("addr set wwan0 10.0.0.1/24"), 1);
    assert_eq!(host.count("gw set 10.0.0.2"), 1);
}

// ─── Disconnect ─────────────────────────────────────────────────────────

#[test]
fn disconnect_confirmed_hangup_tears_down() {
    init_tracing();
    let config = ModemConfig::default();
    let host = RecordingHost::new(Some(InterfaceState::default()), wwan0_gateway());
    let mut modem = ScriptedModem::new(&[b"\r\nOK\r\n"]);

    let report = LinkController::new(&config, &host).disconnect(opener(&mut modem));

    assert!(matches!(report.hangup, Ok(HangupOutcome::Confirmed)));
    assert!(report.is_clean());
    assert_eq!(modem.sent, vec!["AT^NDISDUP=1,0\r"]);
    assert_eq!(
        host.calls(),
        vec!["addr flush wwan0", "gw del 10.0.0.2 wwan0", "dns del wwan0.modem"]
    );
}

#[test]
fn disconnect_tolerates_delayed_ok() {
    init_tracing();
    let config = ModemConfig::default();
    let host = RecordingHost::new(Some(InterfaceState::default()), None);
    let mut modem = ScriptedModem::new(&[b"\r\n", b"\r\nOK\r\n"]);

    let report = LinkController::new(&config, &host).disconnect(opener(&mut modem));

    assert!(matches!(report.hangup, Ok(HangupOutcome::Delayed)));
    assert_eq!(modem.sent.len(), 1, "grace read must not resend");
    assert_eq!(
        modem.reads,
        vec![(20, Duration::from_secs(2)), (10, Duration::from_secs(20))]
    );
}

#[test]
fn disconnect_tears_down_after_rejected_hangup() {
    init_tracing();
    let config = ModemConfig::default();
    let host = RecordingHost::new(Some(InterfaceState::default()), wwan0_gateway());
    let mut modem = ScriptedModem::new(&[b"\r\nERROR\r\n"]);

    let report = LinkController::new(&config, &host).disconnect(opener(&mut modem));

    assert!(matches!(report.hangup, Err(Error::Rejected { .. })));
    assert!(!report.is_clean());
    assert_eq!(modem.reads.len(), 1);
    assert_eq!(host.count("addr flush"), 1);
    assert_eq!(host.count("gw del"), 1);
    assert_eq!(host.count("dns del"), 1);
}

#[test]
fn disconnect_tears_down_when_device_missing() {
    init_tracing();
    let config = ModemConfig::default();
    let host = RecordingHost::new(Some(InterfaceState::default()), wwan0_gateway());

    let report = LinkController::new(&config, &host).disconnect(|cfg| -> Result<ScriptedModem> {
        Err(Error::DeviceUnavailable {
            path: cfg.device.clone(),
            reason: "Permission denied".into(),
        })
    });

    assert!(matches!(report.hangup, Err(Error::DeviceUnavailable { .. })));
    assert_eq!(
        host.calls(),
        vec!["addr flush wwan0", "gw del 10.0.0.2 wwan0", "dns del wwan0.modem"]
    );
}

#[test]
fn disconnect_timed_out_hangup_still_tears_down() {
    init_tracing();
    let config = ModemConfig::default();
    let host = RecordingHost::new(None, None);
    let mut modem = ScriptedModem::new(&[]);

    let report = LinkController::new(&config, &host).disconnect(opener(&mut modem));

    assert!(matches!(report.hangup, Err(Error::Timeout { .. })));
    assert_eq!(host.calls(), vec!["dns del wwan0.modem"]);
}
