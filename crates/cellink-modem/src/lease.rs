//! # DHCP Lease Decoding
//!
//! Decodes the modem's `^DHCP` status line into a [`Lease`]. The payload
//! after the label is a comma list:
//!
//! ```text
//! ^DHCP:0100000A,00FFFFFF,0200000A,0200000A,0800000A,0900000A,150000000,50000000
//!       addr     mask     gateway  server   dns1     dns2     rx_bps    tx_bps
//! ```
//!
//! The six address words are little-endian hex, so `0100000A` is
//! `10.0.0.1`. The rate fields are link-speed hints and are kept as the
//! modem printed them. The last field usually drags the trailing `OK` along
//! with it; only its first whitespace-delimited token is the rate.

use std::fmt;
use std::net::Ipv4Addr;

/// Number of comma-separated fields a usable status line carries.
const LEASE_FIELDS: usize = 8;

/// Network parameters the modem negotiated for its data connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dhcp_server: Ipv4Addr,
    pub dns_primary: Ipv4Addr,
    pub dns_secondary: Ipv4Addr,
    /// Downlink rate as reported, undecoded.
    pub rx_max_bps: String,
    /// Uplink rate as reported, undecoded.
    pub tx_max_bps: String,
}

impl Lease {
    /// Total number of set bits in the netmask.
    ///
    /// This is a population count over all four octets, not the length of
    /// the leading run of ones: `255.0.255.0` yields 16.
    pub fn netmask_bits(&self) -> u8 {
        u32::from(self.netmask).count_ones() as u8
    }
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} gw {} dns {}",
            self.address,
            self.netmask_bits(),
            self.gateway,
            self.dns_primary
        )
    }
}

/// Decode a DHCP status response.
///
/// Returns `None` for anything that is not a complete lease: no colon,
/// fewer than eight fields, an address word that fails to decode, or an
/// empty uplink rate. The downlink rate is taken verbatim, empty or not.
pub fn parse_lease(raw: &str) -> Option<Lease> {
    let (_, payload) = raw.split_once(':')?;
    let fields: Vec<&str> = payload.split(',').collect();
    if fields.len() < LEASE_FIELDS {
        return None;
    }

    let mut words = [Ipv4Addr::UNSPECIFIED; 6];
    for (slot, field) in words.iter_mut().zip(&fields) {
        *slot = decode_le_hex(field)?;
    }
    let [address, netmask, gateway, dhcp_server, dns_primary, dns_secondary] = words;

    let rx_max_bps = fields[6].to_string();
    let tx_max_bps = fields[7].split_whitespace().next()?.to_string();

    Some(Lease {
        address,
        netmask,
        gateway,
        dhcp_server,
        dns_primary,
        dns_secondary,
        rx_max_bps,
        tx_max_bps,
    })
}

/// Decode one little-endian hex word into an address.
pub fn decode_le_hex(word: &str) -> Option<Ipv4Addr> {
    let value = u32::from_str_radix(word.trim(), 16).ok()?;
    Some(Ipv4Addr::from(value.to_le_bytes()))
}

/// Encode an address the way the modem reports it.
pub fn encode_le_hex(addr: Ipv4Addr) -> String {
    format!("{:08X}", u32::from_le_bytes(addr.octets()))
}
