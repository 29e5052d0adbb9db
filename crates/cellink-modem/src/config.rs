use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_INTERFACE: &str = "wwan0";
pub const DEFAULT_CARRIER: &str = "h2g2";

/// Per-read timeout for ordinary exchanges.
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);
/// Extended wait for a hangup confirmation that did not arrive in time.
pub const HANGUP_GRACE: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModemConfigInput {
    pub device: Option<String>,
    pub baud_rate: Option<u32>,
    pub interface: Option<String>,
    pub carrier: Option<String>,
}

/// Settings fixed at startup and shared read-only by every exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModemConfig {
    /// Serial device carrying the AT control channel.
    pub device: String,
    pub baud_rate: u32,
    /// Host network interface the modem's data channel appears as.
    pub interface: String,
    /// Carrier APN passed to the connect command.
    pub carrier: String,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            interface: DEFAULT_INTERFACE.into(),
            carrier: DEFAULT_CARRIER.into(),
        }
    }
}

impl ModemConfig {
    pub fn read_timeout(&self) -> Duration {
        READ_TIMEOUT
    }

    pub fn hangup_grace(&self) -> Duration {
        HANGUP_GRACE
    }

    /// resolvconf record name for the modem's DNS server.
    pub fn dns_tag(&self) -> String {
        format!("{}.modem", self.interface)
    }

    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        ModemConfigInput::from_toml_str(input)?.resolve()
    }
}

impl ModemConfigInput {
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        if input.trim().is_empty() {
            return Ok(ModemConfigInput::default());
        }
        toml::from_str(input).map_err(|e| format!("Invalid config TOML: {}", e))
    }

    /// Read a config file, leaving resolution to the caller so command-line
    /// overrides can be layered on first.
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
        Self::from_toml_str(&text)
    }

    pub fn resolve(self) -> Result<ModemConfig, String> {
        let defaults = ModemConfig::default();

        let baud_rate = self.baud_rate.unwrap_or(defaults.baud_rate);
        if baud_rate == 0 {
            return Err("baud_rate must be positive".into());
        }

        let carrier = non_blank(self.carrier).unwrap_or(defaults.carrier);
        if carrier.chars().any(|c| c == '"' || c.is_control()) {
            return Err(format!("Carrier APN {:?} cannot be quoted in an AT command", carrier));
        }

        let interface = non_blank(self.interface).unwrap_or(defaults.interface);
        if interface.contains(char::is_whitespace) || interface.contains('/') {
            return Err(format!("Invalid interface name {:?}", interface));
        }

        Ok(ModemConfig {
            device: non_blank(self.device).unwrap_or(defaults.device),
            baud_rate,
            interface,
            carrier,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
