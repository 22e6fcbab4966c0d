//! Service configuration: one `[[connection]]` table per serial line.

use df1::checksum::Mode;
use df1::connection::{Duplex, LineSettings};
use serde_derive::Deserialize;
use std::path::Path;

pub const BAUD_RATES: [u32; 8] = [110, 300, 600, 1200, 2400, 9600, 19200, 38400];

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(rename = "connection", default)]
    pub connections: Vec<ConnectionConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    pub name: String,
    pub device: String,
    pub port: u16,
    #[serde(default = "default_duplex")]
    pub duplex: String,
    #[serde(default = "default_error_detect")]
    pub error_detect: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_duplicate_detect")]
    pub duplicate_detect: String,
    #[serde(default = "default_max_nak")]
    pub max_nak: u8,
    #[serde(default = "default_max_enq")]
    pub max_enq: u8,
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout: u32,
}

fn default_duplex() -> String {
    "full".to_string()
}

fn default_error_detect() -> String {
    "crc".to_string()
}

fn default_baud() -> u32 {
    19200
}

fn default_duplicate_detect() -> String {
    "yes".to_string()
}

fn default_max_nak() -> u8 {
    3
}

fn default_max_enq() -> u8 {
    3
}

fn default_ack_timeout() -> u32 {
    1000
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, String> {
        let config: Config = serdeconv::from_toml_file(path).map_err(|err| err.to_string())?;

        if config.connections.is_empty() {
            return Err("configuration defines no connections".to_string());
        }

        for connection in &config.connections {
            connection.settings()?;
        }

        Ok(config)
    }
}

impl ConnectionConfig {
    /// Validate and translate into the link settings the core consumes.
    pub fn settings(&self) -> Result<LineSettings, String> {
        let duplex = match self.duplex.as_str() {
            "full" => Duplex::Full,
            "master" => Duplex::HalfMaster,
            "slave" => Duplex::HalfSlave,
            other => return Err(format!("{}: unknown duplex mode '{}'", self.name, other)),
        };

        let mode = match self.error_detect.as_str() {
            "crc" => Mode::Crc,
            "bcc" => Mode::Bcc,
            other => return Err(format!("{}: unknown error detection '{}'", self.name, other)),
        };

        let duplicate_detect = match self.duplicate_detect.as_str() {
            "yes" => true,
            "no" => false,
            other => return Err(format!("{}: duplicate_detect must be yes or no, got '{}'", self.name, other)),
        };

        if !BAUD_RATES.contains(&self.baud) {
            return Err(format!("{}: unsupported baud rate {}", self.name, self.baud));
        }

        Ok(LineSettings {
            name: self.name.clone(),
            mode,
            duplex,
            baud: self.baud,
            duplicate_detect,
            max_nak: self.max_nak,
            max_enq: self.max_enq,
            ack_timeout_ms: self.ack_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        serdeconv::from_toml_str(toml).unwrap()
    }

    #[test]
    fn test_full_connection() {
        let config = parse(
            r#"
[[connection]]
name = "line0"
device = "/dev/ttyS0"
port = 2101
duplex = "full"
error_detect = "bcc"
baud = 9600
duplicate_detect = "no"
max_nak = 5
max_enq = 2
ack_timeout = 250
"#,
        );

        let settings = config.connections[0].settings().unwrap();

        assert_eq!(settings.name, "line0");
        assert_eq!(settings.mode, Mode::Bcc);
        assert_eq!(settings.duplex, Duplex::Full);
        assert_eq!(settings.baud, 9600);
        assert!(!settings.duplicate_detect);
        assert_eq!(settings.max_nak, 5);
        assert_eq!(settings.max_enq, 2);
        assert_eq!(settings.ack_timeout_ms, 250);
    }

    #[test]
    fn test_defaults() {
        let config = parse(
            r#"
[[connection]]
name = "line0"
device = "/dev/ttyS0"
port = 2101
"#,
        );

        let settings = config.connections[0].settings().unwrap();

        assert_eq!(settings.mode, Mode::Crc);
        assert_eq!(settings.duplex, Duplex::Full);
        assert_eq!(settings.baud, 19200);
        assert!(settings.duplicate_detect);
        assert_eq!(settings.max_nak, 3);
        assert_eq!(settings.max_enq, 3);
        assert_eq!(settings.ack_timeout_ms, 1000);
    }

    #[test]
    fn test_rejects_bad_values() {
        let base = r#"
[[connection]]
name = "line0"
device = "/dev/ttyS0"
port = 2101
"#;

        let config = parse(&format!("{}duplex = \"simplex\"\n", base));
        assert!(config.connections[0].settings().is_err());

        let config = parse(&format!("{}error_detect = \"parity\"\n", base));
        assert!(config.connections[0].settings().is_err());

        let config = parse(&format!("{}baud = 115200\n", base));
        assert!(config.connections[0].settings().is_err());

        let config = parse(&format!("{}duplicate_detect = \"maybe\"\n", base));
        assert!(config.connections[0].settings().is_err());
    }

    #[test]
    fn test_half_duplex_modes_parse() {
        for duplex in &["master", "slave"] {
            let config = parse(&format!(
                "[[connection]]\nname = \"x\"\ndevice = \"/dev/null\"\nport = 1\nduplex = \"{}\"\n",
                duplex
            ));
            assert!(config.connections[0].settings().is_ok());
        }
    }
}
