use serde::{Deserialize, Serialize};
use std::fmt;

/// Default eISCP control port
pub const DEFAULT_PORT: u16 = 60128;

/// Zone used when a command does not name one
pub const DEFAULT_ZONE: &str = "main";

/// Receiver information reported in a discovery reply
///
/// Parsed from `!<category>ECN<model>/<port>/<area>/<identifier>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device category digit (1 = receiver)
    pub device_category: char,

    /// Model name, e.g. "TX-NR609"
    pub model_name: String,

    /// eISCP control port of the device
    pub iscp_port: u16,

    /// Two character destination area code, e.g. "DX"
    pub area_code: String,

    /// Unique device identifier (usually the MAC address), at most 12 chars
    pub identifier: String,
}

impl DeviceInfo {
    /// Parse the body of a discovery reply.
    ///
    /// Trailing terminators must already be stripped. Returns `None` if the
    /// text does not follow the reply grammar.
    pub fn parse(response: &str) -> Option<Self> {
        let rest = response.strip_prefix('!')?;
        let mut chars = rest.chars();
        let device_category = chars.next().filter(|c| c.is_ascii_digit())?;
        let rest = chars.as_str().strip_prefix("ECN")?;

        let (model_name, rest) = rest.split_once('/')?;
        let (port, rest) = rest.split_once('/')?;
        let (area_code, rest) = rest.split_once('/')?;

        if port.len() != 5 || !port.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let area_ok = area_code.chars().count() == 2
            && area_code.chars().all(|c| c.is_alphanumeric() || c == '_');
        if !area_ok {
            return None;
        }

        Some(Self {
            device_category,
            model_name: model_name.to_string(),
            iscp_port: port.parse().ok()?,
            area_code: area_code.to_string(),
            identifier: rest.chars().take(12).collect(),
        })
    }
}

/// Value part of a decoded wire command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandValue {
    /// Display name of a known value token, e.g. "on"
    Name(String),

    /// Hexadecimal value decoded to an integer, e.g. `MVL32` -> 50
    Number(i64),

    /// Remainder that matched nothing, returned verbatim (may be empty)
    Raw(String),
}

impl fmt::Display for CommandValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandValue::Name(name) => f.write_str(name),
            CommandValue::Number(n) => write!(f, "{}", n),
            CommandValue::Raw(raw) => f.write_str(raw),
        }
    }
}

/// A wire command translated back to human-readable form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedCommand {
    /// Zone whose table recognized the prefix
    pub zone: String,

    /// Display name of the command, e.g. "master-volume"
    pub name: String,

    /// Decoded value
    pub value: CommandValue,
}

impl fmt::Display for DecodedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}={}", self.zone, self.name, self.value)
    }
}
