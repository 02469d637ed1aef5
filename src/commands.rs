//! Translation between human-readable commands and eISCP wire commands
//!
//! The command table is plain data (zone -> prefix -> values) loaded once
//! from JSON. A [`Translator`] indexes it for alias lookups and is then
//! shared read-only.

use crate::error::{IscpError, Result};
use crate::types::{CommandValue, DecodedCommand, DEFAULT_ZONE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;

const BUILTIN_COMMANDS: &str = include_str!("../data/commands.json");

/// One name or a list of alias names, the first being the display name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Names {
    One(String),
    Many(Vec<String>),
}

impl Names {
    /// The display name
    pub fn primary(&self) -> Option<&str> {
        match self {
            Names::One(name) => Some(name.as_str()),
            Names::Many(names) => names.first().map(String::as_str),
        }
    }

    /// All names, display name first
    pub fn all(&self) -> Vec<&str> {
        match self {
            Names::One(name) => vec![name.as_str()],
            Names::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// Description of one value a command accepts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueDescriptor {
    #[serde(default)]
    pub name: Option<Names>,
    #[serde(default)]
    pub description: String,
}

/// Description of one 3-character command prefix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub name: Names,
    #[serde(default)]
    pub description: String,
    /// Value token -> descriptor. Tokens are literals (`"01"`), decimal
    /// ranges (`"0-100"`) or placeholder patterns (`"nnnnn"`).
    #[serde(default)]
    pub values: BTreeMap<String, ValueDescriptor>,
}

/// Commands of one zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneDescriptor {
    pub name: String,
    pub commands: BTreeMap<String, CommandDescriptor>,
}

/// The complete command table
///
/// Zones are kept in a list so decoding checks them in a stable order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTable {
    /// Alternative zone name -> canonical zone name
    #[serde(default)]
    pub zone_aliases: BTreeMap<String, String>,
    pub zones: Vec<ZoneDescriptor>,
}

impl CommandTable {
    /// The command table shipped with the crate
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_COMMANDS)
    }

    /// Load a command table from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a command table from a JSON reader
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Classified value token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueToken {
    /// Sent verbatim, e.g. `01` or `QSTN`
    Literal(String),
    /// Inclusive decimal range, sent as two-digit hex
    ///
    /// Bounds are limited to `0..=255`; wider ranges classify as [`ValueToken::Pattern`].
    Range(u32, u32),
    /// Placeholder such as `nnnnn` or `{xx}`, not resolvable from an argument
    Pattern(String),
}

impl ValueToken {
    pub fn parse(token: &str) -> Self {
        if let Some((start, end)) = token.split_once('-') {
            if let (Some(start), Some(end)) = (parse_decimal(start), parse_decimal(end)) {
                if start <= end && end <= MAX_RANGE_VALUE {
                    return ValueToken::Range(start, end);
                }
            }
        }
        if token.contains('{') || token.bytes().any(|b| b.is_ascii_lowercase()) {
            ValueToken::Pattern(token.to_string())
        } else {
            ValueToken::Literal(token.to_string())
        }
    }
}

/// Largest value that still encodes as two hex digits
const MAX_RANGE_VALUE: u32 = 0xFF;

fn parse_decimal(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn is_signed_hex(s: &str) -> bool {
    let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_hexdigit())
}

fn norm(s: &str) -> String {
    s.trim().to_lowercase()
}

fn split_tokens(s: &str, separators: &[char]) -> Vec<String> {
    s.split(separators)
        .map(norm)
        .filter(|t| !t.is_empty())
        .collect()
}

/// A free-form command split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub zone: String,
    pub command: String,
    pub arguments: Vec<String>,
}

/// Split a free-form command string.
///
/// Accepted forms:
/// - `zone.command=arg`, `command:arg1,arg2` (base split on `.`/space,
///   arguments on `,`/space)
/// - `zone command arg` (three or more tokens)
/// - `command arg` (two tokens, main zone)
pub fn parse_command(text: &str) -> Result<ParsedCommand> {
    const COMMAND_SEP: &[char] = &['.', ' '];

    let (zone, command, arguments) = if let Some(pos) = text.find([':', '=']) {
        let (base, rest) = (&text[..pos], &text[pos + 1..]);
        let mut parts = split_tokens(base, COMMAND_SEP);
        let (zone, command) = if parts.len() == 2 {
            let command = parts.pop().unwrap_or_default();
            (parts.pop().unwrap_or_default(), command)
        } else {
            let command = parts.into_iter().next().unwrap_or_default();
            (DEFAULT_ZONE.to_string(), command)
        };
        (zone, command, split_tokens(rest, &[' ', ',']))
    } else {
        let mut parts = split_tokens(text, COMMAND_SEP).into_iter();
        match parts.len() {
            0 | 1 => {
                return Err(IscpError::InvalidCommand(format!(
                    "need at least command and argument: {:?}",
                    text
                )))
            }
            2 => {
                let command = parts.next().unwrap_or_default();
                (DEFAULT_ZONE.to_string(), command, parts.collect())
            }
            _ => {
                let zone = parts.next().unwrap_or_default();
                let command = parts.next().unwrap_or_default();
                (zone, command, parts.collect())
            }
        }
    };

    if command.is_empty() {
        return Err(IscpError::InvalidCommand(format!("no command in {:?}", text)));
    }

    Ok(ParsedCommand {
        zone,
        command,
        arguments,
    })
}

#[derive(Debug)]
struct Value {
    token: ValueToken,
    name: Option<String>,
}

#[derive(Debug)]
struct Command {
    name: String,
    values: Vec<Value>,
    /// Lowercased value alias -> literal token
    aliases: HashMap<String, String>,
}

#[derive(Debug)]
struct Zone {
    name: String,
    commands: BTreeMap<String, Command>,
    /// Lowercased command alias -> prefix
    aliases: HashMap<String, String>,
}

/// Indexed, immutable view of a [`CommandTable`]
#[derive(Debug)]
pub struct Translator {
    zone_aliases: HashMap<String, String>,
    zones: Vec<Zone>,
}

impl Translator {
    /// Index a command table
    pub fn new(table: CommandTable) -> Self {
        let zone_aliases = table
            .zone_aliases
            .into_iter()
            .map(|(alias, zone)| (norm(&alias), zone))
            .collect();

        let zones = table
            .zones
            .into_iter()
            .map(|zone| {
                let mut aliases = HashMap::new();
                let mut commands = BTreeMap::new();

                for (prefix, descriptor) in zone.commands {
                    for name in descriptor.name.all() {
                        aliases.entry(norm(name)).or_insert_with(|| prefix.clone());
                    }
                    commands.insert(prefix.clone(), Self::index_command(&prefix, descriptor));
                }

                Zone {
                    name: zone.name,
                    commands,
                    aliases,
                }
            })
            .collect();

        Self {
            zone_aliases,
            zones,
        }
    }

    fn index_command(prefix: &str, descriptor: CommandDescriptor) -> Command {
        let mut aliases = HashMap::new();
        let mut values = Vec::with_capacity(descriptor.values.len());

        for (token, value) in descriptor.values {
            let token = ValueToken::parse(&token);
            if let (ValueToken::Literal(literal), Some(names)) = (&token, &value.name) {
                for name in names.all() {
                    aliases.entry(norm(name)).or_insert_with(|| literal.clone());
                }
            }
            values.push(Value {
                name: value.name.as_ref().and_then(Names::primary).map(str::to_string),
                token,
            });
        }

        Command {
            name: descriptor
                .name
                .primary()
                .map(str::to_string)
                .unwrap_or_else(|| prefix.to_string()),
            values,
            aliases,
        }
    }

    /// Translator over the built-in command table
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(CommandTable::builtin()?))
    }

    /// Zone names in lookup order
    pub fn zones(&self) -> impl Iterator<Item = &str> {
        self.zones.iter().map(|z| z.name.as_str())
    }

    /// `(prefix, display name)` of every command in a zone
    pub fn commands(&self, zone: &str) -> Result<Vec<(&str, &str)>> {
        let zone = self.zone(zone)?;
        Ok(zone
            .commands
            .iter()
            .map(|(prefix, command)| (prefix.as_str(), command.name.as_str()))
            .collect())
    }

    fn zone(&self, zone: &str) -> Result<&Zone> {
        let zone = norm(zone);
        let group = self.zone_aliases.get(&zone).map(String::as_str).unwrap_or(zone.as_str());
        self.zones
            .iter()
            .find(|z| z.name == group)
            .ok_or(IscpError::UnknownZone(zone))
    }

    /// Translate a free-form command string such as `zone2.volume=66`
    /// into a wire command such as `ZVL42`.
    pub fn command_to_wire(&self, text: &str) -> Result<String> {
        let parsed = parse_command(text)?;
        let arguments: Vec<&str> = parsed.arguments.iter().map(String::as_str).collect();
        self.resolve(Some(&parsed.zone), &parsed.command, &arguments)
    }

    /// Translate an explicit zone/command/arguments triple into a wire command.
    ///
    /// Only the first argument is used.
    pub fn resolve(&self, zone: Option<&str>, command: &str, arguments: &[&str]) -> Result<String> {
        let zone_name = zone.map(norm).unwrap_or_else(|| DEFAULT_ZONE.to_string());
        let zone = self.zone(&zone_name)?;

        let command_name = norm(command);
        let prefix = zone
            .aliases
            .get(&command_name)
            .cloned()
            .unwrap_or_else(|| command_name.to_ascii_uppercase());
        let descriptor = zone
            .commands
            .get(&prefix)
            .ok_or_else(|| IscpError::UnknownCommand {
                command: command_name.clone(),
                zone: zone_name.clone(),
            })?;

        // TODO: some commands take several arguments; only the first is encoded for now
        let argument = arguments.first().map(|a| norm(a)).ok_or_else(|| {
            IscpError::InvalidCommand(format!("{} requires an argument", command_name))
        })?;

        let value = Self::resolve_value(descriptor, &argument).ok_or_else(|| {
            IscpError::UnknownArgument {
                argument: argument.clone(),
                command: command_name.clone(),
                zone: zone_name.clone(),
            }
        })?;

        tracing::debug!(zone = %zone.name, %prefix, %value, "Resolved command");
        Ok(format!("{}{}", prefix, value))
    }

    fn resolve_value(command: &Command, argument: &str) -> Option<String> {
        if let Some(token) = command.aliases.get(argument) {
            return Some(token.clone());
        }

        let number = parse_decimal(argument)?;
        command.values.iter().find_map(|value| match value.token {
            ValueToken::Range(start, end) if (start..=end).contains(&number) => {
                Some(format!("{:02X}", number))
            }
            _ => None,
        })
    }

    /// Translate a wire command back to `(command name, value)`.
    pub fn wire_to_command(&self, wire: &str) -> Result<(String, CommandValue)> {
        let decoded = self.wire_to_zoned_command(wire)?;
        Ok((decoded.name, decoded.value))
    }

    /// Translate a wire command back to zone, command name and value.
    ///
    /// Zones are checked in table order; the first zone that knows the
    /// prefix wins.
    pub fn wire_to_zoned_command(&self, wire: &str) -> Result<DecodedCommand> {
        let (prefix, remainder) = match (wire.get(..3), wire.get(3..)) {
            (Some(prefix), Some(remainder)) => (prefix, remainder),
            _ => return Err(IscpError::UnrecognizedWireCommand(wire.to_string())),
        };

        for zone in &self.zones {
            let Some(command) = zone.commands.get(prefix) else {
                continue;
            };

            let known = command.values.iter().find(|v| match &v.token {
                ValueToken::Literal(literal) => literal == remainder,
                _ => false,
            });

            let value = match known {
                Some(v) => {
                    CommandValue::Name(v.name.clone().unwrap_or_else(|| remainder.to_string()))
                }
                None if is_signed_hex(remainder) => i64::from_str_radix(remainder, 16)
                    .map(CommandValue::Number)
                    .unwrap_or_else(|_| CommandValue::Raw(remainder.to_string())),
                None => CommandValue::Raw(remainder.to_string()),
            };

            return Ok(DecodedCommand {
                zone: zone.name.clone(),
                name: command.name.clone(),
                value,
            });
        }

        Err(IscpError::UnrecognizedWireCommand(wire.to_string()))
    }
}
