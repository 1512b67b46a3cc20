//! Resolves external channel identifiers and command values into typed
//! [`Operation`]s.
//!
//! Identifiers have the form `<group>[<index>]::<verb>`. Groups are tried in
//! the fixed order `primary`, `port<N>`, `mirror<N>`, `volume<N>`; the first
//! match wins and selects the verb table. Resolution never touches the socket
//! and only reads cached state (for the mirror-enable default).

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::callback::StateLookup;
use crate::commands::{MatrixCommand, Operation, PresetCommand};
use crate::models::Command;

pub const GROUP_PRIMARY: &str = "primary";
pub const GROUP_PORT: &str = "port";
pub const GROUP_MIRROR: &str = "mirror";
pub const GROUP_VOLUME: &str = "volume";

pub const CHANNEL_SEPARATOR: &str = "::";

const DEFAULT_MIRROR_OUTPUT: i64 = 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("Malformed channel id: '{0}'")]
    MalformedChannel(String),

    #[error("Unknown/Unsupported channel group: '{0}'")]
    UnknownGroup(String),

    #[error("Bad {group} channel (can't parse the port number): '{index}'")]
    BadIndex { group: &'static str, index: String },

    #[error("Unknown/Unsupported {group} channel: '{verb}'")]
    UnknownVerb { group: &'static str, verb: String },

    #[error("Channel {channel} expects a {expected} command, received a {actual} command")]
    TypeMismatch {
        channel: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Unknown {channel} command: '{command}'")]
    UnknownMetaCommand { channel: String, command: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Primary,
    Port,
    Mirror,
    Volume,
}

impl GroupKind {
    pub fn name(self) -> &'static str {
        match self {
            GroupKind::Primary => GROUP_PRIMARY,
            GroupKind::Port => GROUP_PORT,
            GroupKind::Mirror => GROUP_MIRROR,
            GroupKind::Volume => GROUP_VOLUME,
        }
    }
}

// Evaluated top to bottom.
const GROUP_TABLE: [GroupKind; 4] = [
    GroupKind::Primary,
    GroupKind::Port,
    GroupKind::Mirror,
    GroupKind::Volume,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    OnOff,
    Decimal,
    Text,
}

impl ValueKind {
    fn name(self) -> &'static str {
        match self {
            ValueKind::OnOff => "boolean",
            ValueKind::Decimal => "numeric",
            ValueKind::Text => "string",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryVerb {
    Power,
    PanelLock,
    IrEnable,
    MatrixCmd,
    PresetCmd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortVerb {
    PortOutput,
    PortPower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorVerb {
    PortMirror,
    PortMirrorEnabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeVerb {
    Volume,
    VolumeMute,
}

macro_rules! verb_table {
    ($verb:ident { $($variant:ident => $name:literal : $kind:ident),+ $(,)? }) => {
        impl $verb {
            const ALL: &'static [$verb] = &[$($verb::$variant),+];

            pub fn name(self) -> &'static str {
                match self {
                    $($verb::$variant => $name),+
                }
            }

            pub fn value_kind(self) -> ValueKind {
                match self {
                    $($verb::$variant => ValueKind::$kind),+
                }
            }

            fn lookup(id: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|v| v.name() == id)
            }
        }
    };
}

verb_table!(PrimaryVerb {
    Power => "power": OnOff,
    PanelLock => "panellock": OnOff,
    IrEnable => "irenable": OnOff,
    MatrixCmd => "matrixcmd": Text,
    PresetCmd => "presetcmd": Text,
});

verb_table!(PortVerb {
    PortOutput => "portoutput": Decimal,
    PortPower => "portpower": OnOff,
});

verb_table!(MirrorVerb {
    PortMirror => "portmirror": Decimal,
    PortMirrorEnabled => "portmirrorenabled": OnOff,
});

verb_table!(VolumeVerb {
    Volume => "volume": Decimal,
    VolumeMute => "volumemute": OnOff,
});

/// A fully resolved channel: group, optional index and verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAddress {
    Primary(PrimaryVerb),
    Port { port: u8, verb: PortVerb },
    Mirror { hdmi_port: u8, verb: MirrorVerb },
    Volume { port: u8, verb: VolumeVerb },
}

impl ChannelAddress {
    /// Parses a group segment and a verb, both case-insensitive.
    pub fn parse(group: &str, id: &str) -> Result<Self, RoutingError> {
        let group = group.trim().to_ascii_lowercase();
        let id = id.trim().to_ascii_lowercase();

        let (kind, index) = match_group(&group)?;
        let unknown_verb = || RoutingError::UnknownVerb {
            group: kind.name(),
            verb: id.clone(),
        };

        match (kind, index) {
            (GroupKind::Primary, _) => PrimaryVerb::lookup(&id)
                .map(ChannelAddress::Primary)
                .ok_or_else(unknown_verb),
            (GroupKind::Port, Some(port)) => PortVerb::lookup(&id)
                .map(|verb| ChannelAddress::Port { port, verb })
                .ok_or_else(unknown_verb),
            (GroupKind::Mirror, Some(hdmi_port)) => MirrorVerb::lookup(&id)
                .map(|verb| ChannelAddress::Mirror { hdmi_port, verb })
                .ok_or_else(unknown_verb),
            (GroupKind::Volume, Some(port)) => VolumeVerb::lookup(&id)
                .map(|verb| ChannelAddress::Volume { port, verb })
                .ok_or_else(unknown_verb),
            _ => Err(RoutingError::UnknownGroup(group.clone())),
        }
    }

    pub fn group(&self) -> GroupKind {
        match self {
            ChannelAddress::Primary(_) => GroupKind::Primary,
            ChannelAddress::Port { .. } => GroupKind::Port,
            ChannelAddress::Mirror { .. } => GroupKind::Mirror,
            ChannelAddress::Volume { .. } => GroupKind::Volume,
        }
    }

    pub fn index(&self) -> Option<u8> {
        match self {
            ChannelAddress::Primary(_) => None,
            ChannelAddress::Port { port, .. } => Some(*port),
            ChannelAddress::Mirror { hdmi_port, .. } => Some(*hdmi_port),
            ChannelAddress::Volume { port, .. } => Some(*port),
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            ChannelAddress::Primary(verb) => verb.name(),
            ChannelAddress::Port { verb, .. } => verb.name(),
            ChannelAddress::Mirror { verb, .. } => verb.name(),
            ChannelAddress::Volume { verb, .. } => verb.name(),
        }
    }

    pub fn value_kind(&self) -> ValueKind {
        match self {
            ChannelAddress::Primary(verb) => verb.value_kind(),
            ChannelAddress::Port { verb, .. } => verb.value_kind(),
            ChannelAddress::Mirror { verb, .. } => verb.value_kind(),
            ChannelAddress::Volume { verb, .. } => verb.value_kind(),
        }
    }

    /// The identifier state is published and cached under.
    pub fn channel_id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index() {
            Some(index) => write!(
                f,
                "{}{}{}{}",
                self.group().name(),
                index,
                CHANNEL_SEPARATOR,
                self.verb()
            ),
            None => write!(f, "{}{}{}", self.group().name(), CHANNEL_SEPARATOR, self.verb()),
        }
    }
}

impl FromStr for ChannelAddress {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (group, id) = s
            .split_once(CHANNEL_SEPARATOR)
            .ok_or_else(|| RoutingError::MalformedChannel(s.to_string()))?;
        ChannelAddress::parse(group, id)
    }
}

// `Some(Ok(n))` when `text` is `prefix` followed by one or two digits,
// `Some(Err(..))` when the digits do not parse, `None` when it does not match.
fn match_indexed<'a>(text: &'a str, prefix: &str) -> Option<Result<u8, &'a str>> {
    let digits = text.strip_prefix(prefix)?;
    if digits.is_empty() || digits.len() > 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(digits.parse::<u8>().map_err(|_| digits))
}

fn match_group(group: &str) -> Result<(GroupKind, Option<u8>), RoutingError> {
    for kind in GROUP_TABLE {
        if kind == GroupKind::Primary {
            if group == GROUP_PRIMARY {
                return Ok((kind, None));
            }
            continue;
        }
        match match_indexed(group, kind.name()) {
            Some(Ok(index)) => return Ok((kind, Some(index))),
            Some(Err(digits)) => {
                return Err(RoutingError::BadIndex {
                    group: kind.name(),
                    index: digits.to_string(),
                })
            }
            None => continue,
        }
    }
    Err(RoutingError::UnknownGroup(group.to_string()))
}

enum MetaPattern<T> {
    Exact(&'static str, T),
    Indexed(&'static str, fn(u8) -> T),
}

const MATRIX_PATTERNS: [MetaPattern<MatrixCommand>; 3] = [
    MetaPattern::Exact("resetmatrix", MatrixCommand::ResetMatrix),
    MetaPattern::Exact("resetports", MatrixCommand::ResetPorts),
    MetaPattern::Indexed("allports", MatrixCommand::AllPorts),
];

const PRESET_PATTERNS: [MetaPattern<PresetCommand>; 3] = [
    MetaPattern::Indexed("save", PresetCommand::Save),
    MetaPattern::Indexed("recall", PresetCommand::Recall),
    MetaPattern::Indexed("clear", PresetCommand::Clear),
];

fn match_meta<T: Copy>(
    channel: &ChannelAddress,
    patterns: &[MetaPattern<T>],
    text: &str,
) -> Result<T, RoutingError> {
    let command = text.trim().to_ascii_lowercase();
    for pattern in patterns {
        match pattern {
            MetaPattern::Exact(name, value) if command == *name => return Ok(*value),
            MetaPattern::Exact(..) => continue,
            MetaPattern::Indexed(prefix, build) => match match_indexed(&command, prefix) {
                Some(Ok(n)) => return Ok(build(n)),
                Some(Err(_)) => {
                    return Err(RoutingError::UnknownMetaCommand {
                        channel: channel.channel_id(),
                        command: text.to_string(),
                    })
                }
                None => continue,
            },
        }
    }
    Err(RoutingError::UnknownMetaCommand {
        channel: channel.channel_id(),
        command: text.to_string(),
    })
}

fn expect_on_off(channel: &ChannelAddress, command: &Command) -> Result<bool, RoutingError> {
    match command {
        Command::OnOff(on) => Ok(*on),
        other => Err(type_mismatch(channel, other)),
    }
}

fn expect_decimal(channel: &ChannelAddress, command: &Command) -> Result<f64, RoutingError> {
    match command {
        Command::Decimal(value) => Ok(*value),
        other => Err(type_mismatch(channel, other)),
    }
}

fn expect_text<'a>(channel: &ChannelAddress, command: &'a Command) -> Result<&'a str, RoutingError> {
    match command {
        Command::Text(text) => Ok(text),
        other => Err(type_mismatch(channel, other)),
    }
}

fn type_mismatch(channel: &ChannelAddress, command: &Command) -> RoutingError {
    RoutingError::TypeMismatch {
        channel: channel.channel_id(),
        expected: channel.value_kind().name(),
        actual: command.type_name(),
    }
}

/// Resolves a command sent to `address` into an [`Operation`].
///
/// `states` supplies the cached mirror target when a mirror is enabled
/// without an explicit output port.
pub fn resolve(
    address: &ChannelAddress,
    command: &Command,
    states: &dyn StateLookup,
) -> Result<Operation, RoutingError> {
    let operation = match *address {
        ChannelAddress::Primary(verb) => match verb {
            PrimaryVerb::Power => Operation::SetPower(expect_on_off(address, command)?),
            PrimaryVerb::PanelLock => Operation::SetPanelLock(expect_on_off(address, command)?),
            PrimaryVerb::IrEnable => Operation::SetIrOn(expect_on_off(address, command)?),
            PrimaryVerb::MatrixCmd => Operation::Matrix(match_meta(
                address,
                &MATRIX_PATTERNS,
                expect_text(address, command)?,
            )?),
            PrimaryVerb::PresetCmd => Operation::Preset(match_meta(
                address,
                &PRESET_PATTERNS,
                expect_text(address, command)?,
            )?),
        },
        ChannelAddress::Port { port, verb } => match verb {
            PortVerb::PortOutput => Operation::SetPortSwitch {
                input: expect_decimal(address, command)? as i64,
                output: port,
            },
            PortVerb::PortPower => Operation::SetPortPower {
                port,
                on: expect_on_off(address, command)?,
            },
        },
        ChannelAddress::Mirror { hdmi_port, verb } => match verb {
            MirrorVerb::PortMirror => {
                let output_port = expect_decimal(address, command)? as i64;
                if output_port <= 0 {
                    Operation::RemovePortMirror { hdmi_port }
                } else {
                    Operation::SetPortMirror {
                        hdmi_port,
                        output_port,
                    }
                }
            }
            MirrorVerb::PortMirrorEnabled => {
                if expect_on_off(address, command)? {
                    let target = ChannelAddress::Mirror {
                        hdmi_port,
                        verb: MirrorVerb::PortMirror,
                    };
                    let output_port = match states
                        .get_state(&target.channel_id())
                        .and_then(|state| state.as_decimal())
                    {
                        Some(value) if (value as i64) > 0 => value as i64,
                        _ => DEFAULT_MIRROR_OUTPUT,
                    };
                    Operation::SetPortMirror {
                        hdmi_port,
                        output_port,
                    }
                } else {
                    Operation::RemovePortMirror { hdmi_port }
                }
            }
        },
        ChannelAddress::Volume { port, verb } => match verb {
            VolumeVerb::Volume => Operation::SetVolume {
                port,
                level: expect_decimal(address, command)?,
            },
            VolumeVerb::VolumeMute => Operation::SetVolumeMute {
                port,
                mute: expect_on_off(address, command)?,
            },
        },
    };
    Ok(operation)
}

/// Parses `group`/`id` and resolves `command` in one step.
pub fn route(
    group: &str,
    id: &str,
    command: &Command,
    states: &dyn StateLookup,
) -> Result<Operation, RoutingError> {
    let address = ChannelAddress::parse(group, id)?;
    resolve(&address, command, states)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_indexed() {
        assert_eq!(match_indexed("port3", "port"), Some(Ok(3)));
        assert_eq!(match_indexed("port03", "port"), Some(Ok(3)));
        assert_eq!(match_indexed("port", "port"), None);
        assert_eq!(match_indexed("port123", "port"), None);
        assert_eq!(match_indexed("portx", "port"), None);
        assert_eq!(match_indexed("mirror1", "port"), None);
    }

    #[test]
    fn test_channel_id_round_trip_format() {
        let address = ChannelAddress::parse("Port12", "PortOutput").unwrap();
        assert_eq!(address.channel_id(), "port12::portoutput");
        let address = ChannelAddress::parse("primary", "power").unwrap();
        assert_eq!(address.channel_id(), "primary::power");
    }

    #[test]
    fn test_primary_with_index_is_unknown_group() {
        assert_eq!(
            ChannelAddress::parse("primary1", "power"),
            Err(RoutingError::UnknownGroup("primary1".to_string()))
        );
    }
}
