//! GRBL line protocol: command encoding and response classification.
//!
//! Protocol overview:
//! - ASCII lines terminated by `\n`, 115200 8N1
//! - Every line is acknowledged by `ok`, `error:<code>` or `ALARM:<code>`
//! - A status query (`?`) is answered by a report such as
//!   `<Idle,MPos:5.000,6.000,7.000,WPos:5.000,6.000,7.000>` before the `ok`
//! - `[...]` feedback messages and the `Grbl x.y` start-up banner may arrive at
//!   any time and carry no acknowledgement

use ami_core::{MachinePosition, ProtocolError};
use std::fmt;

/// Result of a protocol exchange.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Setting number of the hard-limit switch enable (`$21`).
pub const HARD_LIMITS_SETTING: u16 = 21;

/// Work x reported by a controller whose coordinate system was never zeroed.
pub const UNZEROED_WORK_X: f64 = -199.0;

/// One command line understood by the motion controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `~` resume a held motion.
    CycleStart,
    /// `!` hold motion.
    FeedHold,
    /// `?` request a status report.
    StatusQuery,
    /// `$H` run the homing cycle.
    Home,
    /// `$X` clear the alarm lock.
    KillAlarmLock,
    /// `$<code>=<value>`.
    Setting { code: u16, value: String },
    /// `G0` rapid positioning; omitted axes keep their position.
    RapidMove {
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
    },
    /// `G10 L2 P<system>` coordinate system offset.
    SetCoordinateSystem {
        system: u8,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
    },
    /// `M3` (clockwise), `M4` (counter-clockwise) or `M5` (stop).
    Spindle { clockwise: bool, running: bool },
    /// `S<rpm>`.
    SpindleSpeed(u32),
    /// `M7` mist on.
    CoolantMist,
    /// `M8` flood on.
    CoolantFlood,
    /// `M9` all coolant off.
    CoolantOff,
}

impl Command {
    /// Enable or disable the hard-limit switches.
    pub fn hard_limits(enabled: bool) -> Self {
        Command::Setting {
            code: HARD_LIMITS_SETTING,
            value: if enabled { "1" } else { "0" }.to_string(),
        }
    }

    /// The command text followed by the line terminator.
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }
}

fn write_axes(
    f: &mut fmt::Formatter<'_>,
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
) -> fmt::Result {
    for (name, value) in [('X', x), ('Y', y), ('Z', z)] {
        if let Some(v) = value {
            write!(f, " {}{:.3}", name, v)?;
        }
    }
    Ok(())
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::CycleStart => f.write_str("~"),
            Command::FeedHold => f.write_str("!"),
            Command::StatusQuery => f.write_str("?"),
            Command::Home => f.write_str("$H"),
            Command::KillAlarmLock => f.write_str("$X"),
            Command::Setting { code, value } => write!(f, "${}={}", code, value),
            Command::RapidMove { x, y, z } => {
                f.write_str("G0")?;
                write_axes(f, *x, *y, *z)
            }
            Command::SetCoordinateSystem { system, x, y, z } => {
                write!(f, "G10 L2 P{}", system)?;
                write_axes(f, *x, *y, *z)
            }
            Command::Spindle { running: false, .. } => f.write_str("M5"),
            Command::Spindle {
                clockwise: true, ..
            } => f.write_str("M3"),
            Command::Spindle {
                clockwise: false, ..
            } => f.write_str("M4"),
            Command::SpindleSpeed(rpm) => write!(f, "S{}", rpm),
            Command::CoolantMist => f.write_str("M7"),
            Command::CoolantFlood => f.write_str("M8"),
            Command::CoolantOff => f.write_str("M9"),
        }
    }
}

/// Classification of one received line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseLine {
    /// `ok`
    Ok,
    /// `error:<code>`
    Error(String),
    /// `ALARM:<code>`
    Alarm(String),
    /// `<...>` status report.
    Status(String),
    /// `[...]` feedback message.
    Message(String),
    /// `Grbl x.y ['$' for help]` start-up banner.
    Banner(String),
    /// Empty line.
    Empty,
    /// Anything else.
    Unknown(String),
}

impl ResponseLine {
    /// Classify a line with its terminator already stripped.
    pub fn classify(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            ResponseLine::Empty
        } else if line.eq_ignore_ascii_case("ok") {
            ResponseLine::Ok
        } else if let Some(code) = line.strip_prefix("error:") {
            ResponseLine::Error(code.trim().to_string())
        } else if let Some(code) = line.strip_prefix("ALARM:") {
            ResponseLine::Alarm(code.trim().to_string())
        } else if line.starts_with('<') && line.ends_with('>') {
            ResponseLine::Status(line.to_string())
        } else if line.starts_with('[') && line.ends_with(']') {
            ResponseLine::Message(line.to_string())
        } else if line.starts_with("Grbl ") {
            ResponseLine::Banner(line.to_string())
        } else {
            ResponseLine::Unknown(line.to_string())
        }
    }

    /// Lines that end a serial response unit.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResponseLine::Ok
                | ResponseLine::Error(_)
                | ResponseLine::Alarm(_)
                | ResponseLine::Unknown(_)
        )
    }
}

/// Every line received for one command, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    lines: Vec<String>,
}

impl Reply {
    /// Reply made of the given raw lines.
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// Raw lines.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The status report carried by this reply, if any.
    pub fn status_line(&self) -> Option<&str> {
        self.lines
            .iter()
            .map(String::as_str)
            .find(|l| matches!(ResponseLine::classify(l), ResponseLine::Status(_)))
    }

    /// Turn the reply into success or the matching protocol error.
    ///
    /// The unit is complete when its last line is `ok` or a status report; the
    /// latter is what a simulated controller answers to every command.
    pub fn into_result(self, command: &str) -> ProtocolResult<Reply> {
        let last = self
            .lines
            .iter()
            .rev()
            .map(|l| ResponseLine::classify(l))
            .find(|l| !matches!(l, ResponseLine::Empty | ResponseLine::Message(_)));

        match last {
            Some(ResponseLine::Ok) | Some(ResponseLine::Status(_)) => Ok(self),
            Some(ResponseLine::Error(code)) => Err(ProtocolError::Rejected {
                command: command.to_string(),
                code,
            }),
            Some(ResponseLine::Alarm(code)) => Err(ProtocolError::Alarm {
                command: command.to_string(),
                code,
            }),
            Some(ResponseLine::Unknown(response)) | Some(ResponseLine::Banner(response)) => {
                Err(ProtocolError::Malformed {
                    command: command.to_string(),
                    response,
                })
            }
            Some(ResponseLine::Empty) | Some(ResponseLine::Message(_)) | None => {
                Err(ProtocolError::Malformed {
                    command: command.to_string(),
                    response: self.lines.join("\n"),
                })
            }
        }
    }
}

/// Positions decoded from a status report.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    /// Machine state (`Idle`, `Run`, `Alarm`, `Home`, ...).
    pub state: String,
    /// Machine coordinates.
    pub machine: MachinePosition,
    /// Work coordinates.
    pub work: MachinePosition,
}

const MACHINE_FIELD: usize = 2;
const WORK_FIELD: usize = 6;

impl StatusReport {
    /// Parse a report such as `<Idle,MPos:1.0,2.0,3.0,WPos:1.0,2.0,3.0>`.
    ///
    /// `:` is treated as a field separator and the angle brackets are dropped,
    /// which puts the machine axes at fields 2..=4 and the work axes at 6..=8.
    pub fn parse(line: &str) -> ProtocolResult<Self> {
        let normalized = line
            .trim()
            .replace(':', ",")
            .replace(['<', '>'], "");
        let fields: Vec<&str> = normalized.split(',').map(str::trim).collect();

        let axis = |index: usize| -> ProtocolResult<f64> {
            fields
                .get(index)
                .and_then(|f| f.parse::<f64>().ok())
                .ok_or_else(|| ProtocolError::StatusReport(line.to_string()))
        };
        let position = |start: usize| -> ProtocolResult<MachinePosition> {
            Ok(MachinePosition::new(
                axis(start)?,
                axis(start + 1)?,
                axis(start + 2)?,
            ))
        };

        Ok(Self {
            state: fields.first().copied().unwrap_or_default().to_string(),
            machine: position(MACHINE_FIELD)?,
            work: position(WORK_FIELD)?,
        })
    }

    /// True when the controller reports a coordinate system that was never zeroed.
    pub fn is_unzeroed(&self) -> bool {
        self.work.x == UNZEROED_WORK_X
    }
}
