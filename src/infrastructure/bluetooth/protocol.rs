//! Probe Rig Protocol
//!
//! Wire format for the positioning rig: ASCII command encoding and
//! telemetry parsing.

use crate::domain::models::MotionCommand;
use thiserror::Error;

/// Characteristic the rig accepts commands on.
pub const COMMAND_CHAR_UUID: &str = "9ecadc24-0ee5-a9e0-93f3-a3b50200406e";

/// Characteristic the rig streams telemetry on.
pub const TELEMETRY_CHAR_UUID: &str = "9ecadc24-0ee5-a9e0-93f3-a3b50300406e";

/// Commands understood by the rig firmware.
#[derive(Debug, Clone, PartialEq)]
pub enum RigCommand {
    /// Relative carriage motion in grid cells.
    Move(MotionCommand),
    /// Begin a measurement cycle at the current position.
    Start,
    /// Retract the probe.
    Return,
    /// Verbatim text passed through to the firmware.
    Raw(String),
}

impl RigCommand {
    /// ASCII payload written to the command characteristic. There is no
    /// framing; the firmware reads whole writes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Move(motion) => format!("move {} {}", motion.dx, motion.dy).into_bytes(),
            Self::Start => b"start".to_vec(),
            Self::Return => b"return".to_vec(),
            Self::Raw(text) => text.as_bytes().to_vec(),
        }
    }
}

/// Failure to interpret a telemetry notification. The sample is
/// dropped; the stream continues.
#[derive(Error, PartialEq, Clone, Debug)]
pub enum ParseError {
    #[error("telemetry is not valid UTF-8")]
    NotUtf8,
    #[error("expected 2 comma-separated fields, got {0}")]
    FieldCount(usize),
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
}

/// Parses a telemetry notification of the form
/// `"<measurement>,<angle>"`. Both fields are decimal numbers;
/// surrounding whitespace is ignored.
pub fn parse_telemetry(payload: &[u8]) -> Result<(f64, f64), ParseError> {
    let text = std::str::from_utf8(payload).map_err(|_| ParseError::NotUtf8)?;
    let parts: Vec<&str> = text.trim().split(',').map(str::trim).collect();
    if parts.len() != 2 {
        return Err(ParseError::FieldCount(parts.len()));
    }

    let measurement = parse_number(parts[0])?;
    let angle = parse_number(parts[1])?;
    Ok((measurement, angle))
}

fn parse_number(field: &str) -> Result<f64, ParseError> {
    field
        .parse()
        .map_err(|_| ParseError::InvalidNumber(field.to_string()))
}

/// Parse a UUID string into a Windows GUID
#[cfg(windows)]
pub fn parse_uuid(uuid_str: &str) -> anyhow::Result<windows::core::GUID> {
    let uuid_str = uuid_str.replace('-', "");

    if uuid_str.len() != 32 {
        return Err(anyhow::anyhow!("Invalid UUID format"));
    }

    let d1 = u32::from_str_radix(&uuid_str[0..8], 16)?;
    let d2 = u16::from_str_radix(&uuid_str[8..12], 16)?;
    let d3 = u16::from_str_radix(&uuid_str[12..16], 16)?;

    let mut d4 = [0u8; 8];
    for i in 0..8 {
        d4[i] = u8::from_str_radix(&uuid_str[16 + i * 2..18 + i * 2], 16)?;
    }

    Ok(windows::core::GUID {
        data1: d1,
        data2: d2,
        data3: d3,
        data4: d4,
    })
}
