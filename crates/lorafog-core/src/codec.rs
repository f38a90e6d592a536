//! Wire codecs
//!
//! Two interchangeable encodings share the [`WireCodec`] contract:
//!
//! - [`DelimitedCodec`]: eight comma-separated fields with fixed precision
//!   (6 decimals for coordinates, 2 for headings, speeds and gains, integral
//!   mode selector).
//! - [`StructuredCodec`]: JSON objects with one named attribute per field.
//!   Unknown attributes are ignored and missing ones take their zero value.
//!
//! A relay can decode with one format and encode with the other without
//! losing a record. Identifiers that a delimited line cannot carry (commas,
//! line breaks, surrounding whitespace) are refused by both codecs, see
//! [`check_identifier`]. When the incoming format is unknown, the `decode_*_any`
//! functions walk [`FALLBACK_ORDER`] and return the first success.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, DecodeError, Result};
use crate::model::{ControlCommand, TelemetryRecord};

/// Number of fields in a delimited telemetry or control line
pub const DELIMITED_FIELD_COUNT: usize = 8;

/// Content type used for delimited lines over HTTP
pub const DELIMITED_CONTENT_TYPE: &str = "text/plain";

/// Content type used for structured lines over HTTP
pub const STRUCTURED_CONTENT_TYPE: &str = "application/json";

/// Order in which formats are attempted when the input format is unknown
pub const FALLBACK_ORDER: [WireFormat; 2] = [WireFormat::Structured, WireFormat::Delimited];

/// Line encoding selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Comma-separated fixed-precision fields
    #[default]
    #[serde(alias = "csv")]
    Delimited,
    /// JSON object with named attributes
    #[serde(alias = "json")]
    Structured,
}

impl WireFormat {
    /// HTTP content type for bodies in this format
    pub fn content_type(self) -> &'static str {
        match self {
            WireFormat::Delimited => DELIMITED_CONTENT_TYPE,
            WireFormat::Structured => STRUCTURED_CONTENT_TYPE,
        }
    }

    /// Map a request's `Content-Type` header onto a format hint
    pub fn from_content_type(value: &str) -> Option<Self> {
        let mime = value.split(';').next()?.trim().to_ascii_lowercase();
        match mime.as_str() {
            STRUCTURED_CONTENT_TYPE => Some(WireFormat::Structured),
            DELIMITED_CONTENT_TYPE | "text/csv" => Some(WireFormat::Delimited),
            _ => None,
        }
    }

    /// Codec implementing this format
    pub fn codec(self) -> &'static dyn WireCodec {
        match self {
            WireFormat::Delimited => &DelimitedCodec,
            WireFormat::Structured => &StructuredCodec,
        }
    }

    pub fn encode_telemetry(self, record: &TelemetryRecord) -> Result<String> {
        self.codec().encode_telemetry(record)
    }

    pub fn decode_telemetry(self, line: &str) -> std::result::Result<TelemetryRecord, DecodeError> {
        self.codec().decode_telemetry(line)
    }

    pub fn encode_control(self, command: &ControlCommand) -> Result<String> {
        self.codec().encode_control(command)
    }

    pub fn decode_control(self, line: &str) -> std::result::Result<ControlCommand, DecodeError> {
        self.codec().decode_control(line)
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Delimited => write!(f, "delimited"),
            WireFormat::Structured => write!(f, "structured"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delimited" | "csv" => Ok(WireFormat::Delimited),
            "structured" | "json" => Ok(WireFormat::Structured),
            other => Err(CoreError::InvalidConfig(format!(
                "unknown wire format: {other}"
            ))),
        }
    }
}

/// Shared contract for both line encodings
pub trait WireCodec: Send + Sync {
    /// Format this codec implements
    fn format(&self) -> WireFormat;

    fn encode_telemetry(&self, record: &TelemetryRecord) -> Result<String>;

    fn decode_telemetry(&self, line: &str) -> std::result::Result<TelemetryRecord, DecodeError>;

    fn encode_control(&self, command: &ControlCommand) -> Result<String>;

    fn decode_control(&self, line: &str) -> std::result::Result<ControlCommand, DecodeError>;
}

/// Check that a vehicle identifier survives both encodings unchanged
pub fn check_identifier(id: &str) -> std::result::Result<(), DecodeError> {
    if id.is_empty() {
        return Err(DecodeError::MissingIdentifier);
    }
    if id.contains([',', '\r', '\n']) || id.trim() != id {
        return Err(DecodeError::InvalidIdentifier(id.to_string()));
    }
    Ok(())
}

fn encodable_identifier(id: &str) -> Result<()> {
    check_identifier(id).map_err(|e| CoreError::Encode(e.to_string()))
}

/// Comma-separated encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedCodec;

impl DelimitedCodec {
    fn split(line: &str) -> std::result::Result<Vec<&str>, DecodeError> {
        let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
        if fields.len() != DELIMITED_FIELD_COUNT {
            return Err(DecodeError::FieldCount {
                expected: DELIMITED_FIELD_COUNT,
                actual: fields.len(),
            });
        }
        if fields[0].is_empty() {
            return Err(DecodeError::MissingIdentifier);
        }
        Ok(fields)
    }
}

fn parse_number(field: &'static str, value: &str) -> std::result::Result<f64, DecodeError> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(DecodeError::InvalidField {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_mode(value: &str) -> std::result::Result<u8, DecodeError> {
    if let Ok(mode) = value.parse::<u8>() {
        return Ok(mode);
    }
    let invalid = || DecodeError::InvalidField {
        field: "mode",
        value: value.to_string(),
    };
    let v = value.parse::<f64>().map_err(|_| invalid())?;
    if v.is_finite() && v.fract() == 0.0 && (0.0..=f64::from(u8::MAX)).contains(&v) {
        Ok(v as u8)
    } else {
        Err(invalid())
    }
}

impl WireCodec for DelimitedCodec {
    fn format(&self) -> WireFormat {
        WireFormat::Delimited
    }

    fn encode_telemetry(&self, r: &TelemetryRecord) -> Result<String> {
        encodable_identifier(&r.vehicle_id)?;
        Ok(format!(
            "{},{:.6},{:.6},{:.2},{:.2},{:.2},{:.2},{:.2}",
            r.vehicle_id,
            r.lat,
            r.lon,
            r.head_current,
            r.head_target,
            r.left_speed,
            r.right_speed,
            r.pid
        ))
    }

    fn decode_telemetry(&self, line: &str) -> std::result::Result<TelemetryRecord, DecodeError> {
        let f = Self::split(line)?;
        Ok(TelemetryRecord {
            vehicle_id: f[0].to_string(),
            lat: parse_number("lat", f[1])?,
            lon: parse_number("lon", f[2])?,
            head_current: parse_number("head_current", f[3])?,
            head_target: parse_number("head_target", f[4])?,
            left_speed: parse_number("left_speed", f[5])?,
            right_speed: parse_number("right_speed", f[6])?,
            pid: parse_number("pid", f[7])?,
        })
    }

    fn encode_control(&self, c: &ControlCommand) -> Result<String> {
        encodable_identifier(&c.vehicle_id)?;
        Ok(format!(
            "{},{},{:.2},{:.6},{:.6},{:.2},{:.2},{:.2}",
            c.vehicle_id, c.mode, c.speed, c.lat, c.lon, c.kp, c.ki, c.kd
        ))
    }

    fn decode_control(&self, line: &str) -> std::result::Result<ControlCommand, DecodeError> {
        let f = Self::split(line)?;
        Ok(ControlCommand {
            vehicle_id: f[0].to_string(),
            mode: parse_mode(f[1])?,
            speed: parse_number("speed", f[2])?,
            lat: parse_number("lat", f[3])?,
            lon: parse_number("lon", f[4])?,
            kp: parse_number("kp", f[5])?,
            ki: parse_number("ki", f[6])?,
            kd: parse_number("kd", f[7])?,
        })
    }
}

/// JSON encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredCodec;

impl WireCodec for StructuredCodec {
    fn format(&self) -> WireFormat {
        WireFormat::Structured
    }

    fn encode_telemetry(&self, record: &TelemetryRecord) -> Result<String> {
        Ok(serde_json::to_string(record)?)
    }

    fn decode_telemetry(&self, line: &str) -> std::result::Result<TelemetryRecord, DecodeError> {
        let record: TelemetryRecord = serde_json::from_str(line.trim())
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;
        check_identifier(&record.vehicle_id)?;
        Ok(record)
    }

    fn encode_control(&self, command: &ControlCommand) -> Result<String> {
        Ok(serde_json::to_string(command)?)
    }

    fn decode_control(&self, line: &str) -> std::result::Result<ControlCommand, DecodeError> {
        let command: ControlCommand = serde_json::from_str(line.trim())
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;
        check_identifier(&command.vehicle_id)?;
        Ok(command)
    }
}

/// Formats to try for an input, hinted format first
pub fn attempt_order(hint: Option<WireFormat>) -> Vec<WireFormat> {
    let mut order = Vec::with_capacity(FALLBACK_ORDER.len());
    if let Some(format) = hint {
        order.push(format);
    }
    order.extend(FALLBACK_ORDER.iter().copied().filter(|f| Some(*f) != hint));
    order
}

fn decode_first<T>(
    line: &str,
    hint: Option<WireFormat>,
    decode: impl Fn(WireFormat, &str) -> std::result::Result<T, DecodeError>,
) -> std::result::Result<(T, WireFormat), DecodeError> {
    let mut attempts = Vec::new();
    for format in attempt_order(hint) {
        match decode(format, line) {
            Ok(value) => return Ok((value, format)),
            Err(e) => attempts.push((format, e.to_string())),
        }
    }
    Err(DecodeError::NoFormatMatched { attempts })
}

/// Decode a telemetry line whose format is unknown.
///
/// Returns the record together with the format that accepted it.
pub fn decode_telemetry_any(
    line: &str,
    hint: Option<WireFormat>,
) -> std::result::Result<(TelemetryRecord, WireFormat), DecodeError> {
    decode_first(line, hint, |format, line| format.decode_telemetry(line))
}

/// Decode a control line whose format is unknown.
pub fn decode_control_any(
    line: &str,
    hint: Option<WireFormat>,
) -> std::result::Result<(ControlCommand, WireFormat), DecodeError> {
    decode_first(line, hint, |format, line| format.decode_control(line))
}
