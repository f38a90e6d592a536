//! Parsing of lines coming from a vehicle's local data source
//!
//! Two sources are understood:
//!
//! - GPS receivers emitting NMEA `$GPRMC` / `$GNRMC` sentences
//! - actuator boards reporting `lat,lon,left_speed,right_speed,heading`

/// Position and optional motion data from the local source
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LocalReading {
    pub lat: f64,
    pub lon: f64,
    pub left_speed: Option<f64>,
    pub right_speed: Option<f64>,
    pub heading: Option<f64>,
}

impl LocalReading {
    pub fn position(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            ..Self::default()
        }
    }

    /// A reading at exactly 0,0 carries no fix
    pub fn has_fix(&self) -> bool {
        self.lat != 0.0 || self.lon != 0.0
    }
}

/// Parse one local-source line; `None` for anything unusable
pub fn parse_reading(line: &str) -> Option<LocalReading> {
    let line = line.trim();
    if line.starts_with('$') {
        parse_rmc(line)
    } else {
        parse_status(line)
    }
}

/// Parse an RMC sentence. Void fixes (status `V`) yield `None`.
pub fn parse_rmc(sentence: &str) -> Option<LocalReading> {
    let body = sentence.split('*').next()?;
    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() < 7 {
        return None;
    }
    if !matches!(fields[0], "$GPRMC" | "$GNRMC") || fields[2] != "A" {
        return None;
    }
    let lat = parse_nmea_coord(fields[3], fields[4])?;
    let lon = parse_nmea_coord(fields[5], fields[6])?;
    let heading = fields
        .get(8)
        .and_then(|course| course.trim().parse::<f64>().ok());
    Some(LocalReading {
        heading,
        ..LocalReading::position(lat, lon)
    })
}

/// Convert an NMEA `ddmm.mmmm` / `dddmm.mmmm` value to decimal degrees.
///
/// Latitude (`N`/`S`) carries two degree digits, longitude (`E`/`W`)
/// three; `S` and `W` are negative.
pub fn parse_nmea_coord(value: &str, hemisphere: &str) -> Option<f64> {
    let value = value.trim();
    let degree_digits = match hemisphere.trim() {
        "N" | "S" => 2,
        "E" | "W" => 3,
        _ => return None,
    };
    if value.len() < degree_digits + 2 || !value.is_ascii() {
        return None;
    }
    let degrees: f64 = value[..degree_digits].parse().ok()?;
    let minutes: f64 = value[degree_digits..].parse().ok()?;
    if !(0.0..60.0).contains(&minutes) {
        return None;
    }
    let decimal = degrees + minutes / 60.0;
    if matches!(hemisphere.trim(), "S" | "W") {
        Some(-decimal)
    } else {
        Some(decimal)
    }
}

/// Parse an actuator status line `lat,lon,left,right,heading`
pub fn parse_status(line: &str) -> Option<LocalReading> {
    let fields: Vec<f64> = line
        .split(',')
        .map(|f| f.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if fields.len() != 5 || fields.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(LocalReading {
        lat: fields[0],
        lon: fields[1],
        left_speed: Some(fields[2]),
        right_speed: Some(fields[3]),
        heading: Some(fields[4]),
    })
}
