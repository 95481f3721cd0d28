use crate::types::Sample;
use glam::DVec3;
use std::collections::VecDeque;
use thiserror::Error;

/// Milli-g to m/s^2.
pub const MG_TO_MS2: f64 = 9.80665 / 1000.0;
/// Milli-degrees per second to degrees per second.
pub const MDPS_TO_DPS: f64 = 1.0 / 1000.0;

/// Lines longer than this without a newline are discarded as garbage.
const MAX_LINE_LEN: usize = 256;

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("Empty line")]
    EmptyLine,
    #[error("Expected 6 or 9 fields, got {0}")]
    FieldCount(usize),
    #[error("Unparsable field {index}: {field:?}")]
    BadField { index: usize, field: String },
    #[error("Line exceeded {} bytes without a terminator", MAX_LINE_LEN)]
    Overlong,
}

/// Streaming parser for the device link's CSV lines.
///
/// Each line is `ax,ay,az,gx,gy,gz` in milli-g and milli-degrees/s, optionally
/// followed by `mx,my,mz` in Gauss. Feed raw bytes via `push_data`, then drain
/// samples via `next_sample`; values come out in SI units.
pub struct LineParser {
    buffer: VecDeque<u8>,
}

impl LineParser {
    pub fn new() -> Self {
        Self {
            buffer: VecDeque::with_capacity(1024),
        }
    }

    /// Append received bytes to the internal buffer.
    pub fn push_data(&mut self, data: &[u8]) {
        self.buffer.extend(data);
    }

    /// Bytes held back waiting for a line terminator.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Try to extract the next complete line from the buffer.
    /// Returns `None` if no complete line is available yet.
    pub fn next_sample(&mut self) -> Option<Result<Sample, ProtocolError>> {
        let newline = match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => pos,
            None => {
                if self.buffer.len() > MAX_LINE_LEN {
                    self.buffer.clear();
                    return Some(Err(ProtocolError::Overlong));
                }
                return None;
            }
        };

        let line: Vec<u8> = self.buffer.drain(..=newline).collect();
        Some(parse_line(&line))
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one raw line into an SI-unit sample.
pub fn parse_line(raw: &[u8]) -> Result<Sample, ProtocolError> {
    let text = String::from_utf8_lossy(raw).replace('\0', "");
    let line = text.trim();
    if line.is_empty() {
        return Err(ProtocolError::EmptyLine);
    }

    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 6 && fields.len() != 9 {
        return Err(ProtocolError::FieldCount(fields.len()));
    }

    let mut values = [0.0f64; 9];
    for (index, field) in fields.iter().enumerate() {
        values[index] = field
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ProtocolError::BadField {
                index,
                field: field.to_string(),
            })?;
    }

    let accel = DVec3::new(values[0], values[1], values[2]) * MG_TO_MS2;
    let gyro = DVec3::new(values[3], values[4], values[5]) * MDPS_TO_DPS;
    let mag = (fields.len() == 9).then(|| DVec3::new(values[6], values[7], values[8]));

    Ok(Sample { accel, gyro, mag })
}
