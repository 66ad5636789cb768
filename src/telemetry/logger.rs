//! JSONL output for decoded telemetry

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{self, Write};

use crate::error::Result;
use crate::esc::protocol::TelemetryReading;

/// A telemetry reading stamped with its host receive time
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub reading: TelemetryReading,
}

impl TelemetryRecord {
    /// Stamp a reading with the current time
    pub fn now(reading: TelemetryReading) -> Self {
        Self {
            timestamp: Utc::now(),
            reading,
        }
    }
}

/// Writes one JSON object per line
///
/// # Examples
///
/// ```
/// use esc_bridge::esc::decoder::decode_a0d0;
/// use esc_bridge::telemetry::{JsonlWriter, TelemetryRecord};
///
/// let reading = decode_a0d0(0, &[0u8; 16])?;
/// let mut writer = JsonlWriter::new(Vec::new());
/// writer.write(&TelemetryRecord::now(reading))?;
///
/// let output = String::from_utf8(writer.into_inner()).unwrap();
/// assert!(output.ends_with('\n'));
/// # Ok::<(), esc_bridge::error::EscBridgeError>(())
/// ```
pub struct JsonlWriter<W: Write> {
    writer: W,
    records_written: u64,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            records_written: 0,
        }
    }

    /// Append one record
    pub fn write<T: Serialize>(&mut self, record: &T) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record).map_err(io::Error::from)?;
        self.writer.write_all(b"\n")?;
        self.records_written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
