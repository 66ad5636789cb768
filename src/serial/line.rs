//! # Bridge Line Protocol
//!
//! The USB bridge MCU speaks a newline-delimited ASCII protocol. Frames for
//! the bus are sent as `TX:` followed by space-separated uppercase hex;
//! everything the MCU reports back arrives as one line per event.
//!
//! ```text
//! TX:55 22 00 21 A0 ...          host -> bridge
//! [RX<-485] 55 1A 00 D0 A0 ...   bytes received on the bus
//! FRAME,123456,551A00D0A0...     bus-logger firmware capture
//! STATUS,...                     device status
//! ERROR,...                      device error
//! ```

/// Prefix of an outbound transmit request
pub const TX_PREFIX: &str = "TX:";

/// Prefix of a received-bytes report
pub const RX_PREFIX: &str = "[RX<-485]";

/// Prefix of a bus-logger capture line
pub const FRAME_PREFIX: &str = "FRAME,";

/// Prefix of a device status line
pub const STATUS_PREFIX: &str = "STATUS,";

/// Prefix of a device error line
pub const ERROR_PREFIX: &str = "ERROR,";

/// One parsed line from the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeLine {
    /// Bytes received on the RS-485 bus
    Rx(Vec<u8>),

    /// Bytes captured by the bus-logger firmware
    Captured { timestamp_ms: u64, bytes: Vec<u8> },

    /// Status report (text after the prefix)
    Status(String),

    /// Error report (text after the prefix)
    Error(String),

    /// Anything else, including malformed data lines
    Other(String),
}

/// Format a frame as a `TX:` request line, newline included
///
/// # Examples
///
/// ```
/// use esc_bridge::serial::line::format_tx_line;
///
/// assert_eq!(format_tx_line(&[0x55, 0x0a, 0xff]), "TX:55 0A FF\n");
/// ```
pub fn format_tx_line(frame: &[u8]) -> String {
    let hex: Vec<String> = frame.iter().map(|b| format!("{:02X}", b)).collect();
    format!("{}{}\n", TX_PREFIX, hex.join(" "))
}

/// Parse hex bytes written as `55 22`, `5522`, `0x55 0x22` or `0x55,0x22`
///
/// Returns `None` for empty input or anything that is not whole hex bytes.
pub fn parse_hex_bytes(text: &str) -> Option<Vec<u8>> {
    let mut digits = String::with_capacity(text.len());

    for token in text.split(|c: char| c.is_whitespace() || c == ',') {
        let token = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        digits.push_str(token);
    }

    if digits.is_empty() {
        return None;
    }

    hex::decode(&digits).ok()
}

/// Classify one line from the bridge (without its line terminator)
pub fn parse_line(line: &str) -> BridgeLine {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(RX_PREFIX) {
        return match parse_hex_bytes(rest) {
            Some(bytes) => BridgeLine::Rx(bytes),
            None => BridgeLine::Other(line.to_string()),
        };
    }

    if let Some(rest) = line.strip_prefix(FRAME_PREFIX) {
        if let Some((timestamp, hex)) = rest.split_once(',') {
            if let (Ok(timestamp_ms), Some(bytes)) = (timestamp.trim().parse(), parse_hex_bytes(hex)) {
                return BridgeLine::Captured { timestamp_ms, bytes };
            }
        }
        return BridgeLine::Other(line.to_string());
    }

    if let Some(rest) = line.strip_prefix(STATUS_PREFIX) {
        return BridgeLine::Status(rest.to_string());
    }

    if let Some(rest) = line.strip_prefix(ERROR_PREFIX) {
        return BridgeLine::Error(rest.to_string());
    }

    BridgeLine::Other(line.to_string())
}

/// Extract bus bytes from a saved capture log
///
/// Accepts bridge `[RX<-485]` lines, bus-logger `FRAME,` lines and plain hex
/// dumps, one chunk per line. Blank lines, `#` comments, status lines and
/// unparseable text are skipped. Bytes are concatenated in file order so the
/// result can be fed straight to the stream framer.
pub fn parse_capture(text: &str) -> Vec<u8> {
    let mut data = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_line(line) {
            BridgeLine::Rx(bytes) | BridgeLine::Captured { bytes, .. } => data.extend(bytes),
            BridgeLine::Other(text) => {
                let text = text.strip_prefix(TX_PREFIX).unwrap_or(text.as_str());
                if let Some(bytes) = parse_hex_bytes(text) {
                    data.extend(bytes);
                }
            }
            BridgeLine::Status(_) | BridgeLine::Error(_) => {}
        }
    }

    data
}
