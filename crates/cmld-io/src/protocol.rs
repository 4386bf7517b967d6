//! Command encoding and inbound chunk classification.
//!
//! Commands and log frames share one serial stream and the wire protocol has
//! no sequence numbers. A received chunk is a command response exactly when
//! its first line is one of the status lines in the response code table
//! (`100:OK`, `202:INVALID PARAMETER`, ...). Everything else is a log frame.

use cmld_core::response::{DeviceResponse, ResponseCode};

/// Line terminator appended to every command.
pub const TERMINATOR: &str = "\n\r";

/// Outcome of classifying one received chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// The chunk is a reply to a command.
    Response(DeviceResponse),

    /// The chunk is live log data and should be decoded as frames.
    LogData,
}

/// Encode a command for the wire.
///
/// ```
/// use cmld_io::protocol::encode_command;
///
/// assert_eq!(encode_command("CONFIG?"), b"CONFIG?\n\r".to_vec());
/// ```
pub fn encode_command(command: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(command.len() + TERMINATOR.len());
    out.extend_from_slice(command.as_bytes());
    out.extend_from_slice(TERMINATOR.as_bytes());
    out
}

/// Decide whether `chunk` is a command response or log data.
///
/// The first line runs up to the first `\n` or `\r`. For a response, the body
/// is everything after that line with all `\n`, `\r` and `\t` removed.
pub fn classify(chunk: &[u8]) -> Classified {
    let line_end = chunk
        .iter()
        .position(|&b| b == b'\n' || b == b'\r')
        .unwrap_or(chunk.len());

    let first_line = match std::str::from_utf8(&chunk[..line_end]) {
        Ok(line) => line,
        Err(_) => return Classified::LogData,
    };

    let code = match ResponseCode::from_status_line(first_line) {
        Some(code) => code,
        None => return Classified::LogData,
    };

    let body: String = String::from_utf8_lossy(&chunk[line_end..])
        .chars()
        .filter(|c| !matches!(c, '\n' | '\r' | '\t'))
        .collect();

    Classified::Response(DeviceResponse { code, body })
}
