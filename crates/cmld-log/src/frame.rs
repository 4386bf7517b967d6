//! Device log frame decoding.
//!
//! In `LOGMODE=LIVE` the Chameleon Mini pushes every log entry over the
//! serial link as soon as it is written. Each entry uses the same layout as
//! the on-device log memory:
//!
//! ```text
//! +------+--------+-----------+----------------+
//! | code | length | tick (2)  | data (length)  |
//! +------+--------+-----------+----------------+
//! ```
//!
//! `tick` is the device systick at the time of the entry. Several entries
//! may arrive back to back in one read.

use std::fmt;

use crate::tick::TickEncoding;

/// Size of the fixed frame header (code, length, tick).
pub const HEADER_LEN: usize = 4;

/// Which way a captured payload travelled, from the emulated card's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Unknown,
    /// Reader to card.
    Incoming,
    /// Card to reader.
    Outgoing,
}

impl Direction {
    /// Short marker used in the text rendering of a record.
    pub fn marker(self) -> &'static str {
        match self {
            Direction::Unknown => "---",
            Direction::Incoming => "<--",
            Direction::Outgoing => "-->",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// Log entry type, as written by the firmware into the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCode {
    Generic,
    ConfigSet,
    SettingSet,
    UidSet,
    ResetApp,
    AppCmdRead,
    AppCmdWrite,
    AppCmdInc,
    AppCmdDec,
    AppCmdTransfer,
    AppCmdRestore,
    AppCmdAuth,
    AppCmdHalt,
    AppCmdUnknown,
    AppCmdReqa,
    AppCmdWupa,
    AppCmdDeselect,
    AppAuthing,
    AppAuthed,
    CodecRxData,
    CodecTxData,
    CodecRxDataWithParity,
    CodecTxDataWithParity,
    SnifferReaderData,
    SnifferReaderDataWithParity,
    SnifferCardData,
    SnifferCardDataWithParity,
    ReaderFieldDetected,
    SystemBoot,
    AppAuthFailed,
    AppChecksumFailed,
    AppNotAuthed,
}

impl LogCode {
    /// Decode the header byte. `None` for bytes the firmware never writes.
    pub fn from_byte(byte: u8) -> Option<LogCode> {
        let code = match byte {
            0x10 => LogCode::Generic,
            0x11 => LogCode::ConfigSet,
            0x12 => LogCode::SettingSet,
            0x13 => LogCode::UidSet,
            0x20 => LogCode::ResetApp,
            0x21 => LogCode::AppCmdRead,
            0x22 => LogCode::AppCmdWrite,
            0x23 => LogCode::AppCmdInc,
            0x24 => LogCode::AppCmdDec,
            0x25 => LogCode::AppCmdTransfer,
            0x26 => LogCode::AppCmdRestore,
            0x27 => LogCode::AppCmdAuth,
            0x28 => LogCode::AppCmdHalt,
            0x29 => LogCode::AppCmdUnknown,
            0x2A => LogCode::AppCmdReqa,
            0x2B => LogCode::AppCmdWupa,
            0x2C => LogCode::AppCmdDeselect,
            0x30 => LogCode::AppAuthing,
            0x31 => LogCode::AppAuthed,
            0x40 => LogCode::CodecRxData,
            0x41 => LogCode::CodecTxData,
            0x42 => LogCode::CodecRxDataWithParity,
            0x43 => LogCode::CodecTxDataWithParity,
            0x44 => LogCode::SnifferReaderData,
            0x45 => LogCode::SnifferReaderDataWithParity,
            0x46 => LogCode::SnifferCardData,
            0x47 => LogCode::SnifferCardDataWithParity,
            0x48 => LogCode::ReaderFieldDetected,
            0x80 => LogCode::SystemBoot,
            0xC0 => LogCode::AppAuthFailed,
            0xC1 => LogCode::AppChecksumFailed,
            0xC2 => LogCode::AppNotAuthed,
            _ => return None,
        };
        Some(code)
    }

    /// The header byte for this code.
    pub fn byte(self) -> u8 {
        match self {
            LogCode::Generic => 0x10,
            LogCode::ConfigSet => 0x11,
            LogCode::SettingSet => 0x12,
            LogCode::UidSet => 0x13,
            LogCode::ResetApp => 0x20,
            LogCode::AppCmdRead => 0x21,
            LogCode::AppCmdWrite => 0x22,
            LogCode::AppCmdInc => 0x23,
            LogCode::AppCmdDec => 0x24,
            LogCode::AppCmdTransfer => 0x25,
            LogCode::AppCmdRestore => 0x26,
            LogCode::AppCmdAuth => 0x27,
            LogCode::AppCmdHalt => 0x28,
            LogCode::AppCmdUnknown => 0x29,
            LogCode::AppCmdReqa => 0x2A,
            LogCode::AppCmdWupa => 0x2B,
            LogCode::AppCmdDeselect => 0x2C,
            LogCode::AppAuthing => 0x30,
            LogCode::AppAuthed => 0x31,
            LogCode::CodecRxData => 0x40,
            LogCode::CodecTxData => 0x41,
            LogCode::CodecRxDataWithParity => 0x42,
            LogCode::CodecTxDataWithParity => 0x43,
            LogCode::SnifferReaderData => 0x44,
            LogCode::SnifferReaderDataWithParity => 0x45,
            LogCode::SnifferCardData => 0x46,
            LogCode::SnifferCardDataWithParity => 0x47,
            LogCode::ReaderFieldDetected => 0x48,
            LogCode::SystemBoot => 0x80,
            LogCode::AppAuthFailed => 0xC0,
            LogCode::AppChecksumFailed => 0xC1,
            LogCode::AppNotAuthed => 0xC2,
        }
    }

    /// Short upper-case label used in text and HTML exports.
    pub fn label(self) -> &'static str {
        match self {
            LogCode::Generic => "GENERIC",
            LogCode::ConfigSet => "CONFIG SET",
            LogCode::SettingSet => "SETTING SET",
            LogCode::UidSet => "UID SET",
            LogCode::ResetApp => "RESET APP",
            LogCode::AppCmdRead => "CMD READ",
            LogCode::AppCmdWrite => "CMD WRITE",
            LogCode::AppCmdInc => "CMD INC",
            LogCode::AppCmdDec => "CMD DEC",
            LogCode::AppCmdTransfer => "CMD TRANSFER",
            LogCode::AppCmdRestore => "CMD RESTORE",
            LogCode::AppCmdAuth => "CMD AUTH",
            LogCode::AppCmdHalt => "CMD HALT",
            LogCode::AppCmdUnknown => "CMD UNKNOWN",
            LogCode::AppCmdReqa => "CMD REQA",
            LogCode::AppCmdWupa => "CMD WUPA",
            LogCode::AppCmdDeselect => "CMD DESELECT",
            LogCode::AppAuthing => "AUTHING",
            LogCode::AppAuthed => "AUTHED",
            LogCode::CodecRxData => "CODEC RX",
            LogCode::CodecTxData => "CODEC TX",
            LogCode::CodecRxDataWithParity => "CODEC RX W/ PARITY",
            LogCode::CodecTxDataWithParity => "CODEC TX W/ PARITY",
            LogCode::SnifferReaderData => "SNIFF READER",
            LogCode::SnifferReaderDataWithParity => "SNIFF READER W/ PARITY",
            LogCode::SnifferCardData => "SNIFF CARD",
            LogCode::SnifferCardDataWithParity => "SNIFF CARD W/ PARITY",
            LogCode::ReaderFieldDetected => "FIELD DETECTED",
            LogCode::SystemBoot => "BOOT",
            LogCode::AppAuthFailed => "AUTH FAILED",
            LogCode::AppChecksumFailed => "CHECKSUM FAILED",
            LogCode::AppNotAuthed => "NOT AUTHED",
        }
    }

    /// Direction of the payload carried under this code.
    pub fn direction(self) -> Direction {
        match self {
            LogCode::CodecRxData
            | LogCode::CodecRxDataWithParity
            | LogCode::SnifferReaderData
            | LogCode::SnifferReaderDataWithParity => Direction::Incoming,
            LogCode::CodecTxData
            | LogCode::CodecTxDataWithParity
            | LogCode::SnifferCardData
            | LogCode::SnifferCardDataWithParity => Direction::Outgoing,
            _ => Direction::Unknown,
        }
    }
}

impl fmt::Display for LogCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One decoded device log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFrame {
    pub code: LogCode,
    /// Device systick at the time the entry was written.
    pub tick: u16,
    pub data: Vec<u8>,
}

impl LogFrame {
    /// Re-encode the frame in device layout with the given tick value.
    pub fn encode_with_tick(&self, tick: u16, encoding: &TickEncoding) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len());
        out.push(self.code.byte());
        // Data longer than 255 bytes cannot come from the device; truncate
        // rather than emit a header that lies about the length.
        let len = self.data.len().min(u8::MAX as usize);
        out.push(len as u8);
        out.extend_from_slice(&encoding.encode(tick));
        out.extend_from_slice(&self.data[..len]);
        out
    }
}

/// Result of attempting to decode one frame from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDecode {
    /// A complete frame was decoded.
    Frame {
        frame: LogFrame,
        /// Number of bytes consumed from the input buffer.
        consumed: usize,
    },

    /// The buffer does not start with a valid frame header.
    Invalid,

    /// The header is valid but the buffer ends before the data does.
    Incomplete,
}

/// Decode one frame from the start of `buf`.
pub fn decode_frame(buf: &[u8], encoding: &TickEncoding) -> FrameDecode {
    if buf.len() < HEADER_LEN {
        return FrameDecode::Incomplete;
    }

    let code = match LogCode::from_byte(buf[0]) {
        Some(code) => code,
        None => return FrameDecode::Invalid,
    };

    let len = buf[1] as usize;
    let consumed = HEADER_LEN + len;
    if buf.len() < consumed {
        return FrameDecode::Incomplete;
    }

    let tick = encoding.decode([buf[2], buf[3]]);
    FrameDecode::Frame {
        frame: LogFrame {
            code,
            tick,
            data: buf[HEADER_LEN..consumed].to_vec(),
        },
        consumed,
    }
}

/// Decode every frame in a received chunk.
///
/// Returns the frames found and the number of trailing bytes that could not
/// be decoded. Decoding stops at the first invalid or truncated header; the
/// remainder of the chunk is not resynchronised.
pub fn decode_chunk(chunk: &[u8], encoding: &TickEncoding) -> (Vec<LogFrame>, usize) {
    let mut frames = Vec::new();
    let mut pos = 0;

    while pos < chunk.len() {
        match decode_frame(&chunk[pos..], encoding) {
            FrameDecode::Frame { frame, consumed } => {
                frames.push(frame);
                pos += consumed;
            }
            FrameDecode::Invalid | FrameDecode::Incomplete => break,
        }
    }

    (frames, chunk.len() - pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn be() -> TickEncoding {
        TickEncoding::default()
    }

    // -----------------------------------------------------------------------
    // decode_frame
    // -----------------------------------------------------------------------

    #[test]
    fn decode_sniffer_reader_frame() {
        let buf = [0x44, 0x02, 0x01, 0x2C, 0x26, 0x00];
        assert_eq!(
            decode_frame(&buf, &be()),
            FrameDecode::Frame {
                frame: LogFrame {
                    code: LogCode::SnifferReaderData,
                    tick: 300,
                    data: vec![0x26, 0x00],
                },
                consumed: 6,
            }
        );
    }

    #[test]
    fn decode_empty_data() {
        let buf = [0x80, 0x00, 0x00, 0x05];
        match decode_frame(&buf, &be()) {
            FrameDecode::Frame { frame, consumed } => {
                assert_eq!(frame.code, LogCode::SystemBoot);
                assert!(frame.data.is_empty());
                assert_eq!(consumed, 4);
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn decode_unknown_code_is_invalid() {
        assert_eq!(decode_frame(b"hello", &be()), FrameDecode::Invalid);
        assert_eq!(decode_frame(&[0x00, 0x00, 0x00, 0x00], &be()), FrameDecode::Invalid);
    }

    #[test]
    fn decode_short_header_is_incomplete() {
        assert_eq!(decode_frame(&[0x40, 0x01], &be()), FrameDecode::Incomplete);
    }

    #[test]
    fn decode_truncated_data_is_incomplete() {
        assert_eq!(
            decode_frame(&[0x40, 0x03, 0x00, 0x00, 0xAA], &be()),
            FrameDecode::Incomplete
        );
    }

    #[test]
    fn decode_little_endian_tick() {
        let le = TickEncoding::new(crate::tick::ByteOrder::LittleEndian, 0x1_0000).unwrap();
        match decode_frame(&[0x10, 0x00, 0x2C, 0x01], &le) {
            FrameDecode::Frame { frame, .. } => assert_eq!(frame.tick, 300),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // decode_chunk
    // -----------------------------------------------------------------------

    #[test]
    fn chunk_with_two_frames() {
        let chunk = [
            0x44, 0x01, 0x00, 0x10, 0x26, // REQA from reader
            0x46, 0x02, 0x00, 0x12, 0x44, 0x00, // ATQA from card
        ];
        let (frames, dropped) = decode_chunk(&chunk, &be());
        assert_eq!(dropped, 0);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].code.direction(), Direction::Incoming);
        assert_eq!(frames[1].code.direction(), Direction::Outgoing);
        assert_eq!(frames[1].tick, 0x12);
    }

    #[test]
    fn chunk_with_trailing_garbage() {
        let chunk = [0x40, 0x01, 0x00, 0x01, 0x93, 0xFF, 0xFF];
        let (frames, dropped) = decode_chunk(&chunk, &be());
        assert_eq!(frames.len(), 1);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn chunk_of_text_is_all_dropped() {
        let chunk = b"hello there";
        let (frames, dropped) = decode_chunk(chunk, &be());
        assert!(frames.is_empty());
        assert_eq!(dropped, chunk.len());
    }

    #[test]
    fn empty_chunk() {
        let (frames, dropped) = decode_chunk(&[], &be());
        assert!(frames.is_empty());
        assert_eq!(dropped, 0);
    }

    // -----------------------------------------------------------------------
    // LogCode
    // -----------------------------------------------------------------------

    #[test]
    fn code_byte_round_trip() {
        for byte in 0..=u8::MAX {
            if let Some(code) = LogCode::from_byte(byte) {
                assert_eq!(code.byte(), byte);
            }
        }
    }

    #[test]
    fn generic_direction_unknown() {
        assert_eq!(LogCode::Generic.direction(), Direction::Unknown);
        assert_eq!(LogCode::AppCmdAuth.direction(), Direction::Unknown);
    }

    #[test]
    fn encode_with_tick_matches_layout() {
        let frame = LogFrame {
            code: LogCode::CodecTxData,
            tick: 999,
            data: vec![0x04, 0x00],
        };
        assert_eq!(
            frame.encode_with_tick(0x0102, &be()),
            vec![0x41, 0x02, 0x01, 0x02, 0x04, 0x00]
        );
    }
}
