//! Formatting helpers for raw device bytes.
//!
//! Log records and `USB RESPONSE` annotations render payloads side by side
//! as hex and ASCII. These are the two halves of that view.

/// Format bytes as space-separated upper-case hex pairs.
///
/// # Example
///
/// ```
/// use cmld_core::bytes_to_hex;
///
/// assert_eq!(bytes_to_hex(&[0x04, 0xA1, 0xFF]), "04 A1 FF");
/// assert_eq!(bytes_to_hex(&[]), "");
/// ```
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format bytes as printable ASCII, replacing anything else with `.`.
///
/// # Example
///
/// ```
/// use cmld_core::bytes_to_ascii;
///
/// assert_eq!(bytes_to_ascii(b"OK\r\n"), "OK..");
/// assert_eq!(bytes_to_ascii(&[0x26, 0x00, 0x7E, 0x7F]), "&.~.");
/// ```
pub fn bytes_to_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        })
        .collect()
}
