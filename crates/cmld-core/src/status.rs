//! Cached device status snapshot.
//!
//! [`DeviceStatus`] holds the configuration fields the host polls from the
//! device on a fixed interval. The snapshot starts out empty and is
//! overwritten wholesale on every refresh; the refresh sequence itself lives
//! in `cmld-io`.

use std::fmt;

/// The value the device reports for `UID?` when no UID is configured.
pub const NO_UID: &str = "NO UID.";

/// Snapshot of the device configuration fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Active configuration (e.g. `"ISO14443A_SNIFF"`, `"MF_CLASSIC_1K"`).
    pub config: String,
    /// Colon-grouped UID (`"04:A1:B2:C3"`) or [`NO_UID`].
    pub uid: String,
    /// UID size in bytes.
    pub uid_size: u32,
    /// Card memory size in bytes.
    pub mem_size: u32,
    /// Log memory size in bytes.
    pub log_size: u32,
    /// Active DIP setting slot.
    pub dip_setting: u32,
    /// Whether an RF field is currently detected.
    pub field: bool,
    /// Whether the active slot is read-only.
    pub read_only: bool,
    /// Whether the battery is charging.
    pub charging: bool,
    /// Reader field threshold in millivolts.
    pub threshold: u32,
    /// Command timeout setting, as reported by the device.
    pub timeout: String,
}

impl DeviceStatus {
    /// `MEM-<kib>K/LOG-<kib>K/DIP#<slot>`
    pub fn memory_summary(&self) -> String {
        format!(
            "MEM-{}K/LOG-{}K/DIP#{}",
            self.mem_size / 1024,
            self.log_size / 1024,
            self.dip_setting
        )
    }

    /// `<RO|RW>/FLD-<0|1>/<|NO->CHRG`
    pub fn flags_summary(&self) -> String {
        format!(
            "{}/FLD-{}/{}CHRG",
            if self.read_only { "RO" } else { "RW" },
            u8::from(self.field),
            if self.charging { "" } else { "NO-" }
        )
    }

    /// `THRS-<mv> mv/TMT-<timeout>`
    pub fn threshold_summary(&self) -> String {
        format!("THRS-{} mv/TMT-{}", self.threshold, self.timeout)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.config,
            self.uid,
            self.memory_summary(),
            self.flags_summary(),
            self.threshold_summary()
        )
    }
}

/// Group a raw UID reply into colon-separated byte pairs.
///
/// The sentinel [`NO_UID`] is passed through unchanged. A trailing odd
/// character is kept as-is after the last colon.
///
/// ```
/// use cmld_core::format_uid;
///
/// assert_eq!(format_uid("04A1B2C3"), "04:A1:B2:C3");
/// assert_eq!(format_uid("NO UID."), "NO UID.");
/// ```
pub fn format_uid(raw: &str) -> String {
    if raw == NO_UID {
        return raw.to_string();
    }
    let chars: Vec<char> = raw.chars().collect();
    chars
        .chunks(2)
        .map(|pair| pair.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(":")
}

/// Strip the parenthesized annotation the device appends to `LOGMEM?`.
///
/// `"2048 (FREE)"` becomes `"2048"`.
pub fn strip_annotation(raw: &str) -> &str {
    match raw.find(" (") {
        Some(pos) if raw.ends_with(')') => &raw[..pos],
        _ => raw,
    }
}
