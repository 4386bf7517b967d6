//! User-level actions on a session.
//!
//! [`QuickAction`]s are the one-shot device and annotation buttons of the
//! debugger, [`BatchAction`]s operate on every selected data record, and
//! [`Peripheral`] covers the button and LED assignments. [`ActionRunner`]
//! executes all of them against a [`DeviceSession`] and also exports the
//! log to disk.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use cmld_core::error::{Error, Result};
use cmld_core::helpers::{bytes_to_ascii, bytes_to_hex};
use cmld_log::{write_to_dir, ExportFormat, MetadataKind};

use crate::prompt::Prompter;
use crate::session::{DeviceSession, DispatchResult, Pacing, SNIFF_CONFIG};

/// Prompt shown for the annotation actions.
pub const EVENT_PROMPT: &str = "Description of the new event? ";

// ---------------------------------------------------------------------------
// Quick actions
// ---------------------------------------------------------------------------

/// One-shot actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuickAction {
    /// Switch to reader mode.
    Reader,
    /// Switch to sniffing mode.
    Sniffer,
    Ultralight,
    Classic1K,
    Classic4K,
    Classic4K7B,
    /// Reset the device and reconfigure live logging.
    Reset,
    LocalUid,
    Charging,
    Strength,
    Firmware,
    Identify,
    /// Record the device systick.
    OnClick,
    /// Prompt for a description and append an annotation of this kind.
    Annotate(MetadataKind),
}

impl QuickAction {
    /// The command this action writes, if any.
    pub fn command(self) -> Option<String> {
        let cmd = match self {
            QuickAction::Reader => "CONFIG=ISO14443A_READER".to_string(),
            QuickAction::Sniffer => format!("CONFIG={SNIFF_CONFIG}"),
            QuickAction::Ultralight => "CONFIG=MF_ULTRALIGHT".to_string(),
            QuickAction::Classic1K => "CONFIG=MF_CLASSIC_1K".to_string(),
            QuickAction::Classic4K => "CONFIG=MF_CLASSIC_4K".to_string(),
            QuickAction::Classic4K7B => "CONFIG=MF_CLASSIC_4K_7B".to_string(),
            QuickAction::Reset => "RESET".to_string(),
            QuickAction::LocalUid => "GETUID".to_string(),
            QuickAction::Charging => "CHARGING?".to_string(),
            QuickAction::Strength => "RSSI?".to_string(),
            QuickAction::Firmware => "VERSION?".to_string(),
            QuickAction::Identify => "IDENTIFY".to_string(),
            QuickAction::OnClick => "SYSTICK?".to_string(),
            QuickAction::Annotate(_) => return None,
        };
        Some(cmd)
    }

    pub fn label(self) -> &'static str {
        match self {
            QuickAction::Reader => "READER",
            QuickAction::Sniffer => "SNIFFER",
            QuickAction::Ultralight => "ULTRALIGHT",
            QuickAction::Classic1K => "CLASSIC-1K",
            QuickAction::Classic4K => "CLASSIC-4K",
            QuickAction::Classic4K7B => "CLASSIC-4K7B",
            QuickAction::Reset => "RESET",
            QuickAction::LocalUid => "LOCAL UID",
            QuickAction::Charging => "CHARGING",
            QuickAction::Strength => "STRENGTH",
            QuickAction::Firmware => "FIRMWARE",
            QuickAction::Identify => "IDENTIFY",
            QuickAction::OnClick => "ONCLICK",
            QuickAction::Annotate(kind) => kind.label(),
        }
    }
}

impl fmt::Display for QuickAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for QuickAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let action = match s.trim().to_ascii_uppercase().as_str() {
            "READER" => QuickAction::Reader,
            "SNIFFER" => QuickAction::Sniffer,
            "ULTRALIGHT" => QuickAction::Ultralight,
            "CLASSIC-1K" => QuickAction::Classic1K,
            "CLASSIC-4K" => QuickAction::Classic4K,
            "CLASSIC-4K7B" => QuickAction::Classic4K7B,
            "RESET" => QuickAction::Reset,
            "LOCAL UID" => QuickAction::LocalUid,
            "CHARGING" => QuickAction::Charging,
            "STRENGTH" => QuickAction::Strength,
            "FIRMWARE" => QuickAction::Firmware,
            "IDENTIFY" => QuickAction::Identify,
            "ONCLICK" => QuickAction::OnClick,
            other => {
                let kind: MetadataKind = other.parse()?;
                match kind {
                    MetadataKind::Status
                    | MetadataKind::NewEvent
                    | MetadataKind::Error
                    | MetadataKind::Location
                    | MetadataKind::CardInfo => QuickAction::Annotate(kind),
                    _ => {
                        return Err(Error::InvalidParameter(format!(
                            "not a quick action: {other}"
                        )))
                    }
                }
            }
        };
        Ok(action)
    }
}

// ---------------------------------------------------------------------------
// Batch actions
// ---------------------------------------------------------------------------

/// Actions applied to every selected data record, in log order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchAction {
    /// `SEND <hex>`
    Send,
    /// `SEND_RAW <hex>`
    SendRaw,
    /// `UID=<hex>`
    CloneUid,
    /// Append a hex/ASCII dump as a `PRINT` record.
    Print,
    /// Trim the cached text of each record.
    TrimCommand,
}

impl FromStr for BatchAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SEND" => Ok(BatchAction::Send),
            "SEND_RAW" => Ok(BatchAction::SendRaw),
            "CLONE_UID" => Ok(BatchAction::CloneUid),
            "PRINT" => Ok(BatchAction::Print),
            "TRIM_CMD" => Ok(BatchAction::TrimCommand),
            other => Err(Error::InvalidParameter(format!(
                "not a batch action: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Peripherals
// ---------------------------------------------------------------------------

/// Configurable buttons and LEDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Peripheral {
    RButton,
    RButtonLong,
    LButton,
    LButtonLong,
    LedRed,
    LedGreen,
}

impl Peripheral {
    pub const ALL: [Peripheral; 6] = [
        Peripheral::RButton,
        Peripheral::RButtonLong,
        Peripheral::LButton,
        Peripheral::LButtonLong,
        Peripheral::LedRed,
        Peripheral::LedGreen,
    ];

    /// Setting name in the device command set.
    pub fn name(self) -> &'static str {
        match self {
            Peripheral::RButton => "RBUTTON",
            Peripheral::RButtonLong => "RBUTTON_LONG",
            Peripheral::LButton => "LBUTTON",
            Peripheral::LButtonLong => "LBUTTON_LONG",
            Peripheral::LedRed => "LEDRED",
            Peripheral::LedGreen => "LEDGREEN",
        }
    }
}

impl FromStr for Peripheral {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        Peripheral::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| Error::InvalidParameter(format!("not a peripheral: {s}")))
    }
}

/// Build the command assigning `value` to `peripheral`.
///
/// Placeholder values starting with `--` mean "no function" and map to `NONE`.
pub fn peripheral_command(peripheral: Peripheral, value: &str) -> String {
    let value = if value.starts_with("--") { "NONE" } else { value };
    format!("{}={}", peripheral.name(), value)
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Executes actions against a session.
pub struct ActionRunner {
    session: Arc<DeviceSession>,
    prompter: Arc<dyn Prompter>,
}

impl ActionRunner {
    pub fn new(session: Arc<DeviceSession>, prompter: Arc<dyn Prompter>) -> Self {
        ActionRunner { session, prompter }
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    /// Run a quick action. Returns the id of the record it appended, if any.
    pub async fn run_quick(&self, action: QuickAction) -> Result<Option<u32>> {
        let log = self.session.log();
        match action {
            QuickAction::Annotate(kind) => {
                let text = match self.prompter.prompt(EVENT_PROMPT).await {
                    Some(text) => text,
                    None => return Ok(None),
                };
                Ok(Some(log.append_metadata(kind, text)))
            }
            QuickAction::OnClick => {
                self.session.execute("SYSTICK?", Pacing::Immediate).await?;
                Ok(Some(log.append_metadata(MetadataKind::OnClick, "SYSTICK Millis := ")))
            }
            QuickAction::Reset => {
                self.session.execute("RESET", Pacing::Immediate).await?;
                self.session.configure_live_logging().await?;
                Ok(None)
            }
            other => {
                if let Some(cmd) = other.command() {
                    self.session.execute(&cmd, Pacing::Immediate).await?;
                }
                Ok(None)
            }
        }
    }

    /// Apply `action` to every selected data record. Returns how many
    /// records it touched.
    pub async fn run_batch(&self, action: BatchAction) -> Result<usize> {
        let log = self.session.log();
        if action == BatchAction::TrimCommand {
            return Ok(log.trim_selected());
        }

        let selected = log.selected_data();
        for record in &selected {
            match action {
                BatchAction::Send | BatchAction::SendRaw => {
                    let hex = record.payload_hex();
                    log.append_metadata(MetadataKind::CardInfo, format!("Sending: {hex}..."));
                    let verb = if action == BatchAction::Send { "SEND" } else { "SEND_RAW" };
                    self.session
                        .execute(&format!("{verb} {hex}"), Pacing::Immediate)
                        .await?;
                }
                BatchAction::CloneUid => {
                    self.session
                        .execute(&format!("UID={}", record.payload_hex()), Pacing::Immediate)
                        .await?;
                }
                BatchAction::Print => {
                    let data = record.entry_data();
                    log.append_metadata(
                        MetadataKind::Print,
                        format!("{}\n------\n{}", bytes_to_hex(data), bytes_to_ascii(data)),
                    );
                }
                BatchAction::TrimCommand => {}
            }
        }
        Ok(selected.len())
    }

    /// Read every peripheral assignment, in [`Peripheral::ALL`] order.
    pub async fn query_peripherals(&self) -> Result<Vec<(Peripheral, String)>> {
        let _guard = self.session.lock_serial().await?;
        let mut settings = Vec::with_capacity(Peripheral::ALL.len());
        for peripheral in Peripheral::ALL {
            let value = self
                .session
                .query_setting_locked(&format!("{}?", peripheral.name()))
                .await?;
            settings.push((peripheral, value));
        }
        Ok(settings)
    }

    pub async fn set_peripheral(&self, peripheral: Peripheral, value: &str) -> Result<DispatchResult> {
        self.session
            .execute(&peripheral_command(peripheral, value), Pacing::Immediate)
            .await
    }

    /// Write the log to a timestamped file in `dir` and record the outcome
    /// in the log itself.
    pub fn export_to_dir(&self, dir: &Path, format: ExportFormat) -> Result<PathBuf> {
        let log = self.session.log();
        let records = log.snapshot();
        match write_to_dir(dir, &records, format, &self.session.config().export) {
            Ok(path) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                log.append_metadata(MetadataKind::Status, format!("Saved log file to \"{name}\"."));
                info!("log saved to {}", path.display());
                Ok(path)
            }
            Err(e) => {
                warn!("log export failed: {e}");
                log.append_metadata(MetadataKind::Error, e.to_string());
                Err(e)
            }
        }
    }
}
