//! cmld-core: Core traits, types, and error definitions for cmld.
//!
//! This crate defines the device-agnostic pieces every other cmld crate
//! builds on: the byte-level [`Transport`] seam, the fixed table of
//! [`ResponseCode`]s the Chameleon Mini replies with, the cached
//! [`DeviceStatus`] snapshot, and the shared [`Error`] type.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel
//! - [`ResponseCode`] -- status line registry (`100:OK`, `202:INVALID PARAMETER`, ...)
//! - [`DeviceStatus`] -- snapshot of the device configuration fields
//! - [`SessionEvent`] -- asynchronous session notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod helpers;
pub mod response;
pub mod status;
pub mod transport;

pub use error::{Error, Result};
pub use events::SessionEvent;
pub use helpers::{bytes_to_ascii, bytes_to_hex};
pub use response::{DeviceResponse, ResponseCode};
pub use status::{format_uid, strip_annotation, DeviceStatus, NO_UID};
pub use transport::Transport;
