//! Transport implementations for cmld.
//!
//! This crate provides [`SerialTransport`], the concrete
//! [`Transport`](cmld_core::Transport) for the Chameleon Mini's USB virtual
//! serial port.
//!
//! # Example
//!
//! ```no_run
//! use cmld_transport::SerialTransport;
//! use cmld_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> cmld_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyACM0", 115_200).await?;
//! transport.send(b"VERSION?\n\r").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_millis(700)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{
    is_chameleon_usb, FlowControl, SerialConfig, SerialTransport, CHAMELEON_USB_PID,
    CHAMELEON_USB_VID, DEFAULT_BAUD_RATE,
};
