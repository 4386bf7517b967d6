//! Device tick arithmetic for the binary log format.
//!
//! The firmware stamps each log entry with its systick counter. Binary
//! exports store the *difference* to the previous exported entry instead, so
//! that a reader reconstructs absolute time by summing deltas. Both the
//! counter's wrap boundary and the byte order of the two tick bytes are
//! firmware details, so they are carried as configuration rather than
//! assumed.

use cmld_core::error::{Error, Result};

/// Byte order of the two tick bytes in a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

/// Tick width and byte order of the device's log counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickEncoding {
    byte_order: ByteOrder,
    /// Counter modulus: ticks run `0..modulus` and then wrap.
    modulus: u32,
}

impl Default for TickEncoding {
    /// Big-endian, full 16-bit counter.
    fn default() -> Self {
        TickEncoding {
            byte_order: ByteOrder::BigEndian,
            modulus: 0x1_0000,
        }
    }
}

impl TickEncoding {
    /// Create an encoding. `modulus` must be in `1..=65536`.
    pub fn new(byte_order: ByteOrder, modulus: u32) -> Result<Self> {
        if modulus == 0 || modulus > 0x1_0000 {
            return Err(Error::InvalidParameter(format!(
                "tick modulus {modulus} outside 1..=65536"
            )));
        }
        Ok(TickEncoding {
            byte_order,
            modulus,
        })
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn modulus(&self) -> u32 {
        self.modulus
    }

    /// Reduce a raw tick into the counter range.
    pub fn wrap(&self, tick: u32) -> u16 {
        (tick % self.modulus) as u16
    }

    /// Ticks elapsed from `prior` to `tick`, assuming at most one wrap.
    pub fn delta(&self, prior: u16, tick: u16) -> u16 {
        let prior = u32::from(prior) % self.modulus;
        let tick = u32::from(tick) % self.modulus;
        ((tick + self.modulus - prior) % self.modulus) as u16
    }

    /// Advance `prior` by `delta` ticks.
    pub fn advance(&self, prior: u16, delta: u16) -> u16 {
        self.wrap(u32::from(prior) + u32::from(delta))
    }

    /// Serialize a tick value.
    pub fn encode(&self, tick: u16) -> [u8; 2] {
        match self.byte_order {
            ByteOrder::BigEndian => tick.to_be_bytes(),
            ByteOrder::LittleEndian => tick.to_le_bytes(),
        }
    }

    /// Deserialize a tick value.
    pub fn decode(&self, bytes: [u8; 2]) -> u16 {
        match self.byte_order {
            ByteOrder::BigEndian => u16::from_be_bytes(bytes),
            ByteOrder::LittleEndian => u16::from_le_bytes(bytes),
        }
    }
}
