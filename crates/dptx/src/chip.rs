//! Chip identity and hardware reset paths.

use crate::bus::{BusError, Page, RegisterBus};
use crate::error::AttachError;

/// Low/high bytes of the 16-bit silicon identifier.
pub(crate) const REG_CHIP_ID_L: u8 = 0x02;
pub(crate) const REG_CHIP_ID_H: u8 = 0x03;

/// Top-level reset control.
pub(crate) const REG_RESET_CTRL1: u8 = 0x05;
pub(crate) const RESET1_HW: u8 = 1 << 0;

/// Sub-block reset control.
pub(crate) const REG_RESET_CTRL2: u8 = 0x06;
pub(crate) const RESET2_HDCP: u8 = 1 << 0;
pub(crate) const RESET2_SERDES: u8 = 1 << 1;
pub(crate) const RESET2_AUX: u8 = 1 << 2;

/// Silicon revisions this driver binds to.
pub const KNOWN_CHIP_IDS: [u16; 7] = [0x7808, 0x7810, 0x7812, 0x7814, 0x7816, 0x7818, 0x7832];

/// Reads and validates the chip identity.
///
/// A mismatch is fatal at attach time; there is no retry path because an
/// unknown identifier means the register map cannot be trusted at all.
pub(crate) fn probe_chip_id(bus: &mut dyn RegisterBus) -> Result<u16, AttachError> {
    let lo = bus.read(Page::TxSystem, REG_CHIP_ID_L)?;
    let hi = bus.read(Page::TxSystem, REG_CHIP_ID_H)?;
    let id = u16::from_le_bytes([lo, hi]);
    if KNOWN_CHIP_IDS.contains(&id) {
        Ok(id)
    } else {
        Err(AttachError::ChipIdentity(id))
    }
}

/// Full hardware reset: every sub-block returns to its power-on state.
///
/// Used on cable demotion, HDCP retry exhaustion and suspend teardown.
pub(crate) fn full_hardware_reset(bus: &mut dyn RegisterBus) -> Result<(), BusError> {
    bus.set_bits(Page::TxSystem, REG_RESET_CTRL1, RESET1_HW)?;
    bus.delay_ms(2);
    bus.clear_bits(Page::TxSystem, REG_RESET_CTRL1, RESET1_HW)
}

/// SERDES-path reset used by link-training error recovery: assert 20 ms,
/// release.
pub(crate) fn serdes_reset(bus: &mut dyn RegisterBus) -> Result<(), BusError> {
    bus.set_bits(Page::TxSystem, REG_RESET_CTRL2, RESET2_SERDES)?;
    bus.delay_ms(20);
    bus.clear_bits(Page::TxSystem, REG_RESET_CTRL2, RESET2_SERDES)
}
