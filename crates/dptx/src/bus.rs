//! Register-bus abstraction.
//!
//! The bridge exposes several logical register banks ("pages") behind a
//! byte-oriented control bus. The driver core only ever goes through
//! [`RegisterBus`]; production implementations wrap the real transport and
//! tests substitute an in-memory fake. Read-modify-write helpers live here as
//! provided methods so the state machines never open-code masking.

use thiserror::Error;

/// One of the bridge's logical register banks.
///
/// Transmit-side pages carry the link, AUX, training, HDCP and outbound
/// packet registers; receive-side pages carry the video-input status and the
/// captured info-frame/audio registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Page {
    /// DP link, AUX channel, training and HDCP control.
    TxLink = 0x70,
    /// Chip identity, resets, power and top-level status.
    TxSystem = 0x72,
    /// Outbound info-frame packet buffers.
    TxPacket = 0x7A,
    /// Video-input status, measured pixel clock, input interrupt causes.
    RxCore = 0x7E,
    /// Captured info-frames, audio sample rate and channel status.
    RxExt = 0x80,
}

impl Page {
    /// The bus address of this page.
    pub fn address(self) -> u8 {
        self as u8
    }
}

/// A single register access failed on the control bus.
///
/// The surrounding operation is treated as failed-this-attempt; the sequencer
/// logs it and retries on a later tick. Nothing in the core panics on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("bus error accessing page {page:?} offset {offset:#04x}")]
pub struct BusError {
    pub page: Page,
    pub offset: u8,
}

/// Synchronous byte access to the bridge's register banks.
///
/// Implementations must not retry internally; retry policy belongs to the
/// state machines. `delay_ms` is part of this trait because every bounded
/// poll loop in the core interleaves register reads with short waits on the
/// same transport.
pub trait RegisterBus {
    fn read(&mut self, page: Page, offset: u8) -> Result<u8, BusError>;

    fn write(&mut self, page: Page, offset: u8, value: u8) -> Result<(), BusError>;

    /// Blocks the calling tick for at least `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);

    /// Read-modify-write: replaces the bits selected by `mask` with `value`.
    fn update(&mut self, page: Page, offset: u8, mask: u8, value: u8) -> Result<(), BusError> {
        let cur = self.read(page, offset)?;
        self.write(page, offset, (cur & !mask) | (value & mask))
    }

    fn set_bits(&mut self, page: Page, offset: u8, bits: u8) -> Result<(), BusError> {
        self.update(page, offset, bits, bits)
    }

    fn clear_bits(&mut self, page: Page, offset: u8, bits: u8) -> Result<(), BusError> {
        self.update(page, offset, bits, 0)
    }
}
