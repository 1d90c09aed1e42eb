//! Interrupt-cause snapshotting.
//!
//! Two independently-sourced cause groups: link-side bits live on the
//! transmit page, video-input bits on the receive page. Each group is two
//! write-1-to-clear bytes; a snapshot reads both bytes and immediately acks
//! exactly the bits it observed, so causes raised mid-snapshot survive for
//! the next tick. Snapshots are never retained across ticks.

use bitflags::bitflags;

use crate::bus::{BusError, Page, RegisterBus};

pub(crate) const REG_LINK_IRQ_L: u8 = 0xF0;
pub(crate) const REG_LINK_IRQ_H: u8 = 0xF1;
pub(crate) const REG_INPUT_IRQ_L: u8 = 0xF0;
pub(crate) const REG_INPUT_IRQ_H: u8 = 0xF1;

bitflags! {
    /// Link-side interrupt causes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LinkIrq: u16 {
        const HPD_LOST          = 1 << 0;
        const HPD_PLUG          = 1 << 1;
        const HPD_CHANGE        = 1 << 2;
        const PLL_LOCK_CHANGE   = 1 << 3;
        const TRAINING_FINISHED = 1 << 4;
        const HDCP_AUTH_DONE    = 1 << 5;
        const HDCP_LINK_FAIL    = 1 << 6;
    }
}

bitflags! {
    /// Video-input interrupt causes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InputIrq: u16 {
        const NEW_AVI          = 1 << 0;
        const NEW_VSI          = 1 << 1;
        const NO_VSI           = 1 << 2;
        const CLOCK_CHANGE     = 1 << 3;
        const SYNC_CHANGE      = 1 << 4;
        const HDMI_DVI_CHANGE  = 1 << 5;
        const AUDIO_CTS        = 1 << 6;
        const AUDIO_SAMPLE     = 1 << 7;
        const HDCP_ERROR_BURST = 1 << 8;
        const NEW_GCP          = 1 << 9;
    }
}

/// Causes observed (and acknowledged) during one tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterruptSnapshot {
    pub link: LinkIrq,
    pub input: InputIrq,
}

impl InterruptSnapshot {
    pub fn is_empty(&self) -> bool {
        self.link.is_empty() && self.input.is_empty()
    }
}

fn snapshot_group(
    bus: &mut dyn RegisterBus,
    page: Page,
    reg_l: u8,
    reg_h: u8,
) -> Result<u16, BusError> {
    let lo = bus.read(page, reg_l)?;
    let hi = bus.read(page, reg_h)?;
    // Ack only what we saw; W1C.
    if lo != 0 {
        bus.write(page, reg_l, lo)?;
    }
    if hi != 0 {
        bus.write(page, reg_h, hi)?;
    }
    Ok(u16::from_le_bytes([lo, hi]))
}

/// Captures and acknowledges both cause groups.
pub(crate) fn snapshot_and_ack(bus: &mut dyn RegisterBus) -> Result<InterruptSnapshot, BusError> {
    let link = snapshot_group(bus, Page::TxLink, REG_LINK_IRQ_L, REG_LINK_IRQ_H)?;
    let input = snapshot_group(bus, Page::RxCore, REG_INPUT_IRQ_L, REG_INPUT_IRQ_H)?;
    Ok(InterruptSnapshot {
        link: LinkIrq::from_bits_truncate(link),
        input: InputIrq::from_bits_truncate(input),
    })
}
