//! Info-frame pass-through.
//!
//! The receive side captures AVI/audio/SPD/MPEG/VSI packets into fixed
//! register windows; the transmit side mirrors them verbatim. No semantic
//! interpretation happens here beyond length and type tag: the payload bytes
//! are opaque.

use crate::bus::{BusError, Page, RegisterBus};

/// Per-type packet transmit enables; same layout in the update-strobe
/// register.
pub(crate) const REG_PKT_EN: u8 = 0x00;
pub(crate) const REG_PKT_UPDATE: u8 = 0x01;
pub(crate) const PKT_AVI: u8 = 1 << 0;
pub(crate) const PKT_AUDIO: u8 = 1 << 1;
pub(crate) const PKT_SPD: u8 = 1 << 2;
pub(crate) const PKT_MPEG: u8 = 1 << 3;
pub(crate) const PKT_VSI: u8 = 1 << 4;

/// General-control packet capture: bit 0 is the AV-mute flag. Lives above the
/// info-frame capture windows, clear of the VSI window ending at 0x7C.
pub(crate) const REG_RX_GCP: u8 = 0x84;
pub(crate) const GCP_AV_MUTE: u8 = 1 << 0;

const RX_AVI_BASE: u8 = 0x20;
const RX_AUDIO_BASE: u8 = 0x30;
const RX_SPD_BASE: u8 = 0x40;
const RX_MPEG_BASE: u8 = 0x60;
const RX_VSI_BASE: u8 = 0x70;

const TX_AVI_BASE: u8 = 0x20;
const TX_AUDIO_BASE: u8 = 0x30;
const TX_SPD_BASE: u8 = 0x40;
const TX_MPEG_BASE: u8 = 0x60;
const TX_VSI_BASE: u8 = 0x70;

/// 3-byte header plus payload.
pub(crate) const AVI_LEN: usize = 3 + 13;
pub(crate) const AUDIO_LEN: usize = 3 + 10;
pub(crate) const SPD_LEN: usize = 3 + 25;
pub(crate) const MPEG_LEN: usize = 3 + 10;
pub(crate) const VSI_LEN: usize = 3 + 10;

/// Last-mirrored copies of every packet type.
#[derive(Debug, Clone)]
pub struct PacketBuffers {
    pub avi: [u8; AVI_LEN],
    pub audio: [u8; AUDIO_LEN],
    pub spd: [u8; SPD_LEN],
    pub mpeg: [u8; MPEG_LEN],
    pub vsi: [u8; VSI_LEN],
}

impl Default for PacketBuffers {
    fn default() -> Self {
        Self {
            avi: [0; AVI_LEN],
            audio: [0; AUDIO_LEN],
            spd: [0; SPD_LEN],
            mpeg: [0; MPEG_LEN],
            vsi: [0; VSI_LEN],
        }
    }
}

fn mirror(
    bus: &mut dyn RegisterBus,
    rx_base: u8,
    tx_base: u8,
    buf: &mut [u8],
    en_bit: u8,
) -> Result<(), BusError> {
    for (i, slot) in buf.iter_mut().enumerate() {
        *slot = bus.read(Page::RxExt, rx_base + i as u8)?;
    }
    for (i, b) in buf.iter().enumerate() {
        bus.write(Page::TxPacket, tx_base + i as u8, *b)?;
    }
    bus.set_bits(Page::TxPacket, REG_PKT_EN, en_bit)?;
    bus.set_bits(Page::TxPacket, REG_PKT_UPDATE, en_bit)
}

pub(crate) fn mirror_avi(bus: &mut dyn RegisterBus, bufs: &mut PacketBuffers) -> Result<(), BusError> {
    mirror(bus, RX_AVI_BASE, TX_AVI_BASE, &mut bufs.avi, PKT_AVI)
}

pub(crate) fn mirror_audio(
    bus: &mut dyn RegisterBus,
    bufs: &mut PacketBuffers,
) -> Result<(), BusError> {
    mirror(bus, RX_AUDIO_BASE, TX_AUDIO_BASE, &mut bufs.audio, PKT_AUDIO)
}

pub(crate) fn mirror_spd(bus: &mut dyn RegisterBus, bufs: &mut PacketBuffers) -> Result<(), BusError> {
    mirror(bus, RX_SPD_BASE, TX_SPD_BASE, &mut bufs.spd, PKT_SPD)
}

pub(crate) fn mirror_mpeg(
    bus: &mut dyn RegisterBus,
    bufs: &mut PacketBuffers,
) -> Result<(), BusError> {
    mirror(bus, RX_MPEG_BASE, TX_MPEG_BASE, &mut bufs.mpeg, PKT_MPEG)
}

pub(crate) fn mirror_vsi(bus: &mut dyn RegisterBus, bufs: &mut PacketBuffers) -> Result<(), BusError> {
    mirror(bus, RX_VSI_BASE, TX_VSI_BASE, &mut bufs.vsi, PKT_VSI)
}

/// Stops forwarding vendor-specific info-frames (input stream dropped them).
pub(crate) fn disable_vsi(bus: &mut dyn RegisterBus) -> Result<(), BusError> {
    bus.clear_bits(Page::TxPacket, REG_PKT_EN, PKT_VSI)
}

/// Stops all packet transmission; used by regression cleanup.
pub(crate) fn disable_all(bus: &mut dyn RegisterBus) -> Result<(), BusError> {
    bus.write(Page::TxPacket, REG_PKT_EN, 0)
}
