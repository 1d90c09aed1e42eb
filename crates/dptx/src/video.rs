//! Video output configurator.
//!
//! Waits for a stable input stream, re-validates the negotiated bandwidth
//! against the measured pixel clock, maps color space / bit depth onto the
//! link's bit mapping and forwards the AVI info-frame. A bandwidth shortfall
//! discovered here routes back to link training instead of failing forward.

use crate::bus::{BusError, Page, RegisterBus};
use crate::packet::{self, PacketBuffers};
use dptx_edid::{tier_for_pixel_clock, LinkBw};

/// Video-input status on the receive page.
pub(crate) const REG_RX_VIDEO_STATUS: u8 = 0x10;
pub(crate) const RX_CLK_DET: u8 = 1 << 0;
pub(crate) const RX_DE_DET: u8 = 1 << 1;

/// Measured input pixel clock, 100 kHz units, little endian.
pub(crate) const REG_RX_PCLK_L: u8 = 0x12;
pub(crate) const REG_RX_PCLK_H: u8 = 0x13;

/// Input format: bits 1:0 color depth (0=24, 1=30, 2=36), bits 3:2 color
/// space (0=RGB, 1=YCbCr 4:2:2, 2=YCbCr 4:4:4).
pub(crate) const REG_RX_VIDEO_FORMAT: u8 = 0x14;

/// Transmit-side video status.
pub(crate) const REG_TX_VIDEO_STATUS: u8 = 0x08;
pub(crate) const TX_OUT_CLK_STABLE: u8 = 1 << 0;
pub(crate) const TX_STREAM_VALID: u8 = 1 << 1;

/// Transmit-side video control.
pub(crate) const REG_VIDEO_CTRL: u8 = 0x09;
pub(crate) const VIDEO_EN: u8 = 1 << 0;
pub(crate) const VIDEO_MUTE: u8 = 1 << 1;
pub(crate) const VIDEO_DOWNSAMPLE: u8 = 1 << 2;

/// Link bit-mapping control: depth code in the low nibble, color space in
/// the high nibble.
pub(crate) const REG_VIDEO_BIT_MAP: u8 = 0x0A;

pub(crate) fn tx_video_stable(status: u8) -> bool {
    status & (TX_OUT_CLK_STABLE | TX_STREAM_VALID) == (TX_OUT_CLK_STABLE | TX_STREAM_VALID)
}

/// Effective link load of the measured stream: 30/36-bit depths scale the
/// 24-bit pixel rate by 5/4 and 3/2.
pub(crate) fn effective_rate_100khz(pclk_100khz: u32, depth_code: u8) -> u32 {
    match depth_code & 0x03 {
        1 => pclk_100khz * 5 / 4,
        2 => pclk_100khz * 3 / 2,
        _ => pclk_100khz,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoOutputState {
    #[default]
    WaitVideoStable,
    WaitTxVideoStable,
    CheckVideoInfo,
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VideoOutcome {
    Pending,
    Done,
    /// Measured stream needs a higher tier than negotiated.
    Retrain(LinkBw),
}

#[derive(Debug, Default)]
pub(crate) struct VideoOutput {
    pub(crate) state: VideoOutputState,
}

impl VideoOutput {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn tick(
        &mut self,
        bus: &mut dyn RegisterBus,
        negotiated: LinkBw,
        bufs: &mut PacketBuffers,
    ) -> Result<VideoOutcome, BusError> {
        loop {
            match self.state {
                VideoOutputState::WaitVideoStable => {
                    let status = bus.read(Page::RxCore, REG_RX_VIDEO_STATUS)?;
                    if status & (RX_CLK_DET | RX_DE_DET) != (RX_CLK_DET | RX_DE_DET) {
                        return Ok(VideoOutcome::Pending);
                    }
                    match self.required_tier(bus)? {
                        tier if tier > negotiated => return Ok(VideoOutcome::Retrain(tier)),
                        _ => self.state = VideoOutputState::WaitTxVideoStable,
                    }
                }
                VideoOutputState::WaitTxVideoStable => {
                    let status = bus.read(Page::TxSystem, REG_TX_VIDEO_STATUS)?;
                    if !tx_video_stable(status) {
                        return Ok(VideoOutcome::Pending);
                    }
                    self.state = VideoOutputState::CheckVideoInfo;
                }
                VideoOutputState::CheckVideoInfo => {
                    let tier = self.required_tier(bus)?;
                    if tier > negotiated {
                        return Ok(VideoOutcome::Retrain(tier));
                    }
                    let format = bus.read(Page::RxCore, REG_RX_VIDEO_FORMAT)?;
                    let depth = format & 0x03;
                    let color_space = (format >> 2) & 0x03;
                    bus.write(
                        Page::TxSystem,
                        REG_VIDEO_BIT_MAP,
                        depth | (color_space << 4),
                    )?;
                    packet::mirror_avi(bus, bufs)?;
                    packet::mirror_spd(bus, bufs)?;
                    packet::mirror_mpeg(bus, bufs)?;
                    bus.clear_bits(Page::TxSystem, REG_VIDEO_CTRL, VIDEO_MUTE)?;
                    bus.set_bits(Page::TxSystem, REG_VIDEO_CTRL, VIDEO_EN)?;
                    self.state = VideoOutputState::Finish;
                }
                VideoOutputState::Finish => return Ok(VideoOutcome::Done),
            }
        }
    }

    /// Tier demanded by the measured pixel clock and color depth; also keeps
    /// the down-sampling bit in step with the top-tier ceiling.
    fn required_tier(&self, bus: &mut dyn RegisterBus) -> Result<LinkBw, BusError> {
        let lo = bus.read(Page::RxCore, REG_RX_PCLK_L)?;
        let hi = bus.read(Page::RxCore, REG_RX_PCLK_H)?;
        let pclk = u16::from_le_bytes([lo, hi]) as u32;
        let depth = bus.read(Page::RxCore, REG_RX_VIDEO_FORMAT)? & 0x03;
        let eff = effective_rate_100khz(pclk, depth);
        if eff > LinkBw::Bw675.pixel_clock_ceiling_100khz() {
            bus.set_bits(Page::TxSystem, REG_VIDEO_CTRL, VIDEO_DOWNSAMPLE)?;
        } else {
            bus.clear_bits(Page::TxSystem, REG_VIDEO_CTRL, VIDEO_DOWNSAMPLE)?;
        }
        Ok(tier_for_pixel_clock(eff))
    }
}
