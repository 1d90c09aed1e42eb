//! DPCD address map and sink-capability snapshot.

use crate::aux;
use crate::bus::RegisterBus;
use crate::error::AuxError;
use dptx_edid::LinkBw;

pub(crate) const DPCD_REV: u32 = 0x000;
pub(crate) const DPCD_DOWNSTREAMPORT_PRESENT: u32 = 0x005;
pub(crate) const DPCD_LINK_BW_SET: u32 = 0x100;
pub(crate) const DPCD_LANE_COUNT_SET: u32 = 0x101;
pub(crate) const DPCD_DOWNSPREAD_CTRL: u32 = 0x107;
pub(crate) const DPCD_SINK_COUNT: u32 = 0x200;
pub(crate) const DPCD_LANE0_1_STATUS: u32 = 0x202;
pub(crate) const DPCD_SYMBOL_ERR_L: u32 = 0x210;
pub(crate) const DPCD_SYMBOL_ERR_H: u32 = 0x211;
pub(crate) const DPCD_SET_POWER: u32 = 0x600;
pub(crate) const DPCD_HDCP_BCAPS: u32 = 0x6_8028;
pub(crate) const DPCD_HDCP_BINFO_L: u32 = 0x6_802A;
pub(crate) const DPCD_HDCP_BINFO_H: u32 = 0x6_802B;

/// MAX_LANE_COUNT bit 7: sink supports enhanced framing.
pub(crate) const ENHANCED_FRAME_CAP: u8 = 1 << 7;
/// DOWNSPREAD_CTRL bit 4: spread-spectrum clocking enabled.
pub(crate) const SPREAD_AMP_0_5: u8 = 1 << 4;
/// SET_POWER states.
pub(crate) const POWER_D0: u8 = 0x01;
pub(crate) const POWER_D3: u8 = 0x02;
/// LANE0_1_STATUS low nibble: CR done, channel EQ done, symbol locked.
pub(crate) const LANE0_TRAINED: u8 = 0x07;
/// BINFO: repeater topology limits.
pub(crate) const MAX_DEVS_EXCEEDED: u8 = 1 << 7;
pub(crate) const MAX_CASCADE_EXCEEDED: u8 = 1 << 7;
/// BCAPS bit 0: sink is HDCP capable.
pub(crate) const BCAPS_HDCP_CAPABLE: u8 = 1 << 0;

/// Sink capabilities read once per connection and consulted by the training
/// and output stages.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SinkCaps {
    pub rev: u8,
    pub max_link_rate: u8,
    pub lane_count: u8,
    pub enhanced_frame: bool,
}

impl SinkCaps {
    /// Highest tier the sink declares; unknown codes clamp to the lowest.
    pub(crate) fn max_bw(&self) -> LinkBw {
        LinkBw::from_code(self.max_link_rate).unwrap_or(LinkBw::Bw162)
    }

    /// LANE_COUNT_SET only carries the enhanced-frame bit from DPCD 1.1 on;
    /// older sinks get the narrow mask.
    pub(crate) fn lane_count_mask(&self) -> u8 {
        if self.rev >= 0x11 {
            0x9F
        } else {
            0x1F
        }
    }
}

pub(crate) fn read_sink_caps(bus: &mut dyn RegisterBus) -> Result<SinkCaps, AuxError> {
    // Rev, max link rate, max lane count in one burst.
    let mut raw = [0u8; 3];
    aux::native_read(bus, DPCD_REV, &mut raw)?;
    Ok(SinkCaps {
        rev: raw[0],
        max_link_rate: raw[1],
        lane_count: raw[2] & 0x1F,
        enhanced_frame: raw[2] & ENHANCED_FRAME_CAP != 0,
    })
}
