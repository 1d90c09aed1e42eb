//! EDID block handling for the DisplayPort bridge transmitter.
//!
//! Everything in this crate is pure: it operates on 128-byte EDID blocks that
//! have already been fetched over the AUX channel. Retrieval (DDC-over-AUX,
//! segment pointers, retry policy) lives in the driver crate; this crate owns
//! validation, the anchor-window comparison used to skip redundant re-reads,
//! and the pixel-clock derived link-bandwidth ceiling.

/// Size of one EDID block (base block or extension block).
pub const EDID_BLOCK_SIZE: usize = 128;

/// Maximum number of extension blocks the driver will fetch, regardless of
/// what the sink declares in the base block.
pub const MAX_EXTENSION_BLOCKS: usize = 4;

/// Byte offset of the extension-block count in the base block.
pub const EXTENSION_COUNT_OFFSET: usize = 126;

/// Offsets of the two 16-byte anchor windows probed to decide whether a
/// previously cached EDID is still current. The first covers the vendor and
/// product identification fields, the second sits inside the detailed timing
/// descriptors.
pub const ANCHOR_OFFSETS: [usize; 2] = [0x08, 0x70];

/// Length of each anchor window.
pub const ANCHOR_LEN: usize = 16;

/// The fixed 8-byte header of a base EDID block.
pub const EDID_HEADER: [u8; 8] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];

/// Byte offset of the first detailed timing descriptor in the base block.
const DTD_OFFSET: usize = 54;

/// Returns true when `block` starts with the fixed EDID header pattern.
pub fn header_valid(block: &[u8; EDID_BLOCK_SIZE]) -> bool {
    block[..8] == EDID_HEADER
}

/// Wrapping sum of all 128 bytes, including the trailing checksum byte.
///
/// A block is valid iff this is zero.
pub fn checksum(block: &[u8; EDID_BLOCK_SIZE]) -> u8 {
    block.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Returns true when the block's checksum byte makes the full block sum to
/// zero.
pub fn checksum_valid(block: &[u8; EDID_BLOCK_SIZE]) -> bool {
    checksum(block) == 0
}

/// The checksum byte the block *should* carry: the two's complement of the
/// sum of the first 127 bytes.
///
/// For a valid block this equals the stored byte at offset 127. The value is
/// retained by the driver so it can answer AUX test requests even when the
/// sink's stored checksum is wrong.
pub fn correction_byte(block: &[u8; EDID_BLOCK_SIZE]) -> u8 {
    let sum = block[..EDID_BLOCK_SIZE - 1]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b));
    0u8.wrapping_sub(sum)
}

/// Number of extension blocks the base block declares, capped at
/// [`MAX_EXTENSION_BLOCKS`].
pub fn declared_extension_blocks(base: &[u8; EDID_BLOCK_SIZE]) -> usize {
    (base[EXTENSION_COUNT_OFFSET] as usize).min(MAX_EXTENSION_BLOCKS)
}

/// Extracts the two anchor windows from a base block.
pub fn anchor_windows(base: &[u8; EDID_BLOCK_SIZE]) -> [[u8; ANCHOR_LEN]; 2] {
    let mut out = [[0u8; ANCHOR_LEN]; 2];
    for (win, &off) in out.iter_mut().zip(ANCHOR_OFFSETS.iter()) {
        win.copy_from_slice(&base[off..off + ANCHOR_LEN]);
    }
    out
}

/// Compares freshly probed anchor windows against a cached base block.
pub fn anchors_match(base: &[u8; EDID_BLOCK_SIZE], probed: &[[u8; ANCHOR_LEN]; 2]) -> bool {
    anchor_windows(base) == *probed
}

/// Pixel clock of the first detailed timing descriptor, in 100 kHz units.
///
/// EDID stores the DTD pixel clock in 10 kHz units; the driver's bandwidth
/// thresholds are expressed in 100 kHz units, so the stored value is scaled
/// down here. Returns `None` when the descriptor slot does not hold a timing
/// (pixel clock field of zero).
pub fn preferred_pixel_clock_100khz(base: &[u8; EDID_BLOCK_SIZE]) -> Option<u32> {
    let raw = u16::from_le_bytes([base[DTD_OFFSET], base[DTD_OFFSET + 1]]);
    if raw == 0 {
        return None;
    }
    Some(raw as u32 / 10)
}

/// Link bandwidth tier, ordered lowest to highest.
///
/// The discriminants are the DPCD link-rate codes (units of 0.27 Gbps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LinkBw {
    /// 1.62 Gbps per lane.
    Bw162 = 0x06,
    /// 2.7 Gbps per lane.
    Bw270 = 0x0A,
    /// 5.4 Gbps per lane.
    Bw540 = 0x14,
    /// 6.75 Gbps per lane.
    Bw675 = 0x19,
}

impl LinkBw {
    /// The DPCD link-rate code for this tier.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Maps a DPCD link-rate code back to a tier.
    pub fn from_code(code: u8) -> Option<LinkBw> {
        match code {
            0x06 => Some(LinkBw::Bw162),
            0x0A => Some(LinkBw::Bw270),
            0x14 => Some(LinkBw::Bw540),
            0x19 => Some(LinkBw::Bw675),
            _ => None,
        }
    }

    /// Link symbol clock in kHz (link rate / 10).
    pub fn symbol_clock_khz(self) -> u32 {
        match self {
            LinkBw::Bw162 => 162_000,
            LinkBw::Bw270 => 270_000,
            LinkBw::Bw540 => 540_000,
            LinkBw::Bw675 => 675_000,
        }
    }

    /// Highest pixel clock (100 kHz units, 24-bit color) the tier can carry.
    pub fn pixel_clock_ceiling_100khz(self) -> u32 {
        match self {
            LinkBw::Bw162 => 530,
            LinkBw::Bw270 => 890,
            LinkBw::Bw540 => 1800,
            // Top tier; rates above this force the down-sampling path.
            LinkBw::Bw675 => 2700,
        }
    }
}

/// Lowest tier whose ceiling accommodates `pclk_100khz` at 24-bit color.
///
/// Rates above the 5.4 G ceiling select the top tier; the caller is
/// responsible for engaging down-sampling when even that is insufficient.
pub fn tier_for_pixel_clock(pclk_100khz: u32) -> LinkBw {
    if pclk_100khz <= 530 {
        LinkBw::Bw162
    } else if pclk_100khz <= 890 {
        LinkBw::Bw270
    } else if pclk_100khz <= 1800 {
        LinkBw::Bw540
    } else {
        LinkBw::Bw675
    }
}
