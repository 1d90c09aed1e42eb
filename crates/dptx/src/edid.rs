//! EDID retrieval over I²C-over-AUX.
//!
//! Fetches the base block plus declared extension blocks in 16-byte bursts,
//! validates them with `dptx-edid`, and keeps the result in [`EdidCache`].
//! A cached, non-broken EDID is only re-read when the two anchor windows
//! differ from the cache; unchanged anchors short-circuit the whole transfer.
//!
//! Every failure in here is failed-this-attempt: the sequencer still
//! advances, keeping a previously valid cache where one exists and otherwise
//! falling back to DPCD-declared limits.

use crate::aux;
use crate::bus::RegisterBus;
use crate::dpcd::SinkCaps;
use dptx_edid::{
    anchor_windows, checksum_valid, correction_byte, declared_extension_blocks, header_valid,
    preferred_pixel_clock_100khz, tier_for_pixel_clock, LinkBw, ANCHOR_LEN, ANCHOR_OFFSETS,
    EDID_BLOCK_SIZE,
};

/// DDC device address of the EDID EEPROM.
const DDC_EDID_ADDR: u8 = 0x50;
/// DDC device address of the segment pointer.
const DDC_SEGMENT_ADDR: u8 = 0x30;

/// Hard cap on fetched blocks (base + extensions).
const MAX_BLOCKS: usize = 4;
const MAX_EDID_BYTES: usize = MAX_BLOCKS * EDID_BLOCK_SIZE;

/// Extra attempts per 16-byte read position after an empty or failed read.
const CHUNK_RETRIES: u32 = 2;

const CHUNKS_PER_BLOCK: usize = EDID_BLOCK_SIZE / 16;

/// Cached sink capability data.
#[derive(Debug, Clone)]
pub struct EdidCache {
    data: [u8; MAX_EDID_BYTES],
    len: usize,
    correction: u8,
    broken: bool,
    read_once: bool,
    anchors: [[u8; ANCHOR_LEN]; 2],
}

impl Default for EdidCache {
    fn default() -> Self {
        Self {
            data: [0; MAX_EDID_BYTES],
            len: 0,
            correction: 0,
            broken: false,
            read_once: false,
            anchors: [[0; ANCHOR_LEN]; 2],
        }
    }
}

impl EdidCache {
    /// Drops all cached data; called on cable re-plug.
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }

    /// The raw capability bytes read so far.
    pub fn raw(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Whether the last retrieval declared the EDID unreadable or corrupt.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Checksum byte the base block should carry, kept for AUX test replies.
    pub fn correction_byte(&self) -> u8 {
        self.correction
    }

    fn base_block(&self) -> Option<&[u8; EDID_BLOCK_SIZE]> {
        if self.len >= EDID_BLOCK_SIZE {
            self.data[..EDID_BLOCK_SIZE].try_into().ok()
        } else {
            None
        }
    }

    /// Link-bandwidth ceiling: the preferred-timing requirement clamped by
    /// the sink's declared maximum rate. Falls back to the DPCD limit alone
    /// when the EDID is absent or broken.
    pub(crate) fn bandwidth_ceiling(&self, caps: &SinkCaps) -> LinkBw {
        let sink_max = caps.max_bw();
        let from_timing = self
            .base_block()
            .filter(|_| !self.broken)
            .and_then(preferred_pixel_clock_100khz)
            .map(tier_for_pixel_clock);
        match from_timing {
            Some(t) => t.min(sink_max),
            None => sink_max,
        }
    }
}

/// Result of one ParseEdid stage pass. All variants advance the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EdidOutcome {
    /// Full transfer completed and validated.
    Fresh,
    /// Anchor windows matched the cache; transfer skipped.
    Unchanged,
    /// Retrieval or validation failed; DPCD limits apply.
    Broken,
}

fn ddc_init(bus: &mut dyn RegisterBus) -> bool {
    // Select the EEPROM and zero the segment pointer.
    if aux::i2c_address_only(bus, DDC_EDID_ADDR).is_err() {
        return false;
    }
    aux::i2c_write(bus, DDC_SEGMENT_ADDR, &[0]).is_ok()
}

/// One addressed 16-byte read, retried on empty replies and AUX failures.
fn read_chunk(bus: &mut dyn RegisterBus, segment: u8, offset: u8) -> Option<[u8; 16]> {
    for _ in 0..=CHUNK_RETRIES {
        if segment != 0 && aux::i2c_write(bus, DDC_SEGMENT_ADDR, &[segment]).is_err() {
            continue;
        }
        if aux::i2c_write(bus, DDC_EDID_ADDR, &[offset]).is_err() {
            continue;
        }
        let mut chunk = [0u8; 16];
        match aux::i2c_read(bus, DDC_EDID_ADDR, &mut chunk) {
            Ok(16) => return Some(chunk),
            Ok(_) | Err(_) => continue,
        }
    }
    None
}

fn read_block(bus: &mut dyn RegisterBus, index: usize, out: &mut [u8]) -> bool {
    // Blocks 0-1 are plain addressed reads; 2-3 sit behind segment 1.
    let segment = (index / 2) as u8;
    let base = ((index % 2) * EDID_BLOCK_SIZE) as u8;
    for chunk_idx in 0..CHUNKS_PER_BLOCK {
        let offset = base.wrapping_add((chunk_idx * 16) as u8);
        match read_chunk(bus, segment, offset) {
            Some(chunk) => out[chunk_idx * 16..chunk_idx * 16 + 16].copy_from_slice(&chunk),
            None => return false,
        }
    }
    true
}

fn probe_anchors(bus: &mut dyn RegisterBus) -> Option<[[u8; ANCHOR_LEN]; 2]> {
    let mut out = [[0u8; ANCHOR_LEN]; 2];
    for (win, &off) in out.iter_mut().zip(ANCHOR_OFFSETS.iter()) {
        *win = read_chunk(bus, 0, off as u8)?;
    }
    Some(out)
}

/// Runs the ParseEdid stage once: short-circuit probe, full transfer, and
/// validation, updating `cache` in place.
pub(crate) fn read_into(bus: &mut dyn RegisterBus, cache: &mut EdidCache) -> EdidOutcome {
    if !ddc_init(bus) {
        // A transient DDC fault must not throw away a known-good monitor
        // description; only demote when there is nothing to keep.
        if cache.read_once && !cache.broken {
            tracing::warn!("ddc init failed, keeping previous edid state");
            return EdidOutcome::Unchanged;
        }
        tracing::warn!("ddc init failed, no edid available");
        cache.broken = true;
        cache.read_once = true;
        return EdidOutcome::Broken;
    }

    if cache.read_once && !cache.broken {
        if let Some(probed) = probe_anchors(bus) {
            if probed == cache.anchors {
                return EdidOutcome::Unchanged;
            }
        }
    }

    let mut data = [0u8; MAX_EDID_BYTES];
    if !read_block(bus, 0, &mut data[..EDID_BLOCK_SIZE]) {
        return mark_broken(cache, "base block unreadable");
    }

    let base: &[u8; EDID_BLOCK_SIZE] = data[..EDID_BLOCK_SIZE].try_into().unwrap_or(&[0; EDID_BLOCK_SIZE]);
    if !header_valid(base) {
        return mark_broken(cache, "bad edid header");
    }

    let total_blocks = (1 + declared_extension_blocks(base)).min(MAX_BLOCKS);
    for idx in 1..total_blocks {
        let span = idx * EDID_BLOCK_SIZE..(idx + 1) * EDID_BLOCK_SIZE;
        if !read_block(bus, idx, &mut data[span]) {
            return mark_broken(cache, "extension block unreadable");
        }
    }

    for idx in 0..total_blocks {
        let block: &[u8; EDID_BLOCK_SIZE] = data[idx * EDID_BLOCK_SIZE..(idx + 1) * EDID_BLOCK_SIZE]
            .try_into()
            .unwrap_or(&[0; EDID_BLOCK_SIZE]);
        if !checksum_valid(block) {
            return mark_broken(cache, "edid checksum mismatch");
        }
    }

    let base: &[u8; EDID_BLOCK_SIZE] = data[..EDID_BLOCK_SIZE].try_into().unwrap_or(&[0; EDID_BLOCK_SIZE]);
    cache.correction = correction_byte(base);
    cache.anchors = anchor_windows(base);
    cache.data = data;
    cache.len = total_blocks * EDID_BLOCK_SIZE;
    cache.broken = false;
    cache.read_once = true;
    EdidOutcome::Fresh
}

fn mark_broken(cache: &mut EdidCache, why: &'static str) -> EdidOutcome {
    tracing::warn!(why, "edid retrieval failed");
    cache.broken = true;
    cache.read_once = true;
    cache.len = 0;
    EdidOutcome::Broken
}
