//! Audio output configurator.
//!
//! Once the receive side has reported enough CTS/sample interrupts to prove
//! the input audio clock is real, the engine derives the M/N ratio for the
//! current link tier, mirrors channel status, forwards the audio info-frame
//! and enables packet transmission.

use crate::bus::{BusError, Page, RegisterBus};
use crate::packet::{self, PacketBuffers};
use dptx_edid::LinkBw;

/// IEC 60958 channel-status sampling-frequency code, low nibble. Sits above
/// the info-frame capture windows (0x20..0x7D) so a packet mirror never reads
/// it as payload.
pub(crate) const REG_RX_AUDIO_FS: u8 = 0x90;
/// Captured channel-status bytes 0..4.
pub(crate) const REG_RX_CH_STATUS: u8 = 0x98;

/// M value, 24 bits little endian across three registers.
pub(crate) const REG_AUD_M_BASE: u8 = 0x40;
/// N value, 24 bits little endian; fixed at 32768.
pub(crate) const REG_AUD_N_BASE: u8 = 0x43;
/// Audio packet control.
pub(crate) const REG_AUD_CTRL: u8 = 0x46;
pub(crate) const AUD_EN: u8 = 1 << 0;
/// Mirrored channel-status bytes on the transmit side.
pub(crate) const REG_TX_CH_STATUS: u8 = 0x48;

const CH_STATUS_BYTES: u8 = 5;
const NAUD: u32 = 32768;
/// Receive interrupts required before trusting the measured input.
const RCV_INT_THRESHOLD: u8 = 3;

/// Sample rate from the IEC 60958 frequency code.
pub(crate) fn sample_rate_from_code(code: u8) -> Option<u32> {
    match code & 0x0F {
        0x0 => Some(44_100),
        0x2 => Some(48_000),
        0x3 => Some(32_000),
        0x8 => Some(88_200),
        0x9 => Some(768_000),
        0xA => Some(96_000),
        0xC => Some(176_400),
        0xE => Some(192_000),
        _ => None,
    }
}

/// M for a fixed N of 32768: M/N = 512·fs / link-symbol-clock.
pub(crate) fn maud_for(fs_hz: u32, bw: LinkBw) -> u32 {
    let ls_clk_hz = bw.symbol_clock_khz() as u64 * 1000;
    (512u64 * fs_hz as u64 * NAUD as u64 / ls_clk_hz) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioOutputState {
    #[default]
    Init,
    WaitRcvInt,
    RcvIntFinished,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AudioOutcome {
    Pending,
    Done,
}

#[derive(Debug, Default)]
pub(crate) struct AudioOutput {
    pub(crate) state: AudioOutputState,
    rcv_ints: u8,
}

impl AudioOutput {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// One CTS or audio-sample receive interrupt was observed.
    pub(crate) fn notify_rcv_int(&mut self) {
        self.rcv_ints = self.rcv_ints.saturating_add(1);
    }

    pub(crate) fn tick(
        &mut self,
        bus: &mut dyn RegisterBus,
        bw: LinkBw,
        bufs: &mut PacketBuffers,
    ) -> Result<AudioOutcome, BusError> {
        loop {
            match self.state {
                AudioOutputState::Init => {
                    self.rcv_ints = 0;
                    self.state = AudioOutputState::WaitRcvInt;
                    return Ok(AudioOutcome::Pending);
                }
                AudioOutputState::WaitRcvInt => {
                    if self.rcv_ints < RCV_INT_THRESHOLD {
                        return Ok(AudioOutcome::Pending);
                    }
                    self.state = AudioOutputState::RcvIntFinished;
                }
                AudioOutputState::RcvIntFinished => {
                    self.state = AudioOutputState::Output;
                }
                AudioOutputState::Output => {
                    self.configure_output(bus, bw, bufs)?;
                    // Machine cycles back so a later regression restarts clean.
                    self.state = AudioOutputState::Init;
                    return Ok(AudioOutcome::Done);
                }
            }
        }
    }

    fn configure_output(
        &mut self,
        bus: &mut dyn RegisterBus,
        bw: LinkBw,
        bufs: &mut PacketBuffers,
    ) -> Result<(), BusError> {
        let code = bus.read(Page::RxExt, REG_RX_AUDIO_FS)? & 0x0F;
        let fs = match sample_rate_from_code(code) {
            Some(fs) => fs,
            None => {
                tracing::warn!(code, "unknown audio sample-rate code, assuming 48 kHz");
                48_000
            }
        };

        let maud = maud_for(fs, bw);
        for i in 0..3 {
            bus.write(
                Page::TxLink,
                REG_AUD_M_BASE + i,
                ((maud >> (8 * i)) & 0xFF) as u8,
            )?;
            bus.write(
                Page::TxLink,
                REG_AUD_N_BASE + i,
                ((NAUD >> (8 * i)) & 0xFF) as u8,
            )?;
        }

        for i in 0..CH_STATUS_BYTES {
            let b = bus.read(Page::RxExt, REG_RX_CH_STATUS + i)?;
            bus.write(Page::TxLink, REG_TX_CH_STATUS + i, b)?;
        }

        packet::mirror_audio(bus, bufs)?;
        bus.set_bits(Page::TxLink, REG_AUD_CTRL, AUD_EN)
    }
}
