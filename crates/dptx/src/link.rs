//! Link-training engine.
//!
//! PLL-lock gate, bandwidth negotiation, hardware-assisted training kickoff
//! and completion validation. Failure never aborts the stage: the SERDES path
//! is reset and the whole stage is redone on the next tick.

use crate::aux;
use crate::bus::{BusError, Page, RegisterBus};
use crate::chip::serdes_reset;
use crate::dpcd::{self, SinkCaps};
use dptx_edid::LinkBw;

/// PLL control/status.
pub(crate) const REG_PLL_CTRL: u8 = 0x10;
pub(crate) const PLL_LOCKED: u8 = 1 << 7;
pub(crate) const PLL_RESET: u8 = 1 << 0;

/// Programmed link-bandwidth code.
pub(crate) const REG_LINK_BW: u8 = 0x11;

/// Main link control.
pub(crate) const REG_LINK_CTRL: u8 = 0x12;
pub(crate) const LINK_ENHANCED_FRAME: u8 = 1 << 0;
pub(crate) const LINK_SSC_EN: u8 = 1 << 1;

/// Hardware training control; the enable bit self-clears on completion.
pub(crate) const REG_TRAINING_CTRL: u8 = 0x13;
pub(crate) const TRAINING_EN: u8 = 1 << 0;

/// Pre-emphasis level, bits 1:0.
pub(crate) const REG_PREEMPH: u8 = 0x14;
const PREEMPH_MAX: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkTrainingState {
    #[default]
    Init,
    WaitPllLock,
    CheckLinkBandwidth,
    Start,
    WaitingFinish,
    Error,
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkOutcome {
    Pending,
    /// Training validated at this tier; advance to VideoOutput.
    Trained(LinkBw),
    /// SERDES was reset; redo the stage next tick.
    Failed,
}

#[derive(Debug, Default)]
pub(crate) struct LinkTraining {
    pub(crate) state: LinkTrainingState,
    requested: Option<LinkBw>,
    training_done: bool,
}

impl LinkTraining {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Hardware reported training completion via interrupt.
    pub(crate) fn notify_training_finished(&mut self) {
        self.training_done = true;
    }

    pub(crate) fn tick(
        &mut self,
        bus: &mut dyn RegisterBus,
        target: LinkBw,
        caps: &SinkCaps,
    ) -> Result<LinkOutcome, BusError> {
        loop {
            match self.state {
                LinkTrainingState::Init => {
                    self.training_done = false;
                    self.requested = None;
                    bus.update(Page::TxLink, REG_PREEMPH, 0x03, 0)?;
                    self.state = LinkTrainingState::WaitPllLock;
                }
                LinkTrainingState::WaitPllLock => {
                    let pll = bus.read(Page::TxLink, REG_PLL_CTRL)?;
                    if pll & PLL_LOCKED == 0 {
                        // Kick the PLL and hold the stage.
                        bus.set_bits(Page::TxLink, REG_PLL_CTRL, PLL_RESET)?;
                        bus.clear_bits(Page::TxLink, REG_PLL_CTRL, PLL_RESET)?;
                        return Ok(LinkOutcome::Pending);
                    }
                    self.state = LinkTrainingState::CheckLinkBandwidth;
                }
                LinkTrainingState::CheckLinkBandwidth => {
                    self.requested = Some(target.min(caps.max_bw()));
                    self.state = LinkTrainingState::Start;
                }
                LinkTrainingState::Start => {
                    let requested = self.requested.unwrap_or(LinkBw::Bw162);
                    if self.program_and_kick(bus, requested, caps)?.is_err() {
                        self.state = LinkTrainingState::Error;
                        continue;
                    }
                    self.state = LinkTrainingState::WaitingFinish;
                    return Ok(LinkOutcome::Pending);
                }
                LinkTrainingState::WaitingFinish => {
                    let hw_done = bus.read(Page::TxLink, REG_TRAINING_CTRL)? & TRAINING_EN == 0;
                    if self.training_done || hw_done {
                        self.state = LinkTrainingState::Finish;
                    } else {
                        return Ok(LinkOutcome::Pending);
                    }
                }
                LinkTrainingState::Finish => {
                    let requested = self.requested.unwrap_or(LinkBw::Bw162);
                    match self.validate(bus, requested) {
                        Ok(true) => return Ok(LinkOutcome::Trained(requested)),
                        Ok(false) | Err(_) => self.state = LinkTrainingState::Error,
                    }
                }
                LinkTrainingState::Error => {
                    tracing::warn!("link training failed, resetting serdes path");
                    serdes_reset(bus)?;
                    self.reset();
                    return Ok(LinkOutcome::Failed);
                }
            }
        }
    }

    /// Programs spread-spectrum, bandwidth, framing and lane count, then
    /// starts hardware training. AUX-side failures are reported as `Err(())`
    /// so the caller can route to the Error state.
    fn program_and_kick(
        &mut self,
        bus: &mut dyn RegisterBus,
        requested: LinkBw,
        caps: &SinkCaps,
    ) -> Result<Result<(), ()>, BusError> {
        bus.set_bits(Page::TxLink, REG_LINK_CTRL, LINK_SSC_EN)?;
        bus.write(Page::TxLink, REG_LINK_BW, requested.code())?;
        if caps.enhanced_frame {
            bus.set_bits(Page::TxLink, REG_LINK_CTRL, LINK_ENHANCED_FRAME)?;
        } else {
            bus.clear_bits(Page::TxLink, REG_LINK_CTRL, LINK_ENHANCED_FRAME)?;
        }

        let aux_side = (|| {
            aux::native_write_byte(bus, dpcd::DPCD_DOWNSPREAD_CTRL, dpcd::SPREAD_AMP_0_5)?;
            aux::native_write_byte(bus, dpcd::DPCD_LINK_BW_SET, requested.code())?;
            let enhanced = if caps.enhanced_frame { 0x80 } else { 0 };
            let lane_set = (caps.lane_count | enhanced) & caps.lane_count_mask();
            aux::native_write_byte(bus, dpcd::DPCD_LANE_COUNT_SET, lane_set)
        })();
        if let Err(err) = aux_side {
            tracing::warn!(?err, "training setup aux writes failed");
            return Ok(Err(()));
        }

        bus.set_bits(Page::TxLink, REG_TRAINING_CTRL, TRAINING_EN)?;
        Ok(Ok(()))
    }

    /// Post-training checks: lane status, symbol-error counters with one
    /// pre-emphasis nudge, and bandwidth readback.
    fn validate(&mut self, bus: &mut dyn RegisterBus, requested: LinkBw) -> Result<bool, ()> {
        let lane_status = aux::native_read_byte(bus, dpcd::DPCD_LANE0_1_STATUS).map_err(drop)?;
        if lane_status & 0x0F != dpcd::LANE0_TRAINED {
            tracing::warn!(lane_status, "lane status incomplete after training");
            return Ok(false);
        }

        if self.symbol_errors(bus)? != 0 {
            let preemph = bus
                .read(Page::TxLink, REG_PREEMPH)
                .map_err(drop)?
                & 0x03;
            if preemph < PREEMPH_MAX {
                bus.update(Page::TxLink, REG_PREEMPH, 0x03, preemph + 1)
                    .map_err(drop)?;
                let after = self.symbol_errors(bus)?;
                if after != 0 {
                    tracing::trace!(errors = after, "symbol errors persist after pre-emphasis nudge");
                }
            }
        }

        let readback = aux::native_read_byte(bus, dpcd::DPCD_LINK_BW_SET).map_err(drop)?;
        Ok(readback == requested.code())
    }

    fn symbol_errors(&self, bus: &mut dyn RegisterBus) -> Result<u16, ()> {
        let lo = aux::native_read_byte(bus, dpcd::DPCD_SYMBOL_ERR_L).map_err(drop)?;
        let hi = aux::native_read_byte(bus, dpcd::DPCD_SYMBOL_ERR_H).map_err(drop)?;
        Ok(u16::from_le_bytes([lo, hi]))
    }
}
