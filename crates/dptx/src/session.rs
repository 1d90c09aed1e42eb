//! Top-level sequencer and interrupt dispatch.
//!
//! One `Session` per physical device, owned by the device handle and passed
//! by reference into every sub-machine; there is no global state. Each tick
//! runs exactly one stage's sub-machine, then drains and routes both
//! interrupt-cause groups, then applies at most one state regression with a
//! single cleanup pass.

use crate::audio::{AudioOutcome, AudioOutput, AudioOutputState, AUD_EN, REG_AUD_CTRL};
use crate::aux;
use crate::bus::{BusError, Page, RegisterBus};
use crate::chip::full_hardware_reset;
use crate::dpcd;
use crate::edid::{self, EdidCache, EdidOutcome};
use crate::hdcp::{self, Hdcp, HdcpOutcome, HdcpPolicy, HdcpState, HDCP_ENC_EN, REG_HDCP_CTRL};
use crate::irq::{self, InputIrq, InterruptSnapshot, LinkIrq};
use crate::link::{LinkOutcome, LinkTraining, LinkTrainingState, PLL_LOCKED, REG_PLL_CTRL};
use crate::packet::{self, PacketBuffers, GCP_AV_MUTE, REG_RX_GCP};
use crate::sink::{SinkConnState, SinkConnection, SinkOutcome};
use crate::transmitter::PowerControl;
use crate::video::{VideoOutcome, VideoOutput, VideoOutputState, REG_VIDEO_CTRL, VIDEO_EN, VIDEO_MUTE};
use dptx_edid::LinkBw;

/// Cable-detect status.
pub(crate) const REG_SYS_STATUS: u8 = 0x04;
pub(crate) const SYS_CABLE_DET: u8 = 1 << 0;

/// Interrupt-enable masks, one per cause group.
pub(crate) const REG_LINK_IRQ_MASK: u8 = 0xF2;
pub(crate) const REG_INPUT_IRQ_MASK: u8 = 0xF2;

/// The master link-bring-up state. Monotonically non-decreasing except for
/// the explicit regression triggers (hot-plug loss, forced re-training,
/// forced re-authentication).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum MasterState {
    #[default]
    AwaitingCablePlug,
    Initialized,
    SinkConnection,
    ParseEdid,
    LinkTraining,
    VideoOutput,
    HdcpAuth,
    AudioOutput,
    Playback,
}

/// Driver policy knobs.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub hdcp_policy: HdcpPolicy,
    /// Tick interval while bring-up is in progress.
    pub short_tick_ms: u32,
    /// Tick interval once Playback is reached.
    pub steady_tick_ms: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hdcp_policy: HdcpPolicy::default(),
            short_tick_ms: 20,
            steady_tick_ms: 500,
        }
    }
}

/// Sub-machine states, exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubStates {
    pub sink: SinkConnState,
    pub link: LinkTrainingState,
    pub hdcp: HdcpState,
    pub video: VideoOutputState,
    pub audio: AudioOutputState,
}

/// All transmitter state for one physical device.
#[derive(Debug)]
pub struct Session {
    config: Config,
    master: MasterState,
    sink: SinkConnection,
    link: LinkTraining,
    hdcp: Hdcp,
    video: VideoOutput,
    audio: AudioOutput,
    edid: EdidCache,
    packets: PacketBuffers,
    /// Highest tier the sink/EDID combination permits.
    bw_ceiling: LinkBw,
    /// Tier the last successful training settled on.
    negotiated: Option<LinkBw>,
    /// Higher tier demanded by the video stage for the next training pass.
    retrain_target: Option<LinkBw>,
    encrypt: bool,
    pending_regress: Option<MasterState>,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            master: MasterState::AwaitingCablePlug,
            sink: SinkConnection::default(),
            link: LinkTraining::default(),
            hdcp: Hdcp::default(),
            video: VideoOutput::default(),
            audio: AudioOutput::default(),
            edid: EdidCache::default(),
            packets: PacketBuffers::default(),
            bw_ceiling: LinkBw::Bw162,
            negotiated: None,
            retrain_target: None,
            encrypt: false,
            pending_regress: None,
        }
    }

    pub fn master_state(&self) -> MasterState {
        self.master
    }

    pub(crate) fn short_tick_ms(&self) -> u32 {
        self.config.short_tick_ms
    }

    pub fn sub_states(&self) -> SubStates {
        SubStates {
            sink: self.sink.state,
            link: self.link.state,
            hdcp: self.hdcp.state,
            video: self.video.state,
            audio: self.audio.state,
        }
    }

    /// Whether the authenticated link is shipping encrypted content.
    pub fn encrypting(&self) -> bool {
        self.encrypt
    }

    pub fn edid(&self) -> &EdidCache {
        &self.edid
    }

    /// Returns every sub-machine to its initial state and the master state
    /// to AwaitingCablePlug. Idempotent.
    pub fn reset(&mut self) {
        self.master = MasterState::AwaitingCablePlug;
        self.sink.reset();
        self.link.reset();
        self.hdcp.reset();
        self.video.reset();
        self.audio.reset();
        self.edid.invalidate();
        self.negotiated = None;
        self.retrain_target = None;
        self.encrypt = false;
        self.pending_regress = None;
    }

    /// One cooperative tick. Returns the delay before the next tick.
    pub fn run_tick(
        &mut self,
        bus: &mut dyn RegisterBus,
        power: &mut dyn PowerControl,
    ) -> Result<u32, BusError> {
        self.step_stage(bus, power)?;

        if self.master > MasterState::AwaitingCablePlug {
            let snap = irq::snapshot_and_ack(bus)?;
            if !snap.is_empty() {
                self.dispatch(bus, power, snap)?;
            }
        }

        if let Some(to) = self.pending_regress.take() {
            self.apply_regression(bus, to)?;
        }

        Ok(if self.master == MasterState::Playback {
            self.config.steady_tick_ms
        } else {
            self.config.short_tick_ms
        })
    }

    fn advance(&mut self, to: MasterState) {
        tracing::debug!(from = ?self.master, ?to, "master state advance");
        self.master = to;
    }

    fn step_stage(
        &mut self,
        bus: &mut dyn RegisterBus,
        power: &mut dyn PowerControl,
    ) -> Result<(), BusError> {
        match self.master {
            MasterState::AwaitingCablePlug => {
                let status = bus.read(Page::TxSystem, REG_SYS_STATUS)?;
                if status & SYS_CABLE_DET != 0 {
                    self.advance(MasterState::Initialized);
                }
            }
            MasterState::Initialized => {
                power.power_on();
                self.init_hardware(bus)?;
                self.advance(MasterState::SinkConnection);
            }
            MasterState::SinkConnection => match self.sink.tick(bus) {
                SinkOutcome::Advance => self.advance(MasterState::ParseEdid),
                SinkOutcome::NotCable => {
                    tracing::warn!("cable type never recognized, powering down");
                    power.power_off();
                    full_hardware_reset(bus)?;
                    self.request_regress(MasterState::Initialized);
                }
                SinkOutcome::Pending => {}
            },
            MasterState::ParseEdid => {
                let outcome = edid::read_into(bus, &mut self.edid);
                self.bw_ceiling = self.edid.bandwidth_ceiling(&self.sink.caps);
                tracing::debug!(?outcome, ceiling = ?self.bw_ceiling, "edid stage complete");
                if outcome == EdidOutcome::Broken {
                    tracing::warn!("continuing with dpcd-declared limits only");
                }
                self.advance(MasterState::LinkTraining);
            }
            MasterState::LinkTraining => {
                let target = self.retrain_target.unwrap_or(self.bw_ceiling);
                match self.link.tick(bus, target, &self.sink.caps)? {
                    LinkOutcome::Trained(bw) => {
                        self.negotiated = Some(bw);
                        self.retrain_target = None;
                        self.advance(MasterState::VideoOutput);
                    }
                    // Failed means the stage was reset and is redone next tick.
                    LinkOutcome::Failed | LinkOutcome::Pending => {}
                }
            }
            MasterState::VideoOutput => {
                let negotiated = self.negotiated.unwrap_or(LinkBw::Bw162);
                match self.video.tick(bus, negotiated, &mut self.packets)? {
                    VideoOutcome::Done => self.advance(MasterState::HdcpAuth),
                    VideoOutcome::Retrain(tier) => {
                        tracing::debug!(?tier, "video stage demands retraining");
                        self.retrain_target = Some(tier);
                        self.request_regress(MasterState::LinkTraining);
                    }
                    VideoOutcome::Pending => {}
                }
            }
            MasterState::HdcpAuth => match self.hdcp.tick(bus, self.config.hdcp_policy)? {
                HdcpOutcome::Done { encrypt } => {
                    self.encrypt = encrypt;
                    // Lift the mute a regression into this stage imposed.
                    bus.clear_bits(Page::TxSystem, REG_VIDEO_CTRL, VIDEO_MUTE)?;
                    self.advance(MasterState::AudioOutput);
                }
                HdcpOutcome::FatalReset => {
                    // Downstream power-cycle, then start over from chip init.
                    let _ = aux::native_write_byte(bus, dpcd::DPCD_SET_POWER, dpcd::POWER_D3);
                    bus.delay_ms(10);
                    let _ = aux::native_write_byte(bus, dpcd::DPCD_SET_POWER, dpcd::POWER_D0);
                    full_hardware_reset(bus)?;
                    self.request_regress(MasterState::Initialized);
                }
                HdcpOutcome::Pending => {}
            },
            MasterState::AudioOutput => {
                let negotiated = self.negotiated.unwrap_or(LinkBw::Bw162);
                match self.audio.tick(bus, negotiated, &mut self.packets)? {
                    AudioOutcome::Done => self.advance(MasterState::Playback),
                    AudioOutcome::Pending => {}
                }
            }
            MasterState::Playback => {
                // Steady state; everything is interrupt-driven from here.
            }
        }
        Ok(())
    }

    /// Basic bring-up after power-on or a full hardware reset: unmask both
    /// cause groups and enable DPCD polling.
    fn init_hardware(&mut self, bus: &mut dyn RegisterBus) -> Result<(), BusError> {
        bus.write(Page::TxLink, REG_LINK_IRQ_MASK, 0xFF)?;
        bus.write(Page::RxCore, REG_INPUT_IRQ_MASK, 0xFF)?;
        bus.set_bits(Page::TxLink, aux::REG_AUX_POLL, aux::POLL_EN)
    }

    fn request_regress(&mut self, to: MasterState) {
        self.pending_regress = Some(match self.pending_regress {
            Some(cur) => cur.min(to),
            None => to,
        });
    }

    fn dispatch(
        &mut self,
        bus: &mut dyn RegisterBus,
        power: &mut dyn PowerControl,
        snap: InterruptSnapshot,
    ) -> Result<(), BusError> {
        tracing::trace!(link = ?snap.link, input = ?snap.input, "interrupt causes");

        if snap.link.contains(LinkIrq::HPD_LOST) {
            tracing::debug!("hot plug lost");
            power.power_off();
            self.edid.invalidate();
            self.request_regress(MasterState::AwaitingCablePlug);
            // Nothing else from this snapshot matters without a cable.
            return Ok(());
        }
        if snap
            .link
            .intersects(LinkIrq::HPD_PLUG | LinkIrq::HPD_CHANGE)
            && self.master > MasterState::SinkConnection
        {
            self.request_regress(MasterState::SinkConnection);
        }
        if snap.link.contains(LinkIrq::PLL_LOCK_CHANGE) && self.master > MasterState::LinkTraining {
            let pll = bus.read(Page::TxLink, REG_PLL_CTRL)?;
            if pll & PLL_LOCKED == 0 {
                tracing::warn!("pll lock lost, forcing retraining");
                self.request_regress(MasterState::LinkTraining);
            }
        }
        if snap.link.contains(LinkIrq::TRAINING_FINISHED) {
            self.link.notify_training_finished();
        }
        if snap.link.contains(LinkIrq::HDCP_AUTH_DONE) {
            self.hdcp.notify_auth_done();
        }
        if snap.link.contains(LinkIrq::HDCP_LINK_FAIL) && self.master > MasterState::HdcpAuth {
            tracing::warn!("hdcp link integrity check failed, re-authenticating");
            self.request_regress(MasterState::HdcpAuth);
        }

        if snap.input.contains(InputIrq::NEW_AVI) && self.master > MasterState::VideoOutput {
            packet::mirror_avi(bus, &mut self.packets)?;
        }
        if snap.input.contains(InputIrq::NEW_VSI) && self.master > MasterState::VideoOutput {
            packet::mirror_vsi(bus, &mut self.packets)?;
        }
        if snap.input.contains(InputIrq::NO_VSI) {
            packet::disable_vsi(bus)?;
        }
        if snap.input.contains(InputIrq::NEW_GCP) {
            let gcp = bus.read(Page::RxExt, REG_RX_GCP)?;
            if gcp & GCP_AV_MUTE != 0 {
                bus.set_bits(Page::TxSystem, REG_VIDEO_CTRL, VIDEO_MUTE)?;
            } else {
                bus.clear_bits(Page::TxSystem, REG_VIDEO_CTRL, VIDEO_MUTE)?;
            }
        }
        if snap.input.intersects(
            InputIrq::CLOCK_CHANGE | InputIrq::SYNC_CHANGE | InputIrq::HDMI_DVI_CHANGE,
        ) && self.master >= MasterState::VideoOutput
        {
            tracing::debug!("input stream changed, renegotiating link");
            self.request_regress(MasterState::LinkTraining);
        }
        if snap.input.contains(InputIrq::AUDIO_CTS) {
            self.audio.notify_rcv_int();
        }
        if snap.input.contains(InputIrq::AUDIO_SAMPLE) {
            self.audio.notify_rcv_int();
        }
        if snap.input.contains(InputIrq::HDCP_ERROR_BURST) && self.master > MasterState::HdcpAuth {
            tracing::warn!("hdcp error burst, re-authenticating");
            self.request_regress(MasterState::HdcpAuth);
        }
        Ok(())
    }

    /// The one-shot cleanup pass: mutes outputs, clears stale protection
    /// status and resets every sub-machine owned by a stage at or beyond the
    /// regression target, then moves the master state.
    fn apply_regression(&mut self, bus: &mut dyn RegisterBus, to: MasterState) -> Result<(), BusError> {
        tracing::debug!(from = ?self.master, ?to, "master state regression");

        if to <= MasterState::AudioOutput {
            bus.clear_bits(Page::TxLink, REG_AUD_CTRL, AUD_EN)?;
            self.audio.reset();
        }
        if to <= MasterState::HdcpAuth {
            hdcp::clear_stale_status(bus)?;
            bus.clear_bits(Page::TxLink, REG_HDCP_CTRL, HDCP_ENC_EN)?;
            // Formerly protected content must not ship in the clear while
            // re-authenticating.
            bus.set_bits(Page::TxSystem, REG_VIDEO_CTRL, VIDEO_MUTE)?;
            self.hdcp.reset();
            self.encrypt = false;
        }
        if to <= MasterState::VideoOutput {
            bus.set_bits(Page::TxSystem, REG_VIDEO_CTRL, VIDEO_MUTE)?;
            bus.clear_bits(Page::TxSystem, REG_VIDEO_CTRL, VIDEO_EN)?;
            packet::disable_all(bus)?;
            self.video.reset();
        }
        if to <= MasterState::LinkTraining {
            self.link.reset();
            self.negotiated = None;
        }
        if to <= MasterState::SinkConnection {
            self.sink.reset();
        }
        if to <= MasterState::Initialized {
            self.retrain_target = None;
        }
        self.master = to;
        Ok(())
    }
}
