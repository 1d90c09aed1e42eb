//! Content-protection (HDCP) engine.
//!
//! Hardware auto-authentication with a bounded failure budget. Five
//! consecutive failures power-cycle the downstream device and force a full
//! hardware reset; anything less retries from the video-stable gate.

use crate::aux;
use crate::bus::{BusError, Page, RegisterBus};
use crate::chip::{REG_RESET_CTRL2, RESET2_HDCP};
use crate::dpcd;
use crate::video::{tx_video_stable, REG_TX_VIDEO_STATUS};

/// Authentication control.
pub(crate) const REG_HDCP_CTRL: u8 = 0x20;
pub(crate) const HDCP_HARD_AUTH_EN: u8 = 1 << 0;
pub(crate) const HDCP_BKSV_SRM_PASS: u8 = 1 << 1;
pub(crate) const HDCP_KSVLIST_VLD: u8 = 1 << 2;
pub(crate) const HDCP_ENC_EN: u8 = 1 << 3;

/// Authentication status; write-1-to-clear.
pub(crate) const REG_HDCP_STATUS: u8 = 0x21;
pub(crate) const HDCP_AUTH_PASS: u8 = 1 << 0;

/// R0 / KSV-ready wait timers programmed before kicking authentication.
pub(crate) const REG_HDCP_WAIT_R0: u8 = 0x22;
pub(crate) const REG_HDCP_WAIT_KSV: u8 = 0x23;
const WAIT_R0_DEFAULT: u8 = 0xB0;
const WAIT_KSV_DEFAULT: u8 = 0xC8;

/// Protection sub-block power bit on the system page.
pub(crate) const REG_POWER_CTRL: u8 = 0x07;
pub(crate) const POWER_HDCP: u8 = 1 << 2;

/// Consecutive failures tolerated before escalating.
const HDCP_FAILURE_CAP: u8 = 5;

/// Whether the authentication handshake runs at all.
///
/// The hardware this models shipped with a debug override that forced the
/// engine into NotSupported regardless of the capability probe; that override
/// is an explicit policy here instead of silent behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HdcpPolicy {
    /// Probe the sink and authenticate when it is capable.
    #[default]
    Auto,
    /// Skip authentication entirely (ships content unencrypted).
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HdcpState {
    #[default]
    CapabilityCheck,
    WaitVideoStable,
    HardwareEnable,
    WaitingFinish,
    Finish,
    Failed,
    NotSupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HdcpOutcome {
    Pending,
    /// Handshake concluded; `encrypt` says whether output encryption is on.
    Done { encrypt: bool },
    /// Failure budget exhausted: caller must power-cycle downstream and
    /// perform a full hardware reset.
    FatalReset,
}

#[derive(Debug, Default)]
pub(crate) struct Hdcp {
    pub(crate) state: HdcpState,
    failures: u8,
    auth_done: bool,
    encrypt: bool,
}

impl Hdcp {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Hardware signalled authentication completion via interrupt.
    pub(crate) fn notify_auth_done(&mut self) {
        self.auth_done = true;
    }

    pub(crate) fn tick(
        &mut self,
        bus: &mut dyn RegisterBus,
        policy: HdcpPolicy,
    ) -> Result<HdcpOutcome, BusError> {
        loop {
            match self.state {
                HdcpState::CapabilityCheck => {
                    if policy == HdcpPolicy::Disabled {
                        self.state = HdcpState::NotSupported;
                        continue;
                    }
                    match aux::native_read_byte(bus, dpcd::DPCD_HDCP_BCAPS) {
                        Ok(bcaps) if bcaps & dpcd::BCAPS_HDCP_CAPABLE != 0 => {
                            self.state = HdcpState::WaitVideoStable;
                        }
                        Ok(_) => self.state = HdcpState::NotSupported,
                        // AUX self-heals; probe again next tick.
                        Err(_) => return Ok(HdcpOutcome::Pending),
                    }
                }
                HdcpState::WaitVideoStable => {
                    let status = bus.read(Page::TxSystem, REG_TX_VIDEO_STATUS)?;
                    if !tx_video_stable(status) {
                        return Ok(HdcpOutcome::Pending);
                    }
                    self.state = HdcpState::HardwareEnable;
                }
                HdcpState::HardwareEnable => {
                    self.hardware_enable(bus)?;
                    self.auth_done = false;
                    self.state = HdcpState::WaitingFinish;
                    return Ok(HdcpOutcome::Pending);
                }
                HdcpState::WaitingFinish => {
                    if !self.auth_done {
                        return Ok(HdcpOutcome::Pending);
                    }
                    self.auth_done = false;
                    let status = bus.read(Page::TxLink, REG_HDCP_STATUS)?;
                    if status & HDCP_AUTH_PASS != 0 {
                        self.encrypt = self.repeater_within_limits(bus);
                        if self.encrypt {
                            bus.set_bits(Page::TxLink, REG_HDCP_CTRL, HDCP_ENC_EN)?;
                        } else {
                            tracing::warn!(
                                "repeater topology exceeds limits, passing without encryption"
                            );
                            bus.clear_bits(Page::TxLink, REG_HDCP_CTRL, HDCP_ENC_EN)?;
                        }
                        self.state = HdcpState::Finish;
                        continue;
                    }
                    self.failures += 1;
                    if self.failures >= HDCP_FAILURE_CAP {
                        tracing::warn!(
                            failures = self.failures,
                            "hdcp failure budget exhausted, escalating to hardware reset"
                        );
                        self.failures = 0;
                        self.state = HdcpState::Failed;
                        return Ok(HdcpOutcome::FatalReset);
                    }
                    tracing::trace!(failures = self.failures, "hdcp authentication retry");
                    self.state = HdcpState::WaitVideoStable;
                    return Ok(HdcpOutcome::Pending);
                }
                HdcpState::Finish => return Ok(HdcpOutcome::Done { encrypt: self.encrypt }),
                HdcpState::NotSupported => return Ok(HdcpOutcome::Done { encrypt: false }),
                HdcpState::Failed => return Ok(HdcpOutcome::FatalReset),
            }
        }
    }

    /// Clears stale status, power-cycles the protection block and kicks
    /// hardware auto-authentication. The enable bits are dropped first so a
    /// retry presents a fresh rising edge to the engine.
    fn hardware_enable(&mut self, bus: &mut dyn RegisterBus) -> Result<(), BusError> {
        clear_stale_status(bus)?;
        bus.clear_bits(
            Page::TxLink,
            REG_HDCP_CTRL,
            HDCP_HARD_AUTH_EN | HDCP_BKSV_SRM_PASS | HDCP_KSVLIST_VLD | HDCP_ENC_EN,
        )?;

        // Reset the protection logic while its power is off so the engine
        // comes back with no residue from the previous attempt.
        bus.clear_bits(Page::TxSystem, REG_POWER_CTRL, POWER_HDCP)?;
        bus.set_bits(Page::TxSystem, REG_RESET_CTRL2, RESET2_HDCP)?;
        bus.delay_ms(20);
        bus.clear_bits(Page::TxSystem, REG_RESET_CTRL2, RESET2_HDCP)?;
        bus.set_bits(Page::TxSystem, REG_POWER_CTRL, POWER_HDCP)?;
        bus.delay_ms(50);

        bus.write(Page::TxLink, REG_HDCP_WAIT_R0, WAIT_R0_DEFAULT)?;
        bus.write(Page::TxLink, REG_HDCP_WAIT_KSV, WAIT_KSV_DEFAULT)?;
        bus.set_bits(
            Page::TxLink,
            REG_HDCP_CTRL,
            HDCP_HARD_AUTH_EN | HDCP_BKSV_SRM_PASS | HDCP_KSVLIST_VLD,
        )
    }

    /// Max-cascade / max-devices check on the repeater topology fields.
    /// Exceeding the limit still counts as an authentication pass, just
    /// without encryption.
    fn repeater_within_limits(&self, bus: &mut dyn RegisterBus) -> bool {
        let lo = aux::native_read_byte(bus, dpcd::DPCD_HDCP_BINFO_L);
        let hi = aux::native_read_byte(bus, dpcd::DPCD_HDCP_BINFO_H);
        match (lo, hi) {
            (Ok(lo), Ok(hi)) => {
                lo & dpcd::MAX_DEVS_EXCEEDED == 0 && hi & dpcd::MAX_CASCADE_EXCEEDED == 0
            }
            // Unreadable topology: stay conservative and keep encryption off.
            _ => false,
        }
    }
}

/// Drops any stale authentication status; also used by regression cleanup.
pub(crate) fn clear_stale_status(bus: &mut dyn RegisterBus) -> Result<(), BusError> {
    bus.write(Page::TxLink, REG_HDCP_STATUS, 0xFF)
}
