//! Sink-connection stage: cable-type identification and downstream gating.

use crate::aux;
use crate::bus::RegisterBus;
use crate::dpcd::{self, SinkCaps};

/// Consecutive unrecognized polls before demoting to NotCable.
const CABLE_TYPE_RETRIES: u8 = 5;

/// What the DPCD downstream-port field says is on the other end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CableType {
    DigitalDongle,
    Analog,
    HdmiDongle,
    Unrecognized,
    /// The DPCD read itself failed.
    Null,
}

impl CableType {
    /// Pure mapping from DOWNSTREAMPORT_PRESENT bits 2:1.
    pub fn from_dpcd_field(bits: u8) -> CableType {
        match bits & 0b11 {
            0b00 => CableType::DigitalDongle,
            0b01 | 0b11 => CableType::Analog,
            0b10 => CableType::HdmiDongle,
            _ => unreachable!(),
        }
    }

    /// Classifies the whole status byte: without the downstream-port-present
    /// bit the type field is meaningless.
    pub fn classify(status: u8) -> CableType {
        if status & 0x01 == 0 {
            return CableType::Unrecognized;
        }
        CableType::from_dpcd_field(status >> 1)
    }

    fn is_dongle(self) -> bool {
        matches!(self, CableType::DigitalDongle | CableType::HdmiDongle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkConnState {
    #[default]
    Init,
    CheckCableType,
    WaitingCableType,
    Connected,
    NotCable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SinkOutcome {
    /// Stay in this stage.
    Pending,
    /// Downstream sink present; advance to ParseEdid.
    Advance,
    /// Cable never identified; power down and reset.
    NotCable,
}

#[derive(Debug, Default)]
pub(crate) struct SinkConnection {
    pub(crate) state: SinkConnState,
    retries: u8,
    pub(crate) cable: Option<CableType>,
    pub(crate) caps: SinkCaps,
}

impl SinkConnection {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn tick(&mut self, bus: &mut dyn RegisterBus) -> SinkOutcome {
        loop {
            match self.state {
                SinkConnState::Init => {
                    self.retries = 0;
                    self.cable = None;
                    self.state = SinkConnState::CheckCableType;
                }
                SinkConnState::CheckCableType | SinkConnState::WaitingCableType => {
                    let cable = match aux::native_read_byte(bus, dpcd::DPCD_DOWNSTREAMPORT_PRESENT)
                    {
                        Ok(byte) => CableType::classify(byte),
                        Err(err) => {
                            tracing::trace!(?err, "cable-type dpcd read failed");
                            CableType::Null
                        }
                    };
                    self.cable = Some(cable);
                    match cable {
                        CableType::Unrecognized | CableType::Null => {
                            self.retries += 1;
                            if self.retries >= CABLE_TYPE_RETRIES {
                                self.state = SinkConnState::NotCable;
                                return SinkOutcome::NotCable;
                            }
                            self.state = SinkConnState::WaitingCableType;
                            return SinkOutcome::Pending;
                        }
                        _ => {
                            self.retries = 0;
                            self.state = SinkConnState::Connected;
                        }
                    }
                }
                SinkConnState::Connected => {
                    let sink_count = match aux::native_read_byte(bus, dpcd::DPCD_SINK_COUNT) {
                        Ok(byte) => byte & 0x3F,
                        Err(_) => return SinkOutcome::Pending,
                    };
                    if sink_count == 0 {
                        // Dongle present but nothing behind it yet.
                        return SinkOutcome::Pending;
                    }
                    if self.cable.is_some_and(CableType::is_dongle) {
                        // Powered dongle: request D0 downstream.
                        let _ = aux::native_write_byte(bus, dpcd::DPCD_SET_POWER, dpcd::POWER_D0);
                    }
                    match dpcd::read_sink_caps(bus) {
                        Ok(caps) => self.caps = caps,
                        Err(_) => return SinkOutcome::Pending,
                    }
                    return SinkOutcome::Advance;
                }
                SinkConnState::NotCable => return SinkOutcome::NotCable,
            }
        }
    }
}
