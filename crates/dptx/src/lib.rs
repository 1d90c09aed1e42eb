//! Link-management core for an HDMI-to-DisplayPort bridge transmitter.
//!
//! A single cooperative tick loop drives nine cooperating sub-state-machines
//! against a register-addressed peripheral: sink/cable identification, EDID
//! retrieval, link training, video/audio packetization and an HDCP handshake,
//! all reacting to hot-plug and link-status interrupt causes.
//!
//! The crate is transport-agnostic: callers supply the register bus, the
//! power lines and the tick scheduler through the traits in [`bus`] and
//! [`transmitter`].

mod audio;
mod aux;
mod bus;
mod chip;
mod dpcd;
mod edid;
mod error;
mod hdcp;
mod irq;
mod link;
mod packet;
mod session;
mod sink;
#[cfg(test)]
mod testutil;
mod transmitter;
mod video;

pub use audio::AudioOutputState;
pub use bus::{BusError, Page, RegisterBus};
pub use chip::KNOWN_CHIP_IDS;
pub use edid::EdidCache;
pub use error::{AttachError, AuxError};
pub use hdcp::{HdcpPolicy, HdcpState};
pub use irq::{InputIrq, InterruptSnapshot, LinkIrq};
pub use link::LinkTrainingState;
pub use packet::PacketBuffers;
pub use session::{Config, MasterState, Session, SubStates};
pub use sink::{CableType, SinkConnState};
pub use transmitter::{PowerControl, TickScheduler, Transmitter};
pub use video::VideoOutputState;

pub use dptx_edid::LinkBw;
