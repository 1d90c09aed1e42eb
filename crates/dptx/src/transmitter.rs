//! Device handle: collaborator traits and the scheduler-facing surface.

use crate::bus::RegisterBus;
use crate::chip;
use crate::error::AttachError;
use crate::session::{Config, MasterState, Session};

/// Hardware enable/reset line sequencing. Implementations own the two lines
/// and the short inter-step settle delays.
pub trait PowerControl {
    fn power_on(&mut self);
    fn power_off(&mut self);
}

/// Periodic-task primitives. `schedule_tick` arms a single pending callback
/// to `Transmitter::run_tick`; `cancel_and_flush` synchronously cancels it
/// and waits out any in-flight tick.
pub trait TickScheduler {
    fn schedule_tick(&mut self, delay_ms: u32);
    fn cancel_and_flush(&mut self);
}

/// One attached bridge transmitter.
///
/// Owns the session exclusively; the scheduler is expected to deliver ticks
/// one at a time (the per-device lock in the surrounding driver shell holds
/// for the duration of each tick).
pub struct Transmitter<B, P, S> {
    bus: B,
    power: P,
    scheduler: S,
    session: Session,
    chip_id: u16,
}

impl<B: RegisterBus, P: PowerControl, S: TickScheduler> Transmitter<B, P, S> {
    /// Probes the chip identity and arms the first tick.
    ///
    /// An unknown identity is fatal: the device never attaches.
    pub fn attach(
        mut bus: B,
        power: P,
        mut scheduler: S,
        config: Config,
    ) -> Result<Self, AttachError> {
        let chip_id = chip::probe_chip_id(&mut bus)?;
        tracing::debug!(chip_id, "transmitter attached");
        scheduler.schedule_tick(0);
        Ok(Self {
            bus,
            power,
            scheduler,
            session: Session::new(config),
            chip_id,
        })
    }

    pub fn chip_id(&self) -> u16 {
        self.chip_id
    }

    pub fn current_master_state(&self) -> MasterState {
        self.session.master_state()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Runs one tick and reschedules. Invoked by the scheduler callback.
    pub fn run_tick(&mut self) {
        match self.session.run_tick(&mut self.bus, &mut self.power) {
            Ok(delay_ms) => self.scheduler.schedule_tick(delay_ms),
            Err(err) => {
                // Failed-this-attempt: retry on the short interval.
                tracing::warn!(%err, "tick aborted on bus error");
                self.scheduler.schedule_tick(self.session.short_tick_ms());
            }
        }
    }

    /// Returns the session to its initial state without touching hardware.
    pub fn reset_session(&mut self) {
        self.session.reset();
    }

    /// Cancels pending work, powers the output down and resets all state.
    pub fn suspend(&mut self) {
        self.scheduler.cancel_and_flush();
        self.power.power_off();
        self.session.reset();
    }

    /// Re-arms the tick loop; the first tick re-enters at AwaitingCablePlug.
    pub fn resume(&mut self) {
        self.session.reset();
        self.scheduler.schedule_tick(0);
    }
}
