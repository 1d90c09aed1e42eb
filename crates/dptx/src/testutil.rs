//! In-memory register bus used by the unit tests in this crate.
//!
//! Integration tests carry a richer harness (a scripted DPCD/EDID sink); this
//! fake only models flat registers plus the AUX completion handshake: when
//! the operation-enable bit is written, the op "completes" immediately with a
//! queued reply (or a queued failure status).

use std::collections::{HashMap, HashSet, VecDeque};

use crate::aux::{AUX_OP_EN, REG_AUX_CTRL2, REG_AUX_RX_COUNT, REG_AUX_STATUS, REG_AUX_BUF};
use crate::bus::{BusError, Page, RegisterBus};

/// A queued outcome for one AUX transaction.
pub(crate) enum AuxReply {
    /// Completes with status 0 and these read-back bytes (may be empty).
    Data(Vec<u8>),
    /// Completes with a nonzero status nibble.
    Fail(u8),
    /// The busy bit never clears.
    Hang,
}

#[derive(Default)]
pub(crate) struct FakeBus {
    regs: HashMap<(Page, u8), u8>,
    fail: HashSet<(Page, u8)>,
    pub(crate) aux_replies: VecDeque<AuxReply>,
    pub(crate) writes: Vec<(Page, u8, u8)>,
    pub(crate) delays_ms: u32,
}

impl FakeBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_reg(&mut self, page: Page, offset: u8, value: u8) {
        self.regs.insert((page, offset), value);
    }

    pub(crate) fn reg(&self, page: Page, offset: u8) -> u8 {
        *self.regs.get(&(page, offset)).unwrap_or(&0)
    }

    /// Makes every access to this register fail with a bus error.
    pub(crate) fn fail_at(&mut self, page: Page, offset: u8) {
        self.fail.insert((page, offset));
    }

    pub(crate) fn push_aux_reply(&mut self, reply: AuxReply) {
        self.aux_replies.push_back(reply);
    }

    fn complete_aux(&mut self) {
        match self.aux_replies.pop_front() {
            Some(AuxReply::Data(bytes)) => {
                for (i, b) in bytes.iter().enumerate() {
                    self.regs.insert((Page::TxLink, REG_AUX_BUF + i as u8), *b);
                }
                self.regs
                    .insert((Page::TxLink, REG_AUX_RX_COUNT), bytes.len() as u8);
                self.regs.insert((Page::TxLink, REG_AUX_STATUS), 0);
                self.ack_op_en();
            }
            Some(AuxReply::Fail(status)) => {
                self.regs.insert((Page::TxLink, REG_AUX_STATUS), status);
                self.ack_op_en();
            }
            Some(AuxReply::Hang) => {}
            // No script: complete successfully with no data.
            None => {
                self.regs.insert((Page::TxLink, REG_AUX_RX_COUNT), 0);
                self.regs.insert((Page::TxLink, REG_AUX_STATUS), 0);
                self.ack_op_en();
            }
        }
    }

    fn ack_op_en(&mut self) {
        let cur = self.reg(Page::TxLink, REG_AUX_CTRL2);
        self.regs
            .insert((Page::TxLink, REG_AUX_CTRL2), cur & !AUX_OP_EN);
    }
}

impl RegisterBus for FakeBus {
    fn read(&mut self, page: Page, offset: u8) -> Result<u8, BusError> {
        if self.fail.contains(&(page, offset)) {
            return Err(BusError { page, offset });
        }
        Ok(self.reg(page, offset))
    }

    fn write(&mut self, page: Page, offset: u8, value: u8) -> Result<(), BusError> {
        if self.fail.contains(&(page, offset)) {
            return Err(BusError { page, offset });
        }
        self.writes.push((page, offset, value));
        self.regs.insert((page, offset), value);
        if page == Page::TxLink && offset == REG_AUX_CTRL2 && value & AUX_OP_EN != 0 {
            self.complete_aux();
        }
        Ok(())
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delays_ms += ms;
    }
}
