//! AUX-channel transaction engine.
//!
//! Encodes native-AUX and I²C-over-AUX bursts of up to 16 bytes through the
//! controller's FIFO window, waits for completion with a bounded poll, and
//! heals the AUX sub-block on failure. Callers treat every error here as
//! recoverable-but-logged; retry policy belongs to them.

use crate::bus::{BusError, Page, RegisterBus};
use crate::chip::{REG_RESET_CTRL2, RESET2_AUX};
use crate::error::AuxError;

/// Largest burst one AUX transaction can carry.
pub(crate) const AUX_MAX_BURST: usize = 16;

pub(crate) const REG_AUX_ADDR_7_0: u8 = 0x18;
pub(crate) const REG_AUX_ADDR_15_8: u8 = 0x19;
pub(crate) const REG_AUX_ADDR_19_16: u8 = 0x1A;
/// [7:4] burst length minus one, [3:0] command nibble.
pub(crate) const REG_AUX_CTRL: u8 = 0x1B;
pub(crate) const REG_AUX_CTRL2: u8 = 0x1C;
pub(crate) const REG_AUX_STATUS: u8 = 0x1D;
pub(crate) const REG_AUX_RX_COUNT: u8 = 0x1E;
/// DPCD polling block status; gates the light-reset path.
pub(crate) const REG_AUX_POLL: u8 = 0x1F;
/// First byte of the 16-byte FIFO window.
pub(crate) const REG_AUX_BUF: u8 = 0x30;

/// Operation enable; self-clears when the transaction completes.
pub(crate) const AUX_OP_EN: u8 = 1 << 0;
/// Suppress the data phase (segment-pointer style addressing).
pub(crate) const AUX_ADDR_ONLY: u8 = 1 << 1;

pub(crate) const POLL_EN: u8 = 1 << 0;
pub(crate) const POLL_FAULT: u8 = 1 << 1;

const CMD_I2C_WRITE: u8 = 0x4;
const CMD_I2C_READ: u8 = 0x5;
const CMD_NATIVE_WRITE: u8 = 0x8;
const CMD_NATIVE_READ: u8 = 0x9;

/// Completion-poll bound: 150 iterations of 2 ms.
const BUSY_POLL_ITERS: u32 = 150;
const BUSY_POLL_STEP_MS: u32 = 2;

fn program_address(bus: &mut dyn RegisterBus, addr: u32) -> Result<(), BusError> {
    bus.write(Page::TxLink, REG_AUX_ADDR_7_0, (addr & 0xFF) as u8)?;
    bus.write(Page::TxLink, REG_AUX_ADDR_15_8, ((addr >> 8) & 0xFF) as u8)?;
    bus.write(Page::TxLink, REG_AUX_ADDR_19_16, ((addr >> 16) & 0x0F) as u8)
}

fn wait_completion(bus: &mut dyn RegisterBus) -> Result<(), AuxError> {
    for _ in 0..BUSY_POLL_ITERS {
        let ctrl2 = bus.read(Page::TxLink, REG_AUX_CTRL2)?;
        if ctrl2 & AUX_OP_EN == 0 {
            let status = bus.read(Page::TxLink, REG_AUX_STATUS)? & 0x0F;
            if status != 0 {
                return Err(AuxError::Status(status));
            }
            return Ok(());
        }
        bus.delay_ms(BUSY_POLL_STEP_MS);
    }
    Err(AuxError::Timeout)
}

/// Restores the AUX sub-block after a failed transaction.
///
/// When the DPCD polling block is enabled and has not itself faulted, the
/// failure was transient and a bare sub-block reset pulse suffices.
/// Otherwise the whole AUX path is reset and its address/control registers
/// cleared.
fn recover(bus: &mut dyn RegisterBus, err: AuxError) {
    tracing::warn!(?err, "aux transaction failed, resetting aux block");
    let light = matches!(
        bus.read(Page::TxLink, REG_AUX_POLL),
        Ok(poll) if poll & POLL_EN != 0 && poll & POLL_FAULT == 0
    );
    let r = (|| -> Result<(), BusError> {
        bus.set_bits(Page::TxSystem, REG_RESET_CTRL2, RESET2_AUX)?;
        bus.delay_ms(2);
        bus.clear_bits(Page::TxSystem, REG_RESET_CTRL2, RESET2_AUX)?;
        if !light {
            bus.write(Page::TxLink, REG_AUX_CTRL, 0)?;
            bus.write(Page::TxLink, REG_AUX_CTRL2, 0)?;
            bus.write(Page::TxLink, REG_AUX_ADDR_7_0, 0)?;
            bus.write(Page::TxLink, REG_AUX_ADDR_15_8, 0)?;
            bus.write(Page::TxLink, REG_AUX_ADDR_19_16, 0)?;
        }
        Ok(())
    })();
    if let Err(bus_err) = r {
        tracing::warn!(%bus_err, "aux recovery itself hit a bus error");
    }
}

fn run(bus: &mut dyn RegisterBus, addr: u32, cmd: u8, len: usize, addr_only: bool) -> Result<(), AuxError> {
    if len > AUX_MAX_BURST {
        return Err(AuxError::BurstTooLong(len));
    }
    let res = (|| {
        program_address(bus, addr)?;
        let len_field = if len == 0 { 0 } else { (len as u8 - 1) << 4 };
        bus.write(Page::TxLink, REG_AUX_CTRL, len_field | cmd)?;
        let ctrl2 = AUX_OP_EN | if addr_only { AUX_ADDR_ONLY } else { 0 };
        bus.write(Page::TxLink, REG_AUX_CTRL2, ctrl2)?;
        wait_completion(bus)
    })();
    if let Err(err) = res {
        recover(bus, err);
        return Err(err);
    }
    Ok(())
}

fn load_fifo(bus: &mut dyn RegisterBus, data: &[u8]) -> Result<(), BusError> {
    for (i, b) in data.iter().enumerate() {
        bus.write(Page::TxLink, REG_AUX_BUF + i as u8, *b)?;
    }
    Ok(())
}

fn drain_fifo(bus: &mut dyn RegisterBus, out: &mut [u8]) -> Result<usize, BusError> {
    let count = (bus.read(Page::TxLink, REG_AUX_RX_COUNT)? as usize).min(out.len());
    for (i, slot) in out.iter_mut().enumerate().take(count) {
        *slot = bus.read(Page::TxLink, REG_AUX_BUF + i as u8)?;
    }
    Ok(count)
}

/// Native-AUX read of up to 16 bytes from a 20-bit DPCD address.
///
/// Returns the number of bytes the sink actually delivered, which may be
/// short (including zero) without being an error.
pub(crate) fn native_read(
    bus: &mut dyn RegisterBus,
    addr: u32,
    out: &mut [u8],
) -> Result<usize, AuxError> {
    run(bus, addr, CMD_NATIVE_READ, out.len(), false)?;
    Ok(drain_fifo(bus, out)?)
}

pub(crate) fn native_read_byte(bus: &mut dyn RegisterBus, addr: u32) -> Result<u8, AuxError> {
    let mut b = [0u8; 1];
    native_read(bus, addr, &mut b)?;
    Ok(b[0])
}

/// Native-AUX write of up to 16 bytes.
pub(crate) fn native_write(
    bus: &mut dyn RegisterBus,
    addr: u32,
    data: &[u8],
) -> Result<(), AuxError> {
    if data.len() > AUX_MAX_BURST {
        return Err(AuxError::BurstTooLong(data.len()));
    }
    load_fifo(bus, data)?;
    run(bus, addr, CMD_NATIVE_WRITE, data.len(), false)
}

pub(crate) fn native_write_byte(
    bus: &mut dyn RegisterBus,
    addr: u32,
    value: u8,
) -> Result<(), AuxError> {
    native_write(bus, addr, &[value])
}

/// I²C-over-AUX read from a 7-bit device address.
pub(crate) fn i2c_read(
    bus: &mut dyn RegisterBus,
    i2c_addr: u8,
    out: &mut [u8],
) -> Result<usize, AuxError> {
    run(bus, i2c_addr as u32, CMD_I2C_READ, out.len(), false)?;
    Ok(drain_fifo(bus, out)?)
}

/// I²C-over-AUX write (register-offset or segment-pointer style).
pub(crate) fn i2c_write(
    bus: &mut dyn RegisterBus,
    i2c_addr: u8,
    data: &[u8],
) -> Result<(), AuxError> {
    if data.len() > AUX_MAX_BURST {
        return Err(AuxError::BurstTooLong(data.len()));
    }
    load_fifo(bus, data)?;
    run(bus, i2c_addr as u32, CMD_I2C_WRITE, data.len(), false)
}

/// Address-only I²C transaction: selects the target without a data phase.
pub(crate) fn i2c_address_only(bus: &mut dyn RegisterBus, i2c_addr: u8) -> Result<(), AuxError> {
    run(bus, i2c_addr as u32, CMD_I2C_WRITE, 0, true)
}
