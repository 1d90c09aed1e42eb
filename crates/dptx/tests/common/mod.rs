//! Scripted device model shared by the integration tests.
//!
//! `TestBus` emulates the bridge's register file on all five pages plus the
//! downstream sink behind the AUX engine: a DPCD register map and a
//! multi-block EDID EEPROM with segment-pointer addressing. AUX transactions
//! complete synchronously when the operation-enable bit is written, hardware
//! link training finishes instantly, and the HDCP engine resolves according
//! to a scripted pass/fail result.
//!
//! The handle types are cheaply cloneable so a test can keep inspecting the
//! model after handing ownership to a `Transmitter`.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use dptx::{Config, MasterState, Page, PowerControl, RegisterBus, Session, TickScheduler};
use dptx_edid::correction_byte;

// AUX engine register protocol, as programmed by the driver.
const REG_AUX_ADDR_7_0: u8 = 0x18;
const REG_AUX_ADDR_15_8: u8 = 0x19;
const REG_AUX_ADDR_19_16: u8 = 0x1A;
const REG_AUX_CTRL: u8 = 0x1B;
const REG_AUX_CTRL2: u8 = 0x1C;
const REG_AUX_STATUS: u8 = 0x1D;
const REG_AUX_RX_COUNT: u8 = 0x1E;
const REG_AUX_BUF: u8 = 0x30;
const AUX_OP_EN: u8 = 1 << 0;
const AUX_ADDR_ONLY: u8 = 1 << 1;

const CMD_I2C_WRITE: u8 = 0x4;
const CMD_I2C_READ: u8 = 0x5;
const CMD_NATIVE_WRITE: u8 = 0x8;
const CMD_NATIVE_READ: u8 = 0x9;

const DDC_EDID_ADDR: u8 = 0x50;
const DDC_SEGMENT_ADDR: u8 = 0x30;

const REG_TRAINING_CTRL: u8 = 0x13;
const TRAINING_EN: u8 = 1 << 0;
pub const REG_HDCP_CTRL: u8 = 0x20;
const HDCP_HARD_AUTH_EN: u8 = 1 << 0;
const REG_HDCP_STATUS: u8 = 0x21;

// Registers the tests themselves poke or assert on.
pub const REG_SYS_STATUS: u8 = 0x04;
pub const SYS_CABLE_DET: u8 = 1 << 0;
pub const REG_VIDEO_CTRL: u8 = 0x09;
pub const VIDEO_EN: u8 = 1 << 0;
pub const VIDEO_MUTE: u8 = 1 << 1;
pub const REG_PLL_CTRL: u8 = 0x10;
pub const PLL_LOCKED: u8 = 1 << 7;
pub const REG_PREEMPH: u8 = 0x14;
pub const HDCP_ENC_EN: u8 = 1 << 3;
pub const REG_AUD_CTRL: u8 = 0x46;
pub const AUD_EN: u8 = 1 << 0;
pub const REG_PKT_EN: u8 = 0x00;
pub const REG_RX_GCP: u8 = 0x84;
pub const REG_RX_AUDIO_FS: u8 = 0x90;

pub const DPCD_DOWNSTREAMPORT_PRESENT: u32 = 0x005;
pub const DPCD_LINK_BW_SET: u32 = 0x100;
pub const DPCD_SINK_COUNT: u32 = 0x200;
pub const DPCD_LANE0_1_STATUS: u32 = 0x202;
pub const DPCD_SYMBOL_ERR_L: u32 = 0x210;
pub const DPCD_SET_POWER: u32 = 0x600;
pub const DPCD_HDCP_BCAPS: u32 = 0x6_8028;
pub const DPCD_HDCP_BINFO_L: u32 = 0x6_802A;

pub const POWER_D0: u8 = 0x01;
pub const POWER_D3: u8 = 0x02;

// Interrupt cause groups; bit layout matches the driver's cause flags.
const REG_LINK_IRQ_L: u8 = 0xF0;
const REG_LINK_IRQ_H: u8 = 0xF1;
const REG_INPUT_IRQ_L: u8 = 0xF0;
const REG_INPUT_IRQ_H: u8 = 0xF1;
const LINK_IRQ_HDCP_AUTH_DONE: u16 = 1 << 5;

#[derive(Default)]
struct BusInner {
    regs: HashMap<(Page, u8), u8>,
    dpcd: HashMap<u32, u8>,
    /// Values served instead of the stored DPCD byte, for readback-mismatch
    /// scenarios.
    dpcd_read_overrides: HashMap<u32, u8>,
    dpcd_writes: Vec<(u32, u8)>,
    edid: Vec<u8>,
    segment: u8,
    edid_offset: u8,
    /// (segment, word offset) of every EDID data read, in order.
    edid_reads: Vec<(u8, u8)>,
    /// All I²C-over-AUX operations fail with a completion status.
    nack_i2c: bool,
    /// Registers whose accesses fail with a bus error.
    fail: HashSet<(Page, u8)>,
    /// Scripted outcome of a hardware authentication kick; `None` hangs.
    auth_result: Option<bool>,
    auth_attempts: u32,
    delays_ms: u64,
}

impl BusInner {
    fn reg(&self, page: Page, offset: u8) -> u8 {
        *self.regs.get(&(page, offset)).unwrap_or(&0)
    }

    fn put(&mut self, page: Page, offset: u8, value: u8) {
        self.regs.insert((page, offset), value);
    }

    fn is_w1c(page: Page, offset: u8) -> bool {
        matches!(
            (page, offset),
            (Page::TxLink, REG_LINK_IRQ_L)
                | (Page::TxLink, REG_LINK_IRQ_H)
                | (Page::TxLink, REG_HDCP_STATUS)
                | (Page::RxCore, REG_INPUT_IRQ_L)
                | (Page::RxCore, REG_INPUT_IRQ_H)
        )
    }

    fn raise(&mut self, page: Page, reg_l: u8, reg_h: u8, bits: u16) {
        let [lo, hi] = bits.to_le_bytes();
        let cur_l = self.reg(page, reg_l);
        let cur_h = self.reg(page, reg_h);
        self.put(page, reg_l, cur_l | lo);
        self.put(page, reg_h, cur_h | hi);
    }

    fn write(&mut self, page: Page, offset: u8, value: u8) {
        if Self::is_w1c(page, offset) {
            let cur = self.reg(page, offset);
            self.put(page, offset, cur & !value);
            return;
        }

        let old = self.reg(page, offset);
        self.put(page, offset, value);

        if page != Page::TxLink {
            return;
        }
        match offset {
            // Hardware-assisted training completes immediately.
            REG_TRAINING_CTRL if value & TRAINING_EN != 0 => {
                self.put(page, offset, value & !TRAINING_EN);
            }
            // A rising edge on the auth enable kicks one authentication.
            REG_HDCP_CTRL
                if old & HDCP_HARD_AUTH_EN == 0 && value & HDCP_HARD_AUTH_EN != 0 =>
            {
                if let Some(pass) = self.auth_result {
                    self.auth_attempts += 1;
                    self.put(Page::TxLink, REG_HDCP_STATUS, pass as u8);
                    self.raise(
                        Page::TxLink,
                        REG_LINK_IRQ_L,
                        REG_LINK_IRQ_H,
                        LINK_IRQ_HDCP_AUTH_DONE,
                    );
                }
            }
            REG_AUX_CTRL2 if value & AUX_OP_EN != 0 => self.complete_aux(value),
            _ => {}
        }
    }

    fn complete_aux(&mut self, ctrl2: u8) {
        let ctrl = self.reg(Page::TxLink, REG_AUX_CTRL);
        let cmd = ctrl & 0x0F;
        let addr_only = ctrl2 & AUX_ADDR_ONLY != 0;
        let len = if addr_only {
            0
        } else {
            (ctrl >> 4) as usize + 1
        };
        let addr = self.reg(Page::TxLink, REG_AUX_ADDR_7_0) as u32
            | (self.reg(Page::TxLink, REG_AUX_ADDR_15_8) as u32) << 8
            | ((self.reg(Page::TxLink, REG_AUX_ADDR_19_16) & 0x0F) as u32) << 16;

        let status = self.service(cmd, addr, len, addr_only);
        self.put(Page::TxLink, REG_AUX_STATUS, status);
        let cur = self.reg(Page::TxLink, REG_AUX_CTRL2);
        self.put(Page::TxLink, REG_AUX_CTRL2, cur & !AUX_OP_EN);
    }

    fn service(&mut self, cmd: u8, addr: u32, len: usize, addr_only: bool) -> u8 {
        match cmd {
            CMD_NATIVE_READ => {
                for i in 0..len {
                    let a = addr + i as u32;
                    let v = self
                        .dpcd_read_overrides
                        .get(&a)
                        .or_else(|| self.dpcd.get(&a))
                        .copied()
                        .unwrap_or(0);
                    self.put(Page::TxLink, REG_AUX_BUF + i as u8, v);
                }
                self.put(Page::TxLink, REG_AUX_RX_COUNT, len as u8);
                0
            }
            CMD_NATIVE_WRITE => {
                for i in 0..len {
                    let v = self.reg(Page::TxLink, REG_AUX_BUF + i as u8);
                    self.dpcd.insert(addr + i as u32, v);
                    self.dpcd_writes.push((addr + i as u32, v));
                }
                0
            }
            CMD_I2C_WRITE => {
                let dev = addr as u8;
                if self.nack_i2c && (dev == DDC_EDID_ADDR || dev == DDC_SEGMENT_ADDR) {
                    return 0x01;
                }
                if addr_only {
                    return 0;
                }
                let payload = self.reg(Page::TxLink, REG_AUX_BUF);
                match dev {
                    DDC_SEGMENT_ADDR => self.segment = payload,
                    DDC_EDID_ADDR => self.edid_offset = payload,
                    _ => {}
                }
                0
            }
            CMD_I2C_READ => {
                if self.nack_i2c {
                    return 0x01;
                }
                let mut count = 0usize;
                if addr as u8 == DDC_EDID_ADDR {
                    self.edid_reads.push((self.segment, self.edid_offset));
                    let base = self.segment as usize * 256 + self.edid_offset as usize;
                    let avail = self.edid.len().saturating_sub(base).min(len);
                    for i in 0..avail {
                        let v = self.edid[base + i];
                        self.put(Page::TxLink, REG_AUX_BUF + i as u8, v);
                    }
                    count = avail;
                }
                self.put(Page::TxLink, REG_AUX_RX_COUNT, count as u8);
                0
            }
            _ => 0x0F,
        }
    }
}

/// Cloneable handle onto the device model.
#[derive(Clone, Default)]
pub struct TestBus(Rc<RefCell<BusInner>>);

impl TestBus {
    /// A model preset for a clean bring-up: cable present, PLL locked, a
    /// stable 74.25 MHz 24-bit RGB input, an HDCP-capable 2.7 G sink with one
    /// downstream device, 48 kHz audio and a one-extension EDID.
    pub fn with_healthy_sink() -> Self {
        let bus = Self::default();
        {
            let mut b = bus.0.borrow_mut();
            b.put(Page::TxSystem, 0x02, 0x10); // chip id 0x7810
            b.put(Page::TxSystem, 0x03, 0x78);
            b.put(Page::TxSystem, REG_SYS_STATUS, SYS_CABLE_DET);
            b.put(Page::TxSystem, 0x08, 0x03); // tx clock stable + stream valid
            b.put(Page::TxLink, REG_PLL_CTRL, PLL_LOCKED);
            b.put(Page::RxCore, 0x10, 0x03); // input clock + data enable
            let pclk = 742u16.to_le_bytes(); // 74.2 MHz in 100 kHz units
            b.put(Page::RxCore, 0x12, pclk[0]);
            b.put(Page::RxCore, 0x13, pclk[1]);
            b.put(Page::RxExt, REG_RX_AUDIO_FS, 0x02); // IEC 60958 code for 48 kHz

            b.dpcd.insert(0x000, 0x11); // DPCD 1.1
            b.dpcd.insert(0x001, 0x0A); // 2.7 Gbps
            b.dpcd.insert(0x002, 0x82); // enhanced framing, 2 lanes
            b.dpcd.insert(DPCD_DOWNSTREAMPORT_PRESENT, 0x01); // digital dongle
            b.dpcd.insert(DPCD_SINK_COUNT, 0x01);
            b.dpcd.insert(DPCD_LANE0_1_STATUS, 0x07);
            b.dpcd.insert(DPCD_HDCP_BCAPS, 0x01);

            b.edid = edid_image(7425, 1);
            b.auth_result = Some(true);
        }
        bus
    }

    pub fn reg(&self, page: Page, offset: u8) -> u8 {
        self.0.borrow().reg(page, offset)
    }

    pub fn set_reg(&self, page: Page, offset: u8, value: u8) {
        self.0.borrow_mut().put(page, offset, value);
    }

    pub fn set_cable_present(&self, present: bool) {
        let cur = self.reg(Page::TxSystem, REG_SYS_STATUS);
        let next = if present {
            cur | SYS_CABLE_DET
        } else {
            cur & !SYS_CABLE_DET
        };
        self.set_reg(Page::TxSystem, REG_SYS_STATUS, next);
    }

    pub fn dpcd_get(&self, addr: u32) -> u8 {
        *self.0.borrow().dpcd.get(&addr).unwrap_or(&0)
    }

    pub fn dpcd_set(&self, addr: u32, value: u8) {
        self.0.borrow_mut().dpcd.insert(addr, value);
    }

    /// Every native-AUX write the driver issued, in order.
    pub fn dpcd_writes(&self) -> Vec<(u32, u8)> {
        self.0.borrow().dpcd_writes.clone()
    }

    pub fn override_dpcd_read(&self, addr: u32, value: u8) {
        self.0.borrow_mut().dpcd_read_overrides.insert(addr, value);
    }

    pub fn clear_dpcd_read_override(&self, addr: u32) {
        self.0.borrow_mut().dpcd_read_overrides.remove(&addr);
    }

    pub fn set_edid(&self, image: Vec<u8>) {
        self.0.borrow_mut().edid = image;
    }

    pub fn set_edid_byte(&self, index: usize, value: u8) {
        self.0.borrow_mut().edid[index] = value;
    }

    pub fn edid_reads(&self) -> Vec<(u8, u8)> {
        self.0.borrow().edid_reads.clone()
    }

    pub fn clear_edid_reads(&self) {
        self.0.borrow_mut().edid_reads.clear();
    }

    pub fn set_nack_i2c(&self, nack: bool) {
        self.0.borrow_mut().nack_i2c = nack;
    }

    /// Makes every access to this register fail with a bus error.
    pub fn fail_at(&self, page: Page, offset: u8) {
        self.0.borrow_mut().fail.insert((page, offset));
    }

    pub fn set_auth_result(&self, result: Option<bool>) {
        self.0.borrow_mut().auth_result = result;
    }

    pub fn auth_attempts(&self) -> u32 {
        self.0.borrow().auth_attempts
    }

    pub fn delays_ms(&self) -> u64 {
        self.0.borrow().delays_ms
    }

    pub fn raise_link_irq(&self, bits: u16) {
        self.0
            .borrow_mut()
            .raise(Page::TxLink, REG_LINK_IRQ_L, REG_LINK_IRQ_H, bits);
    }

    pub fn raise_input_irq(&self, bits: u16) {
        self.0
            .borrow_mut()
            .raise(Page::RxCore, REG_INPUT_IRQ_L, REG_INPUT_IRQ_H, bits);
    }
}

impl RegisterBus for TestBus {
    fn read(&mut self, page: Page, offset: u8) -> Result<u8, dptx::BusError> {
        let inner = self.0.borrow();
        if inner.fail.contains(&(page, offset)) {
            return Err(dptx::BusError { page, offset });
        }
        Ok(inner.reg(page, offset))
    }

    fn write(&mut self, page: Page, offset: u8, value: u8) -> Result<(), dptx::BusError> {
        let mut inner = self.0.borrow_mut();
        if inner.fail.contains(&(page, offset)) {
            return Err(dptx::BusError { page, offset });
        }
        inner.write(page, offset, value);
        Ok(())
    }

    fn delay_ms(&mut self, ms: u32) {
        self.0.borrow_mut().delays_ms += ms as u64;
    }
}

/// Records power-line sequencing.
#[derive(Clone, Default)]
pub struct PowerLog(Rc<RefCell<(u32, u32)>>);

impl PowerLog {
    pub fn ons(&self) -> u32 {
        self.0.borrow().0
    }

    pub fn offs(&self) -> u32 {
        self.0.borrow().1
    }
}

impl PowerControl for PowerLog {
    fn power_on(&mut self) {
        self.0.borrow_mut().0 += 1;
    }

    fn power_off(&mut self) {
        self.0.borrow_mut().1 += 1;
    }
}

/// Records scheduler interactions for `Transmitter`-level tests.
#[derive(Clone, Default)]
pub struct SchedLog(Rc<RefCell<SchedInner>>);

#[derive(Default)]
struct SchedInner {
    scheduled: Vec<u32>,
    cancels: u32,
}

impl SchedLog {
    pub fn scheduled(&self) -> Vec<u32> {
        self.0.borrow().scheduled.clone()
    }

    pub fn cancels(&self) -> u32 {
        self.0.borrow().cancels
    }
}

impl TickScheduler for SchedLog {
    fn schedule_tick(&mut self, delay_ms: u32) {
        self.0.borrow_mut().scheduled.push(delay_ms);
    }

    fn cancel_and_flush(&mut self) {
        self.0.borrow_mut().cancels += 1;
    }
}

/// A session wired to the model, with helpers to drive it tick by tick.
pub struct Rig {
    pub bus: TestBus,
    pub power: PowerLog,
    pub session: Session,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            bus: TestBus::with_healthy_sink(),
            power: PowerLog::default(),
            session: Session::new(config),
        }
    }

    /// Runs one tick; panics on a bus error (the model never raises one).
    pub fn tick(&mut self) -> u32 {
        self.session.run_tick(&mut self.bus, &mut self.power).unwrap()
    }

    /// Ticks until the master state reaches `target`, feeding the audio
    /// stage the receive interrupts it gates on.
    pub fn run_until(&mut self, target: MasterState) {
        for _ in 0..64 {
            if self.session.master_state() == target {
                return;
            }
            if self.session.master_state() == MasterState::AudioOutput {
                self.bus.raise_input_irq(dptx::InputIrq::AUDIO_CTS.bits());
            }
            self.tick();
        }
        panic!(
            "never reached {target:?}, stuck at {:?} ({:?})",
            self.session.master_state(),
            self.session.sub_states()
        );
    }
}

/// A base EDID block whose first detailed timing descriptor carries
/// `pclk_10khz` and which declares `extensions` extension blocks.
pub fn base_block(pclk_10khz: u16, extensions: u8) -> [u8; 128] {
    let mut b = [0u8; 128];
    b[..8].copy_from_slice(&[0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00]);
    // Vendor/product identification (covered by the first anchor window).
    b[8] = 0x4C;
    b[9] = 0x2D;
    b[10] = 0x23;
    b[11] = 0x01;
    b[18] = 1; // EDID 1.3
    b[19] = 3;
    let pclk = pclk_10khz.to_le_bytes();
    b[54] = pclk[0];
    b[55] = pclk[1];
    b[56] = 0x80; // h-active low byte, arbitrary but nonzero
    // Bytes inside the second anchor window at 0x70.
    b[0x70] = 0x53;
    b[0x71] = 0x4D;
    b[126] = extensions;
    b[127] = correction_byte(&b);
    b
}

/// A CEA extension block with a valid checksum; `seed` varies the payload.
pub fn extension_block(seed: u8) -> [u8; 128] {
    let mut b = [0u8; 128];
    b[0] = 0x02;
    b[1] = 0x03;
    b[4] = seed;
    b[127] = correction_byte(&b);
    b
}

/// A full EDID image: base block plus `extensions` extension blocks.
pub fn edid_image(pclk_10khz: u16, extensions: usize) -> Vec<u8> {
    let mut image = Vec::with_capacity((1 + extensions) * 128);
    image.extend_from_slice(&base_block(pclk_10khz, extensions as u8));
    for i in 0..extensions {
        image.extend_from_slice(&extension_block(0x10 + i as u8));
    }
    image
}
