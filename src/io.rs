// Copyright (C) 2019  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! This module provides API to access memory-mapped FPGA registers of the S19 control board.
//!
//! It is split into two layers:
//!   * `RegisterWindow` is the only place where a word is actually read or written. The real
//!     implementation maps the FPGA device file, tests use an in-memory model.
//!   * `Core` knows the FPGA register layout and implements FPGA initialization, the command
//!     bus transport and raw access to the work and nonce FIFOs.
//!
//! Registers are addressed either directly by `PhysicalOffset` or through the indirect
//! `LogicalRegister` table. The two handles are distinct types so that one cannot be passed
//! where the other is expected.

pub mod mmap;
pub mod regmap;

#[cfg(test)]
pub mod test_utils;

use crate::error::{self, ErrorKind};
use crate::logging::macros::*;

use byteorder::{ByteOrder, LittleEndian};

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Size of the register window in bytes
pub const WINDOW_SIZE: usize = 5120;
/// Size of the register window in 32-bit words
pub const WINDOW_WORDS: usize = WINDOW_SIZE / 4;

/// Number of hash chain connectors handled by the FPGA
pub const MAX_CHAINS: usize = 3;

/// Command buffer is 3 words long
pub const COMMAND_BUFFER_BYTES: usize = 12;
/// Trigger bit of the command buffer, hardware clears it when the command has been sent out
pub const BC_COMMAND_BUFFER_READY: u32 = 1 << 31;

/// Valid bits of the nonce FIFO occupancy register
pub const NONCE_COUNT_MASK: u32 = 0x7fff;
/// Low word of a FIFO entry that carries a nonce
pub const NONCE_INDICATOR: u32 = 0x80;
/// Chain that found the nonce, low word of a FIFO entry
pub const NONCE_CHAIN_MASK: u32 = 0x0f;

/// Maximum time to wait for a command to be transmitted
const COMMAND_TX_TIMEOUT: Duration = Duration::from_millis(10);
/// Busy-wait quantum when waiting for the command buffer
const COMMAND_TX_POLL: Duration = Duration::from_micros(1);

/// Chain selector field of the command trigger
#[inline]
pub fn bc_chain_id(chain: usize) -> u32 {
    ((chain as u32) & 0xf) << 16
}

/// Offset of a 32-bit word within the register window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalOffset(usize);

impl PhysicalOffset {
    pub const HARDWARE_VERSION: Self = Self::from_byte_offset(0x000);
    pub const FAN_SPEED: Self = Self::from_byte_offset(0x004);
    pub const HASH_ON_PLUG: Self = Self::from_byte_offset(0x008);
    pub const BUFFER_SPACE: Self = Self::from_byte_offset(0x00c);
    pub const RETURN_NONCE: Self = Self::from_byte_offset(0x010);
    pub const RETURN_NONCE_HIGH: Self = Self::from_byte_offset(0x014);
    pub const NONCE_NUMBER_IN_FIFO: Self = Self::from_byte_offset(0x018);
    pub const NONCE_FIFO_INTERRUPT: Self = Self::from_byte_offset(0x01c);
    pub const IIC_COMMAND: Self = Self::from_byte_offset(0x030);
    pub const RESET_HASHBOARD_COMMAND: Self = Self::from_byte_offset(0x034);
    pub const CHAIN_CONFIG: Self = Self::from_byte_offset(0x03c);
    pub const TW_WRITE_COMMAND: Self = Self::from_byte_offset(0x040);
    pub const QN_WRITE_DATA_COMMAND: Self = Self::from_byte_offset(0x080);
    pub const FAN_CONTROL: Self = Self::from_byte_offset(0x084);
    pub const TIME_OUT_CONTROL: Self = Self::from_byte_offset(0x088);
    /// Work generator control, shares the word with the nonce timeout
    pub const WORK_GEN_CONTROL: Self = Self::from_byte_offset(0x08c);
    pub const BC_WRITE_COMMAND: Self = Self::from_byte_offset(0x0c0);
    pub const BC_COMMAND_BUFFER: [Self; 3] = [
        Self::from_byte_offset(0x0c4),
        Self::from_byte_offset(0x0c8),
        Self::from_byte_offset(0x0cc),
    ];
    pub const FPGA_CHIP_ID: Self = Self::from_byte_offset(0x0f0);
    pub const PIC_CONFIG: Self = Self::from_byte_offset(0x0f4);
    pub const CRC_ERROR_CNT: Self = Self::from_byte_offset(0x0f8);

    const fn from_byte_offset(byte_offset: usize) -> Self {
        Self(byte_offset / 4)
    }

    /// Build offset from word index, fails when the word lies outside of the window
    pub fn new(word: usize) -> error::Result<Self> {
        if word >= WINDOW_WORDS {
            Err(ErrorKind::Window(format!(
                "word offset {:#x} out of window ({} words)",
                word, WINDOW_WORDS
            )))?
        }
        Ok(Self(word))
    }

    #[inline]
    pub fn word(self) -> usize {
        self.0
    }

    #[inline]
    pub fn byte_offset(self) -> usize {
        self.0 * 4
    }
}

impl fmt::Display for PhysicalOffset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#05x}", self.byte_offset())
    }
}

/// Index into the indirect register map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalRegister(usize);

impl LogicalRegister {
    pub const CONTROL: Self = Self(0);
    /// First word of a work packet
    pub const TW_WRITE_FIRST: Self = Self(16);
    /// Remaining words of a work packet
    pub const TW_WRITE_REST: Self = Self(17);
    pub const INIT_SPECIAL: Self = Self(18);
    /// Nonce return timeout
    pub const TIMEOUT: Self = Self(20);
    pub const WORK_CTRL_ENABLE: Self = Self(35);
    pub const CHAIN_WORK_CONFIG: Self = Self(36);
    pub const WORK_QUEUE_PARAM: Self = Self(42);

    pub fn new(index: usize) -> error::Result<Self> {
        if index >= regmap::REGISTER_MAP_SIZE {
            Err(ErrorKind::Window(format!(
                "logical register {} out of map ({} entries)",
                index,
                regmap::REGISTER_MAP_SIZE
            )))?
        }
        Ok(Self(index))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0
    }

    /// Translate to physical offset
    #[inline]
    pub fn to_offset(self) -> PhysicalOffset {
        PhysicalOffset(regmap::logical_to_offset(self.0))
    }
}

/// Word-sized access to the FPGA register window
///
/// Implementations must not cache, merge or reorder accesses: every call is one access to
/// the hardware.
pub trait RegisterWindow: Send + Sync {
    fn read_word(&self, offset: PhysicalOffset) -> u32;
    fn write_word(&self, offset: PhysicalOffset, value: u32);
}

impl<T: RegisterWindow + ?Sized> RegisterWindow for Arc<T> {
    #[inline]
    fn read_word(&self, offset: PhysicalOffset) -> u32 {
        (**self).read_word(offset)
    }

    #[inline]
    fn write_word(&self, offset: PhysicalOffset, value: u32) {
        (**self).write_word(offset, value)
    }
}

/// Bitmask of hash chains reported by the FPGA as plugged in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainMask(u32);

impl ChainMask {
    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, chain: usize) -> bool {
        chain < MAX_CHAINS && self.0 & (1 << chain) != 0
    }

    /// Iterate indices of present chains
    pub fn iter(&self) -> impl Iterator<Item = usize> {
        let mask = *self;
        (0..MAX_CHAINS).filter(move |chain| mask.contains(*chain))
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }
}

/// Sequence of direct writes to the QN/timeout control registers performed at FPGA start-up
/// (register, value, settle time)
const STARTUP_PULSES: [(PhysicalOffset, u32, Duration); 6] = [
    (
        PhysicalOffset::QN_WRITE_DATA_COMMAND,
        0x0080_800f,
        Duration::from_millis(100),
    ),
    (
        PhysicalOffset::TIME_OUT_CONTROL,
        0x8000_01c1,
        Duration::from_millis(100),
    ),
    (
        PhysicalOffset::QN_WRITE_DATA_COMMAND,
        0x8080_800f,
        Duration::from_millis(50),
    ),
    (
        PhysicalOffset::TIME_OUT_CONTROL,
        0x0000_9c40,
        Duration::from_millis(50),
    ),
    (
        PhysicalOffset::QN_WRITE_DATA_COMMAND,
        0x0080_800f,
        Duration::from_millis(50),
    ),
    (
        PhysicalOffset::TIME_OUT_CONTROL,
        0x8001_ffff,
        Duration::from_millis(100),
    ),
];

/// Control register values of a running production image
const CONTROL_DEFAULTS: [(PhysicalOffset, u32); 14] = [
    (PhysicalOffset::FAN_SPEED, 0x0000_0500),
    (PhysicalOffset::HASH_ON_PLUG, 0x0000_0007),
    (PhysicalOffset::RETURN_NONCE, 0x0000_0004),
    (PhysicalOffset::RETURN_NONCE_HIGH, 0x5555_aaaa),
    (PhysicalOffset::NONCE_FIFO_INTERRUPT, 0x0000_0001),
    (PhysicalOffset::IIC_COMMAND, 0x8242_001f),
    (PhysicalOffset::RESET_HASHBOARD_COMMAND, 0x0000_fff8),
    (PhysicalOffset::CHAIN_CONFIG, 0x001a_1a1a),
    (PhysicalOffset::BC_WRITE_COMMAND, 0x0082_0000),
    (PhysicalOffset::BC_COMMAND_BUFFER[0], 0x5205_0000),
    (PhysicalOffset::BC_COMMAND_BUFFER[1], 0x0a00_0000),
    (PhysicalOffset::FPGA_CHIP_ID, 0x5710_4814),
    (PhysicalOffset::PIC_CONFIG, 0x8040_4404),
    (PhysicalOffset::CRC_ERROR_CNT, 0x0000_309d),
];

/// Value of the nonce timeout register before chain frequency is known (maximum timeout)
pub const DEFAULT_NONCE_TIMEOUT: u32 = 0x8000_0000 | 0x0001_ffff;

/// FPGA of the S19 control board
pub struct Core<W> {
    window: W,
    /// Chains that were sent work since their last bring-up, one bit per chain
    hashing: AtomicU32,
    /// Nonce entries popped while waiting for a command response
    nonce_backlog: Mutex<VecDeque<(u32, u32)>>,
}

/// Exclusive access to the shared response/nonce FIFO
///
/// Command responses and nonces arrive through the same FIFO. Every consumer holds this guard
/// for the whole transaction so that neither side pops the other's entries.
pub struct FifoGuard<'a, W> {
    core: &'a Core<W>,
    backlog: MutexGuard<'a, VecDeque<(u32, u32)>>,
}

impl<'a, W: RegisterWindow> FifoGuard<'a, W> {
    /// Entries waiting in the hardware FIFO
    #[inline]
    pub fn count(&self) -> u32 {
        self.core.nonce_count()
    }

    /// Nonce entries set aside by command reads
    #[inline]
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Pop one command response
    ///
    /// An entry carrying the nonce indicator and the number of a hashing chain is a nonce:
    /// both words are moved to the backlog and `None` is returned.
    pub fn pop_response(&mut self) -> Option<u32> {
        let low = self.core.read_response();
        let chain = (low & NONCE_CHAIN_MASK) as usize;
        if low & NONCE_INDICATOR != 0 && self.core.is_hashing(chain) {
            let high = self.core.read_direct(PhysicalOffset::RETURN_NONCE_HIGH);
            trace!("Nonce entry {:#010x}/{:#010x} set aside", low, high);
            self.backlog.push_back((low, high));
            return None;
        }
        Some(low)
    }

    /// Pop both words of the oldest nonce entry, backlog first
    pub fn pop_nonce(&mut self) -> (u32, u32) {
        match self.backlog.pop_front() {
            Some(words) => words,
            None => self.core.read_nonce_words(),
        }
    }
}

impl<W: RegisterWindow> Core<W> {
    pub fn new(window: W) -> Self {
        Self {
            window,
            hashing: AtomicU32::new(0),
            nonce_backlog: Mutex::new(VecDeque::new()),
        }
    }

    /// Take the FIFO for a command transaction or a nonce read
    pub fn lock_fifo(&self) -> FifoGuard<W> {
        FifoGuard {
            core: self,
            // the queue stays consistent after a panic of a holder
            backlog: self
                .nonce_backlog
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    #[inline]
    pub fn read_direct(&self, offset: PhysicalOffset) -> u32 {
        self.window.read_word(offset)
    }

    /// Write register directly, subsequent reads observe the write
    #[inline]
    pub fn write_direct(&self, offset: PhysicalOffset, value: u32) {
        self.window.write_word(offset, value);
        fence(Ordering::SeqCst);
    }

    #[inline]
    pub fn read_indirect(&self, register: LogicalRegister) -> u32 {
        self.read_direct(register.to_offset())
    }

    #[inline]
    pub fn write_indirect(&self, register: LogicalRegister, value: u32) {
        self.write_direct(register.to_offset(), value)
    }

    /// Bring FPGA into state in which it accepts commands and work for hash chains
    ///
    /// Returns chains that are plugged in.
    pub fn init(&self) -> ChainMask {
        info!("Initializing FPGA (hardware version {:#010x})", self.hardware_version());

        // must precede setting control bit 30
        self.write_indirect(LogicalRegister::INIT_SPECIAL, 0x8080_8000);
        thread::sleep(Duration::from_millis(10));

        let control = self.read_indirect(LogicalRegister::CONTROL);
        self.write_indirect(LogicalRegister::CONTROL, control | 0x4000_0000);

        // reconfigured once chain frequency is known
        self.set_nonce_timeout(DEFAULT_NONCE_TIMEOUT);

        let work_ctrl = self.read_indirect(LogicalRegister::WORK_CTRL_ENABLE);
        self.write_indirect(
            LogicalRegister::WORK_CTRL_ENABLE,
            (work_ctrl & 0xffff_709f) | 0x8060,
        );
        // 114 chips << 8
        self.write_indirect(LogicalRegister::CHAIN_WORK_CONFIG, 0x0000_7200);
        self.write_indirect(LogicalRegister::WORK_QUEUE_PARAM, 0x0000_3648);
        trace!(
            "FPGA work control {:#010x}, chain work config {:#010x}, work queue param {:#010x}",
            self.read_indirect(LogicalRegister::WORK_CTRL_ENABLE),
            self.read_indirect(LogicalRegister::CHAIN_WORK_CONFIG),
            self.read_indirect(LogicalRegister::WORK_QUEUE_PARAM)
        );

        // these registers are not reachable through the indirect map
        for (offset, value, settle) in STARTUP_PULSES.iter() {
            self.write_direct(*offset, *value);
            thread::sleep(*settle);
        }
        for (offset, value) in CONTROL_DEFAULTS.iter() {
            self.write_direct(*offset, *value);
        }
        thread::sleep(Duration::from_millis(50));

        let chains = self.detect_chains();
        info!(
            "FPGA initialized, detected {} chain(s): {:#05b}",
            chains.count(),
            chains.bits()
        );
        chains
    }

    #[inline]
    pub fn hardware_version(&self) -> u32 {
        self.read_direct(PhysicalOffset::HARDWARE_VERSION)
    }

    #[inline]
    pub fn fpga_chip_id(&self) -> u32 {
        self.read_direct(PhysicalOffset::FPGA_CHIP_ID)
    }

    pub fn detect_chains(&self) -> ChainMask {
        ChainMask::new(self.read_direct(PhysicalOffset::HASH_ON_PLUG))
    }

    /// Number of command frames received with CRC errors
    #[inline]
    pub fn crc_error_count(&self) -> u32 {
        self.read_direct(PhysicalOffset::CRC_ERROR_CNT)
    }

    /// Free space in the work FIFO
    #[inline]
    pub fn work_fifo_space(&self) -> u32 {
        self.read_direct(PhysicalOffset::BUFFER_SPACE)
    }

    /// Turn off the built-in pattern generator so that the FPGA accepts external work
    pub fn enable_work_send(&self) {
        let value = self.read_indirect(LogicalRegister::WORK_CTRL_ENABLE);
        self.write_indirect(LogicalRegister::WORK_CTRL_ENABLE, value & 0xffff_bfff);
        trace!(
            "Work control {:#010x} -> {:#010x}",
            value,
            self.read_indirect(LogicalRegister::WORK_CTRL_ENABLE)
        );
    }

    pub fn start_work_gen(&self) {
        let value = self.read_direct(PhysicalOffset::WORK_GEN_CONTROL);
        self.write_direct(PhysicalOffset::WORK_GEN_CONTROL, value | 0x40);
    }

    #[inline]
    pub fn set_nonce_timeout(&self, value: u32) {
        self.write_indirect(LogicalRegister::TIMEOUT, value);
    }

    /// Number of entries waiting in the nonce (and command response) FIFO
    #[inline]
    pub fn nonce_count(&self) -> u32 {
        self.read_direct(PhysicalOffset::NONCE_NUMBER_IN_FIFO) & NONCE_COUNT_MASK
    }

    /// Pop one word of command response
    #[inline]
    pub fn read_response(&self) -> u32 {
        self.read_direct(PhysicalOffset::RETURN_NONCE)
    }

    /// Read both words of a nonce FIFO entry (low word first)
    pub fn read_nonce_words(&self) -> (u32, u32) {
        let low = self.read_direct(PhysicalOffset::RETURN_NONCE);
        let high = self.read_direct(PhysicalOffset::RETURN_NONCE_HIGH);
        (low, high)
    }

    /// Write one word into the work FIFO port
    #[inline]
    pub fn write_work_word(&self, register: LogicalRegister, value: u32) {
        self.write_indirect(register, value)
    }

    /// Mark whether `chain` may return nonces
    pub fn set_hashing(&self, chain: usize, hashing: bool) {
        let bit = 1u32 << (chain as u32 & NONCE_CHAIN_MASK);
        if hashing {
            self.hashing.fetch_or(bit, Ordering::AcqRel);
        } else {
            self.hashing.fetch_and(!bit, Ordering::AcqRel);
        }
    }

    pub fn is_hashing(&self, chain: usize) -> bool {
        chain < 32 && self.hashing.load(Ordering::Acquire) & (1u32 << chain) != 0
    }

    /// Transmit raw command bytes to chips on `chain`
    ///
    /// Waits until the FPGA reports the command has been sent out.
    pub fn send_command(&self, chain: usize, cmd: &[u8]) -> error::Result<()> {
        if chain >= MAX_CHAINS {
            Err(ErrorKind::Chain(chain, "no such chain".to_string()))?
        }
        if cmd.is_empty() || cmd.len() > COMMAND_BUFFER_BYTES {
            Err(ErrorKind::General(format!(
                "invalid command length {} (maximum is {} bytes)",
                cmd.len(),
                COMMAND_BUFFER_BYTES
            )))?
        }

        for (offset, chunk) in PhysicalOffset::BC_COMMAND_BUFFER
            .iter()
            .zip(cmd.chunks(4))
        {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.write_direct(*offset, LittleEndian::read_u32(&word));
        }
        self.write_direct(
            PhysicalOffset::BC_WRITE_COMMAND,
            BC_COMMAND_BUFFER_READY | bc_chain_id(chain),
        );

        let deadline = Instant::now() + COMMAND_TX_TIMEOUT;
        while self.read_direct(PhysicalOffset::BC_WRITE_COMMAND) & BC_COMMAND_BUFFER_READY != 0 {
            if Instant::now() >= deadline {
                Err(ErrorKind::BusTimeout(format!(
                    "command {:02x?} not sent out on chain {} within {:?}",
                    cmd, chain, COMMAND_TX_TIMEOUT
                )))?
            }
            thread::sleep(COMMAND_TX_POLL);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::test_utils::FakeWindow;
    use super::*;

    #[test]
    fn test_physical_offset_bounds() {
        assert_eq!(PhysicalOffset::BC_WRITE_COMMAND.word(), 0x30);
        assert_eq!(PhysicalOffset::BC_COMMAND_BUFFER[2].byte_offset(), 0xcc);
        assert!(PhysicalOffset::new(WINDOW_WORDS - 1).is_ok());
        assert!(PhysicalOffset::new(WINDOW_WORDS).is_err());
    }

    #[test]
    fn test_logical_register_bounds() {
        assert_eq!(
            LogicalRegister::new(20).expect("valid index").to_offset(),
            PhysicalOffset::WORK_GEN_CONTROL
        );
        assert_eq!(
            LogicalRegister::TW_WRITE_FIRST.to_offset(),
            LogicalRegister::TW_WRITE_REST.to_offset()
        );
        assert!(LogicalRegister::new(regmap::REGISTER_MAP_SIZE).is_err());
    }

    #[test]
    fn test_chain_mask() {
        let mask = ChainMask::new(0b1111_0101);
        assert!(mask.contains(0));
        assert!(!mask.contains(1));
        assert!(mask.contains(2));
        assert!(!mask.contains(3));
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0, 2]);
    }

    /// Command bytes are packed little-endian into the buffer words
    #[test]
    fn test_send_command_packing() {
        let window = Arc::new(FakeWindow::new());
        let core = Core::new(window.clone());
        core.send_command(2, &[0x53, 0x05, 0x00, 0x00, 0x03])
            .expect("command not sent");
        assert_eq!(
            window.peek(PhysicalOffset::BC_COMMAND_BUFFER[0]),
            0x0000_0553
        );
        assert_eq!(window.peek(PhysicalOffset::BC_COMMAND_BUFFER[1]), 0x03);
        assert_eq!(
            window.peek(PhysicalOffset::BC_WRITE_COMMAND),
            bc_chain_id(2)
        );
        assert_eq!(
            window.sent_commands(),
            vec![(2, vec![0x53, 0x05, 0x00, 0x00, 0x03])]
        );
    }

    #[test]
    fn test_send_command_rejects_bad_input() {
        let core = Core::new(FakeWindow::new());
        assert!(core.send_command(0, &[]).is_err());
        assert!(core.send_command(0, &[0u8; 13]).is_err());
        match core.send_command(3, &[0x53]) {
            Err(e) => assert_eq!(e.kind(), ErrorKind::Chain(3, "no such chain".to_string())),
            Ok(_) => panic!("command sent to nonexistent chain"),
        }
    }

    #[test]
    fn test_send_command_timeout() {
        let window = FakeWindow::new();
        window.set_bus_stuck(true);
        let core = Core::new(window);
        match core.send_command(0, &[0x53, 0x05, 0x00, 0x00, 0x03]) {
            Err(e) => match e.kind() {
                ErrorKind::BusTimeout(_) => (),
                kind => panic!("unexpected error {:?}", kind),
            },
            Ok(_) => panic!("stuck bus did not time out"),
        }
    }

    #[test]
    fn test_fpga_init() {
        let window = Arc::new(FakeWindow::new());
        window.poke(LogicalRegister::WORK_CTRL_ENABLE.to_offset(), 0xffff_ffff);
        let core = Core::new(window.clone());
        let chains = core.init();

        // plug detection is read-only, the control defaults do not override it
        assert_eq!(chains.bits(), 0x1);
        assert_eq!(core.read_indirect(LogicalRegister::CONTROL) & 0x4000_0000, 0x4000_0000);
        assert_eq!(
            core.read_indirect(LogicalRegister::WORK_CTRL_ENABLE),
            0xffff_f0ff
        );
        assert_eq!(core.read_indirect(LogicalRegister::TIMEOUT), DEFAULT_NONCE_TIMEOUT);
        assert_eq!(
            window.peek(PhysicalOffset::TIME_OUT_CONTROL),
            0x8001_ffff
        );

        core.enable_work_send();
        assert_eq!(
            core.read_indirect(LogicalRegister::WORK_CTRL_ENABLE),
            0xffff_b0ff
        );
        core.start_work_gen();
        assert_eq!(
            core.read_direct(PhysicalOffset::WORK_GEN_CONTROL),
            DEFAULT_NONCE_TIMEOUT | 0x40
        );
    }
}
