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

//! This module implements API (`Interface`) for sending and receiving commands to
//! chips.
//!
//! There's also implementation (`InnerContext`) of that interface that sends commands through
//! the FPGA command buffer and collects responses from the shared response/nonce FIFO
//! (+ shared version `Context`).

use crate::logging::macros::*;

use crate::bm1398::{self, ChipAddress, Frame};
use crate::error::{self, ErrorKind};
use crate::io;

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Default time budget of a register read
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Interval between polls of the response FIFO occupancy
const RESPONSE_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Extraction of register value from a response word
///
/// Layout of the response word has never been verified against hardware documentation.
/// The default treats the whole word as the register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFormat {
    pub shift: u32,
    pub mask: u32,
}

impl ResponseFormat {
    pub fn new(shift: u32, mask: u32) -> error::Result<Self> {
        if shift >= 32 {
            Err(ErrorKind::Config(format!(
                "response shift {} out of range 0..32",
                shift
            )))?
        }
        Ok(Self { shift, mask })
    }

    #[inline]
    pub fn value(&self, response: u32) -> u32 {
        (response >> self.shift) & self.mask
    }
}

impl Default for ResponseFormat {
    fn default() -> Self {
        Self {
            shift: 0,
            mask: 0xffff_ffff,
        }
    }
}

/// Interface definition for command-stack API - reading and writing of registers
///
/// Every operation names the chain it talks to. Some functions have blanket implementation
/// for ease of use.
pub trait Interface: Send + Sync {
    /// Transmit already encoded frame
    fn send_raw_command(&self, chain: usize, frame: &Frame) -> error::Result<()>;

    /// Write register of one chip or all chips (`ChipAddress::All`)
    fn write_raw(
        &self,
        chain: usize,
        chip_address: ChipAddress,
        register: u8,
        value: u32,
    ) -> error::Result<()>;

    /// Read register and return the first response received within `timeout`
    fn read_raw(
        &self,
        chain: usize,
        chip_address: ChipAddress,
        register: u8,
        timeout: Duration,
    ) -> error::Result<u32>;

    /// Broadcast read of register collecting responses until none arrives for `timeout`
    ///
    /// Silence is not an error, the result is empty then.
    fn read_all_raw(&self, chain: usize, register: u8, timeout: Duration)
        -> error::Result<Vec<u32>>;

    /// Timeout used by typed reads
    fn read_timeout(&self) -> Duration {
        DEFAULT_READ_TIMEOUT
    }

    /// Write register(s)
    ///
    /// * `chip_address` can address one or more chips
    fn write_register<T: bm1398::Register>(
        &self,
        chain: usize,
        chip_address: ChipAddress,
        value: &T,
    ) -> error::Result<()> {
        self.write_raw(chain, chip_address, T::REG_NUM, value.to_reg())
    }

    /// Read register(s) and collect replies
    ///
    /// Broadcast collects one reply per responding chip, unicast exactly one reply.
    fn read_register<T: bm1398::Register>(
        &self,
        chain: usize,
        chip_address: ChipAddress,
    ) -> error::Result<Vec<T>> {
        let responses = match chip_address {
            ChipAddress::All => self.read_all_raw(chain, T::REG_NUM, self.read_timeout())?,
            ChipAddress::One(_) => vec![self.read_raw(
                chain,
                chip_address,
                T::REG_NUM,
                self.read_timeout(),
            )?],
        };
        responses.into_iter().map(T::from_reg).collect()
    }

    /// Read exactly one register and return reply
    ///
    /// * `chip_address` can be only unicast
    fn read_one_register<T: bm1398::Register>(
        &self,
        chain: usize,
        chip_address: ChipAddress,
    ) -> error::Result<T> {
        assert!(!chip_address.is_broadcast());
        let value = self.read_raw(chain, chip_address, T::REG_NUM, self.read_timeout())?;
        T::from_reg(value)
    }

    /// Read `register` of chip 0, clear `clear_mask`, set `set_mask` and broadcast the result
    ///
    /// Chips are assumed to hold identical values. Returns the value written.
    fn read_modify_write(
        &self,
        chain: usize,
        register: u8,
        clear_mask: u32,
        set_mask: u32,
    ) -> error::Result<u32> {
        let old = self.read_raw(
            chain,
            ChipAddress::One(0),
            register,
            self.read_timeout(),
        )?;
        let new = (old & !clear_mask) | set_mask;
        trace!(
            "Chain {}: register {:#04x} {:#010x} -> {:#010x}",
            chain,
            register,
            old,
            new
        );
        self.write_raw(chain, ChipAddress::All, register, new)?;
        Ok(new)
    }

    /// Write register(s) and read it/them back to verify they were written correctly
    /// Same as `write_register`, but followed by `read_register` on the same register.
    fn write_register_readback<T: bm1398::Register>(
        &self,
        chain: usize,
        chip_address: ChipAddress,
        value: &T,
    ) -> error::Result<()> {
        self.write_register(chain, chip_address, value)?;

        let responses = self.read_register::<T>(chain, chip_address)?;
        if responses.is_empty() {
            Err(ErrorKind::Chain(
                chain,
                format!("no readback of register {:#04x}", T::REG_NUM),
            ))?
        }
        for (i, read_back_value) in responses.iter().enumerate() {
            if *read_back_value != *value {
                Err(ErrorKind::Chain(
                    chain,
                    format!(
                        "response {} returned wrong value of register {:#04x}: {:#x?} instead of {:#x?}",
                        i,
                        T::REG_NUM,
                        *read_back_value,
                        value
                    ),
                ))?
            }
        }
        Ok(())
    }
}

/// `InnerContext` holds the FPGA core and implements on top of it functions to issue commands
/// to chip registers (via `send_raw_command`) or to read/write chip registers.
///
/// No locking for sharing is provided.
pub struct InnerContext<W> {
    core: Arc<io::Core<W>>,
    response_format: ResponseFormat,
    read_timeout: Duration,
}

impl<W: io::RegisterWindow> InnerContext<W> {
    pub fn new(core: Arc<io::Core<W>>) -> Self {
        Self {
            core,
            response_format: ResponseFormat::default(),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    fn send_raw_command(&mut self, chain: usize, frame: &Frame) -> error::Result<()> {
        trace!("Chain {}: sending {:?}", chain, frame);
        self.core.send_command(chain, frame.as_bytes())
    }

    /// Wait for the next command response
    ///
    /// Nonce entries found on the way are left to the nonce receiver.
    fn wait_response(fifo: &mut io::FifoGuard<W>, timeout: Duration) -> Option<u32> {
        let deadline = Instant::now() + timeout;
        loop {
            while fifo.count() > 0 {
                if let Some(response) = fifo.pop_response() {
                    return Some(response);
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(RESPONSE_POLL_INTERVAL);
        }
    }

    fn read_raw(
        &mut self,
        chain: usize,
        chip_address: ChipAddress,
        register: u8,
        timeout: Duration,
    ) -> error::Result<u32> {
        let core = self.core.clone();
        let mut fifo = core.lock_fifo();
        let frame = bm1398::encode_read_register(chip_address, register);
        self.send_raw_command(chain, &frame)?;

        let response = match Self::wait_response(&mut fifo, timeout) {
            Some(response) => response,
            None => Err(ErrorKind::BusTimeout(format!(
                "no response to read of register {:#04x} from {:?} on chain {} within {:?}",
                register, chip_address, chain, timeout
            )))?,
        };
        trace!(
            "Chain {}: register {:#04x} response {:#010x}",
            chain,
            register,
            response
        );
        Ok(self.response_format.value(response))
    }

    fn read_all_raw(
        &mut self,
        chain: usize,
        register: u8,
        timeout: Duration,
    ) -> error::Result<Vec<u32>> {
        let core = self.core.clone();
        let mut fifo = core.lock_fifo();
        let frame = bm1398::encode_read_register(ChipAddress::All, register);
        self.send_raw_command(chain, &frame)?;

        let mut responses = Vec::new();
        while let Some(response) = Self::wait_response(&mut fifo, timeout) {
            responses.push(self.response_format.value(response));
        }
        debug!(
            "Chain {}: broadcast read of register {:#04x} collected {} response(s)",
            chain,
            register,
            responses.len()
        );
        Ok(responses)
    }

    fn write_raw(
        &mut self,
        chain: usize,
        chip_address: ChipAddress,
        register: u8,
        value: u32,
    ) -> error::Result<()> {
        let frame = bm1398::encode_write_register(chip_address, register, value);
        self.send_raw_command(chain, &frame)
    }

    fn set_response_format(&mut self, response_format: ResponseFormat) {
        self.response_format = response_format;
    }

    fn set_read_timeout(&mut self, read_timeout: Duration) {
        self.read_timeout = read_timeout;
    }
}

/// Locking wrapper on InnerContext. Implements Interface.
///
/// The command buffer is shared by all chains, clones of one context serialise its use.
pub struct Context<W> {
    inner: Arc<Mutex<InnerContext<W>>>,
}

impl<W> Clone for Context<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<W: io::RegisterWindow> Context<W> {
    pub fn new(core: Arc<io::Core<W>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(InnerContext::new(core))),
        }
    }

    fn lock(&self) -> error::Result<MutexGuard<InnerContext<W>>> {
        Ok(self
            .inner
            .lock()
            .map_err(|_| ErrorKind::General("command context lock poisoned".to_string()))?)
    }

    pub fn set_response_format(&self, response_format: ResponseFormat) -> error::Result<()> {
        self.lock()?.set_response_format(response_format);
        Ok(())
    }

    pub fn set_read_timeout(&self, read_timeout: Duration) -> error::Result<()> {
        self.lock()?.set_read_timeout(read_timeout);
        Ok(())
    }
}

impl<W: io::RegisterWindow> Interface for Context<W> {
    fn send_raw_command(&self, chain: usize, frame: &Frame) -> error::Result<()> {
        self.lock()?.send_raw_command(chain, frame)
    }

    fn write_raw(
        &self,
        chain: usize,
        chip_address: ChipAddress,
        register: u8,
        value: u32,
    ) -> error::Result<()> {
        self.lock()?.write_raw(chain, chip_address, register, value)
    }

    fn read_raw(
        &self,
        chain: usize,
        chip_address: ChipAddress,
        register: u8,
        timeout: Duration,
    ) -> error::Result<u32> {
        self.lock()?.read_raw(chain, chip_address, register, timeout)
    }

    fn read_all_raw(
        &self,
        chain: usize,
        register: u8,
        timeout: Duration,
    ) -> error::Result<Vec<u32>> {
        self.lock()?.read_all_raw(chain, register, timeout)
    }

    fn read_timeout(&self) -> Duration {
        match self.inner.lock() {
            Ok(inner) => inner.read_timeout,
            Err(_) => DEFAULT_READ_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bm1398::{Register, TicketMaskReg};
    use crate::io::test_utils::FakeWindow;

    const SHORT: Duration = Duration::from_millis(2);

    fn context(window: &Arc<FakeWindow>) -> Context<Arc<FakeWindow>> {
        let context = Context::new(Arc::new(io::Core::new(window.clone())));
        context
            .set_read_timeout(SHORT)
            .expect("cannot set read timeout");
        context
    }

    #[test]
    fn test_response_format() {
        let raw = ResponseFormat::default();
        assert_eq!(raw.value(0x1398_0040), 0x1398_0040);
        let shifted = ResponseFormat::new(8, 0xff).expect("valid format");
        assert_eq!(shifted.value(0x1398_0040), 0x00);
        assert_eq!(shifted.value(0x1398_4000), 0x40);
        assert!(ResponseFormat::new(32, 0xff).is_err());
    }

    #[test]
    fn test_write_register_frame() {
        let window = Arc::new(FakeWindow::new());
        let context = context(&window);
        context
            .write_register(1, ChipAddress::All, &TicketMaskReg::new(TicketMaskReg::ALL_CORES))
            .expect("write failed");
        assert_eq!(
            window.sent_commands(),
            vec![(
                1,
                vec![0x51, 0x09, 0x00, 0x14, 0xff, 0xff, 0xff, 0xff, 0x19]
            )]
        );
        assert_eq!(
            window.chip_register(1, bm1398::TICKET_MASK_REG),
            Some(0xffff_ffff)
        );
    }

    #[test]
    fn test_read_echo() {
        let window = Arc::new(FakeWindow::new());
        let context = context(&window);
        let mask = TicketMaskReg::new(TicketMaskReg::MINING);
        context
            .write_register_readback(0, ChipAddress::All, &mask)
            .expect("readback failed");
        let value: TicketMaskReg = context
            .read_one_register(0, ChipAddress::One(0))
            .expect("read failed");
        assert_eq!(value.to_reg(), TicketMaskReg::MINING);
    }

    #[test]
    fn test_broadcast_read_counts_chips() {
        let window = Arc::new(FakeWindow::with_chips(0b001, 7));
        let context = context(&window);
        let responses = context
            .read_register::<bm1398::GetAddressReg>(0, ChipAddress::All)
            .expect("read failed");
        assert_eq!(responses.len(), 7);
        for response in responses {
            assert_eq!(response.chip_id, bm1398::BM1398_CHIP_ID);
        }
    }

    #[test]
    fn test_read_timeout() {
        let window = Arc::new(FakeWindow::new());
        window.set_silent(true);
        let context = context(&window);
        match context.read_raw(0, ChipAddress::One(0), bm1398::TICKET_MASK_REG, SHORT) {
            Err(e) => match e.kind() {
                ErrorKind::BusTimeout(_) => (),
                kind => panic!("unexpected error {:?}", kind),
            },
            Ok(value) => panic!("silent chip returned {:#x}", value),
        }
        assert_eq!(
            context
                .read_all_raw(0, bm1398::TICKET_MASK_REG, SHORT)
                .expect("broadcast read failed"),
            Vec::<u32>::new()
        );
    }

    #[test]
    fn test_read_modify_write() {
        let window = Arc::new(FakeWindow::new());
        let context = context(&window);
        context
            .write_raw(0, ChipAddress::All, bm1398::PLL3_REG, 0x1234_5678)
            .expect("write failed");
        let written = context
            .read_modify_write(0, bm1398::PLL3_REG, 0x0000_ffff, 0x0000_0111)
            .expect("read-modify-write failed");
        assert_eq!(written, 0x1234_0111);
        assert_eq!(
            window.register_writes(0, bm1398::PLL3_REG),
            vec![0x1234_5678, 0x1234_0111]
        );
    }

    #[test]
    fn test_read_skips_nonce_entries() {
        let window = Arc::new(FakeWindow::new());
        let core = Arc::new(io::Core::new(window.clone()));
        let context = Context::new(core.clone());
        context
            .set_read_timeout(SHORT)
            .expect("cannot set read timeout");
        let nonce_rx = crate::nonce::NonceRx::new(core.clone());

        // the indicator bit is plain register data while no chain is hashing
        context
            .write_raw(0, ChipAddress::All, bm1398::TICKET_MASK_REG, 0xff)
            .expect("write failed");
        let value = context
            .read_raw(0, ChipAddress::One(0), bm1398::TICKET_MASK_REG, SHORT)
            .expect("read failed");
        assert_eq!(value, 0xff);

        core.set_hashing(0, true);
        core.set_hashing(1, true);
        window.push_nonce(0x1234_5680, 0x002a_0000);
        window.push_nonce(0x0bad_c081, 0x0007_0000);
        context
            .write_raw(0, ChipAddress::All, bm1398::PLL3_REG, 0x4054_0100)
            .expect("write failed");
        let value = context
            .read_raw(0, ChipAddress::One(0), bm1398::PLL3_REG, SHORT)
            .expect("read failed");
        assert_eq!(value, 0x4054_0100);

        let nonces = nonce_rx.drain(8).expect("drain failed");
        let words: Vec<(u32, u16)> = nonces.iter().map(|n| (n.nonce, n.work_id)).collect();
        assert_eq!(words, vec![(0x1234_5680, 0x2a), (0x0bad_c081, 0x07)]);
        assert_eq!(nonce_rx.poll_count(), 0);
    }

    #[test]
    fn test_readback_mismatch() {
        let window = Arc::new(FakeWindow::new());
        let context = context(&window);
        window.push_response(0xdead_beef);
        let result = context.write_register_readback(
            0,
            ChipAddress::One(0),
            &TicketMaskReg::new(TicketMaskReg::MINING),
        );
        assert!(result.is_err());
    }
}
