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

//! In-memory model of the FPGA register window and the chips behind it
//!
//! The model is deliberately small: the command buffer is "sent" as soon as it is triggered,
//! every chip on a chain holds the same register values and the nonce FIFO returns a single
//! scripted nonce after a configurable number of polls.

use super::{PhysicalOffset, RegisterWindow, BC_COMMAND_BUFFER_READY, WINDOW_WORDS};

use crate::bm1398;
use crate::work::WORK_PACKET_WORDS;

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Nonce waiting to be released into the FIFO
#[derive(Debug, Clone)]
struct ScriptedNonce {
    low: u32,
    high: u32,
    after_polls: usize,
    polls: usize,
    armed: bool,
    low_read: bool,
}

struct State {
    words: Vec<u32>,
    plugged: u32,
    chip_count: usize,
    /// Last value written per (chain, register)
    chip_regs: HashMap<(usize, u8), u32>,
    /// Addresses handed out by `SetAddress` per chain
    addresses: HashMap<usize, Vec<u8>>,
    /// Pending FIFO entries (low and high word) ahead of the scripted nonce
    responses: VecDeque<(u32, u32)>,
    /// High word of the entry whose low word was read last
    high_word: u32,
    nonce: Option<ScriptedNonce>,
    commands: Vec<(usize, Vec<u8>)>,
    work_words: Vec<u32>,
    bus_stuck: bool,
    stall_register: Option<u8>,
    silent: bool,
}

impl State {
    fn transmit(&mut self, trigger: u32) {
        let chain = ((trigger >> 16) & 0xf) as usize;
        let mut bytes = Vec::with_capacity(12);
        for offset in PhysicalOffset::BC_COMMAND_BUFFER.iter() {
            bytes.extend_from_slice(&self.words[offset.word()].to_le_bytes());
        }
        let length = (bytes[1] as usize).min(bytes.len());
        bytes.truncate(length);
        self.commands.push((chain, bytes.clone()));

        let code = bytes[0] & 0x0f;
        let broadcast = bytes[0] & 0x10 != 0;
        let stalled = match code {
            0x1 if bytes.len() >= 8 => {
                let register = bytes[3];
                let value = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
                self.chip_regs.insert((chain, register), value);
                self.stall_register == Some(register)
            }
            0x2 if bytes.len() >= 4 => {
                self.read_register(chain, broadcast, bytes[3]);
                false
            }
            0x0 if bytes.len() >= 3 => {
                self.addresses.entry(chain).or_default().push(bytes[2]);
                false
            }
            _ => false,
        };

        let word = PhysicalOffset::BC_WRITE_COMMAND.word();
        self.words[word] = if self.bus_stuck || stalled {
            trigger
        } else {
            trigger & !BC_COMMAND_BUFFER_READY
        };
    }

    fn read_register(&mut self, chain: usize, broadcast: bool, register: u8) {
        if self.silent {
            return;
        }
        if register == bm1398::CHIP_ADDRESS_REG {
            let addresses = self.addresses.get(&chain).cloned().unwrap_or_default();
            let responders = if broadcast { self.chip_count } else { 1 };
            for i in 0..responders {
                let addr = addresses.get(i).cloned().unwrap_or(0);
                self.responses
                    .push_back((((bm1398::BM1398_CHIP_ID as u32) << 16) | addr as u32, 0));
            }
        } else {
            let value = self.chip_regs.get(&(chain, register)).cloned().unwrap_or(0);
            let responders = if broadcast { self.chip_count } else { 1 };
            for _ in 0..responders {
                self.responses.push_back((value, 0));
            }
        }
    }

    fn push_work_word(&mut self, value: u32) {
        self.work_words.push(value);
        if self.work_words.len() % WORK_PACKET_WORDS == 0 {
            if let Some(nonce) = self.nonce.as_mut() {
                nonce.armed = true;
            }
        }
    }

    fn nonce_ready(&self) -> bool {
        match &self.nonce {
            Some(nonce) => nonce.armed && nonce.polls >= nonce.after_polls,
            None => false,
        }
    }

    fn nonce_count(&mut self) -> u32 {
        if !self.responses.is_empty() {
            return self.responses.len() as u32;
        }
        if let Some(nonce) = self.nonce.as_mut() {
            if nonce.armed && nonce.polls < nonce.after_polls {
                nonce.polls += 1;
                return 0;
            }
        }
        if self.nonce_ready() {
            1
        } else {
            0
        }
    }
}

pub struct FakeWindow {
    state: Mutex<State>,
}

impl FakeWindow {
    /// One chain (0) with 4 chips plugged in
    pub fn new() -> Self {
        Self::with_chips(0b001, 4)
    }

    pub fn with_chips(plugged: u32, chip_count: usize) -> Self {
        let mut words = vec![0; WINDOW_WORDS];
        words[PhysicalOffset::BUFFER_SPACE.word()] = 0x40;
        Self {
            state: Mutex::new(State {
                words,
                plugged,
                chip_count,
                chip_regs: HashMap::new(),
                addresses: HashMap::new(),
                responses: VecDeque::new(),
                high_word: 0,
                nonce: None,
                commands: Vec::new(),
                work_words: Vec::new(),
                bus_stuck: false,
                stall_register: None,
                silent: false,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<State> {
        self.state.lock().expect("fake window lock poisoned")
    }

    /// Read backing storage without side effects
    pub fn peek(&self, offset: PhysicalOffset) -> u32 {
        self.state().words[offset.word()]
    }

    /// Set backing storage without side effects
    pub fn poke(&self, offset: PhysicalOffset, value: u32) {
        self.state().words[offset.word()] = value;
    }

    /// Never clear the command trigger
    pub fn set_bus_stuck(&self, stuck: bool) {
        self.state().bus_stuck = stuck;
    }

    /// Keep the command trigger set after any write to chip register `register`
    pub fn stall_on_register(&self, register: u8) {
        self.state().stall_register = Some(register);
    }

    /// Chips do not answer register reads
    pub fn set_silent(&self, silent: bool) {
        self.state().silent = silent;
    }

    /// Release nonce words `low`/`high` on the `after_polls`-th FIFO poll after a work packet
    pub fn script_nonce(&self, low: u32, high: u32, after_polls: usize) {
        self.state().nonce = Some(ScriptedNonce {
            low,
            high,
            after_polls,
            polls: 0,
            armed: false,
            low_read: false,
        });
    }

    /// Push raw response word into the FIFO
    pub fn push_response(&self, value: u32) {
        self.state().responses.push_back((value, 0));
    }

    /// Push nonce entry into the FIFO, in order with command responses
    pub fn push_nonce(&self, low: u32, high: u32) {
        self.state().responses.push_back((low, high));
    }

    pub fn sent_commands(&self) -> Vec<(usize, Vec<u8>)> {
        self.state().commands.clone()
    }

    /// Commands sent to `chain` that write `register`, as values
    pub fn register_writes(&self, chain: usize, register: u8) -> Vec<u32> {
        self.state()
            .commands
            .iter()
            .filter(|(cmd_chain, bytes)| {
                *cmd_chain == chain && bytes.len() >= 8 && bytes[0] & 0x0f == 0x1 && bytes[3] == register
            })
            .map(|(_, bytes)| u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]))
            .collect()
    }

    pub fn chip_register(&self, chain: usize, register: u8) -> Option<u32> {
        self.state().chip_regs.get(&(chain, register)).cloned()
    }

    pub fn assigned_addresses(&self, chain: usize) -> Vec<u8> {
        self.state()
            .addresses
            .get(&chain)
            .cloned()
            .unwrap_or_default()
    }

    pub fn work_words(&self) -> Vec<u32> {
        self.state().work_words.clone()
    }
}

impl RegisterWindow for FakeWindow {
    fn read_word(&self, offset: PhysicalOffset) -> u32 {
        let mut state = self.state();
        match offset {
            PhysicalOffset::HASH_ON_PLUG => state.plugged,
            PhysicalOffset::NONCE_NUMBER_IN_FIFO => state.nonce_count(),
            PhysicalOffset::RETURN_NONCE => {
                if let Some((low, high)) = state.responses.pop_front() {
                    state.high_word = high;
                    low
                } else if state.nonce_ready() {
                    let nonce = state.nonce.as_mut().expect("nonce ready");
                    nonce.low_read = true;
                    nonce.low
                } else {
                    0
                }
            }
            PhysicalOffset::RETURN_NONCE_HIGH => match state.nonce.clone() {
                Some(ref nonce) if nonce.low_read => {
                    state.nonce = None;
                    nonce.high
                }
                _ => state.high_word,
            },
            _ => state.words[offset.word()],
        }
    }

    fn write_word(&self, offset: PhysicalOffset, value: u32) {
        let mut state = self.state();
        match offset {
            PhysicalOffset::HASH_ON_PLUG => (),
            PhysicalOffset::TW_WRITE_COMMAND => state.push_work_word(value),
            PhysicalOffset::BC_WRITE_COMMAND if value & BC_COMMAND_BUFFER_READY != 0 => {
                state.words[offset.word()] = value;
                state.transmit(value);
            }
            _ => state.words[offset.word()] = value,
        }
    }
}
