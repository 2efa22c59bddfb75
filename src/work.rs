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

//! Work packet encoding and submission to the FPGA work FIFO

use crate::logging::macros::*;

use crate::error::{self, ErrorKind};
use crate::io::{self, LogicalRegister};

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use std::sync::{Arc, Mutex};

/// Size of work packet on the wire
pub const WORK_PACKET_SIZE: usize = 148;
/// Number of FIFO words per work packet
pub const WORK_PACKET_WORDS: usize = WORK_PACKET_SIZE / 4;

/// Number of midstates carried by one work
pub const MIDSTATE_COUNT: usize = 4;
pub const MIDSTATE_SIZE: usize = 32;
/// Block header bytes that are not covered by midstate
pub const HEADER_TAIL_SIZE: usize = 12;

/// Job id is shifted before encoding, leaving the low bits for the chips
pub const WORK_ID_SHIFT: u32 = 3;
/// Exclusive upper bound of job id
pub const WORK_ID_LIMIT: u32 = 1 << (32 - WORK_ID_SHIFT);

const WORK_TYPE: u8 = 0x01;
const CHAIN_ID_MARKER: u8 = 0x80;

const OFFSET_WORK_TYPE: usize = 0;
const OFFSET_CHAIN_ID: usize = 1;
const OFFSET_JOB_ID: usize = 4;
const OFFSET_HEADER_TAIL: usize = 8;
const OFFSET_MIDSTATES: usize = OFFSET_HEADER_TAIL + HEADER_TAIL_SIZE;

/// Hashing job for one chain
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkDescriptor {
    job_id: u32,
    pub header_tail: [u8; HEADER_TAIL_SIZE],
    pub midstates: [[u8; MIDSTATE_SIZE]; MIDSTATE_COUNT],
}

impl WorkDescriptor {
    pub fn new(
        job_id: u32,
        header_tail: [u8; HEADER_TAIL_SIZE],
        midstates: [[u8; MIDSTATE_SIZE]; MIDSTATE_COUNT],
    ) -> error::Result<Self> {
        if job_id >= WORK_ID_LIMIT {
            Err(ErrorKind::Work(format!(
                "job id {:#x} does not fit {} bits",
                job_id,
                32 - WORK_ID_SHIFT
            )))?
        }
        Ok(Self {
            job_id,
            header_tail,
            midstates,
        })
    }

    pub fn job_id(&self) -> u32 {
        self.job_id
    }
}

/// Reverse byte order of every 32-bit word
fn swap_words(packet: &mut [u8; WORK_PACKET_SIZE]) {
    for word in packet.chunks_mut(4) {
        word.reverse();
    }
}

/// Serialize work for `chain` into the byte-swapped wire packet
pub fn encode_work(work: &WorkDescriptor, chain: usize) -> [u8; WORK_PACKET_SIZE] {
    let mut packet = [0u8; WORK_PACKET_SIZE];
    packet[OFFSET_WORK_TYPE] = WORK_TYPE;
    packet[OFFSET_CHAIN_ID] = (chain as u8 & 0x0f) | CHAIN_ID_MARKER;
    BigEndian::write_u32(
        &mut packet[OFFSET_JOB_ID..OFFSET_HEADER_TAIL],
        work.job_id << WORK_ID_SHIFT,
    );
    packet[OFFSET_HEADER_TAIL..OFFSET_MIDSTATES].copy_from_slice(&work.header_tail);
    for (i, midstate) in work.midstates.iter().enumerate() {
        let start = OFFSET_MIDSTATES + i * MIDSTATE_SIZE;
        packet[start..start + MIDSTATE_SIZE].copy_from_slice(midstate);
    }
    swap_words(&mut packet);
    packet
}

/// Recover work and target chain from wire packet
pub fn decode_work(packet: &[u8; WORK_PACKET_SIZE]) -> error::Result<(WorkDescriptor, usize)> {
    let mut packet = *packet;
    swap_words(&mut packet);
    if packet[OFFSET_WORK_TYPE] != WORK_TYPE || packet[OFFSET_CHAIN_ID] & CHAIN_ID_MARKER == 0 {
        Err(ErrorKind::Work(format!(
            "not a work packet: type {:#04x} chain {:#04x}",
            packet[OFFSET_WORK_TYPE], packet[OFFSET_CHAIN_ID]
        )))?
    }
    let chain = (packet[OFFSET_CHAIN_ID] & 0x0f) as usize;

    let mut work = WorkDescriptor::default();
    work.job_id = BigEndian::read_u32(&packet[OFFSET_JOB_ID..OFFSET_HEADER_TAIL]) >> WORK_ID_SHIFT;
    work.header_tail
        .copy_from_slice(&packet[OFFSET_HEADER_TAIL..OFFSET_MIDSTATES]);
    for (i, midstate) in work.midstates.iter_mut().enumerate() {
        let start = OFFSET_MIDSTATES + i * MIDSTATE_SIZE;
        midstate.copy_from_slice(&packet[start..start + MIDSTATE_SIZE]);
    }
    Ok((work, chain))
}

/// Transmit side of the work FIFO
///
/// One FIFO port serves all chains, whole packets are written under a lock so that packets
/// of different chains never interleave.
pub struct WorkTx<W> {
    core: Arc<io::Core<W>>,
    lock: Mutex<()>,
}

impl<W: io::RegisterWindow> WorkTx<W> {
    pub fn new(core: Arc<io::Core<W>>) -> Self {
        Self {
            core,
            lock: Mutex::new(()),
        }
    }

    /// Free space reported by the work FIFO
    pub fn fifo_space(&self) -> u32 {
        self.core.work_fifo_space()
    }

    pub fn submit(&self, chain: usize, work: &WorkDescriptor) -> error::Result<()> {
        if chain >= io::MAX_CHAINS {
            Err(ErrorKind::Chain(chain, "no such chain".to_string()))?
        }
        let packet = encode_work(work, chain);
        let _guard = self
            .lock
            .lock()
            .map_err(|_| ErrorKind::General("work FIFO lock poisoned".to_string()))?;

        trace!("Chain {}: submitting job {:#x}", chain, work.job_id);
        self.core.set_hashing(chain, true);
        for (i, word) in packet.chunks(4).enumerate() {
            let register = if i == 0 {
                LogicalRegister::TW_WRITE_FIRST
            } else {
                LogicalRegister::TW_WRITE_REST
            };
            self.core
                .write_work_word(register, LittleEndian::read_u32(word));
        }
        Ok(())
    }
}
