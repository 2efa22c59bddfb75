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

//! Reading solution candidates from the FPGA nonce FIFO

use crate::logging::macros::*;

use crate::error;
use crate::io;

use std::fmt;
use std::sync::Arc;

const WORK_ID_OR_CRC: u32 = 0x8000_0000;
const WORK_ID_SHIFT: u32 = 16;
const WORK_ID_MASK: u32 = 0x7fff;

/// Decoded entry of the nonce FIFO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceResponse {
    pub nonce: u32,
    pub chain_id: usize,
    /// Job id as returned by the chips (15 bits)
    pub work_id: u16,
    pub work_id_or_crc: bool,
}

impl NonceResponse {
    /// Decode both FIFO words, `None` when the entry holds no data
    pub fn decode(low: u32, high: u32) -> Option<Self> {
        if low & io::NONCE_INDICATOR == 0 {
            return None;
        }
        Some(Self {
            nonce: low,
            chain_id: (low & io::NONCE_CHAIN_MASK) as usize,
            work_id: ((high >> WORK_ID_SHIFT) & WORK_ID_MASK) as u16,
            work_id_or_crc: low & WORK_ID_OR_CRC != 0,
        })
    }
}

impl fmt::Display for NonceResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "chain {} nonce {:#010x} work {:#06x}",
            self.chain_id, self.nonce, self.work_id
        )
    }
}

/// Receive side of the nonce FIFO
///
/// The FIFO is shared by all chains and by command responses, each entry is two words that
/// have to be read together. Nonces popped by a command read are delivered first.
pub struct NonceRx<W> {
    core: Arc<io::Core<W>>,
}

impl<W: io::RegisterWindow> NonceRx<W> {
    pub fn new(core: Arc<io::Core<W>>) -> Self {
        Self { core }
    }

    /// Number of entries waiting in the FIFO
    pub fn poll_count(&self) -> u32 {
        let fifo = self.core.lock_fifo();
        fifo.backlog_len() as u32 + fifo.count()
    }

    pub fn read_one(&self) -> error::Result<Option<NonceResponse>> {
        let (low, high) = self.core.lock_fifo().pop_nonce();
        let response = NonceResponse::decode(low, high);
        match response {
            Some(ref nonce) => trace!("Received {}", nonce),
            None => trace!("Empty nonce FIFO entry {:#010x}", low),
        }
        Ok(response)
    }

    /// Read at most `max` entries that are currently in the FIFO
    pub fn drain(&self, max: usize) -> error::Result<Vec<NonceResponse>> {
        let count = (self.poll_count() as usize).min(max);
        let mut nonces = Vec::with_capacity(count);
        for _ in 0..count {
            if let Some(nonce) = self.read_one()? {
                nonces.push(nonce);
            }
        }
        Ok(nonces)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::test_utils::FakeWindow;
    use crate::io::LogicalRegister;
    use crate::work::WORK_PACKET_WORDS;

    #[test]
    fn test_decode_fields() {
        let nonce = NonceResponse::decode(0x1234_5682, 0x0abc_0000).expect("valid entry");
        assert_eq!(nonce.nonce, 0x1234_5682);
        assert_eq!(nonce.chain_id, 2);
        assert_eq!(nonce.work_id, 0x0abc);
        assert!(!nonce.work_id_or_crc);

        let nonce = NonceResponse::decode(0x8000_0080, 0xffff_ffff).expect("valid entry");
        assert_eq!(nonce.work_id, 0x7fff);
        assert_eq!(nonce.chain_id, 0);
        assert!(nonce.work_id_or_crc);
    }

    #[test]
    fn test_validity_gating() {
        // indicator bit cleared, every other bit pattern
        for low in [0, 0x7f, 0xffff_ff7f, 0x8000_0000, 0x1234_5601].iter() {
            assert_eq!(
                NonceResponse::decode(*low, 0xffff_ffff),
                None,
                "entry {:#010x} decoded",
                low
            );
        }
        for low in [0x80, 0xffff_ffff, 0x0000_0081].iter() {
            assert!(NonceResponse::decode(*low, 0).is_some());
        }
    }

    #[test]
    fn test_drain_scripted_nonce() {
        let window = Arc::new(FakeWindow::new());
        let core = Arc::new(io::Core::new(window.clone()));
        let nonce_rx = NonceRx::new(core.clone());
        window.script_nonce(0xdead_be81, 0x0012_0000, 2);

        // nothing is released before work is sent
        assert_eq!(nonce_rx.poll_count(), 0);
        for _ in 0..WORK_PACKET_WORDS {
            core.write_work_word(LogicalRegister::TW_WRITE_REST, 0);
        }
        assert!(nonce_rx.drain(8).expect("drain failed").is_empty());
        assert!(nonce_rx.drain(8).expect("drain failed").is_empty());

        let nonces = nonce_rx.drain(8).expect("drain failed");
        assert_eq!(
            nonces,
            vec![NonceResponse {
                nonce: 0xdead_be81,
                chain_id: 1,
                work_id: 0x12,
                work_id_or_crc: true,
            }]
        );
        assert_eq!(nonce_rx.poll_count(), 0);
    }

    #[test]
    fn test_drain_limit() {
        let window = Arc::new(FakeWindow::new());
        let nonce_rx = NonceRx::new(Arc::new(io::Core::new(window.clone())));
        window.push_response(0x0000_0080);
        window.push_response(0);
        assert!(nonce_rx.drain(0).expect("drain failed").is_empty());
        assert_eq!(nonce_rx.poll_count(), 2);
    }
}
