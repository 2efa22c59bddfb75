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

//! Userspace driver of Antminer S19 hash chains built of BM1398 chips
//!
//! The chips are reached through an FPGA whose registers are memory mapped into the process.
//! `Driver` owns the register window and hands out one `HashChain` per plugged hashboard;
//! chains share the command bus, the work FIFO and the nonce FIFO of the FPGA.

pub mod bm1398;
pub mod chain;
pub mod command;
pub mod config;
pub mod error;
pub mod io;
pub mod logging;
pub mod nonce;
pub mod planner;
pub mod work;

#[cfg(test)]
mod test;

use crate::logging::macros::*;

use crate::chain::HashChain;
use crate::error::ErrorKind;
use crate::io::mmap::MmapWindow;
use crate::nonce::NonceRx;
use crate::work::WorkTx;

use failure::ResultExt;

use std::sync::Arc;

/// FPGA with the hash chains behind it
pub struct Driver<W> {
    core: Arc<io::Core<W>>,
    command: command::Context<W>,
    work_tx: Arc<WorkTx<W>>,
    nonce_rx: Arc<NonceRx<W>>,
    chain_mask: io::ChainMask,
    chains: Vec<HashChain<W>>,
}

impl Driver<MmapWindow> {
    /// Map the FPGA device named in `config` and initialize it
    pub fn open(config: &config::Config) -> error::Result<Self> {
        let path = config.device_path();
        let window = MmapWindow::open(path)
            .with_context(|_| ErrorKind::Window(format!("cannot open FPGA device '{}'", path)))?;
        Self::new(window, config)
    }
}

impl<W: io::RegisterWindow> Driver<W> {
    /// Initialize FPGA behind `window` and create chains for every plugged hashboard
    ///
    /// Chains are created `Unconfigured`, nothing is sent to the chips yet.
    pub fn new(window: W, config: &config::Config) -> error::Result<Self> {
        let core = Arc::new(io::Core::new(window));
        debug!("FPGA chip id {:#010x}", core.fpga_chip_id());
        let chain_mask = core.init();

        let command = command::Context::new(core.clone());
        command.set_read_timeout(config.read_timeout())?;
        command.set_response_format(config.response_format()?)?;
        let work_tx = Arc::new(WorkTx::new(core.clone()));
        let nonce_rx = Arc::new(NonceRx::new(core.clone()));

        let mut chains = Vec::with_capacity(chain_mask.count());
        for chain_id in chain_mask.iter() {
            chains.push(HashChain::new(
                chain_id,
                config.resolve_chain_config(chain_id),
                command.clone(),
                core.clone(),
                work_tx.clone(),
            )?);
        }

        Ok(Self {
            core,
            command,
            work_tx,
            nonce_rx,
            chain_mask,
            chains,
        })
    }

    pub fn core(&self) -> &Arc<io::Core<W>> {
        &self.core
    }

    pub fn command(&self) -> &command::Context<W> {
        &self.command
    }

    pub fn work_tx(&self) -> &Arc<WorkTx<W>> {
        &self.work_tx
    }

    pub fn nonce_rx(&self) -> &Arc<NonceRx<W>> {
        &self.nonce_rx
    }

    /// Hashboards reported as plugged during FPGA initialization
    pub fn chain_mask(&self) -> io::ChainMask {
        self.chain_mask
    }

    pub fn chains(&self) -> &[HashChain<W>] {
        &self.chains
    }

    pub fn chain_mut(&mut self, chain_id: usize) -> error::Result<&mut HashChain<W>> {
        match self
            .chains
            .iter_mut()
            .find(|chain| chain.chain_id() == chain_id)
        {
            Some(chain) => Ok(chain),
            None => Err(ErrorKind::Chain(chain_id, "hashboard not present".to_string()))?,
        }
    }

    /// Move chains out, e.g. to bring each of them up in its own thread
    pub fn take_chains(&mut self) -> Vec<HashChain<W>> {
        std::mem::replace(&mut self.chains, Vec::new())
    }

    /// Move one chain out, the others stay with the driver
    pub fn take_chain(&mut self, chain_id: usize) -> error::Result<HashChain<W>> {
        match self
            .chains
            .iter()
            .position(|chain| chain.chain_id() == chain_id)
        {
            Some(index) => Ok(self.chains.remove(index)),
            None => Err(ErrorKind::Chain(chain_id, "hashboard not present".to_string()))?,
        }
    }

    /// Hand back chains moved out by `take_chain(s)`
    pub fn put_chains<I: IntoIterator<Item = HashChain<W>>>(&mut self, chains: I) {
        self.chains.extend(chains);
        self.chains.sort_by_key(|chain| chain.chain_id());
    }
}
