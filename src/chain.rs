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

//! Hash chain bring-up
//!
//! A chain is brought up in two stages. The reset stage puts every chip into a known state,
//! the configuration stage assigns chip addresses at low baud rate and then moves the chain
//! to its operating frequency and baud rate. Chips are daisy-chained on one half-duplex
//! bus, so nearly every step is a broadcast followed by a settle delay.

use crate::logging::macros::*;

use crate::bm1398::{
    self, ChipAddress, CoreParamReg, DiodeMuxReg, GetAddressReg, Register as _, TicketMaskReg,
};
use crate::command::{self, Interface};
use crate::config::ResolvedChainConfig;
use crate::error::{self, ErrorKind};
use crate::io;
use crate::planner;
use crate::work::{WorkDescriptor, WorkTx};

use failure::ResultExt;

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Maximum number of chips that can be given distinct addresses
pub const MAX_CHIPS_ON_CHAIN: usize = 256;

/// Bring-up stage, reported when a sequencing-critical step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Reset,
    Configuration,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Stage::Reset => write!(f, "Reset"),
            Stage::Configuration => write!(f, "Configuration"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Unconfigured,
    Stage1Reset,
    Stage2Configuring,
    Ready,
    Faulted,
}

impl ChainState {
    /// Check transition validity, no state may be skipped
    pub fn can_transition_to(self, next: ChainState) -> bool {
        match (self, next) {
            (ChainState::Unconfigured, ChainState::Stage1Reset)
            | (ChainState::Stage1Reset, ChainState::Stage2Configuring)
            | (ChainState::Stage2Configuring, ChainState::Ready)
            | (ChainState::Stage1Reset, ChainState::Faulted)
            | (ChainState::Stage2Configuring, ChainState::Faulted)
            | (ChainState::Faulted, ChainState::Unconfigured)
            | (ChainState::Ready, ChainState::Unconfigured) => true,
            _ => false,
        }
    }
}

/// Settle delays of the bring-up sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// After every ordinary register write
    pub step: Duration,
    /// After every write of the core reset sub-sequence
    pub core_reset: Duration,
    /// Hold after the core reset sub-sequence
    pub stabilization: Duration,
    /// Between chip address assignments
    pub enumeration_gap: Duration,
    /// After chain inactive command
    pub inactive_settle: Duration,
    /// After baud rate change
    pub baud_settle: Duration,
    /// After the reset stage
    pub reset_settle: Duration,
}

impl Timing {
    /// No delays, for simulated register windows
    pub fn none() -> Self {
        Self {
            step: Duration::from_millis(0),
            core_reset: Duration::from_millis(0),
            stabilization: Duration::from_millis(0),
            enumeration_gap: Duration::from_millis(0),
            inactive_settle: Duration::from_millis(0),
            baud_settle: Duration::from_millis(0),
            reset_settle: Duration::from_millis(0),
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(10),
            core_reset: Duration::from_millis(100),
            stabilization: Duration::from_secs(2),
            enumeration_gap: Duration::from_millis(1),
            inactive_settle: Duration::from_millis(10),
            baud_settle: Duration::from_millis(50),
            reset_settle: Duration::from_millis(50),
        }
    }
}

#[inline]
fn settle(delay: Duration) {
    if delay > Duration::from_millis(0) {
        thread::sleep(delay);
    }
}

/// Addresses assigned to `chip_count` chips
///
/// Chips are spread evenly over the 8-bit address space.
pub fn chip_addresses(chip_count: usize) -> impl Iterator<Item = u8> {
    assert!(
        chip_count <= MAX_CHIPS_ON_CHAIN,
        "{} chips do not fit address space",
        chip_count
    );
    let stride = if chip_count == 0 {
        1
    } else {
        (MAX_CHIPS_ON_CHAIN / chip_count).max(1)
    };
    (0..chip_count).map(move |i| (i * stride) as u8)
}

/// Wrap failure of a sequencing-critical step
fn critical<T>(stage: Stage, step: &str, result: error::Result<T>) -> error::Result<T> {
    Ok(result.with_context(|_| ErrorKind::StageFailed(stage, step.to_string()))?)
}

pub struct HashChain<W> {
    chain_id: usize,
    state: ChainState,
    /// Number of chips that have been given an address
    chip_count: usize,
    /// Frequency the chip PLLs have been programmed for
    frequency: Option<u32>,
    pll: Option<planner::PllConfig>,
    baud_rate: Option<u32>,
    config: ResolvedChainConfig,
    timing: Timing,
    command: command::Context<W>,
    core: Arc<io::Core<W>>,
    work_tx: Arc<WorkTx<W>>,
}

impl<W: io::RegisterWindow> HashChain<W> {
    pub fn new(
        chain_id: usize,
        config: ResolvedChainConfig,
        command: command::Context<W>,
        core: Arc<io::Core<W>>,
        work_tx: Arc<WorkTx<W>>,
    ) -> error::Result<Self> {
        if chain_id >= io::MAX_CHAINS {
            Err(ErrorKind::Chain(
                chain_id,
                format!("chain index out of range 0..{}", io::MAX_CHAINS),
            ))?
        }
        Ok(Self {
            chain_id,
            state: ChainState::Unconfigured,
            chip_count: 0,
            frequency: None,
            pll: None,
            baud_rate: None,
            config,
            timing: Timing::default(),
            command,
            core,
            work_tx,
        })
    }

    pub fn set_timing(&mut self, timing: Timing) {
        self.timing = timing;
    }

    pub fn chain_id(&self) -> usize {
        self.chain_id
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn chip_count(&self) -> usize {
        self.chip_count
    }

    pub fn frequency(&self) -> Option<u32> {
        self.frequency
    }

    pub fn pll(&self) -> Option<planner::PllConfig> {
        self.pll
    }

    pub fn baud_rate(&self) -> Option<u32> {
        self.baud_rate
    }

    pub fn config(&self) -> &ResolvedChainConfig {
        &self.config
    }

    /// Command interface shared with other chains
    pub fn command(&self) -> &command::Context<W> {
        &self.command
    }

    /// Addresses of enumerated chips
    pub fn chip_iter(&self) -> impl Iterator<Item = u8> {
        chip_addresses(self.chip_count)
    }

    fn set_state(&mut self, next: ChainState) {
        assert!(
            self.state.can_transition_to(next),
            "invalid chain transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!("Chain {}: {:?} -> {:?}", self.chain_id, self.state, next);
        self.state = next;
    }

    /// Bring chain up from any state except the middle of a bring-up
    ///
    /// On failure the chain ends in `Faulted` and the caller decides whether to retry.
    pub fn init(&mut self) -> error::Result<()> {
        match self.state {
            ChainState::Unconfigured => (),
            ChainState::Ready | ChainState::Faulted => self.set_state(ChainState::Unconfigured),
            state => Err(ErrorKind::Chain(
                self.chain_id,
                format!("cannot initialize chain in state {:?}", state),
            ))?,
        }
        self.core.set_hashing(self.chain_id, false);
        self.chip_count = 0;
        self.frequency = None;
        self.pll = None;
        self.baud_rate = None;

        info!("Initializing hash chain {}", self.chain_id);
        self.set_state(ChainState::Stage1Reset);
        if let Err(e) = self.reset_stage() {
            error!("Chain {}: {}", self.chain_id, e);
            self.set_state(ChainState::Faulted);
            return Err(e);
        }
        info!("Chain {}: reset stage complete", self.chain_id);

        self.set_state(ChainState::Stage2Configuring);
        if let Err(e) = self.configuration_stage() {
            error!("Chain {}: {}", self.chain_id, e);
            self.set_state(ChainState::Faulted);
            return Err(e);
        }
        self.set_state(ChainState::Ready);
        info!(
            "Chain {} ready: {} chips @ {} MHz, {} baud",
            self.chain_id,
            self.chip_count,
            self.frequency.unwrap_or(0),
            self.baud_rate.unwrap_or(0)
        );
        Ok(())
    }

    /// Broadcast register write followed by the ordinary settle delay
    fn broadcast(&self, register: u8, value: u32) -> error::Result<()> {
        trace!(
            "Chain {}: register {:#04x} <- {:#010x}",
            self.chain_id,
            register,
            value
        );
        self.command
            .write_raw(self.chain_id, ChipAddress::All, register, value)?;
        settle(self.timing.step);
        Ok(())
    }

    /// Non-critical step, failure is reported and ignored
    fn optional(&self, step: &str, result: error::Result<()>) {
        if let Err(e) = result {
            warn!("Chain {}: {} failed: {}", self.chain_id, step, e);
        }
    }

    fn reset_stage(&mut self) -> error::Result<()> {
        let stage = Stage::Reset;
        let steps = [
            ("soft reset disable", bm1398::CLK_CTRL_REG, bm1398::CLK_CTRL_SOFT_RESET_DISABLE),
            ("power off", bm1398::RESET_CTRL_REG, bm1398::RESET_CTRL_POWER_OFF),
            ("core reset enable", bm1398::CLK_CTRL_REG, bm1398::CLK_CTRL_CORE_RESET_ENABLE),
            ("core reset disable", bm1398::CLK_CTRL_REG, bm1398::CLK_CTRL_CORE_RESET_DISABLE),
            ("soft reset enable", bm1398::CLK_CTRL_REG, bm1398::CLK_CTRL_SOFT_RESET_ENABLE),
            ("power on", bm1398::RESET_CTRL_REG, bm1398::RESET_CTRL_POWER_ON),
            ("ticket mask (all cores)", bm1398::TICKET_MASK_REG, TicketMaskReg::ALL_CORES),
        ];
        for (step, register, value) in steps.iter() {
            critical(stage, step, self.broadcast(*register, *value))?;
        }
        settle(self.timing.reset_settle);
        Ok(())
    }

    fn configuration_stage(&mut self) -> error::Result<()> {
        let stage = Stage::Configuration;

        let diode_mux = critical(
            stage,
            "diode mux",
            DiodeMuxReg::new(*self.config.diode_vdd_mux_sel),
        )?;
        critical(
            stage,
            "diode mux",
            self.broadcast(bm1398::DIODE_MUX_REG, diode_mux.to_reg()),
        )?;
        critical(stage, "chain inactive", self.chain_inactive())?;
        settle(self.timing.step);

        // address assignment is unreliable at the operating baud rate
        critical(
            stage,
            "low baud rate",
            self.set_baud_rate(planner::LOW_BAUD_RATE),
        )?;
        let chip_count = critical(stage, "chip discovery", self.discover_chips())?;
        critical(stage, "chip enumeration", self.enumerate_chips(chip_count))?;
        settle(self.timing.step);

        let core_param = CoreParamReg::default().to_reg();
        let core_config = bm1398::core_config(1, 0);
        let steps = [
            ("core config reset", bm1398::CORE_CONFIG_REG, bm1398::CORE_CONFIG_RESET_STEP1),
            ("core config reset", bm1398::CORE_CONFIG_REG, bm1398::CORE_CONFIG_RESET_STEP2),
            ("core config", bm1398::CORE_CONFIG_REG, core_config),
            ("core parameters", bm1398::CORE_PARAM_REG, core_param),
        ];
        for (step, register, value) in steps.iter() {
            critical(stage, step, self.broadcast(*register, *value))?;
        }
        self.optional(
            "IO driver strength",
            self.broadcast(bm1398::IO_DRIVER_REG, bm1398::IO_DRIVER_CLKO_DS1),
        );
        for register in [
            bm1398::PLL0_REG,
            bm1398::PLL1_REG,
            bm1398::PLL2_REG,
            bm1398::PLL3_REG,
        ]
        .iter()
        {
            self.optional("PLL reset", self.broadcast(*register, 0));
        }

        critical(
            stage,
            "frequency",
            self.set_frequency(*self.config.frequency),
        )?;
        critical(
            stage,
            "high baud rate",
            self.set_baud_rate(*self.config.baud_rate),
        )?;

        self.core_reset(core_config, core_param);
        debug!(
            "Chain {}: waiting {:?} for chips to stabilize",
            self.chain_id, self.timing.stabilization
        );
        settle(self.timing.stabilization);

        let timeout = planner::nonce_timeout(self.frequency.unwrap_or(planner::DEFAULT_FREQUENCY_MHZ));
        trace!("Chain {}: nonce timeout {:#010x}", self.chain_id, timeout);
        self.core.set_nonce_timeout(timeout);
        settle(self.timing.step);

        critical(
            stage,
            "ticket mask",
            self.broadcast(bm1398::TICKET_MASK_REG, TicketMaskReg::MINING),
        )?;
        self.optional(
            "nonce overflow disable",
            self.broadcast(bm1398::CORE_CONFIG_REG, bm1398::CORE_CONFIG_NONCE_OVF_DIS),
        );
        self.verify_ticket_mask();
        Ok(())
    }

    fn chain_inactive(&self) -> error::Result<()> {
        self.command
            .send_raw_command(self.chain_id, &bm1398::encode_chain_inactive())
    }

    /// Change baud rate of all chips on chain
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> error::Result<()> {
        let clock = planner::plan_baud(baud_rate)?;
        info!(
            "Chain {}: setting baud rate {} (divisor {}, {} speed)",
            self.chain_id,
            baud_rate,
            clock.divisor,
            if clock.high_speed { "high" } else { "low" }
        );
        if clock.high_speed {
            // UART is clocked from PLL3 in high speed mode
            if let Err(e) = self.command.read_modify_write(
                self.chain_id,
                bm1398::PLL3_REG,
                planner::PLL3_UART_CLEAR_MASK,
                planner::PLL3_UART_SET_MASK,
            ) {
                warn!(
                    "Chain {}: PLL3 read failed ({}), writing {:#010x}",
                    self.chain_id,
                    e,
                    planner::PLL3_UART_FALLBACK
                );
                self.command.write_raw(
                    self.chain_id,
                    ChipAddress::All,
                    bm1398::PLL3_REG,
                    planner::PLL3_UART_FALLBACK,
                )?;
            }
            settle(self.timing.step);
            self.broadcast(bm1398::BAUD_CONFIG_REG, bm1398::BAUD_CONFIG_HIGH_SPEED)?;
        }
        self.command.write_raw(
            self.chain_id,
            ChipAddress::All,
            bm1398::CLK_CTRL_REG,
            clock.clk_ctrl(),
        )?;
        settle(self.timing.baud_settle);
        self.baud_rate = Some(baud_rate);
        Ok(())
    }

    /// Program PLL0 of all chips
    pub fn set_frequency(&mut self, frequency: u32) -> error::Result<()> {
        let pll = planner::plan_frequency(frequency)?;
        let applied = if planner::is_verified_frequency(frequency) {
            frequency
        } else {
            planner::DEFAULT_FREQUENCY_MHZ
        };
        info!(
            "Chain {}: setting frequency {} MHz ({})",
            self.chain_id, applied, pll
        );
        self.broadcast(bm1398::PLL0_REG, pll.pll_reg().to_reg())?;
        self.frequency = Some(applied);
        self.pll = Some(pll);
        Ok(())
    }

    /// Count chips answering broadcast read of the address register
    fn discover_chips(&self) -> error::Result<usize> {
        let expected = *self.config.chips_per_chain;
        let responses = self
            .command
            .read_register::<GetAddressReg>(self.chain_id, ChipAddress::All)?;
        let foreign = responses
            .iter()
            .filter(|reg| reg.chip_id != bm1398::BM1398_CHIP_ID)
            .count();
        if foreign > 0 {
            warn!(
                "Chain {}: {} of {} responses carry unexpected chip id",
                self.chain_id,
                foreign,
                responses.len()
            );
        }

        match responses.len() {
            0 if expected == 0 => Err(ErrorKind::EnumerationFailed(format!(
                "no chips respond on chain {}",
                self.chain_id
            )))?,
            0 => {
                warn!(
                    "Chain {}: no response to chip discovery, assuming {} chips",
                    self.chain_id, expected
                );
                Ok(expected)
            }
            count if count > MAX_CHIPS_ON_CHAIN => Err(ErrorKind::EnumerationFailed(format!(
                "{} chips respond on chain {}, at most {} can be addressed",
                count, self.chain_id, MAX_CHIPS_ON_CHAIN
            )))?,
            count => {
                if count != expected {
                    warn!(
                        "Chain {}: discovered {} chips, expected {}",
                        self.chain_id, count, expected
                    );
                }
                info!("Chain {}: discovered {} chips", self.chain_id, count);
                Ok(count)
            }
        }
    }

    /// Assign addresses to chips
    ///
    /// Each chip takes the first address it sees and then passes further commands down the
    /// chain.
    fn enumerate_chips(&mut self, chip_count: usize) -> error::Result<()> {
        self.chain_inactive().with_context(|_| {
            ErrorKind::EnumerationFailed(format!("chain {} not deactivated", self.chain_id))
        })?;
        settle(self.timing.inactive_settle);

        for addr in chip_addresses(chip_count) {
            self.command
                .send_raw_command(self.chain_id, &bm1398::encode_set_address(addr))
                .with_context(|_| {
                    ErrorKind::EnumerationFailed(format!(
                        "address {:#04x} not assigned on chain {}",
                        addr, self.chain_id
                    ))
                })?;
            settle(self.timing.enumeration_gap);
        }
        self.chip_count = chip_count;
        debug!(
            "Chain {}: assigned {} addresses",
            self.chain_id, self.chip_count
        );
        Ok(())
    }

    /// Reset cores after clock change, failures are not fatal
    fn core_reset(&self, core_config: u32, core_param: u32) {
        let steps = [
            ("soft reset", bm1398::SOFT_RESET_REG, bm1398::SOFT_RESET_MASK),
            ("clock control", bm1398::CLK_CTRL_REG, bm1398::CLK_CTRL_CORE_RESET_DISABLE),
            ("clock select", bm1398::CORE_CONFIG_REG, core_config),
            ("core parameters", bm1398::CORE_PARAM_REG, core_param),
            ("core enable", bm1398::CORE_CONFIG_REG, bm1398::CORE_CONFIG_ENABLE),
        ];
        for (step, register, value) in steps.iter() {
            let result = self
                .command
                .write_raw(self.chain_id, ChipAddress::All, *register, *value);
            self.optional(step, result);
            settle(self.timing.core_reset);
        }
    }

    fn verify_ticket_mask(&self) {
        match self
            .command
            .read_one_register::<TicketMaskReg>(self.chain_id, ChipAddress::One(0))
        {
            Ok(ref reg) if reg.mask == TicketMaskReg::MINING => {
                trace!("Chain {}: ticket mask verified", self.chain_id)
            }
            Ok(reg) => warn!(
                "Chain {}: chip 0 reports ticket mask {:#010x}, expected {:#010x}",
                self.chain_id,
                reg.mask,
                TicketMaskReg::MINING
            ),
            Err(e) => warn!(
                "Chain {}: ticket mask not verified: {}",
                self.chain_id, e
            ),
        }
    }

    /// Push work to the chain, permitted only on a ready chain
    pub fn submit_work(&self, work: &WorkDescriptor) -> error::Result<()> {
        if self.state != ChainState::Ready {
            Err(ErrorKind::Chain(
                self.chain_id,
                format!("work submitted in state {:?}", self.state),
            ))?
        }
        self.work_tx.submit(self.chain_id, work)
    }
}
