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

//! This module handles S19 configuration and configuration file parsing

use crate::logging::macros::*;

mod support;

pub use support::OptionDefault;

use crate::command::ResponseFormat;
use crate::error::{self, ErrorKind};
use crate::io;
use crate::planner;

use failure::ResultExt;
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Expected configuration version
const FORMAT_VERSION: &'static str = "beta";

/// Expected configuration model
const FORMAT_MODEL: &'static str = "Antminer S19";

/// Override the default drain channel size as bring-up tends to burst messages into the logger
pub const ASYNC_LOGGER_DRAIN_CHANNEL_SIZE: usize = 4096;

/// Location of default config
pub const DEFAULT_CONFIG_PATH: &'static str = "/etc/bosminer-s19.toml";

/// Default PLL frequency for clocking the chips in MHz
pub const DEFAULT_FREQUENCY: u32 = planner::DEFAULT_FREQUENCY_MHZ;

/// Default operating baud rate of the chain
pub const DEFAULT_BAUD_RATE: u32 = planner::HIGH_BAUD_RATE;

/// Default voltage monitor multiplexer selector
pub const DEFAULT_DIODE_VDD_MUX_SEL: u8 = 3;

/// Expected number of chips on S19 hashboard
pub const DEFAULT_CHIPS_PER_CHAIN: usize = 114;

/// Range of hash chain index
pub const HASH_CHAIN_INDEX_MIN: usize = 0;
pub const HASH_CHAIN_INDEX_MAX: usize = io::MAX_CHAINS - 1;

/// Maximum number of chips addressable on one chain
pub const CHIPS_PER_CHAIN_MAX: usize = 256;

/// Settings of one hash chain after global and per-chain values have been merged
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedChainConfig {
    pub frequency: OptionDefault<u32>,
    pub baud_rate: OptionDefault<u32>,
    pub diode_vdd_mux_sel: OptionDefault<u8>,
    pub chips_per_chain: OptionDefault<usize>,
}

impl ResolvedChainConfig {
    /// Use manufacturer default frequency stored in the hashboard EEPROM
    ///
    /// Frequency set explicitly in configuration is kept.
    pub fn apply_eeprom_frequency(&mut self, frequency: Option<u32>) {
        let frequency = frequency.filter(|mhz| *mhz > 0);
        if let (Some(mhz), true) = (frequency, self.frequency.is_some()) {
            debug!(
                "EEPROM frequency {} MHz ignored, configured {} MHz",
                mhz, *self.frequency
            );
        }
        self.frequency = self.frequency.replace_default(frequency);
    }
}

impl Default for ResolvedChainConfig {
    fn default() -> Self {
        Self {
            frequency: OptionDefault::Default(DEFAULT_FREQUENCY),
            baud_rate: OptionDefault::Default(DEFAULT_BAUD_RATE),
            diode_vdd_mux_sel: OptionDefault::Default(DEFAULT_DIODE_VDD_MUX_SEL),
            chips_per_chain: OptionDefault::Default(DEFAULT_CHIPS_PER_CHAIN),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
struct Format {
    version: String,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    generator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<u32>,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            model: FORMAT_MODEL.to_string(),
            generator: None,
            timestamp: None,
        }
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct Device {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Command bus tuning
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct Bus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
    /// Position of register value within the response word
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_shift: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mask: Option<u32>,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct HashChain {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diode_vdd_mux_sel: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chips_per_chain: Option<usize>,
}

impl HashChain {
    fn validate(&self, section: &str) -> error::Result<()> {
        if let Some(sel) = self.diode_vdd_mux_sel {
            if sel > 7 {
                Err(ErrorKind::Config(format!(
                    "{}: 'diode_vdd_mux_sel' {} out of range 0..=7",
                    section, sel
                )))?
            }
        }
        if let Some(chips) = self.chips_per_chain {
            if chips == 0 || chips > CHIPS_PER_CHAIN_MAX {
                Err(ErrorKind::Config(format!(
                    "{}: 'chips_per_chain' {} out of range 1..={}",
                    section, chips, CHIPS_PER_CHAIN_MAX
                )))?
            }
        }
        if let Some(frequency) = self.frequency {
            planner::plan_frequency(frequency)
                .with_context(|_| ErrorKind::Config(format!("{}: bad 'frequency'", section)))?;
        }
        if let Some(baud_rate) = self.baud_rate {
            planner::plan_baud(baud_rate)
                .with_context(|_| ErrorKind::Config(format!("{}: bad 'baud_rate'", section)))?;
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {
    format: Format,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus: Option<Bus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_chain_global: Option<HashChain>,
    #[serde(rename = "hash_chain")]
    #[serde(skip_serializing_if = "Option::is_none")]
    hash_chains: Option<BTreeMap<String, HashChain>>,
    /// Manufacturer frequency per hash chain, read from the hashboard EEPROM
    #[serde(skip)]
    eeprom_frequencies: BTreeMap<usize, u32>,
}

impl Config {
    pub fn resolve_chain_config(&self, hash_chain_idx: usize) -> ResolvedChainConfig {
        // Take global hash chain configuration or default value
        let global = self.hash_chain_global.as_ref();
        let mut resolved = ResolvedChainConfig {
            frequency: OptionDefault::new(global.and_then(|v| v.frequency), DEFAULT_FREQUENCY),
            baud_rate: OptionDefault::new(global.and_then(|v| v.baud_rate), DEFAULT_BAUD_RATE),
            diode_vdd_mux_sel: OptionDefault::new(
                global.and_then(|v| v.diode_vdd_mux_sel),
                DEFAULT_DIODE_VDD_MUX_SEL,
            ),
            chips_per_chain: OptionDefault::new(
                global.and_then(|v| v.chips_per_chain),
                DEFAULT_CHIPS_PER_CHAIN,
            ),
        };

        // If there's a per-chain override then apply it
        if let Some(hash_chain) = self
            .hash_chains
            .as_ref()
            .and_then(|m| m.get(&hash_chain_idx.to_string()))
        {
            resolved.frequency = resolved.frequency.or_override(hash_chain.frequency);
            resolved.baud_rate = resolved.baud_rate.or_override(hash_chain.baud_rate);
            resolved.diode_vdd_mux_sel = resolved
                .diode_vdd_mux_sel
                .or_override(hash_chain.diode_vdd_mux_sel);
            resolved.chips_per_chain = resolved
                .chips_per_chain
                .or_override(hash_chain.chips_per_chain);
        }
        resolved.apply_eeprom_frequency(self.eeprom_frequencies.get(&hash_chain_idx).cloned());
        resolved
    }

    /// Path of the FPGA device file
    pub fn device_path(&self) -> &str {
        self.device
            .as_ref()
            .and_then(|device| device.path.as_ref())
            .map(|path| path.as_str())
            .unwrap_or(io::mmap::DEFAULT_DEVICE_PATH)
    }

    pub fn read_timeout(&self) -> Duration {
        self.bus
            .as_ref()
            .and_then(|bus| bus.read_timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(crate::command::DEFAULT_READ_TIMEOUT)
    }

    pub fn response_format(&self) -> error::Result<ResponseFormat> {
        let default = ResponseFormat::default();
        match self.bus.as_ref() {
            Some(bus) => ResponseFormat::new(
                bus.response_shift.unwrap_or(default.shift),
                bus.response_mask.unwrap_or(default.mask),
            ),
            None => Ok(default),
        }
    }

    /// Force frequency of all chains (command line override)
    pub fn set_frequency(&mut self, frequency: u32) {
        self.hash_chain_global
            .get_or_insert_with(Default::default)
            .frequency = Some(frequency);
        if let Some(hash_chains) = self.hash_chains.as_mut() {
            for hash_chain in hash_chains.values_mut() {
                hash_chain.frequency = None;
            }
        }
    }

    /// Record manufacturer frequency of hashboard `hash_chain_idx`
    ///
    /// It replaces the built-in default of that chain, explicitly configured frequency wins.
    pub fn set_eeprom_frequency(&mut self, hash_chain_idx: usize, frequency: u32) {
        self.eeprom_frequencies.insert(hash_chain_idx, frequency);
    }

    pub fn set_device_path(&mut self, path: String) {
        self.device.get_or_insert_with(Default::default).path = Some(path);
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_str(text: &str) -> error::Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| ErrorKind::Config(format!("cannot parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration file
    ///
    /// Missing default configuration file is not an error, built-in defaults are used then.
    pub fn parse(config_path: &str) -> error::Result<Self> {
        if !Path::new(config_path).exists() && config_path == DEFAULT_CONFIG_PATH {
            info!(
                "Default configuration '{}' not found, using built-in defaults",
                config_path
            );
            return Ok(Self::default());
        }
        let text = fs::read_to_string(config_path).with_context(|_| {
            ErrorKind::Config(format!("cannot read configuration '{}'", config_path))
        })?;
        Self::from_str(&text)
    }

    fn validate(&self) -> error::Result<()> {
        // Check compatibility of configuration format
        if self.format.model != FORMAT_MODEL {
            Err(ErrorKind::Config(format!(
                "incompatible format model '{}'",
                self.format.model
            )))?;
        }
        if self.format.version != FORMAT_VERSION {
            Err(ErrorKind::Config(format!(
                "incompatible format version '{}'",
                self.format.version
            )))?;
        }
        self.response_format()?;

        if let Some(global) = self.hash_chain_global.as_ref() {
            global.validate("hash_chain_global")?;
        }
        // Check if all hash chain keys have meaningful name
        if let Some(hash_chains) = &self.hash_chains {
            for (idx, hash_chain) in hash_chains.iter() {
                let _ = idx
                    .parse::<usize>()
                    .map_err(|_| format!("hash chain index '{}' is not number", idx))
                    .and_then(|idx| {
                        if (HASH_CHAIN_INDEX_MIN..=HASH_CHAIN_INDEX_MAX).contains(&idx) {
                            Ok(idx)
                        } else {
                            Err(format!(
                                "hash chain index '{}' is out of range '{}..={}'",
                                idx, HASH_CHAIN_INDEX_MIN, HASH_CHAIN_INDEX_MAX
                            ))
                        }
                    })
                    .map_err(ErrorKind::Config)?;
                hash_chain.validate(&format!("hash_chain.{}", idx))?;
            }
        }
        Ok(())
    }
}
