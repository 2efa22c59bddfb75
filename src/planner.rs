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

//! Numeric planning of chip clocks: core PLL dividers, UART baud divisor and the nonce
//! timeout derived from the core frequency.
//!
//! Nothing here touches hardware.

use crate::logging::macros::*;

use crate::bm1398::{self, PllReg};
use crate::error::{self, ErrorKind};

use std::fmt;

/// Crystal frequency feeding the core PLL
pub const XTAL_FREQ_MHZ: u32 = 25;

/// Allowed VCO range
pub const VCO_MIN_MHZ: u32 = 1600;
pub const VCO_MAX_MHZ: u32 = 3200;
/// Start of the upper VCO sub-band
pub const VCO_HIGH_BAND_MHZ: u32 = 2400;

/// Operating frequency with hardware verified dividers
pub const DEFAULT_FREQUENCY_MHZ: u32 = 525;

/// Operating points confirmed on hardware: (MHz, refdiv, fbdiv, postdiv1, postdiv2)
///
/// Dividers are the actual divisor values, not the register encoding.
const VERIFIED_POINTS: &[(u32, u8, u16, u8, u8)] = &[(DEFAULT_FREQUENCY_MHZ, 1, 84, 2, 1)];

/// Baud rate used during chip enumeration
pub const LOW_BAUD_RATE: u32 = 115_200;
/// Operating baud rate of the chain
pub const HIGH_BAUD_RATE: u32 = 12_000_000;
/// Rates above this threshold are clocked from the 400 MHz PLL3 output
pub const HIGH_SPEED_BAUD_THRESHOLD: u32 = 3_000_000;
const HIGH_SPEED_UART_CLOCK: u64 = 400_000_000;
const LOW_SPEED_UART_CLOCK: u64 = 25_000_000;
/// Widest divisor that fits the split CLK_CTRL fields (4 + 5 bits)
pub const MAX_BAUD_DIVISOR: u32 = 0x1ff;

/// PLL3 read-modify-write enabling the 400 MHz UART clock
pub const PLL3_UART_CLEAR_MASK: u32 = 0x0000_ffff;
pub const PLL3_UART_SET_MASK: u32 = 0xc070_0111;
/// PLL3 value written when the current value cannot be read
pub const PLL3_UART_FALLBACK: u32 = 0xc070_0111;

const CLK_CTRL_HIGH_SPEED_BASE: u32 = bm1398::CLK_CTRL_CORE_RESET_DISABLE | 0x0001_0000;
const CLK_CTRL_LOW_SPEED_BASE: u32 = bm1398::CLK_CTRL_SOFT_RESET_ENABLE;

/// Enable bit of the FPGA nonce timeout register
const NONCE_TIMEOUT_ENABLE: u32 = 0x8000_0000;
const NONCE_TIMEOUT_MASK: u32 = 0x0001_ffff;

/// Core PLL divider set (actual divisor values)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllConfig {
    pub refdiv: u8,
    pub fbdiv: u16,
    pub postdiv1: u8,
    pub postdiv2: u8,
}

impl PllConfig {
    /// Build divider set, checking register field widths and VCO range
    pub fn new(refdiv: u8, fbdiv: u16, postdiv1: u8, postdiv2: u8) -> error::Result<Self> {
        if refdiv == 0 || refdiv > 8 || postdiv1 == 0 || postdiv1 > 64 {
            Err(ErrorKind::FrequencyOutOfRange(format!(
                "reference divider {} or post divider {} outside register range",
                refdiv, postdiv1
            )))?
        }
        if postdiv2 == 0 || postdiv2 > 8 || fbdiv == 0 || fbdiv > 0xfff {
            Err(ErrorKind::FrequencyOutOfRange(format!(
                "feedback divider {} or post divider {} outside register range",
                fbdiv, postdiv2
            )))?
        }
        let pll = Self {
            refdiv,
            fbdiv,
            postdiv1,
            postdiv2,
        };
        let vco = pll.vco_mhz();
        if vco < VCO_MIN_MHZ || vco > VCO_MAX_MHZ {
            Err(ErrorKind::FrequencyOutOfRange(format!(
                "VCO {} MHz outside {}..={} MHz",
                vco, VCO_MIN_MHZ, VCO_MAX_MHZ
            )))?
        }
        Ok(pll)
    }

    pub fn vco_mhz(&self) -> u32 {
        XTAL_FREQ_MHZ * self.fbdiv as u32 / self.refdiv as u32
    }

    /// Output frequency according to the nominal PLL formula
    ///
    /// Verified operating points are labelled by the frequency measured on hardware, which
    /// is half of this value for the 525 MHz point.
    pub fn nominal_mhz(&self) -> u32 {
        self.vco_mhz() / (self.postdiv1 as u32 * self.postdiv2 as u32)
    }

    pub fn is_vco_high(&self) -> bool {
        let vco = self.vco_mhz();
        vco >= VCO_HIGH_BAND_MHZ && vco <= VCO_MAX_MHZ
    }

    /// PLL0 register value
    pub fn pll_reg(&self) -> PllReg {
        PllReg {
            enable: true,
            vco_high: self.is_vco_high(),
            fbdiv: self.fbdiv.into(),
            postdiv1: (self.postdiv1 - 1).into(),
            refdiv: (self.refdiv - 1).into(),
            postdiv2: (self.postdiv2 - 1).into(),
        }
    }
}

impl fmt::Display for PllConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "refdiv={} fbdiv={} postdiv1={} postdiv2={} (VCO {} MHz)",
            self.refdiv,
            self.fbdiv,
            self.postdiv1,
            self.postdiv2,
            self.vco_mhz()
        )
    }
}

/// Check if `target_mhz` has hardware verified dividers
pub fn is_verified_frequency(target_mhz: u32) -> bool {
    VERIFIED_POINTS.iter().any(|point| point.0 == target_mhz)
}

/// Find PLL dividers for `target_mhz`
///
/// Only verified operating points are used, any other target falls back to the default
/// frequency with a warning.
pub fn plan_frequency(target_mhz: u32) -> error::Result<PllConfig> {
    if target_mhz == 0 {
        Err(ErrorKind::FrequencyOutOfRange(
            "zero frequency requested".to_string(),
        ))?
    }
    let point = match VERIFIED_POINTS.iter().find(|point| point.0 == target_mhz) {
        Some(point) => point,
        None => {
            warn!(
                "Frequency {} MHz has no verified PLL configuration, using {} MHz",
                target_mhz, DEFAULT_FREQUENCY_MHZ
            );
            &VERIFIED_POINTS[0]
        }
    };
    let (_, refdiv, fbdiv, postdiv1, postdiv2) = *point;
    PllConfig::new(refdiv, fbdiv, postdiv1, postdiv2)
}

/// UART clock setup for a baud rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockConfig {
    pub baud_rate: u32,
    pub divisor: u32,
    /// UART is clocked from the 400 MHz PLL3 output
    pub high_speed: bool,
}

impl ClockConfig {
    /// CLK_CTRL register value carrying the divisor
    pub fn clk_ctrl(&self) -> u32 {
        let base = if self.high_speed {
            CLK_CTRL_HIGH_SPEED_BASE
        } else {
            CLK_CTRL_LOW_SPEED_BASE
        };
        base | ((self.divisor >> 5) & 0xf) << 24 | (self.divisor & 0x1f) << 8
    }
}

pub fn plan_baud(baud_rate: u32) -> error::Result<ClockConfig> {
    let high_speed = baud_rate > HIGH_SPEED_BAUD_THRESHOLD;
    let reference = if high_speed {
        HIGH_SPEED_UART_CLOCK
    } else {
        LOW_SPEED_UART_CLOCK
    };
    let ratio = match baud_rate {
        0 => 0,
        _ => reference / (baud_rate as u64 * 8),
    };
    if ratio == 0 || ratio - 1 > MAX_BAUD_DIVISOR as u64 {
        Err(ErrorKind::BaudUnreachable(format!(
            "{} baud needs divisor outside 0..={} ({} MHz reference)",
            baud_rate,
            MAX_BAUD_DIVISOR,
            reference / 1_000_000
        )))?
    }
    Ok(ClockConfig {
        baud_rate,
        divisor: (ratio - 1) as u32,
        high_speed,
    })
}

/// FPGA nonce timeout register value for chips running at `frequency_mhz`
pub fn nonce_timeout(frequency_mhz: u32) -> u32 {
    let ticks = NONCE_TIMEOUT_MASK / frequency_mhz.max(1);
    (ticks & NONCE_TIMEOUT_MASK) | NONCE_TIMEOUT_ENABLE
}
