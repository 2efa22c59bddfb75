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

//! BM1398 command codec and chip registers
//!
//! Every command is a short frame: preamble, length, payload and a CRC5 byte. The length
//! accounts for the whole frame including the checksum, multi-byte values are big-endian.

pub mod crc;

use crate::error::{self, ErrorKind};

use packed_struct::prelude::*;
use packed_struct_codegen::PackedStruct;
use packed_struct_codegen::PrimitiveEnum_u8;

use std::fmt::{self, Debug};
use std::mem::size_of;

pub const CHIP_ADDRESS_REG: u8 = 0x00;
pub const PLL0_REG: u8 = 0x08;
pub const HASH_COUNTING_REG: u8 = 0x10;
pub const TICKET_MASK_REG: u8 = 0x14;
pub const CLK_CTRL_REG: u8 = 0x18;
pub const WORK_ROLLING_REG: u8 = 0x1c;
pub const WORK_CONFIG_REG: u8 = 0x20;
pub const BAUD_CONFIG_REG: u8 = 0x28;
pub const RESET_CTRL_REG: u8 = 0x34;
pub const CORE_CONFIG_REG: u8 = 0x3c;
pub const CORE_PARAM_REG: u8 = 0x44;
pub const DIODE_MUX_REG: u8 = 0x54;
pub const IO_DRIVER_REG: u8 = 0x58;
pub const PLL1_REG: u8 = 0x60;
pub const PLL2_REG: u8 = 0x64;
pub const PLL3_REG: u8 = 0x68;
pub const VERSION_ROLLING_REG: u8 = 0xa4;
pub const SOFT_RESET_REG: u8 = 0xa8;

/// Registers with a documented meaning (used by the register scanner to tell them apart)
pub const KNOWN_REGISTERS: &[u8] = &[
    CHIP_ADDRESS_REG,
    PLL0_REG,
    HASH_COUNTING_REG,
    TICKET_MASK_REG,
    CLK_CTRL_REG,
    WORK_ROLLING_REG,
    WORK_CONFIG_REG,
    BAUD_CONFIG_REG,
    RESET_CTRL_REG,
    CORE_CONFIG_REG,
    CORE_PARAM_REG,
    DIODE_MUX_REG,
    IO_DRIVER_REG,
    PLL1_REG,
    PLL2_REG,
    PLL3_REG,
    VERSION_ROLLING_REG,
    SOFT_RESET_REG,
];

/// Chip identification reported in the upper half of the chip address register
pub const BM1398_CHIP_ID: u16 = 0x1398;

/// Core configuration: base value with pulse mode and clock select fields cleared
pub const CORE_CONFIG_BASE: u32 = 0x8000_8700;
pub const CORE_CONFIG_PULSE_MODE_SHIFT: u32 = 4;
pub const CORE_CONFIG_CLK_SEL_MASK: u32 = 0x7;
/// Two-step core configuration reset performed before pulse mode is configured
pub const CORE_CONFIG_RESET_STEP1: u32 = 0x8000_851f;
pub const CORE_CONFIG_RESET_STEP2: u32 = 0x8000_0600;
/// Enables hashing cores at the end of core reset
pub const CORE_CONFIG_ENABLE: u32 = 0x8000_82aa;
/// Final core configuration with nonce overflow handling disabled
pub const CORE_CONFIG_NONCE_OVF_DIS: u32 = 0x8000_8540;

/// Soft reset of all cores
pub const SOFT_RESET_MASK: u32 = 0x0007_0000;

/// Clock control values of the stage 1 reset sequence
pub const CLK_CTRL_SOFT_RESET_DISABLE: u32 = 0x0000_0000;
pub const CLK_CTRL_CORE_RESET_ENABLE: u32 = 0x0f40_0000;
pub const CLK_CTRL_CORE_RESET_DISABLE: u32 = 0xf000_0000;
pub const CLK_CTRL_SOFT_RESET_ENABLE: u32 = 0xf000_0400;
/// Reset control: chip power bit
pub const RESET_CTRL_POWER_OFF: u32 = 0x0;
pub const RESET_CTRL_POWER_ON: u32 = 0x8;

/// Clock output driver strength (`clko_ds` = 1)
pub const IO_DRIVER_CLKO_DS1: u32 = 0x10;

/// Known-good UART configuration used together with the 400 MHz baud clock
pub const BAUD_CONFIG_HIGH_SPEED: u32 = 0x0600_8f0f;

/// BM1398 addressing
///
/// Unlike linear chip indices, BM1398 addresses are assigned during enumeration at a stride
/// that depends on the chain population, so `One` carries the raw 8-bit address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipAddress {
    All,
    One(u8),
}

impl ChipAddress {
    /// Return if address is a broadcast
    pub fn is_broadcast(&self) -> bool {
        match self {
            ChipAddress::All => true,
            ChipAddress::One(_) => false,
        }
    }

    /// Return hardware chip address or 0 if it's a broadcast
    fn to_hw_addr(&self) -> u8 {
        match self {
            ChipAddress::All => 0,
            ChipAddress::One(addr) => *addr,
        }
    }
}

/// Immutable command frame including the trailing CRC5 byte
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Append checksum computed over all bits of `body`
    fn seal(body: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(body.len() + 1);
        bytes.extend_from_slice(body);
        bytes.push(crc::crc5(body));
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn checksum(&self) -> u8 {
        self.bytes[self.bytes.len() - 1]
    }
}

impl Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Frame({:02x?})", self.bytes)
    }
}

/// Control command layout
#[derive(PackedStruct, Debug)]
#[packed_struct(size_bytes = "1", bit_numbering = "lsb0")]
pub struct Cmd {
    #[packed_field(bits = "0:3")]
    code: Integer<u8, packed_bits::Bits4>,
    #[packed_field(bits = "4")]
    to_all: bool,
    #[packed_field(bits = "5:7", ty = "enum")]
    cmd_type: CmdType,
}

impl Cmd {
    fn new(code: CmdCode, to_all: bool) -> Self {
        Self {
            code: (code as u8).into(),
            to_all,
            cmd_type: CmdType::VilCtlCmd,
        }
    }
}

/// Command types
#[derive(PrimitiveEnum_u8, Clone, Copy, Debug, PartialEq)]
enum CmdType {
    /// Control command for the chip
    VilCtlCmd = 0x02,
}

/// Operation selected by the low nibble of the preamble
#[derive(Clone, Copy, Debug, PartialEq)]
enum CmdCode {
    SetAddress = 0x0,
    WriteRegister = 0x1,
    ReadRegister = 0x2,
    ChainInactive = 0x3,
}

#[derive(PackedStruct, Debug)]
pub struct CmdHeader {
    #[packed_field(element_size_bytes = "1")]
    cmd: Cmd,
    length: u8,
    hw_addr: u8,
}

impl CmdHeader {
    /// Create a new header with custom checksum_size
    ///
    /// * `length` - size of the command excluding checksum
    /// * `checksum_size` - Size of checksum needs to be known as it is accounted in the length
    /// field
    fn new_extended(
        code: CmdCode,
        length: usize,
        chip_address: ChipAddress,
        checksum_size: usize,
    ) -> Self {
        Self {
            cmd: Cmd::new(code, chip_address.is_broadcast()),
            length: (length + checksum_size) as u8,
            hw_addr: chip_address.to_hw_addr(),
        }
    }

    /// Control commands carry CRC5 checksum that fits into 1 byte
    /// * `length` - length of the command without checksum
    fn new(code: CmdCode, length: usize, chip_address: ChipAddress) -> Self {
        Self::new_extended(code, length, chip_address, size_of::<u8>())
    }
}

/// Sets configuration register
#[derive(PackedStruct, Debug)]
#[packed_struct(endian = "msb")]
pub struct SetConfigCmd {
    #[packed_field(element_size_bytes = "3")]
    pub header: CmdHeader,
    register: u8,
    value: u32,
}

impl SetConfigCmd {
    pub fn new(chip_address: ChipAddress, register: u8, value: u32) -> Self {
        // payload consists of 1 byte register address and 4 byte value
        let header = CmdHeader::new(CmdCode::WriteRegister, Self::packed_bytes(), chip_address);
        Self {
            header,
            register,
            value,
        }
    }

    pub fn frame(&self) -> Frame {
        Frame::seal(&self.pack())
    }
}

/// Reads register, the value field is sent as zeroes
#[derive(PackedStruct, Debug)]
#[packed_struct(endian = "msb")]
pub struct GetStatusCmd {
    #[packed_field(element_size_bytes = "3")]
    header: CmdHeader,
    register: u8,
    _reserved: u32,
}

impl GetStatusCmd {
    pub fn new(chip_address: ChipAddress, register: u8) -> Self {
        let header = CmdHeader::new(CmdCode::ReadRegister, Self::packed_bytes(), chip_address);
        Self {
            header,
            register,
            _reserved: 0,
        }
    }

    pub fn frame(&self) -> Frame {
        Frame::seal(&self.pack())
    }
}

#[derive(PackedStruct, Debug)]
#[packed_struct(endian = "msb")]
pub struct SetChipAddressCmd {
    #[packed_field(element_size_bytes = "3")]
    pub header: CmdHeader,
    _reserved: u8,
}

impl SetChipAddressCmd {
    pub fn new(addr: u8) -> Self {
        // set address is never a broadcast even though it may target address 0
        let header = CmdHeader::new(
            CmdCode::SetAddress,
            Self::packed_bytes(),
            ChipAddress::One(addr),
        );
        Self {
            header,
            _reserved: 0,
        }
    }

    pub fn frame(&self) -> Frame {
        Frame::seal(&self.pack())
    }
}

#[derive(PackedStruct, Debug)]
#[packed_struct(endian = "msb")]
pub struct InactivateFromChainCmd {
    #[packed_field(element_size_bytes = "3")]
    header: CmdHeader,
    _reserved: u8,
}

impl InactivateFromChainCmd {
    pub fn new() -> Self {
        let header = CmdHeader::new(CmdCode::ChainInactive, Self::packed_bytes(), ChipAddress::All);
        Self {
            header,
            _reserved: 0,
        }
    }

    pub fn frame(&self) -> Frame {
        Frame::seal(&self.pack())
    }
}

/// Frame assigning `addr` to the first chip that has no address yet
pub fn encode_set_address(addr: u8) -> Frame {
    SetChipAddressCmd::new(addr).frame()
}

/// Frame that makes every chip stop relaying commands down the chain
pub fn encode_chain_inactive() -> Frame {
    InactivateFromChainCmd::new().frame()
}

pub fn encode_write_register(chip_address: ChipAddress, register: u8, value: u32) -> Frame {
    SetConfigCmd::new(chip_address, register, value).frame()
}

pub fn encode_read_register(chip_address: ChipAddress, register: u8) -> Frame {
    GetStatusCmd::new(chip_address, register).frame()
}

/// `Register` trait represents register on chip. Register:
///
/// * supports being serialized from/to register format (`from_reg`/`to_reg`)
/// * register is identified by address on chip (`REG_NUM`)
/// * is 4 bytes long (one "word")
///
/// Chip registers can be read with `GetStatusCmd` and written with  `SetConfigCmd`.
pub trait Register: PackedStruct<[u8; 4]> + Send + Sync + PartialEq + Debug {
    const REG_NUM: u8;

    /// Take register and unpack (as big endian)
    fn from_reg(reg: u32) -> error::Result<Self> {
        Ok(Self::unpack(&reg.to_be_bytes()).map_err(|e| {
            ErrorKind::General(format!(
                "cannot unpack register {:#04x} from {:#010x}: {:?}",
                Self::REG_NUM,
                reg,
                e
            ))
        })?)
    }

    /// Pack into big-endian register
    fn to_reg(&self) -> u32 {
        u32::from_be_bytes(self.pack())
    }
}

#[derive(PackedStruct, Debug, Clone, PartialEq, Default)]
#[packed_struct(endian = "msb", size_bytes = "4")]
pub struct GetAddressReg {
    pub chip_id: u16,
    _reserved1: u8,
    pub addr: u8,
}

impl Register for GetAddressReg {
    const REG_NUM: u8 = CHIP_ADDRESS_REG;
}

/// Selects which cores report nonces
///
/// Unlike older chips, BM1398 takes a plain core bitmask here rather than a difficulty.
#[derive(PackedStruct, Debug, Clone, PartialEq)]
#[packed_struct(size_bytes = "4", endian = "msb")]
pub struct TicketMaskReg {
    pub mask: u32,
}

impl TicketMaskReg {
    /// All cores active, required right after reset
    pub const ALL_CORES: u32 = 0xffff_ffff;
    /// Reduced mask used for mining, matches production firmware
    pub const MINING: u32 = 0x0000_00ff;

    pub fn new(mask: u32) -> Self {
        Self { mask }
    }
}

impl Register for TicketMaskReg {
    const REG_NUM: u8 = TICKET_MASK_REG;
}

/// Voltage monitor (diode/VDD) multiplexer selector
#[derive(PackedStruct, Debug, Clone, PartialEq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "4", endian = "msb")]
pub struct DiodeMuxReg {
    #[packed_field(bits = "2:0")]
    pub diode_vdd_mux_sel: Integer<u8, packed_bits::Bits3>,
}

impl DiodeMuxReg {
    pub fn new(diode_vdd_mux_sel: u8) -> error::Result<Self> {
        if diode_vdd_mux_sel > 7 {
            Err(ErrorKind::General(format!(
                "diode mux selector {} out of range 0..=7",
                diode_vdd_mux_sel
            )))?
        }
        Ok(Self {
            diode_vdd_mux_sel: diode_vdd_mux_sel.into(),
        })
    }
}

impl Register for DiodeMuxReg {
    const REG_NUM: u8 = DIODE_MUX_REG;
}

/// Core timing parameters
#[derive(PackedStruct, Debug, Clone, PartialEq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "4", endian = "msb")]
pub struct CoreParamReg {
    /// Pulse width select
    #[packed_field(bits = "2:0")]
    pub pwth_sel: Integer<u8, packed_bits::Bits3>,
    /// Clock chain delay select
    #[packed_field(bits = "5:4")]
    pub ccdly_sel: Integer<u8, packed_bits::Bits2>,
    #[packed_field(bits = "6")]
    pub swpf_mode: bool,
}

impl CoreParamReg {
    pub fn new(pwth_sel: u8, ccdly_sel: u8, swpf_mode: bool) -> Self {
        Self {
            pwth_sel: (pwth_sel & 0x7).into(),
            ccdly_sel: (ccdly_sel & 0x3).into(),
            swpf_mode,
        }
    }
}

impl Default for CoreParamReg {
    /// Timing used by production firmware: `pwth_sel` = 1, `ccdly_sel` = 1
    fn default() -> Self {
        Self::new(1, 1, false)
    }
}

impl Register for CoreParamReg {
    const REG_NUM: u8 = CORE_PARAM_REG;
}

/// Structure representing settings of chip PLL divider
///
/// Reference divider and both post dividers are stored as `value - 1`, feedback divider
/// is stored verbatim.
#[derive(PackedStruct, Debug, PartialEq, Clone)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "4", endian = "msb")]
pub struct PllReg {
    #[packed_field(bits = "30")]
    pub enable: bool,
    /// VCO runs in the upper sub-band (2400..=3200 MHz)
    #[packed_field(bits = "28")]
    pub vco_high: bool,
    #[packed_field(bits = "27:16")]
    pub fbdiv: Integer<u16, packed_bits::Bits12>,
    #[packed_field(bits = "13:8")]
    pub postdiv1: Integer<u8, packed_bits::Bits6>,
    #[packed_field(bits = "6:4")]
    pub refdiv: Integer<u8, packed_bits::Bits3>,
    #[packed_field(bits = "2:0")]
    pub postdiv2: Integer<u8, packed_bits::Bits3>,
}

impl Register for PllReg {
    const REG_NUM: u8 = PLL0_REG;
}

/// Core configuration with pulse mode and clock select
pub fn core_config(pulse_mode: u32, clk_sel: u32) -> u32 {
    CORE_CONFIG_BASE
        | ((pulse_mode & 0x3) << CORE_CONFIG_PULSE_MODE_SHIFT)
        | (clk_sel & CORE_CONFIG_CLK_SEL_MASK)
}

#[cfg(test)]
mod test {
    use super::*;

    fn assert_frame(frame: Frame, expected: &[u8]) {
        assert_eq!(
            frame.as_bytes(),
            expected,
            "Incorrectly composed command: {:?} expected view: {:#04x?}",
            frame,
            expected
        );
    }

    /// Test chip address contstruction
    #[test]
    fn test_chip_address() {
        let all = ChipAddress::All;
        assert!(all.is_broadcast());
        assert_eq!(all.to_hw_addr(), 0);

        let one = ChipAddress::One(0xe2);
        assert!(!one.is_broadcast());
        assert_eq!(one.to_hw_addr(), 0xe2);
    }

    #[test]
    fn build_chain_inactive_cmd() {
        assert_frame(encode_chain_inactive(), &[0x53, 0x05, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn build_set_address_cmd() {
        assert_frame(encode_set_address(0), &[0x40, 0x05, 0x00, 0x00, 0x1c]);
        assert_frame(encode_set_address(2), &[0x40, 0x05, 0x02, 0x00, 0x01]);
        assert_frame(encode_set_address(4), &[0x40, 0x05, 0x04, 0x00, 0x03]);
    }

    /// Verify serialization of broadcast SetConfig(TICKET_MASK(...)) command
    #[test]
    fn build_set_config_ticket_mask() {
        let reg = TicketMaskReg::new(TicketMaskReg::ALL_CORES);
        assert_frame(
            SetConfigCmd::new(ChipAddress::All, TicketMaskReg::REG_NUM, reg.to_reg()).frame(),
            &[0x51, 0x09, 0x00, 0x14, 0xff, 0xff, 0xff, 0xff, 0x19],
        );
        let reg = TicketMaskReg::new(TicketMaskReg::MINING);
        assert_frame(
            encode_write_register(ChipAddress::All, TICKET_MASK_REG, reg.to_reg()),
            &[0x51, 0x09, 0x00, 0x14, 0x00, 0x00, 0x00, 0xff, 0x08],
        );
    }

    #[test]
    fn build_set_config_unicast() {
        assert_frame(
            encode_write_register(ChipAddress::One(4), TICKET_MASK_REG, 0x1234_5678),
            &[0x41, 0x09, 0x04, 0x14, 0x12, 0x34, 0x56, 0x78, 0x0e],
        );
    }

    #[test]
    fn build_get_status_cmd() {
        assert_frame(
            encode_read_register(ChipAddress::One(0), CHIP_ADDRESS_REG),
            &[0x42, 0x09, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1b],
        );
        assert_frame(
            GetStatusCmd::new(ChipAddress::All, GetAddressReg::REG_NUM).frame(),
            &[0x52, 0x09, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x13],
        );
    }

    #[test]
    fn test_frame_encoding_is_deterministic() {
        let first = encode_write_register(ChipAddress::One(0x10), CORE_CONFIG_REG, 0x8000_8710);
        let second = encode_write_register(ChipAddress::One(0x10), CORE_CONFIG_REG, 0x8000_8710);
        assert_eq!(first, second);
        assert_eq!(first.len(), 9);
        assert_eq!(first.checksum(), first.as_bytes()[8]);
    }

    /// PLL register for the 525 MHz operating point
    #[test]
    fn test_pll_reg_packing() {
        let reg = PllReg {
            enable: true,
            vco_high: false,
            fbdiv: 84.into(),
            postdiv1: 1.into(),
            refdiv: 0.into(),
            postdiv2: 0.into(),
        };
        assert_eq!(reg.to_reg(), 0x4054_0100);
        assert_frame(
            encode_write_register(ChipAddress::All, PllReg::REG_NUM, reg.to_reg()),
            &[0x51, 0x09, 0x00, 0x08, 0x40, 0x54, 0x01, 0x00, 0x0b],
        );
        assert_eq!(PllReg::from_reg(0x4054_0100).expect("unpacking failed"), reg);
    }

    #[test]
    fn test_get_address_reg() {
        let reg = GetAddressReg::from_reg(0x1398_0004).expect("unpacking failed");
        assert_eq!(reg.chip_id, BM1398_CHIP_ID);
        assert_eq!(reg.addr, 4);
    }

    #[test]
    fn test_core_registers() {
        assert_eq!(CoreParamReg::default().to_reg(), 0x11);
        assert_eq!(core_config(1, 0), 0x8000_8710);
        assert_eq!(DiodeMuxReg::new(3).expect("valid selector").to_reg(), 3);
        assert!(DiodeMuxReg::new(8).is_err());
    }
}
