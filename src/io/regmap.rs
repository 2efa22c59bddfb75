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

//! Translation of logical FPGA register indices to physical word offsets
//!
//! The table is shared by the control firmware of both S19 FPGA revisions, logical indices
//! stay the same while the physical layout differs between them.

/// Number of logical registers
pub const REGISTER_MAP_SIZE: usize = 110;

/// Logical index -> physical 32-bit word offset
pub(crate) static REGISTER_MAP: [usize; REGISTER_MAP_SIZE] = [
    0, 1, 2, 3, 4, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, //
    // 16 and 17 are the first-word and rest-word ports of the work FIFO (0x040)
    16, 16, 33, 34, 35, 36, 37, 38, 0, 48, 49, 60, 62, 63, 64, 65, //
    66, 68, 69, 70, 71, 72, 73, 76, 77, 78, 80, 96, 97, 98, 99, 100, //
    101, 102, 103, 104, 105, 106, 107, 108, 109, 110, 111, 112, 113, 114, 115, 116, //
    117, 118, 119, 124, 125, 126, 127, 128, 129, 130, 132, 133, 134, 135, 136, 137, //
    138, 139, 140, 141, 142, 143, 144, 145, 146, 147, 148, 149, 150, 151, 152, 153, //
    154, 155, 156, 157, 158, 159, 164, 165, 166, 167, 168, 169, //
    // unpopulated, resolve to the hardware version register
    0, 0,
];

/// Look up physical word offset of a logical register
///
/// Index out of range is a programming error.
#[inline]
pub fn logical_to_offset(index: usize) -> usize {
    REGISTER_MAP[index]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_work_fifo_indices_share_port() {
        // TW write command lives at byte offset 0x40
        assert_eq!(logical_to_offset(16), 0x40 / 4);
        assert_eq!(logical_to_offset(17), 0x40 / 4);
    }

    #[test]
    fn test_known_translations() {
        assert_eq!(logical_to_offset(0), 0);
        // nonce timeout
        assert_eq!(logical_to_offset(20), 0x08c / 4);
        assert_eq!(logical_to_offset(35), 70);
        assert_eq!(logical_to_offset(36), 71);
        assert_eq!(logical_to_offset(42), 80);
        assert_eq!(logical_to_offset(107), 169);
        assert_eq!(logical_to_offset(REGISTER_MAP_SIZE - 1), 0);
    }

    #[test]
    fn test_offsets_fit_window() {
        for offset in REGISTER_MAP.iter() {
            assert!(*offset < crate::io::WINDOW_WORDS);
        }
    }

    #[test]
    #[should_panic]
    fn test_index_out_of_range() {
        logical_to_offset(REGISTER_MAP_SIZE);
    }
}
