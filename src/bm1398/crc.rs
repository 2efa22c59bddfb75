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

//! CRC5 armoring of BM1398 command frames
//!
//! This is the CRC-5/USB flavour: polynomial x^5 + x^2 + 1, initial value 0x1f, bits are fed
//! MSB first, no reflection and no final XOR. The checksum covers every bit of the frame that
//! precedes it, including the preamble and length byte.

/// CRC5 polynomial without the implicit x^5 term
const CRC5_POLY: u8 = 0x05;
/// CRC5 register preset
const CRC5_INIT: u8 = 0x1f;
const CRC5_MASK: u8 = 0x1f;

/// Compute CRC5 over the first `bits` bits of `data`
///
/// Bits are taken MSB first, byte after byte. `bits` may end in the middle of a byte.
pub fn crc5_bits(data: &[u8], bits: usize) -> u8 {
    assert!(
        bits <= data.len() * 8,
        "CRC5 over {} bits requested but only {} bytes supplied",
        bits,
        data.len()
    );

    let mut crc = CRC5_INIT;
    for bit_idx in 0..bits {
        let bit = (data[bit_idx / 8] >> (7 - bit_idx % 8)) & 1;
        let top = (crc >> 4) & 1;
        crc = (crc << 1) & CRC5_MASK;
        if top != bit {
            crc ^= CRC5_POLY;
        }
    }
    crc
}

/// Compute CRC5 over whole bytes
#[inline]
pub fn crc5(data: &[u8]) -> u8 {
    crc5_bits(data, data.len() * 8)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_crc5_golden_frames() {
        // (frame without checksum, expected checksum)
        let vectors: &[(&[u8], u8)] = &[
            (&[0x53, 0x05, 0x00, 0x00], 0x03),
            (&[0x40, 0x05, 0x00, 0x00], 0x1c),
            (&[0x51, 0x09, 0x00, 0x14, 0xff, 0xff, 0xff, 0xff], 0x19),
            (&[0x52, 0x09, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], 0x13),
            // frames captured from esp-miner for other members of the family
            (&[0x52, 0x05, 0x00, 0x00], 0x0a),
            (&[0x51, 0x09, 0x00, 0x28, 0x11, 0x30, 0x02, 0x00], 0x03),
            (&[0x55, 0x05, 0x00, 0x00], 0x10),
        ];
        for (frame, expected) in vectors {
            let crc = crc5(frame);
            assert_eq!(
                crc, *expected,
                "Wrong CRC5 of frame {:#04x?}: {:#04x} expected: {:#04x}",
                frame, crc, expected
            );
        }
    }

    #[test]
    fn test_crc5_fits_five_bits() {
        for byte in 0..=255u8 {
            assert!(crc5(&[0x41, 0x09, byte, 0x14, byte, 0x00, byte, 0x01]) <= CRC5_MASK);
        }
    }

    #[test]
    fn test_crc5_partial_byte() {
        // no bits means preset value
        assert_eq!(crc5_bits(&[0x53], 0), CRC5_INIT);
        // only the three leading bits (1, 0, 1) of 0xa0 are consumed
        assert_eq!(crc5_bits(&[0xa0], 3), 0x12);
        assert_eq!(crc5_bits(&[0xbf], 3), 0x12);
    }

    #[test]
    #[should_panic]
    fn test_crc5_too_many_bits() {
        crc5_bits(&[0x53, 0x05], 17);
    }
}
