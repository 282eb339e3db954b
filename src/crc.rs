// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! CRC-16/XMODEM (poly 0x1021, init 0, no final xor)

const POLY: u16 = 0x1021;

/// Folds one byte into a running CRC accumulator.
pub fn crc_update(mut acc: u16, byte: u8) -> u16 {
    acc ^= (byte as u16) << 8;
    for _ in 0..8 {
        if acc & 0x8000 != 0 {
            acc = (acc << 1) ^ POLY;
        } else {
            acc <<= 1;
        }
    }
    acc
}

/// CRC of a whole slice, starting from zero.
pub fn crc16(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0, |acc, &b| crc_update(acc, b))
}
