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

//! XMODEM/CRC protocol constants

/// Payload bytes carried by every block
pub const BLOCK_SIZE: usize = 128;

/// Highest block number a session can address
pub const MAX_BLOCKS: usize = 255;

/// Receiver requests CRC mode, and re-requests while idle
pub const HANDSHAKE: u8 = b'C';

/// Padding byte used to fill the last block of a file
pub const SUB: u8 = 0x1A;

/// Control bytes exchanged between sender and receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlByte {
    /// Start of header - begins a 128-byte block
    Soh = 0x01,
    /// End of transmission - sender has no more blocks
    Eot = 0x04,
    /// Acknowledge - block received intact
    Ack = 0x06,
    /// Negative acknowledge - block failed its CRC, retransmit
    Nak = 0x15,
    /// End of transmission block - alternate end marker
    Etb = 0x17,
    /// Cancel - peer gives up on the transfer
    Can = 0x18,
}

impl ControlByte {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(ControlByte::Soh),
            0x04 => Some(ControlByte::Eot),
            0x06 => Some(ControlByte::Ack),
            0x15 => Some(ControlByte::Nak),
            0x17 => Some(ControlByte::Etb),
            0x18 => Some(ControlByte::Can),
            _ => None,
        }
    }

    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

impl From<ControlByte> for u8 {
    fn from(c: ControlByte) -> u8 {
        c.as_byte()
    }
}
