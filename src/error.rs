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

use thiserror::Error;

use crate::protocol::{BLOCK_SIZE, MAX_BLOCKS};

/// Why a session ended in `Abort`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Block number and its complement disagree
    BadBlockNumber { block: u8, complement: u8 },
    /// A byte other than SOH/EOT/ETB arrived between blocks
    UnexpectedByte(u8),
    /// Peer sent CAN
    Cancelled,
    /// Idle timeouts exceeded the retry budget
    RetriesExhausted,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid block number {block:#04X} (complement {complement:#04X})")]
    BadBlockNumber { block: u8, complement: u8 },

    #[error("unexpected byte {0:#04X} while awaiting a block")]
    UnexpectedByte(u8),

    #[error("transfer cancelled by peer")]
    Cancelled,

    #[error("no response after too many retries")]
    RetriesExhausted,

    #[error("buffer of {0} bytes is not a non-zero multiple of 128 bytes up to 255 blocks")]
    BufferSize(usize),
}

impl From<AbortReason> for TransferError {
    fn from(reason: AbortReason) -> Self {
        match reason {
            AbortReason::BadBlockNumber { block, complement } => {
                TransferError::BadBlockNumber { block, complement }
            }
            AbortReason::UnexpectedByte(b) => TransferError::UnexpectedByte(b),
            AbortReason::Cancelled => TransferError::Cancelled,
            AbortReason::RetriesExhausted => TransferError::RetriesExhausted,
        }
    }
}

/// Number of blocks a buffer holds, if its length is usable for a session.
pub fn block_count(len: usize) -> Result<usize, TransferError> {
    if len == 0 || len % BLOCK_SIZE != 0 || len / BLOCK_SIZE > MAX_BLOCKS {
        return Err(TransferError::BufferSize(len));
    }
    Ok(len / BLOCK_SIZE)
}
