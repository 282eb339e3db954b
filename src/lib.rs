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

//! Simplified XMODEM/CRC over a polled serial link.
//!
//! The engine works on a caller-owned buffer whose length is a multiple of
//! 128 bytes. Block *n* lives at offset `(n - 1) * 128`. A download fills the
//! buffer from the start, an upload sends all of it.
//!
//! Both directions can be driven to completion with `run`, or one poll at a
//! time with `step` when the caller owns the scheduling loop.

pub mod crc;
pub mod error;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod serial;
pub mod timer;


pub use error::{AbortReason, TransferError};
pub use receiver::{ReceiverSession, ReceiverState};
pub use sender::{SenderSession, SenderState};
pub use serial::{RealSerialPort, SerialPort};
pub use timer::{Clock, RetryPolicy, SystemClock};

/// What a finished transfer moved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    /// Distinct blocks delivered
    pub blocks: usize,
    /// Bytes of the buffer that hold transferred data
    pub bytes: usize,
}
