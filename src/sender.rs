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

use log::{debug, trace, warn};

use crate::TransferSummary;
use crate::crc::crc_update;
use crate::error::{AbortReason, TransferError, block_count};
use crate::protocol::*;
use crate::serial::SerialPort;
use crate::timer::{Clock, Idle, RetryPolicy, Watchdog};

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Waiting for the receiver's handshake or acknowledgement
    Await,
    Abort,
    End,
}

impl SenderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SenderState::Abort | SenderState::End)
    }
}

// ============================================================================
// Session
// ============================================================================

/// Upload side. Blocks are sent in reaction to the receiver's control
/// bytes; the whole buffer is sent, one block per 128 bytes.
pub struct SenderSession<'a> {
    state: SenderState,
    buffer: &'a [u8],
    blocks: usize,
    block_num: usize,
    watchdog: Watchdog,
    frames_sent: usize,
    abort_reason: Option<AbortReason>,
}

impl<'a> SenderSession<'a> {
    pub fn new(buffer: &'a [u8]) -> Result<Self, TransferError> {
        let blocks = block_count(buffer.len())?;

        Ok(SenderSession {
            state: SenderState::Await,
            buffer,
            blocks,
            block_num: 1,
            watchdog: Watchdog::new(RetryPolicy::default()),
            frames_sent: 0,
            abort_reason: None,
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.watchdog = Watchdog::new(policy);
        self
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Block currently being offered to the receiver
    pub fn block_num(&self) -> usize {
        self.block_num
    }

    /// Block frames written so far, retransmissions included
    pub fn frames_sent(&self) -> usize {
        self.frames_sent
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.abort_reason
    }

    /// Starts the idle timer. Nothing is sent until the receiver asks.
    pub fn begin(&mut self, clock: &mut dyn Clock) {
        clock.reset();
    }

    /// Polls the transport once and reacts to at most one control byte.
    pub fn step(&mut self, serial: &mut dyn SerialPort, clock: &mut dyn Clock) -> Result<SenderState, TransferError> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }

        if !serial.available()? {
            match self.watchdog.check(clock) {
                Idle::Waiting => {}
                Idle::Retry => debug!("Timeout waiting for receiver (retry {})", self.watchdog.retries()),
                Idle::Exhausted => self.state = self.abort(AbortReason::RetriesExhausted),
            }
            return Ok(self.state);
        }

        let byte = serial.read_byte()?;
        self.watchdog.progress(clock);

        if byte == HANDSHAKE {
            debug!("Received: 'C'");
            self.block_num = 1;
            self.transmit_block(serial)?;
            return Ok(self.state);
        }

        match ControlByte::from_byte(byte) {
            Some(ControlByte::Ack) => {
                self.block_num += 1;
                if self.block_num > self.blocks {
                    serial.write_byte(ControlByte::Eot.into())?;
                    debug!("Sent: EOT");
                    self.state = SenderState::End;
                } else {
                    self.transmit_block(serial)?;
                }
            }
            Some(ControlByte::Can) => {
                self.state = self.abort(AbortReason::Cancelled);
            }
            Some(ControlByte::Nak) => {
                debug!("Received: NAK, resending block {:02}", self.block_num);
                self.transmit_block(serial)?;
            }
            _ => {
                debug!("Unexpected byte {:02X}, resending block {:02}", byte, self.block_num);
                self.transmit_block(serial)?;
            }
        }

        Ok(self.state)
    }

    /// Runs the whole upload.
    pub fn run(&mut self, serial: &mut dyn SerialPort, clock: &mut dyn Clock) -> Result<TransferSummary, TransferError> {
        self.begin(clock);
        while !self.step(serial, clock)?.is_terminal() {}

        match self.abort_reason {
            Some(reason) => Err(reason.into()),
            None => Ok(TransferSummary {
                blocks: self.blocks,
                bytes: self.buffer.len(),
            }),
        }
    }

    fn transmit_block(&mut self, serial: &mut dyn SerialPort) -> Result<(), TransferError> {
        // block_count() caps blocks at 255
        let num = self.block_num as u8;

        serial.write_byte(ControlByte::Soh.into())?;
        serial.write_byte(num)?;
        serial.write_byte(!num)?;

        let mut offset = BLOCK_SIZE * (self.block_num - 1);
        if offset >= self.buffer.len() {
            offset = 0;
        }

        let mut crc = 0;
        for &byte in &self.buffer[offset..offset + BLOCK_SIZE] {
            crc = crc_update(crc, byte);
            serial.write_byte(byte)?;
        }

        serial.write_byte((crc >> 8) as u8)?;
        serial.write_byte(crc as u8)?;
        self.frames_sent += 1;

        trace!("Sent: block {:02} from offset {}", num, offset);
        debug!("Sent: block {:02}, CRC {:04X}", num, crc);
        Ok(())
    }

    fn abort(&mut self, reason: AbortReason) -> SenderState {
        warn!("Send aborted: {:?}", reason);
        self.abort_reason = Some(reason);
        SenderState::Abort
    }
}

// ============================================================================
// Tests
// ============================================================================
