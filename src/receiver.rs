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

//! Download side: a byte-driven state machine that stores validated blocks
//! into a caller-owned buffer.

use log::{debug, trace, warn};

use crate::TransferSummary;
use crate::crc::crc_update;
use crate::error::{AbortReason, TransferError, block_count};
use crate::protocol::*;
use crate::serial::{SerialPort, drain};
use crate::timer::{Clock, Idle, RetryPolicy, Watchdog};

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Between blocks, waiting for SOH, EOT or ETB
    Await,
    /// Expecting the block number
    Block,
    /// Expecting the complement of the block number
    Block2,
    /// Collecting payload bytes
    Run,
    /// Expecting the CRC high octet
    Crc1,
    /// Expecting the CRC low octet
    Crc2,
    Abort,
    End,
}

impl ReceiverState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReceiverState::Abort | ReceiverState::End)
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct ReceiverSession<'a> {
    state: ReceiverState,
    buffer: &'a mut [u8],
    watchdog: Watchdog,
    block_num: u8,
    last_succeeded: Option<u8>,
    position: usize,
    block_start: usize,
    duplicate: bool,
    staging: [u8; BLOCK_SIZE],
    counter: usize,
    running_crc: u16,
    received_crc: u16,
    blocks_stored: usize,
    abort_reason: Option<AbortReason>,
}

impl<'a> ReceiverSession<'a> {
    /// Starts a download into `buffer`, whose length must be a multiple of
    /// the block size.
    pub fn new(buffer: &'a mut [u8]) -> Result<Self, TransferError> {
        block_count(buffer.len())?;

        Ok(ReceiverSession {
            state: ReceiverState::Await,
            buffer,
            watchdog: Watchdog::new(RetryPolicy::default()),
            block_num: 0,
            last_succeeded: None,
            position: 0,
            block_start: 0,
            duplicate: false,
            staging: [0; BLOCK_SIZE],
            counter: 0,
            running_crc: 0,
            received_crc: 0,
            blocks_stored: 0,
            abort_reason: None,
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.watchdog = Watchdog::new(policy);
        self
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Offset the next accepted block will be stored at
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.abort_reason
    }

    /// Bytes of the buffer holding received data
    pub fn stored_len(&self) -> usize {
        (self.blocks_stored * BLOCK_SIZE).min(self.buffer.len())
    }

    /// Requests CRC mode from the sender. Call once before the first `step`.
    pub fn begin(&mut self, serial: &mut dyn SerialPort, clock: &mut dyn Clock) -> Result<(), TransferError> {
        serial.write_byte(HANDSHAKE)?;
        debug!("Sent: 'C'");
        clock.reset();
        Ok(())
    }

    /// Polls the transport once and advances the state machine.
    ///
    /// Only I/O failures are returned as errors; protocol failures end in
    /// `ReceiverState::Abort`.
    pub fn step(&mut self, serial: &mut dyn SerialPort, clock: &mut dyn Clock) -> Result<ReceiverState, TransferError> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }

        if !serial.available()? {
            match self.watchdog.check(clock) {
                Idle::Waiting => {}
                Idle::Retry => {
                    serial.write_byte(HANDSHAKE)?;
                    debug!("Timeout, sent: 'C' (retry {})", self.watchdog.retries());
                }
                Idle::Exhausted => {
                    self.state = self.abort(AbortReason::RetriesExhausted);
                }
            }
            return Ok(self.state);
        }

        let byte = serial.read_byte()?;
        self.watchdog.progress(clock);
        self.state = self.handle_byte(byte, serial)?;
        Ok(self.state)
    }

    /// Runs the whole download, then discards anything left on the line.
    pub fn run(&mut self, serial: &mut dyn SerialPort, clock: &mut dyn Clock) -> Result<TransferSummary, TransferError> {
        self.begin(serial, clock)?;
        while !self.step(serial, clock)?.is_terminal() {}

        let discarded = drain(serial)?;
        if discarded > 0 {
            debug!("Discarded {} trailing bytes", discarded);
        }

        match self.abort_reason {
            Some(reason) => Err(reason.into()),
            None => Ok(TransferSummary {
                blocks: self.blocks_stored,
                bytes: self.stored_len(),
            }),
        }
    }

    fn handle_byte(&mut self, byte: u8, serial: &mut dyn SerialPort) -> Result<ReceiverState, TransferError> {
        trace!("{:?} <- {:02X}", self.state, byte);

        let next = match self.state {
            ReceiverState::Await => match ControlByte::from_byte(byte) {
                Some(ControlByte::Soh) => {
                    self.counter = 0;
                    self.running_crc = 0;
                    self.block_start = self.position;
                    ReceiverState::Block
                }
                Some(ControlByte::Eot) => {
                    debug!("End of transmission");
                    serial.write_byte(ControlByte::Ack.into())?;
                    serial.write_byte(ControlByte::Ack.into())?;
                    ReceiverState::End
                }
                Some(ControlByte::Etb) => {
                    debug!("End of transmission block");
                    serial.write_byte(ControlByte::Ack.into())?;
                    ReceiverState::End
                }
                Some(ControlByte::Can) => self.abort(AbortReason::Cancelled),
                _ => self.abort(AbortReason::UnexpectedByte(byte)),
            },
            ReceiverState::Block => {
                self.block_num = byte;
                ReceiverState::Block2
            }
            ReceiverState::Block2 => {
                if byte != !self.block_num {
                    self.abort(AbortReason::BadBlockNumber {
                        block: self.block_num,
                        complement: byte,
                    })
                } else {
                    self.duplicate = self.last_succeeded == Some(self.block_num);
                    if self.duplicate {
                        debug!("Block {:02} sent twice, ignoring", self.block_num);
                        self.position = self.rewind(self.position);
                    }
                    ReceiverState::Run
                }
            }
            ReceiverState::Run => {
                self.staging[self.counter] = byte;
                self.running_crc = crc_update(self.running_crc, byte);
                self.counter += 1;
                if self.counter == BLOCK_SIZE {
                    ReceiverState::Crc1
                } else {
                    ReceiverState::Run
                }
            }
            ReceiverState::Crc1 => {
                self.received_crc = (byte as u16) << 8;
                ReceiverState::Crc2
            }
            ReceiverState::Crc2 => {
                self.received_crc |= byte as u16;
                self.finish_block(serial)?;
                ReceiverState::Await
            }
            ReceiverState::Abort | ReceiverState::End => self.state,
        };

        Ok(next)
    }

    fn finish_block(&mut self, serial: &mut dyn SerialPort) -> Result<(), TransferError> {
        if self.received_crc == self.running_crc {
            serial.write_byte(ControlByte::Ack.into())?;
            if !self.duplicate {
                self.buffer[self.position..self.position + BLOCK_SIZE].copy_from_slice(&self.staging);
                self.blocks_stored += 1;
            }
            debug!("Block {:02} OK, CRC {:04X}", self.block_num, self.running_crc);
            self.position = self.advance(self.position);
            self.last_succeeded = Some(self.block_num);
        } else {
            debug!(
                "Invalid CRC on block {:02}: got {:04X}, expected {:04X}, NAK",
                self.block_num, self.received_crc, self.running_crc
            );
            serial.write_byte(ControlByte::Nak.into())?;
            self.position = self.block_start;
        }
        Ok(())
    }

    fn advance(&self, pos: usize) -> usize {
        (pos + BLOCK_SIZE) % self.buffer.len()
    }

    fn rewind(&self, pos: usize) -> usize {
        (pos + self.buffer.len() - BLOCK_SIZE) % self.buffer.len()
    }

    fn abort(&mut self, reason: AbortReason) -> ReceiverState {
        warn!("Receive aborted: {:?}", reason);
        self.abort_reason = Some(reason);
        ReceiverState::Abort
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::crc16;
    use crate::serial::MockSerialPort;
    use crate::timer::ManualClock;

    const ACK: u8 = ControlByte::Ack as u8;
    const NAK: u8 = ControlByte::Nak as u8;
    const SOH: u8 = ControlByte::Soh as u8;
    const EOT: u8 = ControlByte::Eot as u8;

    fn frame_with_crc(block: u8, payload: &[u8; BLOCK_SIZE], crc: u16) -> Vec<Option<u8>> {
        let mut bytes = vec![SOH, block, !block];
        bytes.extend_from_slice(payload);
        bytes.push((crc >> 8) as u8);
        bytes.push(crc as u8);
        bytes.into_iter().map(Some).collect()
    }

    fn frame(block: u8, payload: &[u8; BLOCK_SIZE]) -> Vec<Option<u8>> {
        frame_with_crc(block, payload, crc16(payload))
    }

    fn feed(
        session: &mut ReceiverSession,
        serial: &mut dyn SerialPort,
        clock: &mut dyn Clock,
        bytes: usize,
    ) -> ReceiverState {
        for _ in 0..bytes {
            session.step(serial, clock).expect("step failed");
        }
        session.state()
    }

    const FRAME_LEN: usize = 3 + BLOCK_SIZE + 2;

    #[test]
    fn test_receive_zero_block() {
        let mut responses = frame(1, &[0u8; BLOCK_SIZE]);
        responses.push(Some(EOT));

        // The CRC of an all-zero block is zero
        assert_eq!(responses[FRAME_LEN - 2], Some(0x00));
        assert_eq!(responses[FRAME_LEN - 1], Some(0x00));

        let mut serial = MockSerialPort::new(responses, vec![HANDSHAKE, ACK, ACK, ACK]);
        let mut clock = ManualClock::frozen();
        let mut buffer = [0xEEu8; 256];

        let mut session = ReceiverSession::new(&mut buffer).unwrap();
        let summary = session.run(&mut serial, &mut clock).expect("transfer failed");
        assert_eq!(session.state(), ReceiverState::End);
        assert_eq!(session.position(), 128);
        assert_eq!(summary, TransferSummary { blocks: 1, bytes: 128 });

        assert!(buffer[..128].iter().all(|&b| b == 0));
        assert!(buffer[128..].iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn test_duplicate_block_not_stored_twice() {
        let mut responses = frame(1, &[0u8; BLOCK_SIZE]);
        responses.extend(frame(1, &[0u8; BLOCK_SIZE]));

        let mut serial = MockSerialPort::new(responses, vec![HANDSHAKE, ACK, ACK]);
        let mut clock = ManualClock::frozen();
        let mut buffer = [0xEEu8; 256];

        {
            let mut session = ReceiverSession::new(&mut buffer).unwrap();
            session.begin(&mut serial, &mut clock).unwrap();

            assert_eq!(feed(&mut session, &mut serial, &mut clock, FRAME_LEN), ReceiverState::Await);
            assert_eq!(session.position(), 128);

            assert_eq!(feed(&mut session, &mut serial, &mut clock, FRAME_LEN), ReceiverState::Await);
            assert_eq!(session.position(), 128);
            assert_eq!(session.stored_len(), 128);
        }

        assert!(buffer[..128].iter().all(|&b| b == 0));
        assert!(buffer[128..].iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn test_duplicate_payload_is_ignored() {
        let first = [0x11u8; BLOCK_SIZE];
        let resent = [0x22u8; BLOCK_SIZE];
        let second = [0x33u8; BLOCK_SIZE];

        let mut responses = frame(1, &first);
        responses.extend(frame(1, &resent));
        responses.extend(frame(2, &second));
        responses.push(Some(EOT));

        let mut serial = MockSerialPort::new(responses, vec![HANDSHAKE, ACK, ACK, ACK, ACK, ACK]);
        let mut clock = ManualClock::frozen();
        let mut buffer = [0u8; 256];

        let mut session = ReceiverSession::new(&mut buffer).unwrap();
        let summary = session.run(&mut serial, &mut clock).expect("transfer failed");
        assert_eq!(summary.blocks, 2);
        // Two blocks in a two-block buffer wrap back to the start
        assert_eq!(session.position(), 0);

        assert_eq!(&buffer[..128], &first[..]);
        assert_eq!(&buffer[128..], &second[..]);
    }

    #[test]
    fn test_bad_crc_naks_and_rolls_back() {
        let payload: [u8; BLOCK_SIZE] = std::array::from_fn(|i| i as u8);
        let good_crc = crc16(&payload);

        let mut responses = frame_with_crc(1, &payload, good_crc ^ 0x0101);
        responses.extend(frame(1, &payload));
        responses.push(Some(EOT));

        let mut serial = MockSerialPort::new(responses, vec![HANDSHAKE, NAK, ACK, ACK, ACK]);
        let mut clock = ManualClock::frozen();
        let mut buffer = [0xEEu8; 256];

        {
            let mut session = ReceiverSession::new(&mut buffer).unwrap();
            session.begin(&mut serial, &mut clock).unwrap();

            assert_eq!(feed(&mut session, &mut serial, &mut clock, FRAME_LEN), ReceiverState::Await);
            assert_eq!(session.position(), 0);
            assert_eq!(session.stored_len(), 0);

            assert_eq!(feed(&mut session, &mut serial, &mut clock, FRAME_LEN), ReceiverState::Await);
            assert_eq!(session.position(), 128);

            assert_eq!(feed(&mut session, &mut serial, &mut clock, 1), ReceiverState::End);
        }

        assert_eq!(&buffer[..128], &payload[..]);
    }

    #[test]
    fn test_bad_crc_never_writes_buffer() {
        let payload = [0x55u8; BLOCK_SIZE];
        let responses = frame_with_crc(1, &payload, 0xBEEF);

        let mut serial = MockSerialPort::new(responses, vec![HANDSHAKE, NAK]);
        let mut clock = ManualClock::frozen();
        let mut buffer = [0u8; 128];

        {
            let mut session = ReceiverSession::new(&mut buffer).unwrap();
            session.begin(&mut serial, &mut clock).unwrap();
            feed(&mut session, &mut serial, &mut clock, FRAME_LEN);
        }

        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bad_crc_on_duplicate_keeps_position() {
        let payload = [0x42u8; BLOCK_SIZE];

        let mut responses = frame(1, &payload);
        responses.extend(frame_with_crc(1, &payload, 0x0000));

        let mut serial = MockSerialPort::new(responses, vec![HANDSHAKE, ACK, NAK]);
        let mut clock = ManualClock::frozen();
        let mut buffer = [0u8; 256];

        let mut session = ReceiverSession::new(&mut buffer).unwrap();
        session.begin(&mut serial, &mut clock).unwrap();
        feed(&mut session, &mut serial, &mut clock, FRAME_LEN);
        feed(&mut session, &mut serial, &mut clock, FRAME_LEN);
        assert_eq!(session.position(), 128);
    }

    #[test]
    fn test_etb_acks_once() {
        let mut serial = MockSerialPort::new(vec![Some(ControlByte::Etb.into())], vec![HANDSHAKE, ACK]);
        let mut clock = ManualClock::frozen();
        let mut buffer = [0u8; 128];

        let mut session = ReceiverSession::new(&mut buffer).unwrap();
        let summary = session.run(&mut serial, &mut clock).unwrap();
        assert_eq!(summary.blocks, 0);
    }

    #[test]
    fn test_bad_block_number_aborts_and_drains() {
        let responses = vec![Some(SOH), Some(0x01), Some(0x00), Some(0x55), Some(0x55)];
        let mut serial = MockSerialPort::new(responses, vec![HANDSHAKE]);
        let mut clock = ManualClock::frozen();
        let mut buffer = [0u8; 128];

        let mut session = ReceiverSession::new(&mut buffer).unwrap();
        match session.run(&mut serial, &mut clock) {
            Err(TransferError::BadBlockNumber { block: 0x01, complement: 0x00 }) => {}
            other => panic!("Expected bad block number, got {:?}", other),
        }
        assert_eq!(session.state(), ReceiverState::Abort);
    }

    #[test]
    fn test_unexpected_byte_aborts() {
        let mut serial = MockSerialPort::new(vec![Some(b'A')], vec![HANDSHAKE]);
        let mut clock = ManualClock::frozen();
        let mut buffer = [0u8; 128];

        let mut session = ReceiverSession::new(&mut buffer).unwrap();
        assert!(matches!(
            session.run(&mut serial, &mut clock),
            Err(TransferError::UnexpectedByte(b'A'))
        ));
        assert_eq!(session.abort_reason(), Some(AbortReason::UnexpectedByte(b'A')));
    }

    #[test]
    fn test_cancel_aborts() {
        let mut serial = MockSerialPort::new(vec![Some(ControlByte::Can.into())], vec![HANDSHAKE]);
        let mut clock = ManualClock::frozen();
        let mut buffer = [0u8; 128];

        let mut session = ReceiverSession::new(&mut buffer).unwrap();
        assert!(matches!(session.run(&mut serial, &mut clock), Err(TransferError::Cancelled)));
    }

    #[test]
    fn test_silent_line_exhausts_retries() {
        // Initial handshake plus one re-request per retry, the last timeout aborts
        let policy = RetryPolicy::default();
        let expected = vec![HANDSHAKE; 1 + policy.max_retries as usize + 1];

        let mut serial = MockSerialPort::new(vec![], expected);
        let mut clock = ManualClock::always_late();
        let mut buffer = [0u8; 128];

        let mut session = ReceiverSession::new(&mut buffer).unwrap();
        assert!(matches!(session.run(&mut serial, &mut clock), Err(TransferError::RetriesExhausted)));
        assert_eq!(session.state(), ReceiverState::Abort);
    }

    #[test]
    fn test_handshake_retry_then_transfer() {
        let mut responses = vec![None, None];
        responses.extend(frame(1, &[0x7Fu8; BLOCK_SIZE]));
        responses.push(Some(EOT));

        let mut serial = MockSerialPort::new(responses, vec![HANDSHAKE, HANDSHAKE, HANDSHAKE, ACK, ACK, ACK]);
        let mut clock = ManualClock::always_late();
        let mut buffer = [0u8; 128];

        let mut session = ReceiverSession::new(&mut buffer).unwrap();
        let summary = session.run(&mut serial, &mut clock).unwrap();
        assert_eq!(summary.bytes, 128);
        assert!(buffer.iter().all(|&b| b == 0x7F));
    }

    #[test]
    fn test_progress_resets_retry_budget() {
        let mut responses = vec![None];
        responses.extend(frame(1, &[0u8; BLOCK_SIZE]));
        responses.push(None);
        responses.push(Some(EOT));

        let policy = RetryPolicy { timeout_ms: 1000, max_retries: 0 };
        let mut serial = MockSerialPort::new(responses, vec![HANDSHAKE, HANDSHAKE, ACK, HANDSHAKE, ACK, ACK]);
        let mut clock = ManualClock::always_late();
        let mut buffer = [0u8; 128];

        let mut session = ReceiverSession::new(&mut buffer).unwrap().with_policy(policy);
        assert!(session.run(&mut serial, &mut clock).is_ok());
    }

    #[test]
    fn test_wraps_when_buffer_full() {
        let first = [0x01u8; BLOCK_SIZE];
        let second = [0x02u8; BLOCK_SIZE];

        let mut responses = frame(1, &first);
        responses.extend(frame(2, &second));
        responses.push(Some(EOT));

        let mut serial = MockSerialPort::new(responses, vec![HANDSHAKE, ACK, ACK, ACK, ACK]);
        let mut clock = ManualClock::frozen();
        let mut buffer = [0u8; 128];

        let mut session = ReceiverSession::new(&mut buffer).unwrap();
        let summary = session.run(&mut serial, &mut clock).unwrap();
        assert_eq!(summary, TransferSummary { blocks: 2, bytes: 128 });
        assert_eq!(session.position(), 0);
        drop(session);

        assert_eq!(buffer, second);
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut serial = MockSerialPort::new(vec![Some(EOT)], vec![HANDSHAKE, ACK, ACK]);
        let mut clock = ManualClock::frozen();
        let mut buffer = [0u8; 128];

        let mut session = ReceiverSession::new(&mut buffer).unwrap();
        session.run(&mut serial, &mut clock).unwrap();
        assert_eq!(session.step(&mut serial, &mut clock).unwrap(), ReceiverState::End);
    }

    #[test]
    fn test_rejects_unaligned_buffer() {
        let mut buffer = [0u8; 100];
        assert!(matches!(
            ReceiverSession::new(&mut buffer),
            Err(TransferError::BufferSize(100))
        ));
    }
}
