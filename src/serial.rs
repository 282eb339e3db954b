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

use std::io::{Read, Write};
use std::time::Duration;
use serialport::{SerialPort as SerialPortTrait, DataBits, Parity, StopBits};
#[cfg(test)]
use std::{cell::{RefCell, RefMut}, collections::VecDeque, rc::Rc};

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Polled byte transport used by the xmodem sessions.
///
/// None of these calls may block waiting for data; `read_byte` is only
/// called after `available` returned true.
pub trait SerialPort {
    fn write_byte(&mut self, byte: u8) -> std::io::Result<()>;

    fn available(&mut self) -> std::io::Result<bool>;

    fn read_byte(&mut self) -> std::io::Result<u8>;
}

/// Reads and discards everything pending so the next session starts clean.
pub fn drain(serial: &mut dyn SerialPort) -> std::io::Result<usize> {
    let mut discarded = 0;
    while serial.available()? {
        serial.read_byte()?;
        discarded += 1;
    }
    Ok(discarded)
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(RealSerialPort { port })
    }
}

impl SerialPort for RealSerialPort {
    fn write_byte(&mut self, byte: u8) -> std::io::Result<()> {
        self.port.write_all(&[byte])?;
        self.port.flush()?;
        Ok(())
    }

    fn available(&mut self) -> std::io::Result<bool> {
        let pending = self.port.bytes_to_read()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(pending > 0)
    }

    fn read_byte(&mut self) -> std::io::Result<u8> {
        let mut buf = [0u8; 1];
        self.port.read_exact(&mut buf)?;
        Ok(buf[0])
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialPort {
    // Inbound script (None = nothing available on that poll)
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
        }
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_byte(&mut self, byte: u8) -> std::io::Result<()> {
        self.write_log.push(byte);
        Ok(())
    }

    fn available(&mut self) -> std::io::Result<bool> {
        match self.read_buffer.get(self.read_pos) {
            Some(Some(_)) => Ok(true),
            Some(None) => {
                self.read_pos += 1;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn read_byte(&mut self) -> std::io::Result<u8> {
        match self.read_buffer.get(self.read_pos) {
            Some(Some(byte)) => {
                self.read_pos += 1;
                Ok(*byte)
            }
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "Mock read with nothing available",
            )),
        }
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockSerialPort dropped with {} unconsumed responses (read {} of {} bytes)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}

// ============================================================================
// In-memory Link for Testing
// ============================================================================

#[cfg(test)]
type Queue = Rc<RefCell<VecDeque<u8>>>;

/// One end of a pair of in-memory byte queues
#[cfg(test)]
pub struct LinkEnd {
    inbound: Queue,
    outbound: Queue,
}

/// Two connected ends; what one writes the other reads
#[cfg(test)]
pub fn link() -> (LinkEnd, LinkEnd) {
    let a: Queue = Rc::new(RefCell::new(VecDeque::new()));
    let b: Queue = Rc::new(RefCell::new(VecDeque::new()));
    (
        LinkEnd { inbound: a.clone(), outbound: b.clone() },
        LinkEnd { inbound: b, outbound: a },
    )
}

#[cfg(test)]
impl LinkEnd {
    /// Bytes written by this end that the peer has not read yet
    pub fn in_flight(&self) -> RefMut<'_, VecDeque<u8>> {
        self.outbound.borrow_mut()
    }
}

#[cfg(test)]
impl SerialPort for LinkEnd {
    fn write_byte(&mut self, byte: u8) -> std::io::Result<()> {
        self.outbound.borrow_mut().push_back(byte);
        Ok(())
    }

    fn available(&mut self) -> std::io::Result<bool> {
        Ok(!self.inbound.borrow().is_empty())
    }

    fn read_byte(&mut self) -> std::io::Result<u8> {
        self.inbound.borrow_mut().pop_front().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::WouldBlock, "link empty")
        })
    }
}
